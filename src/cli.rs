//! CLI utilities for Remora.
//!
//! The utilities present in this module are used by `remora_cli` to read commands from a
//! user. Lines starting with `.` are client commands; anything else is sent to the server
//! as a query.
//!
//! # Example
//! ```rust
//! use remora::Command;
//!
//! let cmd: Command = ".begin".try_into().unwrap();
//! assert_eq!(cmd, Command::Begin);
//!
//! let cmd: Command = "start n return n".try_into().unwrap();
//! assert_eq!(cmd, Command::Query("start n return n".to_string()));
//! ```
use std::io::{self, BufRead, Write};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("unrecognized command '{0}'")]
    UnrecognizedCommand(String),
    #[error("failed to read command: {0}")]
    Io(#[from] io::Error),
}

/// Possible commands from a user.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Exit command `.exit`
    Exit,
    /// Open a transaction, `.begin`
    Begin,
    /// Commit the open transaction, `.commit`
    Commit,
    /// Roll back the open transaction, `.rollback`
    Rollback,
    /// Toggle info frames, `.stats`
    Stats,
    /// Query text sent as is
    Query(String),
}

impl TryFrom<&str> for Command {
    type Error = CommandError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            ".exit" => Ok(Command::Exit),
            ".begin" => Ok(Command::Begin),
            ".commit" => Ok(Command::Commit),
            ".rollback" => Ok(Command::Rollback),
            ".stats" => Ok(Command::Stats),
            s if !s.starts_with('.') => Ok(Command::Query(s.to_string())),
            s => Err(CommandError::UnrecognizedCommand(s.to_string())),
        }
    }
}

/// Prompt user for a valid Remora command. End of input reads as [`Command::Exit`].
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, CommandError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Exit);
    }
    s.as_str().try_into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".exit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_queries() {
        let input = b"start n return n\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert_eq!(Command::Query("start n return n".to_string()), res);
    }

    #[test]
    fn prompt_transaction_commands() {
        for (input, expected) in [
            (&b".begin\n"[..], Command::Begin),
            (&b".commit\n"[..], Command::Commit),
            (&b".rollback\n"[..], Command::Rollback),
            (&b".stats\n"[..], Command::Stats),
        ] {
            assert_eq!(prompt(input, Vec::new()).unwrap(), expected);
        }
    }

    #[test]
    fn end_of_input_exits() {
        let input = b"";
        assert_eq!(prompt(&input[..], Vec::new()).unwrap(), Command::Exit);
    }

    #[test]
    #[should_panic(expected = "UnrecognizedCommand(\".something_wrong\")")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }
}
