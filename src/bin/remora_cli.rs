use std::{
    error::Error,
    io::{self, Write},
};

use clap::Parser;
use remora::{
    Command, Value, prompt,
    protocol::{Client, QueryRequest, TxId},
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    address: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let mut client = Client::connect(cli.address.as_str())?;
    let mut tx: Option<TxId> = None;
    let mut stats = false;

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        let reply = match cmd {
            Command::Exit => break,
            Command::Stats => {
                stats = !stats;
                println!("stats {}", if stats { "on" } else { "off" });
                continue;
            }
            Command::Begin => match client.begin() {
                Ok(id) => {
                    tx = Some(id);
                    println!("transaction {id}");
                    continue;
                }
                Err(e) => Err(e),
            },
            finish @ (Command::Commit | Command::Rollback) => {
                let Some(id) = tx.take() else {
                    eprintln!("no open transaction");
                    continue;
                };
                if finish == Command::Commit {
                    client.commit(id)
                } else {
                    client.rollback(id)
                }
            }
            Command::Query(query) if query.is_empty() => continue,
            Command::Query(query) => {
                let mut request = QueryRequest::query(query).with_stats(stats);
                if let Some(id) = tx {
                    request = request.with_tx_id(id);
                }
                client.request(request)
            }
        };

        match reply {
            Ok(parts) => print_reply(&parts)?,
            Err(e) => eprintln!("query error: {e}"),
        }
    }

    Ok(())
}

fn print_reply(parts: &[Value]) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    for part in parts {
        writeln!(stdout, "{part}")?;
    }
    stdout.flush()
}
