use std::io::{self, Read, Write};

use bincode::{Decode, Encode, decode_from_std_read, error::DecodeError};
use thiserror::Error;

use crate::codec::{self, WireConfig};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] DecodeError),
    #[error("Transport IO Error: {0}")]
    Io(#[from] io::Error),
    #[error("peer closed the connection")]
    Closed,
    #[error("context terminated")]
    Terminated,
    #[error("request queue lock poisoned")]
    Poisoned,
}

/// One part of a multi-part message. A message ends with the first part whose `more` flag
/// is unset.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct Part {
    pub more: bool,
    pub body: Vec<u8>,
}

impl Part {
    pub fn new(body: Vec<u8>, more: bool) -> Self {
        Self { more, body }
    }
}

pub struct ProtocolTransport<T: Read + Write> {
    stream: T,
    config: WireConfig,
}

impl<T: Read + Write> ProtocolTransport<T> {
    pub fn new(stream: T) -> Self {
        Self {
            stream,
            config: codec::config(),
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.stream
    }

    pub fn write_part(&mut self, part: &Part) -> Result<(), TransportError> {
        let bytes = bincode::encode_to_vec(part, self.config)?;
        self.stream.write_all(&bytes)?;
        self.stream.flush()?;
        Ok(())
    }

    pub fn read_part(&mut self) -> Result<Part, TransportError> {
        match decode_from_std_read(&mut self.stream, self.config) {
            Ok(part) => Ok(part),
            Err(DecodeError::Io { inner, .. }) if inner.kind() == io::ErrorKind::UnexpectedEof => {
                Err(TransportError::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Reads parts up to and including the first one without `more`.
    pub fn read_message(&mut self) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut parts = Vec::new();
        loop {
            let part = self.read_part()?;
            parts.push(part.body);
            if !part.more {
                return Ok(parts);
            }
        }
    }

    /// Writes `parts` as one message.
    pub fn write_message(&mut self, parts: &[Vec<u8>]) -> Result<(), TransportError> {
        let Some((last, init)) = parts.split_last() else {
            return Ok(());
        };
        for body in init {
            self.write_part(&Part::new(body.clone(), true))?;
        }
        self.write_part(&Part::new(last.clone(), false))
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Seek};

    use super::*;

    #[test]
    fn read_write_message() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);

        transport
            .write_message(&[b"header".to_vec(), b"row".to_vec()])
            .unwrap();
        transport.write_message(&[b"next".to_vec()]).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();

        assert_eq!(
            transport.read_message().unwrap(),
            vec![b"header".to_vec(), b"row".to_vec()]
        );
        assert_eq!(transport.read_message().unwrap(), vec![b"next".to_vec()]);
    }

    #[test]
    fn read_write_part() {
        let stream = Cursor::new(Vec::new());
        let mut transport = ProtocolTransport::new(stream);
        let part = Part::new(vec![1, 2, 3], true);

        transport.write_part(&part).unwrap();
        transport.stream.seek(std::io::SeekFrom::Start(0)).unwrap();
        assert_eq!(transport.read_part().unwrap(), part);
    }

    #[test]
    fn end_of_stream_is_closed() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        assert!(matches!(transport.read_part(), Err(TransportError::Closed)));
    }

    #[test]
    fn oversized_part_is_rejected() {
        let mut bytes = vec![1];
        bytes.extend_from_slice(&(1u64 << 50).to_be_bytes());
        let mut transport = ProtocolTransport::new(Cursor::new(bytes));

        assert!(matches!(
            transport.read_part(),
            Err(TransportError::Deserialize(DecodeError::LimitExceeded))
        ));
    }

    #[test]
    fn empty_message_writes_nothing() {
        let mut transport = ProtocolTransport::new(Cursor::new(Vec::new()));
        transport.write_message(&[]).unwrap();
        assert!(transport.stream.get_ref().is_empty());
    }
}
