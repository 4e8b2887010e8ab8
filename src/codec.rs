//! Binary codec for reply and request parts.
//!
//! Every part exchanged with a client is a single, independently decodable [`Value`].
//! Values are self-describing: scalars, raw bytes, ordered sequences and ordered
//! string-keyed mappings. Parts are encoded with `bincode` using big-endian, fixed-width
//! integers, the same configuration the transport uses for its framing.
//!
//! # Example
//! ```rust
//! use remora::codec::{self, Mapping, Value};
//!
//! let mut map = Mapping::new();
//! map.insert("query", "start n return n");
//! let bytes = codec::encode(&map.clone().into()).unwrap();
//! assert_eq!(codec::decode(&bytes).unwrap(), Value::from(map));
//! ```
use std::{collections::HashMap, fmt};

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint, Limit},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode value: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode value: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("{0} trailing bytes after decoded value")]
    TrailingBytes(usize),
}

/// A wire-representable value.
#[derive(Debug, Clone, PartialEq, Encode, Decode)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(String, Value)>),
}

/// Largest number of bytes a single decode may claim. Length prefixes beyond it are
/// rejected before anything is allocated.
pub const MAX_PART_SIZE: usize = 16 * 1024 * 1024;

pub(crate) type WireConfig = Configuration<BigEndian, Fixint, Limit<MAX_PART_SIZE>>;

pub(crate) fn config() -> WireConfig {
    bincode::config::standard()
        .with_big_endian()
        .with_fixed_int_encoding()
        .with_limit::<MAX_PART_SIZE>()
}

pub fn encode(value: &Value) -> Result<Vec<u8>, CodecError> {
    Ok(bincode::encode_to_vec(value, config())?)
}

pub fn decode(bytes: &[u8]) -> Result<Value, CodecError> {
    let (value, read): (Value, usize) = bincode::decode_from_slice(bytes, config())?;
    if read != bytes.len() {
        return Err(CodecError::TrailingBytes(bytes.len() - read));
    }
    Ok(value)
}

/// Encoded form of an empty mapping, sent whenever a reply would otherwise have no parts.
pub fn empty_mapping() -> Vec<u8> {
    // An empty map is a tag plus a zero length; encoding into a Vec cannot fail.
    encode(&Value::Map(Vec::new())).unwrap_or_default()
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up `key` if this value is a mapping.
    pub fn get(&self, key: &str) -> Option<&Value> {
        match self {
            Value::Map(entries) => entries.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Short name of the variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Int(value as i64)
    }
}

impl From<usize> for Value {
    fn from(value: usize) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Value::List(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Bytes(bytes) => {
                write!(f, "0x")?;
                for b in bytes {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Insertion-ordered mapping; inserting an existing key replaces its value in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Mapping(Vec<(String, Value)>);

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Merges `other` into `self`, letting `other` win on key collisions.
    pub fn extend(&mut self, other: Mapping) {
        for (key, value) in other.0 {
            self.insert(key, value);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl From<Mapping> for Value {
    fn from(value: Mapping) -> Self {
        Value::Map(value.0)
    }
}

impl From<Vec<(String, Value)>> for Mapping {
    fn from(entries: Vec<(String, Value)>) -> Self {
        let mut seen: HashMap<String, usize> = HashMap::with_capacity(entries.len());
        let mut map = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match seen.get(&key) {
                Some(&at) => map[at] = (key, value),
                None => {
                    seen.insert(key.clone(), map.len());
                    map.push((key, value));
                }
            }
        }
        Mapping(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_value_survives_encoding() {
        let value = Value::List(vec![
            Value::Null,
            Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef]),
            Value::Map(vec![(
                "kids".to_string(),
                Value::List(vec![Value::from("foo"), Value::from("bar")]),
            )]),
        ]);

        let bytes = encode(&value).unwrap();
        assert_eq!(decode(&bytes).unwrap(), value);
    }

    #[test]
    fn empty_mapping_is_distinct_from_null() {
        let empty = empty_mapping();
        assert_eq!(decode(&empty).unwrap(), Value::Map(vec![]));
        assert_ne!(empty, encode(&Value::Null).unwrap());
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        let mut bytes = encode(&Value::Int(7)).unwrap();
        bytes.push(0);

        assert!(matches!(decode(&bytes), Err(CodecError::TrailingBytes(1))));
    }

    #[test]
    #[should_panic(expected = "Decode")]
    fn decode_garbage() {
        decode(&[0xff, 0xff, 0xff]).unwrap();
    }

    #[test]
    fn decode_rejects_oversized_length_prefix() {
        let mut bytes = vec![0, 0, 0, 6];
        bytes.extend_from_slice(&(1u64 << 50).to_be_bytes());

        assert!(matches!(
            decode(&bytes),
            Err(CodecError::Decode(bincode::error::DecodeError::LimitExceeded))
        ));
    }

    #[test]
    fn mapping_insert_replaces_in_place() {
        let mut map = Mapping::new();
        map.insert("tx_id", 3i64);
        map.insert("tx", "begin");
        map.insert("tx_id", -1i64);

        let keys: Vec<&str> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["tx_id", "tx"]);
        assert_eq!(map.get("tx_id"), Some(&Value::Int(-1)));
    }

    #[test]
    fn duplicate_keys_collapse_in_first_position() {
        let entries = vec![
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
            ("a".to_string(), Value::Int(3)),
        ];
        let map = Mapping::from(entries);

        assert_eq!(
            Value::from(map),
            Value::Map(vec![
                ("a".to_string(), Value::Int(3)),
                ("b".to_string(), Value::Int(2)),
            ])
        );
    }
}
