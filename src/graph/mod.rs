//! Graph domain values.
//!
//! These are the values a query engine hands back in result rows: scalars, property
//! arrays, nodes, relationships and paths, plus lists and maps of those. The set is closed;
//! consumers match on [`GraphValue`] exhaustively.
//!
//! Entities are owned snapshots. A [`Node`] or [`Relationship`] carries its properties in
//! the order the store defines for them, which is the order they are serialized in.
//!
//! # See Also
//! - [`memory`]: in-memory engine producing these values.
//! - [`convert`](crate::protocol::convert): turns them into wire structures.
pub mod memory;

pub use memory::{MemoryEngine, MemoryTransaction};

use crate::codec::Value;

/// A single wire-representable property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

/// Value stored under a property key: a scalar or a homogeneous array of scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Scalar(Scalar),
    Array(Vec<Scalar>),
}

/// Ordered property set of an entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Properties(Vec<(String, PropertyValue)>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key`, keeping its original position when it already exists.
    pub fn set(&mut self, key: impl Into<String>, value: PropertyValue) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, PropertyValue)> for Properties {
    fn from_iter<T: IntoIterator<Item = (K, PropertyValue)>>(iter: T) -> Self {
        let mut props = Properties::new();
        for (key, value) in iter {
            props.set(key, value);
        }
        props
    }
}

/// Accessors shared by nodes and relationships.
pub trait PropertyContainer {
    fn id(&self) -> u64;

    fn properties(&self) -> &Properties;

    fn property_keys(&self) -> impl Iterator<Item = &str> {
        self.properties().keys()
    }

    fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.properties().get(key)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u64,
    pub properties: Properties,
}

impl PropertyContainer for Node {
    fn id(&self) -> u64 {
        self.id
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: u64,
    pub start: u64,
    pub end: u64,
    pub rel_type: String,
    pub properties: Properties,
}

impl PropertyContainer for Relationship {
    fn id(&self) -> u64 {
        self.id
    }

    fn properties(&self) -> &Properties {
        &self.properties
    }
}

/// Alternating walk of nodes and relationships. A well-formed path has exactly one more
/// node than it has relationships; nodes may repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub relationships: Vec<Relationship>,
}

impl Path {
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Self {
        Self {
            nodes,
            relationships,
        }
    }

    pub fn start(&self) -> Option<&Node> {
        self.nodes.first()
    }

    pub fn end(&self) -> Option<&Node> {
        self.nodes.last()
    }

    pub fn length(&self) -> usize {
        self.relationships.len()
    }
}

/// Any value a result row can hold.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphValue {
    Null,
    Scalar(Scalar),
    Array(Vec<Scalar>),
    List(Vec<GraphValue>),
    Map(Vec<(String, GraphValue)>),
    Node(Node),
    Relationship(Relationship),
    Path(Path),
}

impl From<PropertyValue> for GraphValue {
    fn from(value: PropertyValue) -> Self {
        match value {
            PropertyValue::Scalar(s) => GraphValue::Scalar(s),
            PropertyValue::Array(items) => GraphValue::Array(items),
        }
    }
}

impl From<Scalar> for Value {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::Bool(b) => Value::Bool(b),
            Scalar::Int(i) => Value::Int(i),
            Scalar::Float(f) => Value::Float(f),
            Scalar::String(s) => Value::String(s),
            Scalar::Bytes(b) => Value::Bytes(b),
        }
    }
}

impl TryFrom<&Value> for Scalar {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Bool(b) => Ok(Scalar::Bool(*b)),
            Value::Int(i) => Ok(Scalar::Int(*i)),
            Value::Float(f) => Ok(Scalar::Float(*f)),
            Value::String(s) => Ok(Scalar::String(s.clone())),
            Value::Bytes(b) => Ok(Scalar::Bytes(b.clone())),
            other => Err(format!("{} is not a scalar", other.kind())),
        }
    }
}

impl TryFrom<&Value> for PropertyValue {
    type Error = String;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::List(items) => items
                .iter()
                .map(Scalar::try_from)
                .collect::<Result<Vec<_>, _>>()
                .map(PropertyValue::Array),
            other => Scalar::try_from(other).map(PropertyValue::Scalar),
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::Scalar(Scalar::String(value.to_string()))
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Scalar(Scalar::Int(value))
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        PropertyValue::Scalar(Scalar::Float(value))
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Scalar(Scalar::Bool(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn properties_keep_insertion_order() {
        let mut props = Properties::new();
        props.set("name", "Name".into());
        props.set("age", 42i64.into());
        props.set("name", "Other".into());

        assert_eq!(props.keys().collect::<Vec<_>>(), vec!["name", "age"]);
        assert_eq!(props.get("name"), Some(&PropertyValue::from("Other")));
    }

    #[test]
    fn property_value_from_list_parameter() {
        let value = Value::List(vec![Value::from("foo"), Value::from("bar")]);
        let prop = PropertyValue::try_from(&value).unwrap();

        assert_eq!(
            prop,
            PropertyValue::Array(vec![
                Scalar::String("foo".into()),
                Scalar::String("bar".into())
            ])
        );
    }

    #[test]
    #[should_panic(expected = "map is not a scalar")]
    fn property_value_rejects_maps() {
        PropertyValue::try_from(&Value::Map(vec![])).unwrap();
    }

    #[test]
    fn path_endpoints() {
        let a = Node {
            id: 1,
            properties: Properties::new(),
        };
        let rel = Relationship {
            id: 9,
            start: 1,
            end: 1,
            rel_type: "SELF".into(),
            properties: Properties::new(),
        };
        let path = Path::new(vec![a.clone(), a.clone()], vec![rel]);

        assert_eq!(path.length(), 1);
        assert_eq!(path.start(), Some(&a));
        assert_eq!(path.end(), Some(&a));
    }
}
