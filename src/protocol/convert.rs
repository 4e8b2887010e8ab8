//! Conversion of graph result values into wire structures.
//!
//! Entities become small mappings keyed by name. Property maps are attached only when the
//! entity actually has properties, so a node without properties costs just its id on the
//! wire and `{id}` stays distinguishable from `{id, props: {}}`.
//!
//! Conversion is a plain recursive walk. Nothing is cached or shared between values: a
//! path that visits the same node twice carries two full copies of it.
use thiserror::Error;

use crate::{
    codec::Value,
    graph::{GraphValue, Path, PropertyContainer, PropertyValue, Scalar},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConvertError {
    #[error("malformed path: {nodes} nodes for {relationships} relationships")]
    MalformedPath { nodes: usize, relationships: usize },
}

pub type Props = Vec<(String, Converted)>;

/// Serializable form of a result value.
#[derive(Debug, Clone, PartialEq)]
pub enum Converted {
    Null,
    Scalar(Scalar),
    Mapping(Vec<(String, Converted)>),
    Sequence(Vec<Converted>),
    NodeRef {
        id: u64,
        props: Option<Props>,
    },
    RelRef {
        id: u64,
        start: u64,
        end: u64,
        rel_type: String,
        props: Option<Props>,
    },
    PathRef {
        length: usize,
        start: Box<Converted>,
        end: Box<Converted>,
        nodes: Vec<Converted>,
        relationships: Vec<Converted>,
    },
}

pub fn convert(value: &GraphValue) -> Result<Converted, ConvertError> {
    Ok(match value {
        GraphValue::Null => Converted::Null,
        GraphValue::Scalar(s) => Converted::Scalar(s.clone()),
        GraphValue::Node(node) => Converted::NodeRef {
            id: node.id(),
            props: props_map(node),
        },
        GraphValue::Relationship(rel) => Converted::RelRef {
            id: rel.id(),
            start: rel.start,
            end: rel.end,
            rel_type: rel.rel_type.clone(),
            props: props_map(rel),
        },
        GraphValue::Path(path) => convert_path(path)?,
        GraphValue::Array(items) => {
            Converted::Sequence(items.iter().cloned().map(Converted::Scalar).collect())
        }
        GraphValue::List(items) => {
            Converted::Sequence(items.iter().map(convert).collect::<Result<_, _>>()?)
        }
        GraphValue::Map(entries) => Converted::Mapping(
            entries
                .iter()
                .map(|(key, value)| convert(value).map(|value| (key.clone(), value)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn convert_path(path: &Path) -> Result<Converted, ConvertError> {
    let malformed = || ConvertError::MalformedPath {
        nodes: path.nodes.len(),
        relationships: path.relationships.len(),
    };
    if path.nodes.len() != path.relationships.len() + 1 {
        return Err(malformed());
    }
    let (Some(start), Some(end)) = (path.start(), path.end()) else {
        return Err(malformed());
    };

    Ok(Converted::PathRef {
        length: path.length(),
        start: Box::new(convert(&GraphValue::Node(start.clone()))?),
        end: Box::new(convert(&GraphValue::Node(end.clone()))?),
        nodes: path
            .nodes
            .iter()
            .map(|node| convert(&GraphValue::Node(node.clone())))
            .collect::<Result<_, _>>()?,
        relationships: path
            .relationships
            .iter()
            .map(|rel| convert(&GraphValue::Relationship(rel.clone())))
            .collect::<Result<_, _>>()?,
    })
}

/// Property map of an entity in source order, or `None` when it has no properties.
/// Array properties are expanded one level into a sequence of their elements.
pub fn props_map<C: PropertyContainer>(entity: &C) -> Option<Props> {
    let props: Props = entity
        .property_keys()
        .filter_map(|key| {
            let value = match entity.property(key)? {
                PropertyValue::Scalar(s) => Converted::Scalar(s.clone()),
                PropertyValue::Array(items) => {
                    Converted::Sequence(items.iter().cloned().map(Converted::Scalar).collect())
                }
            };
            Some((key.to_string(), value))
        })
        .collect();

    if props.is_empty() { None } else { Some(props) }
}

fn props_value(props: Props) -> Value {
    Value::Map(props.into_iter().map(|(k, v)| (k, v.into())).collect())
}

impl From<Converted> for Value {
    fn from(value: Converted) -> Self {
        match value {
            Converted::Null => Value::Null,
            Converted::Scalar(s) => s.into(),
            Converted::Mapping(entries) => props_value(entries),
            Converted::Sequence(items) => Value::List(items.into_iter().map(Value::from).collect()),
            Converted::NodeRef { id, props } => {
                let mut entries = vec![("id".to_string(), Value::from(id))];
                if let Some(props) = props {
                    entries.push(("props".to_string(), props_value(props)));
                }
                Value::Map(entries)
            }
            Converted::RelRef {
                id,
                start,
                end,
                rel_type,
                props,
            } => {
                let mut entries = vec![
                    ("id".to_string(), Value::from(id)),
                    ("start".to_string(), Value::from(start)),
                    ("end".to_string(), Value::from(end)),
                    ("type".to_string(), Value::String(rel_type)),
                ];
                if let Some(props) = props {
                    entries.push(("props".to_string(), props_value(props)));
                }
                Value::Map(entries)
            }
            Converted::PathRef {
                length,
                start,
                end,
                nodes,
                relationships,
            } => Value::Map(vec![
                ("length".to_string(), Value::from(length)),
                ("start".to_string(), Value::from(*start)),
                ("end".to_string(), Value::from(*end)),
                (
                    "nodes".to_string(),
                    Value::List(nodes.into_iter().map(Value::from).collect()),
                ),
                (
                    "relationships".to_string(),
                    Value::List(relationships.into_iter().map(Value::from).collect()),
                ),
            ]),
        }
    }
}
