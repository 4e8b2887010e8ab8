//! In-memory graph engine.
//!
//! The graph lives in a copy-on-write snapshot behind a lock. Readers clone the current
//! snapshot and iterate it without holding the lock, so row sources stay lazy and never
//! block writers.
//!
//! Writes outside a transaction are applied to the shared snapshot immediately. A
//! [`MemoryTransaction`] works on a private copy taken at `begin`; committing publishes the
//! copy if nobody else committed in the meantime, otherwise the commit fails with
//! [`EngineError::Conflict`]. Rolling back simply drops the copy.
use std::{
    collections::BTreeMap,
    sync::{Arc, RwLock},
};

use log::{debug, trace};

use super::{GraphValue, Node, Path, Properties, PropertyValue, Relationship, Scalar};
use crate::{
    codec::Value,
    engine::{
        EngineError, Params, QueryEngine, QueryResult, QueryStatistics, Row, RowSource,
    },
    statement::{Action, NodeSelector, Pattern, Projection, Statement},
};

#[derive(Debug, Clone)]
struct RelRecord {
    start: u64,
    end: u64,
    rel_type: String,
    properties: Properties,
}

#[derive(Debug, Clone, Default)]
struct GraphData {
    version: u64,
    next_node: u64,
    next_rel: u64,
    nodes: BTreeMap<u64, Properties>,
    relationships: BTreeMap<u64, RelRecord>,
}

impl GraphData {
    fn node(&self, id: u64) -> Result<Node, EngineError> {
        self.nodes
            .get(&id)
            .map(|properties| Node {
                id,
                properties: properties.clone(),
            })
            .ok_or(EngineError::NodeNotFound(id))
    }

    fn relationship(&self, id: u64) -> Result<Relationship, EngineError> {
        self.relationships
            .get(&id)
            .map(|rec| Relationship {
                id,
                start: rec.start,
                end: rec.end,
                rel_type: rec.rel_type.clone(),
                properties: rec.properties.clone(),
            })
            .ok_or(EngineError::RelationshipNotFound(id))
    }

    fn create_node(&mut self, properties: Properties) -> u64 {
        let id = self.next_node;
        self.next_node += 1;
        self.nodes.insert(id, properties);
        id
    }

    fn create_relationship(
        &mut self,
        start: u64,
        end: u64,
        rel_type: &str,
        properties: Properties,
    ) -> u64 {
        let id = self.next_rel;
        self.next_rel += 1;
        self.relationships.insert(
            id,
            RelRecord {
                start,
                end,
                rel_type: rel_type.to_string(),
                properties,
            },
        );
        id
    }

    /// Removes a node together with every relationship touching it. Returns the number of
    /// relationships removed, or `None` if the node was already gone.
    fn delete_node(&mut self, id: u64) -> Option<u64> {
        self.nodes.remove(&id)?;
        let attached: Vec<u64> = self
            .relationships
            .iter()
            .filter(|(_, rec)| rec.start == id || rec.end == id)
            .map(|(rel, _)| *rel)
            .collect();
        for rel in &attached {
            self.relationships.remove(rel);
        }
        Some(attached.len() as u64)
    }
}

/// Which entity a pattern variable is bound to in a match.
#[derive(Debug, Clone, Copy)]
struct Binding {
    start: u64,
    hop: Option<(u64, u64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Path,
    Start,
    Rel,
    End,
}

fn role(pattern: &Pattern, var: &str) -> Result<Role, EngineError> {
    if pattern.path.as_deref() == Some(var) {
        return Ok(Role::Path);
    }
    if pattern.start.var == var {
        return Ok(Role::Start);
    }
    if let Some((rel, end)) = &pattern.hop {
        if rel.var.as_deref() == Some(var) {
            return Ok(Role::Rel);
        }
        if end.var == var {
            return Ok(Role::End);
        }
    }
    Err(EngineError::UnknownVariable(var.to_string()))
}

fn resolve(
    graph: &GraphData,
    role: Role,
    binding: &Binding,
) -> Result<GraphValue, EngineError> {
    Ok(match (role, binding.hop) {
        (Role::Start, _) => GraphValue::Node(graph.node(binding.start)?),
        (Role::Rel, Some((rel, _))) => GraphValue::Relationship(graph.relationship(rel)?),
        (Role::End, Some((_, end))) => GraphValue::Node(graph.node(end)?),
        (Role::Path, Some((rel, end))) => GraphValue::Path(Path::new(
            vec![graph.node(binding.start)?, graph.node(end)?],
            vec![graph.relationship(rel)?],
        )),
        (Role::Path, None) => GraphValue::Path(Path::new(vec![graph.node(binding.start)?], vec![])),
        (Role::Rel | Role::End, None) => GraphValue::Null,
    })
}

fn project(
    graph: &GraphData,
    plan: &[(Projection, Role)],
    binding: &Binding,
) -> Result<Row, EngineError> {
    let mut row = Row::with_capacity(plan.len());
    for (projection, role) in plan {
        let value = resolve(graph, *role, binding)?;
        let value = match projection {
            Projection::Var(_) => value,
            Projection::Property { key, .. } => {
                let property = match &value {
                    GraphValue::Node(node) => node.properties.get(key),
                    GraphValue::Relationship(rel) => rel.properties.get(key),
                    _ => None,
                };
                property
                    .cloned()
                    .map(GraphValue::from)
                    .unwrap_or(GraphValue::Null)
            }
        };
        row.insert(projection.column(), value);
    }
    Ok(row)
}

fn bindings(graph: &GraphData, pattern: &Pattern, selector: NodeSelector) -> Vec<Binding> {
    let selected = |id: u64| match selector {
        NodeSelector::All => true,
        NodeSelector::Id(wanted) => id == wanted,
    };

    match &pattern.hop {
        None => graph
            .nodes
            .keys()
            .copied()
            .filter(|id| selected(*id))
            .map(|start| Binding { start, hop: None })
            .collect(),
        Some((rel, _)) => graph
            .relationships
            .iter()
            .filter(|(_, rec)| selected(rec.start))
            .filter(|(_, rec)| {
                rel.rel_type
                    .as_deref()
                    .is_none_or(|wanted| rec.rel_type == wanted)
            })
            .map(|(id, rec)| Binding {
                start: rec.start,
                hop: Some((*id, rec.end)),
            })
            .collect(),
    }
}

fn properties_param(params: &Params, name: Option<&str>) -> Result<Properties, EngineError> {
    let Some(name) = name else {
        return Ok(Properties::new());
    };
    match params.get(name) {
        Some(Value::Map(entries)) => entries
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| {
                PropertyValue::try_from(value)
                    .map(|value| (key.clone(), value))
                    .map_err(|reason| EngineError::InvalidParameter {
                        name: format!("{name}.{key}"),
                        reason,
                    })
            })
            .collect(),
        Some(other) => Err(EngineError::InvalidParameter {
            name: name.to_string(),
            reason: format!("expected a map, found {}", other.kind()),
        }),
        None => Err(EngineError::MissingParameter(name.to_string())),
    }
}

fn plan_projections(
    pattern: &Pattern,
    projections: &[Projection],
) -> Result<Vec<(Projection, Role)>, EngineError> {
    projections
        .iter()
        .map(|p| role(pattern, p.var()).map(|role| (p.clone(), role)))
        .collect()
}

/// Outcome of running a statement against a graph: the bindings to project lazily plus
/// the update counters.
struct Execution {
    columns: Vec<String>,
    plan: Vec<(Projection, Role)>,
    bindings: Vec<Binding>,
    statistics: QueryStatistics,
}

fn read(
    graph: &GraphData,
    pattern: &Pattern,
    selector: NodeSelector,
    projections: &[Projection],
) -> Result<Execution, EngineError> {
    Ok(Execution {
        columns: projections.iter().map(Projection::column).collect(),
        plan: plan_projections(pattern, projections)?,
        bindings: bindings(graph, pattern, selector),
        statistics: QueryStatistics::default(),
    })
}

/// Applies a statement. Every fallible step runs before the first mutation, so an error
/// leaves `graph` untouched.
fn run(
    graph: &mut GraphData,
    statement: &Statement,
    params: &Params,
) -> Result<Execution, EngineError> {
    let mut statistics = QueryStatistics::default();

    match statement {
        Statement::Create { pattern, returns } => {
            let plan = plan_projections(pattern, returns)?;
            // Resolve parameters before touching the graph so a bad parameter writes nothing.
            let start_props = properties_param(params, pattern.start.props.as_deref())?;
            let hop_props = match &pattern.hop {
                Some((rel, end)) => Some((
                    properties_param(params, rel.props.as_deref())?,
                    properties_param(params, end.props.as_deref())?,
                )),
                None => None,
            };

            let start = graph.create_node(start_props);
            statistics.nodes_created += 1;
            let hop = match (&pattern.hop, hop_props) {
                (Some((rel, _)), Some((rel_props, end_props))) => {
                    let end = graph.create_node(end_props);
                    let rel_type = rel.rel_type.as_deref().unwrap_or_default();
                    let rel = graph.create_relationship(start, end, rel_type, rel_props);
                    statistics.nodes_created += 1;
                    statistics.relationships_created += 1;
                    Some((rel, end))
                }
                _ => None,
            };
            graph.version += 1;

            let bindings = if plan.is_empty() {
                Vec::new()
            } else {
                vec![Binding { start, hop }]
            };
            Ok(Execution {
                columns: returns.iter().map(Projection::column).collect(),
                plan,
                bindings,
                statistics,
            })
        }
        Statement::Match {
            pattern,
            selector,
            action,
        } => {
            match action {
                Action::Return(projections) => read(graph, pattern, *selector, projections),
                Action::Delete(vars) => {
                    let matched = bindings(graph, pattern, *selector);
                    let roles = vars
                        .iter()
                        .map(|var| role(pattern, var))
                        .collect::<Result<Vec<_>, _>>()?;
                    let mut rels = Vec::new();
                    let mut nodes = Vec::new();
                    for binding in &matched {
                        for role in &roles {
                            match (role, binding.hop) {
                                (Role::Start, _) => nodes.push(binding.start),
                                (Role::End, Some((_, end))) => nodes.push(end),
                                (Role::Rel, Some((rel, _))) => rels.push(rel),
                                (Role::Path, Some((rel, end))) => {
                                    rels.push(rel);
                                    nodes.extend([binding.start, end]);
                                }
                                (Role::Path, None) => nodes.push(binding.start),
                                _ => {}
                            }
                        }
                    }
                    for rel in rels {
                        if graph.relationships.remove(&rel).is_some() {
                            statistics.relationships_deleted += 1;
                        }
                    }
                    for node in nodes {
                        if let Some(detached) = graph.delete_node(node) {
                            statistics.nodes_deleted += 1;
                            statistics.relationships_deleted += detached;
                        }
                    }
                    if statistics.contains_updates() {
                        graph.version += 1;
                    }
                    Ok(Execution {
                        columns: Vec::new(),
                        plan: Vec::new(),
                        bindings: Vec::new(),
                        statistics,
                    })
                }
                Action::Set { var, key, param } => {
                    let matched = bindings(graph, pattern, *selector);
                    let target_role = role(pattern, var)?;
                    let value = params
                        .get(param)
                        .ok_or_else(|| EngineError::MissingParameter(param.clone()))?;
                    let value = PropertyValue::try_from(value).map_err(|reason| {
                        EngineError::InvalidParameter {
                            name: param.clone(),
                            reason,
                        }
                    })?;
                    for binding in &matched {
                        let target = match (target_role, binding.hop) {
                            (Role::Start, _) => graph.nodes.get_mut(&binding.start),
                            (Role::End, Some((_, end))) => graph.nodes.get_mut(&end),
                            (Role::Rel, Some((rel, _))) => graph
                                .relationships
                                .get_mut(&rel)
                                .map(|rec| &mut rec.properties),
                            _ => None,
                        };
                        if let Some(properties) = target {
                            properties.set(key.clone(), value.clone());
                            statistics.properties_set += 1;
                        }
                    }
                    if statistics.contains_updates() {
                        graph.version += 1;
                    }
                    Ok(Execution {
                        columns: Vec::new(),
                        plan: Vec::new(),
                        bindings: Vec::new(),
                        statistics,
                    })
                }
            }
        }
    }
}

struct MemoryResult {
    columns: Vec<String>,
    rows: Option<RowSource>,
    statistics: QueryStatistics,
}

impl MemoryResult {
    fn new(snapshot: Arc<GraphData>, execution: Execution) -> Self {
        let Execution {
            columns,
            plan,
            bindings,
            statistics,
        } = execution;
        let rows: RowSource = Box::new(
            bindings
                .into_iter()
                .map(move |binding| project(&snapshot, &plan, &binding)),
        );
        Self {
            columns,
            rows: Some(rows),
            statistics,
        }
    }
}

impl QueryResult for MemoryResult {
    fn columns(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.columns.clone())
    }

    fn iterate(&mut self) -> Result<RowSource, EngineError> {
        self.rows.take().ok_or(EngineError::Consumed)
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics
    }
}

/// Private working copy of the graph for one transaction.
#[derive(Debug)]
pub struct MemoryTransaction {
    base_version: u64,
    graph: Arc<GraphData>,
}

#[derive(Debug, Default)]
pub struct MemoryEngine {
    graph: RwLock<Arc<GraphData>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine seeded with one richly attributed node connected to 1000 others.
    pub fn with_demo_data() -> Self {
        let mut graph = GraphData::default();
        let root = graph.create_node(Properties::from_iter([
            ("name", PropertyValue::from("Name")),
            ("age", PropertyValue::from(42i64)),
            ("married", PropertyValue::from(true)),
            (
                "kids",
                PropertyValue::Array(vec![
                    Scalar::String("foo".into()),
                    Scalar::String("bar".into()),
                ]),
            ),
            (
                "bytes",
                PropertyValue::Scalar(Scalar::Bytes(vec![0xde, 0xad, 0xbe, 0xef])),
            ),
        ]));
        for _ in 0..1000 {
            let other = graph.create_node(Properties::new());
            graph.create_relationship(
                root,
                other,
                "KNOWS",
                Properties::from_iter([
                    ("since", PropertyValue::from(1900i64)),
                    ("weight", PropertyValue::from(42.0)),
                ]),
            );
        }
        graph.version = 1;

        Self {
            graph: RwLock::new(Arc::new(graph)),
        }
    }

    fn snapshot(&self) -> Result<Arc<GraphData>, EngineError> {
        self.graph
            .read()
            .map(|guard| Arc::clone(&guard))
            .map_err(|_| EngineError::Poisoned)
    }
}

impl QueryEngine for MemoryEngine {
    type Transaction = MemoryTransaction;

    fn begin(&self) -> Result<Self::Transaction, EngineError> {
        let graph = self.snapshot()?;
        Ok(MemoryTransaction {
            base_version: graph.version,
            graph,
        })
    }

    fn commit(&self, tx: Self::Transaction) -> Result<(), EngineError> {
        if tx.graph.version == tx.base_version {
            debug!("committing read-only transaction");
            return Ok(());
        }
        let mut guard = self.graph.write().map_err(|_| EngineError::Poisoned)?;
        if guard.version != tx.base_version {
            return Err(EngineError::Conflict);
        }
        *guard = tx.graph;
        Ok(())
    }

    fn rollback(&self, tx: Self::Transaction) -> Result<(), EngineError> {
        trace!("discarding transaction based on version {}", tx.base_version);
        Ok(())
    }

    fn execute(
        &self,
        tx: Option<&mut Self::Transaction>,
        query: &str,
        params: &Params,
    ) -> Result<Box<dyn QueryResult>, EngineError> {
        let statement = Statement::try_from(query)?;
        debug!("executing {statement:?}");

        let (snapshot, execution) = match (tx, &statement) {
            (
                tx,
                Statement::Match {
                    pattern,
                    selector,
                    action: Action::Return(projections),
                },
            ) => {
                let snapshot = match tx {
                    Some(tx) => Arc::clone(&tx.graph),
                    None => self.snapshot()?,
                };
                let execution = read(&snapshot, pattern, *selector, projections)?;
                (snapshot, execution)
            }
            (Some(tx), _) => {
                let working = Arc::make_mut(&mut tx.graph);
                let execution = run(working, &statement, params)?;
                // Collapse private bumps into one step past the base, which is what
                // commit compares against.
                if working.version != tx.base_version {
                    working.version = tx.base_version + 1;
                }
                (Arc::clone(&tx.graph), execution)
            }
            (None, _) => {
                let mut guard = self.graph.write().map_err(|_| EngineError::Poisoned)?;
                let execution = run(Arc::make_mut(&mut guard), &statement, params)?;
                (Arc::clone(&guard), execution)
            }
        };

        Ok(Box::new(MemoryResult::new(snapshot, execution)))
    }
}
