//! Query engine interface.
//!
//! The remoting layer never plans or executes queries itself. It talks to an engine through
//! [`QueryEngine`], which executes a query (optionally inside a transaction) and returns a
//! [`QueryResult`]: a column list, a single-pass row source and update statistics.
//!
//! Row sources are lazy. Consumers pull one row at a time and must not expect to restart
//! iteration; a second call to [`QueryResult::iterate`] fails with
//! [`EngineError::Consumed`].
use std::collections::HashMap;

use thiserror::Error;

use crate::{codec::Mapping, graph::GraphValue, statement::StatementError};

/// Query parameters as received on the wire.
pub type Params = Mapping;

/// One result row, keyed by column name.
pub type Row = HashMap<String, GraphValue>;

/// Lazy, single-pass producer of result rows.
pub type RowSource = Box<dyn Iterator<Item = Result<Row, EngineError>> + Send>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid statement: {0}")]
    Statement(#[from] StatementError),

    #[error("missing parameter '{0}'")]
    MissingParameter(String),

    #[error("parameter '{name}' is not a valid property value: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("unknown variable '{0}'")]
    UnknownVariable(String),

    #[error("node {0} not found")]
    NodeNotFound(u64),

    #[error("relationship {0} not found")]
    RelationshipNotFound(u64),

    #[error("transaction conflict: graph changed since the transaction began")]
    Conflict,

    #[error("row source already consumed")]
    Consumed,

    #[error("graph lock poisoned")]
    Poisoned,

    #[error("query failed: {0}")]
    Failed(String),
}

/// Update counters reported by a query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    pub nodes_created: u64,
    pub nodes_deleted: u64,
    pub relationships_created: u64,
    pub relationships_deleted: u64,
    pub properties_set: u64,
}

impl QueryStatistics {
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
    }
}

pub trait QueryResult: Send {
    fn columns(&self) -> Result<Vec<String>, EngineError>;

    /// Hands out the row source. Only the first call succeeds.
    fn iterate(&mut self) -> Result<RowSource, EngineError>;

    fn statistics(&self) -> QueryStatistics;
}

pub trait QueryEngine: Send + Sync + 'static {
    /// Engine-side transaction handle. Handles are moved between worker threads, never
    /// shared.
    type Transaction: Send + 'static;

    fn begin(&self) -> Result<Self::Transaction, EngineError>;

    fn commit(&self, tx: Self::Transaction) -> Result<(), EngineError>;

    fn rollback(&self, tx: Self::Transaction) -> Result<(), EngineError>;

    /// Executes `query`. Writes take effect before this returns, whether or not the rows
    /// are ever read.
    fn execute(
        &self,
        tx: Option<&mut Self::Transaction>,
        query: &str,
        params: &Params,
    ) -> Result<Box<dyn QueryResult>, EngineError>;
}
