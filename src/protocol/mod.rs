//! Client-server communication protocol.
//!
//! This module defines how Remora clients submit graph queries and how results stream back
//! to them. Results are never materialized on the server: rows are pulled from the engine,
//! converted and written one frame at a time.
//!
//! # Overview
//!
//! A client sends one request and receives one reply. The request is a single encoded
//! [`Value`](crate::codec::Value): either a bare query string or a map with the keys
//!
//! - `query`: statement to execute;
//! - `params`: map of query parameters;
//! - `stats`: ask for a trailing info frame;
//! - `tx`: `begin`, `commit` or `rollback`;
//! - `tx_id`: transaction to run in, as returned by an earlier `begin`;
//! - `no_results`: execute but do not send rows.
//!
//! The reply is a multi-part message:
//!
//! ```text
//! [ header: [col, ...] ] [ row: [val, ...] ]* [ info: {time, rows, bytes, ...} ]?
//! ```
//!
//! The info frame is sent when stats were requested, when the query changed the graph, or
//! when something went wrong. A reply that would be empty is a single empty map.
//!
//! # Key Components
//!
//! - [`RequestDispatcher`]: runs one request and produces its [`Reply`].
//! - [`ResultEncoder`]: turns a query result into frames, lazily.
//! - [`TransactionRegistry`]: transactions that span requests and workers.
//! - [`Server`]: binds the endpoint and runs the workers.
//! - [`ProtocolTransport`]: framing of multi-part messages over a byte stream.
//! - [`Client`]: blocking client for the protocol.
//!
//! # Binary Format
//!
//! On the wire, every part is a `bincode` record of a `more` flag followed by the
//! length-prefixed part body, using big-endian fixed-width integers. A message ends with
//! the first part whose `more` flag is unset. Part bodies are encoded with
//! [`codec`](crate::codec).
//!
//! # See Also
//!
//! - [`engine`](crate::engine): interface to the engine that executes queries.
use std::error::Error;

mod client;
pub mod context;
pub mod convert;
pub mod dispatcher;
pub mod encoder;
pub mod request;
mod server;
pub mod socket;
mod thread;
pub mod transaction;
pub mod transport;

pub use client::{Client, ClientError};
pub use context::Context;
pub use dispatcher::{DispatchError, Frame, NoResultsMode, Reply, RequestDispatcher};
pub use encoder::ResultEncoder;
pub use request::{QueryRequest, RequestError, TxDirective};
pub use server::{ConfigError, DEFAULT_ADDRESS, MAX_THREADS, Server, ServerConfig};
pub use transaction::{NO_TRANSACTION, TransactionRegistry, TransactionSession, TxId, WorkerId};
pub use transport::{Part, ProtocolTransport, TransportError};

pub const QUERY: &str = "query";
pub const PARAMS: &str = "params";
pub const STATS: &str = "stats";
pub const TX: &str = "tx";
pub const TX_ID: &str = "tx_id";
pub const NO_RESULTS: &str = "no_results";

/// Error message followed by its sources, one per line.
pub(crate) fn error_chain(error: &(dyn Error + 'static)) -> String {
    let mut chain = format!("{error:?}");
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(&format!("\ncaused by: {cause}"));
        source = cause.source();
    }
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineError;

    #[test]
    fn error_chain_lists_sources() {
        let err = DispatchError::Transaction(EngineError::Conflict.into());
        let chain = error_chain(&err);

        assert!(chain.starts_with("Transaction(Engine(Conflict))"));
        assert!(chain.contains("caused by: transaction conflict"));
    }
}
