//! Request dispatch: one decoded request in, one lazily produced reply out.
//!
//! Each request runs through the same steps:
//!
//! 1. parse the request value;
//! 2. before the query, begin, attach or roll back a transaction as asked;
//! 3. execute the query, inside the worker's current transaction if there is one;
//! 4. drop the result if the request asks for no results;
//! 5. after the query, commit, roll back or detach the transaction;
//! 6. hand the result and the transaction echo to a [`ResultEncoder`].
//!
//! Failures in steps 1 to 5 are returned as a [`DispatchError`] before any frame exists.
//! Failures while streaming rows are reported by the encoder inside the reply.
use std::sync::Arc;

use log::{debug, warn};
use thiserror::Error;

use crate::{
    codec::{self, CodecError, Mapping, Value},
    engine::{EngineError, QueryEngine},
};

use super::{
    TX, TX_ID,
    encoder::ResultEncoder,
    request::{QueryRequest, RequestError, TxDirective},
    transaction::{NO_TRANSACTION, TransactionError, TransactionRegistry, TransactionSession, WorkerId},
};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("malformed request: {0}")]
    Request(#[from] RequestError),
    #[error("transaction failed: {0}")]
    Transaction(#[from] TransactionError),
    #[error("query failed: {0}")]
    Engine(#[from] EngineError),
}

/// How the `no_results` request flag is read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NoResultsMode {
    /// The key being present discards rows, whatever its value.
    #[default]
    Presence,
    /// Only `no_results: true` discards rows.
    Value,
}

/// One part of a reply; `more` is set on every part but the last.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub body: Vec<u8>,
    pub more: bool,
}

/// Reply to a single request. Yields at least one frame; a reply with nothing to say is
/// one empty mapping.
pub struct Reply {
    encoder: ResultEncoder,
    sent: usize,
    finished: bool,
}

impl Reply {
    fn new(encoder: ResultEncoder) -> Self {
        Self {
            encoder,
            sent: 0,
            finished: false,
        }
    }

    pub fn rows(&self) -> u64 {
        self.encoder.rows_emitted()
    }

    pub fn bytes(&self) -> u64 {
        self.encoder.bytes()
    }
}

impl Iterator for Reply {
    type Item = Result<Frame, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.encoder.produce_next() {
            Some(Ok(body)) => {
                self.sent += 1;
                let more = self.encoder.has_more();
                self.finished = !more;
                Some(Ok(Frame { body, more }))
            }
            Some(Err(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            None => {
                self.finished = true;
                (self.sent == 0).then(|| {
                    Ok(Frame {
                        body: codec::empty_mapping(),
                        more: false,
                    })
                })
            }
        }
    }
}

pub struct RequestDispatcher<E: QueryEngine> {
    engine: Arc<E>,
    registry: TransactionRegistry<E>,
    no_results: NoResultsMode,
}

impl<E: QueryEngine> RequestDispatcher<E> {
    pub fn new(engine: Arc<E>, no_results: NoResultsMode) -> Self {
        Self {
            registry: TransactionRegistry::new(Arc::clone(&engine)),
            engine,
            no_results,
        }
    }

    pub fn registry(&self) -> &TransactionRegistry<E> {
        &self.registry
    }

    pub fn session(&self, worker: WorkerId) -> TransactionSession<E::Transaction> {
        TransactionSession::new(worker)
    }

    /// Runs one request on behalf of the worker owning `session`. The session never holds
    /// a transaction once this returns.
    pub fn dispatch(
        &self,
        session: &mut TransactionSession<E::Transaction>,
        request: Value,
    ) -> Result<Reply, DispatchError> {
        let request = QueryRequest::try_from(request)?;
        debug!(
            "worker {} dispatching query={:?} tx={:?} tx_id={:?}",
            session.worker(),
            request.query,
            request.tx,
            request.tx_id
        );

        let mut context = self.before_query(session, &request)?;

        let result = match &request.query {
            Some(query) => match self.engine.execute(session.current_mut(), query, &request.params) {
                Ok(result) => Some(result),
                Err(e) => {
                    self.release(session, request.tx == Some(TxDirective::Begin));
                    return Err(e.into());
                }
            },
            None => None,
        };
        let result = if request.discards_results(self.no_results) {
            None
        } else {
            result
        };

        context.extend(self.after_query(session, &request)?);
        Ok(Reply::new(ResultEncoder::new(result, request.stats, context)))
    }

    fn before_query(
        &self,
        session: &mut TransactionSession<E::Transaction>,
        request: &QueryRequest,
    ) -> Result<Mapping, TransactionError> {
        let mut echo = Mapping::new();
        if request.tx == Some(TxDirective::Begin) {
            let id = self.registry.create(session)?;
            echo.insert(TX_ID, id);
            echo.insert(TX, TxDirective::Begin.as_str());
        } else if let Some(id) = request.tx_id {
            self.registry.select(session, id)?;
            echo.insert(TX_ID, id);
        } else if request.tx == Some(TxDirective::Rollback) {
            self.registry.rollback_current(session)?;
            echo.insert(TX_ID, NO_TRANSACTION);
            echo.insert(TX, TxDirective::Rollback.as_str());
        }
        Ok(echo)
    }

    fn after_query(
        &self,
        session: &mut TransactionSession<E::Transaction>,
        request: &QueryRequest,
    ) -> Result<Mapping, TransactionError> {
        let mut echo = Mapping::new();
        match request.tx {
            Some(TxDirective::Commit) => {
                self.registry.commit_current(session)?;
                echo.insert(TX_ID, NO_TRANSACTION);
                echo.insert(TX, TxDirective::Commit.as_str());
            }
            Some(TxDirective::Rollback) if session.current_id().is_some() => {
                self.registry.rollback_current(session)?;
                echo.insert(TX_ID, NO_TRANSACTION);
                echo.insert(TX, TxDirective::Rollback.as_str());
            }
            _ => self.registry.suspend_current(session)?,
        }
        Ok(echo)
    }

    /// Detaches after a failed query. A transaction begun by the failed request itself is
    /// rolled back, since its id never reached the client.
    fn release(&self, session: &mut TransactionSession<E::Transaction>, began: bool) {
        let released = if began {
            self.registry.rollback_current(session).map(|_| ())
        } else {
            self.registry.suspend_current(session)
        };
        if let Err(e) = released {
            warn!("worker {} failed to release transaction: {e}", session.worker());
        }
    }
}
