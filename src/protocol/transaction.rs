//! Transactions that outlive a single request.
//!
//! A client opens a transaction with one request and names it by id in later ones, which
//! may be served by any worker. The registry keeps every open transaction in one of two
//! states:
//!
//! - **suspended**: the engine handle sits in the registry, free to be picked up;
//! - **active**: a worker has taken the handle into its [`TransactionSession`] and the
//!   registry only remembers which worker that is.
//!
//! Handles are moved, never shared, so at most one worker can run statements in a given
//! transaction at a time. Workers detach their transaction at the end of every request.
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicI64, Ordering},
    },
};

use log::{debug, trace};
use thiserror::Error;

use crate::engine::{EngineError, QueryEngine};

/// Transaction id as seen on the wire.
pub type TxId = i64;

/// Id echoed once a transaction has ended.
pub const NO_TRANSACTION: TxId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(pub usize);

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("unknown transaction {0}")]
    Unknown(TxId),
    #[error("transaction {id} is in use by worker {owner}")]
    Busy { id: TxId, owner: WorkerId },
    #[error("no transaction is active")]
    NoneActive,
    #[error("transaction registry lock poisoned")]
    Poisoned,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

enum Slot<T> {
    Suspended(T),
    Active(WorkerId),
}

/// Per-worker view of the transaction it currently has attached.
pub struct TransactionSession<T> {
    worker: WorkerId,
    current: Option<(TxId, T)>,
}

impl<T> TransactionSession<T> {
    pub fn new(worker: WorkerId) -> Self {
        Self {
            worker,
            current: None,
        }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    pub fn current_id(&self) -> Option<TxId> {
        self.current.as_ref().map(|(id, _)| *id)
    }

    pub fn current_mut(&mut self) -> Option<&mut T> {
        self.current.as_mut().map(|(_, tx)| tx)
    }
}

pub struct TransactionRegistry<E: QueryEngine> {
    engine: Arc<E>,
    next_id: AtomicI64,
    slots: Mutex<HashMap<TxId, Slot<E::Transaction>>>,
}

impl<E: QueryEngine> TransactionRegistry<E> {
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            next_id: AtomicI64::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Begins a transaction and attaches it to `session`, detaching whatever was attached.
    pub fn create(&self, session: &mut TransactionSession<E::Transaction>) -> Result<TxId, TransactionError> {
        self.suspend_current(session)?;
        let tx = self.engine.begin()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        self.slots()?.insert(id, Slot::Active(session.worker));
        session.current = Some((id, tx));
        debug!("worker {} began transaction {id}", session.worker);
        Ok(id)
    }

    /// Attaches transaction `id` to `session`. Fails if it does not exist or another worker
    /// holds it.
    pub fn select(
        &self,
        session: &mut TransactionSession<E::Transaction>,
        id: TxId,
    ) -> Result<(), TransactionError> {
        if session.current_id() == Some(id) {
            return Ok(());
        }
        self.suspend_current(session)?;

        let mut slots = self.slots()?;
        match slots.remove(&id) {
            None => Err(TransactionError::Unknown(id)),
            Some(Slot::Active(owner)) => {
                slots.insert(id, Slot::Active(owner));
                Err(TransactionError::Busy { id, owner })
            }
            Some(Slot::Suspended(tx)) => {
                slots.insert(id, Slot::Active(session.worker));
                session.current = Some((id, tx));
                trace!("worker {} attached transaction {id}", session.worker);
                Ok(())
            }
        }
    }

    /// Detaches the session's transaction, if any, leaving it open for any worker.
    pub fn suspend_current(
        &self,
        session: &mut TransactionSession<E::Transaction>,
    ) -> Result<(), TransactionError> {
        if let Some((id, tx)) = session.current.take() {
            self.slots()?.insert(id, Slot::Suspended(tx));
            trace!("worker {} suspended transaction {id}", session.worker);
        }
        Ok(())
    }

    /// Commits and forgets the session's transaction. The transaction is gone even when the
    /// engine refuses the commit.
    pub fn commit_current(
        &self,
        session: &mut TransactionSession<E::Transaction>,
    ) -> Result<TxId, TransactionError> {
        let (id, tx) = session.current.take().ok_or(TransactionError::NoneActive)?;
        self.slots()?.remove(&id);
        self.engine.commit(tx)?;
        debug!("worker {} committed transaction {id}", session.worker);
        Ok(id)
    }

    /// Rolls back and forgets the session's transaction. Returns the id rolled back, or
    /// `None` if nothing was attached.
    pub fn rollback_current(
        &self,
        session: &mut TransactionSession<E::Transaction>,
    ) -> Result<Option<TxId>, TransactionError> {
        let Some((id, tx)) = session.current.take() else {
            return Ok(None);
        };
        self.slots()?.remove(&id);
        self.engine.rollback(tx)?;
        debug!("worker {} rolled back transaction {id}", session.worker);
        Ok(Some(id))
    }

    /// Number of open transactions, attached or not.
    pub fn open_transactions(&self) -> usize {
        self.slots.lock().map(|slots| slots.len()).unwrap_or(0)
    }

    fn slots(&self) -> Result<MutexGuard<'_, HashMap<TxId, Slot<E::Transaction>>>, TransactionError> {
        self.slots.lock().map_err(|_| TransactionError::Poisoned)
    }
}
