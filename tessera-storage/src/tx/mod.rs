//! Transactions.
//!
//! A transaction is bound to the thread that started it: cache operations
//! issued on that thread go through it until it resolves. At most one
//! transaction is bound per thread.
//!
//! # State Transition Diagram
//!
//! ```text
//! tx_start() ──→ Active ─── commit() ───→ Committed
//!                  │  └──── rollback() / drop ──→ RolledBack
//!                  └─ conflict, deadlock, lock timeout ──→ RolledBack
//! ```
//!
//! - Optimistic: writes are buffered; commit locks the touched keys in key
//!   order and validates observed versions (reads for repeatable-read and
//!   serializable, first-touched writes too for serializable).
//! - Pessimistic: keys are locked on first write, and on first read for
//!   repeatable-read and serializable. Once locks are held, commit fails only
//!   if a written cache is destroyed or aborted, and then restores any writes
//!   it already applied.
//!
//! A transaction rolled back by a conflict, deadlock or timeout stays bound
//! to its thread until the handle is dropped; cache calls in between fail
//! with `InvalidState`.

mod context;
mod locks;

pub(crate) use context::{Pending, TxInner};
pub(crate) use locks::{KeyLockGuard, LockTable, TxKey};

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{
    new_tx_id, CacheError, EngineConfig, TesseraError, TesseraResult, TransactionError,
    TxConcurrency, TxId, TxIsolation, TxState,
};

/// Engine-wide transaction state shared with every cache.
#[derive(Debug)]
pub(crate) struct TxShared {
    pub locks: LockTable,
    active: DashMap<ThreadId, Arc<Mutex<TxInner>>>,
    lock_timeout: Duration,
    default_concurrency: TxConcurrency,
    default_isolation: TxIsolation,
}

impl TxShared {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            locks: LockTable::new(config.shard_amount),
            active: DashMap::with_shard_amount(config.shard_amount),
            lock_timeout: config.lock_timeout,
            default_concurrency: config.default_concurrency,
            default_isolation: config.default_isolation,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Transaction bound to the calling thread, if any.
    pub fn current(&self) -> Option<Arc<Mutex<TxInner>>> {
        self.active
            .get(&thread::current().id())
            .map(|entry| Arc::clone(entry.value()))
    }
}

pub(crate) fn lock_tx(tx: &Mutex<TxInner>) -> Result<MutexGuard<'_, TxInner>, CacheError> {
    tx.lock().map_err(|_| CacheError::LockPoisoned)
}

/// Starts transactions. Cheap to clone.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    shared: Arc<TxShared>,
}

impl TransactionCoordinator {
    pub(crate) fn new(shared: Arc<TxShared>) -> Self {
        Self { shared }
    }

    /// Start a transaction bound to the calling thread.
    pub fn tx_start(&self, concurrency: TxConcurrency, isolation: TxIsolation) -> Result<Transaction, TransactionError> {
        self.tx_start_with_timeout(concurrency, isolation, self.shared.lock_timeout)
    }

    /// Start a transaction with the engine's default modes.
    pub fn tx_start_default(&self) -> Result<Transaction, TransactionError> {
        self.tx_start(self.shared.default_concurrency, self.shared.default_isolation)
    }

    /// Start a transaction whose lock waits give up after `timeout`.
    pub fn tx_start_with_timeout(
        &self,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        timeout: Duration,
    ) -> Result<Transaction, TransactionError> {
        let thread = thread::current().id();
        let id = new_tx_id();
        let inner = Arc::new(Mutex::new(TxInner::new(id, concurrency, isolation, timeout)));

        match self.shared.active.entry(thread) {
            Entry::Occupied(bound) => {
                let existing = bound.get().lock().unwrap_or_else(PoisonError::into_inner).id;
                return Err(TransactionError::AlreadyActive { tx_id: existing });
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&inner));
            }
        }

        tracing::debug!(
            tx_id = %id,
            concurrency = %concurrency,
            isolation = %isolation,
            timeout_ms = timeout.as_millis() as u64,
            "Transaction started"
        );
        Ok(Transaction {
            id,
            concurrency,
            isolation,
            thread,
            inner,
            shared: Arc::clone(&self.shared),
            _not_send: PhantomData,
        })
    }

    /// Id of the transaction bound to the calling thread.
    pub fn current_tx_id(&self) -> Option<TxId> {
        let tx = self.shared.current()?;
        let id = tx.lock().unwrap_or_else(PoisonError::into_inner).id;
        Some(id)
    }

    /// Run `body` inside a transaction: commit on `Ok`, roll back on `Err`.
    ///
    /// Retrying after a conflict is left to the caller.
    pub fn run_in_transaction<T, E, F>(
        &self,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
        body: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&Transaction) -> Result<T, E>,
        E: From<TesseraError>,
    {
        let mut tx = self
            .tx_start(concurrency, isolation)
            .map_err(TesseraError::from)?;
        let value = body(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

/// Handle of a running transaction.
///
/// Not `Send`: it belongs to the thread that started it. Dropping an
/// unresolved handle rolls the transaction back.
#[derive(Debug)]
pub struct Transaction {
    id: TxId,
    concurrency: TxConcurrency,
    isolation: TxIsolation,
    thread: ThreadId,
    inner: Arc<Mutex<TxInner>>,
    shared: Arc<TxShared>,
    _not_send: PhantomData<*const ()>,
}

impl Transaction {
    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn concurrency(&self) -> TxConcurrency {
        self.concurrency
    }

    pub fn isolation(&self) -> TxIsolation {
        self.isolation
    }

    pub fn state(&self) -> TxState {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).state
    }

    /// Apply buffered writes atomically.
    ///
    /// A failed optimistic validation rolls the transaction back and reports
    /// `Conflict`.
    pub fn commit(&mut self) -> TesseraResult<()> {
        let result = lock_tx(&self.inner)?.commit(&self.shared.locks);
        if !matches!(result, Err(TesseraError::Transaction(TransactionError::InvalidState { .. }))) {
            self.unbind();
        }
        result
    }

    /// Discard buffered writes.
    pub fn rollback(&mut self) -> TesseraResult<()> {
        {
            let mut inner = lock_tx(&self.inner)?;
            inner.ensure_active("rollback")?;
            inner.abort(&self.shared.locks);
        }
        self.unbind();
        Ok(())
    }

    fn unbind(&self) {
        self.shared
            .active
            .remove_if(&self.thread, |_, bound| Arc::ptr_eq(bound, &self.inner));
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.state == TxState::Active {
                inner.abort(&self.shared.locks);
            }
        }
        self.unbind();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coordinator() -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::new(TxShared::new(&EngineConfig::default())))
    }

    #[test]
    fn test_nested_start_is_rejected() {
        let coordinator = coordinator();
        let tx = coordinator
            .tx_start(TxConcurrency::Pessimistic, TxIsolation::RepeatableRead)
            .unwrap();
        let err = coordinator
            .tx_start(TxConcurrency::Optimistic, TxIsolation::Serializable)
            .unwrap_err();
        assert_eq!(err, TransactionError::AlreadyActive { tx_id: tx.id() });
        assert_eq!(coordinator.current_tx_id(), Some(tx.id()));
    }

    #[test]
    fn test_drop_rolls_back_and_unbinds() {
        let coordinator = coordinator();
        {
            let _tx = coordinator.tx_start_default().unwrap();
        }
        assert_eq!(coordinator.current_tx_id(), None);
        assert!(coordinator.tx_start_default().is_ok());
    }

    #[test]
    fn test_commit_then_commit_is_invalid_state() {
        let coordinator = coordinator();
        let mut tx = coordinator.tx_start_default().unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);
        assert_eq!(coordinator.current_tx_id(), None);

        let err = tx.commit().unwrap_err();
        assert!(matches!(
            err,
            TesseraError::Transaction(TransactionError::InvalidState { state: TxState::Committed, .. })
        ));
        assert!(tx.rollback().is_err());
    }

    #[test]
    fn test_transactions_are_per_thread() {
        let coordinator = coordinator();
        let _tx = coordinator.tx_start_default().unwrap();

        let other = coordinator.clone();
        let started = std::thread::spawn(move || other.tx_start_default().map(|tx| tx.id()))
            .join()
            .unwrap();
        assert!(started.is_ok());
    }

    #[test]
    fn test_run_in_transaction_rolls_back_on_error() {
        let coordinator = coordinator();
        let result: Result<(), TesseraError> = coordinator.run_in_transaction(
            TxConcurrency::Optimistic,
            TxIsolation::ReadCommitted,
            |_| Err(CacheError::LockPoisoned.into()),
        );
        assert!(result.is_err());
        assert_eq!(coordinator.current_tx_id(), None);

        let value: Result<i32, TesseraError> = coordinator.run_in_transaction(
            TxConcurrency::Pessimistic,
            TxIsolation::Serializable,
            |tx| {
                assert_eq!(tx.state(), TxState::Active);
                Ok(42)
            },
        );
        assert_eq!(value.unwrap(), 42);
    }
}
