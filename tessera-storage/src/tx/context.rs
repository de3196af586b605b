//! Per-transaction state: touched keys, buffered writes, held locks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tessera_core::{
    CacheError, TesseraResult, Timestamp, TransactionError, TxConcurrency, TxId, TxIsolation, TxState, Value,
};

use super::locks::{LockTable, TxKey};
use crate::cache::Cache;

/// A buffered mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Pending {
    Put(Value),
    Remove,
}

impl Pending {
    fn visible(&self) -> Option<Value> {
        match self {
            Pending::Put(value) => Some(value.clone()),
            Pending::Remove => None,
        }
    }
}

#[derive(Debug)]
struct Touched {
    cache: Cache,
    /// Version to validate at optimistic commit.
    expected_version: Option<u64>,
    /// Value returned by the first tracked read.
    snapshot: Option<Option<Value>>,
    pending: Option<Pending>,
    locked: bool,
}

impl Touched {
    fn new(cache: Cache) -> Self {
        Self {
            cache,
            expected_version: None,
            snapshot: None,
            pending: None,
            locked: false,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TxInner {
    pub id: TxId,
    pub concurrency: TxConcurrency,
    pub isolation: TxIsolation,
    pub state: TxState,
    pub timeout: Duration,
    pub started_at: Timestamp,
    touched: BTreeMap<TxKey, Touched>,
}

impl TxInner {
    pub fn new(id: TxId, concurrency: TxConcurrency, isolation: TxIsolation, timeout: Duration) -> Self {
        Self {
            id,
            concurrency,
            isolation,
            state: TxState::Active,
            timeout,
            started_at: Utc::now(),
            touched: BTreeMap::new(),
        }
    }

    pub fn ensure_active(&self, action: &str) -> Result<(), TransactionError> {
        if self.state == TxState::Active {
            Ok(())
        } else {
            Err(TransactionError::InvalidState {
                tx_id: self.id,
                state: self.state,
                action: action.to_string(),
            })
        }
    }

    /// Number of keys with a buffered write.
    pub fn pending_writes(&self) -> usize {
        self.touched.values().filter(|t| t.pending.is_some()).count()
    }

    /// Keys of `cache` this transaction has buffered puts for.
    pub fn pending_puts(&self, cache: &str) -> Vec<Value> {
        self.touched
            .iter()
            .filter(|(k, t)| &*k.cache == cache && matches!(t.pending, Some(Pending::Put(_))))
            .map(|(k, _)| k.key.clone())
            .collect()
    }

    fn touch(&mut self, tx_key: &TxKey, cache: &Cache) -> &mut Touched {
        self.touched
            .entry(tx_key.clone())
            .or_insert_with(|| Touched::new(cache.clone()))
    }

    fn lock(&mut self, locks: &LockTable, tx_key: &TxKey, cache: &Cache) -> TesseraResult<()> {
        if self.touched.get(tx_key).is_some_and(|t| t.locked) {
            return Ok(());
        }
        match locks.acquire(tx_key, self.id, self.timeout) {
            Ok(()) => {
                self.touch(tx_key, cache).locked = true;
                Ok(())
            }
            Err(err) => {
                tracing::warn!(tx_id = %self.id, error = %err, "Transaction lost a lock wait, rolling back");
                self.abort(locks);
                Err(err.into())
            }
        }
    }

    /// Read through the transaction's view of `key`.
    pub fn read(&mut self, locks: &LockTable, cache: &Cache, key: Value) -> TesseraResult<Option<Value>> {
        let tx_key = cache.inner().tx_key(key);
        if let Some(visible) = self.buffered(&tx_key) {
            return Ok(visible);
        }
        if !self.isolation.tracks_reads() {
            return Ok(cache.inner().committed(&tx_key.key));
        }
        if self.concurrency == TxConcurrency::Pessimistic {
            self.lock(locks, &tx_key, cache)?;
        }
        Ok(self.observe(&tx_key, cache))
    }

    /// Read `key` ahead of a conditional write.
    ///
    /// Pessimistic transactions lock the key whatever the isolation level;
    /// optimistic ones always validate it at commit.
    pub fn read_for_update(&mut self, locks: &LockTable, cache: &Cache, key: Value) -> TesseraResult<Option<Value>> {
        let tx_key = cache.inner().tx_key(key);
        if let Some(visible) = self.buffered(&tx_key) {
            return Ok(visible);
        }
        if self.concurrency == TxConcurrency::Pessimistic {
            self.lock(locks, &tx_key, cache)?;
        }
        Ok(self.observe(&tx_key, cache))
    }

    fn buffered(&self, tx_key: &TxKey) -> Option<Option<Value>> {
        let touched = self.touched.get(tx_key)?;
        if let Some(pending) = &touched.pending {
            return Some(pending.visible());
        }
        touched.snapshot.clone()
    }

    fn observe(&mut self, tx_key: &TxKey, cache: &Cache) -> Option<Value> {
        let (value, version) = cache.inner().committed_versioned(&tx_key.key);
        let touched = self.touch(tx_key, cache);
        touched.expected_version.get_or_insert(version);
        touched.snapshot = Some(value.clone());
        value
    }

    /// Buffer a write of `key`.
    pub fn write(&mut self, locks: &LockTable, cache: &Cache, key: Value, pending: Pending) -> TesseraResult<()> {
        let tx_key = cache.inner().tx_key(key);
        match self.concurrency {
            TxConcurrency::Pessimistic => self.lock(locks, &tx_key, cache)?,
            TxConcurrency::Optimistic if self.isolation == TxIsolation::Serializable => {
                let version = cache.inner().version_of(&tx_key.key);
                self.touch(&tx_key, cache).expected_version.get_or_insert(version);
            }
            TxConcurrency::Optimistic => {}
        }
        self.touch(&tx_key, cache).pending = Some(pending);
        Ok(())
    }

    /// Apply the buffered writes as one unit.
    ///
    /// Every cache written to is pinned against `destroy` for the duration.
    /// If a write still fails (an index poisoned mid-commit), the writes
    /// already applied are restored to their previous values before the
    /// transaction reports `RolledBack`.
    pub fn commit(&mut self, locks: &LockTable) -> TesseraResult<()> {
        self.ensure_active("commit")?;
        if let Some(err) = self.unusable_cache() {
            self.abort(locks);
            return Err(err.into());
        }

        if self.concurrency == TxConcurrency::Optimistic {
            self.lock_and_validate(locks)?;
        }

        let written: BTreeMap<Arc<str>, Cache> = self
            .touched
            .iter()
            .filter(|(_, t)| t.pending.is_some())
            .map(|(k, t)| (Arc::clone(&k.cache), t.cache.clone()))
            .collect();
        let pins: Vec<_> = written.values().map(|cache| cache.inner().pin()).collect();

        if let Some(err) = self.unusable_cache() {
            drop(pins);
            self.abort(locks);
            return Err(err.into());
        }

        let mut failure = None;
        let mut applied: Vec<(Cache, Value, Option<Value>)> = Vec::new();
        for (tx_key, touched) in &self.touched {
            let Some(pending) = &touched.pending else {
                continue;
            };
            let previous = touched.cache.inner().committed(&tx_key.key);
            match touched.cache.inner().apply(&tx_key.key, pending.clone()) {
                Ok(()) => applied.push((touched.cache.clone(), tx_key.key.clone(), previous)),
                Err(err) => {
                    failure = Some(err);
                    break;
                }
            }
        }

        let outcome = match failure {
            None => {
                for (tx_key, touched) in std::mem::take(&mut self.touched) {
                    if touched.locked {
                        locks.release(&tx_key, self.id);
                    }
                }
                self.state = TxState::Committed;
                Ok(applied.len())
            }
            Some(err) => {
                tracing::warn!(
                    tx_id = %self.id,
                    error = %err,
                    restoring = applied.len(),
                    "Commit failed, restoring applied writes"
                );
                // Keys are still locked, so nobody wrote them in between.
                for (cache, key, previous) in applied.into_iter().rev() {
                    let restore = previous.map_or(Pending::Remove, Pending::Put);
                    if let Err(undo) = cache.inner().apply(&key, restore) {
                        tracing::warn!(tx_id = %self.id, cache = %cache.name(), error = %undo, "Write not restored");
                    }
                }
                self.abort(locks);
                Err(err)
            }
        };
        drop(pins);

        tracing::debug!(
            tx_id = %self.id,
            concurrency = %self.concurrency,
            isolation = %self.isolation,
            applied = outcome.as_ref().map_or(0, |n| *n),
            elapsed_ms = (Utc::now() - self.started_at).num_milliseconds(),
            state = %self.state,
            "Transaction finished commit"
        );
        outcome.map(|_| ()).map_err(Into::into)
    }

    /// First cache with a buffered write that can no longer take it.
    fn unusable_cache(&self) -> Option<CacheError> {
        self.touched
            .values()
            .filter(|t| t.pending.is_some())
            .find_map(|t| t.cache.inner().ensure_usable().err())
    }

    /// Optimistic commit: lock written and validated keys in key order, then
    /// check that nothing they observed has changed since.
    fn lock_and_validate(&mut self, locks: &LockTable) -> TesseraResult<()> {
        let to_lock: Vec<(TxKey, Cache)> = self
            .touched
            .iter()
            .filter(|(_, t)| t.pending.is_some() || t.expected_version.is_some())
            .map(|(k, t)| (k.clone(), t.cache.clone()))
            .collect();
        for (tx_key, cache) in &to_lock {
            self.lock(locks, tx_key, cache)?;
        }

        let conflict = self.touched.iter().find(|(tx_key, touched)| {
            touched
                .expected_version
                .is_some_and(|expected| touched.cache.inner().version_of(&tx_key.key) != expected)
        });
        if let Some((tx_key, _)) = conflict {
            let err = TransactionError::Conflict {
                tx_id: self.id,
                cache: tx_key.cache.to_string(),
                key: tx_key.key.to_string(),
            };
            tracing::warn!(tx_id = %self.id, error = %err, "Optimistic validation failed, rolling back");
            self.abort(locks);
            return Err(err.into());
        }
        Ok(())
    }

    /// Discard buffered writes and release locks.
    pub fn abort(&mut self, locks: &LockTable) {
        let discarded = self.pending_writes();
        for (tx_key, touched) in std::mem::take(&mut self.touched) {
            if touched.locked {
                locks.release(&tx_key, self.id);
            }
        }
        self.state = TxState::RolledBack;
        tracing::debug!(tx_id = %self.id, discarded, "Transaction rolled back");
    }
}
