//! Exclusive key locks with bounded waits and deadlock detection.
//!
//! Every mutation of a key happens while its lock is held: briefly by
//! non-transactional operations, until commit or rollback by pessimistic
//! transactions, and during commit by optimistic ones. Waiters poll in short
//! slices; each slice re-checks the wait-for graph and the deadline.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{new_tx_id, TransactionError, TxId, Value};

const WAIT_SLICE: Duration = Duration::from_millis(5);
const MAX_CYCLE_LENGTH: usize = 64;

/// A key qualified by its cache name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct TxKey {
    pub cache: Arc<str>,
    pub key: Value,
}

#[derive(Debug)]
pub(crate) struct LockTable {
    /// key -> owner
    owners: DashMap<TxKey, TxId>,
    /// owner -> key it is waiting for
    waits_for: DashMap<TxId, TxKey>,
    gate: Mutex<()>,
    released: Condvar,
}

impl LockTable {
    pub fn new(shard_amount: usize) -> Self {
        Self {
            owners: DashMap::with_shard_amount(shard_amount),
            waits_for: DashMap::with_shard_amount(shard_amount),
            gate: Mutex::new(()),
            released: Condvar::new(),
        }
    }

    /// Take `key` for `owner`, waiting at most `timeout`. Re-entrant.
    ///
    /// Fails with `DeadlockDetected` when `owner` is the chosen victim of a
    /// wait cycle (the youngest transaction in it), or with `LockTimeout`.
    pub fn acquire(&self, key: &TxKey, owner: TxId, timeout: Duration) -> Result<(), TransactionError> {
        let deadline = Instant::now() + timeout;
        loop {
            let acquired = match self.owners.entry(key.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(owner);
                    true
                }
                Entry::Occupied(slot) => *slot.get() == owner,
            };
            if acquired {
                self.waits_for.remove(&owner);
                return Ok(());
            }

            self.waits_for.insert(owner, key.clone());
            if self.deadlock_victim(owner) == Some(owner) {
                self.waits_for.remove(&owner);
                return Err(TransactionError::DeadlockDetected {
                    tx_id: owner,
                    cache: key.cache.to_string(),
                    key: key.key.to_string(),
                });
            }

            let now = Instant::now();
            if now >= deadline {
                self.waits_for.remove(&owner);
                return Err(TransactionError::LockTimeout {
                    cache: key.cache.to_string(),
                    key: key.key.to_string(),
                    timeout,
                });
            }

            let gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            let _ = self
                .released
                .wait_timeout(gate, WAIT_SLICE.min(deadline - now))
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Release `key` if `owner` holds it.
    pub fn release(&self, key: &TxKey, owner: TxId) {
        if self.owners.remove_if(key, |_, held| *held == owner).is_some() {
            let _gate = self.gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.released.notify_all();
        }
    }

    /// Lock `key` for a single operation outside any transaction.
    pub fn lock(&self, key: TxKey, timeout: Duration) -> Result<KeyLockGuard<'_>, TransactionError> {
        let owner = new_tx_id();
        self.acquire(&key, owner, timeout)?;
        Ok(KeyLockGuard {
            table: self,
            key,
            owner,
        })
    }

    /// Follow wait-for edges from `start`; if they lead back to it, return
    /// the youngest member of the cycle.
    fn deadlock_victim(&self, start: TxId) -> Option<TxId> {
        let mut members = vec![start];
        let mut current = start;
        for _ in 0..MAX_CYCLE_LENGTH {
            let waited = self.waits_for.get(&current).map(|k| k.value().clone())?;
            let holder = self.owners.get(&waited).map(|o| *o.value())?;
            if holder == start {
                return members.into_iter().max();
            }
            if members.contains(&holder) {
                return None;
            }
            members.push(holder);
            current = holder;
        }
        None
    }
}

/// Releases a single-operation key lock on drop.
#[derive(Debug)]
pub(crate) struct KeyLockGuard<'a> {
    table: &'a LockTable,
    key: TxKey,
    owner: TxId,
}

impl Drop for KeyLockGuard<'_> {
    fn drop(&mut self) {
        self.table.release(&self.key, self.owner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    fn key(n: i64) -> TxKey {
        TxKey {
            cache: Arc::from("c"),
            key: Value::Int(n),
        }
    }

    #[test]
    fn test_reentrant_acquire() {
        let table = LockTable::new(4);
        let owner = new_tx_id();
        table.acquire(&key(1), owner, Duration::from_millis(10)).unwrap();
        table.acquire(&key(1), owner, Duration::from_millis(10)).unwrap();
        table.release(&key(1), owner);
        assert!(table.owners.is_empty());
    }

    #[test]
    fn test_timeout_when_held() {
        let table = LockTable::new(4);
        let holder = new_tx_id();
        table.acquire(&key(1), holder, Duration::from_millis(10)).unwrap();

        let err = table
            .acquire(&key(1), new_tx_id(), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, TransactionError::LockTimeout { .. }));
        assert!(table.waits_for.is_empty());
    }

    #[test]
    fn test_release_by_non_owner_is_ignored() {
        let table = LockTable::new(4);
        let holder = new_tx_id();
        table.acquire(&key(1), holder, Duration::from_millis(10)).unwrap();
        table.release(&key(1), new_tx_id());
        assert_eq!(table.owners.get(&key(1)).map(|o| *o), Some(holder));
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let table = LockTable::new(4);
        {
            let _guard = table.lock(key(7), Duration::from_millis(10)).unwrap();
            assert!(table.owners.contains_key(&key(7)));
        }
        assert!(!table.owners.contains_key(&key(7)));
    }

    #[test]
    fn test_waiter_proceeds_after_release() {
        let table = Arc::new(LockTable::new(4));
        let holder = new_tx_id();
        table.acquire(&key(1), holder, Duration::from_millis(10)).unwrap();

        let waiter = {
            let table = Arc::clone(&table);
            thread::spawn(move || table.acquire(&key(1), new_tx_id(), Duration::from_secs(5)))
        };
        thread::sleep(Duration::from_millis(20));
        table.release(&key(1), holder);
        assert!(waiter.join().unwrap().is_ok());
    }

    #[test]
    fn test_cycle_aborts_youngest_only() {
        let table = Arc::new(LockTable::new(4));
        let older = new_tx_id();
        let younger = new_tx_id();
        let (older, younger) = if older < younger { (older, younger) } else { (younger, older) };

        table.acquire(&key(1), older, Duration::from_secs(1)).unwrap();
        table.acquire(&key(2), younger, Duration::from_secs(1)).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let older_wait = {
            let table = Arc::clone(&table);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                table.acquire(&key(2), older, Duration::from_secs(5))
            })
        };

        barrier.wait();
        thread::sleep(Duration::from_millis(20));
        let err = table.acquire(&key(1), younger, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, TransactionError::DeadlockDetected { tx_id, .. } if tx_id == younger));

        table.release(&key(2), younger);
        assert!(older_wait.join().unwrap().is_ok());
    }
}
