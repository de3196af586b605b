//! Cache store.
//!
//! A [`Cache`] is a named, key-unique collection of entries with secondary
//! indexes over the fields its schema declares. Handles are cheap to clone and
//! share the same store.
//!
//! Every mutation locks its key for the duration of the store and index
//! update, so writers of different keys never wait on each other while writers
//! of the same key are serialized. Calls made on a thread with a bound
//! transaction are routed through that transaction.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock, RwLockReadGuard};

use dashmap::DashMap;
use tessera_core::{
    CacheConfig, CacheError, CacheMode, EngineConfig, Schema, TesseraResult, TransactionError,
    Value,
};

use crate::cursor::QueryCursor;
use crate::index::IndexManager;
use crate::query::{self, Criterion, EntryQuery, FieldsQuery};
use crate::stats::{CacheStats, StatsCounters};
use crate::tx::{lock_tx, KeyLockGuard, Pending, TxInner, TxKey, TxShared};
use crate::typed::TypedCache;

const ACTIVE: u8 = 0;
const DESTROYED: u8 = 1;
const ABORTED: u8 = 2;

/// A key and its value as returned by queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: Value,
    pub value: Value,
}

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    /// Bumped on every write; absent keys read as version 0.
    version: u64,
}

#[derive(Debug)]
pub(crate) struct CacheInner {
    name: Arc<str>,
    schema: Schema,
    mode: CacheMode,
    entries: DashMap<Value, StoredEntry>,
    indexes: IndexManager,
    stats: StatsCounters,
    versions: AtomicU64,
    state: AtomicU8,
    abort_reason: OnceLock<String>,
    /// Held shared by committing transactions, exclusively by `destroy`.
    lifecycle: RwLock<()>,
    tx: Arc<TxShared>,
}

impl CacheInner {
    pub fn new(config: CacheConfig, engine: &EngineConfig, tx: Arc<TxShared>) -> Self {
        let indexes = IndexManager::new(&config.schema);
        Self {
            name: Arc::from(config.name.as_str()),
            mode: config.mode,
            stats: StatsCounters::new(config.stats_enabled.unwrap_or(engine.stats_enabled)),
            entries: DashMap::with_shard_amount(engine.shard_amount),
            indexes,
            schema: config.schema,
            versions: AtomicU64::new(0),
            state: AtomicU8::new(ACTIVE),
            abort_reason: OnceLock::new(),
            lifecycle: RwLock::new(()),
            tx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn ensure_usable(&self) -> Result<(), CacheError> {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => Ok(()),
            DESTROYED => Err(CacheError::Destroyed {
                name: self.name.to_string(),
            }),
            _ => Err(CacheError::Aborted {
                name: self.name.to_string(),
                reason: self.abort_reason.get().cloned().unwrap_or_default(),
            }),
        }
    }

    /// Take the cache out of service after its internal state became
    /// untrustworthy.
    fn abort(&self, reason: String) -> CacheError {
        if self
            .state
            .compare_exchange(ACTIVE, ABORTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.abort_reason.set(reason.clone());
            tracing::warn!(cache = %self.name, reason = %reason, "Cache aborted");
        }
        CacheError::Aborted {
            name: self.name.to_string(),
            reason,
        }
    }

    /// Keep the cache from being destroyed while the guard is held.
    pub fn pin(&self) -> RwLockReadGuard<'_, ()> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn destroy(&self) {
        let _exclusive = self.lifecycle.write().unwrap_or_else(PoisonError::into_inner);
        self.state.store(DESTROYED, Ordering::Release);
        self.entries.clear();
        if let Err(err) = self.indexes.clear() {
            tracing::warn!(cache = %self.name, error = %err, "Index not cleared on destroy");
        }
    }

    pub fn committed(&self, key: &Value) -> Option<Value> {
        self.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn committed_versioned(&self, key: &Value) -> (Option<Value>, u64) {
        match self.entries.get(key) {
            Some(entry) => (Some(entry.value.clone()), entry.version),
            None => (None, 0),
        }
    }

    pub fn version_of(&self, key: &Value) -> u64 {
        self.entries.get(key).map_or(0, |entry| entry.version)
    }

    pub fn tx_key(&self, key: Value) -> TxKey {
        TxKey {
            cache: Arc::clone(&self.name),
            key,
        }
    }

    pub fn key_snapshot(&self) -> Vec<Value> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn candidates(&self, criteria: &[Criterion]) -> Result<BTreeSet<Value>, CacheError> {
        self.indexes
            .candidates(&self.name, criteria)
            .map_err(|err| self.abort(err.to_string()))
    }

    #[cfg(test)]
    pub fn poison_indexes(&self) {
        self.indexes.poison();
    }

    fn lock_key(&self, key: &Value) -> Result<KeyLockGuard<'_>, TransactionError> {
        self.tx.locks.lock(self.tx_key(key.clone()), self.tx.lock_timeout())
    }

    /// Write to the store and indexes. The caller holds the key lock.
    pub fn apply(&self, key: &Value, pending: Pending) -> Result<(), CacheError> {
        self.ensure_usable()?;
        let indexed = match pending {
            Pending::Put(value) => {
                let version = self.versions.fetch_add(1, Ordering::Relaxed) + 1;
                let result = self.indexes.update(&self.schema, key, Some(&value));
                self.entries.insert(key.clone(), StoredEntry { value, version });
                self.stats.record_put();
                result
            }
            Pending::Remove => {
                if self.entries.remove(key).is_none() {
                    return Ok(());
                }
                self.stats.record_removal();
                self.indexes.update(&self.schema, key, None)
            }
        };
        indexed.map_err(|err| self.abort(err.to_string()))
    }
}

/// Handle to a named cache.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("mode", &self.inner.mode)
            .field("size", &self.inner.entries.len())
            .finish()
    }
}

impl Cache {
    pub(crate) fn new(inner: CacheInner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub(crate) fn inner(&self) -> &Arc<CacheInner> {
        &self.inner
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    pub fn mode(&self) -> CacheMode {
        self.inner.mode
    }

    /// Whether the cache still accepts operations.
    pub fn is_usable(&self) -> bool {
        self.inner.ensure_usable().is_ok()
    }

    fn key_of(&self, key: impl Into<Value>) -> Result<Value, CacheError> {
        let key = key.into();
        if key.is_null() {
            return Err(CacheError::NullRejected {
                cache: self.inner.name.to_string(),
                what: "key",
            });
        }
        Ok(key)
    }

    fn value_of(&self, value: impl Into<Value>) -> TesseraResult<Value> {
        let value = value.into();
        if value.is_null() {
            return Err(CacheError::NullRejected {
                cache: self.inner.name.to_string(),
                what: "value",
            }
            .into());
        }
        self.inner.schema.check_value(&value)?;
        Ok(value)
    }

    fn bound_tx(&self) -> TesseraResult<Option<Arc<Mutex<TxInner>>>> {
        self.inner.ensure_usable()?;
        Ok(self.inner.tx.current())
    }

    fn enter<'a>(handle: &'a Mutex<TxInner>, action: &str) -> TesseraResult<MutexGuard<'a, TxInner>> {
        let tx = lock_tx(handle)?;
        tx.ensure_active(action)?;
        Ok(tx)
    }

    /// Insert or overwrite.
    pub fn put(&self, key: impl Into<Value>, value: impl Into<Value>) -> TesseraResult<()> {
        let key = self.key_of(key)?;
        let value = self.value_of(value)?;
        match self.bound_tx()? {
            Some(handle) => {
                let mut tx = Self::enter(&handle, "put")?;
                tx.write(&self.inner.tx.locks, self, key, Pending::Put(value))
            }
            None => {
                let _guard = self.inner.lock_key(&key)?;
                self.inner.apply(&key, Pending::Put(value))?;
                Ok(())
            }
        }
    }

    /// Put every entry in order.
    ///
    /// Each entry is applied on its own; entries before a failing one stay
    /// written. Inside a transaction all of them are buffered.
    pub fn put_all<I, K, V>(&self, entries: I) -> TesseraResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<Value>,
        V: Into<Value>,
    {
        for (key, value) in entries {
            self.put(key, value)?;
        }
        Ok(())
    }

    /// Current value, `None` when the key is absent.
    pub fn get(&self, key: impl Into<Value>) -> TesseraResult<Option<Value>> {
        let key = self.key_of(key)?;
        let value = match self.bound_tx()? {
            Some(handle) => {
                let mut tx = Self::enter(&handle, "get")?;
                tx.read(&self.inner.tx.locks, self, key)?
            }
            None => self.inner.committed(&key),
        };
        self.inner.stats.record_read(value.is_some());
        Ok(value)
    }

    /// Values of the keys that are present.
    pub fn get_all<I, K>(&self, keys: I) -> TesseraResult<BTreeMap<Value, Value>>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let mut found = BTreeMap::new();
        for key in keys {
            let key = self.key_of(key)?;
            if let Some(value) = self.get(key.clone())? {
                found.insert(key, value);
            }
        }
        Ok(found)
    }

    pub fn contains_key(&self, key: impl Into<Value>) -> TesseraResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Read-decide-write under the key lock (or the bound transaction).
    fn conditional<F>(&self, action: &str, key: Value, decide: F) -> TesseraResult<bool>
    where
        F: FnOnce(Option<&Value>) -> TesseraResult<Option<Pending>>,
    {
        match self.bound_tx()? {
            Some(handle) => {
                let mut tx = Self::enter(&handle, action)?;
                let locks = &self.inner.tx.locks;
                let current = tx.read_for_update(locks, self, key.clone())?;
                match decide(current.as_ref())? {
                    Some(pending) => {
                        tx.write(locks, self, key, pending)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
            None => {
                let _guard = self.inner.lock_key(&key)?;
                let current = self.inner.committed(&key);
                match decide(current.as_ref())? {
                    Some(pending) => {
                        self.inner.apply(&key, pending)?;
                        Ok(true)
                    }
                    None => Ok(false),
                }
            }
        }
    }

    /// Insert a new key; fails with `DuplicateKey` if it is present.
    pub fn insert(&self, key: impl Into<Value>, value: impl Into<Value>) -> TesseraResult<()> {
        let key = self.key_of(key)?;
        let value = self.value_of(value)?;
        let cache = self.inner.name.to_string();
        let key_text = key.to_string();
        self.conditional("insert", key, move |current| match current {
            Some(_) => Err(CacheError::DuplicateKey { cache, key: key_text }.into()),
            None => Ok(Some(Pending::Put(value))),
        })?;
        Ok(())
    }

    /// Insert only if absent; returns whether the value was stored.
    pub fn put_if_absent(&self, key: impl Into<Value>, value: impl Into<Value>) -> TesseraResult<bool> {
        let key = self.key_of(key)?;
        let value = self.value_of(value)?;
        self.conditional("put_if_absent", key, move |current| {
            Ok(current.is_none().then_some(Pending::Put(value)))
        })
    }

    /// Replace the value only if it currently equals `old`.
    pub fn replace(
        &self,
        key: impl Into<Value>,
        old: impl Into<Value>,
        new: impl Into<Value>,
    ) -> TesseraResult<bool> {
        let key = self.key_of(key)?;
        let old = old.into();
        let new = self.value_of(new)?;
        self.conditional("replace", key, move |current| {
            Ok((current == Some(&old)).then_some(Pending::Put(new)))
        })
    }

    /// Remove a key; returns whether it was present.
    pub fn remove(&self, key: impl Into<Value>) -> TesseraResult<bool> {
        let key = self.key_of(key)?;
        self.conditional("remove", key, |current| {
            Ok(current.map(|_| Pending::Remove))
        })
    }

    /// Remove the given keys; returns how many were present.
    pub fn remove_keys<I, K>(&self, keys: I) -> TesseraResult<usize>
    where
        I: IntoIterator<Item = K>,
        K: Into<Value>,
    {
        let mut removed = 0;
        for key in keys {
            if self.remove(key)? {
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Remove every entry.
    pub fn remove_all(&self) -> TesseraResult<()> {
        let keys = self.inner.key_snapshot();
        let count = keys.len();
        match self.bound_tx()? {
            Some(handle) => {
                let mut tx = Self::enter(&handle, "remove_all")?;
                let mut keys = keys;
                keys.extend(tx.pending_puts(&self.inner.name));
                for key in keys {
                    tx.write(&self.inner.tx.locks, self, key, Pending::Remove)?;
                }
            }
            None => {
                for key in keys {
                    let _guard = self.inner.lock_key(&key)?;
                    self.inner.apply(&key, Pending::Remove)?;
                }
            }
        }
        tracing::debug!(cache = %self.inner.name, count, "Cache cleared");
        Ok(())
    }

    /// Number of committed entries.
    pub fn size(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Run a scan, index or text query.
    ///
    /// Criteria are checked against the schema here, before any cursor
    /// exists.
    pub fn query(&self, query: impl Into<EntryQuery>) -> TesseraResult<QueryCursor<CacheEntry>> {
        self.inner.ensure_usable()?;
        query::run_entry_query(&self.inner, query.into())
    }

    /// Run a projection query.
    pub fn query_fields(&self, query: FieldsQuery) -> TesseraResult<QueryCursor<Vec<Value>>> {
        self.inner.ensure_usable()?;
        query::run_fields_query(&self.inner, query)
    }

    /// Typed view converting keys and values through `serde`.
    pub fn typed<K, V>(&self) -> TypedCache<K, V> {
        TypedCache::new(self.clone())
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats.snapshot(self.inner.entries.len())
    }

    pub fn stats_enabled(&self) -> bool {
        self.inner.stats.enabled()
    }
}
