//! Engine: the registry of named caches and the transaction coordinator they
//! share.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tessera_core::{
    CacheConfig, CacheError, EngineConfig, TesseraResult, TransactionError, TxConcurrency,
    TxIsolation,
};

use crate::cache::{Cache, CacheInner};
use crate::tx::{Transaction, TransactionCoordinator, TxShared};

#[derive(Debug)]
struct EngineInner {
    config: EngineConfig,
    caches: DashMap<String, Cache>,
    tx: Arc<TxShared>,
}

/// An in-process cache engine. Cheap to clone; clones share every cache.
#[derive(Debug, Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> TesseraResult<Self> {
        config.validate()?;
        tracing::debug!(
            lock_timeout_ms = config.lock_timeout.as_millis() as u64,
            shard_amount = config.shard_amount,
            stats_enabled = config.stats_enabled,
            "Engine started"
        );
        let tx = Arc::new(TxShared::new(&config));
        Ok(Self {
            inner: Arc::new(EngineInner {
                caches: DashMap::with_shard_amount(config.shard_amount),
                config,
                tx,
            }),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Create a cache; fails with `AlreadyExists` if the name is taken.
    pub fn create_cache(&self, config: CacheConfig) -> TesseraResult<Cache> {
        config.validate()?;
        match self.inner.caches.entry(config.name.clone()) {
            Entry::Occupied(_) => Err(CacheError::AlreadyExists { name: config.name }.into()),
            Entry::Vacant(slot) => {
                let cache = self.build(config);
                slot.insert(cache.clone());
                Ok(cache)
            }
        }
    }

    /// Existing cache by name, or a new one from `config`.
    pub fn get_or_create_cache(&self, config: CacheConfig) -> TesseraResult<Cache> {
        if let Some(existing) = self.inner.caches.get(&config.name) {
            return Ok(existing.clone());
        }
        config.validate()?;
        let cache = self
            .inner
            .caches
            .entry(config.name.clone())
            .or_insert_with(|| self.build(config))
            .clone();
        Ok(cache)
    }

    fn build(&self, config: CacheConfig) -> Cache {
        tracing::debug!(
            cache = %config.name,
            mode = %config.mode,
            indexed = config.schema.indexed_fields().count(),
            "Cache created"
        );
        Cache::new(CacheInner::new(config, &self.inner.config, Arc::clone(&self.inner.tx)))
    }

    pub fn cache(&self, name: &str) -> TesseraResult<Cache> {
        self.inner
            .caches
            .get(name)
            .map(|cache| cache.clone())
            .ok_or_else(|| {
                CacheError::NotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Drop a cache. Outstanding handles fail with `Destroyed` afterwards.
    pub fn destroy_cache(&self, name: &str) -> TesseraResult<()> {
        let (_, cache) = self
            .inner
            .caches
            .remove(name)
            .ok_or_else(|| CacheError::NotFound {
                name: name.to_string(),
            })?;
        cache.inner().destroy();
        tracing::debug!(cache = %name, "Cache destroyed");
        Ok(())
    }

    /// Names of live caches, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .caches
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    pub fn transactions(&self) -> TransactionCoordinator {
        TransactionCoordinator::new(Arc::clone(&self.inner.tx))
    }

    /// Shorthand for `transactions().tx_start(..)`.
    pub fn tx_start(
        &self,
        concurrency: TxConcurrency,
        isolation: TxIsolation,
    ) -> Result<Transaction, TransactionError> {
        self.transactions().tx_start(concurrency, isolation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tessera_core::{ConfigError, FieldDef, FieldKind, Schema, TesseraError, TxState, Value};

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let err = Engine::new(EngineConfig::default().with_shard_amount(3)).unwrap_err();
        assert!(matches!(err, TesseraError::Config(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_create_and_lookup() {
        let engine = engine();
        let cache = engine.create_cache(CacheConfig::new("people")).unwrap();
        cache.put(1, "Ann").unwrap();

        let again = engine.cache("people").unwrap();
        assert_eq!(again.get(1).unwrap(), Some("Ann".into()));

        let err = engine.create_cache(CacheConfig::new("people")).unwrap_err();
        assert_eq!(
            err,
            TesseraError::Cache(CacheError::AlreadyExists {
                name: "people".to_string()
            })
        );
    }

    #[test]
    fn test_get_or_create_returns_existing() {
        let engine = engine();
        let first = engine.get_or_create_cache(CacheConfig::new("c")).unwrap();
        first.put("k", 1).unwrap();
        let second = engine.get_or_create_cache(CacheConfig::new("c")).unwrap();
        assert_eq!(second.size(), 1);
        assert_eq!(engine.cache_names(), vec!["c".to_string()]);
    }

    #[test]
    fn test_missing_cache() {
        let err = engine().cache("nope").unwrap_err();
        assert!(matches!(err, TesseraError::Cache(CacheError::NotFound { .. })));
    }

    #[test]
    fn test_destroyed_handles_stop_working() {
        let engine = engine();
        let cache = engine.create_cache(CacheConfig::new("gone")).unwrap();
        cache.put(1, 1).unwrap();
        engine.destroy_cache("gone").unwrap();

        assert!(!cache.is_usable());
        assert_eq!(cache.size(), 0);
        let err = cache.put(2, 2).unwrap_err();
        assert!(matches!(err, TesseraError::Cache(CacheError::Destroyed { .. })));
        assert!(engine.cache_names().is_empty());
        assert!(engine.destroy_cache("gone").is_err());
    }

    #[test]
    fn test_cache_names_sorted() {
        let engine = engine();
        for name in ["b", "c", "a"] {
            engine.create_cache(CacheConfig::new(name)).unwrap();
        }
        assert_eq!(engine.cache_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_destroy_waits_for_pinned_cache() {
        let engine = engine();
        let cache = engine.create_cache(CacheConfig::new("pinned")).unwrap();
        cache.put(1, 1).unwrap();

        let pin = cache.inner().pin();
        let destroyer = {
            let engine = engine.clone();
            std::thread::spawn(move || engine.destroy_cache("pinned"))
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(cache.is_usable());
        assert_eq!(cache.size(), 1);

        drop(pin);
        destroyer.join().unwrap().unwrap();
        assert!(!cache.is_usable());
    }

    #[test]
    fn test_failed_commit_restores_applied_writes() {
        let engine = engine();
        let accounts = engine.create_cache(CacheConfig::new("accounts")).unwrap();
        accounts.put(1, "old").unwrap();

        for concurrency in [TxConcurrency::Pessimistic, TxConcurrency::Optimistic] {
            // Sorts after "accounts", so its write is applied last.
            let ledger = engine
                .create_cache(
                    CacheConfig::new(format!("ledger-{concurrency}"))
                        .with_schema(Schema::scalar(FieldDef::new("value", FieldKind::String).sorted())),
                )
                .unwrap();

            let mut tx = engine.tx_start(concurrency, TxIsolation::RepeatableRead).unwrap();
            accounts.put(1, "new").unwrap();
            accounts.put(2, "fresh").unwrap();
            ledger.put(1, "entry").unwrap();
            ledger.inner().poison_indexes();

            let err = tx.commit().unwrap_err();
            assert!(matches!(err, TesseraError::Cache(CacheError::Aborted { .. })), "{err:?}");
            assert_eq!(tx.state(), TxState::RolledBack);
            drop(tx);

            assert_eq!(accounts.get(1).unwrap(), Some(Value::from("old")));
            assert_eq!(accounts.get(2).unwrap(), None);
            assert_eq!(accounts.size(), 1);
        }

        // Keys were released: plain writes go through without waiting.
        accounts.put(1, "later").unwrap();
        assert_eq!(accounts.get(1).unwrap(), Some(Value::from("later")));
    }
}
