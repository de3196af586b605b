//! Engine and cache configuration.

use crate::error::ConfigError;
use crate::{CacheMode, Schema, TxConcurrency, TxIsolation};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Engine-wide settings.
///
/// Built from defaults, then optionally overridden from the environment or a
/// TOML document. Every constructor validates before returning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// How long a pessimistic lock acquisition waits before failing.
    pub lock_timeout: Duration,
    /// Concurrency used by `tx_start_default`.
    pub default_concurrency: TxConcurrency,
    /// Isolation used by `tx_start_default`.
    pub default_isolation: TxIsolation,
    /// Shard count of each cache's entry map. Power of two, at least 2.
    pub shard_amount: usize,
    /// Whether caches collect hit/miss statistics unless overridden.
    pub stats_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            default_concurrency: TxConcurrency::Pessimistic,
            default_isolation: TxIsolation::RepeatableRead,
            shard_amount: 32,
            stats_enabled: true,
        }
    }
}

/// Partial document accepted by [`EngineConfig::from_toml_str`].
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct EngineConfigFile {
    lock_timeout_ms: Option<u64>,
    default_concurrency: Option<TxConcurrency>,
    default_isolation: Option<TxIsolation>,
    shard_amount: Option<usize>,
    stats_enabled: Option<bool>,
}

impl EngineConfig {
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_default_concurrency(mut self, concurrency: TxConcurrency) -> Self {
        self.default_concurrency = concurrency;
        self
    }

    pub fn with_default_isolation(mut self, isolation: TxIsolation) -> Self {
        self.default_isolation = isolation;
        self
    }

    pub fn with_shard_amount(mut self, shard_amount: usize) -> Self {
        self.shard_amount = shard_amount;
        self
    }

    pub fn with_stats_enabled(mut self, enabled: bool) -> Self {
        self.stats_enabled = enabled;
        self
    }

    /// Defaults overridden by `TESSERA_*` environment variables.
    ///
    /// Recognized: `TESSERA_LOCK_TIMEOUT_MS`, `TESSERA_SHARD_AMOUNT`,
    /// `TESSERA_STATS_ENABLED`, `TESSERA_TX_CONCURRENCY`,
    /// `TESSERA_TX_ISOLATION`. Unset variables keep their defaults; malformed
    /// ones are errors.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`EngineConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("TESSERA_LOCK_TIMEOUT_MS") {
            let ms: u64 = parse_var("TESSERA_LOCK_TIMEOUT_MS", &raw)?;
            config.lock_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup("TESSERA_SHARD_AMOUNT") {
            config.shard_amount = parse_var("TESSERA_SHARD_AMOUNT", &raw)?;
        }
        if let Some(raw) = lookup("TESSERA_STATS_ENABLED") {
            config.stats_enabled = parse_var("TESSERA_STATS_ENABLED", &raw)?;
        }
        if let Some(raw) = lookup("TESSERA_TX_CONCURRENCY") {
            config.default_concurrency = parse_var("TESSERA_TX_CONCURRENCY", &raw)?;
        }
        if let Some(raw) = lookup("TESSERA_TX_ISOLATION") {
            config.default_isolation = parse_var("TESSERA_TX_ISOLATION", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by a TOML document.
    ///
    /// ```
    /// use tessera_core::EngineConfig;
    ///
    /// let config = EngineConfig::from_toml_str("lock_timeout_ms = 250\nshard_amount = 8").unwrap();
    /// assert_eq!(config.shard_amount, 8);
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let file: EngineConfigFile = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;

        let defaults = Self::default();
        let config = Self {
            lock_timeout: file
                .lock_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            default_concurrency: file.default_concurrency.unwrap_or(defaults.default_concurrency),
            default_isolation: file.default_isolation.unwrap_or(defaults.default_isolation),
            shard_amount: file.shard_amount.unwrap_or(defaults.shard_amount),
            stats_enabled: file.stats_enabled.unwrap_or(defaults.stats_enabled),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "lock_timeout".to_string(),
                value: format!("{:?}", self.lock_timeout),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.shard_amount < 2 || !self.shard_amount.is_power_of_two() {
            return Err(ConfigError::InvalidValue {
                field: "shard_amount".to_string(),
                value: self.shard_amount.to_string(),
                reason: "must be a power of two greater than 1".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        field: name.to_string(),
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Settings of a single cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub name: String,
    pub schema: Schema,
    pub mode: CacheMode,
    /// Overrides [`EngineConfig::stats_enabled`] when set.
    pub stats_enabled: Option<bool>,
}

impl CacheConfig {
    /// A partitioned cache with a dynamic schema.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            schema: Schema::dynamic(),
            mode: CacheMode::default(),
            stats_enabled: None,
        }
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_mode(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stats(mut self, enabled: bool) -> Self {
        self.stats_enabled = Some(enabled);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "name".to_string(),
                value: self.name.clone(),
                reason: "cache name cannot be empty".to_string(),
            });
        }
        self.schema.validate().map_err(|e| ConfigError::InvalidValue {
            field: "schema".to_string(),
            value: self.name.clone(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FieldDef, FieldKind};
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let config = EngineConfig::from_lookup(lookup(&[
            ("TESSERA_LOCK_TIMEOUT_MS", "500"),
            ("TESSERA_SHARD_AMOUNT", "16"),
            ("TESSERA_TX_CONCURRENCY", "optimistic"),
            ("TESSERA_TX_ISOLATION", "serializable"),
            ("TESSERA_STATS_ENABLED", "false"),
        ]))
        .unwrap();

        assert_eq!(config.lock_timeout, Duration::from_millis(500));
        assert_eq!(config.shard_amount, 16);
        assert_eq!(config.default_concurrency, TxConcurrency::Optimistic);
        assert_eq!(config.default_isolation, TxIsolation::Serializable);
        assert!(!config.stats_enabled);
    }

    #[test]
    fn test_env_malformed_value_is_error() {
        let err = EngineConfig::from_lookup(lookup(&[("TESSERA_SHARD_AMOUNT", "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref field, .. } if field == "TESSERA_SHARD_AMOUNT"));
    }

    #[test]
    fn test_shard_amount_must_be_power_of_two() {
        let config = EngineConfig::default().with_shard_amount(12);
        assert!(config.validate().is_err());
        let config = EngineConfig::default().with_shard_amount(1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = EngineConfig::default().with_lock_timeout(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_partial_document() {
        let config = EngineConfig::from_toml_str(
            "lock_timeout_ms = 250\ndefault_isolation = \"read_committed\"\n",
        )
        .unwrap();
        assert_eq!(config.lock_timeout, Duration::from_millis(250));
        assert_eq!(config.default_isolation, TxIsolation::ReadCommitted);
        assert_eq!(config.shard_amount, EngineConfig::default().shard_amount);
    }

    #[test]
    fn test_toml_unknown_key_rejected() {
        let err = EngineConfig::from_toml_str("lock_timeout = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "shard_amount = 4").unwrap();
        writeln!(file, "stats_enabled = false").unwrap();

        let config = EngineConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.shard_amount, 4);
        assert!(!config.stats_enabled);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = EngineConfig::from_toml_file("/nonexistent/tessera.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_cache_config_validation() {
        assert!(CacheConfig::new("").validate().is_err());

        let bad_schema = Schema::record("Person")
            .field(FieldDef::new("tags", FieldKind::Record).sorted());
        assert!(CacheConfig::new("persons").with_schema(bad_schema).validate().is_err());

        assert!(CacheConfig::new("persons").validate().is_ok());
    }
}
