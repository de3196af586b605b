//! Tessera Core - Data Types
//!
//! Values, schemas, configuration and the error taxonomy shared by the
//! storage engine and its callers. This crate holds no engine state.

pub mod config;
pub mod enums;
pub mod error;
pub mod schema;
mod value;

pub use config::{CacheConfig, EngineConfig};
pub use enums::{
    CacheMode, CompareOp, EnumParseError, FieldKind, IndexKind, TxConcurrency, TxIsolation,
    TxState,
};
pub use error::{
    CacheError, ConfigError, EncodingError, QueryError, SchemaError, TesseraError, TesseraResult,
    TransactionError,
};
pub use schema::{FieldDef, Schema, KEY_FIELD, VALUE_FIELD};
pub use value::{BinaryObject, BinaryObjectBuilder, Value};

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Transaction identifier. UUIDv7, so ids sort by start time.
pub type TxId = Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Generate a new transaction id.
pub fn new_tx_id() -> TxId {
    Uuid::now_v7()
}

// ============================================================================
// PROPERTY-BASED TESTS
// ============================================================================

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    fn scalar_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,8}".prop_map(Value::String),
        ]
    }

    fn hash_of(value: &Value) -> u64 {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        hasher.finish()
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Equal values hash equally, so hash indexes and ordered indexes agree.
        #[test]
        fn prop_equal_values_hash_equal(a in scalar_value(), b in scalar_value()) {
            if a == b {
                prop_assert_eq!(hash_of(&a), hash_of(&b));
            }
            prop_assert_eq!(hash_of(&a), hash_of(&a.clone()));
        }

        /// Ordering is antisymmetric across kinds.
        #[test]
        fn prop_ordering_is_antisymmetric(a in scalar_value(), b in scalar_value()) {
            prop_assert_eq!(a.cmp(&b), b.cmp(&a).reverse());
        }

        /// Finite floats survive the typed round trip.
        #[test]
        fn prop_finite_float_typed(x in -1.0e12f64..1.0e12) {
            let value = Value::from_typed(&x).unwrap();
            prop_assert_eq!(value.to_typed::<f64>().unwrap(), x);
        }
    }

    #[test]
    fn test_tx_ids_are_v7() {
        let id = new_tx_id();
        assert_eq!(id.get_version_num(), 7);
        assert_ne!(id, new_tx_id());
    }
}
