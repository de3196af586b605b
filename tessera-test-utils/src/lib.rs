//! Tessera Test Utilities
//!
//! Shared test infrastructure for the Tessera workspace:
//! - Record types and schemas used across tests and the demo
//! - Engine and cache fixtures
//! - Proptest generators for values and records
//! - Assertions on Tessera error variants

pub use tessera_core::{
    BinaryObject, CacheConfig, CacheError, EngineConfig, FieldDef, FieldKind, QueryError,
    Schema, SchemaError, TesseraError, TesseraResult, TransactionError, TxConcurrency,
    TxIsolation, Value,
};
pub use tessera_storage::{Cache, CacheEntry, Engine, QueryCursor};

use serde::{Deserialize, Serialize};

// ============================================================================
// RECORD TYPES
// ============================================================================

/// Postal address nested inside a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub zip: i64,
}

/// Person record, stored under its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: i64,
    pub org_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub resume: String,
    pub salary: f64,
    pub address: Option<Address>,
}

impl Person {
    pub fn new(id: i64, org_id: i64, first_name: &str, last_name: &str, resume: &str, salary: f64) -> Self {
        Self {
            id,
            org_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            resume: resume.to_string(),
            salary,
            address: None,
        }
    }

    pub fn with_address(mut self, street: &str, city: &str, zip: i64) -> Self {
        self.address = Some(Address {
            street: street.to_string(),
            city: city.to_string(),
            zip,
        });
        self
    }
}

/// Organization record, stored under its `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built engines, caches and data sets.

    use super::*;
    use std::time::Duration;

    pub const PERSON_CACHE: &str = "persons";
    pub const ORGANIZATION_CACHE: &str = "organizations";

    /// Engine with a short lock timeout so contention tests finish quickly.
    pub fn engine() -> Engine {
        engine_with_timeout(Duration::from_millis(500))
    }

    pub fn engine_with_timeout(timeout: Duration) -> Engine {
        Engine::new(EngineConfig::default().with_lock_timeout(timeout))
            .unwrap_or_else(|e| panic!("test engine config rejected: {e}"))
    }

    pub fn person_schema() -> Schema {
        Schema::record("Person")
            .field(FieldDef::new("orgId", FieldKind::Int).sorted())
            .field(FieldDef::new("firstName", FieldKind::String))
            .field(FieldDef::new("lastName", FieldKind::String).hashed())
            .field(FieldDef::new("resume", FieldKind::String).text())
            .field(FieldDef::new("salary", FieldKind::Float).sorted())
            .field(FieldDef::new("address.city", FieldKind::String).hashed())
    }

    pub fn organization_schema() -> Schema {
        Schema::record("Organization")
            .field(FieldDef::new("name", FieldKind::String).hashed())
    }

    /// Scalar cache of strings indexed under the field `value`.
    pub fn string_schema() -> Schema {
        Schema::scalar(FieldDef::new("value", FieldKind::String).sorted())
    }

    pub fn organizations() -> Vec<Organization> {
        vec![
            Organization {
                id: 1,
                name: "ACME".to_string(),
            },
            Organization {
                id: 2,
                name: "Other".to_string(),
            },
        ]
    }

    /// Two people per organization, two Master and two Bachelor resumes.
    pub fn persons() -> Vec<Person> {
        vec![
            Person::new(1, 1, "John", "Doe", "John Doe has Master Degree.", 1000.0)
                .with_address("1 Main St", "Denver", 80201),
            Person::new(2, 1, "Jane", "Doe", "Jane Doe has Bachelor Degree.", 2000.0)
                .with_address("1 Main St", "Denver", 80201),
            Person::new(3, 2, "John", "Smith", "John Smith has Bachelor Degree.", 1000.0)
                .with_address("9 Elm St", "Boston", 2108),
            Person::new(4, 2, "Jane", "Smith", "Jane Smith has Master Degree.", 2000.0),
        ]
    }

    pub fn person_cache(engine: &Engine) -> Cache {
        engine
            .create_cache(CacheConfig::new(PERSON_CACHE).with_schema(person_schema()))
            .unwrap_or_else(|e| panic!("person cache: {e}"))
    }

    pub fn organization_cache(engine: &Engine) -> Cache {
        engine
            .create_cache(CacheConfig::new(ORGANIZATION_CACHE).with_schema(organization_schema()))
            .unwrap_or_else(|e| panic!("organization cache: {e}"))
    }

    /// Person cache filled with [`persons`].
    pub fn populated_person_cache(engine: &Engine) -> Cache {
        let cache = person_cache(engine);
        let typed = cache.typed::<i64, Person>();
        for person in persons() {
            typed
                .put(&person.id, &person)
                .unwrap_or_else(|e| panic!("populate persons: {e}"));
        }
        cache
    }

    /// Organization cache filled with [`organizations`].
    pub fn populated_organization_cache(engine: &Engine) -> Cache {
        let cache = organization_cache(engine);
        let typed = cache.typed::<i64, Organization>();
        for org in organizations() {
            typed
                .put(&org.id, &org)
                .unwrap_or_else(|e| panic!("populate organizations: {e}"));
        }
        cache
    }

    /// Scalar string cache holding `1 -> "a"` and `2 -> "b"`.
    pub fn letters_cache(engine: &Engine) -> Cache {
        let cache = engine
            .create_cache(CacheConfig::new("letters").with_schema(string_schema()))
            .unwrap_or_else(|e| panic!("letters cache: {e}"));
        cache
            .put_all([(1, "a"), (2, "b")])
            .unwrap_or_else(|e| panic!("populate letters: {e}"));
        cache
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for values and records.

    use super::*;
    use proptest::prelude::*;

    /// Any non-null scalar value.
    pub fn arb_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            (-1.0e9f64..1.0e9).prop_map(Value::Float),
            "[a-z]{0,12}".prop_map(Value::String),
        ]
    }

    /// Small integer keys, so that generated operations collide.
    pub fn arb_key() -> impl Strategy<Value = i64> {
        0i64..32
    }

    /// Cities the generated addresses are drawn from.
    pub fn arb_city() -> impl Strategy<Value = &'static str> {
        prop_oneof![Just("Denver"), Just("Boston"), Just("Austin")]
    }

    /// A person in one of three organizations; some have no address.
    pub fn arb_person() -> impl Strategy<Value = Person> {
        (
            arb_key(),
            1i64..4,
            "[A-Z][a-z]{2,8}",
            "[A-Z][a-z]{2,8}",
            prop_oneof![Just("Master Degree."), Just("Bachelor Degree."), Just("None.")],
            (0u32..10_000).prop_map(f64::from),
            prop::option::of((arb_city(), 1i64..100)),
        )
            .prop_map(|(id, org_id, first, last, resume, salary, address)| {
                let person = Person::new(id, org_id, &first, &last, resume, salary);
                match address {
                    Some((city, zip)) => person.with_address("1 Main St", city, zip),
                    None => person,
                }
            })
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on Tessera error variants.

    use super::*;

    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Cache(_)) => {}
            other => panic!("Expected Cache error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_schema_error<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Schema(_)) => {}
            other => panic!("Expected Schema error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_cursor_exhausted<T: std::fmt::Debug>(result: &Result<T, QueryError>) {
        match result {
            Err(QueryError::CursorExhausted) => {}
            other => panic!("Expected CursorExhausted, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_conflict<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Transaction(TransactionError::Conflict { .. })) => {}
            other => panic!("Expected Conflict, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_deadlock<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Transaction(TransactionError::DeadlockDetected { .. })) => {}
            other => panic!("Expected DeadlockDetected, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_lock_timeout<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Transaction(TransactionError::LockTimeout { .. })) => {}
            other => panic!("Expected LockTimeout, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_invalid_tx_state<T: std::fmt::Debug>(result: &TesseraResult<T>) {
        match result {
            Err(TesseraError::Transaction(TransactionError::InvalidState { .. })) => {}
            other => panic!("Expected InvalidState, got: {:?}", other),
        }
    }

    /// Keys produced by a fresh cursor, sorted for order-insensitive
    /// comparisons.
    #[track_caller]
    pub fn sorted_keys(mut cursor: QueryCursor<CacheEntry>) -> Vec<Value> {
        let entries = cursor
            .get_all()
            .unwrap_or_else(|e| panic!("Expected an open cursor, got: {e}"));
        let mut keys: Vec<Value> = entries.into_iter().map(|e| e.key).collect();
        keys.sort();
        keys
    }
}

// ============================================================================
// TESTS
// ============================================================================
