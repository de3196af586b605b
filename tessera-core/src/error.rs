//! Error types for Tessera operations

use crate::{CompareOp, FieldKind, IndexKind, TxId, TxState};
use std::time::Duration;
use thiserror::Error;

/// Cache lifecycle and store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache not found: {name}")]
    NotFound { name: String },

    #[error("Cache already exists: {name}")]
    AlreadyExists { name: String },

    #[error("Cache {name} has been destroyed")]
    Destroyed { name: String },

    #[error("Cache {name} aborted: {reason}")]
    Aborted { name: String, reason: String },

    #[error("Duplicate key {key} in cache {cache}")]
    DuplicateKey { cache: String, key: String },

    #[error("Null {what} rejected by cache {cache}")]
    NullRejected { cache: String, what: &'static str },

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Schema declaration and conformance errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SchemaError {
    #[error("Unknown field: {field}")]
    UnknownField { field: String },

    #[error("Field {field} is not indexed")]
    FieldNotIndexed { field: String },

    #[error("Field {field} is not declared as a text field")]
    NotTextField { field: String },

    #[error("Type mismatch for {field}: expected {expected}, got {actual}")]
    FieldTypeMismatch {
        field: String,
        expected: FieldKind,
        actual: String,
    },

    #[error("Operator {op} is not supported by the {index} index on {field}")]
    UnsupportedOperator {
        field: String,
        op: CompareOp,
        index: IndexKind,
    },

    #[error("Invalid schema: {reason}")]
    InvalidSchema { reason: String },
}

/// Query construction and cursor errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("Cursor exhausted: results can only be iterated once")]
    CursorExhausted,

    #[error("Invalid search pattern: {reason}")]
    InvalidPattern { reason: String },
}

/// Transaction errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Transaction {tx_id} conflicts on key {key} in cache {cache}")]
    Conflict {
        tx_id: TxId,
        cache: String,
        key: String,
    },

    #[error("Deadlock detected for transaction {tx_id} waiting on key {key} in cache {cache}")]
    DeadlockDetected {
        tx_id: TxId,
        cache: String,
        key: String,
    },

    #[error("Lock timeout after {timeout:?} on key {key} in cache {cache}")]
    LockTimeout {
        cache: String,
        key: String,
        timeout: Duration,
    },

    #[error("Invalid transaction state for {tx_id}: cannot {action} when {state}")]
    InvalidState {
        tx_id: TxId,
        state: TxState,
        action: String,
    },

    #[error("Transaction {tx_id} is already active in this context")]
    AlreadyActive { tx_id: TxId },
}

/// Conversion errors between typed records and binary objects.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Unsupported value type: {kind}")]
    UnsupportedType { kind: String },

    #[error("Integer out of range for a 64-bit signed value")]
    IntegerOverflow,

    #[error("Non-finite float cannot be encoded")]
    NonFiniteFloat,

    #[error("Serialization error: {reason}")]
    Serde { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },

    #[error("Failed to read configuration: {reason}")]
    Io { reason: String },
}

/// Master error type for all Tessera errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesseraError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Query error: {0}")]
    Query(#[from] QueryError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Encoding error: {0}")]
    Encoding(#[from] EncodingError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for Tessera operations.
pub type TesseraResult<T> = Result<T, TesseraError>;

// =============================================================================
// TESTS
// =============================================================================
