//! Enum types for caches, queries and transactions

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error when parsing an enum from its string representation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid {kind}: {value}")]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl EnumParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ============================================================================
// CACHE MODE
// ============================================================================

/// Distribution strategy requested for a cache.
///
/// The embedded engine records the mode and reports it back; placement of
/// entries across nodes belongs to the cluster layer and is not performed here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Entries are split across nodes by key affinity.
    #[default]
    Partitioned,
    /// Every node holds every entry.
    Replicated,
    /// Entries live only on the creating node.
    Local,
}

impl CacheMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheMode::Partitioned => "partitioned",
            CacheMode::Replicated => "replicated",
            CacheMode::Local => "local",
        }
    }
}

impl fmt::Display for CacheMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheMode {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "partitioned" => Ok(CacheMode::Partitioned),
            "replicated" => Ok(CacheMode::Replicated),
            "local" => Ok(CacheMode::Local),
            _ => Err(EnumParseError::new("cache mode", s)),
        }
    }
}

// ============================================================================
// COMPARISON OPERATORS
// ============================================================================

/// Comparison operator of a query criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOp {
    /// Whether `field.cmp(comparison_value)` satisfies this operator.
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
        }
    }

    /// Range operators need an ordered index.
    pub fn is_range(&self) -> bool {
        !matches!(self, CompareOp::Eq)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SCHEMA ENUMS
// ============================================================================

/// Kind of a declared schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Int,
    Float,
    Bool,
    Record,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Int => "int",
            FieldKind::Float => "float",
            FieldKind::Bool => "bool",
            FieldKind::Record => "record",
        }
    }

    /// Only scalar kinds can carry an index.
    pub fn is_indexable(&self) -> bool {
        !matches!(self, FieldKind::Record)
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structure backing a field index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    /// Equality lookups only.
    Hash,
    /// Equality lookups plus range scans.
    #[default]
    Sorted,
}

impl IndexKind {
    pub fn supports(&self, op: CompareOp) -> bool {
        match self {
            IndexKind::Hash => !op.is_range(),
            IndexKind::Sorted => true,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IndexKind::Hash => "hash",
            IndexKind::Sorted => "sorted",
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TRANSACTION ENUMS
// ============================================================================

/// Concurrency control strategy of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxConcurrency {
    /// Conflicts are detected when committing.
    Optimistic,
    /// Keys are locked when first touched.
    #[default]
    Pessimistic,
}

impl TxConcurrency {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxConcurrency::Optimistic => "optimistic",
            TxConcurrency::Pessimistic => "pessimistic",
        }
    }
}

impl fmt::Display for TxConcurrency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxConcurrency {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "optimistic" => Ok(TxConcurrency::Optimistic),
            "pessimistic" => Ok(TxConcurrency::Pessimistic),
            _ => Err(EnumParseError::new("transaction concurrency", s)),
        }
    }
}

/// Isolation level of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxIsolation {
    ReadCommitted,
    #[default]
    RepeatableRead,
    Serializable,
}

impl TxIsolation {
    /// Whether reads are remembered and validated (or locked) for the
    /// lifetime of the transaction.
    pub fn tracks_reads(&self) -> bool {
        !matches!(self, TxIsolation::ReadCommitted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxIsolation::ReadCommitted => "read_committed",
            TxIsolation::RepeatableRead => "repeatable_read",
            TxIsolation::Serializable => "serializable",
        }
    }
}

impl fmt::Display for TxIsolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TxIsolation {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "read_committed" => Ok(TxIsolation::ReadCommitted),
            "repeatable_read" => Ok(TxIsolation::RepeatableRead),
            "serializable" => Ok(TxIsolation::Serializable),
            _ => Err(EnumParseError::new("transaction isolation", s)),
        }
    }
}

/// Lifecycle state of a transaction.
///
/// ```text
/// Active ─── commit() ───→ Committed
///    └────── rollback() ─→ RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl TxState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TxState::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TxState::Active => "active",
            TxState::Committed => "committed",
            TxState::RolledBack => "rolled_back",
        }
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
