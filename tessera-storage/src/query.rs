//! Query construction and execution.
//!
//! Four query kinds share the [`QueryCursor`] abstraction:
//!
//! - [`ScanQuery`]: a predicate over every entry, no index use.
//! - [`IndexQuery`]: criteria resolved through field indexes to a candidate
//!   key set, then an optional residual filter over the candidates only.
//! - [`TextQuery`]: case-insensitive whole-word search over text fields.
//! - [`FieldsQuery`]: projection of selected fields into rows ordered by key.
//!
//! Executions read committed state. Keys are captured when the query runs;
//! values are fetched lazily while iterating, so entries changed mid-iteration
//! may or may not appear, but each appears at most once and never torn.

use std::fmt;
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use tessera_core::{
    CompareOp, QueryError, Schema, SchemaError, TesseraResult, Value, KEY_FIELD, VALUE_FIELD,
};

use crate::cache::{CacheEntry, CacheInner};
use crate::cursor::QueryCursor;

/// Residual predicate over `(key, value)`.
pub type EntryPredicate = Box<dyn Fn(&Value, &Value) -> bool + Send + Sync>;

// ============================================================================
// CRITERIA
// ============================================================================

/// One `(field, operator, value)` comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    field: String,
    op: CompareOp,
    value: Value,
}

impl Criterion {
    pub fn new(field: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> CompareOp {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Evaluate against a stored value. A missing field never matches.
    pub(crate) fn matches(&self, schema: &Schema, value: &Value) -> bool {
        schema
            .extract(&self.field, value)
            .is_some_and(|field_value| self.op.accepts(field_value.cmp(&self.value)))
    }

    fn with_value(&self, value: Value) -> Self {
        Self {
            field: self.field.clone(),
            op: self.op,
            value,
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.field, self.op, self.value)
    }
}

pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Criterion {
    Criterion::new(field, CompareOp::Eq, value)
}

pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Criterion {
    Criterion::new(field, CompareOp::Gt, value)
}

pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Criterion {
    Criterion::new(field, CompareOp::Ge, value)
}

pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Criterion {
    Criterion::new(field, CompareOp::Lt, value)
}

pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Criterion {
    Criterion::new(field, CompareOp::Le, value)
}

// ============================================================================
// QUERY TYPES
// ============================================================================

/// Predicate evaluated against every entry.
pub struct ScanQuery {
    predicate: Option<EntryPredicate>,
}

impl ScanQuery {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Some(Box::new(predicate)),
        }
    }

    /// Every entry.
    pub fn all() -> Self {
        Self { predicate: None }
    }
}

impl fmt::Debug for ScanQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanQuery")
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

/// Conjunction of indexed criteria plus an optional residual filter.
///
/// ```
/// use tessera_storage::query::{eq, gt, IndexQuery};
///
/// let query = IndexQuery::new()
///     .and(eq("orgId", 1))
///     .and(gt("salary", 1000.0))
///     .filter(|_key, value| value.as_record().is_some());
/// assert_eq!(query.criteria().len(), 2);
/// ```
#[derive(Default)]
pub struct IndexQuery {
    criteria: Vec<Criterion>,
    filter: Option<EntryPredicate>,
}

impl IndexQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn and(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Value, &Value) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(filter));
        self
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Resolve every criterion against `schema`.
    ///
    /// Each field must be declared and indexed by an index serving its
    /// operator. Returns the criteria with normalized comparison values.
    pub fn validate(&self, schema: &Schema) -> Result<Vec<Criterion>, SchemaError> {
        self.criteria
            .iter()
            .map(|c| {
                schema
                    .resolve_criterion(&c.field, c.op, c.value.clone())
                    .map(|value| c.with_value(value))
            })
            .collect()
    }
}

impl fmt::Debug for IndexQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexQuery")
            .field("criteria", &self.criteria)
            .field("filtered", &self.filter.is_some())
            .finish()
    }
}

/// Whole-word, case-insensitive search over text fields.
///
/// The search string is split on whitespace; an entry matches when any term
/// occurs as a word in any searched field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextQuery {
    text: String,
    field: Option<String>,
    raw: bool,
}

impl TextQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            field: None,
            raw: false,
        }
    }

    /// Search with a regular expression instead of plain terms.
    pub fn regex(pattern: impl Into<String>) -> Self {
        Self {
            text: pattern.into(),
            field: None,
            raw: true,
        }
    }

    /// Restrict the search to one text field.
    pub fn in_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn compile(&self) -> Result<Regex, QueryError> {
        let pattern = if self.raw {
            self.text.clone()
        } else {
            let terms: Vec<String> = self.text.split_whitespace().map(regex::escape).collect();
            if terms.is_empty() {
                return Err(QueryError::InvalidPattern {
                    reason: "empty search text".to_string(),
                });
            }
            format!(r"\b(?:{})\b", terms.join("|"))
        };
        RegexBuilder::new(&pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| QueryError::InvalidPattern {
                reason: e.to_string(),
            })
    }

    fn fields(&self, schema: &Schema) -> Result<Vec<String>, SchemaError> {
        match &self.field {
            Some(field) => {
                let def = schema.field_def(field).ok_or_else(|| SchemaError::UnknownField {
                    field: field.clone(),
                })?;
                if !def.is_text() {
                    return Err(SchemaError::NotTextField {
                        field: field.clone(),
                    });
                }
                Ok(vec![field.clone()])
            }
            None => {
                let fields: Vec<String> = schema.text_fields().map(|d| d.name().to_string()).collect();
                if fields.is_empty() {
                    return Err(SchemaError::NotTextField {
                        field: "*".to_string(),
                    });
                }
                Ok(fields)
            }
        }
    }
}

/// Any query producing whole entries.
#[derive(Debug)]
pub enum EntryQuery {
    Scan(ScanQuery),
    Index(IndexQuery),
    Text(TextQuery),
}

impl From<ScanQuery> for EntryQuery {
    fn from(query: ScanQuery) -> Self {
        EntryQuery::Scan(query)
    }
}

impl From<IndexQuery> for EntryQuery {
    fn from(query: IndexQuery) -> Self {
        EntryQuery::Index(query)
    }
}

impl From<TextQuery> for EntryQuery {
    fn from(query: TextQuery) -> Self {
        EntryQuery::Text(query)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Column {
    Key,
    Value,
    Field(String),
}

/// Projection of selected fields, optionally restricted by criteria.
///
/// `_key` and `_val` select the entry key and the whole value. Criteria on
/// indexed fields go through the index; the others are checked per row.
/// Rows come back ordered by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldsQuery {
    columns: Option<Vec<String>>,
    criteria: Vec<Criterion>,
}

impl FieldsQuery {
    pub fn select<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: Some(fields.into_iter().map(Into::into).collect()),
            criteria: Vec::new(),
        }
    }

    /// Every declared field in declaration order; `_key, _val` for caches
    /// without declared fields.
    pub fn all() -> Self {
        Self {
            columns: None,
            criteria: Vec::new(),
        }
    }

    pub fn and(mut self, criterion: Criterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    fn columns(&self, schema: &Schema) -> Result<Vec<Column>, SchemaError> {
        let Some(names) = &self.columns else {
            if schema.fields().is_empty() {
                return Ok(vec![Column::Key, Column::Value]);
            }
            return Ok(schema
                .fields()
                .iter()
                .map(|def| Column::Field(def.name().to_string()))
                .collect());
        };
        names
            .iter()
            .map(|name| match name.as_str() {
                KEY_FIELD => Ok(Column::Key),
                VALUE_FIELD => Ok(Column::Value),
                field if schema.field_def(field).is_some() => Ok(Column::Field(field.to_string())),
                field => Err(SchemaError::UnknownField {
                    field: field.to_string(),
                }),
            })
            .collect()
    }

    /// Normalize criteria; split into index-served and per-row ones.
    fn plan(&self, schema: &Schema) -> Result<(Vec<Criterion>, Vec<Criterion>), SchemaError> {
        let mut indexed = Vec::new();
        let mut residual = Vec::new();
        for c in &self.criteria {
            let def = schema.field_def(&c.field).ok_or_else(|| SchemaError::UnknownField {
                field: c.field.clone(),
            })?;
            let resolved = c.with_value(schema.coerce(&c.field, c.value.clone())?);
            match def.index() {
                Some(kind) if kind.supports(c.op) => indexed.push(resolved),
                _ => residual.push(resolved),
            }
        }
        Ok((indexed, residual))
    }
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Fetch each key's committed value lazily and let `produce` shape the item.
fn materialize<T, F>(inner: &Arc<CacheInner>, keys: Vec<Value>, produce: F) -> QueryCursor<T>
where
    F: Fn(&Schema, Value, Value) -> Option<T> + Send + 'static,
{
    let inner = Arc::clone(inner);
    QueryCursor::new(keys.into_iter().filter_map(move |key| {
        let value = inner.committed(&key)?;
        produce(inner.schema(), key, value)
    }))
}

pub(crate) fn run_entry_query(
    inner: &Arc<CacheInner>,
    query: EntryQuery,
) -> TesseraResult<QueryCursor<CacheEntry>> {
    match query {
        EntryQuery::Scan(scan) => {
            let keys = inner.key_snapshot();
            tracing::trace!(cache = %inner.name(), keys = keys.len(), "Scan query");
            Ok(materialize(inner, keys, move |_, key, value| {
                let keep = scan.predicate.as_ref().map_or(true, |p| p(&key, &value));
                keep.then_some(CacheEntry { key, value })
            }))
        }
        EntryQuery::Index(index) => {
            let criteria = index.validate(inner.schema())?;
            let keys: Vec<Value> = if criteria.is_empty() {
                inner.key_snapshot()
            } else {
                inner.candidates(&criteria)?.into_iter().collect()
            };
            tracing::trace!(
                cache = %inner.name(),
                criteria = criteria.len(),
                candidates = keys.len(),
                "Index query"
            );
            let filter = index.filter;
            Ok(materialize(inner, keys, move |schema, key, value| {
                let keep = criteria.iter().all(|c| c.matches(schema, &value))
                    && filter.as_ref().map_or(true, |f| f(&key, &value));
                keep.then_some(CacheEntry { key, value })
            }))
        }
        EntryQuery::Text(text) => {
            let fields = text.fields(inner.schema())?;
            let regex = text.compile()?;
            let keys = inner.key_snapshot();
            tracing::trace!(cache = %inner.name(), pattern = %regex, fields = ?fields, "Text query");
            Ok(materialize(inner, keys, move |schema, key, value| {
                let hit = fields.iter().any(|field| {
                    schema
                        .extract(field, &value)
                        .and_then(Value::as_str)
                        .is_some_and(|s| regex.is_match(s))
                });
                hit.then_some(CacheEntry { key, value })
            }))
        }
    }
}

pub(crate) fn run_fields_query(
    inner: &Arc<CacheInner>,
    query: FieldsQuery,
) -> TesseraResult<QueryCursor<Vec<Value>>> {
    let columns = query.columns(inner.schema())?;
    let (indexed, residual) = query.plan(inner.schema())?;

    let keys: Vec<Value> = if indexed.is_empty() {
        let mut keys = inner.key_snapshot();
        keys.sort();
        keys
    } else {
        inner.candidates(&indexed)?.into_iter().collect()
    };
    tracing::trace!(
        cache = %inner.name(),
        columns = columns.len(),
        indexed = indexed.len(),
        residual = residual.len(),
        candidates = keys.len(),
        "Fields query"
    );

    let criteria: Vec<Criterion> = indexed.into_iter().chain(residual).collect();
    Ok(materialize(inner, keys, move |schema, key, value| {
        if !criteria.iter().all(|c| c.matches(schema, &value)) {
            return None;
        }
        let row = columns
            .iter()
            .map(|column| match column {
                Column::Key => key.clone(),
                Column::Value => value.clone(),
                Column::Field(name) => schema.extract(name, &value).cloned().unwrap_or(Value::Null),
            })
            .collect();
        Some(row)
    }))
}
