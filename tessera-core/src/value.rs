//! Dynamic values and binary objects.
//!
//! A cache stores every key and value as a [`Value`]. Structured values are
//! [`BinaryObject`]s: a type name plus a bag of named fields. Typed Rust
//! records convert to and from binary objects through `serde`, so the same
//! entry can be read either schema-agnostically or decoded back into its Rust type.
//!
//! # Ordering
//!
//! `Value` has a total order so it can key ordered indexes: values of
//! different kinds order by kind (`Null < Bool < Int < Float < String <
//! Record`), floats use IEEE total ordering.

use crate::error::EncodingError;
use crate::FieldKind;
use serde::{de::DeserializeOwned, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A dynamically typed value stored in a cache.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Record(BinaryObject),
}

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Record(_) => 5,
        }
    }

    /// Schema kind of this value, `None` for `Null`.
    pub fn field_kind(&self) -> Option<FieldKind> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(FieldKind::Bool),
            Value::Int(_) => Some(FieldKind::Int),
            Value::Float(_) => Some(FieldKind::Float),
            Value::String(_) => Some(FieldKind::String),
            Value::Record(_) => Some(FieldKind::Record),
        }
    }

    /// Human-readable kind name, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        self.field_kind().map(|k| k.as_str()).unwrap_or("null")
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view; integers widen to floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BinaryObject> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Convert any serializable value.
    ///
    /// Structs and maps become untyped records; use
    /// [`BinaryObject::from_typed`] to attach a type name.
    pub fn from_typed<T: Serialize + ?Sized>(value: &T) -> Result<Self, EncodingError> {
        let json = serde_json::to_value(value).map_err(|e| EncodingError::Serde {
            reason: e.to_string(),
        })?;
        Value::try_from(json)
    }

    /// Convert back into a typed value.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        let json = serde_json::Value::try_from(self)?;
        serde_json::from_value(json).map_err(|e| EncodingError::Serde {
            reason: e.to_string(),
        })
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Record(a), Value::Record(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            // total_cmp equality is bitwise equality
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Record(r) => r.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::String(s) => f.write_str(s),
            Value::Record(r) => write!(f, "{}", r),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<BinaryObject> for Value {
    fn from(v: BinaryObject) -> Self {
        Value::Record(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl TryFrom<serde_json::Value> for Value {
    type Error = EncodingError;

    fn try_from(json: serde_json::Value) -> Result<Self, Self::Error> {
        match json {
            serde_json::Value::Null => Ok(Value::Null),
            serde_json::Value::Bool(b) => Ok(Value::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if n.is_u64() {
                    Err(EncodingError::IntegerOverflow)
                } else {
                    n.as_f64().map(Value::Float).ok_or(EncodingError::NonFiniteFloat)
                }
            }
            serde_json::Value::String(s) => Ok(Value::String(s)),
            serde_json::Value::Array(_) => Err(EncodingError::UnsupportedType {
                kind: "array".to_string(),
            }),
            serde_json::Value::Object(map) => {
                let mut fields = BTreeMap::new();
                for (name, value) in map {
                    fields.insert(name, Value::try_from(value)?);
                }
                Ok(Value::Record(BinaryObject {
                    type_name: None,
                    fields,
                }))
            }
        }
    }
}

impl TryFrom<&Value> for serde_json::Value {
    type Error = EncodingError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        match value {
            Value::Null => Ok(serde_json::Value::Null),
            Value::Bool(b) => Ok(serde_json::Value::Bool(*b)),
            Value::Int(i) => Ok(serde_json::Value::from(*i)),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .ok_or(EncodingError::NonFiniteFloat),
            Value::String(s) => Ok(serde_json::Value::String(s.clone())),
            Value::Record(r) => {
                let mut map = serde_json::Map::with_capacity(r.fields.len());
                for (name, field) in &r.fields {
                    map.insert(name.clone(), serde_json::Value::try_from(field)?);
                }
                Ok(serde_json::Value::Object(map))
            }
        }
    }
}

// ============================================================================
// BINARY OBJECT
// ============================================================================

/// Schema-agnostic record: an optional type name and named fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BinaryObject {
    type_name: Option<String>,
    fields: BTreeMap<String, Value>,
}

impl BinaryObject {
    /// Create an empty object of the given type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            fields: BTreeMap::new(),
        }
    }

    /// Start building an object of the given type.
    ///
    /// ```
    /// use tessera_core::BinaryObject;
    ///
    /// let person = BinaryObject::builder("Person")
    ///     .field("id", 1)
    ///     .field("name", "Joe")
    ///     .build();
    /// assert_eq!(person.field("name").and_then(|v| v.as_str()), Some("Joe"));
    /// ```
    pub fn builder(type_name: impl Into<String>) -> BinaryObjectBuilder {
        BinaryObjectBuilder {
            object: Self::new(type_name),
        }
    }

    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Same fields under another type name.
    pub fn with_type_name(mut self, type_name: impl Into<String>) -> Self {
        self.type_name = Some(type_name.into());
        self
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Resolve a dotted path (`address.zip`) through nested records.
    pub fn field_path(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.fields.get(segments.next()?)?;
        for segment in segments {
            current = current.as_record()?.fields.get(segment)?;
        }
        Some(current)
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Builder seeded with this object's type and fields.
    pub fn to_builder(&self) -> BinaryObjectBuilder {
        BinaryObjectBuilder {
            object: self.clone(),
        }
    }

    /// Encode a typed record as a binary object.
    ///
    /// The record must serialize to a map (a struct or a map type).
    pub fn from_typed<T: Serialize + ?Sized>(
        type_name: impl Into<String>,
        record: &T,
    ) -> Result<Self, EncodingError> {
        match Value::from_typed(record)? {
            Value::Record(object) => Ok(object.with_type_name(type_name)),
            other => Err(EncodingError::UnsupportedType {
                kind: other.kind_name().to_string(),
            }),
        }
    }

    /// Decode into a typed record.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, EncodingError> {
        let json = serde_json::Value::try_from(&Value::Record(self.clone()))?;
        serde_json::from_value(json).map_err(|e| EncodingError::Serde {
            reason: e.to_string(),
        })
    }
}

impl fmt::Display for BinaryObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [", self.type_name.as_deref().unwrap_or("Object"))?;
        for (i, (name, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        f.write_str("]")
    }
}

/// Builder for [`BinaryObject`].
#[derive(Debug, Clone)]
pub struct BinaryObjectBuilder {
    object: BinaryObject,
}

impl BinaryObjectBuilder {
    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.object.set_field(name, value);
        self
    }

    pub fn remove_field(mut self, name: &str) -> Self {
        self.object.remove_field(name);
        self
    }

    pub fn build(self) -> BinaryObject {
        self.object
    }
}
