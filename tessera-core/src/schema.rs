//! Value schemas.
//!
//! A schema is supplied when a cache is created. It names the fields of the
//! stored values, their kinds, and which of them carry an index or take part
//! in text search. Fields of nested records are declared with dotted paths.

use crate::error::SchemaError;
use crate::{CompareOp, FieldKind, IndexKind, Value};

/// Pseudo-field addressing the entry key in projections.
pub const KEY_FIELD: &str = "_key";

/// Pseudo-field addressing the whole value in projections.
pub const VALUE_FIELD: &str = "_val";

/// Declaration of one value field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    name: String,
    kind: FieldKind,
    index: Option<IndexKind>,
    text: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
            index: None,
            text: false,
        }
    }

    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index = Some(kind);
        self
    }

    /// Shorthand for a sorted index.
    pub fn sorted(self) -> Self {
        self.indexed(IndexKind::Sorted)
    }

    /// Shorthand for a hash index.
    pub fn hashed(self) -> Self {
        self.indexed(IndexKind::Hash)
    }

    /// Include this field in text queries.
    pub fn text(mut self) -> Self {
        self.text = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    pub fn index(&self) -> Option<IndexKind> {
        self.index
    }

    pub fn is_text(&self) -> bool {
        self.text
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Shape {
    /// No declared fields; values are unconstrained.
    Dynamic,
    /// The value itself is a single scalar field.
    Scalar,
    /// The value is a record with declared fields.
    Record { type_name: String },
}

/// Descriptor of the values held by a cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Schema {
    shape: Shape,
    fields: Vec<FieldDef>,
}

impl Schema {
    /// Schema without declared fields. Only scans can query it.
    pub fn dynamic() -> Self {
        Self {
            shape: Shape::Dynamic,
            fields: Vec::new(),
        }
    }

    /// Schema for scalar values; `field` names the value itself.
    ///
    /// ```
    /// use tessera_core::{FieldDef, FieldKind, Schema};
    ///
    /// let schema = Schema::scalar(FieldDef::new("value", FieldKind::String).hashed());
    /// assert!(schema.field_def("value").is_some());
    /// ```
    pub fn scalar(field: FieldDef) -> Self {
        Self {
            shape: Shape::Scalar,
            fields: vec![field],
        }
    }

    /// Schema for records of the given type; add fields with [`Schema::field`].
    pub fn record(type_name: impl Into<String>) -> Self {
        Self {
            shape: Shape::Record {
                type_name: type_name.into(),
            },
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, def: FieldDef) -> Self {
        self.fields.push(def);
        self
    }

    pub fn type_name(&self) -> Option<&str> {
        match &self.shape {
            Shape::Record { type_name } => Some(type_name),
            _ => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self.shape, Shape::Scalar)
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self.shape, Shape::Dynamic)
    }

    /// Declared fields in declaration order.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field_def(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn indexed_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.index.is_some())
    }

    pub fn text_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.text)
    }

    /// Check the declaration itself.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let invalid = |reason: String| Err(SchemaError::InvalidSchema { reason });

        match self.shape {
            Shape::Dynamic if !self.fields.is_empty() => {
                return invalid("dynamic schema cannot declare fields".to_string());
            }
            Shape::Scalar if self.fields.len() != 1 => {
                return invalid("scalar schema declares exactly one field".to_string());
            }
            Shape::Record { ref type_name } if type_name.is_empty() => {
                return invalid("record type name is empty".to_string());
            }
            _ => {}
        }

        for (i, def) in self.fields.iter().enumerate() {
            if def.name.is_empty() || def.name.split('.').any(str::is_empty) {
                return invalid(format!("malformed field name '{}'", def.name));
            }
            if def.name.starts_with('_') {
                return invalid(format!("field name '{}' is reserved", def.name));
            }
            if self.fields[..i].iter().any(|other| other.name == def.name) {
                return invalid(format!("duplicate field '{}'", def.name));
            }
            if def.index.is_some() && !def.kind.is_indexable() {
                return invalid(format!("field '{}' of kind {} cannot be indexed", def.name, def.kind));
            }
            if def.text && def.kind != FieldKind::String {
                return invalid(format!("text field '{}' must be a string", def.name));
            }
            if self.is_scalar() && def.kind == FieldKind::Record {
                return invalid("scalar schema cannot hold a record".to_string());
            }
        }
        Ok(())
    }

    /// Resolve a declared field against a stored value.
    ///
    /// Returns `None` when the value does not carry the field or carries
    /// `Null` there.
    pub fn extract<'a>(&self, field: &str, value: &'a Value) -> Option<&'a Value> {
        if field == VALUE_FIELD {
            return Some(value);
        }
        let resolved = match self.shape {
            Shape::Scalar => {
                if self.fields.first().map(|f| f.name.as_str()) == Some(field) {
                    Some(value)
                } else {
                    None
                }
            }
            Shape::Record { .. } | Shape::Dynamic => value.as_record()?.field_path(field),
        };
        resolved.filter(|v| !v.is_null())
    }

    /// Check that a value conforms to the declared field kinds.
    ///
    /// Fields the schema does not declare are allowed.
    pub fn check_value(&self, value: &Value) -> Result<(), SchemaError> {
        match self.shape {
            Shape::Dynamic => Ok(()),
            Shape::Scalar => {
                let def = self.fields.first().ok_or_else(|| SchemaError::InvalidSchema {
                    reason: "scalar schema declares exactly one field".to_string(),
                })?;
                check_kind(def, value)
            }
            Shape::Record { .. } => {
                if value.as_record().is_none() {
                    return Err(SchemaError::FieldTypeMismatch {
                        field: VALUE_FIELD.to_string(),
                        expected: FieldKind::Record,
                        actual: value.kind_name().to_string(),
                    });
                }
                for def in &self.fields {
                    if let Some(field_value) = self.extract(&def.name, value) {
                        check_kind(def, field_value)?;
                    }
                }
                Ok(())
            }
        }
    }

    /// Validate a criterion against the schema and normalize its value.
    ///
    /// The field must be declared and indexed with an index that serves the
    /// operator. Integers compared against float fields are widened.
    pub fn resolve_criterion(
        &self,
        field: &str,
        op: CompareOp,
        value: Value,
    ) -> Result<Value, SchemaError> {
        let def = self.field_def(field).ok_or_else(|| SchemaError::UnknownField {
            field: field.to_string(),
        })?;
        let index = def.index.ok_or_else(|| SchemaError::FieldNotIndexed {
            field: field.to_string(),
        })?;
        if !index.supports(op) {
            return Err(SchemaError::UnsupportedOperator {
                field: field.to_string(),
                op,
                index,
            });
        }
        self.coerce(field, value)
    }

    /// Check a comparison value against a declared field.
    ///
    /// Integers compared against float fields are widened; `Null` never
    /// compares.
    pub fn coerce(&self, field: &str, value: Value) -> Result<Value, SchemaError> {
        let def = self.field_def(field).ok_or_else(|| SchemaError::UnknownField {
            field: field.to_string(),
        })?;
        match (def.kind, value) {
            (FieldKind::Float, Value::Int(i)) => Ok(Value::Float(i as f64)),
            (kind, Value::Null) => Err(SchemaError::FieldTypeMismatch {
                field: field.to_string(),
                expected: kind,
                actual: "null".to_string(),
            }),
            (_, value) => {
                check_kind(def, &value)?;
                Ok(value)
            }
        }
    }
}

fn check_kind(def: &FieldDef, value: &Value) -> Result<(), SchemaError> {
    match value.field_kind() {
        None => Ok(()),
        Some(kind) if kind == def.kind => Ok(()),
        Some(_) => Err(SchemaError::FieldTypeMismatch {
            field: def.name.clone(),
            expected: def.kind,
            actual: value.kind_name().to_string(),
        }),
    }
}
