//! Typed rows.
//!
//! Values are stored positionally and checked against the row schema on
//! every read and write. Fields are addressed by index or by name through
//! `FieldRef`.

use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use super::schema::{FieldDataType, RowSchema};
use crate::domain::RelayError;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Guid(Uuid),
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

impl FieldValue {
    pub fn data_type(&self) -> Option<FieldDataType> {
        match self {
            FieldValue::Null => None,
            FieldValue::Guid(_) => Some(FieldDataType::Guid),
            FieldValue::String(_) => Some(FieldDataType::String),
            FieldValue::Int(_) => Some(FieldDataType::Int),
            FieldValue::Double(_) => Some(FieldDataType::Double),
            FieldValue::Bool(_) => Some(FieldDataType::Bool),
            FieldValue::DateTime(_) => Some(FieldDataType::DateTime),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    fn type_name(&self) -> String {
        self.data_type()
            .map(|t| t.to_string())
            .unwrap_or_else(|| "null".to_string())
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Guid(v) => write!(f, "{v}"),
            FieldValue::String(v) => f.write_str(v),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Double(v) => write!(f, "{v}"),
            FieldValue::Bool(v) => write!(f, "{v}"),
            FieldValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

impl From<Uuid> for FieldValue {
    fn from(v: Uuid) -> Self {
        FieldValue::Guid(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Double(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::DateTime(v)
    }
}

/// A field position, given either directly or by name.
pub trait FieldRef {
    fn resolve(&self, schema: &RowSchema) -> Result<usize, RelayError>;
}

impl FieldRef for usize {
    fn resolve(&self, schema: &RowSchema) -> Result<usize, RelayError> {
        schema.field(*self).map(|_| *self)
    }
}

impl FieldRef for &str {
    fn resolve(&self, schema: &RowSchema) -> Result<usize, RelayError> {
        schema.index_of(self)
    }
}

/// Identity of a row: the rendered values of its key fields, in schema order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowKey(Vec<String>);

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataRow {
    schema: Arc<RowSchema>,
    values: Vec<FieldValue>,
}

impl DataRow {
    /// A row with every field null.
    pub fn new(schema: Arc<RowSchema>) -> Self {
        let values = vec![FieldValue::Null; schema.len()];
        Self { schema, values }
    }

    pub fn schema(&self) -> &Arc<RowSchema> {
        &self.schema
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Write a value. Its type must match the field's declared type.
    pub fn set(
        &mut self,
        field: impl FieldRef,
        value: impl Into<FieldValue>,
    ) -> Result<(), RelayError> {
        let index = field.resolve(&self.schema)?;
        let value = value.into();
        let definition = self.schema.field(index)?;
        if let Some(actual) = value.data_type()
            && actual != definition.data_type
        {
            return Err(RelayError::TypeMismatch {
                field: definition.name.clone(),
                expected: definition.data_type.to_string(),
                found: actual.to_string(),
            });
        }
        self.values[index] = value;
        Ok(())
    }

    /// Builder form of `set`.
    pub fn with(
        mut self,
        field: impl FieldRef,
        value: impl Into<FieldValue>,
    ) -> Result<Self, RelayError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn get(&self, field: impl FieldRef) -> Result<&FieldValue, RelayError> {
        let index = field.resolve(&self.schema)?;
        Ok(&self.values[index])
    }

    pub fn get_guid(&self, field: impl FieldRef) -> Result<Uuid, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::Guid(v) => Ok(*v),
            other => Err(self.mismatch(index, FieldDataType::Guid, other)),
        }
    }

    pub fn get_string(&self, field: impl FieldRef) -> Result<&str, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::String(v) => Ok(v.as_str()),
            other => Err(self.mismatch(index, FieldDataType::String, other)),
        }
    }

    pub fn get_int(&self, field: impl FieldRef) -> Result<i64, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::Int(v) => Ok(*v),
            other => Err(self.mismatch(index, FieldDataType::Int, other)),
        }
    }

    pub fn get_double(&self, field: impl FieldRef) -> Result<f64, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::Double(v) => Ok(*v),
            other => Err(self.mismatch(index, FieldDataType::Double, other)),
        }
    }

    pub fn get_bool(&self, field: impl FieldRef) -> Result<bool, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::Bool(v) => Ok(*v),
            other => Err(self.mismatch(index, FieldDataType::Bool, other)),
        }
    }

    pub fn get_datetime(&self, field: impl FieldRef) -> Result<DateTime<Utc>, RelayError> {
        let index = field.resolve(&self.schema)?;
        match &self.values[index] {
            FieldValue::DateTime(v) => Ok(*v),
            other => Err(self.mismatch(index, FieldDataType::DateTime, other)),
        }
    }

    /// The row identity. `ValidationError` if a key field is null.
    pub fn key(&self) -> Result<RowKey, RelayError> {
        self.schema
            .key_indices()
            .map(|index| {
                let value = &self.values[index];
                if value.is_null() {
                    let name = self
                        .schema
                        .field(index)
                        .map(|f| f.name.clone())
                        .unwrap_or_default();
                    Err(RelayError::validation(format!("key field '{name}' is null")))
                } else {
                    Ok(value.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(RowKey)
    }

    fn mismatch(&self, index: usize, requested: FieldDataType, found: &FieldValue) -> RelayError {
        let field = self
            .schema
            .field(index)
            .map(|f| f.name.clone())
            .unwrap_or_default();
        RelayError::TypeMismatch {
            field,
            expected: requested.to_string(),
            found: found.type_name(),
        }
    }
}
