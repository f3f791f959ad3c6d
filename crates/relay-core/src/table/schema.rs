//! Table schemas: ordered field definitions.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::RelayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldKind {
    /// Part of the row identity. Key fields of a row are unique within a table.
    Key,
    Attribute,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldDataType {
    Guid,
    String,
    Int,
    Double,
    Bool,
    DateTime,
}

impl fmt::Display for FieldDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldDataType::Guid => "guid",
            FieldDataType::String => "string",
            FieldDataType::Int => "int",
            FieldDataType::Double => "double",
            FieldDataType::Bool => "bool",
            FieldDataType::DateTime => "datetime",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub kind: FieldKind,
    pub data_type: FieldDataType,
}

impl FieldDefinition {
    pub fn key(name: impl Into<String>, data_type: FieldDataType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Key,
            data_type,
        }
    }

    pub fn attribute(name: impl Into<String>, data_type: FieldDataType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Attribute,
            data_type,
        }
    }

    pub fn is_key(&self) -> bool {
        self.kind == FieldKind::Key
    }
}

/// Ordered fields of a row. Field names are unique and at least one field
/// is a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowSchema {
    fields: Vec<FieldDefinition>,
}

impl RowSchema {
    pub fn new(fields: Vec<FieldDefinition>) -> Result<Self, RelayError> {
        let mut seen = HashSet::new();
        for field in &fields {
            if !seen.insert(field.name.as_str()) {
                return Err(RelayError::validation(format!(
                    "duplicate field '{}' in row schema",
                    field.name
                )));
            }
        }
        if !fields.iter().any(FieldDefinition::is_key) {
            return Err(RelayError::validation("row schema needs at least one key field"));
        }
        Ok(Self { fields })
    }

    pub fn fields(&self) -> &[FieldDefinition] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn field(&self, index: usize) -> Result<&FieldDefinition, RelayError> {
        self.fields
            .get(index)
            .ok_or_else(|| RelayError::not_found("field", format!("#{index}")))
    }

    pub fn index_of(&self, name: &str) -> Result<usize, RelayError> {
        self.fields
            .iter()
            .position(|field| field.name == name)
            .ok_or_else(|| RelayError::not_found("field", name))
    }

    pub fn key_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, field)| field.is_key())
            .map(|(index, _)| index)
    }
}

/// A table's name and the schema of its rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub schema: Arc<RowSchema>,
}

impl TableDefinition {
    pub fn new(name: impl Into<String>, schema: Arc<RowSchema>) -> Self {
        Self {
            name: name.into(),
            schema,
        }
    }

    /// Same schema under another name. Used for partial and merged tables.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self::new(name, Arc::clone(&self.schema))
    }
}
