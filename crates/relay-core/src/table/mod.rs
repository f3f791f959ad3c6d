//! Tabular store: namespaced, time-boxed key/value tables that carry
//! intermediate results from one pipeline stage to the next.
//!
//! - A `TableStoreFactory` opens one `TableStore` handle per schema name.
//!   Table names are unique only within that schema.
//! - `put_table` replaces the whole table atomically and resets its TTL.
//! - An expired table reads as absent and is eventually reclaimed by
//!   `TableStoreFactory::purge_expired`.

mod memory;
mod row;
mod schema;

pub use memory::InMemoryTableStoreFactory;
pub use row::{DataRow, FieldRef, FieldValue, RowKey};
pub use schema::{FieldDataType, FieldDefinition, FieldKind, RowSchema, TableDefinition};

use async_trait::async_trait;
use futures::stream::BoxStream;
use std::time::Duration;

use crate::domain::RelayError;

/// Lazily produced batches of table rows.
pub type RowBatches = BoxStream<'static, Result<Vec<DataRow>, RelayError>>;

/// A complete table, ready to be written.
#[derive(Debug, Clone)]
pub struct TableData {
    pub definition: TableDefinition,
    pub rows: Vec<DataRow>,
}

impl TableData {
    pub fn new(definition: TableDefinition) -> Self {
        Self {
            definition,
            rows: Vec::new(),
        }
    }

    pub fn with_rows(definition: TableDefinition, rows: Vec<DataRow>) -> Self {
        Self { definition, rows }
    }

    /// A fresh row using this table's schema.
    pub fn new_row(&self) -> DataRow {
        DataRow::new(std::sync::Arc::clone(&self.definition.schema))
    }

    pub fn push(&mut self, row: DataRow) {
        self.rows.push(row);
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Handle to the tables of one schema. Dropping the handle releases it.
#[async_trait]
pub trait TableStore: Send + Sync {
    fn schema_name(&self) -> &str;

    /// Rows of `table`; `NotFound` if it is missing or expired.
    async fn get_rows(&self, table: &str) -> Result<RowBatches, RelayError>;

    /// Definition of a live table.
    async fn get_definition(&self, table: &str) -> Result<TableDefinition, RelayError>;

    /// Replace the whole table. Rows must match the definition's schema and
    /// have unique keys, otherwise nothing is written.
    async fn put_table(&self, data: TableData, time_to_live: Duration) -> Result<(), RelayError>;

    /// Remove `table`. Removing an absent table succeeds.
    async fn remove(&self, table: &str) -> Result<(), RelayError>;

    /// Names of live tables starting with `prefix`, sorted.
    async fn table_names(&self, prefix: &str) -> Result<Vec<String>, RelayError>;
}

#[async_trait]
pub trait TableStoreFactory: Send + Sync {
    fn create(&self, schema_name: &str) -> Box<dyn TableStore>;

    /// Drop every expired table across all schemas. Returns how many went.
    async fn purge_expired(&self) -> usize;
}
