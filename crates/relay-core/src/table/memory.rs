//! In-memory table store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

use super::{DataRow, RowBatches, TableData, TableDefinition, TableStore, TableStoreFactory};
use crate::domain::RelayError;
use crate::ports::Clock;

const DEFAULT_BATCH_SIZE: usize = 256;

struct StoredTable {
    definition: TableDefinition,
    rows: Arc<Vec<DataRow>>,
    expires_at: DateTime<Utc>,
}

impl StoredTable {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// schema name -> table name -> table
type Tables = HashMap<String, HashMap<String, StoredTable>>;

struct Shared {
    tables: Mutex<Tables>,
    clock: Arc<dyn Clock>,
    batch_size: usize,
    open_handles: AtomicUsize,
}

/// Creates handles that all see the same in-process tables.
#[derive(Clone)]
pub struct InMemoryTableStoreFactory {
    shared: Arc<Shared>,
}

impl InMemoryTableStoreFactory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_batch_size(clock, DEFAULT_BATCH_SIZE)
    }

    pub fn with_batch_size(clock: Arc<dyn Clock>, batch_size: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(HashMap::new()),
                clock,
                batch_size: batch_size.max(1),
                open_handles: AtomicUsize::new(0),
            }),
        }
    }

    /// Handles created and not yet dropped.
    pub fn open_handles(&self) -> usize {
        self.shared.open_handles.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TableStoreFactory for InMemoryTableStoreFactory {
    fn create(&self, schema_name: &str) -> Box<dyn TableStore> {
        self.shared.open_handles.fetch_add(1, Ordering::SeqCst);
        Box::new(InMemoryTableStore {
            schema_name: schema_name.to_string(),
            shared: Arc::clone(&self.shared),
        })
    }

    async fn purge_expired(&self) -> usize {
        let now = self.shared.clock.now();
        let mut tables = self.shared.tables.lock().await;
        let mut purged = 0;
        for schema in tables.values_mut() {
            let before = schema.len();
            schema.retain(|_, table| table.is_live(now));
            purged += before - schema.len();
        }
        tables.retain(|_, schema| !schema.is_empty());
        purged
    }
}

struct InMemoryTableStore {
    schema_name: String,
    shared: Arc<Shared>,
}

impl Drop for InMemoryTableStore {
    fn drop(&mut self) {
        self.shared.open_handles.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryTableStore {
    fn missing(&self, table: &str) -> RelayError {
        RelayError::not_found("table", format!("{}/{}", self.schema_name, table))
    }

    fn validate(data: &TableData) -> Result<(), RelayError> {
        let mut keys = HashSet::with_capacity(data.rows.len());
        for row in &data.rows {
            if **row.schema() != *data.definition.schema {
                return Err(RelayError::validation(format!(
                    "row schema does not match table '{}'",
                    data.definition.name
                )));
            }
            let key = row.key()?;
            if !keys.insert(key.clone()) {
                return Err(RelayError::validation(format!(
                    "duplicate key '{key}' in table '{}'",
                    data.definition.name
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TableStore for InMemoryTableStore {
    fn schema_name(&self) -> &str {
        &self.schema_name
    }

    async fn get_rows(&self, table: &str) -> Result<RowBatches, RelayError> {
        let now = self.shared.clock.now();
        let rows = {
            let tables = self.shared.tables.lock().await;
            tables
                .get(&self.schema_name)
                .and_then(|schema| schema.get(table))
                .filter(|stored| stored.is_live(now))
                .map(|stored| Arc::clone(&stored.rows))
                .ok_or_else(|| self.missing(table))?
        };

        let batch_size = self.shared.batch_size;
        let batches = rows.len().div_ceil(batch_size);
        Ok(stream::iter(0..batches)
            .map(move |i| {
                let start = i * batch_size;
                let end = (start + batch_size).min(rows.len());
                Ok(rows[start..end].to_vec())
            })
            .boxed())
    }

    async fn get_definition(&self, table: &str) -> Result<TableDefinition, RelayError> {
        let now = self.shared.clock.now();
        let tables = self.shared.tables.lock().await;
        tables
            .get(&self.schema_name)
            .and_then(|schema| schema.get(table))
            .filter(|stored| stored.is_live(now))
            .map(|stored| stored.definition.clone())
            .ok_or_else(|| self.missing(table))
    }

    async fn put_table(&self, data: TableData, time_to_live: Duration) -> Result<(), RelayError> {
        if time_to_live.is_zero() {
            return Err(RelayError::validation("time_to_live must be positive"));
        }
        Self::validate(&data)?;

        let ttl = chrono::Duration::from_std(time_to_live)
            .map_err(|e| RelayError::validation(format!("time_to_live: {e}")))?;
        let expires_at = self
            .shared
            .clock
            .now()
            .checked_add_signed(ttl)
            .ok_or_else(|| RelayError::validation("time_to_live out of range"))?;

        let name = data.definition.name.clone();
        let row_count = data.rows.len();
        let stored = StoredTable {
            definition: data.definition,
            rows: Arc::new(data.rows),
            expires_at,
        };

        let mut tables = self.shared.tables.lock().await;
        tables
            .entry(self.schema_name.clone())
            .or_default()
            .insert(name.clone(), stored);
        debug!(schema = %self.schema_name, table = %name, rows = row_count, "table written");
        Ok(())
    }

    async fn remove(&self, table: &str) -> Result<(), RelayError> {
        let mut tables = self.shared.tables.lock().await;
        if let Some(schema) = tables.get_mut(&self.schema_name)
            && schema.remove(table).is_some()
        {
            debug!(schema = %self.schema_name, table, "table removed");
        }
        Ok(())
    }

    async fn table_names(&self, prefix: &str) -> Result<Vec<String>, RelayError> {
        let now = self.shared.clock.now();
        let tables = self.shared.tables.lock().await;
        let mut names: Vec<String> = tables
            .get(&self.schema_name)
            .map(|schema| {
                schema
                    .iter()
                    .filter(|(name, stored)| name.starts_with(prefix) && stored.is_live(now))
                    .map(|(name, _)| name.clone())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        Ok(names)
    }
}
