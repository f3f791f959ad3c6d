//! Merge partial tables into one target table.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DeferredWorker, RunContext, WorkerReport};
use crate::domain::{RelayError, WorkerOptions, keys};
use crate::table::{DataRow, RowKey, TableData, TableStoreFactory};

/// Reads every live table whose name starts with `prefix` (the target itself
/// excluded), in name order, and writes their union to `table_name`. When two
/// partials hold the same key the later table wins. Partials are removed only
/// after the target has been written.
pub struct MergeWorker {
    table_name: String,
    prefix: String,
    schema_name: String,
    time_to_live: Duration,
    tables: Arc<dyn TableStoreFactory>,
}

impl MergeWorker {
    pub fn from_options(
        options: &WorkerOptions,
        tables: Arc<dyn TableStoreFactory>,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            table_name: options.required(keys::TABLE_NAME)?.to_string(),
            prefix: options.required(keys::PREFIX)?.to_string(),
            schema_name: options.required(keys::SCHEMA_NAME)?.to_string(),
            time_to_live: options.duration_secs(keys::TIME_TO_LIVE_SECS)?,
            tables,
        })
    }
}

#[async_trait]
impl DeferredWorker for MergeWorker {
    async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError> {
        let store = self.tables.create(&self.schema_name);
        let partials: Vec<String> = store
            .table_names(&self.prefix)
            .await?
            .into_iter()
            .filter(|name| *name != self.table_name)
            .collect();
        let Some(first) = partials.first() else {
            return Err(RelayError::not_found(
                "table",
                format!("{}/{}*", self.schema_name, self.prefix),
            ));
        };

        let definition = store.get_definition(first).await?.renamed(&self.table_name);
        let mut rows: Vec<DataRow> = Vec::new();
        let mut positions: HashMap<RowKey, usize> = HashMap::new();
        let mut report = WorkerReport::default();

        for (done, name) in partials.iter().enumerate() {
            ctx.check_cancelled()?;
            let mut batches = store.get_rows(name).await?;
            while let Some(batch) = batches.next().await {
                for row in batch? {
                    if **row.schema() != *definition.schema {
                        return Err(RelayError::validation(format!(
                            "table '{name}' does not match the schema of '{first}'"
                        )));
                    }
                    report.rows_read += 1;
                    let key = row.key()?;
                    match positions.get(&key) {
                        Some(&at) => rows[at] = row,
                        None => {
                            positions.insert(key, rows.len());
                            rows.push(row);
                        }
                    }
                }
            }
            ctx.report(done as u64 + 1, Some(partials.len() as u64)).await;
        }

        report.rows_written = rows.len() as u64;
        debug!(
            task_id = %ctx.task_id,
            target = %self.table_name,
            partials = partials.len(),
            rows = rows.len(),
            "merged partial tables"
        );
        store
            .put_table(TableData::with_rows(definition, rows), self.time_to_live)
            .await?;

        for name in &partials {
            store.remove(name).await?;
        }
        Ok(report)
    }
}
