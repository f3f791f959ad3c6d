//! Data-source projection: record-store query → one partial table per batch.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::{DeferredWorker, ModelRegistry, ProjectionModel, RunContext, WorkerReport};
use crate::domain::{DataSourceOptions, RelayError, TaskSpec, keys};
use crate::ports::RecordStore;
use crate::table::{TableData, TableStoreFactory};

/// Name of the `index`-th partial table written for `table`.
pub fn partial_table_name(table: &str, index: usize) -> String {
    format!("{table}_{index:04}")
}

pub struct ProjectionWorker {
    data_source: DataSourceOptions,
    model: Arc<dyn ProjectionModel>,
    table_name: String,
    schema_name: String,
    time_to_live: Duration,
    records: Arc<dyn RecordStore>,
    tables: Arc<dyn TableStoreFactory>,
}

impl ProjectionWorker {
    pub fn from_spec(
        spec: &TaskSpec,
        records: Arc<dyn RecordStore>,
        tables: Arc<dyn TableStoreFactory>,
        models: &ModelRegistry,
    ) -> Result<Self, RelayError> {
        let data_source = spec
            .data_source
            .clone()
            .ok_or_else(|| RelayError::validation("projection task without a data source"))?;
        let options = &spec.options;
        Ok(Self {
            data_source,
            model: models.get(options.required(keys::MODEL)?)?,
            table_name: options.required(keys::TABLE_NAME)?.to_string(),
            schema_name: options.required(keys::SCHEMA_NAME)?.to_string(),
            time_to_live: options.duration_secs(keys::TIME_TO_LIVE_SECS)?,
            records,
            tables,
        })
    }
}

#[async_trait]
impl DeferredWorker for ProjectionWorker {
    async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError> {
        let store = self.tables.create(&self.schema_name);
        let mut batches = self.records.query(
            &self.data_source.query,
            &self.model.expand(),
            self.data_source.max_batch_size,
        );

        // partials left by an earlier run would be merged with this one
        let stale_prefix = format!("{}_", self.table_name);
        for stale in store.table_names(&stale_prefix).await? {
            store.remove(&stale).await?;
        }

        let mut report = WorkerReport::default();
        let mut index = 0;
        loop {
            let batch = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(RelayError::Cancelled),
                batch = batches.next() => batch,
            };
            let Some(batch) = batch else {
                break;
            };
            let batch = batch?;

            let name = partial_table_name(&self.table_name, index);
            let mut table = TableData::new(self.model.definition(&name));
            for record in &batch {
                if let Some(row) = self.model.project(record)? {
                    table.push(row);
                }
            }
            report.rows_read += batch.len() as u64;
            report.rows_written += table.len() as u64;
            debug!(task_id = %ctx.task_id, table = %name, rows = table.len(), "writing partial table");

            store.put_table(table, self.time_to_live).await?;
            index += 1;
            ctx.report(report.rows_read, None).await;
        }

        // downstream merges expect at least one partial
        if index == 0 {
            let name = partial_table_name(&self.table_name, 0);
            store
                .put_table(TableData::new(self.model.definition(&name)), self.time_to_live)
                .await?;
        }
        ctx.report(report.rows_read, Some(report.rows_read)).await;
        Ok(report)
    }
}
