//! InMemoryRecordStore - 開発用・テスト用の RecordStore
//!
//! # 設計
//! - `Vec<Record>` を挿入順で保持（query の batch 順序が安定する）
//! - `query` は呼び出し時点のスナップショットを batch に分割して返す
//! - `submit` は全 facet を検証してから書き込む（all-or-nothing）

use async_trait::async_trait;
use futures::StreamExt;
use futures::stream;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{ExpandOptions, FacetUpdate, Record, RecordModel, RecordQuery, RelayError};
use crate::ports::{RecordBatches, RecordStore};

#[derive(Clone)]
pub struct InMemoryRecordStore {
    model: Arc<RecordModel>,
    records: Arc<Mutex<Vec<Record>>>,
}

impl InMemoryRecordStore {
    pub fn new(model: RecordModel) -> Self {
        Self {
            model: Arc::new(model),
            records: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn model(&self) -> &RecordModel {
        &self.model
    }

    /// Insert or replace a record by id.
    pub async fn insert(&self, record: Record) {
        let mut records = self.records.lock().await;
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record,
            None => records.push(record),
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn get_by_id(&self, id: Uuid, expand: &ExpandOptions) -> Result<Record, RelayError> {
        self.records
            .lock()
            .await
            .iter()
            .find(|record| record.id == id)
            .map(|record| record.expanded(expand))
            .ok_or_else(|| RelayError::not_found("record", id.to_string()))
    }

    fn query(
        &self,
        query: &RecordQuery,
        expand: &ExpandOptions,
        batch_size: usize,
    ) -> RecordBatches {
        let records = Arc::clone(&self.records);
        let query = query.clone();
        let expand = expand.clone();
        let batch_size = batch_size.max(1);

        // スナップショットは最初の poll で取る
        stream::once(async move {
            let matched: Vec<Record> = records
                .lock()
                .await
                .iter()
                .filter(|record| query.matches(record))
                .map(|record| record.expanded(&expand))
                .collect();
            let batches: Vec<Result<Vec<Record>, RelayError>> = matched
                .chunks(batch_size)
                .map(|chunk| Ok(chunk.to_vec()))
                .collect();
            stream::iter(batches)
        })
        .flatten()
        .boxed()
    }

    async fn submit(&self, update: FacetUpdate) -> Result<(), RelayError> {
        let changes = update.into_changes();
        for change in &changes {
            self.model.check_facet(&change.name)?;
        }

        let mut records = self.records.lock().await;
        for change in &changes {
            if !records.iter().any(|record| record.id == change.record_id) {
                return Err(RelayError::not_found("record", change.record_id.to_string()));
            }
        }
        for change in changes {
            if let Some(record) = records.iter_mut().find(|r| r.id == change.record_id) {
                record.put_facet_value(change.name, change.value);
            }
        }
        Ok(())
    }
}
