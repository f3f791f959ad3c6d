//! Store recommendation rows as an album facet on each contact.

use async_trait::async_trait;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::recommendation::{ALBUM_ID, ALBUM_NAME, ARTIST_ID, ARTIST_NAME, CONTACT_ID};
use super::{DeferredWorker, RunContext, WorkerReport};
use crate::domain::{
    AlbumDescriptor, AlbumRecommendationFacet, ExpandOptions, FacetUpdate, Record, RelayError,
    WorkerOptions, keys,
};
use crate::ports::RecordStore;
use crate::table::{DataRow, TableStoreFactory};

/// For each recommendation row, appends the album to the contact's
/// `AlbumRecommendationFacet` unless it is already there. One facet update is
/// submitted per batch, and the source table is removed once every batch has
/// been stored.
pub struct FacetStorageWorker {
    table_name: String,
    schema_name: String,
    tables: Arc<dyn TableStoreFactory>,
    records: Arc<dyn RecordStore>,
}

impl FacetStorageWorker {
    pub fn from_options(
        options: &WorkerOptions,
        tables: Arc<dyn TableStoreFactory>,
        records: Arc<dyn RecordStore>,
    ) -> Result<Self, RelayError> {
        Ok(Self {
            table_name: options.required(keys::TABLE_NAME)?.to_string(),
            schema_name: options.required(keys::SCHEMA_NAME)?.to_string(),
            tables,
            records,
        })
    }

    fn album(row: &DataRow) -> Result<(Uuid, AlbumDescriptor), RelayError> {
        let album = AlbumDescriptor::new(
            row.get_string(ARTIST_ID)?,
            row.get_string(ARTIST_NAME)?,
            row.get_string(ALBUM_ID)?,
            row.get_string(ALBUM_NAME)?,
        );
        Ok((row.get_guid(CONTACT_ID)?, album))
    }
}

/// A loaded contact and its facet, pending write-back.
struct Pending {
    record: Record,
    facet: AlbumRecommendationFacet,
    changed: bool,
}

#[async_trait]
impl DeferredWorker for FacetStorageWorker {
    async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError> {
        let store = self.tables.create(&self.schema_name);
        let mut batches = store.get_rows(&self.table_name).await?;
        let expand = ExpandOptions::facet::<AlbumRecommendationFacet>();
        let mut report = WorkerReport::default();

        while let Some(batch) = batches.next().await {
            ctx.check_cancelled()?;
            let batch = batch?;
            report.rows_read += batch.len() as u64;

            // contacts in first-seen order so updates are submitted deterministically
            let mut order: Vec<Uuid> = Vec::new();
            let mut pending: HashMap<Uuid, Pending> = HashMap::new();
            for row in &batch {
                let (contact, album) = Self::album(row)?;
                if !pending.contains_key(&contact) {
                    let record = self.records.get_by_id(contact, &expand).await?;
                    let facet = record.facet::<AlbumRecommendationFacet>()?.unwrap_or_default();
                    order.push(contact);
                    pending.insert(
                        contact,
                        Pending {
                            record,
                            facet,
                            changed: false,
                        },
                    );
                }
                if let Some(entry) = pending.get_mut(&contact)
                    && entry.facet.add(album)
                {
                    entry.changed = true;
                    report.rows_written += 1;
                }
            }

            let mut update = FacetUpdate::new();
            for contact in &order {
                if let Some(entry) = pending.get(contact)
                    && entry.changed
                {
                    update.set_facet(&entry.record, &entry.facet)?;
                }
            }
            if !update.is_empty() {
                debug!(task_id = %ctx.task_id, contacts = update.len(), "submitting facet update");
                self.records.submit(update).await?;
            }
            ctx.report(report.rows_read, None).await;
        }

        store.remove(&self.table_name).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{RecordModel, RecordQuery, TaskId};
    use crate::impls::InMemoryRecordStore;
    use crate::ports::RecordBatches;
    use crate::table::{TableData, TableStore};
    use crate::worker::recommendation_table;
    use crate::worker::testing::tables;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    async fn put_recommendations(store: &dyn TableStore, rows: &[(Uuid, &str)]) {
        let mut table = TableData::new(recommendation_table("contactRecommendations").unwrap());
        for (contact, album_id) in rows {
            let row = table
                .new_row()
                .with(CONTACT_ID, *contact)
                .unwrap()
                .with(ALBUM_ID, *album_id)
                .unwrap()
                .with(ALBUM_NAME, "Album")
                .unwrap()
                .with(ARTIST_ID, "artist")
                .unwrap()
                .with(ARTIST_NAME, "Artist")
                .unwrap();
            table.push(row);
        }
        store.put_table(table, Duration::from_secs(60)).await.unwrap();
    }

    fn worker(
        tables: Arc<dyn TableStoreFactory>,
        records: Arc<dyn RecordStore>,
    ) -> FacetStorageWorker {
        let options = WorkerOptions::new()
            .with(keys::TABLE_NAME, "contactRecommendations")
            .with(keys::SCHEMA_NAME, "recommendation");
        FacetStorageWorker::from_options(&options, tables, records).unwrap()
    }

    fn ctx() -> RunContext {
        RunContext::detached(TaskId::from_u128(1), CancellationToken::new())
    }

    async fn facet_of(records: &InMemoryRecordStore, id: Uuid) -> AlbumRecommendationFacet {
        records
            .get_by_id(id, &ExpandOptions::facet::<AlbumRecommendationFacet>())
            .await
            .unwrap()
            .facet::<AlbumRecommendationFacet>()
            .unwrap()
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn appends_albums_without_duplicates() {
        let records = Arc::new(InMemoryRecordStore::new(RecordModel::music()));
        let contact = Uuid::new_v4();
        records.insert(Record::new(contact)).await;

        let tables = tables();
        let store = tables.create("recommendation");
        put_recommendations(store.as_ref(), &[(contact, "al1"), (contact, "al2")]).await;
        worker(tables.clone(), records.clone()).run(&ctx()).await.unwrap();

        // second run with one repeated album
        put_recommendations(store.as_ref(), &[(contact, "al2"), (contact, "al3")]).await;
        let report = worker(tables.clone(), records.clone())
            .run(&ctx())
            .await
            .unwrap();
        assert_eq!(report.rows_written, 1);

        let ids: Vec<String> = facet_of(&records, contact)
            .await
            .album_recommendations
            .into_iter()
            .map(|album| album.album_id)
            .collect();
        assert_eq!(ids, vec!["al1", "al2", "al3"]);
    }

    #[tokio::test]
    async fn removes_the_source_table() {
        let records = Arc::new(InMemoryRecordStore::new(RecordModel::music()));
        let contact = Uuid::new_v4();
        records.insert(Record::new(contact)).await;
        let tables = tables();
        let store = tables.create("recommendation");
        put_recommendations(store.as_ref(), &[(contact, "al1")]).await;

        worker(tables.clone(), records.clone()).run(&ctx()).await.unwrap();

        assert!(matches!(
            store.get_rows("contactRecommendations").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    /// Cancels the run as soon as the first update lands.
    struct CancelOnSubmit {
        inner: Arc<InMemoryRecordStore>,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl RecordStore for CancelOnSubmit {
        async fn get_by_id(&self, id: Uuid, expand: &ExpandOptions) -> Result<Record, RelayError> {
            self.inner.get_by_id(id, expand).await
        }

        fn query(
            &self,
            query: &RecordQuery,
            expand: &ExpandOptions,
            batch_size: usize,
        ) -> RecordBatches {
            self.inner.query(query, expand, batch_size)
        }

        async fn submit(&self, update: FacetUpdate) -> Result<(), RelayError> {
            self.inner.submit(update).await?;
            self.cancel.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn cancel_between_batches_keeps_the_source_table() {
        let records = Arc::new(InMemoryRecordStore::new(RecordModel::music()));
        let contacts = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
        for id in contacts {
            records.insert(Record::new(id)).await;
        }
        let tables = tables();
        let store = tables.create("recommendation");
        // batch size 2: two batches
        put_recommendations(
            store.as_ref(),
            &[(contacts[0], "al1"), (contacts[1], "al1"), (contacts[2], "al1")],
        )
        .await;

        let cancel = CancellationToken::new();
        let wrapped = Arc::new(CancelOnSubmit {
            inner: records.clone(),
            cancel: cancel.clone(),
        });
        let ctx = RunContext::detached(TaskId::from_u128(1), cancel);
        let result = worker(tables.clone(), wrapped).run(&ctx).await;
        assert!(matches!(result, Err(RelayError::Cancelled)));

        // the first batch stays written, the rest is untouched
        let mut stored = 0;
        for id in contacts {
            if !facet_of(&records, id).await.album_recommendations.is_empty() {
                stored += 1;
            }
        }
        assert_eq!(stored, 2);
        assert!(store.get_rows("contactRecommendations").await.is_ok());
    }

    #[tokio::test]
    async fn unknown_contact_is_not_found() {
        let records = Arc::new(InMemoryRecordStore::new(RecordModel::music()));
        let tables = tables();
        let store = tables.create("recommendation");
        put_recommendations(store.as_ref(), &[(Uuid::new_v4(), "al1")]).await;

        let result = worker(tables.clone(), records).run(&ctx()).await;
        assert!(matches!(result, Err(RelayError::NotFound { .. })));
    }
}
