//! Album recommendations for each contact's recent artists.

use async_trait::async_trait;
use futures::{StreamExt, stream};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{DeferredWorker, RowError, RunContext, WorkerReport};
use crate::domain::{AlbumDescriptor, RelayError, WorkerOptions, keys};
use crate::ports::Recommender;
use crate::table::{
    DataRow, FieldDataType, FieldDefinition, RowSchema, TableData, TableDefinition,
    TableStoreFactory,
};

pub const CONTACT_ID: &str = "ContactID";
pub const ALBUM_ID: &str = "AlbumID";
pub const ALBUM_NAME: &str = "AlbumName";
pub const ARTIST_ID: &str = "ArtistID";
pub const ARTIST_NAME: &str = "ArtistName";

const SOURCE_ARTISTS: &str = "Artists";

/// Definition of the recommendations table, keyed by contact and album.
pub fn recommendation_table(name: &str) -> Result<TableDefinition, RelayError> {
    let schema = RowSchema::new(vec![
        FieldDefinition::key(CONTACT_ID, FieldDataType::Guid),
        FieldDefinition::key(ALBUM_ID, FieldDataType::String),
        FieldDefinition::attribute(ALBUM_NAME, FieldDataType::String),
        FieldDefinition::attribute(ARTIST_ID, FieldDataType::String),
        FieldDefinition::attribute(ARTIST_NAME, FieldDataType::String),
    ])?;
    Ok(TableDefinition::new(name, Arc::new(schema)))
}

/// Reads `(ContactID, Artists)` rows and writes up to `limit` recommended
/// albums per contact.
///
/// Recommender calls run `concurrency` at a time. A failed row is recorded in
/// the report and skipped unless `fail_on_row_error` is set. The target table
/// is written once, after every source row was processed.
/// An album already written for the same contact is dropped, keeping the first.
pub struct RecommendationWorker {
    source_table: String,
    target_table: String,
    schema_name: String,
    limit: usize,
    concurrency: usize,
    fail_on_row_error: bool,
    time_to_live: Duration,
    tables: Arc<dyn TableStoreFactory>,
    recommender: Arc<dyn Recommender>,
}

impl RecommendationWorker {
    pub const DEFAULT_CONCURRENCY: usize = 4;

    pub fn from_options(
        options: &WorkerOptions,
        tables: Arc<dyn TableStoreFactory>,
        recommender: Arc<dyn Recommender>,
    ) -> Result<Self, RelayError> {
        let limit: usize = options.parse(keys::LIMIT)?;
        if limit == 0 {
            return Err(RelayError::validation("limit must be positive"));
        }
        Ok(Self {
            source_table: options.required(keys::SOURCE_TABLE_NAME)?.to_string(),
            target_table: options.required(keys::TARGET_TABLE_NAME)?.to_string(),
            schema_name: options.required(keys::SCHEMA_NAME)?.to_string(),
            limit,
            concurrency: options
                .parse_or(keys::CONCURRENCY, Self::DEFAULT_CONCURRENCY)?
                .max(1),
            fail_on_row_error: options.parse_or(keys::FAIL_ON_ROW_ERROR, false)?,
            time_to_live: options.duration_secs(keys::TIME_TO_LIVE_SECS)?,
            tables,
            recommender,
        })
    }

    /// Contact id and seed artists of one source row.
    fn seeds(row: &DataRow) -> Result<(Uuid, Vec<String>), RelayError> {
        let contact = row.get_guid(CONTACT_ID)?;
        let artists = row
            .get_string(SOURCE_ARTISTS)?
            .split(',')
            .map(str::trim)
            .filter(|artist| !artist.is_empty())
            .map(str::to_string)
            .collect();
        Ok((contact, artists))
    }

    fn album_row(
        target: &TableData,
        contact: Uuid,
        album: AlbumDescriptor,
    ) -> Result<DataRow, RelayError> {
        target
            .new_row()
            .with(CONTACT_ID, contact)?
            .with(ALBUM_ID, album.album_id)?
            .with(ALBUM_NAME, album.album_name)?
            .with(ARTIST_ID, album.artist_id)?
            .with(ARTIST_NAME, album.artist_name)
    }
}

#[async_trait]
impl DeferredWorker for RecommendationWorker {
    async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError> {
        let store = self.tables.create(&self.schema_name);
        let mut batches = store.get_rows(&self.source_table).await?;

        let mut target = TableData::new(recommendation_table(&self.target_table)?);
        let mut seen: HashSet<(Uuid, String)> = HashSet::new();
        let mut report = WorkerReport::default();

        while let Some(batch) = batches.next().await {
            ctx.check_cancelled()?;
            let batch = batch?;
            report.rows_read += batch.len() as u64;

            let limit = self.limit;
            let shared = Arc::clone(&self.recommender);
            let calls = stream::iter(batch.into_iter().map(move |row| {
                let recommender = Arc::clone(&shared);
                async move {
                    let key = row.key().map(|k| k.to_string()).unwrap_or_default();
                    let result = match Self::seeds(&row) {
                        Ok((_, artists)) if artists.is_empty() => Ok(None),
                        Ok((contact, artists)) => recommender
                            .recommend(&artists, limit)
                            .await
                            .map(|albums| Some((contact, albums))),
                        Err(e) => Err(e),
                    };
                    (key, result)
                }
            }))
            .buffered(self.concurrency)
            .collect::<Vec<_>>();

            let results = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(RelayError::Cancelled),
                results = calls => results,
            };

            for (key, result) in results {
                let (contact, albums) = match result {
                    Ok(Some(found)) => found,
                    Ok(None) => continue,
                    Err(error) if self.fail_on_row_error => return Err(error),
                    Err(error) => {
                        warn!(task_id = %ctx.task_id, row = %key, error = %error, "recommendation failed for row");
                        report.row_errors.push(RowError { key, error });
                        continue;
                    }
                };
                for album in albums.into_iter().take(self.limit) {
                    if !seen.insert((contact, album.album_id.clone())) {
                        continue;
                    }
                    let row = Self::album_row(&target, contact, album)?;
                    target.push(row);
                }
            }
            ctx.report(report.rows_read, None).await;
        }

        report.rows_written = target.len() as u64;
        debug!(
            task_id = %ctx.task_id,
            target = %self.target_table,
            rows = target.len(),
            row_errors = report.row_errors.len(),
            "writing recommendations"
        );
        store.put_table(target, self.time_to_live).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use crate::impls::CatalogRecommender;
    use crate::table::TableStore;
    use crate::worker::testing::{artists_definition, read_all, tables};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_util::sync::CancellationToken;

    const TTL: Duration = Duration::from_secs(60);

    fn options(limit: usize) -> WorkerOptions {
        WorkerOptions::new()
            .with(keys::SOURCE_TABLE_NAME, "contactArtistsFinal")
            .with(keys::TARGET_TABLE_NAME, "contactRecommendations")
            .with(keys::SCHEMA_NAME, "recommendation")
            .with(keys::LIMIT, limit)
            .with(keys::TIME_TO_LIVE_SECS, TTL.as_secs())
    }

    async fn put_source(store: &dyn TableStore, rows: &[(Uuid, &str)]) {
        let mut table = TableData::new(artists_definition("contactArtistsFinal"));
        for (id, artists) in rows {
            let row = table
                .new_row()
                .with("ContactID", *id)
                .unwrap()
                .with("Artists", *artists)
                .unwrap();
            table.push(row);
        }
        store.put_table(table, TTL).await.unwrap();
    }

    fn ctx() -> RunContext {
        RunContext::detached(TaskId::from_u128(1), CancellationToken::new())
    }

    /// Fails for one seed artist, otherwise returns `count` albums.
    struct Scripted {
        count: usize,
        failing_seed: &'static str,
        calls: AtomicUsize,
        seeds: Mutex<Vec<Vec<String>>>,
    }

    impl Scripted {
        fn new(count: usize, failing_seed: &'static str) -> Arc<Self> {
            Arc::new(Self {
                count,
                failing_seed,
                calls: AtomicUsize::new(0),
                seeds: Mutex::new(Vec::new()),
            })
        }
    }

    /// Never answers.
    struct Stalled;

    #[async_trait]
    impl Recommender for Stalled {
        async fn recommend(
            &self,
            _seeds: &[String],
            _limit: usize,
        ) -> Result<Vec<AlbumDescriptor>, RelayError> {
            std::future::pending().await
        }
    }

    #[async_trait]
    impl Recommender for Scripted {
        async fn recommend(
            &self,
            seeds: &[String],
            _limit: usize,
        ) -> Result<Vec<AlbumDescriptor>, RelayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seeds.lock().unwrap().push(seeds.to_vec());
            if seeds.iter().any(|s| s == self.failing_seed) {
                return Err(RelayError::Upstream("503".into()));
            }
            // ignores the limit; the worker caps rows itself
            Ok((0..self.count)
                .map(|i| AlbumDescriptor::new("ar", "Artist", format!("al{i}"), "Album"))
                .collect())
        }
    }

    #[tokio::test]
    async fn writes_catalog_recommendations_for_a_contact() {
        let tables = tables();
        let store = tables.create("recommendation");
        let contact = Uuid::new_v4();
        put_source(store.as_ref(), &[(contact, "muse")]).await;

        let mut worker = RecommendationWorker::from_options(
            &options(5),
            tables.clone(),
            Arc::new(CatalogRecommender::new()),
        )
        .unwrap();
        let report = worker.run(&ctx()).await.unwrap();
        assert!(report.row_errors.is_empty());

        let rows = read_all(store.as_ref(), "contactRecommendations").await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get_guid(CONTACT_ID).unwrap(), contact);
            assert_ne!(row.get_string(ARTIST_ID).unwrap(), "muse");
        }
    }

    #[tokio::test]
    async fn two_albums_for_two_seeds_give_two_rows() {
        let tables = tables();
        let store = tables.create("recommendation");
        let contact = Uuid::new_v4();
        put_source(store.as_ref(), &[(contact, "X,Y")]).await;

        let recommender = Scripted::new(2, "none");
        let mut worker =
            RecommendationWorker::from_options(&options(5), tables.clone(), recommender.clone())
                .unwrap();
        let report = worker.run(&ctx()).await.unwrap();

        assert_eq!(report.rows_written, 2);
        assert_eq!(
            *recommender.seeds.lock().unwrap(),
            vec![vec!["X".to_string(), "Y".to_string()]]
        );
        let rows = read_all(store.as_ref(), "contactRecommendations").await.unwrap();
        assert_eq!(rows.len(), 2);
        for row in &rows {
            assert_eq!(row.get_guid(CONTACT_ID).unwrap(), contact);
        }
    }

    #[tokio::test]
    async fn cancel_during_calls_writes_nothing() {
        let tables = tables();
        let store = tables.create("recommendation");
        put_source(store.as_ref(), &[(Uuid::new_v4(), "a1"), (Uuid::new_v4(), "a2")]).await;
        drop(store);

        let mut worker =
            RecommendationWorker::from_options(&options(5), tables.clone(), Arc::new(Stalled))
                .unwrap();
        let cancel = CancellationToken::new();
        let ctx = RunContext::detached(TaskId::from_u128(1), cancel.clone());
        let trigger = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(2), worker.run(&ctx))
            .await
            .unwrap();
        trigger.await.unwrap();

        assert!(matches!(result, Err(RelayError::Cancelled)));
        assert_eq!(tables.open_handles(), 0);
        let store = tables.create("recommendation");
        assert!(matches!(
            store.get_rows("contactRecommendations").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn caps_rows_per_contact_at_limit() {
        let tables = tables();
        let store = tables.create("recommendation");
        let contact = Uuid::new_v4();
        put_source(store.as_ref(), &[(contact, "a1,a2")]).await;

        let recommender = Scripted::new(9, "none");
        let mut worker =
            RecommendationWorker::from_options(&options(5), tables.clone(), recommender).unwrap();
        let report = worker.run(&ctx()).await.unwrap();

        assert_eq!(report.rows_written, 5);
        let rows = read_all(store.as_ref(), "contactRecommendations").await.unwrap();
        assert_eq!(rows.len(), 5);
    }

    /// Answers with the same album twice.
    struct Repeating;

    #[async_trait]
    impl Recommender for Repeating {
        async fn recommend(
            &self,
            _seeds: &[String],
            _limit: usize,
        ) -> Result<Vec<AlbumDescriptor>, RelayError> {
            Ok(["al0", "al0", "al1"]
                .into_iter()
                .map(|id| AlbumDescriptor::new("ar", "Artist", id, "Album"))
                .collect())
        }
    }

    #[tokio::test]
    async fn repeated_album_is_written_once() {
        let tables = tables();
        let store = tables.create("recommendation");
        put_source(store.as_ref(), &[(Uuid::new_v4(), "a1")]).await;

        let mut worker =
            RecommendationWorker::from_options(&options(5), tables.clone(), Arc::new(Repeating))
                .unwrap();
        let report = worker.run(&ctx()).await.unwrap();

        assert_eq!(report.rows_written, 2);
        let ids: Vec<String> = read_all(store.as_ref(), "contactRecommendations")
            .await
            .unwrap()
            .iter()
            .map(|row| row.get_string(ALBUM_ID).unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["al0", "al1"]);
    }

    #[tokio::test]
    async fn failing_row_is_isolated() {
        let tables = tables();
        let store = tables.create("recommendation");
        let (good, bad, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        put_source(
            store.as_ref(),
            &[(good, "a1"), (bad, "boom"), (other, "a2")],
        )
        .await;

        let recommender = Scripted::new(2, "boom");
        let mut worker =
            RecommendationWorker::from_options(&options(5), tables.clone(), recommender.clone())
                .unwrap();
        let report = worker.run(&ctx()).await.unwrap();

        assert_eq!(recommender.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.row_errors.len(), 1);
        assert_eq!(report.row_errors[0].key, bad.to_string());
        assert_eq!(report.rows_written, 4);
    }

    #[tokio::test]
    async fn fail_on_row_error_aborts_without_writing() {
        let tables = tables();
        let store = tables.create("recommendation");
        put_source(store.as_ref(), &[(Uuid::new_v4(), "boom")]).await;

        let recommender = Scripted::new(2, "boom");
        let options = options(5).with(keys::FAIL_ON_ROW_ERROR, true);
        let mut worker =
            RecommendationWorker::from_options(&options, tables.clone(), recommender).unwrap();

        assert_eq!(
            worker.run(&ctx()).await,
            Err(RelayError::Upstream("503".into()))
        );
        assert!(matches!(
            store.get_rows("contactRecommendations").await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let tables = tables();
        let mut worker = RecommendationWorker::from_options(
            &options(5),
            tables.clone(),
            Arc::new(CatalogRecommender::new()),
        )
        .unwrap();
        assert!(matches!(
            worker.run(&ctx()).await,
            Err(RelayError::NotFound { .. })
        ));
    }

    #[test]
    fn zero_limit_is_rejected() {
        let result = RecommendationWorker::from_options(
            &options(0),
            tables(),
            Arc::new(CatalogRecommender::new()),
        );
        assert!(matches!(result, Err(RelayError::Validation(_))));
    }
}
