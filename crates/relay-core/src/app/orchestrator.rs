//! RecommendationPipeline - 4 段のパイプラインを登録する
//!
//! projection → merge → album recommendation → facet storage
//!
//! 各段の出力テーブル名を次の段の入力オプションに渡し、前の段を
//! prerequisite にして登録する。登録後に手元に残るのは task id だけで、
//! 状態は `poll()` で取りに行く。

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::task_manager::TaskManager;
use crate::config::RelayConfig;
use crate::domain::{
    DataSourceOptions, DeferredWorkerOptions, ProgressSnapshot, ProjectionWorkerOptions,
    RecordQuery, RelayError, TaskId, WorkerKind, WorkerOptions, keys,
};
use crate::ports::Clock;
use crate::worker::AlbumRecommendationModel;

/// Table holding the projected partials (and their name prefix).
pub const CONTACT_ARTISTS_TABLE: &str = "contactArtists";
/// Merged projection.
pub const CONTACT_ARTISTS_FINAL_TABLE: &str = "contactArtistsFinal";
pub const CONTACT_RECOMMENDATIONS_TABLE: &str = "contactRecommendations";

/// Knobs of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub schema_name: String,
    pub task_timeout: Duration,
    pub storage_ttl: Duration,
    pub recommendation_limit: usize,
    pub recommender_concurrency: usize,
    pub interaction_window: chrono::TimeDelta,
    pub max_batch_size: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            schema_name: config.schema_name.clone(),
            task_timeout: config.task_timeout(),
            storage_ttl: config.storage_ttl(),
            recommendation_limit: config.recommendation_limit,
            recommender_concurrency: config.recommender_concurrency,
            interaction_window: config.interaction_window(),
            max_batch_size: config.max_batch_size,
        }
    }
}

pub struct RecommendationPipeline {
    manager: TaskManager,
    clock: Arc<dyn Clock>,
    settings: PipelineSettings,
    task_ids: Vec<TaskId>,
}

impl RecommendationPipeline {
    pub fn new(manager: TaskManager, clock: Arc<dyn Clock>, settings: PipelineSettings) -> Self {
        Self {
            manager,
            clock,
            settings,
            task_ids: Vec::new(),
        }
    }

    /// Ids of the registered stages, in pipeline order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.task_ids
    }

    /// Register the four stages. Calling it again returns the existing ids.
    pub async fn register(&mut self) -> Result<Vec<TaskId>, RelayError> {
        if !self.task_ids.is_empty() {
            return Ok(self.task_ids.clone());
        }
        let s = &self.settings;
        let since = self.clock.now() - s.interaction_window;

        let projection = self
            .manager
            .register_projection_task(
                DataSourceOptions::new(RecordQuery::music_purchases_since(since), s.max_batch_size),
                ProjectionWorkerOptions {
                    model: AlbumRecommendationModel::NAME.to_string(),
                    time_to_live: s.storage_ttl,
                    schema_name: s.schema_name.clone(),
                    model_options: WorkerOptions::new()
                        .with(keys::TABLE_NAME, CONTACT_ARTISTS_TABLE),
                },
                [],
                s.task_timeout,
            )
            .await?;

        let merge = self
            .manager
            .register_deferred_task(
                DeferredWorkerOptions::merge(
                    CONTACT_ARTISTS_FINAL_TABLE,
                    CONTACT_ARTISTS_TABLE,
                    s.storage_ttl,
                    s.schema_name.clone(),
                ),
                [projection],
                s.task_timeout,
            )
            .await?;

        let recommendation = self
            .manager
            .register_deferred_task(
                DeferredWorkerOptions::new(
                    WorkerKind::AlbumRecommendation,
                    WorkerOptions::new()
                        .with(keys::SOURCE_TABLE_NAME, CONTACT_ARTISTS_FINAL_TABLE)
                        .with(keys::TARGET_TABLE_NAME, CONTACT_RECOMMENDATIONS_TABLE)
                        .with(keys::SCHEMA_NAME, s.schema_name.clone())
                        .with(keys::LIMIT, s.recommendation_limit)
                        .with(keys::CONCURRENCY, s.recommender_concurrency)
                        .with(keys::TIME_TO_LIVE_SECS, s.storage_ttl.as_secs()),
                ),
                [merge],
                s.task_timeout,
            )
            .await?;

        let facet_storage = self
            .manager
            .register_deferred_task(
                DeferredWorkerOptions::new(
                    WorkerKind::RecommendationFacetStorage,
                    WorkerOptions::new()
                        .with(keys::TABLE_NAME, CONTACT_RECOMMENDATIONS_TABLE)
                        .with(keys::SCHEMA_NAME, s.schema_name.clone()),
                ),
                [recommendation],
                s.task_timeout,
            )
            .await?;

        self.task_ids = vec![projection, merge, recommendation, facet_storage];
        info!(
            %projection, %merge, %recommendation, %facet_storage,
            "recommendation pipeline registered"
        );
        Ok(self.task_ids.clone())
    }

    /// Snapshot of every registered stage, in pipeline order.
    pub async fn poll(&self) -> Result<Vec<ProgressSnapshot>, RelayError> {
        let mut snapshots = Vec::with_capacity(self.task_ids.len());
        for &id in &self.task_ids {
            snapshots.push(self.manager.get_task_progress(id).await?);
        }
        Ok(snapshots)
    }

    /// True once every stage is terminal. False before `register`.
    pub async fn is_finished(&self) -> Result<bool, RelayError> {
        if self.task_ids.is_empty() {
            return Ok(false);
        }
        Ok(self.poll().await?.iter().all(ProgressSnapshot::is_terminal))
    }
}
