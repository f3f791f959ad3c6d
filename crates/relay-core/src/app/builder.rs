//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 流れ
//! 1. `AppBuilder::new(config)` に必要なら clock / record store / recommender /
//!    table store / worker factory を差し込む
//! 2. `build()` で起動時検証（Fail-fast 設計）
//!    - 期待される worker が全て登録済みかチェック
//! 3. `App::start()` でバス・registry service・worker・reaper・GC を起動
//!
//! 差し込まなかった部品は設定から組み立てる（Spotify の設定が無ければ
//! オフラインの catalog recommender を使う）。

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::gc_loop::GCLoop;
use super::orchestrator::{PipelineSettings, RecommendationPipeline};
use super::reaper_loop::ReaperLoop;
use super::registry_service::RegistryService;
use super::task_manager::{TaskManager, TaskManagerOptions};
use super::worker_loop::WorkerGroup;
use crate::bus::{DEFAULT_CAPACITY, LaneGroup, ProgressBus, RegistrationBus, spawn_lanes};
use crate::config::RelayConfig;
use crate::domain::{RecordModel, RelayError, WorkerKind};
use crate::impls::{CatalogRecommender, InMemoryRecordStore, SpotifyRecommender};
use crate::observability::RegistryCounts;
use crate::ports::{Clock, IdGenerator, Recommender, RecordStore, SystemClock, UlidGenerator};
use crate::registry::{InMemoryTaskRegistry, TaskRegistry};
use crate::table::{InMemoryTableStoreFactory, TableStoreFactory};
use crate::worker::{ModelRegistry, WorkerDeps, WorkerFactory};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing workers: {0:?}. These workers were expected but not registered.")]
    MissingWorkers(Vec<WorkerKind>),

    #[error(transparent)]
    Relay(#[from] RelayError),
}

pub struct AppBuilder {
    config: RelayConfig,
    clock: Option<Arc<dyn Clock>>,
    records: Option<Arc<dyn RecordStore>>,
    recommender: Option<Arc<dyn Recommender>>,
    tables: Option<Arc<dyn TableStoreFactory>>,
    workers: Option<WorkerFactory>,
    expected_workers: Vec<WorkerKind>,
}

impl AppBuilder {
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            clock: None,
            records: None,
            recommender: None,
            tables: None,
            workers: None,
            expected_workers: WorkerKind::ALL.to_vec(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn record_store(mut self, records: Arc<dyn RecordStore>) -> Self {
        self.records = Some(records);
        self
    }

    pub fn recommender(mut self, recommender: Arc<dyn Recommender>) -> Self {
        self.recommender = Some(recommender);
        self
    }

    pub fn table_store(mut self, tables: Arc<dyn TableStoreFactory>) -> Self {
        self.tables = Some(tables);
        self
    }

    /// Use `workers` instead of the pipeline workers.
    pub fn workers(mut self, workers: WorkerFactory) -> Self {
        self.workers = Some(workers);
        self
    }

    /// Workers that must be registered for `build` to succeed.
    /// Defaults to every `WorkerKind`.
    pub fn expect_workers(mut self, kinds: &[WorkerKind]) -> Self {
        self.expected_workers = kinds.to_vec();
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        self.config.validate()?;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let tables: Arc<dyn TableStoreFactory> = match self.tables {
            Some(tables) => tables,
            None => Arc::new(InMemoryTableStoreFactory::new(Arc::clone(&clock))),
        };
        let records: Arc<dyn RecordStore> = match self.records {
            Some(records) => records,
            None => Arc::new(InMemoryRecordStore::new(RecordModel::music())),
        };
        let recommender: Arc<dyn Recommender> = match (self.recommender, &self.config.spotify) {
            (Some(recommender), _) => recommender,
            (None, Some(spotify)) => Arc::new(SpotifyRecommender::new(
                spotify.clone(),
                Arc::clone(&clock),
            )),
            (None, None) => Arc::new(CatalogRecommender::new()),
        };

        let workers = match self.workers {
            Some(workers) => workers,
            None => WorkerFactory::with_pipeline_workers(WorkerDeps {
                tables: Arc::clone(&tables),
                records: Arc::clone(&records),
                recommender,
                models: Arc::new(ModelRegistry::music()?),
            })?,
        };

        let registered = workers.registered_kinds();
        let missing: Vec<WorkerKind> = self
            .expected_workers
            .iter()
            .filter(|kind| !registered.contains(kind))
            .copied()
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::MissingWorkers(missing));
        }

        Ok(App {
            config: self.config,
            clock,
            tables,
            records,
            workers: Arc::new(workers),
        })
    }
}

/// Wired but not yet running.
pub struct App {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    tables: Arc<dyn TableStoreFactory>,
    records: Arc<dyn RecordStore>,
    workers: Arc<WorkerFactory>,
}

impl App {
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Spawn the registry service, workers, reaper and table GC.
    pub async fn start(self) -> RunningApp {
        let config = self.config;
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&self.clock)));
        let registration = RegistrationBus::new("registration", DEFAULT_CAPACITY);
        let progress = ProgressBus::new("progress", DEFAULT_CAPACITY);
        let registry: Arc<dyn TaskRegistry> = Arc::new(InMemoryTaskRegistry::new(
            Arc::clone(&self.clock),
            Arc::clone(&ids),
            Arc::new(progress.clone()),
        ));
        let cancel = CancellationToken::new();

        let service = Arc::new(RegistryService::new(
            Arc::clone(&registry),
            registration.clone(),
            progress.clone(),
        ));
        let lanes = vec![
            spawn_lanes(
                "registration",
                registration.subscribe().await,
                Arc::clone(&service),
                config.handler_lanes,
                cancel.clone(),
            ),
            spawn_lanes(
                "progress",
                progress.subscribe().await,
                service,
                config.handler_lanes,
                cancel.clone(),
            ),
        ];

        let workers = WorkerGroup::spawn(
            config.worker_count,
            Arc::clone(&registry),
            self.workers,
            progress.clone(),
            cancel.child_token(),
        );
        let loops = vec![
            ReaperLoop::new(Arc::clone(&registry), config.reaper_interval()).spawn(cancel.clone()),
            GCLoop::new(Arc::clone(&self.tables), config.gc_interval()).spawn(cancel.clone()),
        ];

        let manager = TaskManager::new(
            registration.clone(),
            progress.clone(),
            ids,
            TaskManagerOptions {
                registration_timeout: config.registration_timeout(),
                progress_timeout: config.progress_timeout(),
            },
        );

        info!(
            workers = config.worker_count,
            lanes = config.handler_lanes,
            "relay started"
        );
        RunningApp {
            config,
            clock: self.clock,
            tables: self.tables,
            records: self.records,
            registry,
            manager,
            workers,
            background: Background {
                cancel,
                registration,
                progress,
                lanes,
                loops,
            },
        }
    }
}

/// Everything that stops on cancel rather than on registry close.
struct Background {
    cancel: CancellationToken,
    registration: RegistrationBus,
    progress: ProgressBus,
    lanes: Vec<LaneGroup>,
    loops: Vec<JoinHandle<()>>,
}

impl Background {
    async fn stop(self) {
        self.cancel.cancel();
        self.registration.close().await;
        self.progress.close().await;
        for lanes in self.lanes {
            lanes.join().await;
        }
        for join in self.loops {
            let _ = join.await;
        }
    }
}

pub struct RunningApp {
    config: RelayConfig,
    clock: Arc<dyn Clock>,
    tables: Arc<dyn TableStoreFactory>,
    records: Arc<dyn RecordStore>,
    registry: Arc<dyn TaskRegistry>,
    manager: TaskManager,
    workers: WorkerGroup,
    background: Background,
}

impl RunningApp {
    pub fn task_manager(&self) -> &TaskManager {
        &self.manager
    }

    /// A fresh pipeline using this app's settings.
    pub fn pipeline(&self) -> RecommendationPipeline {
        RecommendationPipeline::new(
            self.manager.clone(),
            Arc::clone(&self.clock),
            PipelineSettings::from_config(&self.config),
        )
    }

    pub fn tables(&self) -> &Arc<dyn TableStoreFactory> {
        &self.tables
    }

    pub fn records(&self) -> &Arc<dyn RecordStore> {
        &self.records
    }

    pub async fn counts(&self) -> RegistryCounts {
        self.registry.counts_by_status().await
    }

    /// Let in-flight tasks finish, then stop everything.
    pub async fn shutdown_and_join(self) {
        self.workers.shutdown_and_join().await;
        self.background.stop().await;
        info!("relay stopped");
    }

    /// Cancel in-flight tasks, then stop everything.
    pub async fn cancel_and_join(self) {
        self.workers.cancel_and_join().await;
        self.background.stop().await;
        info!("relay stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeferredWorkerOptions, TaskStatus};
    use crate::worker::DeferredWorker;
    use std::time::Duration;

    #[test]
    fn default_build_registers_every_worker() {
        assert!(AppBuilder::new(RelayConfig::default()).build().is_ok());
    }

    #[test]
    fn invalid_config_fails_fast() {
        let config = RelayConfig {
            handler_lanes: 0,
            ..RelayConfig::default()
        };
        assert!(matches!(
            AppBuilder::new(config).build(),
            Err(BuildError::Relay(RelayError::Config(_)))
        ));
    }

    #[test]
    fn missing_workers_are_reported() {
        let mut workers = WorkerFactory::new();
        workers
            .register(WorkerKind::Merge, |_| {
                Err::<Box<dyn DeferredWorker>, _>(RelayError::validation("unused"))
            })
            .unwrap();

        let result = AppBuilder::new(RelayConfig::default())
            .workers(workers)
            .expect_workers(&[WorkerKind::Merge, WorkerKind::AlbumRecommendation])
            .build();
        assert!(matches!(
            result,
            Err(BuildError::MissingWorkers(missing)) if missing == vec![WorkerKind::AlbumRecommendation]
        ));
    }

    #[tokio::test]
    async fn started_app_runs_tasks_and_shuts_down() {
        let app = AppBuilder::new(RelayConfig::default())
            .build()
            .unwrap()
            .start()
            .await;

        // merging with no partials fails the task
        let id = app
            .task_manager()
            .register_deferred_task(
                DeferredWorkerOptions::merge("final", "part", Duration::from_secs(60), "s"),
                [],
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let status = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = app.task_manager().get_task_progress(id).await.unwrap();
                if snapshot.is_terminal() {
                    return snapshot.status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(status, TaskStatus::Failed);
        assert_eq!(app.counts().await.failed, 1);

        tokio::time::timeout(Duration::from_secs(2), app.shutdown_and_join())
            .await
            .unwrap();
    }
}
