//! WorkerLoop - タスク実行ループ
//!
//! # フロー
//! 1. `TaskRegistry::lease()` で実行可能なタスクを待つ
//! 2. `WorkerFactory::create()` で worker を生成
//! 3. `DeferredWorker::run()` を実行
//! 4. 成功なら `complete`、失敗（キャンセル含む）なら `fail`
//!
//! 実行中に registry がタスクを expire した場合は worker をキャンセルする。

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, error, info, info_span, warn};

use crate::bus::ProgressBus;
use crate::domain::{RelayError, TaskId, TaskSpec};
use crate::registry::TaskRegistry;
use crate::worker::{ProgressReporter, RunContext, WorkerFactory, WorkerReport};

/// Worker group handle.
/// - `shutdown_and_join()` は新しい lease を止めて、実行中のタスクの終了を待つ
/// - `cancel_and_join()` は実行中のタスクもキャンセルする
pub struct WorkerGroup {
    registry: Arc<dyn TaskRegistry>,
    cancel: CancellationToken,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(
        n: usize,
        registry: Arc<dyn TaskRegistry>,
        factory: Arc<WorkerFactory>,
        progress: ProgressBus,
        cancel: CancellationToken,
    ) -> Self {
        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let registry = Arc::clone(&registry);
            let factory = Arc::clone(&factory);
            let progress = progress.clone();
            let cancel = cancel.clone();
            joins.push(tokio::spawn(
                worker_loop(registry, factory, progress, cancel)
                    .instrument(info_span!("worker", worker_id)),
            ));
        }
        Self {
            registry,
            cancel,
            joins,
        }
    }

    /// Stop taking leases and wait for in-flight tasks to finish.
    /// This closes the registry.
    pub async fn shutdown_and_join(self) {
        self.registry.close().await;
        for join in self.joins {
            let _ = join.await;
        }
    }

    /// Cancel in-flight tasks, then shut down.
    pub async fn cancel_and_join(self) {
        self.cancel.cancel();
        self.shutdown_and_join().await;
    }
}

async fn worker_loop(
    registry: Arc<dyn TaskRegistry>,
    factory: Arc<WorkerFactory>,
    progress: ProgressBus,
    cancel: CancellationToken,
) {
    // lease() は registry が close されると None を返す
    while let Some(lease) = registry.lease().await {
        let task_id = lease.task_id();
        let spec = lease.spec().clone();
        let run = cancel.child_token();
        let ctx = RunContext::new(
            task_id,
            run.clone(),
            ProgressReporter::new(task_id, progress.clone()),
        );

        let expired = lease.expired();
        let task = run_task(&factory, task_id, &spec, &ctx);
        tokio::pin!(task);
        let outcome = tokio::select! {
            outcome = &mut task => outcome,
            _ = expired.cancelled() => {
                warn!(%task_id, "task expired while running, cancelling");
                run.cancel();
                task.await
            }
        };

        match outcome {
            Ok(report) => {
                info!(
                    %task_id,
                    rows_read = report.rows_read,
                    rows_written = report.rows_written,
                    row_errors = report.row_errors.len(),
                    "task completed"
                );
                if let Err(e) = lease.complete().await {
                    error!(%task_id, error = %e, "complete failed");
                }
            }
            Err(err) => {
                error!(%task_id, error = %err, "task failed");
                if let Err(e) = lease.fail(err.to_string()).await {
                    error!(%task_id, error = %e, "fail report failed");
                }
            }
        }
    }
}

async fn run_task(
    factory: &WorkerFactory,
    task_id: TaskId,
    spec: &TaskSpec,
    ctx: &RunContext,
) -> Result<WorkerReport, RelayError> {
    let mut worker = factory.create(spec)?;
    worker
        .run(ctx)
        .instrument(info_span!("run", %task_id, worker = %spec.worker))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeferredWorkerOptions, TaskStatus, WorkerKind, WorkerOptions};
    use crate::ports::{FixedClock, NoopEventSink, UlidGenerator};
    use crate::registry::InMemoryTaskRegistry;
    use crate::worker::DeferredWorker;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    /// Succeeds, fails, or waits for cancellation depending on its option.
    struct Scripted {
        mode: String,
    }

    #[async_trait]
    impl DeferredWorker for Scripted {
        async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError> {
            match self.mode.as_str() {
                "ok" => Ok(WorkerReport::default()),
                "hang" => {
                    ctx.cancel.cancelled().await;
                    Err(RelayError::Cancelled)
                }
                _ => Err(RelayError::Upstream("boom".into())),
            }
        }
    }

    fn setup() -> (Arc<InMemoryTaskRegistry>, Arc<WorkerFactory>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let registry = Arc::new(InMemoryTaskRegistry::new(
            clock.clone(),
            Arc::new(UlidGenerator::new(clock)),
            Arc::new(NoopEventSink),
        ));
        let mut factory = WorkerFactory::new();
        factory
            .register(WorkerKind::Merge, |spec| {
                let mode = spec.options.required("mode")?.to_string();
                Ok(Box::new(Scripted { mode }) as Box<dyn DeferredWorker>)
            })
            .unwrap();
        (registry, Arc::new(factory))
    }

    fn spec(mode: Option<&str>) -> TaskSpec {
        let mut options = WorkerOptions::new();
        if let Some(mode) = mode {
            options.insert("mode", mode);
        }
        TaskSpec::deferred(
            DeferredWorkerOptions::new(WorkerKind::Merge, options),
            [],
            Duration::from_secs(600),
        )
    }

    async fn wait_terminal(registry: &InMemoryTaskRegistry, id: TaskId) -> TaskStatus {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let snapshot = registry.progress(id).await.unwrap();
                if snapshot.is_terminal() {
                    return snapshot.status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn runs_tasks_to_their_outcome() {
        let (registry, factory) = setup();
        let ok = registry.register(spec(Some("ok"))).await.unwrap();
        let failing = registry.register(spec(Some("fail"))).await.unwrap();
        let unbuildable = registry.register(spec(None)).await.unwrap();

        let group = WorkerGroup::spawn(
            2,
            registry.clone(),
            factory,
            ProgressBus::new("progress", 16),
            CancellationToken::new(),
        );

        assert_eq!(wait_terminal(&registry, ok).await, TaskStatus::Completed);
        assert_eq!(wait_terminal(&registry, failing).await, TaskStatus::Failed);
        assert_eq!(wait_terminal(&registry, unbuildable).await, TaskStatus::Failed);
        let error = registry.progress(failing).await.unwrap().error.unwrap();
        assert!(error.contains("boom"));

        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn cancel_fails_in_flight_tasks() {
        let (registry, factory) = setup();
        let hanging = registry.register(spec(Some("hang"))).await.unwrap();

        let group = WorkerGroup::spawn(
            1,
            registry.clone(),
            factory,
            ProgressBus::new("progress", 16),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.progress(hanging).await.unwrap().status != TaskStatus::Running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        group.cancel_and_join().await;

        let snapshot = registry.progress(hanging).await.unwrap();
        assert_eq!(snapshot.status, TaskStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("operation cancelled"));
    }

    #[tokio::test]
    async fn expired_running_task_frees_its_worker() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
        ));
        let registry = Arc::new(InMemoryTaskRegistry::new(
            clock.clone(),
            Arc::new(UlidGenerator::new(clock.clone())),
            Arc::new(NoopEventSink),
        ));
        let (_, factory) = setup();
        let mut short = spec(Some("hang"));
        short.expires_after = Duration::from_secs(60);
        let hanging = registry.register(short).await.unwrap();

        let group = WorkerGroup::spawn(
            1,
            registry.clone(),
            factory,
            ProgressBus::new("progress", 16),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(2), async {
            while registry.progress(hanging).await.unwrap().status != TaskStatus::Running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        clock.advance(Duration::from_secs(61));
        assert_eq!(registry.expire_overdue().await, vec![hanging]);

        // the only worker must be free again
        let next = registry.register(spec(Some("ok"))).await.unwrap();
        assert_eq!(wait_terminal(&registry, next).await, TaskStatus::Completed);
        assert_eq!(
            registry.progress(hanging).await.unwrap().status,
            TaskStatus::Expired
        );

        group.shutdown_and_join().await;
    }

    #[tokio::test]
    async fn shutdown_with_idle_workers_returns() {
        let (registry, factory) = setup();
        let group = WorkerGroup::spawn(
            3,
            registry,
            factory,
            ProgressBus::new("progress", 16),
            CancellationToken::new(),
        );
        tokio::time::timeout(Duration::from_secs(1), group.shutdown_and_join())
            .await
            .unwrap();
    }
}
