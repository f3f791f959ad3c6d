//! Worker contract and the pipeline's workers.
//!
//! A `DeferredWorker` is built per task from its `TaskSpec` by the
//! `WorkerFactory`, run once with a `RunContext`, then dropped. Table-store
//! handles opened during a run are owned by the run and released on every
//! exit path.

mod facet_storage;
mod factory;
mod merge;
mod model;
mod projection;
mod recommendation;

pub use facet_storage::FacetStorageWorker;
pub use factory::{WorkerConstructor, WorkerDeps, WorkerFactory};
pub use merge::MergeWorker;
pub use model::{AlbumRecommendationModel, ModelRegistry, ProjectionModel};
pub use projection::{ProjectionWorker, partial_table_name};
pub use recommendation::{RecommendationWorker, recommendation_table};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::bus::ProgressBus;
use crate::domain::{ProgressMessage, ProgressUpdate, RelayError, TaskId};

#[async_trait]
pub trait DeferredWorker: Send {
    async fn run(&mut self, ctx: &RunContext) -> Result<WorkerReport, RelayError>;
}

/// A row that could not be processed. The rest of the table still is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    pub key: String,
    pub error: RelayError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub rows_read: u64,
    pub rows_written: u64,
    pub row_errors: Vec<RowError>,
}

/// Publishes progress for one task with increasing sequence numbers.
pub struct ProgressReporter {
    task_id: TaskId,
    bus: Option<ProgressBus>,
    sequence: AtomicU64,
}

impl ProgressReporter {
    pub fn new(task_id: TaskId, bus: ProgressBus) -> Self {
        Self {
            task_id,
            bus: Some(bus),
            sequence: AtomicU64::new(0),
        }
    }

    /// A reporter that drops every update.
    pub fn disabled(task_id: TaskId) -> Self {
        Self {
            task_id,
            bus: None,
            sequence: AtomicU64::new(0),
        }
    }

    pub async fn report(&self, progress: u64, total: Option<u64>) {
        let Some(bus) = &self.bus else {
            return;
        };
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let update = ProgressUpdate {
            task_id: self.task_id,
            sequence,
            progress,
            total,
        };
        // progress is advisory; a closed bus only means nobody is listening
        if let Err(e) = bus.publish(ProgressMessage::Update(update)).await {
            debug!(task_id = %self.task_id, error = %e, "progress update not published");
        }
    }
}

/// Per-run context handed to `DeferredWorker::run`.
pub struct RunContext {
    pub task_id: TaskId,
    pub cancel: CancellationToken,
    progress: ProgressReporter,
}

impl RunContext {
    pub fn new(task_id: TaskId, cancel: CancellationToken, progress: ProgressReporter) -> Self {
        Self {
            task_id,
            cancel,
            progress,
        }
    }

    /// Context with no progress reporting, for direct runs.
    pub fn detached(task_id: TaskId, cancel: CancellationToken) -> Self {
        Self::new(task_id, cancel, ProgressReporter::disabled(task_id))
    }

    pub fn check_cancelled(&self) -> Result<(), RelayError> {
        if self.cancel.is_cancelled() {
            Err(RelayError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub async fn report(&self, progress: u64, total: Option<u64>) {
        self.progress.report(progress, total).await;
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reporter_sequences_increase() {
        let bus = ProgressBus::new("progress", 8);
        let mut sub = bus.subscribe().await;
        let reporter = ProgressReporter::new(TaskId::from_u128(1), bus);

        reporter.report(1, None).await;
        reporter.report(2, Some(10)).await;

        let mut sequences = Vec::new();
        for _ in 0..2 {
            if let Some(ProgressMessage::Update(update)) = sub.recv().await {
                sequences.push(update.sequence);
            }
        }
        assert_eq!(sequences, vec![1, 2]);
    }

    #[test]
    fn cancelled_context_reports_cancelled() {
        let cancel = CancellationToken::new();
        let ctx = RunContext::detached(TaskId::from_u128(1), cancel.clone());
        assert!(ctx.check_cancelled().is_ok());

        cancel.cancel();
        assert_eq!(ctx.check_cancelled(), Err(RelayError::Cancelled));
    }
}
