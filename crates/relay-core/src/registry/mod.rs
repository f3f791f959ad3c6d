//! Task registry: registration, prerequisite tracking, lifecycle, progress.

mod dependency;
mod memory;
mod record;

pub use dependency::DependencyGraph;
pub use memory::InMemoryTaskRegistry;
pub use record::TaskRecord;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::{ProgressSnapshot, ProgressUpdate, RelayError, TaskId, TaskSpec};
use crate::observability::RegistryCounts;

/// A leased task for processing.
/// The worker owns this lease and must either `complete` or `fail` it.
///
/// Design intent:
/// - The registry manages state transitions (Registered -> Running -> ...).
/// - The worker loop executes side effects and reports the result.
/// - `TaskSpec` is exposed as an immutable reference to avoid accidental mutation.
#[async_trait]
pub trait TaskLease: Send {
    fn task_id(&self) -> TaskId;

    fn spec(&self) -> &TaskSpec;

    /// Cancelled once the registry expires this task while it runs.
    fn expired(&self) -> CancellationToken;

    /// Mark success. `Expired` if the deadline passed while running; the
    /// task is then Expired and its dependents Failed.
    async fn complete(self: Box<Self>) -> Result<(), RelayError>;

    /// Mark failure. Every transitive dependent fails without running.
    async fn fail(self: Box<Self>, error: String) -> Result<(), RelayError>;
}

/// Registry port (interface).
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Register a task. Prerequisites must already be registered
    /// (`NotFound` otherwise). A prerequisite that already failed or expired
    /// fails the new task straight away.
    async fn register(&self, spec: TaskSpec) -> Result<TaskId, RelayError>;

    async fn progress(&self, id: TaskId) -> Result<ProgressSnapshot, RelayError>;

    /// Returns whether the update was applied.
    async fn apply_progress(&self, update: ProgressUpdate) -> Result<bool, RelayError>;

    /// Lease one eligible task (waits until available, or returns None once closed).
    async fn lease(&self) -> Option<Box<dyn TaskLease>>;

    /// Expire every task past its deadline. Returns the expired ids.
    async fn expire_overdue(&self) -> Vec<TaskId>;

    async fn counts_by_status(&self) -> RegistryCounts;

    /// Stop handing out leases and wake every waiting worker.
    async fn close(&self);
}
