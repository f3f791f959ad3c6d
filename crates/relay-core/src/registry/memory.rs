//! In-memory task registry implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{DependencyGraph, TaskLease, TaskRecord, TaskRegistry};
use crate::domain::{
    ProgressSnapshot, ProgressUpdate, RelayError, StatusChange, TaskId, TaskSpec, TaskStatus,
};
use crate::observability::RegistryCounts;
use crate::ports::{Clock, EventSink, IdGenerator};

/// In-memory registry state.
#[derive(Default)]
struct RegistryState {
    /// All task records (single source of truth for tasks).
    records: HashMap<TaskId, TaskRecord>,

    /// Unresolved prerequisite edges.
    graph: DependencyGraph,

    /// Eligible tasks, in the order they became eligible (TaskIds only).
    ready: VecDeque<TaskId>,

    /// Expiry signal of each leased task.
    running: HashMap<TaskId, CancellationToken>,

    closed: bool,
}

impl RegistryState {
    /// Expire every overdue task and fail its dependents.
    fn sweep(&mut self, now: DateTime<Utc>) -> Vec<StatusChange> {
        let mut overdue: Vec<TaskId> = self
            .records
            .values()
            .filter(|record| record.is_overdue(now))
            .map(|record| record.id)
            .collect();
        overdue.sort();

        let mut changes = Vec::new();
        for id in overdue {
            if let Some(record) = self.records.get_mut(&id)
                && record.is_overdue(now)
            {
                changes.push(record.expire(now));
                if let Some(expired) = self.running.remove(&id) {
                    expired.cancel();
                }
                changes.extend(self.fail_dependents(id, now));
            }
        }
        changes
    }

    /// Fail every transitive dependent of `id` and drop their edges.
    fn fail_dependents(&mut self, id: TaskId, now: DateTime<Utc>) -> Vec<StatusChange> {
        let cause = self
            .records
            .get(&id)
            .map(|record| record.status)
            .unwrap_or(TaskStatus::Failed);
        let dependents = self.graph.transitive_dependents(id);

        let mut changes = Vec::new();
        for dependent in &dependents {
            if let Some(record) = self.records.get_mut(dependent)
                && !record.status.is_terminal()
            {
                changes.push(record.fail(format!("prerequisite {id} {cause}"), now));
            }
        }

        self.graph.remove_task(id);
        for dependent in dependents {
            self.graph.remove_task(dependent);
        }
        changes
    }

    /// `id` completed: release the edges waiting on it. Returns true if a
    /// task became eligible.
    fn resolve(&mut self, id: TaskId) -> bool {
        let mut any_ready = false;
        for waiting in self.graph.get_waiting_tasks(id) {
            self.graph.remove_dependency(waiting, id);
            let registered = self
                .records
                .get(&waiting)
                .is_some_and(|record| record.status == TaskStatus::Registered);
            if registered && !self.graph.has_dependencies(waiting) {
                self.ready.push_back(waiting);
                any_ready = true;
            }
        }
        any_ready
    }

    fn insert(
        &mut self,
        id: TaskId,
        spec: TaskSpec,
        now: DateTime<Utc>,
        changes: &mut Vec<StatusChange>,
    ) -> Result<bool, RelayError> {
        if self.closed {
            return Err(RelayError::Closed("task registry"));
        }

        let mut poisoned = None;
        let mut pending = Vec::new();
        for &prerequisite in &spec.prerequisites {
            let record = self
                .records
                .get(&prerequisite)
                .ok_or_else(|| RelayError::not_found("task", prerequisite.to_string()))?;
            match record.status {
                TaskStatus::Completed => {}
                status if status.poisons_dependents() => {
                    poisoned.get_or_insert((prerequisite, status));
                }
                _ => pending.push(prerequisite),
            }
        }

        let mut record = TaskRecord::new(id, spec, now)?;

        if let Some((prerequisite, status)) = poisoned {
            changes.push(record.fail(format!("prerequisite {prerequisite} {status}"), now));
            self.records.insert(id, record);
            return Ok(false);
        }

        for &prerequisite in &pending {
            self.graph.add_dependency(id, prerequisite);
        }
        if let Some(cycle) = self.graph.detect_cycle() {
            self.graph.remove_task(id);
            let path: Vec<String> = cycle.iter().map(ToString::to_string).collect();
            return Err(RelayError::validation(format!(
                "dependency cycle: {}",
                path.join(" -> ")
            )));
        }

        let ready = pending.is_empty();
        self.records.insert(id, record);
        if ready {
            self.ready.push_back(id);
        }
        Ok(ready)
    }

    fn counts_by_status(&self) -> RegistryCounts {
        let mut counts = RegistryCounts::default();
        for record in self.records.values() {
            counts.record(record.status);
        }
        counts
    }
}

struct Inner {
    state: Mutex<RegistryState>,
    notify: Notify,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl Inner {
    /// Report transitions. Called after the state lock is released.
    async fn emit_all(&self, changes: Vec<StatusChange>) {
        for change in changes {
            info!(
                task_id = %change.task_id,
                status = %change.status,
                error = change.error.as_deref().unwrap_or(""),
                "task status changed"
            );
            if let Err(e) = self.events.emit(change).await {
                warn!(error = %e, "status change was not delivered");
            }
        }
    }

    async fn finish(&self, id: TaskId, failure: Option<String>) -> Result<(), RelayError> {
        let now = self.clock.now();
        let mut woke = false;
        let (result, changes) = {
            let mut state = self.state.lock().await;
            let mut changes = state.sweep(now);
            state.running.remove(&id);
            let status = state.records.get(&id).map(|record| record.status);
            let result = match (status, failure) {
                (None, _) => Err(RelayError::not_found("task", id.to_string())),
                (Some(TaskStatus::Running), None) => {
                    if let Some(record) = state.records.get_mut(&id) {
                        changes.push(record.complete(now));
                    }
                    woke = state.resolve(id);
                    Ok(())
                }
                (Some(TaskStatus::Running), Some(error)) => {
                    if let Some(record) = state.records.get_mut(&id) {
                        changes.push(record.fail(error, now));
                    }
                    changes.extend(state.fail_dependents(id, now));
                    Ok(())
                }
                (Some(TaskStatus::Expired), _) => Err(RelayError::Expired(id)),
                (Some(status), _) => Err(RelayError::validation(format!(
                    "task {id} is {status}, not running"
                ))),
            };
            (result, changes)
        }; // Lock released here

        if woke {
            self.notify.notify_one();
        }
        self.emit_all(changes).await;
        result
    }
}

/// In-memory registry. Clones share state.
#[derive(Clone)]
pub struct InMemoryTaskRegistry {
    inner: Arc<Inner>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskRegistry {
    pub fn new(
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RegistryState::default()),
                notify: Notify::new(),
                clock,
                events,
            }),
            ids,
        }
    }
}

#[async_trait]
impl TaskRegistry for InMemoryTaskRegistry {
    async fn register(&self, spec: TaskSpec) -> Result<TaskId, RelayError> {
        spec.validate()?;
        let id = self.ids.generate_task_id();
        let worker = spec.worker;
        let now = self.inner.clock.now();

        let mut changes = Vec::new();
        let result = {
            let mut state = self.inner.state.lock().await;
            changes.extend(state.sweep(now));
            state.insert(id, spec, now, &mut changes)
        };

        if matches!(result, Ok(true)) {
            self.inner.notify.notify_one();
        }
        self.inner.emit_all(changes).await;

        let ready = result?;
        debug!(task_id = %id, %worker, ready, "task registered");
        Ok(id)
    }

    async fn progress(&self, id: TaskId) -> Result<ProgressSnapshot, RelayError> {
        let now = self.inner.clock.now();
        let (snapshot, changes) = {
            let mut state = self.inner.state.lock().await;
            let changes = state.sweep(now);
            let snapshot = state
                .records
                .get(&id)
                .map(TaskRecord::snapshot)
                .ok_or_else(|| RelayError::not_found("task", id.to_string()));
            (snapshot, changes)
        };
        self.inner.emit_all(changes).await;
        snapshot
    }

    async fn apply_progress(&self, update: ProgressUpdate) -> Result<bool, RelayError> {
        let now = self.inner.clock.now();
        let mut state = self.inner.state.lock().await;
        let record = state
            .records
            .get_mut(&update.task_id)
            .ok_or_else(|| RelayError::not_found("task", update.task_id.to_string()))?;
        let applied = record.apply_progress(&update, now);
        if !applied {
            debug!(task_id = %update.task_id, sequence = update.sequence, "stale progress ignored");
        }
        Ok(applied)
    }

    async fn lease(&self) -> Option<Box<dyn TaskLease>> {
        loop {
            // Register interest before inspecting state so a notify between
            // the check and the await is not lost.
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let now = self.inner.clock.now();
            let (leased, mut changes, more_ready) = {
                let mut state = self.inner.state.lock().await;
                if state.closed {
                    return None;
                }
                let changes = state.sweep(now);

                let mut leased = None;
                while let Some(id) = state.ready.pop_front() {
                    if let Some(record) = state.records.get_mut(&id)
                        && record.status == TaskStatus::Registered
                    {
                        let change = record.start(now);
                        let spec = record.spec.clone();
                        let expired = CancellationToken::new();
                        state.running.insert(id, expired.clone());
                        leased = Some((id, spec, expired, change));
                        break;
                    }
                }
                (leased, changes, !state.ready.is_empty())
            };

            if let Some((task_id, spec, expired, change)) = leased {
                if more_ready {
                    self.inner.notify.notify_one();
                }
                changes.push(change);
                self.inner.emit_all(changes).await;
                return Some(Box::new(InMemoryLease {
                    task_id,
                    spec,
                    expired,
                    inner: Arc::clone(&self.inner),
                }));
            }

            self.inner.emit_all(changes).await;
            notified.await;
        }
    }

    async fn expire_overdue(&self) -> Vec<TaskId> {
        let now = self.inner.clock.now();
        let changes = {
            let mut state = self.inner.state.lock().await;
            state.sweep(now)
        };
        let expired = changes
            .iter()
            .filter(|change| change.status == TaskStatus::Expired)
            .map(|change| change.task_id)
            .collect();
        self.inner.emit_all(changes).await;
        expired
    }

    async fn counts_by_status(&self) -> RegistryCounts {
        let state = self.inner.state.lock().await;
        state.counts_by_status()
    }

    async fn close(&self) {
        self.inner.state.lock().await.closed = true;
        self.inner.notify.notify_waiters();
    }
}

/// Lease implementation for InMemoryTaskRegistry.
struct InMemoryLease {
    task_id: TaskId,
    spec: TaskSpec,
    expired: CancellationToken,
    inner: Arc<Inner>,
}

#[async_trait]
impl TaskLease for InMemoryLease {
    fn task_id(&self) -> TaskId {
        self.task_id
    }

    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn expired(&self) -> CancellationToken {
        self.expired.clone()
    }

    async fn complete(self: Box<Self>) -> Result<(), RelayError> {
        self.inner.finish(self.task_id, None).await
    }

    async fn fail(self: Box<Self>, error: String) -> Result<(), RelayError> {
        self.inner.finish(self.task_id, Some(error)).await
    }
}
