//! Task record: spec + lifecycle metadata.

use chrono::{DateTime, Utc};

use crate::domain::{
    ProgressSnapshot, ProgressUpdate, RelayError, StatusChange, TaskId, TaskSpec, TaskStatus,
};

/// Metadata + spec for a registered task.
///
/// Design:
/// - This is the "single source of truth" for task state.
/// - Registry structures (ready queue, dependency graph) hold TaskId only.
/// - All state transitions happen here.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub spec: TaskSpec,
    pub status: TaskStatus,

    pub progress: Option<u64>,
    pub total: Option<u64>,

    /// Highest progress sequence applied so far.
    pub last_sequence: u64,

    pub last_error: Option<String>,

    pub registered_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, spec: TaskSpec, now: DateTime<Utc>) -> Result<Self, RelayError> {
        let expires_at = chrono::Duration::from_std(spec.expires_after)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| RelayError::validation("expires_after out of range"))?;
        Ok(Self {
            id,
            spec,
            status: TaskStatus::Registered,
            progress: None,
            total: None,
            last_sequence: 0,
            last_error: None,
            registered_at: now,
            expires_at,
            updated_at: now,
        })
    }

    /// Still tracked and past its deadline.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && now >= self.expires_at
    }

    pub fn start(&mut self, now: DateTime<Utc>) -> StatusChange {
        self.transition(TaskStatus::Running, None, now)
    }

    pub fn complete(&mut self, now: DateTime<Utc>) -> StatusChange {
        self.transition(TaskStatus::Completed, None, now)
    }

    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> StatusChange {
        self.transition(TaskStatus::Failed, Some(error), now)
    }

    pub fn expire(&mut self, now: DateTime<Utc>) -> StatusChange {
        let error = format!("not completed by {}", self.expires_at.to_rfc3339());
        self.transition(TaskStatus::Expired, Some(error), now)
    }

    /// Apply a worker update. Returns false for stale or duplicate sequences
    /// and for tasks that already finished.
    pub fn apply_progress(&mut self, update: &ProgressUpdate, now: DateTime<Utc>) -> bool {
        if update.sequence <= self.last_sequence || self.status.is_terminal() {
            return false;
        }
        self.last_sequence = update.sequence;
        self.progress = Some(self.progress.map_or(update.progress, |p| p.max(update.progress)));
        if update.total.is_some() {
            self.total = update.total;
        }
        self.updated_at = now;
        true
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            id: self.id,
            worker: self.spec.worker,
            status: self.status,
            progress: self.progress,
            total: self.total,
            registered_at: self.registered_at,
            expires_at: self.expires_at,
            error: self.last_error.clone(),
        }
    }

    fn transition(
        &mut self,
        status: TaskStatus,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> StatusChange {
        self.status = status;
        if error.is_some() {
            self.last_error = error.clone();
        }
        self.updated_at = now;
        StatusChange {
            task_id: self.id,
            status,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DeferredWorkerOptions, WorkerKind, WorkerOptions};
    use chrono::TimeZone;
    use std::time::Duration;

    fn record() -> TaskRecord {
        let spec = TaskSpec::deferred(
            DeferredWorkerOptions::new(WorkerKind::Merge, WorkerOptions::new()),
            [],
            Duration::from_secs(60),
        );
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TaskRecord::new(TaskId::from_u128(1), spec, now).unwrap()
    }

    fn update(sequence: u64, progress: u64) -> ProgressUpdate {
        ProgressUpdate {
            task_id: TaskId::from_u128(1),
            sequence,
            progress,
            total: Some(10),
        }
    }

    #[test]
    fn expiry_is_measured_from_registration() {
        let record = record();
        assert_eq!(
            record.expires_at - record.registered_at,
            chrono::Duration::seconds(60)
        );
        assert!(!record.is_overdue(record.registered_at + chrono::Duration::seconds(59)));
        assert!(record.is_overdue(record.expires_at));
    }

    #[test]
    fn stale_and_duplicate_updates_are_ignored() {
        let mut record = record();
        let now = record.registered_at;

        assert!(record.apply_progress(&update(1, 3), now));
        assert!(record.apply_progress(&update(3, 7), now));
        assert!(!record.apply_progress(&update(3, 7), now));
        assert!(!record.apply_progress(&update(2, 9), now));

        assert_eq!(record.progress, Some(7));
        assert_eq!(record.total, Some(10));
    }

    #[test]
    fn progress_never_moves_backwards() {
        let mut record = record();
        let now = record.registered_at;

        record.apply_progress(&update(1, 5), now);
        record.apply_progress(&update(2, 4), now);

        assert_eq!(record.progress, Some(5));
    }

    #[test]
    fn terminal_tasks_ignore_progress() {
        let mut record = record();
        let now = record.registered_at;
        record.complete(now);

        assert!(!record.apply_progress(&update(1, 5), now));
        assert_eq!(record.progress, None);
    }
}
