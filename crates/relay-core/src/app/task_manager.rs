//! TaskManager - 呼び出し側の API
//!
//! 登録も進捗照会もバス経由。返信を待つのは ack まで（timeout 付き）。
//! 返信を取りこぼさないよう、publish する前に subscribe する。

use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::bus::{ProgressBus, RegistrationBus};
use crate::domain::{
    DataSourceOptions, DeferredWorkerOptions, ProgressMessage, ProgressSnapshot,
    ProjectionWorkerOptions, RegistrationMessage, RelayError, TaskId, TaskSpec,
};
use crate::ports::IdGenerator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskManagerOptions {
    pub registration_timeout: Duration,
    pub progress_timeout: Duration,
}

impl Default for TaskManagerOptions {
    fn default() -> Self {
        Self {
            registration_timeout: Duration::from_secs(60),
            progress_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct TaskManager {
    registration: RegistrationBus,
    progress: ProgressBus,
    ids: Arc<dyn IdGenerator>,
    options: TaskManagerOptions,
}

impl TaskManager {
    pub fn new(
        registration: RegistrationBus,
        progress: ProgressBus,
        ids: Arc<dyn IdGenerator>,
        options: TaskManagerOptions,
    ) -> Self {
        Self {
            registration,
            progress,
            ids,
            options,
        }
    }

    /// Register a task fed from the record store.
    pub async fn register_projection_task(
        &self,
        data_source: DataSourceOptions,
        worker: ProjectionWorkerOptions,
        prerequisites: impl IntoIterator<Item = TaskId>,
        expires_after: Duration,
    ) -> Result<TaskId, RelayError> {
        self.register(TaskSpec::projection(
            data_source,
            worker,
            prerequisites,
            expires_after,
        ))
        .await
    }

    /// Register a task that reads tables only.
    pub async fn register_deferred_task(
        &self,
        worker: DeferredWorkerOptions,
        prerequisites: impl IntoIterator<Item = TaskId>,
        expires_after: Duration,
    ) -> Result<TaskId, RelayError> {
        self.register(TaskSpec::deferred(worker, prerequisites, expires_after))
            .await
    }

    async fn register(&self, spec: TaskSpec) -> Result<TaskId, RelayError> {
        let prerequisites = spec.prerequisites.len();
        let request_id = self.ids.generate_request_id();
        let mut acks = self.registration.subscribe().await;
        self.registration
            .publish(RegistrationMessage::Request { request_id, spec })
            .await?;

        let wait = async {
            while let Some(message) = acks.recv().await {
                if let RegistrationMessage::Status {
                    request_id: acked,
                    result,
                } = message
                    && acked == request_id
                {
                    return result;
                }
            }
            Err(RelayError::Closed(self.registration.topic()))
        };
        let task_id = tokio::time::timeout(self.options.registration_timeout, wait)
            .await
            .map_err(|_| RelayError::Timeout(format!("registration ack for {request_id}")))??;

        debug!(%task_id, %request_id, prerequisites, "task registration acknowledged");
        Ok(task_id)
    }

    /// Current snapshot of `task_id`, or `NotFound`.
    pub async fn get_task_progress(&self, task_id: TaskId) -> Result<ProgressSnapshot, RelayError> {
        let request_id = self.ids.generate_request_id();
        let mut responses = self.progress.subscribe().await;
        self.progress
            .publish(ProgressMessage::Query {
                request_id,
                task_id,
            })
            .await?;

        let wait = async {
            while let Some(message) = responses.recv().await {
                if let ProgressMessage::Response {
                    request_id: answered,
                    result,
                } = message
                    && answered == request_id
                {
                    return result;
                }
            }
            Err(RelayError::Closed(self.progress.topic()))
        };
        tokio::time::timeout(self.options.progress_timeout, wait)
            .await
            .map_err(|_| RelayError::Timeout(format!("progress of {task_id}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::WorkerKind;
    use crate::ports::{SystemClock, UlidGenerator};

    fn manager(timeout: Duration) -> (TaskManager, RegistrationBus, ProgressBus) {
        let registration = RegistrationBus::new("registration", 16);
        let progress = ProgressBus::new("progress", 16);
        let manager = TaskManager::new(
            registration.clone(),
            progress.clone(),
            Arc::new(UlidGenerator::new(SystemClock)),
            TaskManagerOptions {
                registration_timeout: timeout,
                progress_timeout: timeout,
            },
        );
        (manager, registration, progress)
    }

    fn merge() -> DeferredWorkerOptions {
        DeferredWorkerOptions::merge("final", "part", Duration::from_secs(60), "s")
    }

    #[tokio::test]
    async fn unanswered_registration_times_out() {
        let (manager, _registration, _progress) = manager(Duration::from_millis(20));
        let result = manager
            .register_deferred_task(merge(), [], Duration::from_secs(60))
            .await;
        assert!(matches!(result, Err(RelayError::Timeout(_))));
    }

    #[tokio::test]
    async fn registration_waits_for_its_own_ack() {
        let (manager, registration, _progress) = manager(Duration::from_secs(1));
        let mut requests = registration.subscribe().await;

        // answers every request with a fixed id, after a foreign ack
        let bus = registration.clone();
        let responder = tokio::spawn(async move {
            while let Some(message) = requests.recv().await {
                if let RegistrationMessage::Request { request_id, spec } = message {
                    assert_eq!(spec.worker, WorkerKind::Merge);
                    bus.publish(RegistrationMessage::Status {
                        request_id: crate::domain::RequestId::from_u128(1),
                        result: Ok(TaskId::from_u128(100)),
                    })
                    .await
                    .unwrap();
                    bus.publish(RegistrationMessage::Status {
                        request_id,
                        result: Ok(TaskId::from_u128(7)),
                    })
                    .await
                    .unwrap();
                    break;
                }
            }
        });

        let id = manager
            .register_deferred_task(merge(), [], Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(id, TaskId::from_u128(7));
        responder.await.unwrap();
    }

    #[tokio::test]
    async fn closed_bus_fails_fast() {
        let (manager, _registration, progress) = manager(Duration::from_secs(1));
        progress.close().await;
        assert_eq!(
            manager.get_task_progress(TaskId::from_u128(1)).await,
            Err(RelayError::Closed("progress"))
        );
    }
}
