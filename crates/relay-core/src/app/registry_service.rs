//! RegistryService - バス上の registry 窓口
//!
//! - `RegistrationMessage::Request` → register → `Status` を返信
//! - `ProgressMessage::Update` → `apply_progress`
//! - `ProgressMessage::Query` → `progress` → `Response` を返信
//!
//! 同じ request_id の Request は同じ lane に乗るので、ack キャッシュで
//! 二重登録を防げる（at-least-once 配送でも冪等）。
//! ack は `ack_retention` を過ぎると次の登録時に捨てる。

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::bus::{MessageHandler, ProgressBus, RegistrationBus};
use crate::domain::{ProgressMessage, RegistrationMessage, RelayError, RequestId, TaskId};
use crate::registry::TaskRegistry;

struct Ack {
    at: Instant,
    result: Result<TaskId, RelayError>,
}

pub struct RegistryService {
    registry: Arc<dyn TaskRegistry>,
    registration: RegistrationBus,
    progress: ProgressBus,
    acks: Mutex<HashMap<RequestId, Ack>>,
    ack_retention: Duration,
}

impl RegistryService {
    pub const DEFAULT_ACK_RETENTION: Duration = Duration::from_secs(600);

    pub fn new(
        registry: Arc<dyn TaskRegistry>,
        registration: RegistrationBus,
        progress: ProgressBus,
    ) -> Self {
        Self {
            registry,
            registration,
            progress,
            acks: Mutex::new(HashMap::new()),
            ack_retention: Self::DEFAULT_ACK_RETENTION,
        }
    }

    /// How long a request id is remembered for deduplication.
    pub fn with_ack_retention(mut self, retention: Duration) -> Self {
        self.ack_retention = retention;
        self
    }

    async fn acknowledge(
        &self,
        request_id: RequestId,
        spec: crate::domain::TaskSpec,
    ) -> Result<TaskId, RelayError> {
        if let Some(previous) = self.acks.lock().await.get(&request_id) {
            debug!(%request_id, "duplicate registration request");
            return previous.result.clone();
        }
        let result = self.registry.register(spec).await;

        let mut acks = self.acks.lock().await;
        let before = acks.len();
        acks.retain(|_, ack| ack.at.elapsed() < self.ack_retention);
        if acks.len() < before {
            debug!(evicted = before - acks.len(), "old registration acks dropped");
        }
        acks.insert(
            request_id,
            Ack {
                at: Instant::now(),
                result: result.clone(),
            },
        );
        result
    }
}

#[async_trait]
impl MessageHandler<RegistrationMessage> for RegistryService {
    #[instrument(skip_all, fields(request_id = %message_key(&message)))]
    async fn handle(&self, message: RegistrationMessage) -> Result<(), RelayError> {
        match message {
            RegistrationMessage::Request { request_id, spec } => {
                let result = self.acknowledge(request_id, spec).await;
                self.registration
                    .publish(RegistrationMessage::Status { request_id, result })
                    .await
            }
            // our own acknowledgements come back on this topic
            RegistrationMessage::Status { .. } => Ok(()),
        }
    }
}

#[async_trait]
impl MessageHandler<ProgressMessage> for RegistryService {
    async fn handle(&self, message: ProgressMessage) -> Result<(), RelayError> {
        match message {
            ProgressMessage::Update(update) => {
                self.registry.apply_progress(update).await?;
                Ok(())
            }
            ProgressMessage::Query {
                request_id,
                task_id,
            } => {
                let result = self.registry.progress(task_id).await;
                self.progress
                    .publish(ProgressMessage::Response { request_id, result })
                    .await
            }
            ProgressMessage::StatusChanged(_) | ProgressMessage::Response { .. } => Ok(()),
        }
    }
}

fn message_key(message: &RegistrationMessage) -> RequestId {
    match message {
        RegistrationMessage::Request { request_id, .. }
        | RegistrationMessage::Status { request_id, .. } => *request_id,
    }
}
