//! Events - バス上を流れるメッセージ
//!
//! Two topics, each carried by its own `MessageBus`:
//! - `RegistrationMessage`: registration request and its status acknowledgement
//! - `ProgressMessage`: worker updates, status changes, progress query/response
//!
//! Every message exposes an ordering key. Messages sharing a key are handled
//! in publish order.

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use super::errors::RelayError;
use super::ids::{RequestId, TaskId};
use super::progress::{ProgressSnapshot, ProgressUpdate};
use super::state::TaskStatus;
use super::task::TaskSpec;

/// A message that can be routed to an ordered handler lane.
pub trait Ordered {
    fn ordering_key(&self) -> Ulid;
}

#[derive(Debug, Clone)]
pub enum RegistrationMessage {
    Request {
        request_id: RequestId,
        spec: TaskSpec,
    },
    /// Acknowledgement: the assigned id, or why registration was rejected.
    Status {
        request_id: RequestId,
        result: Result<TaskId, RelayError>,
    },
}

impl Ordered for RegistrationMessage {
    fn ordering_key(&self) -> Ulid {
        match self {
            RegistrationMessage::Request { request_id, .. }
            | RegistrationMessage::Status { request_id, .. } => request_id.as_ulid(),
        }
    }
}

/// Status transition announced by the registry side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ProgressMessage {
    Update(ProgressUpdate),
    StatusChanged(StatusChange),
    Query {
        request_id: RequestId,
        task_id: TaskId,
    },
    Response {
        request_id: RequestId,
        result: Result<ProgressSnapshot, RelayError>,
    },
}

impl Ordered for ProgressMessage {
    fn ordering_key(&self) -> Ulid {
        match self {
            ProgressMessage::Update(update) => update.task_id.as_ulid(),
            ProgressMessage::StatusChanged(change) => change.task_id.as_ulid(),
            // queries share the task's lane so they observe earlier updates
            ProgressMessage::Query { task_id, .. } => task_id.as_ulid(),
            ProgressMessage::Response { request_id, .. } => request_id.as_ulid(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_messages_for_a_task_share_a_key() {
        let task_id = TaskId::from_u128(42);
        let update = ProgressMessage::Update(ProgressUpdate {
            task_id,
            sequence: 1,
            progress: 10,
            total: None,
        });
        let query = ProgressMessage::Query {
            request_id: RequestId::from_u128(7),
            task_id,
        };
        assert_eq!(update.ordering_key(), query.ordering_key());
    }

    #[test]
    fn registration_is_keyed_by_request() {
        let request_id = RequestId::from_u128(9);
        let ack = RegistrationMessage::Status {
            request_id,
            result: Err(RelayError::validation("bad")),
        };
        assert_eq!(ack.ordering_key(), request_id.as_ulid());
    }
}
