use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use crate::{
    core::{
        id::Id,
        time::{
            now,
            Timestamp,
        },
    },
    registry::peer::PeerKind,
};

/// Task lifecycle (spec §4.4/§4.7): `pending -> in_progress -> completed |
/// failed | cancelled`, with a direct `pending -> failed`/`cancelled` allowed
/// for pre-assignment failure. Terminal states are sticky.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Normalizes an arbitrary status string reported by a peer into the closed
    /// set above, per the mapping documented in spec §4.4. Returns the
    /// normalized status plus whether the input was unrecognized (and should be
    /// logged as a warning by the caller).
    pub fn normalize(input: &str) -> (Self, bool) {
        match input {
            "pending" => (Self::Pending, false),
            "in_progress" | "assigned" | "started" => (Self::InProgress, false),
            "completed" | "done" | "success" => (Self::Completed, false),
            "failed" | "error" => (Self::Failed, false),
            "cancelled" | "canceled" => (Self::Cancelled, false),
            "waiting" | "new" => (Self::Pending, false),
            _ => (Self::Pending, true),
        }
    }
}

/// One entry in a task's status history (spec §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub status: TaskStatus,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "actorId")]
    pub actor_id: Option<Id>,
}

impl HistoryEntry {
    pub fn new(status: TaskStatus, note: Option<String>, actor_id: Option<Id>) -> Self {
        Self {
            status,
            timestamp: now(),
            note,
            actor_id,
        }
    }
}

/// A unit of cross-role work, shared shape for agent-tasks (client->agent,
/// agent->agent) and service-tasks (agent->service) per spec §4.4.
///
/// `requester_id`/`requester_role` is whoever created the task (a client or an
/// agent); `assignee_id` is whoever is doing the work (an agent or a service).
/// `client_id` is carried through service-tasks purely for notification
/// fan-out, even though the client never talks to the service directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Id,
    #[serde(rename = "taskType")]
    pub task_type: String,
    pub input: Value,
    #[serde(rename = "requesterId")]
    pub requester_id: Id,
    #[serde(rename = "requesterRole")]
    pub requester_role: PeerKind,
    #[serde(rename = "assigneeId")]
    pub assignee_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "clientId")]
    pub client_id: Option<Id>,
    pub status: TaskStatus,
    #[serde(rename = "createdAt")]
    pub created_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "completedAt")]
    pub completed_at: Option<Timestamp>,
    pub history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
    /// The id of the outbound request the router is waiting on a reply for
    /// (e.g. the `task.execute` forwarded to the assignee). Tracked so a
    /// disconnection can cancel the matching correlation entry instead of
    /// leaving it to time out (spec §4.5, "Disconnection").
    #[serde(skip)]
    pub pending_request_id: Option<Id>,
}

impl Task {
    pub fn new(
        id: Id,
        task_type: impl Into<String>,
        input: Value,
        requester_id: Id,
        requester_role: PeerKind,
        assignee_id: Id,
        client_id: Option<Id>,
    ) -> Self {
        Self {
            id,
            task_type: task_type.into(),
            input,
            requester_id,
            requester_role,
            assignee_id,
            client_id,
            status: TaskStatus::Pending,
            created_at: now(),
            completed_at: None,
            history: vec![HistoryEntry::new(TaskStatus::Pending, None, None)],
            result: None,
            error: None,
            pending_request_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_known_aliases() {
        assert_eq!(TaskStatus::normalize("assigned").0, TaskStatus::InProgress);
        assert_eq!(TaskStatus::normalize("done").0, TaskStatus::Completed);
        assert_eq!(TaskStatus::normalize("error").0, TaskStatus::Failed);
        assert_eq!(TaskStatus::normalize("waiting").0, TaskStatus::Pending);
    }

    #[test]
    fn flags_unrecognized_status_as_warning() {
        let (status, warned) = TaskStatus::normalize("frobnicating");
        assert_eq!(status, TaskStatus::Pending);
        assert!(warned);
    }

    #[test]
    fn terminal_states_are_sticky_by_construction() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::InProgress.is_terminal());
    }
}
