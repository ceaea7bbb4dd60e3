use anyhow::Result;
use log::warn;
use serde_json::Value;

use crate::{
    core::{
        error::OrchestratorError,
        hash::HashMap,
        id::Id,
        time::now,
    },
    task::model::{
        HistoryEntry,
        Task,
        TaskStatus,
    },
};

/// Backs both the agent-task and service-task registries (spec §4.4): same
/// structural contract, separate instances so per-peer cleanup on
/// disconnection never has to distinguish the two kinds of assignee.
///
/// `by_agent_id` indexes the agent side of a task: the assignee for an
/// agent-task, the requester for a service-task. `by_service_id` indexes the
/// assignee of a service-task; it stays empty for an agent-task registry.
/// `by_client_id` indexes the originating client, present on both.
pub struct TaskRegistry {
    label: &'static str,
    by_id: HashMap<Id, Task>,
    by_agent_id: HashMap<Id, Vec<Id>>,
    by_service_id: HashMap<Id, Vec<Id>>,
    by_client_id: HashMap<Id, Vec<Id>>,
}

impl TaskRegistry {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            by_id: HashMap::default(),
            by_agent_id: HashMap::default(),
            by_service_id: HashMap::default(),
            by_client_id: HashMap::default(),
        }
    }

    /// Inserts a new task, indexing it under whichever of `agent_index` /
    /// `service_index` the caller supplies; `task.client_id` is indexed
    /// automatically when present.
    pub fn create(&mut self, task: Task, agent_index: Option<Id>, service_index: Option<Id>) -> Id {
        let id = task.id;
        if let Some(agent_id) = agent_index {
            self.by_agent_id.entry(agent_id).or_default().push(id);
        }
        if let Some(service_id) = service_index {
            self.by_service_id.entry(service_id).or_default().push(id);
        }
        if let Some(client_id) = task.client_id {
            self.by_client_id.entry(client_id).or_default().push(id);
        }
        self.by_id.insert(id, task);
        id
    }

    pub fn get(&self, id: Id) -> Option<&Task> {
        self.by_id.get(&id)
    }

    pub fn list_by_agent(&self, agent_id: Id) -> Vec<&Task> {
        self.by_agent_id
            .get(&agent_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    pub fn list_by_service(&self, service_id: Id) -> Vec<&Task> {
        self.by_service_id
            .get(&service_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    pub fn list_by_client(&self, client_id: Id) -> Vec<&Task> {
        self.by_client_id
            .get(&client_id)
            .into_iter()
            .flatten()
            .filter_map(|id| self.by_id.get(id))
            .collect()
    }

    /// Appends a history entry and updates status, normalizing an arbitrary
    /// input status string per spec §4.4. Rejects mutation of a task already in
    /// a terminal state. Sets `completedAt` the moment the task becomes
    /// terminal.
    pub fn update_status(
        &mut self,
        id: Id,
        raw_status: &str,
        note: Option<String>,
        actor_id: Option<Id>,
    ) -> Result<TaskStatus> {
        let task = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::unknown_task(id))?;

        if task.status.is_terminal() {
            return Err(OrchestratorError::terminal_task(id).into());
        }

        let (status, unrecognized) = TaskStatus::normalize(raw_status);
        if unrecognized {
            warn!("{} {id}: unrecognized status {raw_status:?}, normalized to pending", self.label);
        }

        task.history.push(HistoryEntry::new(status, note, actor_id));
        task.status = status;
        if status.is_terminal() {
            task.completed_at = Some(now());
        }
        Ok(status)
    }

    pub fn set_result(&mut self, id: Id, result: Value) -> Result<()> {
        let task = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::unknown_task(id))?;
        task.result = Some(result);
        Ok(())
    }

    pub fn set_error(&mut self, id: Id, error: Value) -> Result<()> {
        let task = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| OrchestratorError::unknown_task(id))?;
        task.error = Some(error);
        Ok(())
    }

    /// Records the outbound request id the router is waiting on a reply for,
    /// so a later disconnection can cancel it directly (spec §4.5).
    pub fn set_pending_request(&mut self, id: Id, request_id: Id) {
        if let Some(task) = self.by_id.get_mut(&id) {
            task.pending_request_id = Some(request_id);
        }
    }

    /// Forces every non-terminal task assigned to or requested by `peer_id` to
    /// `failed`, for disconnection handling (spec §4.5). Returns, for each
    /// affected task, its id and any outstanding correlation request id so the
    /// caller can reject that waiter immediately rather than let it time out.
    pub fn fail_non_terminal_for_peer(&mut self, peer_id: Id, note: &str) -> Vec<(Id, Option<Id>)> {
        let affected: Vec<(Id, Option<Id>)> = self
            .by_id
            .values()
            .filter(|task| {
                !task.status.is_terminal() && (task.assignee_id == peer_id || task.requester_id == peer_id)
            })
            .map(|task| (task.id, task.pending_request_id))
            .collect();

        for (id, _) in &affected {
            if let Some(task) = self.by_id.get_mut(id) {
                task.history.push(HistoryEntry::new(TaskStatus::Failed, Some(note.to_owned()), None));
                task.status = TaskStatus::Failed;
                task.completed_at = Some(now());
            }
        }
        affected
    }

    /// Removes a task from the primary index and every secondary index it
    /// might appear in (spec §4.4 `removeTask`).
    pub fn remove_task(&mut self, id: Id) -> Option<Task> {
        let task = self.by_id.remove(&id)?;
        for bucket in self.by_agent_id.values_mut() {
            bucket.retain(|existing| *existing != id);
        }
        for bucket in self.by_service_id.values_mut() {
            bucket.retain(|existing| *existing != id);
        }
        for bucket in self.by_client_id.values_mut() {
            bucket.retain(|existing| *existing != id);
        }
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::registry::peer::PeerKind;

    fn sample_task(assignee: Id, client: Option<Id>) -> Task {
        Task::new(Id::new(), "echo", json!({}), Id::new(), PeerKind::Client, assignee, client)
    }

    #[test]
    fn create_and_get_round_trip() {
        let mut registry = TaskRegistry::new("agent-task");
        let agent_id = Id::new();
        let task = sample_task(agent_id, None);
        let id = task.id;
        registry.create(task, Some(agent_id), None);
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Pending);
        assert_eq!(registry.list_by_agent(agent_id).len(), 1);
    }

    #[test]
    fn terminal_status_rejects_further_updates() {
        let mut registry = TaskRegistry::new("agent-task");
        let agent_id = Id::new();
        let task = sample_task(agent_id, None);
        let id = task.id;
        registry.create(task, Some(agent_id), None);

        registry.update_status(id, "completed", None, None).unwrap();
        let err = registry.update_status(id, "failed", None, None).unwrap_err();
        assert!(err.to_string().contains("terminal state"));
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn disconnection_fails_non_terminal_tasks_for_peer() {
        let mut registry = TaskRegistry::new("agent-task");
        let agent_id = Id::new();
        let task = sample_task(agent_id, None);
        let id = task.id;
        registry.create(task, Some(agent_id), None);

        let affected = registry.fail_non_terminal_for_peer(agent_id, "peer disconnected");
        assert_eq!(affected, vec![(id, None)]);
        assert_eq!(registry.get(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn remove_task_clears_all_indexes() {
        let mut registry = TaskRegistry::new("service-task");
        let agent_id = Id::new();
        let client_id = Id::new();
        let service_id = Id::new();
        let task = sample_task(service_id, Some(client_id));
        let id = task.id;
        registry.create(task, Some(agent_id), Some(service_id));

        registry.remove_task(id);
        assert!(registry.get(id).is_none());
        assert!(registry.list_by_agent(agent_id).is_empty());
        assert!(registry.list_by_service(service_id).is_empty());
        assert!(registry.list_by_client(client_id).is_empty());
    }
}
