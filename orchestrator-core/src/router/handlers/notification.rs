use log::warn;

use crate::{
    core::id::Id,
    envelope::Envelope,
    registry::PeerKind,
    router::context::RouterContext,
};

/// Handles `task.notification`, `task.status`, `task.message`, and
/// `task.messageresponse` (spec §4.5, "Notifications and status").
///
/// All four are forwarded based on a `taskId` lookup rather than matched by a
/// correlation entry, so ordering per task id is exactly the order these are
/// dispatched in (a single router loop processes one event at a time).
/// Whichever side didn't send the frame is the forwarding target: the
/// executing peer (agent or service) sending a status/notification/message
/// goes to the task's originator; the originator's `task.messageresponse`
/// goes back to the executing peer.
pub async fn handle(context: &RouterContext, sender_connection_id: Id, envelope: Envelope) {
    let Some(task_id) = envelope
        .content
        .get("taskId")
        .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok())
    else {
        warn!("{} missing \"taskId\"", envelope.message_type);
        return;
    };

    if let Some((requester_role, requester_id, assignee_id)) = lookup_agent_task(context, task_id).await {
        forward(context, sender_connection_id, envelope, requester_role, requester_id, PeerKind::Agent, assignee_id)
            .await;
        return;
    }

    if let Some((requester_role, requester_id, assignee_id)) = lookup_service_task(context, task_id).await {
        forward(context, sender_connection_id, envelope, requester_role, requester_id, PeerKind::Service, assignee_id)
            .await;
        return;
    }

    warn!("{} for unknown task {task_id}", envelope.message_type);
}

async fn lookup_agent_task(context: &RouterContext, task_id: Id) -> Option<(PeerKind, Id, Id)> {
    let tasks = context.agent_tasks.lock().await;
    let task = tasks.get(task_id)?;
    Some((task.requester_role, task.requester_id, task.assignee_id))
}

async fn lookup_service_task(context: &RouterContext, task_id: Id) -> Option<(PeerKind, Id, Id)> {
    let tasks = context.service_tasks.lock().await;
    let task = tasks.get(task_id)?;
    Some((task.requester_role, task.requester_id, task.assignee_id))
}

#[allow(clippy::too_many_arguments)]
async fn forward(
    context: &RouterContext,
    sender_connection_id: Id,
    envelope: Envelope,
    requester_role: PeerKind,
    requester_id: Id,
    assignee_kind: PeerKind,
    assignee_id: Id,
) {
    let assignee_connection_id = {
        let registry = context.registry_for(assignee_kind).lock().await;
        registry.by_id(assignee_id).and_then(|peer| peer.connection_id)
    };

    let sender_is_assignee = assignee_connection_id == Some(sender_connection_id);

    let result = if sender_is_assignee {
        // Executing peer -> forward to the originator.
        if requester_role == PeerKind::Client {
            context.send_to_connection(requester_id, envelope).await
        } else {
            context.send_to_peer(requester_role, requester_id, envelope).await
        }
    } else {
        // Originator -> forward back to the executing peer.
        context.send_to_peer(assignee_kind, assignee_id, envelope).await
    };

    if let Err(err) = result {
        warn!("failed to forward task notification for a known task: {err}");
    }
}
