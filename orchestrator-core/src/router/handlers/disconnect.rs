use log::debug;

use crate::{
    core::id::Id,
    registry::PeerKind,
    router::context::RouterContext,
};

/// Handles socket close (spec §4.5, "Disconnection"): marks the peer
/// offline, fails every non-terminal task where this peer is the assignee or
/// originator, and cancels any correlation entries those tasks were still
/// waiting on.
pub async fn handle(context: &RouterContext, role: PeerKind, connection_id: Id) {
    context.remove_connection(connection_id).await;

    let peer_id = {
        let mut registry = context.registry_for(role).lock().await;
        registry.mark_offline_by_connection(connection_id)
    };
    let Some(peer_id) = peer_id else {
        return;
    };
    debug!("{} {peer_id} disconnected", role.as_str());

    let note = "peer disconnected";
    let mut affected: Vec<(Id, Option<Id>)> = {
        let mut agent_tasks = context.agent_tasks.lock().await;
        agent_tasks.fail_non_terminal_for_peer(peer_id, note)
    };
    {
        let mut service_tasks = context.service_tasks.lock().await;
        affected.extend(service_tasks.fail_non_terminal_for_peer(peer_id, note));
    }

    for (_task_id, pending_request_id) in affected {
        if let Some(request_id) = pending_request_id {
            context.correlation.cancel(request_id).await;
        }
    }
}
