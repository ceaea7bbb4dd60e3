use std::sync::Arc;

use log::error;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    core::{
        error::OrchestratorError,
        id::Id,
    },
    dispatch::{
        DispatchEvent,
        DISCONNECT_EVENT_TYPE,
    },
    envelope::Envelope,
    registry::PeerKind,
    router::{
        context::RouterContext,
        handlers::{
            agent_task,
            client_task,
            discovery,
            disconnect,
            liveness,
            mcp,
            notification,
            registration,
            service_task,
        },
    },
};

/// Drains dispatched events one at a time and routes each to the appropriate
/// handler (spec §4.5). A single consumer loop gives the ordering guarantee
/// in spec §4.8 for free: frames from one connection are observed here in the
/// order their `Connection` pump emitted them.
pub async fn run(context: Arc<RouterContext>, mut events: UnboundedReceiver<DispatchEvent>) {
    while let Some(event) = events.recv().await {
        handle_event(context.clone(), event).await;
    }
}

async fn handle_event(context: Arc<RouterContext>, event: DispatchEvent) {
    let DispatchEvent {
        role,
        connection_id,
        envelope,
    } = event;

    if envelope.message_type == DISCONNECT_EVENT_TYPE {
        disconnect::handle(&context, role, connection_id).await;
        return;
    }

    // A reply matching an outstanding correlation entry is consumed here and
    // never reaches the type-keyed handlers below.
    if context.correlation.try_resolve(&envelope).await {
        return;
    }

    let reply = match envelope.message_type.as_str() {
        "agent.register" => Some(registration::handle_register(&context, PeerKind::Agent, connection_id, &envelope).await),
        "service.register" => {
            Some(registration::handle_register(&context, PeerKind::Service, connection_id, &envelope).await)
        }
        "agent.deregister" => {
            Some(registration::handle_deregister(&context, PeerKind::Agent, connection_id, &envelope).await)
        }
        "service.deregister" => {
            Some(registration::handle_deregister(&context, PeerKind::Service, connection_id, &envelope).await)
        }
        "agent.list.request" | "agent.agent.list.request" => {
            Some(discovery::handle_peer_list(&context, PeerKind::Agent, &envelope).await)
        }
        "agent.service.list.request" => {
            Some(discovery::handle_peer_list(&context, PeerKind::Service, &envelope).await)
        }
        "service.tools.list" => Some(handle_service_tools_list(&context, connection_id, &envelope).await),
        "agent.mcp.servers.list" | "mcp.servers.list" => {
            Some(discovery::handle_mcp_server_list(&context, &envelope).await)
        }
        "mcp.tools.list" | "mcp.tools.list.request" => Some(discovery::handle_mcp_tool_list(&context, &envelope).await),
        "task.create" => client_task::handle_task_create(context.clone(), connection_id, envelope.clone()).await,
        "agent.request" => Some(agent_task::handle_agent_request(context.clone(), connection_id, envelope.clone()).await),
        "service.task.execute" => {
            service_task::handle_service_task_execute(context.clone(), connection_id, envelope.clone()).await
        }
        "service.task.notification" => {
            service_task::handle_service_task_notification(&context, &envelope).await;
            None
        }
        "mcp.tool.execute" => mcp::handle_tool_execute(context.clone(), connection_id, envelope.clone()).await,
        "task.notification" | "task.status" | "task.message" | "task.messageresponse" => {
            notification::handle(&context, connection_id, envelope.clone()).await;
            None
        }
        "ping" => Some(liveness::handle_ping(&envelope)),
        "agent.status" => {
            liveness::handle_status_update(&context, PeerKind::Agent, connection_id, &envelope).await;
            None
        }
        "service.status" => {
            liveness::handle_status_update(&context, PeerKind::Service, connection_id, &envelope).await;
            None
        }
        other => Some(envelope.error_reply(&OrchestratorError::protocol(format!("unknown message type: {other}")))),
    };

    if let Some(reply) = reply {
        if let Err(err) = context.send_to_connection(connection_id, reply).await {
            error!("failed to deliver reply on connection {connection_id}: {err}");
        }
    }
}

/// A service announcing its tool catalogue. Grouped with the discovery
/// handlers in spec §4.5, but driven by the calling service's own identity
/// rather than a filter (Open Question, recorded in DESIGN.md): the
/// orchestrator simply echoes the catalogue back as acknowledgement once it
/// has confirmed the caller is a registered service.
async fn handle_service_tools_list(context: &RouterContext, connection_id: Id, envelope: &Envelope) -> Envelope {
    let services = context.services.lock().await;
    if services.by_connection_id(connection_id).is_none() {
        return envelope.error_reply(&OrchestratorError::routing("service is not registered"));
    }
    let tools = envelope.content.get("tools").cloned().unwrap_or(serde_json::Value::Array(vec![]));
    envelope.reply("service.tools.list", json!({ "tools": tools }))
}
