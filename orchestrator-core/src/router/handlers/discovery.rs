use serde_json::{
    json,
    Value,
};

use crate::{
    envelope::Envelope,
    registry::{
        PeerKind,
        PeerListFilters,
        PeerStatus,
    },
    router::context::RouterContext,
};

fn filters_from_content(content: &Value) -> PeerListFilters {
    let status = content
        .get("status")
        .and_then(Value::as_str)
        .and_then(|s| serde_json::from_value::<PeerStatus>(json!(s)).ok());
    PeerListFilters {
        status,
        capability: content.get("capability").and_then(Value::as_str).map(str::to_owned),
        name_contains: content.get("nameContains").and_then(Value::as_str).map(str::to_owned),
    }
}

/// Handles `agent.list.request`, `agent.agent.list.request`,
/// `agent.service.list.request`, `service.tools.list` (peer discovery;
/// spec §4.5). Filters are ANDed; unknown filter keys are ignored.
pub async fn handle_peer_list(context: &RouterContext, kind: PeerKind, envelope: &Envelope) -> Envelope {
    let filters = filters_from_content(&envelope.content);
    let registry = context.registry_for(kind).lock().await;
    let peers: Vec<Value> = registry
        .list(&filters)
        .into_iter()
        .map(|peer| {
            json!({
                "id": peer.id,
                "name": peer.name,
                "capabilities": peer.capabilities,
                "status": peer.status,
            })
        })
        .collect();
    envelope.reply(format!("{}.list", kind.as_str()), json!({ kind.as_str().to_owned() + "s": peers }))
}

/// Handles `mcp.servers.list` / `agent.mcp.servers.list` (spec §4.5, served
/// from the supervisor's cached state).
pub async fn handle_mcp_server_list(context: &RouterContext, envelope: &Envelope) -> Envelope {
    let servers: Vec<Value> = context
        .mcp
        .list()
        .await
        .into_iter()
        .map(|server| json!({ "id": server.id, "name": server.name, "status": server.status }))
        .collect();
    envelope.reply("mcp.server.list", json!({ "servers": servers }))
}

/// Handles `mcp.tools.list`: `{serverId}` -> cached tool catalogue (spec
/// §4.5).
pub async fn handle_mcp_tool_list(context: &RouterContext, envelope: &Envelope) -> Envelope {
    let server_ref = envelope.content.get("serverId").and_then(Value::as_str);
    let Some(server_ref) = server_ref else {
        return envelope.error_reply(&crate::core::error::OrchestratorError::protocol(
            "mcp.tools.list requires \"serverId\"",
        ));
    };
    let Some(server_id) = context.mcp.resolve_id(server_ref).await else {
        return envelope.error_reply(&crate::core::error::OrchestratorError::mcp(format!(
            "unknown MCP server: {server_ref}"
        )));
    };
    let tools = context.mcp.cached_tools(server_id).await.unwrap_or_default();
    envelope.reply("mcp.tools.list", json!({ "serverId": server_id, "tools": tools }))
}
