use std::sync::Arc;

use log::error;
use serde_json::{
    json,
    Value,
};

use crate::{
    core::{
        error::OrchestratorError,
        id::Id,
    },
    envelope::Envelope,
    router::context::RouterContext,
};

/// Handles `mcp.tool.execute` from an agent (spec §4.5, "Agent<->MCP").
/// Connects the server first if it is not already online.
///
/// A tool call can mean spawning a child process and waiting out its
/// `initialize`/`list_tools` handshake plus a 60 s reply timeout, so the
/// actual call is done in a spawned continuation rather than awaited inline
/// here (spec §5: a slow MCP reply must not stall every other peer's frames
/// in the single-consumer router loop). Only cheap, synchronous validation
/// is done before returning control to the router.
pub async fn handle_tool_execute(
    context: Arc<RouterContext>,
    agent_connection_id: Id,
    envelope: Envelope,
) -> Option<Envelope> {
    let server_ref = envelope.content.get("serverId").and_then(Value::as_str);
    let Some(server_ref) = server_ref else {
        return Some(envelope.error_reply(&OrchestratorError::protocol("mcp.tool.execute requires \"serverId\"")));
    };
    let tool_name = envelope.content.get("toolName").and_then(Value::as_str);
    let Some(tool_name) = tool_name else {
        return Some(envelope.error_reply(&OrchestratorError::protocol("mcp.tool.execute requires \"toolName\"")));
    };
    let server_ref = server_ref.to_owned();
    let tool_name = tool_name.to_owned();
    let parameters = envelope.content.get("parameters").cloned().unwrap_or(Value::Null);

    tokio::spawn(async move {
        let reply = match context.mcp.resolve_id(&server_ref).await {
            None => envelope.error_reply(&OrchestratorError::mcp(format!("unknown MCP server: {server_ref}"))),
            Some(server_id) => match context.mcp.tool_call(server_id, &tool_name, parameters).await {
                Ok(result) => envelope.reply("mcp.tool.result", json!({ "serverId": server_id, "result": result })),
                Err(err) => {
                    let orchestrator_err = err
                        .downcast::<OrchestratorError>()
                        .unwrap_or_else(|err| OrchestratorError::mcp(err.to_string()));
                    envelope.error_reply(&orchestrator_err)
                }
            },
        };
        if let Err(err) = context.send_to_connection(agent_connection_id, reply).await {
            error!("failed to deliver mcp.tool.execute result to agent {agent_connection_id}: {err}");
        }
    });

    None
}
