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
        time::now,
    },
    correlation::CorrelationOptions,
    envelope::Envelope,
    registry::PeerKind,
    router::context::RouterContext,
    task::Task,
};

/// Handles `task.create` from a client (spec §4.5, "Client->Agent task").
///
/// Resolves the target agent, creates a pending agent-task, forwards
/// `task.execute`, and installs a correlation entry. The reply to the client
/// is produced asynchronously, once the agent answers or the wait times out,
/// so this function only ever returns an immediate `error` (for a missing or
/// unreachable agent) or nothing at all.
pub async fn handle_task_create(
    context: Arc<RouterContext>,
    client_connection_id: Id,
    envelope: Envelope,
) -> Option<Envelope> {
    let agent_name = envelope.content.get("agentName").and_then(Value::as_str);
    let Some(agent_name) = agent_name else {
        return Some(envelope.error_reply(&OrchestratorError::protocol("task.create requires \"agentName\"")));
    };
    let task_data = envelope.content.get("taskData").cloned().unwrap_or(Value::Null);

    let agent_id = {
        let agents = context.agents.lock().await;
        match agents.by_id_or_name(agent_name) {
            Some(agent) if agent.is_reachable() => agent.id,
            _ => return Some(envelope.error_reply(&OrchestratorError::agent_not_found(agent_name))),
        }
    };

    let task = Task::new(
        Id::new(),
        "client.task",
        task_data.clone(),
        client_connection_id,
        PeerKind::Client,
        agent_id,
        Some(client_connection_id),
    );
    let task_id = task.id;
    {
        let mut tasks = context.agent_tasks.lock().await;
        tasks.create(task, Some(agent_id), None);
    }

    let request = Envelope::new(
        "task.execute",
        json!({
            "taskId": task_id,
            "input": task_data,
            "clientId": client_connection_id,
            "timestamp": now(),
        }),
    );
    let request_id = request.id;

    if let Err(err) = context.send_to_peer(PeerKind::Agent, agent_id, request).await {
        context.agent_tasks.lock().await.remove_task(task_id);
        return Some(envelope.error_reply(&OrchestratorError::routing(err.to_string())));
    }
    context.agent_tasks.lock().await.set_pending_request(task_id, request_id);

    let options = CorrelationOptions {
        timeout: context.task_timeout,
        ..Default::default()
    };
    let waiter = context.correlation.register(request_id, options).await;

    tokio::spawn(async move {
        let outcome = waiter.await;
        let reply = match outcome {
            Ok(Ok(result_envelope)) => {
                let is_error = result_envelope.message_type == "task.error";
                let content = result_envelope.content.get("result").cloned().unwrap_or(result_envelope.content.clone());
                let mut tasks = context.agent_tasks.lock().await;
                let status = if is_error { "failed" } else { "completed" };
                let _ = tasks.update_status(task_id, status, None, Some(agent_id));
                if is_error {
                    let _ = tasks.set_error(task_id, content.clone());
                    envelope.reply("task.error", json!({ "taskId": task_id, "error": content }))
                } else {
                    let _ = tasks.set_result(task_id, content.clone());
                    envelope.reply("task.result", json!({ "taskId": task_id, "result": content }))
                }
            }
            Ok(Err(err)) => {
                let mut tasks = context.agent_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                let _ = tasks.set_error(task_id, err.to_content());
                envelope.error_reply(&err)
            }
            Err(_) => {
                let err = OrchestratorError::correlation("waiter dropped");
                let mut tasks = context.agent_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                envelope.error_reply(&err)
            }
        };
        if let Err(err) = context.send_to_connection(client_connection_id, reply).await {
            error!("failed to deliver task.create result to client {client_connection_id}: {err}");
        }
    });

    None
}
