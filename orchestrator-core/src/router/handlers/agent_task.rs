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
    registry::{
        PeerKind,
        PeerStatus,
    },
    router::context::RouterContext,
    task::Task,
};

/// Handles `agent.request` (spec §4.5, "Agent->Agent task"): an agent
/// delegating work to another agent.
///
/// The caller is answered synchronously with `childagent.request.accepted`
/// (returned from this function); the eventual `childagent.response` is
/// delivered later by a spawned continuation once the target agent replies or
/// the wait times out.
pub async fn handle_agent_request(
    context: Arc<RouterContext>,
    caller_connection_id: Id,
    envelope: Envelope,
) -> Envelope {
    // §4.5 names the field "targetAgentName"; the literal scenario data in §8
    // ("Agent-to-agent delegation") sends "targetAgent" instead. Both are
    // accepted since the scenario is a testable property.
    let target_name = envelope
        .content
        .get("targetAgentName")
        .or_else(|| envelope.content.get("targetAgent"))
        .and_then(Value::as_str);
    let Some(target_name) = target_name else {
        return envelope.error_reply(&OrchestratorError::protocol(
            "agent.request requires \"targetAgentName\"",
        ));
    };
    let task_data = envelope.content.get("taskData").cloned().unwrap_or(Value::Null);

    let caller_id = {
        let agents = context.agents.lock().await;
        match agents.by_connection_id(caller_connection_id) {
            Some(caller) => caller.id,
            None => return envelope.error_reply(&OrchestratorError::routing("calling agent is not registered")),
        }
    };

    let target_id = {
        let agents = context.agents.lock().await;
        // §4.5 "Agent->Agent task" excludes a busy target, unlike the
        // client->agent path (client_task.rs), which only excludes offline.
        match agents.by_id_or_name(target_name) {
            Some(target) if target.status == PeerStatus::Online => target.id,
            _ => return envelope.error_reply(&OrchestratorError::agent_not_found(target_name)),
        }
    };

    let task = Task::new(
        Id::new(),
        "agent.delegation",
        task_data.clone(),
        caller_id,
        PeerKind::Agent,
        target_id,
        None,
    );
    let task_id = task.id;
    {
        let mut tasks = context.agent_tasks.lock().await;
        tasks.create(task, Some(target_id), None);
    }

    let request = Envelope::new(
        "task.execute",
        json!({
            "taskId": task_id,
            "input": task_data,
            "delegatingAgentId": caller_id,
            "timestamp": now(),
        }),
    );
    let request_id = request.id;

    if let Err(err) = context.send_to_peer(PeerKind::Agent, target_id, request).await {
        context.agent_tasks.lock().await.remove_task(task_id);
        return envelope.error_reply(&OrchestratorError::routing(err.to_string()));
    }
    context.agent_tasks.lock().await.set_pending_request(task_id, request_id);

    let options = CorrelationOptions {
        timeout: envelope
            .content
            .get("timeout")
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_millis)
            .unwrap_or(context.task_timeout),
        ..Default::default()
    };
    let waiter = context.correlation.register(request_id, options).await;

    let accepted_reply = envelope.reply("childagent.request.accepted", json!({ "taskId": task_id }));

    tokio::spawn(async move {
        let outcome = waiter.await;
        let response = match outcome {
            Ok(Ok(result_envelope)) => {
                let is_error = result_envelope.message_type == "task.error";
                let content = result_envelope
                    .content
                    .get("result")
                    .cloned()
                    .unwrap_or(result_envelope.content.clone());
                let mut tasks = context.agent_tasks.lock().await;
                let status = if is_error { "failed" } else { "completed" };
                let _ = tasks.update_status(task_id, status, None, Some(target_id));
                if is_error {
                    let _ = tasks.set_error(task_id, content.clone());
                } else {
                    let _ = tasks.set_result(task_id, content.clone());
                }
                envelope.reply("childagent.response", json!({ "taskId": task_id, "result": content }))
            }
            Ok(Err(err)) => {
                let mut tasks = context.agent_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                envelope.reply("childagent.response", json!({ "taskId": task_id, "error": err.to_content() }))
            }
            Err(_) => {
                let err = OrchestratorError::correlation("waiter dropped");
                let mut tasks = context.agent_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                envelope.reply("childagent.response", json!({ "taskId": task_id, "error": err.to_content() }))
            }
        };
        if let Err(err) = context.send_to_connection(caller_connection_id, response).await {
            error!("failed to deliver childagent.response to agent {caller_connection_id}: {err}");
        }
    });

    accepted_reply
}
