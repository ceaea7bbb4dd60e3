use std::sync::Arc;

use log::{
    error,
    warn,
};
use serde_json::{
    json,
    Value,
};

use crate::{
    core::{
        error::OrchestratorError,
        id::Id,
    },
    correlation::CorrelationOptions,
    envelope::Envelope,
    registry::PeerKind,
    router::context::RouterContext,
    task::Task,
};

/// Handles `service.task.execute` from an agent (spec §4.5, "Agent->Service
/// task"): a tool invocation against a registered service.
pub async fn handle_service_task_execute(
    context: Arc<RouterContext>,
    agent_connection_id: Id,
    envelope: Envelope,
) -> Option<Envelope> {
    let service_ref = envelope.content.get("serviceId").and_then(Value::as_str);
    let Some(service_ref) = service_ref else {
        return Some(envelope.error_reply(&OrchestratorError::protocol("service.task.execute requires \"serviceId\"")));
    };
    let tool_id = envelope.content.get("toolId").and_then(Value::as_str).unwrap_or_default();
    let params = envelope.content.get("params").cloned().unwrap_or(Value::Null);
    let client_id = envelope
        .content
        .get("clientId")
        .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok());

    let agent_id = {
        let agents = context.agents.lock().await;
        match agents.by_connection_id(agent_connection_id) {
            Some(agent) => agent.id,
            None => return Some(envelope.error_reply(&OrchestratorError::routing("calling agent is not registered"))),
        }
    };

    let service_id = {
        let services = context.services.lock().await;
        match services.by_id_or_name(service_ref) {
            Some(service) if service.is_reachable() => service.id,
            _ => return Some(envelope.error_reply(&OrchestratorError::service_not_found(service_ref))),
        }
    };

    let task = Task::new(
        Id::new(),
        tool_id.to_owned(),
        params.clone(),
        agent_id,
        PeerKind::Agent,
        service_id,
        client_id,
    );
    let task_id = task.id;
    {
        let mut tasks = context.service_tasks.lock().await;
        tasks.create(task, Some(agent_id), Some(service_id));
    }

    let request = Envelope::new(
        "service.task.execute",
        json!({ "taskId": task_id, "toolId": tool_id, "params": params }),
    );
    let request_id = request.id;

    if let Err(err) = context.send_to_peer(PeerKind::Service, service_id, request).await {
        context.service_tasks.lock().await.remove_task(task_id);
        return Some(envelope.error_reply(&OrchestratorError::routing(err.to_string())));
    }
    context.service_tasks.lock().await.set_pending_request(task_id, request_id);

    let options = CorrelationOptions {
        timeout: context.task_timeout,
        ..Default::default()
    };
    let waiter = context.correlation.register(request_id, options).await;

    tokio::spawn(async move {
        let outcome = waiter.await;
        let reply = match outcome {
            Ok(Ok(result_envelope)) => {
                let content = result_envelope
                    .content
                    .get("result")
                    .cloned()
                    .unwrap_or(result_envelope.content.clone());
                let mut tasks = context.service_tasks.lock().await;
                let _ = tasks.update_status(task_id, "completed", None, Some(service_id));
                let _ = tasks.set_result(task_id, content.clone());
                envelope.reply("service.task.result", json!({ "taskId": task_id, "result": content }))
            }
            Ok(Err(err)) => {
                let mut tasks = context.service_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                let _ = tasks.set_error(task_id, err.to_content());
                envelope.error_reply(&err)
            }
            Err(_) => {
                let err = OrchestratorError::correlation("waiter dropped");
                let mut tasks = context.service_tasks.lock().await;
                let _ = tasks.update_status(task_id, "failed", Some(err.to_string()), None);
                envelope.error_reply(&err)
            }
        };
        if let Err(err) = context.send_to_connection(agent_connection_id, reply).await {
            error!("failed to deliver service.task.result to agent {agent_connection_id}: {err}");
        }
    });

    None
}

/// Handles `service.task.notification` from a service: fanned out to both the
/// owning agent and the owning client (if any), without affecting task state
/// (spec §4.5).
pub async fn handle_service_task_notification(context: &RouterContext, envelope: &Envelope) {
    let Some(task_id) = envelope
        .content
        .get("taskId")
        .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok())
    else {
        warn!("service.task.notification missing \"taskId\"");
        return;
    };

    let (agent_id, client_connection_id) = {
        let tasks = context.service_tasks.lock().await;
        match tasks.get(task_id) {
            Some(task) => (task.requester_id, task.client_id),
            None => {
                warn!("service.task.notification for unknown task {task_id}");
                return;
            }
        }
    };

    let notification = envelope.clone();
    if let Err(err) = context
        .send_to_peer(PeerKind::Agent, agent_id, notification.clone())
        .await
    {
        warn!("failed to forward service.task.notification to agent {agent_id}: {err}");
    }
    if let Some(client_connection_id) = client_connection_id {
        if let Err(err) = context.send_to_connection(client_connection_id, notification).await {
            warn!("failed to forward service.task.notification to client {client_connection_id}: {err}");
        }
    }
}
