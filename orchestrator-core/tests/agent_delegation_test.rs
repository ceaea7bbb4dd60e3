mod common;

use std::time::Duration;

use orchestrator_core::{
    envelope::Envelope,
    registry::PeerKind,
};
use serde_json::json;

/// One agent delegates work to another via `agent.request`; the caller gets
/// an immediate `childagent.request.accepted`, then a `childagent.response`
/// once the target agent answers (spec §4.5, "Agent->Agent task", spec §8
/// scenario 2).
#[tokio::test]
async fn agent_to_agent_delegation_round_trips() {
    let handle = common::start_orchestrator(Duration::from_secs(5)).await;

    let mut caller = common::connect(&handle, PeerKind::Agent).await;
    common::send(&mut caller, &Envelope::new("agent.register", json!({ "name": "planner" }))).await;
    assert_eq!(common::recv(&mut caller).await.message_type, "agent.registered");

    let mut target = common::connect(&handle, PeerKind::Agent).await;
    common::send(&mut target, &Envelope::new("agent.register", json!({ "name": "researcher" }))).await;
    assert_eq!(common::recv(&mut target).await.message_type, "agent.registered");

    let request = Envelope::new(
        "agent.request",
        json!({ "targetAgentName": "researcher", "taskData": { "query": "rust idioms" } }),
    );
    common::send(&mut caller, &request).await;

    let accepted = common::recv(&mut caller).await;
    assert_eq!(accepted.message_type, "childagent.request.accepted");
    let task_id = accepted.content["taskId"].clone();

    let execute = common::recv(&mut target).await;
    assert_eq!(execute.message_type, "task.execute");
    assert_eq!(execute.content["taskId"], task_id);

    let result = execute.reply("task.result", json!({ "taskId": task_id, "result": { "answer": 42 } }));
    common::send(&mut target, &result).await;

    let response = common::recv(&mut caller).await;
    assert_eq!(response.message_type, "childagent.response");
    assert_eq!(response.content["result"]["answer"], 42);

    handle.stop().await.unwrap();
}
