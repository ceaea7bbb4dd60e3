mod common;

use std::time::Duration;

use orchestrator_core::registry::PeerKind;
use serde_json::json;

/// A client creates a task against a registered agent; the agent executes it
/// and replies with a result, which the orchestrator forwards back to the
/// originating client as `task.result` (spec §4.5, "Client->Agent task",
/// spec §8 scenario 1).
#[tokio::test]
async fn client_task_is_forwarded_and_result_returned() {
    let handle = common::start_orchestrator(Duration::from_secs(5)).await;

    let mut agent = common::connect(&handle, PeerKind::Agent).await;
    let register = orchestrator_core::envelope::Envelope::new(
        "agent.register",
        json!({ "name": "summarizer", "capabilities": ["summarize"] }),
    );
    common::send(&mut agent, &register).await;
    let registered = common::recv(&mut agent).await;
    assert_eq!(registered.message_type, "agent.registered");

    let mut client = common::connect(&handle, PeerKind::Client).await;
    let welcome = common::recv(&mut client).await;
    assert_eq!(welcome.message_type, "orchestrator.welcome");

    let task_create = orchestrator_core::envelope::Envelope::new(
        "task.create",
        json!({ "agentName": "summarizer", "taskData": { "text": "hello world" } }),
    );
    common::send(&mut client, &task_create).await;

    let execute = common::recv(&mut agent).await;
    assert_eq!(execute.message_type, "task.execute");
    let task_id = execute.content["taskId"].clone();

    let result = execute.reply("task.result", json!({ "taskId": task_id, "result": { "summary": "hi" } }));
    common::send(&mut agent, &result).await;

    let final_reply = common::recv(&mut client).await;
    assert_eq!(final_reply.message_type, "task.result");
    assert_eq!(final_reply.content["result"]["summary"], "hi");

    handle.stop().await.unwrap();
}
