mod common;

use std::time::Duration;

use orchestrator_core::{
    envelope::Envelope,
    registry::PeerKind,
};
use serde_json::json;

/// When the agent never answers `task.execute`, the client's wait expires and
/// it receives a `task.error` carrying a correlation timeout, rather than
/// hanging forever (spec §4.3, spec §8 scenario 3).
#[tokio::test]
async fn client_task_times_out_when_agent_never_replies() {
    let handle = common::start_orchestrator(Duration::from_millis(100)).await;

    let mut agent = common::connect(&handle, PeerKind::Agent).await;
    common::send(&mut agent, &Envelope::new("agent.register", json!({ "name": "silent" }))).await;
    assert_eq!(common::recv(&mut agent).await.message_type, "agent.registered");

    let mut client = common::connect(&handle, PeerKind::Client).await;
    assert_eq!(common::recv(&mut client).await.message_type, "orchestrator.welcome");

    common::send(
        &mut client,
        &Envelope::new("task.create", json!({ "agentName": "silent", "taskData": {} })),
    )
    .await;

    // The agent receives the forwarded execute request but never answers it.
    let execute = common::recv(&mut agent).await;
    assert_eq!(execute.message_type, "task.execute");

    let error_reply = common::recv(&mut client).await;
    assert_eq!(error_reply.message_type, "task.error");
    assert_eq!(error_reply.content["error"]["kind"], "correlation");

    handle.stop().await.unwrap();
}
