mod common;

use std::time::Duration;

use orchestrator_core::{
    envelope::Envelope,
    registry::PeerKind,
};
use serde_json::json;

/// `task.create` against an agent name that has never registered is rejected
/// immediately with a routing error, rather than being queued or silently
/// dropped (spec §4.5, §7, spec §8 scenario 4).
#[tokio::test]
async fn task_create_against_unknown_agent_errors_immediately() {
    let handle = common::start_orchestrator(Duration::from_secs(5)).await;

    let mut client = common::connect(&handle, PeerKind::Client).await;
    assert_eq!(common::recv(&mut client).await.message_type, "orchestrator.welcome");

    common::send(
        &mut client,
        &Envelope::new("task.create", json!({ "agentName": "ghost", "taskData": {} })),
    )
    .await;

    let error_reply = common::recv(&mut client).await;
    assert_eq!(error_reply.message_type, "error");
    assert_eq!(error_reply.content["error"]["kind"], "routing");
    assert_eq!(error_reply.content["error"]["message"], "Agent not found: ghost");

    handle.stop().await.unwrap();
}

/// A previously-registered agent that disconnects becomes unreachable; a
/// subsequent `task.create` against it is rejected the same way as a name
/// that was never registered (spec §4.5, §4.7).
#[tokio::test]
async fn task_create_against_offline_agent_errors() {
    let handle = common::start_orchestrator(Duration::from_secs(5)).await;

    let agent = common::connect(&handle, PeerKind::Agent).await;
    let mut agent = agent;
    common::send(&mut agent, &Envelope::new("agent.register", json!({ "name": "flaky" }))).await;
    assert_eq!(common::recv(&mut agent).await.message_type, "agent.registered");
    drop(agent);

    // Give the disconnect handler a moment to mark the peer offline.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut client = common::connect(&handle, PeerKind::Client).await;
    assert_eq!(common::recv(&mut client).await.message_type, "orchestrator.welcome");

    common::send(
        &mut client,
        &Envelope::new("task.create", json!({ "agentName": "flaky", "taskData": {} })),
    )
    .await;

    let error_reply = common::recv(&mut client).await;
    assert_eq!(error_reply.message_type, "error");
    assert_eq!(error_reply.content["error"]["kind"], "routing");
    assert_eq!(error_reply.content["error"]["message"], "Agent not found: flaky");

    handle.stop().await.unwrap();
}
