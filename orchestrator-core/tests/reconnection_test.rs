mod common;

use std::time::Duration;

use orchestrator_core::{
    envelope::Envelope,
    registry::PeerKind,
};
use serde_json::json;

/// An agent that disconnects and reconnects with the same declared id keeps
/// its identity: the registry updates its connection binding in place rather
/// than creating a second record, and the peer becomes reachable again (spec
/// §4.7, spec §8 scenario 6).
#[tokio::test]
async fn agent_reconnects_with_same_id_and_stays_reachable() {
    let handle = common::start_orchestrator(Duration::from_secs(5)).await;

    let mut first = common::connect(&handle, PeerKind::Agent).await;
    let agent_id = orchestrator_core::core::id::Id::new();
    common::send(
        &mut first,
        &Envelope::new("agent.register", json!({ "id": agent_id, "name": "resilient" })),
    )
    .await;
    let registered = common::recv(&mut first).await;
    assert_eq!(registered.message_type, "agent.registered");
    assert_eq!(registered.content["id"], serde_json::to_value(agent_id).unwrap());

    drop(first);
    tokio::time::sleep(Duration::from_millis(50)).await;

    {
        let agents = handle.context().agents.lock().await;
        let record = agents.by_id(agent_id).expect("agent record survives disconnect");
        assert!(!record.is_reachable());
    }

    let mut second = common::connect(&handle, PeerKind::Agent).await;
    common::send(
        &mut second,
        &Envelope::new("agent.register", json!({ "id": agent_id, "name": "resilient" })),
    )
    .await;
    let reregistered = common::recv(&mut second).await;
    assert_eq!(reregistered.message_type, "agent.registered");
    assert_eq!(reregistered.content["id"], serde_json::to_value(agent_id).unwrap());

    {
        let agents = handle.context().agents.lock().await;
        let record = agents.by_id(agent_id).expect("same agent record is reused");
        assert!(record.is_reachable());
        assert_eq!(
            agents.list(&orchestrator_core::registry::PeerListFilters::default()).len(),
            1,
            "reconnecting must not create a second record"
        );
    }

    let mut client = common::connect(&handle, PeerKind::Client).await;
    assert_eq!(common::recv(&mut client).await.message_type, "orchestrator.welcome");
    common::send(
        &mut client,
        &Envelope::new("task.create", json!({ "agentName": "resilient", "taskData": {} })),
    )
    .await;
    let execute = common::recv(&mut second).await;
    assert_eq!(execute.message_type, "task.execute");

    handle.stop().await.unwrap();
}
