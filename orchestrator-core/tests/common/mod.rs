use std::time::Duration;

use futures_util::{
    SinkExt,
    StreamExt,
};
use orchestrator_core::{
    config::OrchestratorConfig,
    envelope::Envelope,
    orchestrator::{
        Orchestrator,
        OrchestratorHandle,
    },
    registry::PeerKind,
    transport::{
        direct::DirectSocket,
        socket::Frame,
    },
};

/// Builds and starts an orchestrator bound to ephemeral ports, suitable for
/// direct-connection tests that never touch the real TCP listeners.
pub async fn start_orchestrator(task_timeout: Duration) -> OrchestratorHandle {
    orchestrator_test_utils::setup_test_environment();
    let config = OrchestratorConfig {
        agent_port: 0,
        client_port: 0,
        service_port: 0,
        task_timeout,
        ..Default::default()
    };
    let orchestrator = Orchestrator::new(&config).await;
    orchestrator.start(&config).await.expect("orchestrator starts on ephemeral ports")
}

pub async fn connect(handle: &OrchestratorHandle, role: PeerKind) -> DirectSocket {
    handle.direct_connect(role).await
}

pub async fn send(socket: &mut DirectSocket, envelope: &Envelope) {
    socket.send(Frame::Text(envelope.to_json())).await.expect("direct socket accepts frames");
}

/// Reads the next envelope off the socket, ignoring websocket-level pings.
pub async fn recv(socket: &mut DirectSocket) -> Envelope {
    loop {
        match socket.next().await.expect("socket closed unexpectedly").expect("frame is not an error") {
            Frame::Text(text) => return Envelope::parse(&text).expect("orchestrator always sends valid envelopes"),
            Frame::Ping(_) => continue,
        }
    }
}

/// Reads envelopes until one with the given `type` arrives, discarding any
/// others (used where an earlier reply - e.g. `childagent.request.accepted` -
/// precedes the one under test).
pub async fn recv_type(socket: &mut DirectSocket, message_type: &str) -> Envelope {
    loop {
        let envelope = recv(socket).await;
        if envelope.message_type == message_type {
            return envelope;
        }
    }
}
