use std::time::Duration;

use anyhow::Result;
use tokio::sync::Mutex;

use crate::{
    connection::ConnectionHandle,
    correlation::CorrelationTable,
    core::{
        error::OrchestratorError,
        hash::HashMap,
        id::Id,
    },
    envelope::Envelope,
    mcp::McpSupervisor,
    registry::{
        PeerKind,
        PeerRegistry,
    },
    task::TaskRegistry,
};

/// Shared state the router consults on every dispatched event (spec §4.1).
/// Registries exclusively own peer records; task registries own task records;
/// the MCP supervisor owns child-process handles. The router itself holds no
/// persistent state beyond this context.
pub struct RouterContext {
    pub agents: Mutex<PeerRegistry>,
    pub services: Mutex<PeerRegistry>,
    pub clients: Mutex<PeerRegistry>,
    pub agent_tasks: Mutex<TaskRegistry>,
    pub service_tasks: Mutex<TaskRegistry>,
    pub correlation: CorrelationTable,
    pub mcp: McpSupervisor,
    connections: Mutex<HashMap<Id, ConnectionHandle>>,
    pub task_timeout: Duration,
}

impl RouterContext {
    pub fn new(task_timeout: Duration) -> Self {
        Self {
            agents: Mutex::new(PeerRegistry::new(PeerKind::Agent)),
            services: Mutex::new(PeerRegistry::new(PeerKind::Service)),
            clients: Mutex::new(PeerRegistry::new(PeerKind::Client)),
            agent_tasks: Mutex::new(TaskRegistry::new("agent-task")),
            service_tasks: Mutex::new(TaskRegistry::new("service-task")),
            correlation: CorrelationTable::new(),
            mcp: McpSupervisor::new(),
            connections: Mutex::new(HashMap::default()),
            task_timeout,
        }
    }

    pub fn registry_for(&self, kind: PeerKind) -> &Mutex<PeerRegistry> {
        match kind {
            PeerKind::Agent => &self.agents,
            PeerKind::Service => &self.services,
            PeerKind::Client => &self.clients,
        }
    }

    pub async fn register_connection(&self, connection_id: Id, handle: ConnectionHandle) {
        self.connections.lock().await.insert(connection_id, handle);
    }

    pub async fn remove_connection(&self, connection_id: Id) {
        self.connections.lock().await.remove(&connection_id);
    }

    pub async fn send_to_connection(&self, connection_id: Id, envelope: Envelope) -> Result<()> {
        let connections = self.connections.lock().await;
        let handle = connections
            .get(&connection_id)
            .ok_or_else(|| OrchestratorError::resource("connection is no longer open"))?;
        handle
            .send(envelope)
            .map_err(|_| OrchestratorError::resource("connection outbound channel closed").into())
    }

    /// Requests every open connection to stop its pump loop (spec §4.9,
    /// graceful shutdown). Does not wait for the pumps to finish; the router
    /// observes each one's `$internal.disconnect` event as it exits.
    pub async fn cancel_all_connections(&self) {
        for handle in self.connections.lock().await.values() {
            let _ = handle.cancel();
        }
    }

    /// Sends to whichever connection a peer is currently bound to. Fails with
    /// a routing error if the peer is unreachable (spec §4.5).
    pub async fn send_to_peer(&self, kind: PeerKind, peer_id: Id, envelope: Envelope) -> Result<()> {
        let connection_id = {
            let registry = self.registry_for(kind).lock().await;
            registry
                .by_id(peer_id)
                .and_then(|peer| peer.connection_id)
                .ok_or_else(|| OrchestratorError::routing(format!("{} {peer_id} is not reachable", kind.as_str())))?
        };
        self.send_to_connection(connection_id, envelope).await
    }
}
