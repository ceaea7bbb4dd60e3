use std::{
    net::{
        IpAddr,
        Ipv4Addr,
        SocketAddr,
    },
    sync::Arc,
};

use anyhow::{
    Error,
    Result,
};
use log::info;
use serde_json::json;

use crate::{
    config::OrchestratorConfig,
    connection,
    core::id::Id,
    dispatch::Dispatcher,
    listener::{
        ListenerHandle,
        PeerListener,
    },
    registry::PeerKind,
    router::{
        self,
        RouterContext,
    },
    transport::direct::direct_socket_pair,
};

/// A WebSocket orchestrator that mediates agents, services, and clients
/// (spec §2). Grounded on the teacher's `Router`/`RouterHandle`: owns no
/// business state of its own beyond the shared [`RouterContext`]; its job is
/// strictly binding the three role-fixed listeners, running the router's
/// event loop, and coordinating shutdown.
pub struct Orchestrator {
    context: Arc<RouterContext>,
    dispatcher: Dispatcher,
}

/// A handle to a running [`Orchestrator`]. Ownership of the orchestrator is
/// transferred away when it starts; this handle is what callers hold on to.
pub struct OrchestratorHandle {
    context: Arc<RouterContext>,
    dispatcher: Dispatcher,
    listeners: Vec<ListenerHandle>,
    router_task: tokio::task::JoinHandle<()>,
}

impl Orchestrator {
    /// Builds a fresh orchestrator from resolved configuration, declaring any
    /// MCP servers named in the config (spec §4.6: "declared at config load ->
    /// registered") without spawning them yet, and pre-populating the agent
    /// and service registries with the config's declared "expected identity"
    /// hints (SPEC_FULL.md A.3). A hint is a manifest-only placeholder; the
    /// named peer still has to connect and send `*.register` before it is
    /// reachable.
    pub async fn new(config: &OrchestratorConfig) -> Self {
        let context = Arc::new(RouterContext::new(config.task_timeout));
        for server in &config.mcp_servers {
            context
                .mcp
                .declare(Id::new(), server.name.clone(), server.interpreter, server.script_path.clone())
                .await;
        }
        for agent in &config.agents {
            context.agents.lock().await.declare_hint(agent.name.clone(), agent.manifest.clone());
        }
        for service in &config.services {
            context.services.lock().await.declare_hint(service.name.clone(), service.manifest.clone());
        }
        let (dispatcher, events) = Dispatcher::new();
        tokio::spawn(router::run(context.clone(), events));
        Self { context, dispatcher }
    }

    /// Binds the three role-fixed listeners (spec §4.1/§6) and returns a
    /// handle. Declared agents/services in the config only ever contribute a
    /// manifest hint (SPEC_FULL.md A.3); they still have to connect and send
    /// `*.register` before they are reachable, so binding does not touch the
    /// peer registries.
    pub async fn start(self, config: &OrchestratorConfig) -> Result<OrchestratorHandle> {
        let bind = |port: u16| SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);

        let agent_listener = PeerListener::bind(
            PeerKind::Agent,
            bind(config.agent_port),
            self.context.clone(),
            self.dispatcher.clone(),
        )
        .await?;
        let client_listener = PeerListener::bind(
            PeerKind::Client,
            bind(config.client_port),
            self.context.clone(),
            self.dispatcher.clone(),
        )
        .await?;
        let service_listener = PeerListener::bind(
            PeerKind::Service,
            bind(config.service_port),
            self.context.clone(),
            self.dispatcher.clone(),
        )
        .await?;

        info!(
            "orchestrator listening: agents={}, clients={}, services={}",
            agent_listener.local_addr()?,
            client_listener.local_addr()?,
            service_listener.local_addr()?,
        );

        let listeners = vec![
            agent_listener.start(),
            client_listener.start(),
            service_listener.start(),
        ];

        // The router event loop is already running (spawned in `new`); this
        // handle merely remembers a no-op join target so `join`/`stop` have a
        // uniform shape regardless of when the loop was started.
        let router_task = tokio::spawn(std::future::pending());

        Ok(OrchestratorHandle {
            context: self.context,
            dispatcher: self.dispatcher,
            listeners,
            router_task,
        })
    }
}

impl OrchestratorHandle {
    /// Opens an in-process connection to one of the three roles without a
    /// real TCP socket, for tests (SPEC_FULL.md B.2). Mirrors the teacher's
    /// `RouterHandle::direct_connect`, generalized to the orchestrator's
    /// three role-fixed endpoints instead of one realm-scoped port.
    pub async fn direct_connect(&self, role: PeerKind) -> crate::transport::direct::DirectSocket {
        let (orchestrator_side, peer_side) = direct_socket_pair();
        connection::accept(role, Box::new(orchestrator_side), self.context.clone(), self.dispatcher.clone()).await;
        peer_side
    }

    pub fn local_addr(&self, role: PeerKind) -> Option<SocketAddr> {
        self.listeners.iter().find(|l| l.role == role).map(|l| l.local_addr)
    }

    /// Shared state, exposed for tests that want to assert on registry/task
    /// contents directly rather than only through wire replies.
    pub fn context(&self) -> &Arc<RouterContext> {
        &self.context
    }

    /// Graceful shutdown (spec §5): stop accepting new connections, reject
    /// every outstanding correlation entry, disconnect every MCP server, then
    /// terminate every live connection.
    pub async fn stop(self) -> Result<()> {
        for listener in &self.listeners {
            listener.cancel()?;
        }
        self.context.correlation.reject_all_for_shutdown().await;
        for server in self.context.mcp.list().await {
            let _ = self.context.mcp.disconnect(server.id).await;
        }
        self.context.cancel_all_connections().await;
        for listener in self.listeners {
            listener.join().await?;
        }
        self.router_task.abort();
        Ok(())
    }

    pub async fn join(self) -> Result<()> {
        self.router_task.await.map_err(Error::new)
    }
}

/// A client-side convenience used only by tests and the `direct_connect`
/// path above: builds the `task.create` envelope content shape spec §4.5
/// documents.
pub fn task_create_content(agent_name: &str, task_data: serde_json::Value) -> serde_json::Value {
    json!({ "agentName": agent_name, "taskData": task_data })
}
