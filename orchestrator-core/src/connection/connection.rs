use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
};
use log::{
    debug,
    error,
};
use serde_json::Value;
use tokio::{
    sync::{
        broadcast,
        mpsc::{
            unbounded_channel,
            UnboundedReceiver,
            UnboundedSender,
        },
    },
    task::JoinHandle,
};

use std::sync::Arc;

use serde_json::json;

use crate::{
    core::id::Id,
    dispatch::{
        DispatchEvent,
        Dispatcher,
        DISCONNECT_EVENT_TYPE,
    },
    envelope::Envelope,
    registry::PeerKind,
    router::RouterContext,
    transport::socket::{
        Frame,
        Socket,
    },
};

/// A handle to an asynchronously-running [`Connection`] (spec §2, grounded on
/// the teacher's `ServiceHandle`).
pub struct ConnectionHandle {
    pub id: Id,
    pub role: PeerKind,
    outbound_tx: UnboundedSender<Envelope>,
    cancel_tx: broadcast::Sender<()>,
    start_handle: JoinHandle<()>,
}

impl ConnectionHandle {
    /// Enqueues an envelope for delivery to this connection. Outbound frames
    /// to one connection are sent in submission order (spec §4.8).
    pub fn send(&self, envelope: Envelope) -> Result<()> {
        self.outbound_tx
            .send(envelope)
            .map_err(|_| Error::msg("connection outbound channel closed"))
    }

    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    pub async fn join(self) -> Result<()> {
        self.start_handle.await.map_err(Error::new)
    }
}

/// Pumps one WebSocket (or direct, in tests) connection: inbound frames are
/// parsed into envelopes and emitted to the dispatcher; outbound envelopes
/// queued on the handle are written to the socket in order. Grounded on the
/// teacher's `core::service::Service`.
pub struct Connection {
    id: Id,
    role: PeerKind,
    socket: Box<dyn Socket>,
    dispatcher: Dispatcher,
    outbound_tx: UnboundedSender<Envelope>,
    outbound_rx: UnboundedReceiver<Envelope>,
    cancel_tx: broadcast::Sender<()>,
    cancel_rx: broadcast::Receiver<()>,
}

impl Connection {
    pub fn new(id: Id, role: PeerKind, socket: Box<dyn Socket>, dispatcher: Dispatcher) -> Self {
        let (outbound_tx, outbound_rx) = unbounded_channel();
        let (cancel_tx, cancel_rx) = broadcast::channel(1);
        Self {
            id,
            role,
            socket,
            dispatcher,
            outbound_tx,
            outbound_rx,
            cancel_tx,
            cancel_rx,
        }
    }

    /// Spawns the connection's pump loop and returns a handle to it.
    pub fn start(self) -> ConnectionHandle {
        let id = self.id;
        let role = self.role;
        let outbound_tx = self.outbound_tx.clone();
        let cancel_tx = self.cancel_tx.clone();
        let start_handle = tokio::spawn(self.run());
        ConnectionHandle {
            id,
            role,
            outbound_tx,
            cancel_tx,
            start_handle,
        }
    }

    async fn run(mut self) {
        debug!("{} connection {} started", self.role.as_str(), self.id);
        if let Err(err) = self.pump().await {
            error!("{} connection {} ended with error: {err}", self.role.as_str(), self.id);
        }
        let _ = self.dispatcher.emit(DispatchEvent {
            role: self.role,
            connection_id: self.id,
            envelope: Envelope::new(DISCONNECT_EVENT_TYPE, Value::Null),
        });
        let _ = self.socket.close().await;
        debug!("{} connection {} closed", self.role.as_str(), self.id);
    }

    async fn pump(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                frame = self.socket.next() => {
                    match frame {
                        Some(Ok(Frame::Ping(data))) => {
                            self.socket.send(Frame::Ping(data)).await?;
                        }
                        Some(Ok(Frame::Text(text))) => {
                            match Envelope::parse(&text) {
                                Ok(envelope) => {
                                    self.dispatcher.emit(DispatchEvent {
                                        role: self.role,
                                        connection_id: self.id,
                                        envelope,
                                    })?;
                                }
                                Err((id, err)) => {
                                    let mut reply = Envelope::new("error", err.to_content());
                                    reply.request_id = Some(id);
                                    self.socket.send(Frame::Text(reply.to_json())).await?;
                                }
                            }
                        }
                        Some(Err(err)) => return Err(err),
                        None => return Ok(()),
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(envelope) => {
                            self.socket.send(Frame::Text(envelope.to_json())).await?;
                        }
                        None => return Ok(()),
                    }
                }
                _ = self.cancel_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }
}

/// Starts pumping a freshly-accepted socket and performs the role-specific
/// connection-establishment step (spec §4.1): clients are welcomed
/// immediately (no explicit registration handshake), agents and services are
/// parked in their registry's pending bucket until they send `*.register`.
///
/// Shared between the real TCP accept loop ([`crate::listener::PeerListener`])
/// and in-process direct connections used by tests, the same way the
/// teacher's `Router::start_connection_over_stream` backs both its TCP accept
/// path and `Router::direct_connect`.
pub async fn accept(role: PeerKind, socket: Box<dyn Socket>, context: Arc<RouterContext>, dispatcher: Dispatcher) -> Id {
    let connection_id = Id::new();
    let connection = Connection::new(connection_id, role, socket, dispatcher);
    let handle = connection.start();

    context.register_connection(connection_id, handle).await;

    if role == PeerKind::Client {
        let mut clients = context.clients.lock().await;
        if let Err(err) = clients.register(
            connection_id,
            connection_id,
            connection_id.to_string(),
            PeerKind::Client,
            Default::default(),
            serde_json::Value::Null,
        ) {
            error!("failed to implicitly register client {connection_id}: {err}");
            return connection_id;
        }
        drop(clients);
        let welcome = Envelope::new(
            "orchestrator.welcome",
            json!({ "clientId": connection_id, "message": "welcome" }),
        );
        if let Err(err) = context.send_to_connection(connection_id, welcome).await {
            error!("failed to send orchestrator.welcome to {connection_id}: {err}");
        }
    } else {
        context.registry_for(role).lock().await.add_pending(connection_id);
    }

    connection_id
}
