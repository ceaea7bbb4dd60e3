use std::{
    net::SocketAddr,
    sync::Arc,
};

use anyhow::{
    Error,
    Result,
};
use log::{
    debug,
    error,
    info,
};
use tokio::{
    net::{
        TcpListener,
        TcpStream,
    },
    sync::broadcast,
    task::JoinHandle,
};

use crate::{
    dispatch::Dispatcher,
    registry::PeerKind,
    router::RouterContext,
};

/// One TCP listener bound to a single role's port (spec §4.1: agents,
/// services, and clients connect on distinct ports). Grounded on the
/// teacher's `Router::connection_loop` / `handle_connection` accept loop,
/// generalized from one shared port + acceptor-negotiated serializer to three
/// role-fixed ports with a single WebSocket upgrade.
pub struct PeerListener {
    role: PeerKind,
    listener: TcpListener,
    context: Arc<RouterContext>,
    dispatcher: Dispatcher,
    cancel_tx: broadcast::Sender<()>,
}

/// A handle to a running [`PeerListener`].
pub struct ListenerHandle {
    pub role: PeerKind,
    pub local_addr: SocketAddr,
    cancel_tx: broadcast::Sender<()>,
    join_handle: JoinHandle<()>,
}

impl ListenerHandle {
    pub fn cancel(&self) -> Result<()> {
        self.cancel_tx.send(()).map(|_| ()).map_err(Error::new)
    }

    pub async fn join(self) -> Result<()> {
        self.join_handle.await.map_err(Error::new)
    }
}

impl PeerListener {
    pub async fn bind(
        role: PeerKind,
        addr: SocketAddr,
        context: Arc<RouterContext>,
        dispatcher: Dispatcher,
    ) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (cancel_tx, _) = broadcast::channel(1);
        Ok(Self {
            role,
            listener,
            context,
            dispatcher,
            cancel_tx,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().map_err(Error::new)
    }

    pub fn start(self) -> ListenerHandle {
        let role = self.role;
        let local_addr = self.local_addr().expect("bound listener has a local address");
        let cancel_tx = self.cancel_tx.clone();
        let join_handle = tokio::spawn(self.accept_loop());
        ListenerHandle {
            role,
            local_addr,
            cancel_tx,
            join_handle,
        }
    }

    async fn accept_loop(self) {
        let mut cancel_rx = self.cancel_tx.subscribe();
        info!("{} listener started on {}", self.role.as_str(), self.listener.local_addr().map_or_else(|_| "?".into(), |a| a.to_string()));
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            tokio::spawn(Self::handle_connection(
                                self.role,
                                stream,
                                addr,
                                self.context.clone(),
                                self.dispatcher.clone(),
                            ));
                        }
                        Err(err) => {
                            error!("{} listener accept error: {err}", self.role.as_str());
                        }
                    }
                }
                _ = cancel_rx.recv() => {
                    break;
                }
            }
        }
        debug!("{} listener stopped", self.role.as_str());
    }

    async fn handle_connection(
        role: PeerKind,
        stream: TcpStream,
        addr: SocketAddr,
        context: Arc<RouterContext>,
        dispatcher: Dispatcher,
    ) {
        debug!("incoming {} TCP connection from {addr}", role.as_str());
        let websocket_stream = match tokio_tungstenite::accept_async(stream).await {
            Ok(stream) => stream,
            Err(err) => {
                error!("WebSocket handshake failed for {addr}: {err}");
                return;
            }
        };

        let socket = Box::new(crate::transport::websocket::WebSocketSocket::new(websocket_stream));
        crate::connection::accept(role, socket, context, dispatcher).await;
    }
}
