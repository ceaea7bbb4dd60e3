use anyhow::Result;
use tokio::sync::mpsc;

use crate::{
    core::{
        error::OrchestratorError,
        id::Id,
    },
    envelope::Envelope,
    registry::PeerKind,
};

/// Internal message type used to signal a connection's closure to the router;
/// never sent over the wire (spec §4.1 disconnection handling).
pub const DISCONNECT_EVENT_TYPE: &str = "$internal.disconnect";

/// One inbound frame, decoded and enriched with its originating connection
/// (spec §2: "network layers translate inbound frames into dispatcher events
/// keyed by message type and enrich each event with the originating
/// connection id").
#[derive(Debug, Clone)]
pub struct DispatchEvent {
    pub role: PeerKind,
    pub connection_id: Id,
    pub envelope: Envelope,
}

/// Decouples the network layer from the router (spec §2). Connections emit
/// events here; a single router task drains them in order.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<DispatchEvent>,
}

impl Dispatcher {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: DispatchEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| OrchestratorError::resource("dispatcher has shut down").into())
    }
}
