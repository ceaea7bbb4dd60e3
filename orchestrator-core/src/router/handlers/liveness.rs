use log::warn;
use serde_json::Value;

use crate::{
    core::id::Id,
    envelope::Envelope,
    registry::{
        PeerKind,
        PeerStatus,
    },
    router::context::RouterContext,
};

/// Answers `ping` with `pong` carrying the same id (spec §4.5, "Liveness").
pub fn handle_ping(envelope: &Envelope) -> Envelope {
    envelope.reply("pong", Value::Null)
}

/// Handles unsolicited `agent.status` / `service.status`: updates the
/// registry, no reply (spec §4.5).
pub async fn handle_status_update(
    context: &RouterContext,
    kind: PeerKind,
    connection_id: Id,
    envelope: &Envelope,
) {
    let Some(status_str) = envelope.content.get("status").and_then(Value::as_str) else {
        warn!("{} missing \"status\"", envelope.message_type);
        return;
    };
    let status: Option<PeerStatus> = serde_json::from_value(Value::String(status_str.to_owned())).ok();
    let Some(status) = status else {
        warn!("{} carries an unrecognized status: {status_str}", envelope.message_type);
        return;
    };

    let mut registry = context.registry_for(kind).lock().await;
    let Some(peer_id) = registry.by_connection_id(connection_id).map(|peer| peer.id) else {
        warn!("{} from an unregistered connection", envelope.message_type);
        return;
    };
    if let Err(err) = registry.update_status(peer_id, status) {
        warn!("rejected {} transition to {status_str:?}: {err}", envelope.message_type);
    }
}
