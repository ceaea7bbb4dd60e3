use std::collections::BTreeSet;

use serde_json::{
    json,
    Value,
};

use crate::{
    core::{
        error::OrchestratorError,
        id::Id,
    },
    envelope::Envelope,
    registry::PeerKind,
    router::context::RouterContext,
};

/// Handles `agent.register` / `service.register` (spec §4.5). Client
/// registration is implicit on connect (spec §4.5: "Clients receive an
/// `orchestrator.welcome` frame immediately after socket open") and is
/// performed by the listener, not here.
pub async fn handle_register(
    context: &RouterContext,
    kind: PeerKind,
    connection_id: Id,
    envelope: &Envelope,
) -> Envelope {
    let content = &envelope.content;

    let name = match content.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => name.to_owned(),
        _ => {
            return envelope
                .error_reply(&OrchestratorError::protocol("registration requires a non-empty \"name\""))
        }
    };

    let id = content
        .get("id")
        .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok())
        .unwrap_or_default();

    let capabilities: BTreeSet<String> = content
        .get("capabilities")
        .and_then(Value::as_array)
        .map(|values| values.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    let manifest = content.get("manifest").cloned().unwrap_or(Value::Null);

    let mut registry = context.registry_for(kind).lock().await;
    match registry.register(connection_id, id, name.clone(), kind, capabilities, manifest) {
        Ok(id) => envelope.reply(
            format!("{}.registered", kind.as_str()),
            json!({
                "id": id,
                "name": name,
                "welcome": { "message": format!("welcome, {name}") },
            }),
        ),
        Err(err) => {
            let orchestrator_err = err
                .downcast::<OrchestratorError>()
                .unwrap_or_else(|err| OrchestratorError::routing(err.to_string()));
            envelope.error_reply(&orchestrator_err)
        }
    }
}

/// Handles `agent.deregister` / `service.deregister` (SPEC_FULL.md B.4): an
/// explicit request to remove a peer record outright, rather than the
/// implicit mark-offline-on-disconnect path.
pub async fn handle_deregister(context: &RouterContext, kind: PeerKind, connection_id: Id, envelope: &Envelope) -> Envelope {
    let mut registry = context.registry_for(kind).lock().await;
    let Some(peer_id) = registry.by_connection_id(connection_id).map(|peer| peer.id) else {
        return envelope.error_reply(&OrchestratorError::routing("no registered peer on this connection"));
    };
    registry.deregister(peer_id);
    envelope.reply(format!("{}.deregistered", kind.as_str()), json!({ "id": peer_id }))
}
