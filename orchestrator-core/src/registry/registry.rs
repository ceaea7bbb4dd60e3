use anyhow::{
    Error,
    Result,
};
use log::debug;
use serde_json::Value;

use crate::{
    core::{
        error::OrchestratorError,
        hash::{
            HashMap,
            HashSet,
        },
        id::Id,
        time::now,
    },
    registry::peer::{
        PeerKind,
        PeerListFilters,
        PeerRecord,
        PeerStatus,
    },
};

/// The agent, service, and client registries (spec §4.2): identity, status,
/// capability, and connection <-> peer mapping for one peer class.
///
/// Ordering of [`PeerRegistry::list`] is insertion-stable, tracked with a
/// side vector of ids rather than relying on hash map iteration order.
pub struct PeerRegistry {
    kind: PeerKind,
    by_id: HashMap<Id, PeerRecord>,
    by_name: HashMap<String, Id>,
    by_connection_id: HashMap<Id, Id>,
    pending: HashSet<Id>,
    insertion_order: Vec<Id>,
}

impl PeerRegistry {
    pub fn new(kind: PeerKind) -> Self {
        Self {
            kind,
            by_id: HashMap::default(),
            by_name: HashMap::default(),
            by_connection_id: HashMap::default(),
            pending: HashSet::default(),
            insertion_order: Vec::new(),
        }
    }

    pub fn kind(&self) -> PeerKind {
        self.kind
    }

    /// Parks a newly-accepted connection that has not registered a peer identity
    /// yet (spec §4.1/§4.2).
    pub fn add_pending(&mut self, connection_id: Id) {
        self.pending.insert(connection_id);
    }

    /// Clears a connection from both the pending bucket and the peer->connection
    /// map, without touching the peer record itself (spec §4.1: "peer record
    /// kept, status -> offline").
    pub fn remove_connection(&mut self, connection_id: Id) -> Option<Id> {
        self.pending.remove(&connection_id);
        self.by_connection_id.remove(&connection_id)
    }

    /// Pre-populates an "expected identity" hint for a declared agent/service
    /// (SPEC_FULL.md A.3, config §6 `agents`/`services` maps), without a
    /// connection. The peer still has to connect and send `*.register`
    /// before it is reachable; a subsequent registration under the same name
    /// displaces this placeholder the same way a reconnection displaces an
    /// offline record, rather than being rejected as a name collision.
    pub fn declare_hint(&mut self, name: String, manifest: Value) -> Id {
        let id = Id::new();
        let record = PeerRecord::new(id, name.clone(), self.kind, Default::default(), manifest, now());
        self.by_id.insert(id, record);
        self.by_name.insert(name.to_lowercase(), id);
        self.insertion_order.push(id);
        id
    }

    /// Registers (or re-registers) a peer identity on a connection (spec §4.2).
    ///
    /// Rejects an empty name. Rejects a name already bound to a *different*,
    /// non-offline peer id. Reconnection with the same id rebinds the existing
    /// record without creating a duplicate; the freshest manifest always wins
    /// (SPEC_FULL.md B.3).
    pub fn register(
        &mut self,
        connection_id: Id,
        id: Id,
        name: String,
        kind: PeerKind,
        capabilities: std::collections::BTreeSet<String>,
        manifest: Value,
    ) -> Result<Id> {
        if name.trim().is_empty() {
            return Err(OrchestratorError::protocol("peer name must not be empty").into());
        }

        if let Some(&existing_id) = self.by_name.get(&name.to_lowercase()) {
            if existing_id != id {
                let existing = self
                    .by_id
                    .get(&existing_id)
                    .expect("by_name is kept in sync with by_id");
                // A never-connected declared hint (§SPEC_FULL.md A.3) displaces the
                // same as an offline peer: it's a placeholder, not a live identity.
                if existing.status != PeerStatus::Offline && existing.status != PeerStatus::Registered {
                    return Err(OrchestratorError::routing(format!(
                        "name {name} is already registered to a different peer"
                    ))
                    .into());
                }
                // The existing offline/declared peer is being displaced by a
                // different id reusing its name; that's a fresh registration, not
                // a reconnect.
                self.by_id.remove(&existing_id);
                self.insertion_order.retain(|existing| *existing != existing_id);
            }
        }

        self.pending.remove(&connection_id);

        match self.by_id.get_mut(&id) {
            Some(record) => {
                if record.manifest != manifest {
                    debug!(
                        "{} {id} reconnected with an updated manifest",
                        kind.as_str()
                    );
                }
                record.name = name.clone();
                record.capabilities = capabilities;
                record.manifest = manifest;
                record.connection_id = Some(connection_id);
                self.transition_status(id, PeerStatus::Online)?;
            }
            None => {
                let mut record =
                    PeerRecord::new(id, name.clone(), kind, capabilities, manifest, now());
                record.connection_id = Some(connection_id);
                record.status = PeerStatus::Online;
                self.by_id.insert(id, record);
                self.insertion_order.push(id);
            }
        }

        self.by_name.insert(name.to_lowercase(), id);
        self.by_connection_id.insert(connection_id, id);

        Ok(id)
    }

    pub fn by_id(&self, id: Id) -> Option<&PeerRecord> {
        self.by_id.get(&id)
    }

    pub fn by_name(&self, name: &str) -> Option<&PeerRecord> {
        self.by_name
            .get(&name.to_lowercase())
            .and_then(|id| self.by_id.get(id))
    }

    /// Resolves a target by id first, then by name, the way handlers that accept
    /// either an id or a human name do (spec §4.5, service resolution "by id or
    /// name").
    pub fn by_id_or_name(&self, reference: &str) -> Option<&PeerRecord> {
        if let Ok(uuid) = reference.parse::<uuid::Uuid>() {
            if let Some(record) = self.by_id(Id::from(uuid)) {
                return Some(record);
            }
        }
        self.by_name(reference)
    }

    pub fn by_connection_id(&self, connection_id: Id) -> Option<&PeerRecord> {
        self.by_connection_id
            .get(&connection_id)
            .and_then(|id| self.by_id.get(id))
    }

    pub fn update_status(&mut self, id: Id, status: PeerStatus) -> Result<()> {
        self.transition_status(id, status)
    }

    fn transition_status(&mut self, id: Id, status: PeerStatus) -> Result<()> {
        let record = self
            .by_id
            .get_mut(&id)
            .ok_or_else(|| Error::msg(format!("no such {} peer: {id}", self.kind.as_str())))?;
        if !record.status.allowed_transition(status) {
            return Err(OrchestratorError::protocol(format!(
                "invalid peer status transition from {:?} to {status:?}",
                record.status
            ))
            .into());
        }
        record.status = status;
        Ok(())
    }

    /// Marks the peer bound to `connection_id` offline, retaining the record for
    /// reconnection by id (spec §4.1).
    pub fn mark_offline_by_connection(&mut self, connection_id: Id) -> Option<Id> {
        let id = self.remove_connection(connection_id)?;
        let _ = self.transition_status(id, PeerStatus::Offline);
        Some(id)
    }

    /// Removes a peer outright (SPEC_FULL.md B.4: explicit deregistration).
    pub fn deregister(&mut self, id: Id) -> Option<PeerRecord> {
        let record = self.by_id.remove(&id)?;
        self.by_name.remove(&record.name.to_lowercase());
        if let Some(connection_id) = record.connection_id {
            self.by_connection_id.remove(&connection_id);
        }
        self.insertion_order.retain(|existing| *existing != id);
        Some(record)
    }

    /// Lists peers matching `filters`, in insertion order (spec §4.2).
    pub fn list(&self, filters: &PeerListFilters) -> Vec<&PeerRecord> {
        self.insertion_order
            .iter()
            .filter_map(|id| self.by_id.get(id))
            .filter(|peer| filters.matches(peer))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;

    fn caps(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn register_and_lookup_round_trip() {
        let mut registry = PeerRegistry::new(PeerKind::Agent);
        let connection_id = Id::new();
        let id = Id::new();
        registry
            .register(
                connection_id,
                id,
                "A1".to_owned(),
                PeerKind::Agent,
                caps(&["echo"]),
                Value::Null,
            )
            .unwrap();

        assert_eq!(registry.by_id(id).unwrap().status, PeerStatus::Online);
        assert_eq!(registry.by_name("a1").unwrap().id, id);
        assert_eq!(registry.by_connection_id(connection_id).unwrap().id, id);
    }

    #[test]
    fn rejects_empty_name() {
        let mut registry = PeerRegistry::new(PeerKind::Agent);
        let err = registry
            .register(Id::new(), Id::new(), "".to_owned(), PeerKind::Agent, caps(&[]), Value::Null)
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn rejects_duplicate_name_for_different_online_peer() {
        let mut registry = PeerRegistry::new(PeerKind::Agent);
        registry
            .register(Id::new(), Id::new(), "A1".to_owned(), PeerKind::Agent, caps(&[]), Value::Null)
            .unwrap();
        let err = registry
            .register(Id::new(), Id::new(), "A1".to_owned(), PeerKind::Agent, caps(&[]), Value::Null)
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn reconnect_with_same_id_rebinds_without_duplicate() {
        let mut registry = PeerRegistry::new(PeerKind::Agent);
        let id = Id::new();
        let conn1 = Id::new();
        registry
            .register(conn1, id, "A1".to_owned(), PeerKind::Agent, caps(&[]), Value::Null)
            .unwrap();
        registry.mark_offline_by_connection(conn1);
        assert_eq!(registry.by_id(id).unwrap().status, PeerStatus::Offline);

        let conn2 = Id::new();
        registry
            .register(conn2, id, "A1".to_owned(), PeerKind::Agent, caps(&[]), Value::Null)
            .unwrap();

        assert_eq!(registry.by_id(id).unwrap().status, PeerStatus::Online);
        assert_eq!(registry.list(&PeerListFilters::default()).len(), 1);
    }

    #[test]
    fn list_is_insertion_stable() {
        let mut registry = PeerRegistry::new(PeerKind::Agent);
        let ids: Vec<Id> = (0..3)
            .map(|i| {
                let id = Id::new();
                registry
                    .register(Id::new(), id, format!("A{i}"), PeerKind::Agent, caps(&[]), Value::Null)
                    .unwrap();
                id
            })
            .collect();
        let listed: Vec<Id> = registry
            .list(&PeerListFilters::default())
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(listed, ids);
    }
}
