use std::collections::BTreeSet;

use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use crate::core::{
    id::Id,
    time::Timestamp,
};

/// Which of the three peer classes a registry holds (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerKind {
    Agent,
    Service,
    Client,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::Service => "service",
            Self::Client => "client",
        }
    }
}

/// Peer status (spec §3, state machine in §4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerStatus {
    Registered,
    Online,
    Offline,
    Busy,
    Error,
}

impl PeerStatus {
    /// Whether `next` is a legal transition from `self`, per the state machine in
    /// spec §4.7. `offline -> registered` is explicitly not used; the record is
    /// retained instead of reverting.
    pub fn allowed_transition(&self, next: PeerStatus) -> bool {
        use PeerStatus::*;
        match (*self, next) {
            (a, b) if a == b => true,
            (Registered, Online) => true,
            (Online, Offline) => true,
            (Online, Busy) => true,
            (Online, Error) => true,
            (Busy, Online) => true,
            (Busy, Offline) => true,
            (Busy, Error) => true,
            (Error, Online) => true,
            (Error, Offline) => true,
            (Offline, Online) => true,
            _ => false,
        }
    }
}

/// A long-lived logical identity bound at runtime to at most one connection
/// (spec §3).
#[derive(Debug, Clone, Serialize)]
pub struct PeerRecord {
    pub id: Id,
    pub name: String,
    pub kind: PeerKind,
    #[serde(serialize_with = "serialize_capability_set")]
    pub capabilities: BTreeSet<String>,
    pub status: PeerStatus,
    pub registered_at: Timestamp,
    pub manifest: Value,
    pub connection_id: Option<Id>,
}

fn serialize_capability_set<S>(caps: &BTreeSet<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    use serde::ser::SerializeSeq;
    let mut seq = serializer.serialize_seq(Some(caps.len()))?;
    for cap in caps {
        seq.serialize_element(cap)?;
    }
    seq.end()
}

impl PeerRecord {
    pub fn new(
        id: Id,
        name: String,
        kind: PeerKind,
        capabilities: BTreeSet<String>,
        manifest: Value,
        registered_at: Timestamp,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            capabilities,
            status: PeerStatus::Registered,
            registered_at,
            manifest,
            connection_id: None,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }

    pub fn is_reachable(&self) -> bool {
        matches!(self.status, PeerStatus::Online | PeerStatus::Busy)
    }
}

/// Filters accepted by `*.list.request` handlers (spec §4.2/§4.5): ANDed,
/// unknown keys ignored by the caller that builds this struct from wire content.
#[derive(Debug, Clone, Default)]
pub struct PeerListFilters {
    pub status: Option<PeerStatus>,
    pub capability: Option<String>,
    pub name_contains: Option<String>,
}

impl PeerListFilters {
    pub fn matches(&self, peer: &PeerRecord) -> bool {
        if let Some(status) = self.status {
            if peer.status != status {
                return false;
            }
        }
        if let Some(capability) = &self.capability {
            if !peer.has_capability(capability) {
                return false;
            }
        }
        if let Some(needle) = &self.name_contains {
            if !peer.name.to_lowercase().contains(&needle.to_lowercase()) {
                return false;
            }
        }
        true
    }
}
