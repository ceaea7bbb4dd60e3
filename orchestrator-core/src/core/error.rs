use thiserror::Error;

use crate::core::id::Id;

/// The error taxonomy from spec §7, surfaced in `content.error` of a wire `error`
/// reply.
///
/// Mirrors the teacher's split between `BasicError` and `InteractionError`: each
/// variant owns a short `kind()` string (the wire-stable error code) separate from
/// its human-readable `Display` message, so clients can match on `kind` without
/// parsing prose.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// Malformed JSON, missing `type`, unknown type, unsupported envelope field.
    #[error("{0}")]
    Protocol(String),
    /// Target peer not found, target offline, duplicate registration name.
    #[error("{0}")]
    Routing(String),
    /// Response timeout, waiter cancelled, server stopped.
    #[error("{0}")]
    Correlation(String),
    /// Unknown task id, terminal-state task mutation attempted.
    #[error("{0}")]
    Task(String),
    /// Server not connected, tool not found, child process crashed, initialize
    /// handshake failed.
    #[error("{0}")]
    Mcp(String),
    /// Connection closed during send.
    #[error("{0}")]
    Resource(String),
}

impl OrchestratorError {
    /// The trailing wire error kind, stable across versions.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Protocol(_) => "protocol",
            Self::Routing(_) => "routing",
            Self::Correlation(_) => "correlation",
            Self::Task(_) => "task",
            Self::Mcp(_) => "mcp",
            Self::Resource(_) => "resource",
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn routing(message: impl Into<String>) -> Self {
        Self::Routing(message.into())
    }

    pub fn correlation(message: impl Into<String>) -> Self {
        Self::Correlation(message.into())
    }

    pub fn task(message: impl Into<String>) -> Self {
        Self::Task(message.into())
    }

    pub fn mcp(message: impl Into<String>) -> Self {
        Self::Mcp(message.into())
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource(message.into())
    }

    pub fn agent_not_found(name: &str) -> Self {
        Self::routing(format!("Agent not found: {name}"))
    }

    pub fn service_not_found(name: &str) -> Self {
        Self::routing(format!("Service not found: {name}"))
    }

    pub fn unknown_task(id: Id) -> Self {
        Self::task(format!("Unknown task id: {id}"))
    }

    pub fn terminal_task(id: Id) -> Self {
        Self::task(format!("Task {id} is already in a terminal state"))
    }

    /// Builds the `content` payload for a wire `error` reply.
    pub fn to_content(&self) -> serde_json::Value {
        serde_json::json!({
            "error": {
                "kind": self.kind(),
                "message": self.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        let err = OrchestratorError::agent_not_found("A1");
        assert_eq!(err.kind(), "routing");
        assert_eq!(err.to_string(), "Agent not found: A1");
    }
}
