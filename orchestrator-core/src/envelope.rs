use serde::{
    Deserialize,
    Serialize,
};
use serde_json::Value;

use crate::core::{
    error::OrchestratorError,
    id::Id,
    time::{
        now,
        Timestamp,
    },
};

/// The wire envelope shared by all three connection roles (spec §6):
///
/// ```json
/// { "id": "...", "type": "...", "timestamp": "...", "requestId": "...", "content": {} }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub id: Id,
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "requestId")]
    pub request_id: Option<Id>,
    #[serde(default)]
    pub content: Value,
}

impl Envelope {
    /// Builds a new envelope of the given type, generating a fresh id and stamping
    /// the current time. Used for orchestrator-originated frames (forwards,
    /// replies, notifications).
    pub fn new(message_type: impl Into<String>, content: Value) -> Self {
        Self {
            id: Id::new(),
            message_type: message_type.into(),
            timestamp: Some(now()),
            request_id: None,
            content,
        }
    }

    /// Builds a reply envelope whose `requestId` echoes this envelope's `id`, as
    /// spec §6 requires of all responses.
    pub fn reply(&self, message_type: impl Into<String>, content: Value) -> Self {
        let mut reply = Self::new(message_type, content);
        reply.request_id = Some(self.id);
        reply
    }

    /// Builds an `error` reply referencing this envelope's id, per spec §4.5 /
    /// §7.
    pub fn error_reply(&self, error: &OrchestratorError) -> Self {
        self.reply("error", error.to_content())
    }

    /// Parses a raw inbound text frame into an envelope.
    ///
    /// A missing or non-string `type` field is reported as `OrchestratorError::Protocol`
    /// attached to whatever `id` the frame does carry (or a fresh one, if even that
    /// is missing) so the endpoint can still send back a referenceable `error` reply
    /// (spec §4.1).
    pub fn parse(raw: &str) -> Result<Self, (Id, OrchestratorError)> {
        let value: Value = serde_json::from_str(raw).map_err(|err| {
            (Id::new(), OrchestratorError::protocol(format!("malformed JSON: {err}")))
        })?;

        let id = value
            .get("id")
            .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok())
            .unwrap_or_default();

        let message_type = match value.get("type").and_then(Value::as_str) {
            Some(t) if !t.is_empty() => t.to_owned(),
            _ => {
                return Err((
                    id,
                    OrchestratorError::protocol("envelope is missing a \"type\" field"),
                ))
            }
        };

        let timestamp = value
            .get("timestamp")
            .and_then(|v| serde_json::from_value::<Timestamp>(v.clone()).ok());
        let request_id = value
            .get("requestId")
            .and_then(|v| serde_json::from_value::<Id>(v.clone()).ok());
        let content = value.get("content").cloned().unwrap_or(Value::Null);

        Ok(Self {
            id,
            message_type,
            timestamp,
            request_id,
            content,
        })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("envelope is always serializable")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_envelope() {
        let raw = r#"{"id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","type":"ping","content":{}}"#;
        let envelope = Envelope::parse(raw).unwrap();
        assert_eq!(envelope.message_type, "ping");
        assert!(envelope.request_id.is_none());
    }

    #[test]
    fn rejects_missing_type() {
        let raw = r#"{"id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","content":{}}"#;
        let (_, err) = Envelope::parse(raw).unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn reply_echoes_request_id() {
        let original = Envelope::new("task.create", serde_json::json!({}));
        let reply = original.reply("task.result", serde_json::json!({"ok": true}));
        assert_eq!(reply.request_id, Some(original.id));
    }
}
