use std::{
    sync::Arc,
    time::Duration,
};

use tokio::sync::{
    oneshot,
    Mutex,
};

use crate::{
    core::{
        error::OrchestratorError,
        hash::HashMap,
        id::Id,
    },
    envelope::Envelope,
};

/// Default correlated-wait timeout (spec §4.3).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub type CorrelationResult = Result<Envelope, OrchestratorError>;

/// Options attached to an outstanding correlated request (spec §4.3).
#[derive(Debug, Clone)]
pub struct CorrelationOptions {
    pub timeout: Duration,
    /// The router resolves the waiter only when a message of this type arrives,
    /// rather than requiring `requestId` to match the id this entry was
    /// registered under.
    pub custom_event: Option<String>,
    /// Accept any request id as long as the message type matches `custom_event`,
    /// used when the downstream peer echoes a fresh id rather than the one we
    /// sent (spec §4.3).
    pub any_message_id: bool,
}

impl Default for CorrelationOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            custom_event: None,
            any_message_id: false,
        }
    }
}

struct CorrelationEntry {
    resolver: Option<oneshot::Sender<CorrelationResult>>,
    custom_event: Option<String>,
    any_message_id: bool,
}

/// Maps outstanding request ids to one-shot waiters (spec §4.3).
///
/// Entries are independent: resolving or rejecting one never touches another,
/// matching the testable property in spec §8 ("exactly one of {response
/// received, deadline expires, shutdown} resolves E").
#[derive(Clone)]
pub struct CorrelationTable {
    entries: Arc<Mutex<HashMap<Id, CorrelationEntry>>>,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::default())),
        }
    }
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new waiter keyed by `request_id` (the id the caller is about
    /// to send out on the wire). Returns a receiver that resolves exactly once:
    /// on a matching reply, on timeout, on explicit cancellation, or on
    /// shutdown.
    pub async fn register(
        &self,
        request_id: Id,
        options: CorrelationOptions,
    ) -> oneshot::Receiver<CorrelationResult> {
        let (tx, rx) = oneshot::channel();
        {
            let mut entries = self.entries.lock().await;
            entries.insert(
                request_id,
                CorrelationEntry {
                    resolver: Some(tx),
                    custom_event: options.custom_event.clone(),
                    any_message_id: options.any_message_id,
                },
            );
        }

        let entries = self.entries.clone();
        let timeout = options.timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let mut entries = entries.lock().await;
            if let Some(mut entry) = entries.remove(&request_id) {
                if let Some(resolver) = entry.resolver.take() {
                    let _ = resolver.send(Err(OrchestratorError::correlation(format!(
                        "request {request_id} timed out after {timeout:?}"
                    ))));
                }
            }
        });

        rx
    }

    /// Attempts to resolve a waiter with an inbound envelope. Returns `true` if
    /// some entry was resolved (and thus removed).
    ///
    /// Exact `requestId` matches take priority; failing that, entries configured
    /// with `any_message_id` are matched purely by `custom_event` type. Insertion
    /// order is not guaranteed since the underlying map is unordered, which is
    /// acceptable because in practice at most one `any_message_id` waiter is
    /// outstanding per message type at a time (spec §4.5's `childagent.response`
    /// flow registers exactly one).
    pub async fn try_resolve(&self, envelope: &Envelope) -> bool {
        let mut entries = self.entries.lock().await;

        if let Some(request_id) = envelope.request_id {
            if let Some(entry) = entries.get(&request_id) {
                let type_ok = entry
                    .custom_event
                    .as_deref()
                    .map(|expected| expected == envelope.message_type)
                    .unwrap_or(true);
                if type_ok {
                    if let Some(mut entry) = entries.remove(&request_id) {
                        if let Some(resolver) = entry.resolver.take() {
                            let _ = resolver.send(Ok(envelope.clone()));
                        }
                        return true;
                    }
                }
            }
        }

        let any_id_match = entries
            .iter()
            .find(|(_, entry)| {
                entry.any_message_id
                    && entry
                        .custom_event
                        .as_deref()
                        .map(|expected| expected == envelope.message_type)
                        .unwrap_or(false)
            })
            .map(|(id, _)| *id);

        if let Some(id) = any_id_match {
            if let Some(mut entry) = entries.remove(&id) {
                if let Some(resolver) = entry.resolver.take() {
                    let _ = resolver.send(Ok(envelope.clone()));
                }
                return true;
            }
        }

        false
    }

    /// Explicitly cancels a waiter (spec §4.3).
    pub async fn cancel(&self, request_id: Id) {
        let mut entries = self.entries.lock().await;
        if let Some(mut entry) = entries.remove(&request_id) {
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(Err(OrchestratorError::correlation("waiter cancelled")));
            }
        }
    }

    /// Rejects every outstanding waiter with "Server stopped" (spec §5 shutdown).
    pub async fn reject_all_for_shutdown(&self) {
        let mut entries = self.entries.lock().await;
        for (_, mut entry) in entries.drain() {
            if let Some(resolver) = entry.resolver.take() {
                let _ = resolver.send(Err(OrchestratorError::correlation("Server stopped")));
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn resolves_on_matching_request_id() {
        let table = CorrelationTable::new();
        let request_id = Id::new();
        let rx = table.register(request_id, CorrelationOptions::default()).await;

        let reply = Envelope {
            id: Id::new(),
            message_type: "task.result".to_owned(),
            timestamp: None,
            request_id: Some(request_id),
            content: json!({}),
        };
        assert!(table.try_resolve(&reply).await);
        let outcome = rx.await.unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn times_out_when_no_reply_arrives() {
        let table = CorrelationTable::new();
        let request_id = Id::new();
        let rx = table
            .register(
                request_id,
                CorrelationOptions {
                    timeout: Duration::from_millis(20),
                    ..Default::default()
                },
            )
            .await;
        let outcome = rx.await.unwrap();
        assert!(outcome.is_err());
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn any_message_id_matches_by_type_only() {
        let table = CorrelationTable::new();
        let request_id = Id::new();
        let rx = table
            .register(
                request_id,
                CorrelationOptions {
                    timeout: DEFAULT_TIMEOUT,
                    custom_event: Some("childagent.response".to_owned()),
                    any_message_id: true,
                },
            )
            .await;

        let reply = Envelope {
            id: Id::new(),
            message_type: "childagent.response".to_owned(),
            timestamp: None,
            request_id: Some(Id::new()), // a fresh, unrelated id
            content: json!({"ok": true}),
        };
        assert!(table.try_resolve(&reply).await);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn shutdown_rejects_all_outstanding_waiters() {
        let table = CorrelationTable::new();
        let rx1 = table.register(Id::new(), CorrelationOptions::default()).await;
        let rx2 = table.register(Id::new(), CorrelationOptions::default()).await;
        table.reject_all_for_shutdown().await;
        assert!(rx1.await.unwrap().is_err());
        assert!(rx2.await.unwrap().is_err());
    }
}
