//! Correlation Hub
//!
//! Pending request/response pairs keyed by correlation id.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;

#[derive(Default)]
pub struct CorrelationHub {
    pending: DashMap<String, oneshot::Sender<Value>>,
}

impl CorrelationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh correlation id
    pub fn next_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Start waiting for a response; a previous waiter on the same id is dropped
    pub fn register(&self, correlation_id: impl Into<String>) -> oneshot::Receiver<Value> {
        let (tx, rx) = oneshot::channel();
        self.pending.insert(correlation_id.into(), tx);
        rx
    }

    /// Complete a pending request; false if nobody is waiting
    pub fn respond(&self, correlation_id: &str, response: Value) -> bool {
        match self.pending.remove(correlation_id) {
            Some((_, tx)) => tx.send(response).is_ok(),
            None => {
                tracing::debug!(
                    correlation_id = %correlation_id,
                    "No pending request for response"
                );
                false
            }
        }
    }

    /// Stop waiting for a response
    pub fn cancel(&self, correlation_id: &str) -> bool {
        self.pending.remove(correlation_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl std::fmt::Debug for CorrelationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CorrelationHub")
            .field("pending", &self.pending.len())
            .finish()
    }
}
