//! Event Bus
//!
//! Broadcast stream every host publishes onto. Receivers filter envelopes by
//! publisher; publishing never waits and never fails for lack of receivers.

use std::sync::atomic::{AtomicU64, Ordering};

use plugin_types::AgentEvent;
use tokio::sync::broadcast;

/// An event tagged with the agent that published it
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub publisher: String,
    pub event: AgentEvent,
}

pub struct EventBus {
    tx: broadcast::Sender<EventEnvelope>,
    published: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            published: AtomicU64::new(0),
        }
    }

    /// Publish an event; returns the number of receivers it reached
    pub fn publish(&self, publisher: impl Into<String>, event: AgentEvent) -> usize {
        let envelope = EventEnvelope {
            publisher: publisher.into(),
            event,
        };
        tracing::trace!(
            publisher = %envelope.publisher,
            event_type = %envelope.event.event_type,
            "Publishing event"
        );
        self.published.fetch_add(1, Ordering::Relaxed);
        // No receivers is fine
        self.tx.send(envelope).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Total events published since creation
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receivers", &self.receiver_count())
            .field("published", &self.published())
            .finish()
    }
}
