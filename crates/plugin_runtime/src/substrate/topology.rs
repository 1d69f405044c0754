//! Agent Topology
//!
//! Child registrations and event subscriptions between agents. Both are set
//! valued, so repeating an entry changes nothing.

use dashmap::{DashMap, DashSet};

#[derive(Debug, Default)]
pub struct Topology {
    /// Parent → registered children
    children: DashMap<String, DashSet<String>>,
    /// Subscriber → publishers it listens to
    subscriptions: DashMap<String, DashSet<String>>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_children(&self, parent: &str, agent_ids: &[String]) {
        let set = self.children.entry(parent.to_string()).or_default();
        for id in agent_ids {
            set.insert(id.clone());
        }
    }

    pub fn subscribe(&self, subscriber: &str, publishers: &[String]) {
        let set = self.subscriptions.entry(subscriber.to_string()).or_default();
        for id in publishers {
            set.insert(id.clone());
        }
    }

    pub fn is_subscribed(&self, subscriber: &str, publisher: &str) -> bool {
        self.subscriptions
            .get(subscriber)
            .is_some_and(|set| set.contains(publisher))
    }

    /// Sorted children of an agent
    pub fn children(&self, parent: &str) -> Vec<String> {
        sorted(self.children.get(parent).map(|set| set.iter().map(|s| s.key().clone()).collect()))
    }

    /// Sorted publishers an agent is subscribed to
    pub fn subscriptions(&self, subscriber: &str) -> Vec<String> {
        sorted(
            self.subscriptions
                .get(subscriber)
                .map(|set| set.iter().map(|s| s.key().clone()).collect()),
        )
    }

    /// Forget everything an agent registered or subscribed to
    pub fn remove_agent(&self, agent_id: &str) {
        self.children.remove(agent_id);
        self.subscriptions.remove(agent_id);
    }
}

fn sorted(ids: Option<Vec<String>>) -> Vec<String> {
    let mut ids = ids.unwrap_or_default();
    ids.sort();
    ids
}
