use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::subscriber::{ConnectionId, Subscriber};

/// Store of the live connections held by this instance.
///
/// Add and remove come from many lifecycle tasks at once; dispatch never
/// iterates the map itself, it works on a [`snapshot`](Self::snapshot).
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    subscribers: Arc<DashMap<ConnectionId, Arc<Subscriber>>>,
}

impl SubscriberRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, subscriber: Arc<Subscriber>) {
        debug!(
            connection_id = %subscriber.id,
            module = %subscriber.module,
            team_id = %subscriber.team_id,
            user_id = %subscriber.user_id,
            "Subscriber added"
        );
        self.subscribers.insert(subscriber.id.clone(), subscriber);
    }

    /// Remove a connection. Removing an absent connection is a no-op.
    pub fn remove(&self, connection_id: &str) -> Option<Arc<Subscriber>> {
        let removed = self.subscribers.remove(connection_id).map(|(_, sub)| sub);
        if removed.is_some() {
            debug!(connection_id = %connection_id, "Subscriber removed");
        }
        removed
    }

    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<Arc<Subscriber>> {
        self.subscribers
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of the live connections
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Subscriber>> {
        self.subscribers
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }
}
