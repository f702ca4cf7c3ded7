use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::warn;

use super::{Broker, BrokerStream};
use crate::error::Result;

/// Capacity of each destination channel. Slow consumers skip messages.
const DESTINATION_CAPACITY: usize = 1024;

/// In-process broker.
///
/// Used for single-node deployments and to run several hubs against one
/// shared broker inside a test. Messages published with no subscriber are lost,
/// matching pub/sub semantics.
#[derive(Default)]
pub struct MemoryBroker {
    destinations: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn channel(&self, destination: &str) -> broadcast::Sender<String> {
        self.destinations
            .lock()
            .entry(destination.to_string())
            .or_insert_with(|| broadcast::channel(DESTINATION_CAPACITY).0)
            .clone()
    }

    /// Number of live subscriptions on a destination
    #[must_use]
    pub fn subscriber_count(&self, destination: &str) -> usize {
        self.destinations
            .lock()
            .get(destination)
            .map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn publish(&self, destination: &str, payload: String) -> Result<()> {
        // No receivers is not an error for pub/sub
        let _ = self.channel(destination).send(payload);
        Ok(())
    }

    async fn subscribe(&self, destination: &str) -> Result<BrokerStream> {
        let destination_name = destination.to_string();
        let stream = BroadcastStream::new(self.channel(destination).subscribe()).filter_map(
            move |item| {
                let message = match item {
                    Ok(message) => Some(message),
                    Err(err) => {
                        warn!(
                            destination = %destination_name,
                            error = %err,
                            "In-memory subscriber lagged, messages skipped"
                        );
                        None
                    }
                };
                futures::future::ready(message)
            },
        );
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let broker = MemoryBroker::new();
        let mut first = broker.subscribe("dest").await.unwrap();
        let mut second = broker.subscribe("dest").await.unwrap();
        assert_eq!(broker.subscriber_count("dest"), 2);

        broker.publish("dest", "hello".to_string()).await.unwrap();

        assert_eq!(first.next().await.unwrap(), "hello");
        assert_eq!(second.next().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_destinations_are_isolated() {
        let broker = MemoryBroker::new();
        let mut other = broker.subscribe("other").await.unwrap();

        broker.publish("dest", "hello".to_string()).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(50), other.next()).await;
        assert!(received.is_err(), "other destination should stay silent");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_ok() {
        let broker = MemoryBroker::new();
        assert!(broker.publish("nobody", "lost".to_string()).await.is_ok());
        assert_eq!(broker.subscriber_count("nobody"), 0);
    }
}
