//! Message broker seam
//!
//! Replication records and session signals travel over named destinations of
//! a pub/sub broker. Every instance publishes to and consumes from the same
//! destinations; delivery is best effort.

pub mod memory;
pub mod redis_pubsub;

use async_trait::async_trait;
use futures::stream::BoxStream;
use pushhub_core::models::Module;

use crate::error::Result;

pub use self::memory::MemoryBroker;
pub use self::redis_pubsub::RedisBroker;

/// Stream of raw messages received on one destination
pub type BrokerStream = BoxStream<'static, String>;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish one message to every current subscriber of `destination`
    async fn publish(&self, destination: &str, payload: String) -> Result<()>;

    /// Subscribe to `destination`. The stream ends when the broker shuts down.
    async fn subscribe(&self, destination: &str) -> Result<BrokerStream>;
}

/// Destination naming shared by publishers and consumers
#[derive(Debug, Clone)]
pub struct Destinations {
    prefix: String,
}

impl Destinations {
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Destination carrying replication records of one module
    #[must_use]
    pub fn module(&self, module: Module) -> String {
        format!("{}module:{}", self.prefix, module.as_str())
    }

    /// Destination carrying session-close records
    #[must_use]
    pub fn session(&self) -> String {
        format!("{}SESSION", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_names() {
        let destinations = Destinations::new("pushhub:");
        assert_eq!(destinations.module(Module::Chat), "pushhub:module:CHAT");
        assert_eq!(destinations.session(), "pushhub:SESSION");
    }
}
