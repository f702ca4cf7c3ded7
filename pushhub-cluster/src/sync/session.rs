use futures::StreamExt;
use pushhub_core::models::SessionId;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::events::SessionRecord;
use super::lifecycle::LifecycleManager;
use super::registry::SubscriberRegistry;
use super::subscriber::CloseCause;
use crate::broker::Broker;
use crate::error::Result;

/// Closes every local connection of a client session when the session ends.
///
/// Session records are consumed by one task, strictly in order.
#[derive(Clone)]
pub struct SessionListener {
    registry: SubscriberRegistry,
    lifecycle: LifecycleManager,
}

impl SessionListener {
    #[must_use]
    pub const fn new(registry: SubscriberRegistry, lifecycle: LifecycleManager) -> Self {
        Self {
            registry,
            lifecycle,
        }
    }

    /// Subscribe to `destination` and process records until `cancel` fires
    pub async fn start(
        &self,
        broker: &Arc<dyn Broker>,
        destination: String,
        cancel: CancellationToken,
    ) -> Result<()> {
        let mut stream = broker.subscribe(&destination).await?;
        let listener = self.clone();

        let task = async move {
            loop {
                let raw = tokio::select! {
                    () = cancel.cancelled() => break,
                    raw = stream.next() => match raw {
                        Some(raw) => raw,
                        None => {
                            warn!(destination = %destination, "Session stream ended");
                            break;
                        }
                    },
                };

                listener.handle(&raw).await;
            }
            debug!(destination = %destination, "Session listener stopped");
        };
        tokio::spawn(task.in_current_span());

        info!("Session listener started");
        Ok(())
    }

    /// Process one session record. Returns the number of connections closed.
    pub async fn handle(&self, raw: &str) -> usize {
        let record: SessionRecord = match serde_json::from_str(raw) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Dropping malformed session record");
                return 0;
            }
        };

        if record.connected {
            return 0;
        }
        self.close_session(record.session_id).await
    }

    /// Tear down every local connection of `session_id`, whatever its module
    pub async fn close_session(&self, session_id: SessionId) -> usize {
        let connections: Vec<_> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|sub| sub.session_id == session_id)
            .collect();

        let mut closed = 0;
        for sub in &connections {
            if self.lifecycle.teardown(sub, CloseCause::SessionClosed).await {
                closed += 1;
            }
        }

        if !connections.is_empty() {
            info!(session_id = %session_id, closed = closed, "Session connections closed");
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Destinations, MemoryBroker};
    use crate::sync::dispatcher::Dispatcher;
    use crate::sync::events::InstanceId;
    use crate::sync::lifecycle::NoopDisconnectHook;
    use crate::sync::replication::ReplicationBus;
    use crate::sync::subscriber::{ConnectionRequest, Subscriber};
    use crate::transport::{ChannelTransport, EnvelopeReceiver};
    use pushhub_core::models::{ExerciseId, Module, TeamId, UserId};
    use std::time::Duration;

    fn listener() -> (SessionListener, SubscriberRegistry, LifecycleManager) {
        let registry = SubscriberRegistry::new();
        let bus = Arc::new(ReplicationBus::new(
            InstanceId::generate(),
            false,
            Arc::new(MemoryBroker::new()),
            Destinations::new("test:"),
            16,
        ));
        let dispatcher = Dispatcher::new(registry.clone(), bus.clone(), 8, Duration::from_secs(1));
        let lifecycle = LifecycleManager::new(
            registry.clone(),
            dispatcher,
            bus,
            Arc::new(NoopDisconnectHook),
            Duration::from_secs(1),
        );
        (
            SessionListener::new(registry.clone(), lifecycle.clone()),
            registry,
            lifecycle,
        )
    }

    async fn connect(
        lifecycle: &LifecycleManager,
        module: Module,
        session: i64,
    ) -> (Arc<Subscriber>, EnvelopeReceiver) {
        let (transport, rx) = ChannelTransport::new();
        let request = ConnectionRequest::new(
            module,
            TeamId(session),
            UserId(1),
            ExerciseId(1),
            SessionId(session),
        );
        let sub = lifecycle.register(request, Arc::new(transport)).await.unwrap();
        (sub, rx)
    }

    #[tokio::test]
    async fn test_session_close_removes_only_that_session() {
        let (listener, registry, lifecycle) = listener();
        let (a, _ra) = connect(&lifecycle, Module::Team, 1).await;
        let (b, _rb) = connect(&lifecycle, Module::Unit, 1).await;
        let (c, _rc) = connect(&lifecycle, Module::Team, 2).await;

        let closed = listener.handle(r#"{"sessionId":1,"connected":false}"#).await;

        assert_eq!(closed, 2);
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(!c.is_closed());
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&c.id).is_some());
    }

    #[tokio::test]
    async fn test_connected_and_malformed_records_are_ignored() {
        let (listener, registry, lifecycle) = listener();
        let (_a, _ra) = connect(&lifecycle, Module::Team, 1).await;

        assert_eq!(listener.handle(r#"{"sessionId":1,"connected":true}"#).await, 0);
        assert_eq!(listener.handle("not a record").await, 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_listener_consumes_session_destination() {
        let (listener, registry, lifecycle) = listener();
        let (sub, _rx) = connect(&lifecycle, Module::Chat, 5).await;
        let broker: Arc<dyn Broker> = Arc::new(MemoryBroker::new());
        let cancel = CancellationToken::new();

        listener
            .start(&broker, "test:SESSION".to_string(), cancel.clone())
            .await
            .unwrap();
        broker
            .publish(
                "test:SESSION",
                serde_json::to_string(&SessionRecord::closed(SessionId(5))).unwrap(),
            )
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while !registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(sub.is_closed());
        cancel.cancel();
    }
}
