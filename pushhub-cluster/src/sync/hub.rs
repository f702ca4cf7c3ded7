//! Push hub service
//!
//! This module wires the pieces of one hub instance together:
//! - Subscriber registry (local connections)
//! - Delivery dispatcher (local fan-out)
//! - Replication bus (cross-instance sync)
//! - Lifecycle manager and session listener (teardown)

use pushhub_core::models::SessionId;
use pushhub_core::Config;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use super::dispatcher::Dispatcher;
use super::events::{InstanceId, SessionRecord};
use super::lifecycle::{DisconnectHook, LifecycleManager, NoopDisconnectHook};
use super::registry::SubscriberRegistry;
use super::replication::ReplicationBus;
use super::session::SessionListener;
use super::subscriber::{ConnectionRequest, Subscriber};
use crate::broker::{Broker, Destinations};
use crate::error::{Error, Result};
use crate::transport::PushTransport;

/// One push hub instance
///
/// Every instance sharing a broker (and key prefix) forms one cluster:
/// deliveries made on any of them reach matching connections on all of them.
pub struct PushHub {
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    lifecycle: LifecycleManager,
    bus: Arc<ReplicationBus>,
    sessions: SessionListener,
    cancel_token: CancellationToken,
}

impl PushHub {
    /// Create a hub on `broker`
    ///
    /// # Arguments
    /// * `config` - Broker and dispatch settings
    /// * `broker` - Shared message broker
    /// * `hook` - Application callback run for every closed connection
    #[must_use]
    pub fn new(config: &Config, broker: Arc<dyn Broker>, hook: Arc<dyn DisconnectHook>) -> Self {
        let registry = SubscriberRegistry::new();
        let bus = Arc::new(ReplicationBus::new(
            InstanceId::generate(),
            config.broker.enabled,
            broker,
            Destinations::new(config.broker.key_prefix.clone()),
            config.broker.publish_queue_capacity,
        ));
        let dispatcher = Dispatcher::new(
            registry.clone(),
            bus.clone(),
            config.dispatch.max_concurrent_sends,
            config.dispatch.send_timeout(),
        );
        let lifecycle = LifecycleManager::new(
            registry.clone(),
            dispatcher.clone(),
            bus.clone(),
            hook,
            config.dispatch.send_timeout(),
        );
        let sessions = SessionListener::new(registry.clone(), lifecycle.clone());

        if !config.broker.enabled {
            warn!("Broker publishing disabled, deliveries stay on this instance");
        }

        Self {
            registry,
            dispatcher,
            lifecycle,
            bus,
            sessions,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Create a hub without a disconnect hook
    #[must_use]
    pub fn with_defaults(config: &Config, broker: Arc<dyn Broker>) -> Self {
        Self::new(config, broker, Arc::new(NoopDisconnectHook))
    }

    /// Start the replication consumers and the session listener
    ///
    /// Background tasks run inside a `push_hub` span carrying the instance id.
    pub async fn start(&self) -> Result<()> {
        let span = info_span!("push_hub", instance_id = %self.instance_id());
        async {
            self.bus.start(self.dispatcher.clone()).await?;
            self.sessions
                .start(
                    self.bus.broker(),
                    self.bus.destinations().session(),
                    self.cancel_token.clone(),
                )
                .await?;

            info!("Push hub started");
            Ok::<_, Error>(())
        }
        .instrument(span)
        .await
    }

    /// Stop every background task. Live connections are left as they are.
    pub fn shutdown(&self) {
        info!(instance_id = %self.instance_id(), "Shutting down push hub");
        self.cancel_token.cancel();
        self.bus.shutdown();
    }

    #[must_use]
    pub fn instance_id(&self) -> InstanceId {
        self.bus.instance_id()
    }

    /// Routing operations
    #[must_use]
    pub const fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    #[must_use]
    pub const fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Register a new client connection, see [`LifecycleManager::register`]
    pub async fn register(
        &self,
        request: ConnectionRequest,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Arc<Subscriber>> {
        self.lifecycle.register(request, transport).await
    }

    /// Connections currently held by this instance
    #[must_use]
    pub fn subscribers(&self) -> Vec<Arc<Subscriber>> {
        self.registry.snapshot()
    }

    /// End a client session on every instance.
    ///
    /// With publishing enabled the session record goes through the broker,
    /// so this instance closes its own connections when the record comes
    /// back. Otherwise the local connections are closed directly.
    pub async fn close_session(&self, session_id: SessionId) -> Result<()> {
        if !self.bus.is_enabled() {
            self.sessions.close_session(session_id).await;
            return Ok(());
        }

        let payload = serde_json::to_string(&SessionRecord::closed(session_id))?;
        self.bus
            .broker()
            .publish(&self.bus.destinations().session(), payload)
            .await
    }

    #[must_use]
    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            instance_id: self.instance_id(),
            active_connections: self.registry.len(),
            total_registered: self.lifecycle.total_registered(),
            total_disconnected: self.lifecycle.total_disconnected(),
            broker_enabled: self.bus.is_enabled(),
        }
    }
}

/// Hub metrics
#[derive(Debug, Clone)]
pub struct HubMetrics {
    pub instance_id: InstanceId,
    pub active_connections: usize,
    pub total_registered: u64,
    pub total_disconnected: u64,
    pub broker_enabled: bool,
}
