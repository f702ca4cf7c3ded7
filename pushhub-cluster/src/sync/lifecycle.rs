use async_trait::async_trait;
use pushhub_core::models::{Envelope, Module, Operation, PresenceUpdate};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

use super::dispatcher::Dispatcher;
use super::events::{ConnectedRecord, ReplicationRecord};
use super::registry::SubscriberRegistry;
use super::replication::ReplicationBus;
use super::subscriber::{CloseCause, ConnectionRequest, SignalReceiver, Subscriber};
use crate::error::{Error, Result};
use crate::transport::PushTransport;

/// Application callback run once for every connection that reaches `Closed`
#[async_trait]
pub trait DisconnectHook: Send + Sync {
    async fn disconnected(&self, _subscriber: &Subscriber) {}
}

/// Hook that does nothing
pub struct NoopDisconnectHook;

impl DisconnectHook for NoopDisconnectHook {}

/// Drives connections from registration to teardown
#[derive(Clone)]
pub struct LifecycleManager {
    registry: SubscriberRegistry,
    dispatcher: Dispatcher,
    bus: Arc<ReplicationBus>,
    hook: Arc<dyn DisconnectHook>,
    ack_timeout: Duration,

    total_registered: Arc<AtomicU64>,
    total_disconnected: Arc<AtomicU64>,
}

impl LifecycleManager {
    #[must_use]
    pub fn new(
        registry: SubscriberRegistry,
        dispatcher: Dispatcher,
        bus: Arc<ReplicationBus>,
        hook: Arc<dyn DisconnectHook>,
        ack_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            bus,
            hook,
            ack_timeout,
            total_registered: Arc::new(AtomicU64::new(0)),
            total_disconnected: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Register a new connection
    ///
    /// Sends the CONNECTED acknowledgement first. Only when the client got it
    /// is the connection added to the registry, watched for termination
    /// signals and announced to the other instances.
    pub async fn register(
        &self,
        request: ConnectionRequest,
        transport: Arc<dyn PushTransport>,
    ) -> Result<Arc<Subscriber>> {
        let (subscriber, signals) = Subscriber::new(&request, transport);
        let ack = Envelope::connected(request.module);

        let sent = match tokio::time::timeout(self.ack_timeout, subscriber.send(&ack)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout("sending CONNECTED acknowledgement".to_string())),
        };
        if let Err(e) = sent {
            warn!(
                connection_id = %subscriber.id,
                module = %request.module,
                user_id = %request.user_id,
                error = %e,
                "Failed to acknowledge connection, not registering"
            );
            subscriber.begin_close();
            subscriber.transport().complete();
            return Err(Error::Registration(e.to_string()));
        }

        subscriber.mark_connected();
        self.registry.add(subscriber.clone());
        self.total_registered.fetch_add(1, Ordering::Relaxed);
        self.spawn_watcher(subscriber.clone(), signals, request.timeout);

        self.bus
            .publish(&ReplicationRecord::Connected(ConnectedRecord {
                instance: self.bus.instance_id(),
                module: request.module,
                operation: Operation::connected(),
            }));

        info!(
            connection_id = %subscriber.id,
            module = %subscriber.module,
            team_id = %subscriber.team_id,
            user_id = %subscriber.user_id,
            session_id = %subscriber.session_id,
            "Connection registered"
        );

        Ok(subscriber)
    }

    /// Wait for the first termination signal of a connection, then tear it down
    fn spawn_watcher(
        &self,
        subscriber: Arc<Subscriber>,
        mut signals: SignalReceiver,
        timeout: Option<Duration>,
    ) {
        let manager = self.clone();

        let task = async move {
            let expiry = async {
                match timeout {
                    Some(timeout) => tokio::time::sleep(timeout).await,
                    None => std::future::pending().await,
                }
            };

            let cause = tokio::select! {
                // Torn down from elsewhere (session close)
                () = subscriber.closed() => return,
                Some(cause) = signals.recv() => cause,
                () = subscriber.transport().closed() => CloseCause::Completed,
                () = expiry => CloseCause::Timeout,
            };

            manager.teardown(&subscriber, cause).await;
        };
        tokio::spawn(task.in_current_span());
    }

    /// Move a connection to `Closed` and run its teardown.
    ///
    /// Safe to call any number of times from any task; only the first call
    /// completes the transport, removes the connection and runs the
    /// disconnect side effect. Returns whether this call did the teardown.
    pub async fn teardown(&self, subscriber: &Arc<Subscriber>, cause: CloseCause) -> bool {
        if !subscriber.begin_close() {
            debug!(
                connection_id = %subscriber.id,
                cause = cause.as_str(),
                "Connection already closed"
            );
            return false;
        }

        subscriber.transport().complete();
        self.registry.remove(&subscriber.id);
        self.total_disconnected.fetch_add(1, Ordering::Relaxed);

        match &cause {
            CloseCause::Error(error) => warn!(
                connection_id = %subscriber.id,
                module = %subscriber.module,
                error = %error,
                "Connection closed on transport error"
            ),
            _ => info!(
                connection_id = %subscriber.id,
                module = %subscriber.module,
                cause = cause.as_str(),
                "Connection closed"
            ),
        }

        self.hook.disconnected(subscriber).await;

        if subscriber.module == Module::Chat {
            let presence = PresenceUpdate {
                connected: false,
                exercise_id: subscriber.exercise_id,
                team_id: subscriber.team_id,
                user_id: subscriber.user_id,
            };
            self.dispatcher
                .to_team(Module::Chat, Operation::update(), subscriber.team_id, &presence)
                .await;
        }

        true
    }

    #[must_use]
    pub fn total_registered(&self) -> u64 {
        self.total_registered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn total_disconnected(&self) -> u64 {
        self.total_disconnected.load(Ordering::Relaxed)
    }
}
