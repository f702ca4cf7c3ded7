//! Cross-instance replication of deliveries over the broker
//!
//! Outbound records go through a bounded queue drained by one publisher task,
//! so a slow or unavailable broker never holds up local delivery. Inbound
//! records are consumed per module destination; records stamped with this
//! instance's id are dropped before they are decoded further.

use futures::StreamExt;
use parking_lot::Mutex;
use pushhub_core::models::{EncodedPayload, Module};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn, Instrument};

use super::dispatcher::{DispatchOutcome, Dispatcher};
use super::events::{InstanceId, ReplicationRecord};
use crate::broker::{Broker, BrokerStream, Destinations};
use crate::error::Result;

/// Encoded record waiting for the publisher task
#[derive(Debug)]
pub struct PublishRequest {
    pub destination: String,
    pub kind: &'static str,
    pub payload: String,
}

/// What happened to one inbound record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Stamped with the local instance id
    Echo,
    /// Remote connection announcement, nothing to do
    Connected,
    Delivered(DispatchOutcome),
    /// Malformed or of an unknown kind
    Dropped,
}

pub struct ReplicationBus {
    instance_id: InstanceId,
    enabled: bool,
    broker: Arc<dyn Broker>,
    destinations: Destinations,
    publish_tx: mpsc::Sender<PublishRequest>,
    publish_rx: Mutex<Option<mpsc::Receiver<PublishRequest>>>,
    cancel_token: CancellationToken,
}

impl ReplicationBus {
    /// `enabled` gates publishing only; consumers start regardless.
    #[must_use]
    pub fn new(
        instance_id: InstanceId,
        enabled: bool,
        broker: Arc<dyn Broker>,
        destinations: Destinations,
        queue_capacity: usize,
    ) -> Self {
        let (publish_tx, publish_rx) = mpsc::channel(queue_capacity.max(1));
        Self {
            instance_id,
            enabled,
            broker,
            destinations,
            publish_tx,
            publish_rx: Mutex::new(Some(publish_rx)),
            cancel_token: CancellationToken::new(),
        }
    }

    #[must_use]
    pub const fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn destinations(&self) -> &Destinations {
        &self.destinations
    }

    #[must_use]
    pub const fn broker(&self) -> &Arc<dyn Broker> {
        &self.broker
    }

    /// Records waiting for the publisher task
    #[must_use]
    pub fn queued(&self) -> usize {
        self.publish_tx.max_capacity() - self.publish_tx.capacity()
    }

    /// Queue a record for publishing. Returns whether it was queued.
    ///
    /// Never blocks: with publishing disabled this is a no-op, and a full
    /// queue drops the record.
    pub fn publish(&self, record: &ReplicationRecord) -> bool {
        if !self.enabled {
            return false;
        }

        let payload = match record.encode() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, kind = record.kind(), "Failed to encode replication record");
                return false;
            }
        };

        let request = PublishRequest {
            destination: self.destinations.module(record.module()),
            kind: record.kind(),
            payload,
        };

        match self.publish_tx.try_send(request) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(request)) => {
                warn!(
                    kind = request.kind,
                    destination = %request.destination,
                    "Replication queue full (capacity {}), dropping record",
                    self.publish_tx.max_capacity()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                error!("Replication queue closed, cannot queue record");
                false
            }
        }
    }

    /// Start the publisher task and one consumer per module destination.
    ///
    /// Subscriptions are established before this returns.
    pub async fn start(self: &Arc<Self>, dispatcher: Dispatcher) -> Result<()> {
        if let Some(publish_rx) = self.publish_rx.lock().take() {
            self.spawn_publisher(publish_rx);
        }

        for module in Module::ALL {
            let destination = self.destinations.module(module);
            let stream = self.broker.subscribe(&destination).await?;
            self.spawn_consumer(destination, stream, dispatcher.clone());
        }

        info!(
            instance_id = %self.instance_id,
            publishing = self.enabled,
            "Replication bus started"
        );
        Ok(())
    }

    fn spawn_publisher(&self, mut publish_rx: mpsc::Receiver<PublishRequest>) {
        let broker = self.broker.clone();
        let cancel = self.cancel_token.clone();

        let task = async move {
            loop {
                let request = tokio::select! {
                    () = cancel.cancelled() => break,
                    request = publish_rx.recv() => match request {
                        Some(request) => request,
                        None => break,
                    },
                };

                match broker.publish(&request.destination, request.payload).await {
                    Ok(()) => {
                        trace!(kind = request.kind, destination = %request.destination, "Record published");
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            kind = request.kind,
                            destination = %request.destination,
                            "Failed to publish replication record"
                        );
                    }
                }
            }
            debug!("Replication publisher stopped");
        };
        tokio::spawn(task.in_current_span());
    }

    fn spawn_consumer(
        self: &Arc<Self>,
        destination: String,
        mut stream: BrokerStream,
        dispatcher: Dispatcher,
    ) {
        let bus = self.clone();
        let cancel = self.cancel_token.clone();

        let task = async move {
            loop {
                let raw = tokio::select! {
                    () = cancel.cancelled() => break,
                    raw = stream.next() => match raw {
                        Some(raw) => raw,
                        None => {
                            warn!(destination = %destination, "Replication stream ended");
                            break;
                        }
                    },
                };

                bus.handle_inbound(&dispatcher, &raw).await;
            }
            debug!(destination = %destination, "Replication consumer stopped");
        };
        tokio::spawn(task.in_current_span());
    }

    /// Process one record received from the broker
    pub async fn handle_inbound(&self, dispatcher: &Dispatcher, raw: &str) -> InboundOutcome {
        match ReplicationRecord::decode(raw, self.instance_id) {
            Ok(None) => InboundOutcome::Echo,
            Ok(Some(ReplicationRecord::Connected(record))) => {
                debug!(
                    origin = %record.instance,
                    module = %record.module,
                    "Remote connection announced"
                );
                InboundOutcome::Connected
            }
            Ok(Some(ReplicationRecord::Delivery(record))) => {
                debug!(
                    origin = %record.instance,
                    module = %record.module,
                    kind = record.target.kind(),
                    "Replaying remote delivery"
                );
                let payload = EncodedPayload::raw(record.payload_type, record.message);
                let outcome = dispatcher
                    .dispatch(record.module, record.operation, record.target, payload, false)
                    .await;
                InboundOutcome::Delivered(outcome)
            }
            Err(e) => {
                warn!(error = %e, "Dropping malformed replication record");
                InboundOutcome::Dropped
            }
        }
    }

    pub fn shutdown(&self) {
        info!(instance_id = %self.instance_id, "Shutting down replication bus");
        self.cancel_token.cancel();
    }
}
