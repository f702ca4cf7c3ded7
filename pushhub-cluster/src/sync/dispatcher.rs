//! Routing of outbound messages to the connections held by this instance
//!
//! Every operation snapshots the registry, filters it by module and
//! addressing shape and fans the envelope out with bounded concurrency. The
//! typed operations always hand a replication record to the bus afterwards;
//! records received from the bus come back in through [`Dispatcher::dispatch`]
//! with `replicate = false`.

use futures::stream::{self, StreamExt};
use pushhub_core::models::{
    EncodedPayload, Envelope, ExerciseId, Module, Operation, PushPayload, TeamId, UnitId, UserId,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use super::addressing::Target;
use super::events::{DeliveryRecord, ReplicationRecord};
use super::registry::SubscriberRegistry;
use super::replication::ReplicationBus;
use super::subscriber::CloseCause;

/// Per-call delivery report
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Connections addressed by the call
    pub matched: usize,
    pub delivered: usize,
    pub failed: usize,
    /// Whether a replication record was queued
    pub replicated: bool,
}

#[derive(Clone)]
pub struct Dispatcher {
    registry: SubscriberRegistry,
    bus: Arc<ReplicationBus>,
    max_concurrent_sends: usize,
    send_timeout: Duration,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        registry: SubscriberRegistry,
        bus: Arc<ReplicationBus>,
        max_concurrent_sends: usize,
        send_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            bus,
            max_concurrent_sends: max_concurrent_sends.max(1),
            send_timeout,
        }
    }

    pub async fn to_users<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        user_ids: &[UserId],
        payload: &T,
    ) {
        let target = Target::Users {
            user_ids: user_ids.to_vec(),
        };
        self.send_typed(module, operation, target, payload).await;
    }

    pub async fn to_team<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        team_id: TeamId,
        payload: &T,
    ) {
        self.send_typed(module, operation, Target::Team { team_id }, payload)
            .await;
    }

    pub async fn to_team_user<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        team_id: TeamId,
        user_id: UserId,
        payload: &T,
    ) {
        let target = Target::TeamUser { team_id, user_id };
        self.send_typed(module, operation, target, payload).await;
    }

    pub async fn to_team_users<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        team_id: TeamId,
        user_ids: &[UserId],
        payload: &T,
    ) {
        let target = Target::TeamUsers {
            team_id,
            user_ids: user_ids.to_vec(),
        };
        self.send_typed(module, operation, target, payload).await;
    }

    pub async fn to_exercise<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        exercise_id: ExerciseId,
        payload: &T,
    ) {
        self.send_typed(module, operation, Target::Exercise { exercise_id }, payload)
            .await;
    }

    pub async fn to_unit<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        unit_id: UnitId,
        payload: &T,
    ) {
        self.send_typed(module, operation, Target::Unit { unit_id }, payload)
            .await;
    }

    pub async fn to_units<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        unit_ids: &[UnitId],
        payload: &T,
    ) {
        let target = Target::Units {
            unit_ids: unit_ids.to_vec(),
        };
        self.send_typed(module, operation, target, payload).await;
    }

    pub async fn to_team_units<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        team_id: TeamId,
        unit_ids: &[UnitId],
        payload: &T,
    ) {
        let target = Target::TeamUnits {
            team_id,
            unit_ids: unit_ids.to_vec(),
        };
        self.send_typed(module, operation, target, payload).await;
    }

    pub async fn to_secondary_unit<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        unit_id: UnitId,
        payload: &T,
    ) {
        self.send_typed(module, operation, Target::SecondaryUnit { unit_id }, payload)
            .await;
    }

    async fn send_typed<T: PushPayload + ?Sized>(
        &self,
        module: Module,
        operation: Operation,
        target: Target,
        payload: &T,
    ) {
        match EncodedPayload::encode(payload) {
            Ok(encoded) => {
                self.dispatch(module, operation, target, encoded, true).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    module = %module,
                    kind = target.kind(),
                    payload_type = T::KIND,
                    "Failed to encode payload, message dropped"
                );
            }
        }
    }

    /// Deliver an encoded payload to every local connection addressed by `target`.
    ///
    /// A failed or timed-out send raises that connection's error signal and
    /// does not affect its siblings. With `replicate` set, the delivery is
    /// handed to the replication bus afterwards, even when nothing matched.
    pub async fn dispatch(
        &self,
        module: Module,
        operation: Operation,
        target: Target,
        payload: EncodedPayload,
        replicate: bool,
    ) -> DispatchOutcome {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            debug!(module = %module, kind = target.kind(), "No connected clients");
        }

        let matched: Vec<_> = snapshot
            .into_iter()
            .filter(|sub| sub.module == module && !sub.is_closed() && target.matches(sub))
            .collect();
        let matched_count = matched.len();

        let envelope = Envelope::new(module, operation.clone(), &payload);
        let delivered = AtomicUsize::new(0);
        let failed = AtomicUsize::new(0);

        {
            let envelope = &envelope;
            let delivered = &delivered;
            let failed = &failed;
            let send_timeout = self.send_timeout;

            stream::iter(matched)
                .for_each_concurrent(self.max_concurrent_sends, |sub| async move {
                    let cause = match tokio::time::timeout(send_timeout, sub.send(envelope)).await
                    {
                        Ok(Ok(())) => {
                            delivered.fetch_add(1, Ordering::Relaxed);
                            return;
                        }
                        Ok(Err(e)) => e.to_string(),
                        Err(_) => format!("send timed out after {}ms", send_timeout.as_millis()),
                    };

                    warn!(
                        connection_id = %sub.id,
                        module = %sub.module,
                        error = %cause,
                        "Failed to push message to connection"
                    );
                    failed.fetch_add(1, Ordering::Relaxed);
                    sub.raise(CloseCause::Error(cause));
                })
                .await;
        }

        let delivered = delivered.into_inner();
        let failed = failed.into_inner();

        debug!(
            module = %module,
            operation = %operation,
            target = %target,
            matched = matched_count,
            delivered = delivered,
            failed = failed,
            "Dispatch complete"
        );

        let replicated = replicate
            && self
                .bus
                .publish(&ReplicationRecord::Delivery(DeliveryRecord {
                    instance: self.bus.instance_id(),
                    module,
                    operation,
                    payload_type: payload.kind,
                    message: payload.body,
                    target,
                }));

        DispatchOutcome {
            matched: matched_count,
            delivered,
            failed,
            replicated,
        }
    }
}
