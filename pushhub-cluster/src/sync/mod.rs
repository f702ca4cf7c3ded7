// Module: sync

pub mod addressing;
pub mod dispatcher;
pub mod events;
pub mod hub;
pub mod lifecycle;
pub mod registry;
pub mod replication;
pub mod session;
pub mod subscriber;

pub use addressing::Target;
pub use dispatcher::{DispatchOutcome, Dispatcher};
pub use events::{ConnectedRecord, DeliveryRecord, InstanceId, ReplicationRecord, SessionRecord};
pub use hub::{HubMetrics, PushHub};
pub use lifecycle::{DisconnectHook, LifecycleManager, NoopDisconnectHook};
pub use registry::SubscriberRegistry;
pub use replication::{InboundOutcome, PublishRequest, ReplicationBus};
pub use session::SessionListener;
pub use subscriber::{
    CloseCause, ConnectionId, ConnectionRequest, ConnectionState, SignalReceiver, Subscriber,
};
