pub mod broker;
pub mod error;
pub mod sync;
pub mod transport;

pub use broker::{Broker, Destinations, MemoryBroker, RedisBroker};
pub use error::{Error, Result};
pub use sync::{ConnectionRequest, DisconnectHook, Dispatcher, HubMetrics, PushHub, Subscriber};
pub use transport::{ChannelTransport, EnvelopeReceiver, PushTransport};
