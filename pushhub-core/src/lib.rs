pub mod config;
pub mod error;
pub mod logging;
pub mod models;

pub use config::{BrokerKind, Config};
pub use error::{Error, Result};
