//! Error types for the push engine

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Payload error: {0}")]
    Payload(#[from] pushhub_core::Error),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Registration failed: {0}")]
    Registration(String),

    #[error("Unknown record kind: {0}")]
    UnknownRecord(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        Self::Broker(err.to_string())
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
