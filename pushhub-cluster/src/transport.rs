//! Push transport seam
//!
//! The hub never talks to sockets directly. Whatever keeps the long-lived
//! client stream open (SSE response, WebSocket, gRPC stream) implements
//! [`PushTransport`]; the hub only sends envelopes, waits for the client to go
//! away and completes the stream on teardown.

use async_trait::async_trait;
use parking_lot::Mutex;
use pushhub_core::models::Envelope;
use tokio::sync::mpsc;

use crate::error::{Error, Result};

#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Write one envelope to the client
    async fn send(&self, envelope: &Envelope) -> Result<()>;

    /// Resolves once the client side of the stream is gone (completion signal)
    async fn closed(&self);

    /// Complete the stream from the server side. Must be idempotent.
    fn complete(&self);
}

/// Receiving half handed to the HTTP/WebSocket handler that owns the socket
pub type EnvelopeReceiver = mpsc::UnboundedReceiver<Envelope>;

/// In-process transport backed by an unbounded channel.
///
/// Dropping the [`EnvelopeReceiver`] is the completion signal; `complete`
/// drops the sending half so the receiver drains and ends.
pub struct ChannelTransport {
    sender: Mutex<Option<mpsc::UnboundedSender<Envelope>>>,
}

impl ChannelTransport {
    #[must_use]
    pub fn new() -> (Self, EnvelopeReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Envelope>> {
        self.sender.lock().clone()
    }
}

#[async_trait]
impl PushTransport for ChannelTransport {
    async fn send(&self, envelope: &Envelope) -> Result<()> {
        let sender = self
            .sender()
            .ok_or_else(|| Error::Transport("stream already completed".to_string()))?;
        sender
            .send(envelope.clone())
            .map_err(|_| Error::Transport("client receiver dropped".to_string()))
    }

    async fn closed(&self) {
        if let Some(sender) = self.sender() {
            sender.closed().await;
        }
    }

    fn complete(&self) {
        self.sender.lock().take();
    }
}
