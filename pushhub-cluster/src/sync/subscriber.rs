use chrono::{DateTime, Utc};
use pushhub_core::models::{Envelope, ExerciseId, Module, SessionId, TeamId, UnitId, UserId};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::transport::PushTransport;

/// Handle for a client connection
pub type ConnectionId = String;

/// Receiving side of a connection's termination signals
pub type SignalReceiver = mpsc::UnboundedReceiver<CloseCause>;

/// Lifecycle state of a connection. `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    Connecting = 0,
    Connected = 1,
    Closed = 2,
}

impl ConnectionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Connected,
            _ => Self::Closed,
        }
    }
}

/// Why a connection reached `Closed`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Writing to the transport failed
    Error(String),
    /// The transport timeout elapsed
    Timeout,
    /// The client side completed the stream
    Completed,
    /// A session-close record named this connection's session
    SessionClosed,
}

impl CloseCause {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::Timeout => "timeout",
            Self::Completed => "completed",
            Self::SessionClosed => "session_closed",
        }
    }
}

/// Addressing attributes supplied when a connection registers
#[derive(Debug, Clone)]
pub struct ConnectionRequest {
    pub module: Module,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub exercise_id: ExerciseId,
    pub unit_id: Option<UnitId>,
    pub secondary_unit_id: Option<UnitId>,
    pub session_id: SessionId,
    /// Close the connection after this long; `None` keeps it open until another signal
    pub timeout: Option<Duration>,
}

impl ConnectionRequest {
    #[must_use]
    pub const fn new(
        module: Module,
        team_id: TeamId,
        user_id: UserId,
        exercise_id: ExerciseId,
        session_id: SessionId,
    ) -> Self {
        Self {
            module,
            team_id,
            user_id,
            exercise_id,
            unit_id: None,
            secondary_unit_id: None,
            session_id,
            timeout: None,
        }
    }

    #[must_use]
    pub const fn with_unit(mut self, unit_id: UnitId) -> Self {
        self.unit_id = Some(unit_id);
        self
    }

    #[must_use]
    pub const fn with_secondary_unit(mut self, unit_id: UnitId) -> Self {
        self.secondary_unit_id = Some(unit_id);
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// One live push connection and its addressing attributes
pub struct Subscriber {
    pub id: ConnectionId,
    pub module: Module,
    pub team_id: TeamId,
    pub user_id: UserId,
    pub exercise_id: ExerciseId,
    pub unit_id: Option<UnitId>,
    pub secondary_unit_id: Option<UnitId>,
    pub session_id: SessionId,
    pub connected_at: DateTime<Utc>,
    transport: Arc<dyn PushTransport>,
    state: AtomicU8,
    signals: mpsc::UnboundedSender<CloseCause>,
    closed: CancellationToken,
}

impl Subscriber {
    /// Build a connection record in `Connecting` state.
    ///
    /// The returned receiver yields every termination signal raised through
    /// [`Subscriber::raise`]; the lifecycle manager watches it.
    #[must_use]
    pub fn new(
        request: &ConnectionRequest,
        transport: Arc<dyn PushTransport>,
    ) -> (Arc<Self>, SignalReceiver) {
        let (signals, rx) = mpsc::unbounded_channel();
        let subscriber = Self {
            id: format!("{}_{}", request.user_id, nanoid::nanoid!(8)),
            module: request.module,
            team_id: request.team_id,
            user_id: request.user_id,
            exercise_id: request.exercise_id,
            unit_id: request.unit_id,
            secondary_unit_id: request.secondary_unit_id,
            session_id: request.session_id,
            connected_at: Utc::now(),
            transport,
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            signals,
            closed: CancellationToken::new(),
        };
        (Arc::new(subscriber), rx)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed
    }

    /// `Connecting -> Connected`. Returns false if the connection is no longer connecting.
    pub fn mark_connected(&self) -> bool {
        self.state
            .compare_exchange(
                ConnectionState::Connecting as u8,
                ConnectionState::Connected as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Move to `Closed`. Only the first caller gets `true`.
    pub fn begin_close(&self) -> bool {
        let previous = self
            .state
            .swap(ConnectionState::Closed as u8, Ordering::AcqRel);
        if previous == ConnectionState::Closed as u8 {
            return false;
        }
        self.closed.cancel();
        true
    }

    /// Resolves once the connection reached `Closed`
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Raise a termination signal. Signals after the first are ignored by teardown.
    pub fn raise(&self, cause: CloseCause) {
        // The watcher is gone once the connection closed
        let _ = self.signals.send(cause);
    }

    pub async fn send(&self, envelope: &Envelope) -> Result<()> {
        self.transport.send(envelope).await
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn PushTransport> {
        &self.transport
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("id", &self.id)
            .field("module", &self.module)
            .field("team_id", &self.team_id)
            .field("user_id", &self.user_id)
            .field("exercise_id", &self.exercise_id)
            .field("unit_id", &self.unit_id)
            .field("secondary_unit_id", &self.secondary_unit_id)
            .field("session_id", &self.session_id)
            .field("connected_at", &self.connected_at)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
