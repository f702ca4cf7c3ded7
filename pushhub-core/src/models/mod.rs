pub mod envelope;
pub mod id;
pub mod module;
pub mod presence;

pub use envelope::{EncodedPayload, Envelope, PushPayload};
pub use id::{ExerciseId, SessionId, TeamId, UnitId, UserId};
pub use module::{Module, Operation};
pub use presence::PresenceUpdate;
