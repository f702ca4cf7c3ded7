use serde::{Deserialize, Serialize};

use super::envelope::PushPayload;
use super::id::{ExerciseId, TeamId, UserId};

/// Presence change of a chat participant, broadcast to the participant's team
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceUpdate {
    pub connected: bool,
    pub exercise_id: ExerciseId,
    pub team_id: TeamId,
    pub user_id: UserId,
}

impl PushPayload for PresenceUpdate {
    const KIND: &'static str = "PresenceUpdate";
}
