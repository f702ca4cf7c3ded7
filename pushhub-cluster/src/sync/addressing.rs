use pushhub_core::models::{ExerciseId, TeamId, UnitId, UserId};
use serde::{Deserialize, Serialize};

use super::subscriber::Subscriber;

/// Addressing shape of one delivery.
///
/// Serialized inline into replication records: the variant name is the
/// record `kind` and the fields are the shape-specific keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    Users {
        #[serde(rename = "usersId")]
        user_ids: Vec<UserId>,
    },
    Team {
        #[serde(rename = "teamId")]
        team_id: TeamId,
    },
    TeamUser {
        #[serde(rename = "teamId")]
        team_id: TeamId,
        #[serde(rename = "userId")]
        user_id: UserId,
    },
    TeamUsers {
        #[serde(rename = "teamId")]
        team_id: TeamId,
        #[serde(rename = "usersId")]
        user_ids: Vec<UserId>,
    },
    Exercise {
        #[serde(rename = "exerciseId")]
        exercise_id: ExerciseId,
    },
    Unit {
        #[serde(rename = "unitId")]
        unit_id: UnitId,
    },
    Units {
        #[serde(rename = "unitId")]
        unit_ids: Vec<UnitId>,
    },
    TeamUnits {
        #[serde(rename = "teamId")]
        team_id: TeamId,
        #[serde(rename = "unitId")]
        unit_ids: Vec<UnitId>,
    },
    SecondaryUnit {
        #[serde(rename = "unitId")]
        unit_id: UnitId,
    },
}

impl Target {
    /// Record kinds of every delivery shape
    pub const KINDS: [&'static str; 9] = [
        "USERS",
        "TEAM",
        "TEAM_USER",
        "TEAM_USERS",
        "EXERCISE",
        "UNIT",
        "UNITS",
        "TEAM_UNITS",
        "SECONDARY_UNIT",
    ];

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Users { .. } => "USERS",
            Self::Team { .. } => "TEAM",
            Self::TeamUser { .. } => "TEAM_USER",
            Self::TeamUsers { .. } => "TEAM_USERS",
            Self::Exercise { .. } => "EXERCISE",
            Self::Unit { .. } => "UNIT",
            Self::Units { .. } => "UNITS",
            Self::TeamUnits { .. } => "TEAM_UNITS",
            Self::SecondaryUnit { .. } => "SECONDARY_UNIT",
        }
    }

    #[must_use]
    pub fn is_delivery_kind(kind: &str) -> bool {
        Self::KINDS.contains(&kind)
    }

    /// Whether `subscriber` is addressed by this shape. The module is checked by the caller.
    #[must_use]
    pub fn matches(&self, subscriber: &Subscriber) -> bool {
        match self {
            Self::Users { user_ids } => user_ids.contains(&subscriber.user_id),
            Self::Team { team_id } => subscriber.team_id == *team_id,
            Self::TeamUser { team_id, user_id } => {
                subscriber.team_id == *team_id && subscriber.user_id == *user_id
            }
            Self::TeamUsers { team_id, user_ids } => {
                subscriber.team_id == *team_id && user_ids.contains(&subscriber.user_id)
            }
            Self::Exercise { exercise_id } => subscriber.exercise_id == *exercise_id,
            Self::Unit { unit_id } => subscriber.unit_id == Some(*unit_id),
            Self::Units { unit_ids } => subscriber
                .unit_id
                .is_some_and(|unit| unit_ids.contains(&unit)),
            Self::TeamUnits { team_id, unit_ids } => {
                subscriber.team_id == *team_id
                    && subscriber
                        .unit_id
                        .is_some_and(|unit| unit_ids.contains(&unit))
            }
            Self::SecondaryUnit { unit_id } => subscriber.secondary_unit_id == Some(*unit_id),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Users { user_ids } => write!(f, "USERS {user_ids:?}"),
            Self::Team { team_id } => write!(f, "TEAM {team_id}"),
            Self::TeamUser { team_id, user_id } => write!(f, "TEAM_USER {team_id}/{user_id}"),
            Self::TeamUsers { team_id, user_ids } => {
                write!(f, "TEAM_USERS {team_id}/{user_ids:?}")
            }
            Self::Exercise { exercise_id } => write!(f, "EXERCISE {exercise_id}"),
            Self::Unit { unit_id } => write!(f, "UNIT {unit_id}"),
            Self::Units { unit_ids } => write!(f, "UNITS {unit_ids:?}"),
            Self::TeamUnits { team_id, unit_ids } => write!(f, "TEAM_UNITS {team_id}/{unit_ids:?}"),
            Self::SecondaryUnit { unit_id } => write!(f, "SECONDARY_UNIT {unit_id}"),
        }
    }
}
