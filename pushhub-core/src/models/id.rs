use serde::{Deserialize, Serialize};

/// Declares a transparent `i64` identifier newtype.
///
/// Every addressing attribute of a connection is a numeric id issued by the
/// owning application module; wrapping each one keeps a team id from being
/// passed where a user id is expected.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            #[must_use]
            pub const fn new(id: i64) -> Self {
                Self(id)
            }

            #[must_use]
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

numeric_id!(
    /// Team id
    TeamId
);
numeric_id!(
    /// User profile id
    UserId
);
numeric_id!(
    /// Exercise id
    ExerciseId
);
numeric_id!(
    /// Training unit id, used both for the primary and the secondary unit
    UnitId
);
numeric_id!(
    /// External client session id, shared by every tab of one login
    SessionId
);
