use serde::{Deserialize, Serialize};

/// Application module a connection belongs to.
///
/// The module is the top-level routing dimension and also names the broker
/// destination its replication records travel on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Module {
    Chat,
    Exercise,
    Team,
    Unit,
}

impl Module {
    /// Every module, in destination subscription order
    pub const ALL: [Self; 4] = [Self::Chat, Self::Exercise, Self::Team, Self::Unit];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::Exercise => "EXERCISE",
            Self::Team => "TEAM",
            Self::Unit => "UNIT",
        }
    }
}

impl std::fmt::Display for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Module {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|module| module.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::InvalidInput(format!("Unknown module: {s}")))
    }
}

/// Operation tag carried by every envelope.
///
/// The set is open-ended: modules define their own operations next to the two
/// the hub itself emits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Operation(String);

impl Operation {
    pub const CONNECTED: &'static str = "CONNECTED";
    pub const UPDATE: &'static str = "UPDATE";

    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    #[must_use]
    pub fn connected() -> Self {
        Self::new(Self::CONNECTED)
    }

    #[must_use]
    pub fn update() -> Self {
        Self::new(Self::UPDATE)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.0 == Self::CONNECTED
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Operation {
    fn from(tag: &str) -> Self {
        Self::new(tag)
    }
}
