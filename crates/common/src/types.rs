// Core domain types shared across the scrimlink crates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum length of a scrim contact string, in characters.
pub const MAX_CONTACT_CHARS: usize = 20;

/// Opaque token identifying a logical participant across reconnects.
///
/// Freshly generated for every new transport connection; clients replay it
/// in an `IDENT` frame to reclaim their session after a reconnect.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw).map(Self)
    }
}

/// Identity of a single live transport connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Ranked skill tier advertised in a scrim record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Low,
    Mid,
    High,
    #[serde(rename = "High+")]
    HighPlus,
    #[serde(rename = "High++")]
    HighPlusPlus,
}

/// Region a scrim is looking for opponents in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Region {
    Sea,
    Na,
    Eu,
}

/// A participant's advertised matchmaking attributes.
///
/// At most one record exists per session identity; it travels with the
/// session across reconnects and merges.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrimRecord {
    pub contact: String,
    pub tier: Tier,
    pub region: Region,
}

impl ScrimRecord {
    /// Whether the record satisfies the wire constraints.
    ///
    /// Tier and region are enforced by the enums at parse time; the contact
    /// length bound is the only check left to do by hand.
    pub fn is_valid(&self) -> bool {
        self.contact.chars().count() <= MAX_CONTACT_CHARS
    }
}
