//! Role-tagged user identities.
//!
//! Every participant is addressed by a `(role, id)` pair. The role is part
//! of the key: `(entrepreneur, 7)` and `(developer, 7)` are different users,
//! so the integer id alone never identifies anyone.

use serde::{Deserialize, Serialize};

/// Marketplace role of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Idea owner looking for contributors.
    Entrepreneur,
    /// Equity-seeking contributor.
    Developer,
}

impl Role {
    /// Returns the lowercase wire name of this role.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entrepreneur => "entrepreneur",
            Self::Developer => "developer",
        }
    }

    /// Returns the other role (conversations always pair the two roles).
    #[must_use]
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Entrepreneur => Self::Developer,
            Self::Developer => Self::Entrepreneur,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when a role string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct ParseRoleError(pub String);

impl std::str::FromStr for Role {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "entrepreneur" => Ok(Self::Entrepreneur),
            "developer" => Ok(Self::Developer),
            other => Err(ParseRoleError(other.to_string())),
        }
    }
}

/// A role-tagged user reference.
///
/// Serializes as `{"type": "<role>", "id": <n>}`, which is exactly the
/// payload of the `join` and `userOnline` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    /// Marketplace role, part of the identity key.
    #[serde(rename = "type")]
    pub role: Role,
    /// Integer id within the role's namespace.
    pub id: i64,
}

impl Identity {
    /// Creates an identity from a role and an id.
    #[must_use]
    pub const fn new(role: Role, id: i64) -> Self {
        Self { role, id }
    }

    /// Returns the `"{role}_{id}"` key used for presence tracking.
    #[must_use]
    pub fn presence_key(&self) -> String {
        format!("{}_{}", self.role, self.id)
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.role, self.id)
    }
}
