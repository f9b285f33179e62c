//! Strongly-typed identifiers for communities, users and roles
//!
//! Platform identifiers are 64-bit snowflakes wrapped in newtypes so a user
//! id can never be passed where a role id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

macro_rules! snowflake_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(raw: u64) -> Self {
                Self(raw)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl From<u64> for $name {
            fn from(raw: u64) -> Self {
                Self(raw)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

snowflake_id!(
    /// Identifier of a community (a guild on the chat platform)
    CommunityId
);

snowflake_id!(
    /// Identifier of a user account, independent of any membership
    UserId
);

snowflake_id!(
    /// Identifier of a role within a community
    RoleId
);

/// Identity of a punished member.
///
/// The per-membership handle can be reassigned when a user leaves and
/// rejoins, so punishments are keyed by the `(community, user)` pair instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId {
    pub community_id: CommunityId,
    pub user_id: UserId,
}

impl EntityId {
    pub fn new(community_id: impl Into<CommunityId>, user_id: impl Into<UserId>) -> Self {
        Self {
            community_id: community_id.into(),
            user_id: user_id.into(),
        }
    }

    /// Key used in the persisted store: `"<communityId> <userId>"`.
    pub fn storage_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.community_id, self.user_id)
    }
}

/// Errors raised when parsing a persisted entity key
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EntityKeyError {
    #[error("entity key {0:?} is not of the form \"<community> <user>\"")]
    Malformed(String),

    #[error("entity key {key:?} has a non-numeric component: {reason}")]
    InvalidComponent { key: String, reason: String },
}

impl FromStr for EntityId {
    type Err = EntityKeyError;

    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let mut parts = key.split(' ');
        let (Some(community), Some(user), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(EntityKeyError::Malformed(key.to_string()));
        };

        let invalid = |e: std::num::ParseIntError| EntityKeyError::InvalidComponent {
            key: key.to_string(),
            reason: e.to_string(),
        };

        Ok(Self {
            community_id: community.parse().map_err(invalid)?,
            user_id: user.parse().map_err(invalid)?,
        })
    }
}
