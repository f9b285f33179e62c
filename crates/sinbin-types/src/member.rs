//! Community membership as seen through the platform

use crate::{RoleId, UserId};
use serde::{Deserialize, Serialize};

/// A role defined in a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
}

/// A live member of a community
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user_id: UserId,

    /// Whether the account is bot-controlled
    #[serde(default)]
    pub bot: bool,

    /// Roles currently assigned to the member
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Member {
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            bot: false,
            roles: Vec::new(),
        }
    }

    pub fn bot(mut self) -> Self {
        self.bot = true;
        self
    }

    pub fn with_role(mut self, role: RoleId) -> Self {
        self.roles.push(role);
        self
    }

    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Result of resolving a `(community, user)` pair against live membership
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberLookup {
    /// The user is currently a member
    Present(Member),

    /// The community is reachable but the user is not a member
    Absent,

    /// The community itself cannot be resolved right now
    Unavailable,
}

impl MemberLookup {
    pub fn member(&self) -> Option<&Member> {
        match self {
            MemberLookup::Present(member) => Some(member),
            _ => None,
        }
    }
}
