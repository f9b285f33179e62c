//! Sinbin Types - Core types for time-bounded moderation
//!
//! Sinbin enforces temporary punitive roles ("mutes") on community members,
//! keeps them across process restarts and escalates repeat violations.
//!
//! ## Key Concepts
//!
//! - **EntityId**: a `(community, user)` pair, stable across leave/rejoin
//! - **PunishmentRecord**: an entity plus the instant its punishment ends
//! - **BatchOutcome**: per-entity result of a bulk role mutation
//! - **Events**: unified stream of moderation state transitions

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod events;
pub mod ids;
pub mod member;
pub mod outcome;
pub mod punishment;

pub use events::{EventSeverity, EventSource, ModerationEvent, ModerationEventEnvelope};
pub use ids::{CommunityId, EntityId, EntityKeyError, RoleId, UserId};
pub use member::{Member, MemberLookup, Role};
pub use outcome::{BatchOutcome, RoleAction};
pub use punishment::{PersistedPunishment, PersistedPunishments, PunishmentRecord};
