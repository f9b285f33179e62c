//! Temporal moderation engine
//!
//! - [`MuteManager`]: punish, lift and query time-bounded mutes
//! - [`SaveWriter`]: coalesced persistence of the mute table
//! - [`RoleMutationExecutor`]: policy-checked bulk role changes and safe removal
//! - [`EscalationTracker`]: repeat-violation detection
//!
//! Recovery lives on [`MuteManager`] and runs once at startup before any
//! punishment is accepted.

mod escalation;
mod executor;
mod lifecycle;
mod recovery;
mod table;
mod writer;

pub use escalation::{EscalationTracker, ViolationOutcome};
pub use executor::{RemovalGuard, RoleMutationExecutor, RolePolicy, SafeRemoval};
pub use lifecycle::{MuteManager, RejoinOutcome};
pub use recovery::RecoveryReport;
pub use table::{DeferredMute, MuteTable};
pub use writer::SaveWriter;
