//! Sinbin daemon library
//!
//! This module provides the core components for the sinbin daemon:
//! - The temporal moderation engine (mutes, persistence, recovery, escalation)
//! - Chat platform adapters
//! - Storage backends
//! - Reconciliation scheduler
//! - REST API handlers and server lifecycle

pub mod api;
pub mod config;
pub mod error;
pub mod moderation;
pub mod platform;
pub mod scheduler;
pub mod server;
pub mod storage;

pub use config::DaemonConfig;
pub use error::{ApiError, DaemonError, ModerationError, PlatformError, StorageError};
pub use moderation::{EscalationTracker, MuteManager};
pub use platform::{InMemoryPlatform, Platform};
pub use scheduler::Scheduler;
pub use server::Server;
pub use storage::{InMemoryStore, JsonFileStore, PunishmentStore};
