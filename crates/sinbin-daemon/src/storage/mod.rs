//! Storage layer for sinbin-daemon
//!
//! Provides durable storage for punishment expiry times. The store is a
//! durability substrate only: the in-memory table owned by the mute
//! manager is authoritative while the process is live.

mod json;
mod memory;
mod traits;

pub use json::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::{PunishmentStore, StorageResult};
