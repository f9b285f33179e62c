//! Storage trait definitions

use crate::error::StorageError;
use async_trait::async_trait;
use sinbin_types::PersistedPunishments;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Durable mapping of entity key to punishment expiry
#[async_trait]
pub trait PunishmentStore: Send + Sync {
    /// Load the whole store.
    ///
    /// Returns an empty map if nothing has been persisted yet.
    async fn load(&self) -> StorageResult<PersistedPunishments>;

    /// Replace the whole store with `punishments`
    async fn save(&self, punishments: &PersistedPunishments) -> StorageResult<()>;
}
