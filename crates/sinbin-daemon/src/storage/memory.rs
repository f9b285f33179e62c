//! In-memory storage implementation

use super::traits::*;
use async_trait::async_trait;
use sinbin_types::PersistedPunishments;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryStore {
    punishments: RwLock<PersistedPunishments>,
    writes: AtomicUsize,
}

impl InMemoryStore {
    /// Create an empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store that already holds `punishments`
    pub fn with_contents(punishments: PersistedPunishments) -> Self {
        Self {
            punishments: RwLock::new(punishments),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of completed saves
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Current stored contents
    pub async fn contents(&self) -> PersistedPunishments {
        self.punishments.read().await.clone()
    }
}

#[async_trait]
impl PunishmentStore for InMemoryStore {
    async fn load(&self) -> StorageResult<PersistedPunishments> {
        Ok(self.punishments.read().await.clone())
    }

    async fn save(&self, punishments: &PersistedPunishments) -> StorageResult<()> {
        let mut current = self.punishments.write().await;
        *current = punishments.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
