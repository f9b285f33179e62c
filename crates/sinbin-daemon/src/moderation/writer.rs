//! Coalescing persistence writer

use super::table::MuteTable;
use crate::storage::PunishmentStore;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

#[derive(Debug, Default)]
struct WriterState {
    writing: bool,
    pending: bool,
}

/// Serializes saves of the mute table.
///
/// At most one write is in flight. Requests arriving meanwhile collapse
/// into a single follow-up write that snapshots the table as it is when
/// that write starts, so the last state is always the one that lands.
pub struct SaveWriter {
    store: Arc<dyn PunishmentStore>,
    table: Arc<MuteTable>,
    state: Mutex<WriterState>,
    idle: watch::Sender<bool>,
}

impl std::fmt::Debug for SaveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveWriter")
            .field("state", &*self.lock_state())
            .finish()
    }
}

impl SaveWriter {
    pub fn new(store: Arc<dyn PunishmentStore>, table: Arc<MuteTable>) -> Arc<Self> {
        let (idle, _) = watch::channel(true);
        Arc::new(Self {
            store,
            table,
            state: Mutex::new(WriterState::default()),
            idle,
        })
    }

    pub fn store(&self) -> &Arc<dyn PunishmentStore> {
        &self.store
    }

    fn lock_state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Ask for the current table to be persisted. Never waits on I/O.
    pub fn request_save(self: &Arc<Self>) {
        {
            let mut state = self.lock_state();
            if state.writing {
                state.pending = true;
                return;
            }
            state.writing = true;
            self.idle.send_replace(false);
        }

        let writer = Arc::clone(self);
        tokio::spawn(async move { writer.drain().await });
    }

    async fn drain(&self) {
        loop {
            let snapshot = self.table.snapshot().await;
            if let Err(e) = self.store.save(&snapshot).await {
                // The next request rewrites everything, so nothing is lost
                // beyond this cycle.
                tracing::error!(error = %e, records = snapshot.len(), "Failed to persist punishments");
            }

            let again = {
                let mut state = self.lock_state();
                if state.pending {
                    state.pending = false;
                    true
                } else {
                    state.writing = false;
                    self.idle.send_replace(true);
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    /// Wait until no write is in flight or pending
    pub async fn flush(&self) {
        let mut idle = self.idle.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::storage::{InMemoryStore, StorageResult};
    use async_trait::async_trait;
    use chrono::Utc;
    use sinbin_types::{EntityId, PersistedPunishments};
    use tokio::sync::Semaphore;

    /// Store whose saves block until the test releases them
    struct GatedStore {
        gate: Semaphore,
        saved: Mutex<Vec<PersistedPunishments>>,
    }

    impl GatedStore {
        fn new() -> Self {
            Self {
                gate: Semaphore::new(0),
                saved: Mutex::new(Vec::new()),
            }
        }

        fn started(&self) -> usize {
            self.saved.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl PunishmentStore for GatedStore {
        async fn load(&self) -> StorageResult<PersistedPunishments> {
            Ok(PersistedPunishments::new())
        }

        async fn save(&self, punishments: &PersistedPunishments) -> StorageResult<()> {
            self.saved.lock().unwrap().push(punishments.clone());
            self.gate.acquire().await.unwrap().forget();
            Ok(())
        }
    }

    /// Store that rejects its first save
    struct FlakyStore {
        failures: Mutex<usize>,
        inner: InMemoryStore,
    }

    #[async_trait]
    impl PunishmentStore for FlakyStore {
        async fn load(&self) -> StorageResult<PersistedPunishments> {
            self.inner.load().await
        }

        async fn save(&self, punishments: &PersistedPunishments) -> StorageResult<()> {
            let fail = {
                let mut failures = self.failures.lock().unwrap();
                let fail = *failures > 0;
                *failures = failures.saturating_sub(1);
                fail
            };
            if fail {
                return Err(StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.inner.save(punishments).await
        }
    }

    #[tokio::test]
    async fn test_failed_save_is_rewritten_by_next_request() {
        let store = Arc::new(FlakyStore {
            failures: Mutex::new(1),
            inner: InMemoryStore::new(),
        });
        let table = Arc::new(MuteTable::new());
        let writer = SaveWriter::new(store.clone(), table.clone());

        table.defer(EntityId::new(42, 7), Utc::now()).await;
        writer.request_save();
        writer.flush().await;

        assert!(store.inner.contents().await.is_empty());
        assert_eq!(table.len().await, 1);

        table.defer(EntityId::new(42, 8), Utc::now()).await;
        writer.request_save();
        writer.flush().await;

        let contents = store.inner.contents().await;
        assert_eq!(contents.len(), 2);
        assert!(contents.contains_key("42 7"));
        assert!(contents.contains_key("42 8"));
    }

    #[tokio::test]
    async fn test_requests_during_a_write_coalesce() {
        let store = Arc::new(GatedStore::new());
        let table = Arc::new(MuteTable::new());
        let writer = SaveWriter::new(store.clone(), table.clone());

        table.defer(EntityId::new(1, 1), Utc::now()).await;
        writer.request_save();
        while store.started() == 0 {
            tokio::task::yield_now().await;
        }

        table.defer(EntityId::new(1, 2), Utc::now()).await;
        writer.request_save();
        table.defer(EntityId::new(1, 3), Utc::now()).await;
        writer.request_save();

        store.gate.add_permits(10);
        writer.flush().await;

        let saved = store.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[0].len(), 1);
        assert_eq!(saved[1].len(), 3);
        assert!(saved[1].contains_key("1 3"));
    }

    #[tokio::test]
    async fn test_single_request_writes_once() {
        let store = Arc::new(InMemoryStore::new());
        let table = Arc::new(MuteTable::new());
        let writer = SaveWriter::new(store.clone(), table.clone());

        table.defer(EntityId::new(42, 7), Utc::now()).await;
        writer.request_save();
        writer.flush().await;

        assert_eq!(store.writes(), 1);
        assert!(store.contents().await.contains_key("42 7"));
    }

    #[tokio::test]
    async fn test_flush_when_idle_returns_immediately() {
        let writer = SaveWriter::new(Arc::new(InMemoryStore::new()), Arc::new(MuteTable::new()));
        writer.flush().await;
    }
}
