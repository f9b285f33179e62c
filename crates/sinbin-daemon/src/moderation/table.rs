//! Authoritative in-memory table of active punishments

use super::executor::RemovalGuard;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sinbin_types::{EntityId, PersistedPunishments, PunishmentRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// A live punishment and the timer that will retire it
#[derive(Debug)]
struct ActiveMute {
    expires_at: DateTime<Utc>,
    /// Changes every time the record is replaced; timers carry the value
    /// they were armed with and do nothing if it no longer matches.
    generation: u64,
    /// `None` while the record is deferred
    timer: Option<JoinHandle<()>>,
}

impl ActiveMute {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// A record without a timer, waiting for its community to become resolvable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeferredMute {
    pub entity: EntityId,
    pub expires_at: DateTime<Utc>,
    pub generation: u64,
}

/// Map of active punishments keyed by entity.
///
/// Holds at most one timer per entity: every replacement aborts the previous
/// timer while the write lock is held.
#[derive(Debug, Default)]
pub struct MuteTable {
    mutes: RwLock<HashMap<EntityId, ActiveMute>>,
    next_generation: AtomicU64,
}

impl MuteTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Install a record with a timer started by `start_timer`.
    ///
    /// When `expected` is given the record is only replaced if its current
    /// generation still matches; returns the new generation, or `None` when
    /// the record moved on in the meantime.
    pub async fn arm<F>(
        &self,
        entity: EntityId,
        expires_at: DateTime<Utc>,
        expected: Option<u64>,
        start_timer: F,
    ) -> Option<u64>
    where
        F: FnOnce(u64) -> JoinHandle<()>,
    {
        let mut mutes = self.mutes.write().await;

        if let Some(expected) = expected {
            match mutes.get(&entity) {
                Some(current) if current.generation == expected => {}
                _ => return None,
            }
        }

        if let Some(mut previous) = mutes.remove(&entity) {
            previous.cancel_timer();
        }

        let generation = self.bump();
        // Spawned under the write lock, so the timer can never observe the
        // table before its own record is in place.
        let timer = start_timer(generation);
        mutes.insert(
            entity,
            ActiveMute {
                expires_at,
                generation,
                timer: Some(timer),
            },
        );

        Some(generation)
    }

    /// Insert a record without a timer, replacing (and cancelling) any existing one
    pub async fn defer(&self, entity: EntityId, expires_at: DateTime<Utc>) -> u64 {
        let mut mutes = self.mutes.write().await;
        if let Some(mut previous) = mutes.remove(&entity) {
            previous.cancel_timer();
        }

        let generation = self.bump();
        mutes.insert(
            entity,
            ActiveMute {
                expires_at,
                generation,
                timer: None,
            },
        );
        generation
    }

    /// Remove the record if it is still at `generation`.
    ///
    /// The timer handle is dropped without aborting: the caller is usually
    /// that very timer.
    pub async fn retire(&self, entity: &EntityId, generation: u64) -> bool {
        let mut mutes = self.mutes.write().await;
        match mutes.get(entity) {
            Some(current) if current.generation == generation => {
                mutes.remove(entity);
                true
            }
            _ => false,
        }
    }

    /// Remove the record only if it is still at `generation`, cancelling its
    /// timer.
    pub async fn remove_generation(&self, entity: &EntityId, generation: u64) -> bool {
        let mut mutes = self.mutes.write().await;
        match mutes.get(entity) {
            Some(current) if current.generation == generation => {
                if let Some(mut mute) = mutes.remove(entity) {
                    mute.cancel_timer();
                }
                true
            }
            _ => false,
        }
    }

    pub async fn expires_at(&self, entity: &EntityId) -> Option<DateTime<Utc>> {
        self.mutes.read().await.get(entity).map(|m| m.expires_at)
    }

    pub async fn generation(&self, entity: &EntityId) -> Option<u64> {
        self.mutes.read().await.get(entity).map(|m| m.generation)
    }

    pub async fn contains(&self, entity: &EntityId) -> bool {
        self.mutes.read().await.contains_key(entity)
    }

    pub async fn len(&self) -> usize {
        self.mutes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mutes.read().await.is_empty()
    }

    /// Whether a live timer is armed for `entity`
    pub async fn has_timer(&self, entity: &EntityId) -> bool {
        self.mutes
            .read()
            .await
            .get(entity)
            .and_then(|m| m.timer.as_ref())
            .is_some_and(|timer| !timer.is_finished())
    }

    /// Number of armed timers that have not fired yet
    pub async fn armed_timers(&self) -> usize {
        self.mutes
            .read()
            .await
            .values()
            .filter_map(|m| m.timer.as_ref())
            .filter(|timer| !timer.is_finished())
            .count()
    }

    /// All records, sorted by entity
    pub async fn records(&self) -> Vec<PunishmentRecord> {
        let mut records: Vec<_> = self
            .mutes
            .read()
            .await
            .iter()
            .map(|(entity, mute)| PunishmentRecord::new(*entity, mute.expires_at))
            .collect();
        records.sort_by_key(|r| r.entity);
        records
    }

    /// Records currently waiting without a timer
    pub async fn deferred(&self) -> Vec<DeferredMute> {
        let mut deferred: Vec<_> = self
            .mutes
            .read()
            .await
            .iter()
            .filter(|(_, mute)| mute.timer.is_none())
            .map(|(entity, mute)| DeferredMute {
                entity: *entity,
                expires_at: mute.expires_at,
                generation: mute.generation,
            })
            .collect();
        deferred.sort_by_key(|d| d.entity);
        deferred
    }

    /// Persisted form of the whole table
    pub async fn snapshot(&self) -> PersistedPunishments {
        self.mutes
            .read()
            .await
            .iter()
            .map(|(entity, mute)| PunishmentRecord::new(*entity, mute.expires_at).to_persisted())
            .collect()
    }

    /// Abort every timer, leaving the records deferred
    pub async fn disarm_all(&self) {
        for mute in self.mutes.write().await.values_mut() {
            mute.cancel_timer();
        }
    }
}

/// Safe removal keeps going only while nobody re-punished the entity.
#[async_trait]
impl RemovalGuard for MuteTable {
    async fn removal_wanted(&self, entity: &EntityId) -> bool {
        !self.contains(entity).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn idle_timer() -> JoinHandle<()> {
        tokio::spawn(tokio::time::sleep(Duration::from_secs(3600)))
    }

    #[tokio::test]
    async fn test_rearm_replaces_timer() {
        let table = MuteTable::new();
        let entity = EntityId::new(42, 7);
        let now = Utc::now();

        let first = table.arm(entity, now, None, |_| idle_timer()).await.unwrap();
        let second = table
            .arm(entity, now + chrono::Duration::seconds(10), None, |_| idle_timer())
            .await
            .unwrap();

        assert_ne!(first, second);
        assert_eq!(table.len().await, 1);
        assert_eq!(table.armed_timers().await, 1);
        assert!(!table.retire(&entity, first).await);
        assert!(table.retire(&entity, second).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_arm_respects_expected_generation() {
        let table = MuteTable::new();
        let entity = EntityId::new(42, 7);
        let now = Utc::now();

        let stale = table.defer(entity, now).await;
        let fresh = table.defer(entity, now).await;

        assert!(table.arm(entity, now, Some(stale), |_| idle_timer()).await.is_none());
        assert!(table.arm(entity, now, Some(fresh), |_| idle_timer()).await.is_some());
        assert!(table.deferred().await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_generation_keeps_newer_record() {
        let table = MuteTable::new();
        let entity = EntityId::new(42, 7);
        let now = Utc::now();

        let lifted = table.arm(entity, now, None, |_| idle_timer()).await.unwrap();
        let current = table.arm(entity, now, None, |_| idle_timer()).await.unwrap();

        assert!(!table.remove_generation(&entity, lifted).await);
        assert_eq!(table.armed_timers().await, 1);
        assert!(table.remove_generation(&entity, current).await);
        assert!(table.is_empty().await);
        assert_eq!(table.armed_timers().await, 0);
    }

    #[tokio::test]
    async fn test_snapshot_uses_storage_keys() {
        let table = MuteTable::new();
        let expires_at = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        table.defer(EntityId::new(42, 7), expires_at).await;

        let snapshot = table.snapshot().await;
        assert_eq!(snapshot["42 7"].ends_at, 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_disarm_all_defers_records() {
        let table = MuteTable::new();
        let entity = EntityId::new(1, 2);
        table.arm(entity, Utc::now(), None, |_| idle_timer()).await;

        table.disarm_all().await;
        assert_eq!(table.armed_timers().await, 0);
        assert_eq!(table.deferred().await.len(), 1);
    }
}
