//! Startup recovery and reconciliation of deferred punishments

use super::lifecycle::MuteManager;
use super::table::DeferredMute;
use crate::error::PlatformResult;
use chrono::Utc;
use serde::Serialize;
use sinbin_types::{
    CommunityId, EventSource, MemberLookup, ModerationEvent, PersistedPunishments,
    PunishmentRecord, RoleAction, RoleId,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Counts from a recovery or reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Records read from the store
    pub loaded: usize,
    /// Records with an unparseable key, dropped
    pub discarded: usize,
    /// Records given a fresh timer
    pub rescheduled: usize,
    /// Live members whose punitive role had to be re-added
    pub repaired: usize,
    /// Records that ran out while the process was down
    pub expired: usize,
    /// Records left for a later pass
    pub deferred: usize,
}

impl RecoveryReport {
    fn absorb(&mut self, pass: RecoveryReport) {
        self.rescheduled += pass.rescheduled;
        self.repaired += pass.repaired;
        self.expired += pass.expired;
        self.deferred += pass.deferred;
    }
}

enum Step {
    Rescheduled { repaired: bool },
    Expired,
    Deferred,
    /// Replaced or removed by someone else during the pass
    Superseded,
}

impl MuteManager {
    /// Load the store and reconcile every record against live membership.
    ///
    /// A store that cannot be read counts as empty.
    pub async fn recover(self: &Arc<Self>) -> RecoveryReport {
        let persisted = match self.writer.store().load().await {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::error!(error = %e, "Could not load persisted punishments, starting empty");
                PersistedPunishments::new()
            }
        };

        let mut report = RecoveryReport::default();
        for (key, value) in &persisted {
            match PunishmentRecord::from_persisted(key, value) {
                Ok(record) => {
                    self.table.defer(record.entity, record.expires_at).await;
                    report.loaded += 1;
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Discarding malformed punishment");
                    report.discarded += 1;
                }
            }
        }

        report.absorb(self.reconcile_deferred().await);
        if report.discarded > 0 {
            self.writer.request_save();
        }
        report
    }

    /// Retry every record that has no timer yet.
    pub async fn reconcile_deferred(self: &Arc<Self>) -> RecoveryReport {
        let mut report = RecoveryReport::default();
        let mut roles = HashMap::new();

        for deferred in self.table.deferred().await {
            match self.reconcile_one(deferred, &mut roles).await {
                Step::Rescheduled { repaired } => {
                    report.rescheduled += 1;
                    if repaired {
                        report.repaired += 1;
                    }
                }
                Step::Expired => report.expired += 1,
                Step::Deferred => report.deferred += 1,
                Step::Superseded => {}
            }
        }

        if report != RecoveryReport::default() {
            tracing::info!(
                rescheduled = report.rescheduled,
                repaired = report.repaired,
                expired = report.expired,
                deferred = report.deferred,
                "Reconciled punishments"
            );
        }
        report
    }

    async fn punitive_role_cached(
        &self,
        community_id: CommunityId,
        cache: &mut HashMap<CommunityId, Option<RoleId>>,
    ) -> PlatformResult<Option<RoleId>> {
        if let Some(role) = cache.get(&community_id) {
            return Ok(*role);
        }
        let role = self
            .find_role(community_id, &self.config.punitive_role)
            .await?
            .map(|role| role.id);
        cache.insert(community_id, role);
        Ok(role)
    }

    async fn reconcile_one(
        self: &Arc<Self>,
        deferred: DeferredMute,
        roles: &mut HashMap<CommunityId, Option<RoleId>>,
    ) -> Step {
        let DeferredMute {
            entity,
            expires_at,
            generation,
        } = deferred;

        let lookup = match self
            .platform
            .resolve_member(entity.community_id, entity.user_id)
            .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(entity = %entity, error = %e, "Membership lookup failed");
                return Step::Deferred;
            }
        };

        let member = match lookup {
            MemberLookup::Present(member) => Some(member),
            MemberLookup::Absent => None,
            MemberLookup::Unavailable => {
                tracing::debug!(entity = %entity, "Community unavailable, deferring");
                self.emit(
                    ModerationEvent::Deferred {
                        entity,
                        reason: "community unavailable".to_string(),
                    },
                    EventSource::Recovery,
                    None,
                );
                return Step::Deferred;
            }
        };

        let Some(remaining) = PunishmentRecord::new(entity, expires_at).remaining(Utc::now()) else {
            if !self.retire(entity, generation, EventSource::Recovery).await {
                return Step::Superseded;
            }
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                manager.finish_expiry(entity).await;
            });
            return Step::Expired;
        };

        let mut repaired = false;
        if let Some(member) = member {
            match self.punitive_role_cached(entity.community_id, roles).await {
                Ok(Some(role)) if !member.has_role(role) => {
                    let outcome = self
                        .executor
                        .apply(entity.community_id, role, &[entity], RoleAction::Add)
                        .await;
                    if outcome.succeeded.contains(&entity) {
                        repaired = true;
                        self.emit(
                            ModerationEvent::RoleReapplied { entity },
                            EventSource::Recovery,
                            None,
                        );
                    } else if outcome.skipped.contains(&entity) {
                        tracing::debug!(entity = %entity, "Protected member, not repairing role");
                    } else {
                        tracing::warn!(entity = %entity, "Could not repair punitive role");
                    }
                }
                Ok(Some(_)) => {}
                Ok(None) => tracing::warn!(
                    community = %entity.community_id,
                    role = %self.config.punitive_role,
                    "Punitive role not found"
                ),
                Err(e) => {
                    tracing::warn!(entity = %entity, error = %e, "Role lookup failed");
                    return Step::Deferred;
                }
            }
        }

        if !self
            .schedule_expiry(entity, expires_at, remaining, Some(generation))
            .await
        {
            return Step::Superseded;
        }

        self.emit(
            ModerationEvent::Rescheduled { entity, expires_at },
            EventSource::Recovery,
            None,
        );
        Step::Rescheduled { repaired }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use crate::platform::InMemoryPlatform;
    use crate::error::StorageError;
    use crate::storage::{InMemoryStore, PunishmentStore, StorageResult};
    use async_trait::async_trait;
    use sinbin_types::{EntityId, Member, PersistedPunishment};
    use std::collections::BTreeSet;
    use std::time::Duration;

    fn persisted(entries: &[(&str, i64)]) -> PersistedPunishments {
        entries
            .iter()
            .map(|(key, ends_at)| (key.to_string(), PersistedPunishment { ends_at: *ends_at }))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_community_is_deferred_then_retried() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        let role = platform.create_role(community, "sinbin").await;
        platform.insert_member(community, Member::new(7)).await;
        platform.set_available(community, false).await;

        let ends_at = Utc::now().timestamp_millis() + 600_000;
        let store = Arc::new(InMemoryStore::with_contents(persisted(&[("42 7", ends_at)])));
        let manager = MuteManager::new(ModerationConfig::default(), platform.clone(), store);

        let report = manager.recover().await;
        assert_eq!(report.loaded, 1);
        assert_eq!(report.deferred, 1);
        let entity = EntityId::new(42, 7);
        assert!(manager.is_punished(&entity).await.is_some());
        assert!(!manager.has_timer(&entity).await);

        platform.set_available(community, true).await;
        let report = manager.reconcile_deferred().await;
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.repaired, 1);
        assert!(manager.has_timer(&entity).await);
        assert!(platform.has_role(&entity, role).await);
    }

    #[tokio::test]
    async fn test_malformed_keys_are_discarded() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        platform.add_community(42).await;
        let store = Arc::new(InMemoryStore::with_contents(persisted(&[("garbage", 0)])));
        let manager = MuteManager::new(ModerationConfig::default(), platform, store.clone());

        let report = manager.recover().await;
        manager.flush().await;

        assert_eq!(report.discarded, 1);
        assert!(manager.list().await.is_empty());
        assert!(store.contents().await.is_empty());
    }

    /// Store that cannot be read
    struct UnreadableStore;

    #[async_trait]
    impl PunishmentStore for UnreadableStore {
        async fn load(&self) -> StorageResult<PersistedPunishments> {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk gone",
            )))
        }

        async fn save(&self, _punishments: &PersistedPunishments) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unreadable_store_starts_empty() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        platform.create_role(community, "sinbin").await;
        platform.insert_member(community, Member::new(7)).await;
        let manager = MuteManager::new(
            ModerationConfig::default(),
            platform,
            Arc::new(UnreadableStore),
        );

        let report = manager.start().await;
        assert_eq!(report, RecoveryReport::default());
        assert!(manager.list().await.is_empty());

        let entity = EntityId::new(42, 7);
        let outcome = manager
            .punish(&BTreeSet::from([entity]), Duration::from_secs(60), None)
            .await
            .unwrap();
        assert!(outcome.succeeded.contains(&entity));
    }

    #[tokio::test(start_paused = true)]
    async fn test_repair_respects_role_policy() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        let sinbin = platform.create_role(community, "sinbin").await;
        let staff = platform.create_role(community, "staff").await;
        platform.insert_member(community, Member::new(7)).await;
        platform.insert_member(community, Member::new(8).bot()).await;
        platform
            .insert_member(community, Member::new(9).with_role(staff))
            .await;

        let ends_at = Utc::now().timestamp_millis() + 600_000;
        let store = Arc::new(InMemoryStore::with_contents(persisted(&[
            ("42 7", ends_at),
            ("42 8", ends_at),
            ("42 9", ends_at),
        ])));
        let config = ModerationConfig {
            privileged_roles: vec!["staff".to_string()],
            ..ModerationConfig::default()
        };
        let manager = MuteManager::new(config, platform.clone(), store);

        let report = manager.start().await;
        assert_eq!(report.rescheduled, 3);
        assert_eq!(report.repaired, 1);

        assert!(platform.has_role(&EntityId::new(42, 7), sinbin).await);
        for protected in [EntityId::new(42, 8), EntityId::new(42, 9)] {
            assert!(!platform.has_role(&protected, sinbin).await);
            assert!(manager.has_timer(&protected).await);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_absent_member_keeps_timer() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        platform.create_role(community, "sinbin").await;

        let ends_at = Utc::now().timestamp_millis() + 60_000;
        let store = Arc::new(InMemoryStore::with_contents(persisted(&[("42 7", ends_at)])));
        let manager = MuteManager::new(ModerationConfig::default(), platform, store);

        let report = manager.recover().await;
        assert_eq!(report.rescheduled, 1);
        assert_eq!(report.repaired, 0);

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(manager.list().await.is_empty());
    }
}
