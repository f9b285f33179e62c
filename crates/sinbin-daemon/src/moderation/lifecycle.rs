//! Mute lifecycle manager
//!
//! Owns the table of active punishments and every timer that retires them.
//! All role changes go through the [`RoleMutationExecutor`] and all
//! persistence through the [`SaveWriter`].

use super::executor::{RoleMutationExecutor, RolePolicy, SafeRemoval};
use super::table::MuteTable;
use super::writer::SaveWriter;
use crate::config::ModerationConfig;
use crate::error::{ModerationError, PlatformResult};
use crate::platform::Platform;
use crate::storage::PunishmentStore;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use sinbin_types::{
    BatchOutcome, CommunityId, EntityId, EventSource, ModerationEvent, ModerationEventEnvelope,
    PunishmentRecord, Role, RoleAction, RoleId,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::instrument;

/// What happened when a punished member came back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejoinOutcome {
    /// No active punishment for this member
    NotPunished,
    /// The punitive role was put back
    Reapplied,
    /// The member is protected by the role policy
    Protected,
    /// The punishment ran out while the member was away
    Expired,
    /// Every attempt to re-apply the role failed
    Failed,
}

/// Mute lifecycle manager
pub struct MuteManager {
    pub(super) config: ModerationConfig,
    pub(super) platform: Arc<dyn Platform>,
    pub(super) executor: RoleMutationExecutor,
    pub(super) table: Arc<MuteTable>,
    pub(super) writer: Arc<SaveWriter>,
    event_tx: broadcast::Sender<ModerationEventEnvelope>,
}

impl std::fmt::Debug for MuteManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MuteManager")
            .field("punitive_role", &self.config.punitive_role)
            .field("executor", &self.executor)
            .finish()
    }
}

fn by_community<'a>(
    entities: impl IntoIterator<Item = &'a EntityId>,
) -> BTreeMap<CommunityId, Vec<EntityId>> {
    let mut grouped: BTreeMap<CommunityId, Vec<EntityId>> = BTreeMap::new();
    for entity in entities {
        grouped.entry(entity.community_id).or_default().push(*entity);
    }
    grouped
}

impl MuteManager {
    pub fn new(
        config: ModerationConfig,
        platform: Arc<dyn Platform>,
        store: Arc<dyn PunishmentStore>,
    ) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(1024);
        let table = Arc::new(MuteTable::new());
        let writer = SaveWriter::new(store, table.clone());
        let executor = RoleMutationExecutor::new(
            platform.clone(),
            RolePolicy {
                privileged_roles: config.privileged_roles.clone(),
                testing: config.testing,
            },
            config.safe_removal_backoff(),
        );

        Arc::new(Self {
            config,
            platform,
            executor,
            table,
            writer,
            event_tx,
        })
    }

    /// Subscribe to moderation events
    pub fn subscribe(&self) -> broadcast::Receiver<ModerationEventEnvelope> {
        self.event_tx.subscribe()
    }

    /// Sender shared with other components that emit moderation events
    pub fn event_sender(&self) -> broadcast::Sender<ModerationEventEnvelope> {
        self.event_tx.clone()
    }

    /// Operator to notify about failed mutations
    pub fn operator_id(&self) -> Option<&str> {
        self.config.operator_id.as_deref()
    }

    pub(super) fn emit(&self, event: ModerationEvent, source: EventSource, actor: Option<&str>) {
        let mut envelope = ModerationEventEnvelope::new(event, source);
        if let Some(actor) = actor {
            envelope = envelope.with_actor(actor);
        }
        // No subscribers is fine
        let _ = self.event_tx.send(envelope);
    }

    /// Recover persisted punishments. Must finish before punishments are
    /// accepted.
    pub async fn start(self: &Arc<Self>) -> super::RecoveryReport {
        let report = self.recover().await;
        tracing::info!(
            loaded = report.loaded,
            rescheduled = report.rescheduled,
            expired = report.expired,
            deferred = report.deferred,
            "Mute manager started"
        );
        report
    }

    /// Cancel all timers and wait for the table to be on disk.
    pub async fn stop(self: &Arc<Self>) {
        self.table.disarm_all().await;
        self.writer.request_save();
        self.writer.flush().await;
        tracing::info!("Mute manager stopped");
    }

    /// Wait for pending saves to land
    pub async fn flush(&self) {
        self.writer.flush().await;
    }

    /// Expiry of the active punishment for `entity`, if any
    pub async fn is_punished(&self, entity: &EntityId) -> Option<DateTime<Utc>> {
        self.table.expires_at(entity).await
    }

    /// All active punishments
    pub async fn list(&self) -> Vec<PunishmentRecord> {
        self.table.records().await
    }

    pub async fn has_timer(&self, entity: &EntityId) -> bool {
        self.table.has_timer(entity).await
    }

    pub async fn armed_timers(&self) -> usize {
        self.table.armed_timers().await
    }

    pub async fn find_role(&self, community_id: CommunityId, name: &str) -> PlatformResult<Option<Role>> {
        self.platform.find_role_by_name(community_id, name).await
    }

    /// Resolve the punitive role in every community.
    ///
    /// A community without the role is a validation error; one whose lookup
    /// fails has its entities reported as failed.
    async fn punitive_roles(
        &self,
        grouped: BTreeMap<CommunityId, Vec<EntityId>>,
        outcome: &mut BatchOutcome,
    ) -> Result<Vec<(CommunityId, RoleId, Vec<EntityId>)>, ModerationError> {
        let mut batches = Vec::with_capacity(grouped.len());
        for (community_id, entities) in grouped {
            match self.find_role(community_id, &self.config.punitive_role).await {
                Ok(Some(role)) => batches.push((community_id, role.id, entities)),
                Ok(None) => {
                    return Err(ModerationError::RoleNotFound {
                        community_id,
                        role: self.config.punitive_role.clone(),
                    })
                }
                Err(e) => {
                    tracing::warn!(community = %community_id, error = %e, "Role lookup failed");
                    outcome.merge(BatchOutcome::all_failed(entities));
                }
            }
        }
        Ok(batches)
    }

    async fn apply_all(
        &self,
        batches: &[(CommunityId, RoleId, Vec<EntityId>)],
        action: RoleAction,
        outcome: &mut BatchOutcome,
    ) {
        let results = join_all(
            batches
                .iter()
                .map(|(community_id, role, entities)| {
                    self.executor.apply(*community_id, *role, entities, action)
                }),
        )
        .await;

        for result in results {
            outcome.merge(result);
        }
    }

    /// Mute `entities` for `duration`.
    ///
    /// Re-punishing an already punished entity resets its expiry; it never
    /// stacks.
    #[instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn punish(
        self: &Arc<Self>,
        entities: &BTreeSet<EntityId>,
        duration: Duration,
        actor: Option<&str>,
    ) -> Result<BatchOutcome, ModerationError> {
        if duration.is_zero() {
            return Err(ModerationError::InvalidDuration);
        }
        let span = chrono::Duration::from_std(duration)
            .map_err(|_| ModerationError::InvalidDuration)?;
        let earliest = Utc::now()
            .checked_add_signed(span)
            .ok_or(ModerationError::InvalidDuration)?;
        if entities.is_empty() {
            return Err(ModerationError::NoTargets);
        }

        let mut outcome = BatchOutcome::new();
        let batches = self.punitive_roles(by_community(entities), &mut outcome).await?;
        self.apply_all(&batches, RoleAction::Add, &mut outcome).await;

        let expires_at = Utc::now().checked_add_signed(span).unwrap_or(earliest);
        for entity in &outcome.succeeded {
            self.schedule_expiry(*entity, expires_at, duration, None).await;
            self.emit(
                ModerationEvent::Punished {
                    entity: *entity,
                    expires_at,
                },
                EventSource::Lifecycle,
                actor,
            );
        }
        if !outcome.succeeded.is_empty() {
            self.writer.request_save();
        }

        tracing::info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            %expires_at,
            "Punishment applied"
        );
        Ok(outcome)
    }

    /// Lift the punishment from `entities`.
    ///
    /// Entities without an active punishment succeed without any platform
    /// call.
    #[instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn lift(
        &self,
        entities: &BTreeSet<EntityId>,
        actor: Option<&str>,
    ) -> Result<BatchOutcome, ModerationError> {
        if entities.is_empty() {
            return Err(ModerationError::NoTargets);
        }

        let mut outcome = BatchOutcome::new();
        let mut punished = BTreeMap::new();
        for entity in entities {
            match self.table.generation(entity).await {
                Some(generation) => {
                    punished.insert(*entity, generation);
                }
                None => {
                    outcome.succeeded.insert(*entity);
                }
            }
        }
        if punished.is_empty() {
            return Ok(outcome);
        }

        let mut removal = BatchOutcome::new();
        let batches = self
            .punitive_roles(by_community(punished.keys()), &mut removal)
            .await?;
        self.apply_all(&batches, RoleAction::Remove, &mut removal).await;

        let mut removed_any = false;
        for entity in &removal.succeeded {
            let Some(&generation) = punished.get(entity) else {
                continue;
            };
            if self.table.remove_generation(entity, generation).await {
                removed_any = true;
                self.emit(
                    ModerationEvent::Lifted { entity: *entity },
                    EventSource::Lifecycle,
                    actor,
                );
            } else if self.table.contains(entity).await {
                // Punished again while the role was being removed
                tracing::info!(entity = %entity, "Entity punished again during lift, restoring role");
                self.restore_role(*entity).await;
            }
        }
        if removed_any {
            self.writer.request_save();
        }
        outcome.merge(removal);

        tracing::info!(
            succeeded = outcome.succeeded.len(),
            failed = outcome.failed.len(),
            skipped = outcome.skipped.len(),
            "Punishment lifted"
        );
        Ok(outcome)
    }

    /// Arm (or re-arm) the expiry timer for `entity`.
    ///
    /// With `expected` set, nothing happens unless the record is still at
    /// that generation.
    pub(super) async fn schedule_expiry(
        self: &Arc<Self>,
        entity: EntityId,
        expires_at: DateTime<Utc>,
        delay: Duration,
        expected: Option<u64>,
    ) -> bool {
        let manager = Arc::downgrade(self);
        self.table
            .arm(entity, expires_at, expected, move |generation| {
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(manager) = manager.upgrade() {
                        if manager.retire(entity, generation, EventSource::Lifecycle).await {
                            manager.finish_expiry(entity).await;
                        }
                    }
                })
            })
            .await
            .is_some()
    }

    /// Drop the record for `entity` if it is still at `generation`, and
    /// persist that.
    pub(super) async fn retire(&self, entity: EntityId, generation: u64, source: EventSource) -> bool {
        if !self.table.retire(&entity, generation).await {
            tracing::debug!(entity = %entity, generation, "Ignoring stale expiry");
            return false;
        }

        self.writer.request_save();
        tracing::info!(entity = %entity, "Punishment expired");
        self.emit(ModerationEvent::Expired { entity }, source, None);
        true
    }

    /// Take the punitive role away from an expired entity, however long it takes.
    pub(super) async fn finish_expiry(&self, entity: EntityId) -> SafeRemoval {
        let result = self
            .executor
            .remove_safely(&entity, &self.config.punitive_role, self.table.as_ref())
            .await;

        // A new punishment may have armed while the removal was in flight
        if result == SafeRemoval::Removed && self.table.contains(&entity).await {
            tracing::info!(entity = %entity, "Entity punished again during removal, restoring role");
            self.restore_role(entity).await;
            return SafeRemoval::Superseded;
        }

        match result {
            SafeRemoval::Removed | SafeRemoval::NotAMember => {
                tracing::debug!(entity = %entity, ?result, "Expired punishment cleaned up")
            }
            SafeRemoval::Superseded => {
                tracing::info!(entity = %entity, "Entity punished again before removal")
            }
            SafeRemoval::RoleMissing => tracing::warn!(
                entity = %entity,
                role = %self.config.punitive_role,
                "Punitive role no longer exists"
            ),
        }
        result
    }

    /// Called when a member joins a community.
    ///
    /// A punished member gets the role back, with retries; the running timer
    /// is left alone.
    #[instrument(skip(self))]
    pub async fn member_rejoined(&self, entity: EntityId) -> RejoinOutcome {
        let (Some(expires_at), Some(generation)) = (
            self.table.expires_at(&entity).await,
            self.table.generation(&entity).await,
        ) else {
            return RejoinOutcome::NotPunished;
        };

        if expires_at <= Utc::now() {
            // Nothing to remove: a returning member does not carry roles.
            return if self.retire(entity, generation, EventSource::Lifecycle).await {
                RejoinOutcome::Expired
            } else {
                RejoinOutcome::NotPunished
            };
        }

        self.restore_role(entity).await
    }

    /// Put the punitive role back on a punished entity, retrying with the
    /// configured delays.
    async fn restore_role(&self, entity: EntityId) -> RejoinOutcome {
        let mut delays = self.config.rejoin_retry_delays().into_iter();
        loop {
            if !self.table.contains(&entity).await {
                return RejoinOutcome::NotPunished;
            }

            match self.reapply(entity).await {
                Some(RejoinOutcome::Reapplied) => {
                    tracing::info!(entity = %entity, "Punitive role re-applied");
                    self.emit(
                        ModerationEvent::RoleReapplied { entity },
                        EventSource::Lifecycle,
                        None,
                    );
                    return RejoinOutcome::Reapplied;
                }
                Some(other) => return other,
                None => {}
            }

            match delays.next() {
                Some(delay) => tokio::time::sleep(delay).await,
                None => {
                    tracing::error!(entity = %entity, "Could not re-apply punitive role");
                    return RejoinOutcome::Failed;
                }
            }
        }
    }

    /// One attempt at re-adding the role; `None` means try again.
    async fn reapply(&self, entity: EntityId) -> Option<RejoinOutcome> {
        let role = match self.find_role(entity.community_id, &self.config.punitive_role).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                tracing::warn!(entity = %entity, "Punitive role not found");
                return None;
            }
            Err(e) => {
                tracing::warn!(entity = %entity, error = %e, "Role lookup failed");
                return None;
            }
        };

        let outcome = self
            .executor
            .apply(entity.community_id, role.id, &[entity], RoleAction::Add)
            .await;
        if outcome.succeeded.contains(&entity) {
            Some(RejoinOutcome::Reapplied)
        } else if outcome.skipped.contains(&entity) {
            Some(RejoinOutcome::Protected)
        } else {
            None
        }
    }
}
