//! Bulk role mutation with an authorization policy, plus safe removal

use crate::error::{PlatformError, PlatformResult};
use crate::platform::Platform;
use async_trait::async_trait;
use futures::future::join_all;
use sinbin_types::{BatchOutcome, CommunityId, EntityId, MemberLookup, RoleAction, RoleId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::instrument;

/// Who may be mutated at all
#[derive(Debug, Clone, Default)]
pub struct RolePolicy {
    /// Names of roles whose holders are never touched
    pub privileged_roles: Vec<String>,

    /// Bypass every check (test communities only)
    pub testing: bool,
}

/// Decides whether a safe removal should still go ahead
#[async_trait]
pub trait RemovalGuard: Send + Sync {
    async fn removal_wanted(&self, entity: &EntityId) -> bool;
}

/// How a safe removal ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafeRemoval {
    /// The role was taken away
    Removed,
    /// The entity is no longer in the community; nothing left to clean up
    NotAMember,
    /// The entity was punished again before the removal could finish
    Superseded,
    /// The community has no role by that name anymore
    RoleMissing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Succeeded,
    Failed,
    Skipped,
}

/// Identities the policy protects within one community
struct Exemptions {
    self_id: UserId,
    privileged: Vec<RoleId>,
}

/// Applies the punitive role to sets of members
pub struct RoleMutationExecutor {
    platform: Arc<dyn Platform>,
    policy: RolePolicy,
    backoff: Duration,
    self_id: OnceCell<UserId>,
}

impl std::fmt::Debug for RoleMutationExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoleMutationExecutor")
            .field("policy", &self.policy)
            .field("backoff", &self.backoff)
            .finish()
    }
}

impl RoleMutationExecutor {
    pub fn new(platform: Arc<dyn Platform>, policy: RolePolicy, backoff: Duration) -> Self {
        Self {
            platform,
            policy,
            backoff,
            self_id: OnceCell::new(),
        }
    }

    pub fn policy(&self) -> &RolePolicy {
        &self.policy
    }

    async fn self_id(&self) -> PlatformResult<UserId> {
        self.self_id
            .get_or_try_init(|| self.platform.current_user())
            .await
            .copied()
    }

    async fn exemptions(&self, community_id: CommunityId) -> PlatformResult<Option<Exemptions>> {
        if self.policy.testing {
            return Ok(None);
        }

        let self_id = self.self_id().await?;
        let privileged = if self.policy.privileged_roles.is_empty() {
            Vec::new()
        } else {
            self.platform
                .list_roles(community_id)
                .await?
                .into_iter()
                .filter(|role| self.policy.privileged_roles.contains(&role.name))
                .map(|role| role.id)
                .collect()
        };

        Ok(Some(Exemptions {
            self_id,
            privileged,
        }))
    }

    /// Add or remove `role` on every entity of one community.
    ///
    /// Entities are handled concurrently and independently; one failure
    /// never stops the others. Policy-protected members end up in
    /// `skipped`.
    #[instrument(skip(self, entities), fields(count = entities.len()))]
    pub async fn apply(
        &self,
        community_id: CommunityId,
        role: RoleId,
        entities: &[EntityId],
        action: RoleAction,
    ) -> BatchOutcome {
        let exemptions = match self.exemptions(community_id).await {
            Ok(exemptions) => exemptions,
            Err(e) => {
                tracing::warn!(error = %e, "Could not evaluate role policy");
                return BatchOutcome::all_failed(entities.iter().copied());
            }
        };

        let results = join_all(
            entities
                .iter()
                .map(|entity| self.apply_one(*entity, role, action, exemptions.as_ref())),
        )
        .await;

        let mut outcome = BatchOutcome::new();
        for (entity, disposition) in entities.iter().zip(results) {
            match disposition {
                Disposition::Succeeded => outcome.succeeded.insert(*entity),
                Disposition::Failed => outcome.failed.insert(*entity),
                Disposition::Skipped => outcome.skipped.insert(*entity),
            };
        }
        outcome
    }

    async fn apply_one(
        &self,
        entity: EntityId,
        role: RoleId,
        action: RoleAction,
        exemptions: Option<&Exemptions>,
    ) -> Disposition {
        let lookup = match self
            .platform
            .resolve_member(entity.community_id, entity.user_id)
            .await
        {
            Ok(lookup) => lookup,
            Err(e) => {
                tracing::warn!(entity = %entity, error = %e, "Member lookup failed");
                return Disposition::Failed;
            }
        };

        let member = match lookup {
            MemberLookup::Present(member) => member,
            MemberLookup::Absent => {
                return match action {
                    RoleAction::Remove => Disposition::Succeeded,
                    RoleAction::Add => Disposition::Failed,
                };
            }
            MemberLookup::Unavailable => {
                tracing::warn!(entity = %entity, "Community unavailable");
                return Disposition::Failed;
            }
        };

        if let Some(exemptions) = exemptions {
            let protected = member.user_id == exemptions.self_id
                || member.bot
                || exemptions.privileged.iter().any(|r| member.has_role(*r));
            if protected {
                tracing::debug!(entity = %entity, "Skipping protected member");
                return Disposition::Skipped;
            }
        }

        let result = match action {
            RoleAction::Add => self.platform.add_role(&entity, role).await,
            RoleAction::Remove => self.platform.remove_role(&entity, role).await,
        };

        match result {
            Ok(()) => Disposition::Succeeded,
            Err(e) if action == RoleAction::Remove && e.is_unknown_entity() => {
                Disposition::Succeeded
            }
            Err(e) => {
                tracing::warn!(entity = %entity, ?action, error = %e, "Role mutation failed");
                Disposition::Failed
            }
        }
    }

    /// Remove the role named `role_name`, retrying forever.
    ///
    /// Stops as soon as the entity turns out not to be a member, or `guard`
    /// says the removal is no longer wanted. Bypasses the policy.
    #[instrument(skip(self, guard))]
    pub async fn remove_safely(
        &self,
        entity: &EntityId,
        role_name: &str,
        guard: &dyn RemovalGuard,
    ) -> SafeRemoval {
        let mut attempt: u64 = 0;

        loop {
            if !guard.removal_wanted(entity).await {
                return SafeRemoval::Superseded;
            }
            attempt += 1;

            match self.try_remove(entity, role_name).await {
                Ok(Some(done)) => return done,
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        entity = %entity,
                        attempt,
                        error = %e,
                        retry_in_ms = self.backoff.as_millis() as u64,
                        "Role removal failed, retrying"
                    );
                }
            }

            tokio::time::sleep(self.backoff).await;
        }
    }

    async fn try_remove(
        &self,
        entity: &EntityId,
        role_name: &str,
    ) -> Result<Option<SafeRemoval>, PlatformError> {
        let role = match self
            .platform
            .find_role_by_name(entity.community_id, role_name)
            .await
        {
            Ok(Some(role)) => role,
            Ok(None) => return Ok(Some(SafeRemoval::RoleMissing)),
            Err(e) if e.is_unknown_entity() => return Ok(Some(SafeRemoval::NotAMember)),
            Err(e) => return Err(e),
        };

        match self.platform.remove_role(entity, role.id).await {
            Ok(()) => Ok(Some(SafeRemoval::Removed)),
            Err(e) if e.is_unknown_entity() => Ok(Some(SafeRemoval::NotAMember)),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryPlatform;
    use sinbin_types::Member;

    struct AlwaysWanted;

    #[async_trait]
    impl RemovalGuard for AlwaysWanted {
        async fn removal_wanted(&self, _entity: &EntityId) -> bool {
            true
        }
    }

    async fn community() -> (Arc<InMemoryPlatform>, RoleId, RoleId) {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        let sinbin = platform.create_role(community, "sinbin").await;
        let staff = platform.create_role(community, "staff").await;

        platform.insert_member(community, Member::new(1)).await;
        platform.insert_member(community, Member::new(7)).await;
        platform.insert_member(community, Member::new(8).bot()).await;
        platform
            .insert_member(community, Member::new(9).with_role(staff))
            .await;
        (platform, sinbin, staff)
    }

    fn executor(platform: Arc<InMemoryPlatform>, testing: bool) -> RoleMutationExecutor {
        RoleMutationExecutor::new(
            platform,
            RolePolicy {
                privileged_roles: vec!["staff".to_string()],
                testing,
            },
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_policy_skips_protected_members() {
        let (platform, sinbin, _) = community().await;
        let executor = executor(platform.clone(), false);

        let entities: Vec<_> = [1, 7, 8, 9, 10].map(|u| EntityId::new(42, u)).into();
        let outcome = executor
            .apply(CommunityId::new(42), sinbin, &entities, RoleAction::Add)
            .await;

        assert_eq!(outcome.succeeded.len(), 1);
        assert!(outcome.succeeded.contains(&EntityId::new(42, 7)));
        // 10 is not a member
        assert_eq!(outcome.failed.len(), 1);
        assert!(outcome.failed.contains(&EntityId::new(42, 10)));
        assert_eq!(outcome.skipped.len(), 3);
        assert_eq!(platform.mutation_calls(), 1);
    }

    #[tokio::test]
    async fn test_testing_mode_bypasses_policy() {
        let (platform, sinbin, _) = community().await;
        let executor = executor(platform.clone(), true);

        let entities: Vec<_> = [1, 8, 9].map(|u| EntityId::new(42, u)).into();
        let outcome = executor
            .apply(CommunityId::new(42), sinbin, &entities, RoleAction::Add)
            .await;

        assert_eq!(outcome.succeeded.len(), 3);
        assert!(outcome.skipped.is_empty());
    }

    #[tokio::test]
    async fn test_absent_member_removal_succeeds() {
        let (platform, sinbin, _) = community().await;
        let executor = executor(platform, false);

        let outcome = executor
            .apply(
                CommunityId::new(42),
                sinbin,
                &[EntityId::new(42, 99)],
                RoleAction::Remove,
            )
            .await;
        assert!(outcome.succeeded.contains(&EntityId::new(42, 99)));
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_others() {
        let (platform, sinbin, _) = community().await;
        platform.insert_member(CommunityId::new(42), Member::new(11)).await;
        platform.fail_mutations(EntityId::new(42, 7), 1).await;
        let executor = executor(platform.clone(), false);

        let entities = [EntityId::new(42, 7), EntityId::new(42, 11)];
        let outcome = executor
            .apply(CommunityId::new(42), sinbin, &entities, RoleAction::Add)
            .await;

        assert!(outcome.failed.contains(&EntityId::new(42, 7)));
        assert!(outcome.succeeded.contains(&EntityId::new(42, 11)));
        assert!(platform.has_role(&EntityId::new(42, 11), sinbin).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safe_removal_retries_until_success() {
        let (platform, sinbin, _) = community().await;
        let entity = EntityId::new(42, 7);
        platform.add_role(&entity, sinbin).await.unwrap();
        platform.fail_mutations(entity, 3).await;
        let executor = executor(platform.clone(), false);

        let started = tokio::time::Instant::now();
        let result = executor.remove_safely(&entity, "sinbin", &AlwaysWanted).await;

        assert_eq!(result, SafeRemoval::Removed);
        assert!(!platform.has_role(&entity, sinbin).await);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_safe_removal_absent_member_terminates() {
        let (platform, _, _) = community().await;
        let executor = executor(platform, false);

        let result = executor
            .remove_safely(&EntityId::new(42, 99), "sinbin", &AlwaysWanted)
            .await;
        assert_eq!(result, SafeRemoval::NotAMember);
    }
}
