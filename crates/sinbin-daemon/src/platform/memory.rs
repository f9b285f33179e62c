//! Simulated community for development and testing

use super::traits::Platform;
use crate::error::{PlatformError, PlatformResult, UNKNOWN_GUILD};
use async_trait::async_trait;
use sinbin_types::{CommunityId, EntityId, Member, MemberLookup, Role, RoleId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::RwLock;

const UNKNOWN_MEMBER: u64 = 10_007;
const UNKNOWN_ROLE: u64 = 10_011;

/// In-memory platform with controllable membership and failures
#[derive(Debug)]
pub struct InMemoryPlatform {
    self_id: UserId,
    state: RwLock<PlatformState>,
    next_role_id: AtomicU64,
    mutation_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct PlatformState {
    communities: HashMap<CommunityId, CommunityState>,
    /// Remaining injected failures per entity
    failures: HashMap<EntityId, u32>,
    kicked: Vec<EntityId>,
}

#[derive(Debug)]
struct CommunityState {
    available: bool,
    roles: Vec<Role>,
    members: HashMap<UserId, Member>,
}

impl Default for InMemoryPlatform {
    fn default() -> Self {
        Self::new(UserId::new(1))
    }
}

impl InMemoryPlatform {
    /// Create a platform where the daemon acts as `self_id`
    pub fn new(self_id: impl Into<UserId>) -> Self {
        Self {
            self_id: self_id.into(),
            state: RwLock::new(PlatformState::default()),
            next_role_id: AtomicU64::new(1_000),
            mutation_calls: AtomicUsize::new(0),
        }
    }

    pub fn self_id(&self) -> UserId {
        self.self_id
    }

    /// Register an available community with no roles or members
    pub async fn add_community(&self, community_id: impl Into<CommunityId>) -> CommunityId {
        let community_id = community_id.into();
        self.state.write().await.communities.insert(
            community_id,
            CommunityState {
                available: true,
                roles: Vec::new(),
                members: HashMap::new(),
            },
        );
        community_id
    }

    pub async fn set_available(&self, community_id: CommunityId, available: bool) {
        if let Some(community) = self.state.write().await.communities.get_mut(&community_id) {
            community.available = available;
        }
    }

    /// Define a role; returns its generated id
    pub async fn create_role(&self, community_id: CommunityId, name: &str) -> RoleId {
        let id = RoleId::new(self.next_role_id.fetch_add(1, Ordering::SeqCst));
        let mut state = self.state.write().await;
        if let Some(community) = state.communities.get_mut(&community_id) {
            community.roles.push(Role {
                id,
                name: name.to_string(),
            });
        }
        id
    }

    pub async fn insert_member(&self, community_id: CommunityId, member: Member) {
        let mut state = self.state.write().await;
        if let Some(community) = state.communities.get_mut(&community_id) {
            community.members.insert(member.user_id, member);
        }
    }

    pub async fn remove_member(&self, entity: &EntityId) {
        let mut state = self.state.write().await;
        if let Some(community) = state.communities.get_mut(&entity.community_id) {
            community.members.remove(&entity.user_id);
        }
    }

    /// Make the next `count` role mutations against `entity` fail transiently
    pub async fn fail_mutations(&self, entity: EntityId, count: u32) {
        self.state.write().await.failures.insert(entity, count);
    }

    pub async fn member_roles(&self, entity: &EntityId) -> Option<Vec<RoleId>> {
        let state = self.state.read().await;
        state
            .communities
            .get(&entity.community_id)?
            .members
            .get(&entity.user_id)
            .map(|member| member.roles.clone())
    }

    pub async fn has_role(&self, entity: &EntityId, role: RoleId) -> bool {
        self.member_roles(entity)
            .await
            .is_some_and(|roles| roles.contains(&role))
    }

    pub async fn kicked(&self) -> Vec<EntityId> {
        self.state.read().await.kicked.clone()
    }

    /// Number of add/remove role calls received so far
    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    async fn mutate_member<F>(&self, entity: &EntityId, role: RoleId, apply: F) -> PlatformResult<()>
    where
        F: FnOnce(&mut Member),
    {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state.write().await;
        if let Some(remaining) = state.failures.get_mut(entity) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(api_error(500, None, "injected failure"));
            }
        }

        let community = available_community(&mut state, entity.community_id)?;
        if !community.roles.iter().any(|r| r.id == role) {
            return Err(api_error(404, Some(UNKNOWN_ROLE), "Unknown Role"));
        }
        let member = community
            .members
            .get_mut(&entity.user_id)
            .ok_or_else(|| api_error(404, Some(UNKNOWN_MEMBER), "Unknown Member"))?;

        apply(member);
        Ok(())
    }
}

fn api_error(status: u16, code: Option<u64>, message: &str) -> PlatformError {
    PlatformError::Api {
        status,
        code,
        message: message.to_string(),
    }
}

fn available_community(
    state: &mut PlatformState,
    community_id: CommunityId,
) -> PlatformResult<&mut CommunityState> {
    match state.communities.get_mut(&community_id) {
        Some(community) if community.available => Ok(community),
        Some(_) => Err(api_error(503, None, "community unavailable")),
        None => Err(api_error(404, Some(UNKNOWN_GUILD), "Unknown Guild")),
    }
}

#[async_trait]
impl Platform for InMemoryPlatform {
    async fn current_user(&self) -> PlatformResult<UserId> {
        Ok(self.self_id)
    }

    async fn resolve_member(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> PlatformResult<MemberLookup> {
        let state = self.state.read().await;
        let Some(community) = state.communities.get(&community_id) else {
            return Ok(MemberLookup::Unavailable);
        };
        if !community.available {
            return Ok(MemberLookup::Unavailable);
        }

        Ok(community
            .members
            .get(&user_id)
            .cloned()
            .map_or(MemberLookup::Absent, MemberLookup::Present))
    }

    async fn list_roles(&self, community_id: CommunityId) -> PlatformResult<Vec<Role>> {
        let mut state = self.state.write().await;
        Ok(available_community(&mut state, community_id)?.roles.clone())
    }

    async fn add_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()> {
        self.mutate_member(entity, role, |member| {
            if !member.has_role(role) {
                member.roles.push(role);
            }
        })
        .await
    }

    async fn remove_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()> {
        self.mutate_member(entity, role, |member| member.roles.retain(|r| *r != role))
            .await
    }

    async fn kick_member(&self, entity: &EntityId) -> PlatformResult<()> {
        let mut state = self.state.write().await;
        let community = available_community(&mut state, entity.community_id)?;
        if community.members.remove(&entity.user_id).is_none() {
            return Err(api_error(404, Some(UNKNOWN_MEMBER), "Unknown Member"));
        }
        state.kicked.push(*entity);
        Ok(())
    }
}
