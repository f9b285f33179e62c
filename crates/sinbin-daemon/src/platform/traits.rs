//! Platform trait definitions

use crate::error::PlatformResult;
use async_trait::async_trait;
use sinbin_types::{CommunityId, EntityId, MemberLookup, Role, RoleId, UserId};

/// Operations the engine needs from the chat platform
#[async_trait]
pub trait Platform: Send + Sync {
    /// Identity the daemon acts as
    async fn current_user(&self) -> PlatformResult<UserId>;

    /// Resolve a user against live membership of a community
    async fn resolve_member(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> PlatformResult<MemberLookup>;

    /// All roles defined in a community
    async fn list_roles(&self, community_id: CommunityId) -> PlatformResult<Vec<Role>>;

    /// Assign `role` to the member
    async fn add_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()>;

    /// Take `role` away from the member
    async fn remove_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()>;

    /// Remove the member from the community
    async fn kick_member(&self, entity: &EntityId) -> PlatformResult<()>;

    /// Find a community role by its exact name
    async fn find_role_by_name(
        &self,
        community_id: CommunityId,
        name: &str,
    ) -> PlatformResult<Option<Role>> {
        let roles = self.list_roles(community_id).await?;
        Ok(roles.into_iter().find(|role| role.name == name))
    }
}
