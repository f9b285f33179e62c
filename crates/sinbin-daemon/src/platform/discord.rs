//! Discord REST adapter

use super::traits::Platform;
use crate::error::{PlatformError, PlatformResult, UNKNOWN_GUILD};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sinbin_types::{CommunityId, EntityId, Member, MemberLookup, Role, RoleId, UserId};
use std::str::FromStr;
use std::time::Duration;

/// Member lookups answering with these codes mean the user is not in the guild
const ABSENT_MEMBER_CODES: [u64; 2] = [10_007, 10_013];

/// Platform backed by the Discord HTTP API
#[derive(Clone)]
pub struct DiscordPlatform {
    client: Client,
    api_base: String,
    token: String,
    lookup_timeout: Duration,
}

impl std::fmt::Debug for DiscordPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordPlatform")
            .field("api_base", &self.api_base)
            .field("lookup_timeout", &self.lookup_timeout)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UserDto {
    id: String,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct MemberDto {
    user: UserDto,
    #[serde(default)]
    roles: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct RoleDto {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<u64>,
    #[serde(default)]
    message: String,
}

fn snowflake<T: FromStr>(raw: &str) -> PlatformResult<T> {
    raw.parse()
        .map_err(|_| PlatformError::Decode(format!("invalid snowflake {raw:?}")))
}

impl DiscordPlatform {
    pub fn new(
        api_base: impl Into<String>,
        token: impl Into<String>,
        lookup_timeout: Duration,
    ) -> PlatformResult<Self> {
        let client = Client::builder()
            .user_agent(concat!("sinbind/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
            lookup_timeout,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_base, path))
            .header("Authorization", format!("Bot {}", self.token))
    }

    /// Bounded GET; lookups must not stall the moderation path
    async fn lookup<T: DeserializeOwned>(&self, path: &str) -> PlatformResult<T> {
        let response = self
            .request(Method::GET, path)
            .timeout(self.lookup_timeout)
            .send()
            .await?;
        let response = check_status(response).await?;
        Ok(response.json().await?)
    }

    async fn mutate(&self, method: Method, path: &str) -> PlatformResult<()> {
        let response = self.request(method, path).send().await?;
        check_status(response).await?;
        Ok(())
    }
}

async fn check_status(response: Response) -> PlatformResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let (code, message) = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => (body.code, body.message),
        Err(_) => (None, text),
    };

    Err(PlatformError::Api {
        status: status.as_u16(),
        code,
        message,
    })
}

#[async_trait]
impl Platform for DiscordPlatform {
    async fn current_user(&self) -> PlatformResult<UserId> {
        let user: UserDto = self.lookup("/users/@me").await?;
        snowflake(&user.id)
    }

    async fn resolve_member(
        &self,
        community_id: CommunityId,
        user_id: UserId,
    ) -> PlatformResult<MemberLookup> {
        let path = format!("/guilds/{community_id}/members/{user_id}");
        let dto: MemberDto = match self.lookup(&path).await {
            Ok(dto) => dto,
            Err(PlatformError::Api {
                code: Some(code), ..
            }) if ABSENT_MEMBER_CODES.contains(&code) => return Ok(MemberLookup::Absent),
            Err(PlatformError::Api {
                code: Some(UNKNOWN_GUILD),
                ..
            }) => return Ok(MemberLookup::Unavailable),
            Err(e) => return Err(e),
        };

        let roles = dto
            .roles
            .iter()
            .map(|raw| snowflake::<RoleId>(raw))
            .collect::<PlatformResult<Vec<_>>>()?;

        Ok(MemberLookup::Present(Member {
            user_id: snowflake(&dto.user.id)?,
            bot: dto.user.bot,
            roles,
        }))
    }

    async fn list_roles(&self, community_id: CommunityId) -> PlatformResult<Vec<Role>> {
        let roles: Vec<RoleDto> = self.lookup(&format!("/guilds/{community_id}/roles")).await?;
        roles
            .into_iter()
            .map(|dto| {
                Ok(Role {
                    id: snowflake(&dto.id)?,
                    name: dto.name,
                })
            })
            .collect()
    }

    async fn add_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()> {
        let path = format!(
            "/guilds/{}/members/{}/roles/{role}",
            entity.community_id, entity.user_id
        );
        self.mutate(Method::PUT, &path).await
    }

    async fn remove_role(&self, entity: &EntityId, role: RoleId) -> PlatformResult<()> {
        let path = format!(
            "/guilds/{}/members/{}/roles/{role}",
            entity.community_id, entity.user_id
        );
        self.mutate(Method::DELETE, &path).await
    }

    async fn kick_member(&self, entity: &EntityId) -> PlatformResult<()> {
        let path = format!("/guilds/{}/members/{}", entity.community_id, entity.user_id);
        self.mutate(Method::DELETE, &path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snowflake_parsing() {
        assert_eq!(snowflake::<UserId>("123").unwrap(), UserId::new(123));
        assert!(matches!(
            snowflake::<RoleId>("abc"),
            Err(PlatformError::Decode(_))
        ));
    }

    #[test]
    fn test_member_dto_defaults() {
        let dto: MemberDto = serde_json::from_str(r#"{"user":{"id":"7"}}"#).unwrap();
        assert!(!dto.user.bot);
        assert!(dto.roles.is_empty());
    }

    #[test]
    fn test_api_base_trailing_slash() {
        let platform =
            DiscordPlatform::new("https://example.test/api/", "t", Duration::from_secs(1)).unwrap();
        assert_eq!(platform.api_base, "https://example.test/api");
    }
}
