//! Error types for sinbin-daemon

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use sinbin_types::CommunityId;
use thiserror::Error;

/// Platform error codes in this range denote an unknown resource
/// (unknown guild, member, user, role ...).
const UNKNOWN_ENTITY_CODES: std::ops::Range<u64> = 10_000..11_000;

/// Platform error code for a guild the bot cannot see
pub const UNKNOWN_GUILD: u64 = 10_004;

/// Daemon-level errors
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Server startup error
    #[error("Server error: {0}")]
    Server(String),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Platform error
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Persistence errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Store contents could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by the chat platform
#[derive(Debug, Clone, Error)]
pub enum PlatformError {
    /// The platform answered with an error status
    #[error("API error {status} (code {code:?}): {message}")]
    Api {
        status: u16,
        code: Option<u64>,
        message: String,
    },

    /// The request never got an answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// A bounded lookup ran out of time
    #[error("Request timed out")]
    Timeout,

    /// The platform answered with something we could not decode
    #[error("Decode error: {0}")]
    Decode(String),
}

impl PlatformError {
    /// The target no longer exists on the platform (e.g. not a member).
    pub fn is_unknown_entity(&self) -> bool {
        matches!(
            self,
            PlatformError::Api { code: Some(code), .. } if UNKNOWN_ENTITY_CODES.contains(code)
        )
    }

    /// Worth retrying later: network trouble, rate limits, server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            PlatformError::Transport(_) | PlatformError::Timeout => true,
            PlatformError::Api { status, .. } => *status == 429 || *status >= 500,
            PlatformError::Decode(_) => false,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            PlatformError::Timeout
        } else if e.is_decode() {
            PlatformError::Decode(e.to_string())
        } else {
            PlatformError::Transport(e.to_string())
        }
    }
}

/// Input validation errors raised before any side effect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModerationError {
    /// Durations must be strictly positive
    #[error("Punishment duration must be positive")]
    InvalidDuration,

    /// No target entity was given
    #[error("No target members given")]
    NoTargets,

    /// A targeted community has no punitive role configured
    #[error("Role {role:?} not found in community {community_id}")]
    RoleNotFound {
        community_id: CommunityId,
        role: String,
    },
}

/// API-specific errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Bad request
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(#[from] ModerationError),

    /// Upstream platform failed
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR"),
            ApiError::Platform(_) => (StatusCode::BAD_GATEWAY, "PLATFORM_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for API operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for daemon operations
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Result type alias for platform calls
pub type PlatformResult<T> = Result<T, PlatformError>;
