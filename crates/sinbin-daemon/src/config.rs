//! Configuration for sinbin-daemon

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Persisted punishment store
    #[serde(default)]
    pub storage: StorageConfig,

    /// Chat platform connection
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Punishment policy
    #[serde(default)]
    pub moderation: ModerationConfig,

    /// Repeat-violation escalation
    #[serde(default)]
    pub escalation: EscalationConfig,

    /// Scheduler configuration
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub listen_addr: SocketAddr,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            enable_cors: true,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Single JSON file, fully rewritten on each save
    Json {
        #[serde(default = "default_store_path")]
        path: PathBuf,
    },

    /// In-memory storage (for development/testing)
    Memory,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Json {
            path: default_store_path(),
        }
    }
}

/// Platform configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PlatformConfig {
    /// Discord REST API
    Discord {
        /// Base URL including the API version
        #[serde(default = "default_api_base")]
        api_base: String,

        /// Bot token, passed through unchanged
        #[serde(default)]
        token: String,

        /// Timeout for membership and role lookups in milliseconds
        #[serde(default = "default_lookup_timeout")]
        lookup_timeout_ms: u64,
    },

    /// Simulated community (for development)
    Memory,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        PlatformConfig::Memory
    }
}

/// Punishment policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Name of the punitive role
    #[serde(default = "default_punitive_role")]
    pub punitive_role: String,

    /// Members holding any of these roles are never mutated
    #[serde(default)]
    pub privileged_roles: Vec<String>,

    /// Bypass the authorization policy
    #[serde(default)]
    pub testing: bool,

    /// Operator to follow up on failed mutations
    #[serde(default)]
    pub operator_id: Option<String>,

    /// Delay between safe-removal attempts in milliseconds
    #[serde(default = "default_safe_removal_backoff")]
    pub safe_removal_backoff_ms: u64,

    /// Delays before re-applying the role to a rejoining member after a failure
    #[serde(default = "default_rejoin_retry_delays")]
    pub rejoin_retry_delays_ms: Vec<u64>,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            punitive_role: default_punitive_role(),
            privileged_roles: Vec::new(),
            testing: false,
            operator_id: None,
            safe_removal_backoff_ms: default_safe_removal_backoff(),
            rejoin_retry_delays_ms: default_rejoin_retry_delays(),
        }
    }
}

impl ModerationConfig {
    pub fn safe_removal_backoff(&self) -> Duration {
        Duration::from_millis(self.safe_removal_backoff_ms)
    }

    pub fn rejoin_retry_delays(&self) -> Vec<Duration> {
        self.rejoin_retry_delays_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }
}

/// Escalation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationConfig {
    /// Window in seconds within which a second violation escalates
    #[serde(default = "default_escalation_window")]
    pub window_secs: u64,

    /// Remove the violator from the community on escalation
    #[serde(default = "default_true")]
    pub kick_on_escalation: bool,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            window_secs: default_escalation_window(),
            kick_on_escalation: true,
        }
    }
}

impl EscalationConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Interval in seconds between retries of deferred punishments
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reconcile_interval_secs: default_reconcile_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_store_path() -> PathBuf {
    PathBuf::from("muted.json")
}

fn default_api_base() -> String {
    "https://discord.com/api/v10".to_string()
}

fn default_lookup_timeout() -> u64 {
    2500
}

fn default_punitive_role() -> String {
    "sinbin".to_string()
}

fn default_safe_removal_backoff() -> u64 {
    5000
}

fn default_rejoin_retry_delays() -> Vec<u64> {
    vec![1000, 5000]
}

fn default_escalation_window() -> u64 {
    5 * 60
}

fn default_reconcile_interval() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration from defaults, an optional file and `SINBIN_*` variables.
    ///
    /// Nested keys use a double underscore, e.g.
    /// `SINBIN_MODERATION__PUNITIVE_ROLE=muted`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SINBIN")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("moderation.privileged_roles")
                .with_list_parse_key("moderation.rejoin_retry_delays_ms")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
