//! Server setup and lifecycle management

use crate::api::create_router;
use crate::api::rest::state::AppState;
use crate::config::{DaemonConfig, PlatformConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::moderation::{EscalationTracker, MuteManager};
use crate::platform::{DiscordPlatform, InMemoryPlatform, Platform};
use crate::scheduler::Scheduler;
use crate::storage::{InMemoryStore, JsonFileStore, PunishmentStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Sinbin daemon server
pub struct Server {
    config: DaemonConfig,
    manager: Arc<MuteManager>,
    escalation: Arc<EscalationTracker>,
}

impl Server {
    /// Create a new server with the given configuration
    pub fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let platform = build_platform(&config.platform)?;
        let store = build_store(&config.storage);
        Ok(Self::with_components(config, platform, store))
    }

    /// Create a server around an existing platform and store
    pub fn with_components(
        config: DaemonConfig,
        platform: Arc<dyn Platform>,
        store: Arc<dyn PunishmentStore>,
    ) -> Self {
        let manager = MuteManager::new(config.moderation.clone(), platform.clone(), store);
        let escalation = Arc::new(EscalationTracker::new(
            &config.escalation,
            platform,
            manager.event_sender(),
        ));

        Self {
            config,
            manager,
            escalation,
        }
    }

    pub fn manager(&self) -> &Arc<MuteManager> {
        &self.manager
    }

    /// Run the server
    pub async fn run(self) -> DaemonResult<()> {
        // Nothing may touch punishment state before recovery is done
        self.manager.start().await;

        let addr = self.config.server.listen_addr;
        let state = AppState::new(self.manager.clone(), self.escalation.clone());
        let app = create_router(state, self.config.server.enable_cors);
        let listener = TcpListener::bind(addr).await?;

        tracing::info!("Sinbin daemon listening on {}", addr);

        let (scheduler, reconcile_rx) =
            Scheduler::new(self.config.scheduler.clone(), self.manager.clone());
        let scheduler_task = tokio::spawn(scheduler.clone().start(reconcile_rx));

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| DaemonError::Server(e.to_string()))?;

        tracing::info!("Sinbin daemon shutting down");

        scheduler.stop().await;
        if let Err(e) = scheduler_task.await {
            tracing::warn!(error = %e, "Scheduler task ended abnormally");
        }

        self.escalation.clear().await;
        self.manager.stop().await;

        Ok(())
    }
}

fn build_platform(config: &PlatformConfig) -> DaemonResult<Arc<dyn Platform>> {
    match config {
        PlatformConfig::Discord {
            api_base,
            token,
            lookup_timeout_ms,
        } => {
            if token.is_empty() {
                return Err(DaemonError::Config(
                    "platform.token is required for the discord platform".to_string(),
                ));
            }
            let platform =
                DiscordPlatform::new(api_base, token, Duration::from_millis(*lookup_timeout_ms))?;
            Ok(Arc::new(platform))
        }
        PlatformConfig::Memory => {
            tracing::warn!("Using the in-memory platform; no real community is moderated");
            Ok(Arc::new(InMemoryPlatform::default()))
        }
    }
}

fn build_store(config: &StorageConfig) -> Arc<dyn PunishmentStore> {
    match config {
        StorageConfig::Json { path } => {
            tracing::info!(path = %path.display(), "Using JSON punishment store");
            Arc::new(JsonFileStore::new(path))
        }
        StorageConfig::Memory => Arc::new(InMemoryStore::new()),
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discord_requires_token() {
        let config = PlatformConfig::Discord {
            api_base: "https://discord.com/api/v10".to_string(),
            token: String::new(),
            lookup_timeout_ms: 2500,
        };
        assert!(matches!(build_platform(&config), Err(DaemonError::Config(_))));
    }

    #[tokio::test]
    async fn test_memory_components() {
        let mut config = DaemonConfig::default();
        config.storage = StorageConfig::Memory;
        let server = Server::new(config).unwrap();
        assert!(server.manager().list().await.is_empty());
    }
}
