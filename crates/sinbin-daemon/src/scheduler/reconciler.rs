//! Periodic reconciliation of deferred punishments

use crate::config::SchedulerConfig;
use crate::moderation::MuteManager;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Retries punishments whose community could not be resolved yet
pub struct Scheduler {
    config: SchedulerConfig,
    manager: Arc<MuteManager>,
    reconcile_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
    shutdown: Notify,
}

impl Scheduler {
    /// Create a new scheduler
    pub fn new(
        config: SchedulerConfig,
        manager: Arc<MuteManager>,
    ) -> (Arc<Self>, mpsc::Receiver<()>) {
        let (reconcile_tx, reconcile_rx) = mpsc::channel(10);

        let scheduler = Arc::new(Self {
            config,
            manager,
            reconcile_tx,
            running: Arc::new(RwLock::new(false)),
            shutdown: Notify::new(),
        });

        (scheduler, reconcile_rx)
    }

    /// Trigger an immediate reconciliation
    pub async fn trigger_reconcile(&self) {
        let _ = self.reconcile_tx.send(()).await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// Run the reconciliation loop until [`Scheduler::stop`] is called
    pub async fn start(self: Arc<Self>, mut reconcile_rx: mpsc::Receiver<()>) {
        {
            let mut running = self.running.write().await;
            *running = true;
        }

        tracing::info!(
            interval_secs = self.config.reconcile_interval_secs,
            "Scheduler started"
        );

        let mut interval = interval(Duration::from_secs(
            self.config.reconcile_interval_secs.max(1),
        ));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Recovery already ran a full pass at startup
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.manager.reconcile_deferred().await;
                }
                Some(_) = reconcile_rx.recv() => {
                    tracing::debug!("Triggered reconciliation");
                    self.manager.reconcile_deferred().await;
                }
                _ = self.shutdown.notified() => break,
                else => break,
            }

            let running = self.running.read().await;
            if !*running {
                break;
            }
        }

        tracing::info!("Scheduler stopped");
    }

    /// Stop the scheduler after its current pass, without starting another
    pub async fn stop(&self) {
        let mut running = self.running.write().await;
        *running = false;
        // Stores a permit if the loop is mid-pass
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModerationConfig;
    use crate::platform::InMemoryPlatform;
    use crate::storage::InMemoryStore;
    use chrono::Utc;
    use sinbin_types::{EntityId, Member, PersistedPunishment, PersistedPunishments};

    #[tokio::test(start_paused = true)]
    async fn test_deferred_punishment_picked_up_by_loop() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        let role = platform.create_role(community, "sinbin").await;
        platform.insert_member(community, Member::new(7)).await;
        platform.set_available(community, false).await;

        let mut persisted = PersistedPunishments::new();
        persisted.insert(
            "42 7".to_string(),
            PersistedPunishment {
                ends_at: Utc::now().timestamp_millis() + 3_600_000,
            },
        );
        let store = Arc::new(InMemoryStore::with_contents(persisted));
        let manager = MuteManager::new(ModerationConfig::default(), platform.clone(), store);
        manager.start().await;

        let (scheduler, rx) = Scheduler::new(
            SchedulerConfig {
                reconcile_interval_secs: 60,
            },
            manager.clone(),
        );
        let handle = tokio::spawn(scheduler.clone().start(rx));

        let entity = EntityId::new(42, 7);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(!manager.has_timer(&entity).await);

        platform.set_available(community, true).await;
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(manager.has_timer(&entity).await);
        assert!(platform.has_role(&entity, role).await);

        scheduler.stop().await;
        handle.await.unwrap();
        assert!(!scheduler.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trigger_reconciles_before_interval() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        platform.create_role(community, "sinbin").await;
        platform.insert_member(community, Member::new(7)).await;
        platform.set_available(community, false).await;

        let mut persisted = PersistedPunishments::new();
        persisted.insert(
            "42 7".to_string(),
            PersistedPunishment {
                ends_at: Utc::now().timestamp_millis() + 3_600_000,
            },
        );
        let store = Arc::new(InMemoryStore::with_contents(persisted));
        let manager = MuteManager::new(ModerationConfig::default(), platform.clone(), store);
        manager.start().await;

        let (scheduler, rx) = Scheduler::new(
            SchedulerConfig {
                reconcile_interval_secs: 3600,
            },
            manager.clone(),
        );
        let handle = tokio::spawn(scheduler.clone().start(rx));

        platform.set_available(community, true).await;
        scheduler.trigger_reconcile().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(manager.has_timer(&EntityId::new(42, 7)).await);

        scheduler.stop().await;
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_does_not_reconcile() {
        let platform = Arc::new(InMemoryPlatform::new(1));
        let community = platform.add_community(42).await;
        platform.create_role(community, "sinbin").await;
        platform.insert_member(community, Member::new(7)).await;
        platform.set_available(community, false).await;

        let mut persisted = PersistedPunishments::new();
        persisted.insert(
            "42 7".to_string(),
            PersistedPunishment {
                ends_at: Utc::now().timestamp_millis() + 3_600_000,
            },
        );
        let store = Arc::new(InMemoryStore::with_contents(persisted));
        let manager = MuteManager::new(ModerationConfig::default(), platform.clone(), store);
        manager.start().await;

        let (scheduler, rx) = Scheduler::new(
            SchedulerConfig {
                reconcile_interval_secs: 60,
            },
            manager.clone(),
        );
        let handle = tokio::spawn(scheduler.clone().start(rx));
        tokio::time::sleep(Duration::from_secs(1)).await;

        platform.set_available(community, true).await;
        let calls = platform.mutation_calls();
        scheduler.stop().await;
        handle.await.unwrap();

        assert!(!manager.has_timer(&EntityId::new(42, 7)).await);
        assert_eq!(platform.mutation_calls(), calls);
    }
}
