//! Repeat-violation escalation tracker

use crate::config::EscalationConfig;
use crate::platform::Platform;
use serde::Serialize;
use sinbin_types::{EntityId, EventSource, ModerationEvent, ModerationEventEnvelope};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;

/// Response to a reported violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViolationOutcome {
    /// Second violation inside the window
    pub escalation: bool,
    /// The violator was removed from the community
    pub kicked: bool,
}

/// Remembers the last violation per entity for one window.
///
/// Nothing here is persisted; a restart forgets every entry.
pub struct EscalationTracker {
    window: Duration,
    kick_on_escalation: bool,
    platform: Arc<dyn Platform>,
    last_violation: Arc<Mutex<HashMap<EntityId, Instant>>>,
    event_tx: broadcast::Sender<ModerationEventEnvelope>,
}

impl EscalationTracker {
    pub fn new(
        config: &EscalationConfig,
        platform: Arc<dyn Platform>,
        event_tx: broadcast::Sender<ModerationEventEnvelope>,
    ) -> Self {
        Self {
            window: config.window(),
            kick_on_escalation: config.kick_on_escalation,
            platform,
            last_violation: Arc::new(Mutex::new(HashMap::new())),
            event_tx,
        }
    }

    fn emit(&self, event: ModerationEvent) {
        let _ = self
            .event_tx
            .send(ModerationEventEnvelope::new(event, EventSource::Escalation));
    }

    /// Record a violation; `true` when it follows another one within the window.
    ///
    /// An escalating violation does not extend the window.
    pub async fn record_violation(&self, entity: EntityId) -> bool {
        let now = Instant::now();
        let mut entries = self.last_violation.lock().await;

        if let Some(last) = entries.get(&entity) {
            if now.duration_since(*last) < self.window {
                return true;
            }
        }

        entries.insert(entity, now);
        drop(entries);

        let entries = Arc::clone(&self.last_violation);
        let window = self.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut entries = entries.lock().await;
            // A newer violation owns the entry now
            if entries.get(&entity) == Some(&now) {
                entries.remove(&entity);
            }
        });

        false
    }

    /// Record a violation and respond to an escalation.
    pub async fn handle_violation(&self, entity: EntityId) -> ViolationOutcome {
        let escalation = self.record_violation(entity).await;
        if !escalation {
            return ViolationOutcome {
                escalation,
                kicked: false,
            };
        }

        tracing::info!(entity = %entity, "Repeated violation, escalating");
        self.emit(ModerationEvent::Escalated { entity });

        let mut kicked = false;
        if self.kick_on_escalation {
            match self.platform.kick_member(&entity).await {
                Ok(()) => {
                    kicked = true;
                    self.emit(ModerationEvent::Kicked { entity });
                }
                Err(e) => tracing::warn!(entity = %entity, error = %e, "Could not kick member"),
            }
        }

        ViolationOutcome { escalation, kicked }
    }

    /// Number of entities currently remembered
    pub async fn tracked(&self) -> usize {
        self.last_violation.lock().await.len()
    }

    /// Forget everything
    pub async fn clear(&self) {
        self.last_violation.lock().await.clear();
    }
}
