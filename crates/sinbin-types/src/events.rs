//! Event types for moderation observability
//!
//! Every state transition of a punishment or escalation entry is emitted as
//! an event so the command layer can announce it.

use crate::EntityId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Envelope wrapping all moderation events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationEventEnvelope {
    /// Unique event ID
    pub id: Uuid,

    /// Event timestamp
    pub timestamp: DateTime<Utc>,

    /// Component that emitted the event
    pub source: EventSource,

    /// Event severity
    pub severity: EventSeverity,

    /// Operator or subsystem that triggered the event
    pub actor: Option<String>,

    /// The actual event
    pub event: ModerationEvent,
}

impl ModerationEventEnvelope {
    pub fn new(event: ModerationEvent, source: EventSource) -> Self {
        let severity = event.default_severity();
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            severity,
            actor: None,
            event,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Mute lifecycle manager
    Lifecycle,
    /// Startup recovery and periodic reconciliation
    Recovery,
    /// Escalation tracker
    Escalation,
}

/// Event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

/// Moderation events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModerationEvent {
    /// Punitive role applied and expiry scheduled
    Punished {
        entity: EntityId,
        expires_at: DateTime<Utc>,
    },

    /// Punishment lifted before its expiry
    Lifted { entity: EntityId },

    /// Punishment reached its expiry
    Expired { entity: EntityId },

    /// A persisted punishment was scheduled again after restart
    Rescheduled {
        entity: EntityId,
        expires_at: DateTime<Utc>,
    },

    /// Punitive role was missing on a punished member and was re-applied
    RoleReapplied { entity: EntityId },

    /// A persisted punishment could not be reconciled this cycle
    Deferred { entity: EntityId, reason: String },

    /// Repeated violation inside the escalation window
    Escalated { entity: EntityId },

    /// Member removed from the community as an escalated response
    Kicked { entity: EntityId },
}

impl ModerationEvent {
    pub fn entity(&self) -> &EntityId {
        match self {
            ModerationEvent::Punished { entity, .. }
            | ModerationEvent::Lifted { entity }
            | ModerationEvent::Expired { entity }
            | ModerationEvent::Rescheduled { entity, .. }
            | ModerationEvent::RoleReapplied { entity }
            | ModerationEvent::Deferred { entity, .. }
            | ModerationEvent::Escalated { entity }
            | ModerationEvent::Kicked { entity } => entity,
        }
    }

    fn default_severity(&self) -> EventSeverity {
        match self {
            ModerationEvent::Deferred { .. } => EventSeverity::Warning,
            ModerationEvent::Escalated { .. } | ModerationEvent::Kicked { .. } => {
                EventSeverity::Warning
            }
            _ => EventSeverity::Info,
        }
    }
}
