//! Punishment records and their persisted form

use crate::{EntityId, EntityKeyError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// An active, time-bounded punishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    pub entity: EntityId,

    /// Instant after which the punitive role must be lifted
    pub expires_at: DateTime<Utc>,
}

impl PunishmentRecord {
    pub fn new(entity: EntityId, expires_at: DateTime<Utc>) -> Self {
        Self { entity, expires_at }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Time left before expiry, or `None` if already expired.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now)
            .to_std()
            .ok()
            .filter(|left| !left.is_zero())
    }

    pub fn to_persisted(&self) -> (String, PersistedPunishment) {
        (
            self.entity.storage_key(),
            PersistedPunishment {
                ends_at: self.expires_at.timestamp_millis(),
            },
        )
    }

    pub fn from_persisted(key: &str, value: &PersistedPunishment) -> Result<Self, EntityKeyError> {
        let entity = key.parse()?;
        let expires_at = Utc
            .timestamp_millis_opt(value.ends_at)
            .single()
            .ok_or_else(|| EntityKeyError::InvalidComponent {
                key: key.to_string(),
                reason: format!("endsAt {} is out of range", value.ends_at),
            })?;
        Ok(Self { entity, expires_at })
    }
}

/// The only state written to disk for a punishment: its end time.
///
/// Timer handles never leave the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedPunishment {
    /// Milliseconds since the Unix epoch
    #[serde(rename = "endsAt")]
    pub ends_at: i64,
}

/// Whole persisted store, keyed by `"<communityId> <userId>"`
pub type PersistedPunishments = BTreeMap<String, PersistedPunishment>;
