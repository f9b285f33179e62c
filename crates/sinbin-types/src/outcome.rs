//! Results of bulk role mutations

use crate::EntityId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Direction of a role mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoleAction {
    Add,
    Remove,
}

/// Per-entity partition of a batch operation.
///
/// Entities excluded by the authorization policy land in `skipped`, never in
/// `succeeded` or `failed`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    pub succeeded: BTreeSet<EntityId>,
    pub failed: BTreeSet<EntityId>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub skipped: BTreeSet<EntityId>,
}

impl BatchOutcome {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entity in the batch failed with the same cause.
    pub fn all_failed(entities: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            failed: entities.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn merge(&mut self, other: BatchOutcome) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
        self.skipped.extend(other.skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.succeeded.is_empty() && self.failed.is_empty() && self.skipped.is_empty()
    }

    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty()
    }
}
