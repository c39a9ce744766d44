//! # Release State
//!
//! Snapshot of a release compared between the live and the desired side,
//! and the pure decision that turns the comparison into an update action.

use super::values::Values;
use crate::helm::{ReleaseContent, ReleaseStatus};

#[derive(Debug, Clone)]
pub struct ReleaseState {
    pub name: String,
    pub status: ReleaseStatus,
    /// Checksum annotation on the live side, computed checksum on the desired side
    pub values_checksum: String,
    /// Chart version
    pub version: String,
    /// Carried so the apply step does not re-read the values sources
    pub values: Values,
}

impl ReleaseState {
    /// Live state from release content and the checksum stored on the Chart
    pub fn from_content(content: &ReleaseContent, values_checksum: &str) -> Self {
        Self {
            name: content.name.clone(),
            status: content.status,
            values_checksum: values_checksum.to_string(),
            version: content.version.clone(),
            values: content.values.clone(),
        }
    }
}

/// Values are compared through their checksum only
impl PartialEq for ReleaseState {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.status == other.status
            && self.values_checksum == other.values_checksum
            && self.version == other.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateDecision {
    /// Stuck in a transitional status with forced upgrades enabled
    Rollback,
    /// Another operation is in flight; check again next pass
    Defer,
    /// The latest revisions all failed; do not add another
    Skip,
    Update,
    None,
}

pub fn decide_update(
    current: &ReleaseState,
    desired: &ReleaseState,
    force_upgrade: bool,
    failed_max_attempts: bool,
) -> UpdateDecision {
    if current.status.is_transitional() {
        if force_upgrade {
            return UpdateDecision::Rollback;
        }
        return UpdateDecision::Defer;
    }
    if failed_max_attempts {
        return UpdateDecision::Skip;
    }
    if current != desired {
        return UpdateDecision::Update;
    }
    UpdateDecision::None
}
