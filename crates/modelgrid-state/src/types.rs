//! Persisted model version records.

use std::collections::BTreeMap;

use modelgrid_core::{ModelConfiguration, ModelRef, Timestamp};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a model version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Pending,
    Validating,
    Deploying,
    Active,
    Deprecated,
    RolledBack,
    Failed,
}

impl VersionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`.
    ///
    /// `RolledBack` and `Failed` are terminal. A `Deprecated` version may
    /// return to `Active` when it is the target of a rollback.
    pub fn can_transition_to(self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Pending, Validating | Failed)
                | (Validating, Deploying | RolledBack | Failed)
                | (Deploying, Active | RolledBack | Failed)
                | (Active, Deprecated | RolledBack | Failed)
                | (Deprecated, Active | Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, VersionStatus::RolledBack | VersionStatus::Failed)
    }

    /// Versions currently serving or on their way to serving traffic.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            VersionStatus::Validating | VersionStatus::Deploying | VersionStatus::Active
        )
    }

    /// Versions a rollback may restore.
    pub fn is_rollback_target(self) -> bool {
        matches!(self, VersionStatus::Active | VersionStatus::Deprecated)
    }
}

/// One entry in a version's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: VersionStatus,
    pub at: Timestamp,
}

/// A registered model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelVersion {
    /// Opaque unique id (UUID v7).
    pub id: String,
    pub name: String,
    /// Semantic version string, unique per `name`.
    pub version: String,
    pub configuration: ModelConfiguration,
    pub status: VersionStatus,
    /// Version (of the same model) this one was derived from.
    pub parent: Option<String>,
    pub created_at: Timestamp,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub status_history: Vec<StatusChange>,
}

impl ModelVersion {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.name, &self.version)
    }

    /// Composite key: `{name}/{version}`.
    pub fn table_key(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }

    pub(crate) fn set_status(&mut self, status: VersionStatus, at: Timestamp) {
        self.status = status;
        self.status_history.push(StatusChange { status, at });
    }
}

/// Parameters for registering a new version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewVersion {
    pub name: String,
    pub version: String,
    pub configuration: ModelConfiguration,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl NewVersion {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        configuration: ModelConfiguration,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            configuration,
            parent: None,
            created_by: None,
            description: None,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use VersionStatus::*;

    #[test]
    fn terminal_states_have_no_exits() {
        for next in [Pending, Validating, Deploying, Active, Deprecated, RolledBack, Failed] {
            assert!(!RolledBack.can_transition_to(next));
            assert!(!Failed.can_transition_to(next));
        }
    }

    #[test]
    fn happy_path_transitions() {
        assert!(Pending.can_transition_to(Validating));
        assert!(Validating.can_transition_to(Deploying));
        assert!(Deploying.can_transition_to(Active));
        assert!(Active.can_transition_to(Deprecated));
        assert!(Deprecated.can_transition_to(Active));
    }

    #[test]
    fn skipping_stages_is_rejected() {
        assert!(!Pending.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Deploying));
        assert!(!Validating.can_transition_to(Active));
        assert!(!Deprecated.can_transition_to(RolledBack));
        assert!(!Active.can_transition_to(Active));
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
    }
}
