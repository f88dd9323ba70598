//! Model version registry and lifecycle.
//!
//! Every write for a model name runs under that name's lock and lands in a
//! single backend batch, so a failed call leaves the stored state untouched.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use modelgrid_core::config::RetentionConfig;
use modelgrid_core::{ModelRef, SharedClock, parse_version};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{VersionError, VersionResult};
use crate::locks::ModelLocks;
use crate::store::VersionBackend;
use crate::types::{ModelVersion, NewVersion, StatusChange, VersionStatus};

/// Outcome of promoting a candidate to `Active`.
#[derive(Debug, Clone, PartialEq)]
pub struct Promotion {
    pub active: ModelVersion,
    /// The version that was `Active` before, now `Deprecated`.
    pub deprecated: Option<ModelVersion>,
}

/// Outcome of restoring an earlier version.
#[derive(Debug, Clone, PartialEq)]
pub struct Restoration {
    pub active: ModelVersion,
    /// The version that was `Active` before, now `RolledBack`.
    pub rolled_back: Option<ModelVersion>,
}

/// Registry-wide counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelStatistics {
    pub total_models: usize,
    pub total_versions: usize,
    /// Models with an `Active` version.
    pub active_models: usize,
    pub by_status: BTreeMap<VersionStatus, usize>,
    pub models: Vec<ModelSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub name: String,
    pub total_versions: usize,
    pub active_version: Option<String>,
    /// Highest semantic version registered.
    pub latest_version: Option<String>,
}

pub struct VersionStore {
    backend: Arc<dyn VersionBackend>,
    clock: SharedClock,
    locks: ModelLocks,
}

impl VersionStore {
    pub fn new(backend: Arc<dyn VersionBackend>, clock: SharedClock) -> Self {
        Self {
            backend,
            clock,
            locks: ModelLocks::new(),
        }
    }

    /// Register a new version in `Pending`.
    ///
    /// Rejects duplicates, invalid semver, invalid configuration, and a
    /// parent that does not exist or would close a cycle.
    pub async fn create_version(&self, new: NewVersion) -> VersionResult<ModelVersion> {
        let version = parse_version(&new.version)
            .map_err(|e| VersionError::InvalidVersion {
                version: new.version.clone(),
                reason: e.to_string(),
            })?
            .to_string();
        if new.name.trim().is_empty() || new.name.contains('/') {
            return Err(VersionError::InvalidConfiguration(vec![format!(
                "model name {:?} must be non-empty and contain no '/'",
                new.name
            )]));
        }
        new.configuration
            .validate()
            .map_err(VersionError::InvalidConfiguration)?;

        let _guard = self.locks.lock(&new.name).await;
        let model_ref = ModelRef::new(&new.name, &version);

        if self.backend.get_version(&model_ref.key())?.is_some() {
            return Err(VersionError::DuplicateVersion(model_ref));
        }

        let parent = match new.parent {
            Some(parent) => {
                let parent = parse_version(&parent)
                    .map(|v| v.to_string())
                    .unwrap_or(parent);
                self.check_lineage(&model_ref, &parent)?;
                Some(parent)
            }
            None => None,
        };

        let now = self.clock.now();
        let record = ModelVersion {
            id: uuid::Uuid::now_v7().to_string(),
            name: new.name,
            version,
            configuration: new.configuration,
            status: VersionStatus::Pending,
            parent,
            created_at: now,
            created_by: new.created_by,
            description: new.description,
            tags: new.tags,
            status_history: vec![StatusChange {
                status: VersionStatus::Pending,
                at: now,
            }],
        };
        self.backend.put_versions(std::slice::from_ref(&record))?;
        info!(version = %model_ref, id = %record.id, "model version created");
        Ok(record)
    }

    fn check_lineage(&self, child: &ModelRef, parent: &str) -> VersionResult<()> {
        let invalid = |reason: String| VersionError::InvalidLineage {
            version: child.clone(),
            reason,
        };
        if parent == child.version {
            return Err(invalid("version cannot be its own parent".to_string()));
        }
        let mut seen = HashSet::from([child.version.clone()]);
        let mut cursor = Some(parent.to_string());
        while let Some(current) = cursor {
            if !seen.insert(current.clone()) {
                return Err(invalid(format!("lineage cycle through {current}")));
            }
            let key = ModelRef::new(&child.name, &current).key();
            let Some(ancestor) = self.backend.get_version(&key)? else {
                return Err(invalid(format!("parent {current} does not exist")));
            };
            cursor = ancestor.parent;
        }
        Ok(())
    }

    pub fn get(&self, name: &str, version: &str) -> VersionResult<Option<ModelVersion>> {
        Ok(self.backend.get_version(&ModelRef::new(name, version).key())?)
    }

    /// Fetch a version that must exist.
    pub fn require(&self, model_ref: &ModelRef) -> VersionResult<ModelVersion> {
        self.backend
            .get_version(&model_ref.key())?
            .ok_or_else(|| VersionError::NotFound(model_ref.to_string()))
    }

    pub fn get_by_id(&self, id: &str) -> VersionResult<Option<ModelVersion>> {
        for name in self.backend.list_version_models()? {
            if let Some(found) = self
                .backend
                .list_versions_for_model(&name)?
                .into_iter()
                .find(|v| v.id == id)
            {
                return Ok(Some(found));
            }
        }
        Ok(None)
    }

    /// The single `Active` version of `name`, if any.
    pub fn get_active(&self, name: &str) -> VersionResult<Option<ModelVersion>> {
        let mut active: Vec<ModelVersion> = self
            .backend
            .list_versions_for_model(name)?
            .into_iter()
            .filter(|v| v.status == VersionStatus::Active)
            .collect();
        if active.len() > 1 {
            warn!(model = %name, count = active.len(), "more than one active version");
        }
        Ok(active.pop())
    }

    /// All versions of `name`, oldest semantic version first.
    pub fn list_versions(&self, name: &str) -> VersionResult<Vec<ModelVersion>> {
        let mut versions = self.backend.list_versions_for_model(name)?;
        versions.sort_by(|a, b| match (parse_version(&a.version), parse_version(&b.version)) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            _ => a.created_at.cmp(&b.created_at),
        });
        Ok(versions)
    }

    /// Versions whose parent is `version`.
    pub fn list_children(&self, name: &str, version: &str) -> VersionResult<Vec<ModelVersion>> {
        Ok(self
            .list_versions(name)?
            .into_iter()
            .filter(|v| v.parent.as_deref() == Some(version))
            .collect())
    }

    pub fn list_models(&self) -> VersionResult<Vec<String>> {
        Ok(self.backend.list_version_models()?)
    }

    /// Move a version along the lifecycle.
    ///
    /// A transition the lifecycle does not allow fails with
    /// `InvalidTransition` and leaves the version as it was. Moving to
    /// `Active` deprecates whichever version held it before.
    pub async fn transition_status(
        &self,
        model_ref: &ModelRef,
        next: VersionStatus,
    ) -> VersionResult<ModelVersion> {
        if next == VersionStatus::Active {
            return self.promote(model_ref).await.map(|p| p.active);
        }
        let _guard = self.locks.lock(&model_ref.name).await;
        let mut version = self.require(model_ref)?;
        if !version.status.can_transition_to(next) {
            return Err(VersionError::InvalidTransition {
                version: model_ref.clone(),
                current: version.status,
                requested: next,
            });
        }
        let from = version.status;
        version.set_status(next, self.clock.now());
        self.backend.put_versions(std::slice::from_ref(&version))?;
        debug!(version = %model_ref, ?from, to = ?next, "version status changed");
        Ok(version)
    }

    /// [`transition_status`](Self::transition_status) addressed by version id.
    pub async fn transition_status_by_id(
        &self,
        id: &str,
        next: VersionStatus,
    ) -> VersionResult<ModelVersion> {
        let version = self
            .get_by_id(id)?
            .ok_or_else(|| VersionError::NotFound(id.to_string()))?;
        self.transition_status(&version.model_ref(), next).await
    }

    /// Make `model_ref` the single `Active` version of its model.
    ///
    /// The previous `Active` version moves to `Deprecated` in the same
    /// batch.
    pub async fn promote(&self, model_ref: &ModelRef) -> VersionResult<Promotion> {
        let _guard = self.locks.lock(&model_ref.name).await;
        let mut candidate = self.require(model_ref)?;
        if !candidate.status.can_transition_to(VersionStatus::Active) {
            return Err(VersionError::InvalidTransition {
                version: model_ref.clone(),
                current: candidate.status,
                requested: VersionStatus::Active,
            });
        }
        let now = self.clock.now();
        let mut deprecated = self
            .get_active(&model_ref.name)?
            .filter(|v| v.version != candidate.version);
        if let Some(previous) = deprecated.as_mut() {
            previous.set_status(VersionStatus::Deprecated, now);
        }
        candidate.set_status(VersionStatus::Active, now);

        let mut batch = vec![candidate.clone()];
        batch.extend(deprecated.iter().cloned());
        self.backend.put_versions(&batch)?;
        info!(
            version = %model_ref,
            previous = ?deprecated.as_ref().map(|v| v.version.as_str()),
            "version promoted"
        );
        Ok(Promotion {
            active: candidate,
            deprecated,
        })
    }

    /// Bring back an earlier version.
    ///
    /// The target must be `Active` or `Deprecated`. The current `Active`
    /// version, when it is a different one, moves to `RolledBack`.
    pub async fn restore(&self, target: &ModelRef) -> VersionResult<Restoration> {
        let _guard = self.locks.lock(&target.name).await;
        let mut restored = self.require(target)?;
        if !restored.status.is_rollback_target() {
            return Err(VersionError::NotRollbackTarget {
                version: target.clone(),
                current: restored.status,
            });
        }
        let now = self.clock.now();
        let mut rolled_back = self
            .get_active(&target.name)?
            .filter(|v| v.version != restored.version);
        if let Some(current) = rolled_back.as_mut() {
            current.set_status(VersionStatus::RolledBack, now);
        }
        if restored.status != VersionStatus::Active {
            restored.set_status(VersionStatus::Active, now);
        }

        let mut batch = vec![restored.clone()];
        batch.extend(rolled_back.iter().cloned());
        self.backend.put_versions(&batch)?;
        warn!(
            version = %target,
            replaced = ?rolled_back.as_ref().map(|v| v.version.as_str()),
            "version restored"
        );
        Ok(Restoration {
            active: restored,
            rolled_back,
        })
    }
}

impl VersionStore {
    /// Delete versions the retention policy no longer covers.
    ///
    /// Per model, newest first: the first `max_versions_per_model` and
    /// anything younger than `retention_secs` stay. Live versions, and
    /// every ancestor of a version that stays, are never removed.
    pub async fn prune(&self, policy: &RetentionConfig) -> VersionResult<Vec<ModelVersion>> {
        let now = self.clock.now();
        let mut removed = Vec::new();
        for name in self.backend.list_version_models()? {
            let _guard = self.locks.lock(&name).await;
            let mut versions = self.backend.list_versions_for_model(&name)?;
            versions.sort_by(|a, b| {
                b.created_at.cmp(&a.created_at).then_with(|| {
                    match (parse_version(&a.version), parse_version(&b.version)) {
                        (Ok(x), Ok(y)) => y.cmp(&x),
                        _ => b.version.cmp(&a.version),
                    }
                })
            });

            let (kept, mut stale): (Vec<_>, Vec<_>) =
                versions.into_iter().enumerate().partition(|(i, v)| {
                    *i < policy.max_versions_per_model
                        || v.status.is_live()
                        || now.saturating_sub(v.created_at) < policy.retention_secs
                });

            let mut ancestors = HashSet::new();
            let parents: BTreeMap<String, Option<String>> = kept
                .iter()
                .chain(stale.iter())
                .map(|(_, v)| (v.version.clone(), v.parent.clone()))
                .collect();
            for (_, v) in &kept {
                let mut cursor = v.parent.clone();
                while let Some(parent) = cursor {
                    if !ancestors.insert(parent.clone()) {
                        break;
                    }
                    cursor = parents.get(&parent).cloned().flatten();
                }
            }
            stale.retain(|(_, v)| !ancestors.contains(&v.version));
            if stale.is_empty() {
                continue;
            }

            let keys: Vec<String> = stale.iter().map(|(_, v)| v.table_key()).collect();
            self.backend.delete_versions(&keys)?;
            info!(model = %name, removed = keys.len(), kept = kept.len(), "old versions pruned");
            removed.extend(stale.into_iter().map(|(_, v)| v));
        }
        Ok(removed)
    }

    /// Run [`prune`](Self::prune) every `cleanup_interval_secs` until
    /// shutdown.
    pub async fn run_retention(&self, policy: RetentionConfig, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(policy.cleanup_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "version retention started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.prune(&policy).await {
                        error!(error = %e, "version retention pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("version retention shutting down");
                    break;
                }
            }
        }
    }

    pub fn statistics(&self) -> VersionResult<ModelStatistics> {
        let mut stats = ModelStatistics::default();
        for name in self.backend.list_version_models()? {
            let versions = self.list_versions(&name)?;
            let active_version = versions
                .iter()
                .find(|v| v.status == VersionStatus::Active)
                .map(|v| v.version.clone());
            stats.total_models += 1;
            stats.total_versions += versions.len();
            if active_version.is_some() {
                stats.active_models += 1;
            }
            for v in &versions {
                *stats.by_status.entry(v.status).or_default() += 1;
            }
            stats.models.push(ModelSummary {
                name,
                total_versions: versions.len(),
                active_version,
                latest_version: versions.last().map(|v| v.version.clone()),
            });
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StateStore;
    use modelgrid_core::{ErrorKind, ManualClock, ModelConfiguration};

    fn store() -> (VersionStore, ManualClock) {
        let clock = ManualClock::new(1_000);
        let backend = Arc::new(StateStore::open_in_memory().unwrap());
        (VersionStore::new(backend, clock.shared()), clock)
    }

    fn new_version(version: &str) -> NewVersion {
        NewVersion::new("sorter", version, ModelConfiguration::new("openai", "gpt-4o-mini"))
    }

    async fn activate(store: &VersionStore, version: &str) -> ModelVersion {
        let r = ModelRef::new("sorter", version);
        store.transition_status(&r, VersionStatus::Validating).await.unwrap();
        store.transition_status(&r, VersionStatus::Deploying).await.unwrap();
        store.transition_status(&r, VersionStatus::Active).await.unwrap()
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let (store, _) = store();
        let v = store.create_version(new_version("1.0.0")).await.unwrap();
        assert_eq!(v.status, VersionStatus::Pending);
        assert_eq!(v.created_at, 1_000);
        assert_eq!(v.status_history.len(), 1);
        assert!(store.get_by_id(&v.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_version_rejected() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        let err = store.create_version(new_version("1.0.0")).await.unwrap_err();
        assert!(matches!(err, VersionError::DuplicateVersion(_)));
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn invalid_semver_rejected() {
        let (store, _) = store();
        let err = store.create_version(new_version("latest")).await.unwrap_err();
        assert!(matches!(err, VersionError::InvalidVersion { .. }));
        assert!(store.list_models().unwrap().is_empty());
    }

    #[tokio::test]
    async fn invalid_configuration_rejected() {
        let (store, _) = store();
        let mut new = new_version("1.0.0");
        new.configuration.max_tokens = 0;
        let err = store.create_version(new).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn missing_or_self_parent_rejected() {
        let (store, _) = store();
        let err = store
            .create_version(new_version("1.0.0").with_parent("0.9.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::InvalidLineage { .. }));

        let err = store
            .create_version(new_version("1.0.0").with_parent("1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::InvalidLineage { .. }));
    }

    #[tokio::test]
    async fn lineage_and_children() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store
            .create_version(new_version("1.1.0").with_parent("1.0.0"))
            .await
            .unwrap();
        store
            .create_version(new_version("2.0.0").with_parent("1.0.0"))
            .await
            .unwrap();
        let children = store.list_children("sorter", "1.0.0").unwrap();
        assert_eq!(children.len(), 2);
        assert!(store.list_children("sorter", "2.0.0").unwrap().is_empty());
    }

    #[tokio::test]
    async fn versions_sorted_semantically() {
        let (store, _) = store();
        for v in ["1.10.0", "1.2.0", "1.9.1"] {
            store.create_version(new_version(v)).await.unwrap();
        }
        let order: Vec<String> = store
            .list_versions("sorter")
            .unwrap()
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(order, vec!["1.2.0", "1.9.1", "1.10.0"]);
    }

    #[tokio::test]
    async fn invalid_transition_leaves_state_unchanged() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        let r = ModelRef::new("sorter", "1.0.0");

        let err = store
            .transition_status(&r, VersionStatus::Active)
            .await
            .unwrap_err();
        assert_eq!(err.current_status(), Some(VersionStatus::Pending));

        let v = store.require(&r).unwrap();
        assert_eq!(v.status, VersionStatus::Pending);
        assert_eq!(v.status_history.len(), 1);
    }

    #[tokio::test]
    async fn terminal_status_is_final() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        let r = ModelRef::new("sorter", "1.0.0");
        store.transition_status(&r, VersionStatus::Failed).await.unwrap();
        let err = store
            .transition_status(&r, VersionStatus::Validating)
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn at_most_one_active_version() {
        let (store, clock) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store.create_version(new_version("1.1.0")).await.unwrap();
        activate(&store, "1.0.0").await;
        clock.advance(60);
        activate(&store, "1.1.0").await;

        let active = store.get_active("sorter").unwrap().unwrap();
        assert_eq!(active.version, "1.1.0");
        let old = store.get("sorter", "1.0.0").unwrap().unwrap();
        assert_eq!(old.status, VersionStatus::Deprecated);
        assert_eq!(old.status_history.last().unwrap().at, 1_060);
    }

    #[tokio::test]
    async fn restore_deprecated_version() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store.create_version(new_version("1.1.0")).await.unwrap();
        activate(&store, "1.0.0").await;
        activate(&store, "1.1.0").await;

        let restored = store
            .restore(&ModelRef::new("sorter", "1.0.0"))
            .await
            .unwrap();
        assert_eq!(restored.active.status, VersionStatus::Active);
        assert_eq!(restored.rolled_back.unwrap().version, "1.1.0");
        assert_eq!(store.get_active("sorter").unwrap().unwrap().version, "1.0.0");
    }

    #[tokio::test]
    async fn restore_requires_rollback_target() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        let err = store
            .restore(&ModelRef::new("sorter", "1.0.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VersionError::NotRollbackTarget { .. }));
    }

    #[tokio::test]
    async fn transition_by_id() {
        let (store, _) = store();
        let v = store.create_version(new_version("1.0.0")).await.unwrap();
        let moved = store
            .transition_status_by_id(&v.id, VersionStatus::Validating)
            .await
            .unwrap();
        assert_eq!(moved.status, VersionStatus::Validating);

        let err = store
            .transition_status_by_id("no-such-id", VersionStatus::Validating)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    fn policy(max_versions_per_model: usize, retention_secs: u64) -> RetentionConfig {
        RetentionConfig {
            max_versions_per_model,
            retention_secs,
            ..RetentionConfig::default()
        }
    }

    #[tokio::test]
    async fn prune_keeps_newest_and_active() {
        let (store, clock) = store();
        for v in ["1.0.0", "1.1.0", "1.2.0", "1.3.0", "1.4.0"] {
            store.create_version(new_version(v)).await.unwrap();
            clock.advance(100);
        }
        activate(&store, "1.0.0").await;
        clock.advance(10_000);

        let removed = store.prune(&policy(2, 1_000)).await.unwrap();
        let mut removed: Vec<String> = removed.into_iter().map(|v| v.version).collect();
        removed.sort();
        assert_eq!(removed, vec!["1.1.0", "1.2.0"]);

        let left: Vec<String> = store
            .list_versions("sorter")
            .unwrap()
            .into_iter()
            .map(|v| v.version)
            .collect();
        assert_eq!(left, vec!["1.0.0", "1.3.0", "1.4.0"]);

        // Nothing further to do on a second pass.
        assert!(store.prune(&policy(2, 1_000)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_ignores_unrelated_lineage() {
        let (store, clock) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store
            .create_version(new_version("1.1.0").with_parent("1.0.0"))
            .await
            .unwrap();
        store.create_version(new_version("1.2.0")).await.unwrap();
        clock.advance(10_000);
        store.create_version(new_version("2.0.0")).await.unwrap();

        // 2.0.0 is inside the window; 1.2.0 is the one kept by count.
        // 1.1.0 and 1.0.0 fall outside both, and nothing descends from them.
        let removed = store.prune(&policy(2, 1_000)).await.unwrap();
        assert_eq!(removed.len(), 2);
    }

    #[tokio::test]
    async fn prune_keeps_ancestors_of_kept_versions() {
        let (store, clock) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store.create_version(new_version("1.1.0")).await.unwrap();
        clock.advance(10_000);
        store
            .create_version(new_version("2.0.0").with_parent("1.0.0"))
            .await
            .unwrap();

        // 1.0.0 is past every limit but 2.0.0 descends from it.
        let removed = store.prune(&policy(1, 1_000)).await.unwrap();
        let removed: Vec<String> = removed.into_iter().map(|v| v.version).collect();
        assert_eq!(removed, vec!["1.1.0"]);
        assert!(store.get("sorter", "1.0.0").unwrap().is_some());
    }

    #[tokio::test]
    async fn statistics_summarise_registry() {
        let (store, _) = store();
        for v in ["1.0.0", "1.10.0", "1.2.0"] {
            store.create_version(new_version(v)).await.unwrap();
        }
        activate(&store, "1.0.0").await;
        store
            .create_version(NewVersion::new(
                "router",
                "0.1.0",
                ModelConfiguration::new("anthropic", "claude-haiku"),
            ))
            .await
            .unwrap();

        let stats = store.statistics().unwrap();
        assert_eq!(stats.total_models, 2);
        assert_eq!(stats.total_versions, 4);
        assert_eq!(stats.active_models, 1);
        assert_eq!(stats.by_status[&VersionStatus::Pending], 3);
        assert_eq!(stats.by_status[&VersionStatus::Active], 1);

        let sorter = stats.models.iter().find(|m| m.name == "sorter").unwrap();
        assert_eq!(sorter.active_version.as_deref(), Some("1.0.0"));
        assert_eq!(sorter.latest_version.as_deref(), Some("1.10.0"));
    }

    #[tokio::test]
    async fn models_are_independent() {
        let (store, _) = store();
        store.create_version(new_version("1.0.0")).await.unwrap();
        store
            .create_version(NewVersion::new(
                "router",
                "1.0.0",
                ModelConfiguration::new("anthropic", "claude-haiku"),
            ))
            .await
            .unwrap();
        assert_eq!(store.list_models().unwrap(), vec!["router", "sorter"]);
        assert!(store.get_active("router").unwrap().is_none());
    }
}
