//! Where the controller reads candidate health from.

use async_trait::async_trait;
use modelgrid_core::ModelRef;
use modelgrid_monitor::{
    MonitorResult, PerformanceMonitor, PerformanceThreshold, VersionMetrics,
};

/// Health signals for versions under deployment.
#[async_trait]
pub trait HealthSource: Send + Sync {
    /// Name of a fired rollback-class threshold for `version`, if any.
    async fn fired_rollback(&self, version: &ModelRef) -> Option<String>;

    /// Whether a rollback-class breach is debouncing for `version`.
    async fn breach_pending(&self, version: &ModelRef) -> bool;

    /// Windowed aggregate with enough samples to judge.
    async fn metrics(&self, version: &ModelRef) -> MonitorResult<VersionMetrics>;

    /// Install thresholds for every version of `model`. They must stay in
    /// force across restarts until cleared.
    async fn install_thresholds(
        &self,
        model: &str,
        thresholds: Vec<PerformanceThreshold>,
    ) -> MonitorResult<()>;

    /// Put `model` back on the default thresholds.
    async fn clear_thresholds(&self, model: &str) -> MonitorResult<()>;

    /// Drop tracking state for a version that stopped serving.
    async fn release(&self, version: &ModelRef) -> MonitorResult<()>;
}

#[async_trait]
impl HealthSource for PerformanceMonitor {
    async fn fired_rollback(&self, version: &ModelRef) -> Option<String> {
        PerformanceMonitor::fired_rollback(self, version)
            .await
            .map(|b| b.threshold)
    }

    async fn breach_pending(&self, version: &ModelRef) -> bool {
        self.has_pending_breach(version).await
    }

    async fn metrics(&self, version: &ModelRef) -> MonitorResult<VersionMetrics> {
        self.sufficient_metrics(version).await
    }

    async fn install_thresholds(
        &self,
        model: &str,
        thresholds: Vec<PerformanceThreshold>,
    ) -> MonitorResult<()> {
        self.set_thresholds(model, thresholds).await
    }

    async fn clear_thresholds(&self, model: &str) -> MonitorResult<()> {
        PerformanceMonitor::clear_thresholds(self, model).await.map(|_| ())
    }

    async fn release(&self, version: &ModelRef) -> MonitorResult<()> {
        self.forget(version).await
    }
}
