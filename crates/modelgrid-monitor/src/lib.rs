//! modelgrid-monitor — live performance monitoring for model versions.
//!
//! The request path hands [`PerformanceSample`]s to a [`SampleRecorder`],
//! which only pushes onto a bounded channel and drops (and counts) samples
//! when it is full. An independent evaluation loop drains the channel into
//! per-version rolling windows and trend buckets and checks thresholds and
//! anomalies.
//!
//! # Architecture
//!
//! ```text
//! SampleRecorder ──mpsc──▶ PerformanceMonitor::evaluate()
//!                            ├── RollingWindow per (model, version)
//!                            ├── TrendSeries per (model, version)
//!                            ├── AnomalyDetector (advisory only)
//!                            ├── threshold::advance() per threshold
//!                            │     └── breach starts persisted in StateStore
//!                            └── broadcast::Sender<MonitorEvent>
//!                                  ├── DeploymentController (rollback)
//!                                  └── notify::spawn_delivery → NotificationSink
//! ```
//!
//! A threshold fires only after its breach has persisted for the full
//! configured duration. Recovery before that resets the breach start.
//!
//! [`PerformanceSample`]: modelgrid_core::PerformanceSample

pub mod anomaly;
pub mod error;
pub mod monitor;
pub mod notify;
pub mod threshold;
pub mod trend;
pub mod window;

pub use anomaly::AnomalyDetector;
pub use error::{MonitorError, MonitorResult};
pub use monitor::{
    AlertRecord, AnomalyRecord, EvaluationReport, MonitorEvent, MonitoringStatistics,
    PerformanceMonitor, SampleRecorder, VersionComparison,
};
pub use notify::{LogSink, Notification, NotificationKind, NotificationSink, spawn_delivery};
pub use threshold::{
    BreachRecord, BreachTransition, Comparator, PerformanceThreshold, Severity, ThresholdAction,
};
pub use trend::{TrendPoint, TrendSeries};
pub use window::{RollingWindow, VersionMetrics};
