//! Notification delivery.
//!
//! Delivery runs in its own task fed by the monitor's event channel, so a
//! slow or failing sink never holds up evaluation.

use std::sync::Arc;

use async_trait::async_trait;
use modelgrid_core::{Metric, Timestamp};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::MonitorResult;
use crate::monitor::MonitorEvent;
use crate::threshold::Severity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Alert,
    Rollback,
    Resolved,
    Anomaly,
}

/// Structured record handed to a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub model: String,
    pub version: String,
    pub metric: Metric,
    /// Threshold value, or the baseline mean for anomalies.
    pub threshold: f64,
    pub observed: f64,
    pub severity: Severity,
    pub timestamp: Timestamp,
}

impl From<&MonitorEvent> for Notification {
    fn from(event: &MonitorEvent) -> Self {
        match event {
            MonitorEvent::Alert(a) | MonitorEvent::RollbackRequested(a) | MonitorEvent::Resolved(a) => {
                let kind = match event {
                    MonitorEvent::Alert(_) => NotificationKind::Alert,
                    MonitorEvent::RollbackRequested(_) => NotificationKind::Rollback,
                    _ => NotificationKind::Resolved,
                };
                Notification {
                    kind,
                    model: a.model.clone(),
                    version: a.version.clone(),
                    metric: a.metric,
                    threshold: a.threshold_value,
                    observed: a.observed,
                    severity: a.severity,
                    timestamp: a.resolved_at.unwrap_or(a.fired_at),
                }
            }
            MonitorEvent::Anomaly(a) => Notification {
                kind: NotificationKind::Anomaly,
                model: a.model.clone(),
                version: a.version.clone(),
                metric: a.metric,
                threshold: a.baseline_mean,
                observed: a.value,
                severity: Severity::Info,
                timestamp: a.detected_at,
            },
        }
    }
}

/// Receives alert records. Transport (webhook, chat, pager) is up to the
/// implementation.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, notification: &Notification) -> MonitorResult<()>;
}

/// Writes notifications to the tracing log.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn deliver(&self, n: &Notification) -> MonitorResult<()> {
        match n.severity {
            Severity::Critical => error!(
                kind = ?n.kind,
                model = %n.model,
                version = %n.version,
                metric = %n.metric,
                threshold = n.threshold,
                observed = n.observed,
                "notification"
            ),
            Severity::Warning => warn!(
                kind = ?n.kind,
                model = %n.model,
                version = %n.version,
                metric = %n.metric,
                threshold = n.threshold,
                observed = n.observed,
                "notification"
            ),
            Severity::Info => info!(
                kind = ?n.kind,
                model = %n.model,
                version = %n.version,
                metric = %n.metric,
                observed = n.observed,
                "notification"
            ),
        }
        Ok(())
    }
}

/// Forward monitor events to every sink until shutdown or channel close.
pub fn spawn_delivery(
    mut events: broadcast::Receiver<MonitorEvent>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) => {
                        let notification = Notification::from(&event);
                        for sink in &sinks {
                            if let Err(e) = sink.deliver(&notification).await {
                                warn!(sink = sink.name(), error = %e, "notification delivery failed");
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notification delivery lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = shutdown.changed() => {
                    info!("notification delivery shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MonitorError;
    use crate::monitor::AlertRecord;
    use crate::threshold::{Comparator, ThresholdAction};
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl NotificationSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        async fn deliver(&self, n: &Notification) -> MonitorResult<()> {
            self.seen.lock().await.push(n.clone());
            Ok(())
        }
    }

    struct Broken;

    #[async_trait]
    impl NotificationSink for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn deliver(&self, _: &Notification) -> MonitorResult<()> {
            Err(MonitorError::Delivery("webhook down".to_string()))
        }
    }

    fn alert() -> AlertRecord {
        AlertRecord {
            id: "a1".to_string(),
            model: "sorter".to_string(),
            version: "1.1.0".to_string(),
            threshold: "success_rate_floor".to_string(),
            metric: Metric::SuccessRate,
            threshold_value: 0.95,
            comparator: Comparator::LessThan,
            observed: 0.8,
            severity: Severity::Critical,
            action: ThresholdAction::Rollback,
            started_at: 0,
            fired_at: 300,
            resolved_at: None,
            resolution: None,
        }
    }

    #[test]
    fn notification_from_rollback_event() {
        let n = Notification::from(&MonitorEvent::RollbackRequested(alert()));
        assert_eq!(n.kind, NotificationKind::Rollback);
        assert_eq!(n.threshold, 0.95);
        assert_eq!(n.timestamp, 300);
    }

    #[tokio::test]
    async fn failing_sink_does_not_block_others() {
        let (tx, rx) = broadcast::channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let recording = Arc::new(Recording::default());
        let handle = spawn_delivery(
            rx,
            vec![Arc::new(Broken), recording.clone(), Arc::new(LogSink)],
            stop_rx,
        );

        tx.send(MonitorEvent::RollbackRequested(alert())).unwrap();
        let mut resolved = alert();
        resolved.resolved_at = Some(600);
        tx.send(MonitorEvent::Resolved(resolved)).unwrap();
        drop(tx);
        handle.await.unwrap();

        let seen = recording.seen.lock().await;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1].kind, NotificationKind::Resolved);
        assert_eq!(seen[1].timestamp, 600);
        drop(stop_tx);
    }
}
