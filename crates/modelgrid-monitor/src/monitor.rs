//! PerformanceMonitor — windows, thresholds, and the event channel.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use modelgrid_core::config::MonitorConfig;
use modelgrid_core::{Metric, ModelRef, PerformanceSample, SharedClock, Timestamp};
use modelgrid_state::{StateStore, Table};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::anomaly::{AnomalyDetector, SCREENED_METRICS};
use crate::error::{MonitorError, MonitorResult};
use crate::threshold::{
    self, BreachRecord, BreachTransition, Comparator, PerformanceThreshold, Severity,
    ThresholdAction, breach_key,
};
use crate::trend::{TrendPoint, TrendSeries};
use crate::window::{RollingWindow, VersionMetrics};

const EVENT_CAPACITY: usize = 1024;
const HISTORY_LIMIT: usize = 1000;

/// A threshold alert, from firing to resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    pub model: String,
    pub version: String,
    pub threshold: String,
    pub metric: Metric,
    pub threshold_value: f64,
    pub comparator: Comparator,
    pub observed: f64,
    pub severity: Severity,
    pub action: ThresholdAction,
    pub started_at: Timestamp,
    pub fired_at: Timestamp,
    pub resolved_at: Option<Timestamp>,
    /// Operator note for a manually resolved alert.
    #[serde(default)]
    pub resolution: Option<String>,
}

impl AlertRecord {
    pub fn model_ref(&self) -> ModelRef {
        ModelRef::new(&self.model, &self.version)
    }
}

/// A sample far outside its trailing baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub model: String,
    pub version: String,
    pub metric: Metric,
    pub value: f64,
    pub z_score: f64,
    pub baseline_mean: f64,
    pub baseline_std_dev: f64,
    pub detected_at: Timestamp,
}

/// Published on every state change worth acting on.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// An `alert`-class threshold fired.
    Alert(AlertRecord),
    /// A `rollback`-class threshold fired.
    RollbackRequested(AlertRecord),
    /// A fired threshold recovered.
    Resolved(AlertRecord),
    /// Advisory only.
    Anomaly(AnomalyRecord),
}

impl MonitorEvent {
    pub fn model_ref(&self) -> ModelRef {
        match self {
            MonitorEvent::Alert(a)
            | MonitorEvent::RollbackRequested(a)
            | MonitorEvent::Resolved(a) => a.model_ref(),
            MonitorEvent::Anomaly(a) => ModelRef::new(&a.model, &a.version),
        }
    }
}

/// Counters from one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub ingested: usize,
    pub evaluated: usize,
    /// Versions below `min_samples`; their breach state is untouched.
    pub insufficient: usize,
    pub fired: usize,
    pub resolved: usize,
    pub anomalies: usize,
    /// Versions whose evaluation failed; others still ran.
    pub failures: usize,
}

/// Metrics of one version in a side-by-side comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionComparison {
    pub version: String,
    pub metrics: Option<VersionMetrics>,
}

/// Counts across the monitor's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoringStatistics {
    pub models_monitored: usize,
    pub versions_monitored: usize,
    /// Samples currently held in rolling windows.
    pub window_samples: usize,
    pub active_alerts: usize,
    pub alert_history: usize,
    /// Breaches debouncing or fired.
    pub open_breaches: usize,
    /// Models with thresholds other than the defaults.
    pub configured_models: usize,
    pub configured_thresholds: usize,
    pub oldest_sample: Option<Timestamp>,
    pub newest_sample: Option<Timestamp>,
    /// Samples refused because the buffer was full.
    pub dropped_samples: u64,
}

/// Persisted per-model threshold override.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct ThresholdSet {
    model: String,
    thresholds: Vec<PerformanceThreshold>,
}

/// Cheap handle for the request path. Never blocks.
///
/// The buffer between the request path and the evaluation loop is
/// bounded; a sample recorded while it is full is dropped and counted.
#[derive(Clone)]
pub struct SampleRecorder {
    tx: mpsc::Sender<PerformanceSample>,
    dropped: Arc<AtomicU64>,
}

impl SampleRecorder {
    pub fn record(&self, sample: PerformanceSample) -> MonitorResult<()> {
        match self.tx.try_send(sample) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped.is_power_of_two() {
                    warn!(dropped, "sample buffer full; dropping samples");
                }
                Err(MonitorError::BufferFull)
            }
            Err(TrySendError::Closed(_)) => Err(MonitorError::ChannelClosed),
        }
    }

    /// Samples dropped since the monitor started.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[derive(Default)]
struct Book {
    windows: HashMap<ModelRef, RollingWindow>,
    trends: HashMap<ModelRef, TrendSeries>,
    /// Breach key → debounce state. Mirrors the `breaches` table.
    breaches: HashMap<String, BreachRecord>,
    /// Breach key → fired alert.
    active: HashMap<String, AlertRecord>,
    history: VecDeque<AlertRecord>,
}

impl Book {
    fn archive(&mut self, alert: AlertRecord) {
        if self.history.len() == HISTORY_LIMIT {
            self.history.pop_front();
        }
        self.history.push_back(alert);
    }
}

pub struct PerformanceMonitor {
    config: MonitorConfig,
    clock: SharedClock,
    state: StateStore,
    detector: AnomalyDetector,
    recorder: SampleRecorder,
    receiver: Mutex<mpsc::Receiver<PerformanceSample>>,
    book: RwLock<Book>,
    thresholds: RwLock<HashMap<String, Vec<PerformanceThreshold>>>,
    events: broadcast::Sender<MonitorEvent>,
}

impl PerformanceMonitor {
    /// Create a monitor, restoring persisted breach starts and threshold
    /// overrides.
    pub fn new(config: MonitorConfig, state: StateStore, clock: SharedClock) -> MonitorResult<Self> {
        let (tx, rx) = mpsc::channel(config.sample_buffer.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let mut book = Book::default();
        for record in state.list_records::<BreachRecord>(Table::Breaches)? {
            book.breaches.insert(record.table_key(), record);
        }
        if !book.breaches.is_empty() {
            info!(count = book.breaches.len(), "restored breach state");
        }

        let mut thresholds = HashMap::new();
        for set in state.list_records::<ThresholdSet>(Table::Thresholds)? {
            thresholds.insert(set.model, set.thresholds);
        }
        if !thresholds.is_empty() {
            info!(models = thresholds.len(), "restored threshold overrides");
        }

        Ok(Self {
            detector: AnomalyDetector::new(config.anomaly_sensitivity, config.anomaly_min_baseline),
            config,
            clock,
            state,
            recorder: SampleRecorder {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            receiver: Mutex::new(rx),
            book: RwLock::new(book),
            thresholds: RwLock::new(thresholds),
            events,
        })
    }

    /// Handle for appending samples from the request path.
    pub fn recorder(&self) -> SampleRecorder {
        self.recorder.clone()
    }

    /// Convenience for callers that hold the monitor itself.
    pub fn record(&self, sample: PerformanceSample) -> MonitorResult<()> {
        self.recorder.record(sample)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.events.subscribe()
    }

    /// Samples dropped because the buffer was full.
    pub fn dropped_samples(&self) -> u64 {
        self.recorder.dropped()
    }

    /// Replace the thresholds for `model`. The override is persisted and
    /// survives restarts until [`clear_thresholds`](Self::clear_thresholds).
    pub async fn set_thresholds(
        &self,
        model: &str,
        thresholds: Vec<PerformanceThreshold>,
    ) -> MonitorResult<()> {
        let mut seen = HashSet::new();
        for t in &thresholds {
            t.validate()?;
            if !seen.insert(t.name.as_str()) {
                return Err(MonitorError::InvalidThreshold {
                    name: t.name.clone(),
                    reason: "duplicate name".to_string(),
                });
            }
        }
        let mut current = self.thresholds.write().await;
        let set = ThresholdSet {
            model: model.to_string(),
            thresholds,
        };
        self.state.put_record(Table::Thresholds, model, &set)?;
        info!(model = %model, count = set.thresholds.len(), "thresholds configured");
        current.insert(set.model, set.thresholds);
        Ok(())
    }

    /// Revert `model` to the default thresholds. Returns whether an
    /// override was in place.
    pub async fn clear_thresholds(&self, model: &str) -> MonitorResult<bool> {
        let mut current = self.thresholds.write().await;
        self.state.delete_record(Table::Thresholds, model)?;
        let existed = current.remove(model).is_some();
        if existed {
            info!(model = %model, "thresholds reverted to defaults");
        }
        Ok(existed)
    }

    /// Thresholds in force for `model`; the defaults when none are set.
    pub async fn thresholds_for(&self, model: &str) -> Vec<PerformanceThreshold> {
        self.thresholds
            .read()
            .await
            .get(model)
            .cloned()
            .unwrap_or_else(PerformanceThreshold::defaults)
    }

    /// Drain pending samples and evaluate every tracked version.
    pub async fn evaluate(&self) -> EvaluationReport {
        let now = self.clock.now();
        let mut report = EvaluationReport::default();

        let mut batches: BTreeMap<ModelRef, Vec<PerformanceSample>> = BTreeMap::new();
        {
            let mut rx = self.receiver.lock().await;
            while let Ok(sample) = rx.try_recv() {
                report.ingested += 1;
                batches.entry(sample.model_ref()).or_default().push(sample);
            }
        }

        let thresholds = self.thresholds.read().await.clone();
        let mut events = Vec::new();
        {
            let mut book = self.book.write().await;

            for (model_ref, samples) in batches {
                let trend = book.trends.entry(model_ref.clone()).or_insert_with(|| {
                    TrendSeries::new(self.config.trend_bucket_secs, self.config.trend_retention_secs)
                });
                for sample in &samples {
                    trend.push(sample);
                }
                let window = book.windows.entry(model_ref.clone()).or_insert_with(|| {
                    RollingWindow::new(self.config.window_secs, self.config.max_samples_per_window)
                });
                window.prune(now);
                if let Some(anomaly) = self.screen(&model_ref, window, &samples, now) {
                    report.anomalies += anomaly.len();
                    events.extend(anomaly.into_iter().map(MonitorEvent::Anomaly));
                }
                for sample in samples {
                    window.push(sample);
                }
            }
            book.trends.retain(|_, trend| {
                trend.prune(now);
                !trend.is_empty()
            });

            let refs: Vec<ModelRef> = book.windows.keys().cloned().collect();
            for model_ref in refs {
                let model_thresholds = thresholds
                    .get(&model_ref.name)
                    .cloned()
                    .unwrap_or_else(PerformanceThreshold::defaults);
                match self.evaluate_version(&mut book, &model_ref, &model_thresholds, now) {
                    Ok(Some(version_events)) => {
                        report.evaluated += 1;
                        for event in version_events {
                            match &event {
                                MonitorEvent::Resolved(_) => report.resolved += 1,
                                MonitorEvent::Anomaly(_) => {}
                                _ => report.fired += 1,
                            }
                            events.push(event);
                        }
                    }
                    Ok(None) => report.insufficient += 1,
                    Err(e) => {
                        report.failures += 1;
                        error!(version = %model_ref, error = %e, "evaluation failed");
                    }
                }
            }
        }

        for event in events {
            // No subscribers is fine; state is still in the book.
            let _ = self.events.send(event);
        }
        debug!(?report, "evaluation pass complete");
        report
    }

    /// Score new samples against the trailing window, one record per
    /// metric (the most extreme).
    fn screen(
        &self,
        model_ref: &ModelRef,
        window: &RollingWindow,
        samples: &[PerformanceSample],
        now: Timestamp,
    ) -> Option<Vec<AnomalyRecord>> {
        let mut found = Vec::new();
        for metric in SCREENED_METRICS {
            let Some(baseline) = self.detector.baseline(&window.values(metric)) else {
                continue;
            };
            let worst = samples
                .iter()
                .filter_map(|s| s.value(metric))
                .filter_map(|v| self.detector.score(&baseline, v).map(|z| (v, z)))
                .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()));
            if let Some((value, z_score)) = worst {
                warn!(version = %model_ref, %metric, value, z_score, "anomaly detected");
                found.push(AnomalyRecord {
                    model: model_ref.name.clone(),
                    version: model_ref.version.clone(),
                    metric,
                    value,
                    z_score,
                    baseline_mean: baseline.mean,
                    baseline_std_dev: baseline.std_dev,
                    detected_at: now,
                });
            }
        }
        (!found.is_empty()).then_some(found)
    }

    /// Evaluate one version. `Ok(None)` means too few samples to judge.
    fn evaluate_version(
        &self,
        book: &mut Book,
        model_ref: &ModelRef,
        thresholds: &[PerformanceThreshold],
        now: Timestamp,
    ) -> MonitorResult<Option<Vec<MonitorEvent>>> {
        let Some(window) = book.windows.get_mut(model_ref) else {
            return Ok(Some(Vec::new()));
        };
        window.prune(now);
        if window.len() < self.config.min_samples {
            return Ok(None);
        }
        let metrics = window.aggregate(model_ref, now);

        let mut events = Vec::new();
        for t in thresholds {
            let Some(observed) = metrics.value(t.metric) else {
                continue;
            };
            let key = breach_key(model_ref, &t.name);
            let current = book.breaches.get(&key).cloned();
            let (next, transition) = threshold::advance(current, t, model_ref, observed, now);

            // Persist first so memory never runs ahead of the store.
            match &next {
                Some(record) => self.state.put_record(Table::Breaches, &key, record)?,
                None => {
                    if book.breaches.contains_key(&key) {
                        self.state.delete_record(Table::Breaches, &key)?;
                    }
                }
            }

            match transition {
                BreachTransition::Clear => {}
                BreachTransition::Started => {
                    debug!(version = %model_ref, threshold = %t.name, observed, "breach started");
                }
                BreachTransition::Pending { elapsed } => {
                    debug!(version = %model_ref, threshold = %t.name, observed, elapsed, "breach pending");
                }
                BreachTransition::Fired => {
                    let started_at = next.as_ref().map(|r| r.started_at).unwrap_or(now);
                    let alert = new_alert(model_ref, t, observed, started_at, now);
                    warn!(
                        version = %model_ref,
                        threshold = %t.name,
                        observed,
                        action = ?t.action,
                        "threshold fired"
                    );
                    book.active.insert(key.clone(), alert.clone());
                    events.push(match t.action {
                        ThresholdAction::Rollback => MonitorEvent::RollbackRequested(alert),
                        ThresholdAction::Alert => MonitorEvent::Alert(alert),
                    });
                }
                BreachTransition::Sustained => {
                    // Restarted processes rebuild the alert without re-publishing.
                    if let Some(alert) = book.active.get_mut(&key) {
                        alert.observed = observed;
                    } else if let Some(record) = &next {
                        let fired_at = record.fired_at.unwrap_or(now);
                        let alert = new_alert(model_ref, t, observed, record.started_at, fired_at);
                        book.active.insert(key.clone(), alert);
                    }
                }
                BreachTransition::Recovered { fired } => {
                    if let Some(mut alert) = book.active.remove(&key) {
                        alert.resolved_at = Some(now);
                        alert.observed = observed;
                        info!(version = %model_ref, threshold = %t.name, observed, "alert resolved");
                        book.archive(alert.clone());
                        events.push(MonitorEvent::Resolved(alert));
                    } else if fired {
                        debug!(version = %model_ref, threshold = %t.name, "fired breach cleared");
                    }
                }
            }

            match next {
                Some(record) => {
                    book.breaches.insert(key, record);
                }
                None => {
                    book.breaches.remove(&key);
                }
            }
        }
        Ok(Some(events))
    }

    /// Aggregate of the current window for `model_ref`.
    pub async fn current_metrics(&self, model_ref: &ModelRef) -> MonitorResult<VersionMetrics> {
        let now = self.clock.now();
        let mut book = self.book.write().await;
        let window = book
            .windows
            .get_mut(model_ref)
            .ok_or_else(|| MonitorError::UnknownVersion(model_ref.clone()))?;
        window.prune(now);
        Ok(window.aggregate(model_ref, now))
    }

    /// Like [`current_metrics`](Self::current_metrics), but refuses to
    /// answer below `min_samples`.
    pub async fn sufficient_metrics(&self, model_ref: &ModelRef) -> MonitorResult<VersionMetrics> {
        let metrics = self.current_metrics(model_ref).await?;
        if metrics.sample_count < self.config.min_samples {
            return Err(MonitorError::InsufficientData {
                version: model_ref.clone(),
                have: metrics.sample_count,
                need: self.config.min_samples,
            });
        }
        Ok(metrics)
    }

    /// Side-by-side metrics for several versions of one model.
    pub async fn compare_versions(&self, model: &str, versions: &[String]) -> Vec<VersionComparison> {
        let mut out = Vec::with_capacity(versions.len());
        for version in versions {
            let metrics = self
                .current_metrics(&ModelRef::new(model, version))
                .await
                .ok();
            out.push(VersionComparison {
                version: version.clone(),
                metrics,
            });
        }
        out
    }

    /// Whether `model_ref` has any out-of-bounds rollback-class threshold,
    /// fired or still debouncing.
    pub async fn has_pending_breach(&self, model_ref: &ModelRef) -> bool {
        let book = self.book.read().await;
        book.breaches.values().any(|b| {
            b.action == ThresholdAction::Rollback
                && b.model == model_ref.name
                && b.version == model_ref.version
        })
    }

    /// The fired rollback-class breach for `model_ref`, if any.
    ///
    /// Backed by persisted state, so it survives restarts even when the
    /// original event was never consumed.
    pub async fn fired_rollback(&self, model_ref: &ModelRef) -> Option<BreachRecord> {
        let book = self.book.read().await;
        book.breaches
            .values()
            .find(|b| {
                b.action == ThresholdAction::Rollback
                    && b.fired_at.is_some()
                    && b.model == model_ref.name
                    && b.version == model_ref.version
            })
            .cloned()
    }

    /// Fired alerts not yet resolved, optionally for one model.
    pub async fn active_alerts(&self, model: Option<&str>) -> Vec<AlertRecord> {
        let book = self.book.read().await;
        let mut alerts: Vec<AlertRecord> = book
            .active
            .values()
            .filter(|a| model.is_none_or(|m| a.model == m))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| a.fired_at);
        alerts
    }

    /// Most recent resolved alerts, newest last.
    pub async fn alert_history(&self, limit: usize) -> Vec<AlertRecord> {
        let book = self.book.read().await;
        let skip = book.history.len().saturating_sub(limit);
        book.history.iter().skip(skip).cloned().collect()
    }

    /// Resolve a fired alert by hand.
    ///
    /// The breach behind it is cleared as well, so a condition that
    /// persists has to breach for the full duration again before it
    /// re-fires. Returns `false` when no active alert has that id.
    pub async fn resolve_alert(&self, alert_id: &str, note: Option<String>) -> MonitorResult<bool> {
        let mut book = self.book.write().await;
        let Some(key) = book
            .active
            .iter()
            .find(|(_, a)| a.id == alert_id)
            .map(|(k, _)| k.clone())
        else {
            return Ok(false);
        };
        if book.breaches.contains_key(&key) {
            self.state.delete_record(Table::Breaches, &key)?;
            book.breaches.remove(&key);
        }
        let Some(mut alert) = book.active.remove(&key) else {
            return Ok(false);
        };
        alert.resolved_at = Some(self.clock.now());
        alert.resolution = note;
        info!(version = %alert.model_ref(), threshold = %alert.threshold, id = %alert.id, "alert resolved manually");
        book.archive(alert.clone());
        drop(book);
        let _ = self.events.send(MonitorEvent::Resolved(alert));
        Ok(true)
    }

    /// Bucketed history of every metric for `model_ref` over the last
    /// `lookback_secs`.
    pub async fn performance_trends(
        &self,
        model_ref: &ModelRef,
        lookback_secs: u64,
    ) -> MonitorResult<BTreeMap<Metric, Vec<TrendPoint>>> {
        let since = self.clock.now().saturating_sub(lookback_secs);
        let book = self.book.read().await;
        let trend = book
            .trends
            .get(model_ref)
            .ok_or_else(|| MonitorError::UnknownVersion(model_ref.clone()))?;
        Ok(trend.points(since))
    }

    pub async fn statistics(&self) -> MonitoringStatistics {
        let book = self.book.read().await;
        let thresholds = self.thresholds.read().await;
        let models: HashSet<&str> = book.windows.keys().map(|r| r.name.as_str()).collect();
        let spans: Vec<(Timestamp, Timestamp)> =
            book.windows.values().filter_map(RollingWindow::span).collect();
        MonitoringStatistics {
            models_monitored: models.len(),
            versions_monitored: book.windows.len(),
            window_samples: book.windows.values().map(RollingWindow::len).sum(),
            active_alerts: book.active.len(),
            alert_history: book.history.len(),
            open_breaches: book.breaches.len(),
            configured_models: thresholds.len(),
            configured_thresholds: thresholds.values().map(Vec::len).sum(),
            oldest_sample: spans.iter().map(|s| s.0).min(),
            newest_sample: spans.iter().map(|s| s.1).max(),
            dropped_samples: self.dropped_samples(),
        }
    }

    /// Drop window, breach state, and alerts for a version that no longer
    /// serves traffic.
    pub async fn forget(&self, model_ref: &ModelRef) -> MonitorResult<()> {
        let mut book = self.book.write().await;
        book.windows.remove(model_ref);
        let prefix = format!("{}/", model_ref.key());
        let keys: Vec<String> = book
            .breaches
            .keys()
            .filter(|k| k.starts_with(&prefix))
            .cloned()
            .collect();
        for key in keys {
            self.state.delete_record(Table::Breaches, &key)?;
            book.breaches.remove(&key);
            if let Some(mut alert) = book.active.remove(&key) {
                alert.resolved_at = Some(self.clock.now());
                book.archive(alert);
            }
        }
        debug!(version = %model_ref, "monitor state cleared");
        Ok(())
    }

    /// Run the evaluation loop until shutdown signal.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = Duration::from_secs(self.config.evaluation_interval_secs.max(1));
        info!(interval_secs = interval.as_secs(), "performance monitor started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let report = self.evaluate().await;
                    if report.failures > 0 {
                        warn!(failures = report.failures, "some versions failed evaluation");
                    }
                }
                _ = shutdown.changed() => {
                    info!("performance monitor shutting down");
                    break;
                }
            }
        }
    }
}

fn new_alert(
    model_ref: &ModelRef,
    t: &PerformanceThreshold,
    observed: f64,
    started_at: Timestamp,
    fired_at: Timestamp,
) -> AlertRecord {
    AlertRecord {
        id: uuid::Uuid::now_v7().to_string(),
        model: model_ref.name.clone(),
        version: model_ref.version.clone(),
        threshold: t.name.clone(),
        metric: t.metric,
        threshold_value: t.value,
        comparator: t.comparator,
        observed,
        severity: t.severity,
        action: t.action,
        started_at,
        fired_at,
        resolved_at: None,
        resolution: None,
    }
}
