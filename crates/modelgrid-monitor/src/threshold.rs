//! Performance thresholds and breach debouncing.
//!
//! A breach starts the first time an evaluation observes the metric out
//! of bounds. It fires once `now - started_at >= duration_secs` and stays
//! fired until the metric recovers. Recovery at any point clears the
//! record, so a later breach starts its clock from zero.

use modelgrid_core::{Metric, ModelRef, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{MonitorError, MonitorResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparator {
    GreaterThan,
    LessThan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdAction {
    Alert,
    Rollback,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceThreshold {
    /// Unique per model; part of the persisted breach key.
    pub name: String,
    pub metric: Metric,
    pub value: f64,
    pub comparator: Comparator,
    pub severity: Severity,
    /// How long the breach must persist before firing.
    pub duration_secs: u64,
    pub action: ThresholdAction,
}

impl PerformanceThreshold {
    pub fn is_breached(&self, observed: f64) -> bool {
        match self.comparator {
            Comparator::GreaterThan => observed > self.value,
            Comparator::LessThan => observed < self.value,
        }
    }

    pub fn validate(&self) -> MonitorResult<()> {
        let invalid = |reason: &str| MonitorError::InvalidThreshold {
            name: self.name.clone(),
            reason: reason.to_string(),
        };
        if self.name.trim().is_empty() || self.name.contains('/') {
            return Err(invalid("name must be non-empty and contain no '/'"));
        }
        if !self.value.is_finite() {
            return Err(invalid("value must be finite"));
        }
        if self.metric.is_proportion() && !(0.0..=1.0).contains(&self.value) {
            return Err(invalid("proportion thresholds must lie in [0, 1]"));
        }
        Ok(())
    }

    /// Thresholds applied to models that have none configured.
    pub fn defaults() -> Vec<PerformanceThreshold> {
        vec![
            PerformanceThreshold {
                name: "success_rate_floor".to_string(),
                metric: Metric::SuccessRate,
                value: 0.95,
                comparator: Comparator::LessThan,
                severity: Severity::Critical,
                duration_secs: 300,
                action: ThresholdAction::Rollback,
            },
            PerformanceThreshold {
                name: "error_rate_ceiling".to_string(),
                metric: Metric::ErrorRate,
                value: 0.1,
                comparator: Comparator::GreaterThan,
                severity: Severity::Critical,
                duration_secs: 300,
                action: ThresholdAction::Rollback,
            },
            PerformanceThreshold {
                name: "latency_ceiling".to_string(),
                metric: Metric::LatencyMs,
                value: 10_000.0,
                comparator: Comparator::GreaterThan,
                severity: Severity::Warning,
                duration_secs: 300,
                action: ThresholdAction::Alert,
            },
        ]
    }
}

/// Persisted debounce state for one (version, threshold).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreachRecord {
    pub model: String,
    pub version: String,
    pub threshold: String,
    pub action: ThresholdAction,
    pub started_at: Timestamp,
    pub fired_at: Option<Timestamp>,
}

impl BreachRecord {
    /// Composite key: `{model}/{version}/{threshold}`.
    pub fn table_key(&self) -> String {
        breach_key(&ModelRef::new(&self.model, &self.version), &self.threshold)
    }
}

pub(crate) fn breach_key(model_ref: &ModelRef, threshold: &str) -> String {
    format!("{}/{}/{}", model_ref.name, model_ref.version, threshold)
}

/// What one observation did to a breach.
#[derive(Debug, Clone, PartialEq)]
pub enum BreachTransition {
    /// In bounds and nothing pending.
    Clear,
    /// First out-of-bounds observation.
    Started,
    /// Out of bounds, duration not yet reached.
    Pending { elapsed: u64 },
    /// Duration reached on this observation.
    Fired,
    /// Still out of bounds after firing.
    Sustained,
    /// Back in bounds; `fired` says whether an alert is being resolved.
    Recovered { fired: bool },
}

/// Advance the debounce state of `threshold` for one observation.
///
/// Returns the new record (`None` once recovered) and the transition.
pub fn advance(
    current: Option<BreachRecord>,
    threshold: &PerformanceThreshold,
    model_ref: &ModelRef,
    observed: f64,
    now: Timestamp,
) -> (Option<BreachRecord>, BreachTransition) {
    if !threshold.is_breached(observed) {
        return match current {
            Some(record) => (
                None,
                BreachTransition::Recovered {
                    fired: record.fired_at.is_some(),
                },
            ),
            None => (None, BreachTransition::Clear),
        };
    }

    let mut record = match current {
        Some(record) => record,
        None => {
            let record = BreachRecord {
                model: model_ref.name.clone(),
                version: model_ref.version.clone(),
                threshold: threshold.name.clone(),
                action: threshold.action,
                started_at: now,
                fired_at: None,
            };
            if threshold.duration_secs == 0 {
                return (
                    Some(BreachRecord {
                        fired_at: Some(now),
                        ..record
                    }),
                    BreachTransition::Fired,
                );
            }
            return (Some(record), BreachTransition::Started);
        }
    };

    if record.fired_at.is_some() {
        return (Some(record), BreachTransition::Sustained);
    }
    let elapsed = now.saturating_sub(record.started_at);
    if elapsed >= threshold.duration_secs {
        record.fired_at = Some(now);
        (Some(record), BreachTransition::Fired)
    } else {
        (Some(record), BreachTransition::Pending { elapsed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor() -> PerformanceThreshold {
        PerformanceThreshold::defaults().remove(0)
    }

    fn r() -> ModelRef {
        ModelRef::new("sorter", "1.1.0")
    }

    #[test]
    fn fires_exactly_at_duration_never_before() {
        let t = floor();
        let (rec, tr) = advance(None, &t, &r(), 0.8, 1_000);
        assert_eq!(tr, BreachTransition::Started);

        let (rec, tr) = advance(rec, &t, &r(), 0.8, 1_299);
        assert_eq!(tr, BreachTransition::Pending { elapsed: 299 });

        let (rec, tr) = advance(rec, &t, &r(), 0.8, 1_300);
        assert_eq!(tr, BreachTransition::Fired);
        assert_eq!(rec.as_ref().unwrap().fired_at, Some(1_300));

        let (_, tr) = advance(rec, &t, &r(), 0.8, 1_360);
        assert_eq!(tr, BreachTransition::Sustained);
    }

    #[test]
    fn recovery_resets_breach_start() {
        let t = floor();
        let (rec, _) = advance(None, &t, &r(), 0.8, 1_000);
        let (rec, _) = advance(rec, &t, &r(), 0.8, 1_240);
        let (rec, tr) = advance(rec, &t, &r(), 0.99, 1_260);
        assert_eq!(tr, BreachTransition::Recovered { fired: false });
        assert!(rec.is_none());

        // A fresh breach needs the full duration again.
        let (rec, tr) = advance(rec, &t, &r(), 0.8, 1_280);
        assert_eq!(tr, BreachTransition::Started);
        let (_, tr) = advance(rec, &t, &r(), 0.8, 1_500);
        assert_eq!(tr, BreachTransition::Pending { elapsed: 220 });
    }

    #[test]
    fn recovery_after_fire_resolves() {
        let t = floor();
        let (rec, _) = advance(None, &t, &r(), 0.5, 0);
        let (rec, _) = advance(rec, &t, &r(), 0.5, 300);
        let (_, tr) = advance(rec, &t, &r(), 0.97, 360);
        assert_eq!(tr, BreachTransition::Recovered { fired: true });
    }

    #[test]
    fn zero_duration_fires_immediately() {
        let mut t = floor();
        t.duration_secs = 0;
        let (rec, tr) = advance(None, &t, &r(), 0.1, 42);
        assert_eq!(tr, BreachTransition::Fired);
        assert_eq!(rec.unwrap().started_at, 42);
    }

    #[test]
    fn comparator_boundaries_are_strict() {
        let t = floor();
        assert!(!t.is_breached(0.95));
        assert!(t.is_breached(0.9499));
        let ceiling = &PerformanceThreshold::defaults()[1];
        assert!(!ceiling.is_breached(0.1));
        assert!(ceiling.is_breached(0.11));
    }

    #[test]
    fn validation() {
        let mut t = floor();
        assert!(t.validate().is_ok());
        t.value = 1.5;
        assert!(t.validate().is_err());
        t.value = 0.9;
        t.name = "a/b".to_string();
        assert!(t.validate().is_err());
    }

    #[test]
    fn breach_key_layout() {
        let rec = BreachRecord {
            model: "sorter".to_string(),
            version: "1.1.0".to_string(),
            threshold: "success_rate_floor".to_string(),
            action: ThresholdAction::Rollback,
            started_at: 0,
            fired_at: None,
        };
        assert_eq!(rec.table_key(), "sorter/1.1.0/success_rate_floor");
    }
}
