//! Deployment records and the state-machine step.
//!
//! [`decide`] is pure: it looks at a deployment plus what the monitor and
//! the A/B engine currently report, and names the next action. The
//! controller gathers those signals and applies the action.

use modelgrid_abtest::{AbTestAnalysis, Verdict};
use modelgrid_core::{ModelRef, Timestamp};
use modelgrid_monitor::VersionMetrics;
use serde::{Deserialize, Serialize};

use crate::strategy::{HealthCriteria, RollbackConfig, Strategy};
use crate::traffic::TrafficSplit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Initializing,
    /// Canary: stepping traffic up.
    RampingUp,
    /// Watching the candidate at its final share, or waiting on an A/B
    /// verdict.
    Evaluating,
    Promoted,
    RolledBack,
    Failed,
}

impl DeploymentState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            DeploymentState::Promoted | DeploymentState::RolledBack | DeploymentState::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentEvent {
    pub at: Timestamp,
    pub state: DeploymentState,
    pub candidate_percent: u8,
    pub note: String,
}

/// A persisted deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub model: String,
    /// Version being rolled out.
    pub version: String,
    /// Version that was `Active` when the deployment began.
    pub baseline: Option<String>,
    pub strategy: Strategy,
    pub health: HealthCriteria,
    pub rollback: RollbackConfig,
    pub state: DeploymentState,
    pub traffic: TrafficSplit,
    /// Index into the canary steps.
    pub step: usize,
    pub step_started_at: Timestamp,
    pub started_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
    pub ab_test_id: Option<String>,
    /// Why the deployment ended, when it did not promote.
    pub reason: Option<String>,
    #[serde(default)]
    pub history: Vec<DeploymentEvent>,
}

impl Deployment {
    pub fn target(&self) -> ModelRef {
        ModelRef::new(&self.model, &self.version)
    }

    pub fn baseline_ref(&self) -> Option<ModelRef> {
        self.baseline.as_deref().map(|b| ModelRef::new(&self.model, b))
    }

    pub fn candidate_percent(&self) -> u8 {
        self.traffic.percent_for(&self.version)
    }

    pub fn is_in_flight(&self) -> bool {
        !self.state.is_terminal()
    }

    /// Record a state change (or a note within the same state).
    pub(crate) fn enter(&mut self, state: DeploymentState, now: Timestamp, note: impl Into<String>) {
        self.state = state;
        self.updated_at = now;
        if state.is_terminal() {
            self.finished_at = Some(now);
        }
        self.history.push(DeploymentEvent {
            at: now,
            state,
            candidate_percent: self.candidate_percent(),
            note: note.into(),
        });
    }
}

/// Candidate metrics as read for one step.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricsRead {
    Ready(VersionMetrics),
    /// Timed out, too few samples, or no samples at all.
    Unavailable(String),
}

/// What the collaborators report about the candidate right now.
#[derive(Debug, Clone, PartialEq)]
pub struct Signals {
    /// A fired rollback-class breach.
    pub rollback: Option<String>,
    /// A rollback-class breach that is still debouncing.
    pub breach_pending: bool,
    pub metrics: MetricsRead,
    /// Latest A/B analysis, for A/B deployments with enough data.
    pub analysis: Option<AbTestAnalysis>,
}

/// Next action for a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Stay in the current state.
    Hold { reason: String },
    /// Canary: move to the given step.
    Shift { step: usize, percent: u8 },
    /// Make the candidate `Active` at 100%. `finish` skips the final
    /// evaluation window.
    Promote { finish: bool },
    /// The final evaluation window passed cleanly.
    Complete,
    Rollback { reason: String },
    /// Blue-green: exercise the shadow before cutover.
    ShadowValidate,
}

fn hold(reason: impl Into<String>) -> Action {
    Action::Hold {
        reason: reason.into(),
    }
}

/// Decide the next action for `d`.
pub fn decide(d: &Deployment, signals: &Signals, now: Timestamp) -> Action {
    match d.state {
        DeploymentState::Promoted | DeploymentState::RolledBack | DeploymentState::Failed => {
            hold("deployment finished")
        }
        DeploymentState::Initializing => match d.strategy {
            Strategy::BlueGreen(_) => Action::ShadowValidate,
            _ => hold("initializing"),
        },
        DeploymentState::RampingUp | DeploymentState::Evaluating => {
            if let Some(breach) = &signals.rollback {
                return if d.rollback.enabled {
                    Action::Rollback {
                        reason: format!("rollback threshold fired: {breach}"),
                    }
                } else {
                    hold(format!("rollback threshold fired ({breach}) but auto-rollback is disabled"))
                };
            }

            if matches!(d.strategy, Strategy::AbTest(_)) {
                return match &signals.analysis {
                    None => hold("waiting for A/B data"),
                    Some(a) => match a.verdict {
                        Verdict::PromoteTreatment => Action::Promote { finish: true },
                        Verdict::KeepControl => Action::Rollback {
                            reason: a.recommendation.clone(),
                        },
                        Verdict::Extend => hold(a.recommendation.clone()),
                        Verdict::Inconclusive => Action::Rollback {
                            reason: format!("A/B test {}", a.recommendation),
                        },
                    },
                };
            }

            let window = d.rollback.evaluation_window_secs;
            let elapsed = now.saturating_sub(d.step_started_at);
            if elapsed < window {
                return hold(format!("evaluation window {elapsed}/{window}s"));
            }
            if signals.breach_pending {
                return hold("rollback threshold breach in progress");
            }
            match &signals.metrics {
                MetricsRead::Unavailable(why) => return hold(why.clone()),
                MetricsRead::Ready(m) => {
                    let violations = d.health.violations(m);
                    if !violations.is_empty() {
                        return hold(format!("health criteria not met: {}", violations.join(", ")));
                    }
                }
            }

            if d.state == DeploymentState::Evaluating {
                return Action::Complete;
            }
            let Strategy::Canary(cfg) = &d.strategy else {
                return Action::Promote { finish: false };
            };
            let next = d.step + 1;
            match cfg.steps.get(next) {
                Some(&p) if p < 100 => Action::Shift {
                    step: next,
                    percent: p,
                },
                _ => Action::Promote { finish: false },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{AbTestStrategy, CanaryConfig};
    use modelgrid_abtest::{AbTestAnalysis, Verdict};

    fn canary() -> Deployment {
        Deployment {
            id: "d1".to_string(),
            model: "sorter".to_string(),
            version: "1.1.0".to_string(),
            baseline: Some("1.0.0".to_string()),
            strategy: Strategy::Canary(CanaryConfig::default()),
            health: HealthCriteria::default(),
            rollback: RollbackConfig::default(),
            state: DeploymentState::RampingUp,
            traffic: TrafficSplit::split("1.0.0", "1.1.0", 10),
            step: 0,
            step_started_at: 1_000,
            started_at: 1_000,
            updated_at: 1_000,
            finished_at: None,
            ab_test_id: None,
            reason: None,
            history: Vec::new(),
        }
    }

    fn metrics(success_rate: f64) -> VersionMetrics {
        VersionMetrics {
            model: "sorter".to_string(),
            version: "1.1.0".to_string(),
            window_start: 1_000,
            window_end: 1_300,
            sample_count: 100,
            success_rate,
            error_rate: 1.0 - success_rate,
            mean_latency_ms: 100.0,
            p95_latency_ms: 150.0,
            p99_latency_ms: 200.0,
            mean_confidence: None,
            mean_cost: 0.0,
            total_cost: 0.0,
        }
    }

    fn healthy() -> Signals {
        Signals {
            rollback: None,
            breach_pending: false,
            metrics: MetricsRead::Ready(metrics(0.99)),
            analysis: None,
        }
    }

    #[test]
    fn canary_holds_for_the_window() {
        let d = canary();
        assert!(matches!(decide(&d, &healthy(), 1_299), Action::Hold { .. }));
        assert_eq!(
            decide(&d, &healthy(), 1_300),
            Action::Shift { step: 1, percent: 50 }
        );
    }

    #[test]
    fn last_step_promotes() {
        let mut d = canary();
        d.step = 1;
        assert_eq!(decide(&d, &healthy(), 1_300), Action::Promote { finish: false });
        d.state = DeploymentState::Evaluating;
        assert_eq!(decide(&d, &healthy(), 1_300), Action::Complete);
    }

    #[test]
    fn fired_breach_rolls_back_mid_pause() {
        let d = canary();
        let signals = Signals {
            rollback: Some("success_rate_floor".to_string()),
            ..healthy()
        };
        assert!(matches!(decide(&d, &signals, 1_010), Action::Rollback { .. }));

        let mut manual = canary();
        manual.rollback.enabled = false;
        assert!(matches!(decide(&manual, &signals, 1_010), Action::Hold { .. }));
    }

    #[test]
    fn pending_breach_or_bad_data_holds() {
        let d = canary();
        let pending = Signals {
            breach_pending: true,
            ..healthy()
        };
        assert!(matches!(decide(&d, &pending, 2_000), Action::Hold { .. }));

        let timed_out = Signals {
            metrics: MetricsRead::Unavailable("metrics timed out".to_string()),
            ..healthy()
        };
        assert!(matches!(decide(&d, &timed_out, 2_000), Action::Hold { .. }));

        let unhealthy = Signals {
            metrics: MetricsRead::Ready(metrics(0.9)),
            ..healthy()
        };
        match decide(&d, &unhealthy, 2_000) {
            Action::Hold { reason } => assert!(reason.contains("success_rate")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn ab_test_follows_the_verdict() {
        let mut d = canary();
        d.strategy = Strategy::AbTest(AbTestStrategy::default());
        d.state = DeploymentState::Evaluating;
        assert!(matches!(decide(&d, &healthy(), 5_000), Action::Hold { .. }));

        let analysis = |verdict| AbTestAnalysis {
            test_id: "d1".to_string(),
            analyzed_at: 5_000,
            information_fraction: 1.0,
            nominal_alpha: 0.05,
            cumulative_alpha: 0.05,
            primary: None,
            secondary: Vec::new(),
            statistically_significant: false,
            practically_significant: false,
            winner: None,
            futile: false,
            conditional_power: None,
            verdict,
            recommendation: "r".to_string(),
        };
        for (verdict, expected) in [
            (Verdict::PromoteTreatment, Action::Promote { finish: true }),
            (Verdict::KeepControl, Action::Rollback { reason: "r".to_string() }),
            (Verdict::Extend, Action::Hold { reason: "r".to_string() }),
            (Verdict::Inconclusive, Action::Rollback { reason: "A/B test r".to_string() }),
        ] {
            let signals = Signals {
                analysis: Some(analysis(verdict)),
                ..healthy()
            };
            assert_eq!(decide(&d, &signals, 5_000), expected);
        }
    }

    #[test]
    fn blue_green_starts_with_shadow() {
        let mut d = canary();
        d.strategy = Strategy::BlueGreen(Default::default());
        d.state = DeploymentState::Initializing;
        assert_eq!(decide(&d, &healthy(), 1_000), Action::ShadowValidate);
    }

    #[test]
    fn enter_records_history_and_finish() {
        let mut d = canary();
        d.enter(DeploymentState::RolledBack, 1_500, "cancelled");
        assert_eq!(d.finished_at, Some(1_500));
        assert_eq!(d.history.len(), 1);
        assert_eq!(d.history[0].candidate_percent, 10);
    }
}
