//! AbTestEngine — test registry, assignment, and sequential analysis.

use std::collections::HashMap;

use modelgrid_core::config::AbTestDefaults;
use modelgrid_core::{Metric, ModelRef, SharedClock, Timestamp};
use modelgrid_state::{StateStore, Table};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::{AbTestError, AbTestResult};
use crate::stats::{self, TestOutcome};
use crate::types::*;

/// Parameters for a new test.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAbTest {
    /// Caller-chosen id; a UUID v7 when absent.
    pub id: Option<String>,
    pub name: String,
    pub control: ModelRef,
    pub treatment: ModelRef,
    pub config: AbTestConfig,
}

/// Stable bucket in `0..100` for `identity` within `test_id`.
pub fn bucket(test_id: &str, identity: &str) -> u8 {
    let digest = Sha256::digest(format!("{test_id}:{identity}").as_bytes());
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    (u64::from_be_bytes(head) % 100) as u8
}

pub struct AbTestEngine {
    defaults: AbTestDefaults,
    state: StateStore,
    clock: SharedClock,
    tests: RwLock<HashMap<String, AbTest>>,
}

impl AbTestEngine {
    /// Create the engine, loading persisted tests.
    pub fn new(defaults: AbTestDefaults, state: StateStore, clock: SharedClock) -> AbTestResult<Self> {
        let mut tests = HashMap::new();
        for test in state.list_records::<AbTest>(Table::AbTests)? {
            tests.insert(test.id.clone(), test);
        }
        if !tests.is_empty() {
            info!(count = tests.len(), "restored A/B tests");
        }
        Ok(Self {
            defaults,
            state,
            clock,
            tests: RwLock::new(tests),
        })
    }

    /// Configuration seeded from `[abtest]` defaults.
    pub fn default_config(&self) -> AbTestConfig {
        AbTestConfig::from(&self.defaults)
    }

    fn persist(&self, test: &AbTest) -> AbTestResult<()> {
        self.state.put_record(Table::AbTests, &test.id, test)?;
        Ok(())
    }

    pub async fn create_test(&self, new: NewAbTest) -> AbTestResult<AbTest> {
        let mut problems = new.config.problems();
        if new.control == new.treatment {
            problems.push("control and treatment are the same version".to_string());
        }
        if !problems.is_empty() {
            return Err(AbTestError::InvalidConfig(problems));
        }

        let id = new
            .id
            .unwrap_or_else(|| uuid::Uuid::now_v7().to_string());
        let mut tests = self.tests.write().await;
        if tests.contains_key(&id) {
            return Err(AbTestError::DuplicateTest(id));
        }

        let cfg = new.config;
        let planned = stats::required_sample_size(
            cfg.confidence_level,
            cfg.power,
            cfg.minimum_detectable_effect,
            cfg.baseline_rate,
        )
        .ceil() as u64;
        let required_sample_size = planned.clamp(cfg.min_sample_size, cfg.max_sample_size);

        let test = AbTest {
            id: id.clone(),
            name: new.name,
            control: new.control,
            treatment: new.treatment,
            required_sample_size,
            treatment_percent: cfg.treatment_percent,
            config: cfg,
            status: AbTestStatus::Running,
            started_at: self.clock.now(),
            ended_at: None,
            control_stats: VariantStats::default(),
            treatment_stats: VariantStats::default(),
            looks: Vec::new(),
            last_analysis: None,
        };
        self.persist(&test)?;
        info!(
            test_id = %id,
            control = %test.control,
            treatment = %test.treatment,
            required_sample_size,
            "A/B test created"
        );
        tests.insert(id, test.clone());
        Ok(test)
    }

    /// Variant serving `identity`. Sticky for the life of the split.
    ///
    /// Tests that are no longer running always answer control.
    pub async fn assign(&self, test_id: &str, identity: &str) -> AbTestResult<(Variant, ModelRef)> {
        let tests = self.tests.read().await;
        let test = tests
            .get(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        let variant = if test.status.is_running() && bucket(test_id, identity) < test.treatment_percent {
            Variant::Treatment
        } else {
            Variant::Control
        };
        Ok((variant, test.variant_ref(variant).clone()))
    }

    /// Fold one outcome into a variant's statistics.
    pub async fn record(&self, test_id: &str, variant: Variant, obs: Observation) -> AbTestResult<()> {
        self.record_batch(test_id, variant, std::slice::from_ref(&obs))
            .await
    }

    /// Fold several outcomes with a single write.
    pub async fn record_batch(
        &self,
        test_id: &str,
        variant: Variant,
        observations: &[Observation],
    ) -> AbTestResult<()> {
        let mut tests = self.tests.write().await;
        let test = tests
            .get_mut(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        if !test.status.is_running() {
            return Err(AbTestError::NotRunning {
                test_id: test_id.to_string(),
                status: test.status.clone(),
            });
        }
        let mut updated = test.clone();
        for obs in observations {
            updated.stats_mut(variant).push(obs);
        }
        self.persist(&updated)?;
        *test = updated;
        debug!(test_id = %test_id, %variant, count = observations.len(), "A/B outcomes recorded");
        Ok(())
    }

    /// Run an interim (or final) analysis.
    ///
    /// Below the minimum sample size this returns `InsufficientData`
    /// rather than a verdict, unless the test has run out of time. A
    /// concluded test returns its final analysis again.
    pub async fn analyze(&self, test_id: &str) -> AbTestResult<AbTestAnalysis> {
        let now = self.clock.now();
        let mut tests = self.tests.write().await;
        let test = tests
            .get_mut(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        match &test.status {
            AbTestStatus::Running => {}
            AbTestStatus::Concluded => {
                if let Some(done) = &test.last_analysis {
                    return Ok(done.clone());
                }
            }
            AbTestStatus::Stopped { .. } => {
                return Err(AbTestError::NotRunning {
                    test_id: test_id.to_string(),
                    status: test.status.clone(),
                });
            }
        }

        let mut updated = test.clone();
        let analysis = evaluate(&mut updated, now)?;
        if analysis.verdict != Verdict::Extend {
            updated.status = AbTestStatus::Concluded;
            updated.ended_at = Some(now);
        }
        updated.last_analysis = Some(analysis.clone());
        self.persist(&updated)?;
        *test = updated;

        if analysis.verdict == Verdict::Extend {
            debug!(
                test_id = %test_id,
                information_fraction = analysis.information_fraction,
                nominal_alpha = analysis.nominal_alpha,
                "A/B test continues"
            );
        } else {
            info!(
                test_id = %test_id,
                verdict = ?analysis.verdict,
                winner = ?analysis.winner,
                futile = analysis.futile,
                p_value = ?analysis.primary.as_ref().map(|p| p.outcome.p_value),
                "A/B test concluded"
            );
        }
        Ok(analysis)
    }

    pub async fn stop_test(&self, test_id: &str, reason: &str) -> AbTestResult<AbTest> {
        let now = self.clock.now();
        let mut tests = self.tests.write().await;
        let test = tests
            .get_mut(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        if !test.status.is_running() {
            return Err(AbTestError::NotRunning {
                test_id: test_id.to_string(),
                status: test.status.clone(),
            });
        }
        let mut updated = test.clone();
        updated.status = AbTestStatus::Stopped {
            reason: reason.to_string(),
        };
        updated.ended_at = Some(now);
        self.persist(&updated)?;
        *test = updated.clone();
        warn!(test_id = %test_id, %reason, "A/B test stopped");
        Ok(updated)
    }

    /// Change the share of identities routed to treatment.
    pub async fn set_split(&self, test_id: &str, treatment_percent: u8) -> AbTestResult<()> {
        if treatment_percent > 100 {
            return Err(AbTestError::InvalidConfig(vec![format!(
                "treatment_percent {treatment_percent} above 100"
            )]));
        }
        let mut tests = self.tests.write().await;
        let test = tests
            .get_mut(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        if !test.status.is_running() {
            return Err(AbTestError::NotRunning {
                test_id: test_id.to_string(),
                status: test.status.clone(),
            });
        }
        let mut updated = test.clone();
        updated.treatment_percent = treatment_percent;
        self.persist(&updated)?;
        *test = updated;
        info!(test_id = %test_id, treatment_percent, "A/B split changed");
        Ok(())
    }

    pub async fn test_status(&self, test_id: &str) -> AbTestResult<AbTestProgress> {
        let now = self.clock.now();
        let tests = self.tests.read().await;
        let test = tests
            .get(test_id)
            .ok_or_else(|| AbTestError::NotFound(test_id.to_string()))?;
        let min = test.config.min_sample_size.max(1) as f64;
        let c = test.control_stats.requests;
        let t = test.treatment_stats.requests;
        Ok(AbTestProgress {
            test_id: test.id.clone(),
            status: test.status.clone(),
            elapsed_secs: test.ended_at.unwrap_or(now).saturating_sub(test.started_at),
            max_duration_secs: test.config.max_duration_secs,
            control_requests: c,
            treatment_requests: t,
            required_sample_size: test.required_sample_size,
            control_progress: (c as f64 / min).min(1.0),
            treatment_progress: (t as f64 / min).min(1.0),
            ready_for_analysis: c >= test.config.min_sample_size && t >= test.config.min_sample_size,
            looks: test.looks.len(),
            treatment_percent: test.treatment_percent,
        })
    }

    pub async fn get(&self, test_id: &str) -> Option<AbTest> {
        self.tests.read().await.get(test_id).cloned()
    }

    /// All tests, oldest first.
    pub async fn list(&self, running_only: bool) -> Vec<AbTest> {
        let tests = self.tests.read().await;
        let mut out: Vec<AbTest> = tests
            .values()
            .filter(|t| !running_only || t.status.is_running())
            .cloned()
            .collect();
        out.sort_by(|a, b| a.started_at.cmp(&b.started_at).then(a.id.cmp(&b.id)));
        out
    }
}

/// Compare one metric between the variants.
pub fn compare(
    metric: Metric,
    control: &VariantStats,
    treatment: &VariantStats,
    confidence: f64,
) -> Option<MetricComparison> {
    let (outcome, control_value, treatment_value): (TestOutcome, f64, f64) = match metric {
        Metric::SuccessRate => (
            stats::two_proportion_z_test(
                control.successes,
                control.requests,
                treatment.successes,
                treatment.requests,
                confidence,
            )?,
            control.success_rate(),
            treatment.success_rate(),
        ),
        Metric::ErrorRate => (
            stats::two_proportion_z_test(
                control.requests - control.successes,
                control.requests,
                treatment.requests - treatment.successes,
                treatment.requests,
                confidence,
            )?,
            1.0 - control.success_rate(),
            1.0 - treatment.success_rate(),
        ),
        Metric::LatencyMs | Metric::Confidence | Metric::Cost => {
            let c = control.continuous(metric)?;
            let t = treatment.continuous(metric)?;
            (
                stats::welch_t_test(&c.summary(), &t.summary(), confidence)?,
                c.mean,
                t.mean,
            )
        }
    };

    let effect_size = if metric.is_proportion() || control_value == 0.0 {
        outcome.difference
    } else {
        outcome.difference / control_value.abs()
    };
    Some(MetricComparison {
        metric,
        control_value,
        treatment_value,
        control_n: control.count(metric),
        treatment_n: treatment.count(metric),
        effect_size,
        outcome,
    })
}

/// Core decision for one analysis. Mutates `test.looks` when the look
/// spends alpha.
fn evaluate(test: &mut AbTest, now: Timestamp) -> AbTestResult<AbTestAnalysis> {
    let cfg = test.config.clone();
    let alpha = cfg.alpha();
    let primary_metric = cfg.primary_metric;
    let n_c = test.control_stats.count(primary_metric);
    let n_t = test.treatment_stats.count(primary_metric);
    let n = n_c.min(n_t);
    let expired = now >= test.deadline();

    let secondary: Vec<MetricComparison> = cfg
        .secondary_metrics
        .iter()
        .filter(|m| **m != primary_metric)
        .filter_map(|m| compare(*m, &test.control_stats, &test.treatment_stats, cfg.confidence_level))
        .collect();

    let primary = if n >= cfg.min_sample_size {
        compare(primary_metric, &test.control_stats, &test.treatment_stats, cfg.confidence_level)
    } else {
        None
    };
    let Some(primary) = primary else {
        if !expired {
            return Err(AbTestError::InsufficientData {
                test_id: test.id.clone(),
                control: n_c,
                treatment: n_t,
                required: cfg.min_sample_size,
            });
        }
        return Ok(AbTestAnalysis {
            test_id: test.id.clone(),
            analyzed_at: now,
            information_fraction: n as f64 / test.required_sample_size.max(1) as f64,
            nominal_alpha: 0.0,
            cumulative_alpha: test.looks.last().map(|l| l.cumulative_alpha).unwrap_or(0.0),
            primary: None,
            secondary,
            statistically_significant: false,
            practically_significant: false,
            winner: None,
            futile: false,
            conditional_power: None,
            verdict: Verdict::Inconclusive,
            recommendation: format!(
                "inconclusive: maximum duration reached with {n} of {} samples per variant",
                cfg.min_sample_size
            ),
        });
    };

    let required = test.required_sample_size.max(1) as f64;
    let t = (n as f64 / required).min(1.0);
    let final_look = t >= 1.0 || expired || n >= cfg.max_sample_size;

    let (prev_t, prev_spent) = test
        .looks
        .last()
        .map(|l| (l.information_fraction, l.cumulative_alpha))
        .unwrap_or((0.0, 0.0));
    let cumulative = if final_look {
        alpha
    } else {
        stats::obrien_fleming_spent(alpha, t)
    };
    let new_information = t > prev_t || (final_look && prev_spent < alpha);
    if !new_information && let Some(previous) = &test.last_analysis {
        return Ok(previous.clone());
    }
    let nominal = (cumulative - prev_spent).max(0.0);
    test.looks.push(Look {
        at: now,
        information_fraction: t,
        cumulative_alpha: cumulative,
    });

    let p_value = primary.outcome.p_value;
    let statistically_significant = nominal > 0.0 && p_value < nominal;
    let practically_significant = primary.effect_size.abs() >= cfg.minimum_detectable_effect;
    let winner = (statistically_significant && practically_significant).then(|| {
        if primary.treatment_better() {
            Variant::Treatment
        } else {
            Variant::Control
        }
    });

    let mut futile = false;
    let mut conditional_power = None;
    let (verdict, recommendation) = match winner {
        Some(Variant::Treatment) => (
            Verdict::PromoteTreatment,
            format!("promote treatment {}", test.treatment),
        ),
        Some(Variant::Control) => (
            Verdict::KeepControl,
            format!("keep control {}: treatment performs worse", test.control),
        ),
        None if statistically_significant => (
            Verdict::KeepControl,
            "keep control: difference below minimum detectable effect".to_string(),
        ),
        None if final_look => (
            Verdict::KeepControl,
            "keep control: no significant difference".to_string(),
        ),
        None => {
            let horizon = projected_fraction(test, n, now, required);
            let cp = stats::conditional_power(primary.outcome.statistic, t, horizon, alpha);
            conditional_power = Some(cp);
            if cp < cfg.futility_threshold {
                futile = true;
                (
                    Verdict::KeepControl,
                    format!("stop for futility: conditional power {cp:.4} below threshold"),
                )
            } else {
                (Verdict::Extend, "continue collecting data".to_string())
            }
        }
    };

    Ok(AbTestAnalysis {
        test_id: test.id.clone(),
        analyzed_at: now,
        information_fraction: t,
        nominal_alpha: nominal,
        cumulative_alpha: cumulative,
        primary: Some(primary),
        secondary,
        statistically_significant,
        practically_significant,
        winner,
        futile,
        conditional_power,
        verdict,
        recommendation,
    })
}

/// Information fraction the test can still reach by its deadline at the
/// observed sampling rate, capped by the sample-size limits.
fn projected_fraction(test: &AbTest, n: u64, now: Timestamp, required: f64) -> f64 {
    let cap = (test.config.max_sample_size as f64 / required).min(1.0);
    let elapsed = now.saturating_sub(test.started_at);
    if elapsed == 0 {
        return cap;
    }
    let rate = n as f64 / elapsed as f64;
    let remaining = test.deadline().saturating_sub(now) as f64;
    ((n as f64 + rate * remaining) / required).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelgrid_core::{ErrorKind, ManualClock};

    fn engine(clock: &ManualClock) -> AbTestEngine {
        let state = StateStore::open_in_memory().unwrap();
        AbTestEngine::new(AbTestDefaults::default(), state, clock.shared()).unwrap()
    }

    fn small_config() -> AbTestConfig {
        AbTestConfig {
            min_sample_size: 200,
            max_sample_size: 10_000,
            secondary_metrics: vec![Metric::LatencyMs],
            ..AbTestConfig::default()
        }
    }

    fn new_test(id: &str, config: AbTestConfig) -> NewAbTest {
        NewAbTest {
            id: Some(id.to_string()),
            name: "sorter lift".to_string(),
            control: ModelRef::new("sorter", "1.0.0"),
            treatment: ModelRef::new("sorter", "1.1.0"),
            config,
        }
    }

    fn outcomes(n: usize, successes: usize, latency_ms: f64) -> Vec<Observation> {
        (0..n)
            .map(|i| Observation {
                success: i < successes,
                latency_ms: latency_ms + (i % 7) as f64,
                confidence: Some(0.9),
                cost: 0.001,
            })
            .collect()
    }

    #[test]
    fn bucket_is_stable_and_spread() {
        assert_eq!(bucket("t1", "user-42"), bucket("t1", "user-42"));
        let in_lower_half = (0..10_000)
            .filter(|i| bucket("t1", &format!("user-{i}")) < 50)
            .count();
        assert!((4_500..5_500).contains(&in_lower_half));
    }

    #[tokio::test]
    async fn required_sample_size_respects_bounds() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        // Default planning at a 0.95 baseline needs ~300; the floor wins.
        let t = e.create_test(new_test("a", AbTestConfig::default())).await.unwrap();
        assert_eq!(t.required_sample_size, 1_000);

        let cfg = AbTestConfig {
            minimum_detectable_effect: 0.01,
            baseline_rate: 0.5,
            ..small_config()
        };
        let t = e.create_test(new_test("b", cfg)).await.unwrap();
        assert_eq!(t.required_sample_size, 10_000);
    }

    #[tokio::test]
    async fn duplicate_and_invalid_tests_rejected() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        e.create_test(new_test("a", small_config())).await.unwrap();
        let err = e.create_test(new_test("a", small_config())).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let mut same = new_test("c", small_config());
        same.treatment = same.control.clone();
        let err = e.create_test(same).await.unwrap_err();
        assert!(matches!(err, AbTestError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn assignment_is_sticky_and_follows_split() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        e.create_test(new_test("t", small_config())).await.unwrap();

        let (first, _) = e.assign("t", "user-7").await.unwrap();
        for _ in 0..10 {
            assert_eq!(e.assign("t", "user-7").await.unwrap().0, first);
        }

        e.set_split("t", 0).await.unwrap();
        for i in 0..100 {
            let (v, r) = e.assign("t", &format!("u{i}")).await.unwrap();
            assert_eq!(v, Variant::Control);
            assert_eq!(r.version, "1.0.0");
        }
        e.set_split("t", 100).await.unwrap();
        assert_eq!(e.assign("t", "u1").await.unwrap().0, Variant::Treatment);
        assert!(e.set_split("t", 101).await.is_err());
    }

    #[tokio::test]
    async fn no_verdict_before_minimum_sample() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        e.create_test(new_test("t", small_config())).await.unwrap();
        e.record_batch("t", Variant::Control, &outcomes(150, 100, 100.0))
            .await
            .unwrap();
        e.record_batch("t", Variant::Treatment, &outcomes(500, 500, 100.0))
            .await
            .unwrap();
        let err = e.analyze("t").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientData);
        assert!(e.get("t").await.unwrap().looks.is_empty());
    }

    #[tokio::test]
    async fn clear_winner_promotes_treatment() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        let cfg = AbTestConfig {
            min_sample_size: 1_000,
            ..small_config()
        };
        e.create_test(new_test("t", cfg)).await.unwrap();
        e.record_batch("t", Variant::Control, &outcomes(1_000, 850, 120.0))
            .await
            .unwrap();
        e.record_batch("t", Variant::Treatment, &outcomes(1_000, 950, 100.0))
            .await
            .unwrap();
        clock.advance(3_600);

        let a = e.analyze("t").await.unwrap();
        assert_eq!(a.information_fraction, 1.0);
        assert!(a.statistically_significant);
        assert!(a.practically_significant);
        assert_eq!(a.winner, Some(Variant::Treatment));
        assert_eq!(a.verdict, Verdict::PromoteTreatment);
        assert_eq!(a.secondary.len(), 1);
        assert!(a.secondary[0].treatment_better());

        let t = e.get("t").await.unwrap();
        assert_eq!(t.status, AbTestStatus::Concluded);
        // Analysing again returns the same final answer.
        assert_eq!(e.analyze("t").await.unwrap(), a);
        assert!(e.record("t", Variant::Control, outcomes(1, 1, 1.0)[0]).await.is_err());
    }

    #[tokio::test]
    async fn significant_but_tiny_effect_has_no_winner() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        let cfg = AbTestConfig {
            min_sample_size: 40_000,
            max_sample_size: 40_000,
            minimum_detectable_effect: 0.05,
            ..small_config()
        };
        e.create_test(new_test("t", cfg)).await.unwrap();
        // 0.90 vs 0.92: p << 0.05 at this size, effect 0.02 < MDE.
        e.record_batch("t", Variant::Control, &outcomes(40_000, 36_000, 100.0))
            .await
            .unwrap();
        e.record_batch("t", Variant::Treatment, &outcomes(40_000, 36_800, 100.0))
            .await
            .unwrap();
        let a = e.analyze("t").await.unwrap();
        assert!(a.statistically_significant);
        assert!(!a.practically_significant);
        assert_eq!(a.winner, None);
        assert_eq!(a.verdict, Verdict::KeepControl);
    }

    #[tokio::test]
    async fn early_look_is_held_to_a_stricter_level() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        let cfg = AbTestConfig {
            min_sample_size: 200,
            max_sample_size: 100_000,
            baseline_rate: 0.5,
            ..small_config()
        };
        let test = e.create_test(new_test("t", cfg)).await.unwrap();
        assert_eq!(test.required_sample_size, 1_570);

        // p ≈ 0.03 at n=400: significant at 0.05, not at the early boundary.
        e.record_batch("t", Variant::Control, &outcomes(400, 200, 100.0))
            .await
            .unwrap();
        e.record_batch("t", Variant::Treatment, &outcomes(400, 230, 100.0))
            .await
            .unwrap();
        clock.advance(60);
        let a = e.analyze("t").await.unwrap();
        let p = a.primary.as_ref().unwrap().outcome.p_value;
        assert!(p < 0.05);
        assert!(a.nominal_alpha < 0.001);
        assert!(!a.statistically_significant);
        assert_eq!(a.verdict, Verdict::Extend);
        assert_eq!(e.test_status("t").await.unwrap().looks, 1);

        // No new data: no new look, same answer.
        let again = e.analyze("t").await.unwrap();
        assert_eq!(again, a);
        assert_eq!(e.get("t").await.unwrap().looks.len(), 1);
    }

    #[tokio::test]
    async fn flat_trend_stops_for_futility() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        let cfg = AbTestConfig {
            min_sample_size: 200,
            baseline_rate: 0.5,
            ..small_config()
        };
        e.create_test(new_test("t", cfg)).await.unwrap();
        e.record_batch("t", Variant::Control, &outcomes(800, 400, 100.0))
            .await
            .unwrap();
        e.record_batch("t", Variant::Treatment, &outcomes(800, 400, 100.0))
            .await
            .unwrap();
        clock.advance(60);
        let a = e.analyze("t").await.unwrap();
        assert!(a.futile);
        assert_eq!(a.winner, None);
        assert_eq!(a.verdict, Verdict::KeepControl);
        assert!(a.conditional_power.unwrap() < 0.01);
    }

    #[tokio::test]
    async fn deadline_with_too_few_samples_is_inconclusive() {
        let clock = ManualClock::new(0);
        let e = engine(&clock);
        let cfg = AbTestConfig {
            max_duration_secs: 3_600,
            ..small_config()
        };
        e.create_test(new_test("t", cfg)).await.unwrap();
        e.record_batch("t", Variant::Control, &outcomes(10, 10, 100.0))
            .await
            .unwrap();
        clock.advance(3_600);
        let a = e.analyze("t").await.unwrap();
        assert_eq!(a.verdict, Verdict::Inconclusive);
        assert_eq!(a.winner, None);
        assert!(a.primary.is_none());
        assert!(a.recommendation.starts_with("inconclusive"));
        assert_eq!(e.get("t").await.unwrap().status, AbTestStatus::Concluded);
    }

    #[tokio::test]
    async fn stop_and_status() {
        let clock = ManualClock::new(100);
        let e = engine(&clock);
        e.create_test(new_test("t", small_config())).await.unwrap();
        e.record_batch("t", Variant::Control, &outcomes(100, 100, 100.0))
            .await
            .unwrap();
        clock.advance(50);
        let s = e.test_status("t").await.unwrap();
        assert_eq!(s.elapsed_secs, 50);
        assert!((s.control_progress - 0.5).abs() < 1e-12);
        assert!(!s.ready_for_analysis);

        e.stop_test("t", "manual").await.unwrap();
        assert!(matches!(
            e.analyze("t").await.unwrap_err(),
            AbTestError::NotRunning { .. }
        ));
        assert_eq!(e.assign("t", "anyone").await.unwrap().0, Variant::Control);
        assert!(e.list(true).await.is_empty());
        assert_eq!(e.list(false).await.len(), 1);
    }

    #[tokio::test]
    async fn tests_survive_restart() {
        let clock = ManualClock::new(0);
        let state = StateStore::open_in_memory().unwrap();
        {
            let e = AbTestEngine::new(AbTestDefaults::default(), state.clone(), clock.shared()).unwrap();
            e.create_test(new_test("t", small_config())).await.unwrap();
            e.record_batch("t", Variant::Treatment, &outcomes(30, 20, 90.0))
                .await
                .unwrap();
        }
        let e = AbTestEngine::new(AbTestDefaults::default(), state, clock.shared()).unwrap();
        let t = e.get("t").await.unwrap();
        assert_eq!(t.treatment_stats.requests, 30);
        assert_eq!(t.treatment_stats.successes, 20);
    }
}
