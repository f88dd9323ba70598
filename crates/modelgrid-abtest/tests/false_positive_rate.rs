//! Simulated A/A tests: both variants draw from the same distribution, so
//! every significant result is a false positive.

use modelgrid_abtest::stats::two_proportion_z_test;
use modelgrid_abtest::{AbTestConfig, AbTestEngine, NewAbTest, Observation, Variant};
use modelgrid_core::config::AbTestDefaults;
use modelgrid_core::{ManualClock, ModelRef};
use modelgrid_state::StateStore;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ALPHA: f64 = 0.05;

fn draw(rng: &mut StdRng, n: usize) -> u64 {
    (0..n).filter(|_| rng.gen_bool(0.5)).count() as u64
}

fn observations(rng: &mut StdRng, n: usize) -> Vec<Observation> {
    (0..n)
        .map(|_| Observation {
            success: rng.gen_bool(0.5),
            latency_ms: 100.0,
            confidence: None,
            cost: 0.0,
        })
        .collect()
}

#[test]
fn single_look_rate_matches_alpha() {
    let mut rng = StdRng::seed_from_u64(7);
    let trials = 4_000;
    let n = 1_000;
    let positives = (0..trials)
        .filter(|_| {
            let a = draw(&mut rng, n);
            let b = draw(&mut rng, n);
            let out = two_proportion_z_test(a, n as u64, b, n as u64, 1.0 - ALPHA).unwrap();
            out.p_value < ALPHA
        })
        .count();
    let rate = positives as f64 / trials as f64;
    assert!((0.035..=0.065).contains(&rate), "false positive rate {rate}");
}

#[tokio::test]
async fn repeated_looks_stay_within_alpha() {
    let mut rng = StdRng::seed_from_u64(11);
    let clock = ManualClock::new(0);
    let state = StateStore::open_in_memory().unwrap();
    let engine = AbTestEngine::new(AbTestDefaults::default(), state, clock.shared()).unwrap();

    // Tiny MDE so only the significance boundary decides.
    let config = AbTestConfig {
        minimum_detectable_effect: 0.001,
        min_sample_size: 200,
        max_sample_size: 1_000,
        baseline_rate: 0.5,
        secondary_metrics: Vec::new(),
        ..AbTestConfig::default()
    };

    let trials = 1_000;
    let batch = 200;
    let looks = 5;
    let mut sequential = 0;
    let mut naive = 0;

    for trial in 0..trials {
        let id = format!("aa-{trial}");
        engine
            .create_test(NewAbTest {
                id: Some(id.clone()),
                name: "a/a".to_string(),
                control: ModelRef::new("m", "1.0.0"),
                treatment: ModelRef::new("m", "1.0.1"),
                config: config.clone(),
            })
            .await
            .unwrap();

        let (mut sc, mut st) = (0u64, 0u64);
        let mut engine_done = false;
        let mut engine_positive = false;
        let mut naive_positive = false;
        for look in 1..=looks {
            let control = observations(&mut rng, batch);
            let treatment = observations(&mut rng, batch);
            sc += control.iter().filter(|o| o.success).count() as u64;
            st += treatment.iter().filter(|o| o.success).count() as u64;
            let n = (look * batch) as u64;
            let unadjusted = two_proportion_z_test(sc, n, st, n, 1.0 - ALPHA).unwrap();
            naive_positive |= unadjusted.p_value < ALPHA;

            if engine_done {
                continue;
            }
            engine.record_batch(&id, Variant::Control, &control).await.unwrap();
            engine.record_batch(&id, Variant::Treatment, &treatment).await.unwrap();
            let analysis = engine.analyze(&id).await.unwrap();
            if analysis.statistically_significant {
                engine_positive = true;
            }
            engine_done = analysis.verdict != modelgrid_abtest::Verdict::Extend;
        }
        assert!(engine_done, "trial {trial} never concluded");
        sequential += usize::from(engine_positive);
        naive += usize::from(naive_positive);
    }

    let sequential_rate = sequential as f64 / trials as f64;
    let naive_rate = naive as f64 / trials as f64;
    assert!(sequential_rate <= 0.07, "sequential false positive rate {sequential_rate}");
    assert!(naive_rate > 0.09, "unadjusted peeking rate {naive_rate}");
    assert!(naive_rate > sequential_rate);
}
