//! Distribution functions and hypothesis tests.
//!
//! Accuracy is around 1e-7 for the normal tails and 1e-10 for the
//! Student-t CDF, well below what interim decisions need.

use serde::{Deserialize, Serialize};

const FPMIN: f64 = 1e-300;
const CF_EPS: f64 = 1e-14;
const CF_MAX_ITER: usize = 1_000;
/// Above this many degrees of freedom the t distribution is treated as normal.
const NORMAL_DF: f64 = 1e5;

/// Complementary error function (Chebyshev fit, |rel err| < 1.2e-7).
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let r = t * (-z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();
    if x >= 0.0 { r } else { 2.0 - r }
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

/// Standard normal quantile (Acklam's rational approximation plus one
/// Halley step).
pub fn normal_quantile(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969_683_028_665_376e1,
        2.209_460_984_245_205e2,
        -2.759_285_104_469_687e2,
        1.383_577_518_672_69e2,
        -3.066_479_806_614_716e1,
        2.506_628_277_459_239,
    ];
    const B: [f64; 5] = [
        -5.447_609_879_822_406e1,
        1.615_858_368_580_409e2,
        -1.556_989_798_598_866e2,
        6.680_131_188_771_972e1,
        -1.328_068_155_288_572e1,
    ];
    const C: [f64; 6] = [
        -7.784_894_002_430_293e-3,
        -3.223_964_580_411_365e-1,
        -2.400_758_277_161_838,
        -2.549_732_539_343_734,
        4.374_664_141_464_968,
        2.938_163_982_698_783,
    ];
    const D: [f64; 4] = [
        7.784_695_709_041_462e-3,
        3.224_671_290_700_398e-1,
        2.445_134_137_142_996,
        3.754_408_661_907_416,
    ];
    const P_LOW: f64 = 0.024_25;

    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let tail = |q: f64| {
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };
    let x = if p < P_LOW {
        tail((-2.0 * p.ln()).sqrt())
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -tail((-2.0 * (1.0 - p).ln()).sqrt())
    };

    let e = normal_cdf(x) - p;
    let u = e * (2.0 * std::f64::consts::PI).sqrt() * (x * x / 2.0).exp();
    x - u / (1.0 + x * u / 2.0)
}

/// Natural log of the gamma function (Lanczos, g = 7).
pub fn ln_gamma(x: f64) -> f64 {
    const COEF: [f64; 9] = [
        0.999_999_999_999_809_9,
        676.520_368_121_885_1,
        -1_259.139_216_722_402_8,
        771.323_428_777_653_1,
        -176.615_029_162_140_6,
        12.507_343_278_686_905,
        -0.138_571_095_265_720_12,
        9.984_369_578_019_572e-6,
        1.505_632_735_149_311_6e-7,
    ];
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).ln() - ln_gamma(1.0 - x);
    }
    let x = x - 1.0;
    let t = x + 7.5;
    let a = COEF
        .iter()
        .enumerate()
        .skip(1)
        .fold(COEF[0], |acc, (i, c)| acc + c / (x + i as f64));
    0.5 * (2.0 * std::f64::consts::PI).ln() + (x + 0.5) * t.ln() - t + a.ln()
}

/// Regularized incomplete beta function I_x(a, b).
pub fn reg_inc_beta(a: f64, b: f64, x: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    if x >= 1.0 {
        return 1.0;
    }
    let ln_front = ln_gamma(a + b) - ln_gamma(a) - ln_gamma(b) + a * x.ln() + b * (1.0 - x).ln();
    let front = ln_front.exp();
    if x < (a + 1.0) / (a + b + 2.0) {
        front * beta_cf(a, b, x) / a
    } else {
        1.0 - front * beta_cf(b, a, 1.0 - x) / b
    }
}

/// Continued fraction for the incomplete beta (modified Lentz).
fn beta_cf(a: f64, b: f64, x: f64) -> f64 {
    let clamp = |v: f64| if v.abs() < FPMIN { FPMIN } else { v };
    let qab = a + b;
    let qap = a + 1.0;
    let qam = a - 1.0;
    let mut c = 1.0;
    let mut d = 1.0 / clamp(1.0 - qab * x / qap);
    let mut h = d;
    for m in 1..=CF_MAX_ITER {
        let m = m as f64;
        let m2 = 2.0 * m;
        let aa = m * (b - m) * x / ((qam + m2) * (a + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        h *= d * c;
        let aa = -(a + m) * (qab + m) * x / ((a + m2) * (qap + m2));
        d = 1.0 / clamp(1.0 + aa * d);
        c = clamp(1.0 + aa / c);
        let del = d * c;
        h *= del;
        if (del - 1.0).abs() < CF_EPS {
            break;
        }
    }
    h
}

/// Two-sided p-value of a Student-t statistic.
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if !t.is_finite() {
        return 0.0;
    }
    if df > NORMAL_DF {
        return 2.0 * (1.0 - normal_cdf(t.abs()));
    }
    reg_inc_beta(df / 2.0, 0.5, df / (df + t * t))
}

/// Student-t CDF.
pub fn student_t_cdf(t: f64, df: f64) -> f64 {
    let tail = 0.5 * student_t_two_sided(t, df);
    if t > 0.0 { 1.0 - tail } else { tail }
}

/// Student-t quantile by bisection on the CDF.
pub fn student_t_quantile(p: f64, df: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }
    let (mut lo, mut hi) = (-1e4, 1e4);
    for _ in 0..200 {
        let mid = 0.5 * (lo + hi);
        if student_t_cdf(mid, df) < p {
            lo = mid;
        } else {
            hi = mid;
        }
        if hi - lo < 1e-12 {
            break;
        }
    }
    0.5 * (lo + hi)
}

/// Which test produced a [`TestOutcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestKind {
    TwoProportionZ,
    WelchT,
}

/// Result of a two-sample test of `b - a`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestOutcome {
    pub kind: TestKind,
    pub statistic: f64,
    pub p_value: f64,
    /// `b - a` on the metric's scale.
    pub difference: f64,
    pub ci_low: f64,
    pub ci_high: f64,
    /// Welch–Satterthwaite degrees of freedom.
    pub df: Option<f64>,
}

/// Count, mean, and sample variance of a continuous metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Summary {
    pub n: u64,
    pub mean: f64,
    pub variance: f64,
}

/// Degenerate case of a zero standard error.
fn zero_se(kind: TestKind, difference: f64, df: Option<f64>) -> TestOutcome {
    let (statistic, p_value) = if difference == 0.0 {
        (0.0, 1.0)
    } else {
        (difference.signum() * f64::MAX, 0.0)
    };
    TestOutcome {
        kind,
        statistic,
        p_value,
        difference,
        ci_low: difference,
        ci_high: difference,
        df,
    }
}

/// Two-proportion z-test of `successes_b / n_b` against `successes_a / n_a`.
///
/// The statistic uses the pooled standard error; the confidence interval
/// the unpooled one.
pub fn two_proportion_z_test(
    successes_a: u64,
    n_a: u64,
    successes_b: u64,
    n_b: u64,
    confidence: f64,
) -> Option<TestOutcome> {
    if n_a == 0 || n_b == 0 {
        return None;
    }
    let (na, nb) = (n_a as f64, n_b as f64);
    let pa = successes_a as f64 / na;
    let pb = successes_b as f64 / nb;
    let diff = pb - pa;

    let pooled = (successes_a + successes_b) as f64 / (na + nb);
    let se_pooled = (pooled * (1.0 - pooled) * (1.0 / na + 1.0 / nb)).sqrt();
    if se_pooled == 0.0 {
        return Some(zero_se(TestKind::TwoProportionZ, diff, None));
    }
    let z = diff / se_pooled;
    let p_value = (2.0 * (1.0 - normal_cdf(z.abs()))).clamp(0.0, 1.0);

    let se = (pa * (1.0 - pa) / na + pb * (1.0 - pb) / nb).sqrt();
    let margin = normal_quantile(1.0 - (1.0 - confidence) / 2.0) * se;
    Some(TestOutcome {
        kind: TestKind::TwoProportionZ,
        statistic: z,
        p_value,
        difference: diff,
        ci_low: diff - margin,
        ci_high: diff + margin,
        df: None,
    })
}

/// Welch's unequal-variance t-test of `b.mean - a.mean`.
pub fn welch_t_test(a: &Summary, b: &Summary, confidence: f64) -> Option<TestOutcome> {
    if a.n < 2 || b.n < 2 {
        return None;
    }
    let va = a.variance / a.n as f64;
    let vb = b.variance / b.n as f64;
    let se2 = va + vb;
    let diff = b.mean - a.mean;
    if se2 <= 0.0 {
        return Some(zero_se(TestKind::WelchT, diff, None));
    }
    let df = se2 * se2 / (va * va / (a.n - 1) as f64 + vb * vb / (b.n - 1) as f64);
    let se = se2.sqrt();
    let t = diff / se;
    let p_value = student_t_two_sided(t, df).clamp(0.0, 1.0);
    let margin = student_t_quantile(1.0 - (1.0 - confidence) / 2.0, df) * se;
    Some(TestOutcome {
        kind: TestKind::WelchT,
        statistic: t,
        p_value,
        difference: diff,
        ci_low: diff - margin,
        ci_high: diff + margin,
        df: Some(df),
    })
}

/// Cumulative alpha an O'Brien-Fleming-type (Lan-DeMets) spending
/// function allows at information fraction `t`.
///
/// Spends almost nothing early and exactly `alpha` at `t = 1`.
pub fn obrien_fleming_spent(alpha: f64, t: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    let t = t.min(1.0);
    let z = normal_quantile(1.0 - alpha / 2.0);
    (2.0 - 2.0 * normal_cdf(z / t.sqrt())).clamp(0.0, alpha)
}

/// Probability of crossing the final two-sided boundary at information
/// fraction `horizon`, assuming the current trend continues.
///
/// `z` is the current statistic at fraction `t`.
pub fn conditional_power(z: f64, t: f64, horizon: f64, alpha: f64) -> f64 {
    if t <= 0.0 {
        return 1.0;
    }
    if horizon <= t {
        let z_crit = normal_quantile(1.0 - alpha / 2.0);
        return if z.abs() >= z_crit { 1.0 } else { 0.0 };
    }
    let z = z.abs();
    let z_crit = normal_quantile(1.0 - alpha / 2.0);
    let b = z * t.sqrt();
    let drift = z / t.sqrt();
    let remaining = horizon - t;
    let needed = z_crit * horizon.sqrt() - b - drift * remaining;
    1.0 - normal_cdf(needed / remaining.sqrt())
}

/// Per-variant sample size for detecting `mde` on a proportion near
/// `baseline` with the given confidence and power.
pub fn required_sample_size(confidence: f64, power: f64, mde: f64, baseline: f64) -> f64 {
    let z_alpha = normal_quantile(1.0 - (1.0 - confidence) / 2.0);
    let z_beta = normal_quantile(power);
    (z_alpha + z_beta).powi(2) * 2.0 * baseline * (1.0 - baseline) / (mde * mde)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    #[test]
    fn normal_reference_values() {
        assert!(close(normal_cdf(0.0), 0.5, 1e-7));
        assert!(close(normal_cdf(1.959_964), 0.975, 1e-6));
        assert!(close(normal_cdf(-1.0), 0.158_655_25, 1e-6));
        assert!(close(normal_quantile(0.975), 1.959_964, 1e-5));
        assert!(close(normal_quantile(0.8), 0.841_621, 1e-5));
        assert!(close(normal_quantile(0.001), -3.090_232, 1e-4));
    }

    #[test]
    fn gamma_reference_values() {
        assert!(close(ln_gamma(1.0), 0.0, 1e-10));
        assert!(close(ln_gamma(5.0), 24f64.ln(), 1e-10));
        assert!(close(ln_gamma(0.5), std::f64::consts::PI.sqrt().ln(), 1e-10));
    }

    #[test]
    fn student_t_reference_values() {
        assert!(close(student_t_cdf(2.228_139, 10.0), 0.975, 1e-5));
        assert!(close(student_t_cdf(-2.228_139, 10.0), 0.025, 1e-5));
        assert!(close(student_t_quantile(0.975, 10.0), 2.228_139, 1e-4));
        assert!(close(student_t_quantile(0.975, 1.0), 12.706_2, 1e-3));
        // Large df approaches the normal.
        assert!(close(student_t_quantile(0.975, 1e6), 1.959_964, 1e-3));
    }

    #[test]
    fn z_test_detects_two_point_lift() {
        let out = two_proportion_z_test(950, 1000, 970, 1000, 0.95).unwrap();
        assert!(close(out.difference, 0.02, 1e-12));
        assert!(close(out.statistic, 2.282, 1e-3));
        assert!(out.p_value > 0.02 && out.p_value < 0.025);
        assert!(out.ci_low > 0.0 && out.ci_high < 0.04);
    }

    #[test]
    fn z_test_identical_groups() {
        let out = two_proportion_z_test(500, 1000, 500, 1000, 0.95).unwrap();
        assert_eq!(out.statistic, 0.0);
        assert!(close(out.p_value, 1.0, 1e-7));
        let all = two_proportion_z_test(10, 10, 10, 10, 0.95).unwrap();
        assert_eq!(all.p_value, 1.0);
        assert!(two_proportion_z_test(0, 0, 1, 1, 0.95).is_none());
    }

    #[test]
    fn welch_reference_case() {
        let a = Summary { n: 10, mean: 20.0, variance: 4.0 };
        let b = Summary { n: 10, mean: 22.0, variance: 4.0 };
        let out = welch_t_test(&a, &b, 0.95).unwrap();
        assert!(close(out.df.unwrap(), 18.0, 1e-9));
        assert!(close(out.statistic, 2.236_068, 1e-5));
        assert!(out.p_value > 0.03 && out.p_value < 0.046);
        // t(0.975, 18) = 2.1009
        assert!(close(out.ci_high - out.difference, 2.100_922 * 0.894_427, 1e-3));
    }

    #[test]
    fn welch_unequal_variances_lower_df() {
        let a = Summary { n: 30, mean: 100.0, variance: 1.0 };
        let b = Summary { n: 10, mean: 101.0, variance: 100.0 };
        let out = welch_t_test(&a, &b, 0.95).unwrap();
        assert!(out.df.unwrap() < 10.0);
        assert!(out.p_value > 0.5);
    }

    #[test]
    fn spending_is_monotone_and_exhaustive() {
        let alpha = 0.05;
        assert_eq!(obrien_fleming_spent(alpha, 0.0), 0.0);
        let early = obrien_fleming_spent(alpha, 0.2);
        let mid = obrien_fleming_spent(alpha, 0.5);
        let full = obrien_fleming_spent(alpha, 1.0);
        assert!(early < 1e-4);
        assert!(early < mid && mid < full);
        assert!(close(full, alpha, 1e-6));
        assert!(close(obrien_fleming_spent(alpha, 3.0), alpha, 1e-6));
    }

    #[test]
    fn conditional_power_tracks_trend() {
        // A flat trend halfway through has essentially no power.
        assert!(conditional_power(0.0, 0.5, 1.0, 0.05) < 0.01);
        // A strong trend is almost certain to finish significant.
        assert!(conditional_power(2.5, 0.5, 1.0, 0.05) > 0.9);
        // No remaining information: decided by the current statistic.
        assert_eq!(conditional_power(1.0, 0.8, 0.8, 0.05), 0.0);
        assert_eq!(conditional_power(2.5, 0.8, 0.8, 0.05), 1.0);
    }

    #[test]
    fn sample_size_formula() {
        // (1.96 + 0.8416)^2 * 2 * 0.5 * 0.5 / 0.05^2 ≈ 1570
        let n = required_sample_size(0.95, 0.8, 0.05, 0.5);
        assert!(close(n, 1_569.8, 1.0));
    }
}
