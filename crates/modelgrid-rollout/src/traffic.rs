//! Traffic shares of the versions serving one model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficShare {
    pub version: String,
    pub percent: u8,
}

/// Percentages across the versions serving a model. Built only through
/// the constructors below, which keep the total at 100.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficSplit {
    shares: Vec<TrafficShare>,
}

impl TrafficSplit {
    /// All traffic on one version.
    pub fn single(version: &str) -> Self {
        Self {
            shares: vec![TrafficShare {
                version: version.to_string(),
                percent: 100,
            }],
        }
    }

    /// `candidate_percent` on the candidate, the rest on the baseline.
    /// A baseline at 0% stays listed so it can take traffic back at once.
    pub fn split(baseline: &str, candidate: &str, candidate_percent: u8) -> Self {
        let candidate_percent = candidate_percent.min(100);
        Self {
            shares: vec![
                TrafficShare {
                    version: baseline.to_string(),
                    percent: 100 - candidate_percent,
                },
                TrafficShare {
                    version: candidate.to_string(),
                    percent: candidate_percent,
                },
            ],
        }
    }

    pub fn shares(&self) -> &[TrafficShare] {
        &self.shares
    }

    pub fn total(&self) -> u32 {
        self.shares.iter().map(|s| u32::from(s.percent)).sum()
    }

    pub fn percent_for(&self, version: &str) -> u8 {
        self.shares
            .iter()
            .find(|s| s.version == version)
            .map(|s| s.percent)
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.shares.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_split_totals_one_hundred() {
        for p in [0u8, 1, 10, 50, 99, 100, 150] {
            let s = TrafficSplit::split("1.0.0", "1.1.0", p);
            assert_eq!(s.total(), 100, "candidate at {p}");
        }
        assert_eq!(TrafficSplit::single("1.0.0").total(), 100);
    }

    #[test]
    fn zero_percent_baseline_is_retained() {
        let s = TrafficSplit::split("1.0.0", "1.1.0", 100);
        assert_eq!(s.shares().len(), 2);
        assert_eq!(s.percent_for("1.0.0"), 0);
        assert_eq!(s.percent_for("1.1.0"), 100);
        assert_eq!(s.percent_for("2.0.0"), 0);
    }
}
