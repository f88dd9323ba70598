//! modelgrid-abtest — statistical comparison of two model versions.
//!
//! Requests are split by a deterministic hash of `(test id, identity)`, so
//! assignment is sticky without storing anything per user. Outcomes are
//! folded into per-variant running statistics that persist with the test.
//!
//! # Analysis
//!
//! Proportion metrics use a two-proportion z-test, continuous metrics
//! Welch's t-test. Every analysis with new data is an interim look; the
//! O'Brien-Fleming alpha-spending function decides how much of the
//! overall alpha that look may spend, so peeking does not inflate the
//! false-positive rate. A look whose conditional power (under the current
//! trend, up to the projected end of the test) falls below the futility
//! threshold ends the test without a winner.
//!
//! A winner needs both statistical significance and an effect of at
//! least the minimum detectable effect.

pub mod engine;
pub mod error;
pub mod stats;
pub mod types;

pub use engine::{AbTestEngine, NewAbTest, bucket, compare};
pub use error::{AbTestError, AbTestResult};
pub use types::*;
