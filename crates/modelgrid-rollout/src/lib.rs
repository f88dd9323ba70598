//! modelgrid-rollout — deploying model versions with controlled traffic
//! shifts.
//!
//! Every strategy runs through one state machine:
//!
//! ```text
//! Initializing ─▶ RampingUp (canary steps) ─▶ Evaluating ─▶ Promoted
//!       │                 │                       │
//!       └─────────────────┴───────────────────────┴──▶ RolledBack / Failed
//! ```
//!
//! # Components
//!
//! - **`strategy`** — Replace, Canary, BlueGreen, and AbTest settings
//! - **`deployment`** — persisted deployment record and the pure step
//!   decision
//! - **`traffic`** — per-model traffic shares, always totalling 100
//! - **`health`** — where candidate health is read from
//! - **`controller`** — applies decisions against the version store, the
//!   A/B engine, and the inference provider
//!
//! Only one deployment may be in flight per model. A rollback always
//! returns traffic to the version that was `Active` when the deployment
//! began.

pub mod controller;
pub mod deployment;
pub mod error;
pub mod health;
pub mod strategy;
pub mod traffic;

pub use controller::{DeployRequest, DeploymentController};
pub use deployment::{Action, Deployment, DeploymentEvent, DeploymentState, MetricsRead, Signals};
pub use error::{RolloutError, RolloutResult};
pub use health::HealthSource;
pub use strategy::{
    AbTestStrategy, BlueGreenConfig, CanaryConfig, HealthCriteria, RollbackConfig, Strategy,
};
pub use traffic::{TrafficShare, TrafficSplit};
