//! modelgrid-state — persistent state for ModelGrid.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! storage for model versions, deployments, A/B tests, threshold breaches,
//! update tasks, and schedules.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Composite keys (`{model}/{version}`, `{model}/{version}/{metric}`) enable
//! prefix scans for related records.
//!
//! [`VersionStore`] sits on top of a [`VersionBackend`] (implemented by
//! [`StateStore`]) and owns the model version lifecycle. Every mutation
//! for one model name runs under that model's lock.

pub mod error;
pub mod locks;
pub mod store;
pub mod tables;
pub mod types;
pub mod versions;

pub use error::{StateError, StateResult, VersionError, VersionResult};
pub use locks::ModelLocks;
pub use store::{StateStore, VersionBackend};
pub use tables::Table;
pub use types::*;
pub use versions::{ModelStatistics, ModelSummary, Promotion, Restoration, VersionStore};
