//! modelgrid-core — shared types for the ModelGrid crates.
//!
//! Everything here is dependency-light: domain records that several
//! crates exchange, the injectable [`Clock`], the error taxonomy every
//! crate maps onto, the `modelgrid.toml` configuration, and the
//! collaborator traits for the inference provider.

pub mod clock;
pub mod config;
pub mod error;
pub mod provider;
pub mod types;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock, Timestamp};
pub use config::ModelGridConfig;
pub use error::ErrorKind;
pub use provider::{InferenceProvider, InferenceRequest, InferenceResponse, ProviderError};
pub use types::*;
