//! Core domain types shared by the Stampede control-plane crates.

pub mod codec;
pub mod error;
pub mod ids;
pub mod types;

pub use error::{BackendError, BackendResult};
pub use types::{Event, MetricStatistics, Scenario, ScenarioResult, Test};
