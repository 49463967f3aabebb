use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A single invocation of the platform. Created once, never mutated,
/// expires one hour after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Test {
    pub test_id: String,
    pub backend_address: String,
    /// Opaque blob interpreted by whichever runner is configured.
    pub scheduling_metadata: String,
    pub tags: Vec<String>,
    pub env: HashMap<String, String>,
}

/// A named unit of load generation configured within a test.
/// `users_per_instance` sets the bin-packing capacity of its managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    pub test_id: String,
    pub scenario_id: String,
    pub scenario_name: String,
    /// Opaque payload handed to the worker program.
    pub context: String,
    pub users_per_instance: u32,
    pub tags: Vec<String>,
}

/// An event moved through a FIFO channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: String,
    pub payload: Vec<u8>,
}

/// The single-slot outcome of a scenario run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub id: String,
    pub output: Option<String>,
    pub exception: Option<String>,
    pub logs: String,
    /// RFC 3339 creation time.
    pub timestamp: String,
    pub time_taken: f64,
    pub succeeded: i32,
    pub failed: i32,
}

/// Derived statistics over a metric series.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricStatistics {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub average: f64,
    pub len: i64,
}
