//! Per-(scenario, name) metric aggregation: a scored set for the
//! distribution, a running counter for the total, and a TTL-backed last
//! value.

use stampede_core::{BackendResult, MetricStatistics};

use crate::{keys, Datastore, RECORD_TTL};

impl Datastore {
    /// Records one observation under all three aggregates. The writes land
    /// in order but are not transactional: a reader may observe the counter
    /// updated before the set. A failed step surfaces without compensation.
    pub async fn add_metric(&self, scenario_id: &str, name: &str, value: f64) -> BackendResult<()> {
        self.commands
            .add_to_set(&keys::metric_set(scenario_id, name), value)
            .await
            .map_err(|e| e.context("Error adding metric to set"))?;

        self.commands
            .increment_counter(&keys::metric_inc(scenario_id, name), value)
            .await
            .map_err(|e| e.context("Error adding metric count"))?;

        self.commands
            .set_float(&keys::metric_last(scenario_id, name), value, Some(RECORD_TTL))
            .await
            .map_err(|e| e.context("Error setting metric"))
    }

    pub async fn get_last_metric(&self, scenario_id: &str, name: &str) -> BackendResult<f64> {
        self.commands
            .get_float(&keys::metric_last(scenario_id, name))
            .await
            .map_err(|e| e.context("Error getting last metric"))
    }

    pub async fn get_metric_total(&self, scenario_id: &str, name: &str) -> BackendResult<f64> {
        self.commands
            .get_float(&keys::metric_inc(scenario_id, name))
            .await
            .map_err(|e| e.context("Error getting total"))
    }

    /// Composes the tracked aggregates into min/max/median/average/len.
    /// `NotFound` from the set or the counter propagates untouched.
    pub async fn get_metric_statistics(
        &self,
        scenario_id: &str,
        name: &str,
    ) -> BackendResult<MetricStatistics> {
        let set_key = keys::metric_set(scenario_id, name);

        let min = self
            .commands
            .get_min(&set_key)
            .await
            .map_err(|e| e.context("Error getting min"))?;

        let len = self
            .commands
            .get_cardinality(&set_key)
            .await
            .map_err(|e| e.context("Error getting stats count"))?;

        let max = self
            .commands
            .get_max(&set_key)
            .await
            .map_err(|e| e.context("Error getting max"))?;

        let median = self
            .commands
            .get_median(&set_key)
            .await
            .map_err(|e| e.context("Error getting median"))?;

        let total = self
            .commands
            .get_float(&keys::metric_inc(scenario_id, name))
            .await
            .map_err(|e| e.context("Error getting total"))?;

        Ok(MetricStatistics {
            min,
            max,
            median,
            average: total / len as f64,
            len,
        })
    }

    /// Share of observations at or above `split_point`, to the sorted-set
    /// score precision of 1e-4. An empty series yields a non-finite value
    /// rather than an error.
    pub async fn get_rate(
        &self,
        scenario_id: &str,
        name: &str,
        split_point: f64,
    ) -> BackendResult<f64> {
        let set_key = keys::metric_set(scenario_id, name);

        let count = self
            .commands
            .range_count(&set_key, split_point, -1.0)
            .await
            .map_err(|e| e.context("Error getting rate"))?;

        let len = self
            .commands
            .get_cardinality(&set_key)
            .await
            .map_err(|e| e.context("Error getting stats count"))?;

        Ok(count as f64 / len as f64)
    }
}
