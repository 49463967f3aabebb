//! Per-manager result queues and the single-slot scenario result.

use chrono::Utc;
use uuid::Uuid;

use stampede_core::{codec, BackendResult, ScenarioResult};

use crate::{keys, Datastore, RECORD_TTL};

impl Datastore {
    /// Appends result blobs to the manager's queue, preserving order.
    pub async fn add_user_results(
        &self,
        user_manager_id: &str,
        results: &[Vec<u8>],
    ) -> BackendResult<()> {
        for result in results {
            self.commands
                .list_push_bytes(&keys::user_results(user_manager_id), result)
                .await
                .map_err(|e| e.context("Error adding user result"))?;
        }

        Ok(())
    }

    /// Drains up to `limit` result blobs across the scenario's managers.
    /// Managers are visited in enumeration order; callers must not rely on
    /// any cross-manager ordering.
    pub async fn move_user_results(
        &self,
        scenario_id: &str,
        limit: i64,
    ) -> BackendResult<Vec<Vec<u8>>> {
        let mut results = Vec::new();
        let mut remaining = limit;

        let user_managers = self
            .commands
            .map_get_keys(&keys::scenario_user_managers(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario user managers"))?;

        for user_manager_id in &user_managers {
            let key = keys::user_results(user_manager_id);

            let len = self
                .commands
                .list_length(&key)
                .await
                .map_err(|e| e.context("Error getting number of results"))?;

            for _ in 0..len {
                if remaining < 1 {
                    return Ok(results);
                }

                let Some(result) = self
                    .commands
                    .list_pop_bytes(&key)
                    .await
                    .map_err(|e| e.context("Error getting user result"))?
                else {
                    break;
                };

                results.push(result);
                remaining -= 1;
            }
        }

        Ok(results)
    }

    /// Materialises the scenario result with a fresh id and timestamp and
    /// stores it for an hour.
    #[allow(clippy::too_many_arguments)]
    pub async fn set_scenario_result(
        &self,
        scenario_id: &str,
        output: Option<String>,
        exception: Option<String>,
        logs: String,
        time_taken: f64,
        succeeded: i32,
        failed: i32,
    ) -> BackendResult<()> {
        let result = ScenarioResult {
            id: Uuid::new_v4().to_string(),
            output,
            exception,
            logs,
            timestamp: Utc::now().to_rfc3339(),
            time_taken,
            succeeded,
            failed,
        };

        let bytes = codec::to_bytes(&result).map_err(|e| e.context("Error encoding result"))?;

        self.commands
            .set_bytes(&keys::scenario_result(scenario_id), &bytes, Some(RECORD_TTL))
            .await
            .map_err(|e| e.context("Error adding scenario result"))
    }

    /// Reads the scenario result. The slot is left to its TTL rather than
    /// deleted, so a second read within the hour sees the same record.
    pub async fn move_scenario_result(&self, scenario_id: &str) -> BackendResult<ScenarioResult> {
        let bytes = self
            .commands
            .get_bytes(&keys::scenario_result(scenario_id))
            .await
            .map_err(|e| e.context("Error getting scenario result"))?;

        codec::from_bytes(&bytes).map_err(|e| e.context("Error decoding scenario result"))
    }
}
