//! The orchestration facade: composes the datastore engine with a runner.
//!
//! Every operation persists state through the datastore before calling the
//! runner; a runner failure surfaces to the caller but never rolls back the
//! stored state (the record then ages out under its TTL). The facade itself
//! is stateless and holds no locks.

use std::collections::HashMap;
use std::sync::Arc;

use stampede_core::{BackendResult, Event, MetricStatistics, ScenarioResult};
use stampede_datastore::Datastore;
use stampede_runner::Runner;

pub struct Backend {
    datastore: Datastore,
    runner: Arc<dyn Runner>,
}

impl Backend {
    pub fn new(datastore: Datastore, runner: Arc<dyn Runner>) -> Self {
        Self { datastore, runner }
    }

    /// Persists the test, then launches it.
    pub async fn create_test(
        &self,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: Vec<String>,
        env: HashMap<String, String>,
    ) -> BackendResult<String> {
        let test_id = self
            .datastore
            .create_test(backend_address, scheduling_metadata, tags.clone(), env.clone())
            .await
            .map_err(|e| e.context("Error creating test"))?;

        self.runner
            .create_test(&test_id, backend_address, scheduling_metadata, &tags, &env)
            .await
            .map_err(|e| stampede_core::BackendError::Runner(format!("Error starting test: {e}")))?;

        Ok(test_id)
    }

    /// Reads the owning test, persists the scenario, then launches it.
    pub async fn create_scenario(
        &self,
        test_id: &str,
        scenario_name: &str,
        context: &str,
        users_per_instance: u32,
        tags: Vec<String>,
    ) -> BackendResult<String> {
        let test = self.datastore.get_test(test_id).await?;

        let scenario_id = self
            .datastore
            .create_scenario(test_id, scenario_name, context, users_per_instance, tags)
            .await
            .map_err(|e| e.context("Error creating scenario"))?;

        self.runner
            .create_scenario(
                test_id,
                &scenario_id,
                scenario_name,
                &test.backend_address,
                &test.scheduling_metadata,
                context,
                &test.env,
            )
            .await
            .map_err(|e| {
                stampede_core::BackendError::Runner(format!("Error starting scenario: {e}"))
            })?;

        Ok(scenario_id)
    }

    /// Bin-packs the requested users, then launches only the newly allocated
    /// managers; managers that merely received extra users learn about them
    /// through their in-band `START_USERS` events.
    pub async fn create_users(
        &self,
        scenario_id: &str,
        test_id: &str,
        amount: i64,
    ) -> BackendResult<Vec<String>> {
        let test = self.datastore.get_test(test_id).await?;
        let scenario = self.datastore.get_scenario(scenario_id).await?;

        let new_user_managers = self
            .datastore
            .create_users(scenario_id, amount)
            .await
            .map_err(|e| e.context("Error creating users"))?;

        self.runner
            .create_user_managers(
                &new_user_managers,
                test_id,
                &scenario.scenario_name,
                &test.backend_address,
                &test.scheduling_metadata,
                &scenario.context,
                &test.env,
            )
            .await
            .map_err(|e| {
                stampede_core::BackendError::Runner(format!("Error starting user managers: {e}"))
            })?;

        Ok(new_user_managers)
    }

    /// Drains users oldest-first, then stops the managers that emptied.
    pub async fn stop_users(&self, scenario_id: &str, amount: i64) -> BackendResult<()> {
        let scenario = self.datastore.get_scenario(scenario_id).await?;
        let test = self.datastore.get_test(&scenario.test_id).await?;

        let user_managers_to_stop = self
            .datastore
            .stop_users(scenario_id, amount)
            .await
            .map_err(|e| e.context("Error sending stop user events"))?;

        self.runner
            .stop_user_managers(&user_managers_to_stop, &test.scheduling_metadata)
            .await
            .map_err(|e| {
                stampede_core::BackendError::Runner(format!("Error stopping user managers: {e}"))
            })?;

        Ok(())
    }

    pub async fn clean_test_instances(&self, test_id: &str) -> BackendResult<()> {
        let test = self.datastore.get_test(test_id).await?;

        self.runner
            .clean_test_instances(test_id, &test.scheduling_metadata)
            .await
            .map_err(|e| {
                stampede_core::BackendError::Runner(format!("Error cleaning test instances: {e}"))
            })?;

        Ok(())
    }

    pub async fn check_test_instance(
        &self,
        test_id: &str,
        instance_id: &str,
    ) -> BackendResult<bool> {
        let test = self.datastore.get_test(test_id).await?;

        self.runner
            .check_instance(instance_id, &test.scheduling_metadata)
            .await
            .map_err(|e| {
                stampede_core::BackendError::Runner(format!("Error checking test instance: {e}"))
            })
    }

    // The remaining operations delegate straight to the datastore.

    pub async fn add_test_event(
        &self,
        test_id: &str,
        kind: &str,
        payload: &[u8],
    ) -> BackendResult<()> {
        self.datastore.add_test_event(test_id, kind, payload).await
    }

    pub async fn get_test_events(&self, test_id: &str) -> BackendResult<Vec<Event>> {
        self.datastore.get_test_events(test_id).await
    }

    pub async fn add_user_results(
        &self,
        user_manager_id: &str,
        results: &[Vec<u8>],
    ) -> BackendResult<()> {
        self.datastore.add_user_results(user_manager_id, results).await
    }

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
        self.datastore
            .set_scenario_result(scenario_id, output, exception, logs, time_taken, succeeded, failed)
            .await
    }

    pub async fn move_user_results(
        &self,
        scenario_id: &str,
        limit: i64,
    ) -> BackendResult<Vec<Vec<u8>>> {
        self.datastore.move_user_results(scenario_id, limit).await
    }

    pub async fn move_scenario_result(&self, scenario_id: &str) -> BackendResult<ScenarioResult> {
        self.datastore.move_scenario_result(scenario_id).await
    }

    pub async fn distribute_work(&self, scenario_id: &str, amount: i64) -> BackendResult<()> {
        self.datastore.distribute_work(scenario_id, amount).await
    }

    pub async fn get_user_work(&self, user_manager_id: &str) -> BackendResult<i64> {
        self.datastore.get_user_work(user_manager_id).await
    }

    pub async fn add_user_event(
        &self,
        scenario_id: &str,
        kind: &str,
        payload: &[u8],
    ) -> BackendResult<()> {
        self.datastore.add_user_event(scenario_id, kind, payload).await
    }

    pub async fn get_user_events(
        &self,
        user_manager_id: &str,
        kind: &str,
    ) -> BackendResult<Vec<Event>> {
        self.datastore.get_user_events(user_manager_id, kind).await
    }

    pub async fn add_metric(&self, scenario_id: &str, name: &str, value: f64) -> BackendResult<()> {
        self.datastore.add_metric(scenario_id, name, value).await
    }

    pub async fn get_metric_total(&self, scenario_id: &str, name: &str) -> BackendResult<f64> {
        self.datastore.get_metric_total(scenario_id, name).await
    }

    pub async fn get_last_metric(&self, scenario_id: &str, name: &str) -> BackendResult<f64> {
        self.datastore.get_last_metric(scenario_id, name).await
    }

    pub async fn get_rate(
        &self,
        scenario_id: &str,
        name: &str,
        split_point: f64,
    ) -> BackendResult<f64> {
        self.datastore.get_rate(scenario_id, name, split_point).await
    }

    pub async fn get_metric_statistics(
        &self,
        scenario_id: &str,
        name: &str,
    ) -> BackendResult<MetricStatistics> {
        self.datastore.get_metric_statistics(scenario_id, name).await
    }
}
