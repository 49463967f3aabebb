//! The `Runner` capability: materialises control-plane requests into real
//! processes or containers. The core never depends on a specific runner.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use stampede_core::BackendError;

mod docker;
mod kube_runner;
mod local;

pub use docker::DockerRunner;
pub use kube_runner::KubeRunner;
pub use local::LocalRunner;

/// External launch/stop/inspect failure. Scheduling-metadata that fails to
/// parse is reported through this type as well; either way the store state
/// written before the call stays in place.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct RunnerError(pub String);

impl RunnerError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<RunnerError> for BackendError {
    fn from(err: RunnerError) -> Self {
        BackendError::Runner(err.0)
    }
}

pub type RunnerResult<T> = Result<T, RunnerError>;

/// Launches, stops, and inspects named instances (tests, scenarios, user
/// managers). `scheduling_metadata` is opaque at this boundary; each
/// implementation parses its own JSON shape out of it.
#[async_trait]
pub trait Runner: Send + Sync {
    async fn create_test(
        &self,
        test_id: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: &[String],
        env: &HashMap<String, String>,
    ) -> RunnerResult<()>;

    #[allow(clippy::too_many_arguments)]
    async fn create_scenario(
        &self,
        test_id: &str,
        scenario_id: &str,
        scenario_name: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        encoded_context: &str,
        env: &HashMap<String, String>,
    ) -> RunnerResult<()>;

    #[allow(clippy::too_many_arguments)]
    async fn create_user_managers(
        &self,
        user_manager_ids: &[String],
        test_id: &str,
        scenario_name: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        encoded_context: &str,
        env: &HashMap<String, String>,
    ) -> RunnerResult<()>;

    async fn stop_user_managers(
        &self,
        user_manager_ids: &[String],
        scheduling_metadata: &str,
    ) -> RunnerResult<()>;

    async fn clean_test_instances(
        &self,
        test_id: &str,
        scheduling_metadata: &str,
    ) -> RunnerResult<()>;

    async fn check_instance(
        &self,
        instance_id: &str,
        scheduling_metadata: &str,
    ) -> RunnerResult<bool>;

    /// Releases whatever the runner holds. Failures from individual steps
    /// are collected rather than short-circuiting.
    async fn teardown(&self) -> RunnerResult<()> {
        Ok(())
    }
}

pub(crate) fn parse_metadata<T: DeserializeOwned>(scheduling_metadata: &str) -> RunnerResult<T> {
    serde_json::from_str(scheduling_metadata)
        .map_err(|e| RunnerError::new(format!("Error loading scheduling metadata: {e}")))
}

/// `--tag <tag>` argument pairs for the worker command line.
pub(crate) fn tag_args(tags: &[String]) -> Vec<String> {
    let mut args = Vec::new();

    for tag in tags {
        args.push("--tag".to_string());
        args.push(tag.clone());
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_args_interleave_the_flag() {
        let tags = vec!["smoke".to_string(), "slow".to_string()];
        assert_eq!(tag_args(&tags), vec!["--tag", "smoke", "--tag", "slow"]);
        assert!(tag_args(&[]).is_empty());
    }

    #[test]
    fn bad_metadata_is_a_runner_error() {
        #[derive(serde::Deserialize, Debug)]
        struct Meta {
            #[serde(rename = "image")]
            _image: String,
        }

        let err = parse_metadata::<Meta>("not json").unwrap_err();
        assert!(err.0.starts_with("Error loading scheduling metadata"));
    }
}
