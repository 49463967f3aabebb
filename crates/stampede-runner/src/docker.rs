//! Docker runner: one container per instance, tracked through labels.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use serde::Deserialize;

use crate::{parse_metadata, tag_args, Runner, RunnerError, RunnerResult};

const DEFAULT_NETWORK: &str = "stampede-network";

/// Containers get this long to stop before the daemon kills them.
const STOP_TIMEOUT_SECS: i64 = 3;

#[derive(Debug, Deserialize)]
struct DockerMetadata {
    image: String,
    network: Option<String>,
}

/// Runs worker programs as containers against the local Docker daemon.
pub struct DockerRunner {
    client: Docker,
}

impl DockerRunner {
    pub fn connect() -> RunnerResult<Self> {
        let client = Docker::connect_with_local_defaults()
            .map_err(|e| RunnerError::new(format!("Error creating docker client: {e}")))?;

        Ok(Self { client })
    }

    async fn start_container(
        &self,
        image: &str,
        name: &str,
        command: Vec<String>,
        labels: HashMap<String, String>,
        env: &HashMap<String, String>,
        network: Option<String>,
    ) -> RunnerResult<()> {
        let env_list: Vec<String> = env.iter().map(|(key, value)| format!("{key}={value}")).collect();
        let network_mode = network.unwrap_or_else(|| DEFAULT_NETWORK.to_string());

        let config = Config {
            image: Some(image.to_string()),
            cmd: Some(command),
            env: Some(env_list),
            labels: Some(labels),
            host_config: Some(HostConfig {
                network_mode: Some(network_mode),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.client
            .create_container(
                Some(CreateContainerOptions {
                    name: name.to_string(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| RunnerError::new(format!("Error creating container: {e}")))?;

        self.client
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RunnerError::new(format!("Error starting container: {e}")))?;

        Ok(())
    }

    async fn stop_container(&self, name: &str) -> RunnerResult<()> {
        self.client
            .stop_container(
                name,
                Some(StopContainerOptions {
                    t: STOP_TIMEOUT_SECS,
                }),
            )
            .await
            .map_err(|e| RunnerError::new(format!("Error stopping container: {e}")))
    }

    async fn stop_labelled(&self, label: String) -> RunnerResult<()> {
        let filters = HashMap::from([("label".to_string(), vec![label])]);

        let containers = self
            .client
            .list_containers(Some(ListContainersOptions {
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| RunnerError::new(format!("Error listing containers: {e}")))?;

        for container in containers {
            if let Some(id) = container.id {
                self.stop_container(&id).await?;
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Runner for DockerRunner {
    async fn create_test(
        &self,
        test_id: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: &[String],
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: DockerMetadata = parse_metadata(scheduling_metadata)?;

        let mut command = vec![
            "run-test".to_string(),
            "--test-id".to_string(),
            test_id.to_string(),
            "--backend-address".to_string(),
            backend_address.to_string(),
        ];
        command.extend(tag_args(tags));

        let labels = HashMap::from([
            ("type".to_string(), "stampede-test".to_string()),
            ("test".to_string(), test_id.to_string()),
        ]);

        self.start_container(&metadata.image, test_id, command, labels, env, metadata.network)
            .await
            .map_err(|e| RunnerError::new(format!("Error starting test docker container: {e}")))
    }

    async fn create_scenario(
        &self,
        test_id: &str,
        scenario_id: &str,
        scenario_name: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        encoded_context: &str,
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: DockerMetadata = parse_metadata(scheduling_metadata)?;

        let command = vec![
            "run-scenario".to_string(),
            "--name".to_string(),
            scenario_name.to_string(),
            "--test-id".to_string(),
            test_id.to_string(),
            "--scenario-id".to_string(),
            scenario_id.to_string(),
            "--encoded-context".to_string(),
            encoded_context.to_string(),
            "--backend-address".to_string(),
            backend_address.to_string(),
        ];

        let labels = HashMap::from([
            ("type".to_string(), "stampede-scenario".to_string()),
            ("test".to_string(), test_id.to_string()),
            ("scenario".to_string(), scenario_name.to_string()),
        ]);

        self.start_container(
            &metadata.image,
            scenario_id,
            command,
            labels,
            env,
            metadata.network,
        )
        .await
        .map_err(|e| RunnerError::new(format!("Error starting scenario docker container: {e}")))
    }

    async fn create_user_managers(
        &self,
        user_manager_ids: &[String],
        test_id: &str,
        scenario_name: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        encoded_context: &str,
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: DockerMetadata = parse_metadata(scheduling_metadata)?;

        for user_manager_id in user_manager_ids {
            let command = vec![
                "run-user".to_string(),
                "--name".to_string(),
                scenario_name.to_string(),
                "--user-manager-id".to_string(),
                user_manager_id.to_string(),
                "--backend-address".to_string(),
                backend_address.to_string(),
                "--encoded-context".to_string(),
                encoded_context.to_string(),
            ];

            let labels = HashMap::from([
                ("type".to_string(), "stampede-user".to_string()),
                ("test".to_string(), test_id.to_string()),
                ("scenario".to_string(), scenario_name.to_string()),
            ]);

            self.start_container(
                &metadata.image,
                user_manager_id,
                command,
                labels,
                env,
                metadata.network.clone(),
            )
            .await
            .map_err(|e| {
                RunnerError::new(format!("Error starting user manager docker container: {e}"))
            })?;
        }

        Ok(())
    }

    async fn stop_user_managers(
        &self,
        user_manager_ids: &[String],
        _scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        for user_manager_id in user_manager_ids {
            self.stop_container(user_manager_id)
                .await
                .map_err(|e| RunnerError::new(format!("Error stopping user manager: {e}")))?;
        }

        Ok(())
    }

    async fn clean_test_instances(
        &self,
        test_id: &str,
        _scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        self.stop_labelled(format!("test={test_id}"))
            .await
            .map_err(|e| RunnerError::new(format!("Error stopping test instances: {e}")))
    }

    async fn check_instance(
        &self,
        instance_id: &str,
        _scheduling_metadata: &str,
    ) -> RunnerResult<bool> {
        match self.client.inspect_container(instance_id, None).await {
            Ok(details) => Ok(details
                .state
                .and_then(|state| state.running)
                .unwrap_or(false)),
            Err(_) => Ok(false),
        }
    }
}
