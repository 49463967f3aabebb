//! Kubernetes runner: one batch Job per instance, cleaned up by label
//! selector.

use std::collections::HashMap;

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use serde::Deserialize;
use serde_json::json;

use crate::{parse_metadata, tag_args, Runner, RunnerError, RunnerResult};

#[derive(Debug, Deserialize)]
struct KubeMetadata {
    image: String,
    namespace: String,
}

/// Runs worker programs as Kubernetes Jobs. Uses in-cluster configuration
/// (or the local kubeconfig when run outside a cluster).
pub struct KubeRunner {
    client: Client,
}

impl KubeRunner {
    pub async fn connect() -> RunnerResult<Self> {
        let client = Client::try_default()
            .await
            .map_err(|e| RunnerError::new(format!("Error creating kube client: {e}")))?;

        Ok(Self { client })
    }

    fn jobs(&self, namespace: &str) -> Api<Job> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn create_job(
        &self,
        namespace: &str,
        name: &str,
        image: &str,
        args: Vec<String>,
        env: &HashMap<String, String>,
        labels: HashMap<String, String>,
    ) -> RunnerResult<()> {
        let env_vars: Vec<serde_json::Value> = env
            .iter()
            .map(|(key, value)| json!({ "name": key, "value": value }))
            .collect();

        let job: Job = serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": { "name": name },
            "spec": {
                "parallelism": 1,
                "completions": 1,
                "backoffLimit": 0,
                "template": {
                    "metadata": { "labels": labels },
                    "spec": {
                        "restartPolicy": "Never",
                        "serviceAccountName": "stampede-job",
                        "containers": [{
                            "name": "container",
                            "image": image,
                            "args": args,
                            "env": env_vars,
                        }],
                    },
                },
            },
        }))
        .map_err(|e| RunnerError::new(format!("Error building job spec: {e}")))?;

        self.jobs(namespace)
            .create(&PostParams::default(), &job)
            .await
            .map_err(|e| RunnerError::new(format!("Error creating job: {e}")))?;

        Ok(())
    }

    async fn stop_job(&self, namespace: &str, name: &str) -> RunnerResult<()> {
        self.jobs(namespace)
            .delete(name, &DeleteParams::background())
            .await
            .map_err(|e| RunnerError::new(format!("Error deleting job: {e}")))?;

        Ok(())
    }

    async fn stop_jobs(&self, namespace: &str, label_selector: &str) -> RunnerResult<()> {
        self.jobs(namespace)
            .delete_collection(
                &DeleteParams::background(),
                &ListParams::default().labels(label_selector),
            )
            .await
            .map_err(|e| RunnerError::new(format!("Error deleting jobs: {e}")))?;

        Ok(())
    }

    async fn job_is_running(&self, namespace: &str, name: &str) -> bool {
        match self.jobs(namespace).get_opt(name).await {
            Ok(Some(job)) => job
                .status
                .and_then(|status| status.active)
                .map_or(false, |active| active > 0),
            _ => false,
        }
    }
}

#[async_trait]
impl Runner for KubeRunner {
    async fn create_test(
        &self,
        test_id: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: &[String],
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        let mut args = vec![
            "run-test".to_string(),
            "--test-id".to_string(),
            test_id.to_string(),
            "--backend-address".to_string(),
            backend_address.to_string(),
        ];
        args.extend(tag_args(tags));

        let labels = HashMap::from([
            ("type".to_string(), "stampede-test".to_string()),
            ("test".to_string(), test_id.to_string()),
        ]);

        self.create_job(&metadata.namespace, test_id, &metadata.image, args, env, labels)
            .await
            .map_err(|e| RunnerError::new(format!("Error starting test kube job: {e}")))
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
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        let args = vec![
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

        self.create_job(
            &metadata.namespace,
            scenario_id,
            &metadata.image,
            args,
            env,
            labels,
        )
        .await
        .map_err(|e| RunnerError::new(format!("Error starting scenario kube job: {e}")))
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
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        for user_manager_id in user_manager_ids {
            let args = vec![
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

            self.create_job(
                &metadata.namespace,
                user_manager_id,
                &metadata.image,
                args,
                env,
                labels,
            )
            .await
            .map_err(|e| {
                RunnerError::new(format!("Error starting user manager kube job: {e}"))
            })?;
        }

        Ok(())
    }

    async fn stop_user_managers(
        &self,
        user_manager_ids: &[String],
        scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        for user_manager_id in user_manager_ids {
            self.stop_job(&metadata.namespace, user_manager_id)
                .await
                .map_err(|e| RunnerError::new(format!("Error stopping user manager: {e}")))?;
        }

        Ok(())
    }

    async fn clean_test_instances(
        &self,
        test_id: &str,
        scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        self.stop_jobs(&metadata.namespace, &format!("test={test_id}"))
            .await
            .map_err(|e| RunnerError::new(format!("Error stopping test instances: {e}")))
    }

    async fn check_instance(
        &self,
        instance_id: &str,
        scheduling_metadata: &str,
    ) -> RunnerResult<bool> {
        let metadata: KubeMetadata = parse_metadata(scheduling_metadata)?;

        Ok(self.job_is_running(&metadata.namespace, instance_id).await)
    }
}
