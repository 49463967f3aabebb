//! Local subprocess runner: every instance is a child process with its
//! stdout piped to a per-instance log file.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tokio::process::{Child, Command};
use tracing::debug;

use crate::{tag_args, parse_metadata, Runner, RunnerError, RunnerResult};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LocalMetadata {
    python_executable: String,
    test_file_path: String,
    logdir: String,
}

/// Runs worker programs as local child processes. Intended for single-host
/// development; teardown kills every child it started and closes every log
/// file, collecting all failures into one report.
pub struct LocalRunner {
    client: ExecClient,
}

impl LocalRunner {
    #[must_use]
    pub fn new() -> Self {
        Self {
            client: ExecClient::new(),
        }
    }
}

impl Default for LocalRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Runner for LocalRunner {
    async fn create_test(
        &self,
        test_id: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        tags: &[String],
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: LocalMetadata = parse_metadata(scheduling_metadata)?;

        let mut command = vec![
            metadata.python_executable,
            "-u".to_string(),
            metadata.test_file_path,
            "run-test".to_string(),
            "--test-id".to_string(),
            test_id.to_string(),
            "--backend-address".to_string(),
            backend_address.to_string(),
        ];
        command.extend(tag_args(tags));

        self.client
            .start_process(test_id, &metadata.logdir, &command, env)
            .map_err(|e| RunnerError::new(format!("Error starting test: {e}")))
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
        let metadata: LocalMetadata = parse_metadata(scheduling_metadata)?;

        let command = vec![
            metadata.python_executable,
            "-u".to_string(),
            metadata.test_file_path,
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

        self.client
            .start_process(scenario_id, &metadata.logdir, &command, env)
            .map_err(|e| RunnerError::new(format!("Error starting scenario: {e}")))
    }

    async fn create_user_managers(
        &self,
        user_manager_ids: &[String],
        _test_id: &str,
        scenario_name: &str,
        backend_address: &str,
        scheduling_metadata: &str,
        encoded_context: &str,
        env: &HashMap<String, String>,
    ) -> RunnerResult<()> {
        let metadata: LocalMetadata = parse_metadata(scheduling_metadata)?;

        for user_manager_id in user_manager_ids {
            let command = vec![
                metadata.python_executable.clone(),
                "-u".to_string(),
                metadata.test_file_path.clone(),
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

            self.client
                .start_process(user_manager_id, &metadata.logdir, &command, env)
                .map_err(|e| RunnerError::new(format!("Error starting user manager: {e}")))?;
        }

        Ok(())
    }

    async fn stop_user_managers(
        &self,
        user_manager_ids: &[String],
        _scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        for user_manager_id in user_manager_ids {
            self.client
                .stop_process(user_manager_id)
                .map_err(|e| RunnerError::new(format!("Error stopping user manager: {e}")))?;
        }

        Ok(())
    }

    async fn clean_test_instances(
        &self,
        test_id: &str,
        _scheduling_metadata: &str,
    ) -> RunnerResult<()> {
        self.client
            .stop_process(test_id)
            .map_err(|e| RunnerError::new(format!("Error stopping test instances: {e}")))
    }

    async fn check_instance(
        &self,
        instance_id: &str,
        _scheduling_metadata: &str,
    ) -> RunnerResult<bool> {
        Ok(self.client.is_running(instance_id))
    }

    async fn teardown(&self) -> RunnerResult<()> {
        self.client.teardown()
    }
}

/// Process table shared by every launch: name to child handle plus the log
/// file its stdout goes to.
struct ExecClient {
    processes: Mutex<HashMap<String, Child>>,
    logfiles: Mutex<HashMap<String, std::fs::File>>,
}

impl ExecClient {
    fn new() -> Self {
        Self {
            processes: Mutex::new(HashMap::new()),
            logfiles: Mutex::new(HashMap::new()),
        }
    }

    fn start_process(
        &self,
        name: &str,
        logdir: &str,
        command: &[String],
        env: &HashMap<String, String>,
    ) -> Result<(), String> {
        let logfile = create_log_file(name, logdir)?;

        let stdout = logfile
            .try_clone()
            .map_err(|e| format!("Error cloning logfile handle: {e}"))?;

        let child = Command::new(&command[0])
            .args(&command[1..])
            .envs(env)
            .stdout(Stdio::from(stdout))
            .spawn()
            .map_err(|e| format!("Error starting test process: {e}"))?;

        debug!("started process: {name} : {:?}", child.id());

        self.processes.lock().insert(name.to_string(), child);
        self.logfiles.lock().insert(name.to_string(), logfile);

        Ok(())
    }

    fn stop_process(&self, name: &str) -> Result<(), String> {
        debug!("stopping process for {name}");

        let mut child = self
            .processes
            .lock()
            .remove(name)
            .ok_or_else(|| format!("Command not found: {name}"))?;

        child
            .start_kill()
            .map_err(|e| format!("Error killing process: {e}"))?;

        let logfile = self
            .logfiles
            .lock()
            .remove(name)
            .ok_or_else(|| format!("Log file not found: {name}"))?;

        logfile
            .sync_all()
            .map_err(|e| format!("Error closing logfile: {e}"))?;

        Ok(())
    }

    fn is_running(&self, name: &str) -> bool {
        let mut processes = self.processes.lock();

        match processes.get_mut(name) {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    fn teardown(&self) -> RunnerResult<()> {
        let mut errors = Vec::new();

        for (name, child) in self.processes.lock().drain() {
            let mut child = child;
            if let Err(e) = child.start_kill() {
                errors.push(format!("Error killing process: {name} : {e}"));
            }
        }

        for (name, logfile) in self.logfiles.lock().drain() {
            if let Err(e) = logfile.sync_all() {
                errors.push(format!("Error closing logfile: {name} : {e}"));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RunnerError::new(format!(
                "Errors tearing down local exec: {}",
                errors.join(",")
            )))
        }
    }
}

fn create_log_file(name: &str, logdir: &str) -> Result<std::fs::File, String> {
    let dir = Path::new(logdir);

    if !dir.exists() {
        std::fs::create_dir_all(dir).map_err(|e| format!("Error creating logdir: {e}"))?;
    }

    std::fs::File::create(dir.join(format!("{name}.log")))
        .map_err(|e| format!("Error creating logfile: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sleep_command() -> Vec<String> {
        vec!["sleep".to_string(), "30".to_string()]
    }

    #[tokio::test]
    async fn start_stop_round_trip() {
        let client = ExecClient::new();
        let logdir = tempfile::tempdir().unwrap();
        let logdir = logdir.path().to_str().unwrap().to_string();

        client
            .start_process("proc-a", &logdir, &sleep_command(), &HashMap::new())
            .unwrap();

        assert!(Path::new(&logdir).join("proc-a.log").exists());
        assert!(client.is_running("proc-a"));

        client.stop_process("proc-a").unwrap();
        assert!(!client.is_running("proc-a"));
    }

    #[tokio::test]
    async fn stopping_an_unknown_process_fails() {
        let client = ExecClient::new();

        let err = client.stop_process("proc-missing").unwrap_err();
        assert!(err.contains("Command not found"));
    }

    #[tokio::test]
    async fn teardown_kills_every_child() {
        let client = ExecClient::new();
        let logdir = tempfile::tempdir().unwrap();
        let logdir = logdir.path().to_str().unwrap().to_string();

        client
            .start_process("proc-a", &logdir, &sleep_command(), &HashMap::new())
            .unwrap();
        client
            .start_process("proc-b", &logdir, &sleep_command(), &HashMap::new())
            .unwrap();

        client.teardown().unwrap();

        assert!(!client.is_running("proc-a"));
        assert!(!client.is_running("proc-b"));
    }
}
