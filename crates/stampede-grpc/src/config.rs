//! Environment-backed configuration for the control-plane process.

use std::net::SocketAddr;

/// Which `Commands` implementation backs the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatastoreType {
    Redis,
    Embedded,
}

/// Which `Runner` implementation launches instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerType {
    Docker,
    Kube,
    Local,
}

/// Process configuration. Defaults are production-shaped; the environment
/// variables `DATASTORE_TYPE`, `REDIS_ENDPOINT`, `RUNNER_TYPE`, and
/// `LOG_LEVEL` override them.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address for the gRPC server.
    pub listen_address: String,

    pub datastore_type: DatastoreType,

    /// Redis host; the port is always 6379.
    pub redis_endpoint: String,

    pub runner_type: RunnerType,

    /// `DEBUG` enables debug logging; anything else logs errors only.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_address: "[::]:8283".to_string(),
            datastore_type: DatastoreType::Embedded,
            redis_endpoint: "stampede-redis".to_string(),
            runner_type: RunnerType::Local,
            log_level: "ERROR".to_string(),
        }
    }
}

impl Config {
    /// Builds the configuration from defaults plus environment overrides.
    #[must_use]
    pub fn load() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Applies environment variable overrides. Unrecognised values fall
    /// back to the embedded store and the local runner.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(datastore_type) = std::env::var("DATASTORE_TYPE") {
            self.datastore_type = if datastore_type == "REDIS" {
                DatastoreType::Redis
            } else {
                DatastoreType::Embedded
            };
        }

        if let Ok(endpoint) = std::env::var("REDIS_ENDPOINT") {
            if !endpoint.is_empty() {
                self.redis_endpoint = endpoint;
            }
        }

        if let Ok(runner_type) = std::env::var("RUNNER_TYPE") {
            self.runner_type = match runner_type.as_str() {
                "DOCKER" => RunnerType::Docker,
                "KUBE" => RunnerType::Kube,
                _ => RunnerType::Local,
            };
        }

        if let Ok(level) = std::env::var("LOG_LEVEL") {
            self.log_level = level;
        }
    }

    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_address
            .parse::<SocketAddr>()
            .map_err(|_| ConfigError::Validation(format!(
                "listen_address is not a socket address: {}",
                self.listen_address
            )))?;

        if self.redis_endpoint.is_empty() {
            return Err(ConfigError::Validation(
                "redis_endpoint cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Maximum tracing level the process should emit.
    #[must_use]
    pub fn max_level(&self) -> tracing::Level {
        if self.log_level == "DEBUG" {
            tracing::Level::DEBUG
        } else {
            tracing::Level::ERROR
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.listen_address, "[::]:8283");
        assert_eq!(config.datastore_type, DatastoreType::Embedded);
        assert_eq!(config.runner_type, RunnerType::Local);
        assert_eq!(config.max_level(), tracing::Level::ERROR);
    }

    #[test]
    fn debug_level_is_recognised() {
        let config = Config {
            log_level: "DEBUG".to_string(),
            ..Config::default()
        };

        assert_eq!(config.max_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn unknown_types_fall_back() {
        std::env::set_var("DATASTORE_TYPE", "DYNAMO");
        std::env::set_var("RUNNER_TYPE", "NOMAD");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.datastore_type, DatastoreType::Embedded);
        assert_eq!(config.runner_type, RunnerType::Local);

        std::env::remove_var("DATASTORE_TYPE");
        std::env::remove_var("RUNNER_TYPE");
    }

    #[test]
    fn bad_listen_address_fails_validation() {
        let config = Config {
            listen_address: "not-an-address".to_string(),
            ..Config::default()
        };

        assert!(config.validate().is_err());
    }
}
