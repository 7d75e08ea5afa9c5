//! Configuration loading for the fleet orchestrator.
//!
//! Configuration is loaded from a TOML file (default: `fleet.toml`).

use fleet_core::{RetryPolicy, DEFAULT_MAX_RETRIES};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The experiment this orchestrator owns.
    #[serde(default)]
    pub experiment: ExperimentConfig,
    /// Storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Watchdog configuration.
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    /// Messaging fabric configuration.
    #[serde(default)]
    pub fabric: FabricConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Worker infrastructure commands.
    #[serde(default)]
    pub compute: ComputeConfig,
    /// In-process simulated fleet, used by `run --simulate`.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

/// Experiment configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExperimentConfig {
    /// Experiment name; rows are scoped by it (default: "default").
    #[serde(default = "default_experiment_name")]
    pub name: String,
    /// Timed-out attempts before a test case is FAILED (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Concurrency ceiling on live workers (default: 4).
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Artifact reference dispatched with every test case.
    #[serde(default = "default_artifact")]
    pub artifact: String,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Path to SQLite database file.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

/// Watchdog configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Seconds a worker may stay silent before it is timed out (default: 1200).
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
}

/// Messaging fabric configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FabricConfig {
    /// Topic the orchestrator consumes (default: "host_topic").
    #[serde(default = "default_host_topic")]
    pub host_topic: String,
    /// Delay before an unacknowledged message is delivered again (default: 1000).
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
    /// Events handled in parallel (default: 16).
    #[serde(default = "default_consumer_concurrency")]
    pub consumer_concurrency: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Serve the HTTP endpoints (default: true).
    #[serde(default = "default_http_enabled")]
    pub enabled: bool,
    /// Bind address for HTTP server (default: 0.0.0.0:8080).
    #[serde(default = "default_http_bind")]
    pub bind_address: String,
}

/// Worker infrastructure commands.
///
/// Each command is an argv template; `{name}` and `{image}` are substituted.
#[derive(Debug, Clone, Deserialize)]
pub struct ComputeConfig {
    /// Command creating a worker from its image.
    #[serde(default = "default_create_command")]
    pub create: Vec<String>,
    /// Command deleting a worker.
    #[serde(default = "default_delete_command")]
    pub delete: Vec<String>,
    /// Command resetting a worker.
    #[serde(default = "default_reset_command")]
    pub reset: Vec<String>,
}

/// Simulated fleet configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Boot time of a simulated worker in milliseconds (default: 50).
    #[serde(default = "default_boot_delay_ms")]
    pub boot_delay_ms: u64,
    /// Run time of one test case in milliseconds (default: 100).
    #[serde(default = "default_run_delay_ms")]
    pub run_delay_ms: u64,
}

// Default value functions
fn default_experiment_name() -> String {
    "default".to_string()
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_workers() -> usize {
    4
}

fn default_artifact() -> String {
    "payload.exe".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("fleet.db")
}

fn default_deadline_secs() -> u64 {
    20 * 60 // 20 minutes
}

fn default_host_topic() -> String {
    "host_topic".to_string()
}

fn default_redelivery_delay_ms() -> u64 {
    1000
}

fn default_consumer_concurrency() -> usize {
    16
}

fn default_http_enabled() -> bool {
    true
}

fn default_http_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

fn default_create_command() -> Vec<String> {
    argv(&[
        "gcloud",
        "compute",
        "instances",
        "create",
        "{name}",
        "--source-machine-image={image}",
    ])
}

fn default_delete_command() -> Vec<String> {
    argv(&["gcloud", "compute", "instances", "delete", "{name}", "--quiet"])
}

fn default_reset_command() -> Vec<String> {
    argv(&["gcloud", "compute", "instances", "reset", "{name}"])
}

fn default_boot_delay_ms() -> u64 {
    50
}

fn default_run_delay_ms() -> u64 {
    100
}

impl Default for Config {
    fn default() -> Self {
        Self {
            experiment: ExperimentConfig::default(),
            storage: StorageConfig::default(),
            watchdog: WatchdogConfig::default(),
            fabric: FabricConfig::default(),
            http: HttpConfig::default(),
            compute: ComputeConfig::default(),
            simulation: SimulationConfig::default(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            max_retries: default_max_retries(),
            max_workers: default_max_workers(),
            artifact: default_artifact(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
        }
    }
}

impl Default for FabricConfig {
    fn default() -> Self {
        Self {
            host_topic: default_host_topic(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
            consumer_concurrency: default_consumer_concurrency(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: default_http_enabled(),
            bind_address: default_http_bind(),
        }
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self {
            create: default_create_command(),
            delete: default_delete_command(),
            reset: default_reset_command(),
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            boot_delay_ms: default_boot_delay_ms(),
            run_delay_ms: default_run_delay_ms(),
        }
    }
}

impl ExperimentConfig {
    /// Retry policy for this experiment.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

impl WatchdogConfig {
    /// Deadline as a duration.
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.deadline_secs)
    }
}

impl FabricConfig {
    /// Redelivery delay as a duration.
    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert_eq!(config.experiment.max_retries, 3);
        assert_eq!(config.watchdog.deadline(), Duration::from_secs(1200));
        assert_eq!(config.fabric.host_topic, "host_topic");
        assert!(config.http.enabled);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[experiment]
name = "defender-sweep"
max_retries = 5
max_workers = 12
artifact = "ransom.exe"

[storage]
database = "/data/fleet.db"

[watchdog]
deadline_secs = 600

[fabric]
host_topic = "events"
redelivery_delay_ms = 250

[http]
enabled = false

[compute]
reset = ["virsh", "reset", "{name}"]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.experiment.name, "defender-sweep");
        assert_eq!(config.experiment.retry_policy().max_retries(), 5);
        assert_eq!(config.experiment.max_workers, 12);
        assert_eq!(config.storage.database, PathBuf::from("/data/fleet.db"));
        assert_eq!(config.watchdog.deadline_secs, 600);
        assert_eq!(config.fabric.redelivery_delay(), Duration::from_millis(250));
        assert_eq!(config.fabric.consumer_concurrency, 16);
        assert!(!config.http.enabled);
        assert_eq!(config.compute.reset, vec!["virsh", "reset", "{name}"]);
        assert_eq!(config.compute.create[0], "gcloud");
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[experiment]
[storage]
[watchdog]
[fabric]
[http]
[compute]
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.experiment.name, "default");
        assert_eq!(config.experiment.max_workers, 4);
        assert_eq!(config.storage.database, PathBuf::from("fleet.db"));
        assert_eq!(config.simulation.boot_delay_ms, 50);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let toml = r#"
[experiment]
name = "only-experiment"
"#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.experiment.name, "only-experiment");
        assert_eq!(config.watchdog.deadline_secs, 1200);
        assert_eq!(config.fabric.host_topic, "host_topic");
        assert_eq!(config.http.bind_address, "0.0.0.0:8080");
        assert_eq!(config.compute.delete[0], "gcloud");

        let empty: Config = toml::from_str("").unwrap();
        assert_eq!(empty.experiment.name, "default");
        assert_eq!(empty.storage.database, PathBuf::from("fleet.db"));
    }

    #[test]
    fn from_file_reports_path_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");

        let err = Config::from_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
        assert!(err.to_string().contains("missing.toml"));

        std::fs::write(&path, "[experiment\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
