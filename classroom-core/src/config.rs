//! Configuration management for the provisioner
//!
//! Configuration is loaded with the following priority (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (CLASSROOM_*)
//! 3. Config file (~/.config/classroom/config.toml)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::jobs::Backoff;
use crate::{Error, Result};

/// Requests one provisioning job issues in the worst case for a student or a
/// group with a team: create, lookup after a name conflict, access, starter
/// code and a deferred delete, with headroom. Team-less groups add one
/// collaborator request per member.
pub const REQUESTS_PER_JOB: u32 = 8;

/// GitHub connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GitHubConfig {
    /// Base URL of the REST API
    pub api_url: String,

    /// Login of the organization repositories are created under
    pub organization: Option<String>,

    /// Numeric id of that organization
    pub organization_id: Option<u64>,

    /// Timeout applied to every API request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Stop issuing calls when fewer than this many remain in the rate-limit window
    pub rate_limit_buffer: u32,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.github.com".to_string(),
            organization: None,
            organization_id: None,
            request_timeout: Duration::from_secs(30),
            rate_limit_buffer: 50,
        }
    }
}

/// Queue retry settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Attempts before a job is moved to the dead state
    pub max_attempts: u32,

    /// Delay before the first retry; doubled on every attempt
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,

    /// Upper bound for the retry delay
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,

    /// How long a reserved job stays invisible to other workers
    #[serde(with = "humantime_serde")]
    pub lease: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(600),
            lease: Duration::from_secs(300),
        }
    }
}

impl QueueConfig {
    /// Retry backoff described by this section
    pub fn backoff(&self) -> Backoff {
        Backoff {
            max_attempts: self.max_attempts,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
        }
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub concurrency: usize,

    /// Sleep between polls when the queue is empty
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Database settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite file
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("classroom")
                .join("classroom.db"),
        }
    }
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub github: GitHubConfig,
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub database: DatabaseConfig,
}

impl Config {
    /// Load configuration from the default config file location
    ///
    /// Returns default config if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = Self::default_config_path() {
            if path.exists() {
                return Self::load_from_file(&path);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(Error::Io)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings under which a healthy job can outlive its lease
    pub fn validate(&self) -> Result<()> {
        let worst_case = self.github.request_timeout * REQUESTS_PER_JOB;
        if self.queue.lease <= worst_case {
            return Err(Error::Config(format!(
                "queue.lease ({:?}) must exceed github.request_timeout x {} ({:?})",
                self.queue.lease, REQUESTS_PER_JOB, worst_case
            )));
        }
        Ok(())
    }

    /// Get the default config file path
    ///
    /// Returns `~/.config/classroom/config.toml` on Unix
    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("classroom").join("config.toml"))
    }

    /// Apply environment variable overrides
    ///
    /// Supported variables:
    /// - CLASSROOM_GITHUB_API_URL
    /// - CLASSROOM_ORGANIZATION
    /// - CLASSROOM_ORGANIZATION_ID
    /// - CLASSROOM_DATABASE
    /// - CLASSROOM_WORKERS
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("CLASSROOM_GITHUB_API_URL") {
            self.github.api_url = url;
        }

        if let Ok(org) = std::env::var("CLASSROOM_ORGANIZATION") {
            self.github.organization = Some(org);
        }

        if let Some(id) = std::env::var("CLASSROOM_ORGANIZATION_ID")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.github.organization_id = Some(id);
        }

        if let Ok(path) = std::env::var("CLASSROOM_DATABASE") {
            self.database.path = PathBuf::from(path);
        }

        if let Some(n) = std::env::var("CLASSROOM_WORKERS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.worker.concurrency = n;
        }

        self
    }

    /// Apply CLI flag overrides
    pub fn with_cli_overrides(mut self, database: Option<PathBuf>, workers: Option<usize>) -> Self {
        if let Some(path) = database {
            self.database.path = path;
        }

        if let Some(n) = workers {
            self.worker.concurrency = n;
        }

        self
    }

    /// Load configuration with all overrides applied
    ///
    /// Priority: CLI > env > config file > defaults
    pub fn load_with_overrides(database: Option<PathBuf>, workers: Option<usize>) -> Result<Self> {
        let config = Self::load()?
            .with_env_overrides()
            .with_cli_overrides(database, workers);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.github.api_url, "https://api.github.com");
        assert_eq!(config.queue.max_attempts, 5);
        assert_eq!(config.worker.concurrency, 4);
        assert!(config.github.organization.is_none());
    }

    #[test]
    fn test_cli_overrides() {
        let config =
            Config::default().with_cli_overrides(Some(PathBuf::from("/tmp/c.db")), Some(8));

        assert_eq!(config.database.path, PathBuf::from("/tmp/c.db"));
        assert_eq!(config.worker.concurrency, 8);
    }

    #[test]
    fn test_parse_toml_durations() {
        let toml = r#"
[github]
organization = "classroom-testing"
organization_id = 4223
request_timeout = "10s"

[queue]
max_attempts = 3
base_delay = "500ms"
max_delay = "2m"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.github.organization.as_deref(), Some("classroom-testing"));
        assert_eq!(config.github.organization_id, Some(4223));
        assert_eq!(config.github.request_timeout, Duration::from_secs(10));
        assert_eq!(config.queue.base_delay, Duration::from_millis(500));
        assert_eq!(config.queue.max_delay, Duration::from_secs(120));
        // untouched sections keep defaults
        assert_eq!(config.queue.lease, Duration::from_secs(300));
        assert_eq!(config.worker.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[worker]\nconcurrency = 2\n").unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.worker.concurrency, 2);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[worker\n").unwrap();

        let err = Config::load_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn test_lease_must_outlast_worst_case_job() {
        assert!(Config::default().validate().is_ok());

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[github]\nrequest_timeout = \"60s\"\n\n[queue]\nlease = \"5m\"\n",
        )
        .unwrap();
        let err = Config::load_from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("queue.lease"));

        std::fs::write(
            &path,
            "[github]\nrequest_timeout = \"60s\"\n\n[queue]\nlease = \"10m\"\n",
        )
        .unwrap();
        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.queue.lease, Duration::from_secs(600));
    }

    #[test]
    fn test_backoff_from_queue_config() {
        let backoff = QueueConfig::default().backoff();
        assert_eq!(backoff.max_attempts, 5);
        assert_eq!(backoff.base_delay, Duration::from_secs(3));
    }
}
