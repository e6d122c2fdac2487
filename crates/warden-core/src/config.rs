use std::collections::HashSet;
use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, WardenError};

/// Bounded wait applied to each poll of an in-flight invocation.
pub const DEFAULT_POLL_WINDOW_MS: u64 = 60_000;
pub const DEFAULT_LEASE_TTL_MS: u64 = 15_000;
pub const DEFAULT_RENEW_INTERVAL_MS: u64 = 5_000; // renew 3x per lease
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

/// Root of every per-job coordination path.
pub const JOB_PATH_PREFIX: &str = "/job";

/// Coordination path holding a job's serialized status record.
pub fn status_path(job_name: &str) -> String {
    format!("{JOB_PATH_PREFIX}/{job_name}/status")
}

/// Election group key for a job.
pub fn leader_path(job_name: &str) -> String {
    format!("{JOB_PATH_PREFIX}/{job_name}/leader")
}

/// Top-level config (warden.toml + WARDEN_* env overrides).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WardenConfig {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub election: ElectionConfig,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Candidate identity used in leader elections. Must be unique per process.
    #[serde(default = "default_node_id")]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file shared by every node of the cluster.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

impl StoreConfig {
    /// Create the directory that will hold the store file, if missing.
    pub fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = Path::new(&self.path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_poll_window_ms")]
    pub poll_window_ms: u64,
    /// When true, `cancel` also aborts an invocation that has already started.
    /// Abort takes effect at the job's next await point.
    #[serde(default)]
    pub interrupt_running: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            poll_window_ms: DEFAULT_POLL_WINDOW_MS,
            interrupt_running: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElectionConfig {
    #[serde(default = "default_lease_ttl_ms")]
    pub lease_ttl_ms: u64,
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            lease_ttl_ms: DEFAULT_LEASE_TTL_MS,
            renew_interval_ms: DEFAULT_RENEW_INTERVAL_MS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
        }
    }
}

/// A recurring job as declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Cluster-wide unique name; also the coordination path key.
    pub name: String,
    /// Shell command run via `sh -c` on each invocation.
    pub command: String,
    pub schedule: ScheduleSpec,
}

/// Serialised schedule policy definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScheduleSpec {
    /// Next run is `delay_ms` after the last completion.
    FixedDelay { delay_ms: u64 },

    /// Next run is `period_ms` after the last scheduled time.
    FixedRate { period_ms: u64 },

    /// Run every day at the given hour and minute (UTC).
    Daily { hour: u8, minute: u8 },
}

fn default_node_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
fn default_store_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.warden/warden.db", home)
}
fn default_poll_window_ms() -> u64 {
    DEFAULT_POLL_WINDOW_MS
}
fn default_lease_ttl_ms() -> u64 {
    DEFAULT_LEASE_TTL_MS
}
fn default_renew_interval_ms() -> u64 {
    DEFAULT_RENEW_INTERVAL_MS
}
fn default_retry_delay_ms() -> u64 {
    DEFAULT_RETRY_DELAY_MS
}

impl WardenConfig {
    /// Load config from a TOML file with WARDEN_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.warden/warden.toml
    ///
    /// Nested keys are addressed with a double underscore, e.g.
    /// `WARDEN_EXECUTOR__POLL_WINDOW_MS=5000`.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);
        debug!(%path, "loading config");

        let config: WardenConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("WARDEN_").split("__"))
            .extract()
            .map_err(|e| WardenError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject definitions that would break the one-group-per-job invariant or
    /// can never produce a schedule.
    pub fn validate(&self) -> Result<()> {
        if self.executor.poll_window_ms == 0 {
            return Err(WardenError::Config(
                "executor.poll_window_ms must be positive".to_string(),
            ));
        }
        if self.election.renew_interval_ms >= self.election.lease_ttl_ms {
            return Err(WardenError::Config(format!(
                "election.renew_interval_ms ({}) must be below lease_ttl_ms ({})",
                self.election.renew_interval_ms, self.election.lease_ttl_ms
            )));
        }

        let mut seen = HashSet::new();
        for job in &self.jobs {
            let invalid = |reason: &str| WardenError::InvalidJob {
                job: job.name.clone(),
                reason: reason.to_string(),
            };
            if job.name.is_empty() || job.name.contains('/') {
                return Err(invalid("name must be non-empty and must not contain '/'"));
            }
            if !seen.insert(job.name.as_str()) {
                return Err(invalid("duplicate job name"));
            }
            if job.command.trim().is_empty() {
                return Err(invalid("command is empty"));
            }
            if let ScheduleSpec::Daily { hour, minute } = job.schedule {
                if hour > 23 || minute > 59 {
                    return Err(invalid("daily schedule needs hour 0-23 and minute 0-59"));
                }
            }
        }
        Ok(())
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.warden/warden.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn job(name: &str, schedule: ScheduleSpec) -> JobConfig {
        JobConfig {
            name: name.to_string(),
            command: "true".to_string(),
            schedule,
        }
    }

    #[test]
    fn paths_are_keyed_by_job_name() {
        assert_eq!(status_path("nightly"), "/job/nightly/status");
        assert_eq!(leader_path("nightly"), "/job/nightly/leader");
    }

    #[test]
    fn defaults_are_valid() {
        let config = WardenConfig::default();
        assert_eq!(config.executor.poll_window_ms, 60_000);
        assert!(!config.executor.interrupt_running);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn load_reads_jobs_from_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[node]
id = "node-a"

[executor]
poll_window_ms = 5000

[[jobs]]
name = "nightly"
command = "echo hi"
schedule = {{ kind = "fixed_delay", delay_ms = 86400000 }}

[[jobs]]
name = "report"
command = "echo report"
schedule = {{ kind = "daily", hour = 3, minute = 30 }}
"#
        )
        .expect("write");

        let config = WardenConfig::load(file.path().to_str()).expect("load");
        assert_eq!(config.node.id, "node-a");
        assert_eq!(config.executor.poll_window_ms, 5000);
        assert_eq!(config.jobs.len(), 2);
        assert_eq!(
            config.jobs[0].schedule,
            ScheduleSpec::FixedDelay {
                delay_ms: 86_400_000
            }
        );
        assert_eq!(
            config.jobs[1].schedule,
            ScheduleSpec::Daily {
                hour: 3,
                minute: 30
            }
        );
        // untouched sections fall back to defaults
        assert_eq!(config.election.lease_ttl_ms, DEFAULT_LEASE_TTL_MS);
    }

    #[test]
    fn load_without_file_uses_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("absent.toml");
        let config = WardenConfig::load(missing.to_str()).expect("load");
        assert!(config.jobs.is_empty());
        assert_eq!(config.executor.poll_window_ms, DEFAULT_POLL_WINDOW_MS);
    }

    #[test]
    fn load_fails_on_invalid_jobs() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            r#"
[[jobs]]
name = "dup"
command = "true"
schedule = {{ kind = "fixed_delay", delay_ms = 1000 }}

[[jobs]]
name = "dup"
command = "true"
schedule = {{ kind = "fixed_rate", period_ms = 1000 }}
"#
        )
        .expect("write");

        let err = WardenConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
    }

    #[test]
    fn load_fails_on_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(file, "[[jobs]]\nname = \"x\"\nschedule = {{ kind = \"hourly\" }}").expect("write");

        let err = WardenConfig::load(file.path().to_str()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn duplicate_job_names_rejected() {
        let config = WardenConfig {
            jobs: vec![
                job("a", ScheduleSpec::FixedDelay { delay_ms: 1 }),
                job("a", ScheduleSpec::FixedRate { period_ms: 1 }),
            ],
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "INVALID_JOB");
    }

    #[test]
    fn slash_in_job_name_rejected() {
        let config = WardenConfig {
            jobs: vec![job("a/b", ScheduleSpec::FixedDelay { delay_ms: 1 })],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn daily_out_of_range_rejected() {
        let config = WardenConfig {
            jobs: vec![job("a", ScheduleSpec::Daily { hour: 24, minute: 0 })],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn renew_interval_must_be_below_ttl() {
        let mut config = WardenConfig::default();
        config.election.renew_interval_ms = config.election.lease_ttl_ms;
        assert_eq!(config.validate().unwrap_err().code(), "CONFIG_ERROR");
    }

    #[test]
    fn ensure_parent_dir_creates_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = StoreConfig {
            path: dir
                .path()
                .join("nested/deeper/warden.db")
                .to_string_lossy()
                .into_owned(),
        };
        store.ensure_parent_dir().expect("create");
        assert!(dir.path().join("nested/deeper").is_dir());
    }
}
