//! Orchestrator configuration
//!
//! Bind address, execution defaults, worker pool size and the locations of
//! executor profiles and secrets.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Prefix of host variables forwarded to every job (`ARCHWAY_ENV_REPOSITORY_URI` -> `REPOSITORY_URI`)
pub const SHARED_ENV_PREFIX: &str = "ARCHWAY_ENV_";

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP API listens on
    pub bind_addr: String,

    /// Deadline of one job attempt unless the stage sets its own
    pub default_job_timeout: Duration,

    /// Linear backoff step between attempts unless the stage sets its own
    pub default_retry_backoff: Duration,

    /// Jobs executing at once across all runs
    pub max_parallel_jobs: usize,

    /// Finished runs kept in memory before the oldest are evicted
    pub max_retained_runs: usize,

    /// Lua file describing executor profiles
    pub executor_profiles: Option<PathBuf>,

    /// Prefix of environment variables holding secrets
    pub secret_prefix: String,

    /// Environment injected into every job
    pub shared_env: BTreeMap<String, String>,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(bind_addr: String) -> Self {
        Self {
            bind_addr,
            default_job_timeout: Duration::from_secs(3600),
            default_retry_backoff: Duration::from_secs(5),
            max_parallel_jobs: 4,
            max_retained_runs: 100,
            executor_profiles: None,
            secret_prefix: "ARCHWAY_SECRET_".to_string(),
            shared_env: BTreeMap::new(),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables (all optional):
    /// - ORCHESTRATOR_BIND_ADDR (default: 0.0.0.0:8080)
    /// - DEFAULT_JOB_TIMEOUT (seconds, default: 3600)
    /// - DEFAULT_RETRY_BACKOFF (seconds, default: 5)
    /// - MAX_PARALLEL_JOBS (default: 4)
    /// - MAX_RETAINED_RUNS (default: 100)
    /// - EXECUTOR_PROFILES (path to a Lua profile file)
    /// - SECRET_PREFIX (default: ARCHWAY_SECRET_)
    /// - ARCHWAY_ENV_* (forwarded to every job without the prefix)
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();

        let bind_addr =
            std::env::var("ORCHESTRATOR_BIND_ADDR").unwrap_or(defaults.bind_addr);

        let default_job_timeout = std::env::var("DEFAULT_JOB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_job_timeout);

        let default_retry_backoff = std::env::var("DEFAULT_RETRY_BACKOFF")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.default_retry_backoff);

        let max_parallel_jobs = std::env::var("MAX_PARALLEL_JOBS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_parallel_jobs);

        let max_retained_runs = std::env::var("MAX_RETAINED_RUNS")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(defaults.max_retained_runs);

        let executor_profiles = std::env::var("EXECUTOR_PROFILES").ok().map(PathBuf::from);

        let secret_prefix = std::env::var("SECRET_PREFIX").unwrap_or(defaults.secret_prefix);

        Ok(Self {
            bind_addr,
            default_job_timeout,
            default_retry_backoff,
            max_parallel_jobs,
            max_retained_runs,
            executor_profiles,
            secret_prefix,
            shared_env: shared_env_from(std::env::vars()),
        })
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.default_job_timeout.as_secs() == 0 {
            anyhow::bail!("default_job_timeout must be greater than 0");
        }

        if self.max_parallel_jobs == 0 {
            anyhow::bail!("max_parallel_jobs must be greater than 0");
        }

        if self.secret_prefix.is_empty() {
            anyhow::bail!("secret_prefix cannot be empty");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("0.0.0.0:8080".to_string())
    }
}

/// Collects `ARCHWAY_ENV_*` variables with the prefix stripped
fn shared_env_from(vars: impl Iterator<Item = (String, String)>) -> BTreeMap<String, String> {
    vars.filter_map(|(key, value)| {
        key.strip_prefix(SHARED_ENV_PREFIX)
            .filter(|name| !name.is_empty())
            .map(|name| (name.to_string(), value))
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.default_job_timeout, Duration::from_secs(3600));
        assert_eq!(config.default_retry_backoff, Duration::from_secs(5));
        assert_eq!(config.max_parallel_jobs, 4);
        assert!(config.executor_profiles.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        config.max_parallel_jobs = 0;
        assert!(config.validate().is_err());
        config.max_parallel_jobs = 2;

        config.default_job_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
        config.default_job_timeout = Duration::from_secs(60);

        config.bind_addr = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_env_from() {
        let vars = vec![
            ("ARCHWAY_ENV_REPOSITORY_URI".to_string(), "123.dkr.ecr/springboot".to_string()),
            ("ARCHWAY_ENV_".to_string(), "ignored".to_string()),
            ("PATH".to_string(), "/usr/bin".to_string()),
        ];

        let env = shared_env_from(vars.into_iter());
        assert_eq!(env.len(), 1);
        assert_eq!(env["REPOSITORY_URI"], "123.dkr.ecr/springboot");
    }
}
