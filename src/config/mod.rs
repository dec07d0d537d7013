//! Daemon configuration: action mappings plus poller and pool tuning.
//!
//! The configuration is loaded once at startup (from a local file or a
//! GitHub-hosted file, see [`source`] and [`loader`]) and is immutable
//! afterwards. Workers only ever read the published `actionMappings` map.
//!
//! The on-disk format is the integration's historical wire format: camelCase
//! keys, durations spelled out as `…InMillis` fields, and a flat
//! `MappedAction` object whose meaningful fields depend on its `source`.
//! Unknown keys are ignored.

pub mod loader;
pub mod source;

pub use loader::{ConfigLoader, GitHubConfigLoader, LocalConfigLoader, load_from_source};
pub use source::ConfigSource;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::types::ActionName;

/// Errors raised while resolving, loading, or validating configuration.
///
/// Every variant is fatal at startup: the process logs the error and exits
/// non-zero.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `MARIDCONFSOURCE` held something other than `local` or `github`.
    #[error("unknown configuration source [{0}]")]
    UnknownSource(String),

    /// A required environment variable for the selected source was not set.
    #[error("environment variable {0} is required but not set")]
    MissingEnv(&'static str),

    /// The default local config path needs `$HOME`, which was not set.
    #[error("cannot resolve default configuration path: HOME is not set")]
    HomeNotSet,

    /// Reading the local configuration file failed.
    #[error("could not read configuration file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Fetching the configuration file from GitHub failed.
    #[error("could not fetch configuration from GitHub ({owner}/{repo}/{path}): {details}")]
    Fetch {
        owner: String,
        repo: String,
        path: String,
        details: String,
    },

    /// The configuration file was not valid JSON.
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration file was not valid YAML.
    #[error("configuration is not valid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// `actionMappings` was missing or empty.
    #[error("action mappings are not found in the configuration")]
    NoActionMappings,

    /// `apiKey` was missing or empty.
    #[error("apiKey is not found in the configuration")]
    MissingApiKey,

    /// `baseUrl` was missing or empty.
    #[error("baseUrl is not found in the configuration")]
    MissingBaseUrl,

    /// A mapped action's fields do not match its declared source.
    #[error("invalid mapping for action [{action}]: {reason}")]
    InvalidMapping { action: String, reason: String },

    /// Pool sizes violate `0 <= min <= max`.
    #[error("invalid pool sizes: min={min}, max={max}")]
    InvalidPoolSizes { min: u32, max: u32 },

    /// Visibility timeout must be positive.
    #[error("visibilityTimeoutInSeconds must be positive, got {0}")]
    InvalidVisibilityTimeout(i64),

    /// `maxNumberOfMessages` outside the transport's `1..=10` window.
    #[error("maxNumberOfMessages must be within 1..=10, got {0}")]
    InvalidMaxNumberOfMessages(i64),
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Where a mapped action's runbook comes from.
///
/// Exactly one variant's fields are meaningful per mapping; the flat wire
/// format is normalised into this union during deserialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSource {
    /// An executable file on the local host.
    Local { file_path: PathBuf },

    /// A script stored in a GitHub repository, fetched before execution.
    GitHub {
        owner: String,
        repo: String,
        file_path: String,
        token: String,
    },
}

/// One entry of `actionMappings`: how to obtain and run an action's runbook.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMappedAction")]
pub struct MappedAction {
    /// Where the runbook comes from.
    pub source: ActionSource,

    /// Extra `KEY=VALUE` pairs exported into the runbook's environment.
    pub environment_variables: Vec<String>,
}

/// The flat wire shape of a mapped action, as written in config files.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawMappedAction {
    source: String,
    file_path: String,
    repo_owner: String,
    repo_name: String,
    repo_file_path: String,
    repo_token: String,
    environment_variables: Vec<String>,
}

impl TryFrom<RawMappedAction> for MappedAction {
    type Error = String;

    fn try_from(raw: RawMappedAction) -> std::result::Result<Self, Self::Error> {
        let source = match raw.source.as_str() {
            "local" => {
                if raw.file_path.is_empty() {
                    return Err("local action requires filePath".to_string());
                }
                ActionSource::Local {
                    file_path: PathBuf::from(raw.file_path),
                }
            }
            "github" => {
                if raw.repo_owner.is_empty() || raw.repo_name.is_empty() {
                    return Err("github action requires repoOwner and repoName".to_string());
                }
                if raw.repo_file_path.is_empty() {
                    return Err("github action requires repoFilePath".to_string());
                }
                ActionSource::GitHub {
                    owner: raw.repo_owner,
                    repo: raw.repo_name,
                    file_path: raw.repo_file_path,
                    token: raw.repo_token,
                }
            }
            other => return Err(format!("unknown action source [{other}]")),
        };

        Ok(MappedAction {
            source,
            environment_variables: raw.environment_variables,
        })
    }
}

fn millis<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}

/// Default poller wait between empty polls (100 ms).
const DEFAULT_POLLING_WAIT_MS: u64 = 100;

/// Default visibility timeout handed to the transport (30 s).
const DEFAULT_VISIBILITY_TIMEOUT_SECS: i64 = 30;

/// Default (and transport maximum) receive batch size.
const DEFAULT_MAX_NUMBER_OF_MESSAGES: i64 = 10;

/// Tuning for a poller's receive loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollerConf {
    /// Pause between polls when the previous poll found no work.
    #[serde(rename = "pollingWaitIntervalInMillis", deserialize_with = "millis")]
    pub polling_wait_interval: Duration,

    /// Visibility timeout requested on every receive, in seconds.
    pub visibility_timeout_in_seconds: i64,

    /// Upper bound on messages requested per receive; the live bound is the
    /// minimum of this and the pool's available-worker hint.
    pub max_number_of_messages: i64,
}

impl Default for PollerConf {
    fn default() -> Self {
        PollerConf {
            polling_wait_interval: Duration::from_millis(DEFAULT_POLLING_WAIT_MS),
            visibility_timeout_in_seconds: DEFAULT_VISIBILITY_TIMEOUT_SECS,
            max_number_of_messages: DEFAULT_MAX_NUMBER_OF_MESSAGES,
        }
    }
}

/// Default minimum pool size.
const DEFAULT_MIN_WORKERS: u32 = 2;

/// Default maximum pool size.
const DEFAULT_MAX_WORKERS: u32 = 12;

/// Default bounded submission-queue length.
const DEFAULT_QUEUE_SIZE: usize = 16;

/// Default idle lifetime before a worker above the minimum retires (6 s).
const DEFAULT_KEEP_ALIVE_MS: u64 = 6_000;

/// Default cadence of the pool monitor (15 s).
const DEFAULT_MONITORING_PERIOD_MS: u64 = 15_000;

/// Tuning for a poller's elastic worker pool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PoolConf {
    /// Workers kept alive even when idle.
    #[serde(rename = "minNumberOfWorker")]
    pub min: u32,

    /// Hard ceiling on concurrent workers.
    #[serde(rename = "maxNumberOfWorker")]
    pub max: u32,

    /// Length of the bounded submission queue. A value of 0 is treated as 1:
    /// the underlying channel cannot be zero-capacity.
    pub queue_size: usize,

    /// Idle time after which a worker above `min` retires.
    #[serde(rename = "keepAliveTimeInMillis", deserialize_with = "millis")]
    pub keep_alive: Duration,

    /// How often the pool monitor checks utilisation and replaces dead
    /// workers below `min`.
    #[serde(rename = "monitoringPeriodInMillis", deserialize_with = "millis")]
    pub monitoring_period: Duration,
}

impl Default for PoolConf {
    fn default() -> Self {
        PoolConf {
            min: DEFAULT_MIN_WORKERS,
            max: DEFAULT_MAX_WORKERS,
            queue_size: DEFAULT_QUEUE_SIZE,
            keep_alive: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            monitoring_period: Duration::from_millis(DEFAULT_MONITORING_PERIOD_MS),
        }
    }
}

/// Minimum log level for the daemon, set from the configuration file.
///
/// `RUST_LOG` overrides this when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The daemon's full configuration. Immutable after [`validate`] passes.
///
/// [`validate`]: Configuration::validate
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Configuration {
    /// API key for the upstream result sink.
    pub api_key: String,

    /// Base URL of the upstream result sink.
    pub base_url: String,

    /// Action name to runbook mapping. Published once, read by every worker.
    pub action_mappings: HashMap<ActionName, MappedAction>,

    /// Poller tuning.
    pub poller_conf: PollerConf,

    /// Worker pool tuning.
    pub pool_conf: PoolConf,

    /// Default log level when `RUST_LOG` is unset.
    pub log_level: LogLevel,
}

impl Configuration {
    /// Checks the invariants the rest of the daemon relies on.
    ///
    /// Called by the loaders after parsing; a failure here aborts startup.
    pub fn validate(&self) -> Result<()> {
        if self.action_mappings.is_empty() {
            return Err(ConfigError::NoActionMappings);
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.base_url.is_empty() {
            return Err(ConfigError::MissingBaseUrl);
        }
        if self.pool_conf.min > self.pool_conf.max {
            return Err(ConfigError::InvalidPoolSizes {
                min: self.pool_conf.min,
                max: self.pool_conf.max,
            });
        }
        if self.poller_conf.visibility_timeout_in_seconds <= 0 {
            return Err(ConfigError::InvalidVisibilityTimeout(
                self.poller_conf.visibility_timeout_in_seconds,
            ));
        }
        let max_messages = self.poller_conf.max_number_of_messages;
        if !(1..=10).contains(&max_messages) {
            return Err(ConfigError::InvalidMaxNumberOfMessages(max_messages));
        }
        Ok(())
    }
}
