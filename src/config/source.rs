//! Configuration source resolution.
//!
//! The daemon reads *where* its configuration lives from the environment,
//! once, at startup. The result is an explicit [`ConfigSource`] union rather
//! than ambient environment lookups scattered through the code; everything
//! downstream of this module takes the resolved value.
//!
//! | Variable | Effect |
//! |---|---|
//! | `MARIDCONFSOURCE` | `local` or `github` |
//! | `MARIDCONFLOCALFILEPATH` | local path; defaults to `$HOME/.opsgenie/maridConfig.json` |
//! | `MARIDCONFGITHUBOWNER` / `…REPO` / `…FILEPATH` / `…TOKEN` | remote coordinates |

use std::path::PathBuf;

use super::{ConfigError, Result};

const ENV_SOURCE: &str = "MARIDCONFSOURCE";
const ENV_LOCAL_PATH: &str = "MARIDCONFLOCALFILEPATH";
const ENV_GITHUB_OWNER: &str = "MARIDCONFGITHUBOWNER";
const ENV_GITHUB_REPO: &str = "MARIDCONFGITHUBREPO";
const ENV_GITHUB_FILEPATH: &str = "MARIDCONFGITHUBFILEPATH";
const ENV_GITHUB_TOKEN: &str = "MARIDCONFGITHUBTOKEN";

/// Default config location relative to `$HOME`.
const DEFAULT_LOCAL_SUFFIX: &str = ".opsgenie/maridConfig.json";

/// Where the daemon's configuration file lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A file on the local filesystem.
    Local { path: PathBuf },

    /// A file in a GitHub repository.
    GitHub {
        owner: String,
        repo: String,
        file_path: String,
        token: String,
    },
}

impl ConfigSource {
    /// Resolves the source from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Resolves the source from an arbitrary variable lookup.
    ///
    /// [`from_env`] delegates here; tests inject a closure instead of
    /// mutating the process environment.
    ///
    /// [`from_env`]: ConfigSource::from_env
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let source = lookup(ENV_SOURCE).unwrap_or_default();
        match source.as_str() {
            "local" => {
                let path = match lookup(ENV_LOCAL_PATH).filter(|p| !p.is_empty()) {
                    Some(p) => PathBuf::from(p),
                    None => {
                        let home = lookup("HOME").ok_or(ConfigError::HomeNotSet)?;
                        PathBuf::from(home).join(DEFAULT_LOCAL_SUFFIX)
                    }
                };
                Ok(ConfigSource::Local { path })
            }
            "github" => {
                let required = |name: &'static str| -> Result<String> {
                    lookup(name)
                        .filter(|v| !v.is_empty())
                        .ok_or(ConfigError::MissingEnv(name))
                };
                Ok(ConfigSource::GitHub {
                    owner: required(ENV_GITHUB_OWNER)?,
                    repo: required(ENV_GITHUB_REPO)?,
                    file_path: required(ENV_GITHUB_FILEPATH)?,
                    token: lookup(ENV_GITHUB_TOKEN).unwrap_or_default(),
                })
            }
            other => Err(ConfigError::UnknownSource(other.to_string())),
        }
    }
}
