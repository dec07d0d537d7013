//! Configuration loaders for the supported sources.
//!
//! A [`ConfigLoader`] turns a resolved [`ConfigSource`] into a validated
//! [`Configuration`]. The trait exists so the supervisor can be constructed
//! against a mock loader in tests; production code goes through
//! [`load_from_source`].

use std::future::Future;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::source::ConfigSource;
use super::{ConfigError, Configuration, Result};

/// Loads the daemon configuration from wherever it lives.
pub trait ConfigLoader {
    /// Reads, parses, and validates the configuration.
    fn load(&self) -> impl Future<Output = Result<Configuration>> + Send;
}

/// Loads and validates the configuration for a resolved source.
pub async fn load_from_source(source: &ConfigSource) -> Result<Configuration> {
    match source {
        ConfigSource::Local { path } => LocalConfigLoader::new(path.clone()).load().await,
        ConfigSource::GitHub {
            owner,
            repo,
            file_path,
            token,
        } => {
            GitHubConfigLoader::new(owner, repo, file_path, token)
                .load()
                .await
        }
    }
}

/// Parses configuration text as YAML or JSON, keyed by the file extension.
///
/// Files without a `.yaml`/`.yml` extension are treated as JSON.
fn parse(path: &Path, text: &str) -> Result<Configuration> {
    let is_yaml = matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    );
    let conf: Configuration = if is_yaml {
        serde_yaml::from_str(text)?
    } else {
        serde_json::from_str(text)?
    };
    conf.validate()?;
    Ok(conf)
}

/// Reads the configuration from a local file.
#[derive(Debug, Clone)]
pub struct LocalConfigLoader {
    path: PathBuf,
}

impl LocalConfigLoader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        LocalConfigLoader { path: path.into() }
    }
}

impl ConfigLoader for LocalConfigLoader {
    async fn load(&self) -> Result<Configuration> {
        debug!(path = %self.path.display(), "Reading local configuration");
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ConfigError::Read {
                path: self.path.clone(),
                source,
            })?;
        let conf = parse(&self.path, &text)?;
        info!(path = %self.path.display(), "Loaded configuration");
        Ok(conf)
    }
}

/// Fetches the configuration file from a GitHub repository.
#[derive(Debug, Clone)]
pub struct GitHubConfigLoader {
    owner: String,
    repo: String,
    file_path: String,
    token: String,
}

impl GitHubConfigLoader {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        file_path: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        GitHubConfigLoader {
            owner: owner.into(),
            repo: repo.into(),
            file_path: file_path.into(),
            token: token.into(),
        }
    }

    fn fetch_error(&self, details: impl ToString) -> ConfigError {
        ConfigError::Fetch {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            path: self.file_path.clone(),
            details: details.to_string(),
        }
    }
}

impl ConfigLoader for GitHubConfigLoader {
    async fn load(&self) -> Result<Configuration> {
        debug!(
            owner = %self.owner,
            repo = %self.repo,
            path = %self.file_path,
            "Fetching configuration from GitHub"
        );

        let client = {
            let mut builder = octocrab::Octocrab::builder();
            if !self.token.is_empty() {
                builder = builder.personal_token(self.token.clone());
            }
            builder.build().map_err(|e| self.fetch_error(e))?
        };

        let contents = client
            .repos(&self.owner, &self.repo)
            .get_content()
            .path(&self.file_path)
            .send()
            .await
            .map_err(|e| self.fetch_error(e))?;

        let text = contents
            .items
            .into_iter()
            .next()
            .and_then(|item| item.decoded_content())
            .ok_or_else(|| self.fetch_error("file has no decodable content"))?;

        let conf = parse(Path::new(&self.file_path), &text)?;
        info!(
            owner = %self.owner,
            repo = %self.repo,
            path = %self.file_path,
            "Loaded configuration"
        );
        Ok(conf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, contents: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(suffix)
            .tempfile()
            .unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[tokio::test]
    async fn loads_json_configuration() {
        let file = write_temp(
            ".json",
            r#"{
                "apiKey": "k",
                "baseUrl": "https://api.example.com",
                "actionMappings": {
                    "restart": {"source": "local", "filePath": "/opt/restart.sh"}
                }
            }"#,
        );

        let conf = LocalConfigLoader::new(file.path()).load().await.unwrap();
        assert_eq!(conf.api_key, "k");
        assert_eq!(conf.action_mappings.len(), 1);
    }

    #[tokio::test]
    async fn loads_yaml_configuration() {
        let file = write_temp(
            ".yaml",
            concat!(
                "apiKey: k\n",
                "baseUrl: https://api.example.com\n",
                "actionMappings:\n",
                "  restart:\n",
                "    source: local\n",
                "    filePath: /opt/restart.sh\n",
                "pollerConf:\n",
                "  pollingWaitIntervalInMillis: 250\n",
            ),
        );

        let conf = LocalConfigLoader::new(file.path()).load().await.unwrap();
        assert_eq!(conf.base_url, "https://api.example.com");
        assert_eq!(
            conf.poller_conf.polling_wait_interval,
            std::time::Duration::from_millis(250)
        );
    }

    #[tokio::test]
    async fn missing_file_is_a_read_error() {
        let err = LocalConfigLoader::new("/nonexistent/marid.json")
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn invalid_configuration_fails_validation() {
        let file = write_temp(".json", r#"{"apiKey": "k", "baseUrl": "u"}"#);
        let err = LocalConfigLoader::new(file.path()).load().await.unwrap_err();
        assert!(matches!(err, ConfigError::NoActionMappings));
    }
}
