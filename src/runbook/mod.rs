//! Runbook resolution and execution.
//!
//! A runbook is the executable behind a mapped action: either a file already
//! on the host, or a script fetched from a GitHub repository and staged into
//! a temporary file. [`ScriptExecutor`] implements both; the [`RunbookExecutor`]
//! trait is the seam jobs are tested through.
//!
//! Execution spawns the runbook as a child process with the raw message body
//! as its single argument and the mapping's `KEY=VALUE` environment variables
//! exported. Stdout and stderr are captured in full; interpretation of a
//! non-empty stderr is the job's business, not ours.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

use crate::config::{ActionSource, MappedAction};

/// Errors from fetching or running a runbook.
#[derive(Debug, Error)]
pub enum RunbookError {
    /// The runbook process could not be spawned.
    #[error("could not execute runbook {}: {source}", path.display())]
    Spawn {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The runbook ran but exited non-zero.
    #[error("runbook exited with {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    /// The runbook was killed by a signal before exiting.
    #[error("runbook terminated by signal: {stderr}")]
    Terminated { stderr: String },

    /// Fetching a remote runbook failed.
    #[error("could not fetch runbook {owner}/{repo}/{path}: {details}")]
    Fetch {
        owner: String,
        repo: String,
        path: String,
        details: String,
    },

    /// Staging a fetched runbook to disk failed.
    #[error("could not stage runbook: {0}")]
    Stage(#[from] std::io::Error),
}

/// Result type for runbook operations.
pub type Result<T> = std::result::Result<T, RunbookError>;

/// Captured output of a completed (exit status zero) runbook run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs the runbook behind a mapped action.
pub trait RunbookExecutor: Send + Sync + 'static {
    /// Resolves and executes the action's runbook, passing the raw message
    /// body as the script's argument.
    fn run(
        &self,
        action: &MappedAction,
        payload: &str,
    ) -> impl Future<Output = Result<ExecutionOutput>> + Send;
}

/// Monotonic counter for staged-script filenames within this process.
static STAGE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// The production executor: local files run in place, GitHub scripts are
/// staged into the system temp directory first.
#[derive(Debug, Clone, Default)]
pub struct ScriptExecutor;

impl ScriptExecutor {
    pub fn new() -> Self {
        ScriptExecutor
    }

    async fn fetch_github(
        &self,
        owner: &str,
        repo: &str,
        file_path: &str,
        token: &str,
    ) -> Result<String> {
        let fetch_error = |details: String| RunbookError::Fetch {
            owner: owner.to_string(),
            repo: repo.to_string(),
            path: file_path.to_string(),
            details,
        };

        let client = {
            let mut builder = octocrab::Octocrab::builder();
            if !token.is_empty() {
                builder = builder.personal_token(token.to_string());
            }
            builder.build().map_err(|e| fetch_error(e.to_string()))?
        };

        let contents = client
            .repos(owner, repo)
            .get_content()
            .path(file_path)
            .send()
            .await
            .map_err(|e| fetch_error(e.to_string()))?;

        contents
            .items
            .into_iter()
            .next()
            .and_then(|item| item.decoded_content())
            .ok_or_else(|| fetch_error("file has no decodable content".to_string()))
    }

    /// Writes fetched script content into an executable temp file.
    ///
    /// Filenames embed the pid and a process-local counter so concurrent
    /// stages never collide.
    async fn stage(&self, file_path: &str, content: &str) -> Result<PathBuf> {
        let stem = Path::new(file_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("runbook");
        let staged = std::env::temp_dir().join(format!(
            "marid-{}-{}-{}",
            std::process::id(),
            STAGE_COUNTER.fetch_add(1, Ordering::Relaxed),
            stem,
        ));

        tokio::fs::write(&staged, content).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o700)).await?;
        }

        trace!(path = %staged.display(), "Staged remote runbook");
        Ok(staged)
    }

    async fn execute(
        &self,
        path: &Path,
        payload: &str,
        environment_variables: &[String],
    ) -> Result<ExecutionOutput> {
        let mut command = Command::new(path);
        command.arg(payload);
        for pair in environment_variables {
            if let Some((key, value)) = pair.split_once('=') {
                command.env(key, value);
            }
        }

        debug!(path = %path.display(), "Executing runbook");
        let output = command.output().await.map_err(|source| RunbookError::Spawn {
            path: path.to_path_buf(),
            source,
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            return Err(match output.status.code() {
                Some(code) => RunbookError::NonZeroExit { code, stderr },
                None => RunbookError::Terminated { stderr },
            });
        }

        Ok(ExecutionOutput { stdout, stderr })
    }
}

impl RunbookExecutor for ScriptExecutor {
    async fn run(&self, action: &MappedAction, payload: &str) -> Result<ExecutionOutput> {
        match &action.source {
            ActionSource::Local { file_path } => {
                self.execute(file_path, payload, &action.environment_variables)
                    .await
            }
            ActionSource::GitHub {
                owner,
                repo,
                file_path,
                token,
            } => {
                let content = self.fetch_github(owner, repo, file_path, token).await?;
                let staged = self.stage(file_path, &content).await?;
                let result = self
                    .execute(&staged, payload, &action.environment_variables)
                    .await;
                // Best-effort cleanup of the staged script.
                let _ = tokio::fs::remove_file(&staged).await;
                result
            }
        }
    }
}
