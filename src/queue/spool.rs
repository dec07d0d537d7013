//! A file-backed queue provider for local development and testing.
//!
//! Messages are JSON files dropped into a spool directory, one message per
//! `<id>.json` file. Receiving claims a file by renaming it to `<id>.json.proc`
//! so other consumers (and later receives) skip it, with the claim expiring
//! after the requested visibility timeout; deleting removes the claimed file;
//! releasing (`visibility = 0`) renames it back. Orphaned `.proc` files from
//! a crashed run are renamed back when the provider is created, before any
//! receive can race with the sweep.
//!
//! This emulates cloud visibility-timeout semantics closely enough to run
//! the full pipeline against a directory; production deployments inject a
//! real transport instead.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::types::{MessageId, QueueUrl, ReceiptHandle, Region};

use super::message::Message;
use super::provider::{AssumeRoleResult, ProviderError, QueueMetadata, QueueProvider, Result};

/// Extension marking a claimed (in-flight) message file.
const PROC_SUFFIX: &str = "json.proc";

/// A claim on one message file.
struct Claim {
    proc_path: PathBuf,
    expires_at: Instant,
}

/// File-backed [`QueueProvider`].
pub struct FileQueueProvider {
    dir: PathBuf,
    metadata: QueueMetadata,

    /// Live claims keyed by message id. Claims lost in a crash are recovered
    /// by the startup sweep in [`FileQueueProvider::open`].
    claims: StdMutex<HashMap<String, Claim>>,
}

impl FileQueueProvider {
    /// Opens a spool directory as a queue, creating it if needed and
    /// releasing any claims left behind by a previous run.
    pub fn open(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;

        // Recover interrupted claims: a .proc file without a live claim is
        // from a crashed run and must become receivable again.
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path_has_proc_suffix(&path) {
                let released = payload_path_for(&path);
                warn!(
                    path = %path.display(),
                    "Releasing interrupted claim from previous run"
                );
                std::fs::rename(&path, &released)?;
            }
        }

        let metadata = QueueMetadata::new(
            Region::new("local"),
            QueueUrl::new(format!("file://{}", dir.display())),
            None,
        );

        Ok(FileQueueProvider {
            dir,
            metadata,
            claims: StdMutex::new(HashMap::new()),
        })
    }

    /// Renames expired claims back to receivable payload files.
    fn sweep_expired_claims(&self) {
        let now = Instant::now();
        let mut claims = self.claims.lock().unwrap();
        claims.retain(|id, claim| {
            if claim.expires_at > now {
                return true;
            }
            let released = payload_path_for(&claim.proc_path);
            match std::fs::rename(&claim.proc_path, &released) {
                Ok(()) => debug!(message_id = %id, "Visibility timeout elapsed, message released"),
                // The file may already be deleted; nothing to release then.
                Err(e) => trace!(message_id = %id, error = %e, "Could not release expired claim"),
            }
            false
        });
    }

    fn release_claim(&self, message_id: &str) -> Result<()> {
        let claim = self.claims.lock().unwrap().remove(message_id);
        let Some(claim) = claim else {
            return Err(ProviderError::Transport(format!(
                "no claim held for message [{message_id}]"
            )));
        };
        let released = payload_path_for(&claim.proc_path);
        std::fs::rename(&claim.proc_path, &released)
            .map_err(|e| ProviderError::Transport(e.to_string()))
    }
}

fn path_has_proc_suffix(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.ends_with(&format!(".{PROC_SUFFIX}")))
}

/// `<id>.json.proc` → `<id>.json`.
fn payload_path_for(proc_path: &Path) -> PathBuf {
    proc_path.with_extension("")
}

impl QueueProvider for FileQueueProvider {
    async fn receive_message(&self, max: i64, visibility_timeout: i64) -> Result<Vec<Message>> {
        self.sweep_expired_claims();

        let mut payload_paths: Vec<PathBuf> = std::fs::read_dir(&self.dir)
            .map_err(|e| ProviderError::Transport(e.to_string()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension().is_some_and(|e| e == "json") && !path_has_proc_suffix(path)
            })
            .collect();
        payload_paths.sort();

        let mut messages = Vec::new();
        for path in payload_paths.into_iter().take(max.max(0) as usize) {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };

            let proc_path = path.with_extension(PROC_SUFFIX);
            // The rename is the claim: losing the race to another consumer
            // just skips the file.
            if std::fs::rename(&path, &proc_path).is_err() {
                continue;
            }

            let body = match std::fs::read_to_string(&proc_path) {
                Ok(body) => body,
                Err(e) => {
                    warn!(path = %proc_path.display(), error = %e, "Could not read claimed message");
                    let _ = std::fs::rename(&proc_path, &path);
                    continue;
                }
            };

            self.claims.lock().unwrap().insert(
                stem.clone(),
                Claim {
                    proc_path: proc_path.clone(),
                    expires_at: Instant::now()
                        + Duration::from_secs(visibility_timeout.max(0) as u64),
                },
            );

            messages.push(Message::new(
                MessageId::new(stem),
                ReceiptHandle::new(proc_path.to_string_lossy().into_owned()),
                body,
            ));
        }

        Ok(messages)
    }

    async fn delete_message(&self, message: &Message) -> Result<()> {
        let claim = self
            .claims
            .lock()
            .unwrap()
            .remove(message.message_id.as_str());
        let proc_path = claim
            .map(|c| c.proc_path)
            .unwrap_or_else(|| PathBuf::from(message.receipt_handle.as_str()));
        std::fs::remove_file(&proc_path).map_err(|e| ProviderError::Transport(e.to_string()))
    }

    async fn change_message_visibility(&self, message: &Message, seconds: i64) -> Result<()> {
        if seconds <= 0 {
            return self.release_claim(message.message_id.as_str());
        }

        let mut claims = self.claims.lock().unwrap();
        match claims.get_mut(message.message_id.as_str()) {
            Some(claim) => {
                claim.expires_at = Instant::now() + Duration::from_secs(seconds as u64);
                Ok(())
            }
            None => Err(ProviderError::Transport(format!(
                "no claim held for message [{}]",
                message.message_id
            ))),
        }
    }

    fn refresh_client(&self, _assume_role_result: AssumeRoleResult) -> Result<()> {
        // File queues carry no credentials; accept and ignore.
        Ok(())
    }

    fn is_token_expired(&self) -> bool {
        false
    }

    fn metadata(&self) -> QueueMetadata {
        self.metadata.clone()
    }
}
