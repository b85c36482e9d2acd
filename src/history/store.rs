//! Durable snapshot store: one JSON file per user.
//!
//! Snapshots are whole-file overwrites inside a versioned envelope. The
//! store never appends; the in-memory window is the source of truth between
//! flushes. Read and write are async and are never called while the session
//! registry lock is held.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::window::Message;

const SNAPSHOT_VERSION: u32 = 1;

/// Snapshot store failures. Callers on the request path log these and fall
/// back to an empty window; they never surface to the chat user.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot for user {user_id}")]
    NotFound { user_id: String },

    #[error("snapshot i/o failed for user {user_id}: {source}")]
    Io {
        user_id: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot for user {user_id} is malformed: {source}")]
    Malformed {
        user_id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("snapshot for user {user_id} has unsupported version {version}")]
    UnsupportedVersion { user_id: String, version: u32 },
}

impl SnapshotError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SnapshotError::NotFound { .. })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    version: u32,
    user_id: String,
    saved_at: DateTime<Utc>,
    messages: Vec<Message>,
}

/// Platform user ids are opaque tokens, but they become file names; strip
/// anything that could walk out of the snapshot directory.
fn sanitize_user_id(user_id: &str) -> String {
    let cleaned: String = user_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

/// Whole-snapshot persistence for conversation windows, one file per user.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    base_dir: PathBuf,
}

impl SnapshotStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Create the snapshot directory. Failure here is the one fatal storage
    /// condition: the process should not start without a place to flush.
    pub async fn ensure_base_dir(&self) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.base_dir).await
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn path_for(&self, user_id: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.json", sanitize_user_id(user_id)))
    }

    /// Serialize the full window to the user's snapshot file, overwriting
    /// any previous snapshot and creating parent directories as needed.
    pub async fn write(&self, user_id: &str, messages: &[Message]) -> Result<(), SnapshotError> {
        let envelope = SnapshotEnvelope {
            version: SNAPSHOT_VERSION,
            user_id: user_id.to_string(),
            saved_at: Utc::now(),
            messages: messages.to_vec(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|source| SnapshotError::Malformed {
            user_id: user_id.to_string(),
            source,
        })?;

        tokio::fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|source| SnapshotError::Io {
                user_id: user_id.to_string(),
                source,
            })?;
        tokio::fs::write(self.path_for(user_id), bytes)
            .await
            .map_err(|source| SnapshotError::Io {
                user_id: user_id.to_string(),
                source,
            })
    }

    /// Read the user's snapshot back into an ordered message list.
    ///
    /// A missing file is `NotFound`; malformed or version-mismatched
    /// snapshots are distinct variants, but callers treat every failure the
    /// same way and fail open to an empty history.
    pub async fn read(&self, user_id: &str) -> Result<Vec<Message>, SnapshotError> {
        let bytes = match tokio::fs::read(self.path_for(user_id)).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SnapshotError::NotFound {
                    user_id: user_id.to_string(),
                });
            }
            Err(source) => {
                return Err(SnapshotError::Io {
                    user_id: user_id.to_string(),
                    source,
                });
            }
        };

        let envelope: SnapshotEnvelope =
            serde_json::from_slice(&bytes).map_err(|source| SnapshotError::Malformed {
                user_id: user_id.to_string(),
                source,
            })?;
        if envelope.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion {
                user_id: user_id.to_string(),
                version: envelope.version,
            });
        }
        Ok(envelope.messages)
    }
}
