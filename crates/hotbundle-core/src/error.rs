use std::io;
use std::path::Path;

use thiserror::Error;

pub type UpdateResult<T> = Result<T, UpdateError>;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("network error: {0}")]
    Network(String),

    #[error("integrity error: {0}")]
    Integrity(String),

    #[error("manifest error: {0}")]
    Manifest(String),

    #[error("patch apply error: {0}")]
    PatchApply(String),

    #[error("storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("state error: {0}")]
    State(String),

    #[error("all update strategies failed: {}", .messages.join("; "))]
    AllStrategiesFailed { messages: Vec<String> },
}

impl UpdateError {
    pub fn storage(context: impl Into<String>, source: io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn storage_at(action: &str, path: &Path, source: io::Error) -> Self {
        Self::storage(format!("failed to {action} {}", path.display()), source)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
