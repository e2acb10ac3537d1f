use std::time::Duration;

use clipbridge_core::{ClipboardKind, CoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("malformed origin tag: {0}")]
    MalformedOrigin(String),
    #[error("malformed clipboard payload: {0}")]
    MalformedPayload(String),
    #[error("clipboard transfer failed: {0}")]
    Transport(String),
    #[error("clipboard transfer timed out after {0:?}")]
    Timeout(Duration),
    #[error("browser denied clipboard access for {0}")]
    Unsupported(ClipboardKind),
    #[error("clipboard storage error: {0}")]
    Storage(String),
    #[error("transfer runtime error: {0}")]
    Runtime(String),
}

impl ClipboardError {
    /// Transport and timeout failures are the ones a caller may choose to
    /// retry; nothing in this crate retries on its own.
    pub fn is_transfer_failure(&self) -> bool {
        matches!(self, ClipboardError::Transport(_) | ClipboardError::Timeout(_))
    }
}

impl From<CoreError> for ClipboardError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MalformedOrigin(detail) => ClipboardError::MalformedOrigin(detail),
            CoreError::MalformedPayload { .. } | CoreError::InvalidMime => {
                ClipboardError::MalformedPayload(err.to_string())
            }
            CoreError::Storage(detail) => ClipboardError::Storage(detail),
        }
    }
}

impl From<reqwest::Error> for ClipboardError {
    fn from(err: reqwest::Error) -> Self {
        ClipboardError::Transport(err.to_string())
    }
}
