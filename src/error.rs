use thiserror::Error;

use crate::inventory::RowId;

/// Failure talking to the remote store. Every variant counts as one failed
/// attempt for a queued change.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("remote returned HTTP {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("remote rejected request: {0}")]
    Rejected(String),
    #[error("remote endpoint is not configured")]
    NotConfigured,
}

impl GatewayError {
    /// Whether the failure suggests the remote is unreachable rather than
    /// unwilling.
    pub fn is_connectivity(&self) -> bool {
        matches!(self, GatewayError::Timeout | GatewayError::Transport(_))
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Malformed(err.to_string())
        } else if let Some(status) = err.status() {
            GatewayError::Status(status.as_u16())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// The pending-change queue could not be read or written. Unlike cache
/// failures these are never swallowed: a lost queue entry is a lost write.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("pending-change storage failed: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("pending-change payload could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("item {0} has no assigned row yet and cannot be targeted")]
    UnassignedTarget(RowId),
    #[error("new items need a name")]
    MissingName,
    #[error("unknown change kind '{0}' in pending-change storage")]
    UnknownKind(String),
}

/// Neither the remote store nor the local cache could provide items.
#[derive(Debug, Error)]
#[error("inventory unavailable: {reason} (no cached copy)")]
pub struct LoadError {
    pub reason: String,
}
