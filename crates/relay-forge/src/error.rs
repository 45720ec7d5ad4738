//! Error types for relay-forge

use relay_state::StorageError;
use thiserror::Error;

/// Errors talking to the hosting platform.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Transport-level failure (connect, TLS, body read)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Non-success status code
    #[error("{method} {url} returned {status}: {body}")]
    Status {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    /// Unexpected response body
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed configuration (base URL, repository slug)
    #[error("invalid forge configuration: {0}")]
    Config(String),
}

impl ForgeError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ForgeError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// 401/403: the credential is missing or lacks scope.
    pub fn is_forbidden(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    /// Map onto the storage taxonomy for the release identified by `tag`.
    pub fn into_storage(self, tag: &str) -> StorageError {
        if self.is_forbidden() {
            StorageError::PermissionDenied {
                reason: self.to_string(),
            }
        } else if self.is_not_found() {
            StorageError::ReleaseNotFound {
                tag: tag.to_string(),
            }
        } else {
            StorageError::Backend(self.to_string())
        }
    }
}

impl From<reqwest::Error> for ForgeError {
    fn from(err: reqwest::Error) -> Self {
        ForgeError::Http(err.to_string())
    }
}
