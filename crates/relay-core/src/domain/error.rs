//! Error taxonomy for the release pipeline.

use relay_state::StorageError;

/// Release Relay errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("version metadata error: {0}")]
    VersionMetadata(String),

    #[error("pushed tag {pushed} does not match resolved tag {resolved}")]
    TagMismatch { pushed: String, resolved: String },

    #[error("test suite failed: {0}")]
    TestsFailed(String),

    #[error("build failed for {target}: {reason}")]
    Build { target: String, reason: String },

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("packaging failed: {0}")]
    Package(String),

    #[error("upload of {name} failed: {source}")]
    Upload {
        name: String,
        #[source]
        source: StorageError,
    },

    #[error("dispatch to {repository} failed: {reason}")]
    Dispatch { repository: String, reason: String },

    #[error("merge approval failed for change request {id}: {reason}")]
    Merge { id: u64, reason: String },

    #[error("toolchain error: {0}")]
    Toolchain(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("illegal run transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("run cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Failures that abort a run before any artifact exists.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            RelayError::VersionMetadata(_)
                | RelayError::TagMismatch { .. }
                | RelayError::TestsFailed(_)
        )
    }
}

/// Result type for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_classification() {
        assert!(RelayError::VersionMetadata("missing".to_string()).is_precondition());
        assert!(RelayError::TestsFailed("2 failed".to_string()).is_precondition());
        assert!(RelayError::TagMismatch {
            pushed: "v1.0.1".to_string(),
            resolved: "v1.0.0".to_string(),
        }
        .is_precondition());
        assert!(!RelayError::Build {
            target: "x86_64-unknown-linux-gnu".to_string(),
            reason: "linker".to_string(),
        }
        .is_precondition());
    }

    #[test]
    fn upload_error_keeps_source() {
        let err = RelayError::Upload {
            name: "tod-1.0.0-linux-x86_64.tar.gz".to_string(),
            source: StorageError::ReleaseNotFound {
                tag: "v1.0.0".to_string(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("tod-1.0.0-linux-x86_64.tar.gz"));
        assert!(msg.contains("release not found"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
