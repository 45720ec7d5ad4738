//! Error types for relay-state

use thiserror::Error;

/// Errors raised by the storage traits and their backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// No release object exists for the tag
    #[error("release not found for tag: {tag}")]
    ReleaseNotFound { tag: String },

    /// No asset with this name is attached to the release
    #[error("asset {name} not found on release {tag}")]
    AssetNotFound { tag: String, name: String },

    /// The credential in use cannot write to the target
    #[error("permission denied: {reason}")]
    PermissionDenied { reason: String },

    /// Run ID unknown to the ledger
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run already carries a terminal conclusion
    #[error("run {run_id} already finalized as {conclusion}")]
    RunAlreadyFinalized { run_id: String, conclusion: String },

    /// Gate cycle unknown to the store
    #[error("release cycle not found: {cycle}")]
    CycleNotFound { cycle: String },

    /// Key cannot be used as a storage key (empty or unsafe characters)
    #[error("invalid storage key: {key:?}")]
    InvalidKey { key: String },

    /// Digest string is not 64-char hex
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// Failed to take a cross-process lock
    #[error("failed to lock {path}: {reason}")]
    Lock { path: String, reason: String },

    /// Remote or backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StorageError {
    /// Whether retrying the same call could succeed.
    ///
    /// Missing releases and credential problems need operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Backend(_) | StorageError::Io(_) | StorageError::Lock { .. })
    }
}
