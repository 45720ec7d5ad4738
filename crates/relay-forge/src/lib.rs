//! Relay Forge: hosting platform integration
//!
//! Talks to a GitHub-compatible REST API for:
//! - release assets with clobber semantics ([`GithubReleases`])
//! - repository dispatch to the downstream repository ([`GithubDispatcher`])
//! - merging approved dependency updates ([`GithubMergeApprover`])

pub mod client;
pub mod dispatch;
pub mod error;
pub mod merge;
pub mod releases;

pub use client::{ForgeClient, ForgeConfig};
pub use dispatch::GithubDispatcher;
pub use error::ForgeError;
pub use merge::GithubMergeApprover;
pub use releases::GithubReleases;

/// Result type for forge operations
pub type Result<T> = std::result::Result<T, ForgeError>;
