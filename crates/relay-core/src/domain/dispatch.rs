//! Downstream dispatch event.

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::domain::tag::ReleaseTag;

/// Credential scope a call requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialScope {
    /// Write access to release contents of the source repository.
    ContentWrite,
    /// Cross-repository dispatch; more privileged than `ContentWrite`.
    CrossRepositoryDispatch,
}

/// Event sent to the downstream packaging repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchEvent {
    /// `owner/name` of the downstream repository.
    pub target_repository: String,
    pub event_type: String,
    pub client_payload: serde_json::Value,
    pub credential_scope: CredentialScope,
}

impl DispatchEvent {
    /// Event announcing a release cycle. `cycle` is the tag display form;
    /// the bare version is included when the cycle parses as a tag.
    pub fn for_cycle(target_repository: &str, event_type: &str, cycle: &str) -> Self {
        let version = ReleaseTag::parse_tag(cycle)
            .map(|t| t.version().to_string())
            .ok();
        Self {
            target_repository: target_repository.to_string(),
            event_type: event_type.to_string(),
            client_payload: json!({ "tag": cycle, "version": version }),
            credential_scope: CredentialScope::CrossRepositoryDispatch,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_carries_tag_and_version() {
        let ev = DispatchEvent::for_cycle("acme/homebrew-tod", "release-published", "v2.3.1");
        assert_eq!(ev.client_payload["tag"], "v2.3.1");
        assert_eq!(ev.client_payload["version"], "2.3.1");
        assert_eq!(ev.credential_scope, CredentialScope::CrossRepositoryDispatch);
    }

    #[test]
    fn non_tag_cycle_has_null_version() {
        let ev = DispatchEvent::for_cycle("acme/homebrew-tod", "release-published", "nightly");
        assert!(ev.client_payload["version"].is_null());
    }
}
