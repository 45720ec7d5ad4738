//! Merge approval for dependency-update pull requests.

use async_trait::async_trait;
use relay_core::{MergeApprover, RelayError};
use reqwest::Method;
use serde_json::json;
use tracing::info;

use crate::client::ForgeClient;

/// Merges approved pull requests with `PUT /repos/{repo}/pulls/{id}/merge`.
pub struct GithubMergeApprover {
    client: ForgeClient,
    merge_method: String,
}

impl GithubMergeApprover {
    pub fn new(client: ForgeClient) -> Self {
        Self {
            client,
            merge_method: "squash".to_string(),
        }
    }

    /// `merge`, `squash` or `rebase`.
    pub fn with_merge_method(mut self, method: &str) -> Self {
        self.merge_method = method.to_string();
        self
    }
}

#[async_trait]
impl MergeApprover for GithubMergeApprover {
    async fn approve(&self, change_request_id: u64) -> relay_core::Result<()> {
        let url = self.client.repo_url(&format!("/pulls/{change_request_id}/merge"));
        let request = self
            .client
            .request(Method::PUT, &url)
            .json(&json!({ "merge_method": self.merge_method }));
        self.client
            .send(request)
            .await
            .map_err(|e| RelayError::Merge {
                id: change_request_id,
                reason: e.to_string(),
            })?;
        info!(pull = change_request_id, repository = %self.client.repository(), "merged");
        Ok(())
    }
}
