//! Repository dispatch to the downstream packaging repository.

use async_trait::async_trait;
use relay_core::{CredentialScope, DispatchEvent, Dispatcher, RelayError};
use reqwest::Method;
use serde_json::json;

use crate::client::ForgeClient;

/// Sends `POST /repos/{repo}/dispatches`. The client must carry a token with
/// cross-repository dispatch scope.
pub struct GithubDispatcher {
    client: ForgeClient,
}

impl GithubDispatcher {
    pub fn new(client: ForgeClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatcher for GithubDispatcher {
    async fn dispatch(&self, event: &DispatchEvent) -> relay_core::Result<()> {
        if event.credential_scope != CredentialScope::CrossRepositoryDispatch {
            return Err(RelayError::Dispatch {
                repository: event.target_repository.clone(),
                reason: format!("unsupported credential scope {:?}", event.credential_scope),
            });
        }
        let url = self.client.url_for(&event.target_repository, "/dispatches");
        let request = self.client.request(Method::POST, &url).json(&json!({
            "event_type": event.event_type,
            "client_payload": event.client_payload,
        }));
        self.client
            .send(request)
            .await
            .map(|_| ())
            .map_err(|e| RelayError::Dispatch {
                repository: event.target_repository.clone(),
                reason: e.to_string(),
            })
    }
}
