//! Authenticated HTTP client for a GitHub-compatible REST API.

use relay_core::SecretToken;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::ForgeError;
use crate::Result;

const USER_AGENT: &str = concat!("release-relay/", env!("CARGO_PKG_VERSION"));
const API_VERSION: &str = "2022-11-28";

/// Forge connection settings.
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// API base URL, e.g. `https://api.github.com`.
    pub api_url: String,
    /// `owner/name` of the repository the client acts on.
    pub repository: String,
    pub token: SecretToken,
}

impl ForgeConfig {
    pub fn new(api_url: &str, repository: &str, token: SecretToken) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            repository: repository.to_string(),
            token,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ForgeClient {
    config: ForgeConfig,
    http: reqwest::Client,
}

impl ForgeClient {
    pub fn new(config: ForgeConfig) -> Result<Self> {
        if !config.repository.contains('/') {
            return Err(ForgeError::Config(format!(
                "repository {:?} must have the form owner/name",
                config.repository
            )));
        }
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self { config, http })
    }

    pub fn repository(&self) -> &str {
        &self.config.repository
    }

    /// `<api_url>/repos/<repository><path>`.
    pub fn repo_url(&self, path: &str) -> String {
        self.url_for(&self.config.repository, path)
    }

    /// `<api_url>/repos/<repository><path>` for another repository.
    pub fn url_for(&self, repository: &str, path: &str) -> String {
        format!("{}/repos/{}{}", self.config.api_url, repository, path)
    }

    /// Start an authenticated request.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(self.config.token.expose())
    }

    /// Send and require a success status.
    pub async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let request = request.build()?;
        let method = request.method().to_string();
        let url = request.url().to_string();
        debug!(method = %method, url = %url, "forge request");

        let response = self.http.execute(request).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ForgeError::Status {
            method,
            url,
            status: status.as_u16(),
            body,
        })
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = self.send(request).await?;
        let bytes = response.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(repo: &str) -> Result<ForgeClient> {
        ForgeClient::new(ForgeConfig::new(
            "https://api.github.com/",
            repo,
            SecretToken::new("t"),
        ))
    }

    #[test]
    fn builds_repo_urls() {
        let client = client("acme/tod").unwrap();
        assert_eq!(
            client.repo_url("/releases/tags/v1.0.0"),
            "https://api.github.com/repos/acme/tod/releases/tags/v1.0.0"
        );
        assert_eq!(
            client.url_for("acme/homebrew-tod", "/dispatches"),
            "https://api.github.com/repos/acme/homebrew-tod/dispatches"
        );
    }

    #[test]
    fn rejects_bad_repository() {
        assert!(client("tod").is_err());
    }

    #[test]
    fn config_debug_hides_token() {
        let config = ForgeConfig::new("https://api.github.com", "acme/tod", SecretToken::new("ghp_abc"));
        assert!(!format!("{config:?}").contains("ghp_abc"));
    }
}
