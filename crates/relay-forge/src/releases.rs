//! Release assets on the forge, as an [`ArtifactStore`].
//!
//! GitHub rejects an upload whose name already exists on the release, so an
//! upload first deletes any same-named asset. The pair is not atomic: a
//! failure between the two calls leaves the asset missing until the next
//! run re-uploads it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use relay_state::{
    ArtifactStore, ContentDigest, ReleaseAsset, StorageError, StorageResult, UploadReceipt,
};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Method;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info};

use crate::client::ForgeClient;
use crate::error::ForgeError;

#[derive(Debug, Clone, Deserialize)]
struct ReleaseDto {
    id: u64,
    upload_url: String,
    #[serde(default)]
    assets: Vec<AssetDto>,
}

#[derive(Debug, Clone, Deserialize)]
struct AssetDto {
    id: u64,
    name: String,
    size: u64,
    updated_at: DateTime<Utc>,
    /// `sha256:<hex>` when the forge reports it.
    #[serde(default)]
    digest: Option<String>,
}

pub struct GithubReleases {
    client: ForgeClient,
}

impl GithubReleases {
    pub fn new(client: ForgeClient) -> Self {
        Self { client }
    }

    async fn find_release(&self, tag: &str) -> StorageResult<Option<ReleaseDto>> {
        let url = self.client.repo_url(&format!("/releases/tags/{tag}"));
        match self
            .client
            .send_json::<ReleaseDto>(self.client.request(Method::GET, &url))
            .await
        {
            Ok(release) => Ok(Some(release)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e.into_storage(tag)),
        }
    }

    async fn release(&self, tag: &str) -> StorageResult<ReleaseDto> {
        self.find_release(tag)
            .await?
            .ok_or_else(|| StorageError::ReleaseNotFound {
                tag: tag.to_string(),
            })
    }

    async fn delete_asset(&self, tag: &str, asset: &AssetDto) -> StorageResult<()> {
        let url = self.client.repo_url(&format!("/releases/assets/{}", asset.id));
        match self
            .client
            .send(self.client.request(Method::DELETE, &url))
            .await
        {
            Ok(_) => Ok(()),
            // already gone: a concurrent re-run got there first
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into_storage(tag)),
        }
    }

    /// Delete the asset called `name` if the release has one.
    async fn delete_named(&self, tag: &str, release: &ReleaseDto, name: &str) -> StorageResult<bool> {
        match release.assets.iter().find(|a| a.name == name) {
            Some(asset) => {
                debug!(tag = %tag, name = %name, asset_id = asset.id, "replacing existing asset");
                self.delete_asset(tag, asset).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn post_asset(&self, upload_url: &str, name: &str, data: &[u8]) -> crate::Result<AssetDto> {
        let request = self
            .client
            .request(Method::POST, upload_endpoint(upload_url))
            .query(&[("name", name)])
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data.to_vec());
        self.client.send_json(request).await
    }

    async fn fetch(&self, tag: &str, asset: &AssetDto) -> StorageResult<Vec<u8>> {
        let url = self.client.repo_url(&format!("/releases/assets/{}", asset.id));
        let request = self
            .client
            .request(Method::GET, &url)
            .header(ACCEPT, "application/octet-stream");
        let response = self
            .client
            .send(request)
            .await
            .map_err(|e| e.into_storage(tag))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| ForgeError::from(e).into_storage(tag))?;
        Ok(bytes.to_vec())
    }

    async fn to_release_asset(&self, tag: &str, asset: &AssetDto) -> StorageResult<ReleaseAsset> {
        let reported = asset
            .digest
            .as_deref()
            .and_then(|d| d.strip_prefix("sha256:"))
            .and_then(|hex| ContentDigest::try_from(hex.to_string()).ok());
        let digest = match reported {
            Some(digest) => digest,
            None => ContentDigest::from_bytes(&self.fetch(tag, asset).await?),
        };
        Ok(ReleaseAsset {
            name: asset.name.clone(),
            size: asset.size,
            digest,
            uploaded_at: asset.updated_at,
        })
    }
}

/// Strip the RFC 6570 suffix GitHub appends to `upload_url`.
fn upload_endpoint(upload_url: &str) -> &str {
    upload_url.split('{').next().unwrap_or(upload_url)
}

#[async_trait]
impl ArtifactStore for GithubReleases {
    async fn create_release(&self, tag: &str) -> StorageResult<()> {
        if self.find_release(tag).await?.is_some() {
            return Ok(());
        }
        let url = self.client.repo_url("/releases");
        let request = self
            .client
            .request(Method::POST, &url)
            .json(&json!({ "tag_name": tag, "name": tag }));
        match self.client.send(request).await {
            Ok(_) => {
                info!(tag = %tag, repository = %self.client.repository(), "created release");
                Ok(())
            }
            // 422: created concurrently by another family's run
            Err(e) if e.status() == Some(422) => Ok(()),
            Err(e) => Err(e.into_storage(tag)),
        }
    }

    async fn release_exists(&self, tag: &str) -> StorageResult<bool> {
        Ok(self.find_release(tag).await?.is_some())
    }

    async fn upload_asset(&self, tag: &str, name: &str, data: &[u8]) -> StorageResult<UploadReceipt> {
        let release = self.release(tag).await?;
        let mut replaced = self.delete_named(tag, &release, name).await?;

        let uploaded = match self.post_asset(&release.upload_url, name, data).await {
            Ok(uploaded) => uploaded,
            // 422: another run uploaded the same name after the release was read
            Err(e) if e.status() == Some(422) => {
                debug!(tag = %tag, name = %name, "asset appeared concurrently; replacing it");
                let release = self.release(tag).await?;
                replaced |= self.delete_named(tag, &release, name).await?;
                self.post_asset(&release.upload_url, name, data)
                    .await
                    .map_err(|e| e.into_storage(tag))?
            }
            Err(e) => return Err(e.into_storage(tag)),
        };

        Ok(UploadReceipt {
            tag: tag.to_string(),
            asset: ReleaseAsset {
                name: uploaded.name,
                size: uploaded.size,
                digest: ContentDigest::from_bytes(data),
                uploaded_at: uploaded.updated_at,
            },
            replaced,
        })
    }

    async fn list_assets(&self, tag: &str) -> StorageResult<Vec<ReleaseAsset>> {
        let release = self.release(tag).await?;
        let mut assets = Vec::with_capacity(release.assets.len());
        for asset in &release.assets {
            assets.push(self.to_release_asset(tag, asset).await?);
        }
        assets.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(assets)
    }

    async fn download_asset(&self, tag: &str, name: &str) -> StorageResult<Vec<u8>> {
        let release = self.release(tag).await?;
        let asset = release
            .assets
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| StorageError::AssetNotFound {
                tag: tag.to_string(),
                name: name.to_string(),
            })?;
        self.fetch(tag, asset).await
    }
}
