//! Uploader: attach packaged archives and their checksum sidecars to the
//! release keyed by the tag.

use std::sync::Arc;

use relay_state::{ArtifactStore, ContentDigest, StorageError};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::artifact::{checksum_name, BuildArtifact};
use crate::domain::error::{RelayError, Result};
use crate::domain::tag::ReleaseTag;
use crate::obs;

/// Record of one archive published to a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedArtifact {
    pub name: String,
    pub checksum: ContentDigest,
    /// `true` when a same-named asset was overwritten.
    pub replaced: bool,
}

pub struct Uploader {
    store: Arc<dyn ArtifactStore>,
    create_release: bool,
}

impl Uploader {
    /// `create_release` controls whether a missing release object is created
    /// on demand or fails the upload.
    pub fn new(store: Arc<dyn ArtifactStore>, create_release: bool) -> Self {
        Self {
            store,
            create_release,
        }
    }

    /// Make sure the release exists before any asset is attached.
    pub async fn prepare(&self, tag: &ReleaseTag) -> Result<()> {
        if self.create_release {
            self.store.create_release(tag.display()).await?;
            return Ok(());
        }
        if !self.store.release_exists(tag.display()).await? {
            return Err(RelayError::Upload {
                name: tag.display().to_string(),
                source: StorageError::ReleaseNotFound {
                    tag: tag.display().to_string(),
                },
            });
        }
        Ok(())
    }

    /// Upload the archive, then its sidecar. Same-named assets are replaced.
    pub async fn upload(&self, tag: &ReleaseTag, artifact: &BuildArtifact) -> Result<UploadedArtifact> {
        let receipt = self
            .store
            .upload_asset(tag.display(), &artifact.archive_name, &artifact.archive)
            .await
            .map_err(|source| RelayError::Upload {
                name: artifact.archive_name.clone(),
                source,
            })?;

        let sidecar = checksum_name(&artifact.archive_name);
        self.store
            .upload_asset(tag.display(), &sidecar, artifact.checksum_line().as_bytes())
            .await
            .map_err(|source| RelayError::Upload {
                name: sidecar.clone(),
                source,
            })?;

        if receipt.asset.digest != artifact.checksum {
            debug!(
                name = %artifact.archive_name,
                stored = %receipt.asset.digest.short(),
                "store reported a different digest than the local checksum"
            );
        }
        obs::emit_artifact_uploaded(
            tag.display(),
            &artifact.archive_name,
            artifact.checksum.as_str(),
            receipt.replaced,
        );
        Ok(UploadedArtifact {
            name: artifact.archive_name.clone(),
            checksum: artifact.checksum.clone(),
            replaced: receipt.replaced,
        })
    }
}
