//! Resolve the canonical release tag from Cargo manifest metadata.
//!
//! Reads `[package].version`, falling back to `[workspace.package].version`
//! when the package inherits it (`version.workspace = true`) or the manifest
//! is a virtual workspace root. Pure: the same manifest text always yields
//! the same tag.

use std::path::Path;

use crate::domain::error::{RelayError, Result};
use crate::domain::tag::ReleaseTag;

/// Resolve the release tag from manifest text.
pub fn resolve_manifest_str(manifest: &str) -> Result<ReleaseTag> {
    let doc: toml::Value = toml::from_str(manifest)
        .map_err(|e| RelayError::VersionMetadata(format!("manifest is not valid TOML: {e}")))?;

    let package_version = doc.get("package").and_then(|p| p.get("version"));
    let workspace_version = doc
        .get("workspace")
        .and_then(|w| w.get("package"))
        .and_then(|p| p.get("version"))
        .and_then(|v| v.as_str());

    let version = match package_version {
        Some(toml::Value::String(v)) => v.as_str(),
        Some(toml::Value::Table(t))
            if t.get("workspace").and_then(|w| w.as_bool()) == Some(true) =>
        {
            workspace_version.ok_or_else(|| {
                RelayError::VersionMetadata(
                    "package inherits version from workspace, but [workspace.package].version is missing"
                        .to_string(),
                )
            })?
        }
        Some(other) => {
            return Err(RelayError::VersionMetadata(format!(
                "[package].version has unexpected type: {}",
                other.type_str()
            )))
        }
        None => workspace_version.ok_or_else(|| {
            RelayError::VersionMetadata("manifest declares no version".to_string())
        })?,
    };

    ReleaseTag::from_version(version)
}

/// Resolve the release tag from a manifest on disk.
pub fn resolve_manifest(path: &Path) -> Result<ReleaseTag> {
    let text = std::fs::read_to_string(path).map_err(|e| {
        RelayError::VersionMetadata(format!("cannot read {}: {e}", path.display()))
    })?;
    resolve_manifest_str(&text)
}

/// Resolve and, when the run was triggered by a tag push, require the pushed
/// tag to name the same release.
pub fn resolve_for_trigger(path: &Path, pushed: Option<&ReleaseTag>) -> Result<ReleaseTag> {
    let resolved = resolve_manifest(path)?;
    if let Some(pushed) = pushed {
        if pushed != &resolved {
            return Err(RelayError::TagMismatch {
                pushed: pushed.display().to_string(),
                resolved: resolved.display().to_string(),
            });
        }
    }
    Ok(resolved)
}
