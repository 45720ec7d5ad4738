//! Release tag: the canonical version and its `v`-prefixed display form.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};

/// Semantic version (MAJOR.MINOR.PATCH) plus its display tag.
///
/// Pre-release and build metadata are rejected: a tag names exactly one
/// published release and keys every artifact uploaded for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseTag {
    version: String,
    display: String,
}

impl ReleaseTag {
    /// Build from a bare version string such as `2.3.1`.
    pub fn from_version(version: &str) -> Result<Self> {
        let parsed = semver::Version::parse(version.trim()).map_err(|e| {
            RelayError::VersionMetadata(format!("{version:?} is not a semantic version: {e}"))
        })?;
        if !parsed.pre.is_empty() || !parsed.build.is_empty() {
            return Err(RelayError::VersionMetadata(format!(
                "{version:?} carries pre-release or build metadata; only MAJOR.MINOR.PATCH is released"
            )));
        }
        let version = parsed.to_string();
        Ok(Self {
            display: format!("v{version}"),
            version,
        })
    }

    /// Parse a pushed tag of the form `v<MAJOR>.<MINOR>.<PATCH>`.
    pub fn parse_tag(tag: &str) -> Result<Self> {
        let version = tag.strip_prefix('v').ok_or_else(|| {
            RelayError::VersionMetadata(format!("tag {tag:?} must start with 'v'"))
        })?;
        Self::from_version(version)
    }

    /// Bare version, e.g. `2.3.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Display form, e.g. `v2.3.1`. Also the release cycle key.
    pub fn display(&self) -> &str {
        &self.display
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}
