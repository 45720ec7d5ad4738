//! Build artifacts produced once per target per run.

use std::path::PathBuf;

use relay_state::ContentDigest;
use serde::{Deserialize, Serialize};

use crate::domain::target::TargetSpec;

/// Archive name convention: `{tool}-{version}-{osFamily}-{arch}.{ext}`.
///
/// Re-runs must produce the same name so uploads overwrite instead of
/// duplicating.
pub fn archive_name(tool: &str, version: &str, target: &TargetSpec, ext: &str) -> String {
    format!(
        "{tool}-{version}-{family}-{arch}.{ext}",
        family = target.family.as_str(),
        arch = target.arch,
    )
}

/// Name of the checksum sidecar published next to an archive.
pub fn checksum_name(archive_name: &str) -> String {
    format!("{archive_name}.sha256")
}

/// A packaged build output. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub target: TargetSpec,
    /// Raw binary as produced by the toolchain.
    #[serde(skip)]
    pub binary: Vec<u8>,
    pub archive_name: String,
    /// Archive bytes as written to `archive_path`.
    #[serde(skip)]
    pub archive: Vec<u8>,
    pub archive_path: PathBuf,
    /// SHA-256 of the archive bytes.
    pub checksum: ContentDigest,
}

impl BuildArtifact {
    /// Contents of the `.sha256` sidecar, in `sha256sum` format.
    pub fn checksum_line(&self) -> String {
        format!("{}  {}\n", self.checksum, self.archive_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_name_convention() {
        let t = TargetSpec::new("aarch64-apple-darwin", "macos-14").unwrap();
        assert_eq!(
            archive_name("tod", "2.3.1", &t, "tar.gz"),
            "tod-2.3.1-macos-aarch64.tar.gz"
        );
        assert_eq!(
            checksum_name("tod-2.3.1-macos-aarch64.tar.gz"),
            "tod-2.3.1-macos-aarch64.tar.gz.sha256"
        );
    }

    #[test]
    fn checksum_line_format() {
        let t = TargetSpec::new("x86_64-unknown-linux-gnu", "ubuntu-latest").unwrap();
        let artifact = BuildArtifact {
            target: t,
            binary: vec![1, 2, 3],
            archive_name: "tod-1.0.0-linux-x86_64.tar.gz".to_string(),
            archive: vec![4, 5, 6],
            archive_path: PathBuf::from("out/tod-1.0.0-linux-x86_64.tar.gz"),
            checksum: ContentDigest::from_bytes(&[4, 5, 6]),
        };
        let line = artifact.checksum_line();
        assert!(line.starts_with(artifact.checksum.as_str()));
        assert!(line.ends_with("  tod-1.0.0-linux-x86_64.tar.gz\n"));
    }
}
