//! Packager: wrap a built binary in a deterministic gzip-compressed tar.
//!
//! Header fields that vary between machines (mtime, owner, mode) are
//! normalized, so the same binary always yields byte-identical archives and
//! therefore identical checksums across re-runs.

use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use relay_state::ContentDigest;
use tracing::debug;

use crate::domain::artifact::{archive_name, checksum_name, BuildArtifact};
use crate::domain::error::{RelayError, Result};
use crate::domain::tag::ReleaseTag;
use crate::domain::target::TargetSpec;

/// Archive format produced by default.
pub const DEFAULT_ARCHIVE_EXT: &str = "tar.gz";

#[derive(Debug, Clone)]
pub struct Packager {
    tool_name: String,
    archive_ext: String,
    out_dir: PathBuf,
}

impl Packager {
    pub fn new(tool_name: impl Into<String>, archive_ext: impl Into<String>, out_dir: impl Into<PathBuf>) -> Self {
        Self {
            tool_name: tool_name.into(),
            archive_ext: archive_ext.into(),
            out_dir: out_dir.into(),
        }
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Archive `binary` for `target` and write the archive plus its `.sha256`
    /// sidecar to the output directory.
    pub fn package(&self, tag: &ReleaseTag, target: &TargetSpec, binary: Vec<u8>) -> Result<BuildArtifact> {
        if binary.is_empty() {
            return Err(RelayError::Package(format!(
                "build for {target} produced an empty binary"
            )));
        }

        let entry_name = target.binary_name(&self.tool_name);
        let archive = build_archive(&entry_name, &binary)?;
        let checksum = ContentDigest::from_bytes(&archive);
        let name = archive_name(&self.tool_name, tag.version(), target, &self.archive_ext);

        std::fs::create_dir_all(&self.out_dir)?;
        let archive_path = self.out_dir.join(&name);
        std::fs::write(&archive_path, &archive)?;

        let artifact = BuildArtifact {
            target: target.clone(),
            binary,
            archive_name: name,
            archive,
            archive_path,
            checksum,
        };
        std::fs::write(
            self.out_dir.join(checksum_name(&artifact.archive_name)),
            artifact.checksum_line(),
        )?;

        debug!(
            archive = %artifact.archive_name,
            checksum = %artifact.checksum.short(),
            "packaged target"
        );
        Ok(artifact)
    }
}

/// Build a single-entry tar.gz with normalized headers.
pub fn build_archive(entry_name: &str, binary: &[u8]) -> Result<Vec<u8>> {
    let encoder: GzEncoder<Vec<u8>> = GzBuilder::new()
        .mtime(0)
        .write(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(binary.len() as u64);
    header.set_mode(0o755);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, entry_name, binary)
        .map_err(|e| RelayError::Package(format!("cannot append {entry_name}: {e}")))?;

    let mut encoder = builder
        .into_inner()
        .map_err(|e| RelayError::Package(format!("cannot finish tar stream: {e}")))?;
    encoder.flush()?;
    let bytes = encoder
        .finish()
        .map_err(|e| RelayError::Package(format!("cannot finish gzip stream: {e}")))?;
    Ok(bytes)
}
