//! Build targets and the OS families that partition them.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};

/// OS family; each family is built by its own pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsFamily {
    Linux,
    Macos,
    Windows,
}

impl OsFamily {
    /// Name used in archive names and gate records.
    pub fn as_str(&self) -> &'static str {
        match self {
            OsFamily::Linux => "linux",
            OsFamily::Macos => "macos",
            OsFamily::Windows => "windows",
        }
    }

    /// Infer the family from a target triple.
    pub fn from_triple(triple: &str) -> Option<Self> {
        if triple.contains("-linux") {
            Some(OsFamily::Linux)
        } else if triple.contains("-apple-darwin") {
            Some(OsFamily::Macos)
        } else if triple.contains("-windows") {
            Some(OsFamily::Windows)
        } else {
            None
        }
    }

    /// Executable suffix for binaries built for this family.
    pub fn exe_suffix(&self) -> &'static str {
        match self {
            OsFamily::Windows => ".exe",
            _ => "",
        }
    }
}

impl fmt::Display for OsFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OsFamily {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "linux" => Ok(OsFamily::Linux),
            "macos" | "darwin" | "osx" => Ok(OsFamily::Macos),
            "windows" => Ok(OsFamily::Windows),
            other => Err(RelayError::InvalidTarget(format!("unknown OS family: {other}"))),
        }
    }
}

/// One (OS, architecture) build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Rust target triple, e.g. `aarch64-apple-darwin`.
    pub triple: String,
    pub family: OsFamily,
    /// First component of the triple.
    pub arch: String,
    /// Execution environment label (runner image).
    pub runner: String,
}

impl TargetSpec {
    pub fn new(triple: &str, runner: &str) -> Result<Self> {
        let family = OsFamily::from_triple(triple).ok_or_else(|| {
            RelayError::InvalidTarget(format!("cannot infer OS family from {triple}"))
        })?;
        let arch = triple
            .split('-')
            .next()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| RelayError::InvalidTarget(format!("malformed triple: {triple}")))?;
        Ok(Self {
            triple: triple.to_string(),
            family,
            arch: arch.to_string(),
            runner: runner.to_string(),
        })
    }

    /// File name of the tool binary produced for this target.
    pub fn binary_name(&self, tool: &str) -> String {
        format!("{tool}{}", self.family.exe_suffix())
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.triple)
    }
}

/// Group targets by family, preserving their configured order.
pub fn partition_by_family(targets: &[TargetSpec]) -> BTreeMap<OsFamily, Vec<TargetSpec>> {
    let mut out: BTreeMap<OsFamily, Vec<TargetSpec>> = BTreeMap::new();
    for target in targets {
        out.entry(target.family).or_default().push(target.clone());
    }
    out
}
