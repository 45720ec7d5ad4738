//! Dependency-update change requests and the inputs of the merge decision.

use std::fmt;
use std::str::FromStr;

use relay_state::Conclusion;
use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};

/// Size of a semantic version bump, ordered `Patch < Minor < Major`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SemverClass {
    Patch,
    Minor,
    Major,
}

impl SemverClass {
    /// Classify the bump between two versions. Returns `None` when `to` is
    /// not newer than `from`.
    pub fn between(from: &str, to: &str) -> Result<Option<Self>> {
        let parse = |v: &str| {
            semver::Version::parse(v.trim_start_matches('v'))
                .map_err(|e| RelayError::VersionMetadata(format!("{v:?}: {e}")))
        };
        let (from, to) = (parse(from)?, parse(to)?);
        if to <= from {
            return Ok(None);
        }
        Ok(Some(if to.major != from.major {
            SemverClass::Major
        } else if to.minor != from.minor {
            SemverClass::Minor
        } else {
            SemverClass::Patch
        }))
    }
}

impl fmt::Display for SemverClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SemverClass::Patch => "patch",
            SemverClass::Minor => "minor",
            SemverClass::Major => "major",
        };
        f.write_str(s)
    }
}

impl FromStr for SemverClass {
    type Err = RelayError;

    /// Accepts `patch`/`minor`/`major` and dependabot's
    /// `version-update:semver-<class>` metadata strings.
    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_ascii_lowercase();
        let class = lowered
            .strip_prefix("version-update:semver-")
            .unwrap_or(&lowered);
        match class {
            "patch" => Ok(SemverClass::Patch),
            "minor" => Ok(SemverClass::Minor),
            "major" => Ok(SemverClass::Major),
            other => Err(RelayError::Config(format!("unknown semver class: {other}"))),
        }
    }
}

/// A dependency-update change request as reported by the hosting platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRequest {
    pub id: u64,
    pub actor: String,
    pub semver_class: SemverClass,
    pub ci_conclusion: Conclusion,
}

/// Inputs of the auto-merge predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeDecision {
    pub actor_is_bot: bool,
    pub semver_class: SemverClass,
    pub ci_conclusion: Conclusion,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn class_ordering() {
        assert!(SemverClass::Patch < SemverClass::Minor);
        assert!(SemverClass::Minor < SemverClass::Major);
    }

    #[test]
    fn parses_dependabot_update_type() {
        assert_eq!(
            "version-update:semver-minor".parse::<SemverClass>().unwrap(),
            SemverClass::Minor
        );
        assert_eq!("MAJOR".parse::<SemverClass>().unwrap(), SemverClass::Major);
        assert!("version-update:semver-huge".parse::<SemverClass>().is_err());
    }

    #[test]
    fn between_versions() {
        assert_eq!(
            SemverClass::between("1.2.3", "1.2.4").unwrap(),
            Some(SemverClass::Patch)
        );
        assert_eq!(
            SemverClass::between("v1.2.3", "v1.3.0").unwrap(),
            Some(SemverClass::Minor)
        );
        assert_eq!(
            SemverClass::between("1.2.3", "2.0.0").unwrap(),
            Some(SemverClass::Major)
        );
        assert_eq!(SemverClass::between("1.2.3", "1.2.3").unwrap(), None);
        assert!(SemverClass::between("one", "1.0.0").is_err());
    }
}
