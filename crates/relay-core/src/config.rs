//! `relay.toml` configuration and environment-injected credentials.
//!
//! Configuration is plain data deserialized with `serde` + `toml`. Secrets
//! never live in the file: upload and dispatch tokens are read from the
//! environment and wrapped in [`SecretToken`], which redacts itself in
//! `Debug` and `Display` output.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::error::{RelayError, Result};
use crate::domain::merge::SemverClass;
use crate::domain::target::{OsFamily, TargetSpec};
use crate::merge_policy::{AutoMergePolicy, DEFAULT_BOT_LOGIN};
use crate::package::DEFAULT_ARCHIVE_EXT;

pub const ENV_STATE_DIR: &str = "RELAY_STATE_DIR";
pub const ENV_FORGE_API_URL: &str = "RELAY_FORGE_API_URL";
pub const ENV_UPLOAD_TOKEN: &str = "RELAY_UPLOAD_TOKEN";
pub const ENV_UPLOAD_TOKEN_FALLBACK: &str = "GITHUB_TOKEN";
pub const ENV_DISPATCH_TOKEN: &str = "RELAY_DISPATCH_TOKEN";

/// Default config file name looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "relay.toml";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntry {
    pub triple: String,
    pub runner: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GateSection {
    #[serde(default)]
    pub required_families: Vec<OsFamily>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamSection {
    /// `owner/name` of the packaging repository.
    pub repository: String,
    #[serde(default = "default_event_type")]
    pub event_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForgeSection {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// `owner/name` of the repository whose releases receive artifacts.
    pub repository: String,
    /// Create the release object when it does not exist yet.
    #[serde(default)]
    pub create_release: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomergeSection {
    #[serde(default = "default_bot")]
    pub bot: String,
    #[serde(default = "default_max_bump")]
    pub max_bump: SemverClass,
}

impl Default for AutomergeSection {
    fn default() -> Self {
        Self {
            bot: default_bot(),
            max_bump: default_max_bump(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainSection {
    #[serde(default = "default_test_command")]
    pub test_command: Vec<String>,
    /// Build command; `--target <triple>` is appended per target.
    #[serde(default = "default_build_command")]
    pub build_command: Vec<String>,
    /// Per-command timeout; 0 disables it.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ToolchainSection {
    fn default() -> Self {
        Self {
            test_command: default_test_command(),
            build_command: default_build_command(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseConfig {
    pub tool_name: String,
    #[serde(default = "default_manifest")]
    pub manifest_path: PathBuf,
    #[serde(default = "default_archive_ext")]
    pub archive_ext: String,
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub targets: Vec<TargetEntry>,
    #[serde(default)]
    pub gate: GateSection,
    pub downstream: DownstreamSection,
    pub forge: ForgeSection,
    #[serde(default)]
    pub automerge: AutomergeSection,
    #[serde(default)]
    pub toolchain: ToolchainSection,
}

fn default_event_type() -> String {
    "release-published".to_string()
}
fn default_api_url() -> String {
    "https://api.github.com".to_string()
}
fn default_bot() -> String {
    DEFAULT_BOT_LOGIN.to_string()
}
fn default_max_bump() -> SemverClass {
    SemverClass::Minor
}
fn default_test_command() -> Vec<String> {
    ["cargo", "test", "--workspace", "--all-features"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_build_command() -> Vec<String> {
    ["cargo", "build", "--release"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_timeout() -> u64 {
    3600
}
fn default_manifest() -> PathBuf {
    PathBuf::from("Cargo.toml")
}
fn default_archive_ext() -> String {
    DEFAULT_ARCHIVE_EXT.to_string()
}
fn default_out_dir() -> PathBuf {
    PathBuf::from("dist")
}
fn default_work_dir() -> PathBuf {
    PathBuf::from("target/relay")
}
fn default_state_dir() -> PathBuf {
    PathBuf::from(".relay")
}

impl ReleaseConfig {
    /// Parse and validate config text. Environment overrides are not applied.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)
            .map_err(|e| RelayError::Config(format!("invalid relay config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file, apply process-environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RelayError::Config(format!("cannot read {}: {e}", path.display())))?;
        let mut config: Self = toml::from_str(&text)
            .map_err(|e| RelayError::Config(format!("invalid {}: {e}", path.display())))?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply `RELAY_STATE_DIR` and `RELAY_FORGE_API_URL` using `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|v| !v.is_empty()) {
            self.state_dir = PathBuf::from(dir);
        }
        if let Some(url) = lookup(ENV_FORGE_API_URL).filter(|v| !v.is_empty()) {
            self.forge.api_url = url;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.tool_name.trim().is_empty() {
            return Err(RelayError::Config("tool_name must not be empty".to_string()));
        }
        if self.archive_ext.trim().is_empty() {
            return Err(RelayError::Config("archive_ext must not be empty".to_string()));
        }

        let targets = self.target_specs()?;
        let mut seen = BTreeSet::new();
        for t in &targets {
            if !seen.insert(t.triple.as_str()) {
                return Err(RelayError::Config(format!("duplicate target {}", t.triple)));
            }
        }

        let families: BTreeSet<OsFamily> = targets.iter().map(|t| t.family).collect();
        for family in &self.gate.required_families {
            if !families.contains(family) {
                return Err(RelayError::Config(format!(
                    "required family {family} has no configured targets"
                )));
            }
        }

        validate_repo_slug(&self.downstream.repository)?;
        validate_repo_slug(&self.forge.repository)?;
        if self.downstream.event_type.trim().is_empty() {
            return Err(RelayError::Config("downstream.event_type must not be empty".to_string()));
        }
        if self.toolchain.test_command.is_empty() || self.toolchain.build_command.is_empty() {
            return Err(RelayError::Config("toolchain commands must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn target_specs(&self) -> Result<Vec<TargetSpec>> {
        self.targets
            .iter()
            .map(|t| TargetSpec::new(&t.triple, &t.runner))
            .collect()
    }

    /// Required families; defaults to every configured family when the
    /// `[gate]` section lists none.
    pub fn required_families(&self) -> Result<Vec<OsFamily>> {
        if !self.gate.required_families.is_empty() {
            let set: BTreeSet<OsFamily> = self.gate.required_families.iter().copied().collect();
            return Ok(set.into_iter().collect());
        }
        let set: BTreeSet<OsFamily> = self.target_specs()?.iter().map(|t| t.family).collect();
        Ok(set.into_iter().collect())
    }

    pub fn merge_policy(&self) -> AutoMergePolicy {
        AutoMergePolicy::new(self.automerge.bot.clone(), self.automerge.max_bump)
    }
}

/// Check an `owner/name` repository slug.
pub fn validate_repo_slug(slug: &str) -> Result<()> {
    let valid_part = |p: &str| {
        !p.is_empty()
            && p.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    match slug.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(RelayError::Config(format!(
            "repository {slug:?} must have the form owner/name"
        ))),
    }
}

/// Credential whose value never appears in logs or debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(String);

impl SecretToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The raw value, for building an authorization header.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretToken(***)")
    }
}

impl fmt::Display for SecretToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Tokens injected by the environment. Upload needs content-write scope;
/// dispatch needs the more privileged cross-repository scope.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub upload: Option<SecretToken>,
    pub dispatch: Option<SecretToken>,
}

impl Credentials {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(SecretToken::new);
        Self {
            upload: get(ENV_UPLOAD_TOKEN).or_else(|| get(ENV_UPLOAD_TOKEN_FALLBACK)),
            dispatch: get(ENV_DISPATCH_TOKEN),
        }
    }

    pub fn require_upload(&self) -> Result<&SecretToken> {
        self.upload.as_ref().ok_or_else(|| {
            RelayError::Config(format!(
                "{ENV_UPLOAD_TOKEN} (or {ENV_UPLOAD_TOKEN_FALLBACK}) is not set"
            ))
        })
    }

    pub fn require_dispatch(&self) -> Result<&SecretToken> {
        self.dispatch
            .as_ref()
            .ok_or_else(|| RelayError::Config(format!("{ENV_DISPATCH_TOKEN} is not set")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
tool_name = "tod"

[[targets]]
triple = "x86_64-unknown-linux-gnu"
runner = "ubuntu-latest"

[[targets]]
triple = "aarch64-apple-darwin"
runner = "macos-14"

[gate]
required_families = ["linux", "macos"]

[downstream]
repository = "acme/homebrew-tod"

[forge]
repository = "acme/tod"
"#;

    #[test]
    fn parses_with_defaults() {
        let config = ReleaseConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.archive_ext, "tar.gz");
        assert_eq!(config.downstream.event_type, "release-published");
        assert_eq!(config.forge.api_url, "https://api.github.com");
        assert_eq!(config.automerge.max_bump, SemverClass::Minor);
        assert_eq!(
            config.toolchain.test_command,
            vec!["cargo", "test", "--workspace", "--all-features"]
        );
        assert_eq!(config.target_specs().unwrap().len(), 2);
        assert_eq!(
            config.required_families().unwrap(),
            vec![OsFamily::Linux, OsFamily::Macos]
        );
    }

    #[test]
    fn required_families_default_to_configured() {
        let text = SAMPLE.replace("required_families = [\"linux\", \"macos\"]", "");
        let config = ReleaseConfig::from_toml_str(&text).unwrap();
        assert_eq!(
            config.required_families().unwrap(),
            vec![OsFamily::Linux, OsFamily::Macos]
        );
    }

    #[test]
    fn rejects_empty_tool_name() {
        let text = SAMPLE.replace("tool_name = \"tod\"", "tool_name = \" \"");
        assert!(ReleaseConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn rejects_duplicate_triples() {
        let text = SAMPLE.replace(
            "[gate]",
            "[[targets]]\ntriple = \"x86_64-unknown-linux-gnu\"\nrunner = \"other\"\n\n[gate]",
        );
        let err = ReleaseConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("duplicate target"));
    }

    #[test]
    fn rejects_required_family_without_targets() {
        let text = SAMPLE.replace("[\"linux\", \"macos\"]", "[\"linux\", \"windows\"]");
        let err = ReleaseConfig::from_toml_str(&text).unwrap_err();
        assert!(err.to_string().contains("windows"));
    }

    #[test]
    fn rejects_bad_slug() {
        assert!(validate_repo_slug("acme/tod").is_ok());
        assert!(validate_repo_slug("acme").is_err());
        assert!(validate_repo_slug("acme/").is_err());
        assert!(validate_repo_slug("acme/tod/extra").is_err());
        let text = SAMPLE.replace("acme/homebrew-tod", "homebrew-tod");
        assert!(ReleaseConfig::from_toml_str(&text).is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = ReleaseConfig::from_toml_str(SAMPLE).unwrap();
        let env: HashMap<&str, &str> = [
            (ENV_STATE_DIR, "/var/lib/relay"),
            (ENV_FORGE_API_URL, "http://127.0.0.1:9999"),
        ]
        .into_iter()
        .collect();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/relay"));
        assert_eq!(config.forge.api_url, "http://127.0.0.1:9999");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ReleaseConfig::load(&path).unwrap();
        assert_eq!(config.tool_name, "tod");
    }

    #[test]
    fn credentials_fallback_and_redaction() {
        let env: HashMap<&str, &str> = [(ENV_UPLOAD_TOKEN_FALLBACK, "ghs_secret")].into_iter().collect();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        let upload = creds.require_upload().unwrap();
        assert_eq!(upload.expose(), "ghs_secret");
        assert!(!format!("{upload:?}").contains("ghs_secret"));
        assert!(!format!("{creds:?}").contains("ghs_secret"));
        assert_eq!(upload.to_string(), "***");
        assert!(creds.require_dispatch().is_err());
    }

    #[test]
    fn explicit_upload_token_wins() {
        let env: HashMap<&str, &str> = [
            (ENV_UPLOAD_TOKEN, "relay"),
            (ENV_UPLOAD_TOKEN_FALLBACK, "github"),
            (ENV_DISPATCH_TOKEN, "pat"),
        ]
        .into_iter()
        .collect();
        let creds = Credentials::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(creds.require_upload().unwrap().expose(), "relay");
        assert_eq!(creds.require_dispatch().unwrap().expose(), "pat");
    }
}
