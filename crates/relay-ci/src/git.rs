//! Commit capture for run metadata.

use std::path::Path;

use relay_core::{RelayError, Result};
use tokio::process::Command;

/// Capture the HEAD commit SHA of the repository at `repo_dir`.
///
/// Runs `git rev-parse HEAD`. Fails when git is unavailable or the directory
/// is not inside a work tree.
pub async fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(repo_dir)
        .output()
        .await
        .map_err(|e| RelayError::Toolchain(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RelayError::Toolchain(format!(
            "git rev-parse HEAD failed: {}",
            stderr.trim()
        )));
    }

    let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if sha.is_empty() {
        return Err(RelayError::Toolchain(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn run_git(repo_dir: &Path, args: &[&str]) {
        let output = StdCommand::new("git")
            .args(args)
            .current_dir(repo_dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    #[tokio::test]
    async fn head_sha_is_40_hex_chars() {
        let dir = tempfile::tempdir().unwrap();
        run_git(dir.path(), &["init"]);
        run_git(dir.path(), &["config", "user.name", "test-user"]);
        run_git(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);

        let sha = capture_head_sha(dir.path()).await.unwrap();
        assert_eq!(sha.len(), 40);
        assert!(sha.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn non_repo_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(capture_head_sha(dir.path()).await.is_err());
    }
}
