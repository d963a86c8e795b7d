//! `git`-backed version control.
//!
//! Reads the pending diff with `git diff HEAD` and applies generated patches
//! by piping them to `git apply` on stdin.

use async_trait::async_trait;
use std::path::{Component, Path};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::VersionControl;
use crate::error::CapabilityError;

/// Flags shared by the check and the real apply.
const APPLY_ARGS: [&str; 3] = ["--recount", "--whitespace=nowarn", "-"];

/// Version control through the `git` CLI.
#[derive(Debug, Clone, Default)]
pub(crate) struct GitVersionControl;

impl GitVersionControl {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl VersionControl for GitVersionControl {
    async fn read_diff(&self, repo: &Path) -> Result<String, CapabilityError> {
        debug!("Reading git diff in {}", repo.display());

        let output = tokio::process::Command::new("git")
            .current_dir(repo)
            .args(["diff", "HEAD"])
            .output()
            .await
            .map_err(|e| CapabilityError::command(format!("Failed to run git diff: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::command(format!(
                "git diff exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            )));
        }

        let diff = String::from_utf8_lossy(&output.stdout).into_owned();
        if diff.trim().is_empty() {
            return Err(CapabilityError::NoChanges);
        }

        Ok(diff)
    }

    async fn read_file(&self, repo: &Path, relative: &str) -> Result<String, CapabilityError> {
        if !is_safe_relative_path(Path::new(relative)) {
            return Err(CapabilityError::not_found(relative));
        }

        tokio::fs::read_to_string(repo.join(relative))
            .await
            .map_err(|e| {
                debug!("Could not read {}: {}", relative, e);
                CapabilityError::not_found(relative)
            })
    }

    async fn apply_patch(&self, repo: &Path, patch: &str) -> Result<(), CapabilityError> {
        // --check first so a bad patch never leaves a half-applied tree
        let mut check_args = vec!["apply", "--check"];
        check_args.extend(APPLY_ARGS);
        run_git_with_stdin(repo, &check_args, patch)
            .await
            .map_err(CapabilityError::apply_failed)?;

        let mut apply_args = vec!["apply"];
        apply_args.extend(APPLY_ARGS);
        run_git_with_stdin(repo, &apply_args, patch)
            .await
            .map_err(CapabilityError::apply_failed)?;

        info!("Patch applied to {}", repo.display());
        Ok(())
    }
}

/// Runs git with `input` on stdin. Returns stderr (or stdout) on failure.
async fn run_git_with_stdin(repo: &Path, args: &[&str], input: &str) -> Result<(), String> {
    debug!("git {:?}", args);

    let mut child = tokio::process::Command::new("git")
        .current_dir(repo)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("Failed to run git: {e}"))?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin
            .write_all(input.as_bytes())
            .await
            .map_err(|e| format!("Failed to write patch to git: {e}"))?;
        // Dropping stdin closes the pipe so git sees EOF
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| format!("Failed to wait for git: {e}"))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let message = if stderr.trim().is_empty() {
        stdout.trim().to_string()
    } else {
        stderr.trim().to_string()
    };
    Err(message)
}

/// Only plain relative paths inside the repository may be read.
fn is_safe_relative_path(path: &Path) -> bool {
    path.components().next().is_some()
        && path
            .components()
            .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}
