//! Git synchronizer
//!
//! None of these operations return `Err`: callers get a success flag plus
//! diagnostic text (or `None` for queries) and decide whether to abort.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::exec::{CommandRunner, CommandSpec};
use crate::filesys::dir::Dir;

/// Outcome of a git operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOutcome {
    pub success: bool,

    /// Short commit on success, otherwise the failure diagnostic
    pub output: String,
}

impl GitOutcome {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    fn failed(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Clones and syncs site checkouts
#[derive(Clone)]
pub struct GitSync {
    runner: Arc<dyn CommandRunner>,
    program: String,
}

impl GitSync {
    pub fn new(runner: Arc<dyn CommandRunner>, program: impl Into<String>) -> Self {
        Self {
            runner,
            program: program.into(),
        }
    }

    fn git(&self, path: &Path) -> CommandSpec {
        CommandSpec::new(&self.program).current_dir(path)
    }

    /// Run a git command, folding spawn errors into a failed outcome
    async fn run(&self, spec: CommandSpec) -> GitOutcome {
        match self.runner.run(&spec).await {
            Ok(output) if output.success() => GitOutcome::ok(output.stdout.trim()),
            Ok(output) => GitOutcome::failed(output.diagnostic()),
            Err(e) => GitOutcome::failed(e.to_string()),
        }
    }

    /// Replace `target` with a shallow single-branch clone of `url`
    pub async fn clone(&self, url: &str, target: &Path, branch: &str) -> GitOutcome {
        info!("Cloning {} (branch: {}) into {}", url, branch, target.display());

        let dir = Dir::new(target);
        if let Err(e) = dir.delete().await {
            return GitOutcome::failed(format!("failed to clear {}: {}", target.display(), e));
        }
        if let Some(parent) = target.parent() {
            if let Err(e) = Dir::new(parent).create().await {
                return GitOutcome::failed(format!("failed to create {}: {}", parent.display(), e));
            }
        }

        let spec = CommandSpec::new(&self.program)
            .args(["clone", "--branch", branch, "--depth", "1", "--single-branch", url])
            .path_arg(target);
        let outcome = self.run(spec).await;
        if !outcome.success {
            warn!("Clone of {} failed: {}", url, outcome.output);
            return outcome;
        }

        let commit = self.short_commit(target).await.unwrap_or_default();
        GitOutcome::ok(commit)
    }

    /// Checkout `branch` when given, then pull.
    /// Succeeds with the resulting short commit.
    pub async fn pull_latest(&self, path: &Path, branch: Option<&str>) -> GitOutcome {
        if let Some(branch) = branch {
            let outcome = self.run(self.git(path).args(["checkout", branch])).await;
            if !outcome.success {
                return outcome;
            }
        }

        let outcome = self.run(self.git(path).arg("pull")).await;
        if !outcome.success {
            return outcome;
        }
        debug!("Pulled {}: {}", path.display(), outcome.output);

        let commit = self.short_commit(path).await.unwrap_or_default();
        GitOutcome::ok(commit)
    }

    /// Throw away uncommitted changes in the working tree
    pub async fn discard_local_changes(&self, path: &Path) -> GitOutcome {
        self.run(self.git(path).args(["reset", "--hard", "HEAD"])).await
    }

    async fn short_commit(&self, path: &Path) -> Option<String> {
        self.query(path, &["rev-parse", "--short", "HEAD"]).await
    }

    /// Full hash of HEAD
    pub async fn current_commit(&self, path: &Path) -> Option<String> {
        self.query(path, &["rev-parse", "HEAD"]).await
    }

    pub async fn current_branch(&self, path: &Path) -> Option<String> {
        self.query(path, &["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    async fn query(&self, path: &Path, args: &[&str]) -> Option<String> {
        let outcome = self.run(self.git(path).args(args)).await;
        if outcome.success && !outcome.output.is_empty() {
            Some(outcome.output)
        } else {
            None
        }
    }

    /// Hard reset one commit behind HEAD
    pub async fn reset_to_previous(&self, path: &Path) -> bool {
        self.reset(path, "HEAD~1").await
    }

    /// Hard reset to an exact commit
    pub async fn reset_to_commit(&self, path: &Path, commit: &str) -> bool {
        self.reset(path, commit).await
    }

    async fn reset(&self, path: &Path, target: &str) -> bool {
        let outcome = self.run(self.git(path).args(["reset", "--hard", target])).await;
        if !outcome.success {
            warn!("git reset --hard {} in {} failed: {}", target, path.display(), outcome.output);
        }
        outcome.success
    }
}
