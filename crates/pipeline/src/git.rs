//! Local version-control operations on a pipeline workspace.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::{BranchName, RepositoryRef};

/// Result of staging and committing a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    /// A commit was created and the branch pushed.
    Pushed,
    /// The working tree had no changes against the branch point.
    NoChanges,
}

/// Errors raised by [`GitOperations`].
#[derive(Debug, Error)]
pub enum GitError {
    /// A git command exited unsuccessfully.
    #[error("git {command} failed: {output}")]
    Command {
        /// Sub-command label, e.g. `"clone"`.
        command: String,
        /// Combined output with credentials redacted.
        output: String,
    },

    /// The git binary could not be spawned.
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),
}

/// The git steps of one pipeline run.
#[async_trait]
pub trait GitOperations: Send + Sync {
    /// Clones `clone_url` into `destination`.
    async fn clone_repository(&self, clone_url: &str, destination: &Path) -> Result<(), GitError>;

    /// Makes the checkout's `default_branch` identical to upstream's.
    ///
    /// Adds `upstream` as a secondary remote when absent, fetches it and
    /// hard-resets the local default branch onto it.
    async fn reset_to_upstream(
        &self,
        checkout: &Path,
        upstream: &RepositoryRef,
        default_branch: &BranchName,
    ) -> Result<(), GitError>;

    /// Creates `branch` from the current HEAD and switches to it.
    async fn create_branch(&self, checkout: &Path, branch: &BranchName) -> Result<(), GitError>;

    /// Stages everything; commits with `message` and pushes `branch` unless
    /// the tree is clean.
    async fn commit_and_push(
        &self,
        checkout: &Path,
        branch: &BranchName,
        message: &str,
    ) -> Result<CommitOutcome, GitError>;
}
