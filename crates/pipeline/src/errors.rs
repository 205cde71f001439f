//! Top-level error and retry-policy types for the auto-pr-bot domain.
//!
//! [`PipelineError`] covers conditions that end a modification run. Port-level
//! errors ([`crate::github::VcsError`], [`crate::llm::LlmError`],
//! [`crate::git::GitError`]) are defined next to their ports and wrapped here
//! with the stage context in which they occurred.
//!
//! [`RetryPolicy`] is a cross-cutting concern: any error type that participates
//! in retry decisions must be able to produce a [`RetryPolicy`].

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{GitError, LlmError, RepoPath, VcsError};

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether an error condition is safe to retry and, if so, after what delay.
///
/// Returned by infrastructure error types to let the caller decide whether to
/// re-invoke an operation.
///
/// - `Retryable` errors: API timeouts, transient rate-limit responses, server
///   errors.
/// - `NonRetryable` errors: client errors, malformed responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The operation may be retried.
    ///
    /// `after` optionally specifies the minimum delay before retrying (e.g.
    /// derived from a `Retry-After` response header).
    Retryable {
        /// Minimum back-off before the next attempt. `None` means apply the
        /// caller's own back-off schedule.
        after: Option<Duration>,
    },
    /// The operation must not be retried.
    NonRetryable,
}

// ---------------------------------------------------------------------------
// Pipeline-level errors
// ---------------------------------------------------------------------------

/// Errors that end a modification run.
///
/// Every variant except [`PipelineError::Rejected`] is reported to observers as
/// the run's terminal `error` stage. A rejection has already been recorded as
/// `rejected` by the time it is returned and must not be overwritten.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The model judged the prompt not actionable.
    #[error("prompt validation failed: {reason}")]
    Rejected {
        /// The model's stated reason.
        reason: String,
    },

    /// A version-control host call failed.
    #[error("{context}: {source}")]
    Vcs {
        /// What the pipeline was doing.
        context: &'static str,
        /// Upstream error.
        #[source]
        source: VcsError,
    },

    /// A model call failed where the pipeline cannot degrade.
    #[error("{context}: {source}")]
    Llm {
        /// What the pipeline was doing.
        context: &'static str,
        /// Upstream error.
        #[source]
        source: LlmError,
    },

    /// A local git operation failed.
    #[error("{context}: {source}")]
    Git {
        /// What the pipeline was doing.
        context: &'static str,
        /// Underlying error.
        #[source]
        source: GitError,
    },

    /// The per-run workspace could not be prepared or inspected.
    #[error("workspace error: {0}")]
    Workspace(#[source] std::io::Error),

    /// A generated file could not be written.
    #[error("failed to write file {path}: {source}")]
    WriteFile {
        /// Path that failed.
        path: RepoPath,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Generation produced no file at all.
    #[error("no files could be modified")]
    NothingGenerated,

    /// The tree was clean and no existing pull request covers the request.
    #[error("no changes to commit and no existing PR found")]
    NothingToSubmit,
}

impl PipelineError {
    /// Returns `true` for a validation rejection.
    pub fn is_rejection(&self) -> bool {
        matches!(self, PipelineError::Rejected { .. })
    }

    /// Wraps a host error with the stage context it occurred in.
    pub fn vcs(context: &'static str) -> impl FnOnce(VcsError) -> Self {
        move |source| PipelineError::Vcs { context, source }
    }

    /// Wraps a model error with the stage context it occurred in.
    pub fn llm(context: &'static str) -> impl FnOnce(LlmError) -> Self {
        move |source| PipelineError::Llm { context, source }
    }

    /// Wraps a git error with the stage context it occurred in.
    pub fn git(context: &'static str) -> impl FnOnce(GitError) -> Self {
        move |source| PipelineError::Git { context, source }
    }
}
