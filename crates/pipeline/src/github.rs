//! Version-control host port.
//!
//! The pipeline needs eight operations from the hosting service. They are
//! expressed here in domain terms; the `github` crate supplies the REST
//! implementation. Calls through this port are not retried by the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{BranchName, GitHubLogin, PullRequestNumber, RepositoryRef};

/// A repository as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedRepository {
    /// `owner/name` of this repository.
    pub repository: RepositoryRef,
    /// Browser URL.
    pub html_url: String,
    /// HTTPS clone URL.
    pub clone_url: String,
    /// Whether this repository is a fork.
    pub is_fork: bool,
}

/// An open pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Number within the base repository.
    pub number: PullRequestNumber,
    /// Browser URL.
    pub html_url: String,
    /// Source branch name (without owner prefix).
    pub head_ref: BranchName,
}

/// Parameters for opening a pull request from a fork branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPullRequest {
    /// Repository the pull request targets.
    pub base_repository: RepositoryRef,
    /// Owner of the fork holding the head branch.
    pub head_owner: GitHubLogin,
    /// Head branch on the fork.
    pub head: BranchName,
    /// Base branch on the target repository.
    pub base: BranchName,
    /// Title.
    pub title: String,
    /// Markdown body.
    pub body: String,
}

/// Errors returned by a [`VersionControlHost`].
#[derive(Debug, Error)]
pub enum VcsError {
    /// The host answered with a non-success status.
    #[error("{operation} failed with status {status}: {message}")]
    Api {
        /// Operation label, e.g. `"create pull request"`.
        operation: String,
        /// HTTP status code.
        status: u16,
        /// Upstream message, preserved for the progress record.
        message: String,
    },

    /// The request never produced a response.
    #[error("{operation} request failed: {message}")]
    Transport {
        /// Operation label.
        operation: String,
        /// Transport-level description.
        message: String,
    },

    /// The response body did not have the expected shape.
    #[error("failed to decode {operation} response: {message}")]
    Decode {
        /// Operation label.
        operation: String,
        /// Decoder description.
        message: String,
    },
}

impl VcsError {
    /// HTTP status for [`VcsError::Api`], if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            VcsError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Operations the pipeline performs against the hosting service.
#[async_trait]
pub trait VersionControlHost: Send + Sync {
    /// Login of the account the credential authenticates as.
    async fn authenticated_user(&self) -> Result<GitHubLogin, VcsError>;

    /// Returns the bot's fork of `upstream`, creating it if none exists.
    async fn fork_repository(&self, upstream: &RepositoryRef)
        -> Result<HostedRepository, VcsError>;

    /// Default branch of `repository`.
    async fn default_branch(&self, repository: &RepositoryRef) -> Result<BranchName, VcsError>;

    /// Opens a pull request.
    async fn create_pull_request(&self, request: &NewPullRequest)
        -> Result<PullRequest, VcsError>;

    /// Open pull requests on `repository` whose head is `head_owner:head`.
    async fn list_open_pull_requests(
        &self,
        repository: &RepositoryRef,
        head_owner: &GitHubLogin,
        head: &BranchName,
    ) -> Result<Vec<PullRequest>, VcsError>;

    /// Leaves `comment` on the pull request, then closes it.
    async fn close_pull_request(
        &self,
        repository: &RepositoryRef,
        number: PullRequestNumber,
        comment: &str,
    ) -> Result<(), VcsError>;

    /// Deletes `branch` from `repository`.
    async fn delete_branch(
        &self,
        repository: &RepositoryRef,
        branch: &BranchName,
    ) -> Result<(), VcsError>;

    /// Grants `user` push access to `repository`.
    async fn add_collaborator(
        &self,
        repository: &RepositoryRef,
        user: &GitHubLogin,
    ) -> Result<(), VcsError>;
}
