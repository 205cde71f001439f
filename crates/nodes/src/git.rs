//! [`GitOperations`] over the `git` command-line client.
//!
//! The access token is embedded in the clone URL so the later push to
//! `origin` authenticates without a credential helper. It is scrubbed from
//! every command line and output captured into a [`GitError`].

use std::path::Path;

use async_trait::async_trait;
use pipeline::git::{CommitOutcome, GitError, GitOperations};
use pipeline::{BranchName, RepositoryRef};
use tokio::process::Command;
use tracing::{debug, info, instrument};

const REDACTED: &str = "***";

/// Author identity and credentials for [`GitCli`].
#[derive(Debug, Clone)]
pub struct GitIdentity {
    pub author_name: String,
    pub author_email: String,
    pub token: String,
    /// Web root used to build upstream remote URLs, e.g. `https://github.com`.
    pub web_base: String,
}

/// Runs `git` subprocesses.
#[derive(Debug, Clone)]
pub struct GitCli {
    identity: GitIdentity,
}

impl GitCli {
    pub fn new(identity: GitIdentity) -> Self {
        Self { identity }
    }

    /// Inserts the token as the user part of an `https://` URL.
    fn authenticated_url(&self, url: &str) -> String {
        match url.strip_prefix("https://") {
            Some(rest) if !self.identity.token.is_empty() => {
                format!("https://x-access-token:{}@{rest}", self.identity.token)
            }
            _ => url.to_string(),
        }
    }

    fn redact(&self, text: &str) -> String {
        if self.identity.token.is_empty() {
            text.to_string()
        } else {
            text.replace(&self.identity.token, REDACTED)
        }
    }

    async fn git(&self, dir: Option<&Path>, args: &[&str]) -> Result<String, GitError> {
        let mut command = Command::new("git");
        command
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            debug!(command = %self.redact(&args.join(" ")), "git succeeded");
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(GitError::Command {
            command: self.redact(&args.join(" ")),
            output: self.redact(format!("{}{}", stderr.trim(), stdout.trim()).trim()),
        })
    }
}

#[async_trait]
impl GitOperations for GitCli {
    #[instrument(skip_all, fields(destination = %destination.display()))]
    async fn clone_repository(&self, clone_url: &str, destination: &Path) -> Result<(), GitError> {
        let url = self.authenticated_url(clone_url);
        let destination_arg = destination.to_string_lossy();
        self.git(None, &["clone", "--quiet", &url, &destination_arg])
            .await?;
        info!("repository cloned");
        Ok(())
    }

    #[instrument(skip_all, fields(upstream = %upstream, branch = %default_branch))]
    async fn reset_to_upstream(
        &self,
        checkout: &Path,
        upstream: &RepositoryRef,
        default_branch: &BranchName,
    ) -> Result<(), GitError> {
        let dir = Some(checkout);
        let remotes = self.git(dir, &["remote"]).await?;
        if !remotes.lines().any(|r| r.trim() == "upstream") {
            let url = self.authenticated_url(&format!(
                "{}/{}/{}.git",
                self.identity.web_base.trim_end_matches('/'),
                upstream.owner,
                upstream.name
            ));
            self.git(dir, &["remote", "add", "upstream", &url]).await?;
        }
        let branch = default_branch.as_str();
        let tracking = format!("upstream/{branch}");
        self.git(dir, &["fetch", "--quiet", "upstream", branch]).await?;
        self.git(dir, &["checkout", "--quiet", "-B", branch, &tracking])
            .await?;
        self.git(dir, &["reset", "--hard", "--quiet", &tracking]).await?;
        info!("default branch reset to upstream");
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch))]
    async fn create_branch(&self, checkout: &Path, branch: &BranchName) -> Result<(), GitError> {
        self.git(Some(checkout), &["checkout", "--quiet", "-b", branch.as_str()])
            .await?;
        Ok(())
    }

    #[instrument(skip_all, fields(branch = %branch))]
    async fn commit_and_push(
        &self,
        checkout: &Path,
        branch: &BranchName,
        message: &str,
    ) -> Result<CommitOutcome, GitError> {
        let dir = Some(checkout);
        self.git(dir, &["add", "-A"]).await?;
        let status = self.git(dir, &["status", "--porcelain"]).await?;
        if status.trim().is_empty() {
            info!("working tree clean; nothing to commit");
            return Ok(CommitOutcome::NoChanges);
        }
        let name = format!("user.name={}", self.identity.author_name);
        let email = format!("user.email={}", self.identity.author_email);
        self.git(dir, &["-c", &name, "-c", &email, "commit", "--quiet", "-m", message])
            .await?;
        self.git(dir, &["push", "--quiet", "origin", branch.as_str()])
            .await?;
        info!("changes committed and pushed");
        Ok(CommitOutcome::Pushed)
    }
}
