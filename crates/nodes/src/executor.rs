//! The modification pipeline: one strictly sequential run per request.
//!
//! [`ModificationPipeline::run`] drives a request from `validating` to
//! `completed`, writing a progress record as each stage starts. It writes the
//! `rejected` record itself and returns any other failure.
//! [`ModificationPipeline::execute`] also records that failure as `error`, so
//! every run it drives ends in a terminal record.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use pipeline::content::{
    commit_message, pull_request_body, pull_request_title, supersession_comment,
    truncate_for_context, TruncationLimits,
};
use pipeline::github::{HostedRepository, NewPullRequest, VersionControlHost};
use pipeline::git::GitOperations;
use pipeline::reconcile::{reconcile, ReconcileDecision};
use pipeline::{
    BranchName, ChangeRequest, Clock, CommitOutcome, FileChangeSet, GitHubLogin, PipelineError,
    ProgressTracker, RepoPath, RequestId, Stage,
};
use tracing::{error, info, instrument, warn};

use crate::gateway::{ModelGateway, PromptVerdict};
use crate::workspace::Workspace;

/// Tunables for a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Parent directory for per-run workspaces.
    pub workspace_root: PathBuf,
    /// Prefix of run branch names.
    pub branch_prefix: String,
    pub truncation: TruncationLimits,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workspace_root: std::env::temp_dir(),
            branch_prefix: "auto-pr-bot".to_string(),
            truncation: TruncationLimits::default(),
        }
    }
}

/// Collaborators shared by every run, built once at start-up.
#[derive(Clone)]
pub struct PipelineContext {
    pub vcs: Arc<dyn VersionControlHost>,
    pub git: Arc<dyn GitOperations>,
    pub gateway: ModelGateway,
    pub tracker: ProgressTracker,
    pub clock: Arc<dyn Clock>,
    pub settings: PipelineSettings,
}

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// A new pull request was opened.
    Created {
        pr_url: String,
        /// Pull requests closed in favour of the new one.
        superseded: usize,
    },
    /// No new changes; an open pull request already covers the request.
    AlreadySatisfied { pr_url: String },
}

impl RunOutcome {
    /// URL of the pull request that satisfies the request.
    pub fn pr_url(&self) -> &str {
        match self {
            RunOutcome::Created { pr_url, .. } | RunOutcome::AlreadySatisfied { pr_url } => pr_url,
        }
    }
}

/// Terminal state of an executed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(RunOutcome),
    Rejected { reason: String },
    Failed { detail: String },
}

/// Executes modification runs.
#[derive(Clone)]
pub struct ModificationPipeline {
    ctx: PipelineContext,
}

/// State carried from one stage to the next.
struct RunState<'a> {
    id: RequestId,
    request: &'a ChangeRequest,
    login: GitHubLogin,
    fork: HostedRepository,
    default_branch: BranchName,
    branch: BranchName,
    analysed: Vec<RepoPath>,
    explanation: String,
    changes: FileChangeSet,
}

impl ModificationPipeline {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.ctx.tracker
    }

    /// Runs `request` and records how it ended.
    ///
    /// A rejection keeps the `rejected` record written by [`Self::run`]; any
    /// other failure is written as `error` with the failure's text as detail.
    pub async fn execute(&self, id: RequestId, request: &ChangeRequest) -> ProcessOutcome {
        match self.run(id, request).await {
            Ok(outcome) => {
                info!(request_id = %id, pr_url = %outcome.pr_url(), "request completed");
                ProcessOutcome::Completed(outcome)
            }
            Err(PipelineError::Rejected { reason }) => ProcessOutcome::Rejected { reason },
            Err(e) => {
                let detail = e.to_string();
                error!(request_id = %id, error = %detail, "request failed");
                self.ctx
                    .tracker
                    .error(id, &detail, request.repository_url())
                    .await;
                ProcessOutcome::Failed { detail }
            }
        }
    }

    /// Runs every stage for `request`.
    #[instrument(
        name = "modification_run",
        skip_all,
        fields(request_id = %id, repository = %request.repository())
    )]
    pub async fn run(
        &self,
        id: RequestId,
        request: &ChangeRequest,
    ) -> Result<RunOutcome, PipelineError> {
        let url = request.repository_url();
        let tracker = &self.ctx.tracker;

        tracker.advance(id, Stage::Validating, "Validating modification request...", url).await;
        self.validate(id, request).await?;

        tracker.advance(id, Stage::Forking, "Forking repository...", url).await;
        let vcs = &self.ctx.vcs;
        let upstream = request.repository();
        let fork = vcs
            .fork_repository(upstream)
            .await
            .map_err(PipelineError::vcs("fork failed"))?;
        let login = vcs
            .authenticated_user()
            .await
            .map_err(PipelineError::vcs("failed to get user info"))?;
        info!(fork = %fork.html_url, login = %login, "fork ready");

        tracker.advance(id, Stage::Cloning, "Cloning forked repository...", url).await;
        let workspace = Workspace::create(&self.ctx.settings.workspace_root, id)
            .map_err(PipelineError::Workspace)?;
        let git = &self.ctx.git;
        git.clone_repository(&fork.clone_url, workspace.checkout())
            .await
            .map_err(PipelineError::git("clone failed"))?;
        let default_branch = vcs
            .default_branch(upstream)
            .await
            .map_err(PipelineError::vcs("failed to get default branch"))?;
        git.reset_to_upstream(workspace.checkout(), upstream, &default_branch)
            .await
            .map_err(PipelineError::git("failed to reset to upstream"))?;
        let branch = self.branch_name(id);
        git.create_branch(workspace.checkout(), &branch)
            .await
            .map_err(PipelineError::git("failed to create branch"))?;

        let mut state = RunState {
            id,
            request,
            login,
            fork,
            default_branch,
            branch,
            analysed: Vec::new(),
            explanation: String::new(),
            changes: FileChangeSet::new(),
        };

        self.modify(&mut state, &workspace).await?;

        tracker.advance(id, Stage::Committing, "Committing and pushing changes...", url).await;
        let commit = git
            .commit_and_push(
                workspace.checkout(),
                &state.branch,
                &commit_message(request.prompt(), &state.explanation),
            )
            .await
            .map_err(PipelineError::git("failed to commit and push"))?;

        let outcome = self.submit(&state, commit).await?;
        self.grant_collaborator(&state).await;
        self.log_summary(&state, &outcome);
        Ok(outcome)
    }

    async fn validate(&self, id: RequestId, request: &ChangeRequest) -> Result<(), PipelineError> {
        match self.ctx.gateway.validate_prompt(request.prompt()).await {
            Ok(PromptVerdict::Actionable { reason }) => {
                info!(reason = %reason, "prompt validation passed");
                Ok(())
            }
            Ok(PromptVerdict::NotActionable { reason }) => {
                warn!(reason = %reason, "prompt rejected");
                self.ctx
                    .tracker
                    .reject(id, &reason, request.repository_url())
                    .await;
                Err(PipelineError::Rejected { reason })
            }
            Err(e) => {
                warn!(error = %e, "prompt validation unavailable; continuing");
                Ok(())
            }
        }
    }

    /// Analyse, read, plan, generate and write.
    async fn modify(
        &self,
        state: &mut RunState<'_>,
        workspace: &Workspace,
    ) -> Result<(), PipelineError> {
        let tracker = &self.ctx.tracker;
        let gateway = &self.ctx.gateway;
        let prompt = state.request.prompt();
        let url = state.request.repository_url();

        tracker.advance(state.id, Stage::Analyzing, "Analyzing repository with AI...", url).await;
        let tree = workspace.tree().await.map_err(PipelineError::Workspace)?;
        let (mut conversation, to_read) = gateway
            .analyze_repository(&tree, prompt)
            .await
            .map_err(PipelineError::llm("failed to analyze repository"))?;
        state.analysed = to_read.clone();

        let mut originals: BTreeMap<RepoPath, String> = BTreeMap::new();
        let mut context: BTreeMap<RepoPath, String> = BTreeMap::new();
        for path in to_read {
            if !path.is_contained() {
                warn!(path = %path, "skipping path outside the repository");
                continue;
            }
            match workspace.read_file(&path).await {
                Ok(content) => {
                    let excerpt = truncate_for_context(&content, self.ctx.settings.truncation);
                    context.insert(path.clone(), excerpt);
                    originals.insert(path, content);
                }
                Err(e) => warn!(path = %path, error = %e, "failed to read file"),
            }
        }
        if context.is_empty() {
            warn!("no files could be read; planning from the tree alone");
        }

        let plan = gateway
            .plan_modifications(&mut conversation, &context, prompt)
            .await
            .map_err(PipelineError::llm("failed to determine files to modify"))?;
        info!(files = plan.files.len(), explanation = %plan.explanation, "modification planned");
        state.explanation = plan.explanation;
        tracker
            .advance(state.id, Stage::Modifying, "Generating code modifications with AI...", url)
            .await;
        for path in plan.files {
            if !path.is_contained() {
                warn!(path = %path, "skipping path outside the repository");
                continue;
            }
            let original = match originals.remove(&path) {
                Some(content) => content,
                None => match workspace.read_file(&path).await {
                    Ok(content) => content,
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {
                        info!(path = %path, "creating new file");
                        String::new()
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "unreadable file dropped from generation");
                        continue;
                    }
                },
            };
            match gateway.generate_file(&conversation, &path, &original, prompt).await {
                Ok(content) => {
                    info!(path = %path, bytes = content.len(), "file generated");
                    state.changes.insert(path, content);
                }
                Err(e) => warn!(path = %path, error = %e, "failed to generate file"),
            }
        }
        if state.changes.is_empty() {
            return Err(PipelineError::NothingGenerated);
        }

        for (path, content) in state.changes.iter() {
            workspace
                .write_file(path, content)
                .await
                .map_err(|source| PipelineError::WriteFile {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Reconcile with existing pull requests, then open one if needed.
    async fn submit(
        &self,
        state: &RunState<'_>,
        commit: CommitOutcome,
    ) -> Result<RunOutcome, PipelineError> {
        let vcs = &self.ctx.vcs;
        let upstream = state.request.repository();
        let url = state.request.repository_url();
        let prompt = state.request.prompt();

        let existing = match vcs
            .list_open_pull_requests(upstream, &state.login, &state.default_branch)
            .await
        {
            Ok(prs) => prs,
            Err(e) => {
                warn!(error = %e, "failed to list existing pull requests");
                Vec::new()
            }
        };

        let supersede = match reconcile(commit, &existing, &state.default_branch) {
            ReconcileDecision::ReuseExisting(pr) => {
                info!(pr = %pr.html_url, "no new changes; existing pull request stands");
                self.ctx.tracker.complete(state.id, &pr.html_url, url).await;
                return Ok(RunOutcome::AlreadySatisfied { pr_url: pr.html_url });
            }
            ReconcileDecision::NothingToSubmit => return Err(PipelineError::NothingToSubmit),
            ReconcileDecision::CreateNew { supersede } => supersede,
        };

        let comment = supersession_comment(prompt);
        for old in &supersede {
            let number = old.pull_request.number;
            match vcs.close_pull_request(upstream, number, &comment).await {
                Ok(()) => info!(number = %number, "superseded pull request closed"),
                Err(e) => warn!(number = %number, error = %e, "failed to close pull request"),
            }
            match &old.delete_branch {
                Some(branch) => match vcs.delete_branch(&state.fork.repository, branch).await {
                    Ok(()) => info!(branch = %branch, "superseded branch deleted"),
                    Err(e) => warn!(branch = %branch, error = %e, "failed to delete branch"),
                },
                None => info!(branch = %old.pull_request.head_ref, "keeping default branch"),
            }
        }
        self.ctx
            .tracker
            .advance(state.id, Stage::CreatingPullRequest, "Creating pull request...", url)
            .await;
        let pr = vcs
            .create_pull_request(&NewPullRequest {
                base_repository: upstream.clone(),
                head_owner: state.login.clone(),
                head: state.branch.clone(),
                base: state.default_branch.clone(),
                title: pull_request_title(prompt),
                body: pull_request_body(prompt, &state.explanation, state.changes.paths()),
            })
            .await
            .map_err(PipelineError::vcs("failed to create pull request"))?;
        info!(pr = %pr.html_url, "pull request created");
        self.ctx.tracker.complete(state.id, &pr.html_url, url).await;
        Ok(RunOutcome::Created {
            pr_url: pr.html_url,
            superseded: supersede.len(),
        })
    }

    async fn grant_collaborator(&self, state: &RunState<'_>) {
        let Some(user) = state.request.collaborator() else {
            return;
        };
        match self.ctx.vcs.add_collaborator(&state.fork.repository, user).await {
            Ok(()) => info!(
                user = %user,
                fork = %state.fork.repository,
                "collaborator granted push access"
            ),
            Err(e) => warn!(
                user = %user,
                fork = %state.fork.repository,
                error = %e,
                "failed to add collaborator; the pull request stands"
            ),
        }
    }

    fn branch_name(&self, id: RequestId) -> BranchName {
        BranchName::for_run(&self.ctx.settings.branch_prefix, self.ctx.clock.now(), id)
    }

    fn log_summary(&self, state: &RunState<'_>, outcome: &RunOutcome) {
        let analysed: Vec<&str> = state.analysed.iter().map(RepoPath::as_str).collect();
        let modified: Vec<&str> = state.changes.paths().map(RepoPath::as_str).collect();
        info!(
            repository = %state.request.repository(),
            fork = %state.fork.html_url,
            prompt = %state.request.prompt(),
            files_analysed = ?analysed,
            files_modified = ?modified,
            explanation = %state.explanation,
            pr_url = %outcome.pr_url(),
            "modification summary"
        );
    }
}
