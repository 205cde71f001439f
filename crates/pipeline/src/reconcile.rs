//! Pull-request reconciliation policy.
//!
//! Only pull requests whose head is the fork's *default* branch take part: the
//! caller lists them with a head filter on that branch. Pull requests from
//! per-run feature branches are never closed here, so one repository can carry
//! several independent bot pull requests at once.

use crate::{BranchName, CommitOutcome, PullRequest};

/// One pull request to close before opening the new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Supersession {
    /// The pull request to close.
    pub pull_request: PullRequest,
    /// Branch to delete afterwards; `None` when the head is the default branch.
    pub delete_branch: Option<BranchName>,
}

/// What the pipeline should do after commit and push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileDecision {
    /// Nothing changed and an open pull request already covers the request.
    ReuseExisting(PullRequest),
    /// Nothing changed and nothing to point to.
    NothingToSubmit,
    /// New changes were pushed: close `supersede` (possibly empty), then open a
    /// pull request from the run branch.
    CreateNew {
        /// Pull requests replaced by the new one.
        supersede: Vec<Supersession>,
    },
}

/// Decides how the run's commit relates to existing default-branch pull requests.
///
/// `existing` is the list of open bot pull requests returned by a head query on
/// the fork's default branch. A superseded pull request's branch is deleted
/// unless it is `default_branch` itself.
pub fn reconcile(
    commit: CommitOutcome,
    existing: &[PullRequest],
    default_branch: &BranchName,
) -> ReconcileDecision {
    match commit {
        CommitOutcome::NoChanges => match existing.first().cloned() {
            Some(pr) => ReconcileDecision::ReuseExisting(pr),
            None => ReconcileDecision::NothingToSubmit,
        },
        CommitOutcome::Pushed => ReconcileDecision::CreateNew {
            supersede: existing
                .iter()
                .cloned()
                .map(|pr| Supersession {
                    delete_branch: (pr.head_ref != *default_branch).then(|| pr.head_ref.clone()),
                    pull_request: pr,
                })
                .collect(),
        },
    }
}
