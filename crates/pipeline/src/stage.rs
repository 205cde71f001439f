//! The per-request progress state machine.
//!
//! A run moves strictly forward through the working stages and ends in exactly
//! one of three terminal stages. Stage values are what observers see through the
//! status interface, so their serialised names are part of the external contract.

use serde::{Deserialize, Serialize};

/// One named step of the modification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Accepted and queued; no pipeline work has started.
    Pending,
    /// The prompt is being judged actionable by the model.
    Validating,
    /// Obtaining or reusing the bot's fork.
    Forking,
    /// Cloning the fork, resetting it to upstream and creating the run branch.
    Cloning,
    /// Asking the model which files matter, reading them and planning changes.
    Analyzing,
    /// Generating and writing replacement file bodies.
    Modifying,
    /// Committing, pushing and reconciling existing pull requests.
    Committing,
    /// Opening the pull request.
    #[serde(rename = "creating_pr")]
    CreatingPullRequest,
    /// A pull request satisfies the request.
    Completed,
    /// The model judged the prompt not actionable.
    Rejected,
    /// Any other unrecoverable failure.
    Error,
}

impl Stage {
    /// Stages in the order a successful run passes through them.
    pub const FORWARD: [Stage; 9] = [
        Stage::Pending,
        Stage::Validating,
        Stage::Forking,
        Stage::Cloning,
        Stage::Analyzing,
        Stage::Modifying,
        Stage::Committing,
        Stage::CreatingPullRequest,
        Stage::Completed,
    ];

    /// The step number exposed to status observers.
    ///
    /// Failure stages report step `0`; their stage name is authoritative.
    pub fn step(self) -> u32 {
        match self {
            Stage::Pending | Stage::Validating => 0,
            Stage::Forking => 1,
            Stage::Cloning => 2,
            Stage::Analyzing => 3,
            Stage::Modifying => 4,
            Stage::Committing => 5,
            Stage::CreatingPullRequest => 6,
            Stage::Completed => 9,
            Stage::Rejected | Stage::Error => 0,
        }
    }

    /// Returns `true` for `Completed`, `Rejected` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Rejected | Stage::Error)
    }

    /// The serialised name, as reported by the status interface.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Pending => "pending",
            Stage::Validating => "validating",
            Stage::Forking => "forking",
            Stage::Cloning => "cloning",
            Stage::Analyzing => "analyzing",
            Stage::Modifying => "modifying",
            Stage::Committing => "committing",
            Stage::CreatingPullRequest => "creating_pr",
            Stage::Completed => "completed",
            Stage::Rejected => "rejected",
            Stage::Error => "error",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
