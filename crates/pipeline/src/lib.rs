//! Domain core for auto-pr-bot.
//!
//! This crate holds the domain concepts, newtype identifiers, stage machine,
//! and port traits the bot is built from. Infrastructure crates implement the
//! traits defined here; they never add domain rules.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; infrastructure crates define *how* to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`RequestId`, `BranchName`, `RepoPath`, etc.) |
//! | [`types`] | Shared value types (`Timestamp`, `Clock`, `RepositoryRef`, `FileChangeSet`) |
//! | [`errors`] | Run-ending errors and the retry-policy type |
//! | [`stage`] | Processing stages, step numbers and legal transitions |
//! | [`request`] | Change-request payload and input validation |
//! | [`store`] | Key-value store port shared by progress and rate limiting |
//! | [`rate_limit`] | Per-client sliding-window limiter |
//! | [`progress`] | Per-request progress records |
//! | [`reconcile`] | Policy for existing bot pull requests |
//! | [`content`] | Context truncation, commit and pull-request text |
//! | [`github`], [`git`], [`llm`], [`dispatch`] | Port traits for external systems |

pub mod content;
pub mod dispatch;
pub mod errors;
pub mod git;
pub mod github;
pub mod identifiers;
pub mod llm;
pub mod progress;
pub mod rate_limit;
pub mod reconcile;
pub mod request;
pub mod stage;
pub mod store;
pub mod types;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use dispatch::{DispatchError, DispatchTask, TaskQueue};
pub use errors::{PipelineError, RetryPolicy};
pub use git::{CommitOutcome, GitError, GitOperations};
pub use github::{HostedRepository, NewPullRequest, PullRequest, VcsError, VersionControlHost};
pub use identifiers::{
    BranchName, ClientAddress, GitHubLogin, PullRequestNumber, RepoPath, RequestId,
};
pub use llm::{
    ChatMessage, ChatRequest, Conversation, LanguageModel, LlmError, ResponseFormat, Role,
};
pub use progress::{ProgressError, ProgressRecord, ProgressTracker};
pub use rate_limit::{RateLimitDecision, RateLimitRecord, RateLimiter};
pub use reconcile::{reconcile, ReconcileDecision, Supersession};
pub use request::{ChangeRequest, InputError, RequestPayload};
pub use stage::Stage;
pub use store::{IndexKey, KeyValueStore, StoreError, StoredItem};
pub use types::{Clock, FileChangeSet, ManualClock, RepositoryRef, SystemClock, Timestamp};
