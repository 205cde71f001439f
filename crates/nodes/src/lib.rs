//! auto-pr-bot orchestration.
//!
//! This crate sequences the domain logic in [`pipeline`] against the port
//! traits it defines. It owns no transport of its own: GitHub, the language
//! model, `git` and the key-value store are all injected.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`bridge`] | Accept path (validate, rate limit, enqueue) and process path |
//! | [`executor`] | The staged modification run for one request |
//! | [`gateway`] | Prompt construction and response parsing for each model call |
//! | [`git`] | [`pipeline::GitOperations`] over the `git` command-line client |
//! | [`workspace`] | Per-run temporary checkout, tree listing and file I/O |
//!
//! ## Architectural Layer
//!
//! **Orchestration layer.** Nodes decide the order of calls and how failures
//! degrade. Business rules such as rate-limit windows, stage ordering and
//! pull request reconciliation stay in [`pipeline`].

pub mod bridge;
pub mod executor;
pub mod gateway;
pub mod git;
pub mod workspace;

pub use bridge::{AcceptReply, BridgeReply, DispatchBridge, Invocation};
pub use executor::{
    ModificationPipeline, PipelineContext, PipelineSettings, ProcessOutcome, RunOutcome,
};
pub use gateway::{ModelGateway, ModificationPlan, PromptVerdict};
pub use git::{GitCli, GitIdentity};
pub use workspace::{Workspace, MAX_TREE_ENTRIES};
