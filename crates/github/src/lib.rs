//! auto-pr-bot GitHub infrastructure adapter.
//!
//! Implements [`pipeline::VersionControlHost`] against the GitHub REST API
//! (`/user`, `/repos/.../forks`, `/pulls`, `/issues/.../comments`,
//! `/git/refs`, `/collaborators`) with a bearer token supplied once at start-up.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules.
//! All GitHub API details (headers, URL layout, response shapes, status
//! mapping) are handled here; the [`pipeline`] crate never sees them.
//!
//! Calls are made once; the pipeline treats every failure here as final for
//! the stage that issued it.

mod client;

pub use client::{GitHubClient, GitHubConfig, DEFAULT_API_BASE};
