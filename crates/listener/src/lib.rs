//! auto-pr-bot request intake.
//!
//! Two halves of the dispatch bridge's transport live here:
//!
//! - [`server`] binds an HTTP listener (axum) that turns `POST /` into an
//!   external invocation and serves `GET /status/{request_id}` from the
//!   progress tracker. Every response carries permissive CORS headers.
//!
//! - [`queue`] provides the bounded in-process [`ChannelQueue`] handed to the
//!   bridge as its [`pipeline::TaskQueue`], and [`run_workers`], which drains
//!   it and re-enters the bridge as an internal invocation.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** Transport details (status codes, JSON bodies, header
//! parsing, channel capacity) stay here. The bridge in [`nodes`] sees only
//! raw request bodies, client addresses and [`pipeline::DispatchTask`]s.

use std::net::SocketAddr;

use thiserror::Error;

pub mod queue;
pub mod server;

pub use queue::{run_workers, ChannelQueue};
pub use server::{router, serve, MAX_BODY_BYTES};

/// Errors raised while serving the intake.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The listen address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}
