//! Asynchronous hand-off port between the accept phase and the process phase.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{RequestId, RequestPayload};

/// A queued unit of work: the original request payload tagged with its identity.
///
/// Serialises as the request fields plus `requestId`, so the queue entry is
/// the same payload the caller submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchTask {
    /// The request as received.
    #[serde(flatten)]
    pub request: RequestPayload,
    /// Identity minted at acceptance.
    #[serde(rename = "requestId")]
    pub request_id: RequestId,
}

/// Errors returned when a task cannot be handed off.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The queue is full; the caller should try again later.
    #[error("dispatch queue is at capacity")]
    AtCapacity,

    /// The queue is closed or otherwise unusable.
    #[error("dispatch queue unavailable: {0}")]
    Unavailable(String),
}

/// Fire-and-forget task queue.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues `task` without waiting for it to be processed.
    async fn enqueue(&self, task: DispatchTask) -> Result<(), DispatchError>;
}
