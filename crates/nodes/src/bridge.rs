//! Dispatch bridge between the latency-bounded accept path and the
//! unbounded process path.
//!
//! An external invocation is validated, rate limited, given a [`RequestId`],
//! recorded as `pending` and handed to a [`TaskQueue`]; it never runs pipeline
//! work itself. An internal invocation carries the queued [`DispatchTask`] back
//! in and runs the [`ModificationPipeline`] to a terminal state.

use std::sync::Arc;

use pipeline::dispatch::{DispatchError, DispatchTask, TaskQueue};
use pipeline::rate_limit::{RateLimitDecision, RateLimiter};
use pipeline::request::{ChangeRequest, InputError};
use pipeline::{ClientAddress, ProgressTracker, RequestId, Stage};
use tracing::{error, info, instrument, warn};

use crate::executor::{ModificationPipeline, ProcessOutcome};

/// How the bridge was entered.
#[derive(Debug, Clone)]
pub enum Invocation {
    /// A caller submitted a raw request body.
    External {
        client_address: ClientAddress,
        body: Vec<u8>,
    },
    /// A queued task is ready to run.
    Internal(DispatchTask),
}

/// Result of the accept path.
#[derive(Debug)]
pub enum AcceptReply {
    /// Queued for processing.
    Accepted {
        request_id: RequestId,
        repository: String,
    },
    /// The body was malformed or incomplete.
    InvalidInput(InputError),
    /// The client has used its window.
    RateLimited(RateLimitDecision),
    /// The work queue is full.
    AtCapacity { request_id: RequestId },
    /// The work queue could not take the task.
    DispatchFailed {
        request_id: RequestId,
        message: String,
    },
}

/// Result of [`DispatchBridge::handle`].
#[derive(Debug)]
pub enum BridgeReply {
    Accept(AcceptReply),
    Process {
        request_id: RequestId,
        outcome: ProcessOutcome,
    },
}

/// The single entry point for both invocation kinds.
#[derive(Clone)]
pub struct DispatchBridge {
    limiter: RateLimiter,
    tracker: ProgressTracker,
    queue: Arc<dyn TaskQueue>,
    pipeline: ModificationPipeline,
}

impl DispatchBridge {
    pub fn new(
        limiter: RateLimiter,
        tracker: ProgressTracker,
        queue: Arc<dyn TaskQueue>,
        pipeline: ModificationPipeline,
    ) -> Self {
        Self {
            limiter,
            tracker,
            queue,
            pipeline,
        }
    }

    /// Progress tracker shared with the pipeline, for status reads.
    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Routes an invocation to the accept or process path.
    pub async fn handle(&self, invocation: Invocation) -> BridgeReply {
        match invocation {
            Invocation::External {
                client_address,
                body,
            } => BridgeReply::Accept(self.accept(&client_address, &body).await),
            Invocation::Internal(task) => {
                let request_id = task.request_id;
                BridgeReply::Process {
                    request_id,
                    outcome: self.process(task).await,
                }
            }
        }
    }

    /// Accept path: validate, rate limit, record and enqueue.
    #[instrument(skip_all, fields(client = %client))]
    pub async fn accept(&self, client: &ClientAddress, body: &[u8]) -> AcceptReply {
        let request = match ChangeRequest::from_json(body) {
            Ok(request) => request,
            Err(e) => {
                info!(error = %e, "request rejected at intake");
                return AcceptReply::InvalidInput(e);
            }
        };

        let decision = self.limiter.check(client).await;
        if !decision.allowed {
            warn!(used = decision.used, limit = decision.limit, "rate limit exceeded");
            return AcceptReply::RateLimited(decision);
        }

        let request_id = RequestId::new_random();
        let url = request.repository_url().to_string();
        self.limiter.record(client, request_id).await;
        self.tracker
            .update(
                request_id,
                Stage::Pending,
                "Request received, starting processing...",
                Stage::Pending.step(),
                &url,
            )
            .await;

        let task = DispatchTask {
            request: request.to_payload(),
            request_id,
        };
        match self.queue.enqueue(task).await {
            Ok(()) => {
                info!(request_id = %request_id, repository = %url, "request accepted");
                AcceptReply::Accepted {
                    request_id,
                    repository: url,
                }
            }
            Err(DispatchError::AtCapacity) => {
                warn!(request_id = %request_id, "dispatch queue at capacity");
                self.tracker
                    .error(request_id, "Bot was at capacity; the request was not started", &url)
                    .await;
                AcceptReply::AtCapacity { request_id }
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "failed to dispatch request");
                let message = format!("Failed to start async processing: {e}");
                self.tracker.error(request_id, &message, &url).await;
                AcceptReply::DispatchFailed {
                    request_id,
                    message: e.to_string(),
                }
            }
        }
    }

    /// Process path: run the pipeline and record the terminal state.
    #[instrument(skip_all, fields(request_id = %task.request_id))]
    pub async fn process(&self, task: DispatchTask) -> ProcessOutcome {
        let request_id = task.request_id;
        let url = task.request.repository_url.clone();
        let request = match ChangeRequest::try_from(task.request) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "queued task carries an invalid request");
                let detail = e.to_string();
                self.tracker.error(request_id, &detail, &url).await;
                return ProcessOutcome::Failed { detail };
            }
        };

        self.pipeline.execute(request_id, &request).await
    }
}
