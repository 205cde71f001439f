//! In-process work queue and the worker pool that drains it.
//!
//! [`ChannelQueue`] is the [`TaskQueue`] handed to the dispatch bridge. Tasks
//! are never awaited by the accept path: a full channel is reported straight
//! back as [`DispatchError::AtCapacity`]. [`run_workers`] receives each task
//! and re-enters the bridge with [`Invocation::Internal`], running at most
//! `concurrency` pipelines at a time.
//!
//! The bridge owns a sender, so the worker loop is stopped by its shutdown
//! signal rather than by the channel closing.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use nodes::{BridgeReply, DispatchBridge, Invocation, ProcessOutcome};
use pipeline::dispatch::{DispatchError, DispatchTask, TaskQueue};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

const ABANDONED_DETAIL: &str = "Service shut down before processing started";

/// Bounded multi-producer queue of [`DispatchTask`]s.
#[derive(Debug, Clone)]
pub struct ChannelQueue {
    name: String,
    sender: mpsc::Sender<DispatchTask>,
}

impl ChannelQueue {
    /// Creates a queue holding at most `capacity` waiting tasks.
    ///
    /// `capacity` is clamped to at least one.
    pub fn bounded(
        name: impl Into<String>,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<DispatchTask>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (
            Self {
                name: name.into(),
                sender,
            },
            receiver,
        )
    }

    /// Queue identity used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl TaskQueue for ChannelQueue {
    async fn enqueue(&self, task: DispatchTask) -> Result<(), DispatchError> {
        let request_id = task.request_id;
        match self.sender.try_send(task) {
            Ok(()) => {
                debug!(queue = %self.name, request_id = %request_id, "task enqueued");
                Ok(())
            }
            Err(TrySendError::Full(_)) => Err(DispatchError::AtCapacity),
            Err(TrySendError::Closed(_)) => Err(DispatchError::Unavailable(format!(
                "queue {} is closed",
                self.name
            ))),
        }
    }
}

/// Runs queued tasks, at most `concurrency` at a time, until `shutdown`
/// resolves or every sender is dropped.
///
/// Shutdown wins over new work: once it resolves no further run is started,
/// even one already taken off the queue while waiting for a free worker. The
/// queue is closed, tasks that never started are recorded as errors, and
/// in-flight runs are awaited.
pub async fn run_workers<F>(
    mut receiver: mpsc::Receiver<DispatchTask>,
    bridge: DispatchBridge,
    concurrency: usize,
    shutdown: F,
) where
    F: Future<Output = ()>,
{
    let concurrency = concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));
    let mut running = JoinSet::new();
    tokio::pin!(shutdown);
    info!(concurrency, "dispatch workers started");

    loop {
        let task = tokio::select! {
            biased;
            _ = &mut shutdown => break,
            task = receiver.recv() => match task {
                Some(task) => task,
                None => break,
            },
        };
        while let Some(finished) = running.try_join_next() {
            log_join(finished);
        }
        let permit = tokio::select! {
            biased;
            _ = &mut shutdown => {
                abandon(&bridge, task).await;
                break;
            }
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    error!(error = %e, "worker permits closed; stopping");
                    abandon(&bridge, task).await;
                    break;
                }
            },
        };
        let bridge = bridge.clone();
        running.spawn(async move {
            let reply = bridge.handle(Invocation::Internal(task)).await;
            drop(permit);
            reply
        });
    }

    receiver.close();
    while let Ok(task) = receiver.try_recv() {
        abandon(&bridge, task).await;
    }
    while let Some(finished) = running.join_next().await {
        log_join(finished);
    }
    info!("dispatch workers stopped");
}

/// Records a task that was dequeued but never started.
async fn abandon(bridge: &DispatchBridge, task: DispatchTask) {
    warn!(request_id = %task.request_id, "shutting down before the task started");
    bridge
        .tracker()
        .error(task.request_id, ABANDONED_DETAIL, &task.request.repository_url)
        .await;
}

fn log_join(finished: Result<BridgeReply, tokio::task::JoinError>) {
    match finished {
        Ok(BridgeReply::Process {
            request_id,
            outcome,
        }) => match outcome {
            ProcessOutcome::Completed(run) => {
                info!(request_id = %request_id, pr_url = %run.pr_url(), "task finished")
            }
            ProcessOutcome::Rejected { reason } => {
                info!(request_id = %request_id, reason = %reason, "task rejected")
            }
            ProcessOutcome::Failed { detail } => {
                warn!(request_id = %request_id, detail = %detail, "task failed")
            }
        },
        Ok(BridgeReply::Accept(reply)) => {
            warn!(reply = ?reply, "worker received an accept reply")
        }
        Err(e) => error!(error = %e, "pipeline task panicked or was cancelled"),
    }
}
