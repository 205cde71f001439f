//! Progress tracking for accepted requests.
//!
//! Every write replaces the whole record and refreshes its expiry. Writes are
//! best-effort: a failure is logged and swallowed so status reporting can never
//! abort an otherwise healthy run.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::store::{KeyValueStore, StoreError, StoredItem};
use crate::{Clock, RequestId, Stage};

/// How long progress records survive after their last write.
pub const RETENTION_SECONDS: i64 = 48 * 60 * 60;

/// The current state of one request, as exposed to status readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    /// Request this record describes.
    pub request_id: RequestId,
    /// Current stage.
    pub status: Stage,
    /// Human-readable description of the stage.
    pub message: String,
    /// Step number; never decreases while the run is in progress.
    pub step: u32,
    /// Time of the write, Unix seconds.
    pub timestamp: i64,
    /// Repository URL the request targets.
    pub repository: String,
    /// Pull request satisfying the request (on `completed`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pr_url: Option<String>,
    /// Failure detail (on `rejected` and `error`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Errors returned by [`ProgressTracker::get`].
#[derive(Debug, Error)]
pub enum ProgressError {
    /// No live record exists for the identifier.
    #[error("request not found")]
    NotFound,

    /// The store could not be read.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Writes and reads [`ProgressRecord`]s.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
}

impl ProgressTracker {
    /// Creates a tracker over `store`.
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Records that `id` has reached `stage`.
    pub async fn update(
        &self,
        id: RequestId,
        stage: Stage,
        message: &str,
        step: u32,
        repository: &str,
    ) {
        let record = self.record(id, stage, message, step, repository);
        self.write(record).await;
    }

    /// [`ProgressTracker::update`] with the stage's own step number.
    pub async fn advance(&self, id: RequestId, stage: Stage, message: &str, repository: &str) {
        self.update(id, stage, message, stage.step(), repository).await;
    }

    /// Marks `id` as completed by the pull request at `pr_url`.
    pub async fn complete(&self, id: RequestId, pr_url: &str, repository: &str) {
        let mut record = self.record(
            id,
            Stage::Completed,
            "Pull request created successfully",
            Stage::Completed.step(),
            repository,
        );
        record.pr_url = Some(pr_url.to_string());
        self.write(record).await;
    }

    /// Marks `id` as rejected because the prompt was not actionable.
    pub async fn reject(&self, id: RequestId, reason: &str, repository: &str) {
        let mut record = self.record(
            id,
            Stage::Rejected,
            &format!("Request rejected: {reason}"),
            Stage::Rejected.step(),
            repository,
        );
        record.error_details = Some(reason.to_string());
        self.write(record).await;
    }

    /// Marks `id` as failed with `detail`.
    pub async fn error(&self, id: RequestId, detail: &str, repository: &str) {
        let mut record = self.record(
            id,
            Stage::Error,
            "An error occurred during processing",
            Stage::Error.step(),
            repository,
        );
        record.error_details = Some(detail.to_string());
        self.write(record).await;
    }

    /// Reads the live record for `id`.
    pub async fn get(&self, id: RequestId) -> Result<ProgressRecord, ProgressError> {
        let item = self
            .store
            .get(&id.to_string())
            .await?
            .ok_or(ProgressError::NotFound)?;
        Ok(serde_json::from_value(item.body).map_err(StoreError::from)?)
    }

    fn record(
        &self,
        id: RequestId,
        stage: Stage,
        message: &str,
        step: u32,
        repository: &str,
    ) -> ProgressRecord {
        ProgressRecord {
            request_id: id,
            status: stage,
            message: message.to_string(),
            step,
            timestamp: self.clock.now().unix_seconds(),
            repository: repository.to_string(),
            pr_url: None,
            error_details: None,
        }
    }

    async fn write(&self, record: ProgressRecord) {
        let id = record.request_id;
        let stage = record.status;
        let step = record.step;
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                warn!(request_id = %id, error = %e, "failed to encode progress record");
                return;
            }
        };
        let item = StoredItem {
            key: id.to_string(),
            index: None,
            body,
            expires_at: self.clock.now().plus_seconds(RETENTION_SECONDS),
        };
        match self.store.put(item).await {
            Ok(()) => info!(request_id = %id, status = %stage, step, "status updated"),
            Err(e) => {
                warn!(request_id = %id, status = %stage, error = %e, "failed to update status")
            }
        }
    }
}
