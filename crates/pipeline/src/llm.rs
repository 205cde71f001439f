//! Language-model port: one chat primitive over an ordered message history.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::RetryPolicy;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Standing instructions.
    System,
    /// Requests from the pipeline.
    User,
    /// Model replies.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Author.
    pub role: Role,
    /// Text.
    pub content: String,
}

/// Ordered message history shared across the pipeline's model calls.
///
/// Cloning a conversation forks it: per-file generation clones the planning
/// conversation so file-specific prompts never leak into each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<ChatMessage>,
}

impl Conversation {
    /// Starts a conversation with a system message.
    pub fn with_system(content: impl Into<String>) -> Self {
        let mut conversation = Self::default();
        conversation.push(Role::System, content);
        conversation
    }

    /// Appends a message.
    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.messages.push(ChatMessage {
            role,
            content: content.into(),
        });
    }

    /// Messages in order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if no message has been added.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Expected output shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseFormat {
    /// Free text.
    #[default]
    Text,
    /// A single JSON object.
    JsonObject,
}

/// One chat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    /// History to send, in order.
    pub messages: Vec<ChatMessage>,
    /// Output shape constraint.
    pub format: ResponseFormat,
    /// Upper bound on generated tokens.
    pub max_completion_tokens: u32,
}

/// Errors returned by a [`LanguageModel`].
#[derive(Debug, Error)]
pub enum LlmError {
    /// The service answered with a non-success status.
    #[error("model API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Upstream body.
        message: String,
        /// Server-requested delay before retrying.
        retry_after: Option<Duration>,
    },

    /// The request timed out or the connection failed.
    #[error("model API transport error: {0}")]
    Transport(String),

    /// Any other request failure (bad URL, body encoding, TLS set-up).
    #[error("model API request error: {0}")]
    Request(String),

    /// The reply had no usable content.
    #[error("model returned no choices")]
    EmptyResponse,

    /// The reply could not be parsed into the expected structure.
    #[error("failed to parse model output: {0}")]
    Unparseable(String),

    /// Retries were exhausted.
    #[error("failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Attempts made.
        attempts: u32,
        /// The final error.
        last: Box<LlmError>,
    },
}

impl LlmError {
    /// Whether this error may be retried, and after what delay.
    ///
    /// Rate limiting (429), server errors (5xx) and transport failures are
    /// retryable; everything else is not.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            LlmError::Api {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => RetryPolicy::Retryable {
                after: *retry_after,
            },
            LlmError::Transport(_) => RetryPolicy::Retryable { after: None },
            _ => RetryPolicy::NonRetryable,
        }
    }
}

/// The chat primitive.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Sends `request` and returns the model's text.
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError>;
}
