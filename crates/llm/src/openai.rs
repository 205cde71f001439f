use std::time::Duration;

use async_trait::async_trait;
use pipeline::llm::{ChatMessage, ChatRequest, LanguageModel, LlmError, ResponseFormat};
use pipeline::RetryPolicy;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-5-mini";

/// Base URL of the hosted API.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Connection and retry settings for [`OpenAiClient`].
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub model: String,
    /// API root without the `/chat/completions` suffix.
    pub api_base: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Total attempts including the first.
    pub max_attempts: u32,
    /// Back-off before the second attempt; doubles after each failure.
    pub base_backoff: Duration,
    /// Upper bound on any single wait, including a server's `Retry-After`.
    pub max_backoff: Duration,
}

impl OpenAiConfig {
    /// Settings for the hosted API with the standard retry schedule.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(60),
            max_attempts: 3,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// [`LanguageModel`] backed by the chat completions endpoint.
#[derive(Clone)]
pub struct OpenAiClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

#[derive(Serialize)]
struct CompletionBody<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_completion_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<FormatBody>,
}

#[derive(Serialize)]
struct FormatBody {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiClient {
    /// Builds a client from `config`.
    pub fn new(config: OpenAiConfig) -> Result<Self, LlmError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", config.api_base.trim_end_matches('/')),
            api_key: config.api_key,
            model: config.model,
            max_attempts: config.max_attempts.max(1),
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
        })
    }

    /// Wait before retrying after failed attempt number `attempt`.
    fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exponential = self
            .base_backoff
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
        retry_after.unwrap_or(exponential).min(self.max_backoff)
    }

    async fn attempt(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let body = CompletionBody {
            model: &self.model,
            messages: &request.messages,
            max_completion_tokens: request.max_completion_tokens,
            response_format: match request.format {
                ResponseFormat::Text => None,
                ResponseFormat::JsonObject => Some(FormatBody {
                    kind: "json_object",
                }),
            },
        };

        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(response.headers());
            let message = response.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }

        let text = response.text().await.map_err(transport_error)?;
        let completion: CompletionResponse =
            serde_json::from_str(&text).map_err(|e| LlmError::Unparseable(e.to_string()))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content.unwrap_or_default())
            .ok_or(LlmError::EmptyResponse)
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() || e.is_connect() {
        LlmError::Transport(e.to_string())
    } else {
        LlmError::Request(e.to_string())
    }
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl LanguageModel for OpenAiClient {
    #[instrument(
        name = "openai_chat",
        skip_all,
        fields(
            model = %self.model,
            messages = request.messages.len(),
            max_tokens = request.max_completion_tokens
        )
    )]
    async fn chat(&self, request: ChatRequest) -> Result<String, LlmError> {
        let mut attempt = 1;
        loop {
            let err = match self.attempt(&request).await {
                Ok(content) => {
                    debug!(attempt, chars = content.len(), "model call succeeded");
                    return Ok(content);
                }
                Err(err) => err,
            };

            let RetryPolicy::Retryable { after } = err.retry_policy() else {
                return Err(err);
            };
            if attempt >= self.max_attempts {
                return Err(LlmError::RetriesExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            let delay = self.backoff(attempt, after);
            warn!(
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retryable model error"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use httpmock::prelude::*;
    use pipeline::llm::Role;
    use serde_json::json;

    use super::*;

    fn client(server: &MockServer, max_attempts: u32) -> OpenAiClient {
        OpenAiClient::new(OpenAiConfig {
            api_key: "sk-test".into(),
            model: DEFAULT_MODEL.into(),
            api_base: server.base_url(),
            timeout: Duration::from_secs(5),
            max_attempts,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(20),
        })
        .unwrap()
    }

    fn request(format: ResponseFormat) -> ChatRequest {
        ChatRequest {
            messages: vec![
                ChatMessage {
                    role: Role::System,
                    content: "You are terse.".into(),
                },
                ChatMessage {
                    role: Role::User,
                    content: "Which files?".into(),
                },
            ],
            format,
            max_completion_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn returns_first_choice_and_sends_json_mode() {
        let server = MockServer::start();
        let completion = server.mock(|when, then| {
            when.method(POST)
                .path("/chat/completions")
                .header("authorization", "Bearer sk-test")
                .body_includes("\"json_object\"")
                .body_includes("\"max_completion_tokens\":1000")
                .body_includes("\"model\":\"gpt-5-mini\"");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant", "content": "{\"filesToRead\":[\"README.md\"]}" } }
                ]
            }));
        });

        let out = client(&server, 3)
            .chat(request(ResponseFormat::JsonObject))
            .await
            .unwrap();
        assert_eq!(out, "{\"filesToRead\":[\"README.md\"]}");
        completion.assert_calls(1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_attempts_run_out() {
        let server = MockServer::start();
        let failing = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(503).body("overloaded");
        });

        let err = client(&server, 3)
            .chat(request(ResponseFormat::Text))
            .await
            .unwrap_err();
        match err {
            LlmError::RetriesExhausted { attempts, last } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*last, LlmError::Api { status: 503, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        failing.assert_calls(3);
    }

    #[tokio::test]
    async fn rate_limits_honour_retry_after() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).header("retry-after", "0").body("slow down");
        });

        let err = client(&server, 2)
            .chat(request(ResponseFormat::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RetriesExhausted { attempts: 2, .. }));
        limited.assert_calls(2);
    }

    #[tokio::test]
    async fn long_retry_after_is_capped() {
        let server = MockServer::start();
        let limited = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(429).header("retry-after", "86400").body("slow down");
        });

        let outcome = tokio::time::timeout(
            Duration::from_secs(3),
            client(&server, 3).chat(request(ResponseFormat::Text)),
        )
        .await
        .expect("a day-long Retry-After must not stall the run");
        assert!(matches!(outcome, Err(LlmError::RetriesExhausted { attempts: 3, .. })));
        limited.assert_calls(3);
    }

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut config = OpenAiConfig::new("sk-test");
        config.base_backoff = Duration::from_secs(1);
        config.max_backoff = Duration::from_secs(30);
        let client = OpenAiClient::new(config).unwrap();

        assert_eq!(client.backoff(1, None), Duration::from_secs(1));
        assert_eq!(client.backoff(2, None), Duration::from_secs(2));
        assert_eq!(client.backoff(6, None), Duration::from_secs(30));
        assert_eq!(client.backoff(40, None), Duration::from_secs(30));
        assert_eq!(client.backoff(1, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert_eq!(
            client.backoff(1, Some(Duration::from_secs(86_400))),
            Duration::from_secs(30)
        );
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let server = MockServer::start();
        let rejected = server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(400).body("bad request");
        });

        let err = client(&server, 3)
            .chat(request(ResponseFormat::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 400, .. }));
        rejected.assert_calls(1);
    }

    #[tokio::test]
    async fn missing_choices_is_an_empty_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({ "choices": [] }));
        });

        let err = client(&server, 1)
            .chat(request(ResponseFormat::Text))
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::EmptyResponse));
    }
}
