//! Process configuration, read once from the environment at start-up.
//!
//! Every lookup goes through a caller-supplied function so tests never touch
//! the real process environment.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

pub const DEFAULT_STATUS_TABLE: &str = "auto-pr-bot-status";
pub const DEFAULT_QUEUE_NAME: &str = "auto-pr-bot-dispatch";
pub const DEFAULT_QUEUE_CAPACITY: usize = 32;
pub const DEFAULT_WORKER_CONCURRENCY: usize = 4;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_GITHUB_WEB_BASE: &str = "https://github.com";
pub const DEFAULT_AUTHOR_NAME: &str = "auto-pr-bot";
pub const DEFAULT_AUTHOR_EMAIL: &str = "auto-pr-bot@users.noreply.github.com";

/// Configuration errors. The process refuses to start on any of them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {name} has invalid value {value:?}: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Log line format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(format!("expected `json` or `pretty`, got `{other}`")),
        }
    }
}

/// Observability settings; read before anything else so start-up failures
/// are logged in the configured format.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// OTLP collector endpoint; spans are exported only when set.
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        Ok(Self {
            log_format: env.parsed_or("LOG_FORMAT", LogFormat::Json)?,
            otlp_endpoint: env.optional("OTEL_EXPORTER_OTLP_ENDPOINT"),
        })
    }
}

/// Everything the composition root needs to build the service.
#[derive(Clone)]
pub struct Config {
    pub github_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_base: String,
    pub github_api_base: String,
    /// Web root used for git remotes.
    pub github_web_base: String,
    pub status_table: String,
    /// SQLite file for progress and rate-limit records; in-memory when unset.
    pub status_db_path: Option<PathBuf>,
    pub dispatch_queue_name: String,
    pub dispatch_queue_capacity: usize,
    pub worker_concurrency: usize,
    pub bind_addr: SocketAddr,
    pub workspace_root: PathBuf,
    pub git_author_name: String,
    pub git_author_email: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = Env(&lookup);
        Ok(Self {
            github_token: env.required("GITHUB_TOKEN")?,
            openai_api_key: env.required("OPENAI_API_KEY")?,
            openai_model: env.or("OPENAI_MODEL", llm::DEFAULT_MODEL),
            openai_api_base: env.or("OPENAI_API_BASE", llm::DEFAULT_API_BASE),
            github_api_base: env.or("GITHUB_API_BASE", github::DEFAULT_API_BASE),
            github_web_base: env.or("GITHUB_WEB_BASE", DEFAULT_GITHUB_WEB_BASE),
            status_table: env.or("STATUS_TABLE_NAME", DEFAULT_STATUS_TABLE),
            status_db_path: env.optional("STATUS_DB_PATH").map(PathBuf::from),
            dispatch_queue_name: env.or("DISPATCH_QUEUE_NAME", DEFAULT_QUEUE_NAME),
            dispatch_queue_capacity: env
                .positive("DISPATCH_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
            worker_concurrency: env.positive("WORKER_CONCURRENCY", DEFAULT_WORKER_CONCURRENCY)?,
            bind_addr: match env.optional("BIND_ADDR") {
                Some(raw) => parse("BIND_ADDR", &raw)?,
                None => parse("BIND_ADDR", DEFAULT_BIND_ADDR)?,
            },
            workspace_root: env
                .optional("WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            git_author_name: env.or("GIT_AUTHOR_NAME", DEFAULT_AUTHOR_NAME),
            git_author_email: env.or("GIT_AUTHOR_EMAIL", DEFAULT_AUTHOR_EMAIL),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("github_token", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .field("openai_model", &self.openai_model)
            .field("openai_api_base", &self.openai_api_base)
            .field("github_api_base", &self.github_api_base)
            .field("github_web_base", &self.github_web_base)
            .field("status_table", &self.status_table)
            .field("status_db_path", &self.status_db_path)
            .field("dispatch_queue_name", &self.dispatch_queue_name)
            .field("dispatch_queue_capacity", &self.dispatch_queue_capacity)
            .field("worker_concurrency", &self.worker_concurrency)
            .field("bind_addr", &self.bind_addr)
            .field("workspace_root", &self.workspace_root)
            .field("git_author_name", &self.git_author_name)
            .field("git_author_email", &self.git_author_email)
            .finish()
    }
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    /// Set and not blank.
    fn optional(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.optional(name).ok_or(ConfigError::Missing(name))
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.optional(name).unwrap_or_else(|| default.to_string())
    }

    fn parsed_or<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match self.optional(name) {
            Some(raw) => parse(name, &raw),
            None => Ok(default),
        }
    }

    fn positive(&self, name: &'static str, default: usize) -> Result<usize, ConfigError> {
        let value: usize = self.parsed_or(name, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                name,
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        Ok(value)
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}
