//! auto-pr-bot language-model adapter.
//!
//! Implements the [`pipeline::LanguageModel`] trait for OpenAI's chat
//! completions API. Other providers are added as new `impl` blocks in this
//! crate without any changes to the `pipeline` crate.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP transport, request formatting, response parsing,
//! `Retry-After` handling, and exponential back-off live here. The
//! [`pipeline`] crate sees only [`pipeline::LanguageModel`].

mod openai;

pub use openai::{OpenAiClient, OpenAiConfig, DEFAULT_API_BASE, DEFAULT_MODEL};
