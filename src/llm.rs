//! LLM client (C6 streaming protocol, §4.6, §6).
//!
//! One OpenAI-compatible Chat Completions client rather than a
//! multi-provider registry: `Config::llm` names exactly one
//! `{api_key, base_url, model, temperature}` tuple (§3), so there is only
//! ever one wire shape for this crate to speak.

mod client;
mod error;
mod types;

pub use client::{LlmClient, STREAM_INTERRUPTED_MARKER};
pub use error::{LlmError, LlmErrorKind};
pub use types::{LlmTurn, Message, Role, ToolCall, ToolDefinition, Usage};

use crate::config::Config;

impl LlmClient {
    /// Build a client from the `llm` section of a loaded [`Config`].
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.llm.base_url.clone(),
            config.llm.api_key.clone(),
            config.llm.model.clone(),
            config.llm.temperature,
        )
    }
}
