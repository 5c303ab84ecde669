//! Wire-independent LLM request/response model (§3a).
//!
//! Deliberately shaped around the OpenAI-compatible Chat Completions
//! surface the core actually speaks (§6), rather than a multi-provider
//! abstraction: `Config`'s `llm` section names exactly one
//! `{api_key,base_url,model,temperature}` tuple (§3), so there is only
//! ever one wire format to translate to.

use serde::{Deserialize, Serialize};

/// A transcript message role (§3 Transcript).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// `{id, name, arguments}` (§3 Tool call). `arguments` is the raw
/// JSON-object-as-string the model produced; parsing happens at the
/// dispatch boundary (C6), not here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// One transcript entry. `tool_call_id` is only meaningful for `Role::Tool`
/// messages; `tool_calls` only for `Role::Assistant` messages that invoked
/// tools; `reasoning_content` only for `Role::Assistant` messages echoing a
/// provider's inner-reasoning stream back into the transcript (§3a, §9).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Message {
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::User),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn assistant(
        content: Option<String>,
        reasoning_content: Option<String>,
        tool_calls: Vec<ToolCall>,
    ) -> Self {
        Self {
            role: Some(Role::Assistant),
            content,
            reasoning_content,
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Some(Role::Tool),
            content: Some(content.into()),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// `(name, description, parameters)` triple (§3a). Parameters is a JSON
/// Schema object, same shape every tool in C5's catalog publishes.
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Token accounting, when the provider reports it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// The accumulated result of one streamed (or streaming-then-fallback)
/// call (§4.6 LLM call, streaming).
#[derive(Debug, Clone, Default)]
pub struct LlmTurn {
    pub content: String,
    pub reasoning_content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
    pub usage: Option<Usage>,
    /// Set when the stream broke mid-flight and a `[流式传输中断]` marker
    /// was already emitted through the content sink (§4.6 fallback).
    pub stream_interrupted: bool,
}

impl LlmTurn {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}
