//! OpenAI-compatible streaming Chat Completions client (C6 LLM call).
//!
//! Speaks the wire protocol named in §6: `tools`, `tool_choice: "auto"`,
//! streaming SSE, `reasoning_content` echoed back in assistant messages.
//! Implements the fallback chain of §4.6: a rejected `temperature` is
//! nulled and the call retried once; a rejected stream falls back to a
//! non-streaming call synthesizing the same `LlmTurn` shape; models whose
//! name contains `kimi` never send `temperature` in the first place.

use super::error::{LlmError, LlmErrorKind};
use super::types::{LlmTurn, Message, Role, ToolCall, ToolDefinition, Usage};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

/// `[流式传输中断]` — the visible marker emitted through the content sink
/// when a stream breaks mid-flight (§4.6).
pub const STREAM_INTERRUPTED_MARKER: &str = "[流式传输中断]";

pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: Option<f32>,
}

impl LlmClient {
    pub fn new(base_url: String, api_key: String, model: String, temperature: Option<f32>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            api_key,
            model,
            temperature,
        }
    }

    fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn model_suppresses_temperature(&self) -> bool {
        self.model.to_lowercase().contains("kimi")
    }

    /// Entry point for C6. Streams the call, applying the fallback chain,
    /// forwarding `content`/`reasoning_content` deltas through the sinks as
    /// they arrive.
    pub async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        mut on_content: impl FnMut(&str),
        mut on_reasoning: impl FnMut(&str),
    ) -> Result<LlmTurn, LlmError> {
        let initial_temp = if self.model_suppresses_temperature() {
            None
        } else {
            self.temperature
        };

        match self
            .try_stream(system, messages, tools, initial_temp, &mut on_content, &mut on_reasoning)
            .await
        {
            Ok(turn) => Ok(turn),
            Err(e) if e.looks_like_temperature_rejection() => {
                self.try_stream(system, messages, tools, None, &mut on_content, &mut on_reasoning)
                    .await
            }
            Err(e) if e.looks_like_streaming_rejection() => {
                self.try_nonstream(system, messages, tools, initial_temp, &mut on_content, &mut on_reasoning)
                    .await
            }
            Err(e) => Err(e),
        }
    }

    fn build_wire_messages(&self, system: &str, messages: &[Message]) -> Vec<WireMessage> {
        let mut out = Vec::with_capacity(messages.len() + 1);
        if !system.is_empty() {
            out.push(WireMessage {
                role: "system".to_string(),
                content: Some(system.to_string()),
                reasoning_content: None,
                tool_calls: None,
                tool_call_id: None,
            });
        }
        for m in messages {
            let role = m.role.unwrap_or(Role::User).as_str().to_string();
            let tool_calls = if m.tool_calls.is_empty() {
                None
            } else {
                Some(
                    m.tool_calls
                        .iter()
                        .map(|tc| WireToolCall {
                            id: tc.id.clone(),
                            r#type: "function".to_string(),
                            function: WireFunctionCall {
                                name: tc.name.clone(),
                                arguments: tc.arguments.clone(),
                            },
                        })
                        .collect(),
                )
            };
            out.push(WireMessage {
                role,
                content: m.content.clone(),
                reasoning_content: m.reasoning_content.clone(),
                tool_calls,
                tool_call_id: m.tool_call_id.clone(),
            });
        }
        out
    }

    fn build_wire_tools(tools: &[ToolDefinition]) -> Option<Vec<WireTool>> {
        if tools.is_empty() {
            return None;
        }
        Some(
            tools
                .iter()
                .map(|t| WireTool {
                    r#type: "function".to_string(),
                    function: WireFunction {
                        name: t.name.clone(),
                        description: t.description.clone(),
                        parameters: t.parameters.clone(),
                    },
                })
                .collect(),
        )
    }

    async fn try_stream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        temperature: Option<f32>,
        on_content: &mut impl FnMut(&str),
        on_reasoning: &mut impl FnMut(&str),
    ) -> Result<LlmTurn, LlmError> {
        let body = WireRequest {
            model: self.model.clone(),
            messages: self.build_wire_messages(system, messages),
            tools: Self::build_wire_tools(tools),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            temperature,
            stream: true,
        };

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::http(status.as_u16(), &text));
        }

        let mut stream = response.bytes_stream();
        let mut buf = String::new();
        let mut acc = StreamAccumulator::default();
        let mut first_content = true;

        loop {
            let chunk = match stream.next().await {
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    on_content(&format!("\n{STREAM_INTERRUPTED_MARKER}"));
                    acc.stream_interrupted = true;
                    tracing::warn!(error = %e, "llm stream interrupted mid-flight");
                    break;
                }
                None => break,
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(pos) = buf.find("\n\n") {
                let mut event: String = buf.drain(..pos + 2).collect();
                event.truncate(pos);
                if let Some(payload) = parse_sse_event(&event) {
                    if payload == "[DONE]" {
                        continue;
                    }
                    match serde_json::from_str::<WireChunk>(&payload) {
                        Ok(wire_chunk) => {
                            acc.apply(wire_chunk, &mut first_content, on_content, on_reasoning);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, payload = %payload, "undecodable stream chunk");
                        }
                    }
                }
            }
        }

        Ok(acc.into_turn())
    }

    async fn try_nonstream(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
        temperature: Option<f32>,
        on_content: &mut impl FnMut(&str),
        on_reasoning: &mut impl FnMut(&str),
    ) -> Result<LlmTurn, LlmError> {
        let body = WireRequest {
            model: self.model.clone(),
            messages: self.build_wire_messages(system, messages),
            tools: Self::build_wire_tools(tools),
            tool_choice: if tools.is_empty() { None } else { Some("auto".to_string()) },
            temperature,
            stream: false,
        };

        let response = self
            .http
            .post(self.chat_completions_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::network(e.to_string()))?;

        let status = response.status();
        let text = response.text().await.map_err(|e| LlmError::network(e.to_string()))?;
        if !status.is_success() {
            return Err(LlmError::http(status.as_u16(), &text));
        }

        let resp: WireResponse = serde_json::from_str(&text).map_err(|e| LlmError::parse(e.to_string()))?;
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::parse("no choices in response"))?;

        let content = choice.message.content.unwrap_or_default();
        if !content.is_empty() {
            on_content("\n");
            on_content(&content);
        }
        if let Some(reasoning) = &choice.message.reasoning_content {
            on_reasoning(reasoning);
        }

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|tc| ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments,
            })
            .collect();

        Ok(LlmTurn {
            content,
            reasoning_content: choice.message.reasoning_content,
            tool_calls,
            finish_reason: choice.finish_reason,
            usage: resp.usage.map(|u| Usage {
                prompt_tokens: u.prompt_tokens,
                completion_tokens: u.completion_tokens,
            }),
            stream_interrupted: false,
        })
    }
}

/// One `data: ...` SSE event's payload, or `None` for blank/comment lines.
fn parse_sse_event(event: &str) -> Option<String> {
    let mut data_lines = Vec::new();
    for line in event.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start().to_string());
        }
    }
    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

#[derive(Default)]
struct StreamAccumulator {
    content: String,
    reasoning_content: Option<String>,
    tool_calls: BTreeMap<usize, ToolCallBuilder>,
    finish_reason: Option<String>,
    usage: Option<Usage>,
    stream_interrupted: bool,
}

#[derive(Default)]
struct ToolCallBuilder {
    id: String,
    name: String,
    arguments: String,
}

impl StreamAccumulator {
    fn apply(
        &mut self,
        chunk: WireChunk,
        first_content: &mut bool,
        on_content: &mut impl FnMut(&str),
        on_reasoning: &mut impl FnMut(&str),
    ) {
        if let Some(usage) = chunk.usage {
            self.usage = Some(Usage {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
            });
        }
        let Some(choice) = chunk.choices.into_iter().next() else {
            return;
        };
        if let Some(reason) = choice.finish_reason {
            self.finish_reason = Some(reason);
        }
        let Some(delta) = choice.delta else {
            return;
        };
        if let Some(reasoning) = delta.reasoning_content {
            if !reasoning.is_empty() {
                on_reasoning(&reasoning);
                let slot = self.reasoning_content.get_or_insert_with(String::new);
                slot.push_str(&reasoning);
            }
        }
        if let Some(content) = delta.content {
            if !content.is_empty() {
                if *first_content {
                    on_content("\n");
                    *first_content = false;
                }
                on_content(&content);
                self.content.push_str(&content);
            }
        }
        for tc in delta.tool_calls.unwrap_or_default() {
            let entry = self.tool_calls.entry(tc.index).or_default();
            if let Some(id) = tc.id {
                entry.id = id;
            }
            if let Some(function) = tc.function {
                if let Some(name) = function.name {
                    entry.name = name;
                }
                if let Some(args) = function.arguments {
                    entry.arguments.push_str(&args);
                }
            }
        }
    }

    fn into_turn(self) -> LlmTurn {
        LlmTurn {
            content: self.content,
            reasoning_content: self.reasoning_content,
            tool_calls: self
                .tool_calls
                .into_values()
                .map(|b| ToolCall {
                    id: b.id,
                    name: b.name,
                    arguments: b.arguments,
                })
                .collect(),
            finish_reason: self.finish_reason,
            usage: self.usage,
            stream_interrupted: self.stream_interrupted,
        }
    }
}

// Wire types -----------------------------------------------------------

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    stream: bool,
}

#[derive(Serialize, Deserialize, Default)]
struct WireMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reasoning_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    r#type: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Serialize)]
struct WireTool {
    r#type: String,
    function: WireFunction,
}

#[derive(Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: WireMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireChunk {
    choices: Vec<WireChunkChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChunkChoice {
    delta: Option<WireDelta>,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct WireDelta {
    content: Option<String>,
    reasoning_content: Option<String>,
    tool_calls: Option<Vec<WireToolCallDelta>>,
}

#[derive(Deserialize)]
struct WireToolCallDelta {
    index: usize,
    id: Option<String>,
    function: Option<WireFunctionCallDelta>,
}

#[derive(Deserialize)]
struct WireFunctionCallDelta {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Deserialize, Clone, Copy)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_line_sse_event() {
        let event = "data: {\"choices\":[]}";
        assert_eq!(parse_sse_event(event), Some("{\"choices\":[]}".to_string()));
    }

    #[test]
    fn ignores_blank_event() {
        assert_eq!(parse_sse_event(""), None);
    }

    #[test]
    fn accumulates_tool_call_fragments_by_index() {
        let mut acc = StreamAccumulator::default();
        let mut first = true;
        let mut noop_content = |_: &str| {};
        let mut noop_reasoning = |_: &str| {};

        let chunk1: WireChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"fetch_gateways","arguments":""}}]}}]}"#,
        )
        .unwrap();
        acc.apply(chunk1, &mut first, &mut noop_content, &mut noop_reasoning);

        let chunk2: WireChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"status\""}}]}}]}"#,
        )
        .unwrap();
        acc.apply(chunk2, &mut first, &mut noop_content, &mut noop_reasoning);

        let chunk3: WireChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":":\"all\"}"}}]}}],"finish_reason":"tool_calls"}]}"#,
        )
        .unwrap();
        acc.apply(chunk3, &mut first, &mut noop_content, &mut noop_reasoning);

        let turn = acc.into_turn();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "call_1");
        assert_eq!(turn.tool_calls[0].name, "fetch_gateways");
        assert_eq!(turn.tool_calls[0].arguments, r#"{"status":"all"}"#);
    }

    #[test]
    fn tool_call_delta_with_no_id_yields_empty_id_not_a_crash() {
        let mut acc = StreamAccumulator::default();
        let mut first = true;
        let mut noop_content = |_: &str| {};
        let mut noop_reasoning = |_: &str| {};
        let chunk: WireChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":2,"function":{"name":"done","arguments":"{}"}}]}}]}"#,
        )
        .unwrap();
        acc.apply(chunk, &mut first, &mut noop_content, &mut noop_reasoning);
        let turn = acc.into_turn();
        assert_eq!(turn.tool_calls.len(), 1);
        assert_eq!(turn.tool_calls[0].id, "");
        assert_eq!(turn.tool_calls[0].name, "done");
    }

    #[test]
    fn first_content_delta_gets_leading_newline() {
        let mut acc = StreamAccumulator::default();
        let mut first = true;
        let mut seen = Vec::new();
        let mut on_content = |s: &str| seen.push(s.to_string());
        let mut noop_reasoning = |_: &str| {};
        let chunk: WireChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"hello"}}]}"#).unwrap();
        acc.apply(chunk, &mut first, &mut on_content, &mut noop_reasoning);
        assert_eq!(seen, vec!["\n".to_string(), "hello".to_string()]);
    }

    #[test]
    fn temperature_rejection_detected_from_400_body() {
        let e = LlmError::http(400, "Unsupported value: 'temperature' is not supported");
        assert!(e.looks_like_temperature_rejection());
        assert!(!e.looks_like_streaming_rejection());
    }

    #[test]
    fn streaming_rejection_detected_from_400_body() {
        let e = LlmError::http(400, "The 'stream' parameter is not supported for this model");
        assert!(e.looks_like_streaming_rejection());
        assert!(!e.looks_like_temperature_rejection());
    }
}
