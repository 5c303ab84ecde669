//! ReAct Agent (C6, §4.6).
//!
//! One `run()` call is one user turn: observe, prompt, stream the LLM,
//! dispatch whatever tool calls come back, re-observe after page-mutating
//! tools, and repeat until the model stops calling tools, calls `done`,
//! the step cap is hit, or the LLM transport fails outright.

use crate::config::Config;
use crate::confirm::ConfirmFn;
use crate::llm::{LlmClient, Message, ToolCall};
use crate::page::Page;
use crate::prompt;
use crate::tools::{ToolExecutor, ToolOutcome};
use std::sync::Arc;
use std::time::Duration;

const STEP_CAP_MESSAGE: &str = "已达到最大步骤数，任务未能在限定步骤内完成。";
const LLM_FAILURE_MESSAGE: &str = "与大模型的通信失败，任务已终止。";

/// Host capability record (§9 Emitter/UI callbacks). Every field is
/// optional; a host that wires none of them gets a silent agent. The UI
/// layer owns thread-marshaling -- the core only calls these synchronously
/// from within `run()`.
#[derive(Default, Clone)]
pub struct Sinks {
    pub on_thinking: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_thinking_chunk: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_reasoning_chunk: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_thinking_stream_start: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_thinking_stream_end: Option<Arc<dyn Fn(&str) + Send + Sync>>,
    pub on_tool_call: Option<Arc<dyn Fn(&str, &serde_json::Value, &str) + Send + Sync>>,
    pub on_confirm_required: Option<ConfirmFn>,
}

impl Sinks {
    fn emit_thinking(&self, text: &str) {
        if let Some(f) = &self.on_thinking {
            f(text);
        }
    }
    fn emit_content_chunk(&self, chunk: &str) {
        if let Some(f) = &self.on_thinking_chunk {
            f(chunk);
        }
    }
    fn emit_reasoning_chunk(&self, chunk: &str) {
        if let Some(f) = &self.on_reasoning_chunk {
            f(chunk);
        }
    }
    fn emit_stream_start(&self) {
        if let Some(f) = &self.on_thinking_stream_start {
            f();
        }
    }
    fn emit_stream_end(&self, full: &str) {
        if let Some(f) = &self.on_thinking_stream_end {
            f(full);
        }
    }
    fn emit_tool_call(&self, name: &str, args: &serde_json::Value, result: &str) {
        if let Some(f) = &self.on_tool_call {
            f(name, args, result);
        }
    }
}

/// Tool names whose side effects invalidate the current page observation
/// (§4.6 Dispatch: "for tools that change the page (`browser_*`,
/// `ssh_to_gateway`)"). Deliberately includes `browser_wait`: it does not
/// itself settle the page, but the page may have changed while it waited.
fn changes_page(name: &str) -> bool {
    name.starts_with("browser_") || name == "ssh_to_gateway"
}

/// Tools whose effect needs a settle delay before the next observation
/// (§4.6 Dispatch: "browser-mutating tools ... other than `browser_wait`").
fn needs_settle_delay(name: &str) -> bool {
    name.starts_with("browser_") && name != "browser_wait"
}

pub struct Agent {
    page: Arc<dyn Page>,
    config: Config,
    llm: LlmClient,
    executor: ToolExecutor,
    sinks: Sinks,
    transcript: Vec<Message>,
    system_prompt: String,
}

impl Agent {
    pub fn new(page: Arc<dyn Page>, config: Config, sinks: Sinks) -> Self {
        let llm = LlmClient::from_config(&config);
        let executor = ToolExecutor::new(page.clone(), config.clone(), sinks.on_confirm_required.clone());
        let system_prompt = prompt::build(&config);
        Self {
            page,
            config,
            llm,
            executor,
            sinks,
            transcript: Vec::new(),
            system_prompt,
        }
    }

    /// Drop all turn-scoped state: transcript, page observation baseline,
    /// SSH session, and large-response cache (§5 Shared resources).
    pub async fn reset(&mut self) {
        self.transcript.clear();
        self.executor.reset().await;
    }

    pub fn add_message(&mut self, role: crate::llm::Role, content: impl Into<String>) {
        self.transcript.push(Message {
            role: Some(role),
            content: Some(content.into()),
            ..Default::default()
        });
    }

    /// Run one user turn to completion (§4.6 Turn/Termination).
    pub async fn run(&mut self, instruction: &str) -> String {
        let observation = match self.executor.observation(self.config.agent.diff_threshold).await {
            Ok(obs) => obs.text().to_string(),
            Err(e) => e.to_tool_message(),
        };
        let url = self.page.current_url().await.unwrap_or_default();
        self.transcript.push(Message::user(format!(
            "用户指令: {instruction}\n当前页面: {url}\n{observation}"
        )));

        for _step in 0..self.config.agent.max_steps {
            let turn = match self.call_llm().await {
                Ok(turn) => turn,
                Err(_) => return LLM_FAILURE_MESSAGE.to_string(),
            };

            self.transcript.push(Message::assistant(
                if turn.content.is_empty() { None } else { Some(turn.content.clone()) },
                turn.reasoning_content.clone(),
                turn.tool_calls.clone(),
            ));

            if !turn.has_tool_calls() {
                return turn.content;
            }

            for call in &turn.tool_calls {
                if let Some(summary) = self.dispatch_tool_call(call).await {
                    return summary;
                }
            }

            self.compress_transcript();
        }

        STEP_CAP_MESSAGE.to_string()
    }

    async fn call_llm(&self) -> Result<crate::llm::LlmTurn, crate::llm::LlmError> {
        let sinks = self.sinks.clone();
        let mut started = false;
        let mut reasoning_started = false;
        let on_content = |chunk: &str| {
            if !started {
                started = true;
                sinks.emit_stream_start();
            }
            sinks.emit_content_chunk(chunk);
        };
        let sinks2 = self.sinks.clone();
        let on_reasoning = |chunk: &str| {
            reasoning_started = true;
            sinks2.emit_reasoning_chunk(chunk);
        };

        let turn = self
            .llm
            .complete(
                &self.system_prompt,
                &self.transcript,
                &ToolExecutor::tool_definitions(),
                on_content,
                on_reasoning,
            )
            .await?;

        let _ = reasoning_started;
        self.sinks.emit_stream_end(&turn.content);
        if !turn.content.is_empty() {
            self.sinks.emit_thinking(&turn.content);
        }
        Ok(turn)
    }

    /// Dispatch one tool call, mutate the transcript, and return
    /// `Some(summary)` when this was the turn's terminal `done` call
    /// (§4.6 Dispatch).
    async fn dispatch_tool_call(&mut self, call: &ToolCall) -> Option<String> {
        let args: serde_json::Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| serde_json::json!({}));

        let outcome = self.executor.execute(&call.name, args.clone()).await;

        match outcome {
            ToolOutcome::Done(summary) => {
                self.sinks.emit_tool_call(&call.name, &args, &summary);
                self.transcript.push(Message::tool(call.id.clone(), summary.clone()));
                Some(summary)
            }
            ToolOutcome::Text(result) => {
                if needs_settle_delay(&call.name) {
                    tokio::time::sleep(Duration::from_millis(self.config.agent.wait_after_action_ms)).await;
                }

                let tool_message = if changes_page(&call.name) {
                    match self.executor.observation(self.config.agent.diff_threshold).await {
                        Ok(obs) => format!("{result}\n{}", obs.text()),
                        Err(e) => format!("{result}\n{}", e.to_tool_message()),
                    }
                } else {
                    result.clone()
                };

                self.sinks.emit_tool_call(&call.name, &args, &result);
                self.transcript.push(Message::tool(call.id.clone(), tool_message));
                None
            }
        }
    }

    /// §4.6 Transcript compression: find the smallest safe cut index and
    /// prepend a synthetic summary message in place of the dropped prefix.
    fn compress_transcript(&mut self) {
        let cap = self.config.agent.context_max_messages;
        if self.transcript.len() <= cap {
            return;
        }

        let floor = self.transcript.len().saturating_sub(cap / 2);
        let cut = (floor..self.transcript.len()).find(|&i| self.transcript[i].role == Some(crate::llm::Role::User));

        let Some(cut) = cut else {
            return;
        };

        let summary = summarize_prefix(&self.transcript[..cut]);
        let mut retained = self.transcript.split_off(cut);
        self.transcript = vec![Message::user(format!("[历史摘要]\n{summary}"))];
        self.transcript.append(&mut retained);
    }
}

/// Summarize dropped messages for the compression marker: user messages
/// contribute their instruction line, assistant messages up to 100 chars
/// of content plus their tool-call names (§4.6 Transcript compression).
fn summarize_prefix(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Some(crate::llm::Role::User) => {
                if let Some(content) = &m.content {
                    let first_line = content.lines().next().unwrap_or("");
                    lines.push(format!("用户: {first_line}"));
                }
            }
            Some(crate::llm::Role::Assistant) => {
                let mut entry = String::from("助手: ");
                if let Some(content) = &m.content {
                    entry.push_str(&truncate_chars(content, 100));
                }
                if !m.tool_calls.is_empty() {
                    let names: Vec<&str> = m.tool_calls.iter().map(|t| t.name.as_str()).collect();
                    entry.push_str(&format!(" [调用工具: {}]", names.join(", ")));
                }
                lines.push(entry);
            }
            _ => {}
        }
    }
    lines.join("\n")
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Role;

    fn msg_user(s: &str) -> Message {
        Message::user(s)
    }

    fn msg_assistant(content: &str, tools: &[&str]) -> Message {
        Message::assistant(
            Some(content.to_string()),
            None,
            tools
                .iter()
                .map(|n| ToolCall { id: "x".into(), name: (*n).to_string(), arguments: "{}".into() })
                .collect(),
        )
    }

    #[test]
    fn summarize_prefix_includes_user_lines_and_tool_names() {
        let messages = vec![msg_user("检查网关状态"), msg_assistant("好的，我来看看", &["fetch_gateways"])];
        let summary = summarize_prefix(&messages);
        assert!(summary.contains("用户: 检查网关状态"));
        assert!(summary.contains("调用工具: fetch_gateways"));
    }

    #[test]
    fn changes_page_includes_browser_wait_and_ssh() {
        assert!(changes_page("browser_click"));
        assert!(changes_page("browser_wait"));
        assert!(changes_page("ssh_to_gateway"));
        assert!(!changes_page("run_gateway_command"));
        assert!(!changes_page("fetch_gateways"));
    }

    #[test]
    fn needs_settle_delay_excludes_browser_wait() {
        assert!(needs_settle_delay("browser_click"));
        assert!(!needs_settle_delay("browser_wait"));
        assert!(!needs_settle_delay("ssh_to_gateway"));
    }

    #[test]
    fn truncate_chars_respects_char_boundary_not_byte_length() {
        let s = "你好世界".repeat(50);
        let truncated = truncate_chars(&s, 10);
        assert_eq!(truncated.chars().count(), 10);
    }

    #[tokio::test]
    async fn compress_transcript_finds_user_boundary_within_tail() {
        let page = Arc::new(crate::page::fakes::FakePage::default());
        let config = Config::from_defaults();
        let mut agent = Agent::new(page, config, Sinks::default());
        agent.transcript.clear();
        for i in 0..50 {
            agent.transcript.push(msg_user(&format!("msg {i}")));
        }
        agent.config.agent.context_max_messages = 10;
        agent.compress_transcript();
        assert!(agent.transcript.len() <= 50);
        assert!(agent.transcript[0].content.as_ref().unwrap().starts_with("[历史摘要]"));
        assert_eq!(agent.transcript[1].role, Some(Role::User));
    }
}
