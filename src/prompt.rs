//! Prompt Builder (C7, §4.7).
//!
//! Assembles the system prompt from fixed, literal sections (role,
//! operating manual, page-route map, eMMC risk table) plus two optional
//! on-disk spec summaries. Missing spec files are non-fatal -- the
//! corresponding section is simply omitted. Never queries the network,
//! mirroring the guidance-file discovery pattern used elsewhere in this
//! codebase for assembling a prompt from on-disk, possibly-absent inputs.

use crate::config::Config;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::Path;

/// Relative to the process working directory; both are optional.
const AC_API_SPEC_PATH: &str = "specs/ac_api.json";
const GATEWAY_TOOLS_SPEC_PATH: &str = "specs/gateway_tools.yaml";

const BASE_ROLE: &str = "你是 Cassia AC 网关运维助手，通过浏览器操作 AC（接入控制器）管理界面、\
调用 AC 的 HTTP API，并在需要时通过浏览器内终端 SSH 登录网关执行命令，完成用户交给你的运维任务。";

const OPERATING_MANUAL: &str = "\
## 观察格式
每一步你都会收到当前页面的观察结果，格式为以下三种之一：
- `[页面快照]` 后跟完整的页面可访问性树（角色、名称、ref 编号的缩进列表）。
- `[页面变化]` 后跟与上一次观察相比的增删改摘要，再跟 `[当前快照]` 完整树。
- `[页面无变化]`，表示自上次观察以来页面未发生可感知变化。

`ref` 编号只在产生它的那一次观察内有效；页面跳转或大范围变化后会重新编号，请始终使用最近一次观察给出的 ref。

## 工具选择优先级
完成同一件事时，按以下优先级选择工具，仅在更高优先级的方式不可用时才降级：
1. AC HTTP API（`fetch_gateways` / `ac_api_call`）—— 最快、最稳定。
2. SSH 到网关执行命令（`ssh_to_gateway` / `run_gateway_command`）—— 用于 API 不提供的设备级信息。
3. 浏览器 UI 操作（`browser_*`）—— 仅在前两者都无法完成任务时使用。

## 行为准则
- 每次工具调用后，仔细阅读返回的结果和（如有）最新的页面观察，再决定下一步。
- 涉及修改配置、重启设备等有风险的操作前，简要说明你将要做什么。
- 当任务已经完成，调用 `done` 并给出简洁的总结；不要在没有调用 `done` 的情况下臆造完成状态。
- 如果连续的尝试都失败，诚实地报告失败原因，而不是无限重试。

## 页面路由
- `/` —— 网关列表总览。
- `/ap/{mac}` —— 单个网关详情页。
- `/ssh_terminal.html?mac={mac}` —— 浏览器内终端，SSH 隧道建立后由 `ssh_to_gateway` 自动导航至此。

## eMMC 健康等级
`EXT_CSD_DEVICE_LIFE_TIME_EST_TYP_A` 十六进制值对应的健康等级：
| 取值范围 | 等级 |
|---|---|
| 1-3 | 健康 |
| 4-6 | 良好 |
| 7-9 | 警告 |
| 10-11 | 危险 |
型号以 M 或 Z 开头的网关没有 eMMC，会被自动跳过。";

/// Summarize an AC HTTP API spec document (an array of `{method, path,
/// description?}` objects, the shape the original's OpenAPI-lite JSON
/// uses) into a short bullet list.
fn summarize_ac_api_spec(spec: &Value) -> Option<String> {
    let entries = spec.as_array()?;
    if entries.is_empty() {
        return None;
    }
    let mut out = String::from("## AC HTTP API 一览\n");
    for entry in entries {
        let method = entry.get("method").and_then(Value::as_str).unwrap_or("GET");
        let path = entry.get("path").and_then(Value::as_str).unwrap_or("");
        if path.is_empty() {
            continue;
        }
        let description = entry.get("description").and_then(Value::as_str).unwrap_or("");
        if description.is_empty() {
            let _ = writeln!(out, "- `{method} {path}`");
        } else {
            let _ = writeln!(out, "- `{method} {path}` —— {description}");
        }
    }
    Some(out)
}

/// A gateway CLI tool spec is a YAML mapping or sequence naming tools;
/// only the names are surfaced to the model (§4.7: "a list of on-gateway
/// CLI tool names").
fn summarize_gateway_tools(doc: &serde_yaml::Value) -> Option<String> {
    let names: Vec<String> = match doc {
        serde_yaml::Value::Sequence(items) => items
            .iter()
            .filter_map(|item| match item {
                serde_yaml::Value::String(s) => Some(s.clone()),
                serde_yaml::Value::Mapping(m) => m.get("name").and_then(serde_yaml::Value::as_str).map(str::to_string),
                _ => None,
            })
            .collect(),
        serde_yaml::Value::Mapping(m) => m.keys().filter_map(|k| k.as_str().map(str::to_string)).collect(),
        _ => Vec::new(),
    };
    if names.is_empty() {
        return None;
    }
    Some(format!("## 网关上可用的命令行工具\n{}", names.iter().map(|n| format!("- `{n}`")).collect::<Vec<_>>().join("\n")))
}

fn read_ac_api_section(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let spec: Value = serde_json::from_str(&text).ok()?;
    summarize_ac_api_spec(&spec)
}

fn read_gateway_tools_section(path: &Path) -> Option<String> {
    let text = std::fs::read_to_string(path).ok()?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).ok()?;
    summarize_gateway_tools(&doc)
}

/// Build the full system prompt (§4.7). `Config::base_url` is embedded
/// literally so the model knows which AC it is operating; the on-disk
/// spec sections are appended only when their files exist and parse.
pub fn build(config: &Config) -> String {
    let mut prompt = String::new();
    let _ = write!(prompt, "{BASE_ROLE}\n\n当前目标 AC 地址: {}\n\n{OPERATING_MANUAL}", config.base_url);

    if let Some(section) = read_ac_api_section(Path::new(AC_API_SPEC_PATH)) {
        prompt.push_str("\n\n");
        prompt.push_str(&section);
    }
    if let Some(section) = read_gateway_tools_section(Path::new(GATEWAY_TOOLS_SPEC_PATH)) {
        prompt.push_str("\n\n");
        prompt.push_str(&section);
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn build_includes_base_url_and_manual_without_spec_files() {
        let config = Config::from_defaults();
        let prompt = build(&config);
        assert!(prompt.contains(&config.base_url));
        assert!(prompt.contains("工具选择优先级"));
        assert!(prompt.contains("健康"));
    }

    #[test]
    fn summarize_ac_api_spec_formats_entries_with_description() {
        let spec = json!([
            {"method": "GET", "path": "/ap", "description": "获取网关列表"},
            {"method": "POST", "path": "/api2/cassia/info"},
        ]);
        let summary = summarize_ac_api_spec(&spec).unwrap();
        assert!(summary.contains("`GET /ap` —— 获取网关列表"));
        assert!(summary.contains("`POST /api2/cassia/info`"));
    }

    #[test]
    fn summarize_ac_api_spec_empty_array_is_none() {
        assert!(summarize_ac_api_spec(&json!([])).is_none());
    }

    #[test]
    fn summarize_gateway_tools_reads_sequence_of_strings() {
        let doc: serde_yaml::Value = serde_yaml::from_str("- mmc\n- cat\n- uptime\n").unwrap();
        let summary = summarize_gateway_tools(&doc).unwrap();
        assert!(summary.contains("`mmc`"));
        assert!(summary.contains("`uptime`"));
    }

    #[test]
    fn summarize_gateway_tools_reads_sequence_of_named_mappings() {
        let doc: serde_yaml::Value = serde_yaml::from_str("- name: mmc\n  usage: eMMC tool\n").unwrap();
        let summary = summarize_gateway_tools(&doc).unwrap();
        assert!(summary.contains("`mmc`"));
    }

    #[test]
    fn missing_spec_files_are_non_fatal() {
        assert!(read_ac_api_section(Path::new("/nonexistent/ac_api.json")).is_none());
        assert!(read_gateway_tools_section(Path::new("/nonexistent/tools.yaml")).is_none());
    }
}
