//! Core error kinds shared by every component (REDESIGN FLAGS, §7).
//!
//! The Python original propagates these as ad hoc strings and regex-matches
//! on error messages (`"session" in url or "login" in url`). Here they are
//! one `thiserror` enum, constructed at the boundary where the condition is
//! actually detected (C2's redirect check, C4's disconnect-plus-silence
//! check, ...), so the tool layer's `错误: ...` rendering is a `Display`
//! impl, not a second place that re-derives the failure kind from text.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("请求被重定向到登录页 ({url})，会话已过期")]
    SessionExpired { url: String },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("终端连接已断开 (WebSocket 已关闭，{silent_for:?} 内无新数据)")]
    ConnectionLost { silent_for: Duration },

    #[error("操作超时 ({waited:?})")]
    Timeout {
        waited: Duration,
        last_screen: String,
        last_raw_tail: String,
    },

    #[error("未找到 ref {0}")]
    RefNotFound(u32),

    #[error("定位元素失败: {0}")]
    LocatorFailure(String),

    #[error("网关型号 {model} 不支持 SSH")]
    UnsupportedModel { model: String },

    #[error("API 请求失败: HTTP {status} - {body}")]
    ApiError { status: u16, body: String },

    #[error("当前没有活跃的 SSH 会话")]
    NoSession,

    #[error("没有可用的缓存数据")]
    NoCache,

    #[error("解析失败: {0}")]
    ParseError(String),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Render as the `错误: ...`-prefixed string the model sees in the next
    /// transcript turn (§7 propagation policy). This is the *only* place
    /// that prefix is produced.
    pub fn to_tool_message(&self) -> String {
        format!("错误: {self}")
    }
}
