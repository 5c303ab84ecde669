//! Confirmation gate (C8, optional).
//!
//! A synchronous yes/no callback the tool executor may invoke before a
//! high-risk tool runs. Absent by default; the executor carries an
//! `Option<ConfirmFn>` rather than special-casing "no gate configured"
//! at every call site (§9 Emitter/UI callbacks design note).

/// `(tool_name, arguments_json, human_readable_preview) -> proceed?`
///
/// `Arc`-wrapped rather than `Box`-wrapped: the same callback is held by
/// both the agent's [`crate::agent::Sinks`] (the host-facing copy) and the
/// tool executor it is handed to at construction (§9 Emitter/UI callbacks).
pub type ConfirmFn = std::sync::Arc<dyn Fn(&str, &serde_json::Value, &str) -> bool + Send + Sync>;
