//! Configuration record (§3, §10).
//!
//! A read-mostly struct the core is constructed with and never mutates.
//! Mirrors `lib/config.py`'s `{**DEFAULTS, **data}` merge: `Config::default()`
//! supplies every default, `Config::from_json` fills a partially-specified
//! document over those defaults, and three environment variables override
//! individual keys afterward regardless of source.

use serde::Deserialize;
use std::time::Duration;

fn default_base_url() -> String {
    "http://YOUR_AC_IP".to_string()
}
fn default_ac_username() -> String {
    "admin".to_string()
}
const fn default_timeout_page_load() -> u64 {
    30_000
}
const fn default_timeout_terminal_ready() -> u64 {
    30_000
}
const fn default_timeout_prompt_wait() -> u64 {
    30_000
}
const fn default_timeout_command_wait() -> u64 {
    30_000
}
const fn default_type_delay() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_ac_username")]
    pub ac_username: String,
    #[serde(default)]
    pub ac_password: String,
    #[serde(default)]
    pub su_password: String,
    #[serde(default)]
    pub ssh_credentials: Vec<SshCredential>,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default = "default_timeout_page_load")]
    pub timeout_page_load_ms: u64,
    #[serde(default = "default_timeout_terminal_ready")]
    pub timeout_terminal_ready_ms: u64,
    #[serde(default = "default_timeout_prompt_wait")]
    pub timeout_prompt_wait_ms: u64,
    #[serde(default = "default_timeout_command_wait")]
    pub timeout_command_wait_ms: u64,
    #[serde(default = "default_type_delay")]
    pub type_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            ac_username: default_ac_username(),
            ac_password: String::new(),
            su_password: String::new(),
            ssh_credentials: Vec::new(),
            llm: LlmSection::default(),
            agent: AgentSection::default(),
            timeout_page_load_ms: default_timeout_page_load(),
            timeout_terminal_ready_ms: default_timeout_terminal_ready(),
            timeout_prompt_wait_ms: default_timeout_prompt_wait(),
            timeout_command_wait_ms: default_timeout_command_wait(),
            type_delay_ms: default_type_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SshCredential {
    pub mac: String,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: Option<f32>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
            temperature: Some(0.1),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: u32,
    pub wait_after_action_ms: u64,
    pub context_max_messages: usize,
    pub diff_threshold: f64,
    pub snapshot_max_lines: Option<usize>,
    pub max_response_items: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 30,
            wait_after_action_ms: 1000,
            context_max_messages: 40,
            diff_threshold: 0.6,
            snapshot_max_lines: None,
            max_response_items: 100,
        }
    }
}

impl Config {
    /// Load from a JSON document, filling missing fields with defaults
    /// (mirroring `{**DEFAULTS, **data}`), then apply environment overrides.
    pub fn from_json_str(data: &str) -> serde_json::Result<Self> {
        let mut config: Self = serde_json::from_str(data)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_defaults() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// `CASSIA_BASE_URL` / `CASSIA_AC_PASSWORD` / `CASSIA_LLM_API_KEY`
    /// (§6 External interfaces: environment variables).
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CASSIA_BASE_URL") {
            if !v.is_empty() {
                self.base_url = v;
            }
        }
        if let Ok(v) = std::env::var("CASSIA_AC_PASSWORD") {
            if !v.is_empty() {
                self.ac_password = v;
            }
        }
        if let Ok(v) = std::env::var("CASSIA_LLM_API_KEY") {
            if !v.is_empty() {
                self.llm.api_key = v;
            }
        }
    }

    pub fn timeout_page_load(&self) -> Duration {
        Duration::from_millis(self.timeout_page_load_ms)
    }
    pub fn timeout_terminal_ready(&self) -> Duration {
        Duration::from_millis(self.timeout_terminal_ready_ms)
    }
    pub fn timeout_prompt_wait(&self) -> Duration {
        Duration::from_millis(self.timeout_prompt_wait_ms)
    }
    pub fn timeout_command_wait(&self) -> Duration {
        Duration::from_millis(self.timeout_command_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = Config::from_json_str(r#"{"base_url": "http://10.0.0.1"}"#).unwrap();
        assert_eq!(config.base_url, "http://10.0.0.1");
        assert_eq!(config.agent.diff_threshold, 0.6);
        assert_eq!(config.agent.max_steps, 30);
    }

    #[test]
    fn env_override_takes_precedence() {
        std::env::set_var("CASSIA_BASE_URL", "http://192.168.1.1");
        let config = Config::from_json_str(r#"{"base_url": "http://10.0.0.1"}"#).unwrap();
        assert_eq!(config.base_url, "http://192.168.1.1");
        std::env::remove_var("CASSIA_BASE_URL");
    }
}
