//! Cassia AC operator core
//!
//! An interactive AI operator for a networking-equipment management
//! console (the AC): a ReAct loop that observes the live web console
//! through a controlled browser page, drives it with LLM-synthesized
//! tool calls, and reaches gateway devices through an in-browser
//! SSH-over-WebSocket terminal and the AC's HTTP API.
//!
//! This crate is the *core* only. Process entry points, CLI/TUI chrome,
//! config-file loading, and browser process lifecycle are external
//! collaborators that hand the core a ready [`page::Page`], a
//! [`config::Config`], and a [`agent::Sinks`].

pub mod ac_api;
pub mod agent;
pub mod confirm;
pub mod config;
pub mod error;
pub mod llm;
pub mod page;
pub mod prompt;
pub mod snapshot;
pub mod terminal;
pub mod tools;

pub use agent::{Agent, Sinks};
pub use config::Config;
pub use error::{CoreError, CoreResult};
