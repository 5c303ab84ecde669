//! SSH session state owned by the tool executor (§4.5 `ssh_to_gateway`).
//!
//! One session at a time: `ssh_to_gateway` replaces whatever was there,
//! `run_gateway_command` requires one to exist. A `tokio::sync::Mutex`
//! rather than `std::sync::Mutex` because handlers hold the guard across
//! the `wait_for_text`/`wait_for_new_text` awaits.

use crate::terminal::TerminalState;
use tokio::sync::{Mutex, MutexGuard};

/// The currently-open SSH session, if any.
pub struct SshSession {
    pub mac: String,
    pub terminal: TerminalState,
    /// Raw terminal text right after the session reached its root prompt,
    /// used as the baseline for `run_gateway_command`'s output extraction.
    pub baseline_raw: String,
}

#[derive(Default)]
pub struct SessionSlot(Mutex<Option<SshSession>>);

impl SessionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set(&self, session: SshSession) {
        *self.0.lock().await = Some(session);
    }

    pub async fn clear(&self) {
        *self.0.lock().await = None;
    }

    pub async fn is_active(&self) -> bool {
        self.0.lock().await.is_some()
    }

    pub async fn current_mac(&self) -> Option<String> {
        self.0.lock().await.as_ref().map(|s| s.mac.clone())
    }

    /// Lock the slot for the duration of a command; callers check
    /// `.is_some()` and map to `NoSession` themselves.
    pub async fn lock(&self) -> MutexGuard<'_, Option<SshSession>> {
        self.0.lock().await
    }
}
