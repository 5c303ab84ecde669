//! Web-SSH terminal capture (C4, §4.4).
//!
//! A browser-side init-script hooks `WebSocket`/`XMLHttpRequest`/`fetch`
//! to record the Socket.IO multiplex the web console's terminal page rides
//! on; the host side pulls accumulated frames, decodes whichever of the
//! three Engine.IO/Socket.IO framings is in play, feeds a virtual terminal
//! emulator, and exposes `wait_for_text`/`wait_for_new_text` primitives
//! that survive a WebSocket-to-long-polling transport fallback.

use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use regex::Regex;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

/// Installed once via `Page::add_init_script` before any navigation to the
/// terminal page (§4.4 Injection). Kept as a single versioned blob
/// alongside the host-side parser below, per §9's design note: the two
/// must evolve together.
pub const TERMINAL_CAPTURE_HOOK_JS: &str = r#"
(function () {
  if (window.__termCapture) return;
  const state = { messages: [], debug: [], wsDisconnected: false };
  window.__termCapture = state;
  window.__termCapturePull = function () {
    const out = { messages: state.messages, debug: state.debug, wsDisconnected: state.wsDisconnected };
    state.messages = [];
    state.debug = [];
    return out;
  };

  const NativeWebSocket = window.WebSocket;
  window.WebSocket = function (url, protocols) {
    const ws = protocols === undefined ? new NativeWebSocket(url) : new NativeWebSocket(url, protocols);
    if (String(url).indexOf('socket.io') !== -1) {
      ws.addEventListener('message', function (ev) {
        const data = ev.data;
        if (typeof data === 'string') {
          state.messages.push(data);
        } else if (data instanceof ArrayBuffer) {
          state.messages.push(new TextDecoder('utf-8').decode(data));
        } else if (data instanceof Blob) {
          data.text().then(function (t) { state.messages.push(t); });
        }
      });
      ws.addEventListener('close', function (ev) {
        state.wsDisconnected = true;
        state.debug.push('ws close: ' + ev.code);
      });
      ws.addEventListener('error', function () {
        state.wsDisconnected = true;
        state.debug.push('ws error');
      });
    }
    return ws;
  };
  window.WebSocket.prototype = NativeWebSocket.prototype;

  const nativeOpen = XMLHttpRequest.prototype.open;
  const nativeSend = XMLHttpRequest.prototype.send;
  XMLHttpRequest.prototype.open = function (method, url) {
    this.__termUrl = url;
    return nativeOpen.apply(this, arguments);
  };
  XMLHttpRequest.prototype.send = function () {
    if (this.__termUrl && String(this.__termUrl).indexOf('socket.io') !== -1) {
      this.addEventListener('load', () => {
        if (this.responseText && this.responseText !== 'ok') {
          state.messages.push(this.responseText);
        }
      });
    }
    return nativeSend.apply(this, arguments);
  };

  const nativeFetch = window.fetch;
  window.fetch = function (input, init) {
    const url = typeof input === 'string' ? input : input && input.url;
    const p = nativeFetch.apply(this, arguments);
    if (url && String(url).indexOf('socket.io') !== -1) {
      p.then(function (resp) {
        resp.clone().text().then(function (t) { state.messages.push(t); });
      });
    }
    return p;
  };

  window.__termCaptureReset = function () {
    state.messages = [];
    state.debug = [];
    state.wsDisconnected = false;
  };
})();
"#;

/// Result of a `pullBrowserData()` evaluate call (§4.4 Host-side pull).
#[derive(Debug, Clone, Default)]
pub struct PulledData {
    pub messages: Vec<String>,
    pub debug: Vec<String>,
    pub ws_disconnected: bool,
}

/// Splice a raw captured message into individual Engine.IO/Socket.IO
/// packets, trying the three framings in the order given in §4.4.
pub fn split_frames(message: &str) -> Vec<String> {
    if message.contains('\u{1e}') {
        return message.split('\u{1e}').filter(|s| !s.is_empty()).map(str::to_string).collect();
    }
    if message.contains('\u{fffd}') {
        return v0_delim_regex()
            .split(message)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
    }
    if let Some(frames) = try_length_prefixed(message) {
        return frames;
    }
    vec![message.to_string()]
}

fn v0_delim_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\u{fffd}\d*\u{fffd}").unwrap())
}

/// Engine.IO v3 length-prefixed framing: `<len>:<payload>` repeated.
fn try_length_prefixed(message: &str) -> Option<Vec<String>> {
    let bytes: Vec<char> = message.chars().collect();
    let mut i = 0;
    let mut out = Vec::new();
    while i < bytes.len() {
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == start || i >= bytes.len() || bytes[i] != ':' {
            return if out.is_empty() { None } else { Some(out) };
        }
        let len: usize = bytes[start..i].iter().collect::<String>().parse().ok()?;
        i += 1; // skip ':'
        if i + len > bytes.len() {
            return if out.is_empty() { None } else { Some(out) };
        }
        let payload: String = bytes[i..i + len].iter().collect();
        out.push(payload);
        i += len;
    }
    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// A decoded Socket.IO packet (§4.4 Packet decode).
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// `data` event carrying raw terminal bytes.
    Data(String),
    /// `resize` event carrying new terminal dimensions.
    Resize { cols: u16, rows: u16 },
    /// Recognized but irrelevant to the terminal (other Socket.IO events
    /// riding the same multiplex).
    Other,
}

/// Decode one packet per §4.4. Malformed packets are dropped (`None`),
/// never surfaced as an error — the original treats this as expected
/// noise from whatever else rides the same multiplex.
pub fn decode_packet(packet: &str) -> Option<Packet> {
    if let Some(rest) = packet.strip_prefix("42") {
        let value: serde_json::Value = serde_json::from_str(rest).ok()?;
        let arr = value.as_array()?;
        let event = arr.first()?.as_str()?;
        let data = arr.get(1);
        return decode_event(event, data);
    }
    if let Some(rest) = packet.strip_prefix('5') {
        let parts: Vec<&str> = rest.splitn(4, ':').collect();
        let fourth = parts.get(3)?;
        let value: serde_json::Value = serde_json::from_str(fourth).ok()?;
        let name = value.get("name")?.as_str()?;
        let args = value.get("args")?.as_array()?;
        return decode_event(name, args.first());
    }
    let trimmed = packet.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        let value: serde_json::Value = serde_json::from_str(trimmed).ok()?;
        if let (Some(name), Some(args)) = (value.get("name").and_then(|v| v.as_str()), value.get("args").and_then(|v| v.as_array())) {
            return decode_event(name, args.first());
        }
        return None;
    }
    None
}

fn decode_event(event: &str, data: Option<&serde_json::Value>) -> Option<Packet> {
    match event {
        "data" => data.and_then(|d| d.as_str()).map(|s| Packet::Data(s.to_string())),
        "resize" => {
            let d = data?;
            let cols = d.get("cols")?.as_u64()? as u16;
            let rows = d.get("rows")?.as_u64()? as u16;
            Some(Packet::Resize { cols, rows })
        }
        _ => Some(Packet::Other),
    }
}

/// Shell-prompt tail pattern used by command-output extraction (§4.4).
fn prompt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*\S+[@:]\S*[#$]\s*$").unwrap())
}

/// Given the terminal's raw text before (`baseline`) and after (`new_raw`)
/// running `cmd`, extract just the command's own output: drop the echoed
/// command line and any trailing shell-prompt lines (§4.4 Command
/// extraction).
pub fn extract_command_output(new_raw: &str, baseline: &str, cmd: &str) -> String {
    match new_raw.strip_prefix(baseline) {
        Some(tail) => extract_from_tail(tail, cmd),
        // baseline isn't a prefix of new_raw (buffer was reset or rotated);
        // fall back to treating the whole new_raw as the tail.
        None => extract_from_tail(new_raw, cmd),
    }
}

fn extract_from_tail(tail: &str, cmd: &str) -> String {
    let mut lines: Vec<&str> = tail.split('\n').collect();
    let trimmed_cmd = cmd.trim();
    if let Some(first) = lines.first() {
        if !trimmed_cmd.is_empty() && first.contains(trimmed_cmd) {
            lines.remove(0);
        }
    }
    while let Some(last) = lines.last() {
        if prompt_regex().is_match(last) {
            lines.pop();
        } else {
            break;
        }
    }
    lines.join("\n").trim_end().to_string()
}

/// Strip ANSI control sequences the original's `raw_text()` strips: CSI
/// (`ESC [ ... final-letter`), OSC (`ESC ] ... BEL`), character-set (`ESC
/// ( ... ` / `ESC ) ...`), keyboard-mode (`ESC > `/`ESC = `), DEC private
/// mode (`ESC [ ? ... h|l` -- already covered by the general CSI rule),
/// and bare `\r` (§4.4 Virtual terminal).
pub fn strip_ansi(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\u{1b}' && i + 1 < chars.len() {
            match chars[i + 1] {
                '[' => {
                    let mut j = i + 2;
                    while j < chars.len() && !chars[j].is_ascii_alphabetic() && chars[j] != '@' {
                        j += 1;
                    }
                    i = if j < chars.len() { j + 1 } else { j };
                    continue;
                }
                ']' => {
                    let mut j = i + 2;
                    while j < chars.len() && chars[j] != '\u{7}' {
                        j += 1;
                    }
                    i = if j < chars.len() { j + 1 } else { j };
                    continue;
                }
                '(' | ')' => {
                    i += 3.min(chars.len() - i);
                    continue;
                }
                '>' | '=' => {
                    i += 2;
                    continue;
                }
                _ => {
                    i += 1;
                    continue;
                }
            }
        }
        if c == '\r' {
            i += 1;
            continue;
        }
        out.push(c);
        i += 1;
    }
    out
}

/// Virtual terminal + raw buffer + connection-liveness tracking for one
/// SSH session (§3 Terminal state). Reset explicitly between gateways.
pub struct TerminalState {
    screen: vt100::Parser,
    raw_buf: String,
    ws_disconnected: bool,
    last_growth: Instant,
    disconnect_logged: bool,
}

impl TerminalState {
    pub fn new() -> Self {
        Self {
            screen: vt100::Parser::new(24, 80, 0),
            raw_buf: String::new(),
            ws_disconnected: false,
            last_growth: Instant::now(),
            disconnect_logged: false,
        }
    }

    pub fn reset(&mut self) {
        self.screen = vt100::Parser::new(24, 80, 0);
        self.raw_buf.clear();
        self.ws_disconnected = false;
        self.last_growth = Instant::now();
        self.disconnect_logged = false;
    }

    fn feed_data(&mut self, text: &str) {
        self.screen.process(text.as_bytes());
        self.raw_buf.push_str(text);
        self.last_growth = Instant::now();
    }

    fn resize(&mut self, cols: u16, rows: u16) {
        self.screen.set_size(rows, cols);
    }

    /// Apply one `PulledData` batch: split frames, decode packets, feed
    /// the emulator (§4.4 Host-side pull / Packet decode).
    pub fn apply(&mut self, pulled: &PulledData) {
        let was_connected = !self.ws_disconnected;
        for message in &pulled.messages {
            for frame in split_frames(message) {
                if let Some(packet) = decode_packet(&frame) {
                    match packet {
                        Packet::Data(text) => self.feed_data(&text),
                        Packet::Resize { cols, rows } => self.resize(cols, rows),
                        Packet::Other => {}
                    }
                }
            }
        }
        if pulled.ws_disconnected {
            self.ws_disconnected = true;
        }
        if was_connected && self.ws_disconnected && !self.disconnect_logged {
            let last = pulled.debug.last().cloned().unwrap_or_default();
            tracing::warn!(debug = %last, "terminal websocket disconnected");
            self.disconnect_logged = true;
        }
        if was_connected != self.ws_disconnected && !self.ws_disconnected {
            self.disconnect_logged = false;
        }
    }

    /// Joined, right-trimmed screen rows (§4.4 Virtual terminal).
    pub fn screen_text(&self) -> String {
        self.screen.screen().contents()
    }

    /// Decoded raw buffer with ANSI sequences and bare CR stripped.
    pub fn raw_text(&self) -> String {
        strip_ansi(&self.raw_buf)
    }

    pub fn is_ws_disconnected(&self) -> bool {
        self.ws_disconnected
    }
}

impl Default for TerminalState {
    fn default() -> Self {
        Self::new()
    }
}

const GRACE_PERIOD: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Evaluate the host-side pull script and fold the result into `state`.
/// Kept as a free function so the polling loops below stay pure with
/// respect to the page handle.
async fn pull_and_apply(page: &dyn Page, state: &mut TerminalState) -> CoreResult<()> {
    let result = page.evaluate("window.__termCapturePull ? window.__termCapturePull() : {messages:[],debug:[],wsDisconnected:false}").await?;
    let pulled = PulledData {
        messages: result
            .get("messages")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        debug: result
            .get("debug")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|x| x.as_str().map(str::to_string)).collect())
            .unwrap_or_default(),
        ws_disconnected: result.get("wsDisconnected").and_then(|v| v.as_bool()).unwrap_or(false),
    };
    state.apply(&pulled);
    Ok(())
}

/// Poll `raw_text()` every 500ms until it contains `target` (§4.4 Waiting
/// primitives). Raises `ConnectionLost` if the socket closed and no new
/// bytes arrived within the 5s grace period, `Timeout` on budget exhaustion.
pub async fn wait_for_text(page: &dyn Page, state: &mut TerminalState, target: &str, timeout: Duration) -> CoreResult<String> {
    let deadline = Instant::now() + timeout;
    loop {
        pull_and_apply(page, state).await?;
        let raw = state.raw_text();
        if raw.contains(target) {
            return Ok(raw);
        }
        if state.is_ws_disconnected() && state.last_growth.elapsed() >= GRACE_PERIOD {
            return Err(CoreError::ConnectionLost {
                silent_for: state.last_growth.elapsed(),
            });
        }
        if Instant::now() >= deadline {
            return Err(CoreError::Timeout {
                waited: timeout,
                last_screen: state.screen_text(),
                last_raw_tail: tail_chars(&raw, 500),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Identical to [`wait_for_text`] but only succeeds once `target`'s
/// occurrence count strictly exceeds its count in `baseline` (§4.4; §8
/// invariant "does not return until the occurrence count strictly
/// increases").
pub async fn wait_for_new_text(
    page: &dyn Page,
    state: &mut TerminalState,
    target: &str,
    baseline: &str,
    timeout: Duration,
) -> CoreResult<String> {
    let base_count = count_occurrences(baseline, target);
    let deadline = Instant::now() + timeout;
    loop {
        pull_and_apply(page, state).await?;
        let raw = state.raw_text();
        if count_occurrences(&raw, target) > base_count {
            return Ok(raw);
        }
        if state.is_ws_disconnected() && state.last_growth.elapsed() >= GRACE_PERIOD {
            return Err(CoreError::ConnectionLost {
                silent_for: state.last_growth.elapsed(),
            });
        }
        if Instant::now() >= deadline {
            return Err(CoreError::Timeout {
                waited: timeout,
                last_screen: state.screen_text(),
                last_raw_tail: tail_chars(&raw, 500),
            });
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Last `n` characters of `s`, for the truncated tail a `Timeout` error
/// reports. Character-based, not byte-based, so it never lands mid-codepoint.
fn tail_chars(s: &str, n: usize) -> String {
    let total = s.chars().count();
    if total <= n {
        return s.to_string();
    }
    s.chars().skip(total - n).collect()
}

fn count_occurrences(haystack: &str, needle: &str) -> usize {
    if needle.is_empty() {
        return 0;
    }
    haystack.matches(needle).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_io_v4_splits_on_record_separator() {
        let frames = split_frames("42[\"data\",\"a\"]\u{1e}42[\"data\",\"b\"]");
        assert_eq!(frames, vec!["42[\"data\",\"a\"]", "42[\"data\",\"b\"]"]);
    }

    #[test]
    fn socket_io_v0_splits_on_replacement_char_delim() {
        let frames = split_frames("\u{fffd}4\u{fffd}42[\"data\",\"x\"]");
        assert_eq!(frames, vec!["42[\"data\",\"x\"]"]);
    }

    #[test]
    fn engine_io_v3_length_prefixed_framing() {
        let frames = split_frames("2:4097:42[\"data\",\"hello\"]");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], "40");
        assert_eq!(frames[1], "42[\"data\",\"hello\"]");
    }

    #[test]
    fn engine_io_v3_framing_feeds_emulator_single_hello() {
        // The scenario literally stated in §8: "2:4097:42[...]" -> one feed of "hello".
        let frames: Vec<Packet> = split_frames("2:4097:42[\"data\",\"hello\"]")
            .iter()
            .filter_map(|f| decode_packet(f))
            .collect();
        let data_frames: Vec<&Packet> = frames.iter().filter(|p| matches!(p, Packet::Data(_))).collect();
        assert_eq!(data_frames.len(), 1);
        assert_eq!(data_frames[0], &Packet::Data("hello".to_string()));
    }

    #[test]
    fn decode_packet_type_42_parses_event_array() {
        let packet = decode_packet(r#"42["data","ls -la"]"#).unwrap();
        assert_eq!(packet, Packet::Data("ls -la".to_string()));
    }

    #[test]
    fn decode_packet_type_5_parses_name_args() {
        let packet = decode_packet(r#"5:1+:/:{"name":"data","args":["ls"]}"#).unwrap();
        assert_eq!(packet, Packet::Data("ls".to_string()));
    }

    #[test]
    fn decode_packet_resize_event() {
        let packet = decode_packet(r#"42["resize",{"cols":100,"rows":40}]"#).unwrap();
        assert_eq!(packet, Packet::Resize { cols: 100, rows: 40 });
    }

    #[test]
    fn malformed_packet_decodes_to_none_not_error() {
        assert_eq!(decode_packet("garbage"), None);
        assert_eq!(decode_packet("42[not json"), None);
    }

    #[test]
    fn strip_ansi_removes_csi_osc_and_cr() {
        let raw = "\u{1b}[31mred\u{1b}[0m\r\ntext\u{1b}]0;title\u{7}end";
        assert_eq!(strip_ansi(raw), "red\ntextend");
    }

    #[test]
    fn extract_command_output_idempotent_on_no_new_output() {
        let raw = "root@gw:~# ls\nfile1\nfile2\nroot@gw:~# ";
        assert_eq!(extract_command_output(raw, raw, "ls"), "");
    }

    #[test]
    fn extract_command_output_drops_echo_and_prompt() {
        let baseline = "root@gw:~# ";
        let new_raw = "root@gw:~# ls\nfile1\nfile2\nroot@gw:~# ";
        let out = extract_command_output(new_raw, baseline, "ls");
        assert_eq!(out, "file1\nfile2");
    }

    #[test]
    fn wait_for_new_text_requires_strict_increase() {
        let baseline = "prompt# prompt#";
        assert_eq!(count_occurrences(baseline, "prompt#"), 2);
        assert_eq!(count_occurrences("prompt# prompt# prompt#", "prompt#"), 3);
    }

    #[tokio::test]
    async fn apply_feeds_data_packets_into_raw_buffer() {
        let mut state = TerminalState::new();
        let pulled = PulledData {
            messages: vec![r#"42["data","hello"]"#.to_string()],
            debug: vec![],
            ws_disconnected: false,
        };
        state.apply(&pulled);
        assert!(state.raw_text().contains("hello"));
    }

    #[tokio::test]
    async fn apply_tracks_ws_disconnect() {
        let mut state = TerminalState::new();
        let pulled = PulledData {
            messages: vec![],
            debug: vec!["ws close: 1006".to_string()],
            ws_disconnected: true,
        };
        state.apply(&pulled);
        assert!(state.is_ws_disconnected());
    }
}
