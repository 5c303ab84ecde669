//! `ssh_to_gateway` / `run_gateway_command` / eMMC tool bodies (§4.5,
//! §4.5a). Kept apart from the rest of the catalog because the three
//! of them share the same "drive the terminal page through a live
//! SSH-over-WebSocket session" shape, which the simpler HTTP- and
//! filesystem-backed tools in `tools.rs` don't need.

use super::emmc::{self, EmmcMetrics};
use super::session::{SessionSlot, SshSession};
use crate::ac_api::{AcApiClient, GatewayStatus};
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::page::Page;
use crate::terminal::{self, TerminalState};
use std::path::Path;
use std::time::Duration;

const RETRY_DELAYS: [Duration; 2] = [Duration::from_secs(2), Duration::from_secs(5)];

/// Models whose first letter is `M` or `Z` have no SSH daemon (§4.5
/// `ssh_to_gateway` precondition; same rule eMMC batching uses to skip
/// hardware with no eMMC, §4.5a).
pub fn model_supports_ssh(model: &str) -> bool {
    emmc::model_has_emmc(model)
}

/// Drive one gateway to a root shell over the in-browser terminal:
/// enable SSH, open the tunnel, navigate to the terminal page, and walk
/// `$` -> (blank line) -> `su` -> `assword` -> `su_password` -> `#`
/// (§4.5 `ssh_to_gateway` per-attempt sequence).
async fn connect_once(
    page: &dyn Page,
    ac_api: &AcApiClient,
    config: &Config,
    mac: &str,
) -> CoreResult<SshSession> {
    let timeout = config.timeout_page_load();
    ac_api.enable_ssh(page, mac, timeout).await?;
    ac_api.open_tunnel(page, mac, timeout).await?;

    let terminal_url = format!("{}/ssh_terminal.html?mac={mac}", config.base_url.trim_end_matches('/'));
    page.add_init_script(terminal::TERMINAL_CAPTURE_HOOK_JS).await?;
    page.goto(&terminal_url, timeout).await?;

    let mut term = TerminalState::new();
    terminal::wait_for_text(page, &mut term, "$", config.timeout_terminal_ready()).await?;

    page.keyboard_press("Enter").await?;
    terminal::wait_for_text(page, &mut term, "$", config.timeout_prompt_wait()).await?;

    page.keyboard_type("su", config.type_delay_ms).await?;
    page.keyboard_press("Enter").await?;
    terminal::wait_for_text(page, &mut term, "assword", config.timeout_prompt_wait()).await?;

    page.keyboard_type(&config.su_password, config.type_delay_ms).await?;
    page.keyboard_press("Enter").await?;
    let raw = terminal::wait_for_text(page, &mut term, "#", config.timeout_prompt_wait()).await?;

    Ok(SshSession {
        mac: mac.to_string(),
        terminal: term,
        baseline_raw: raw,
    })
}

/// `ssh_to_gateway` (§4.5): model prefix check, then up to 3 attempts with
/// {2s, 5s} back-off between them, replacing whatever session was active.
pub async fn ssh_to_gateway(
    page: &dyn Page,
    ac_api: &AcApiClient,
    config: &Config,
    session: &SessionSlot,
    mac: &str,
) -> CoreResult<String> {
    if let Some(model) = ac_api.cached_model(mac) {
        if !model_supports_ssh(&model) {
            return Err(CoreError::UnsupportedModel { model });
        }
    }

    let mut last_err = None;
    for attempt in 0..=RETRY_DELAYS.len() {
        if attempt > 0 {
            tracing::info!(mac, attempt, "ssh_to_gateway retrying after backoff");
            tokio::time::sleep(RETRY_DELAYS[attempt - 1]).await;
        }
        match connect_once(page, ac_api, config, mac).await {
            Ok(established) => {
                session.set(established).await;
                return Ok(format!("已连接到网关 {mac}，已获取 root shell"));
            }
            Err(e) => {
                tracing::warn!(mac, attempt, error = %e, "ssh_to_gateway attempt failed");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(CoreError::NoSession))
}

/// `run_gateway_command` (§4.5): requires an active session, clamps the
/// timeout to `[1s, 300s]` (default 30s), types the command, waits for a
/// fresh prompt, and extracts the command's own output.
pub async fn run_gateway_command(
    page: &dyn Page,
    config: &Config,
    session: &SessionSlot,
    command: &str,
    timeout_ms: Option<u64>,
) -> CoreResult<String> {
    let timeout = Duration::from_millis(timeout_ms.unwrap_or(30_000).clamp(1_000, 300_000));
    let mut guard = session.lock().await;
    let active = guard.as_mut().ok_or(CoreError::NoSession)?;

    let baseline = active.terminal.raw_text();
    page.keyboard_type(command, config.type_delay_ms).await?;
    page.keyboard_press("Enter").await?;
    let new_raw = terminal::wait_for_new_text(page, &mut active.terminal, "#", &baseline, timeout).await?;
    active.baseline_raw = new_raw.clone();

    Ok(terminal::extract_command_output(&new_raw, &baseline, command))
}

async fn read_emmc_metrics(
    page: &dyn Page,
    config: &Config,
    session: &SessionSlot,
    mac: &str,
    name: &str,
) -> CoreResult<EmmcMetrics> {
    let extcsd = run_gateway_command(page, config, session, "mmc extcsd read /dev/mmcblk0", None).await?;
    let dev_name = run_gateway_command(page, config, session, "cat /sys/class/mmc_host/mmc0/mmc0:*/name", None).await?;
    emmc::parse_emmc_output(mac, name, &extcsd, &dev_name)
        .ok_or_else(|| CoreError::ParseError("未在 extcsd 输出中找到 EXT_CSD_DEVICE_LIFE_TIME_EST_TYP_A".to_string()))
}

/// `check_emmc_health` (§4.5a): single-gateway metrics as text, no file.
/// Requires the caller already be connected (the model is expected to have
/// called `ssh_to_gateway` first).
pub async fn check_emmc_health(page: &dyn Page, config: &Config, session: &SessionSlot, name: &str) -> CoreResult<String> {
    let mac = session.current_mac().await.ok_or(CoreError::NoSession)?;
    let metrics = read_emmc_metrics(page, config, session, &mac, name).await?;
    Ok(emmc::render_single(&metrics))
}

/// `batch_check_emmc` (§4.5a): iterate the online gateways (filtered by
/// `macs`/`keyword`; M/Z-prefixed models skipped before any SSH attempt),
/// reconnecting per target, aggregating into JSON/CSV/HTML reports.
pub async fn batch_check_emmc(
    page: &dyn Page,
    ac_api: &AcApiClient,
    config: &Config,
    session: &SessionSlot,
    reports_dir: &Path,
    macs: Option<&[String]>,
    keyword: Option<&str>,
) -> CoreResult<String> {
    let gateways = ac_api.fetch_gateways(page, GatewayStatus::Online, config.timeout_page_load()).await?;
    let keyword_lower = keyword.map(str::to_lowercase);

    let targets: Vec<_> = gateways
        .into_iter()
        .filter(|gw| model_supports_ssh(&gw.model))
        .filter(|gw| macs.is_none_or(|m| m.iter().any(|mac| mac == &gw.mac)))
        .filter(|gw| {
            keyword_lower.as_ref().is_none_or(|k| {
                gw.name.to_lowercase().contains(k.as_str()) || gw.mac.to_lowercase().contains(k.as_str())
            })
        })
        .collect();

    let mut results = Vec::with_capacity(targets.len());
    let mut errors = Vec::new();
    for gw in &targets {
        let outcome = async {
            ssh_to_gateway(page, ac_api, config, session, &gw.mac).await?;
            read_emmc_metrics(page, config, session, &gw.mac, &gw.name).await
        }
        .await;
        match outcome {
            Ok(metrics) => results.push(metrics),
            Err(e) => {
                tracing::warn!(mac = %gw.mac, error = %e, "batch_check_emmc: gateway skipped");
                errors.push(format!("{} ({}): {e}", gw.name, gw.mac));
            }
        }
    }

    let mut summary = emmc::write_reports(reports_dir, &results).map_err(CoreError::Io)?;
    if !errors.is_empty() {
        summary.push_str(&format!("\n{} 个网关检测失败: {}", errors.len(), errors.join("; ")));
    }
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_supports_ssh_matches_emmc_exclusion() {
        assert!(!model_supports_ssh("MZ100"));
        assert!(!model_supports_ssh("Z500"));
        assert!(model_supports_ssh("AP17"));
    }
}
