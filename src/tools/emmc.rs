//! eMMC health model (§4.5a, grounded in `emmc_auto_check.py`,
//! `emmc_generate_report.py`, `emmc_merge_results.py`).
//!
//! The original distribution's eMMC audit is a standalone batch/report CLI
//! pipeline; this module owns only the parsing and reporting logic the
//! two interactive tools (`check_emmc_health`, `batch_check_emmc`) need.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

fn life_time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)EXT_CSD_DEVICE_LIFE_TIME_EST_TYP_A\]:\s*(0x[0-9a-fA-F]+)").unwrap())
}

fn dev_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(\S+)\s*$").unwrap())
}

/// One gateway's parsed eMMC metrics (§3 supplement; mirrors
/// `emmc_merge_results.py`'s per-gateway JSON shape).
#[derive(Debug, Clone, Serialize)]
pub struct EmmcMetrics {
    pub mac: String,
    pub name: String,
    pub dev_name: String,
    pub est_typ_a: i64,
}

/// Health band for an `EST_TYP_A` value (§4.5a; `HEALTH_LEVELS` in
/// `emmc_generate_report.py`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskBand {
    Healthy,
    Moderate,
    Warning,
    Critical,
    Unknown,
}

impl RiskBand {
    pub fn from_value(value: i64) -> Self {
        match value {
            1..=3 => Self::Healthy,
            4..=6 => Self::Moderate,
            7..=9 => Self::Warning,
            10..=11 => Self::Critical,
            _ => Self::Unknown,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Healthy => "健康",
            Self::Moderate => "良好",
            Self::Warning => "警告",
            Self::Critical => "危险",
            Self::Unknown => "未知",
        }
    }
}

/// Gateway models beginning with `M` or `Z` have no eMMC and are skipped
/// without error, mirroring the `ssh_to_gateway` precondition (§4.5a).
pub fn model_has_emmc(model: &str) -> bool {
    !matches!(model.chars().next(), Some('M' | 'Z' | 'm' | 'z'))
}

/// Parse `mmc extcsd read` output (plus a `cat
/// /sys/class/mmc_host/*/*/name`-style device-name line captured over the
/// same SSH session) into [`EmmcMetrics`] (§4.5a Wear metric).
pub fn parse_emmc_output(mac: &str, name: &str, extcsd_output: &str, dev_name_output: &str) -> Option<EmmcMetrics> {
    let hex = life_time_regex().captures(extcsd_output)?.get(1)?.as_str();
    let est_typ_a = i64::from_str_radix(hex.trim_start_matches("0x").trim_start_matches("0X"), 16).ok()?;
    let dev_name = dev_name_regex()
        .captures(dev_name_output.trim())
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| dev_name_output.trim().to_string());

    Some(EmmcMetrics {
        mac: mac.to_string(),
        name: name.to_string(),
        dev_name,
        est_typ_a,
    })
}

/// Render a single gateway's metrics as the text `check_emmc_health`
/// returns (no file emitted; §4.5a "single-gateway returns only the
/// parsed metrics as text").
pub fn render_single(metrics: &EmmcMetrics) -> String {
    let band = RiskBand::from_value(metrics.est_typ_a);
    format!(
        "网关 {} ({})\n  devName: {}\n  EST_TYP_A: {} (0x{:02x})\n  健康等级: {}",
        metrics.name, metrics.mac, metrics.dev_name, metrics.est_typ_a, metrics.est_typ_a, band.label()
    )
}

/// Fixed CSV column order, mirroring `PRIORITY_COLUMNS`/`COLUMN_HEADERS`
/// in `emmc_merge_results.py`.
const CSV_HEADERS: [&str; 4] = ["MAC", "Name", "DevName", "EST_TYP_A"];

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

fn to_csv(results: &[EmmcMetrics]) -> String {
    let mut out = String::new();
    out.push_str(&CSV_HEADERS.join(","));
    out.push('\n');
    for r in results {
        out.push_str(&format!(
            "{},{},{},{}\n",
            csv_escape(&r.mac),
            csv_escape(&r.name),
            csv_escape(&r.dev_name),
            r.est_typ_a
        ));
    }
    out
}

fn to_json(results: &[EmmcMetrics]) -> String {
    serde_json::to_string_pretty(results).unwrap_or_default()
}

/// Minimal standalone HTML report: per-band counts plus a sortable table
/// of all results, styled like `emmc_generate_report.py`'s output but
/// generated inline rather than from a Jinja-style template file.
fn to_html(results: &[EmmcMetrics]) -> String {
    let mut band_counts: [usize; 5] = [0; 5];
    for r in results {
        let idx = match RiskBand::from_value(r.est_typ_a) {
            RiskBand::Healthy => 0,
            RiskBand::Moderate => 1,
            RiskBand::Warning => 2,
            RiskBand::Critical => 3,
            RiskBand::Unknown => 4,
        };
        band_counts[idx] += 1;
    }

    let rows: String = results
        .iter()
        .map(|r| {
            let band = RiskBand::from_value(r.est_typ_a);
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                html_escape(&r.mac),
                html_escape(&r.name),
                html_escape(&r.dev_name),
                r.est_typ_a,
                band.label()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"<!DOCTYPE html>
<html lang="zh">
<head><meta charset="utf-8"><title>eMMC 健康状态分析报告</title></head>
<body>
<h1>eMMC 健康状态分析报告</h1>
<p>健康: {healthy} 良好: {moderate} 警告: {warning} 危险: {critical} 未知: {unknown}</p>
<table border="1">
<thead><tr><th>MAC</th><th>Name</th><th>DevName</th><th>EST_TYP_A</th><th>健康等级</th></tr></thead>
<tbody>
{rows}
</tbody>
</table>
</body>
</html>
"#,
        healthy = band_counts[0],
        moderate = band_counts[1],
        warning = band_counts[2],
        critical = band_counts[3],
        unknown = band_counts[4],
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;").replace('"', "&quot;")
}

/// Write JSON/CSV/HTML artifacts under `reports_dir` and return the
/// summary `batch_check_emmc` responds with (§4.5a Report emission).
pub fn write_reports(reports_dir: &std::path::Path, results: &[EmmcMetrics]) -> std::io::Result<String> {
    std::fs::create_dir_all(reports_dir)?;
    std::fs::write(reports_dir.join("emmc_report.json"), to_json(results))?;
    std::fs::write(reports_dir.join("emmc_report.csv"), to_csv(results))?;
    std::fs::write(reports_dir.join("emmc_report.html"), to_html(results))?;

    let mut counts = [0usize; 5];
    for r in results {
        let idx = match RiskBand::from_value(r.est_typ_a) {
            RiskBand::Healthy => 0,
            RiskBand::Moderate => 1,
            RiskBand::Warning => 2,
            RiskBand::Critical => 3,
            RiskBand::Unknown => 4,
        };
        counts[idx] += 1;
    }
    Ok(format!(
        "已检测 {} 个网关，生成报告: {}, {}, {}。健康 {} / 良好 {} / 警告 {} / 危险 {} / 未知 {}",
        results.len(),
        reports_dir.join("emmc_report.json").display(),
        reports_dir.join("emmc_report.csv").display(),
        reports_dir.join("emmc_report.html").display(),
        counts[0],
        counts[1],
        counts[2],
        counts[3],
        counts[4],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_emmc_output_extracts_hex_life_time() {
        let extcsd = "eMMC Extended CSD rev 1.7\n[EXT_CSD_DEVICE_LIFE_TIME_EST_TYP_A]: 0x03\n[EXT_CSD_DEVICE_LIFE_TIME_EST_TYP_B]: 0x02\n";
        let metrics = parse_emmc_output("AA:BB", "gw-1", extcsd, "SKhynix\n").unwrap();
        assert_eq!(metrics.est_typ_a, 3);
        assert_eq!(metrics.dev_name, "SKhynix");
    }

    #[test]
    fn parse_emmc_output_missing_marker_returns_none() {
        assert!(parse_emmc_output("AA:BB", "gw-1", "no such line here", "x").is_none());
    }

    #[test]
    fn risk_band_thresholds_match_spec() {
        assert_eq!(RiskBand::from_value(1), RiskBand::Healthy);
        assert_eq!(RiskBand::from_value(3), RiskBand::Healthy);
        assert_eq!(RiskBand::from_value(4), RiskBand::Moderate);
        assert_eq!(RiskBand::from_value(6), RiskBand::Moderate);
        assert_eq!(RiskBand::from_value(7), RiskBand::Warning);
        assert_eq!(RiskBand::from_value(9), RiskBand::Warning);
        assert_eq!(RiskBand::from_value(10), RiskBand::Critical);
        assert_eq!(RiskBand::from_value(11), RiskBand::Critical);
        assert_eq!(RiskBand::from_value(12), RiskBand::Unknown);
        assert_eq!(RiskBand::from_value(0), RiskBand::Unknown);
    }

    #[test]
    fn model_exclusion_skips_m_and_z_prefixes() {
        assert!(!model_has_emmc("MZ100"));
        assert!(!model_has_emmc("Z500"));
        assert!(model_has_emmc("AP17"));
        assert!(model_has_emmc("S450"));
    }

    #[test]
    fn write_reports_creates_three_files_with_counts() {
        let dir = tempfile::tempdir().unwrap();
        let reports_dir = dir.path().join("reports");
        let results = vec![
            EmmcMetrics { mac: "AA".into(), name: "gw1".into(), dev_name: "SKhynix".into(), est_typ_a: 2 },
            EmmcMetrics { mac: "BB".into(), name: "gw2".into(), dev_name: "Samsung".into(), est_typ_a: 8 },
        ];
        let summary = write_reports(&reports_dir, &results).unwrap();
        assert!(reports_dir.join("emmc_report.json").exists());
        assert!(reports_dir.join("emmc_report.csv").exists());
        assert!(reports_dir.join("emmc_report.html").exists());
        assert!(summary.contains("健康 1"));
        assert!(summary.contains("警告 1"));
    }

    #[test]
    fn csv_escapes_fields_with_commas() {
        let results = vec![EmmcMetrics { mac: "AA".into(), name: "gw, 1".into(), dev_name: "d".into(), est_typ_a: 1 }];
        let csv = to_csv(&results);
        assert!(csv.contains("\"gw, 1\""));
    }
}
