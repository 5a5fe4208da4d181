//! Dashboard of the radar alarm validation results.

use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::Result;
use chrono::{DateTime, Local};
use tracing::info;

use crate::{
    config::DEFAULT_PROPORTION_THRESHOLD,
    error::PipelineError,
    paths::PipelinePaths,
    tables::{read_csv, write_csv},
    validate::radar::{AlarmValidationRow, VALIDATION_FILE},
    viz::{
        html::{escape, write_page, SEARCH_SCRIPT},
        radar::DASHBOARD_CSS,
    },
};

pub const VIZ_DIR: &str = "validation_viz";
pub const DASHBOARD_FILE: &str = "validation_dashboard.html";
pub const STATS_FILE: &str = "validation_stats.csv";

pub fn validation_for_date(paths: &PipelinePaths, date: &str) -> PathBuf {
    paths.rain_radar_historical_dir().join(date).join(VALIDATION_FILE)
}

/// The recent validation if present, else the newest historical one with its date.
pub fn find_latest_validation(paths: &PipelinePaths) -> Option<(PathBuf, Option<String>)> {
    let recent = paths.rain_radar_dir().join(VALIDATION_FILE);
    if recent.exists() {
        return Some((recent, None));
    }

    let mut dates: Vec<String> = fs::read_dir(paths.rain_radar_historical_dir())
        .ok()?
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().join(VALIDATION_FILE).exists())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    dates.sort();
    let date = dates.pop()?;
    Some((validation_for_date(paths, &date), Some(date)))
}

pub fn build_validation_dashboard(
    rows: &[AlarmValidationRow],
    data_date: Option<&str>,
    generated_at: DateTime<Local>,
) -> String {
    let total = rows.len();
    let would_alarm = rows.iter().filter(|r| r.would_alarm()).count();
    let (avg_ari, max_ari, avg_proportion) = if rows.is_empty() {
        (0.0, 0.0, 0.0)
    } else {
        let n = total as f64;
        (
            rows.iter().map(|r| r.max_ari).sum::<f64>() / n,
            rows.iter().map(|r| r.max_ari).fold(f64::NEG_INFINITY, f64::max),
            rows.iter().map(|r| r.proportion_exceeding).sum::<f64>() / n * 100.0,
        )
    };
    let date_display = match data_date {
        Some(date) => format!("Data Date: {}", escape(date)),
        None => "Data: Last 24 hours".to_string(),
    };

    let mut html = String::new();
    let _ = write!(
        html,
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Rain Radar ARI Validation Dashboard</title>
    {css}
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Rain Radar ARI Validation Dashboard</h1>
            <div class="meta">{date} | Generated: {generated}</div>
        </div>
        <div class="stats-grid">
            <div class="stat-card">
                <div class="value">{total}</div><div class="label">Total Catchments</div>
            </div>
            <div class="stat-card alarm">
                <div class="value">{alarm}</div><div class="label">Would Alarm</div>
            </div>
            <div class="stat-card ok"><div class="value">{ok}</div><div class="label">OK</div></div>
            <div class="stat-card">
                <div class="value">{max_ari:.1}</div><div class="label">Peak ARI (years)</div>
            </div>
            <div class="stat-card">
                <div class="value">{avg_ari:.1}</div><div class="label">Avg Max ARI</div>
            </div>
            <div class="stat-card">
                <div class="value">{avg_prop:.1}%</div><div class="label">Avg Area Exceeding</div>
            </div>
        </div>
        <div class="section">
            <h2>Catchments That Would Alarm (&ge;{threshold:.0}% area exceeding)</h2>
            <table>
                <thead><tr>
                    <th>Catchment</th><th>Max ARI</th><th>Pixels Total</th>
                    <th>Pixels Exceeding</th><th>Proportion</th><th>Peak Duration</th>
                </tr></thead>
                <tbody>
"#,
        css = DASHBOARD_CSS,
        date = date_display,
        generated = generated_at.format("%Y-%m-%d %H:%M:%S"),
        total = total,
        alarm = would_alarm,
        ok = total - would_alarm,
        max_ari = max_ari,
        avg_ari = avg_ari,
        avg_prop = avg_proportion,
        threshold = DEFAULT_PROPORTION_THRESHOLD * 100.0,
    );

    let mut alarming: Vec<&AlarmValidationRow> = rows.iter().filter(|r| r.would_alarm()).collect();
    alarming.sort_by(|a, b| b.proportion_exceeding.total_cmp(&a.proportion_exceeding));
    for row in &alarming {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{:.1}</td><td>{}</td><td>{}</td>\
             <td class=\"status-alarm\">{:.1}%</td><td>{}</td></tr>",
            escape(&row.catchment_name),
            row.max_ari,
            row.pixels_total,
            row.pixels_exceeding,
            row.proportion_exceeding * 100.0,
            escape(row.peak_duration.as_deref().unwrap_or("-"))
        );
    }
    if alarming.is_empty() {
        html.push_str(
            "<tr><td colspan=\"6\" style=\"text-align: center; color: #666;\">\
             No catchments exceed alarm threshold</td></tr>\n",
        );
    }
    html.push_str("</tbody>\n            </table>\n        </div>\n");

    html.push_str(
        "        <div class=\"section\">\n            <h2>All Catchments</h2>\n\
         <input type=\"text\" id=\"search\" class=\"search-box\" \
         placeholder=\"Search catchments...\">\n\
         <table id=\"allTable\">\n\
         <thead><tr><th>Catchment</th><th>Max ARI</th><th>Pixels</th><th>Exceeding</th>\
         <th>Proportion</th><th>Status</th></tr></thead>\n<tbody>\n",
    );
    let mut all: Vec<&AlarmValidationRow> = rows.iter().collect();
    all.sort_by(|a, b| b.max_ari.total_cmp(&a.max_ari));
    for row in all {
        let class = if row.would_alarm() { "status-alarm" } else { "status-ok" };
        let _ = writeln!(
            html,
            "<tr class=\"data-row\"><td>{}</td><td>{:.1}</td><td>{}</td><td>{}</td>\
             <td>{:.1}%</td><td class=\"{}\">{}</td></tr>",
            escape(&row.catchment_name),
            row.max_ari,
            row.pixels_total,
            row.pixels_exceeding,
            row.proportion_exceeding * 100.0,
            class,
            escape(&row.alarm_status)
        );
    }
    html.push_str("</tbody>\n            </table>\n        </div>\n");

    let _ = write!(
        html,
        "        <div class=\"footer\">Rain Radar ARI Validation | {} Catchments | {}</div>\n\
         \x20   </div>\n{}\n</body>\n</html>",
        total,
        generated_at.format("%Y-%m-%d"),
        SEARCH_SCRIPT
    );
    html
}

/// Writes the dashboard and `validation_stats.csv` into `validation_viz/` beside the input.
pub fn run_validation_report(input: &Path, data_date: Option<&str>) -> Result<PathBuf> {
    if !input.exists() {
        return Err(PipelineError::InputData {
            path: input.to_path_buf(),
            reason: "validation file not found, run validate-radar first".into(),
        }
        .into());
    }

    let rows: Vec<AlarmValidationRow> = read_csv(input)?;
    info!(records = rows.len(), path = %input.display(), "loaded validation");

    let out_dir = input.parent().unwrap_or_else(|| Path::new(".")).join(VIZ_DIR);
    let dashboard = out_dir.join(DASHBOARD_FILE);
    write_page(&dashboard, &build_validation_dashboard(&rows, data_date, Local::now()))?;
    write_csv(&out_dir.join(STATS_FILE), &rows)?;
    info!(path = %dashboard.display(), "saved validation dashboard");

    Ok(dashboard)
}

// -- Tests -------------------------------------------------------------------
