//! Checks which catchments would raise an alarm from the share of their area over the ARI
//! threshold.

use std::{
    fmt::Write,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    analyze::radar::{CatchmentSummary, SUMMARY_FILE},
    config::DEFAULT_ARI_THRESHOLD,
    dates::offset_format_opt,
    error::PipelineError,
    paths::PipelinePaths,
    tables::{read_csv, write_csv},
};

pub const VALIDATION_FILE: &str = "ari_alarm_validation.csv";
pub const ALARM: &str = "ALARM";
pub const OK: &str = "OK";

const RULE_WIDTH: usize = 70;

/// One row of `ari_alarm_validation.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlarmValidationRow {
    pub catchment_id: Option<i64>,
    pub catchment_name: String,
    pub max_ari: f64,
    pub pixels_total: usize,
    pub pixels_exceeding: usize,
    pub proportion_exceeding: f64,
    pub alarm_status: String,
    #[serde(default)]
    pub peak_duration: Option<String>,
    #[serde(default)]
    pub peak_depth_mm: Option<f64>,
    #[serde(default, with = "offset_format_opt")]
    pub peak_timestamp: Option<DateTime<Utc>>,
}

impl AlarmValidationRow {
    pub fn would_alarm(&self) -> bool {
        self.alarm_status == ALARM
    }
}

#[derive(Debug, Clone)]
pub struct RadarValidation {
    pub rows: Vec<AlarmValidationRow>,
    pub alarm_count: usize,
    pub report: String,
}

#[derive(Debug)]
pub struct RadarValidationOutput {
    pub output_path: PathBuf,
    pub report: String,
    pub catchments: usize,
    pub alarm_count: usize,
}

pub fn check_proportion_threshold(threshold: f64) -> Result<f64, PipelineError> {
    if threshold > 0.0 && threshold <= 1.0 {
        Ok(threshold)
    } else {
        Err(PipelineError::InvalidConfig(format!(
            "proportion threshold must be in (0, 1], got {}",
            threshold
        )))
    }
}

/// Summary file of a historical run.
pub fn summary_for_date(paths: &PipelinePaths, date: &str) -> PathBuf {
    paths
        .rain_radar_historical_dir()
        .join(date)
        .join("analyze")
        .join(SUMMARY_FILE)
}

/// The recent run's summary if present, else the newest historical one.
pub fn find_latest_summary(paths: &PipelinePaths) -> Option<PathBuf> {
    let recent = paths.rain_radar_dir().join("analyze").join(SUMMARY_FILE);
    if recent.exists() {
        return Some(recent);
    }

    let mut historical: Vec<PathBuf> = fs::read_dir(paths.rain_radar_historical_dir())
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("analyze").join(SUMMARY_FILE))
        .filter(|path| path.exists())
        .collect();
    historical.sort();
    historical.pop()
}

pub fn validate_summaries(
    summaries: Vec<CatchmentSummary>,
    proportion_threshold: f64,
    generated_at: DateTime<Utc>,
) -> RadarValidation {
    let rows: Vec<AlarmValidationRow> = summaries
        .into_iter()
        .map(|s| {
            let alarm = s.proportion_exceeding >= proportion_threshold;
            AlarmValidationRow {
                catchment_id: s.catchment_id,
                catchment_name: s.catchment_name,
                max_ari: s.max_ari,
                pixels_total: s.pixels_total,
                pixels_exceeding: s.pixels_exceeding,
                proportion_exceeding: s.proportion_exceeding,
                alarm_status: if alarm { ALARM } else { OK }.to_string(),
                peak_duration: s.peak_duration,
                peak_depth_mm: s.peak_depth_mm,
                peak_timestamp: s.peak_timestamp,
            }
        })
        .collect();

    let alarm_count = rows.iter().filter(|r| r.would_alarm()).count();
    let report = build_report(&rows, alarm_count, proportion_threshold, generated_at);

    RadarValidation {
        rows,
        alarm_count,
        report,
    }
}

fn build_report(
    rows: &[AlarmValidationRow],
    alarm_count: usize,
    proportion_threshold: f64,
    generated_at: DateTime<Utc>,
) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let dash = "-".repeat(RULE_WIDTH);
    let alarm_pct = if rows.is_empty() {
        0.0
    } else {
        100.0 * alarm_count as f64 / rows.len() as f64
    };

    let mut report = String::new();
    let _ = writeln!(report, "{}", rule);
    let _ = writeln!(report, "RAIN RADAR ALARM VALIDATION REPORT");
    let _ = writeln!(report, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC"));
    let _ = writeln!(report, "{}\n", rule);
    let _ = writeln!(report, "CONFIGURATION\n{}", dash);
    let _ = writeln!(report, "ARI Threshold: {:.0} years", DEFAULT_ARI_THRESHOLD);
    let _ = writeln!(report, "Proportion Threshold: {:.0}%\n", proportion_threshold * 100.0);
    let _ = writeln!(report, "SUMMARY\n{}", dash);
    let _ = writeln!(report, "Total catchments: {}", rows.len());
    let _ = writeln!(report, "Would trigger alarm: {} ({:.1}%)", alarm_count, alarm_pct);
    let _ = writeln!(report, "OK: {}\n", rows.len() - alarm_count);

    let mut alarming: Vec<&AlarmValidationRow> = rows.iter().filter(|r| r.would_alarm()).collect();
    if alarming.is_empty() {
        let _ = writeln!(report, "NO ALARMS WOULD BE TRIGGERED\n{}", dash);
        let _ = writeln!(report, "All catchments below proportion threshold.");
    } else {
        alarming.sort_by(|a, b| b.proportion_exceeding.total_cmp(&a.proportion_exceeding));
        let _ = writeln!(report, "CATCHMENTS THAT WOULD ALARM\n{}", dash);
        for row in alarming {
            let _ = writeln!(
                report,
                "  {}: {:.1}% area, max ARI {:.1}y",
                row.catchment_name,
                row.proportion_exceeding * 100.0,
                row.max_ari
            );
        }
    }

    let _ = write!(report, "\n{}", rule);
    report
}

/// Writes `ari_alarm_validation.csv` one level above the summary's `analyze` directory.
pub fn run_radar_validation(
    summary_path: &Path,
    proportion_threshold: f64,
) -> Result<RadarValidationOutput> {
    let proportion_threshold = check_proportion_threshold(proportion_threshold)?;
    if !summary_path.exists() {
        return Err(PipelineError::InputData {
            path: summary_path.to_path_buf(),
            reason: "ARI summary not found".into(),
        }
        .into());
    }

    info!(path = %summary_path.display(), "loading ARI summary");
    let summaries: Vec<CatchmentSummary> = read_csv(summary_path)?;
    info!(catchments = summaries.len(), "loaded catchment records");

    let validation = validate_summaries(summaries, proportion_threshold, Utc::now());

    let run_dir = summary_path
        .parent()
        .and_then(Path::parent)
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(run_dir).with_context(|| format!("cannot create {}", run_dir.display()))?;
    let output_path = run_dir.join(VALIDATION_FILE);
    write_csv(&output_path, &validation.rows)?;
    info!(path = %output_path.display(), alarms = validation.alarm_count, "saved validation");

    Ok(RadarValidationOutput {
        output_path,
        report: validation.report,
        catchments: validation.rows.len(),
        alarm_count: validation.alarm_count,
    })
}

// -- Tests -------------------------------------------------------------------
