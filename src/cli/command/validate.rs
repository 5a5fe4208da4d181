use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use crate::{
    paths::PipelinePaths,
    validate::{
        alarms::run_alarm_validation,
        gauges::run_gauge_validation,
        radar::{find_latest_summary, run_radar_validation, summary_for_date},
    },
};

use super::connect;

pub async fn validate_radar(
    paths: &PipelinePaths,
    input: Option<PathBuf>,
    date: Option<&str>,
    threshold: f64,
) -> Result<String> {
    let summary_path = match (input, date) {
        (Some(input), _) => input,
        (None, Some(date)) => summary_for_date(paths, date),
        (None, None) => find_latest_summary(paths)
            .ok_or_else(|| anyhow!("no ARI analysis summary found; run analyze-radar first"))?,
    };

    let output = run_radar_validation(&summary_path, threshold)?;
    println!("{}", output.report);

    Ok(output.output_path.to_string_lossy().to_string())
}

pub async fn validate_gauges(
    paths: &PipelinePaths,
    alarms: &Path,
    mapping: Option<PathBuf>,
) -> Result<String> {
    let mapping = mapping.unwrap_or_else(|| paths.alarm_summary_full_csv());
    let output_csv = paths.gauge_ari_validation_csv();

    let client = connect()?;
    let output = run_gauge_validation(&client, &mapping, alarms, &output_csv).await?;

    for (status, count) in &output.status_counts {
        info!(status = %status, count, "validation status");
    }

    Ok(output_csv.to_string_lossy().to_string())
}

pub async fn validate_alarms(
    paths: &PipelinePaths,
    alarm_log: &Path,
    output_dir: Option<PathBuf>,
    sample_size: usize,
) -> Result<String> {
    let output_dir = output_dir.unwrap_or_else(|| paths.rain_gauges_validation_dir());

    let client = connect()?;
    let output = run_alarm_validation(&client, alarm_log, &output_dir, sample_size).await?;

    for result in &output.results {
        match &result.error {
            Some(error) => {
                warn!(asset_id = result.asset_id, error = %error, "validation incomplete")
            }
            None => info!(
                asset_id = result.asset_id,
                exceedances = result.api_exceedances,
                logged = result.logged_alarms,
                matched = result.matched,
                match_rate = result.match_rate,
                "asset validated"
            ),
        }
    }

    let saved = output.summary_path.unwrap_or(output_dir);
    Ok(saved.to_string_lossy().to_string())
}

// -- Tests -------------------------------------------------------------------
