use std::{
    fs::{self, File},
    io::BufWriter,
    path::PathBuf,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use tracing::{info, warn};

use crate::{
    cli::create_spinner,
    collect::{
        gauges::RainGaugeCollector,
        radar::{radar_output_dir, RadarCollector},
    },
    config::PROJECT_ID,
    dates::parse_utc,
    error::PipelineError,
    paths::{PipelinePaths, RadarRunDirs},
};

use super::connect;

pub async fn collect_gauges(
    paths: &PipelinePaths,
    project_id: i64,
    asset_type_id: i64,
    trace_batch_size: usize,
    fetch_thresholds: bool,
) -> Result<String> {
    let client = connect()?;
    let records = RainGaugeCollector::new(&client)
        .collect(project_id, asset_type_id, trace_batch_size, fetch_thresholds)
        .await?;

    let file_path = paths.rain_gauges_traces_alarms_json();
    let bar = create_spinner("Saving rain gauges...".to_string());
    if let Some(dir) = file_path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("cannot create {}", dir.display()))?;
    }
    let file = File::create(&file_path)
        .with_context(|| format!("cannot create {}", file_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &records)?;
    bar.finish_with_message(format!("Saved {} rain gauges", records.len()));

    Ok(file_path.to_string_lossy().to_string())
}

pub struct RadarCollectOptions {
    pub start: Option<String>,
    pub end: Option<String>,
    pub date: Option<String>,
    pub catchment_ids: Vec<i64>,
    pub batch_size: usize,
    pub max_hours: i64,
    pub force_refresh: bool,
    pub output_dir: Option<PathBuf>,
}

pub async fn collect_radar(paths: &PipelinePaths, options: RadarCollectOptions) -> Result<String> {
    let now = Utc::now();
    let (start, end) = radar_window(
        options.start.as_deref(),
        options.end.as_deref(),
        options.date.as_deref(),
        now,
    )?;
    let output_dir = options
        .output_dir
        .unwrap_or_else(|| radar_output_dir(paths, start, end, now));
    info!(output_dir = %output_dir.display(), "radar output directory");

    let client = connect()?;
    let mut collector = RadarCollector::new(
        &client,
        RadarRunDirs::new(&output_dir),
        options.batch_size,
        options.max_hours,
    )?;
    let collection = collector
        .collect_all(PROJECT_ID, start, end, &options.catchment_ids, options.force_refresh)
        .await?;

    let failed = collection.failed().count();
    if failed > 0 {
        warn!(failed, "some catchments could not be collected");
    }
    info!(
        catchments = collection.results.len(),
        records = collection.rows.len(),
        "radar collection finished"
    );

    Ok(collection.output_dir.to_string_lossy().to_string())
}

/// Collection window from a day, explicit bounds, or the last 24 hours.
fn radar_window(
    start: Option<&str>,
    end: Option<&str>,
    date: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(DateTime<Utc>, DateTime<Utc>), PipelineError> {
    if let Some(date) = date {
        let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| {
            PipelineError::InvalidConfig(format!("invalid date `{}`, expected YYYY-MM-DD", date))
        })?;
        let start = day.and_time(NaiveTime::MIN).and_utc();
        return Ok((start, start + Duration::days(1)));
    }

    let parse = |value: &str| {
        parse_utc(value)
            .ok_or_else(|| PipelineError::InvalidConfig(format!("invalid time `{}`", value)))
    };
    let end = match end {
        Some(end) => parse(end)?,
        None => now,
    };
    let start = match start {
        Some(start) => parse(start)?,
        None => end - Duration::hours(24),
    };

    Ok((start, end))
}

// -- Tests -------------------------------------------------------------------
