use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};

use crate::{
    cli::create_spinner,
    paths::PipelinePaths,
    viz::{
        gauges::run_gauge_report,
        radar::run_radar_report,
        validation::{find_latest_validation, run_validation_report, validation_for_date},
    },
};

pub async fn report_gauges(
    paths: &PipelinePaths,
    input: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<String> {
    let input = input.unwrap_or_else(|| paths.alarm_summary_csv());
    let output_dir = output_dir.unwrap_or_else(|| paths.rain_gauges_viz_dir());

    let bar = create_spinner("Building gauge report...".to_string());
    let report = run_gauge_report(&input, &output_dir)?;
    bar.finish_with_message("Gauge report built");

    Ok(report.to_string_lossy().to_string())
}

pub async fn report_radar(
    paths: &PipelinePaths,
    data_dir: Option<PathBuf>,
    date: Option<&str>,
    output_dir: Option<PathBuf>,
) -> Result<String> {
    let data_dir = data_dir.unwrap_or_else(|| match date {
        Some(date) => paths.historical_radar_dir(date),
        None => paths.rain_radar_raw_dir(),
    });
    let output_dir = output_dir.unwrap_or_else(|| dashboard_dir(&data_dir));

    let bar = create_spinner("Building radar dashboard...".to_string());
    let dashboard = run_radar_report(&data_dir, &output_dir, date)?;
    bar.finish_with_message("Radar dashboard built");

    Ok(dashboard.to_string_lossy().to_string())
}

pub async fn report_radar_validation(
    paths: &PipelinePaths,
    input: Option<PathBuf>,
    date: Option<&str>,
) -> Result<String> {
    let (input, data_date) = match (input, date) {
        (Some(input), date) => (input, date.map(str::to_string)),
        (None, Some(date)) => (validation_for_date(paths, date), Some(date.to_string())),
        (None, None) => find_latest_validation(paths)
            .ok_or_else(|| anyhow!("no ARI alarm validation found; run validate-radar first"))?,
    };

    let bar = create_spinner("Building validation dashboard...".to_string());
    let dashboard = run_validation_report(&input, data_date.as_deref())?;
    bar.finish_with_message("Validation dashboard built");

    Ok(dashboard.to_string_lossy().to_string())
}

/// `dashboard` next to the collection directory.
fn dashboard_dir(data_dir: &Path) -> PathBuf {
    match data_dir.parent() {
        Some(parent) => parent.join("dashboard"),
        None => PathBuf::from("dashboard"),
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_place_dashboard_next_to_collection() {
        assert_eq!(
            dashboard_dir(Path::new("outputs/rain_radar/historical/2025-05-09/raw")),
            PathBuf::from("outputs/rain_radar/historical/2025-05-09/dashboard")
        );
    }
}
