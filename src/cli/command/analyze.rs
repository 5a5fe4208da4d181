use std::{
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use tracing::info;

use crate::{
    analyze::{
        alarms::{analyze_alarms, write_alarm_tables},
        filter::{filter_gauges, load_collected_gauges, FilterConfig},
        radar::run_radar_analysis,
        report::create_summary_report,
    },
    cli::create_spinner,
    paths::{PipelinePaths, RadarRunDirs},
};

const ACTIVE_GAUGES_FILE: &str = "active_auckland_gauges.json";
const ALL_TRACES_FILE: &str = "all_traces.csv";
const REPORT_FILE: &str = "analysis_report.txt";

pub async fn analyze_gauges(
    paths: &PipelinePaths,
    input: Option<PathBuf>,
    inactive_months: u32,
    exclude_keyword: &str,
) -> Result<String> {
    let config = FilterConfig::new(inactive_months, exclude_keyword)?;
    let input = input.unwrap_or_else(|| paths.rain_gauges_traces_alarms_json());

    let bar = create_spinner("Loading collected gauges...".to_string());
    let gauges = load_collected_gauges(&input)?;
    bar.finish_with_message(format!("Loaded {} gauges", gauges.len()));

    let now = Utc::now();
    let result = filter_gauges(gauges, &config, now);
    let inventory = analyze_alarms(&result.active, inactive_months, now);
    info!(
        active = result.stats.active_gauges,
        alarms = inventory.alarms.len(),
        "gauge analysis complete"
    );

    let out_dir = paths.rain_gauges_analyze_dir();
    fs::create_dir_all(&out_dir).with_context(|| format!("cannot create {}", out_dir.display()))?;

    let bar = create_spinner("Writing analysis outputs...".to_string());
    let active_path = out_dir.join(ACTIVE_GAUGES_FILE);
    let file = File::create(&active_path)
        .with_context(|| format!("cannot create {}", active_path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &result.active)?;

    write_alarm_tables(
        &inventory,
        &out_dir.join(ALL_TRACES_FILE),
        &paths.alarm_summary_full_csv(),
        &paths.alarm_summary_csv(),
    )?;

    let report = create_summary_report(
        &result,
        &inventory.alarms,
        inactive_months,
        exclude_keyword,
        Local::now(),
    );
    let report_path = out_dir.join(REPORT_FILE);
    fs::write(&report_path, &report)
        .with_context(|| format!("cannot write {}", report_path.display()))?;
    bar.finish_with_message("Analysis outputs written");

    Ok(report_path.to_string_lossy().to_string())
}

pub async fn analyze_radar(
    paths: &PipelinePaths,
    input_dir: Option<PathBuf>,
    date: Option<&str>,
    tp108: &Path,
    threshold: f64,
) -> Result<String> {
    let (radar_dir, output_dir) = radar_dirs(paths, input_dir, date);
    info!(input = %radar_dir.display(), output = %output_dir.display(), "analysing radar data");

    let output = run_radar_analysis(&radar_dir, &output_dir, tp108, threshold).await?;
    info!(
        catchments = output.catchments,
        exceedances = output.exceedances,
        summary = %output.summary_path.display(),
        "radar analysis complete"
    );

    Ok(output.report_path.to_string_lossy().to_string())
}

/// Radar CSV directory to read, and the `analyze` directory next to its collection run.
fn radar_dirs(
    paths: &PipelinePaths,
    input_dir: Option<PathBuf>,
    date: Option<&str>,
) -> (PathBuf, PathBuf) {
    match input_dir {
        Some(dir) => {
            let run = dir.parent().map(Path::to_path_buf).unwrap_or_default();
            let output = RadarRunDirs::new(run).analyze_dir();
            (dir, output)
        }
        None => {
            let run = match date {
                Some(date) => RadarRunDirs::new(paths.historical_radar_dir(date)),
                None => RadarRunDirs::new(paths.rain_radar_raw_dir()),
            };
            (run.radar_data_dir(), run.analyze_dir())
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use serde_json::json;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn should_resolve_radar_dirs() {
        let paths = PipelinePaths::new("outputs");

        let (input, output) = radar_dirs(&paths, None, None);
        assert_eq!(input, PathBuf::from("outputs/rain_radar/raw/radar_data"));
        assert_eq!(output, PathBuf::from("outputs/rain_radar/analyze"));

        let (input, output) = radar_dirs(&paths, None, Some("2025-05-09"));
        assert_eq!(input, PathBuf::from("outputs/rain_radar/historical/2025-05-09/raw/radar_data"));
        assert_eq!(output, PathBuf::from("outputs/rain_radar/historical/2025-05-09/analyze"));

        let (input, output) =
            radar_dirs(&paths, Some(PathBuf::from("/data/run/raw/radar_data")), None);
        assert_eq!(input, PathBuf::from("/data/run/raw/radar_data"));
        assert_eq!(output, PathBuf::from("/data/run/analyze"));
    }

    #[tokio::test]
    async fn should_write_gauge_analysis_outputs() {
        let dir = TempDir::new().unwrap();
        let paths = PipelinePaths::new(dir.path());
        let input = paths.rain_gauges_traces_alarms_json();
        fs::create_dir_all(input.parent().unwrap()).unwrap();
        let telemetered = Utc::now().to_rfc3339();
        let gauges = json!([
            {"gauge": {"id": 1, "name": "Waikato Gauge"}, "traces": []},
            {"gauge": {"id": 2, "name": "Albany"}, "traces": [
                {"trace": {
                    "id": 20,
                    "description": "Rainfall",
                    "telemeteredMaximumTime": telemetered
                }}
            ]}
        ]);
        fs::write(&input, gauges.to_string()).unwrap();

        let report = analyze_gauges(&paths, None, 3, "northland|waikato").await.unwrap();

        let out_dir = paths.rain_gauges_analyze_dir();
        assert_eq!(PathBuf::from(&report), out_dir.join(REPORT_FILE));
        assert!(out_dir.join(ACTIVE_GAUGES_FILE).exists());
        assert!(out_dir.join(ALL_TRACES_FILE).exists());
        assert!(paths.alarm_summary_csv().exists());
        assert!(paths.alarm_summary_full_csv().exists());

        let text = fs::read_to_string(report).unwrap();
        assert!(text.contains("Active Auckland rain gauges: 1"));
    }
}
