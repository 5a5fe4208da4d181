//! Catchment-level ARI analysis of collected radar data.

use std::{
    collections::HashSet,
    fs::{self, File},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analyze::{
        ari::{analyze_catchment, CatchmentAri, CoefficientTable, RadarSample},
        display_float,
    },
    cli::create_progress_bar,
    dates::{self, offset_format, offset_format_opt},
    error::PipelineError,
    parquet::save_exceedances,
    tables::write_csv,
};

pub const SUMMARY_FILE: &str = "ari_analysis_summary.csv";
pub const EXCEEDANCES_FILE: &str = "ari_exceedances.csv";
pub const EXCEEDANCES_PARQUET_FILE: &str = "ari_exceedances.parquet";
pub const REPORT_FILE: &str = "analysis_report.txt";

const RULE_WIDTH: usize = 70;
const TOP_CATCHMENTS: usize = 20;
const HIGH_PROPORTION: f64 = 0.1;

const PROPORTION_EDGES: [f64; 7] = [0.0, 0.01, 0.05, 0.1, 0.25, 0.5, 1.01];
const PROPORTION_LABELS: [&str; 6] = ["0-1%", "1-5%", "5-10%", "10-25%", "25-50%", "50-100%"];

/// One row of `ari_analysis_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatchmentSummary {
    pub catchment_id: Option<i64>,
    pub catchment_name: String,
    pub max_ari: f64,
    pub pixels_total: usize,
    pub pixels_exceeding: usize,
    pub proportion_exceeding: f64,
    #[serde(default)]
    pub peak_pixel_index: Option<i64>,
    #[serde(default, with = "offset_format_opt")]
    pub peak_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub peak_duration: Option<String>,
    #[serde(default)]
    pub peak_depth_mm: Option<f64>,
}

/// One row of `ari_exceedances.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceedanceRecord {
    pub catchment_id: Option<i64>,
    pub catchment_name: String,
    pub pixel_index: i64,
    #[serde(with = "offset_format")]
    pub timestamp: DateTime<Utc>,
    pub duration: String,
    pub depth_mm: f64,
    pub ari_years: f64,
}

#[derive(Debug)]
pub struct RadarAnalysisOutput {
    pub summary_path: PathBuf,
    pub exceedance_path: PathBuf,
    pub exceedance_parquet_path: PathBuf,
    pub report_path: PathBuf,
    pub catchments: usize,
    pub exceedances: usize,
}

#[derive(Debug, Deserialize)]
struct RadarCsvRow {
    pixel_index: f64,
    timestamp: String,
    value: Option<f64>,
}

/// Splits a radar file stem `{id}_{name}` into the numeric id, when present, and the name.
pub fn parse_catchment_stem(stem: &str) -> (Option<i64>, String) {
    match stem.split_once('_') {
        Some((prefix, name)) => {
            let id = (!prefix.is_empty() && prefix.chars().all(|c| c.is_ascii_digit()))
                .then(|| prefix.parse::<i64>().ok())
                .flatten();
            (id, name.to_string())
        }
        None => {
            let id = (!stem.is_empty() && stem.chars().all(|c| c.is_ascii_digit()))
                .then(|| stem.parse::<i64>().ok())
                .flatten();
            (id, stem.to_string())
        }
    }
}

/// Reads a per-catchment radar CSV (`pixel_index`, `timestamp`, `value` columns).
pub fn read_radar_csv(path: &Path) -> Result<Vec<RadarSample>, PipelineError> {
    let input_error = |reason: String| PipelineError::InputData {
        path: path.to_path_buf(),
        reason,
    };

    let mut reader = csv::Reader::from_path(path).map_err(|e| input_error(e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| input_error(e.to_string()))?
        .clone();
    for column in ["pixel_index", "timestamp", "value"] {
        if !headers.iter().any(|h| h == column) {
            return Err(PipelineError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    let mut samples = Vec::new();
    for row in reader.deserialize::<RadarCsvRow>() {
        let row = row.map_err(|e| input_error(e.to_string()))?;
        if row.timestamp.trim().is_empty() {
            continue;
        }
        let timestamp = dates::parse_utc(&row.timestamp)
            .ok_or_else(|| input_error(format!("invalid timestamp `{}`", row.timestamp)))?;
        samples.push(RadarSample {
            pixel_index: row.pixel_index as i64,
            timestamp,
            value: row.value.filter(|v| !v.is_nan()),
        });
    }

    Ok(samples)
}

struct CatchmentOutcome {
    summary: CatchmentSummary,
    exceedances: Vec<ExceedanceRecord>,
}

fn analyze_file(
    path: &Path,
    table: &CoefficientTable,
    ari_threshold: f64,
) -> Result<CatchmentOutcome> {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (catchment_id, catchment_name) = parse_catchment_stem(&stem);

    let samples = read_radar_csv(path)?;
    let result = analyze_catchment(&samples, table, ari_threshold);

    Ok(to_outcome(catchment_id, catchment_name, result))
}

fn to_outcome(
    catchment_id: Option<i64>,
    catchment_name: String,
    result: CatchmentAri,
) -> CatchmentOutcome {
    let exceedances = result
        .exceedances
        .iter()
        .map(|e| ExceedanceRecord {
            catchment_id,
            catchment_name: catchment_name.clone(),
            pixel_index: e.pixel_index,
            timestamp: e.timestamp,
            duration: e.duration.to_string(),
            depth_mm: e.depth_mm,
            ari_years: e.ari_years,
        })
        .collect();

    let peak = result.peak.as_ref();
    let summary = CatchmentSummary {
        catchment_id,
        catchment_name,
        max_ari: result.max_ari,
        pixels_total: result.pixels_total,
        pixels_exceeding: result.pixels_exceeding,
        proportion_exceeding: result.proportion_exceeding,
        peak_pixel_index: peak.map(|p| p.pixel_index),
        peak_timestamp: peak.map(|p| p.timestamp),
        peak_duration: peak.map(|p| p.duration.to_string()),
        peak_depth_mm: peak.map(|p| p.depth_mm),
    };

    CatchmentOutcome {
        summary,
        exceedances,
    }
}

fn radar_files(radar_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(radar_dir)
        .with_context(|| format!("radar data directory not found: {}", radar_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "csv"))
        .collect();
    files.sort();
    Ok(files)
}

/// Analyses every catchment CSV in `radar_dir` and writes the summary, exceedances and report.
pub async fn run_radar_analysis(
    radar_dir: &Path,
    output_dir: &Path,
    tp108_path: &Path,
    ari_threshold: f64,
) -> Result<RadarAnalysisOutput> {
    if ari_threshold.is_nan() || ari_threshold <= 0.0 {
        return Err(PipelineError::InvalidConfig(format!(
            "ari_threshold must be positive, got {}",
            ari_threshold
        ))
        .into());
    }

    info!(
        radar_dir = %radar_dir.display(),
        output_dir = %output_dir.display(),
        tp108 = %tp108_path.display(),
        ari_threshold,
        "starting radar ARI analysis"
    );

    let table = Arc::new(CoefficientTable::load(tp108_path)?);

    let files = radar_files(radar_dir)?;
    if files.is_empty() {
        return Err(PipelineError::NoRadarData(radar_dir.to_path_buf()).into());
    }
    info!(files = files.len(), "found radar data files");

    let pb = create_progress_bar(files.len() as u64, "Analysing catchments".to_string());

    let tasks: Vec<_> = files
        .iter()
        .map(|file| {
            let file = file.clone();
            let table = Arc::clone(&table);
            let pb = pb.clone();
            tokio::task::spawn_blocking(move || {
                let outcome = analyze_file(&file, &table, ari_threshold);
                pb.inc(1);
                (file, outcome)
            })
        })
        .collect();

    let mut summaries = Vec::new();
    let mut exceedances = Vec::new();
    for result in join_all(tasks).await {
        match result {
            Ok((_, Ok(outcome))) => {
                summaries.push(outcome.summary);
                exceedances.extend(outcome.exceedances);
            }
            Ok((file, Err(e))) => {
                warn!(file = %file.display(), error = %e, "failed to process radar file")
            }
            Err(e) => warn!(error = %e, "analysis task failed"),
        }
    }
    pb.finish_with_message("Analysis complete");

    info!(catchments = summaries.len(), "processed catchments");

    sort_summaries(&mut summaries);
    exceedances.sort_by(|a, b| {
        a.catchment_name
            .cmp(&b.catchment_name)
            .then(a.timestamp.cmp(&b.timestamp))
    });

    fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;

    let summary_path = output_dir.join(SUMMARY_FILE);
    write_csv(&summary_path, &summaries)?;

    let exceedance_path = output_dir.join(EXCEEDANCES_FILE);
    write_exceedances_csv(&exceedance_path, &exceedances)?;

    let exceedance_parquet_path = output_dir.join(EXCEEDANCES_PARQUET_FILE);
    save_exceedances(&exceedances, &exceedance_parquet_path)?;

    let report = generate_report(&summaries, &exceedances, ari_threshold, Utc::now());
    let report_path = output_dir.join(REPORT_FILE);
    fs::write(&report_path, report)
        .with_context(|| format!("cannot write {}", report_path.display()))?;

    info!(
        catchments = summaries.len(),
        exceedances = exceedances.len(),
        output_dir = %output_dir.display(),
        "radar analysis complete"
    );

    Ok(RadarAnalysisOutput {
        summary_path,
        exceedance_path,
        exceedance_parquet_path,
        report_path,
        catchments: summaries.len(),
        exceedances: exceedances.len(),
    })
}

/// Descending by max ARI; equal values keep their order.
pub fn sort_summaries(summaries: &mut [CatchmentSummary]) {
    summaries.sort_by(|a, b| b.max_ari.total_cmp(&a.max_ari));
}

fn write_exceedances_csv(path: &Path, rows: &[ExceedanceRecord]) -> Result<()> {
    if !rows.is_empty() {
        return write_csv(path, rows);
    }
    // keep the header so downstream readers see the columns
    let mut writer = csv::Writer::from_writer(File::create(path)?);
    writer.write_record([
        "catchment_id",
        "catchment_name",
        "pixel_index",
        "timestamp",
        "duration",
        "depth_mm",
        "ari_years",
    ])?;
    writer.flush()?;
    Ok(())
}

/// Index into the proportion distribution bins. Bins are right-closed and the lowest edge is
/// included.
pub fn proportion_bin(proportion: f64) -> Option<usize> {
    if proportion.is_nan() || proportion < PROPORTION_EDGES[0] {
        return None;
    }
    if proportion == PROPORTION_EDGES[0] {
        return Some(0);
    }
    PROPORTION_EDGES
        .windows(2)
        .position(|edge| proportion > edge[0] && proportion <= edge[1])
}

/// Text report of a radar analysis. `summaries` must already be sorted by max ARI.
pub fn generate_report(
    summaries: &[CatchmentSummary],
    exceedances: &[ExceedanceRecord],
    ari_threshold: f64,
    generated_at: DateTime<Utc>,
) -> String {
    let rule = "=".repeat(RULE_WIDTH);
    let thin = "-".repeat(RULE_WIDTH);
    let threshold = display_float(ari_threshold);

    let mut lines = vec![
        rule.clone(),
        "RAIN RADAR ARI ANALYSIS REPORT".to_string(),
        format!("Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S UTC")),
        rule.clone(),
        String::new(),
        "SUMMARY STATISTICS".to_string(),
        thin.clone(),
        format!("Total catchments analyzed: {}", summaries.len()),
        format!("ARI threshold: {} years", threshold),
        String::new(),
    ];

    let exceeding = summaries.iter().filter(|s| s.max_ari >= ari_threshold).count();
    lines.push(format!("Catchments with ARI >= {}: {}", threshold, exceeding));

    let high_proportion = summaries
        .iter()
        .filter(|s| s.proportion_exceeding >= HIGH_PROPORTION)
        .count();
    lines.push(format!("Catchments with >= 10% area exceeding: {}", high_proportion));

    if !exceedances.is_empty() {
        let unique_pixels: HashSet<i64> = exceedances.iter().map(|e| e.pixel_index).collect();
        lines.push(format!("Total exceedance records: {}", exceedances.len()));
        lines.push(format!("Unique pixels with exceedance: {}", unique_pixels.len()));
    }

    lines.push(String::new());
    lines.push("TOP 20 CATCHMENTS BY MAX ARI".to_string());
    lines.push(thin.clone());
    for summary in summaries.iter().take(TOP_CATCHMENTS) {
        if summary.max_ari > 0.0 {
            let duration = summary.peak_duration.as_deref().unwrap_or("N/A");
            let depth = summary
                .peak_depth_mm
                .map(display_float)
                .unwrap_or_else(|| "N/A".to_string());
            lines.push(format!("  {}", summary.catchment_name));
            lines.push(format!(
                "    Max ARI: {:.1} years ({}, {}mm)",
                summary.max_ari, duration, depth
            ));
            lines.push(format!(
                "    Area exceeding: {:.1}%",
                summary.proportion_exceeding * 100.0
            ));
        }
    }

    lines.push(String::new());
    lines.push("PROPORTION EXCEEDING DISTRIBUTION".to_string());
    lines.push(thin);
    let mut counts = [0usize; 6];
    for summary in summaries {
        if let Some(bin) = proportion_bin(summary.proportion_exceeding) {
            counts[bin] += 1;
        }
    }
    for (label, count) in PROPORTION_LABELS.iter().zip(counts) {
        lines.push(format!("  {}: {} catchments", label, count));
    }

    lines.push(String::new());
    lines.push(rule);

    lines.join("\n")
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use std::io::Write;

    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;

    fn summary(name: &str, max_ari: f64, proportion: f64) -> CatchmentSummary {
        CatchmentSummary {
            catchment_id: Some(1),
            catchment_name: name.to_string(),
            max_ari,
            pixels_total: 10,
            pixels_exceeding: (proportion * 10.0) as usize,
            proportion_exceeding: proportion,
            peak_pixel_index: Some(5),
            peak_timestamp: None,
            peak_duration: Some("2h".to_string()),
            peak_depth_mm: Some(42.5),
        }
    }

    #[test]
    fn should_parse_catchment_stems() {
        assert_eq!(parse_catchment_stem("123_Awa_Street"), (Some(123), "Awa_Street".to_string()));
        assert_eq!(parse_catchment_stem("abc_Awa"), (None, "Awa".to_string()));
        assert_eq!(parse_catchment_stem("Lonely"), (None, "Lonely".to_string()));
    }

    #[test]
    fn should_bin_proportions_right_closed() {
        assert_eq!(proportion_bin(0.0), Some(0));
        assert_eq!(proportion_bin(0.01), Some(0));
        assert_eq!(proportion_bin(0.0100001), Some(1));
        assert_eq!(proportion_bin(0.1), Some(2));
        assert_eq!(proportion_bin(0.3), Some(4));
        assert_eq!(proportion_bin(1.0), Some(5));
        assert_eq!(proportion_bin(-0.1), None);
    }

    #[test]
    fn should_sort_summaries_by_max_ari_descending() {
        let mut rows = vec![
            summary("a", 1.0, 0.0),
            summary("b", f64::INFINITY, 0.5),
            summary("c", 7.0, 0.2),
        ];

        sort_summaries(&mut rows);

        let names: Vec<&str> = rows.iter().map(|r| r.catchment_name.as_str()).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn should_render_report_sections() {
        let rows = vec![summary("Big", 12.345, 0.5), summary("Dry", 0.0, 0.0)];
        let exceedances = vec![ExceedanceRecord {
            catchment_id: Some(1),
            catchment_name: "Big".to_string(),
            pixel_index: 5,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            duration: "2h".to_string(),
            depth_mm: 42.5,
            ari_years: 12.35,
        }];
        let at = Utc.with_ymd_and_hms(2025, 2, 3, 4, 5, 6).unwrap();

        let report = generate_report(&rows, &exceedances, 5.0, at);

        assert!(report.contains("Generated: 2025-02-03 04:05:06 UTC"));
        assert!(report.contains("ARI threshold: 5.0 years"));
        assert!(report.contains("Catchments with ARI >= 5.0: 1"));
        assert!(report.contains("Catchments with >= 10% area exceeding: 1"));
        assert!(report.contains("Unique pixels with exceedance: 1"));
        assert!(report.contains("    Max ARI: 12.3 years (2h, 42.5mm)"));
        assert!(report.contains("    Area exceeding: 50.0%"));
        assert!(!report.contains("  Dry\n"));
        assert!(report.contains("  0-1%: 1 catchments"));
        assert!(report.contains("  25-50%: 1 catchments"));
    }

    #[test]
    fn should_read_radar_csv() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_a.csv");
        let mut file = File::create(&path).unwrap();
        writeln!(file, "pixel_index,value_index,timestamp,value").unwrap();
        writeln!(file, "10,0,2025-01-01T00:00:00+00:00,0.5").unwrap();
        writeln!(file, "10,1,2025-01-01 00:01:00+00:00,").unwrap();

        let samples = read_radar_csv(&path).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].pixel_index, 10);
        assert_eq!(samples[0].value, Some(0.5));
        assert_eq!(samples[1].value, None);
    }

    #[test]
    fn should_reject_radar_csv_without_value_column() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("1_a.csv");
        fs::write(&path, "pixel_index,timestamp\n1,2025-01-01T00:00:00Z\n").unwrap();

        assert!(matches!(
            read_radar_csv(&path),
            Err(PipelineError::MissingColumn { ref column, .. }) if column == "value"
        ));
    }

    #[tokio::test]
    async fn should_run_analysis_end_to_end() {
        let dir = TempDir::new().unwrap();
        let radar_dir = dir.path().join("radar_data");
        let output_dir = dir.path().join("analyze");
        fs::create_dir_all(&radar_dir).unwrap();

        let tp108 = dir.path().join("tp108.csv");
        fs::write(&tp108, "pixelindex,10m_b,10m_m\n1,0.0,1.0\n2,0.0,0.01\n").unwrap();

        let mut csv = String::from("pixel_index,value_index,timestamp,value\n");
        for pixel in [1, 2, 3] {
            for minute in 0..10 {
                csv.push_str(&format!(
                    "{},{},2025-01-01T00:{:02}:00+00:00,1.0\n",
                    pixel, minute, minute
                ));
            }
        }
        fs::write(radar_dir.join("42_Test_Catchment.csv"), csv).unwrap();
        fs::write(radar_dir.join("notes.txt"), "ignored").unwrap();

        let output = run_radar_analysis(&radar_dir, &output_dir, &tp108, 5.0)
            .await
            .unwrap();

        assert_eq!(output.catchments, 1);
        assert_eq!(output.exceedances, 1);

        let mut reader = csv::Reader::from_path(&output.summary_path).unwrap();
        let rows: Vec<CatchmentSummary> = reader.deserialize().map(|r| r.unwrap()).collect();
        assert_eq!(rows[0].catchment_id, Some(42));
        assert_eq!(rows[0].catchment_name, "Test_Catchment");
        assert_eq!(rows[0].pixels_total, 3);
        assert_eq!(rows[0].pixels_exceeding, 1);
        assert_eq!(rows[0].proportion_exceeding, 0.3333);
        assert_eq!(rows[0].peak_duration.as_deref(), Some("10m"));

        assert!(output.exceedance_parquet_path.exists());
        let report = fs::read_to_string(&output.report_path).unwrap();
        assert!(report.contains("Total catchments analyzed: 1"));
    }

    #[tokio::test]
    async fn should_fail_without_radar_files() {
        let dir = TempDir::new().unwrap();
        let tp108 = dir.path().join("tp108.csv");
        fs::write(&tp108, "pixelindex,10m_b,10m_m\n1,0.0,1.0\n").unwrap();

        let radar_dir = dir.path().join("radar_data");
        fs::create_dir_all(&radar_dir).unwrap();

        let err = run_radar_analysis(&radar_dir, &dir.path().join("out"), &tp108, 5.0)
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::NoRadarData(_))
        ));
    }

    #[tokio::test]
    async fn should_reject_non_positive_threshold() {
        let dir = TempDir::new().unwrap();

        let result = run_radar_analysis(dir.path(), dir.path(), dir.path(), 0.0).await;

        assert!(result.is_err());
    }
}
