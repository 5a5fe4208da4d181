//! Static HTML report of the rain gauge alarm configuration.

use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet},
    path::{Path, PathBuf},
};

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use crate::{
    analyze::{alarms::SimpleAlarmRecord, display_float},
    error::PipelineError,
    paths::safe_filename,
    tables::{read_csv, write_csv},
    viz::html::{escape, limited_table, stat_box, table, write_page},
};

pub const RECENCY_CATEGORY: &str = "Data freshness (recency)";
pub const OVERFLOW_CATEGORY: &str = "Threshold alarm (overflow)";
pub const OTHER_CATEGORY: &str = "Other";

pub const CLEANED_FILE: &str = "cleaned_alarm_summary.csv";
pub const REPORT_FILE: &str = "report.html";
pub const PAGES_DIR: &str = "gauge_pages";

const CSS: &str = r#"<style>
  body { font-family: Arial, sans-serif; margin: 24px; line-height: 1.4; background: #f5f5f5; }
  h1 { margin-bottom: 6px; color: #1a1a1a; }
  h2 { margin-top: 32px; color: #333; border-bottom: 2px solid #2c5282; padding-bottom: 8px; }
  .muted { color: #555; }
  .note {
    background: #e8f4fd; border-left: 4px solid #2c5282;
    padding: 12px 16px; margin: 16px 0; border-radius: 4px;
  }
  table { border-collapse: collapse; width: 100%; margin-top: 12px; background: white; }
  th, td { border: 1px solid #ddd; padding: 8px 10px; font-size: 0.95em; }
  th { background: #f3f3f3; text-align: left; font-weight: bold; }
  tr:nth-child(even) { background: #fafafa; }
  .stats { display: flex; gap: 24px; flex-wrap: wrap; margin: 16px 0; }
  .stat-box {
    background: white; border: 1px solid #e0e0e0; border-radius: 8px;
    padding: 12px 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.1);
  }
  .stat-box .num { font-size: 1.8em; font-weight: bold; color: #2c5282; }
  .stat-box .label { color: #666; font-size: 0.9em; }
  .back-link { margin-top: 20px; padding-top: 20px; border-top: 1px solid #ddd; }
  a { color: #2c5282; text-decoration: none; }
  a:hover { text-decoration: underline; }
</style>"#;

const RECENCY_NOTE: &str = "<div class='note'><b>Note:</b> \"Hours Since Last Data\" shows \
how long ago the gauge last reported data when the report was generated.</div>";

/// One row of `cleaned_alarm_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CleanedAlarmRow {
    #[serde(rename = "Gauge")]
    pub gauge: String,
    #[serde(rename = "Trace")]
    pub trace: String,
    #[serde(rename = "Alarm Name")]
    pub alarm_name: String,
    #[serde(rename = "Type")]
    pub alarm_type: String,
    #[serde(rename = "Threshold")]
    pub threshold: Option<f64>,
    pub row_category: &'static str,
}

pub fn classify(alarm_type: &str) -> &'static str {
    let alarm_type = alarm_type.trim().to_lowercase();
    if alarm_type == "recency" {
        RECENCY_CATEGORY
    } else if alarm_type.contains("overflow") {
        OVERFLOW_CATEGORY
    } else {
        OTHER_CATEGORY
    }
}

/// Missing thresholds sort last.
fn cmp_threshold(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn clean_text(value: Option<String>) -> String {
    value.map(|v| v.trim().to_string()).unwrap_or_default()
}

pub fn clean_rows(records: Vec<SimpleAlarmRecord>) -> Vec<CleanedAlarmRow> {
    let mut rows: Vec<CleanedAlarmRow> = records
        .into_iter()
        .map(|r| {
            let alarm_type = clean_text(r.alarm_type);
            CleanedAlarmRow {
                gauge: r.gauge.trim().to_string(),
                trace: clean_text(r.trace),
                alarm_name: clean_text(r.alarm_name),
                row_category: classify(&alarm_type),
                alarm_type,
                threshold: r.threshold,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.gauge
            .cmp(&b.gauge)
            .then_with(|| a.trace.cmp(&b.trace))
            .then_with(|| a.row_category.cmp(b.row_category))
            .then_with(|| cmp_threshold(a.threshold, b.threshold))
    });
    rows
}

pub fn load_and_clean(csv_path: &Path) -> Result<Vec<CleanedAlarmRow>> {
    if !csv_path.exists() {
        return Err(PipelineError::InputData {
            path: csv_path.to_path_buf(),
            reason: "alarm summary not found, run analyze-gauges first".into(),
        }
        .into());
    }

    let records: Vec<SimpleAlarmRecord> = read_csv(csv_path)?;
    if records.is_empty() {
        return Err(PipelineError::InputData {
            path: csv_path.to_path_buf(),
            reason: "no data to visualize".into(),
        }
        .into());
    }
    Ok(clean_rows(records))
}

fn threshold_cell(threshold: Option<f64>) -> String {
    threshold.map(display_float).unwrap_or_default()
}

fn gauge_cells(r: &&CleanedAlarmRow) -> Vec<String> {
    vec![
        r.gauge.clone(),
        r.trace.clone(),
        r.alarm_name.clone(),
        threshold_cell(r.threshold),
    ]
}

/// Distinct (gauge, trace, alarm name, threshold) rows of one category.
fn category_rows<'a>(
    rows: impl Iterator<Item = &'a CleanedAlarmRow>,
    category: &str,
) -> Vec<&'a CleanedAlarmRow> {
    let mut seen = BTreeSet::new();
    rows.filter(|r| r.row_category == category)
        .filter(|r| {
            seen.insert((
                r.gauge.clone(),
                r.trace.clone(),
                r.alarm_name.clone(),
                threshold_cell(r.threshold),
            ))
        })
        .collect()
}

pub fn build_report(rows: &[CleanedAlarmRow]) -> String {
    let gauges: BTreeSet<&str> = rows.iter().map(|r| r.gauge.as_str()).collect();
    let traces: BTreeSet<&str> = rows.iter().map(|r| r.trace.as_str()).collect();

    let mut overflow = category_rows(rows.iter(), OVERFLOW_CATEGORY);
    overflow.sort_by(|a, b| {
        a.gauge
            .cmp(&b.gauge)
            .then_with(|| a.trace.cmp(&b.trace))
            .then_with(|| cmp_threshold(a.threshold, b.threshold))
    });
    let mut recency = category_rows(rows.iter(), RECENCY_CATEGORY);
    recency.sort_by(|a, b| {
        a.gauge
            .cmp(&b.gauge)
            .then_with(|| cmp_threshold(b.threshold, a.threshold))
    });

    let mut per_gauge: BTreeMap<&str, (BTreeSet<&str>, usize, usize)> = BTreeMap::new();
    for row in rows {
        let entry = per_gauge.entry(row.gauge.as_str()).or_default();
        entry.0.insert(row.trace.as_str());
        match row.row_category {
            OVERFLOW_CATEGORY => entry.1 += 1,
            RECENCY_CATEGORY => entry.2 += 1,
            _ => {}
        }
    }
    let summary: Vec<Vec<String>> = per_gauge
        .iter()
        .map(|(gauge, (traces, overflow, recency))| {
            vec![
                gauge.to_string(),
                traces.len().to_string(),
                overflow.to_string(),
                recency.to_string(),
            ]
        })
        .collect();

    let overflow_rows: Vec<Vec<String>> = overflow
        .iter()
        .map(gauge_cells)
        .collect();
    let recency_rows: Vec<Vec<String>> = recency
        .iter()
        .map(gauge_cells)
        .collect();

    let mut links =
        String::from("<table>\n<thead><tr><th>Gauge</th><th>Open</th></tr></thead>\n<tbody>\n");
    for gauge in gauges.iter().filter(|g| !g.trim().is_empty()) {
        let link = format!("{}/{}.html", PAGES_DIR, safe_filename(gauge));
        links.push_str(&format!(
            "<tr><td>{}</td><td><a href='{}'>View Details</a></td></tr>\n",
            escape(gauge),
            escape(&link)
        ));
    }
    links.push_str("</tbody>\n</table>");

    [
        "<html>".to_string(),
        "<head>".to_string(),
        "<meta charset='utf-8'/>".to_string(),
        "<title>Rain Gauge Alarm Configuration</title>".to_string(),
        CSS.to_string(),
        "</head>".to_string(),
        "<body>".to_string(),
        "<h1>Rain Gauge Alarm Configuration</h1>".to_string(),
        "<p class='muted'>Active rain gauges with configured alarms</p>".to_string(),
        "<div class='stats'>".to_string(),
        stat_box(gauges.len(), "Rain Gauges"),
        stat_box(traces.len(), "Trace Types"),
        stat_box(overflow.len(), "Overflow Alarms"),
        stat_box(recency.len(), "Recency Monitors"),
        "</div>".to_string(),
        "<h2>Summary per Gauge</h2>".to_string(),
        "<p class='muted'>Overview of each gauge with alarm counts.</p>".to_string(),
        table(&["Gauge", "Trace Types", "Overflow Alarms", "Recency Monitors"], &summary),
        "<h2>Overflow/Threshold Alarms</h2>".to_string(),
        "<p class='muted'>Alarms triggered when rainfall exceeds a threshold.</p>".to_string(),
        limited_table(&["Gauge", "Trace", "Alarm Name", "Threshold"], &overflow_rows, 1000),
        "<h2>Data Freshness (Recency) Monitoring</h2>".to_string(),
        RECENCY_NOTE.to_string(),
        limited_table(
            &["Gauge", "Trace", "Alarm Name", "Hours Since Last Data"],
            &recency_rows,
            500,
        ),
        "<h2>Individual Gauge Pages</h2>".to_string(),
        "<p class='muted'>Click to view details for each gauge.</p>".to_string(),
        links,
        "</body>".to_string(),
        "</html>".to_string(),
    ]
    .join("\n")
}

pub fn build_gauge_page(gauge: &str, rows: &[&CleanedAlarmRow]) -> String {
    let mut overflow = category_rows(rows.iter().copied(), OVERFLOW_CATEGORY);
    overflow.sort_by(|a, b| {
        a.trace
            .cmp(&b.trace)
            .then_with(|| cmp_threshold(a.threshold, b.threshold))
    });
    let mut recency = category_rows(rows.iter().copied(), RECENCY_CATEGORY);
    recency.sort_by(|a, b| a.trace.cmp(&b.trace));

    let to_cells = |r: &&CleanedAlarmRow| {
        vec![
            r.trace.clone(),
            r.alarm_name.clone(),
            threshold_cell(r.threshold),
        ]
    };
    let overflow_rows: Vec<Vec<String>> = overflow.iter().map(to_cells).collect();
    let recency_rows: Vec<Vec<String>> = recency.iter().map(to_cells).collect();

    [
        "<html>".to_string(),
        "<head>".to_string(),
        "<meta charset='utf-8'/>".to_string(),
        format!("<title>{}</title>", escape(gauge)),
        CSS.to_string(),
        "</head>".to_string(),
        "<body>".to_string(),
        format!("<h1>{}</h1>", escape(gauge)),
        "<div class='stats'>".to_string(),
        stat_box(overflow.len(), "Overflow Alarms"),
        stat_box(recency.len(), "Recency Monitors"),
        "</div>".to_string(),
        "<h2>Overflow/Threshold Alarms</h2>".to_string(),
        limited_table(&["Trace", "Alarm Name", "Threshold"], &overflow_rows, 500),
        "<h2>Data Freshness (Recency)</h2>".to_string(),
        RECENCY_NOTE.to_string(),
        limited_table(&["Trace", "Alarm Name", "Hours Since Last Data"], &recency_rows, 100),
        "<div class='back-link'>".to_string(),
        "<p class='muted'><a href='../report.html'>&larr; Back to main report</a></p>".to_string(),
        "</div>".to_string(),
        "</body>".to_string(),
        "</html>".to_string(),
    ]
    .join("\n")
}

/// Writes one page per gauge, returning how many were written.
pub fn build_gauge_pages(rows: &[CleanedAlarmRow], out_dir: &Path) -> usize {
    let mut by_gauge: BTreeMap<&str, Vec<&CleanedAlarmRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.gauge.is_empty()) {
        by_gauge.entry(row.gauge.as_str()).or_default().push(row);
    }

    let pages_dir = out_dir.join(PAGES_DIR);
    let mut written = 0;
    for (gauge, gauge_rows) in &by_gauge {
        let path = pages_dir.join(format!("{}.html", safe_filename(gauge)));
        match write_page(&path, &build_gauge_page(gauge, gauge_rows)) {
            Ok(()) => written += 1,
            Err(e) => warn!(gauge, error = %e, "failed to generate gauge page"),
        }
    }
    info!(pages = written, dir = %pages_dir.display(), "generated gauge pages");
    written
}

pub fn run_gauge_report(csv_path: &Path, out_dir: &Path) -> Result<PathBuf> {
    let rows = load_and_clean(csv_path)?;
    info!(rows = rows.len(), "loaded alarm summary");

    let report_path = out_dir.join(REPORT_FILE);
    write_page(&report_path, &build_report(&rows))?;
    write_csv(&out_dir.join(CLEANED_FILE), &rows)?;
    build_gauge_pages(&rows, out_dir);

    Ok(report_path)
}

// -- Tests -------------------------------------------------------------------
