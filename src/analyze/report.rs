//! Plain text report of the gauge filtering and alarm inventory.

use std::fmt::Write;

use chrono::{DateTime, Local};

use crate::{
    analyze::{
        alarms::{AlarmRecord, RECENCY_ALARM_TYPE},
        filter::{ActiveGauge, FilterResult},
        value_counts,
    },
    moata::models::TraceRecord,
};

const RULE: &str =
    "================================================================================";

/// Region name implied by the exclusion keyword.
pub fn region_name(exclude_keyword: &str) -> &'static str {
    let keyword = exclude_keyword.to_lowercase();
    if keyword.contains("northland") && keyword.contains("waikato") {
        "Auckland"
    } else if keyword.contains("auckland") {
        "Non-Auckland"
    } else {
        "Active"
    }
}

fn source_label(source: &str) -> &str {
    match source {
        "derived_recency" => "Derived recency",
        "trace_inventory" => "Trace inventory",
        "alarm_inventory" => "Alarm inventory",
        "threshold_config" => "Threshold configs",
        other => other,
    }
}

fn trace_has_config(trace: &TraceRecord) -> bool {
    !trace.thresholds.is_empty()
        || !trace.alarms_by_type.is_empty()
        || trace.trace.has_alarms == Some(true)
}

fn overflow_thresholds(traces: &[TraceRecord]) -> usize {
    traces
        .iter()
        .flat_map(|t| &t.thresholds)
        .filter(|th| th.category.as_deref().unwrap_or("").trim().to_lowercase() == "overflow")
        .count()
}

fn has_recency_monitoring(traces: &[TraceRecord]) -> bool {
    traces.iter().any(|t| {
        t.trace.description().to_lowercase() == "rainfall"
            && t.trace
                .telemetered_maximum_time
                .as_deref()
                .is_some_and(|s| !s.is_empty())
    })
}

fn write_gauge(report: &mut String, gauge: &ActiveGauge) {
    let traces = &gauge.record.traces;
    let with_config = traces.iter().filter(|t| trace_has_config(t)).count();
    let thresholds: usize = traces.iter().map(|t| t.thresholds.len()).sum();
    let recency = usize::from(has_recency_monitoring(traces));
    let id = gauge
        .record
        .gauge
        .resolved_id()
        .map_or_else(|| "None".to_string(), |id| id.to_string());

    let _ = writeln!(report, "• {}", gauge.record.gauge.display_name());
    let _ = writeln!(report, "  ID: {}", id);
    let _ = writeln!(
        report,
        "  Last data: {}",
        gauge.last_data_time.format("%Y-%m-%d %H:%M:%S")
    );
    let _ = writeln!(
        report,
        "  Traces: {} total, {} with alarms/thresholds",
        traces.len(),
        with_config
    );
    let _ = writeln!(report, "  Overflow thresholds: {}", overflow_thresholds(traces));
    let _ = writeln!(report, "  Recency monitoring: {}", recency);
    let _ = writeln!(report, "  Total alarm configs: {}", thresholds + recency);
    report.push('\n');
}

fn write_alarm_summary(report: &mut String, alarms: &[AlarmRecord]) {
    let _ = writeln!(report, "Configuration sources:");
    for (source, count) in value_counts(alarms.iter().map(|a| a.source.as_str())) {
        let _ = writeln!(report, "  {}: {}", source_label(&source), count);
    }
    report.push('\n');

    let _ = writeln!(report, "By alarm type:");
    let types = alarms
        .iter()
        .filter_map(|a| a.alarm_type.as_deref())
        .filter(|t| !t.trim().is_empty());
    for (alarm_type, count) in value_counts(types) {
        let _ = writeln!(report, "  {}: {}", alarm_type, count);
    }
    report.push('\n');

    let overflow = alarms
        .iter()
        .filter(|a| {
            a.alarm_type
                .as_deref()
                .is_some_and(|t| t.to_lowercase().contains("overflow"))
        })
        .count();
    let recency = alarms
        .iter()
        .filter(|a| a.alarm_type.as_deref() == Some(RECENCY_ALARM_TYPE))
        .count();

    let _ = writeln!(report, "Total overflow thresholds: {}", overflow);
    let _ = writeln!(report, "Total recency monitors: {}", recency);
    let _ = writeln!(report, "Total configured alarms: {}", overflow + recency);
    report.push('\n');
}

pub fn create_summary_report(
    result: &FilterResult,
    alarms: &[AlarmRecord],
    inactive_months: u32,
    exclude_keyword: &str,
    generated_at: DateTime<Local>,
) -> String {
    let stats = &result.stats;
    let region = region_name(exclude_keyword);
    let total = stats.total_gauges;
    let after_exclusion = total - stats.excluded_gauges;
    let after_sensor = after_exclusion - stats.no_rainfall_trace;

    let mut report = String::new();
    let _ = writeln!(report, "{}", RULE);
    let _ = writeln!(report, "{} RAIN GAUGE ANALYSIS REPORT", region.to_uppercase());
    let _ = writeln!(report, "Generated: {}", generated_at.format("%Y-%m-%d %H:%M:%S"));
    let _ = writeln!(report, "{}\n", RULE);

    let _ = writeln!(report, "FILTERING RESULTS:");
    let _ = writeln!(report, "  Total gauges in dataset: {}\n", total);
    let _ = writeln!(
        report,
        "  Step 1 - Exclude non-{} (by keyword): {} removed",
        region, stats.excluded_gauges
    );
    let _ = writeln!(report, "           Remaining: {}\n", after_exclusion);
    let _ = writeln!(
        report,
        "  Step 2 - Require physical sensor data: {} removed",
        stats.no_rainfall_trace
    );
    let _ = writeln!(
        report,
        "           (gauges with only forecast/nowcast traces, no measured rainfall)"
    );
    let _ = writeln!(report, "           Remaining: {}\n", after_sensor);
    let _ = writeln!(
        report,
        "  Step 3 - Require recent telemetered data: {} removed",
        stats.inactive_gauges
    );
    let _ = writeln!(
        report,
        "           (telemeteredMaximumTime missing or older than {} months)",
        inactive_months
    );
    let _ = writeln!(
        report,
        "           Remaining: {}\n",
        after_sensor - stats.inactive_gauges
    );
    let _ = writeln!(report, "  ✓ Active {} rain gauges: {}\n", region, stats.active_gauges);

    let _ = writeln!(report, "{}\nACTIVE GAUGE DETAILS:\n{}\n", RULE, RULE);

    let mut gauges: Vec<&ActiveGauge> = result.active.iter().collect();
    gauges.sort_by(|a, b| b.last_data_time.cmp(&a.last_data_time));
    for gauge in gauges {
        write_gauge(&mut report, gauge);
    }

    let _ = writeln!(
        report,
        "{}\nALARM & THRESHOLD CONFIGURATION SUMMARY:\n{}\n",
        RULE, RULE
    );

    if alarms.is_empty() {
        let _ = writeln!(report, "No alarm/threshold configurations found on active gauges.\n");
    } else {
        write_alarm_summary(&mut report, alarms);
    }
    report.push_str(RULE);

    report
}

// -- Tests -------------------------------------------------------------------
