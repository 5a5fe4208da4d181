//! Alarm and threshold inventory for active gauges.
//!
//! Every gauge contributes a derived recency row. Every trace contributes an
//! inventory row, plus an alarm inventory row when alarms are attached, plus
//! one row per configured threshold.

use std::{collections::BTreeMap, path::Path};

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    analyze::{ari::round_to, filter::ActiveGauge},
    dates,
    moata::models::{value_as_i64, value_as_string, Threshold, TraceRecord},
    tables::{read_csv, write_csv},
};

pub const SOURCE_DERIVED_RECENCY: &str = "derived_recency";
pub const SOURCE_TRACE_INVENTORY: &str = "trace_inventory";
pub const SOURCE_ALARM_INVENTORY: &str = "alarm_inventory";
pub const SOURCE_THRESHOLD_CONFIG: &str = "threshold_config";

pub const RECENCY_ALARM_NAME: &str = "Data Recency (derived from telemeteredMaximumTime)";
pub const RECENCY_ALARM_TYPE: &str = "Recency";
const INVENTORY_ALARM_NAME: &str = "Alarm inventory (from alarms_by_type / detailed_alarm)";
const INVENTORY_ALARM_TYPE: &str = "AlarmInventory";

/// One row of the alarm inventory, as written to `alarm_summary_full.csv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub gauge_id: Option<i64>,
    pub gauge_name: String,
    pub gauge_description: Option<String>,
    pub gauge_project_id: Option<i64>,
    pub last_data: Option<String>,
    pub recency_age_hours: Option<f64>,
    pub recency_age_days: Option<f64>,
    pub is_active_by_months: Option<bool>,

    pub trace_id: Option<i64>,
    pub trace_asset_id: Option<i64>,
    pub trace_description: Option<String>,
    pub trace_has_alarms: Option<bool>,
    pub trace_is_visible: Option<bool>,
    pub trace_resolution: Option<String>,
    pub trace_timezone: Option<String>,
    pub trace_var_type_id: Option<i64>,
    pub trace_var_type_name: Option<String>,
    pub trace_var_type_type: Option<String>,
    pub trace_units_label: Option<String>,
    pub trace_telemetered_max_time: Option<String>,
    pub trace_archived_min_time: Option<String>,
    pub trace_archived_max_time: Option<String>,

    pub alarm_id: Option<i64>,
    pub alarm_name: Option<String>,
    pub alarm_type: Option<String>,
    pub alarm_description: Option<String>,
    pub threshold: Option<f64>,
    pub threshold_type: Option<String>,
    pub threshold_category: Option<String>,
    pub threshold_category_id: Option<i64>,
    pub severity: Option<String>,
    pub is_critical: Option<bool>,
    pub alarm_types_present: Option<String>,
    pub alarm_types_present_count: usize,
    pub alarm_types_counts_json: Option<String>,
    pub detailed_alarm_type: Option<String>,
    pub source: String,
}

/// The five-column view written to `alarm_summary.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleAlarmRecord {
    #[serde(rename = "Gauge")]
    pub gauge: String,
    #[serde(rename = "Trace")]
    pub trace: Option<String>,
    #[serde(rename = "Alarm Name")]
    pub alarm_name: Option<String>,
    #[serde(rename = "Type")]
    pub alarm_type: Option<String>,
    #[serde(rename = "Threshold")]
    pub threshold: Option<f64>,
}

impl From<&AlarmRecord> for SimpleAlarmRecord {
    fn from(record: &AlarmRecord) -> Self {
        SimpleAlarmRecord {
            gauge: record.gauge_name.clone(),
            trace: record.trace_description.clone(),
            alarm_name: record.alarm_name.clone(),
            alarm_type: record.alarm_type.clone(),
            threshold: record.threshold,
        }
    }
}

/// Every trace row, and the subset describing an alarm or threshold.
#[derive(Debug, Clone, Default)]
pub struct AlarmInventory {
    pub all_traces: Vec<AlarmRecord>,
    pub alarms: Vec<AlarmRecord>,
}

pub fn analyze_alarms(
    active: &[ActiveGauge],
    inactive_threshold_months: u32,
    now: DateTime<Utc>,
) -> AlarmInventory {
    let mut inventory = AlarmInventory::default();
    let window_seconds = f64::from(inactive_threshold_months) * 30.0 * 86_400.0;

    for gauge in active {
        let traces = &gauge.record.traces;
        let primary = traces
            .iter()
            .find(|t| t.trace.description().to_lowercase() == "rainfall");
        let primary = primary.map(|t| &t.trace);

        let archived_min = primary
            .and_then(|t| t.archived_minimum_time.as_deref())
            .and_then(dates::parse_utc);
        let archived_max = primary
            .and_then(|t| t.archived_maximum_time.as_deref())
            .and_then(dates::parse_utc);
        let telemetered_primary = primary
            .and_then(|t| t.telemetered_maximum_time.as_deref())
            .and_then(dates::parse_utc);

        let last = telemetered_primary.or_else(|| latest_telemetered(traces));

        let base = AlarmRecord {
            gauge_id: gauge.record.gauge.resolved_id(),
            gauge_name: gauge.record.gauge.display_name().to_string(),
            gauge_description: gauge.record.gauge.description.clone(),
            gauge_project_id: gauge.record.gauge.project_id,
            last_data: last.map(|dt| dt.format("%d/%m/%Y").to_string()),
            ..Default::default()
        };
        let base = match last {
            Some(last) => {
                let age = (now - last).num_milliseconds() as f64 / 1000.0;
                AlarmRecord {
                    recency_age_hours: Some(round_to(age / 3600.0, 2)),
                    recency_age_days: Some(round_to(age / 86_400.0, 2)),
                    is_active_by_months: Some(age <= window_seconds),
                    ..base
                }
            }
            None => base,
        };

        let recency = AlarmRecord {
            trace_description: Some(
                if telemetered_primary.is_some() {
                    "Rainfall (primary)"
                } else {
                    "Rainfall (primary not found)"
                }
                .to_string(),
            ),
            trace_telemetered_max_time: last.as_ref().map(dates::iso_offset),
            trace_archived_min_time: archived_min.as_ref().map(dates::iso_offset),
            trace_archived_max_time: archived_max.as_ref().map(dates::iso_offset),
            alarm_name: Some(RECENCY_ALARM_NAME.to_string()),
            alarm_type: Some(RECENCY_ALARM_TYPE.to_string()),
            threshold: base.recency_age_hours,
            source: SOURCE_DERIVED_RECENCY.to_string(),
            ..base.clone()
        };
        inventory.all_traces.push(recency.clone());
        inventory.alarms.push(recency);

        for trace in traces {
            let present = trace.alarms_by_type.present();
            let detailed = trace
                .detailed_alarm
                .as_ref()
                .filter(|a| a.alarm_type.is_some() || a.trace_id.is_some() || !a.extra.is_empty())
                .map(|a| a.label());

            let counts: BTreeMap<&str, usize> = present.iter().copied().collect();
            let row = AlarmRecord {
                alarm_types_present: (!present.is_empty()).then(|| {
                    present.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(",")
                }),
                alarm_types_present_count: present.len(),
                alarm_types_counts_json: (!counts.is_empty())
                    .then(|| serde_json::to_string(&counts).ok())
                    .flatten(),
                detailed_alarm_type: detailed.clone(),
                source: SOURCE_TRACE_INVENTORY.to_string(),
                ..with_trace_fields(&base, trace)
            };

            inventory.all_traces.push(row.clone());

            if !present.is_empty() || detailed.is_some() {
                inventory.alarms.push(AlarmRecord {
                    alarm_name: Some(INVENTORY_ALARM_NAME.to_string()),
                    alarm_type: Some(INVENTORY_ALARM_TYPE.to_string()),
                    source: SOURCE_ALARM_INVENTORY.to_string(),
                    ..row.clone()
                });
            }

            for threshold in &trace.thresholds {
                let threshold_row = with_threshold_fields(&row, threshold);
                inventory.all_traces.push(threshold_row.clone());
                inventory.alarms.push(threshold_row);
            }
        }
    }

    inventory
}

fn latest_telemetered(traces: &[TraceRecord]) -> Option<DateTime<Utc>> {
    traces
        .iter()
        .filter_map(|t| t.trace.telemetered_maximum_time.as_deref())
        .filter_map(dates::parse_utc)
        .max()
}

fn with_trace_fields(base: &AlarmRecord, record: &TraceRecord) -> AlarmRecord {
    let trace = &record.trace;
    let variable = trace.variable_type();

    AlarmRecord {
        trace_id: trace.id,
        trace_asset_id: trace.asset_id,
        trace_description: trace.description.clone(),
        trace_has_alarms: trace.has_alarms,
        trace_is_visible: trace.is_visible,
        trace_resolution: trace.resolution.as_ref().and_then(resolution_bucket),
        trace_timezone: trace.extra.get("timeZone").and_then(value_as_string),
        trace_var_type_id: variable.id,
        trace_var_type_name: variable.name,
        trace_var_type_type: variable.kind,
        trace_units_label: variable.units,
        trace_telemetered_max_time: trace.telemetered_maximum_time.clone(),
        trace_archived_min_time: trace.archived_minimum_time.clone(),
        trace_archived_max_time: trace.archived_maximum_time.clone(),
        ..base.clone()
    }
}

fn with_threshold_fields(row: &AlarmRecord, threshold: &Threshold) -> AlarmRecord {
    let category = threshold
        .category
        .clone()
        .unwrap_or_else(|| "Threshold".to_string());
    let alarm_type = match threshold.threshold_type.as_deref().filter(|t| !t.is_empty()) {
        Some(kind) => format!("{}/{}", category, kind),
        None => category.clone(),
    };

    AlarmRecord {
        alarm_id: threshold.id,
        alarm_name: Some(threshold_alarm_name(threshold)),
        alarm_type: Some(alarm_type),
        alarm_description: threshold.alarm_description.clone(),
        threshold: threshold.effective_value(),
        threshold_type: threshold.threshold_type.clone(),
        threshold_category: Some(category),
        threshold_category_id: threshold
            .extra
            .get("thresholdCategoryId")
            .and_then(value_as_i64),
        severity: threshold.severity.as_ref().and_then(value_as_string),
        is_critical: threshold.is_critical,
        source: SOURCE_THRESHOLD_CONFIG.to_string(),
        ..row.clone()
    }
}

/// Short names such as "mm" fall back to the alarm description.
pub fn threshold_alarm_name(threshold: &Threshold) -> String {
    let name = threshold.name.as_deref().unwrap_or("").trim();
    if name.chars().count() >= 4 {
        return name.to_string();
    }

    match threshold.alarm_description.as_deref().filter(|d| !d.is_empty()) {
        Some(description) => match description.split_once(" measured at ") {
            Some((head, _)) => head.to_string(),
            None => description.to_string(),
        },
        None if !name.is_empty() => name.to_string(),
        None => "Unknown Threshold".to_string(),
    }
}

/// Normalises the resolution, which arrives as seconds, a string or `{value, unit}`.
pub fn resolution_bucket(resolution: &Value) -> Option<String> {
    match resolution {
        Value::Object(map) => {
            let unit = map
                .get("unit")
                .and_then(value_as_string)
                .unwrap_or_else(|| "unit".to_string());
            let value = match map.get("value") {
                Some(Value::String(s)) => s.clone(),
                Some(Value::Null) | None => "None".to_string(),
                Some(other) => other.to_string(),
            };
            Some(format!("{}{}", value, unit))
        }
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(|n| n.to_string()),
        other => value_as_string(other),
    }
}

/// Writes `all_traces.csv`, `alarm_summary_full.csv` and `alarm_summary.csv`.
pub fn write_alarm_tables(
    inventory: &AlarmInventory,
    all_traces_path: &Path,
    full_path: &Path,
    simple_path: &Path,
) -> Result<()> {
    write_csv(all_traces_path, &inventory.all_traces)?;
    write_csv(full_path, &inventory.alarms)?;

    let simple: Vec<SimpleAlarmRecord> = inventory
        .alarms
        .iter()
        .map(SimpleAlarmRecord::from)
        .collect();
    write_csv(simple_path, &simple)
}

/// Reads `alarm_summary_full.csv` back.
pub fn read_alarm_records(path: &Path) -> Result<Vec<AlarmRecord>> {
    read_csv(path)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::moata::models::GaugeRecord;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()
    }

    fn active_gauge(record: Value) -> ActiveGauge {
        let record: GaugeRecord = serde_json::from_value(record).unwrap();
        ActiveGauge {
            rainfall_trace: record.traces[0].trace.clone(),
            last_data_time: now(),
            record,
        }
    }

    fn sample() -> ActiveGauge {
        active_gauge(json!({
            "gauge": {"id": 10, "name": "Albany", "projectId": 594},
            "traces": [
                {
                    "trace": {
                        "id": 100,
                        "description": "Rainfall",
                        "telemeteredMaximumTime": "2025-05-31T00:00:00Z",
                        "resolution": {"value": 5, "unit": "minute"},
                        "dataVariableType": {
                            "id": 1,
                            "name": "Rainfall",
                            "type": "Rain",
                            "units": {"label": "mm"}
                        }
                    },
                    "alarms_by_type": {"overflow": [{"alarmType": "OverflowMonitoring"}]},
                    "thresholds": [
                        {
                            "id": 1,
                            "name": "mm",
                            "alarmDescription": "Heavy rain measured at Albany",
                            "value": 20,
                            "category": "Overflow",
                            "thresholdType": "High"
                        },
                        {"id": 2, "name": "Daily total", "thresholdValue": 50}
                    ]
                },
                {"trace": {"id": 101, "description": "Max TP108 ARI", "resolution": 300}}
            ]
        }))
    }

    #[test]
    fn should_build_rows_in_order() {
        let inventory = analyze_alarms(&[sample()], 3, now());

        let sources: Vec<&str> = inventory.all_traces.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(
            sources,
            vec![
                SOURCE_DERIVED_RECENCY,
                SOURCE_TRACE_INVENTORY,
                SOURCE_THRESHOLD_CONFIG,
                SOURCE_THRESHOLD_CONFIG,
                SOURCE_TRACE_INVENTORY,
            ]
        );

        let alarm_sources: Vec<&str> = inventory.alarms.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(
            alarm_sources,
            vec![
                SOURCE_DERIVED_RECENCY,
                SOURCE_ALARM_INVENTORY,
                SOURCE_THRESHOLD_CONFIG,
                SOURCE_THRESHOLD_CONFIG,
            ]
        );
    }

    #[test]
    fn should_derive_recency_from_primary_trace() {
        let inventory = analyze_alarms(&[sample()], 3, now());
        let recency = &inventory.alarms[0];

        assert_eq!(recency.threshold, Some(24.0));
        assert_eq!(recency.recency_age_days, Some(1.0));
        assert_eq!(recency.is_active_by_months, Some(true));
        assert_eq!(recency.last_data.as_deref(), Some("31/05/2025"));
        assert_eq!(recency.trace_description.as_deref(), Some("Rainfall (primary)"));
        assert_eq!(
            recency.trace_telemetered_max_time.as_deref(),
            Some("2025-05-31T00:00:00+00:00")
        );
    }

    #[test]
    fn should_fall_back_to_latest_trace_time() {
        let gauge = active_gauge(json!({
            "gauge": {"id": 11, "name": "Other"},
            "traces": [
                {"trace": {
                    "description": "Rain A",
                    "telemeteredMaximumTime": "2025-05-01T00:00:00Z"
                }},
                {"trace": {
                    "description": "Rain B",
                    "telemeteredMaximumTime": "2025-05-20T00:00:00Z"
                }}
            ]
        }));

        let inventory = analyze_alarms(&[gauge], 3, now());

        assert_eq!(inventory.alarms[0].last_data.as_deref(), Some("20/05/2025"));
        assert_eq!(
            inventory.alarms[0].trace_description.as_deref(),
            Some("Rainfall (primary not found)")
        );
    }

    #[test]
    fn should_describe_thresholds() {
        let inventory = analyze_alarms(&[sample()], 3, now());
        let overflow = &inventory.alarms[2];
        let daily = &inventory.alarms[3];

        assert_eq!(overflow.alarm_name.as_deref(), Some("Heavy rain"));
        assert_eq!(overflow.alarm_type.as_deref(), Some("Overflow/High"));
        assert_eq!(overflow.threshold, Some(20.0));
        assert_eq!(overflow.trace_resolution.as_deref(), Some("5minute"));
        assert_eq!(overflow.alarm_types_present.as_deref(), Some("overflow"));
        assert_eq!(overflow.alarm_types_counts_json.as_deref(), Some(r#"{"overflow":1}"#));

        assert_eq!(daily.alarm_name.as_deref(), Some("Daily total"));
        assert_eq!(daily.alarm_type.as_deref(), Some("Threshold"));
        assert_eq!(daily.threshold, Some(50.0));
    }

    #[test]
    fn should_name_unknown_thresholds() {
        let threshold = Threshold::default();

        assert_eq!(threshold_alarm_name(&threshold), "Unknown Threshold");
    }

    #[test]
    fn should_bucket_numeric_resolution() {
        assert_eq!(resolution_bucket(&json!(300)).as_deref(), Some("300"));
        assert_eq!(resolution_bucket(&json!("5m")).as_deref(), Some("5m"));
        assert_eq!(resolution_bucket(&json!({"value": 1})).as_deref(), Some("1unit"));
    }

    #[test]
    fn should_write_and_read_alarm_tables() {
        let dir = tempfile::TempDir::new().unwrap();
        let inventory = analyze_alarms(&[sample()], 3, now());
        let all = dir.path().join("all_traces.csv");
        let full = dir.path().join("alarm_summary_full.csv");
        let simple = dir.path().join("alarm_summary.csv");

        write_alarm_tables(&inventory, &all, &full, &simple).unwrap();

        let records = read_alarm_records(&full).unwrap();
        assert_eq!(records, inventory.alarms);

        let header = std::fs::read_to_string(&simple).unwrap();
        assert!(header.starts_with("Gauge,Trace,Alarm Name,Type,Threshold"));
    }
}
