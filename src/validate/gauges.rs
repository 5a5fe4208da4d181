//! Confirms logged rain gauge ARI alarms against the gauges' own ARI traces.

use std::{collections::HashMap, fmt, fs, path::Path};

use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    analyze::{
        alarms::{read_alarm_records, AlarmRecord},
        value_counts,
    },
    cli::create_progress_bar,
    config::{
        ARI_TRACE_DESCRIPTION, DEFAULT_ARI_THRESHOLD, DEFAULT_DATA_INTERVAL_SECONDS,
        DEFAULT_DATA_TYPE,
    },
    dates::{iso_z, parse_utc},
    moata::client::{MoataClient, TraceDataQuery},
    tables::{read_csv, write_csv},
};

const WINDOW_HOURS: i64 = 1;

/// One row of the external alarm log.
#[derive(Debug, Clone, Deserialize)]
pub struct GaugeAlarmEvent {
    pub assetid: i64,
    pub name: String,
    pub createdtimeutc: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    Verified,
    NotVerified,
    Unverifiable,
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            VerificationStatus::Verified => "VERIFIED",
            VerificationStatus::NotVerified => "NOT_VERIFIED",
            VerificationStatus::Unverifiable => "UNVERIFIABLE",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaugeValidationRow {
    pub assetid: i64,
    pub gauge_name: String,
    pub alarm_time_utc: String,
    pub trace_id: Option<i64>,
    pub status: VerificationStatus,
    pub reason: String,
    pub max_ari_value: Option<f64>,
    pub threshold: f64,
}

impl GaugeValidationRow {
    fn unverifiable(
        event: &GaugeAlarmEvent,
        trace_id: Option<i64>,
        reason: impl Into<String>,
    ) -> Self {
        GaugeValidationRow {
            assetid: event.assetid,
            gauge_name: event.name.clone(),
            alarm_time_utc: event.createdtimeutc.clone(),
            trace_id,
            status: VerificationStatus::Unverifiable,
            reason: reason.into(),
            max_ari_value: None,
            threshold: DEFAULT_ARI_THRESHOLD,
        }
    }
}

#[derive(Debug)]
pub struct GaugeValidationOutput {
    pub rows: Vec<GaugeValidationRow>,
    pub status_counts: Vec<(String, usize)>,
}

/// Asset id to its "Max TP108 ARI" trace id. Later rows win.
pub fn build_trace_mapping(records: &[AlarmRecord]) -> HashMap<i64, i64> {
    records
        .iter()
        .filter(|r| r.trace_description.as_deref() == Some(ARI_TRACE_DESCRIPTION))
        .filter_map(|r| Some((r.gauge_id?, r.trace_id?)))
        .collect()
}

pub async fn verify_event(
    client: &MoataClient,
    mapping: &HashMap<i64, i64>,
    event: &GaugeAlarmEvent,
) -> GaugeValidationRow {
    let Some(&trace_id) = mapping.get(&event.assetid) else {
        return GaugeValidationRow::unverifiable(event, None, "No trace mapping found");
    };
    let Some(alarm_time) = parse_utc(&event.createdtimeutc) else {
        return GaugeValidationRow::unverifiable(event, Some(trace_id), "Invalid alarm time");
    };

    let from = iso_z(&(alarm_time - Duration::hours(WINDOW_HOURS)));
    let to = iso_z(&(alarm_time + Duration::hours(WINDOW_HOURS)));
    let query = TraceDataQuery {
        from: &from,
        to: &to,
        data_type: DEFAULT_DATA_TYPE,
        data_interval: Some(DEFAULT_DATA_INTERVAL_SECONDS),
        pad_with_zeroes: false,
    };

    let points = match client.get_trace_data(trace_id, &query).await {
        Ok(points) => points,
        Err(e) => {
            warn!(asset_id = event.assetid, trace_id, error = %e, "failed to fetch trace data");
            let reason = format!("API error: {}", e);
            return GaugeValidationRow::unverifiable(event, Some(trace_id), reason);
        }
    };

    let Some(max_value) = points.iter().filter_map(|p| p.value).reduce(f64::max) else {
        return GaugeValidationRow::unverifiable(event, Some(trace_id), "No data in window");
    };

    let status = if max_value >= DEFAULT_ARI_THRESHOLD {
        VerificationStatus::Verified
    } else {
        VerificationStatus::NotVerified
    };

    GaugeValidationRow {
        assetid: event.assetid,
        gauge_name: event.name.clone(),
        alarm_time_utc: event.createdtimeutc.clone(),
        trace_id: Some(trace_id),
        status,
        reason: String::new(),
        max_ari_value: Some((max_value * 100.0).round() / 100.0),
        threshold: DEFAULT_ARI_THRESHOLD,
    }
}

pub async fn run_gauge_validation(
    client: &MoataClient,
    mapping_csv: &Path,
    alarms_csv: &Path,
    output_csv: &Path,
) -> Result<GaugeValidationOutput> {
    let mapping = build_trace_mapping(&read_alarm_records(mapping_csv)?);
    info!(gauges = mapping.len(), trace = ARI_TRACE_DESCRIPTION, "loaded trace mapping");

    let events: Vec<GaugeAlarmEvent> = read_csv(alarms_csv)?;
    info!(events = events.len(), "loaded alarm events");

    let pb = create_progress_bar(events.len() as u64, "Validating alarms".to_string());
    let mut rows = Vec::with_capacity(events.len());
    for event in &events {
        let row = verify_event(client, &mapping, event).await;
        info!(
            gauge = %row.gauge_name,
            status = %row.status,
            max_ari = ?row.max_ari_value,
            "validated alarm"
        );
        rows.push(row);
        pb.inc(1);
    }
    pb.finish_with_message("Finished validating alarms");

    if let Some(parent) = output_csv.parent() {
        fs::create_dir_all(parent).with_context(|| format!("cannot create {}", parent.display()))?;
    }
    write_csv(output_csv, &rows)?;

    let status_counts = value_counts(rows.iter().map(|r| r.status.to_string()));
    Ok(GaugeValidationOutput { rows, status_counts })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use crate::moata::stub::{json_response, StubServer, TOKEN_BODY};

    use super::*;

    fn event(asset: i64, time: &str) -> GaugeAlarmEvent {
        GaugeAlarmEvent {
            assetid: asset,
            name: format!("Gauge {}", asset),
            createdtimeutc: time.to_string(),
        }
    }

    #[test]
    fn should_map_only_ari_traces() {
        let records = vec![
            AlarmRecord {
                gauge_id: Some(1),
                trace_id: Some(10),
                trace_description: Some("Rainfall".into()),
                ..Default::default()
            },
            AlarmRecord {
                gauge_id: Some(1),
                trace_id: Some(11),
                trace_description: Some(ARI_TRACE_DESCRIPTION.into()),
                ..Default::default()
            },
            AlarmRecord {
                gauge_id: None,
                trace_id: Some(12),
                trace_description: Some(ARI_TRACE_DESCRIPTION.into()),
                ..Default::default()
            },
        ];

        let mapping = build_trace_mapping(&records);

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping[&1], 11);
    }

    #[tokio::test]
    async fn should_classify_alarm_events() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN_BODY),
            json_response(
                200,
                r#"{"items": [{"time": "2025-05-01T10:00:00Z", "value": 2.0}, {"value": 6.456}]}"#,
            ),
            json_response(200, r#"[{"value": 4.9}]"#),
            json_response(200, "[]"),
            json_response(400, r#"{"error": "bad"}"#),
        ])
        .await;
        let client = server.client();
        let mapping = HashMap::from([(1, 101), (2, 102), (3, 103), (4, 104)]);

        let verified = verify_event(&client, &mapping, &event(1, "2025-05-01 10:00:00")).await;
        assert_eq!(verified.status, VerificationStatus::Verified);
        assert_eq!(verified.max_ari_value, Some(6.46));

        let not_verified = verify_event(&client, &mapping, &event(2, "2025-05-01T10:00:00Z")).await;
        assert_eq!(not_verified.status, VerificationStatus::NotVerified);

        let empty = verify_event(&client, &mapping, &event(3, "2025-05-01T10:00:00Z")).await;
        assert_eq!(empty.reason, "No data in window");

        let failed = verify_event(&client, &mapping, &event(4, "2025-05-01T10:00:00Z")).await;
        assert_eq!(failed.status, VerificationStatus::Unverifiable);
        assert!(failed.reason.starts_with("API error"));

        let unmapped = verify_event(&client, &mapping, &event(9, "2025-05-01T10:00:00Z")).await;
        assert_eq!(unmapped.reason, "No trace mapping found");
        assert_eq!(unmapped.trace_id, None);

        let bad_time = verify_event(&client, &mapping, &event(1, "yesterday")).await;
        assert_eq!(bad_time.reason, "Invalid alarm time");
    }

    #[test]
    fn should_write_status_names() {
        let row = GaugeValidationRow::unverifiable(&event(1, "x"), None, "No trace mapping found");
        let mut writer = csv::Writer::from_writer(vec![]);
        writer.serialize(&row).unwrap();
        let text = String::from_utf8(writer.into_inner().unwrap()).unwrap();

        assert!(text.contains("UNVERIFIABLE"));
    }
}
