//! Validates logged ARI alarms by replaying each gauge's ARI trace against its threshold.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    collect::radar::time_chunks,
    config::{
        ARI_TRACE_DESCRIPTION, DEFAULT_ARI_THRESHOLD, DEFAULT_ARI_TYPE,
        DEFAULT_DATA_INTERVAL_SECONDS, DEFAULT_DATA_TYPE,
    },
    dates::iso_z,
    error::ApiError,
    moata::client::{extract_items, MoataClient, TraceDataQuery},
    tables::write_csv,
    validate::{
        matcher::{AlarmMatcher, MatchResult, MatchStats, DEFAULT_TOLERANCE_MINUTES},
        threshold::{
            check_consecutive_exceedances, check_exceedances, series_from_trace,
            summarize_exceedances, ExceedanceGroup, ExceedanceSummary, SeriesPoint,
        },
    },
};

pub const DEFAULT_SAMPLE_SIZE: usize = 5;
pub const SUMMARY_FILE: &str = "validation_summary.csv";
pub const DETAILS_FILE: &str = "validation_details.json";

const WINDOW_BUFFER_DAYS: i64 = 1;
const MAX_WINDOW_DAYS: i64 = 32;
const CAPPED_WINDOW_DAYS: i64 = 30;
const CHUNK_DAYS: i64 = 30;
const MAX_GAP_MINUTES: i64 = 15;

/// Validation of one asset's logged alarms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetValidation {
    pub asset_id: i64,
    pub ari_trace_id: i64,
    pub threshold: f64,
    pub data_points: usize,
    pub api_exceedances: usize,
    pub logged_alarms: usize,
    pub matched: usize,
    pub match_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub exceedance_summary: ExceedanceSummary,
    pub exceedance_periods: Vec<ExceedanceGroup>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ari_windows: Vec<AriWindow>,
    pub details: MatchResult,
}

/// A duration window from the trace's ARI endpoint. These carry no timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AriWindow {
    #[serde(default)]
    pub duration: Option<i64>,
    pub ari: f64,
    #[serde(default)]
    pub depth: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SummaryRow {
    asset_id: i64,
    ari_trace_id: i64,
    threshold: f64,
    data_points: usize,
    api_exceedances: usize,
    exceedance_periods: usize,
    logged_alarms: usize,
    matched: usize,
    match_rate: f64,
    error: Option<String>,
}

impl From<&AssetValidation> for SummaryRow {
    fn from(v: &AssetValidation) -> Self {
        SummaryRow {
            asset_id: v.asset_id,
            ari_trace_id: v.ari_trace_id,
            threshold: v.threshold,
            data_points: v.data_points,
            api_exceedances: v.api_exceedances,
            exceedance_periods: v.exceedance_periods.len(),
            logged_alarms: v.logged_alarms,
            matched: v.matched,
            match_rate: v.match_rate,
            error: v.error.clone(),
        }
    }
}

#[derive(Debug)]
pub struct AlarmValidationOutput {
    pub results: Vec<AssetValidation>,
    pub summary_path: Option<PathBuf>,
    pub details_path: Option<PathBuf>,
}

/// Data window around an asset's alarms. Spans over 32 days keep only the last 30 days.
pub fn alarm_window(
    earliest: DateTime<Utc>,
    latest: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let from = earliest - Duration::days(WINDOW_BUFFER_DAYS);
    let to = latest + Duration::days(WINDOW_BUFFER_DAYS);

    if (to - from).num_days() > MAX_WINDOW_DAYS {
        (to - Duration::days(CAPPED_WINDOW_DAYS), to)
    } else {
        (from, to)
    }
}

pub struct AlarmValidator<'a> {
    client: &'a MoataClient,
    matcher: &'a AlarmMatcher,
}

impl<'a> AlarmValidator<'a> {
    pub fn new(client: &'a MoataClient, matcher: &'a AlarmMatcher) -> Self {
        AlarmValidator { client, matcher }
    }

    pub async fn validate_sample(&self, sample_size: usize) -> Vec<AssetValidation> {
        let assets: Vec<i64> = self.matcher.asset_ids().into_iter().take(sample_size).collect();
        info!(gauges = assets.len(), "validating gauges from alarm log");

        let mut results = Vec::new();
        for asset_id in assets {
            match self.validate_asset(asset_id).await {
                Ok(Some(result)) => {
                    info!(
                        asset_id,
                        matched = result.matched,
                        logged = result.logged_alarms,
                        "validated gauge"
                    );
                    results.push(result);
                }
                Ok(None) => {}
                Err(e) => warn!(asset_id, error = %e, "failed to validate gauge"),
            }
        }
        results
    }

    pub async fn validate_asset(&self, asset_id: i64) -> Result<Option<AssetValidation>, ApiError> {
        let traces = self.client.get_traces_for_asset(asset_id).await?;
        let Some(ari_trace_id) = traces
            .iter()
            .find(|t| t.description().contains(ARI_TRACE_DESCRIPTION))
            .and_then(|t| t.id)
        else {
            warn!(asset_id, "no ARI trace found");
            return Ok(None);
        };

        let threshold = self
            .client
            .get_thresholds_for_trace(ari_trace_id)
            .await?
            .first()
            .and_then(|t| t.effective_value())
            .unwrap_or(DEFAULT_ARI_THRESHOLD);
        debug!(asset_id, ari_trace_id, threshold, "using threshold");

        let logged = self.matcher.alarms_for_asset(asset_id);
        let (Some(earliest), Some(latest)) = (logged.first(), logged.last()) else {
            warn!(asset_id, "no alarms found");
            return Ok(None);
        };
        let (from, to) = alarm_window(earliest.createdtimeutc, latest.createdtimeutc);

        let series = self.fetch_series(ari_trace_id, from, to).await?;
        if series.is_empty() {
            warn!(asset_id, ari_trace_id, from = %from, to = %to, "no time series data");
            let ari_windows: Vec<AriWindow> = self
                .fetch_ari_windows(ari_trace_id, from, to)
                .await
                .into_iter()
                .filter(|w| w.ari > threshold)
                .collect();
            let missed: Vec<_> = logged.iter().map(|a| (*a).clone()).collect();
            return Ok(Some(AssetValidation {
                asset_id,
                ari_trace_id,
                threshold,
                data_points: 0,
                api_exceedances: ari_windows.len(),
                logged_alarms: logged.len(),
                matched: 0,
                match_rate: 0.0,
                error: Some("No time series data".into()),
                exceedance_summary: ExceedanceSummary::default(),
                exceedance_periods: Vec::new(),
                ari_windows,
                details: MatchResult {
                    stats: MatchStats {
                        total_logged_alarms: missed.len(),
                        missed_alarms_count: missed.len(),
                        ..Default::default()
                    },
                    missed_alarms: missed,
                    ..Default::default()
                },
            }));
        }

        let exceedances = check_exceedances(&series, threshold, ARI_TRACE_DESCRIPTION);
        let periods = check_consecutive_exceedances(&series, threshold, 1, MAX_GAP_MINUTES);
        let details = self
            .matcher
            .match_alarms(asset_id, &exceedances, DEFAULT_TOLERANCE_MINUTES);

        Ok(Some(AssetValidation {
            asset_id,
            ari_trace_id,
            threshold,
            data_points: series.len(),
            api_exceedances: exceedances.len(),
            logged_alarms: logged.len(),
            matched: details.matched.len(),
            match_rate: details.match_rate,
            error: None,
            exceedance_summary: summarize_exceedances(&exceedances),
            exceedance_periods: periods,
            ari_windows: Vec::new(),
            details,
        }))
    }

    async fn fetch_series(
        &self,
        trace_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>, ApiError> {
        let mut series = Vec::new();
        for (start, end) in time_chunks(from, to, CHUNK_DAYS * 24) {
            let (from, to) = (iso_z(&start), iso_z(&end));
            let query = TraceDataQuery {
                from: &from,
                to: &to,
                data_type: DEFAULT_DATA_TYPE,
                data_interval: Some(DEFAULT_DATA_INTERVAL_SECONDS),
                pad_with_zeroes: false,
            };
            let points = self.client.get_trace_data(trace_id, &query).await?;
            series.extend(series_from_trace(&points));
        }
        series.sort_by_key(|p| p.timestamp);
        Ok(series)
    }

    /// Duration windows from the ARI endpoint; failures are logged and yield nothing.
    async fn fetch_ari_windows(
        &self,
        trace_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Vec<AriWindow> {
        let data = match self
            .client
            .get_ari_data(trace_id, &iso_z(&from), &iso_z(&to), DEFAULT_ARI_TYPE)
            .await
        {
            Ok(data) => data,
            Err(e) => {
                warn!(trace_id, error = %e, "ARI fetch failed");
                return Vec::new();
            }
        };

        let windows: Vec<AriWindow> = extract_items(data)
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect();
        debug!(trace_id, windows = windows.len(), "fetched ARI windows");
        windows
    }
}

pub async fn run_alarm_validation(
    client: &MoataClient,
    alarm_log: &Path,
    output_dir: &Path,
    sample_size: usize,
) -> Result<AlarmValidationOutput> {
    fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;
    let matcher = AlarmMatcher::load(alarm_log)?;

    let results = AlarmValidator::new(client, &matcher)
        .validate_sample(sample_size)
        .await;

    if results.is_empty() {
        warn!("no results to save");
        return Ok(AlarmValidationOutput {
            results,
            summary_path: None,
            details_path: None,
        });
    }

    let summary_path = output_dir.join(SUMMARY_FILE);
    let rows: Vec<SummaryRow> = results.iter().map(SummaryRow::from).collect();
    write_csv(&summary_path, &rows)?;

    let details_path = output_dir.join(DETAILS_FILE);
    let json = serde_json::to_string_pretty(&results)?;
    fs::write(&details_path, json)
        .with_context(|| format!("cannot write {}", details_path.display()))?;
    info!(path = %output_dir.display(), "validation complete");

    Ok(AlarmValidationOutput {
        results,
        summary_path: Some(summary_path),
        details_path: Some(details_path),
    })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use chrono::TimeZone;
    use tempfile::TempDir;

    use super::*;
    use crate::moata::stub::{json_response, StubServer, TOKEN_BODY};

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 11, d, 5, 0, 0).unwrap()
    }

    #[test]
    fn should_buffer_window_by_a_day() {
        assert_eq!(alarm_window(day(10), day(12)), (day(9), day(13)));
    }

    #[test]
    fn should_cap_long_windows_to_last_thirty_days() {
        let latest = day(1) + Duration::days(40);

        let (from, to) = alarm_window(day(1), latest);

        assert_eq!(to, latest + Duration::days(1));
        assert_eq!(to - from, Duration::days(30));
    }

    #[tokio::test]
    async fn should_match_trace_exceedances_with_logged_alarms() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("alarm_log.csv");
        fs::write(
            &log,
            "assetid,name,description,alertid,createdtimeutc\n\
             7,Albany,Max TP108 ARI,1,2024-11-15T05:00:00Z\n\
             7,Albany,Max TP108 ARI,2,2024-11-15T09:00:00Z\n",
        )
        .unwrap();

        let server = StubServer::start(vec![
            json_response(200, TOKEN_BODY),
            json_response(
                200,
                r#"[{"id": 70, "description": "Rainfall"},
                    {"id": 71, "description": "Max TP108 ARI"}]"#,
            ),
            json_response(200, r#"[{"value": 5.0}]"#),
            json_response(
                200,
                r#"{"items": [{"time": "2024-11-15T05:05:00Z", "value": 6.8},
                              {"time": "2024-11-15T07:00:00Z", "value": 1.0}]}"#,
            ),
        ])
        .await;
        let client = server.client();

        let output = run_alarm_validation(&client, &log, &tmp.path().join("out"), 5)
            .await
            .unwrap();

        assert_eq!(output.results.len(), 1);
        let result = &output.results[0];
        assert_eq!(result.ari_trace_id, 71);
        assert_eq!(result.data_points, 2);
        assert_eq!(result.api_exceedances, 1);
        assert_eq!(result.matched, 1);
        assert_eq!(result.match_rate, 0.5);
        assert_eq!(result.details.missed_alarms.len(), 1);

        assert!(output.summary_path.unwrap().exists());
        let details = fs::read_to_string(output.details_path.unwrap()).unwrap();
        assert!(details.contains("\"ari_trace_id\": 71"));
    }

    #[tokio::test]
    async fn should_fall_back_to_ari_windows_without_trace_data() {
        let tmp = TempDir::new().unwrap();
        let log = tmp.path().join("alarm_log.csv");
        fs::write(
            &log,
            "assetid,name,description,alertid,createdtimeutc\n\
             7,Albany,Max TP108 ARI,1,2024-11-15T05:00:00Z\n",
        )
        .unwrap();

        let server = StubServer::start(vec![
            json_response(200, TOKEN_BODY),
            json_response(200, r#"[{"id": 71, "description": "Max TP108 ARI"}]"#),
            json_response(200, "[]"),
            json_response(200, r#"{"items": []}"#),
            json_response(
                200,
                r#"[{"duration": 600, "ari": 2.1, "depth": 4.0, "type": "Tp108"},
                    {"duration": 3600, "ari": 7.5, "depth": 31.2, "type": "Tp108"}]"#,
            ),
        ])
        .await;
        let client = server.client();

        let output = run_alarm_validation(&client, &log, &tmp.path().join("out"), 5)
            .await
            .unwrap();

        let result = &output.results[0];
        assert_eq!(result.threshold, DEFAULT_ARI_THRESHOLD);
        assert_eq!(result.data_points, 0);
        assert_eq!(result.api_exceedances, 1);
        assert_eq!(result.ari_windows[0].duration, Some(3600));
        assert_eq!(result.error.as_deref(), Some("No time series data"));
        assert_eq!(result.details.missed_alarms.len(), 1);
    }
}
