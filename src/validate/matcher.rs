//! Pairs API threshold exceedances with alarms recorded in an external alarm log.

use std::{collections::HashSet, path::Path};

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    dates::{offset_format, parse_utc},
    error::PipelineError,
    tables::read_csv,
    validate::threshold::ExceedanceEvent,
};

pub const DEFAULT_TOLERANCE_MINUTES: i64 = 15;

#[derive(Debug, Deserialize)]
struct AlarmLogRow {
    assetid: i64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    alertid: Option<String>,
    #[serde(default)]
    createdtimeutc: String,
}

/// An alarm log entry with a valid time. `row` is its position in the log file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoggedAlarm {
    pub row: usize,
    pub assetid: i64,
    pub name: String,
    pub description: Option<String>,
    pub alertid: Option<String>,
    #[serde(with = "offset_format")]
    pub createdtimeutc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmMatch {
    #[serde(with = "offset_format")]
    pub api_timestamp: DateTime<Utc>,
    pub api_value: f64,
    #[serde(with = "offset_format")]
    pub alarm_timestamp: DateTime<Utc>,
    pub alert_id: Option<String>,
    pub time_diff_seconds: f64,
    pub gauge_name: String,
    pub exceeded_by: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchStats {
    pub total_api_events: usize,
    pub total_logged_alarms: usize,
    pub matched_count: usize,
    pub unmatched_api_count: usize,
    pub missed_alarms_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchResult {
    pub matched: Vec<AlarmMatch>,
    pub unmatched_api_events: Vec<ExceedanceEvent>,
    pub missed_alarms: Vec<LoggedAlarm>,
    pub match_rate: f64,
    pub stats: MatchStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per asset alarm counts from the log.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetAlarmSummary {
    pub assetid: i64,
    pub name: String,
    pub alarm_count: usize,
    #[serde(with = "offset_format")]
    pub first_alarm: DateTime<Utc>,
    #[serde(with = "offset_format")]
    pub last_alarm: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct AlarmMatcher {
    alarms: Vec<LoggedAlarm>,
}

impl AlarmMatcher {
    /// Reads the alarm log, dropping rows whose `createdtimeutc` does not parse.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::InputData {
                path: path.to_path_buf(),
                reason: "alarm log not found".into(),
            }
            .into());
        }

        let rows: Vec<AlarmLogRow> = read_csv(path)?;
        let total = rows.len();
        let alarms: Vec<LoggedAlarm> = rows
            .into_iter()
            .enumerate()
            .filter_map(|(row, raw)| {
                Some(LoggedAlarm {
                    row,
                    createdtimeutc: parse_utc(&raw.createdtimeutc)?,
                    assetid: raw.assetid,
                    name: raw.name,
                    description: raw.description,
                    alertid: raw.alertid.filter(|id| !id.trim().is_empty()),
                })
            })
            .collect();

        if alarms.len() < total {
            warn!(removed = total - alarms.len(), "rows with invalid timestamps removed");
        }
        Ok(AlarmMatcher { alarms })
    }

    pub fn from_alarms(alarms: Vec<LoggedAlarm>) -> Self {
        AlarmMatcher { alarms }
    }

    pub fn alarms(&self) -> &[LoggedAlarm] {
        &self.alarms
    }

    /// Logged alarms of one asset ordered by time.
    pub fn alarms_for_asset(&self, asset_id: i64) -> Vec<&LoggedAlarm> {
        let mut alarms: Vec<&LoggedAlarm> = self
            .alarms
            .iter()
            .filter(|a| a.assetid == asset_id)
            .collect();
        alarms.sort_by_key(|a| a.createdtimeutc);
        alarms
    }

    /// Distinct asset ids in log order.
    pub fn asset_ids(&self) -> Vec<i64> {
        let mut seen = HashSet::new();
        self.alarms
            .iter()
            .map(|a| a.assetid)
            .filter(|id| seen.insert(*id))
            .collect()
    }

    pub fn match_alarms(
        &self,
        asset_id: i64,
        events: &[ExceedanceEvent],
        tolerance_minutes: i64,
    ) -> MatchResult {
        let logged: Vec<&LoggedAlarm> = self
            .alarms
            .iter()
            .filter(|a| a.assetid == asset_id)
            .collect();
        if logged.is_empty() {
            return MatchResult {
                unmatched_api_events: events.to_vec(),
                stats: MatchStats {
                    total_api_events: events.len(),
                    unmatched_api_count: events.len(),
                    ..Default::default()
                },
                note: Some(format!("No alarms in log for asset {}", asset_id)),
                ..Default::default()
            };
        }

        let tolerance = Duration::minutes(tolerance_minutes);
        let mut matched = Vec::new();
        let mut unmatched_api_events = Vec::new();
        let mut matched_rows = HashSet::new();

        for event in events {
            // first alarm wins ties
            let closest = logged
                .iter()
                .map(|alarm| (alarm, (alarm.createdtimeutc - event.timestamp).abs()))
                .filter(|(_, diff)| *diff <= tolerance)
                .fold(None, |best: Option<(&&LoggedAlarm, Duration)>, candidate| match best {
                    Some(b) if b.1 <= candidate.1 => Some(b),
                    _ => Some(candidate),
                });

            match closest {
                Some((alarm, diff)) => {
                    matched_rows.insert(alarm.row);
                    matched.push(AlarmMatch {
                        api_timestamp: event.timestamp,
                        api_value: event.value,
                        alarm_timestamp: alarm.createdtimeutc,
                        alert_id: alarm.alertid.clone(),
                        time_diff_seconds: diff.num_milliseconds() as f64 / 1000.0,
                        gauge_name: alarm.name.clone(),
                        exceeded_by: event.exceeded_by,
                    });
                }
                None => unmatched_api_events.push(event.clone()),
            }
        }

        let missed_alarms: Vec<LoggedAlarm> = logged
            .iter()
            .filter(|a| !matched_rows.contains(&a.row))
            .map(|a| (*a).clone())
            .collect();

        let stats = MatchStats {
            total_api_events: events.len(),
            total_logged_alarms: logged.len(),
            matched_count: matched.len(),
            unmatched_api_count: unmatched_api_events.len(),
            missed_alarms_count: missed_alarms.len(),
        };

        MatchResult {
            match_rate: matched.len() as f64 / logged.len() as f64,
            matched,
            unmatched_api_events,
            missed_alarms,
            stats,
            note: None,
        }
    }

    /// Alarm counts per (asset, name), most alarms first.
    pub fn alarm_summary(&self) -> Vec<AssetAlarmSummary> {
        let mut summary: Vec<AssetAlarmSummary> = Vec::new();
        for alarm in &self.alarms {
            match summary
                .iter_mut()
                .find(|s| s.assetid == alarm.assetid && s.name == alarm.name)
            {
                Some(s) => {
                    s.alarm_count += 1;
                    s.first_alarm = s.first_alarm.min(alarm.createdtimeutc);
                    s.last_alarm = s.last_alarm.max(alarm.createdtimeutc);
                }
                None => summary.push(AssetAlarmSummary {
                    assetid: alarm.assetid,
                    name: alarm.name.clone(),
                    alarm_count: 1,
                    first_alarm: alarm.createdtimeutc,
                    last_alarm: alarm.createdtimeutc,
                }),
            }
        }
        summary.sort_by(|a, b| b.alarm_count.cmp(&a.alarm_count));
        summary
    }
}

// -- Tests -------------------------------------------------------------------
