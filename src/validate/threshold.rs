//! Threshold exceedance detection over a time series.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::{
    dates::{offset_format, parse_utc},
    moata::models::TraceDataPoint,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Points with both a parseable time and a value.
pub fn series_from_trace(points: &[TraceDataPoint]) -> Vec<SeriesPoint> {
    points
        .iter()
        .filter_map(|p| {
            Some(SeriesPoint {
                timestamp: parse_utc(p.time.as_deref()?)?,
                value: p.value?,
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceedanceEvent {
    #[serde(with = "offset_format")]
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    pub threshold: f64,
    pub trace_name: String,
    pub exceeded_by: f64,
    pub percent_over: f64,
}

/// A run of exceeding points with no gap longer than the allowed maximum.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExceedanceGroup {
    #[serde(with = "offset_format")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "offset_format")]
    pub end_time: DateTime<Utc>,
    pub duration_minutes: f64,
    pub num_points: usize,
    pub max_value: f64,
    pub mean_value: f64,
    pub threshold: f64,
    pub peak_exceeded_by: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExceedanceSummary {
    pub total_exceedances: usize,
    pub max_value: Option<f64>,
    pub mean_value: Option<f64>,
    pub mean_exceeded_by: Option<f64>,
    pub max_exceeded_by: Option<f64>,
    pub first_exceedance: Option<DateTime<Utc>>,
    pub last_exceedance: Option<DateTime<Utc>>,
    pub threshold: Option<f64>,
}

/// Every point strictly above `threshold`, in input order.
pub fn check_exceedances(
    points: &[SeriesPoint],
    threshold: f64,
    trace_name: &str,
) -> Vec<ExceedanceEvent> {
    points
        .iter()
        .filter(|p| p.value > threshold)
        .map(|p| ExceedanceEvent {
            timestamp: p.timestamp,
            value: p.value,
            threshold,
            trace_name: trace_name.to_string(),
            exceeded_by: p.value - threshold,
            percent_over: (p.value - threshold) / threshold * 100.0,
        })
        .collect()
}

pub fn check_consecutive_exceedances(
    points: &[SeriesPoint],
    threshold: f64,
    min_consecutive: usize,
    max_gap_minutes: i64,
) -> Vec<ExceedanceGroup> {
    let mut exceeding: Vec<SeriesPoint> = points
        .iter()
        .filter(|p| p.value > threshold)
        .copied()
        .collect();
    exceeding.sort_by_key(|p| p.timestamp);

    let max_gap = Duration::minutes(max_gap_minutes);
    let mut runs: Vec<Vec<SeriesPoint>> = Vec::new();
    for point in exceeding {
        match runs.last_mut() {
            Some(run)
                if run
                    .last()
                    .is_some_and(|prev| point.timestamp - prev.timestamp <= max_gap) =>
            {
                run.push(point)
            }
            _ => runs.push(vec![point]),
        }
    }

    runs.into_iter()
        .filter(|run| run.len() >= min_consecutive)
        .map(|run| group_stats(&run, threshold))
        .collect()
}

fn group_stats(run: &[SeriesPoint], threshold: f64) -> ExceedanceGroup {
    let start_time = run[0].timestamp;
    let end_time = run[run.len() - 1].timestamp;
    let max_value = run.iter().map(|p| p.value).fold(f64::NEG_INFINITY, f64::max);
    let mean_value = run.iter().map(|p| p.value).sum::<f64>() / run.len() as f64;

    ExceedanceGroup {
        start_time,
        end_time,
        duration_minutes: (end_time - start_time).num_seconds() as f64 / 60.0,
        num_points: run.len(),
        max_value,
        mean_value,
        threshold,
        peak_exceeded_by: max_value - threshold,
    }
}

pub fn summarize_exceedances(events: &[ExceedanceEvent]) -> ExceedanceSummary {
    if events.is_empty() {
        return ExceedanceSummary::default();
    }

    let n = events.len() as f64;
    ExceedanceSummary {
        total_exceedances: events.len(),
        max_value: events.iter().map(|e| e.value).reduce(f64::max),
        mean_value: Some(events.iter().map(|e| e.value).sum::<f64>() / n),
        mean_exceeded_by: Some(events.iter().map(|e| e.exceeded_by).sum::<f64>() / n),
        max_exceeded_by: events.iter().map(|e| e.exceeded_by).reduce(f64::max),
        first_exceedance: events.iter().map(|e| e.timestamp).min(),
        last_exceedance: events.iter().map(|e| e.timestamp).max(),
        threshold: Some(events[0].threshold),
    }
}

// -- Tests -------------------------------------------------------------------
