//! Selects active rain gauges inside the region of interest.

use std::{fs, path::Path};

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    dates::{self, offset_format},
    error::PipelineError,
    moata::models::{GaugeRecord, Trace, TraceRecord},
};

const BAD_PRIMARY_TOKENS: [&str; 6] = [
    "forecast", "nowcast", "merged", "anomaly", "filtered", "mirror",
];

#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub inactive_threshold_months: u32,
    pub exclude_keyword: String,
    exclude: Regex,
}

impl FilterConfig {
    pub fn new(
        inactive_threshold_months: u32,
        exclude_keyword: &str,
    ) -> Result<Self, PipelineError> {
        if inactive_threshold_months == 0 {
            return Err(PipelineError::InvalidConfig(
                "inactive_threshold_months must be positive".into(),
            ));
        }
        let exclude = RegexBuilder::new(exclude_keyword)
            .case_insensitive(true)
            .build()
            .map_err(|e| {
                PipelineError::InvalidConfig(format!(
                    "invalid exclude keyword pattern `{}`: {}",
                    exclude_keyword, e
                ))
            })?;

        Ok(FilterConfig {
            inactive_threshold_months,
            exclude_keyword: exclude_keyword.to_string(),
            exclude,
        })
    }

    pub fn exclude_pattern(&self) -> &Regex {
        &self.exclude
    }
}

/// A gauge is included unless its name matches the exclusion pattern.
pub fn is_included_gauge(name: &str, pattern: &Regex) -> bool {
    !pattern.is_match(name)
}

fn is_bad_primary_trace(description: &str) -> bool {
    let description = description.to_lowercase();
    BAD_PRIMARY_TOKENS.iter().any(|token| description.contains(token))
}

/// Picks the gauge's measured rainfall trace, ignoring forecast and derived products.
pub fn rainfall_trace(traces: &[TraceRecord]) -> Option<&TraceRecord> {
    if let Some(exact) = traces.iter().find(|t| t.trace.description() == "Rainfall") {
        debug!("rainfall trace found by exact description");
        return Some(exact);
    }

    let candidates = || traces.iter().filter(|t| !is_bad_primary_trace(t.trace.description()));

    let by_type = candidates().find(|t| {
        let variable = t.trace.variable_type();
        let kind = lower(variable.kind.as_deref());
        let name = lower(variable.name.as_deref());
        kind == "rain"
            && (name == "rain"
                || name == "rainfall"
                || t.trace.description().to_lowercase().contains("rainfall"))
    });
    if by_type.is_some() {
        debug!("rainfall trace found by variable type");
        return by_type;
    }

    candidates().find(|t| {
        lower(t.trace.variable_type().kind.as_deref()) == "rain" && t.trace.is_visible == Some(true)
    })
}

fn lower(value: Option<&str>) -> String {
    value.unwrap_or("").trim().to_lowercase()
}

/// Active when the last telemetered value is within `30 * months` days of `now`.
pub fn is_gauge_active(
    telemetered: DateTime<Utc>,
    inactive_months: u32,
    now: DateTime<Utc>,
) -> bool {
    telemetered >= now - Duration::days(30 * i64::from(inactive_months))
}

/// A gauge that passed every filter.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveGauge {
    #[serde(flatten)]
    pub record: GaugeRecord,
    #[serde(with = "offset_format")]
    pub last_data_time: DateTime<Utc>,
    pub rainfall_trace: Trace,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub total_gauges: usize,
    pub active_gauges: usize,
    pub inactive_gauges: usize,
    pub excluded_gauges: usize,
    pub no_rainfall_trace: usize,
}

#[derive(Debug, Clone, Default)]
pub struct FilterResult {
    pub active: Vec<ActiveGauge>,
    pub inactive: Vec<GaugeRecord>,
    pub excluded: Vec<GaugeRecord>,
    pub no_rainfall_trace: Vec<GaugeRecord>,
    pub stats: FilterStats,
}

pub fn filter_gauges(
    gauges: Vec<GaugeRecord>,
    config: &FilterConfig,
    now: DateTime<Utc>,
) -> FilterResult {
    let total = gauges.len();
    info!(
        total,
        inactive_months = config.inactive_threshold_months,
        exclude = %config.exclude_keyword,
        "filtering gauges"
    );

    let mut result = FilterResult::default();

    for record in gauges {
        let name = record.gauge.display_name().to_string();

        if !is_included_gauge(&name, config.exclude_pattern()) {
            debug!(gauge = %name, "excluded by keyword");
            result.excluded.push(record);
            continue;
        }

        let Some(trace) = rainfall_trace(&record.traces).map(|t| t.trace.clone()) else {
            warn!(gauge = %name, id = ?record.gauge.id, "no primary rainfall trace");
            result.no_rainfall_trace.push(record);
            continue;
        };

        let telemetered = trace
            .telemetered_maximum_time
            .as_deref()
            .and_then(dates::parse_utc);

        match telemetered {
            None => {
                warn!(
                    gauge = %name,
                    id = ?record.gauge.id,
                    "missing or invalid telemeteredMaximumTime"
                );
                result.inactive.push(record);
            }
            Some(last) if is_gauge_active(last, config.inactive_threshold_months, now) => {
                info!(gauge = %name, last = %last.format("%Y-%m-%d"), "active gauge");
                result.active.push(ActiveGauge {
                    record,
                    last_data_time: last,
                    rainfall_trace: trace,
                });
            }
            Some(last) => {
                debug!(gauge = %name, last = %last.format("%Y-%m-%d"), "inactive gauge");
                result.inactive.push(record);
            }
        }
    }

    result.stats = FilterStats {
        total_gauges: total,
        active_gauges: result.active.len(),
        inactive_gauges: result.inactive.len(),
        excluded_gauges: result.excluded.len(),
        no_rainfall_trace: result.no_rainfall_trace.len(),
    };

    info!(
        active = result.stats.active_gauges,
        inactive = result.stats.inactive_gauges,
        excluded = result.stats.excluded_gauges,
        no_rainfall_trace = result.stats.no_rainfall_trace,
        "filtering complete"
    );

    result
}

/// Loads collected gauges, accepting a bare list or one wrapped in `{"data": [...]}`.
pub fn load_collected_gauges(path: &Path) -> Result<Vec<GaugeRecord>, PipelineError> {
    let input_error = |reason: String| PipelineError::InputData {
        path: path.to_path_buf(),
        reason,
    };

    let text = fs::read_to_string(path)
        .map_err(|e| input_error(format!("{}; run collect-gauges first", e)))?;
    let value: Value = serde_json::from_str(&text).map_err(|e| input_error(e.to_string()))?;

    let list = match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    if !list.is_array() {
        return Err(input_error("expected a list of gauges".into()));
    }

    let gauges: Vec<GaugeRecord> =
        serde_json::from_value(list).map_err(|e| input_error(e.to_string()))?;
    if gauges.is_empty() {
        return Err(input_error("no gauges found; run collect-gauges first".into()));
    }

    Ok(gauges)
}

// -- Tests -------------------------------------------------------------------
