//! Serde models for Moata API payloads.
//!
//! Assets, traces, thresholds and alarms keep any fields they do not name in
//! `extra`, so collected JSON is written back out without loss.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// An asset: a rain gauge or a stormwater catchment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub asset_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub project_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_wkt: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Asset {
    /// The asset id, which some endpoints return as `assetId`.
    pub fn resolved_id(&self) -> Option<i64> {
        self.id.or(self.asset_id)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("Unknown")
    }
}

/// A measurement stream attached to an asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trace {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub asset_id: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub has_alarms: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_visible: Option<bool>,
    #[serde(default)]
    pub telemetered_maximum_time: Option<String>,
    #[serde(default)]
    pub archived_minimum_time: Option<String>,
    #[serde(default)]
    pub archived_maximum_time: Option<String>,
    #[serde(default)]
    pub data_variable_type: Option<Value>,
    #[serde(default)]
    pub resolution: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Trace {
    pub fn description(&self) -> &str {
        self.description.as_deref().unwrap_or("").trim()
    }

    /// The data variable type, which the API returns as an object, a name or an id.
    pub fn variable_type(&self) -> VariableType {
        VariableType::from_value(self.data_variable_type.as_ref())
    }
}

/// Flattened view of a trace's `dataVariableType`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableType {
    pub id: Option<i64>,
    pub name: Option<String>,
    pub kind: Option<String>,
    pub units: Option<String>,
}

impl VariableType {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Object(map)) => VariableType {
                id: map.get("id").and_then(value_as_i64),
                name: map.get("name").and_then(value_as_string),
                kind: map.get("type").and_then(value_as_string),
                units: map
                    .get("units")
                    .and_then(|u| u.get("label"))
                    .and_then(value_as_string),
            },
            Some(Value::String(name)) => VariableType {
                name: Some(name.clone()),
                ..Default::default()
            },
            Some(Value::Number(n)) => VariableType {
                id: n.as_i64(),
                ..Default::default()
            },
            _ => VariableType::default(),
        }
    }
}

/// An alarm threshold configured on a trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub threshold_value: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub threshold_type: Option<String>,
    #[serde(default)]
    pub alarm_description: Option<String>,
    #[serde(default)]
    pub severity: Option<Value>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_critical: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Threshold {
    pub fn effective_value(&self) -> Option<f64> {
        self.value.or(self.threshold_value)
    }
}

pub const OVERFLOW_ALARM_TYPE: &str = "OverflowMonitoring";
pub const RECENCY_ALARM_TYPE: &str = "DataRecency";

/// Alarm detail as returned by the alarm endpoints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alarm {
    #[serde(default)]
    pub alarm_type: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub trace_id: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Alarm {
    /// A short label for inventory rows.
    pub fn label(&self) -> String {
        if let Some(kind) = self.alarm_type.as_deref().filter(|s| !s.trim().is_empty()) {
            return kind.trim().to_string();
        }
        for key in ["type", "name", "description"] {
            if let Some(s) = self.extra.get(key).and_then(value_as_string) {
                return s;
            }
        }
        "present".to_string()
    }
}

/// Alarms for one trace, split by alarm type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlarmsByType {
    #[serde(default)]
    pub overflow: Vec<Alarm>,
    #[serde(default)]
    pub recency: Vec<Alarm>,
    #[serde(default)]
    pub other: Vec<Alarm>,
}

impl AlarmsByType {
    pub fn split(alarms: &[Alarm]) -> Self {
        let mut split = AlarmsByType::default();
        for alarm in alarms {
            match alarm.alarm_type.as_deref() {
                Some(OVERFLOW_ALARM_TYPE) => split.overflow.push(alarm.clone()),
                Some(RECENCY_ALARM_TYPE) => split.recency.push(alarm.clone()),
                _ => split.other.push(alarm.clone()),
            }
        }
        split
    }

    /// Alarm type names with at least one alarm, sorted, with their counts.
    pub fn present(&self) -> Vec<(&'static str, usize)> {
        let mut present: Vec<(&'static str, usize)> = [
            ("other", self.other.len()),
            ("overflow", self.overflow.len()),
            ("recency", self.recency.len()),
        ]
        .into_iter()
        .filter(|(_, n)| *n > 0)
        .collect();
        present.sort();
        present
    }

    pub fn is_empty(&self) -> bool {
        self.overflow.is_empty() && self.recency.is_empty() && self.other.is_empty()
    }
}

/// A radar pixel intersecting a geometry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelMapping {
    #[serde(default, deserialize_with = "lenient_id")]
    pub pixel_index: Option<i64>,
}

/// One pixel's radar values from a trace set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceSetData {
    #[serde(default, deserialize_with = "lenient_id")]
    pub pixel_index: Option<i64>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub data_offset_seconds: Option<i64>,
    #[serde(default)]
    pub values: Vec<Option<f64>>,
}

/// A single point of trace data.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct TraceDataPoint {
    #[serde(default, alias = "timestamp")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
}

/// A collected gauge with its enriched traces.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GaugeRecord {
    pub gauge: Asset,
    #[serde(default)]
    pub traces: Vec<TraceRecord>,
}

/// A trace with the alarm configuration fetched for it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub trace: Trace,
    #[serde(default)]
    pub alarms: Vec<Alarm>,
    #[serde(default)]
    pub alarms_by_type: AlarmsByType,
    #[serde(default)]
    pub detailed_alarm: Option<Alarm>,
    #[serde(default)]
    pub thresholds: Vec<Threshold>,
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0),
        Some(Value::String(s)) => match s.trim().to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" | "y" => Some(true),
            "false" | "f" | "0" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    })
}

// -- Tests -------------------------------------------------------------------
