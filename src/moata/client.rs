//! Typed access to the Moata endpoints the pipeline uses.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    config::RADAR_MAX_PIXELS_PER_REQUEST,
    error::ApiError,
    moata::{
        endpoints,
        http::{Allow, MoataHttp, RequestStats},
        models::{
            Alarm, AlarmsByType, Asset, PixelMapping, Threshold, Trace, TraceDataPoint,
            TraceSetData,
        },
    },
};

type Params = Vec<(String, String)>;

/// Query parameters for [`MoataClient::get_trace_data`].
#[derive(Debug, Clone)]
pub struct TraceDataQuery<'a> {
    pub from: &'a str,
    pub to: &'a str,
    pub data_type: &'a str,
    pub data_interval: Option<i64>,
    pub pad_with_zeroes: bool,
}

pub struct MoataClient {
    http: MoataHttp,
}

impl MoataClient {
    pub fn new(http: MoataHttp) -> Self {
        MoataClient { http }
    }

    pub fn stats(&self) -> RequestStats {
        self.http.stats()
    }

    pub fn reset_stats(&self) {
        self.http.reset_stats()
    }

    pub async fn get_rain_gauges(
        &self,
        project_id: i64,
        asset_type_id: i64,
    ) -> Result<Vec<Asset>, ApiError> {
        validate_id(project_id, "project_id")?;
        validate_id(asset_type_id, "asset_type_id")?;

        let path = endpoints::project_assets(project_id);
        let params = vec![param("assetTypeId", asset_type_id)];
        let data = self.http.get(&path, &params, Allow::NONE).await?;

        typed_items(&path, data)
    }

    pub async fn get_assets_with_geometry(
        &self,
        project_id: i64,
        asset_type_id: i64,
        sr_id: i64,
    ) -> Result<Vec<Asset>, ApiError> {
        validate_id(project_id, "project_id")?;
        validate_id(asset_type_id, "asset_type_id")?;

        let path = endpoints::project_assets(project_id);
        let params = vec![param("srId", sr_id), param("assetTypeId", asset_type_id)];
        let data = self.http.get(&path, &params, Allow::NONE).await?;

        typed_items(&path, data)
    }

    pub async fn get_traces_for_asset(&self, asset_id: i64) -> Result<Vec<Trace>, ApiError> {
        self.get_traces_for_assets(&[asset_id]).await
    }

    pub async fn get_traces_for_assets(&self, asset_ids: &[i64]) -> Result<Vec<Trace>, ApiError> {
        if asset_ids.is_empty() {
            return Err(ApiError::Validation("asset_ids cannot be empty".into()));
        }

        let mut params = Params::with_capacity(asset_ids.len());
        for (i, id) in asset_ids.iter().enumerate() {
            validate_id(*id, &format!("asset_ids[{}]", i))?;
            params.push(param("assetId", id));
        }

        let data = self
            .http
            .get(endpoints::ASSET_TRACES, &params, Allow::NONE)
            .await?;

        typed_items(endpoints::ASSET_TRACES, data)
    }

    /// Trace values for a UTC window. A 404 means no data and yields an empty list.
    pub async fn get_trace_data(
        &self,
        trace_id: i64,
        query: &TraceDataQuery<'_>,
    ) -> Result<Vec<TraceDataPoint>, ApiError> {
        validate_id(trace_id, "trace_id")?;
        validate_time(query.from, "from_time")?;
        validate_time(query.to, "to_time")?;

        let mut params = vec![
            param("from", query.from),
            param("to", query.to),
            param("dataType", query.data_type),
            param("padWithZeroes", query.pad_with_zeroes),
        ];
        if let Some(interval) = query.data_interval {
            if interval <= 0 {
                return Err(ApiError::Validation(format!(
                    "data_interval must be positive, got {}",
                    interval
                )));
            }
            params.push(param("dataInterval", interval));
        }

        let path = endpoints::trace_data_utc(trace_id);
        let data = self.http.get(&path, &params, Allow::NOT_FOUND).await?;

        typed_items(&path, data)
    }

    pub async fn get_ari_data(
        &self,
        trace_id: i64,
        from: &str,
        to: &str,
        ari_type: &str,
    ) -> Result<Option<Value>, ApiError> {
        validate_id(trace_id, "trace_id")?;
        validate_time(from, "from_time")?;
        validate_time(to, "to_time")?;

        let path = endpoints::trace_ari(trace_id);
        let params = vec![param("from", from), param("to", to), param("type", ari_type)];

        self.http.get(&path, &params, Allow::NOT_FOUND).await
    }

    /// Thresholds for a trace; the API returns either a list or `{"thresholds": [...]}`.
    pub async fn get_thresholds_for_trace(
        &self,
        trace_id: i64,
    ) -> Result<Vec<Threshold>, ApiError> {
        validate_id(trace_id, "trace_id")?;

        let path = endpoints::trace_thresholds(trace_id);
        let data = self
            .http
            .get(&path, &[], Allow::MISSING_OR_FORBIDDEN)
            .await?;

        let list = match data {
            Some(Value::Object(mut map)) => map.remove("thresholds").unwrap_or(Value::Null),
            Some(list @ Value::Array(_)) => list,
            _ => Value::Null,
        };

        match list {
            Value::Array(_) => decode(&path, list),
            _ => Ok(Vec::new()),
        }
    }

    pub async fn get_alarms_for_trace(&self, trace_id: i64) -> Result<Vec<Alarm>, ApiError> {
        validate_id(trace_id, "trace_id")?;

        let params = vec![param("traceId", trace_id)];
        let data = self
            .http
            .get(endpoints::ALARMS_OVERFLOW_BY_TRACE, &params, Allow::MISSING_OR_FORBIDDEN)
            .await?;

        typed_items(endpoints::ALARMS_OVERFLOW_BY_TRACE, data)
    }

    pub fn split_alarms_by_type(&self, alarms: &[Alarm]) -> AlarmsByType {
        AlarmsByType::split(alarms)
    }

    /// Detailed alarms for every trace in a project, keyed by trace id.
    pub async fn get_detailed_alarms_by_project(
        &self,
        project_id: i64,
    ) -> Result<HashMap<i64, Alarm>, ApiError> {
        validate_id(project_id, "project_id")?;

        let params = vec![param("projectId", project_id)];
        let data = self
            .http
            .get(endpoints::ALARMS_DETAILED_BY_PROJECT, &params, Allow::MISSING_OR_FORBIDDEN)
            .await?;
        let alarms: Vec<Alarm> = typed_items(endpoints::ALARMS_DETAILED_BY_PROJECT, data)?;

        Ok(alarms
            .into_iter()
            .filter_map(|alarm| alarm.trace_id.map(|id| (id, alarm)))
            .collect())
    }

    /// Pixel indices intersecting a WKT geometry.
    pub async fn get_pixel_mappings_for_geometry(
        &self,
        collection_id: i64,
        wkt: &str,
        sr_id: i64,
    ) -> Result<Vec<i64>, ApiError> {
        validate_id(collection_id, "collection_id")?;
        if wkt.trim().is_empty() {
            return Err(ApiError::Validation("wkt cannot be empty".into()));
        }

        let path = endpoints::traceset_pixel_mappings(collection_id);
        let params = vec![param("wkt", wkt), param("srId", sr_id)];
        let data = self.http.get(&path, &params, Allow::NOT_FOUND).await?;
        let mappings: Vec<PixelMapping> = typed_items(&path, data)?;

        Ok(mappings.into_iter().filter_map(|m| m.pixel_index).collect())
    }

    pub async fn get_traceset_data(
        &self,
        collection_id: i64,
        traceset_ids: &[i64],
        pixel_indices: &[i64],
        start_time: &str,
        end_time: &str,
    ) -> Result<Vec<TraceSetData>, ApiError> {
        validate_id(collection_id, "collection_id")?;
        if traceset_ids.is_empty() {
            return Err(ApiError::Validation("traceset_ids cannot be empty".into()));
        }
        if pixel_indices.is_empty() {
            return Err(ApiError::Validation("pixel_indices cannot be empty".into()));
        }
        if pixel_indices.len() > RADAR_MAX_PIXELS_PER_REQUEST {
            return Err(ApiError::Validation(format!(
                "pixel_indices exceeds maximum of {}, use get_traceset_data_batched",
                RADAR_MAX_PIXELS_PER_REQUEST
            )));
        }
        validate_time(start_time, "start_time")?;
        validate_time(end_time, "end_time")?;

        let mut params: Params = traceset_ids.iter().map(|id| param("TsId", id)).collect();
        params.extend(pixel_indices.iter().map(|pixel| param("Pi", pixel)));
        params.push(param("StartTime", start_time));
        params.push(param("EndTime", end_time));

        let path = endpoints::traceset_collection_data(collection_id);
        let data = self.http.get(&path, &params, Allow::NOT_FOUND).await?;

        typed_items(&path, data)
    }

    /// Splits the pixel list into requests of at most `batch_size` pixels.
    pub async fn get_traceset_data_batched(
        &self,
        collection_id: i64,
        traceset_ids: &[i64],
        pixel_indices: &[i64],
        start_time: &str,
        end_time: &str,
        batch_size: usize,
    ) -> Result<Vec<TraceSetData>, ApiError> {
        validate_batch_size(batch_size)?;

        let total_batches = pixel_indices.len().div_ceil(batch_size);
        let mut results = Vec::new();

        for (n, batch) in pixel_indices.chunks(batch_size).enumerate() {
            debug!(batch = n + 1, total_batches, pixels = batch.len(), "fetching radar batch");
            let data = self
                .get_traceset_data(collection_id, traceset_ids, batch, start_time, end_time)
                .await?;
            results.extend(data);
        }

        info!(records = results.len(), total_batches, "retrieved radar data");
        Ok(results)
    }
}

pub fn validate_batch_size(batch_size: usize) -> Result<(), ApiError> {
    if batch_size == 0 || batch_size > RADAR_MAX_PIXELS_PER_REQUEST {
        return Err(ApiError::Validation(format!(
            "batch_size must be between 1 and {}, got {}",
            RADAR_MAX_PIXELS_PER_REQUEST, batch_size
        )));
    }
    Ok(())
}

fn param(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

fn validate_id(id: i64, name: &str) -> Result<i64, ApiError> {
    if id <= 0 {
        return Err(ApiError::Validation(format!(
            "{} must be positive, got {}",
            name, id
        )));
    }
    Ok(id)
}

fn validate_time(value: &str, name: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{} must be non-empty", name)));
    }
    if !value.contains('T') {
        return Err(ApiError::Validation(format!(
            "{} must be ISO 8601 (e.g. 2025-01-01T00:00:00Z), got {}",
            name, value
        )));
    }
    Ok(())
}

/// The item list of a response, which is either `{"items": [...]}` or a bare array.
pub fn extract_items(data: Option<Value>) -> Vec<Value> {
    match data {
        Some(Value::Array(items)) => items,
        Some(Value::Object(mut map)) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

fn typed_items<T: DeserializeOwned>(path: &str, data: Option<Value>) -> Result<Vec<T>, ApiError> {
    decode(path, Value::Array(extract_items(data)))
}

fn decode<T: DeserializeOwned>(path: &str, list: Value) -> Result<Vec<T>, ApiError> {
    serde_json::from_value(list).map_err(|e| ApiError::InvalidJson {
        url: path.to_string(),
        body: e.to_string(),
    })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use serde_json::json;

    use super::*;
    use crate::moata::stub::{json_response, StubServer, TOKEN_BODY as TOKEN};

    #[test]
    fn should_extract_items_from_both_shapes() {
        assert_eq!(extract_items(Some(json!([1, 2]))).len(), 2);
        assert_eq!(extract_items(Some(json!({"items": [1]}))).len(), 1);
        assert!(extract_items(Some(json!({"other": 1}))).is_empty());
        assert!(extract_items(None).is_empty());
    }

    #[test]
    fn should_validate_arguments() {
        assert!(validate_id(0, "id").is_err());
        assert!(validate_id(5, "id").is_ok());
        assert!(validate_time("2025-01-01", "from").is_err());
        assert!(validate_time("2025-01-01T00:00:00Z", "from").is_ok());
        assert!(validate_batch_size(0).is_err());
        assert!(validate_batch_size(151).is_err());
        assert!(validate_batch_size(150).is_ok());
    }

    #[tokio::test]
    async fn should_reject_too_many_pixels_without_a_request() {
        let server = StubServer::start(vec![]).await;
        let client = server.client();
        let pixels: Vec<i64> = (1..=151).collect();

        let result = client
            .get_traceset_data(1, &[3], &pixels, "2025-01-01T00:00:00Z", "2025-01-01T01:00:00Z")
            .await;

        assert!(matches!(result, Err(ApiError::Validation(_))));
        assert!(server.requests().await.is_empty());
    }

    #[tokio::test]
    async fn should_read_thresholds_wrapped_in_object() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(200, r#"{"thresholds":[{"name":"High","value":10}]}"#),
            json_response(403, "forbidden"),
        ])
        .await;
        let client = server.client();

        let thresholds = client.get_thresholds_for_trace(7).await.unwrap();
        let forbidden = client.get_thresholds_for_trace(8).await.unwrap();

        assert_eq!(thresholds.len(), 1);
        assert_eq!(thresholds[0].effective_value(), Some(10.0));
        assert!(forbidden.is_empty());
    }

    #[tokio::test]
    async fn should_batch_radar_requests() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(200, r#"[{"pixelIndex":1,"values":[0.5]}]"#),
            json_response(200, r#"{"items":[{"pixelIndex":3,"values":[null]}]}"#),
        ])
        .await;
        let client = server.client();

        let data = client
            .get_traceset_data_batched(
                1,
                &[3],
                &[1, 2, 3],
                "2025-01-01T00:00:00Z",
                "2025-01-01T01:00:00Z",
                2,
            )
            .await
            .unwrap();

        assert_eq!(data.len(), 2);
        assert_eq!(data[1].values, vec![None]);
        let requests = server.requests().await;
        assert!(requests[1].contains("TsId=3&Pi=1&Pi=2&StartTime="));
        assert!(requests[2].contains("TsId=3&Pi=3&StartTime="));
    }

    #[tokio::test]
    async fn should_key_detailed_alarms_by_trace() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(
                200,
                r#"[{"traceId":11,"alarmType":"OverflowMonitoring"},{"alarmType":"x"}]"#,
            ),
        ])
        .await;
        let client = server.client();

        let alarms = client.get_detailed_alarms_by_project(594).await.unwrap();

        assert_eq!(alarms.len(), 1);
        assert_eq!(
            alarms[&11].alarm_type.as_deref(),
            Some("OverflowMonitoring")
        );
    }
}
