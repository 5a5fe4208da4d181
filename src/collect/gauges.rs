//! Collects rain gauges with their traces, alarms and thresholds.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::{
    cli::create_progress_bar,
    error::ApiError,
    moata::{
        client::MoataClient,
        models::{
            value_as_i64, Alarm, Asset, GaugeRecord, Threshold, Trace, TraceRecord,
        },
    },
};

pub const DEFAULT_TRACE_BATCH_SIZE: usize = 100;

pub struct RainGaugeCollector<'a> {
    client: &'a MoataClient,
}

impl<'a> RainGaugeCollector<'a> {
    pub fn new(client: &'a MoataClient) -> Self {
        RainGaugeCollector { client }
    }

    pub async fn collect(
        &self,
        project_id: i64,
        asset_type_id: i64,
        trace_batch_size: usize,
        fetch_thresholds: bool,
    ) -> Result<Vec<GaugeRecord>, ApiError> {
        if trace_batch_size == 0 {
            return Err(ApiError::Validation("trace_batch_size must be positive".into()));
        }
        info!(
            project_id,
            asset_type_id,
            trace_batch_size,
            fetch_thresholds,
            "collecting rain gauges"
        );
        self.client.reset_stats();

        let gauges = self.client.get_rain_gauges(project_id, asset_type_id).await?;
        info!(count = gauges.len(), "fetched rain gauges");

        let detailed = self.client.get_detailed_alarms_by_project(project_id).await?;
        info!(count = detailed.len(), "fetched detailed alarms");

        let (asset_ids, mut gauge_by_id) = asset_lookup(gauges);
        if asset_ids.is_empty() {
            warn!("no valid asset ids found");
            return Ok(Vec::new());
        }

        let mut traces_by_asset = self.fetch_traces(&asset_ids, trace_batch_size).await;

        let pb = create_progress_bar(asset_ids.len() as u64, "Collecting alarms".to_string());
        let mut records = Vec::with_capacity(asset_ids.len());
        for asset_id in asset_ids {
            let gauge = gauge_by_id.remove(&asset_id).unwrap_or_default();
            debug!(gauge = %gauge.display_name(), asset_id, "enriching traces");

            let mut traces = Vec::new();
            for trace in traces_by_asset.remove(&asset_id).unwrap_or_default() {
                if let Some(record) = self.enrich_trace(trace, &detailed, fetch_thresholds).await {
                    traces.push(record);
                }
            }

            records.push(GaugeRecord { gauge, traces });
            pb.inc(1);
        }
        pb.finish_with_message("Finished collecting alarms");

        let stats = self.client.stats();
        info!(
            gauges = records.len(),
            requests = stats.requests,
            retries = stats.retries,
            "collection complete"
        );
        Ok(records)
    }

    async fn fetch_traces(&self, asset_ids: &[i64], batch_size: usize) -> HashMap<i64, Vec<Trace>> {
        let total_batches = asset_ids.len().div_ceil(batch_size);
        let mut traces_by_asset: HashMap<i64, Vec<Trace>> = HashMap::new();
        let mut total = 0;

        for (n, batch) in asset_ids.chunks(batch_size).enumerate() {
            debug!(batch = n + 1, total_batches, assets = batch.len(), "fetching traces");
            match self.client.get_traces_for_assets(batch).await {
                Ok(traces) => {
                    total += traces.len();
                    for trace in traces {
                        if let Some(asset_id) = trace.asset_id {
                            traces_by_asset.entry(asset_id).or_default().push(trace);
                        }
                    }
                }
                Err(e) => warn!(batch = n + 1, error = %e, "failed to fetch trace batch"),
            }
        }

        info!(traces = total, "fetched traces");
        traces_by_asset
    }

    async fn enrich_trace(
        &self,
        trace: Trace,
        detailed: &HashMap<i64, Alarm>,
        fetch_thresholds: bool,
    ) -> Option<TraceRecord> {
        let trace_id = trace
            .id
            .or_else(|| trace.extra.get("traceId").and_then(value_as_i64));
        let Some(trace_id) = trace_id else {
            warn!("trace without a valid id, skipping");
            return None;
        };

        let mut record = TraceRecord {
            detailed_alarm: detailed.get(&trace_id).cloned(),
            ..Default::default()
        };

        if trace.has_alarms == Some(true) {
            match self.fetch_alarm_config(trace_id, fetch_thresholds).await {
                Ok((alarms, thresholds)) => {
                    record.alarms_by_type = self.client.split_alarms_by_type(&alarms);
                    record.alarms = alarms;
                    record.thresholds = thresholds;
                }
                Err(e) => warn!(trace_id, error = %e, "failed to fetch alarms for trace"),
            }
        }

        record.trace = trace;
        Some(record)
    }

    async fn fetch_alarm_config(
        &self,
        trace_id: i64,
        fetch_thresholds: bool,
    ) -> Result<(Vec<Alarm>, Vec<Threshold>), ApiError> {
        let alarms = self.client.get_alarms_for_trace(trace_id).await?;
        let thresholds = if fetch_thresholds {
            self.client.get_thresholds_for_trace(trace_id).await?
        } else {
            Vec::new()
        };
        Ok((alarms, thresholds))
    }
}

/// Gauge ids in API order, and the gauges keyed by id.
fn asset_lookup(gauges: Vec<Asset>) -> (Vec<i64>, HashMap<i64, Asset>) {
    let mut ids = Vec::with_capacity(gauges.len());
    let mut by_id = HashMap::with_capacity(gauges.len());

    for gauge in gauges {
        match gauge.resolved_id() {
            Some(id) => {
                if by_id.insert(id, gauge).is_none() {
                    ids.push(id);
                }
            }
            None => warn!(gauge = %gauge.display_name(), "gauge without a valid id"),
        }
    }

    (ids, by_id)
}

// -- Tests -------------------------------------------------------------------
