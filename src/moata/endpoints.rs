//! Moata API paths, relative to the versioned base URL.

pub const ASSET_TRACES: &str = "assets/traces";
pub const ALARMS_OVERFLOW_BY_TRACE: &str = "alarms/overflow-detailed-info-by-trace";
pub const ALARMS_DETAILED_BY_PROJECT: &str = "alarms/detailed-alarms";

pub fn project_assets(project_id: i64) -> String {
    format!("projects/{}/assets", project_id)
}

pub fn trace_thresholds(trace_id: i64) -> String {
    format!("traces/{}/thresholds", trace_id)
}

pub fn trace_data_utc(trace_id: i64) -> String {
    format!("traces/{}/data/utc", trace_id)
}

pub fn trace_ari(trace_id: i64) -> String {
    format!("traces/{}/ari", trace_id)
}

pub fn traceset_collection_data(collection_id: i64) -> String {
    format!("trace-set-collections/{}/trace-sets/data", collection_id)
}

pub fn traceset_pixel_mappings(collection_id: i64) -> String {
    format!(
        "trace-set-collections/{}/pixel-mappings/intersects-geometry",
        collection_id
    )
}
