//! Collects radar QPE data for stormwater catchments.
//!
//! Catchment pixels are looked up once through the geometry intersect endpoint
//! and cached, since pixel indices never change. Radar values are then fetched
//! per time chunk and pixel batch, and written one CSV per catchment.

use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::BufWriter,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    cli::create_progress_bar,
    config::{
        DEFAULT_SR_ID, MAX_WKT_LENGTH, RADAR_COLLECTION_ID, RADAR_MAX_PIXELS_PER_REQUEST,
        RADAR_QPE_TRACESET_ID, STORMWATER_CATCHMENT_ASSET_TYPE_ID,
    },
    dates::{self, offset_format_opt},
    error::PipelineError,
    moata::{
        client::MoataClient,
        models::{value_as_string, Asset, TraceSetData},
    },
    parquet::save_radar,
    paths::{safe_filename, PipelinePaths, RadarRunDirs},
    tables::write_csv,
};

pub const MAX_HOURS_PER_REQUEST: i64 = 24;
const DEFAULT_OFFSET_SECONDS: i64 = 60;
const RECENT_DATA_THRESHOLD_HOURS: i64 = 24;

/// One value of a per-catchment radar CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadarCsvRecord {
    pub pixel_index: Option<i64>,
    pub value_index: usize,
    #[serde(with = "offset_format_opt")]
    pub timestamp: Option<DateTime<Utc>>,
    pub value: f64,
}

/// A radar value tagged with its catchment, for the combined parquet export.
#[derive(Debug, Clone, PartialEq)]
pub struct RadarRow {
    pub catchment_id: i64,
    pub catchment_name: String,
    pub pixel_index: i64,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CatchmentResult {
    pub catchment_id: Option<i64>,
    pub catchment_name: String,
    pub pixel_count: usize,
    pub pixel_indices: Vec<i64>,
    pub data_records: usize,
    pub csv_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
struct CollectionSummary<'a> {
    collection_time: String,
    data_start_time: String,
    data_end_time: String,
    total_catchments: usize,
    successful_catchments: usize,
    failed_catchments: usize,
    total_pixels: usize,
    total_data_records: usize,
    catchments: &'a [CatchmentResult],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CatchmentCsvRow {
    id: Option<i64>,
    name: Option<String>,
    description: Option<String>,
    project_id: Option<i64>,
    asset_type: Option<String>,
    last_modified: Option<String>,
    modified_by: Option<String>,
    geometry_sr_id: Option<String>,
    geometry_wkt: Option<String>,
}

impl From<&Asset> for CatchmentCsvRow {
    fn from(asset: &Asset) -> Self {
        let extra = |key: &str| asset.extra.get(key).and_then(cell);
        CatchmentCsvRow {
            id: asset.resolved_id(),
            name: asset.name.clone(),
            description: asset.description.clone(),
            project_id: asset.project_id,
            asset_type: extra("assetType"),
            last_modified: extra("lastModified"),
            modified_by: extra("modifiedBy"),
            geometry_sr_id: extra("geometrySrId"),
            geometry_wkt: asset.geometry_wkt.clone(),
        }
    }
}

fn cell(value: &Value) -> Option<String> {
    match value {
        Value::Object(_) | Value::Array(_) => Some(value.to_string()),
        other => value_as_string(other),
    }
}

#[derive(Debug, Default)]
pub struct RadarCollection {
    pub output_dir: PathBuf,
    pub results: Vec<CatchmentResult>,
    pub rows: Vec<RadarRow>,
}

impl RadarCollection {
    pub fn failed(&self) -> impl Iterator<Item = &CatchmentResult> {
        self.results.iter().filter(|r| r.error.is_some())
    }
}

/// Splits `[start, end)` into consecutive windows of at most `max_hours`.
pub fn time_chunks(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    max_hours: i64,
) -> Vec<(DateTime<Utc>, DateTime<Utc>)> {
    let step = Duration::hours(max_hours.max(1));
    let mut chunks = Vec::new();
    let mut current = start;
    while current < end {
        let next = (current + step).min(end);
        chunks.push((current, next));
        current = next;
    }
    chunks
}

/// Expands trace set values into one record per non-null value.
pub fn expand_trace_set(data: &[TraceSetData]) -> Vec<RadarCsvRecord> {
    let mut records = Vec::new();

    for item in data {
        if item.values.is_empty() {
            continue;
        }
        let start = item.start_time.as_deref().and_then(dates::parse_utc);
        if start.is_none() && item.start_time.is_some() {
            warn!(start_time = ?item.start_time, "failed to parse radar start time");
        }
        let offset = item.data_offset_seconds.unwrap_or(DEFAULT_OFFSET_SECONDS);

        for (i, value) in item.values.iter().enumerate() {
            let Some(value) = value else {
                continue;
            };
            let timestamp = match start {
                Some(start) if offset != 0 => Some(start + Duration::seconds(i as i64 * offset)),
                _ => None,
            };
            records.push(RadarCsvRecord {
                pixel_index: item.pixel_index,
                value_index: i,
                timestamp,
                value: *value,
            });
        }
    }

    records
}

/// `raw` for data ending within the last day, otherwise `historical/{start date}/raw`.
pub fn radar_output_dir(
    paths: &PipelinePaths,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
) -> PathBuf {
    if now - end < Duration::hours(RECENT_DATA_THRESHOLD_HOURS) {
        paths.rain_radar_raw_dir()
    } else {
        paths.historical_radar_dir(&start.format("%Y-%m-%d").to_string())
    }
}

/// A catchment geometry must be present and at most `MAX_WKT_LENGTH` characters.
pub fn check_wkt(catchment_id: i64, wkt: &str) -> Result<(), PipelineError> {
    if wkt.is_empty() {
        return Err(PipelineError::Geometry(format!(
            "catchment {} has no geometry",
            catchment_id
        )));
    }
    let length = wkt.chars().count();
    if length > MAX_WKT_LENGTH {
        return Err(PipelineError::Geometry(format!(
            "catchment {} geometry is {} characters, limit is {}",
            catchment_id, length, MAX_WKT_LENGTH
        )));
    }
    Ok(())
}

pub fn load_pixel_cache(path: &Path) -> Option<BTreeMap<i64, Vec<i64>>> {
    let text = fs::read_to_string(path).ok()?;
    match serde_json::from_str::<BTreeMap<String, Vec<i64>>>(&text) {
        Ok(raw) => Some(
            raw.into_iter()
                .filter_map(|(k, v)| k.trim().parse::<i64>().ok().map(|k| (k, v)))
                .collect(),
        ),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to load pixel cache");
            None
        }
    }
}

pub fn save_pixel_cache(path: &Path, cache: &BTreeMap<i64, Vec<i64>>) -> Result<()> {
    let raw: BTreeMap<String, &Vec<i64>> = cache.iter().map(|(k, v)| (k.to_string(), v)).collect();
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, &raw)?;
    Ok(())
}

pub struct RadarCollector<'a> {
    client: &'a MoataClient,
    dirs: RadarRunDirs,
    pixel_batch_size: usize,
    max_hours: i64,
    pixel_cache: BTreeMap<i64, Vec<i64>>,
}

impl<'a> RadarCollector<'a> {
    pub fn new(
        client: &'a MoataClient,
        dirs: RadarRunDirs,
        pixel_batch_size: usize,
        max_hours: i64,
    ) -> Result<Self, PipelineError> {
        if !(1..=RADAR_MAX_PIXELS_PER_REQUEST).contains(&pixel_batch_size) {
            return Err(PipelineError::InvalidConfig(format!(
                "pixel_batch_size must be 1-{}, got {}",
                RADAR_MAX_PIXELS_PER_REQUEST, pixel_batch_size
            )));
        }
        if !(1..=MAX_HOURS_PER_REQUEST).contains(&max_hours) {
            return Err(PipelineError::InvalidConfig(format!(
                "max_hours_per_request must be 1-{}, got {}",
                MAX_HOURS_PER_REQUEST, max_hours
            )));
        }

        Ok(RadarCollector {
            client,
            dirs,
            pixel_batch_size,
            max_hours,
            pixel_cache: BTreeMap::new(),
        })
    }

    fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.dirs.catchments_dir(),
            self.dirs.pixel_mappings_dir(),
            self.dirs.radar_data_dir(),
        ] {
            fs::create_dir_all(&dir).with_context(|| format!("creating {}", dir.display()))?;
        }
        Ok(())
    }

    pub async fn collect_all(
        &mut self,
        project_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        catchment_ids: &[i64],
        force_refresh_pixels: bool,
    ) -> Result<RadarCollection> {
        if start >= end {
            let reason = "start time must be before end time".to_string();
            return Err(PipelineError::InvalidConfig(reason).into());
        }
        self.ensure_dirs()?;
        info!(
            project_id,
            start = %start,
            end = %end,
            force_refresh_pixels,
            "collecting radar data"
        );

        if force_refresh_pixels {
            info!("forcing pixel mapping refresh");
        } else if let Some(cache) = load_pixel_cache(&self.dirs.pixel_cache_json()) {
            info!(catchments = cache.len(), "loaded pixel cache");
            self.pixel_cache = cache;
        }

        let mut catchments = self
            .client
            .get_assets_with_geometry(project_id, STORMWATER_CATCHMENT_ASSET_TYPE_ID, DEFAULT_SR_ID)
            .await?;
        info!(count = catchments.len(), "fetched stormwater catchments");

        let rows: Vec<CatchmentCsvRow> = catchments.iter().map(CatchmentCsvRow::from).collect();
        write_csv(&self.dirs.catchments_csv(), &rows)?;

        if !catchment_ids.is_empty() {
            catchments.retain(|c| c.resolved_id().is_some_and(|id| catchment_ids.contains(&id)));
            info!(count = catchments.len(), "filtered to requested catchments");
        }

        let pb = create_progress_bar(catchments.len() as u64, "Collecting radar data".to_string());
        let mut collection = RadarCollection {
            output_dir: self.dirs.root.clone(),
            ..Default::default()
        };

        for catchment in &catchments {
            pb.set_message(catchment.display_name().to_string());
            match self.collect_catchment(catchment, start, end).await {
                Ok((result, rows)) => {
                    collection.results.push(result);
                    collection.rows.extend(rows);
                }
                Err(e) => {
                    warn!(
                        catchment = %catchment.display_name(),
                        error = %e,
                        "failed to collect catchment"
                    );
                    collection.results.push(CatchmentResult {
                        catchment_id: catchment.resolved_id(),
                        catchment_name: catchment.display_name().to_string(),
                        error: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
            pb.inc(1);
        }
        pb.finish_with_message("Finished collecting radar data");

        save_pixel_cache(&self.dirs.pixel_cache_json(), &self.pixel_cache)?;
        self.save_summary(&collection.results, start, end)?;
        save_radar(&collection.rows, &self.dirs.radar_parquet())?;

        info!(
            catchments = collection.results.len(),
            failed = collection.failed().count(),
            rows = collection.rows.len(),
            "radar collection complete"
        );
        Ok(collection)
    }

    async fn pixels_for(&mut self, catchment_id: i64, catchment: &Asset) -> Result<Vec<i64>> {
        if let Some(pixels) = self.pixel_cache.get(&catchment_id) {
            debug!(catchment_id, "using cached pixels");
            return Ok(pixels.clone());
        }

        let wkt = catchment.geometry_wkt.as_deref().unwrap_or("");
        check_wkt(catchment_id, wkt)?;

        let pixels = self
            .client
            .get_pixel_mappings_for_geometry(RADAR_COLLECTION_ID, wkt, DEFAULT_SR_ID)
            .await?;
        self.pixel_cache.insert(catchment_id, pixels.clone());
        Ok(pixels)
    }

    async fn collect_catchment(
        &mut self,
        catchment: &Asset,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<(CatchmentResult, Vec<RadarRow>)> {
        let name = catchment.display_name().to_string();
        let catchment_id = catchment
            .resolved_id()
            .ok_or_else(|| {
                PipelineError::InvalidConfig(format!("catchment `{}` has no valid id", name))
            })?;

        let pixels = self.pixels_for(catchment_id, catchment).await?;
        let mut result = CatchmentResult {
            catchment_id: Some(catchment_id),
            catchment_name: name.clone(),
            pixel_count: pixels.len(),
            pixel_indices: pixels.clone(),
            ..Default::default()
        };
        if pixels.is_empty() {
            warn!(catchment = %name, "no pixels found");
            return Ok((result, Vec::new()));
        }

        let mut data = Vec::new();
        let chunks = time_chunks(start, end, self.max_hours);
        for (n, (chunk_start, chunk_end)) in chunks.iter().enumerate() {
            debug!(catchment = %name, chunk = n + 1, total = chunks.len(), "fetching radar chunk");
            match self
                .client
                .get_traceset_data_batched(
                    RADAR_COLLECTION_ID,
                    &[RADAR_QPE_TRACESET_ID],
                    &pixels,
                    &dates::iso_z(chunk_start),
                    &dates::iso_z(chunk_end),
                    self.pixel_batch_size,
                )
                .await
            {
                Ok(chunk) => data.extend(chunk),
                Err(e) => warn!(
                    catchment = %name,
                    chunk = n + 1,
                    error = %e,
                    "failed to fetch radar chunk"
                ),
            }
        }
        result.data_records = data.len();

        let records = expand_trace_set(&data);
        if records.is_empty() {
            debug!(catchment = %name, "no radar values to save");
            return Ok((result, Vec::new()));
        }

        let path = self
            .dirs
            .radar_data_dir()
            .join(format!("{}_{}.csv", catchment_id, safe_filename(&name)));
        write_csv(&path, &records)?;
        info!(catchment = %name, rows = records.len(), path = %path.display(), "saved radar data");
        result.csv_path = Some(path.display().to_string());

        let rows = records
            .into_iter()
            .filter_map(|r| {
                Some(RadarRow {
                    catchment_id,
                    catchment_name: name.clone(),
                    pixel_index: r.pixel_index?,
                    timestamp: r.timestamp?,
                    value: r.value,
                })
            })
            .collect();

        Ok((result, rows))
    }

    fn save_summary(
        &self,
        results: &[CatchmentResult],
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        let failed = results.iter().filter(|r| r.error.is_some()).count();
        let summary = CollectionSummary {
            collection_time: dates::iso_offset(&Utc::now()),
            data_start_time: dates::iso_offset(&start),
            data_end_time: dates::iso_offset(&end),
            total_catchments: results.len(),
            successful_catchments: results.len() - failed,
            failed_catchments: failed,
            total_pixels: results.iter().map(|r| r.pixel_count).sum(),
            total_data_records: results.iter().map(|r| r.data_records).sum(),
            catchments: results,
        };

        let path = self.dirs.collection_summary_json();
        let writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(writer, &summary)?;
        info!(path = %path.display(), "saved collection summary");
        Ok(())
    }
}

// -- Tests -------------------------------------------------------------------
