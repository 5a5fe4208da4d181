//! Output directory layout and file naming.

use std::{
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;

const MAX_FILENAME_LEN: usize = 120;

/// Locations of every artifact the pipeline reads or writes, relative to an outputs root.
#[derive(Debug, Clone)]
pub struct PipelinePaths {
    pub outputs_root: PathBuf,
}

impl Default for PipelinePaths {
    fn default() -> Self {
        PipelinePaths::new("outputs")
    }
}

impl PipelinePaths {
    pub fn new(outputs_root: impl Into<PathBuf>) -> Self {
        PipelinePaths {
            outputs_root: outputs_root.into(),
        }
    }

    pub fn rain_gauges_dir(&self) -> PathBuf {
        self.outputs_root.join("rain_gauges")
    }

    pub fn rain_gauges_raw_dir(&self) -> PathBuf {
        self.rain_gauges_dir().join("raw")
    }

    pub fn rain_gauges_analyze_dir(&self) -> PathBuf {
        self.rain_gauges_dir().join("analyze")
    }

    pub fn rain_gauges_viz_dir(&self) -> PathBuf {
        self.rain_gauges_dir().join("visualizations")
    }

    pub fn rain_gauges_validation_dir(&self) -> PathBuf {
        self.rain_gauges_dir().join("validation")
    }

    pub fn rain_gauges_traces_alarms_json(&self) -> PathBuf {
        self.rain_gauges_raw_dir()
            .join("rain_gauges_traces_alarms.json")
    }

    pub fn alarm_summary_csv(&self) -> PathBuf {
        self.rain_gauges_analyze_dir().join("alarm_summary.csv")
    }

    pub fn alarm_summary_full_csv(&self) -> PathBuf {
        self.rain_gauges_analyze_dir().join("alarm_summary_full.csv")
    }

    pub fn gauge_ari_validation_csv(&self) -> PathBuf {
        self.rain_gauges_dir().join("ari_alarm_validation.csv")
    }

    pub fn rain_radar_dir(&self) -> PathBuf {
        self.outputs_root.join("rain_radar")
    }

    /// Collection directory for data ending within the last day.
    pub fn rain_radar_raw_dir(&self) -> PathBuf {
        self.rain_radar_dir().join("raw")
    }

    pub fn rain_radar_historical_dir(&self) -> PathBuf {
        self.rain_radar_dir().join("historical")
    }

    /// Collection directory for an older day, keyed `YYYY-MM-DD`.
    pub fn historical_radar_dir(&self, date: &str) -> PathBuf {
        self.rain_radar_historical_dir().join(date).join("raw")
    }
}

/// Subdirectories of one radar collection run.
#[derive(Debug, Clone)]
pub struct RadarRunDirs {
    pub root: PathBuf,
}

impl RadarRunDirs {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RadarRunDirs { root: root.into() }
    }

    pub fn catchments_dir(&self) -> PathBuf {
        self.root.join("catchments")
    }

    pub fn catchments_csv(&self) -> PathBuf {
        self.catchments_dir().join("stormwater_catchments.csv")
    }

    pub fn pixel_mappings_dir(&self) -> PathBuf {
        self.root.join("pixel_mappings")
    }

    pub fn pixel_cache_json(&self) -> PathBuf {
        self.pixel_mappings_dir()
            .join("catchment_pixel_mapping.json")
    }

    pub fn radar_data_dir(&self) -> PathBuf {
        self.root.join("radar_data")
    }

    pub fn radar_parquet(&self) -> PathBuf {
        self.root.join("radar_data.parquet")
    }

    pub fn collection_summary_json(&self) -> PathBuf {
        self.root.join("collection_summary.json")
    }

    /// The `analyze` directory next to the `raw` collection directory.
    pub fn analyze_dir(&self) -> PathBuf {
        sibling(&self.root, "analyze")
    }
}

fn sibling(dir: &Path, name: &str) -> PathBuf {
    match dir.parent() {
        Some(parent) => parent.join(name),
        None => PathBuf::from(name),
    }
}

/// Makes a string safe to use as a file name.
pub fn safe_filename(name: &str) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    static SPACES: OnceLock<Regex> = OnceLock::new();
    static REPEATS: OnceLock<Regex> = OnceLock::new();

    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^\w\s\-.]").unwrap());
    let spaces = SPACES.get_or_init(|| Regex::new(r"\s+").unwrap());
    let repeats = REPEATS.get_or_init(|| Regex::new(r"_+").unwrap());

    let name = unsafe_chars.replace_all(name.trim(), "_");
    let name = spaces.replace_all(&name, "_");
    let name = repeats.replace_all(&name, "_");
    let name = name.trim_matches('_');

    let name = truncate_keeping_extension(name, MAX_FILENAME_LEN);

    if name.is_empty() {
        "untitled".to_string()
    } else {
        name
    }
}

fn truncate_keeping_extension(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len {
        return name.to_string();
    }

    if let Some((base, ext)) = name.rsplit_once('.') {
        let ext_len = ext.chars().count();
        if ext_len <= 10 {
            let base: String = base.chars().take(max_len - ext_len - 1).collect();
            return format!("{}.{}", base, ext);
        }
    }

    name.chars().take(max_len).collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_replace_unsafe_characters() {
        assert_eq!(safe_filename("Awa St / Main (North)"), "Awa_St_Main_North");
        assert_eq!(safe_filename("a  b\tc"), "a_b_c");
        assert_eq!(safe_filename("rain-gauge.v2"), "rain-gauge.v2");
    }

    #[test]
    fn should_fall_back_to_untitled() {
        assert_eq!(safe_filename(""), "untitled");
        assert_eq!(safe_filename("///"), "untitled");
    }

    #[test]
    fn should_truncate_long_names() {
        let long = "x".repeat(200);
        assert_eq!(safe_filename(&long).len(), 120);

        let with_ext = format!("{}.html", "y".repeat(200));
        let safe = safe_filename(&with_ext);
        assert_eq!(safe.len(), 120);
        assert!(safe.ends_with(".html"));
    }

    #[test]
    fn should_lay_out_radar_run_directories() {
        let paths = PipelinePaths::new("out");
        let run = RadarRunDirs::new(paths.historical_radar_dir("2025-01-02"));

        assert_eq!(
            run.radar_data_dir(),
            PathBuf::from("out/rain_radar/historical/2025-01-02/raw/radar_data")
        );
        assert_eq!(
            run.analyze_dir(),
            PathBuf::from("out/rain_radar/historical/2025-01-02/analyze")
        );
    }
}
