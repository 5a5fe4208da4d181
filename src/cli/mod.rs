//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use clap::{command, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use crate::{
    collect::gauges::DEFAULT_TRACE_BATCH_SIZE,
    config::{
        DEFAULT_ARI_THRESHOLD, DEFAULT_EXCLUDE_KEYWORD, DEFAULT_GAUGE_ALARMS_PATH,
        DEFAULT_PROPORTION_THRESHOLD, DEFAULT_TP108_PATH, INACTIVE_THRESHOLD_MONTHS, PROJECT_ID,
        RADAR_DEFAULT_BATCH_SIZE, RAIN_GAUGE_ASSET_TYPE_ID,
    },
    validate::alarms::DEFAULT_SAMPLE_SIZE,
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Contains the commands
pub struct Cli {
    /// Root directory for every pipeline artifact
    #[arg(long, global = true, default_value = "outputs")]
    pub outputs_root: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Collect rain gauges with their traces, alarms and thresholds
    CollectGauges {
        #[arg(long, default_value_t = PROJECT_ID)]
        project_id: i64,
        #[arg(long, default_value_t = RAIN_GAUGE_ASSET_TYPE_ID)]
        asset_type_id: i64,
        #[arg(long, default_value_t = DEFAULT_TRACE_BATCH_SIZE)]
        trace_batch_size: usize,
        /// Skip fetching threshold configuration
        #[arg(long)]
        no_thresholds: bool,
    },
    /// Collect radar rainfall for stormwater catchments
    CollectRadar {
        /// Window start (ISO 8601, UTC when no offset)
        #[arg(long)]
        start: Option<String>,
        /// Window end (ISO 8601, UTC when no offset)
        #[arg(long)]
        end: Option<String>,
        /// Collect a whole UTC day (YYYY-MM-DD)
        #[arg(long, conflicts_with_all = ["start", "end"])]
        date: Option<String>,
        /// Restrict to these catchment ids
        #[arg(long, value_delimiter = ',')]
        catchment_ids: Vec<i64>,
        #[arg(long, default_value_t = RADAR_DEFAULT_BATCH_SIZE)]
        batch_size: usize,
        #[arg(long, default_value_t = 24)]
        max_hours: i64,
        /// Ignore the cached catchment pixel mapping
        #[arg(long)]
        force_refresh: bool,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// Filter collected gauges and build the alarm inventory
    AnalyzeGauges {
        /// Collected gauges JSON
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long, default_value_t = INACTIVE_THRESHOLD_MONTHS)]
        inactive_months: u32,
        /// Regex of gauge names to exclude
        #[arg(long, default_value = DEFAULT_EXCLUDE_KEYWORD)]
        exclude_keyword: String,
    },
    /// Compute ARI per catchment from collected radar data
    AnalyzeRadar {
        /// Directory of per-catchment radar CSV files
        #[arg(long)]
        input_dir: Option<PathBuf>,
        /// Analyse the historical collection for this date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        #[arg(long, default_value = DEFAULT_TP108_PATH)]
        tp108: PathBuf,
        /// ARI threshold in years
        #[arg(long, default_value_t = DEFAULT_ARI_THRESHOLD)]
        threshold: f64,
    },
    /// Decide which catchments would raise an areal ARI alarm
    ValidateRadar {
        /// ARI analysis summary CSV
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        date: Option<String>,
        /// Proportion of the catchment area that must exceed the ARI threshold
        #[arg(long, default_value_t = DEFAULT_PROPORTION_THRESHOLD)]
        threshold: f64,
    },
    /// Check logged gauge ARI alarms against the ARI trace
    ValidateGauges {
        #[arg(long, default_value = DEFAULT_GAUGE_ALARMS_PATH)]
        alarms: PathBuf,
        /// Alarm inventory CSV used to map assets to their ARI trace
        #[arg(long)]
        mapping: Option<PathBuf>,
    },
    /// Match logged alarms with threshold exceedances in the ARI trace
    ValidateAlarms {
        /// Alarm log CSV
        #[arg(long)]
        alarm_log: PathBuf,
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_SAMPLE_SIZE)]
        sample_size: usize,
    },
    /// HTML report of the gauge alarm inventory
    ReportGauges {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// HTML dashboard of a radar collection
    ReportRadar {
        /// Radar collection directory
        #[arg(long)]
        data_dir: Option<PathBuf>,
        #[arg(long)]
        date: Option<String>,
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    /// HTML dashboard of the radar alarm validation
    ReportRadarValidation {
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        date: Option<String>,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_parse_collect_radar_options() {
        let cli = Cli::parse_from([
            "moata-rain",
            "--outputs-root",
            "/tmp/out",
            "collect-radar",
            "--date",
            "2025-05-09",
            "--catchment-ids",
            "12,34",
            "--force-refresh",
        ]);

        assert_eq!(cli.outputs_root, PathBuf::from("/tmp/out"));
        match cli.command {
            Commands::CollectRadar {
                date,
                catchment_ids,
                batch_size,
                max_hours,
                force_refresh,
                ..
            } => {
                assert_eq!(date.as_deref(), Some("2025-05-09"));
                assert_eq!(catchment_ids, vec![12, 34]);
                assert_eq!(batch_size, RADAR_DEFAULT_BATCH_SIZE);
                assert_eq!(max_hours, 24);
                assert!(force_refresh);
            }
            _ => panic!("expected collect-radar"),
        }
    }

    #[test]
    fn should_reject_date_with_explicit_window() {
        let parsed = Cli::try_parse_from([
            "moata-rain",
            "collect-radar",
            "--date",
            "2025-05-09",
            "--start",
            "2025-05-09T00:00:00Z",
        ]);

        assert!(parsed.is_err());
    }

    #[test]
    fn should_default_analysis_options() {
        let cli = Cli::parse_from(["moata-rain", "analyze-gauges"]);

        assert_eq!(cli.outputs_root, PathBuf::from("outputs"));
        match cli.command {
            Commands::AnalyzeGauges {
                input,
                inactive_months,
                exclude_keyword,
            } => {
                assert!(input.is_none());
                assert_eq!(inactive_months, INACTIVE_THRESHOLD_MONTHS);
                assert_eq!(exclude_keyword, DEFAULT_EXCLUDE_KEYWORD);
            }
            _ => panic!("expected analyze-gauges"),
        }
    }
}
