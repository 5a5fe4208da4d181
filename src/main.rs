mod analyze;
mod cli;
mod collect;
mod config;
mod dates;
mod error;
mod moata;
mod parquet;
mod paths;
mod tables;
mod validate;
mod viz;

use anyhow::{Error, Result};
use clap::Parser;
use cli::{command, Cli, Commands};
use paths::PipelinePaths;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    config::load_dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let paths = PipelinePaths::new(cli.outputs_root);

    let outcome = match cli.command {
        Commands::CollectGauges {
            project_id,
            asset_type_id,
            trace_batch_size,
            no_thresholds,
        } => {
            command::collect_gauges(
                &paths,
                project_id,
                asset_type_id,
                trace_batch_size,
                !no_thresholds,
            )
            .await
        }
        Commands::CollectRadar {
            start,
            end,
            date,
            catchment_ids,
            batch_size,
            max_hours,
            force_refresh,
            output_dir,
        } => {
            let options = command::collect::RadarCollectOptions {
                start,
                end,
                date,
                catchment_ids,
                batch_size,
                max_hours,
                force_refresh,
                output_dir,
            };
            command::collect_radar(&paths, options).await
        }
        Commands::AnalyzeGauges {
            input,
            inactive_months,
            exclude_keyword,
        } => command::analyze_gauges(&paths, input, inactive_months, &exclude_keyword).await,
        Commands::AnalyzeRadar {
            input_dir,
            date,
            tp108,
            threshold,
        } => command::analyze_radar(&paths, input_dir, date.as_deref(), &tp108, threshold).await,
        Commands::ValidateRadar { input, date, threshold } => {
            command::validate_radar(&paths, input, date.as_deref(), threshold).await
        }
        Commands::ValidateGauges { alarms, mapping } => {
            command::validate_gauges(&paths, &alarms, mapping).await
        }
        Commands::ValidateAlarms {
            alarm_log,
            output_dir,
            sample_size,
        } => command::validate_alarms(&paths, &alarm_log, output_dir, sample_size).await,
        Commands::ReportGauges { input, output_dir } => {
            command::report_gauges(&paths, input, output_dir).await
        }
        Commands::ReportRadar {
            data_dir,
            date,
            output_dir,
        } => command::report_radar(&paths, data_dir, date.as_deref(), output_dir).await,
        Commands::ReportRadarValidation { input, date } => {
            command::report_radar_validation(&paths, input, date.as_deref()).await
        }
    };

    match outcome {
        Ok(filename) => println!("File saved to `{}`", filename),
        Err(e) => eprintln!("Error: {}", e),
    }

    Ok(())
}
