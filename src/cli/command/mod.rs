pub mod analyze;
pub mod collect;
pub mod report;
pub mod validate;

use anyhow::{Context, Result};

pub use analyze::{analyze_gauges, analyze_radar};
pub use collect::{collect_gauges, collect_radar};
pub use report::{report_gauges, report_radar, report_radar_validation};
pub use validate::{validate_alarms, validate_gauges, validate_radar};

use crate::{
    cli::create_spinner,
    config::Credentials,
    moata::{self, client::MoataClient},
};

/// Builds an API client from the credentials in the environment.
pub fn connect() -> Result<MoataClient> {
    let bar = create_spinner("Connecting to Moata...".to_string());
    let credentials = Credentials::from_env()?;
    let client = moata::connect(credentials).context("cannot create the API client")?;
    bar.finish_with_message("Moata client ready");

    Ok(client)
}
