//! API constants, pipeline defaults and credential loading.

use std::{env, path::PathBuf};

use tracing::{debug, warn};

use crate::error::PipelineError;

pub const TOKEN_URL: &str = concat!(
    "https://moata.b2clogin.com/moata.onmicrosoft.com",
    "/B2C_1A_CLIENTCREDENTIALSFLOW/oauth2/v2.0/token"
);
pub const OAUTH_SCOPE: &str = "https://moata.onmicrosoft.com/moata.io/.default";
pub const BASE_API_URL: &str = "https://api.moata.io/ae/v1";

pub const PROJECT_ID: i64 = 594;
pub const RAIN_GAUGE_ASSET_TYPE_ID: i64 = 100;
pub const STORMWATER_CATCHMENT_ASSET_TYPE_ID: i64 = 3541;
pub const RADAR_COLLECTION_ID: i64 = 1;
pub const RADAR_QPE_TRACESET_ID: i64 = 3;
pub const DEFAULT_SR_ID: i64 = 4326;

pub const RADAR_MAX_PIXELS_PER_REQUEST: usize = 150;
pub const RADAR_DEFAULT_BATCH_SIZE: usize = 50;
pub const MAX_WKT_LENGTH: usize = 14_000;

// 800 requests per 5 minutes is the published limit
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;
pub const TOKEN_TTL_SECONDS: u64 = 3600;
pub const TOKEN_REFRESH_BUFFER_SECONDS: u64 = 300;

pub const DEFAULT_ARI_THRESHOLD: f64 = 5.0;
pub const DEFAULT_PROPORTION_THRESHOLD: f64 = 0.3;
pub const DEFAULT_ARI_TYPE: &str = "Tp108";
pub const ARI_TRACE_DESCRIPTION: &str = "Max TP108 ARI";
pub const DEFAULT_DATA_TYPE: &str = "None";
pub const DEFAULT_DATA_INTERVAL_SECONDS: i64 = 300;

pub const INACTIVE_THRESHOLD_MONTHS: u32 = 3;
pub const DEFAULT_EXCLUDE_KEYWORD: &str = "northland|waikato";

pub const DEFAULT_TP108_PATH: &str = "data/inputs/tp108_stats.csv";
pub const DEFAULT_GAUGE_ALARMS_PATH: &str = "data/inputs/raingauge_ari_alarms.csv";

/// OAuth client credentials for the Moata API.
#[derive(Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .finish()
    }
}

impl Credentials {
    /// Reads `MOATA_CLIENT_ID` and `MOATA_CLIENT_SECRET` from the environment.
    pub fn from_env() -> Result<Self, PipelineError> {
        let client_id = non_empty_var("MOATA_CLIENT_ID");
        let client_secret = non_empty_var("MOATA_CLIENT_SECRET");

        match (client_id, client_secret) {
            (Some(client_id), Some(client_secret)) => Ok(Credentials {
                client_id,
                client_secret,
            }),
            _ => Err(PipelineError::Credentials),
        }
    }
}

/// Request rate, overridable with `MOATA_REQUESTS_PER_SECOND`.
pub fn requests_per_second() -> f64 {
    match env::var("MOATA_REQUESTS_PER_SECOND") {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(rps) if rps > 0.0 => rps,
            _ => {
                warn!(value = %raw, "ignoring invalid MOATA_REQUESTS_PER_SECOND");
                DEFAULT_REQUESTS_PER_SECOND
            }
        },
        Err(_) => DEFAULT_REQUESTS_PER_SECOND,
    }
}

/// Loads `./.env`, falling back to the user configuration directory.
pub fn load_dotenv() {
    match dotenvy::dotenv() {
        Ok(path) => debug!(path = %path.display(), "loaded environment file"),
        Err(_) => {
            if let Some(path) = user_env_file() {
                if dotenvy::from_path(&path).is_ok() {
                    debug!(path = %path.display(), "loaded environment file");
                }
            }
        }
    }
}

fn user_env_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("moata-rain").join(".env"))
}

fn non_empty_var(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// -- Tests -------------------------------------------------------------------
