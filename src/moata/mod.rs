//! Moata REST API access: authentication, paced HTTP and a typed client.

pub mod auth;
pub mod client;
pub mod endpoints;
pub mod http;
pub mod models;

#[cfg(test)]
pub(crate) mod stub;

use std::sync::Arc;

use crate::{
    config::{self, Credentials},
    error::ApiError,
};

use self::{auth::MoataAuth, client::MoataClient, http::MoataHttp};

/// Builds a client for the production API from credentials and the configured request rate.
pub fn connect(credentials: Credentials) -> Result<MoataClient, ApiError> {
    let auth = MoataAuth::new(config::TOKEN_URL, config::OAUTH_SCOPE, credentials)?;
    let http = MoataHttp::new(
        config::BASE_API_URL,
        Arc::new(auth),
        config::requests_per_second(),
    )?;

    Ok(MoataClient::new(http))
}
