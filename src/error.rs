//! Error types shared across the pipeline.

use std::path::PathBuf;

/// Errors raised while talking to the Moata API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("HTTP {status} for {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("Rate limit exceeded for {url}. Retry after: {retry_after}")]
    RateLimited { url: String, retry_after: String },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid JSON response from {url}: {body}")]
    InvalidJson { url: String, body: String },

    #[error("Invalid request: {0}")]
    Validation(String),
}

/// Errors raised by the local collection, analysis and reporting stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "MOATA_CLIENT_ID and MOATA_CLIENT_SECRET must be set in the environment or a .env file"
    )]
    Credentials,

    #[error("Invalid input data in {path}: {reason}")]
    InputData { path: PathBuf, reason: String },

    #[error("No radar data files found in {0}")]
    NoRadarData(PathBuf),

    #[error("{path} is missing required column `{column}`")]
    MissingColumn { path: PathBuf, column: String },

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Truncates a response body for inclusion in an error message.
pub fn snippet(body: &str, max_chars: usize) -> String {
    body.chars().take(max_chars).collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn should_truncate_body_on_char_boundary() {
        let body = "é".repeat(300);

        assert_eq!(snippet(&body, 200).chars().count(), 200);
        assert_eq!(snippet("short", 200), "short");
    }

    #[test]
    fn should_format_http_error() {
        let err = ApiError::Http {
            status: 500,
            url: "https://example.test/x".to_string(),
            body: "boom".to_string(),
        };

        assert_eq!(err.to_string(), "HTTP 500 for https://example.test/x: boom");
    }
}
