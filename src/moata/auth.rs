//! OAuth2 client-credentials token acquisition and caching.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::{Credentials, TOKEN_REFRESH_BUFFER_SECONDS, TOKEN_TTL_SECONDS},
    error::{snippet, ApiError},
    moata::http::{backoff_delay, is_transient, BACKOFF_BASE, MAX_RETRIES},
};

const TOKEN_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECTION_RETRY_DELAY: Duration = Duration::from_secs(2);

/// A cached access token.
#[derive(Debug, Clone)]
pub struct Token {
    pub access_token: String,
    pub acquired_at: Instant,
    pub ttl: Duration,
}

impl Token {
    pub fn new(access_token: String, ttl: Duration) -> Self {
        Token {
            access_token,
            acquired_at: Instant::now(),
            ttl,
        }
    }

    /// Seconds until expiry, negative once expired.
    pub fn expires_in(&self) -> f64 {
        self.ttl.as_secs_f64() - self.acquired_at.elapsed().as_secs_f64()
    }

    pub fn near_expiry(&self, buffer: Duration) -> bool {
        self.expires_in() <= buffer.as_secs_f64()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_in() <= 0.0
    }
}

/// Snapshot of the token cache.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenInfo {
    pub cached: bool,
    pub expires_in: Option<f64>,
    pub near_expiry: Option<bool>,
    pub is_expired: Option<bool>,
}

pub struct MoataAuth {
    client: reqwest::Client,
    token_url: String,
    scope: String,
    credentials: Credentials,
    ttl: Duration,
    refresh_buffer: Duration,
    token: Mutex<Option<Token>>,
}

impl MoataAuth {
    pub fn new(token_url: &str, scope: &str, credentials: Credentials) -> Result<Self, ApiError> {
        if token_url.is_empty() {
            return Err(ApiError::Validation("token_url cannot be empty".into()));
        }
        if scope.is_empty() {
            return Err(ApiError::Validation("scope cannot be empty".into()));
        }
        if credentials.client_id.is_empty() || credentials.client_secret.is_empty() {
            return Err(ApiError::Validation(
                "client_id and client_secret cannot be empty".into(),
            ));
        }

        let client = reqwest::Client::builder().timeout(TOKEN_TIMEOUT).build()?;

        Ok(MoataAuth {
            client,
            token_url: token_url.to_string(),
            scope: scope.to_string(),
            credentials,
            ttl: Duration::from_secs(TOKEN_TTL_SECONDS),
            refresh_buffer: Duration::from_secs(TOKEN_REFRESH_BUFFER_SECONDS),
            token: Mutex::new(None),
        })
    }

    pub fn with_ttl(mut self, ttl: Duration, refresh_buffer: Duration) -> Self {
        self.ttl = ttl;
        self.refresh_buffer = refresh_buffer;
        self
    }

    /// Returns a valid access token, requesting a new one when the cached token is
    /// missing, expired or within the refresh buffer of expiry.
    pub async fn get_token(&self) -> Result<String, ApiError> {
        let mut guard = self.token.lock().await;

        match guard.as_ref() {
            None => info!("no cached token, acquiring new token"),
            Some(token) if token.is_expired() => warn!("token expired, acquiring new token"),
            Some(token) if token.near_expiry(self.refresh_buffer) => {
                info!(expires_in = token.expires_in().round(), "token near expiry, refreshing")
            }
            Some(token) => {
                debug!(expires_in = token.expires_in().round(), "using cached token");
                return Ok(token.access_token.clone());
            }
        }

        let token = self.request_token().await?;
        let access_token = token.access_token.clone();
        *guard = Some(token);

        Ok(access_token)
    }

    pub async fn clear_token(&self) {
        debug!("clearing cached token");
        *self.token.lock().await = None;
    }

    pub async fn token_info(&self) -> TokenInfo {
        match self.token.lock().await.as_ref() {
            None => TokenInfo {
                cached: false,
                expires_in: None,
                near_expiry: None,
                is_expired: None,
            },
            Some(token) => TokenInfo {
                cached: true,
                expires_in: Some(token.expires_in()),
                near_expiry: Some(token.near_expiry(self.refresh_buffer)),
                is_expired: Some(token.is_expired()),
            },
        }
    }

    async fn request_token(&self) -> Result<Token, ApiError> {
        info!(url = %self.token_url, "requesting access token");

        let mut attempt = 0;
        let mut connection_retried = false;

        let response = loop {
            match self.send_token_request().await {
                Ok(response) if is_transient(response.status()) && attempt < MAX_RETRIES => {
                    attempt += 1;
                    let delay = backoff_delay(BACKOFF_BASE, attempt, None);
                    warn!(status = %response.status(), attempt, "token endpoint busy, retrying");
                    tokio::time::sleep(delay).await;
                }
                Ok(response) => break response,
                Err(e) if e.is_connect() && !connection_retried => {
                    connection_retried = true;
                    warn!(error = %e, "token request connection error, retrying");
                    tokio::time::sleep(CONNECTION_RETRY_DELAY).await;
                }
                Err(e) if e.is_timeout() => {
                    return Err(ApiError::Authentication(format!(
                        "token request timed out after {}s: {}",
                        TOKEN_TIMEOUT.as_secs(),
                        e
                    )))
                }
                Err(e) => {
                    return Err(ApiError::Authentication(format!(
                        "token request failed: {}",
                        e
                    )))
                }
            }
        };

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ApiError::Authentication(format!(
                "HTTP {}: {}",
                status.as_u16(),
                snippet(&body, 500)
            )));
        }

        let access_token = parse_access_token(&body)?;
        info!("obtained access token");

        Ok(Token::new(access_token, self.ttl))
    }

    async fn send_token_request(&self) -> Result<reqwest::Response, reqwest::Error> {
        let form = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        self.client
            .post(&self.token_url)
            .query(&[("scope", self.scope.as_str())])
            .form(&form)
            .send()
            .await
    }
}

fn parse_access_token(body: &str) -> Result<String, ApiError> {
    let payload: Value = serde_json::from_str(body).map_err(|_| {
        ApiError::Authentication(format!(
            "invalid JSON response from token endpoint: {}",
            snippet(body, 200)
        ))
    })?;

    match payload.get("access_token").and_then(Value::as_str) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => {
            let fields: Vec<String> = payload
                .as_object()
                .map(|map| map.keys().cloned().collect())
                .unwrap_or_default();
            Err(ApiError::Authentication(format!(
                "no access_token in response, available fields: {:?}",
                fields
            )))
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::moata::stub::{json_response, StubServer};

    fn credentials() -> Credentials {
        Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    fn aged_token(age: Duration, ttl: Duration) -> Token {
        Token {
            access_token: "t".to_string(),
            acquired_at: Instant::now() - age,
            ttl,
        }
    }

    #[test]
    fn should_report_expiry() {
        let fresh = aged_token(Duration::from_secs(0), Duration::from_secs(3600));
        let near = aged_token(Duration::from_secs(3400), Duration::from_secs(3600));
        let expired = aged_token(Duration::from_secs(3700), Duration::from_secs(3600));

        assert!(!fresh.near_expiry(Duration::from_secs(300)));
        assert!(!fresh.is_expired());
        assert!(near.near_expiry(Duration::from_secs(300)));
        assert!(!near.is_expired());
        assert!(expired.is_expired());
        assert!(expired.expires_in() < 0.0);
    }

    #[test]
    fn should_parse_access_token() {
        assert_eq!(
            parse_access_token(r#"{"access_token":"abc","expires_in":3600}"#).unwrap(),
            "abc"
        );
        assert!(matches!(
            parse_access_token(r#"{"token_type":"Bearer"}"#),
            Err(ApiError::Authentication(_))
        ));
        assert!(matches!(
            parse_access_token("<html>"),
            Err(ApiError::Authentication(_))
        ));
    }

    #[test]
    fn should_reject_empty_configuration() {
        assert!(MoataAuth::new("", "scope", credentials()).is_err());
        assert!(MoataAuth::new("http://x", "", credentials()).is_err());
    }

    #[tokio::test]
    async fn should_cache_token_between_calls() {
        let server = StubServer::start(vec![json_response(
            200,
            r#"{"access_token":"first"}"#,
        )])
        .await;
        let auth = MoataAuth::new(&server.url("token"), "scope", credentials()).unwrap();

        assert_eq!(auth.get_token().await.unwrap(), "first");
        assert_eq!(auth.get_token().await.unwrap(), "first");

        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].starts_with("POST /token?scope=scope"));
        assert!(requests[0].contains("grant_type=client_credentials"));
        assert!(auth.token_info().await.cached);
    }

    #[tokio::test]
    async fn should_refresh_token_near_expiry() {
        let server = StubServer::start(vec![
            json_response(200, r#"{"access_token":"first"}"#),
            json_response(200, r#"{"access_token":"second"}"#),
        ])
        .await;
        let auth = MoataAuth::new(&server.url("token"), "scope", credentials())
            .unwrap()
            .with_ttl(Duration::from_secs(100), Duration::from_secs(200));

        assert_eq!(auth.get_token().await.unwrap(), "first");
        assert_eq!(auth.get_token().await.unwrap(), "second");
    }

    #[tokio::test]
    async fn should_fail_on_rejected_credentials() {
        let server =
            StubServer::start(vec![json_response(400, r#"{"error":"invalid_client"}"#)]).await;
        let auth = MoataAuth::new(&server.url("token"), "scope", credentials()).unwrap();

        let err = auth.get_token().await.unwrap_err();

        assert!(matches!(err, ApiError::Authentication(ref m) if m.contains("invalid_client")));
        assert!(!auth.token_info().await.cached);
    }
}
