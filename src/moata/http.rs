//! Rate-limited, retrying GET requests against the Moata API.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use reqwest::{header, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{snippet, ApiError},
    moata::auth::MoataAuth,
};

pub const MAX_RETRIES: u32 = 5;
pub const BACKOFF_BASE: Duration = Duration::from_secs(1);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const READ_TIMEOUT: Duration = Duration::from_secs(60);
const REAUTH_DELAY: Duration = Duration::from_secs(1);
const MIN_REQUESTS_PER_SECOND: f64 = 0.1;
const MAX_RETRY_AFTER_SECONDS: f64 = 120.0;

fn build_client(read_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .read_timeout(read_timeout)
        .build()
}

/// Statuses worth retrying.
pub fn is_transient(status: StatusCode) -> bool {
    matches!(status.as_u16(), 429 | 500 | 502 | 503 | 504)
}

/// Exponential backoff, `base * 2^(attempt - 1)`, unless the server sent a numeric `Retry-After`.
pub fn backoff_delay(base: Duration, attempt: u32, retry_after: Option<&str>) -> Duration {
    let server_delay = retry_after
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0);

    match server_delay {
        Some(secs) => Duration::from_secs_f64(secs.min(MAX_RETRY_AFTER_SECONDS)),
        None => base * 2u32.pow(attempt.saturating_sub(1).min(10)),
    }
}

/// Status codes that a caller expects and wants mapped to `None` instead of an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Allow {
    pub not_found: bool,
    pub forbidden: bool,
}

impl Allow {
    pub const NONE: Allow = Allow {
        not_found: false,
        forbidden: false,
    };
    pub const NOT_FOUND: Allow = Allow {
        not_found: true,
        forbidden: false,
    };
    pub const MISSING_OR_FORBIDDEN: Allow = Allow {
        not_found: true,
        forbidden: true,
    };
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    pub requests: u64,
    pub retries: u64,
}

pub struct MoataHttp {
    client: reqwest::Client,
    base_url: String,
    auth: Arc<MoataAuth>,
    min_interval: Duration,
    backoff_base: Duration,
    requests: AtomicU64,
    retries: AtomicU64,
}

impl MoataHttp {
    pub fn new(
        base_url: &str,
        auth: Arc<MoataAuth>,
        requests_per_second: f64,
    ) -> Result<Self, ApiError> {
        let client = build_client(READ_TIMEOUT)?;

        Ok(MoataHttp {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            min_interval: Duration::from_secs_f64(
                1.0 / requests_per_second.max(MIN_REQUESTS_PER_SECOND),
            ),
            backoff_base: BACKOFF_BASE,
            requests: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        })
    }

    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    pub fn stats(&self) -> RequestStats {
        RequestStats {
            requests: self.requests.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }

    pub fn reset_stats(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// GETs `path` and decodes the JSON body.
    ///
    /// Returns `Ok(None)` for an empty body or for a 404/403 the caller allowed. A 401 clears the
    /// cached token and retries once with a fresh one; 429 and 5xx gateway errors are retried with
    /// exponential backoff up to [`MAX_RETRIES`] times.
    pub async fn get(
        &self,
        path: &str,
        params: &[(String, String)],
        allow: Allow,
    ) -> Result<Option<Value>, ApiError> {
        let url = self.url(path);
        let mut attempt = 0;
        let mut reauthenticated = false;

        loop {
            tokio::time::sleep(self.min_interval).await;

            let token = self.auth.get_token().await?;
            self.requests.fetch_add(1, Ordering::Relaxed);
            debug!(url = %url, params = params.len(), "GET");

            let response = match self
                .client
                .get(&url)
                .query(params)
                .bearer_auth(&token)
                .header(header::ACCEPT, "application/json")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) if e.is_timeout() => {
                    return Err(ApiError::Timeout(format!("request to {} timed out", url)))
                }
                Err(e) if e.is_connect() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    self.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(url = %url, attempt, error = %e, "connection failed, retrying");
                    tokio::time::sleep(backoff_delay(self.backoff_base, attempt, None)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();

            if status == StatusCode::UNAUTHORIZED {
                if reauthenticated {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::Authentication(format!(
                        "token rejected for {} after refresh: {}",
                        url,
                        snippet(&body, 200)
                    )));
                }
                warn!(url = %url, "401 Unauthorized, refreshing token");
                self.auth.clear_token().await;
                reauthenticated = true;
                tokio::time::sleep(REAUTH_DELAY).await;
                continue;
            }

            if status == StatusCode::NOT_FOUND && allow.not_found {
                debug!(url = %url, "404 Not Found (allowed)");
                return Ok(None);
            }

            if status == StatusCode::FORBIDDEN && allow.forbidden {
                debug!(url = %url, "403 Forbidden (allowed)");
                return Ok(None);
            }

            let retry_after = response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);

            if is_transient(status) && attempt < MAX_RETRIES {
                attempt += 1;
                self.retries.fetch_add(1, Ordering::Relaxed);
                let delay = backoff_delay(self.backoff_base, attempt, retry_after.as_deref());
                warn!(
                    url = %url,
                    status = status.as_u16(),
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(ApiError::RateLimited {
                    url,
                    retry_after: retry_after.unwrap_or_else(|| "unknown".to_string()),
                });
            }

            let body = response.text().await?;

            if !status.is_success() {
                return Err(ApiError::Http {
                    status: status.as_u16(),
                    url,
                    body: snippet(&body, 200),
                });
            }

            if body.trim().is_empty() {
                return Ok(None);
            }

            return serde_json::from_str(&body)
                .map(Some)
                .map_err(|_| ApiError::InvalidJson {
                    url,
                    body: snippet(&body, 200),
                });
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        config::Credentials,
        moata::stub::{json_response, StubServer},
    };

    const TOKEN: &str = r#"{"access_token":"tok"}"#;

    #[tokio::test]
    async fn should_time_out_silent_reads() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let client = build_client(Duration::from_millis(100)).unwrap();
        let err = client
            .get(format!("http://{}/v1/projects", addr))
            .send()
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(READ_TIMEOUT, Duration::from_secs(60));
    }

    async fn http_for(server: &StubServer) -> MoataHttp {
        let credentials = Credentials {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        };
        let auth = MoataAuth::new(&server.url("token"), "scope", credentials).unwrap();
        MoataHttp::new(&server.base_url(), Arc::new(auth), 1000.0)
            .unwrap()
            .with_backoff_base(Duration::from_millis(1))
    }

    #[test]
    fn should_double_backoff_per_attempt() {
        let base = Duration::from_secs(1);

        assert_eq!(backoff_delay(base, 1, None), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 2, None), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 4, None), Duration::from_secs(8));
    }

    #[test]
    fn should_honour_numeric_retry_after() {
        let base = Duration::from_secs(1);

        assert_eq!(backoff_delay(base, 1, Some("7")), Duration::from_secs(7));
        assert_eq!(
            backoff_delay(base, 3, Some("Wed, 21 Oct 2015 07:28:00 GMT")),
            Duration::from_secs(4)
        );
    }

    #[test]
    fn should_classify_transient_statuses() {
        assert!(is_transient(StatusCode::TOO_MANY_REQUESTS));
        assert!(is_transient(StatusCode::BAD_GATEWAY));
        assert!(!is_transient(StatusCode::BAD_REQUEST));
        assert!(!is_transient(StatusCode::NOT_FOUND));
    }

    #[tokio::test]
    async fn should_send_bearer_token_and_query() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(200, r#"[{"id":1}]"#),
        ])
        .await;
        let http = http_for(&server).await;
        let params = vec![
            ("traceIds".to_string(), "1".to_string()),
            ("traceIds".to_string(), "2".to_string()),
        ];

        let value = http.get("alarms", &params, Allow::NONE).await.unwrap();

        assert_eq!(value, Some(serde_json::json!([{"id": 1}])));
        let requests = server.requests().await;
        let request = requests[1].to_lowercase();
        assert!(request.starts_with("get /alarms?traceids=1&traceids=2 "));
        assert!(request.contains("authorization: bearer tok"));
        assert!(request.contains("accept: application/json"));
    }

    #[tokio::test]
    async fn should_map_allowed_404_to_none() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(404, r#"{"message":"missing"}"#),
            json_response(404, r#"{"message":"missing"}"#),
        ])
        .await;
        let http = http_for(&server).await;

        let allowed = http.get("traces/1/ari", &[], Allow::NOT_FOUND).await.unwrap();
        let denied = http.get("traces/1/ari", &[], Allow::NONE).await;

        assert_eq!(allowed, None);
        assert!(matches!(denied, Err(ApiError::Http { status: 404, .. })));
    }

    #[tokio::test]
    async fn should_retry_transient_errors() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(503, "busy"),
            json_response(200, r#"{"ok":true}"#),
        ])
        .await;
        let http = http_for(&server).await;

        let value = http.get("x", &[], Allow::NONE).await.unwrap();

        assert_eq!(value, Some(serde_json::json!({"ok": true})));
        assert_eq!(
            http.stats(),
            RequestStats {
                requests: 2,
                retries: 1
            }
        );

        http.reset_stats();
        assert_eq!(http.stats(), RequestStats::default());
    }

    #[tokio::test]
    async fn should_give_up_on_persistent_rate_limit() {
        let mut responses = vec![json_response(200, TOKEN)];
        for _ in 0..=MAX_RETRIES {
            responses.push(json_response(429, "slow down").with_header("Retry-After", "0"));
        }
        let server = StubServer::start(responses).await;
        let http = http_for(&server).await;

        let err = http.get("x", &[], Allow::NONE).await.unwrap_err();

        assert!(matches!(err, ApiError::RateLimited { ref retry_after, .. } if retry_after == "0"));
        assert_eq!(http.stats().retries, u64::from(MAX_RETRIES));
    }

    #[tokio::test]
    async fn should_refresh_token_once_on_401() {
        let server = StubServer::start(vec![
            json_response(200, r#"{"access_token":"old"}"#),
            json_response(401, "expired"),
            json_response(200, r#"{"access_token":"new"}"#),
            json_response(200, r#"{"ok":true}"#),
        ])
        .await;
        let http = http_for(&server).await;

        let value = http.get("x", &[], Allow::NONE).await.unwrap();

        assert_eq!(value, Some(serde_json::json!({"ok": true})));
        let requests = server.requests().await;
        assert!(requests[3].to_lowercase().contains("authorization: bearer new"));
    }

    #[tokio::test]
    async fn should_fail_after_second_401() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(401, "nope"),
            json_response(200, TOKEN),
            json_response(401, "still nope"),
        ])
        .await;
        let http = http_for(&server).await;

        let err = http.get("x", &[], Allow::NONE).await.unwrap_err();

        assert!(matches!(err, ApiError::Authentication(_)));
    }

    #[tokio::test]
    async fn should_treat_empty_body_as_none_and_reject_bad_json() {
        let server = StubServer::start(vec![
            json_response(200, TOKEN),
            json_response(200, ""),
            json_response(200, "<html>"),
        ])
        .await;
        let http = http_for(&server).await;

        assert_eq!(http.get("x", &[], Allow::NONE).await.unwrap(), None);
        assert!(matches!(
            http.get("x", &[], Allow::NONE).await,
            Err(ApiError::InvalidJson { .. })
        ));
    }
}
