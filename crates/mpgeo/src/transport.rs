//! Rate-limited, retrying GraphQL transport.
//!
//! A [`Transport`] performs one logical GraphQL call per [`Transport::post`]:
//! every attempt first passes through the instance's [`RateLimiter`], then
//! the request is sent and the response envelope checked. Transport and
//! protocol failures are retried with exponential backoff; anything else is
//! returned as-is.

use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Default GraphQL endpoint.
pub const DEFAULT_URL: &str = "https://api.matterport.com/api/models/graph";

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default aggregate request rate.
pub const DEFAULT_MAX_RPS: f64 = 5.0;

/// Default number of retries after the first attempt.
pub const DEFAULT_RETRIES: u32 = 3;

/// Default delay before the first retry; doubles on each subsequent retry.
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default user agent for API requests.
pub const DEFAULT_USER_AGENT: &str = concat!("mpgeo/", env!("CARGO_PKG_VERSION"));

/// Settings for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// GraphQL endpoint URL.
    pub url: String,
    /// Full `Authorization` header value (e.g. `Basic ...`).
    pub auth_header: String,
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Maximum requests per second across all callers; `<= 0` disables the limit.
    pub max_rps: f64,
    /// Retries after the first failed attempt.
    pub retries: u32,
    /// Delay before the first retry.
    pub backoff_base: Duration,
    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl TransportConfig {
    /// Create a config with default timeout, rate and retry settings.
    #[must_use]
    pub fn new(url: impl Into<String>, auth_header: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth_header: auth_header.into(),
            timeout: DEFAULT_TIMEOUT,
            max_rps: DEFAULT_MAX_RPS,
            retries: DEFAULT_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    /// Set the per-request HTTP timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the request rate limit; `<= 0` disables it.
    #[must_use]
    pub fn with_max_rps(mut self, max_rps: f64) -> Self {
        self.max_rps = max_rps;
        self
    }

    /// Set how many times a failed request is retried.
    #[must_use]
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Set the delay before the first retry.
    #[must_use]
    pub fn with_backoff_base(mut self, backoff_base: Duration) -> Self {
        self.backoff_base = backoff_base;
        self
    }

    /// Set the `User-Agent` header.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Enforces a minimum spacing between request starts.
///
/// The "last request start" timestamp is guarded by an async mutex and the
/// wait happens while the lock is held, so concurrent callers pass the gate
/// one at a time.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<LimiterState>,
}

#[derive(Debug)]
struct LimiterState {
    max_rps: f64,
    last: Option<Instant>,
}

impl LimiterState {
    /// Spacing between request starts; a rate too small to represent
    /// saturates to `Duration::MAX`.
    fn min_interval(&self) -> Option<Duration> {
        (self.max_rps > 0.0 && self.max_rps.is_finite())
            .then(|| Duration::try_from_secs_f64(1.0 / self.max_rps).unwrap_or(Duration::MAX))
    }
}

impl RateLimiter {
    /// Create a limiter allowing `max_rps` request starts per second.
    #[must_use]
    pub fn new(max_rps: f64) -> Self {
        Self {
            state: Mutex::new(LimiterState {
                max_rps,
                last: None,
            }),
        }
    }

    /// Wait until a request may start, then record the start time.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;
        if let (Some(interval), Some(last)) = (state.min_interval(), state.last) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                tokio::time::sleep(interval - elapsed).await;
            }
        }
        state.last = Some(Instant::now());
    }

    /// Current rate limit.
    pub async fn max_rps(&self) -> f64 {
        self.state.lock().await.max_rps
    }

    /// Change the rate limit, returning the previous value.
    pub async fn set_max_rps(&self, max_rps: f64) -> f64 {
        let mut state = self.state.lock().await;
        std::mem::replace(&mut state.max_rps, max_rps)
    }
}

/// The POST body of a GraphQL request.
#[derive(Serialize)]
struct RequestEnvelope<'a> {
    query: &'a str,
    variables: &'a Map<String, Value>,
}

/// Authenticated GraphQL transport with rate limiting and retries.
///
/// One instance is meant to be shared by every caller (wrap it in an `Arc`
/// or share a reference); the rate limit applies to the instance as a whole.
#[derive(Debug)]
pub struct Transport {
    http: reqwest::Client,
    url: String,
    retries: u32,
    backoff_base: Duration,
    limiter: RateLimiter,
}

impl Transport {
    /// Build a transport from its config.
    ///
    /// Fails with [`Error::Config`] if the auth header is not a valid header
    /// value or the HTTP client cannot be constructed.
    pub fn new(config: TransportConfig) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&config.auth_header).map_err(|e| Error::Config {
            detail: format!("invalid authorization header: {e}"),
        })?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, auth);
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );

        let http = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config {
                detail: format!("failed to create http client: {e}"),
            })?;

        Ok(Self {
            http,
            url: config.url,
            retries: config.retries,
            backoff_base: config.backoff_base,
            limiter: RateLimiter::new(config.max_rps),
        })
    }

    /// The shared rate limiter.
    #[must_use]
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Perform one logical GraphQL call and return its `data` object.
    ///
    /// Each attempt waits on the rate limiter first. Retryable failures are
    /// retried up to the configured count, sleeping `base * 2^attempt`
    /// between attempts; the last error is returned once retries run out.
    pub async fn post(
        &self,
        query: &str,
        variables: Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        let body = RequestEnvelope {
            query,
            variables: &variables,
        };

        let mut attempt = 0;
        loop {
            self.limiter.acquire().await;
            tracing::debug!(url = %self.url, attempt, "posting graphql request");

            match self.send_once(&body).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() && attempt < self.retries => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "graphql request failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn send_once(&self, body: &RequestEnvelope<'_>) -> Result<Map<String, Value>> {
        let response = self
            .http
            .post(&self.url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Http {
                url: self.url.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }

        let payload: Value = response.json().await.map_err(|e| Error::InvalidData {
            context: "graphql response",
            detail: e.to_string(),
        })?;

        parse_envelope(payload)
    }
}

/// Delay before retry number `attempt + 1`.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Extract the `data` object from a GraphQL response body.
pub(crate) fn parse_envelope(payload: Value) -> Result<Map<String, Value>> {
    let Value::Object(mut payload) = payload else {
        return Err(Error::InvalidData {
            context: "graphql response",
            detail: "expected a JSON object".to_string(),
        });
    };

    // Any `errors` key is a failure, even when its value is null.
    if let Some(errors) = payload.remove("errors") {
        return Err(Error::GraphQl {
            message: errors.to_string(),
        });
    }

    match payload.remove("data") {
        Some(Value::Object(data)) => Ok(data),
        _ => Err(Error::InvalidData {
            context: "graphql response",
            detail: "missing data object".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_envelope_data() {
        let data = parse_envelope(json!({"data": {"model": null}})).unwrap();
        assert!(data.contains_key("model"));
    }

    #[test]
    fn test_parse_envelope_errors() {
        let err = parse_envelope(json!({"errors": [{"message": "boom"}]})).unwrap_err();
        assert!(matches!(err, Error::GraphQl { ref message } if message.contains("boom")));
    }

    #[test]
    fn test_parse_envelope_errors_win_over_data() {
        let err = parse_envelope(json!({"data": {}, "errors": []})).unwrap_err();
        assert!(err.is_protocol());
    }

    #[test]
    fn test_parse_envelope_null_errors_is_failure() {
        let err = parse_envelope(json!({"data": {"model": null}, "errors": null})).unwrap_err();
        assert!(matches!(err, Error::GraphQl { .. }));
    }

    #[test]
    fn test_parse_envelope_missing_data() {
        let err = parse_envelope(json!({"data": null})).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));

        let err = parse_envelope(json!([1, 2, 3])).unwrap_err();
        assert!(matches!(err, Error::InvalidData { .. }));
    }

    #[test]
    fn test_backoff_delay_doubles() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff_delay(base, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(8));
        // Saturates instead of overflowing.
        assert_eq!(backoff_delay(base, 64), base.saturating_mul(u32::MAX));
    }

    #[test]
    fn test_invalid_auth_header_is_config_error() {
        let config = TransportConfig::new("https://example.test", "Basic \n");
        let err = Transport::new(config).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[tokio::test]
    async fn test_rate_limiter_spacing() {
        let limiter = RateLimiter::new(50.0);
        let start = std::time::Instant::now();
        for _ in 0..5 {
            limiter.acquire().await;
        }
        // 4 gaps of 20 ms each.
        assert!(start.elapsed() >= Duration::from_millis(78));
    }

    #[tokio::test]
    async fn test_rate_limiter_shared_between_tasks() {
        let limiter = Arc::new(RateLimiter::new(20.0));
        let start = std::time::Instant::now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                tokio::spawn(async move { limiter.acquire().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // 3 gaps of 50 ms each, regardless of how many tasks are waiting.
        assert!(start.elapsed() >= Duration::from_millis(148));
    }

    #[tokio::test]
    async fn test_rate_limiter_disabled() {
        let limiter = RateLimiter::new(0.0);
        let start = std::time::Instant::now();
        for _ in 0..100 {
            limiter.acquire().await;
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_rate_limiter_tiny_rate_does_not_panic() {
        for max_rps in [1e-20, f64::MIN_POSITIVE / 4.0] {
            let limiter = RateLimiter::new(max_rps);
            limiter.acquire().await;
            // The second start is effectively never allowed.
            let second = tokio::time::timeout(Duration::from_millis(50), limiter.acquire()).await;
            assert!(second.is_err());
        }
    }

    #[tokio::test]
    async fn test_set_max_rps_returns_previous() {
        let limiter = RateLimiter::new(5.0);
        assert!((limiter.set_max_rps(10.0).await - 5.0).abs() < f64::EPSILON);
        assert!((limiter.max_rps().await - 10.0).abs() < f64::EPSILON);
    }
}
