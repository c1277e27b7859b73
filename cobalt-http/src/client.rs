//! REST request pipeline.
//!
//! Every request flows through the [`RateLimiter`]: global lockout first,
//! then the route's sequential bucket. Responses feed the `x-ratelimit-*`
//! headers back into the bucket; 429s engage the appropriate lockout and
//! the request retries after the honored wait. 502/504 retry a bounded
//! number of times with doubling backoff.

use crate::error::{ApiErrorBody, HttpError};
use crate::ratelimit::RateLimiter;
use crate::routes::{canonical_route, CurrentUser, GatewayBotResponse, GatewayResponse};

use cobalt_model::Token;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// API base URL with the versioned prefix.
const API_BASE: &str = "https://helselia.dev/api/v6";

const USER_AGENT_VALUE: &str = concat!(
    "CobaltLib (https://github.com/cobalt-rs/cobalt, ",
    env!("CARGO_PKG_VERSION"),
    ")"
);

/// Retries allowed for upstream 502/504 responses.
const UPSTREAM_RETRIES: u32 = 3;

/// Default per-request timeout.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// REST API client.
pub struct HttpClient {
    client: Client,
    ratelimiter: Arc<RateLimiter>,
    base_url: String,
}

impl HttpClient {
    /// Build a client authenticating with `token`. Bot tokens gain the
    /// `Bot ` prefix on the authorization header.
    pub fn new(token: Token) -> Result<Self, HttpError> {
        Self::with_request_timeout(token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Build a client with a custom per-request timeout.
    pub fn with_request_timeout(token: Token, timeout: Duration) -> Result<Self, HttpError> {
        let mut auth = HeaderValue::from_str(&token.authorization())?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            ratelimiter: Arc::new(RateLimiter::new()),
            base_url: API_BASE.to_string(),
        })
    }

    /// Point the client at a different API base (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The shared rate-limit fabric.
    pub fn ratelimiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.ratelimiter)
    }

    // =====================================================================
    // Gateway endpoints
    // =====================================================================

    /// `GET /gateway` — unauthenticated gateway URL.
    pub async fn get_gateway(&self) -> Result<GatewayResponse, HttpError> {
        self.get("/gateway").await
    }

    /// `GET /gateway/bot` — gateway URL, recommended shard count and the
    /// session-start limit.
    pub async fn get_gateway_bot(&self) -> Result<GatewayBotResponse, HttpError> {
        self.get("/gateway/bot").await
    }

    // =====================================================================
    // User endpoints
    // =====================================================================

    /// `GET /users/@me` — the session user.
    pub async fn get_current_user(&self) -> Result<CurrentUser, HttpError> {
        self.get("/users/@me").await
    }

    // =====================================================================
    // Pipeline
    // =====================================================================

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, HttpError> {
        self.request(Method::GET, path, None::<&()>).await
    }

    /// Run one request through the rate-limit fabric, retrying on 429 and
    /// transient upstream failures.
    pub async fn request<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<T, HttpError> {
        let route = canonical_route(method.as_str(), path);
        let bucket = self.ratelimiter.bucket(&route);
        let url = format!("{}{}", self.base_url, path);

        let mut upstream_failures = 0u32;

        loop {
            self.ratelimiter.wait_global().await;
            let permit = bucket.acquire().await?;

            debug!(method = %method, route = %route, "dispatching request");

            let mut request = self.client.request(method.clone(), &url);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = match request.send().await {
                Ok(response) => response,
                Err(err) => {
                    drop(permit);
                    return Err(err.into());
                }
            };

            let status = response.status();
            let limits = RouteLimits::from_headers(response.headers());
            bucket.complete(limits.limit, limits.remaining, limits.reset_at);
            drop(permit);

            match status {
                StatusCode::OK | StatusCode::CREATED => {
                    return response.json::<T>().await.map_err(HttpError::from);
                }
                StatusCode::NO_CONTENT => {
                    return serde_json::from_str("null").map_err(HttpError::from);
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let body: RateLimitedBody = response.json().await.unwrap_or_default();
                    let retry_after = Duration::from_secs_f64(body.retry_after.max(0.0));

                    if body.global {
                        warn!(
                            route = %route,
                            retry_after_ms = retry_after.as_millis() as u64,
                            "globally rate limited"
                        );
                        self.ratelimiter.set_global(retry_after);
                    } else {
                        debug!(
                            route = %route,
                            retry_after_ms = retry_after.as_millis() as u64,
                            "route rate limited"
                        );
                        bucket.lock_until(Instant::now() + retry_after);
                    }
                    // Retry the same request once the wait is honored.
                    continue;
                }
                StatusCode::UNAUTHORIZED => return Err(HttpError::Unauthorized),
                StatusCode::FORBIDDEN => return Err(HttpError::Forbidden),
                StatusCode::NOT_FOUND => return Err(HttpError::NotFound),
                StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT => {
                    upstream_failures += 1;
                    if upstream_failures > UPSTREAM_RETRIES {
                        return Err(HttpError::ServerError(status.as_u16()));
                    }
                    let backoff =
                        Duration::from_millis(500u64 << (upstream_failures - 1).min(4));
                    warn!(
                        route = %route,
                        status = status.as_u16(),
                        attempt = upstream_failures,
                        "upstream failure, retrying"
                    );
                    sleep(backoff).await;
                    continue;
                }
                status if status.is_server_error() => {
                    return Err(HttpError::ServerError(status.as_u16()));
                }
                _ => {
                    let error: ApiErrorBody = response.json().await.unwrap_or(ApiErrorBody {
                        code: 0,
                        message: format!("HTTP {status}"),
                    });
                    return Err(HttpError::Api {
                        code: error.code,
                        message: error.message,
                    });
                }
            }
        }
    }
}

/// 429 response body.
#[derive(Debug, Default, serde::Deserialize)]
struct RateLimitedBody {
    /// Seconds until the limit releases.
    #[serde(default)]
    retry_after: f64,

    /// Whether the whole API is locked rather than one route.
    #[serde(default)]
    global: bool,
}

/// Allowance reported through `x-ratelimit-*` headers.
struct RouteLimits {
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl RouteLimits {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let parse_f64 = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<f64>().ok())
        };
        let parse_u32 = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u32>().ok())
        };

        // Prefer the relative reset; fall back to the epoch-stamped one
        // adjusted by the local clock.
        let reset_at = parse_f64("x-ratelimit-reset-after")
            .map(|after| Instant::now() + Duration::from_secs_f64(after.max(0.0)))
            .or_else(|| {
                let reset_epoch = parse_f64("x-ratelimit-reset")?;
                let now_epoch = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .ok()?
                    .as_secs_f64();
                let delta = (reset_epoch - now_epoch).max(0.0);
                Some(Instant::now() + Duration::from_secs_f64(delta))
            });

        if let Some(bucket) = headers.get("x-ratelimit-bucket").and_then(|v| v.to_str().ok()) {
            debug!(bucket = %bucket, "server bucket id");
        }

        Self {
            limit: parse_u32("x-ratelimit-limit"),
            remaining: parse_u32("x-ratelimit-remaining"),
            reset_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_builds_with_bot_token() {
        let client = HttpClient::new(Token::bot("abc123"));
        assert!(client.is_ok());
    }

    #[test]
    fn reset_after_header_takes_precedence() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-ratelimit-limit", HeaderValue::from_static("5"));
        headers.insert("x-ratelimit-remaining", HeaderValue::from_static("2"));
        headers.insert("x-ratelimit-reset-after", HeaderValue::from_static("1.5"));
        headers.insert(
            "x-ratelimit-reset",
            HeaderValue::from_static("99999999999.0"),
        );

        let before = Instant::now();
        let limits = RouteLimits::from_headers(&headers);
        assert_eq!(limits.limit, Some(5));
        assert_eq!(limits.remaining, Some(2));

        let reset_at = limits.reset_at.unwrap();
        let delta = reset_at.duration_since(before);
        assert!(delta <= Duration::from_secs(2), "relative reset wins");
    }

    #[test]
    fn missing_headers_leave_allowance_untouched() {
        let headers = reqwest::header::HeaderMap::new();
        let limits = RouteLimits::from_headers(&headers);
        assert!(limits.limit.is_none());
        assert!(limits.remaining.is_none());
        assert!(limits.reset_at.is_none());
    }
}
