//! Route canonicalization and REST response types.

use cobalt_model::User;
use serde::Deserialize;

/// Path segments whose following id is a major rate-limit parameter and
/// therefore kept verbatim in the bucket key.
const MAJOR_SEGMENTS: [&str; 3] = ["guilds", "channels", "webhooks"];

/// Reduce `method` + `path` to a rate-limit bucket key: snowflakes are
/// stripped except when they follow a major segment.
pub fn canonical_route(method: &str, path: &str) -> String {
    let mut route = String::with_capacity(path.len() + method.len() + 1);
    route.push_str(method);
    route.push(':');

    let mut previous = "";
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        route.push('/');
        if is_snowflake(segment) && !MAJOR_SEGMENTS.contains(&previous) {
            route.push_str(":id");
        } else {
            route.push_str(segment);
        }
        previous = segment;
    }

    route
}

fn is_snowflake(segment: &str) -> bool {
    !segment.is_empty() && segment.len() <= 20 && segment.bytes().all(|b| b.is_ascii_digit())
}

/// Response from `GET /gateway`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayResponse {
    /// Gateway WebSocket URL.
    pub url: String,
}

/// Response from `GET /gateway/bot`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotResponse {
    /// Gateway WebSocket URL.
    pub url: String,

    /// Recommended shard count.
    pub shards: u16,

    /// Identify budget for the current window.
    pub session_start_limit: SessionStartLimit,
}

/// Session-start budget from the gateway probe.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Total session starts per window.
    pub total: u32,

    /// Session starts left in the window.
    pub remaining: u32,

    /// Milliseconds until the window resets.
    pub reset_after: u64,

    /// Allowed concurrent identifies.
    #[serde(default = "default_concurrency")]
    pub max_concurrency: u32,
}

fn default_concurrency() -> u32 {
    1
}

/// Response from `GET /users/@me`.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentUser {
    #[serde(flatten)]
    pub user: User,

    #[serde(default)]
    pub mfa_enabled: Option<bool>,

    #[serde(default)]
    pub locale: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn major_parameters_are_kept() {
        assert_eq!(
            canonical_route("GET", "/guilds/123456789012345678/members/876543210987654321"),
            "GET:/guilds/123456789012345678/members/:id"
        );
        assert_eq!(
            canonical_route("POST", "/channels/111/messages"),
            "POST:/channels/111/messages"
        );
        assert_eq!(
            canonical_route("DELETE", "/channels/111/messages/222"),
            "DELETE:/channels/111/messages/:id"
        );
        assert_eq!(
            canonical_route("POST", "/webhooks/333/token-value"),
            "POST:/webhooks/333/token-value"
        );
    }

    #[test]
    fn method_distinguishes_buckets() {
        assert_ne!(
            canonical_route("GET", "/channels/1/messages/2"),
            canonical_route("DELETE", "/channels/1/messages/2")
        );
    }

    #[test]
    fn session_start_limit_defaults_concurrency() {
        let limit: SessionStartLimit = serde_json::from_str(
            r#"{"total": 1000, "remaining": 999, "reset_after": 14400000}"#,
        )
        .unwrap();
        assert_eq!(limit.max_concurrency, 1);
    }
}
