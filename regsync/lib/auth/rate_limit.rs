use std::time::Duration;

use serde::Deserialize;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Docker Hub registry endpoint used for the rate-limit probe.
const HUB_REGISTRY_URL: &str = "https://registry-1.docker.io";

/// Docker Hub token endpoint.
const HUB_AUTH_REALM: &str = "https://auth.docker.io/token";

/// Docker Hub token service name.
const HUB_AUTH_SERVICE: &str = "registry.docker.io";

/// Timeout for the HEAD probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for the token fetch.
const TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A pull-rate budget reported by Docker Hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// The window's total pull allowance.
    pub limit: i64,

    /// Pulls remaining in the current window.
    pub remaining: i64,
}

#[derive(Debug, Deserialize)]
struct AuthToken {
    token: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Probes Docker Hub for the pull-rate budget left to the given credential.
///
/// Fetches a pull token for the repository and issues a HEAD request whose
/// `Ratelimit-Limit` / `Ratelimit-Remaining` headers carry the budget.
/// Returns `None` when the probe fails or the registry does not advertise
/// a limit; callers then treat the credential as unconstrained.
pub async fn check_pull_rate_limit(
    repository: &str,
    username: &str,
    password: &str,
) -> Option<RateLimit> {
    let client = reqwest::Client::new();

    let mut token_request = client
        .get(HUB_AUTH_REALM)
        .timeout(TOKEN_TIMEOUT)
        .query(&[
            ("service", HUB_AUTH_SERVICE),
            ("scope", format!("repository:{}:pull", repository).as_str()),
        ]);
    if !username.is_empty() && !password.is_empty() {
        token_request = token_request.basic_auth(username, Some(password));
    }

    let token = token_request
        .send()
        .await
        .ok()?
        .json::<AuthToken>()
        .await
        .ok()?
        .token;

    let response = client
        .head(format!(
            "{}/v2/{}/manifests/latest",
            HUB_REGISTRY_URL, repository
        ))
        .timeout(PROBE_TIMEOUT)
        .bearer_auth(token)
        .send()
        .await
        .ok()?;

    let limit = parse_rate_header(response.headers().get("ratelimit-limit")?)?;
    let remaining = parse_rate_header(response.headers().get("ratelimit-remaining")?)?;

    Some(RateLimit { limit, remaining })
}

/// Parses a `<count>;w=<window>` rate-limit header value.
fn parse_rate_header(value: &reqwest::header::HeaderValue) -> Option<i64> {
    value
        .to_str()
        .ok()?
        .split(';')
        .next()?
        .trim()
        .parse::<i64>()
        .ok()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
