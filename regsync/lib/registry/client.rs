use std::{sync::Arc, time::Duration};

use reqwest::{Client, Method, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::Deserialize;

use crate::{
    auth::Credential,
    reference::Reference,
    registry::{ImageDestination, ImageSource, RegistryAdapter},
    RegsyncError, RegsyncResult,
};

use super::{HttpImageDestination, HttpImageSource};
use async_trait::async_trait;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Timeout for API pings and HEAD probes.
pub(crate) const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for token-service round trips.
pub(crate) const TOKEN_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for manifest and tag-list requests. Blob streams are unbounded;
/// the retry middleware covers transient stalls.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Client id reported to token services for the refresh-token grant.
const TOKEN_CLIENT_ID: &str = "regsync";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Shared HTTP plumbing for one repository at one registry.
///
/// Resolves the connection scheme (falling back to plain HTTP for
/// `insecure` registries that do not answer TLS), negotiates a bearer
/// token from the registry's `Www-Authenticate` challenge, and hands out
/// authenticated request builders.
#[derive(Debug)]
pub struct RegistryClient {
    /// Retrying client for idempotent requests.
    client: ClientWithMiddleware,

    /// Plain client for streaming uploads, which cannot be replayed by the
    /// retry middleware.
    raw_client: Client,

    registry: String,
    repository: String,
    credential: Credential,
    scopes: String,
    state: tokio::sync::Mutex<ClientState>,
}

#[derive(Debug, Default)]
struct ClientState {
    /// Resolved scheme + host, e.g. `https://r1.example`.
    base: Option<String>,

    /// Bearer token for the repository scope, when the registry requires
    /// one.
    token: Option<String>,
}

/// A parsed `Www-Authenticate: Bearer` challenge.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct BearerChallenge {
    pub realm: String,
    pub service: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,

    #[serde(default)]
    access_token: String,
}

/// Opens [`HttpImageSource`]s and [`HttpImageDestination`]s.
#[derive(Debug, Default)]
pub struct HttpRegistryAdapter;

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryClient {
    /// Creates a client for `registry/repository` with the given token
    /// scopes (`pull` for sources, `pull,push` for destinations).
    pub fn new(
        registry: impl Into<String>,
        repository: impl Into<String>,
        credential: Option<Credential>,
        scopes: impl Into<String>,
    ) -> RegsyncResult<Self> {
        let credential = credential.unwrap_or_default();

        let mut builder = Client::builder();
        if credential.insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }
        let raw_client = builder.build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(3);
        let client = ClientBuilder::new(raw_client.clone())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self {
            client,
            raw_client,
            registry: registry.into(),
            repository: repository.into(),
            credential,
            scopes: scopes.into(),
            state: tokio::sync::Mutex::new(ClientState::default()),
        })
    }

    /// Returns the repository this client addresses.
    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Returns the registry host this client talks to.
    pub fn registry(&self) -> &str {
        &self.registry
    }

    /// Builds an authenticated request for an API path under the resolved
    /// base (e.g. `/v2/<repo>/manifests/<ref>`).
    pub async fn request(&self, method: Method, path: &str) -> RegsyncResult<RequestBuilder> {
        let (base, token) = self.prepare().await?;
        let mut request = self.client.request(method, format!("{}{}", base, path));
        request = match token {
            Some(token) => request.bearer_auth(token),
            None if self.has_basic_credentials() => request
                .basic_auth(&self.credential.username, Some(&self.credential.password)),
            None => request,
        };
        Ok(request)
    }

    /// Builds an authenticated request for an absolute URL (pagination
    /// links are returned absolute by some registries).
    pub async fn request_absolute(
        &self,
        method: Method,
        url: &str,
    ) -> RegsyncResult<RequestBuilder> {
        let (base, token) = self.prepare().await?;
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", base, url)
        };
        let mut request = self.client.request(method, url);
        request = match token {
            Some(token) => request.bearer_auth(token),
            None if self.has_basic_credentials() => request
                .basic_auth(&self.credential.username, Some(&self.credential.password)),
            None => request,
        };
        Ok(request)
    }

    /// Builds an authenticated streaming request that bypasses the retry
    /// middleware (streaming bodies cannot be replayed).
    pub async fn raw_request(
        &self,
        method: Method,
        url: &str,
    ) -> RegsyncResult<reqwest::RequestBuilder> {
        let (base, token) = self.prepare().await?;
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}{}", base, url)
        };
        let mut request = self.raw_client.request(method, url);
        request = match token {
            Some(token) => request.bearer_auth(token),
            None if self.has_basic_credentials() => request
                .basic_auth(&self.credential.username, Some(&self.credential.password)),
            None => request,
        };
        Ok(request)
    }

    /// Returns true when a username/password pair is configured.
    fn has_basic_credentials(&self) -> bool {
        !self.credential.username.is_empty() && !self.credential.password.is_empty()
    }

    /// Resolves the base URL and bearer token, pinging `/v2/` once per
    /// client. Registries that do not answer TLS are retried over plain
    /// HTTP when the credential allows insecure access.
    async fn prepare(&self) -> RegsyncResult<(String, Option<String>)> {
        let mut state = self.state.lock().await;
        if let Some(base) = &state.base {
            return Ok((base.clone(), state.token.clone()));
        }

        let mut schemes = vec!["https"];
        if self.credential.insecure {
            schemes.push("http");
        }

        let mut last_error = None;
        for scheme in schemes {
            let base = format!("{}://{}", scheme, self.registry);
            let ping = self
                .raw_client
                .get(format!("{}/v2/", base))
                .timeout(PROBE_TIMEOUT)
                .send()
                .await;

            match ping {
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED => {
                    let token = match response
                        .headers()
                        .get(reqwest::header::WWW_AUTHENTICATE)
                        .and_then(|value| value.to_str().ok())
                        .and_then(parse_bearer_challenge)
                    {
                        Some(challenge) => Some(self.fetch_token(&challenge).await?),
                        // Basic-only registries: credentials go on each
                        // request via the token-less branch below
                        None => None,
                    };
                    state.base = Some(base.clone());
                    state.token = token.clone();
                    return Ok((base, token));
                }
                Ok(_) => {
                    state.base = Some(base.clone());
                    return Ok((base, None));
                }
                Err(error) => {
                    let connect_failure = error.is_connect() || error.is_timeout();
                    last_error = Some(error);
                    if !(connect_failure && self.credential.insecure) {
                        break;
                    }
                }
            }
        }

        Err(last_error.expect("at least one scheme attempted").into())
    }

    /// Fetches a bearer token from the challenge's token service, using
    /// the identity token's refresh grant when one is configured and basic
    /// credentials otherwise.
    async fn fetch_token(&self, challenge: &BearerChallenge) -> RegsyncResult<String> {
        let scope = format!("repository:{}:{}", self.repository, self.scopes);

        let response = if !self.credential.identity_token.is_empty() {
            self.raw_client
                .post(&challenge.realm)
                .timeout(TOKEN_TIMEOUT)
                .form(&[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", self.credential.identity_token.as_str()),
                    ("service", challenge.service.as_str()),
                    ("scope", scope.as_str()),
                    ("client_id", TOKEN_CLIENT_ID),
                ])
                .send()
                .await?
        } else {
            let mut request = self
                .raw_client
                .get(&challenge.realm)
                .timeout(TOKEN_TIMEOUT)
                .query(&[("service", challenge.service.as_str()), ("scope", scope.as_str())]);
            if !self.credential.username.is_empty() && !self.credential.password.is_empty() {
                request =
                    request.basic_auth(&self.credential.username, Some(&self.credential.password));
            }
            request.send().await?
        };

        if !response.status().is_success() {
            return Err(RegsyncError::Auth(format!(
                "token service {} returned {}",
                challenge.realm,
                response.status()
            )));
        }

        let token = response.json::<TokenResponse>().await?;
        if !token.token.is_empty() {
            Ok(token.token)
        } else if !token.access_token.is_empty() {
            Ok(token.access_token)
        } else {
            Err(RegsyncError::Auth(format!(
                "token service {} returned no token",
                challenge.realm
            )))
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl RegistryAdapter for HttpRegistryAdapter {
    async fn open_source(
        &self,
        reference: &Reference,
        credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageSource>> {
        Ok(Arc::new(HttpImageSource::new(reference.clone(), credential)?))
    }

    async fn open_destination(
        &self,
        reference: &Reference,
        credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageDestination>> {
        Ok(Arc::new(HttpImageDestination::new(
            reference.clone(),
            credential,
        )?))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses a `Bearer realm="…",service="…"` challenge header value.
pub(crate) fn parse_bearer_challenge(value: &str) -> Option<BearerChallenge> {
    let params = value.trim().strip_prefix("Bearer ")?;

    let mut realm = None;
    let mut service = None;
    for param in params.split(',') {
        // scope values may contain commas; fragments without '=' are not
        // parameters of interest
        let Some((key, raw)) = param.trim().split_once('=') else {
            continue;
        };
        let unquoted = raw.trim().trim_matches('"');
        match key.trim() {
            "realm" => realm = Some(unquoted.to_string()),
            "service" => service = Some(unquoted.to_string()),
            _ => {}
        }
    }

    Some(BearerChallenge {
        realm: realm?,
        service: service.unwrap_or_default(),
    })
}

/// Reads the body of an error response into a registry error, preserving
/// the status code.
pub(crate) async fn response_error(response: reqwest::Response) -> RegsyncError {
    let status = response.status();
    let message = match response.text().await {
        Ok(body) if !body.is_empty() => {
            let mut message = body;
            message.truncate(512);
            message
        }
        _ => status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string(),
    };

    if status == StatusCode::NOT_FOUND {
        RegsyncError::NotFound(message)
    } else {
        RegsyncError::Registry {
            status: status.as_u16(),
            message,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let value =
            r#"Bearer realm="https://auth.docker.io/token",service="registry.docker.io",scope="repository:library/alpine:pull""#;
        let challenge = parse_bearer_challenge(value).unwrap();
        assert_eq!(challenge.realm, "https://auth.docker.io/token");
        assert_eq!(challenge.service, "registry.docker.io");
    }

    #[test]
    fn test_parse_bearer_challenge_without_service() {
        let value = r#"Bearer realm="https://r1.example/token""#;
        let challenge = parse_bearer_challenge(value).unwrap();
        assert_eq!(challenge.realm, "https://r1.example/token");
        assert_eq!(challenge.service, "");
    }

    #[test]
    fn test_parse_bearer_challenge_rejects_basic() {
        assert!(parse_bearer_challenge(r#"Basic realm="registry""#).is_none());
    }
}
