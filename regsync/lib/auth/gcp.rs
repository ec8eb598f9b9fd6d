use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use crate::{RegsyncError, RegsyncResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Sentinel username marking a GCR credential whose password is a
/// base64-encoded service-account key.
pub const OAUTH2_SENTINEL_USER: &str = "_oauth2_";

/// The username registries of the GCR family expect together with an OAuth2
/// access token.
pub const OAUTH2_ACCESS_TOKEN_USER: &str = "oauth2accesstoken";

/// OAuth2 scope requested for registry pushes and pulls.
const DEVSTORAGE_SCOPE: &str = "https://www.googleapis.com/auth/devstorage.read_write";

/// Grant type of the JWT bearer assertion flow.
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Validity requested for the issued access token.
const TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Timeout for the token endpoint round trip.
const TOKEN_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The fields of a Google service-account key used by the exchange.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when the credential pair denotes a permanent GCR
/// service-account token: a registry in the GCR family together with the
/// `_oauth2_` sentinel username.
pub fn is_service_account_token(registry: &str, username: &str) -> bool {
    registry.contains(".gcr.io") && username == OAUTH2_SENTINEL_USER
}

/// Exchanges a base64-encoded service-account key for an OAuth2 access
/// token via the key's token endpoint.
pub async fn token_from_service_account(creds: &str) -> RegsyncResult<String> {
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(creds.trim())
        .map_err(|e| RegsyncError::Auth(format!("invalid service account encoding: {}", e)))?;

    let key: ServiceAccountKey = serde_json::from_slice(&decoded)
        .map_err(|e| RegsyncError::Auth(format!("invalid service account key: {}", e)))?;

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| RegsyncError::Auth(format!("system clock error: {}", e)))?
        .as_secs();

    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: DEVSTORAGE_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + TOKEN_LIFETIME.as_secs(),
    };

    let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| RegsyncError::Auth(format!("invalid service account private key: {}", e)))?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &encoding_key)
        .map_err(|e| RegsyncError::Auth(format!("failed to sign token assertion: {}", e)))?;

    let client = reqwest::Client::new();
    let response = client
        .post(&key.token_uri)
        .timeout(TOKEN_FETCH_TIMEOUT)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;

    if !response.status().is_success() {
        return Err(RegsyncError::Auth(format!(
            "token endpoint returned {}",
            response.status()
        )));
    }

    let token = response.json::<TokenResponse>().await?;
    Ok(token.access_token)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
