//! Credential resolution for registries and repositories.
//!
//! Credentials are keyed by registry or by `registry/prefix`; the longest
//! key that matches a repository path on a `/` boundary wins. Docker Hub
//! entries may be list-valued, in which case the resolver probes the
//! remaining pull-rate budget of each credential and picks among those with
//! budget left. Credentials for the GCR registry family using the
//! `_oauth2_` sentinel user carry a base64-encoded service-account key that
//! is exchanged for a short-lived OAuth2 access token.

mod gcp;
mod rate_limit;

use std::collections::HashMap;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};

use crate::{reference::DEFAULT_REGISTRY, utils, RegsyncResult};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use gcp::*;
pub use rate_limit::*;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The authentication information of a registry or a repository prefix.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    /// The username, or empty for anonymous access.
    #[serde(default)]
    pub username: String,

    /// The password or token secret.
    #[serde(default)]
    pub password: String,

    /// An OAuth2 identity (refresh) token accepted by the registry's token
    /// service.
    #[serde(default, rename = "identityToken")]
    pub identity_token: String,

    /// Disables TLS verification for connections using this credential.
    #[serde(default)]
    pub insecure: bool,

    /// Disables `$VAR` expansion for this entry's username and password.
    #[serde(default, rename = "disableExpandEnv")]
    pub disable_expand_env: bool,
}

/// Resolves the credential to use for a repository path.
#[derive(Debug, Default)]
pub struct AuthResolver {
    entries: HashMap<String, Vec<Credential>>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Credential {
    /// Returns true when neither a username/password pair nor an identity
    /// token is present.
    pub fn is_anonymous(&self) -> bool {
        (self.username.is_empty() || self.password.is_empty()) && self.identity_token.is_empty()
    }
}

impl AuthResolver {
    /// Creates a resolver over the given credential map.
    pub fn new(entries: HashMap<String, Vec<Credential>>) -> Self {
        Self { entries }
    }

    /// Resolves the credential for `path` (`registry/repository`).
    ///
    /// Returns `None` when no key matches; access is then anonymous.
    pub async fn resolve(&self, path: &str) -> RegsyncResult<Option<Credential>> {
        let Some((key, candidates)) = self.longest_match(path) else {
            return Ok(None);
        };

        // multi-credential entries exist for Docker Hub pull-rate spreading
        let mut credential = if candidates.len() > 1 && path.starts_with(DEFAULT_REGISTRY) {
            self.pick_by_rate_limit(path, candidates).await
        } else {
            candidates[0].clone()
        };

        if !credential.disable_expand_env {
            credential.username = utils::expand_env(&credential.username);
            credential.password = utils::expand_env(&credential.password);
        }

        let registry = path.split('/').next().unwrap_or_default();
        if is_service_account_token(registry, &credential.username) {
            tracing::info!("exchanging service account key for {} access token", registry);
            credential.password = token_from_service_account(&credential.password).await?;
            credential.username = OAUTH2_ACCESS_TOKEN_USER.to_string();
        }

        tracing::debug!("resolved credential for {} from key {}", path, key);
        Ok(Some(credential))
    }

    /// Finds the longest key that is a prefix of `path` on a `/` boundary.
    fn longest_match(&self, path: &str) -> Option<(&str, &Vec<Credential>)> {
        self.entries
            .iter()
            .filter(|(key, _)| key_matches(path, key))
            .max_by_key(|(key, _)| key.len())
            .map(|(key, credentials)| (key.as_str(), credentials))
    }

    /// Picks one of several Docker Hub credentials, preferring those whose
    /// pull-rate budget is still positive. Entries for which the registry
    /// advertises no limit are always acceptable.
    async fn pick_by_rate_limit(&self, path: &str, candidates: &[Credential]) -> Credential {
        let repository = path.split_once('/').map(|(_, rest)| rest).unwrap_or(path);

        let mut usable = Vec::new();
        for candidate in candidates {
            match check_pull_rate_limit(repository, &candidate.username, &candidate.password).await
            {
                Some(rate) if rate.remaining <= 0 => {
                    tracing::warn!(
                        "credential {} has no pull-rate budget left for {}",
                        candidate.username,
                        repository
                    );
                }
                _ => usable.push(candidate.clone()),
            }
        }

        if usable.is_empty() {
            // every entry is exhausted; fall back to a uniform pick
            usable = candidates.to_vec();
        }

        usable
            .choose(&mut rand::thread_rng())
            .cloned()
            .expect("candidate list is non-empty")
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns true when `key` matches `path` as a whole-segment prefix: the
/// key equals the path, ends in `/`, or the path continues with `/` right
/// after it.
fn key_matches(path: &str, key: &str) -> bool {
    if key.is_empty() {
        return false;
    }

    let Some(rest) = path.strip_prefix(key) else {
        return false;
    };

    rest.is_empty() || rest.starts_with('/') || key.ends_with('/')
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(entries: &[(&str, &str)]) -> AuthResolver {
        AuthResolver::new(
            entries
                .iter()
                .map(|(key, user)| {
                    (
                        key.to_string(),
                        vec![Credential {
                            username: user.to_string(),
                            password: "secret".to_string(),
                            ..Default::default()
                        }],
                    )
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_resolve_longest_prefix_wins() {
        let resolver = resolver(&[("r.io", "registry-wide"), ("r.io/a", "repo-scoped")]);

        let credential = resolver.resolve("r.io/a/b").await.unwrap().unwrap();
        assert_eq!(credential.username, "repo-scoped");
    }

    #[tokio::test]
    async fn test_resolve_requires_segment_boundary() {
        let resolver = resolver(&[("r.io/ab", "wrong")]);

        // "r.io/ab" must not match "r.io/abc"
        assert!(resolver.resolve("r.io/abc").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_exact_key_matches() {
        let resolver = resolver(&[("r.io/a/b", "exact")]);
        let credential = resolver.resolve("r.io/a/b").await.unwrap().unwrap();
        assert_eq!(credential.username, "exact");
    }

    #[tokio::test]
    async fn test_resolve_unknown_registry_is_anonymous() {
        let resolver = resolver(&[("r.io", "user")]);
        assert!(resolver.resolve("other.io/a/b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resolve_expands_environment() {
        std::env::set_var("REGSYNC_TEST_PASSWORD", "expanded");
        let resolver = AuthResolver::new(
            [(
                "r.io".to_string(),
                vec![Credential {
                    username: "user".to_string(),
                    password: "$REGSYNC_TEST_PASSWORD".to_string(),
                    ..Default::default()
                }],
            )]
            .into(),
        );

        let credential = resolver.resolve("r.io/a/b").await.unwrap().unwrap();
        assert_eq!(credential.password, "expanded");
        std::env::remove_var("REGSYNC_TEST_PASSWORD");
    }

    #[tokio::test]
    async fn test_resolve_expand_can_be_disabled() {
        std::env::set_var("REGSYNC_TEST_PASSWORD2", "expanded");
        let resolver = AuthResolver::new(
            [(
                "r.io".to_string(),
                vec![Credential {
                    username: "user".to_string(),
                    password: "$REGSYNC_TEST_PASSWORD2".to_string(),
                    disable_expand_env: true,
                    ..Default::default()
                }],
            )]
            .into(),
        );

        let credential = resolver.resolve("r.io/a/b").await.unwrap().unwrap();
        assert_eq!(credential.password, "$REGSYNC_TEST_PASSWORD2");
        std::env::remove_var("REGSYNC_TEST_PASSWORD2");
    }

    #[test]
    fn test_key_matches_boundaries() {
        assert!(key_matches("r.io/a/b", "r.io"));
        assert!(key_matches("r.io/a/b", "r.io/"));
        assert!(key_matches("r.io/a/b", "r.io/a"));
        assert!(key_matches("r.io/a/b", "r.io/a/b"));
        assert!(!key_matches("r.io/a/b", "r.io/a/bc"));
        assert!(!key_matches("r.io/abc", "r.io/ab"));
        assert!(!key_matches("r.io/a/b", ""));
    }
}
