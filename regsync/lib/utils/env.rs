//! Utility functions for working with environment variables.

use std::sync::LazyLock;

use regex::{Captures, Regex};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable that switches the tool into periodic mode. A
/// positive integer value re-runs the whole synchronization every that many
/// seconds.
pub const SYNC_INTERVAL_ENV_VAR: &str = "DEFAULT_SYNC_INTERVAL";

/// Environment variable supplying the default destination registry used
/// when an images-file entry has an empty destination.
pub const DEFAULT_REGISTRY_ENV_VAR: &str = "DEFAULT_REGISTRY";

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}|\$([A-Za-z_][A-Za-z0-9_]*)").unwrap());

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Replaces `$VAR` and `${VAR}` occurrences with the value of the
/// corresponding environment variable. Unset variables expand to the empty
/// string.
pub fn expand_env(input: &str) -> String {
    ENV_VAR_PATTERN
        .replace_all(input, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            std::env::var(name).unwrap_or_default()
        })
        .into_owned()
}

/// Returns the configured periodic sync interval in seconds, when set to a
/// positive integer.
pub fn get_sync_interval() -> Option<u64> {
    std::env::var(SYNC_INTERVAL_ENV_VAR)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|seconds| *seconds > 0)
}

/// Returns the default destination registry, when configured.
pub fn get_default_registry() -> Option<String> {
    std::env::var(DEFAULT_REGISTRY_ENV_VAR)
        .ok()
        .filter(|value| !value.is_empty())
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_braced_and_bare() {
        std::env::set_var("REGSYNC_TEST_USER", "alice");
        assert_eq!(expand_env("$REGSYNC_TEST_USER"), "alice");
        assert_eq!(expand_env("${REGSYNC_TEST_USER}-suffix"), "alice-suffix");
        std::env::remove_var("REGSYNC_TEST_USER");
    }

    #[test]
    fn test_expand_env_unset_becomes_empty() {
        std::env::remove_var("REGSYNC_TEST_UNSET");
        assert_eq!(expand_env("a$REGSYNC_TEST_UNSET/b"), "a/b");
    }

    #[test]
    fn test_expand_env_plain_string_untouched() {
        assert_eq!(expand_env("registry.example.com/a/b"), "registry.example.com/a/b");
    }
}
