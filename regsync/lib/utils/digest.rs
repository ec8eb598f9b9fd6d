//! Digest helpers for manifest and blob content.

use sha2::{Digest as _, Sha256};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Computes the canonical `sha256:<hex>` digest of the given bytes.
///
/// Used to address re-serialized list manifests and to name sub-manifest
/// pushes; matches what a registry computes over the same payload.
pub fn sha256_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
