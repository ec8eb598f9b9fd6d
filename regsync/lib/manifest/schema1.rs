use serde::{Deserialize, Serialize};

use crate::registry::BlobDescriptor;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A Docker v2 schema 1 manifest (signed or unsigned).
///
/// Schema 1 predates content-addressed configs: it carries only an
/// `architecture` string and a flat list of layer digests, with sizes
/// unknown until streamed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1Manifest {
    /// The manifest schema version; 1 for this format.
    pub schema_version: i32,

    /// The repository name the manifest was generated for.
    #[serde(default)]
    pub name: String,

    /// The tag the manifest was generated for.
    #[serde(default)]
    pub tag: String,

    /// The image architecture, the only platform field schema 1 has.
    #[serde(default)]
    pub architecture: String,

    /// The layer digests, most-recent first.
    #[serde(default)]
    pub fs_layers: Vec<Schema1FsLayer>,
}

/// One layer entry of a schema 1 manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema1FsLayer {
    /// The digest of the layer blob.
    pub blob_sum: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Schema1Manifest {
    /// Returns the distinct blobs the manifest references, in manifest
    /// order. Schema 1 repeats layer digests; duplicates are dropped.
    pub fn blobs(&self) -> Vec<BlobDescriptor> {
        let mut blobs: Vec<BlobDescriptor> = Vec::new();
        for layer in &self.fs_layers {
            if blobs.iter().any(|blob| blob.digest == layer.blob_sum) {
                continue;
            }
            blobs.push(BlobDescriptor {
                digest: layer.blob_sum.clone(),
                size: -1,
                urls: Vec::new(),
            });
        }
        blobs
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
