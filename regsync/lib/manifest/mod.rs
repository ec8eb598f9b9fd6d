//! Manifest parsing, platform filtering and list rewriting.
//!
//! Four wire formats are interpreted: Docker v2 schema 1 (signed or not),
//! Docker v2 schema 2, the Docker v2 manifest list and the OCI image
//! manifest/index pair. Interpreting a manifest yields the bytes to push
//! and the blobs and sub-manifests that must reach the destination first;
//! when the os/arch filter drops descriptors from a list, the list is
//! re-serialized and its digest legitimately changes.

mod filter;
mod schema1;

use futures::StreamExt;
use oci_spec::image::{ImageIndex, ImageManifest};
use serde::Deserialize;
use serde_json::Value;

use crate::{
    registry::{BlobDescriptor, ImageDestination, ImageSource},
    RegsyncError, RegsyncResult,
};

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use filter::*;
pub use schema1::*;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The MIME type for Docker v2 schema 1 manifests.
pub const MEDIA_TYPE_SCHEMA1: &str = "application/vnd.docker.distribution.manifest.v1+json";

/// The MIME type for signed Docker v2 schema 1 manifests.
pub const MEDIA_TYPE_SCHEMA1_SIGNED: &str =
    "application/vnd.docker.distribution.manifest.v1+prettyjws";

/// The MIME type for Docker v2 schema 2 manifests.
pub const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// The MIME type for Docker v2 manifest lists.
pub const MEDIA_TYPE_DOCKER_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

/// The MIME type for OCI image manifests.
pub const MEDIA_TYPE_OCI_MANIFEST: &str = "application/vnd.oci.image.manifest.v1+json";

/// The MIME type for OCI image indexes.
pub const MEDIA_TYPE_OCI_INDEX: &str = "application/vnd.oci.image.index.v1+json";

/// The manifest types negotiated with registries, in preference order.
pub const ACCEPTED_MEDIA_TYPES: &[&str] = &[
    MEDIA_TYPE_DOCKER_LIST,
    MEDIA_TYPE_OCI_INDEX,
    MEDIA_TYPE_SCHEMA2,
    MEDIA_TYPE_OCI_MANIFEST,
    MEDIA_TYPE_SCHEMA1_SIGNED,
    MEDIA_TYPE_SCHEMA1,
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A manifest parsed from one of the supported wire formats.
#[derive(Debug, Clone)]
pub enum ManifestVariant {
    /// Docker v2 schema 1, signed or unsigned.
    SchemaV1(Schema1Manifest),

    /// Docker v2 schema 2.
    SchemaV2(ImageManifest),

    /// Docker v2 manifest list.
    DockerList(ImageIndex),

    /// OCI image manifest.
    OciManifest(ImageManifest),

    /// OCI image index.
    OciIndex(ImageIndex),
}

/// What must be synchronized for one interpreted manifest.
#[derive(Debug)]
pub struct ManifestOutcome {
    /// The bytes to publish at the destination. Identical to the source
    /// bytes unless filtering dropped list descriptors, in which case this
    /// is the re-serialized list (with a new digest).
    pub bytes: Vec<u8>,

    /// The media type of `bytes`.
    pub media_type: String,

    /// The blobs referenced by a non-list manifest (layers, then config).
    pub blobs: Vec<BlobDescriptor>,

    /// The kept entries of a list manifest, in descriptor order.
    pub sub_manifests: Vec<SubManifest>,
}

/// One kept entry of a list manifest.
#[derive(Debug)]
pub struct SubManifest {
    /// The digest of the sub-manifest, unchanged from the source list.
    pub digest: String,

    /// The sub-manifest bytes as fetched from the source.
    pub bytes: Vec<u8>,

    /// The media type of the sub-manifest.
    pub media_type: String,

    /// The blobs the sub-manifest references.
    pub blobs: Vec<BlobDescriptor>,
}

/// The platform fields of an image config blob, where Docker v2 schema 2
/// keeps them.
#[derive(Debug, Deserialize)]
struct ConfigPlatform {
    #[serde(default)]
    os: String,

    #[serde(default)]
    architecture: String,

    #[serde(default)]
    variant: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ManifestVariant {
    /// Returns true for the two list formats.
    pub fn is_list(&self) -> bool {
        matches!(self, Self::DockerList(_) | Self::OciIndex(_))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Parses manifest bytes according to their media type. An empty media
/// type is sniffed from the payload.
pub fn parse_manifest(bytes: &[u8], media_type: &str) -> RegsyncResult<ManifestVariant> {
    let media_type = if media_type.is_empty() {
        sniff_media_type(bytes)?
    } else {
        media_type.to_string()
    };

    match media_type.as_str() {
        MEDIA_TYPE_SCHEMA1 | MEDIA_TYPE_SCHEMA1_SIGNED => {
            Ok(ManifestVariant::SchemaV1(decode(bytes)?))
        }
        MEDIA_TYPE_SCHEMA2 => Ok(ManifestVariant::SchemaV2(decode(bytes)?)),
        MEDIA_TYPE_DOCKER_LIST => Ok(ManifestVariant::DockerList(decode(bytes)?)),
        MEDIA_TYPE_OCI_MANIFEST => Ok(ManifestVariant::OciManifest(decode(bytes)?)),
        MEDIA_TYPE_OCI_INDEX => Ok(ManifestVariant::OciIndex(decode(bytes)?)),
        other => Err(RegsyncError::ManifestParse(format!(
            "unsupported manifest type: {}",
            other
        ))),
    }
}

/// Determines the media type of manifest bytes from the payload itself:
/// the embedded `mediaType` field when present, the structure otherwise.
pub fn sniff_media_type(bytes: &[u8]) -> RegsyncResult<String> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| RegsyncError::ManifestParse(format!("manifest is not JSON: {}", e)))?;

    if let Some(media_type) = value.get("mediaType").and_then(Value::as_str) {
        return Ok(media_type.to_string());
    }

    if value.get("manifests").is_some() {
        Ok(MEDIA_TYPE_OCI_INDEX.to_string())
    } else if value.get("fsLayers").is_some() {
        Ok(MEDIA_TYPE_SCHEMA1.to_string())
    } else {
        Ok(MEDIA_TYPE_OCI_MANIFEST.to_string())
    }
}

/// Interprets manifest bytes under the platform filter.
///
/// Returns `None` when the filter drops the whole image. For list types
/// every kept descriptor's sub-manifest is fetched from the source and the
/// list is rewritten when at least one descriptor was dropped.
pub async fn interpret_manifest(
    source: &dyn ImageSource,
    bytes: &[u8],
    media_type: &str,
    filter: &PlatformFilter,
) -> RegsyncResult<Option<ManifestOutcome>> {
    let media_type = if media_type.is_empty() {
        sniff_media_type(bytes)?
    } else {
        media_type.to_string()
    };

    match parse_manifest(bytes, &media_type)? {
        ManifestVariant::SchemaV1(manifest) => {
            if !filter.matches_arch_only(&manifest.architecture) {
                return Ok(None);
            }

            Ok(Some(ManifestOutcome {
                bytes: bytes.to_vec(),
                media_type,
                blobs: manifest.blobs(),
                sub_manifests: Vec::new(),
            }))
        }

        ManifestVariant::SchemaV2(manifest) => {
            // the platform of a schema 2 image lives in its config blob
            if !filter.is_empty() {
                let config = fetch_config(source, manifest.config()).await?;
                let platform: ConfigPlatform = serde_json::from_slice(&config).map_err(|e| {
                    RegsyncError::ManifestParse(format!("invalid image config: {}", e))
                })?;
                if !filter.matches(
                    &platform.os,
                    "",
                    &platform.architecture,
                    &platform.variant,
                ) {
                    return Ok(None);
                }
            }

            Ok(Some(ManifestOutcome {
                bytes: bytes.to_vec(),
                media_type,
                blobs: image_manifest_blobs(&manifest),
                sub_manifests: Vec::new(),
            }))
        }

        // OCI image manifests carry no source-side platform to filter on
        ManifestVariant::OciManifest(manifest) => Ok(Some(ManifestOutcome {
            bytes: bytes.to_vec(),
            media_type,
            blobs: image_manifest_blobs(&manifest),
            sub_manifests: Vec::new(),
        })),

        ManifestVariant::DockerList(index) | ManifestVariant::OciIndex(index) => {
            interpret_list(source, bytes, media_type, filter, index).await
        }
    }
}

/// Interprets a manifest list or image index: filters descriptors, fetches
/// kept sub-manifests and rewrites the list when descriptors were dropped.
async fn interpret_list(
    source: &dyn ImageSource,
    bytes: &[u8],
    media_type: String,
    filter: &PlatformFilter,
    index: ImageIndex,
) -> RegsyncResult<Option<ManifestOutcome>> {
    let value: Value = serde_json::from_slice(bytes)
        .map_err(|e| RegsyncError::ManifestParse(format!("manifest is not JSON: {}", e)))?;
    let entries = value
        .get("manifests")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut kept_entries = Vec::new();
    let mut sub_manifests = Vec::new();

    for (position, descriptor) in index.manifests().iter().enumerate() {
        if !filter.matches_platform(descriptor.platform().as_ref()) {
            continue;
        }

        let digest = descriptor.digest().to_string();
        let (sub_bytes, sub_type) = source.get_manifest_by_digest(&digest).await?;

        let blobs = match parse_manifest(&sub_bytes, &sub_type)? {
            ManifestVariant::SchemaV1(manifest) => manifest.blobs(),
            ManifestVariant::SchemaV2(manifest) | ManifestVariant::OciManifest(manifest) => {
                image_manifest_blobs(&manifest)
            }
            variant if variant.is_list() => {
                return Err(RegsyncError::ManifestParse(format!(
                    "nested manifest list {} is not supported",
                    digest
                )));
            }
            _ => unreachable!("non-list variants handled above"),
        };

        if let Some(entry) = entries.get(position) {
            kept_entries.push(entry.clone());
        }
        sub_manifests.push(SubManifest {
            digest,
            bytes: sub_bytes.to_vec(),
            media_type: resolve_sub_media_type(&sub_bytes, &sub_type)?,
            blobs,
        });
    }

    if sub_manifests.is_empty() {
        return Ok(None);
    }

    let bytes = if sub_manifests.len() == index.manifests().len() {
        bytes.to_vec()
    } else {
        rewrite_list(value, kept_entries)?
    };

    Ok(Some(ManifestOutcome {
        bytes,
        media_type,
        blobs: Vec::new(),
        sub_manifests,
    }))
}

/// Replaces the `manifests` array of a list payload and re-serializes it.
/// The result parses back to the same logical structure minus the dropped
/// descriptors; its digest differs from the source's, which is expected
/// for a filtered list.
fn rewrite_list(mut value: Value, kept_entries: Vec<Value>) -> RegsyncResult<Vec<u8>> {
    match value.get_mut("manifests") {
        Some(manifests) => *manifests = Value::Array(kept_entries),
        None => {
            return Err(RegsyncError::ManifestParse(
                "list manifest has no manifests array".into(),
            ))
        }
    }

    Ok(serde_json::to_vec(&value)?)
}

/// Checks whether the destination already holds a manifest identical to
/// `bytes`, comparing the JSON payloads structurally. For list manifests
/// every referenced sub-digest must additionally exist at the destination.
pub async fn destination_manifest_unchanged(
    destination: &dyn ImageDestination,
    bytes: &[u8],
    sub_digests: &[String],
) -> RegsyncResult<bool> {
    let Some((existing, _)) = destination.get_manifest(None).await? else {
        return Ok(false);
    };

    let Result::Ok(ours) = serde_json::from_slice::<Value>(bytes) else {
        return Ok(false);
    };
    let Result::Ok(theirs) = serde_json::from_slice::<Value>(&existing) else {
        return Ok(false);
    };
    if ours != theirs {
        return Ok(false);
    }

    for digest in sub_digests {
        if destination.get_manifest(Some(digest)).await?.is_none() {
            return Ok(false);
        }
    }

    Ok(true)
}

/// Returns the distinct blobs of an image manifest: its layers in order,
/// then the config blob.
pub fn image_manifest_blobs(manifest: &ImageManifest) -> Vec<BlobDescriptor> {
    let mut blobs: Vec<BlobDescriptor> = Vec::new();

    for layer in manifest.layers() {
        let digest = layer.digest().to_string();
        if blobs.iter().any(|blob| blob.digest == digest) {
            continue;
        }
        blobs.push(BlobDescriptor {
            digest,
            size: layer.size() as i64,
            urls: layer.urls().clone().unwrap_or_default(),
        });
    }

    let config_digest = manifest.config().digest().to_string();
    if !blobs.iter().any(|blob| blob.digest == config_digest) {
        blobs.push(BlobDescriptor {
            digest: config_digest,
            size: manifest.config().size() as i64,
            urls: manifest.config().urls().clone().unwrap_or_default(),
        });
    }

    blobs
}

/// Streams a config blob into memory.
async fn fetch_config(
    source: &dyn ImageSource,
    descriptor: &oci_spec::image::Descriptor,
) -> RegsyncResult<Vec<u8>> {
    let blob = BlobDescriptor {
        digest: descriptor.digest().to_string(),
        size: descriptor.size() as i64,
        urls: descriptor.urls().clone().unwrap_or_default(),
    };

    let (mut stream, _) = source.get_blob(&blob).await?;
    let mut buffer = Vec::new();
    while let Some(chunk) = stream.next().await {
        buffer.extend_from_slice(&chunk?);
    }

    Ok(buffer)
}

/// Normalizes the media type reported for a sub-manifest, sniffing the
/// payload when the registry omitted it.
fn resolve_sub_media_type(bytes: &[u8], media_type: &str) -> RegsyncResult<String> {
    if media_type.is_empty() {
        sniff_media_type(bytes)
    } else {
        Ok(media_type.to_string())
    }
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> RegsyncResult<T> {
    serde_json::from_slice(bytes)
        .map_err(|e| RegsyncError::ManifestParse(format!("invalid manifest payload: {}", e)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
