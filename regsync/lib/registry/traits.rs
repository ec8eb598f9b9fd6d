use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::{auth::Credential, reference::Reference, RegsyncResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A stream of blob bytes.
pub type BlobStream = BoxStream<'static, RegsyncResult<Bytes>>;

/// A content-addressed blob referenced by a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobDescriptor {
    /// The `algo:hex` digest of the blob.
    pub digest: String,

    /// The blob size in bytes, or -1 when unknown until streamed.
    pub size: i64,

    /// Fallback URLs to fetch the blob from when the repository itself
    /// does not serve it (foreign layers).
    pub urls: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Read access to one image reference at a registry.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// The reference this source was opened for.
    fn reference(&self) -> &Reference;

    /// Fetches the manifest addressed by the reference's tag or digest.
    /// Fails when the reference names neither.
    async fn get_manifest(&self) -> RegsyncResult<(Bytes, String)>;

    /// Fetches a manifest of the same repository by digest.
    async fn get_manifest_by_digest(&self, digest: &str) -> RegsyncResult<(Bytes, String)>;

    /// Opens a blob for streaming. Returns the stream and the size the
    /// registry reported (or -1 when unknown).
    async fn get_blob(&self, descriptor: &BlobDescriptor) -> RegsyncResult<(BlobStream, i64)>;

    /// Lists every tag of the repository, following pagination.
    async fn list_tags(&self) -> RegsyncResult<Vec<String>>;
}

/// Write access to one image reference at a registry.
#[async_trait]
pub trait ImageDestination: Send + Sync {
    /// The reference this destination was opened for.
    fn reference(&self) -> &Reference;

    /// Fetches a manifest from the destination repository: the one
    /// addressed by the opened reference, or the given tag/digest when
    /// supplied. Returns `None` when the registry does not have it.
    async fn get_manifest(
        &self,
        reference: Option<&str>,
    ) -> RegsyncResult<Option<(Bytes, String)>>;

    /// Returns true when the repository already holds the blob.
    async fn blob_exists(&self, descriptor: &BlobDescriptor) -> RegsyncResult<bool>;

    /// Uploads a blob. On success the repository holds a blob whose digest
    /// matches the descriptor bit-exactly.
    async fn put_blob(
        &self,
        stream: BlobStream,
        descriptor: &BlobDescriptor,
    ) -> RegsyncResult<()>;

    /// Publishes manifest bytes. With an `instance_digest` the manifest is
    /// stored under that digest (a slot of a list manifest) instead of the
    /// reference's own tag.
    async fn push_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        instance_digest: Option<&str>,
    ) -> RegsyncResult<()>;
}

/// Opens sources and destinations for references.
///
/// The engine goes through this factory so tests can substitute an
/// in-memory registry.
#[async_trait]
pub trait RegistryAdapter: Send + Sync {
    /// Opens read access to `reference`.
    async fn open_source(
        &self,
        reference: &Reference,
        credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageSource>>;

    /// Opens write access to `reference`.
    async fn open_destination(
        &self,
        reference: &Reference,
        credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageDestination>>;
}
