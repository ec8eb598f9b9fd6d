//! End-to-end engine tests against an in-memory registry.
//!
//! The fake registry implements the adapter traits the engine runs on and
//! enforces what real registries enforce: a manifest can only be published
//! once every blob and sub-manifest it references is present, and an
//! uploaded blob must match its declared digest.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream;
use sha2::{Digest as _, Sha256};

use regsync::{
    auth::Credential,
    config::Config,
    reference::Reference,
    registry::{
        BlobDescriptor, BlobStream, ImageDestination, ImageSource, RegistryAdapter,
    },
    sync::{SyncClient, SyncOptions},
    RegsyncError, RegsyncResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const MEDIA_TYPE_SCHEMA2: &str = "application/vnd.docker.distribution.manifest.v2+json";
const MEDIA_TYPE_DOCKER_LIST: &str =
    "application/vnd.docker.distribution.manifest.list.v2+json";

//--------------------------------------------------------------------------------------------------
// Fake registry
//--------------------------------------------------------------------------------------------------

#[derive(Default)]
struct FakeState {
    /// repo path -> digest -> blob bytes
    blobs: HashMap<String, HashMap<String, Vec<u8>>>,

    /// repo path -> tag-or-digest -> (bytes, media type)
    manifests: HashMap<String, HashMap<String, (Vec<u8>, String)>>,

    /// repo path -> tags, in registry order
    tags: HashMap<String, Vec<String>>,
}

#[derive(Default)]
struct FakeRegistry {
    state: Mutex<FakeState>,

    blob_puts: AtomicUsize,
    manifest_puts: AtomicUsize,

    /// digest -> number of times the next uploads of it should fail
    inject_blob_failures: Mutex<HashMap<String, usize>>,

    /// digest -> successful upload count
    blob_put_successes: Mutex<HashMap<String, usize>>,
}

impl FakeRegistry {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn seed_blob(&self, repo: &str, bytes: &[u8]) -> String {
        let digest = sha256_of(bytes);
        self.state
            .lock()
            .unwrap()
            .blobs
            .entry(repo.to_string())
            .or_default()
            .insert(digest.clone(), bytes.to_vec());
        digest
    }

    fn seed_manifest(&self, repo: &str, reference: &str, bytes: &[u8], media_type: &str) {
        let digest = sha256_of(bytes);
        let mut state = self.state.lock().unwrap();
        let manifests = state.manifests.entry(repo.to_string()).or_default();
        manifests.insert(reference.to_string(), (bytes.to_vec(), media_type.to_string()));
        manifests.insert(digest, (bytes.to_vec(), media_type.to_string()));
        if !reference.starts_with("sha256:") {
            let tags = state.tags.entry(repo.to_string()).or_default();
            if !tags.iter().any(|t| t == reference) {
                tags.push(reference.to_string());
            }
        }
    }

    fn fail_next_blob_put(&self, digest: &str, times: usize) {
        self.inject_blob_failures
            .lock()
            .unwrap()
            .insert(digest.to_string(), times);
    }

    fn manifest(&self, repo: &str, reference: &str) -> Option<(Vec<u8>, String)> {
        self.state
            .lock()
            .unwrap()
            .manifests
            .get(repo)
            .and_then(|m| m.get(reference))
            .cloned()
    }

    fn has_blob(&self, repo: &str, digest: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .blobs
            .get(repo)
            .is_some_and(|blobs| blobs.contains_key(digest))
    }

    fn successful_puts_of(&self, digest: &str) -> usize {
        self.blob_put_successes
            .lock()
            .unwrap()
            .get(digest)
            .copied()
            .unwrap_or(0)
    }

    /// The digests a manifest payload requires to be present before it may
    /// be published: blobs for image manifests, sub-manifests for lists.
    fn required_references(bytes: &[u8]) -> (Vec<String>, Vec<String>) {
        let value: serde_json::Value = serde_json::from_slice(bytes).unwrap();

        if let Some(manifests) = value.get("manifests").and_then(|v| v.as_array()) {
            let subs = manifests
                .iter()
                .filter_map(|m| m.get("digest").and_then(|d| d.as_str()))
                .map(str::to_string)
                .collect();
            return (Vec::new(), subs);
        }

        let mut blobs = Vec::new();
        if let Some(layers) = value.get("layers").and_then(|v| v.as_array()) {
            blobs.extend(
                layers
                    .iter()
                    .filter_map(|l| l.get("digest").and_then(|d| d.as_str()))
                    .map(str::to_string),
            );
        }
        if let Some(config) = value.get("config").and_then(|c| c.get("digest")) {
            blobs.extend(config.as_str().map(str::to_string));
        }
        (blobs, Vec::new())
    }
}

struct FakeHandle {
    registry: Arc<FakeRegistry>,
    reference: Reference,
}

impl FakeHandle {
    fn repo(&self) -> String {
        self.reference.path()
    }
}

#[async_trait]
impl ImageSource for FakeHandle {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn get_manifest(&self) -> RegsyncResult<(Bytes, String)> {
        let reference = self.reference.tag_or_digest().ok_or_else(|| {
            RegsyncError::ImageReference("source reference has no tag or digest".into())
        })?;
        self.get_manifest_by_digest(&reference).await
    }

    async fn get_manifest_by_digest(&self, digest: &str) -> RegsyncResult<(Bytes, String)> {
        self.registry
            .manifest(&self.repo(), digest)
            .map(|(bytes, media_type)| (Bytes::from(bytes), media_type))
            .ok_or_else(|| RegsyncError::NotFound(format!("{}/{}", self.repo(), digest)))
    }

    async fn get_blob(&self, descriptor: &BlobDescriptor) -> RegsyncResult<(BlobStream, i64)> {
        let bytes = self
            .registry
            .state
            .lock()
            .unwrap()
            .blobs
            .get(&self.repo())
            .and_then(|blobs| blobs.get(&descriptor.digest))
            .cloned()
            .ok_or_else(|| RegsyncError::NotFound(descriptor.digest.clone()))?;

        let size = bytes.len() as i64;
        let chunks = vec![regsync::Ok(Bytes::from(bytes))];
        Ok((Box::pin(stream::iter(chunks)), size))
    }

    async fn list_tags(&self) -> RegsyncResult<Vec<String>> {
        Ok(self
            .registry
            .state
            .lock()
            .unwrap()
            .tags
            .get(&self.repo())
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ImageDestination for FakeHandle {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn get_manifest(
        &self,
        reference: Option<&str>,
    ) -> RegsyncResult<Option<(Bytes, String)>> {
        let reference = match reference {
            Some(reference) => reference.to_string(),
            None => match self.reference.tag_or_digest() {
                Some(reference) => reference,
                None => return Ok(None),
            },
        };

        Ok(self
            .registry
            .manifest(&self.repo(), &reference)
            .map(|(bytes, media_type)| (Bytes::from(bytes), media_type)))
    }

    async fn blob_exists(&self, descriptor: &BlobDescriptor) -> RegsyncResult<bool> {
        Ok(self.registry.has_blob(&self.repo(), &descriptor.digest))
    }

    async fn put_blob(
        &self,
        mut stream: BlobStream,
        descriptor: &BlobDescriptor,
    ) -> RegsyncResult<()> {
        use futures::StreamExt;

        self.registry.blob_puts.fetch_add(1, Ordering::SeqCst);

        if let Some(remaining) = self
            .registry
            .inject_blob_failures
            .lock()
            .unwrap()
            .get_mut(&descriptor.digest)
        {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(RegsyncError::Registry {
                    status: 500,
                    message: "injected transient failure".into(),
                });
            }
        }

        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            bytes.extend_from_slice(&chunk?);
        }

        let actual = sha256_of(&bytes);
        if actual != descriptor.digest {
            return Err(RegsyncError::BlobDigestMismatch {
                expected: descriptor.digest.clone(),
                actual,
            });
        }

        self.registry
            .state
            .lock()
            .unwrap()
            .blobs
            .entry(self.repo())
            .or_default()
            .insert(descriptor.digest.clone(), bytes);
        *self
            .registry
            .blob_put_successes
            .lock()
            .unwrap()
            .entry(descriptor.digest.clone())
            .or_default() += 1;

        Ok(())
    }

    async fn push_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        instance_digest: Option<&str>,
    ) -> RegsyncResult<()> {
        self.registry.manifest_puts.fetch_add(1, Ordering::SeqCst);

        // a registry rejects manifests whose references are not yet present
        let (required_blobs, required_subs) = FakeRegistry::required_references(bytes);
        for digest in &required_blobs {
            if !self.registry.has_blob(&self.repo(), digest) {
                return Err(RegsyncError::Registry {
                    status: 400,
                    message: format!("manifest references missing blob {}", digest),
                });
            }
        }
        for digest in &required_subs {
            if self.registry.manifest(&self.repo(), digest).is_none() {
                return Err(RegsyncError::Registry {
                    status: 400,
                    message: format!("manifest references missing sub-manifest {}", digest),
                });
            }
        }

        let reference = match instance_digest {
            Some(digest) => digest.to_string(),
            None => self
                .reference
                .tag_or_digest()
                .expect("destination reference has a tag"),
        };

        self.registry
            .seed_manifest(&self.repo(), &reference, bytes, media_type);
        Ok(())
    }
}

struct FakeAdapter {
    registry: Arc<FakeRegistry>,
}

#[async_trait]
impl RegistryAdapter for FakeAdapter {
    async fn open_source(
        &self,
        reference: &Reference,
        _credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageSource>> {
        Ok(Arc::new(FakeHandle {
            registry: self.registry.clone(),
            reference: reference.clone(),
        }))
    }

    async fn open_destination(
        &self,
        reference: &Reference,
        _credential: Option<Credential>,
    ) -> RegsyncResult<Arc<dyn ImageDestination>> {
        Ok(Arc::new(FakeHandle {
            registry: self.registry.clone(),
            reference: reference.clone(),
        }))
    }
}

//--------------------------------------------------------------------------------------------------
// Helpers
//--------------------------------------------------------------------------------------------------

fn sha256_of(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

fn image_manifest(config_digest: &str, layer_digests: &[String]) -> Vec<u8> {
    let layers = layer_digests
        .iter()
        .map(|digest| {
            serde_json::json!({
                "mediaType": "application/vnd.docker.image.rootfs.diff.tar.gzip",
                "size": 123,
                "digest": digest,
            })
        })
        .collect::<Vec<_>>();

    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_SCHEMA2,
        "config": {
            "mediaType": "application/vnd.docker.container.image.v1+json",
            "size": 7,
            "digest": config_digest,
        },
        "layers": layers,
    }))
    .unwrap()
}

fn list_manifest(descriptors: &[(String, &str, &str)]) -> Vec<u8> {
    let manifests = descriptors
        .iter()
        .map(|(digest, os, arch)| {
            serde_json::json!({
                "mediaType": MEDIA_TYPE_SCHEMA2,
                "size": 321,
                "digest": digest,
                "platform": {"os": os, "architecture": arch},
            })
        })
        .collect::<Vec<_>>();

    serde_json::to_vec(&serde_json::json!({
        "schemaVersion": 2,
        "mediaType": MEDIA_TYPE_DOCKER_LIST,
        "manifests": manifests,
    }))
    .unwrap()
}

/// Seeds a schema 2 image with `layers` distinct layers plus a config blob
/// and publishes it under `tag`. Returns every blob digest.
fn seed_image(
    registry: &FakeRegistry,
    repo: &str,
    tag: &str,
    layers: usize,
    seed: u8,
) -> Vec<String> {
    let mut digests = Vec::new();
    for index in 0..layers {
        let mut bytes = vec![seed, index as u8];
        bytes.resize(32, 0xAB);
        digests.push(registry.seed_blob(repo, &bytes));
    }
    let config = format!("{{\"os\": \"linux\", \"architecture\": \"amd64\", \"seed\": {}}}", seed);
    let config_digest = registry.seed_blob(repo, config.as_bytes());

    let manifest = image_manifest(&config_digest, &digests);
    registry.seed_manifest(repo, tag, &manifest, MEDIA_TYPE_SCHEMA2);

    digests.push(config_digest);
    digests
}

fn client_for(
    registry: &Arc<FakeRegistry>,
    images: &[(&str, &str)],
    options: SyncOptions,
) -> SyncClient {
    let images = images
        .iter()
        .map(|(source, destination)| {
            (source.to_string(), vec![destination.to_string()])
        })
        .collect::<BTreeMap<_, _>>();

    let config = Config {
        auth: HashMap::new(),
        images,
        default_registry: None,
    };

    SyncClient::with_adapter(
        config,
        options,
        Arc::new(FakeAdapter {
            registry: registry.clone(),
        }),
    )
}

fn options() -> SyncOptions {
    SyncOptions {
        worker_count: 3,
        retries: 2,
        ..Default::default()
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_sync_single_tag_copy() {
    let registry = FakeRegistry::new();
    seed_image(&registry, "r1.example/a/b", "v1", 3, 1);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();

    // 3 layers + config uploaded, one manifest push
    assert_eq!(registry.blob_puts.load(Ordering::SeqCst), 4);
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 1);

    let (source_bytes, _) = registry.manifest("r1.example/a/b", "v1").unwrap();
    let (dest_bytes, media_type) = registry.manifest("r2.example/a/b", "v1").unwrap();
    assert_eq!(source_bytes, dest_bytes);
    assert_eq!(media_type, MEDIA_TYPE_SCHEMA2);

    let recorded = client.successful_images().snapshot();
    assert_eq!(
        recorded.get("r1.example/a/b:v1").unwrap(),
        &vec!["r2.example/a/b:v1".to_string()]
    );
}

#[test_log::test(tokio::test)]
async fn test_sync_partial_overlap_uploads_missing_blobs_only() {
    let registry = FakeRegistry::new();
    let digests = seed_image(&registry, "r1.example/a/b", "v1", 3, 2);

    // destination already holds two of the four blobs
    for digest in digests.iter().take(2) {
        let bytes = registry
            .state
            .lock()
            .unwrap()
            .blobs
            .get("r1.example/a/b")
            .unwrap()
            .get(digest)
            .cloned()
            .unwrap();
        registry.seed_blob("r2.example/a/b", &bytes);
    }

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();

    assert_eq!(registry.blob_puts.load(Ordering::SeqCst), 2);
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_sync_unchanged_destination_is_skipped() {
    let registry = FakeRegistry::new();
    seed_image(&registry, "r1.example/a/b", "v1", 3, 3);

    // mirror the image to the destination byte-for-byte
    let (manifest, media_type) = registry.manifest("r1.example/a/b", "v1").unwrap();
    let blobs = registry
        .state
        .lock()
        .unwrap()
        .blobs
        .get("r1.example/a/b")
        .cloned()
        .unwrap();
    for bytes in blobs.values() {
        registry.seed_blob("r2.example/a/b", bytes);
    }
    registry.seed_manifest("r2.example/a/b", "v1", &manifest, &media_type);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();

    assert_eq!(registry.blob_puts.load(Ordering::SeqCst), 0);
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 0);

    // the skip still counts as an observed success
    assert!(client
        .successful_images()
        .query("r1.example/a/b:v1", "r2.example/a/b:v1"));
}

#[test_log::test(tokio::test)]
async fn test_sync_idempotent_second_run_moves_nothing() {
    let registry = FakeRegistry::new();
    seed_image(&registry, "r1.example/a/b", "v1", 2, 4);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();
    let puts_after_first = registry.blob_puts.load(Ordering::SeqCst);
    assert!(puts_after_first > 0);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();

    assert_eq!(registry.blob_puts.load(Ordering::SeqCst), puts_after_first);
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 1);
}

#[test_log::test(tokio::test)]
async fn test_sync_multi_arch_filter_rewrites_list() {
    let registry = FakeRegistry::new();
    let repo = "r1.example/multi/img";

    // three platform images published by digest only
    let amd64 = seed_image(&registry, repo, "ignored-amd64", 2, 10);
    let arm64 = seed_image(&registry, repo, "ignored-arm64", 2, 11);
    let windows = seed_image(&registry, repo, "ignored-windows", 2, 12);

    let digest_of_tag = |tag: &str| {
        let (bytes, _) = registry.manifest(repo, tag).unwrap();
        sha256_of(&bytes)
    };

    let list = list_manifest(&[
        (digest_of_tag("ignored-amd64"), "linux", "amd64"),
        (digest_of_tag("ignored-arm64"), "linux", "arm64"),
        (digest_of_tag("ignored-windows"), "windows", "amd64"),
    ]);
    registry.seed_manifest(repo, "latest", &list, MEDIA_TYPE_DOCKER_LIST);

    let mut opts = options();
    opts.os_filter = vec!["linux".to_string()];
    opts.arch_filter = vec!["amd64".to_string()];

    let client = client_for(
        &registry,
        &[("r1.example/multi/img:latest", "r2.example/multi/img:latest")],
        opts,
    );
    client.run().await.unwrap();

    // only the linux/amd64 image's blobs crossed over
    assert_eq!(registry.blob_puts.load(Ordering::SeqCst), 3);
    for digest in &amd64 {
        assert!(registry.has_blob("r2.example/multi/img", digest));
    }
    for digest in arm64.iter().chain(&windows) {
        assert!(!registry.has_blob("r2.example/multi/img", digest));
    }

    // the pushed list was re-serialized with exactly one descriptor
    let (dest_list, media_type) = registry.manifest("r2.example/multi/img", "latest").unwrap();
    assert_ne!(dest_list, list);
    assert_eq!(media_type, MEDIA_TYPE_DOCKER_LIST);

    let value: serde_json::Value = serde_json::from_slice(&dest_list).unwrap();
    let descriptors = value.get("manifests").unwrap().as_array().unwrap();
    assert_eq!(descriptors.len(), 1);
    assert_eq!(
        descriptors[0].get("digest").unwrap().as_str().unwrap(),
        digest_of_tag("ignored-amd64")
    );

    // the kept sub-manifest exists at the destination under its digest
    assert!(registry
        .manifest("r2.example/multi/img", &digest_of_tag("ignored-amd64"))
        .is_some());
}

#[test_log::test(tokio::test)]
async fn test_sync_tag_regex_selects_matching_tags() {
    let registry = FakeRegistry::new();
    let repo = "r1.example/x";
    seed_image(&registry, repo, "v1.0", 1, 20);
    seed_image(&registry, repo, "v1.1", 1, 21);
    seed_image(&registry, repo, "v2.0", 1, 22);

    let client = client_for(
        &registry,
        &[(r"r1.example/x:/v1\./", "r2.example/x")],
        options(),
    );
    client.run().await.unwrap();

    assert!(registry.manifest("r2.example/x", "v1.0").is_some());
    assert!(registry.manifest("r2.example/x", "v1.1").is_some());
    assert!(registry.manifest("r2.example/x", "v2.0").is_none());
}

#[test_log::test(tokio::test)]
async fn test_sync_retry_recovers_from_transient_failure() {
    let registry = FakeRegistry::new();
    let digests = seed_image(&registry, "r1.example/a/b", "v1", 3, 30);

    // the first upload of one layer fails with a 500
    registry.fail_next_blob_put(&digests[0], 1);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();

    // uploaded exactly once successfully despite the failed attempt
    assert_eq!(registry.successful_puts_of(&digests[0]), 1);
    assert!(registry.has_blob("r2.example/a/b", &digests[0]));
    assert!(registry.manifest("r2.example/a/b", "v1").is_some());
}

#[test_log::test(tokio::test)]
async fn test_sync_exhausted_retries_reports_failure() {
    let registry = FakeRegistry::new();
    let digests = seed_image(&registry, "r1.example/a/b", "v1", 1, 40);

    // more failures than the run has passes
    registry.fail_next_blob_put(&digests[0], 10);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    let err = client.run().await.unwrap_err();
    assert!(matches!(err, RegsyncError::TasksFailed(_)));

    assert!(!registry.has_blob("r2.example/a/b", &digests[0]));
    assert!(registry.manifest("r2.example/a/b", "v1").is_none());
}

#[test_log::test(tokio::test)]
async fn test_sync_whole_repository_without_tag() {
    let registry = FakeRegistry::new();
    let repo = "r1.example/all/tags";
    seed_image(&registry, repo, "a", 1, 50);
    seed_image(&registry, repo, "b", 1, 51);

    let client = client_for(
        &registry,
        &[("r1.example/all/tags", "r2.example/all/tags")],
        options(),
    );
    client.run().await.unwrap();

    assert!(registry.manifest("r2.example/all/tags", "a").is_some());
    assert!(registry.manifest("r2.example/all/tags", "b").is_some());
}

#[test_log::test(tokio::test)]
async fn test_sync_force_update_pushes_unchanged_manifest() {
    let registry = FakeRegistry::new();
    seed_image(&registry, "r1.example/a/b", "v1", 1, 60);

    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        options(),
    );
    client.run().await.unwrap();
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 1);

    let mut opts = options();
    opts.force_update = true;
    let client = client_for(
        &registry,
        &[("r1.example/a/b:v1", "r2.example/a/b:v1")],
        opts,
    );
    client.run().await.unwrap();

    // change detection bypassed: the manifest was pushed again
    assert_eq!(registry.manifest_puts.load(Ordering::SeqCst), 2);
}
