use bytes::Bytes;
use reqwest::{Method, StatusCode};

use crate::{
    auth::Credential,
    manifest::ACCEPTED_MEDIA_TYPES,
    reference::Reference,
    registry::client::{response_error, PROBE_TIMEOUT, REQUEST_TIMEOUT},
    RegsyncError, RegsyncResult,
};

use super::{BlobDescriptor, BlobStream, ImageDestination, RegistryClient};
use async_trait::async_trait;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Write access to one image reference over the registry HTTP API v2.
///
/// Blob uploads use the monolithic POST-then-PUT flow; manifests are
/// published by tag, or by digest when they fill a slot of a list
/// manifest.
#[derive(Debug)]
pub struct HttpImageDestination {
    reference: Reference,
    client: RegistryClient,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HttpImageDestination {
    /// Opens a destination for `reference` with pull and push scope.
    pub fn new(reference: Reference, credential: Option<Credential>) -> RegsyncResult<Self> {
        let client = RegistryClient::new(
            reference.get_registry(),
            reference.get_repository(),
            credential,
            "pull,push",
        )?;

        Ok(Self { reference, client })
    }

    /// Starts a blob upload session, returning the upload location.
    async fn start_upload(&self) -> RegsyncResult<String> {
        let path = format!("/v2/{}/blobs/uploads/", self.client.repository());
        let response = self
            .client
            .request(Method::POST, &path)
            .await?
            .timeout(REQUEST_TIMEOUT)
            .header(reqwest::header::CONTENT_LENGTH, 0)
            .send()
            .await?;

        if response.status() != StatusCode::ACCEPTED {
            return Err(response_error(response).await);
        }

        response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| RegsyncError::Registry {
                status: StatusCode::ACCEPTED.as_u16(),
                message: "upload session carries no Location header".into(),
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ImageDestination for HttpImageDestination {
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

        let path = format!(
            "/v2/{}/manifests/{}",
            self.client.repository(),
            reference
        );
        let response = self
            .client
            .request(Method::GET, &path)
            .await?
            .timeout(REQUEST_TIMEOUT)
            .header(reqwest::header::ACCEPT, ACCEPTED_MEDIA_TYPES.join(", "))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let media_type = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let bytes = response.bytes().await?;
                Ok(Some((bytes, media_type)))
            }
            _ => Err(response_error(response).await),
        }
    }

    async fn blob_exists(&self, descriptor: &BlobDescriptor) -> RegsyncResult<bool> {
        let path = format!(
            "/v2/{}/blobs/{}",
            self.client.repository(),
            descriptor.digest
        );
        let response = self
            .client
            .request(Method::HEAD, &path)
            .await?
            .timeout(PROBE_TIMEOUT)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(response_error(response).await),
        }
    }

    async fn put_blob(
        &self,
        stream: BlobStream,
        descriptor: &BlobDescriptor,
    ) -> RegsyncResult<()> {
        let location = self.start_upload().await?;
        let separator = if location.contains('?') { '&' } else { '?' };
        let url = format!("{}{}digest={}", location, separator, descriptor.digest);

        let mut request = self
            .client
            .raw_request(Method::PUT, &url)
            .await?
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(stream));
        if descriptor.size >= 0 {
            request = request.header(reqwest::header::CONTENT_LENGTH, descriptor.size);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        Ok(())
    }

    async fn push_manifest(
        &self,
        bytes: &[u8],
        media_type: &str,
        instance_digest: Option<&str>,
    ) -> RegsyncResult<()> {
        let reference = match instance_digest {
            Some(digest) => digest.to_string(),
            None => self.reference.tag_or_digest().ok_or_else(|| {
                RegsyncError::ImageReference(format!(
                    "cannot push a manifest to {} without a tag or digest",
                    self.reference
                ))
            })?,
        };

        let path = format!(
            "/v2/{}/manifests/{}",
            self.client.repository(),
            reference
        );
        let response = self
            .client
            .request(Method::PUT, &path)
            .await?
            .timeout(REQUEST_TIMEOUT)
            .header(reqwest::header::CONTENT_TYPE, media_type)
            .body(bytes.to_vec())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        Ok(())
    }
}
