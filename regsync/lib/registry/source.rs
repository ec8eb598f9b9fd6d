use bytes::Bytes;
use futures::StreamExt;
use reqwest::{Method, StatusCode};
use serde::Deserialize;

use crate::{
    auth::Credential,
    manifest::ACCEPTED_MEDIA_TYPES,
    reference::{Reference, ReferenceSelector},
    registry::client::{response_error, REQUEST_TIMEOUT},
    RegsyncError, RegsyncResult,
};

use super::{BlobDescriptor, BlobStream, ImageSource, RegistryClient};
use async_trait::async_trait;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Read access to one image reference over the registry HTTP API v2.
#[derive(Debug)]
pub struct HttpImageSource {
    reference: Reference,
    client: RegistryClient,
}

#[derive(Debug, Deserialize)]
struct TagListPage {
    #[serde(default)]
    tags: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl HttpImageSource {
    /// Opens a source for `reference` with pull scope.
    pub fn new(reference: Reference, credential: Option<Credential>) -> RegsyncResult<Self> {
        let client = RegistryClient::new(
            reference.get_registry(),
            reference.get_repository(),
            credential,
            "pull",
        )?;

        Ok(Self { reference, client })
    }

    /// Fetches a manifest by tag or digest string.
    async fn fetch_manifest(&self, reference: &str) -> RegsyncResult<(Bytes, String)> {
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

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        let media_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let bytes = response.bytes().await?;

        Ok((bytes, media_type))
    }

    /// Opens one blob URL for streaming.
    async fn fetch_blob(&self, url: &str) -> RegsyncResult<(BlobStream, i64)> {
        let response = self
            .client
            .request_absolute(Method::GET, url)
            .await?
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(response_error(response).await);
        }

        let size = response
            .content_length()
            .map(|length| length as i64)
            .unwrap_or(-1);
        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(RegsyncError::from))
            .boxed();

        Ok((stream, size))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl ImageSource for HttpImageSource {
    fn reference(&self) -> &Reference {
        &self.reference
    }

    async fn get_manifest(&self) -> RegsyncResult<(Bytes, String)> {
        match self.reference.get_selector() {
            ReferenceSelector::Unset => Err(RegsyncError::ImageReference(format!(
                "cannot fetch a manifest for {} without a tag or digest",
                self.reference
            ))),
            _ => {
                let reference = self
                    .reference
                    .tag_or_digest()
                    .expect("selector is not unset");
                self.fetch_manifest(&reference).await
            }
        }
    }

    async fn get_manifest_by_digest(&self, digest: &str) -> RegsyncResult<(Bytes, String)> {
        self.fetch_manifest(digest).await
    }

    async fn get_blob(&self, descriptor: &BlobDescriptor) -> RegsyncResult<(BlobStream, i64)> {
        let primary = format!(
            "/v2/{}/blobs/{}",
            self.client.repository(),
            descriptor.digest
        );

        match self.fetch_blob(&primary).await {
            Result::Ok(blob) => Result::Ok(blob),
            Err(primary_error) => {
                // foreign layers are served from their fallback URLs only
                for url in &descriptor.urls {
                    if let Result::Ok(blob) = self.fetch_blob(url).await {
                        return Ok(blob);
                    }
                }
                Err(primary_error)
            }
        }
    }

    async fn list_tags(&self) -> RegsyncResult<Vec<String>> {
        let mut tags = Vec::new();
        let mut next = Some(format!("/v2/{}/tags/list", self.client.repository()));

        while let Some(url) = next.take() {
            let response = self
                .client
                .request_absolute(Method::GET, &url)
                .await?
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await?;

            if response.status() == StatusCode::NOT_FOUND {
                return Err(RegsyncError::NotFound(format!(
                    "repository {} has no tag list",
                    self.client.repository()
                )));
            }
            if !response.status().is_success() {
                return Err(response_error(response).await);
            }

            next = parse_next_link(response.headers());
            let page = response.json::<TagListPage>().await?;
            tags.extend(page.tags);
        }

        Ok(tags)
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Extracts the `rel="next"` target from a `Link` pagination header.
fn parse_next_link(headers: &reqwest::header::HeaderMap) -> Option<String> {
    let value = headers.get(reqwest::header::LINK)?.to_str().ok()?;

    for link in value.split(',') {
        let Some((target, params)) = link.split_once(';') else {
            continue;
        };
        if params.contains("rel=\"next\"") || params.contains("rel=next") {
            let target = target.trim().trim_start_matches('<').trim_end_matches('>');
            return Some(target.to_string());
        }
    }

    None
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_next_link() {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::LINK,
            r#"</v2/a/b/tags/list?last=v9&n=100>; rel="next""#.parse().unwrap(),
        );
        assert_eq!(
            parse_next_link(&headers).as_deref(),
            Some("/v2/a/b/tags/list?last=v9&n=100")
        );
    }

    #[test]
    fn test_parse_next_link_absent() {
        let headers = reqwest::header::HeaderMap::new();
        assert_eq!(parse_next_link(&headers), None);
    }
}
