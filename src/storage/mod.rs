//! Staging object store client (Cloud Storage JSON API)
//!
//! Covers the three calls the pipeline needs: bounded listing, streamed
//! download, and delete. The listing order is whatever the store returns;
//! no client-side filtering or sorting happens here.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use url::Url;

use crate::auth::GcpAuth;
use crate::error::{LoaderError, Result};

/// Handle to one object in the staging bucket.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagedObject {
    /// Object name (key) within the bucket
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectListing {
    #[serde(default)]
    items: Vec<StagedObject>,
}

/// Staging store operations consumed by the pipeline.
///
/// The pipeline is written against this trait so its sequencing and
/// delete-after-load semantics can be verified without a live bucket.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// List at most `max_results` objects, in store order.
    async fn list(&self, max_results: u32) -> Result<Vec<StagedObject>>;

    /// Stream an object's content and buffer it fully in memory.
    async fn read_all(&self, object: &StagedObject) -> Result<Bytes>;

    /// Delete an object from the staging bucket.
    async fn delete(&self, object: &StagedObject) -> Result<()>;
}

/// Cloud Storage JSON API client for the staging bucket.
#[derive(Debug, Clone)]
pub struct GcsStore {
    base_url: Url,
    bucket: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
}

impl GcsStore {
    /// Create a client for one bucket.
    pub fn new(base_url: &str, bucket: impl Into<String>, auth: Arc<GcpAuth>) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            bucket: bucket.into(),
            auth,
            http_client: reqwest::Client::new(),
        })
    }

    /// URL of the bucket's object collection, or of one object when `name`
    /// is given. Segment pushing percent-encodes object names for us.
    fn object_url(&self, name: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| LoaderError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segments.push("b").push(&self.bucket).push("o");
            if let Some(name) = name {
                segments.push(name);
            }
        }
        Ok(url)
    }

    async fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.access_token().await?))
    }
}

#[async_trait]
impl StagingStore for GcsStore {
    async fn list(&self, max_results: u32) -> Result<Vec<StagedObject>> {
        let mut url = self.object_url(None)?;
        url.query_pairs_mut()
            .append_pair("maxResults", &max_results.to_string());

        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LoaderError::storage(
                "list",
                &self.bucket,
                format!("{status}: {body}"),
            ));
        }

        let listing: ObjectListing = response.json().await?;
        Ok(listing.items)
    }

    async fn read_all(&self, object: &StagedObject) -> Result<Bytes> {
        let mut url = self.object_url(Some(&object.name))?;
        url.query_pairs_mut().append_pair("alt", "media");

        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LoaderError::storage(
                "read",
                &object.name,
                format!("{status}: {body}"),
            ));
        }

        // Accumulate chunks until end of stream; a mid-stream error aborts
        // the object without touching it in the bucket.
        let mut buf = BytesMut::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| LoaderError::storage("read", &object.name, format!("stream: {e}")))?;
            buf.extend_from_slice(&chunk);
        }

        Ok(buf.freeze())
    }

    async fn delete(&self, object: &StagedObject) -> Result<()> {
        let url = self.object_url(Some(&object.name))?;

        let response = self
            .http_client
            .delete(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(LoaderError::storage(
                "delete",
                &object.name,
                format!("{status}: {body}"),
            ));
        }

        Ok(())
    }
}
