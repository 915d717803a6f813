//! Cloud Healthcare FHIR store client
//!
//! Two operations are consumed: `executeBundle` (the write path) and
//! resource `search` (the read-only query utility). Both address the store
//! through the composed parent path
//! `projects/{p}/locations/{l}/datasets/{d}/fhirStores/{s}`.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use crate::auth::GcpAuth;
use crate::error::{LoaderError, Result};

/// Media type the FHIR store requires for bundle execution. Plain
/// `application/json` is rejected.
pub const FHIR_JSON: &str = "application/fhir+json";

/// Outcome of one bundle submission, consumed only for logging.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    /// HTTP status code returned by the store
    pub status: u16,
    /// Human-readable status text
    pub status_text: String,
}

impl SubmissionOutcome {
    fn from_status(status: StatusCode) -> Self {
        Self {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("Unknown").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchBundle {
    #[serde(default)]
    entry: Vec<Value>,
}

/// Bundle-execution seam the pipeline is written against.
#[async_trait]
pub trait BundleRepository: Send + Sync {
    /// Execute a parsed bundle against the store.
    async fn execute_bundle(&self, bundle: &Value) -> Result<SubmissionOutcome>;
}

/// HTTP client for one FHIR store.
#[derive(Debug, Clone)]
pub struct FhirStoreClient {
    base_url: Url,
    parent: String,
    auth: Arc<GcpAuth>,
    http_client: reqwest::Client,
}

impl FhirStoreClient {
    /// Create a client addressing one store.
    ///
    /// `parent` is the composed resource path from
    /// [`LoaderConfig::fhir_parent`](crate::config::LoaderConfig::fhir_parent).
    pub fn new(base_url: &str, parent: impl Into<String>, auth: Arc<GcpAuth>) -> Result<Self> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            parent: parent.into(),
            auth,
            http_client: reqwest::Client::new(),
        })
    }

    fn fhir_url(&self, resource_type: Option<&str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| LoaderError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            for part in self.parent.split('/') {
                segments.push(part);
            }
            segments.push("fhir");
            if let Some(resource_type) = resource_type {
                segments.push(resource_type);
            }
        }
        Ok(url)
    }

    async fn bearer(&self) -> Result<String> {
        Ok(format!("Bearer {}", self.auth.access_token().await?))
    }

    /// Search the store for resources of one type with field-level filters.
    ///
    /// Returns the matching entries; an absent `entry` field in the response
    /// bundle is an explicit empty result, not an error.
    pub async fn search(
        &self,
        resource_type: &str,
        params: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let mut url = self.fhir_url(Some(resource_type))?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
        }

        let response = self
            .http_client
            .get(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        let bundle: SearchBundle = response.json().await?;
        Ok(bundle.entry)
    }
}

#[async_trait]
impl BundleRepository for FhirStoreClient {
    async fn execute_bundle(&self, bundle: &Value) -> Result<SubmissionOutcome> {
        let url = self.fhir_url(None)?;

        let response = self
            .http_client
            .post(url)
            .header(AUTHORIZATION, self.bearer().await?)
            .header(CONTENT_TYPE, FHIR_JSON)
            .json(bundle)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(map_error_response(response).await);
        }

        Ok(SubmissionOutcome::from_status(response.status()))
    }
}

/// Map a non-success FHIR store response onto the loader error taxonomy.
async fn map_error_response(response: reqwest::Response) -> LoaderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => LoaderError::Auth(format!("FHIR store returned {status}: {body}")),
        code => LoaderError::Repository {
            status: code,
            message: body,
        },
    }
}
