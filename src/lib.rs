//! # fhir-stage-loader
//!
//! Batch loader that moves synthetic clinical-record FHIR bundles from a
//! Cloud Storage staging bucket into a Cloud Healthcare FHIR store, then
//! deletes the processed objects.
//!
//! Each invocation (triggered by an external scheduler) selects a small,
//! randomly-sized batch of staged objects and runs them through the
//! fetch → parse → load → delete pipeline strictly sequentially. An object
//! is deleted from staging only after the FHIR store confirmed its
//! submission; the first failure aborts the invocation and leaves everything
//! not yet committed in place.
//!
//! ## Components
//!
//! - [`pipeline`] — batch selection, per-object processing, and the
//!   error-absorbing invocation entry point
//! - [`storage`] — Cloud Storage JSON API client for the staging bucket
//! - [`repository`] — Cloud Healthcare FHIR store client (`executeBundle`
//!   and `search`)
//! - [`auth`] — Google OAuth2 token acquisition with caching
//! - [`config`] — environment-sourced settings

#![warn(clippy::all)]

pub mod auth;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod repository;
pub mod storage;

pub use config::LoaderConfig;
pub use error::{LoaderError, Result};
pub use pipeline::{BatchSizePolicy, FixedBatchSize, Pipeline, UniformBatchSize};
pub use repository::{BundleRepository, FhirStoreClient, SubmissionOutcome, FHIR_JSON};
pub use storage::{GcsStore, StagedObject, StagingStore};

/// Current version of the crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
