//! Environment-sourced configuration
//!
//! All settings come from the environment, matching the deployment model of a
//! scheduler-triggered batch job. Values are read once at startup; a missing
//! required variable is a configuration error.

use std::env;

use crate::error::{LoaderError, Result};

/// Default inclusive batch-size range.
pub const DEFAULT_BATCH_RANGE: (u32, u32) = (1, 3);

/// Default base URL for the Cloud Storage JSON API.
pub const DEFAULT_STORAGE_BASE_URL: &str = "https://storage.googleapis.com/storage/v1";

/// Default base URL for the Cloud Healthcare API.
pub const DEFAULT_HEALTHCARE_BASE_URL: &str = "https://healthcare.googleapis.com/v1";

/// Loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// GCP project identifier
    pub project_id: String,
    /// Healthcare dataset location (e.g. `us-central1`)
    pub location: String,
    /// Healthcare dataset identifier
    pub dataset: String,
    /// FHIR store identifier
    pub datastore: String,
    /// Staging bucket holding not-yet-loaded bundles
    pub patients_bucket: String,
    /// Inclusive range the batch size is drawn from
    pub batch_range: (u32, u32),
    /// Cloud Storage JSON API base URL (overridable for tests)
    pub storage_base_url: String,
    /// Cloud Healthcare API base URL (overridable for tests)
    pub healthcare_base_url: String,
}

impl LoaderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let batch_min = optional_u32("BATCH_MIN")?.unwrap_or(DEFAULT_BATCH_RANGE.0);
        let batch_max = optional_u32("BATCH_MAX")?.unwrap_or(DEFAULT_BATCH_RANGE.1);
        if batch_min == 0 || batch_min > batch_max {
            return Err(LoaderError::Config(format!(
                "invalid batch range [{batch_min},{batch_max}]"
            )));
        }

        Ok(Self {
            project_id: required("PROJECT_ID")?,
            location: required("LOCATION")?,
            dataset: required("DATASET")?,
            datastore: required("DATASTORE")?,
            patients_bucket: required("PATIENTS_BUCKET")?,
            batch_range: (batch_min, batch_max),
            storage_base_url: env::var("STORAGE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_STORAGE_BASE_URL.to_string()),
            healthcare_base_url: env::var("HEALTHCARE_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_HEALTHCARE_BASE_URL.to_string()),
        })
    }

    /// Composed resource path of the target FHIR store, relative to the
    /// Healthcare API base URL.
    pub fn fhir_parent(&self) -> String {
        format!(
            "projects/{}/locations/{}/datasets/{}/fhirStores/{}",
            self.project_id, self.location, self.dataset, self.datastore
        )
    }
}

fn required(name: &'static str) -> Result<String> {
    env::var(name).map_err(|_| LoaderError::Config(format!("missing environment variable {name}")))
}

fn optional_u32(name: &'static str) -> Result<Option<u32>> {
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|e| LoaderError::Config(format!("invalid {name}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> LoaderConfig {
        LoaderConfig {
            project_id: "demo-project".to_string(),
            location: "us-central1".to_string(),
            dataset: "synthea".to_string(),
            datastore: "patients".to_string(),
            patients_bucket: "staged-bundles".to_string(),
            batch_range: DEFAULT_BATCH_RANGE,
            storage_base_url: DEFAULT_STORAGE_BASE_URL.to_string(),
            healthcare_base_url: DEFAULT_HEALTHCARE_BASE_URL.to_string(),
        }
    }

    #[test]
    fn test_fhir_parent_path() {
        let config = sample_config();
        assert_eq!(
            config.fhir_parent(),
            "projects/demo-project/locations/us-central1/datasets/synthea/fhirStores/patients"
        );
    }
}
