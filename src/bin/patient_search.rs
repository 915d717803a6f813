//! Read-only query utility
//!
//! Issues one filtered search against the FHIR store (male patients with a
//! birthdate before a configurable bound) and prints the matching entries,
//! or an explicit no-results message. Shares the store path and auth
//! conventions with the loader but nothing else.

use std::sync::Arc;

use anyhow::Context;

use fhir_stage_loader::auth::GcpAuth;
use fhir_stage_loader::{FhirStoreClient, LoaderConfig};

const DEFAULT_BIRTHDATE_BOUND: &str = "lt1961-01-01";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = LoaderConfig::from_env().context("loading configuration")?;
    let auth = Arc::new(GcpAuth::from_env().await.context("loading credentials")?);
    let client = FhirStoreClient::new(&config.healthcare_base_url, config.fhir_parent(), auth)
        .context("building FHIR client")?;

    let birthdate = std::env::var("BIRTHDATE_BOUND")
        .unwrap_or_else(|_| DEFAULT_BIRTHDATE_BOUND.to_string());

    let entries = client
        .search("Patient", &[("gender", "male"), ("birthdate", birthdate.as_str())])
        .await
        .context("searching FHIR store")?;

    if entries.is_empty() {
        println!("No results found");
    } else {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        println!("Result count: {}", entries.len());
    }

    Ok(())
}
