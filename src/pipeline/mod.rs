//! The fetch → parse → load → delete pipeline
//!
//! One invocation selects a bounded, randomly-sized batch of staged bundle
//! objects and processes them strictly sequentially. An object is deleted
//! from staging if and only if its submission to the FHIR store succeeded;
//! the first failure of any step aborts the invocation and leaves the
//! failing object (and everything not yet reached) in staging.

use rand::Rng;
use serde_json::Value;
use tracing::{error, info};

use crate::error::{LoaderError, Result};
use crate::repository::{BundleRepository, SubmissionOutcome};
use crate::storage::{StagedObject, StagingStore};

/// Decides how many staged objects one invocation may process.
///
/// Injected so tests can supply deterministic sizes instead of relying on
/// random draws.
pub trait BatchSizePolicy: Send + Sync {
    /// Upper bound on the number of objects to select, always positive.
    fn draw(&self) -> u32;
}

/// Uniform random draw over an inclusive range.
#[derive(Debug, Clone)]
pub struct UniformBatchSize {
    min: u32,
    max: u32,
}

impl UniformBatchSize {
    /// Build a policy over `[min, max]`. `min` must be positive and no
    /// greater than `max`; config loading enforces this.
    pub fn new(range: (u32, u32)) -> Self {
        Self {
            min: range.0,
            max: range.1,
        }
    }
}

impl BatchSizePolicy for UniformBatchSize {
    fn draw(&self) -> u32 {
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

/// Fixed batch size, for tests and manual reprocessing runs.
#[derive(Debug, Clone)]
pub struct FixedBatchSize(pub u32);

impl BatchSizePolicy for FixedBatchSize {
    fn draw(&self) -> u32 {
        self.0
    }
}

/// One invocation's worth of pipeline state: the two collaborators plus the
/// batch-size policy. Nothing here outlives the invocation.
pub struct Pipeline<S, R, P> {
    store: S,
    repository: R,
    batch_policy: P,
}

impl<S, R, P> Pipeline<S, R, P>
where
    S: StagingStore,
    R: BundleRepository,
    P: BatchSizePolicy,
{
    /// Assemble a pipeline from its collaborators.
    pub fn new(store: S, repository: R, batch_policy: P) -> Self {
        Self {
            store,
            repository,
            batch_policy,
        }
    }

    /// Retrieve at most `max_count` staged objects, in store listing order.
    ///
    /// The store may yield fewer (including zero). A listing failure is
    /// fatal to the invocation.
    async fn select_batch(&self, max_count: u32) -> Result<Vec<StagedObject>> {
        self.store.list(max_count).await
    }

    /// Process one staged object: buffer, parse, submit, then delete.
    ///
    /// Delete happens only after the store confirmed the submission; any
    /// earlier failure leaves the object untouched in staging.
    async fn process(&self, object: &StagedObject) -> Result<SubmissionOutcome> {
        let raw = self.store.read_all(object).await?;

        let bundle: Value = serde_json::from_slice(&raw).map_err(|source| LoaderError::Parse {
            object: object.name.clone(),
            source,
        })?;

        let outcome = self.repository.execute_bundle(&bundle).await?;
        info!(
            object = %object.name,
            status = %outcome.status_text,
            "bundle loaded to FHIR store"
        );

        self.store.delete(object).await?;
        info!(object = %object.name, "bundle deleted from staging");

        Ok(outcome)
    }

    /// Run one invocation: draw a batch size, select, then process each
    /// object to completion before the next one starts.
    ///
    /// Returns the number of objects fully processed. The first error
    /// propagates immediately; unreached objects stay in staging.
    pub async fn run(&self) -> Result<usize> {
        let max_count = self.batch_policy.draw();
        let objects = self.select_batch(max_count).await?;
        info!("{} bundles fetched", objects.len());

        for object in &objects {
            info!(object = %object.name, "loading bundle");
            self.process(object).await?;
        }

        Ok(objects.len())
    }

    /// Scheduler-facing entry point.
    ///
    /// Absorbs every error: partial failures are visible in the logs only,
    /// so the scheduler always observes a clean completion and never piles
    /// up retries.
    pub async fn run_invocation(&self) {
        match self.run().await {
            Ok(count) => info!("{count} records processed"),
            Err(err) => error!(error = %err, "invocation aborted, staged objects left in place"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;
    use crate::error::LoaderError;

    const VALID_BUNDLE: &str = r#"{"resourceType":"Bundle","type":"transaction","entry":[]}"#;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        List(u32),
        Read(String),
        Submit(String),
        Delete(String),
    }

    type Trace = Arc<Mutex<Vec<Call>>>;

    struct StoreStub {
        trace: Trace,
        objects: Vec<StagedObject>,
        payloads: HashMap<String, Vec<u8>>,
        fail_read: Option<String>,
        fail_delete: Option<String>,
    }

    impl StoreStub {
        fn with_objects(trace: Trace, names: &[&str]) -> Self {
            let objects = names
                .iter()
                .map(|n| StagedObject {
                    name: n.to_string(),
                })
                .collect();
            let payloads = names
                .iter()
                .map(|n| (n.to_string(), VALID_BUNDLE.as_bytes().to_vec()))
                .collect();
            Self {
                trace,
                objects,
                payloads,
                fail_read: None,
                fail_delete: None,
            }
        }
    }

    #[async_trait]
    impl StagingStore for StoreStub {
        async fn list(&self, max_results: u32) -> crate::error::Result<Vec<StagedObject>> {
            self.trace.lock().unwrap().push(Call::List(max_results));
            Ok(self
                .objects
                .iter()
                .take(max_results as usize)
                .cloned()
                .collect())
        }

        async fn read_all(&self, object: &StagedObject) -> crate::error::Result<Bytes> {
            self.trace
                .lock()
                .unwrap()
                .push(Call::Read(object.name.clone()));
            if self.fail_read.as_deref() == Some(object.name.as_str()) {
                return Err(LoaderError::storage(
                    "read",
                    &object.name,
                    "stream: connection reset mid-read",
                ));
            }
            Ok(Bytes::from(self.payloads[&object.name].clone()))
        }

        async fn delete(&self, object: &StagedObject) -> crate::error::Result<()> {
            self.trace
                .lock()
                .unwrap()
                .push(Call::Delete(object.name.clone()));
            if self.fail_delete.as_deref() == Some(object.name.as_str()) {
                return Err(LoaderError::storage("delete", &object.name, "403: denied"));
            }
            Ok(())
        }
    }

    struct RepoStub {
        trace: Trace,
        fail_submit: Option<String>,
    }

    #[async_trait]
    impl BundleRepository for RepoStub {
        async fn execute_bundle(&self, bundle: &Value) -> crate::error::Result<SubmissionOutcome> {
            // Stub keys failure off an entry the tests plant in the bundle
            let name = bundle
                .get("id")
                .and_then(|v| v.as_str())
                .unwrap_or("unnamed")
                .to_string();
            self.trace.lock().unwrap().push(Call::Submit(name.clone()));
            if self.fail_submit.as_deref() == Some(name.as_str()) {
                return Err(LoaderError::Repository {
                    status: 502,
                    message: "store unreachable".to_string(),
                });
            }
            Ok(SubmissionOutcome {
                status: 200,
                status_text: "OK".to_string(),
            })
        }
    }

    fn tagged_bundle(name: &str) -> Vec<u8> {
        format!(r#"{{"resourceType":"Bundle","id":"{name}"}}"#).into_bytes()
    }

    fn trace() -> Trace {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[test]
    fn test_uniform_policy_stays_in_range() {
        let policy = UniformBatchSize::new((1, 3));
        for _ in 0..200 {
            let n = policy.draw();
            assert!((1..=3).contains(&n));
        }
    }

    #[test]
    fn test_fixed_policy() {
        assert_eq!(FixedBatchSize(2).draw(), 2);
    }

    #[tokio::test]
    async fn test_empty_store_processes_nothing() {
        let trace = trace();
        let store = StoreStub::with_objects(trace.clone(), &[]);
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(3));

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 0);
        assert_eq!(*trace.lock().unwrap(), vec![Call::List(3)]);
    }

    #[tokio::test]
    async fn test_selector_respects_batch_bound() {
        let trace = trace();
        let store = StoreStub::with_objects(trace.clone(), &["a.json", "b.json", "c.json"]);
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(2));

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 2);

        let calls = trace.lock().unwrap();
        assert_eq!(calls[0], Call::List(2));
        // Only the two selected objects were touched
        assert!(!calls.iter().any(|c| matches!(c, Call::Read(n) if n == "c.json")));
    }

    #[tokio::test]
    async fn test_successful_batch_is_sequential_and_deletes_after_submit() {
        let trace = trace();
        let mut store = StoreStub::with_objects(trace.clone(), &["a.json", "b.json"]);
        store
            .payloads
            .insert("a.json".to_string(), tagged_bundle("a"));
        store
            .payloads
            .insert("b.json".to_string(), tagged_bundle("b"));
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(2));

        let count = pipeline.run().await.unwrap();
        assert_eq!(count, 2);

        let calls = trace.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::List(2),
                Call::Read("a.json".to_string()),
                Call::Submit("a".to_string()),
                Call::Delete("a.json".to_string()),
                Call::Read("b.json".to_string()),
                Call::Submit("b".to_string()),
                Call::Delete("b.json".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_submission_failure_aborts_without_delete() {
        let trace = trace();
        let mut store =
            StoreStub::with_objects(trace.clone(), &["a.json", "b.json", "c.json"]);
        for name in ["a", "b", "c"] {
            store
                .payloads
                .insert(format!("{name}.json"), tagged_bundle(name));
        }
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: Some("b".to_string()),
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(3));

        assert!(pipeline.run().await.is_err());

        let calls = trace.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                Call::List(3),
                Call::Read("a.json".to_string()),
                Call::Submit("a".to_string()),
                Call::Delete("a.json".to_string()),
                Call::Read("b.json".to_string()),
                Call::Submit("b".to_string()),
            ]
        );
        // b was never deleted, c was never touched
        assert!(!calls.contains(&Call::Delete("b.json".to_string())));
        assert!(!calls.contains(&Call::Read("c.json".to_string())));
    }

    #[tokio::test]
    async fn test_stream_error_aborts_before_submit() {
        let trace = trace();
        let mut store = StoreStub::with_objects(trace.clone(), &["a.json"]);
        store.fail_read = Some("a.json".to_string());
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(1));

        assert!(pipeline.run().await.is_err());

        let calls = trace.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![Call::List(1), Call::Read("a.json".to_string())]
        );
    }

    #[tokio::test]
    async fn test_malformed_bundle_aborts_before_submit() {
        let trace = trace();
        let mut store = StoreStub::with_objects(trace.clone(), &["a.json"]);
        store
            .payloads
            .insert("a.json".to_string(), b"{not json".to_vec());
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(1));

        let err = pipeline.run().await.unwrap_err();
        assert!(matches!(err, LoaderError::Parse { .. }));

        let calls = trace.lock().unwrap().clone();
        assert!(!calls.iter().any(|c| matches!(c, Call::Submit(_))));
        assert!(!calls.iter().any(|c| matches!(c, Call::Delete(_))));
    }

    #[tokio::test]
    async fn test_delete_failure_after_submission_still_aborts() {
        let trace = trace();
        let mut store = StoreStub::with_objects(trace.clone(), &["a.json", "b.json"]);
        store.fail_delete = Some("a.json".to_string());
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(2));

        assert!(pipeline.run().await.is_err());

        // The load went through before the failed delete; b was not reached
        let calls = trace.lock().unwrap().clone();
        assert!(calls.contains(&Call::Delete("a.json".to_string())));
        assert!(!calls.contains(&Call::Read("b.json".to_string())));
    }

    #[tokio::test]
    async fn test_run_invocation_absorbs_errors() {
        let trace = trace();
        let mut store = StoreStub::with_objects(trace.clone(), &["a.json"]);
        store.fail_read = Some("a.json".to_string());
        let repo = RepoStub {
            trace: trace.clone(),
            fail_submit: None,
        };
        let pipeline = Pipeline::new(store, repo, FixedBatchSize(1));

        // Must complete without panicking or propagating the error
        pipeline.run_invocation().await;
    }
}
