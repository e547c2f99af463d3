//! Integration tests for synchronous data retrieval

use aggregator::adapters::queue::{JobQueue, MemoryJobQueue};
use aggregator::adapters::source::MockSource;
use aggregator::adapters::storage::FileStore;
use aggregator::config::{DataServiceConfig, EngineConfig, QueueConfig};
use aggregator::core::eligibility::{
    EligibilityGate, LookBackDecision, LookBackValidator, SuppressionCheck,
};
use aggregator::core::engine::AggregationEngine;
use aggregator::core::processor::{BatchProcessor, ResourceWriter};
use aggregator::core::service::{DataResult, DataService};
use aggregator::domain::{
    AggregatorError, OrganizationId, PatientId, ProviderId, ResourceType, WorkerId,
};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

struct Harness {
    _dir: TempDir,
    queue: Arc<MemoryJobQueue>,
    service: DataService,
    shutdown: watch::Sender<bool>,
}

impl Harness {
    /// Service plus, when `gate` is given, a running engine
    fn new(source: MockSource, gate: Option<EligibilityGate>, job_timeout_seconds: u64) -> Self {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let (shutdown, rx) = watch::channel(false);

        if let Some(gate) = gate {
            let processor = BatchProcessor::new(
                queue.clone(),
                Arc::new(source),
                Arc::new(gate),
                ResourceWriter::new(store.clone(), 100),
            );
            let engine = AggregationEngine::new(
                queue.clone(),
                processor,
                EngineConfig {
                    polling_interval_ms: 10,
                    polling_jitter_ms: 0,
                    ..Default::default()
                },
            );
            tokio::spawn(async move { engine.run(rx).await });
        }

        let service = DataService::new(
            queue.clone(),
            store,
            DataServiceConfig {
                poll_interval_ms: 10,
                job_timeout_seconds,
            },
        );

        Self {
            _dir: dir,
            queue,
            service,
            shutdown,
        }
    }

    async fn retrieve(&self, patient: &PatientId) -> aggregator::domain::Result<DataResult> {
        self.service
            .retrieve(
                &OrganizationId::new("org-1").unwrap(),
                &ProviderId::new("1234329724").unwrap(),
                patient,
                vec![ResourceType::Patient, ResourceType::ExplanationOfBenefit],
                None,
            )
            .await
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[tokio::test]
async fn test_retrieve_returns_collection_bundle() {
    let patient = PatientId::new("1SQ3F00AA00").unwrap();
    let source = MockSource::new()
        .with_records(
            &patient,
            ResourceType::ExplanationOfBenefit,
            vec![
                json!({ "resourceType": "ExplanationOfBenefit", "id": "eob-1" }),
                json!({ "resourceType": "ExplanationOfBenefit", "id": "eob-2" }),
            ],
        )
        .with_records(
            &patient,
            ResourceType::Patient,
            vec![json!({ "resourceType": "Patient", "id": "1SQ3F00AA00" })],
        );
    let harness = Harness::new(source, Some(EligibilityGate::permissive()), 10);

    let DataResult::Bundle(bundle) = harness.retrieve(&patient).await.unwrap() else {
        panic!("expected a bundle");
    };

    assert_eq!(bundle["resourceType"], "Bundle");
    assert_eq!(bundle["type"], "collection");
    assert_eq!(bundle["total"], 3);
    let entries = bundle["entry"].as_array().unwrap();
    assert_eq!(entries[0]["resource"]["resourceType"], "Patient");
    assert_eq!(entries[1]["resource"]["id"], "eob-1");
    assert_eq!(entries[2]["resource"]["id"], "eob-2");
}

#[tokio::test]
async fn test_retrieve_suppressed_patient_returns_outcome() {
    let patient = PatientId::new("1SQ3F00AA01").unwrap();
    let gate = EligibilityGate::new(
        SuppressionCheck::Mock {
            opted_out: HashSet::from([patient.clone()]),
        },
        LookBackValidator::Mock(LookBackDecision::Pass),
    );
    let harness = Harness::new(MockSource::new(), Some(gate), 10);

    let DataResult::Outcome(outcome) = harness.retrieve(&patient).await.unwrap() else {
        panic!("expected an outcome");
    };
    assert!(outcome.is_suppression());
    assert_eq!(outcome.issue.len(), 1);
    assert_eq!(outcome.issue[0].location, vec![patient.to_string()]);
}

#[tokio::test]
async fn test_retrieve_failed_source_returns_combined_outcome() {
    let patient = PatientId::new("1SQ3F00AA02").unwrap();
    let source = MockSource::new().with_failing_patient(&patient);
    let harness = Harness::new(source, Some(EligibilityGate::permissive()), 10);

    let DataResult::Outcome(outcome) = harness.retrieve(&patient).await.unwrap() else {
        panic!("expected an outcome");
    };
    // One issue per requested resource type
    assert_eq!(outcome.issue.len(), 2);
    assert!(!outcome.is_suppression());
}

#[tokio::test]
async fn test_retrieve_times_out_without_workers() {
    let patient = PatientId::new("1SQ3F00AA03").unwrap();
    let harness = Harness::new(MockSource::new(), None, 1);

    let err = harness.retrieve(&patient).await.unwrap_err();
    assert!(matches!(err, AggregatorError::DataRetrieval(ref msg) if msg == "Failed to retrieve data"));
}

#[tokio::test]
async fn test_retrieve_reports_failed_batch() {
    let patient = PatientId::new("1SQ3F00AA04").unwrap();
    let harness = Harness::new(MockSource::new(), None, 10);

    // Stand-in worker that fails whatever it claims
    let queue = harness.queue.clone();
    tokio::spawn(async move {
        let worker = WorkerId::generate();
        loop {
            if let Some(mut batch) = queue.claim_batch(&worker).await.unwrap() {
                queue.fail_batch(&mut batch, &worker).await.unwrap();
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    });

    let err = harness.retrieve(&patient).await.unwrap_err();
    match err {
        AggregatorError::DataRetrieval(msg) => assert!(msg.starts_with("Failed to retrieve batch")),
        other => panic!("unexpected error {other:?}"),
    }
}
