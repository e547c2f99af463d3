//! End-to-end export through the engine
//!
//! A job is submitted to the in-memory queue and an engine with the real consent
//! and look-back checks works it to completion against a canned source.

use aggregator::adapters::queue::{JobQueue, MemoryJobQueue};
use aggregator::adapters::source::{ConsentRecord, MockSource, OPT_IN_POLICY, OPT_OUT_POLICY};
use aggregator::adapters::storage::FileStore;
use aggregator::config::{EngineConfig, QueueConfig};
use aggregator::core::eligibility::{
    EligibilityGate, LookBackSettings, LookBackValidator, SuppressionCheck, NPI_SYSTEM,
};
use aggregator::core::engine::AggregationEngine;
use aggregator::core::processor::{BatchProcessor, ResourceWriter};
use aggregator::domain::{
    BatchStatus, JobId, JobRequest, OperationOutcome, OrganizationId, OutputFile, PatientId,
    ProviderId, ResourceType,
};
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::watch;

const ORG: &str = "1336218899";
const PROVIDER: &str = "1234329724";

fn npi(value: &str) -> Value {
    json!({ "identifier": { "system": NPI_SYSTEM, "value": value } })
}

fn claims(billed: &str) -> Value {
    json!({
        "resourceType": "Bundle",
        "entry": [{
            "resource": {
                "resourceType": "ExplanationOfBenefit",
                "billablePeriod": { "start": billed, "end": billed },
                "provider": npi(PROVIDER),
                "organization": npi(ORG),
            }
        }]
    })
}

fn consent(policy: &str) -> ConsentRecord {
    ConsentRecord {
        policy_code: policy.to_string(),
        active: true,
        consent_date: NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
    }
}

fn patient(id: &str) -> PatientId {
    PatientId::new(id).unwrap()
}

struct Pipeline {
    _dir: TempDir,
    store: FileStore,
    queue: Arc<MemoryJobQueue>,
    engine: Arc<AggregationEngine>,
}

impl Pipeline {
    fn new(source: MockSource, resources_per_file: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let store = FileStore::new(dir.path());
        let queue = Arc::new(MemoryJobQueue::new(&QueueConfig::default()));
        let source = Arc::new(source);

        let gate = EligibilityGate::new(
            SuppressionCheck::Consent {
                identity: source.clone(),
                consent: source.clone(),
            },
            LookBackValidator::Claims {
                source: source.clone(),
                settings: LookBackSettings {
                    window_months: 18,
                    reference_date: NaiveDate::from_ymd_opt(2024, 6, 30),
                    exempt_orgs: HashSet::new(),
                },
            },
        );

        let processor = BatchProcessor::new(
            queue.clone(),
            source,
            Arc::new(gate),
            ResourceWriter::new(store.clone(), resources_per_file),
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

        Self {
            _dir: dir,
            store,
            queue,
            engine: Arc::new(engine),
        }
    }

    /// Runs the engine until the job settles
    async fn run_until_settled(&self, job_id: &JobId) -> BatchStatus {
        let (tx, rx) = watch::channel(false);
        let engine = self.engine.clone();
        let handle = tokio::spawn(async move { engine.run(rx).await });

        let status = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match self.queue.get_job_status(job_id).await.unwrap() {
                    Some(status @ (BatchStatus::Completed | BatchStatus::Failed)) => {
                        return status
                    }
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await
        .expect("job did not settle");

        tx.send(true).unwrap();
        handle.await.unwrap();
        status
    }

    async fn files(&self, job_id: &JobId) -> Vec<OutputFile> {
        self.queue
            .get_job_batches(job_id)
            .await
            .unwrap()
            .into_iter()
            .flat_map(|b| b.files)
            .collect()
    }

    async fn lines_of(&self, files: &[OutputFile], resource_type: ResourceType) -> Vec<String> {
        let mut lines = Vec::new();
        for file in files.iter().filter(|f| f.resource_type == resource_type) {
            lines.extend(self.store.read_lines(file).await.unwrap());
        }
        lines
    }
}

#[tokio::test]
async fn test_export_gates_and_writes_every_patient() {
    let included = patient("1SQ3F00AA00");
    let opted_out = patient("1SQ3F00AA01");
    let failing = patient("1SQ3F00AA02");
    let no_claims = patient("1SQ3F00AA03");

    let source = MockSource::new()
        .with_consent(&included, consent(OPT_IN_POLICY))
        .with_consent(&opted_out, consent(OPT_OUT_POLICY))
        .with_claims(&included, claims("2024-05-15"))
        .with_claims(&opted_out, claims("2024-05-15"))
        .with_claims(&failing, claims("2024-01-31"))
        .with_records(
            &included,
            ResourceType::Patient,
            vec![json!({ "resourceType": "Patient", "id": "1SQ3F00AA00" })],
        )
        .with_records(
            &included,
            ResourceType::ExplanationOfBenefit,
            vec![
                json!({ "resourceType": "ExplanationOfBenefit", "id": "eob-1" }),
                json!({ "resourceType": "ExplanationOfBenefit", "id": "eob-2" }),
            ],
        )
        .with_failing_patient(&failing);
    let pipeline = Pipeline::new(source, 100);

    let job_id = pipeline
        .queue
        .create_job(JobRequest::new(
            OrganizationId::new(ORG).unwrap(),
            ProviderId::new(PROVIDER).unwrap(),
            vec![
                included.clone(),
                opted_out.clone(),
                failing.clone(),
                no_claims.clone(),
            ],
            vec![ResourceType::Patient, ResourceType::ExplanationOfBenefit],
        ))
        .await
        .unwrap();

    assert_eq!(
        pipeline.run_until_settled(&job_id).await,
        BatchStatus::Completed
    );

    let files = pipeline.files(&job_id).await;
    for file in &files {
        assert!(pipeline.store.verify(file).await.unwrap(), "{} corrupt", file.file_name);
    }

    assert_eq!(pipeline.lines_of(&files, ResourceType::Patient).await.len(), 1);
    assert_eq!(
        pipeline
            .lines_of(&files, ResourceType::ExplanationOfBenefit)
            .await
            .len(),
        2
    );

    let outcomes: Vec<OperationOutcome> = pipeline
        .lines_of(&files, ResourceType::OperationOutcome)
        .await
        .iter()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    // One suppression each for the opt-out and the missing claims, one error per
    // requested type for the failing patient
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes.iter().filter(|o| o.is_suppression()).count(), 2);

    let located = |p: &PatientId| {
        outcomes
            .iter()
            .filter(|o| o.issue.iter().any(|i| i.location.contains(&p.to_string())))
            .count()
    };
    assert_eq!(located(&included), 0);
    assert_eq!(located(&opted_out), 1);
    assert_eq!(located(&failing), 2);
    assert_eq!(located(&no_claims), 1);
}

#[tokio::test]
async fn test_outcome_only_batch_has_single_file() {
    let patients: Vec<PatientId> = (0..3).map(|i| patient(&format!("p-{i}"))).collect();
    // Nobody has claims, so every patient is suppressed by the look-back
    let pipeline = Pipeline::new(MockSource::new(), 100);

    let job_id = pipeline
        .queue
        .create_job(JobRequest::new(
            OrganizationId::new(ORG).unwrap(),
            ProviderId::new(PROVIDER).unwrap(),
            patients,
            vec![ResourceType::Patient],
        ))
        .await
        .unwrap();

    assert_eq!(
        pipeline.run_until_settled(&job_id).await,
        BatchStatus::Completed
    );

    let files = pipeline.files(&job_id).await;
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].resource_type, ResourceType::OperationOutcome);
    assert_eq!(files[0].count, 3);
}

#[tokio::test]
async fn test_records_roll_over_across_files() {
    let p = patient("1SQ3F00AA00");
    let records: Vec<Value> = (0..5)
        .map(|i| json!({ "resourceType": "Coverage", "id": format!("cov-{i}") }))
        .collect();
    let source = MockSource::new()
        .with_claims(&p, claims("2024-06-01"))
        .with_records(&p, ResourceType::Coverage, records);
    let pipeline = Pipeline::new(source, 2);

    let job_id = pipeline
        .queue
        .create_job(JobRequest::new(
            OrganizationId::new(ORG).unwrap(),
            ProviderId::new(PROVIDER).unwrap(),
            vec![p],
            vec![ResourceType::Coverage],
        ))
        .await
        .unwrap();

    assert_eq!(
        pipeline.run_until_settled(&job_id).await,
        BatchStatus::Completed
    );

    let mut files = pipeline.files(&job_id).await;
    files.sort_by_key(|f| f.sequence);
    let layout: Vec<(u32, u32)> = files.iter().map(|f| (f.sequence, f.count)).collect();
    assert_eq!(layout, vec![(0, 2), (1, 2), (2, 1)]);
}
