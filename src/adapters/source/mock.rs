//! In-memory source
//!
//! Serves canned records, claims and consent decisions, and fails on demand. Used by
//! tests and by `run --mock-source` for local smoke runs.

use super::traits::{ClaimsSource, ConsentRecord, ConsentSource, IdentitySource, RecordSource};
use crate::domain::errors::SourceError;
use crate::domain::ids::{OrganizationId, PatientId, ProviderId};
use crate::domain::resource_type::ResourceType;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Canned source data with failure injection
#[derive(Default)]
pub struct MockSource {
    records: HashMap<(PatientId, ResourceType), Vec<Value>>,
    record_errors: HashMap<(PatientId, ResourceType), SourceError>,
    failing_patients: HashSet<PatientId>,
    fail_all_records: Option<SourceError>,
    claims: HashMap<PatientId, Value>,
    claims_errors: HashMap<PatientId, SourceError>,
    consents: HashMap<PatientId, ConsentRecord>,
    consent_errors: HashMap<PatientId, SourceError>,
    unknown_patients: HashSet<PatientId>,
    fetch_calls: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records returned for a patient and type
    pub fn with_records(
        mut self,
        patient: &PatientId,
        resource_type: ResourceType,
        records: Vec<Value>,
    ) -> Self {
        self.records
            .insert((patient.clone(), resource_type), records);
        self
    }

    /// Error returned for one patient and type
    pub fn with_record_error(
        mut self,
        patient: &PatientId,
        resource_type: ResourceType,
        error: SourceError,
    ) -> Self {
        self.record_errors
            .insert((patient.clone(), resource_type), error);
        self
    }

    /// Every record fetch for the patient fails with a connection error
    pub fn with_failing_patient(mut self, patient: &PatientId) -> Self {
        self.failing_patients.insert(patient.clone());
        self
    }

    /// Every record fetch fails
    pub fn with_all_records_failing(mut self, error: SourceError) -> Self {
        self.fail_all_records = Some(error);
        self
    }

    /// Claims document returned for a patient
    pub fn with_claims(mut self, patient: &PatientId, claims: Value) -> Self {
        self.claims.insert(patient.clone(), claims);
        self
    }

    pub fn with_claims_error(mut self, patient: &PatientId, error: SourceError) -> Self {
        self.claims_errors.insert(patient.clone(), error);
        self
    }

    /// Consent record on file for a patient
    pub fn with_consent(mut self, patient: &PatientId, record: ConsentRecord) -> Self {
        self.consents.insert(patient.clone(), record);
        self
    }

    pub fn with_consent_error(mut self, patient: &PatientId, error: SourceError) -> Self {
        self.consent_errors.insert(patient.clone(), error);
        self
    }

    /// Identity confirmation fails for the patient
    pub fn with_unknown_patient(mut self, patient: &PatientId) -> Self {
        self.unknown_patients.insert(patient.clone());
        self
    }

    /// Number of record fetches served so far
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordSource for MockSource {
    async fn fetch(
        &self,
        patient: &PatientId,
        resource_type: ResourceType,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(ref error) = self.fail_all_records {
            return Err(error.clone());
        }
        if self.failing_patients.contains(patient) {
            return Err(SourceError::Connection(format!(
                "source unavailable for patient {patient}"
            )));
        }
        if let Some(error) = self.record_errors.get(&(patient.clone(), resource_type)) {
            return Err(error.clone());
        }

        Ok(self
            .records
            .get(&(patient.clone(), resource_type))
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait]
impl ClaimsSource for MockSource {
    async fn fetch_claims(
        &self,
        _organization: &OrganizationId,
        patient: &PatientId,
        _provider: &ProviderId,
        _window_months: i64,
    ) -> Result<Value, SourceError> {
        if let Some(error) = self.claims_errors.get(patient) {
            return Err(error.clone());
        }
        Ok(self
            .claims
            .get(patient)
            .cloned()
            .unwrap_or_else(|| json!({ "resourceType": "Bundle", "entry": [] })))
    }
}

#[async_trait]
impl ConsentSource for MockSource {
    async fn fetch_consent(&self, patient: &PatientId) -> Result<Option<ConsentRecord>, SourceError> {
        if let Some(error) = self.consent_errors.get(patient) {
            return Err(error.clone());
        }
        Ok(self.consents.get(patient).cloned())
    }
}

#[async_trait]
impl IdentitySource for MockSource {
    async fn confirm_identity(&self, patient: &PatientId) -> Result<(), SourceError> {
        if self.unknown_patients.contains(patient) {
            return Err(SourceError::NotFound {
                resource_type: ResourceType::Patient,
                patient_id: patient.to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_records_and_injected_errors() {
        let p1 = PatientId::new("p-1").unwrap();
        let p2 = PatientId::new("p-2").unwrap();
        let source = MockSource::new()
            .with_records(&p1, ResourceType::Patient, vec![json!({"id": "p-1"})])
            .with_failing_patient(&p2);

        assert_eq!(
            source.fetch(&p1, ResourceType::Patient, None).await.unwrap().len(),
            1
        );
        assert!(source
            .fetch(&p1, ResourceType::Coverage, None)
            .await
            .unwrap()
            .is_empty());
        assert!(source.fetch(&p2, ResourceType::Patient, None).await.is_err());
        assert_eq!(source.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_default_claims_is_empty_bundle() {
        let patient = PatientId::new("p-1").unwrap();
        let claims = MockSource::new()
            .fetch_claims(
                &OrganizationId::new("org").unwrap(),
                &patient,
                &ProviderId::new("npi").unwrap(),
                18,
            )
            .await
            .unwrap();
        assert_eq!(claims["resourceType"], "Bundle");
    }
}
