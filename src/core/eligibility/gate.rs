//! Per-patient eligibility gate

use super::lookback::{LookBackDecision, LookBackValidator};
use super::suppression::{SuppressionCheck, SuppressionDecision};
use crate::domain::batch::Batch;
use crate::domain::ids::PatientId;
use crate::domain::outcome::{OperationOutcome, OutcomeReason};

/// Whether a patient's records may be exported
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    Included,
    /// Deliberately excluded; recorded as a `suppressed` outcome
    Excluded(OutcomeReason),
    /// The checks themselves failed; recorded as an `exception` outcome
    Error(String),
}

impl GateDecision {
    /// Outcome entry to record, `None` for an included patient
    pub fn to_outcome(&self, patient: &PatientId) -> Option<OperationOutcome> {
        match self {
            GateDecision::Included => None,
            GateDecision::Excluded(reason) => Some(OperationOutcome::suppressed(*reason, patient)),
            GateDecision::Error(message) => Some(OperationOutcome::error(message.clone(), patient)),
        }
    }

    /// Reason label for the metric line
    pub fn fail_reason(&self) -> &'static str {
        match self {
            GateDecision::Included => "NA",
            GateDecision::Excluded(reason) => reason.as_str(),
            GateDecision::Error(_) => OutcomeReason::InternalError.as_str(),
        }
    }
}

/// Suppression followed by look-back
pub struct EligibilityGate {
    suppression: SuppressionCheck,
    look_back: LookBackValidator,
}

impl EligibilityGate {
    pub fn new(suppression: SuppressionCheck, look_back: LookBackValidator) -> Self {
        Self {
            suppression,
            look_back,
        }
    }

    /// Gate that includes everyone
    pub fn permissive() -> Self {
        Self::new(
            SuppressionCheck::Mock {
                opted_out: Default::default(),
            },
            LookBackValidator::Mock(LookBackDecision::Pass),
        )
    }

    /// Runs both checks for one patient of a batch
    ///
    /// The look-back is skipped once the patient is suppressed.
    pub async fn evaluate(&self, batch: &Batch, patient: &PatientId) -> GateDecision {
        match self.suppression.check(patient).await {
            SuppressionDecision::Included => {}
            SuppressionDecision::Excluded {
                reason: OutcomeReason::InternalError,
                detail,
            } => return GateDecision::Error(detail),
            SuppressionDecision::Excluded { reason, .. } => return GateDecision::Excluded(reason),
        }

        match self
            .look_back
            .validate(&batch.organization_id, patient, &batch.provider_id)
            .await
        {
            LookBackDecision::Pass => GateDecision::Included,
            LookBackDecision::Fail(reason) => GateDecision::Excluded(reason),
            LookBackDecision::Error(message) => GateDecision::Error(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::source::{ConsentRecord, MockSource, OPT_OUT_POLICY};
    use crate::domain::batch::JobRequest;
    use crate::domain::ids::{JobId, OrganizationId, ProviderId};
    use crate::domain::outcome::IssueCode;
    use crate::domain::resource_type::ResourceType;
    use chrono::{NaiveDate, Utc};
    use std::sync::Arc;

    fn batch(patient: &PatientId) -> Batch {
        JobRequest::new(
            OrganizationId::new("org-1").unwrap(),
            ProviderId::new("1234329724").unwrap(),
            vec![patient.clone()],
            vec![ResourceType::Patient],
        )
        .into_batches(JobId::generate(), 10, Utc::now())
        .remove(0)
    }

    #[tokio::test]
    async fn test_permissive_gate_includes() {
        let patient = PatientId::new("p-1").unwrap();
        let decision = EligibilityGate::permissive()
            .evaluate(&batch(&patient), &patient)
            .await;
        assert_eq!(decision, GateDecision::Included);
        assert!(decision.to_outcome(&patient).is_none());
    }

    #[tokio::test]
    async fn test_suppression_runs_before_look_back() {
        let patient = PatientId::new("p-1").unwrap();
        let source = Arc::new(MockSource::new().with_consent(
            &patient,
            ConsentRecord {
                policy_code: OPT_OUT_POLICY.to_string(),
                active: true,
                consent_date: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            },
        ));
        let gate = EligibilityGate::new(
            SuppressionCheck::Consent {
                identity: source.clone(),
                consent: source,
            },
            LookBackValidator::Mock(LookBackDecision::Error("never reached".to_string())),
        );

        let decision = gate.evaluate(&batch(&patient), &patient).await;
        assert_eq!(decision, GateDecision::Excluded(OutcomeReason::ConsentOptedOut));
        let outcome = decision.to_outcome(&patient).unwrap();
        assert_eq!(outcome.issue[0].code, IssueCode::Suppressed);
    }

    #[tokio::test]
    async fn test_look_back_failure_is_excluded() {
        let patient = PatientId::new("p-1").unwrap();
        let gate = EligibilityGate::new(
            SuppressionCheck::Mock {
                opted_out: Default::default(),
            },
            LookBackValidator::Mock(LookBackDecision::Fail(OutcomeReason::LookBackNoClaims)),
        );
        let decision = gate.evaluate(&batch(&patient), &patient).await;
        assert_eq!(decision.fail_reason(), "LOOK_BACK_NO_CLAIMS");
    }

    #[tokio::test]
    async fn test_check_failure_is_error_outcome() {
        let patient = PatientId::new("p-1").unwrap();
        let source = Arc::new(MockSource::new().with_unknown_patient(&patient));
        let gate = EligibilityGate::new(
            SuppressionCheck::Consent {
                identity: source.clone(),
                consent: source,
            },
            LookBackValidator::Mock(LookBackDecision::Pass),
        );
        let decision = gate.evaluate(&batch(&patient), &patient).await;
        assert!(matches!(decision, GateDecision::Error(_)));
        assert_eq!(
            decision.to_outcome(&patient).unwrap().issue[0].code,
            IssueCode::Exception
        );
    }
}
