//! Consent suppression check

use crate::adapters::source::{ConsentSource, IdentitySource};
use crate::config::OperationsConfig;
use crate::domain::ids::PatientId;
use crate::domain::outcome::OutcomeReason;
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

/// Result of a suppression check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuppressionDecision {
    Included,
    Excluded { reason: OutcomeReason, detail: String },
}

impl SuppressionDecision {
    fn excluded(reason: OutcomeReason, detail: impl Into<String>) -> Self {
        SuppressionDecision::Excluded {
            reason,
            detail: detail.into(),
        }
    }
}

/// Suppression check, real or canned
pub enum SuppressionCheck {
    /// Confirms the patient's identity and reads their consent record
    Consent {
        identity: Arc<dyn IdentitySource + Send + Sync>,
        consent: Arc<dyn ConsentSource + Send + Sync>,
    },
    /// Excludes exactly the listed patients as opted out
    Mock { opted_out: HashSet<PatientId> },
}

impl SuppressionCheck {
    /// Builds the check for the configured operations settings
    ///
    /// A disabled check includes every patient.
    pub fn from_config(
        config: &OperationsConfig,
        identity: Arc<dyn IdentitySource + Send + Sync>,
        consent: Arc<dyn ConsentSource + Send + Sync>,
    ) -> Self {
        if !config.consent_enabled {
            tracing::info!("Consent check disabled, no patient is suppressed");
            return SuppressionCheck::Mock {
                opted_out: HashSet::new(),
            };
        }
        SuppressionCheck::Consent { identity, consent }
    }

    pub async fn check(&self, patient: &PatientId) -> SuppressionDecision {
        let (identity, consent) = match self {
            SuppressionCheck::Mock { opted_out } => {
                return if opted_out.contains(patient) {
                    SuppressionDecision::excluded(
                        OutcomeReason::ConsentOptedOut,
                        OutcomeReason::ConsentOptedOut.detail(),
                    )
                } else {
                    SuppressionDecision::Included
                };
            }
            SuppressionCheck::Consent { identity, consent } => (identity, consent),
        };

        let (identity_result, consent_result) = tokio::join!(
            identity.confirm_identity(patient),
            consent.fetch_consent(patient)
        );

        if let Err(e) = identity_result {
            tracing::warn!(patient_id = %patient, error = %e, "Identity confirmation failed");
            return SuppressionDecision::excluded(OutcomeReason::InternalError, e.to_string());
        }

        match consent_result {
            Err(e) => {
                tracing::warn!(patient_id = %patient, error = %e, "Consent lookup failed");
                SuppressionDecision::excluded(OutcomeReason::InternalError, e.to_string())
            }
            Ok(Some(record)) if record.is_opt_out(Utc::now().date_naive()) => {
                tracing::debug!(
                    patient_id = %patient,
                    consent_date = %record.consent_date,
                    "Patient opted out"
                );
                SuppressionDecision::excluded(
                    OutcomeReason::ConsentOptedOut,
                    OutcomeReason::ConsentOptedOut.detail(),
                )
            }
            Ok(_) => SuppressionDecision::Included,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::source::{ConsentRecord, MockSource, OPT_IN_POLICY, OPT_OUT_POLICY};
    use crate::domain::errors::SourceError;
    use chrono::{Duration, NaiveDate};

    fn patient() -> PatientId {
        PatientId::new("1SQ3F00AA00").unwrap()
    }

    fn record(code: &str, date: NaiveDate) -> ConsentRecord {
        ConsentRecord {
            policy_code: code.to_string(),
            active: true,
            consent_date: date,
        }
    }

    fn check(source: MockSource) -> SuppressionCheck {
        let source = Arc::new(source);
        SuppressionCheck::Consent {
            identity: source.clone(),
            consent: source,
        }
    }

    fn yesterday() -> NaiveDate {
        Utc::now().date_naive() - Duration::days(1)
    }

    #[tokio::test]
    async fn test_opt_out_is_excluded() {
        let source = MockSource::new().with_consent(&patient(), record(OPT_OUT_POLICY, yesterday()));
        let decision = check(source).check(&patient()).await;
        assert!(matches!(
            decision,
            SuppressionDecision::Excluded {
                reason: OutcomeReason::ConsentOptedOut,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_no_record_is_included() {
        let decision = check(MockSource::new()).check(&patient()).await;
        assert_eq!(decision, SuppressionDecision::Included);
    }

    #[tokio::test]
    async fn test_opt_in_is_included() {
        let source = MockSource::new().with_consent(&patient(), record(OPT_IN_POLICY, yesterday()));
        assert_eq!(check(source).check(&patient()).await, SuppressionDecision::Included);
    }

    #[tokio::test]
    async fn test_future_opt_out_is_included() {
        let future = Utc::now().date_naive() + Duration::days(30);
        let source = MockSource::new().with_consent(&patient(), record(OPT_OUT_POLICY, future));
        assert_eq!(check(source).check(&patient()).await, SuppressionDecision::Included);
    }

    #[tokio::test]
    async fn test_consent_failure_is_internal_error() {
        let source = MockSource::new()
            .with_consent_error(&patient(), SourceError::Timeout("consent service".to_string()));
        match check(source).check(&patient()).await {
            SuppressionDecision::Excluded { reason, detail } => {
                assert_eq!(reason, OutcomeReason::InternalError);
                assert!(detail.contains("consent service"));
            }
            other => panic!("expected exclusion, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_patient_is_internal_error() {
        let source = MockSource::new().with_unknown_patient(&patient());
        assert!(matches!(
            check(source).check(&patient()).await,
            SuppressionDecision::Excluded {
                reason: OutcomeReason::InternalError,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_mock_excludes_listed_patients() {
        let check = SuppressionCheck::Mock {
            opted_out: [patient()].into_iter().collect(),
        };
        assert!(matches!(
            check.check(&patient()).await,
            SuppressionDecision::Excluded { .. }
        ));
        assert_eq!(
            check.check(&PatientId::new("other").unwrap()).await,
            SuppressionDecision::Included
        );
    }
}
