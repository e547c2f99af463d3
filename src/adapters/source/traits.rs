//! Upstream source abstractions
//!
//! The batch processor reads patient records, the look-back validator reads claims and
//! the suppression check reads consent and identity. Each is a separate trait so a
//! deployment can point them at different services.

use crate::domain::errors::SourceError;
use crate::domain::ids::{OrganizationId, PatientId, ProviderId};
use crate::domain::resource_type::ResourceType;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Policy code of a consent record that excludes the patient
pub const OPT_OUT_POLICY: &str = "OPTOUT";

/// Policy code of a consent record that includes the patient
pub const OPT_IN_POLICY: &str = "OPTIN";

/// The most recent consent decision recorded for a patient
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    /// `OPTOUT` or `OPTIN`
    pub policy_code: String,
    pub active: bool,
    pub consent_date: NaiveDate,
}

impl ConsentRecord {
    /// Whether the record excludes the patient as of `today`
    pub fn is_opt_out(&self, today: NaiveDate) -> bool {
        self.active && self.policy_code == OPT_OUT_POLICY && self.consent_date <= today
    }
}

/// Patient records of one resource type
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetches every record of `resource_type` for the patient, optionally only those
    /// updated after `since`
    async fn fetch(
        &self,
        patient: &PatientId,
        resource_type: ResourceType,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Value>, SourceError>;
}

/// Claims history used by the look-back check
#[async_trait]
pub trait ClaimsSource: Send + Sync {
    /// Returns the raw claims document for the patient, normally a `Bundle`
    async fn fetch_claims(
        &self,
        organization: &OrganizationId,
        patient: &PatientId,
        provider: &ProviderId,
        window_months: i64,
    ) -> Result<Value, SourceError>;
}

/// Consent decisions used by the suppression check
#[async_trait]
pub trait ConsentSource: Send + Sync {
    /// The patient's current consent record, `None` when nothing is on file
    async fn fetch_consent(&self, patient: &PatientId) -> Result<Option<ConsentRecord>, SourceError>;
}

/// Confirms a patient identifier resolves to a known beneficiary
#[async_trait]
pub trait IdentitySource: Send + Sync {
    async fn confirm_identity(&self, patient: &PatientId) -> Result<(), SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(code: &str, active: bool, date: NaiveDate) -> ConsentRecord {
        ConsentRecord {
            policy_code: code.to_string(),
            active,
            consent_date: date,
        }
    }

    #[test]
    fn test_opt_out_rules() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let past = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let future = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();

        assert!(record(OPT_OUT_POLICY, true, past).is_opt_out(today));
        assert!(record(OPT_OUT_POLICY, true, today).is_opt_out(today));
        assert!(!record(OPT_OUT_POLICY, false, past).is_opt_out(today));
        assert!(!record(OPT_OUT_POLICY, true, future).is_opt_out(today));
        assert!(!record(OPT_IN_POLICY, true, past).is_opt_out(today));
    }
}
