//! Outcome entries
//!
//! Errors and exclusions are not dropped: each one becomes an `OperationOutcome`
//! line in the batch's outcome file, next to the successfully exported data.

use crate::domain::errors::SourceError;
use crate::domain::ids::PatientId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a patient's data was not (fully) exported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeReason {
    InternalError,
    ConsentOptedOut,
    LookBackNoClaims,
    LookBackOrgMismatch,
    LookBackProviderMismatch,
    LookBackDateMismatch,
}

impl OutcomeReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeReason::InternalError => "INTERNAL_ERROR",
            OutcomeReason::ConsentOptedOut => "CONSENT_OPTED_OUT",
            OutcomeReason::LookBackNoClaims => "LOOK_BACK_NO_CLAIMS",
            OutcomeReason::LookBackOrgMismatch => "LOOK_BACK_ORG_MISMATCH",
            OutcomeReason::LookBackProviderMismatch => "LOOK_BACK_PROVIDER_MISMATCH",
            OutcomeReason::LookBackDateMismatch => "LOOK_BACK_DATE_MISMATCH",
        }
    }

    /// Human readable detail written to the outcome
    pub fn detail(&self) -> &'static str {
        match self {
            OutcomeReason::InternalError => "An internal error occurred",
            OutcomeReason::ConsentOptedOut => "Data not available for opted out patient",
            OutcomeReason::LookBackNoClaims => {
                "Unable to retrieve patient data because no claims were found"
            }
            OutcomeReason::LookBackOrgMismatch => {
                "Unable to retrieve patient data due to organization relationship check failure"
            }
            OutcomeReason::LookBackProviderMismatch => {
                "Unable to retrieve patient data due to provider relationship check failure"
            }
            OutcomeReason::LookBackDateMismatch => {
                "Unable to retrieve patient data due to look back date check failure"
            }
        }
    }
}

impl fmt::Display for OutcomeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
}

/// FHIR issue type codes used by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueCode {
    /// Something went wrong fetching or checking the patient
    Exception,
    /// The patient was deliberately excluded
    Suppressed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetails {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub details: IssueDetails,
    /// Patient the issue relates to
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub location: Vec<String>,
}

/// An `OperationOutcome` resource, serialized as one NDJSON line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationOutcome {
    #[serde(rename = "resourceType")]
    resource_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub issue: Vec<OutcomeIssue>,
}

impl Default for OperationOutcome {
    fn default() -> Self {
        Self {
            resource_type: "OperationOutcome".to_string(),
            id: None,
            issue: Vec::new(),
        }
    }
}

impl OperationOutcome {
    fn single(code: IssueCode, text: String, patient: &PatientId) -> Self {
        Self {
            issue: vec![OutcomeIssue {
                severity: IssueSeverity::Error,
                code,
                details: IssueDetails { text },
                location: vec![patient.to_string()],
            }],
            ..Default::default()
        }
    }

    /// Exclusion by consent or look-back
    pub fn suppressed(reason: OutcomeReason, patient: &PatientId) -> Self {
        Self::single(IssueCode::Suppressed, reason.detail().to_string(), patient)
    }

    /// Error while checking or fetching a patient
    pub fn error(message: impl Into<String>, patient: &PatientId) -> Self {
        Self::single(IssueCode::Exception, message.into(), patient)
    }

    /// Per-type fetch failure
    pub fn from_source_error(error: &SourceError, patient: &PatientId) -> Self {
        let text = match error {
            SourceError::NotFound { .. } | SourceError::Server { .. } => error.to_string(),
            other => format!("Internal error: {other}"),
        };
        Self::single(IssueCode::Exception, text, patient)
    }

    /// Merges the issues of several outcomes into one
    pub fn combine(outcomes: impl IntoIterator<Item = OperationOutcome>) -> Self {
        Self {
            issue: outcomes.into_iter().flat_map(|o| o.issue).collect(),
            ..Default::default()
        }
    }

    /// Whether any issue is an exclusion
    pub fn is_suppression(&self) -> bool {
        self.issue.iter().any(|i| i.code == IssueCode::Suppressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::resource_type::ResourceType;

    fn patient() -> PatientId {
        PatientId::new("p-1").unwrap()
    }

    #[test]
    fn test_serialized_shape() {
        let outcome = OperationOutcome::suppressed(OutcomeReason::ConsentOptedOut, &patient());
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["resourceType"], "OperationOutcome");
        assert_eq!(json["issue"][0]["code"], "suppressed");
        assert_eq!(json["issue"][0]["severity"], "error");
        assert_eq!(json["issue"][0]["location"][0], "p-1");
    }

    #[test]
    fn test_source_error_text() {
        let outcome = OperationOutcome::from_source_error(
            &SourceError::Connection("reset by peer".to_string()),
            &patient(),
        );
        assert_eq!(
            outcome.issue[0].details.text,
            "Internal error: Failed to connect to source: reset by peer"
        );

        let outcome = OperationOutcome::from_source_error(
            &SourceError::Server {
                resource_type: ResourceType::Coverage,
                status: 500,
            },
            &patient(),
        );
        assert!(outcome.issue[0].details.text.contains("HTTP return code: 500"));
    }

    #[test]
    fn test_combine_keeps_all_issues() {
        let combined = OperationOutcome::combine([
            OperationOutcome::suppressed(OutcomeReason::ConsentOptedOut, &patient()),
            OperationOutcome::error("boom", &patient()),
        ]);
        assert_eq!(combined.issue.len(), 2);
        assert!(combined.is_suppression());
    }
}
