//! Exportable resource types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resource types the pipeline can fetch and write
///
/// `OperationOutcome` is never requested from a source; it is the type of the
/// outcome file the batch processor writes errors and exclusions to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    Patient,
    Coverage,
    ExplanationOfBenefit,
    OperationOutcome,
}

impl ResourceType {
    /// Types a client may request in an export
    pub const REQUESTABLE: [ResourceType; 3] = [
        ResourceType::Patient,
        ResourceType::Coverage,
        ResourceType::ExplanationOfBenefit,
    ];

    /// FHIR type name, also used in output file names
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Coverage => "Coverage",
            ResourceType::ExplanationOfBenefit => "ExplanationOfBenefit",
            ResourceType::OperationOutcome => "OperationOutcome",
        }
    }

    /// Whether this is the outcome type rather than patient data
    pub fn is_outcome(&self) -> bool {
        matches!(self, ResourceType::OperationOutcome)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Patient" => Ok(ResourceType::Patient),
            "Coverage" => Ok(ResourceType::Coverage),
            "ExplanationOfBenefit" => Ok(ResourceType::ExplanationOfBenefit),
            "OperationOutcome" => Ok(ResourceType::OperationOutcome),
            other => Err(format!("Unknown resource type: {other}")),
        }
    }
}
