//! Domain identifier types with validation
//!
//! Newtype wrappers keep job, batch and worker identifiers from being mixed up with
//! each other or with the opaque organization, provider and patient identifiers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wraps an existing UUID
            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Returns the underlying UUID
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s.trim())
                    .map(Self)
                    .map_err(|e| format!("Invalid {} '{}': {}", $label, s, e))
            }
        }
    };
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Creates a new identifier, rejecting blank values
            pub fn new(id: impl Into<String>) -> Result<Self, String> {
                let id = id.into();
                if id.trim().is_empty() {
                    return Err(format!("{} cannot be empty", $label));
                }
                Ok(Self(id))
            }

            /// Returns the identifier as a string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consumes self and returns the inner String
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

uuid_id!(
    /// Client-visible export job identifier
    ///
    /// ```
    /// use aggregator::domain::ids::JobId;
    /// use std::str::FromStr;
    ///
    /// let job_id = JobId::from_str("7d44b88c-4199-4bad-97dc-d78268e01398").unwrap();
    /// assert_eq!(job_id.to_string(), "7d44b88c-4199-4bad-97dc-d78268e01398");
    /// ```
    JobId,
    "job ID"
);

uuid_id!(
    /// Identifier of one claimable batch
    BatchId,
    "batch ID"
);

uuid_id!(
    /// Identity of an aggregation engine instance holding batch leases
    WorkerId,
    "worker ID"
);

string_id!(
    /// Organization identifier
    OrganizationId,
    "Organization ID"
);

string_id!(
    /// Provider identifier (NPI)
    ProviderId,
    "Provider ID"
);

string_id!(
    /// Patient identifier as understood by the upstream sources
    PatientId,
    "Patient ID"
);
