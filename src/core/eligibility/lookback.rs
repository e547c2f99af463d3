//! Claims look-back validation
//!
//! A patient is eligible for export by a provider only when the claims history shows
//! a recent relationship: at least one claim billed by the provider (directly or as a
//! care-team member), for the requesting organization, whose billing period ended
//! within the look-back window.

use crate::adapters::source::ClaimsSource;
use crate::config::OperationsConfig;
use crate::domain::ids::{OrganizationId, PatientId, ProviderId};
use crate::domain::outcome::OutcomeReason;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Identifier system of provider and organization identifiers on claims
pub const NPI_SYSTEM: &str = "http://hl7.org/fhir/sid/us-npi";

/// Result of a look-back check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookBackDecision {
    /// At least one claim establishes the relationship
    Pass,
    /// No claim does; the reason names the first criterion that never matched
    Fail(OutcomeReason),
    /// The claims could not be fetched or read
    Error(String),
}

/// Window and reference date used by the claims validator
#[derive(Debug, Clone)]
pub struct LookBackSettings {
    pub window_months: i64,
    /// Fixed reference date, defaults to today
    pub reference_date: Option<NaiveDate>,
    /// Organizations that skip the check entirely
    pub exempt_orgs: HashSet<String>,
}

impl LookBackSettings {
    pub fn from_config(config: &OperationsConfig) -> Self {
        Self {
            window_months: config.look_back_months,
            reference_date: config.look_back_date,
            exempt_orgs: config.look_back_exempt_orgs.iter().cloned().collect(),
        }
    }

    fn reference(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}

/// Look-back validator, real or canned
pub enum LookBackValidator {
    /// Evaluates the claims returned by a claims source
    Claims {
        source: Arc<dyn ClaimsSource + Send + Sync>,
        settings: LookBackSettings,
    },
    /// Returns a fixed decision for every patient
    Mock(LookBackDecision),
}

impl LookBackValidator {
    /// Builds the validator for the configured operations settings
    ///
    /// A disabled check becomes a validator that passes everyone.
    pub fn from_config(
        config: &OperationsConfig,
        source: Arc<dyn ClaimsSource + Send + Sync>,
    ) -> Self {
        if !config.look_back_enabled {
            tracing::info!("Look-back check disabled, every patient passes");
            return LookBackValidator::Mock(LookBackDecision::Pass);
        }
        LookBackValidator::Claims {
            source,
            settings: LookBackSettings::from_config(config),
        }
    }

    /// Checks the provider/organization relationship for one patient
    pub async fn validate(
        &self,
        organization: &OrganizationId,
        patient: &PatientId,
        provider: &ProviderId,
    ) -> LookBackDecision {
        let (source, settings) = match self {
            LookBackValidator::Mock(decision) => return decision.clone(),
            LookBackValidator::Claims { source, settings } => (source, settings),
        };

        if settings.exempt_orgs.contains(organization.as_str()) {
            tracing::info!(
                organization_id = %organization,
                patient_id = %patient,
                "Skipping look-back for exempt organization"
            );
            return LookBackDecision::Pass;
        }

        let claims = match source
            .fetch_claims(organization, patient, provider, settings.window_months)
            .await
        {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(
                    patient_id = %patient,
                    error = %e,
                    "Failed to fetch claims for look-back"
                );
                return LookBackDecision::Error(format!("Unable to check claims history: {e}"));
            }
        };

        evaluate_claims(
            &claims,
            organization,
            provider,
            settings.window_months,
            settings.reference(),
        )
    }
}

/// Which criteria one claim met
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimMatch {
    /// All required fields were present
    pub complete: bool,
    pub organization: bool,
    pub provider: bool,
    pub within_window: bool,
    pub months_difference: i64,
}

impl ClaimMatch {
    pub fn passes(&self) -> bool {
        self.complete && self.organization && self.provider && self.within_window
    }
}

/// Evaluates a claims document
///
/// The document must be a `Bundle`; any claim meeting every criterion passes the
/// patient.
pub fn evaluate_claims(
    claims: &Value,
    organization: &OrganizationId,
    provider: &ProviderId,
    window_months: i64,
    reference: NaiveDate,
) -> LookBackDecision {
    if claims.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
        return LookBackDecision::Error("Claims response is not a Bundle".to_string());
    }

    let matches: Vec<ClaimMatch> = claims
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|entry| entry.get("resource"))
                .map(|claim| match_claim(claim, organization, provider, window_months, reference))
                .collect()
        })
        .unwrap_or_default();

    if matches.iter().any(ClaimMatch::passes) {
        LookBackDecision::Pass
    } else {
        LookBackDecision::Fail(analyze(&matches))
    }
}

/// Whether one claim establishes the relationship
pub fn has_claim_within(
    claim: &Value,
    organization: &OrganizationId,
    provider: &ProviderId,
    window_months: i64,
    reference: NaiveDate,
) -> bool {
    match_claim(claim, organization, provider, window_months, reference).passes()
}

fn match_claim(
    claim: &Value,
    organization: &OrganizationId,
    provider: &ProviderId,
    window_months: i64,
    reference: NaiveDate,
) -> ClaimMatch {
    let billing_end = claim
        .pointer("/billablePeriod/end")
        .and_then(Value::as_str)
        .and_then(parse_year_month);
    let claim_org = claim
        .pointer("/organization/identifier")
        .and_then(npi_value);
    let mut providers: HashSet<&str> = claim
        .pointer("/careTeam")
        .and_then(Value::as_array)
        .map(|team| {
            team.iter()
                .filter_map(|member| member.pointer("/provider/identifier"))
                .filter_map(npi_value)
                .collect()
        })
        .unwrap_or_default();
    if let Some(npi) = claim.pointer("/provider/identifier").and_then(npi_value) {
        providers.insert(npi);
    }

    let (Some((year, month)), Some(claim_org)) = (billing_end, claim_org) else {
        return ClaimMatch::default();
    };

    let months_difference = months_between((year, month), (reference.year(), reference.month()));
    ClaimMatch {
        complete: true,
        organization: claim_org == organization.as_str(),
        provider: providers.contains(provider.as_str()),
        within_window: months_difference < window_months,
        months_difference,
    }
}

/// Picks the failure reason for a set of non-passing claims
///
/// Criteria are checked in order organization, provider, date: the reason is the
/// first one that no usable claim satisfied.
fn analyze(matches: &[ClaimMatch]) -> OutcomeReason {
    let usable: Vec<&ClaimMatch> = matches.iter().filter(|m| m.complete).collect();
    if usable.is_empty() {
        return OutcomeReason::LookBackNoClaims;
    }
    if !usable.iter().any(|m| m.organization) {
        return OutcomeReason::LookBackOrgMismatch;
    }
    if !usable.iter().any(|m| m.organization && m.provider) {
        return OutcomeReason::LookBackProviderMismatch;
    }
    OutcomeReason::LookBackDateMismatch
}

/// Value of an NPI identifier, ignoring other systems and blank values
fn npi_value(identifier: &Value) -> Option<&str> {
    if identifier.get("system").and_then(Value::as_str) != Some(NPI_SYSTEM) {
        return None;
    }
    identifier
        .get("value")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

/// Year and month of a FHIR date or dateTime, in UTC
fn parse_year_month(value: &str) -> Option<(i32, u32)> {
    if value.len() > 10 {
        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            let utc = dt.with_timezone(&Utc);
            return Some((utc.year(), utc.month()));
        }
    }
    let mut parts = value.split('-');
    let year = parts.next()?.parse::<i32>().ok()?;
    let month = parts.next()?.get(..2)?.parse::<u32>().ok()?;
    (1..=12).contains(&month).then_some((year, month))
}

/// Whole calendar months from `from` to `to`; negative when `from` is later
fn months_between(from: (i32, u32), to: (i32, u32)) -> i64 {
    (to.0 as i64 * 12 + to.1 as i64) - (from.0 as i64 * 12 + from.1 as i64)
}
