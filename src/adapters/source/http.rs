//! HTTP source client
//!
//! One client serves all four source traits against a FHIR-style REST API:
//! searches return `Bundle` documents whose `entry[].resource` are the records, and
//! large result sets are paged through `link[relation=next]`.

use super::traits::{ClaimsSource, ConsentRecord, ConsentSource, IdentitySource, RecordSource};
use crate::config::SourceConfig;
use crate::domain::errors::SourceError;
use crate::domain::ids::{OrganizationId, PatientId, ProviderId};
use crate::domain::resource_type::ResourceType;
use crate::domain::{AggregatorError, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{Client, ClientBuilder, StatusCode};
use secrecy::ExposeSecret;
use serde_json::Value;
use std::time::Duration;

/// Upper bound on followed `next` links for one search
const MAX_PAGES: usize = 500;

/// HTTP implementation of the record, claims, consent and identity sources
///
/// # Example
///
/// ```no_run
/// use aggregator::adapters::source::{HttpSourceClient, RecordSource};
/// use aggregator::config::SourceConfig;
/// use aggregator::domain::{PatientId, ResourceType};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let client = HttpSourceClient::new(SourceConfig::default())?;
/// let patient = PatientId::new("-19990000000001")?;
/// let records = client.fetch(&patient, ResourceType::Coverage, None).await?;
/// println!("{} coverage records", records.len());
/// # Ok(())
/// # }
/// ```
pub struct HttpSourceClient {
    base_url: String,
    consent_url: String,
    client: Client,
    config: SourceConfig,
}

impl HttpSourceClient {
    /// Create a new client
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: SourceConfig) -> Result<Self> {
        let mut client_builder = ClientBuilder::new()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.timeout_seconds.min(30)));

        if !config.tls_verify {
            client_builder = client_builder.danger_accept_invalid_certs(true);
        }

        let client = client_builder.build().map_err(|e| {
            AggregatorError::Configuration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            consent_url: config.consent_base_url().trim_end_matches('/').to_string(),
            client,
            config,
        })
    }

    /// Base URL of the record and claims API
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build authorization header value
    fn auth_header_value(&self) -> Option<String> {
        if let Some(ref token) = self.config.bearer_token {
            Some(format!("Bearer {}", token.expose_secret().as_str()))
        } else if let (Some(ref username), Some(ref password)) =
            (&self.config.username, &self.config.password)
        {
            let credentials = format!("{username}:{}", password.expose_secret().as_str());
            let encoded = general_purpose::STANDARD.encode(credentials.as_bytes());
            Some(format!("Basic {encoded}"))
        } else {
            None
        }
    }

    /// Retry a request with exponential backoff
    ///
    /// Only transient failures are retried; a 404 or a malformed body is returned
    /// immediately.
    async fn retry_request<F, T, Fut>(&self, operation: F) -> std::result::Result<T, SourceError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, SourceError>>,
    {
        let retry = &self.config.retry;
        let mut attempt = 0;

        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    attempt += 1;
                    if attempt >= retry.max_retries || !is_transient(&e) {
                        return Err(e);
                    }

                    let delay_ms = (retry.initial_delay_ms as f64
                        * retry.backoff_multiplier.powi(attempt as i32 - 1))
                        as u64;
                    let delay_ms = delay_ms.min(retry.max_delay_ms);

                    tracing::warn!(
                        attempt = attempt,
                        max_retries = retry.max_retries,
                        delay_ms = delay_ms,
                        error = %e,
                        "Retrying source request after error"
                    );

                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }

    /// Sends one GET and parses the JSON body
    async fn get_json(
        &self,
        url: &str,
        query: &[(&str, String)],
        resource_type: ResourceType,
        patient: &PatientId,
    ) -> std::result::Result<Value, SourceError> {
        self.retry_request(|| async {
            let mut request = self
                .client
                .get(url)
                .query(query)
                .header("Accept", "application/fhir+json");

            if let Some(auth) = self.auth_header_value() {
                request = request.header("Authorization", auth);
            }

            let resp = request.send().await.map_err(|e| {
                if e.is_timeout() {
                    SourceError::Timeout(e.to_string())
                } else {
                    SourceError::Connection(e.to_string())
                }
            })?;

            match resp.status() {
                status if status.is_success() => resp
                    .json::<Value>()
                    .await
                    .map_err(|e| SourceError::InvalidResponse(e.to_string())),
                StatusCode::NOT_FOUND => Err(SourceError::NotFound {
                    resource_type,
                    patient_id: patient.to_string(),
                }),
                status => Err(SourceError::Server {
                    resource_type,
                    status: status.as_u16(),
                }),
            }
        })
        .await
    }

    /// Runs a search and collects the resources of every page
    async fn search(
        &self,
        url: String,
        query: Vec<(&str, String)>,
        resource_type: ResourceType,
        patient: &PatientId,
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let mut resources = Vec::new();
        let mut bundle = self.get_json(&url, &query, resource_type, patient).await?;

        for _ in 0..MAX_PAGES {
            if bundle.get("resourceType").and_then(Value::as_str) != Some("Bundle") {
                return Err(SourceError::InvalidResponse(format!(
                    "expected a Bundle of {resource_type} resources"
                )));
            }

            resources.extend(bundle_resources(&bundle));

            match next_link(&bundle) {
                Some(next) if next != url => {
                    bundle = self.get_json(&next, &[], resource_type, patient).await?;
                }
                _ => return Ok(resources),
            }
        }

        tracing::warn!(
            patient_id = %patient,
            resource_type = %resource_type,
            pages = MAX_PAGES,
            "Stopped following search pages"
        );
        Ok(resources)
    }
}

fn is_transient(error: &SourceError) -> bool {
    match error {
        SourceError::Connection(_) | SourceError::Timeout(_) => true,
        SourceError::Server { status, .. } => *status >= 500 || *status == 429,
        SourceError::NotFound { .. } | SourceError::InvalidResponse(_) => false,
    }
}

/// `entry[].resource` of a bundle
fn bundle_resources(bundle: &Value) -> Vec<Value> {
    bundle
        .get("entry")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter_map(|e| e.get("resource").cloned())
                .collect()
        })
        .unwrap_or_default()
}

fn next_link(bundle: &Value) -> Option<String> {
    bundle
        .get("link")?
        .as_array()?
        .iter()
        .find(|l| l.get("relation").and_then(Value::as_str) == Some("next"))?
        .get("url")?
        .as_str()
        .map(str::to_string)
}

/// Reads the newest consent resource of a search result
fn parse_consent(resources: &[Value]) -> std::result::Result<Option<ConsentRecord>, SourceError> {
    let mut records = Vec::new();
    for resource in resources {
        let policy_code = resource
            .pointer("/policyRule/coding/0/code")
            .and_then(Value::as_str)
            .ok_or_else(|| SourceError::InvalidResponse("consent without policy code".into()))?;
        let date = resource
            .get("dateTime")
            .and_then(Value::as_str)
            .and_then(|d| d.get(..10))
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .ok_or_else(|| SourceError::InvalidResponse("consent without dateTime".into()))?;

        records.push(ConsentRecord {
            policy_code: policy_code.to_string(),
            active: resource.get("status").and_then(Value::as_str) == Some("active"),
            consent_date: date,
        });
    }
    Ok(records.into_iter().max_by_key(|r| r.consent_date))
}

#[async_trait]
impl RecordSource for HttpSourceClient {
    async fn fetch(
        &self,
        patient: &PatientId,
        resource_type: ResourceType,
        since: Option<DateTime<Utc>>,
    ) -> std::result::Result<Vec<Value>, SourceError> {
        let mut query = match resource_type {
            ResourceType::Patient => vec![("_id", patient.to_string())],
            ResourceType::Coverage => vec![("beneficiary", format!("Patient/{patient}"))],
            ResourceType::ExplanationOfBenefit => vec![
                ("patient", patient.to_string()),
                ("excludeSAMHSA", "true".to_string()),
            ],
            ResourceType::OperationOutcome => {
                return Err(SourceError::InvalidResponse(
                    "OperationOutcome cannot be fetched".to_string(),
                ))
            }
        };
        if let Some(since) = since {
            query.push((
                "_lastUpdated",
                format!("gt{}", since.to_rfc3339_opts(SecondsFormat::Millis, true)),
            ));
        }

        let url = format!("{}/{}", self.base_url, resource_type);
        let records = self.search(url, query, resource_type, patient).await?;

        tracing::debug!(
            patient_id = %patient,
            resource_type = %resource_type,
            count = records.len(),
            "Fetched records"
        );
        Ok(records)
    }
}

#[async_trait]
impl ClaimsSource for HttpSourceClient {
    async fn fetch_claims(
        &self,
        organization: &OrganizationId,
        patient: &PatientId,
        provider: &ProviderId,
        window_months: i64,
    ) -> std::result::Result<Value, SourceError> {
        tracing::debug!(
            organization_id = %organization,
            provider_id = %provider,
            patient_id = %patient,
            window_months = window_months,
            "Fetching claims for look-back"
        );

        let url = format!("{}/{}", self.base_url, ResourceType::ExplanationOfBenefit);
        let query = vec![
            ("patient", patient.to_string()),
            ("excludeSAMHSA", "true".to_string()),
            ("_count", self.config.claims_page_size.to_string()),
        ];
        self.get_json(&url, &query, ResourceType::ExplanationOfBenefit, patient)
            .await
    }
}

#[async_trait]
impl ConsentSource for HttpSourceClient {
    async fn fetch_consent(
        &self,
        patient: &PatientId,
    ) -> std::result::Result<Option<ConsentRecord>, SourceError> {
        let url = format!("{}/Consent", self.consent_url);
        let query = vec![("patient", patient.to_string())];
        match self
            .search(url, query, ResourceType::Patient, patient)
            .await
        {
            Ok(resources) => parse_consent(&resources),
            Err(SourceError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl IdentitySource for HttpSourceClient {
    async fn confirm_identity(&self, patient: &PatientId) -> std::result::Result<(), SourceError> {
        let url = format!("{}/Patient/{}", self.base_url, patient);
        self.get_json(&url, &[], ResourceType::Patient, patient)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{secret_string, RetryConfig};
    use mockito::Matcher;
    use serde_json::json;

    fn config(base_url: String) -> SourceConfig {
        SourceConfig {
            base_url,
            username: Some("user".to_string()),
            password: Some(secret_string("pass".to_string())),
            retry: RetryConfig {
                max_retries: 2,
                initial_delay_ms: 1,
                max_delay_ms: 5,
                backoff_multiplier: 2.0,
            },
            ..SourceConfig::default()
        }
    }

    fn patient() -> PatientId {
        PatientId::new("-19990000000001").unwrap()
    }

    fn bundle(resources: Vec<Value>) -> String {
        json!({
            "resourceType": "Bundle",
            "type": "searchset",
            "entry": resources.into_iter().map(|r| json!({ "resource": r })).collect::<Vec<_>>()
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_fetch_patient_with_basic_auth() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Patient")
            .match_query(Matcher::UrlEncoded("_id".into(), "-19990000000001".into()))
            .match_header("authorization", "Basic dXNlcjpwYXNz")
            .with_status(200)
            .with_header("content-type", "application/fhir+json")
            .with_body(bundle(vec![json!({"resourceType": "Patient", "id": "p"})]))
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let records = client
            .fetch(&patient(), ResourceType::Patient, None)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["resourceType"], "Patient");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_follows_next_links() {
        let mut server = mockito::Server::new_async().await;
        let next = format!("{}/ExplanationOfBenefit?page=2", server.url());
        let first = json!({
            "resourceType": "Bundle",
            "link": [{ "relation": "next", "url": next }],
            "entry": [{ "resource": { "resourceType": "ExplanationOfBenefit", "id": "1" } }]
        });
        server
            .mock("GET", "/ExplanationOfBenefit")
            .match_query(Matcher::UrlEncoded("patient".into(), "-19990000000001".into()))
            .with_status(200)
            .with_body(first.to_string())
            .create_async()
            .await;
        server
            .mock("GET", "/ExplanationOfBenefit")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_status(200)
            .with_body(bundle(vec![json!({"resourceType": "ExplanationOfBenefit", "id": "2"})]))
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let records = client
            .fetch(&patient(), ResourceType::ExplanationOfBenefit, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Coverage")
            .match_query(Matcher::Any)
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let err = client
            .fetch(&patient(), ResourceType::Coverage, None)
            .await
            .unwrap_err();

        assert_eq!(
            err.to_string(),
            "Coverage resource not found for patient -19990000000001"
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Coverage")
            .match_query(Matcher::Any)
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let err = client
            .fetch(&patient(), ResourceType::Coverage, None)
            .await
            .unwrap_err();

        assert!(matches!(err, SourceError::Server { status: 503, .. }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_bundle_response_is_invalid() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Patient")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"resourceType": "OperationOutcome"}).to_string())
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let err = client
            .fetch(&patient(), ResourceType::Patient, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_fetch_consent_opt_out() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Consent")
            .match_query(Matcher::UrlEncoded("patient".into(), "-19990000000001".into()))
            .with_status(200)
            .with_body(bundle(vec![json!({
                "resourceType": "Consent",
                "status": "active",
                "dateTime": "2023-02-01T00:00:00Z",
                "policyRule": { "coding": [{ "code": "OPTOUT" }] }
            })]))
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let record = client.fetch_consent(&patient()).await.unwrap().unwrap();
        assert_eq!(record.policy_code, "OPTOUT");
        assert!(record.active);
        assert_eq!(
            record.consent_date,
            NaiveDate::from_ymd_opt(2023, 2, 1).unwrap()
        );
    }

    #[tokio::test]
    async fn test_fetch_consent_empty() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Consent")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(bundle(Vec::new()))
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        assert!(client.fetch_consent(&patient()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirm_identity_not_found() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Patient/-19990000000001")
            .with_status(404)
            .create_async()
            .await;

        let client = HttpSourceClient::new(config(server.url())).unwrap();
        let err = client.confirm_identity(&patient()).await.unwrap_err();
        assert!(matches!(err, SourceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_bearer_token_takes_precedence() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Patient/-19990000000001")
            .match_header("authorization", "Bearer abc123")
            .with_status(200)
            .with_body(json!({"resourceType": "Patient"}).to_string())
            .create_async()
            .await;

        let mut config = config(server.url());
        config.bearer_token = Some(secret_string("abc123".to_string()));
        let client = HttpSourceClient::new(config).unwrap();
        client.confirm_identity(&patient()).await.unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_parse_consent_picks_newest() {
        let resources = vec![
            json!({"status": "active", "dateTime": "2022-01-01", "policyRule": {"coding": [{"code": "OPTOUT"}]}}),
            json!({"status": "active", "dateTime": "2023-01-01", "policyRule": {"coding": [{"code": "OPTIN"}]}}),
        ];
        let record = parse_consent(&resources).unwrap().unwrap();
        assert_eq!(record.policy_code, "OPTIN");
    }
}
