//! Cloudflare DNS provider client.
//!
//! Only the two calls the failover engine needs are wrapped: fetching a
//! single record and rewriting it. Both authentication modes are supported:
//! a value that looks like a Global API Key (37 hex characters) paired with
//! an account email is sent as `X-Auth-Email`/`X-Auth-Key`, anything else is
//! treated as an API Token and sent as a Bearer header.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error};

use crate::config::CloudflareConfig;
use crate::error::FailoverError;

/// A DNS record as returned by the provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsRecord {
    /// Record id.
    pub id: String,
    /// Fully qualified record name.
    pub name: String,
    /// Record type (e.g. "A").
    #[serde(rename = "type")]
    pub record_type: String,
    /// Record content; an IP address for A/AAAA records.
    pub content: String,
    /// Record TTL in seconds.
    pub ttl: u32,
    /// Whether Cloudflare proxying is enabled.
    #[serde(default)]
    pub proxied: bool,
}

/// Fields written back on an update. Everything except `content` is carried
/// over from the fetched record so a failover only swaps the address.
#[derive(Debug, Clone, Serialize)]
pub struct RecordUpdate {
    /// Record name.
    pub name: String,
    /// Record type.
    #[serde(rename = "type")]
    pub record_type: String,
    /// New record content.
    pub content: String,
    /// Record TTL in seconds.
    pub ttl: u32,
    /// Proxying flag.
    pub proxied: bool,
}

impl RecordUpdate {
    /// Build an update that replaces only the content of `record`.
    pub fn with_content(record: &DnsRecord, content: impl Into<String>) -> Self {
        Self {
            name: record.name.clone(),
            record_type: record.record_type.clone(),
            content: content.into(),
            ttl: record.ttl,
            proxied: record.proxied,
        }
    }
}

/// DNS provider seam used by the orchestrator.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Fetch a record by id. `RecordNotFound` when it does not exist.
    async fn get_record(&self, zone_id: &str, record_id: &str)
        -> Result<DnsRecord, FailoverError>;

    /// Rewrite a record. `Provider` error when the API rejects the update.
    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<(), FailoverError>;
}

#[derive(Debug, Clone)]
enum AuthMode {
    Token(String),
    GlobalKey { email: String, key: String },
}

/// Global API Keys are 37 hex characters.
fn looks_like_global_key(key: &str) -> bool {
    key.len() == 37 && key.chars().all(|c| c.is_ascii_hexdigit())
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiError>,
    result: Option<T>,
}

impl<T> ApiResponse<T> {
    fn first_error(&self) -> String {
        self.errors
            .first()
            .map(|e| e.message.clone())
            .unwrap_or_else(|| "Cloudflare API error".to_string())
    }
}

/// HTTP client for the Cloudflare v4 API.
#[derive(Debug)]
pub struct CloudflareClient {
    client: reqwest::Client,
    api_base: String,
    auth: AuthMode,
}

impl CloudflareClient {
    /// Build a client from configuration.
    pub fn new(config: &CloudflareConfig) -> Result<Self, FailoverError> {
        let key = config.api_key.trim();
        if key.is_empty() {
            return Err(FailoverError::Config("cloudflare.api_key is empty".to_string()));
        }

        let auth = if looks_like_global_key(key) {
            let email = config
                .email
                .as_deref()
                .map(str::trim)
                .filter(|e| !e.is_empty())
                .ok_or_else(|| {
                    FailoverError::Config(
                        "cloudflare.api_key looks like a Global API Key but cloudflare.email is empty"
                            .to_string(),
                    )
                })?;
            AuthMode::GlobalKey {
                email: email.to_string(),
                key: key.to_string(),
            }
        } else {
            AuthMode::Token(key.to_string())
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            auth,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.api_base, path);
        let builder = self.client.request(method, url);
        match &self.auth {
            AuthMode::Token(token) => builder.bearer_auth(token),
            AuthMode::GlobalKey { email, key } => builder
                .header("X-Auth-Email", email)
                .header("X-Auth-Key", key),
        }
    }
}

#[async_trait]
impl DnsProvider for CloudflareClient {
    async fn get_record(
        &self,
        zone_id: &str,
        record_id: &str,
    ) -> Result<DnsRecord, FailoverError> {
        let path = format!("/zones/{zone_id}/dns_records/{record_id}");
        let response = self.request(reqwest::Method::GET, &path).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FailoverError::RecordNotFound {
                zone_id: zone_id.to_string(),
                record_id: record_id.to_string(),
            });
        }

        let body: ApiResponse<DnsRecord> = response.json().await?;
        if !body.success {
            let message = body.first_error();
            error!(zone_id, record_id, %status, message = %message, "record fetch failed");
            // Cloudflare reports a missing record with error code 81044
            if body.errors.iter().any(|e| e.code == 81044) {
                return Err(FailoverError::RecordNotFound {
                    zone_id: zone_id.to_string(),
                    record_id: record_id.to_string(),
                });
            }
            return Err(FailoverError::Provider(message));
        }

        let record = body
            .result
            .ok_or_else(|| FailoverError::Provider("empty result for record fetch".to_string()))?;
        debug!(zone_id, record_id, content = %record.content, "fetched record");
        Ok(record)
    }

    async fn update_record(
        &self,
        zone_id: &str,
        record_id: &str,
        update: &RecordUpdate,
    ) -> Result<(), FailoverError> {
        let path = format!("/zones/{zone_id}/dns_records/{record_id}");
        let response = self
            .request(reqwest::Method::PUT, &path)
            .json(update)
            .send()
            .await?;
        let status = response.status();

        let body: ApiResponse<DnsRecord> = response.json().await?;
        if !body.success {
            let message = body.first_error();
            error!(zone_id, record_id, %status, message = %message, "record update failed");
            return Err(FailoverError::Provider(message));
        }

        debug!(zone_id, record_id, content = %update.content, "record updated");
        Ok(())
    }
}
