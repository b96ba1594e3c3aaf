//! Audit store HTTP client.
//!
//! Speaks the Elasticsearch document API: cluster health, index
//! create-if-absent, single document writes and searches. Every public
//! operation is non-throwing. Failures become `false`, an empty result or
//! [`HealthStatus::Unreachable`], and are reported once through the
//! structured event log.

use chrono::Utc;
use reqwest::{Client, Method, RequestBuilder, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, instrument};

use super::event::{ApiRequestRecord, AuditEvent, Details, ErrorRecord, IndexName};
use crate::config::Config;
use crate::errors::ApiError;
use crate::observability::health::HealthStatus;
use crate::observability::logger::StructuredLogger;
use crate::observability::ServiceIdentity;

/// Connect timeout for audit store requests in seconds.
const CONNECT_TIMEOUT_SECS: u64 = 2;

/// Connection settings for the audit store.
#[derive(Debug, Clone)]
pub struct AuditStoreSettings {
    /// Base URL without trailing slash (e.g. "http://localhost:9200").
    pub base_url: String,
    pub index_prefix: String,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub request_timeout: Duration,
}

impl AuditStoreSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.audit_store_url.clone(),
            index_prefix: config.audit_index_prefix.clone(),
            username: config.audit_store_username.clone(),
            password: config.audit_store_password.clone(),
            request_timeout: Duration::from_secs(config.audit_request_timeout_seconds),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ClusterHealth {
    status: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    hits: SearchHits,
}

#[derive(Debug, Deserialize)]
struct SearchHits {
    #[serde(default)]
    hits: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(rename = "_source")]
    source: Value,
}

/// Writer for time-partitioned audit documents.
pub struct AuditIndexWriter {
    client: Client,
    base_url: Url,
    settings: AuditStoreSettings,
    identity: ServiceIdentity,
    logger: Arc<StructuredLogger>,
    /// Indices created or confirmed present by this process.
    known_indices: Mutex<HashSet<String>>,
}

impl AuditIndexWriter {
    /// Create a new writer.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Internal` if the base URL is not an absolute
    /// http(s) URL or the HTTP client cannot be built.
    pub fn new(
        settings: AuditStoreSettings,
        identity: ServiceIdentity,
        logger: Arc<StructuredLogger>,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(&settings.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                error!(
                    target: "user_api.audit.writer",
                    base_url = %settings.base_url,
                    "Invalid audit store URL"
                );
                ApiError::Internal
            })?;

        let client = Client::builder()
            .timeout(settings.request_timeout)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "user_api.audit.writer", error = %e, "Failed to build HTTP client");
                ApiError::Internal
            })?;

        Ok(Self {
            client,
            base_url,
            settings,
            identity,
            logger,
            known_indices: Mutex::new(HashSet::new()),
        })
    }

    pub fn index_prefix(&self) -> &str {
        &self.settings.index_prefix
    }

    /// Build a request to `segments` below the base URL. Each segment is
    /// percent-encoded, so index names and ids never add path levels or a
    /// query string.
    fn request(&self, method: Method, segments: &[&str]) -> RequestBuilder {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        let builder = self.client.request(method, url);
        match (&self.settings.username, &self.settings.password) {
            (Some(user), Some(password)) => {
                builder.basic_auth(user, Some(password.expose_secret()))
            }
            _ => builder,
        }
    }

    fn report_failure(&self, message: &str, index: &str, error: &str) {
        self.logger.error(
            message,
            json!({ "index": index, "error": error, "component": "audit_index_writer" }),
        );
    }

    /// Check the store's cluster health.
    ///
    /// `green` and `yellow` map to Healthy; any other status, an error
    /// response, or a connection failure maps to Unreachable.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> HealthStatus {
        let response = match self.request(Method::GET, &["_cluster", "health"]).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(target: "user_api.audit.writer", error = %e, "Audit store health check failed");
                return HealthStatus::Unreachable;
            }
        };

        if !response.status().is_success() {
            debug!(
                target: "user_api.audit.writer",
                status = %response.status(),
                "Audit store health check returned error status"
            );
            return HealthStatus::Unreachable;
        }

        match response.json::<ClusterHealth>().await {
            Ok(health) if health.status == "green" || health.status == "yellow" => {
                HealthStatus::Healthy
            }
            Ok(health) => {
                debug!(target: "user_api.audit.writer", cluster_status = %health.status, "Audit store cluster unhealthy");
                HealthStatus::Unreachable
            }
            Err(e) => {
                debug!(target: "user_api.audit.writer", error = %e, "Malformed cluster health response");
                HealthStatus::Unreachable
            }
        }
    }

    /// Create `name` if it does not exist.
    ///
    /// Returns `true` when the index exists afterwards, including when a
    /// concurrent creator won the race.
    #[instrument(skip(self, mapping))]
    pub async fn ensure_index(&self, name: &str, mapping: Option<&Value>) -> bool {
        match self.request(Method::HEAD, &[name]).send().await {
            Ok(response) if response.status().is_success() => return true,
            Ok(response) if response.status() == StatusCode::NOT_FOUND => {}
            Ok(response) => {
                self.report_failure(
                    "Failed to check audit index",
                    name,
                    &format!("unexpected status {}", response.status()),
                );
                return false;
            }
            Err(e) => {
                self.report_failure("Failed to check audit index", name, &e.to_string());
                return false;
            }
        }

        let body = match mapping {
            Some(mapping) => json!({ "mappings": mapping }),
            None => json!({}),
        };

        let response = match self.request(Method::PUT, &[name]).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                self.report_failure("Failed to create audit index", name, &e.to_string());
                return false;
            }
        };

        let status = response.status();
        if status.is_success() {
            debug!(target: "user_api.audit.writer", index = %name, "Created audit index");
            return true;
        }

        // Lost a creation race with another writer
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if body.pointer("/error/type").and_then(Value::as_str)
            == Some("resource_already_exists_exception")
        {
            return true;
        }

        self.report_failure(
            "Failed to create audit index",
            name,
            &format!("status {}: {}", status, body),
        );
        false
    }

    /// Write one document. The store assigns an id when `id` is `None`.
    #[instrument(skip(self, document))]
    pub async fn index_document(&self, index: &str, document: &Value, id: Option<&str>) -> bool {
        let builder = match id {
            Some(id) => self.request(Method::PUT, &[index, "_doc", id]),
            None => self.request(Method::POST, &[index, "_doc"]),
        };

        match builder.json(document).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                self.report_failure(
                    "Failed to index audit document",
                    index,
                    &format!("status {}: {}", status, body),
                );
                false
            }
            Err(e) => {
                self.report_failure("Failed to index audit document", index, &e.to_string());
                false
            }
        }
    }

    /// Search `index`, returning the matching documents' sources.
    ///
    /// Any failure yields an empty result.
    #[instrument(skip(self, query))]
    pub async fn search(&self, index: &str, query: &Value, size: usize) -> Vec<Value> {
        let response = match self
            .request(Method::POST, &[index, "_search"])
            .query(&[("size", size)])
            .json(query)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                self.report_failure(
                    "Audit search failed",
                    index,
                    &format!("status {}", response.status()),
                );
                return Vec::new();
            }
            Err(e) => {
                self.report_failure("Audit search failed", index, &e.to_string());
                return Vec::new();
            }
        };

        match response.json::<SearchResponse>().await {
            Ok(parsed) => parsed.hits.hits.into_iter().map(|hit| hit.source).collect(),
            Err(e) => {
                self.report_failure("Audit search failed", index, &e.to_string());
                Vec::new()
            }
        }
    }

    /// Write an event into its daily partition, creating the partition with
    /// the category mapping on first use.
    pub async fn write_event(&self, event: &AuditEvent) -> bool {
        let index = IndexName::for_event(&self.settings.index_prefix, event);

        if !self.is_known(&index)
            && self
                .ensure_index(index.as_str(), Some(&event.category().mapping()))
                .await
        {
            self.known_indices
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(index.as_str().to_string());
        }

        let document = event.document(&self.identity).to_value();
        self.index_document(index.as_str(), &document, None).await
    }

    fn is_known(&self, index: &IndexName) -> bool {
        self.known_indices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(index.as_str())
    }

    pub async fn log_user_action(&self, user_id: i64, action: &str, details: Details) -> bool {
        self.write_event(&AuditEvent::user_action(user_id, action, details, Utc::now()))
            .await
    }

    pub async fn log_api_request(&self, record: ApiRequestRecord) -> bool {
        self.write_event(&AuditEvent::api_request(record, Utc::now()))
            .await
    }

    pub async fn log_error(&self, record: ErrorRecord) -> bool {
        self.write_event(&AuditEvent::error(record, Utc::now())).await
    }
}

impl std::fmt::Debug for AuditIndexWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditIndexWriter")
            .field("settings", &self.settings)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
