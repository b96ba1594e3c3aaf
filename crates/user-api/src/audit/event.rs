//! Audit event model.
//!
//! Each category has a fixed field schema and a fixed index mapping, so the
//! documents written into one daily index always agree on field types.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

use crate::observability::ServiceIdentity;

/// Audit partition. Selects the index an event is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuditCategory {
    UserActions,
    ApiRequests,
    Errors,
}

impl AuditCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditCategory::UserActions => "user-actions",
            AuditCategory::ApiRequests => "api-requests",
            AuditCategory::Errors => "errors",
        }
    }

    /// Index mapping used when creating a partition for this category.
    pub fn mapping(&self) -> Value {
        let category_fields = match self {
            AuditCategory::UserActions => json!({
                "user_id": {"type": "long"},
                "action": {"type": "keyword"},
                "details": {"type": "object", "dynamic": true}
            }),
            AuditCategory::ApiRequests => json!({
                "method": {"type": "keyword"},
                "endpoint": {"type": "keyword"},
                "status_code": {"type": "integer"},
                "duration_ms": {"type": "double"},
                "user_id": {"type": "long"},
                "ip_address": {"type": "keyword"}
            }),
            AuditCategory::Errors => json!({
                "error_type": {"type": "keyword"},
                "error_message": {"type": "text"},
                "stack_trace": {"type": "text", "index": false},
                "user_id": {"type": "long"},
                "request_id": {"type": "keyword"}
            }),
        };

        let mut properties = json!({
            "timestamp": {"type": "date"},
            "service": {"type": "keyword"},
            "environment": {"type": "keyword"}
        });
        if let (Some(all), Value::Object(extra)) = (properties.as_object_mut(), category_fields) {
            all.extend(extra);
        }

        json!({ "properties": properties })
    }
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scalar field value of an audit document.
///
/// `Map` only appears as the `details` field of user actions and holds
/// scalars itself.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Map(BTreeMap<String, FieldValue>),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<u16> for FieldValue {
    fn from(v: u16) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        FieldValue::Text(v.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

/// Free-form details of a user action: a flat map of scalars.
pub type Details = BTreeMap<String, FieldValue>;

/// Request summary written to the `api-requests` partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequestRecord {
    pub method: String,
    pub endpoint: String,
    pub status_code: u16,
    pub duration_ms: f64,
    pub user_id: Option<i64>,
    pub ip_address: Option<String>,
}

/// Failure summary written to the `errors` partition.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorRecord {
    pub error_type: String,
    pub error_message: String,
    pub stack_trace: Option<String>,
    pub user_id: Option<i64>,
    pub request_id: Option<String>,
}

/// Immutable audit event.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    category: AuditCategory,
    timestamp: DateTime<Utc>,
    fields: Vec<(&'static str, FieldValue)>,
}

impl AuditEvent {
    pub fn user_action(
        user_id: i64,
        action: &str,
        details: Details,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            category: AuditCategory::UserActions,
            timestamp,
            fields: vec![
                ("user_id", user_id.into()),
                ("action", action.into()),
                ("details", FieldValue::Map(details)),
            ],
        }
    }

    pub fn api_request(record: ApiRequestRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            category: AuditCategory::ApiRequests,
            timestamp,
            fields: vec![
                ("method", record.method.into()),
                ("endpoint", record.endpoint.into()),
                ("status_code", record.status_code.into()),
                ("duration_ms", record.duration_ms.into()),
                ("user_id", record.user_id.into()),
                ("ip_address", record.ip_address.into()),
            ],
        }
    }

    pub fn error(record: ErrorRecord, timestamp: DateTime<Utc>) -> Self {
        Self {
            category: AuditCategory::Errors,
            timestamp,
            fields: vec![
                ("error_type", record.error_type.into()),
                ("error_message", record.error_message.into()),
                ("stack_trace", record.stack_trace.into()),
                ("user_id", record.user_id.into()),
                ("request_id", record.request_id.into()),
            ],
        }
    }

    pub fn category(&self) -> AuditCategory {
        self.category
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn fields(&self) -> &[(&'static str, FieldValue)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find_map(|(key, value)| (*key == name).then_some(value))
    }

    /// Store document: `timestamp`, category fields in schema order, then
    /// `service` and `environment`.
    pub fn document<'a>(&'a self, identity: &'a ServiceIdentity) -> AuditDocument<'a> {
        AuditDocument {
            event: self,
            identity,
        }
    }
}

/// Serializable view of an [`AuditEvent`] stamped with the service identity.
pub struct AuditDocument<'a> {
    event: &'a AuditEvent,
    identity: &'a ServiceIdentity,
}

impl AuditDocument<'_> {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

impl Serialize for AuditDocument<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.event.fields.len() + 3))?;
        map.serialize_entry(
            "timestamp",
            &self
                .event
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;
        for (key, value) in &self.event.fields {
            map.serialize_entry(key, value)?;
        }
        map.serialize_entry("service", &self.identity.service)?;
        map.serialize_entry("environment", &self.identity.environment)?;
        map.end()
    }
}

/// Daily index name: `<prefix>-<category>-<YYYY.MM.DD>`.
///
/// The date is the UTC calendar date of the event's own timestamp, so an
/// event queued just before midnight still lands in the partition of the day
/// it happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexName(String);

impl IndexName {
    pub fn new(prefix: &str, category: AuditCategory, timestamp: DateTime<Utc>) -> Self {
        Self(format!(
            "{}-{}-{}",
            prefix,
            category.as_str(),
            timestamp.format("%Y.%m.%d")
        ))
    }

    pub fn for_event(prefix: &str, event: &AuditEvent) -> Self {
        Self::new(prefix, event.category, event.timestamp)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for IndexName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn test_index_name_format() {
        let name = IndexName::new("user-mgt", AuditCategory::UserActions, at(2024, 3, 7, 9, 30));
        assert_eq!(name.as_str(), "user-mgt-user-actions-2024.03.07");
    }

    #[test]
    fn test_index_name_same_day_identical() {
        let morning = IndexName::new("user-mgt", AuditCategory::ApiRequests, at(2024, 3, 7, 0, 0));
        let night = IndexName::new("user-mgt", AuditCategory::ApiRequests, at(2024, 3, 7, 23, 59));
        assert_eq!(morning, night);
    }

    #[test]
    fn test_index_name_next_day_differs() {
        let t = at(2024, 12, 31, 23, 59);
        let today = IndexName::new("user-mgt", AuditCategory::Errors, t);
        let tomorrow = IndexName::new("user-mgt", AuditCategory::Errors, t + Duration::days(1));
        assert_ne!(today, tomorrow);
        assert_eq!(tomorrow.as_str(), "user-mgt-errors-2025.01.01");
    }

    #[test]
    fn test_index_name_uses_event_timestamp() {
        let event = AuditEvent::user_action(7, "user_created", Details::new(), at(2023, 1, 2, 3, 4));
        assert_eq!(
            IndexName::for_event("user-mgt", &event).as_str(),
            "user-mgt-user-actions-2023.01.02"
        );
    }

    #[test]
    fn test_user_action_document() {
        let mut details = Details::new();
        details.insert("username".to_string(), "bob".into());
        let event = AuditEvent::user_action(7, "user_created", details, at(2024, 3, 7, 9, 30));
        let identity = ServiceIdentity::new("user-mgt-api", "development");

        let doc = event.document(&identity).to_value();

        assert_eq!(doc["user_id"], 7);
        assert_eq!(doc["action"], "user_created");
        assert_eq!(doc["details"]["username"], "bob");
        assert_eq!(doc["service"], "user-mgt-api");
        assert_eq!(doc["environment"], "development");
        assert_eq!(doc["timestamp"], "2024-03-07T09:30:00.000000Z");
    }

    #[test]
    fn test_document_field_order() {
        let event = AuditEvent::api_request(
            ApiRequestRecord {
                method: "GET".to_string(),
                endpoint: "/api/v1/users".to_string(),
                status_code: 200,
                duration_ms: 1.5,
                user_id: None,
                ip_address: Some("10.0.0.1".to_string()),
            },
            at(2024, 3, 7, 9, 30),
        );
        let identity = ServiceIdentity::new("svc", "env");

        let json = serde_json::to_string(&event.document(&identity)).unwrap();
        let keys = [
            "timestamp",
            "method",
            "endpoint",
            "status_code",
            "duration_ms",
            "user_id",
            "ip_address",
            "service",
            "environment",
        ];
        let positions: Vec<usize> = keys
            .iter()
            .map(|k| json.find(&format!("\"{k}\"")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{json}");
        assert!(json.contains("\"user_id\":null"));
    }

    #[test]
    fn test_error_event_fields() {
        let event = AuditEvent::error(
            ErrorRecord {
                error_type: "ALREADY_EXISTS".to_string(),
                error_message: "username or email already exists".to_string(),
                stack_trace: None,
                user_id: None,
                request_id: Some("req-1".to_string()),
            },
            Utc::now(),
        );

        assert_eq!(event.category(), AuditCategory::Errors);
        assert_eq!(
            event.field("error_type"),
            Some(&FieldValue::Text("ALREADY_EXISTS".to_string()))
        );
        assert_eq!(event.field("stack_trace"), Some(&FieldValue::Null));
        assert_eq!(event.field("missing"), None);
    }

    #[test]
    fn test_mapping_covers_document_fields() {
        let mapping = AuditCategory::ApiRequests.mapping();
        let properties = mapping["properties"].as_object().unwrap();
        for key in ["timestamp", "service", "environment", "method", "status_code"] {
            assert!(properties.contains_key(key), "missing {key}");
        }
    }
}
