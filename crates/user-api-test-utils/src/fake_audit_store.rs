//! In-process fake of the audit document store.
//!
//! A single wiremock responder backed by shared state, covering the subset
//! of the store API the audit writer uses:
//!
//! - `GET /_cluster/health`
//! - `HEAD /{index}`, `PUT /{index}`
//! - `POST /{index}/_doc`, `PUT /{index}/_doc/{id}`
//! - `POST /{index}/_search` with `match_all`, `match`, `term` and
//!   `bool.must` queries; `{index}` may end in `*`
//!
//! The whole store can be switched offline, in which case every request
//! answers 503.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Debug, Default)]
struct Index {
    mappings: Value,
    docs: Vec<(String, Value)>,
}

#[derive(Debug)]
struct StoreState {
    online: bool,
    cluster_status: String,
    indices: BTreeMap<String, Index>,
    next_id: u64,
}

impl Default for StoreState {
    fn default() -> Self {
        Self {
            online: true,
            cluster_status: "green".to_string(),
            indices: BTreeMap::new(),
            next_id: 1,
        }
    }
}

/// Fake audit store listening on a random local port.
///
/// # Example
/// ```rust,ignore
/// let store = FakeAuditStore::start().await;
/// let server = TestUserApiServer::spawn(&store.uri()).await?;
/// // ... drive the API ...
/// let docs = store.documents("user-mgt-user-actions-*");
/// ```
pub struct FakeAuditStore {
    server: MockServer,
    state: Arc<Mutex<StoreState>>,
}

impl FakeAuditStore {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let state = Arc::new(Mutex::new(StoreState::default()));

        Mock::given(wiremock::matchers::any())
            .respond_with(StoreResponder {
                state: state.clone(),
            })
            .mount(&server)
            .await;

        Self { server, state }
    }

    /// Base URL of the store.
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// Take the store offline (every request answers 503) or back online.
    pub fn set_online(&self, online: bool) {
        self.state.lock().unwrap().online = online;
    }

    /// Set the status reported by `GET /_cluster/health`.
    pub fn set_cluster_status(&self, status: &str) {
        self.state.lock().unwrap().cluster_status = status.to_string();
    }

    /// Names of all existing indices, sorted.
    pub fn index_names(&self) -> Vec<String> {
        self.state.lock().unwrap().indices.keys().cloned().collect()
    }

    /// Mappings an index was created with.
    pub fn mappings(&self, index: &str) -> Option<Value> {
        self.state
            .lock()
            .unwrap()
            .indices
            .get(index)
            .map(|i| i.mappings.clone())
    }

    /// All documents in indices matching `pattern`, in insertion order per
    /// index.
    pub fn documents(&self, pattern: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        matching_indices(&state, pattern)
            .flat_map(|index| index.docs.iter().map(|(_, doc)| doc.clone()))
            .collect()
    }

    /// Number of requests received, including while offline.
    pub async fn request_count(&self) -> usize {
        self.server
            .received_requests()
            .await
            .map(|r| r.len())
            .unwrap_or(0)
    }
}

struct StoreResponder {
    state: Arc<Mutex<StoreState>>,
}

impl Respond for StoreResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();
        if !state.online {
            return ResponseTemplate::new(503).set_body_json(error_body(
                "unavailable_shards_exception",
                "store offline",
            ));
        }

        let segments: Vec<&str> = request
            .url
            .path()
            .trim_start_matches('/')
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        let body: Value = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        let method = request.method.as_str();

        match (method, segments.as_slice()) {
            ("GET", ["_cluster", "health"]) => {
                ResponseTemplate::new(200).set_body_json(json!({ "status": state.cluster_status }))
            }
            ("HEAD", [index]) => {
                if state.indices.contains_key(*index) {
                    ResponseTemplate::new(200)
                } else {
                    ResponseTemplate::new(404)
                }
            }
            ("PUT", [index]) => {
                if state.indices.contains_key(*index) {
                    return ResponseTemplate::new(400).set_body_json(error_body(
                        "resource_already_exists_exception",
                        &format!("index [{index}] already exists"),
                    ));
                }
                let mappings = body.get("mappings").cloned().unwrap_or(Value::Null);
                state.indices.insert(
                    (*index).to_string(),
                    Index {
                        mappings,
                        docs: Vec::new(),
                    },
                );
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "acknowledged": true, "index": index }))
            }
            ("POST", [index, "_doc"]) => {
                let id = format!("doc-{}", state.next_id);
                state.next_id += 1;
                store_document(&mut state, index, id, body)
            }
            ("PUT", [index, "_doc", id]) => store_document(&mut state, index, (*id).to_string(), body),
            ("POST" | "GET", [index, "_search"]) => {
                let size = request
                    .url
                    .query_pairs()
                    .find(|(k, _)| k == "size")
                    .and_then(|(_, v)| v.parse::<usize>().ok())
                    .unwrap_or(10);
                search(&state, index, &body, size)
            }
            _ => ResponseTemplate::new(400).set_body_json(error_body(
                "illegal_argument_exception",
                &format!("unsupported request {method} {}", request.url.path()),
            )),
        }
    }
}

fn error_body(kind: &str, reason: &str) -> Value {
    json!({ "error": { "type": kind, "reason": reason }, "status": 400 })
}

/// Documents are accepted only into existing indices; the writer always
/// creates the index first.
fn store_document(state: &mut StoreState, index: &str, id: String, doc: Value) -> ResponseTemplate {
    let Some(target) = state.indices.get_mut(index) else {
        return ResponseTemplate::new(404).set_body_json(error_body(
            "index_not_found_exception",
            &format!("no such index [{index}]"),
        ));
    };

    let result = match target.docs.iter_mut().find(|(existing, _)| *existing == id) {
        Some(slot) => {
            slot.1 = doc;
            "updated"
        }
        None => {
            target.docs.push((id.clone(), doc));
            "created"
        }
    };
    let status = if result == "created" { 201 } else { 200 };
    ResponseTemplate::new(status).set_body_json(json!({ "_index": index, "_id": id, "result": result }))
}

fn matching_indices<'a>(state: &'a StoreState, pattern: &'a str) -> impl Iterator<Item = &'a Index> {
    state
        .indices
        .iter()
        .filter(move |(name, _)| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name.as_str() == pattern,
        })
        .map(|(_, index)| index)
}

fn search(state: &StoreState, pattern: &str, body: &Value, size: usize) -> ResponseTemplate {
    if !pattern.ends_with('*') && !state.indices.contains_key(pattern) {
        return ResponseTemplate::new(404).set_body_json(error_body(
            "index_not_found_exception",
            &format!("no such index [{pattern}]"),
        ));
    }

    let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
    let hits: Vec<Value> = matching_indices(state, pattern)
        .flat_map(|index| index.docs.iter())
        .filter(|(_, doc)| matches_query(doc, &query))
        .take(size)
        .map(|(id, doc)| json!({ "_id": id, "_source": doc }))
        .collect();

    ResponseTemplate::new(200).set_body_json(json!({
        "hits": { "total": { "value": hits.len() }, "hits": hits }
    }))
}

fn matches_query(doc: &Value, query: &Value) -> bool {
    if query.get("match_all").is_some() {
        return true;
    }
    if let Some(clauses) = query.pointer("/bool/must").and_then(Value::as_array) {
        return clauses.iter().all(|clause| matches_query(doc, clause));
    }
    for kind in ["match", "term"] {
        if let Some(fields) = query.get(kind).and_then(Value::as_object) {
            return fields.iter().all(|(field, expected)| {
                let expected = expected.get("query").or(expected.get("value")).unwrap_or(expected);
                lookup(doc, field).is_some_and(|actual| same_value(actual, expected))
            });
        }
    }
    false
}

/// Dotted-path field lookup (`details.username`).
fn lookup<'a>(doc: &'a Value, field: &str) -> Option<&'a Value> {
    field.split('.').try_fold(doc, |value, key| value.get(key))
}

fn same_value(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::String(a), Value::String(e)) => a == e,
        (Value::String(a), e) => *a == e.to_string(),
        (a, Value::String(e)) => a.to_string() == *e,
        (a, e) => a == e,
    }
}
