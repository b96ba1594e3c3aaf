//! Process metrics registry.
//!
//! All metrics follow Prometheus naming conventions:
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Request metric labels are bounded:
//! - `method`: HTTP method
//! - `endpoint`: matched route template (`/api/v1/users/:user_id`), never the raw path
//! - `status`: numeric status code
//!
//! The registry is an explicitly constructed instance backed by a local
//! Prometheus recorder. Nothing is installed as the process-global recorder,
//! so tests can build as many independent registries as they need.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Content type of [`MetricsRegistry::render`] output.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const USERS_TOTAL: &str = "users_total";
pub const ACTIVE_USERS_TOTAL: &str = "active_users_total";

/// Request duration buckets in seconds.
const REQUEST_DURATION_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.075, 0.100, 0.250, 0.500, 0.750, 1.000, 2.500, 5.000, 7.500,
    10.000,
];

/// Concurrency-safe registry of counters, histograms and gauges.
pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
    /// Writers share it, `render` takes it exclusively, so a snapshot never
    /// contains a counter increment without its histogram observation.
    pair_guard: RwLock<()>,
}

impl MetricsRegistry {
    /// Build a registry with the request histogram buckets configured.
    ///
    /// # Errors
    ///
    /// Returns error if the bucket configuration is rejected by the exporter.
    pub fn new() -> Result<Self, String> {
        let recorder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Full(HTTP_REQUEST_DURATION_SECONDS.to_string()),
                REQUEST_DURATION_BUCKETS,
            )
            .map_err(|e| format!("Failed to set HTTP request buckets: {e}"))?
            .build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
            describe_histogram!(
                HTTP_REQUEST_DURATION_SECONDS,
                metrics::Unit::Seconds,
                "HTTP request duration"
            );
            describe_gauge!(USERS_TOTAL, "Total number of users");
            describe_gauge!(ACTIVE_USERS_TOTAL, "Number of active users");
        });

        Ok(Self {
            recorder,
            handle,
            pair_guard: RwLock::new(()),
        })
    }

    /// Record a finished HTTP request.
    ///
    /// Metric: `http_requests_total` (labels `method`, `endpoint`, `status`),
    /// `http_request_duration_seconds` (labels `method`, `endpoint`).
    ///
    /// Values are recorded as given, including empty strings.
    pub fn record_request(&self, method: &str, endpoint: &str, status: u16, duration: Duration) {
        let _pair = self.pair_guard.read().unwrap_or_else(PoisonError::into_inner);

        metrics::with_local_recorder(&self.recorder, || {
            counter!(HTTP_REQUESTS_TOTAL,
                "method" => method.to_string(),
                "endpoint" => endpoint.to_string(),
                "status" => status.to_string()
            )
            .increment(1);

            histogram!(HTTP_REQUEST_DURATION_SECONDS,
                "method" => method.to_string(),
                "endpoint" => endpoint.to_string()
            )
            .record(duration.as_secs_f64());
        });
    }

    /// Overwrite an unlabelled gauge. Last write wins.
    pub fn set_gauge(&self, name: &str, value: f64) {
        let _pair = self.pair_guard.read().unwrap_or_else(PoisonError::into_inner);

        metrics::with_local_recorder(&self.recorder, || {
            gauge!(name.to_string()).set(value);
        });
    }

    /// Render a snapshot in the Prometheus text exposition format.
    ///
    /// Metric families are sorted by name and samples within a family by
    /// label set, so equal registry contents always render identically.
    pub fn render(&self) -> String {
        let raw = {
            let _exclusive = self.pair_guard.write().unwrap_or_else(PoisonError::into_inner);
            self.handle.render()
        };
        canonicalize(&raw)
    }
}

impl std::fmt::Debug for MetricsRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsRegistry").finish_non_exhaustive()
    }
}

// ============================================================================
// Exposition ordering
// ============================================================================

#[derive(Default)]
struct Family {
    headers: Vec<String>,
    samples: Vec<String>,
}

/// Reorder exporter output into a stable form.
///
/// The exporter iterates hash maps, so neither families nor series come out
/// in a fixed order. Histogram sample lines for one label set (`_bucket`
/// lines in `le` order, then `_sum`, `_count`) keep their relative order.
fn canonicalize(raw: &str) -> String {
    let mut families: BTreeMap<String, Family> = BTreeMap::new();

    for line in raw.lines().filter(|l| !l.trim().is_empty()) {
        if let Some(rest) = line.strip_prefix("# ") {
            // "# HELP <name> ..." or "# TYPE <name> <kind>"
            let name = rest.split_whitespace().nth(1).unwrap_or_default();
            families
                .entry(name.to_string())
                .or_default()
                .headers
                .push(line.to_string());
            continue;
        }

        let series = line
            .split(|c: char| c == '{' || c.is_whitespace())
            .next()
            .unwrap_or_default();
        let family = family_name(series, &families);
        families
            .entry(family)
            .or_default()
            .samples
            .push(line.to_string());
    }

    let mut out = String::new();
    for (_, mut family) in families {
        // HELP before TYPE
        family.headers.sort();
        family.samples.sort_by(|a, b| series_key(a).cmp(&series_key(b)));

        for line in family.headers.iter().chain(family.samples.iter()) {
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

fn family_name(series: &str, families: &BTreeMap<String, Family>) -> String {
    for suffix in ["_bucket", "_sum", "_count"] {
        if let Some(base) = series.strip_suffix(suffix) {
            if families.contains_key(base) {
                return base.to_string();
            }
        }
    }
    series.to_string()
}

/// Label set of a sample line with the trailing `le` label removed.
fn series_key(line: &str) -> &str {
    let (Some(open), Some(close)) = (line.find('{'), line.rfind('}')) else {
        return "";
    };
    let labels = line.get(open + 1..close).unwrap_or_default();

    if labels.starts_with("le=\"") {
        return "";
    }
    match labels.rfind(",le=\"") {
        Some(idx) => labels.get(..idx).unwrap_or(labels),
        None => labels,
    }
}

// ============================================================================
// Tests
// ============================================================================
