//! Typed records decoded from raw store documents.
//!
//! Every document that leaves the store adapter passes through one of the
//! `from_document` constructors here. Optional fields are decoded
//! leniently: a value of the wrong shape is treated exactly like a missing
//! value. Only the top-level shape is checked strictly; a document that is
//! not a JSON object yields [`StoreError::MalformedRecord`].
//!
//! Field names follow the stored documents (`size`, `outlink`, `resource`,
//! `meta.name`) and are mapped onto Rust names at this boundary. The
//! plural spellings (`sizeBytes`, `outlinks`, `resources`) are read too.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

// ── Tables and change events ───────────────────────────────────────

/// The changefeed-capable log tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    CrawlLog,
    PageLog,
}

impl Table {
    /// The table name in the store.
    pub fn name(&self) -> &'static str {
        match self {
            Table::CrawlLog => "crawl_log",
            Table::PageLog => "page_log",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One mutation notification from a changefeed.
///
/// `new_value == None` is the termination sentinel: the feed has ended and
/// no further events will arrive.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub new_value: Option<Value>,
}

impl ChangeEvent {
    pub fn document(table: Table, value: Value) -> Self {
        Self {
            table,
            new_value: Some(value),
        }
    }

    pub fn terminated(table: Table) -> Self {
        Self {
            table,
            new_value: None,
        }
    }
}

// ── Lenient field decoding ─────────────────────────────────────────

mod lenient {
    use super::*;

    /// Any JSON value converted to `T`, or `None` when absent or mistyped.
    pub fn opt<'de, D, T>(d: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: DeserializeOwned,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.and_then(|v| serde_json::from_value(v).ok()))
    }

    /// A JSON number as `f64`. Integers and doubles are both accepted.
    pub fn number<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value.as_ref().and_then(Value::as_f64).filter(|n| n.is_finite()))
    }

    /// A counter field, defaulting to zero.
    pub fn count<'de, D>(d: D) -> Result<i64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(number(d)?.map(|n| n as i64).unwrap_or(0))
    }

    /// A string field, defaulting to empty.
    pub fn string<'de, D>(d: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value: Option<String> = opt(d)?;
        Ok(value.unwrap_or_default())
    }

    /// Any non-null value.
    pub fn present<'de, D>(d: D) -> Result<Option<Value>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<Value>::deserialize(d)?.filter(|v| !v.is_null()))
    }

    /// A JSON array of arbitrary elements.
    pub fn list<'de, D>(d: D) -> Result<Option<Vec<Value>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Option::<Value>::deserialize(d)? {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        })
    }

    /// A ReQL `TIME` pseudo-type, as epoch seconds.
    pub fn reql_time<'de, D>(d: D) -> Result<Option<f64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Option::<Value>::deserialize(d)?;
        Ok(value
            .as_ref()
            .and_then(|v| v.get("epoch_time"))
            .and_then(Value::as_f64))
    }

    /// Numeric counters keyed by name; non-numeric entries are skipped.
    ///
    /// Accepts a plain object or an array of single-entry objects, which
    /// is how protobuf maps are sometimes stored.
    pub fn counts<'de, D>(d: D) -> Result<BTreeMap<String, i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let maps = match Option::<Value>::deserialize(d)? {
            Some(Value::Object(map)) => vec![map],
            Some(Value::Array(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        };

        let mut out = BTreeMap::new();
        for (k, v) in maps.into_iter().flatten() {
            if let Some(n) = v.as_f64().filter(|n| n.is_finite()) {
                out.insert(k, n as i64);
            }
        }
        Ok(out)
    }
}

/// Decode a top-level document, insisting that it is a JSON object.
fn decode_object<T: DeserializeOwned>(table: &'static str, doc: Value) -> StoreResult<T> {
    if !doc.is_object() {
        return Err(StoreError::MalformedRecord {
            table,
            reason: format!("expected an object, got {}", json_kind(&doc)),
        });
    }
    serde_json::from_value(doc).map_err(|e| StoreError::MalformedRecord {
        table,
        reason: e.to_string(),
    })
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── crawl_log ──────────────────────────────────────────────────────

/// One fetched URI, as written to `crawl_log`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrawlLogRecord {
    /// Present when the fetch failed.
    pub error: Option<Value>,
    /// HTTP status, or a negative crawler-internal code. Zero when absent.
    pub status_code: i64,
    pub record_type: String,
    pub content_type: Option<String>,
    pub fetch_time_ms: Option<f64>,
    pub size_bytes: Option<f64>,
}

/// `crawl_log` as stored. Both spellings of the size field may occur;
/// the stored `size` wins when both are usable.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawCrawlLog {
    #[serde(default, deserialize_with = "lenient::present")]
    error: Option<Value>,
    #[serde(default, deserialize_with = "lenient::count")]
    status_code: i64,
    #[serde(default, deserialize_with = "lenient::string")]
    record_type: String,
    #[serde(default, deserialize_with = "lenient::opt")]
    content_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::number")]
    fetch_time_ms: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    size: Option<f64>,
    #[serde(default, deserialize_with = "lenient::number")]
    size_bytes: Option<f64>,
}

impl CrawlLogRecord {
    pub fn from_document(doc: Value) -> StoreResult<Self> {
        let raw: RawCrawlLog = decode_object(Table::CrawlLog.name(), doc)?;
        Ok(Self {
            error: raw.error,
            status_code: raw.status_code,
            record_type: raw.record_type,
            content_type: raw.content_type,
            fetch_time_ms: raw.fetch_time_ms,
            size_bytes: raw.size.or(raw.size_bytes),
        })
    }
}

// ── page_log ───────────────────────────────────────────────────────

/// A resource loaded while rendering a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageResource {
    pub from_cache: bool,
}

impl PageResource {
    fn from_value(value: &Value) -> Self {
        Self {
            from_cache: value.get("fromCache").and_then(Value::as_bool) == Some(true),
        }
    }
}

fn page_resources<'de, D>(d: D) -> Result<Option<Vec<PageResource>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient::list(d)?.map(|items| items.iter().map(PageResource::from_value).collect()))
}

/// One harvested page, as written to `page_log`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageLogRecord {
    pub outlinks: Option<Vec<Value>>,
    pub resources: Option<Vec<PageResource>>,
}

/// `page_log` as stored, under either the singular or the plural key.
#[derive(Deserialize)]
struct RawPageLog {
    #[serde(default, deserialize_with = "lenient::list")]
    outlink: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "lenient::list")]
    outlinks: Option<Vec<Value>>,
    #[serde(default, deserialize_with = "page_resources")]
    resource: Option<Vec<PageResource>>,
    #[serde(default, deserialize_with = "page_resources")]
    resources: Option<Vec<PageResource>>,
}

impl PageLogRecord {
    pub fn from_document(doc: Value) -> StoreResult<Self> {
        let raw: RawPageLog = decode_object(Table::PageLog.name(), doc)?;
        Ok(Self {
            outlinks: raw.outlink.or(raw.outlinks),
            resources: raw.resource.or(raw.resources),
        })
    }
}

// ── config / job_executions / executions ───────────────────────────

/// A configured crawl job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub id: String,
    pub name: String,
}

#[derive(Deserialize)]
struct RawJobDefinition {
    id: String,
    meta: RawMeta,
}

#[derive(Deserialize)]
struct RawMeta {
    name: String,
}

impl JobDefinition {
    pub fn from_document(doc: Value) -> StoreResult<Self> {
        let raw: RawJobDefinition = decode_object("config", doc)?;
        Ok(Self {
            id: raw.id,
            name: raw.meta.name,
        })
    }
}

/// The seven cumulative counters shared by job and seed executions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionCounters {
    #[serde(default, deserialize_with = "lenient::count")]
    pub documents_crawled: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub documents_denied: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub documents_failed: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub documents_out_of_scope: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub documents_retried: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub uris_crawled: i64,
    #[serde(default, deserialize_with = "lenient::count")]
    pub bytes_crawled: i64,
}

/// One run of a crawl job.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobExecutionRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub job_id: String,
    /// Start time in epoch seconds.
    #[serde(default, deserialize_with = "lenient::reql_time")]
    pub start_time: Option<f64>,
    #[serde(default, deserialize_with = "lenient::opt")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub counters: ExecutionCounters,
    /// Number of seed executions per state.
    #[serde(default, deserialize_with = "lenient::counts")]
    pub executions_state: BTreeMap<String, i64>,
}

impl JobExecutionRecord {
    pub fn from_document(doc: Value) -> StoreResult<Self> {
        decode_object("job_executions", doc)
    }
}

/// Per-seed rollup belonging to one job execution.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedExecutionRecord {
    #[serde(default, deserialize_with = "lenient::string")]
    pub id: String,
    #[serde(default, deserialize_with = "lenient::string")]
    pub job_execution_id: String,
    #[serde(default, deserialize_with = "lenient::opt")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub counters: ExecutionCounters,
}

impl SeedExecutionRecord {
    pub fn from_document(doc: Value) -> StoreResult<Self> {
        decode_object("executions", doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn crawl_log_full_document() {
        let rec = CrawlLogRecord::from_document(json!({
            "statusCode": 200,
            "recordType": "response",
            "contentType": "text/html; charset=utf-8",
            "fetchTimeMs": 250.0,
            "size": 4096,
            "requestedUri": "http://example.com/",
        }))
        .unwrap();

        assert_eq!(rec.status_code, 200);
        assert_eq!(rec.record_type, "response");
        assert_eq!(rec.content_type.as_deref(), Some("text/html; charset=utf-8"));
        assert_eq!(rec.fetch_time_ms, Some(250.0));
        assert_eq!(rec.size_bytes, Some(4096.0));
        assert!(rec.error.is_none());
    }

    #[test]
    fn crawl_log_defaults_absent_scalars() {
        let rec = CrawlLogRecord::from_document(json!({})).unwrap();
        assert_eq!(rec.status_code, 0);
        assert_eq!(rec.record_type, "");
        assert!(rec.content_type.is_none());
    }

    #[test]
    fn crawl_log_mistyped_optional_fields_are_absent() {
        let rec = CrawlLogRecord::from_document(json!({
            "statusCode": "two hundred",
            "contentType": 42,
            "fetchTimeMs": "slow",
            "size": [1, 2],
        }))
        .unwrap();

        assert_eq!(rec.status_code, 0);
        assert!(rec.content_type.is_none());
        assert!(rec.fetch_time_ms.is_none());
        assert!(rec.size_bytes.is_none());
    }

    #[test]
    fn crawl_log_error_object_is_present() {
        let rec = CrawlLogRecord::from_document(json!({
            "statusCode": -2,
            "error": {"code": -2, "msg": "connect failed"},
        }))
        .unwrap();
        assert!(rec.error.is_some());
        assert_eq!(rec.status_code, -2);

        let rec = CrawlLogRecord::from_document(json!({"error": null})).unwrap();
        assert!(rec.error.is_none());
    }

    #[test]
    fn crawl_log_rejects_non_object() {
        let err = CrawlLogRecord::from_document(json!("nope")).unwrap_err();
        assert!(matches!(
            err,
            StoreError::MalformedRecord { table: "crawl_log", .. }
        ));
    }

    #[test]
    fn page_log_lists_and_cache_flags() {
        let rec = PageLogRecord::from_document(json!({
            "outlink": ["http://a/", "http://b/"],
            "resource": [
                {"fromCache": true},
                {"fromCache": "yes"},
                "garbage",
                {},
            ],
        }))
        .unwrap();

        assert_eq!(rec.outlinks.as_ref().map(Vec::len), Some(2));
        let resources = rec.resources.unwrap();
        assert_eq!(resources.len(), 4);
        assert_eq!(resources.iter().filter(|r| r.from_cache).count(), 1);
    }

    #[test]
    fn crawl_log_accepts_either_size_key() {
        let rec = CrawlLogRecord::from_document(json!({"sizeBytes": 512})).unwrap();
        assert_eq!(rec.size_bytes, Some(512.0));

        let rec = CrawlLogRecord::from_document(json!({"size": 10, "sizeBytes": 10})).unwrap();
        assert_eq!(rec.size_bytes, Some(10.0));

        let rec = CrawlLogRecord::from_document(json!({"size": "big", "sizeBytes": 7})).unwrap();
        assert_eq!(rec.size_bytes, Some(7.0));
    }

    #[test]
    fn page_log_accepts_both_spellings_at_once() {
        let rec = PageLogRecord::from_document(json!({
            "outlink": ["http://a/"],
            "outlinks": ["http://a/", "http://b/"],
            "resource": null,
            "resources": [{"fromCache": true}],
        }))
        .unwrap();

        assert_eq!(rec.outlinks.as_ref().map(Vec::len), Some(1));
        assert_eq!(rec.resources, Some(vec![PageResource { from_cache: true }]));
    }

    #[test]
    fn page_log_missing_lists_are_none() {
        let rec = PageLogRecord::from_document(json!({"outlink": "x"})).unwrap();
        assert!(rec.outlinks.is_none());
        assert!(rec.resources.is_none());
    }

    #[test]
    fn job_definition_takes_name_from_meta() {
        let job = JobDefinition::from_document(json!({
            "id": "job-1",
            "kind": "crawlJob",
            "meta": {"name": "daily news"},
        }))
        .unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.name, "daily news");
    }

    #[test]
    fn job_definition_without_name_is_malformed() {
        let err = JobDefinition::from_document(json!({"id": "job-1"})).unwrap_err();
        assert!(matches!(err, StoreError::MalformedRecord { table: "config", .. }));
    }

    #[test]
    fn job_execution_decodes_counters_and_states() {
        let rec = JobExecutionRecord::from_document(json!({
            "id": "je-1",
            "jobId": "job-1",
            "state": "RUNNING",
            "startTime": {"$reql_type$": "TIME", "epoch_time": 1_500_000_000.5, "timezone": "+00:00"},
            "documentsCrawled": 12,
            "bytesCrawled": 1.0e6,
            "executionsState": {"FETCHING": 2, "FINISHED": 3, "bogus": "x"},
        }))
        .unwrap();

        assert_eq!(rec.id, "je-1");
        assert_eq!(rec.job_id, "job-1");
        assert_eq!(rec.state.as_deref(), Some("RUNNING"));
        assert_eq!(rec.start_time, Some(1_500_000_000.5));
        assert_eq!(rec.counters.documents_crawled, 12);
        assert_eq!(rec.counters.bytes_crawled, 1_000_000);
        assert_eq!(rec.counters.documents_denied, 0);
        assert_eq!(rec.executions_state.get("FETCHING"), Some(&2));
        assert_eq!(rec.executions_state.get("FINISHED"), Some(&3));
        assert!(!rec.executions_state.contains_key("bogus"));
    }

    #[test]
    fn executions_state_as_list_of_entries() {
        let rec = JobExecutionRecord::from_document(json!({
            "executionsState": [{"FETCHING": 1}, {"FINISHED": 4}, 7],
        }))
        .unwrap();
        assert_eq!(rec.executions_state.get("FETCHING"), Some(&1));
        assert_eq!(rec.executions_state.get("FINISHED"), Some(&4));
        assert_eq!(rec.executions_state.len(), 2);
    }

    #[test]
    fn seed_execution_defaults() {
        let rec = SeedExecutionRecord::from_document(json!({
            "jobExecutionId": "je-1",
            "state": "FETCHING",
            "documentsCrawled": 3,
        }))
        .unwrap();
        assert_eq!(rec.job_execution_id, "je-1");
        assert_eq!(rec.state.as_deref(), Some("FETCHING"));
        assert_eq!(rec.counters.documents_crawled, 3);
        assert_eq!(rec.counters.uris_crawled, 0);
    }
}
