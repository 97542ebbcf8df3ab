//! ReQL terms in the JSON wire encoding.
//!
//! A term is `[TERM_TYPE, [args...], {optargs}]`. Literal arrays must be
//! wrapped in `MAKE_ARRAY`, since a bare JSON array is read as a term.

use serde_json::{Value, json};

const MAKE_ARRAY: u32 = 2;
const DB: u32 = 14;
const TABLE: u32 = 15;
const FILTER: u32 = 39;
const ORDER_BY: u32 = 41;
const DB_LIST: u32 = 59;
const TABLE_LIST: u32 = 62;
const LIMIT: u32 = 71;
const DESC: u32 = 74;
const CHANGES: u32 = 152;
const MINVAL: u32 = 180;
const MAXVAL: u32 = 181;
const BETWEEN: u32 = 182;

/// Secondary index on `job_executions` over `[jobId, startTime]`.
pub const JOB_ID_START_TIME: &str = "jobId_startTime";
/// Secondary index on `executions` over `[jobExecutionId, seedId]`.
pub const JOB_EXECUTION_ID_SEED_ID: &str = "jobExecutionId_seedId";

pub fn db(name: &str) -> Value {
    json!([DB, [name]])
}

pub fn table(name: &str) -> Value {
    json!([TABLE, [name]])
}

pub fn db_list() -> Value {
    json!([DB_LIST, []])
}

pub fn table_list() -> Value {
    json!([TABLE_LIST, []])
}

pub fn array(items: Vec<Value>) -> Value {
    json!([MAKE_ARRAY, items])
}

pub fn changes(seq: Value) -> Value {
    json!([CHANGES, [seq]])
}

/// Rows equal to `example` on every field it names.
pub fn filter(seq: Value, example: Value) -> Value {
    json!([FILTER, [seq, example]])
}

pub fn limit(seq: Value, n: u64) -> Value {
    json!([LIMIT, [seq, n]])
}

/// Rows whose compound `index` key starts with `prefix`.
pub fn with_prefix(seq: Value, prefix: &str, index: &str) -> Value {
    let lower = array(vec![json!(prefix), json!([MINVAL, []])]);
    let upper = array(vec![json!(prefix), json!([MAXVAL, []])]);
    json!([BETWEEN, [seq, lower, upper], {"index": index}])
}

pub fn order_by_index_desc(seq: Value, index: &str) -> Value {
    json!([ORDER_BY, [seq], {"index": [DESC, [index]]}])
}

// ── Queries used by the exporter ───────────────────────────────────

pub fn crawl_jobs() -> Value {
    filter(table("config"), json!({"kind": "crawlJob"}))
}

pub fn latest_job_execution(job_id: &str) -> Value {
    let executions = with_prefix(table("job_executions"), job_id, JOB_ID_START_TIME);
    limit(order_by_index_desc(executions, JOB_ID_START_TIME), 1)
}

pub fn seed_executions(job_execution_id: &str) -> Value {
    with_prefix(table("executions"), job_execution_id, JOB_EXECUTION_ID_SEED_ID)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_job_execution_shape() {
        let expected = json!(
            [71, [
                [41, [
                    [182, [
                        [15, ["job_executions"]],
                        [2, ["job-1", [180, []]]],
                        [2, ["job-1", [181, []]]]
                    ], {"index": "jobId_startTime"}]
                ], {"index": [74, ["jobId_startTime"]]}],
                1
            ]]
        );
        assert_eq!(latest_job_execution("job-1"), expected);
    }

    #[test]
    fn crawl_jobs_filters_on_kind() {
        assert_eq!(
            crawl_jobs(),
            json!([39, [[15, ["config"]], {"kind": "crawlJob"}]])
        );
    }

    #[test]
    fn seed_executions_use_compound_index() {
        let q = seed_executions("je-9");
        assert_eq!(q[0], json!(182));
        assert_eq!(q[2], json!({"index": "jobExecutionId_seedId"}));
        assert_eq!(q[1][1], json!([2, ["je-9", [180, []]]]));
    }

    #[test]
    fn changes_wraps_table() {
        assert_eq!(changes(table("crawl_log")), json!([152, [[15, ["crawl_log"]]]]));
    }
}
