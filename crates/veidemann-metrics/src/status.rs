//! Job status model: crawl states, size counters, and the per-seed fold.
//!
//! A job's status is a [`StatusVector`]: one count per [`CrawlState`] plus
//! the seven [`SizeCounter`] totals. Seed executions are projected into a
//! one-hot vector and summed, so an active job's totals are always
//! recomputed from its seeds rather than trusted from the snapshot.
//!
//! ```text
//! seed(FETCHING, crawled=3) ─► [0,0,0,0,0,1,0,0 | 3,0,0,0,0,0,0] ┐
//! seed(FINISHED, crawled=7) ─► [0,0,0,0,0,0,1,0 | 7,0,0,0,0,0,0] ┼─► Σ
//!                                                                 ┘
//!                            = [0,0,0,0,0,1,1,0 | 10,0,0,0,0,0,0]
//! ```

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use veidemann_store::{ExecutionCounters, JobExecutionRecord, SeedExecutionRecord};

/// State reported when an execution record carries none.
pub const UNDEFINED_STATE: &str = "UNDEFINED";

/// The crawl states tracked per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CrawlState {
    AbortedManual,
    AbortedSize,
    AbortedTimeout,
    Created,
    Failed,
    Fetching,
    Finished,
    Sleeping,
}

impl CrawlState {
    pub const ALL: [CrawlState; 8] = [
        CrawlState::AbortedManual,
        CrawlState::AbortedSize,
        CrawlState::AbortedTimeout,
        CrawlState::Created,
        CrawlState::Failed,
        CrawlState::Fetching,
        CrawlState::Finished,
        CrawlState::Sleeping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlState::AbortedManual => "ABORTED_MANUAL",
            CrawlState::AbortedSize => "ABORTED_SIZE",
            CrawlState::AbortedTimeout => "ABORTED_TIMEOUT",
            CrawlState::Created => "CREATED",
            CrawlState::Failed => "FAILED",
            CrawlState::Fetching => "FETCHING",
            CrawlState::Finished => "FINISHED",
            CrawlState::Sleeping => "SLEEPING",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|state| state.as_str() == s)
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The cumulative size counters tracked per job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeCounter {
    DocumentsCrawled,
    DocumentsDenied,
    DocumentsFailed,
    DocumentsOutOfScope,
    DocumentsRetried,
    UrisCrawled,
    BytesCrawled,
}

impl SizeCounter {
    pub const ALL: [SizeCounter; 7] = [
        SizeCounter::DocumentsCrawled,
        SizeCounter::DocumentsDenied,
        SizeCounter::DocumentsFailed,
        SizeCounter::DocumentsOutOfScope,
        SizeCounter::DocumentsRetried,
        SizeCounter::UrisCrawled,
        SizeCounter::BytesCrawled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SizeCounter::DocumentsCrawled => "documentsCrawled",
            SizeCounter::DocumentsDenied => "documentsDenied",
            SizeCounter::DocumentsFailed => "documentsFailed",
            SizeCounter::DocumentsOutOfScope => "documentsOutOfScope",
            SizeCounter::DocumentsRetried => "documentsRetried",
            SizeCounter::UrisCrawled => "urisCrawled",
            SizeCounter::BytesCrawled => "bytesCrawled",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

fn counter_values(c: &ExecutionCounters) -> [i64; 7] {
    [
        c.documents_crawled,
        c.documents_denied,
        c.documents_failed,
        c.documents_out_of_scope,
        c.documents_retried,
        c.uris_crawled,
        c.bytes_crawled,
    ]
}

// ── StatusVector ───────────────────────────────────────────────────

/// Eight state counts and seven size totals, all defaulting to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatusVector {
    states: [i64; 8],
    sizes: [i64; 7],
}

impl StatusVector {
    pub fn zero() -> Self {
        Self::default()
    }

    /// A single seed: a one in its state's slot (if it has a known state)
    /// plus its counters.
    pub fn from_seed(seed: &SeedExecutionRecord) -> Self {
        let mut v = Self {
            states: [0; 8],
            sizes: counter_values(&seed.counters),
        };
        if let Some(state) = seed.state.as_deref().and_then(CrawlState::parse) {
            v.states[state.index()] = 1;
        }
        v
    }

    /// The snapshot stored on a job execution: `executionsState` flattened
    /// onto the eight states, unknown keys dropped, missing ones zero.
    pub fn from_execution(execution: &JobExecutionRecord) -> Self {
        let mut v = Self {
            states: [0; 8],
            sizes: counter_values(&execution.counters),
        };
        for (key, count) in &execution.executions_state {
            if let Some(state) = CrawlState::parse(key) {
                v.states[state.index()] = *count;
            }
        }
        v
    }

    pub fn state(&self, state: CrawlState) -> i64 {
        self.states[state.index()]
    }

    pub fn size(&self, counter: SizeCounter) -> i64 {
        self.sizes[counter.index()]
    }

    pub fn states(&self) -> impl Iterator<Item = (CrawlState, i64)> + '_ {
        CrawlState::ALL.into_iter().map(|s| (s, self.state(s)))
    }

    pub fn sizes(&self) -> impl Iterator<Item = (SizeCounter, i64)> + '_ {
        SizeCounter::ALL.into_iter().map(|c| (c, self.size(c)))
    }
}

impl AddAssign for StatusVector {
    fn add_assign(&mut self, rhs: Self) {
        for (a, b) in self.states.iter_mut().zip(rhs.states) {
            *a = a.saturating_add(b);
        }
        for (a, b) in self.sizes.iter_mut().zip(rhs.sizes) {
            *a = a.saturating_add(b);
        }
    }
}

impl Add for StatusVector {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Sum for StatusVector {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), Add::add)
    }
}

// ── AggregatedJobStatus ────────────────────────────────────────────

/// What the aggregator publishes for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedJobStatus {
    pub job_name: String,
    pub job_execution_id: String,
    pub state: String,
    pub totals: StatusVector,
}

impl AggregatedJobStatus {
    /// Normalized snapshot of `execution`, or the zeroed default when the
    /// job has never run.
    pub fn from_snapshot(job_name: &str, execution: Option<&JobExecutionRecord>) -> Self {
        match execution {
            Some(e) => Self {
                job_name: job_name.to_string(),
                job_execution_id: e.id.clone(),
                state: e
                    .state
                    .clone()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| UNDEFINED_STATE.to_string()),
                totals: StatusVector::from_execution(e),
            },
            None => Self {
                job_name: job_name.to_string(),
                job_execution_id: String::new(),
                state: UNDEFINED_STATE.to_string(),
                totals: StatusVector::zero(),
            },
        }
    }

    /// Whether the execution is still running and its totals must be
    /// recomputed from its seeds.
    pub fn is_active(&self) -> bool {
        !self.job_execution_id.is_empty()
            && matches!(
                self.state.as_str(),
                "CREATED" | "RUNNING" | "FETCHING" | "SLEEPING"
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn seed(state: &str, crawled: i64) -> SeedExecutionRecord {
        SeedExecutionRecord {
            job_execution_id: "je-1".to_string(),
            state: Some(state.to_string()),
            counters: ExecutionCounters {
                documents_crawled: crawled,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn state_names_round_trip() {
        for state in CrawlState::ALL {
            assert_eq!(CrawlState::parse(state.as_str()), Some(state));
        }
        assert_eq!(CrawlState::parse("RUNNING"), None);
    }

    #[test]
    fn fold_of_two_seeds() {
        let total: StatusVector = [seed("FETCHING", 3), seed("FINISHED", 7)]
            .iter()
            .map(StatusVector::from_seed)
            .sum();

        assert_eq!(total.state(CrawlState::Fetching), 1);
        assert_eq!(total.state(CrawlState::Finished), 1);
        for state in [
            CrawlState::AbortedManual,
            CrawlState::AbortedSize,
            CrawlState::AbortedTimeout,
            CrawlState::Created,
            CrawlState::Failed,
            CrawlState::Sleeping,
        ] {
            assert_eq!(total.state(state), 0, "{state}");
        }
        assert_eq!(total.size(SizeCounter::DocumentsCrawled), 10);
        assert_eq!(total.size(SizeCounter::BytesCrawled), 0);
    }

    #[test]
    fn empty_fold_is_zero() {
        let total: StatusVector = std::iter::empty().sum();
        assert_eq!(total, StatusVector::zero());
        assert_eq!(total.states().count(), 8);
        assert_eq!(total.sizes().count(), 7);
    }

    #[test]
    fn seed_with_unknown_state_contributes_counters_only() {
        let v = StatusVector::from_seed(&seed("UNKNOWN", 5));
        assert!(v.states().all(|(_, n)| n == 0));
        assert_eq!(v.size(SizeCounter::DocumentsCrawled), 5);
    }

    #[test]
    fn snapshot_flattens_executions_state() {
        let mut executions_state = BTreeMap::new();
        executions_state.insert("FINISHED".to_string(), 4);
        executions_state.insert("bogus".to_string(), 9);
        let exec = JobExecutionRecord {
            id: "je-1".to_string(),
            state: Some("FINISHED".to_string()),
            executions_state,
            ..Default::default()
        };

        let status = AggregatedJobStatus::from_snapshot("news", Some(&exec));
        assert_eq!(status.totals.state(CrawlState::Finished), 4);
        assert_eq!(status.totals.states().map(|(_, n)| n).sum::<i64>(), 4);
        assert!(!status.is_active());
    }

    #[test]
    fn never_run_job_is_zeroed_and_inactive() {
        let status = AggregatedJobStatus::from_snapshot("news", None);
        assert_eq!(status.job_name, "news");
        assert_eq!(status.state, UNDEFINED_STATE);
        assert_eq!(status.totals, StatusVector::zero());
        assert!(!status.is_active());
    }

    #[test]
    fn active_states() {
        for (state, active) in [
            ("CREATED", true),
            ("RUNNING", true),
            ("FETCHING", true),
            ("SLEEPING", true),
            ("FINISHED", false),
            ("FAILED", false),
            ("ABORTED_MANUAL", false),
            ("", false),
        ] {
            let exec = JobExecutionRecord {
                id: "je-1".to_string(),
                state: Some(state.to_string()),
                ..Default::default()
            };
            let status = AggregatedJobStatus::from_snapshot("news", Some(&exec));
            assert_eq!(status.is_active(), active, "{state:?}");
        }
    }
}
