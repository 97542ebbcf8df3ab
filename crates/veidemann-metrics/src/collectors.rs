//! Metric collectors — counters, gauges, and summaries.
//!
//! Counters and gauges live in atomics. A summary keeps its count and sum
//! together behind a short-lived lock. Labeled families keep their
//! children in a map behind a read-mostly lock that is only taken for
//! writing when a new label combination first appears.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// An `f64` stored as its bit pattern in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn add(&self, delta: f64) {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f64::from_bits(current) + delta).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }
}

// ── Scalar collectors ──────────────────────────────────────────────

/// Monotonically increasing value.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicF64,
}

impl Counter {
    pub fn inc(&self) {
        self.value.add(1.0);
    }

    /// Add `delta`. Negative or non-finite deltas are ignored.
    pub fn inc_by(&self, delta: f64) {
        if delta.is_finite() && delta > 0.0 {
            self.value.add(delta);
        }
    }

    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

/// Value that can go up and down.
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicF64,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.value.set(value);
    }

    pub fn get(&self) -> f64 {
        self.value.get()
    }
}

/// Observation count and running sum, without quantiles.
///
/// Both live under one lock so a scrape never sees a count without the
/// matching sum.
#[derive(Debug, Default)]
pub struct Summary {
    state: Mutex<SummarySnapshot>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: f64,
}

impl Summary {
    pub fn observe(&self, value: f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.count += 1;
        state.sum += value;
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn count(&self) -> u64 {
        self.snapshot().count
    }

    pub fn sum(&self) -> f64 {
        self.snapshot().sum
    }
}

// ── Labeled families ───────────────────────────────────────────────

/// A family of collectors of one kind, one child per label-value tuple.
///
/// Children are never removed; the label space only grows.
#[derive(Debug)]
pub struct Family<C> {
    label_names: &'static [&'static str],
    children: RwLock<BTreeMap<Vec<String>, Arc<C>>>,
}

pub type CounterVec = Family<Counter>;
pub type GaugeVec = Family<Gauge>;

impl<C: Default> Family<C> {
    pub fn new(label_names: &'static [&'static str]) -> Self {
        Self {
            label_names,
            children: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn label_names(&self) -> &'static [&'static str] {
        self.label_names
    }

    /// The child for `values`, created on first use.
    ///
    /// `values` must have one entry per label name.
    pub fn with_label_values(&self, values: &[&str]) -> Arc<C> {
        debug_assert_eq!(values.len(), self.label_names.len());
        let key: Vec<String> = values.iter().map(|v| v.to_string()).collect();

        if let Some(child) = self
            .children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(child);
        }

        let mut children = self.children.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(children.entry(key).or_default())
    }

    /// All children, ordered by label values.
    pub fn children(&self) -> Vec<(Vec<String>, Arc<C>)> {
        self.children
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(k, v)| (k.clone(), Arc::clone(v)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.children.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CounterVec {
    /// Current value for `values`, or zero if the child does not exist.
    pub fn value(&self, values: &[&str]) -> f64 {
        self.peek(values).map(|c| c.get()).unwrap_or(0.0)
    }
}

impl GaugeVec {
    /// Current value for `values`, if the child exists.
    pub fn value(&self, values: &[&str]) -> Option<f64> {
        self.peek(values).map(|g| g.get())
    }
}

impl<C> Family<C> {
    fn peek(&self, values: &[&str]) -> Option<Arc<C>> {
        let children = self.children.read().unwrap_or_else(PoisonError::into_inner);
        children
            .iter()
            .find(|(k, _)| k.iter().map(String::as_str).eq(values.iter().copied()))
            .map(|(_, v)| Arc::clone(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn atomic_f64_add_is_exact_for_integers() {
        let v = AtomicF64::new(0.5);
        v.add(2.0);
        v.add(-1.0);
        assert_eq!(v.get(), 1.5);
    }

    #[test]
    fn counter_ignores_negative_increments() {
        let c = Counter::default();
        c.inc();
        c.inc_by(2.5);
        c.inc_by(-10.0);
        c.inc_by(f64::NAN);
        assert_eq!(c.get(), 3.5);
    }

    #[test]
    fn summary_tracks_count_and_sum() {
        let s = Summary::default();
        s.observe(0.25);
        s.observe(0.75);
        s.observe(0.0);
        assert_eq!(s.count(), 3);
        assert_eq!(s.sum(), 1.0);
    }

    #[test]
    fn summary_snapshot_pairs_count_with_sum() {
        let summary = Arc::new(Summary::default());
        let writers: Vec<_> = (0..4)
            .map(|_| {
                let summary = Arc::clone(&summary);
                thread::spawn(move || {
                    for _ in 0..2000 {
                        summary.observe(1.0);
                    }
                })
            })
            .collect();

        for _ in 0..2000 {
            let snap = summary.snapshot();
            assert_eq!(snap.sum, snap.count as f64);
        }
        for w in writers {
            w.join().unwrap();
        }
        assert_eq!(summary.snapshot(), SummarySnapshot { count: 8000, sum: 8000.0 });
    }

    #[test]
    fn family_reuses_children() {
        let f = CounterVec::new(&["code"]);
        f.with_label_values(&["200"]).inc();
        f.with_label_values(&["200"]).inc();
        f.with_label_values(&["404"]).inc();

        assert_eq!(f.len(), 2);
        assert_eq!(f.value(&["200"]), 2.0);
        assert_eq!(f.value(&["404"]), 1.0);
        assert_eq!(f.value(&["500"]), 0.0);
    }

    #[test]
    fn family_children_sorted_by_labels() {
        let f = GaugeVec::new(&["job_name", "status"]);
        f.with_label_values(&["b", "FAILED"]).set(1.0);
        f.with_label_values(&["a", "FETCHING"]).set(2.0);
        f.with_label_values(&["a", "CREATED"]).set(3.0);

        let keys: Vec<Vec<String>> = f.children().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                vec!["a".to_string(), "CREATED".to_string()],
                vec!["a".to_string(), "FETCHING".to_string()],
                vec!["b".to_string(), "FAILED".to_string()],
            ]
        );
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let family = Arc::new(CounterVec::new(&["type"]));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let family = Arc::clone(&family);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        family.with_label_values(&["outlinks"]).inc();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(family.value(&["outlinks"]), 8000.0);
    }
}
