//! Counter metrics for monotonically increasing values.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// A monotonically increasing counter.
#[derive(Debug)]
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter.
    pub const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    /// Get the counter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the counter help text.
    pub fn help(&self) -> &'static str {
        self.help
    }

    /// Increment the counter by 1.
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment the counter by a specific amount.
    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    /// Get the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A counter keyed by label values, e.g. exchange shape or rejection kind.
#[derive(Debug)]
pub struct LabeledCounter<const N: usize> {
    name: &'static str,
    label_names: [&'static str; N],
    counters: RwLock<HashMap<[String; N], AtomicU64>>,
}

impl<const N: usize> LabeledCounter<N> {
    /// Create a new labeled counter.
    pub fn new(name: &'static str, label_names: [&'static str; N]) -> Self {
        Self {
            name,
            label_names,
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Get the counter name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Get the label names.
    pub fn label_names(&self) -> &[&'static str; N] {
        &self.label_names
    }

    /// Increment the counter with the given labels.
    pub fn inc(&self, labels: [&str; N]) {
        self.inc_by(labels, 1);
    }

    /// Increment the counter by a specific amount with the given labels.
    pub fn inc_by(&self, labels: [&str; N], n: u64) {
        let key: [String; N] = labels.map(|s| s.to_string());

        {
            let counters = self.counters.read();
            if let Some(counter) = counters.get(&key) {
                counter.fetch_add(n, Ordering::Relaxed);
                return;
            }
        }

        let mut counters = self.counters.write();
        counters
            .entry(key)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(n, Ordering::Relaxed);
    }

    /// Get the value for specific labels.
    pub fn get(&self, labels: [&str; N]) -> u64 {
        let key: [String; N] = labels.map(|s| s.to_string());
        self.counters
            .read()
            .get(&key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get all values with their labels, sorted by label.
    pub fn get_all(&self) -> Vec<([String; N], u64)> {
        let mut all: Vec<_> = self
            .counters
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        all.sort();
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new("ring_joins_total", "Completed joins");

        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(5);
        assert_eq!(counter.get(), 6);
        assert_eq!(counter.name(), "ring_joins_total");
    }

    #[test]
    fn test_labeled_counter() {
        let counter = LabeledCounter::<1>::new("ring_exchanges_total", ["shape"]);

        counter.inc(["push"]);
        counter.inc(["push"]);
        counter.inc(["relay"]);

        assert_eq!(counter.get(["push"]), 2);
        assert_eq!(counter.get(["relay"]), 1);
        assert_eq!(counter.get(["pull"]), 0);

        let all = counter.get_all();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].0, ["push".to_string()]);
    }
}
