//! In-process metrics for membership changes and data migration.
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  RingMetrics                     │
//! │  joins / leaves          rejected{kind}          │
//! │  exchanges{shape}        keys_transferred        │
//! │  transfer_failures                               │
//! └──────────────────────────────────────────────────┘
//! ```

mod counters;

pub use counters::{Counter, LabeledCounter};

use std::fmt;

/// Counters maintained by the coordinator.
#[derive(Debug)]
pub struct RingMetrics {
    /// Completed joins.
    pub joins: Counter,
    /// Completed leaves.
    pub leaves: Counter,
    /// Rejected control requests by error kind.
    pub rejected: LabeledCounter<1>,
    /// Exchanges run, by shape.
    pub exchanges: LabeledCounter<1>,
    /// Keys moved between stores.
    pub keys_transferred: Counter,
    /// Exchanges that failed part way.
    pub transfer_failures: Counter,
}

impl RingMetrics {
    /// Create a new metrics instance.
    pub fn new() -> Self {
        Self {
            joins: Counter::new("ring_joins_total", "Completed joins"),
            leaves: Counter::new("ring_leaves_total", "Completed leaves"),
            rejected: LabeledCounter::new("ring_rejected_total", ["kind"]),
            exchanges: LabeledCounter::new("ring_exchanges_total", ["shape"]),
            keys_transferred: Counter::new("ring_keys_transferred_total", "Keys moved"),
            transfer_failures: Counter::new(
                "ring_transfer_failures_total",
                "Exchanges that failed part way",
            ),
        }
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            joins: self.joins.get(),
            leaves: self.leaves.get(),
            rejected: self.rejected.get_all().into_iter().map(|([k], v)| (k, v)).collect(),
            exchanges: self.exchanges.get_all().into_iter().map(|([k], v)| (k, v)).collect(),
            keys_transferred: self.keys_transferred.get(),
            transfer_failures: self.transfer_failures.get(),
        }
    }
}

impl Default for RingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy of [`RingMetrics`] values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub joins: u64,
    pub leaves: u64,
    pub rejected: Vec<(String, u64)>,
    pub exchanges: Vec<(String, u64)>,
    pub keys_transferred: u64,
    pub transfer_failures: u64,
}

impl MetricsSnapshot {
    /// Total rejected requests across kinds.
    pub fn rejected_total(&self) -> u64 {
        self.rejected.iter().map(|(_, v)| v).sum()
    }

    /// Exchanges of one shape.
    pub fn exchanges_of(&self, shape: &str) -> u64 {
        self.exchanges
            .iter()
            .find(|(k, _)| k == shape)
            .map(|(_, v)| *v)
            .unwrap_or(0)
    }
}

impl fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "joins: {}", self.joins)?;
        writeln!(f, "leaves: {}", self.leaves)?;
        writeln!(f, "keys transferred: {}", self.keys_transferred)?;
        writeln!(f, "transfer failures: {}", self.transfer_failures)?;
        for (shape, n) in &self.exchanges {
            writeln!(f, "exchanges[{}]: {}", shape, n)?;
        }
        for (kind, n) in &self.rejected {
            writeln!(f, "rejected[{}]: {}", kind, n)?;
        }
        Ok(())
    }
}
