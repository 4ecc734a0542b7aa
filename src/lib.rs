//! Range-partitioned key-value ring with a bootstrap coordinator.
//!
//! The fixed key space `[0, 1023]` is divided into contiguous ranges, one per
//! ring member. A coordinator owns the ring and the top of the key space;
//! nodes enter and exit through it, and every membership change moves exactly
//! the keys whose owner changed.
//!
//! # Features
//!
//! - Arena-backed ring with split-on-join and merge-on-leave
//! - Push, pull and relay key exchanges over length-prefixed TCP frames
//! - Single-worker request queue so ring changes never interleave
//! - Versioned ring snapshots published to observers
//!
//! # Example
//!
//! ```rust,no_run
//! use ringkv::cluster::{CoordinatorService, NodeService};
//! use ringkv::config::{CoordinatorConfig, NodeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let coordinator = CoordinatorService::start(
//!         CoordinatorConfig::new("127.0.0.1:7000".parse()?)
//!             .with_entry(5, "a")
//!             .with_entry(900, "b"),
//!     )
//!     .await?;
//!
//!     let node = NodeService::new(NodeConfig::new(
//!         500,
//!         "127.0.0.1:7500".parse()?,
//!         coordinator.local_addr(),
//!     ));
//!
//!     // Node 500 takes [0, 500] and key 5 with it.
//!     let range = node.enter().await?;
//!     println!("joined with {}", range);
//!     print!("{}", coordinator.snapshot());
//!
//!     node.exit().await?;
//!     coordinator.shutdown().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────┐        ┌───────────────────────────┐
//! │       Coordinator         │        │          Node             │
//! │  ControlServer (accept)   │◀─enter─│  NodeService              │
//! │        │ queue            │  exit  │   enter / exit            │
//! │        ▼                  │        │                           │
//! │  RebalanceCoordinator     │──link─▶│  instruction loop         │
//! │   MembershipRing          │        │   put / send / receive    │
//! │   LocalStore              │        │   LocalStore              │
//! └───────────────────────────┘        └───────────────────────────┘
//! ```

pub mod cluster;
pub mod config;
pub mod console;
pub mod error;
pub mod metrics;
pub mod network;
pub mod partitioning;
pub mod rebalancing;
pub mod storage;
pub mod types;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use cluster::{CoordinatorService, NodeService};
pub use config::{CoordinatorConfig, NodeConfig, TransferConfig};
pub use error::{Error, NetworkError, NodeError, ProtocolError, Result, RingError};
pub use types::{Key, KeyRange, NodeId, COORDINATOR_ID, KEY_MAX, KEY_MIN};

// Re-export partitioning types
pub use partitioning::{MemberInfo, MembershipRing, RingSnapshot};

// Re-export rebalancing types
pub use rebalancing::{ExchangeShape, NodeLink, RebalanceCoordinator, TransferReport};

// Re-export metrics types
pub use metrics::{Counter, LabeledCounter, MetricsSnapshot, RingMetrics};
