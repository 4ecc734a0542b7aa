//! Moving keys when members join or leave the ring.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  RebalanceCoordinator                        │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  Step 1: Mutate the ring                             │  │
//! │  │  - enter: insert_split, new member takes lower half  │  │
//! │  │  - exit:  remove_merge, successor widens downward    │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                          ↓                                   │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  Step 2: Exchange keys                               │  │
//! │  │  - push  (coordinator → node)                        │  │
//! │  │  - pull  (node → coordinator)                        │  │
//! │  │  - relay (node → node, acknowledged to coordinator)  │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! │                          ↓                                   │
//! │  ┌──────────────────────────────────────────────────────┐  │
//! │  │  Step 3: Acknowledge and publish                     │  │
//! │  │  - JOINED / FINISHED to the member, RANGE to the     │  │
//! │  │    neighbour whose range moved                       │  │
//! │  │  - new RingSnapshot on the watch channel             │  │
//! │  └──────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! A failed exchange is logged and counted, but the ring mutation from step 1
//! stays applied. Keys that were not streamed remain with the sender while the
//! ring names the receiver as their owner.

mod coordinator;
pub mod transfer;

pub use coordinator::RebalanceCoordinator;
pub use transfer::{ExchangeShape, NodeLink, TransferReport};
