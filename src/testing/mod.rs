//! Test fixtures and end-to-end tests for the ring.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           TestRing                              │
//! │                                                                 │
//! │   CoordinatorService (127.0.0.1:0)                              │
//! │          ▲  ▲  ▲                                                │
//! │          │  │  └── NodeService n  (OS-assigned relay port)      │
//! │          │  └───── NodeService …                                │
//! │          └──────── NodeService 1                                │
//! │                                                                 │
//! │   snapshot_at(version)   keys_of(id)   assert_partitioned(..)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub(crate) mod utils;
