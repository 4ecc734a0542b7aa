//! Partitioning of the fixed key space across ring members.
//!
//! The key space `[0, 1023]` is split into contiguous ranges, one per member.
//! A member's identifier is the upper bound of the range it owns, so joins
//! split the current owner of the new identifier and leaves merge a range into
//! the next member up.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       MembershipRing                         │
//! │                                                              │
//! │  below-all ⇄ [0,200]:200 ⇄ [201,500]:500 ⇄ [501,1023]:0 ⇄ above-all │
//! │                                                              │
//! │  join 350  → split 500's range: [201,350]:350 + [351,500]:500│
//! │  leave 200 → merge into successor: [0,500]:500               │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use ringkv::partitioning::MembershipRing;
//!
//! let mut ring: MembershipRing<()> = MembershipRing::new();
//! let split = ring.insert_split(500, None).unwrap();
//! assert_eq!(split.moved.end, 500);
//! assert!(ring.is_coordinator(ring.find_owner(900).unwrap()));
//! ```

mod ring;

pub use ring::{
    EntryHandle, EntryId, Members, MemberInfo, Merge, MembershipRing, RingEntry, RingSnapshot,
    Split,
};
