//! Core types used throughout the ring store.

use std::fmt;
use std::ops::RangeInclusive;

/// Node identifier. Doubles as a ring position inside the key space.
pub type NodeId = u16;

/// A key in the fixed key space.
pub type Key = u16;

/// Lowest key in the key space.
pub const KEY_MIN: Key = 0;

/// Highest key in the key space.
pub const KEY_MAX: Key = 1023;

/// Fixed identity of the coordinator's own ring entry.
pub const COORDINATOR_ID: NodeId = 0;

/// Check whether a raw integer falls inside the key space.
pub fn in_key_space(value: u32) -> bool {
    value >= KEY_MIN as u32 && value <= KEY_MAX as u32
}

/// An inclusive `[start, end]` interval of the key space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyRange {
    /// First key in the range.
    pub start: Key,
    /// Last key in the range (inclusive).
    pub end: Key,
}

impl KeyRange {
    /// Create a range, returning `None` if it is empty or leaves the key space.
    pub fn new(start: Key, end: Key) -> Option<Self> {
        if start <= end && end <= KEY_MAX {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// The whole key space.
    pub const fn full() -> Self {
        Self {
            start: KEY_MIN,
            end: KEY_MAX,
        }
    }

    /// Check if a key lies inside this range.
    pub fn contains(&self, key: Key) -> bool {
        self.start <= key && key <= self.end
    }

    /// Number of keys covered.
    pub fn len(&self) -> usize {
        (self.end - self.start) as usize + 1
    }

    /// Ranges are never empty once constructed.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Iterate over every key in the range.
    pub fn keys(&self) -> RangeInclusive<Key> {
        self.start..=self.end
    }
}

impl fmt::Display for KeyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}
