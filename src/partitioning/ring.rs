//! Membership ring: range owners kept as an arena-backed doubly-linked list.
//!
//! The list is bounded by two sentinels that own no keys. Between them, members
//! are ordered by range start and together cover the whole key space. Only the
//! coordinator holds a ring, and every mutation goes through
//! [`MembershipRing::insert_split`] or [`MembershipRing::remove_merge`].

use crate::error::RingError;
use crate::types::{in_key_space, Key, KeyRange, NodeId, COORDINATOR_ID, KEY_MAX, KEY_MIN};
use std::fmt;
use std::net::SocketAddr;

/// Arena slot of the low sentinel.
const LOW: usize = 0;

/// Arena slot of the high sentinel.
const HIGH: usize = 1;

/// Identity of a ring entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    /// Boundary marker below key 0.
    BelowAll,
    /// A participating node (or the coordinator).
    Node(NodeId),
    /// Boundary marker above key 1023.
    AboveAll,
}

impl EntryId {
    /// Node id, if this is not a sentinel.
    pub fn node(&self) -> Option<NodeId> {
        match self {
            EntryId::Node(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether this is one of the two boundary markers.
    pub fn is_sentinel(&self) -> bool {
        !matches!(self, EntryId::Node(_))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryId::BelowAll => f.write_str("below-all"),
            EntryId::Node(id) => write!(f, "{}", id),
            EntryId::AboveAll => f.write_str("above-all"),
        }
    }
}

/// Stable reference to a live entry inside the ring arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryHandle(usize);

/// One participant in the ring.
///
/// `C` is the connection type used to reach the entry; the coordinator's own
/// entry and the sentinels never carry one.
#[derive(Debug)]
pub struct RingEntry<C> {
    id: EntryId,
    address: Option<SocketAddr>,
    range: Option<KeyRange>,
    prev: Option<usize>,
    next: Option<usize>,
    /// Open connection to this entry, if it is remote.
    pub conn: Option<C>,
}

impl<C> RingEntry<C> {
    fn sentinel(id: EntryId) -> Self {
        Self {
            id,
            address: None,
            range: None,
            prev: None,
            next: None,
            conn: None,
        }
    }

    fn member(id: NodeId, address: Option<SocketAddr>, range: KeyRange) -> Self {
        Self {
            id: EntryId::Node(id),
            address,
            range: Some(range),
            prev: None,
            next: None,
            conn: None,
        }
    }

    /// Entry identity.
    pub fn id(&self) -> EntryId {
        self.id
    }

    /// Node id of a member entry.
    pub fn node_id(&self) -> Option<NodeId> {
        self.id.node()
    }

    /// Address peers use to reach this entry.
    pub fn address(&self) -> Option<SocketAddr> {
        self.address
    }

    /// Owned range. `None` only for sentinels.
    pub fn range(&self) -> Option<KeyRange> {
        self.range
    }

    /// Whether this entry owns `key`.
    pub fn owns(&self, key: Key) -> bool {
        self.range.is_some_and(|r| r.contains(key))
    }
}

/// Result of a split on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Split {
    /// The newly inserted entry.
    pub joined: EntryHandle,
    /// The entry that gave up the lower part of its range.
    pub owner: EntryHandle,
    /// Keys that now belong to `joined` and must move from `owner`.
    pub moved: KeyRange,
}

/// Result of a merge on leave.
#[derive(Debug)]
pub struct Merge<C> {
    /// The unlinked entry, with its connection still attached.
    pub departed: RingEntry<C>,
    /// The entry that absorbed the departed range.
    pub successor: EntryHandle,
    /// Keys that now belong to `successor` and must move from `departed`.
    pub moved: KeyRange,
}

/// Owned view of one member, detached from the ring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub id: NodeId,
    pub range: KeyRange,
    pub address: Option<SocketAddr>,
}

/// Versioned copy of ring membership in ring order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RingSnapshot {
    /// Incremented on every split and merge.
    pub version: u64,
    /// Members sorted by range start.
    pub members: Vec<MemberInfo>,
}

impl RingSnapshot {
    /// Member whose range contains `key`.
    pub fn owner_of(&self, key: Key) -> Option<&MemberInfo> {
        self.members.iter().find(|m| m.range.contains(key))
    }

    /// Member with the given id.
    pub fn member(&self, id: NodeId) -> Option<&MemberInfo> {
        self.members.iter().find(|m| m.id == id)
    }

    /// Ranges in ring order.
    pub fn ranges(&self) -> Vec<KeyRange> {
        self.members.iter().map(|m| m.range).collect()
    }
}

impl fmt::Display for RingSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Path of nodes (version {})", self.version)?;
        for member in &self.members {
            writeln!(
                f,
                "Node: {}, Start: {}, End: {}",
                member.id, member.range.start, member.range.end
            )?;
        }
        Ok(())
    }
}

/// Ordered ring of range owners held by the coordinator.
#[derive(Debug)]
pub struct MembershipRing<C> {
    slots: Vec<Option<RingEntry<C>>>,
    free: Vec<usize>,
    coordinator: usize,
    version: u64,
}

impl<C> Default for MembershipRing<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MembershipRing<C> {
    /// Create a ring where the coordinator owns the whole key space.
    pub fn new() -> Self {
        let mut low = RingEntry::sentinel(EntryId::BelowAll);
        let mut high = RingEntry::sentinel(EntryId::AboveAll);
        let mut coordinator = RingEntry::member(COORDINATOR_ID, None, KeyRange::full());

        low.next = Some(2);
        coordinator.prev = Some(LOW);
        coordinator.next = Some(HIGH);
        high.prev = Some(2);

        Self {
            slots: vec![Some(low), Some(high), Some(coordinator)],
            free: Vec::new(),
            coordinator: 2,
            version: 0,
        }
    }

    /// Handle of the coordinator's own entry.
    pub fn coordinator(&self) -> EntryHandle {
        EntryHandle(self.coordinator)
    }

    /// Whether `handle` refers to the coordinator's own entry.
    pub fn is_coordinator(&self, handle: EntryHandle) -> bool {
        handle.0 == self.coordinator
    }

    /// Number of split/merge mutations applied so far.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Number of members, coordinator included.
    pub fn len(&self) -> usize {
        self.members().count()
    }

    /// The coordinator entry can never be removed, so the ring is never empty.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Look up a live entry.
    pub fn entry(&self, handle: EntryHandle) -> Option<&RingEntry<C>> {
        self.slots.get(handle.0).and_then(Option::as_ref)
    }

    /// Look up a live entry mutably.
    pub fn entry_mut(&mut self, handle: EntryHandle) -> Option<&mut RingEntry<C>> {
        self.slots.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Borrow two distinct entries mutably at once.
    pub fn pair_mut(
        &mut self,
        a: EntryHandle,
        b: EntryHandle,
    ) -> Option<(&mut RingEntry<C>, &mut RingEntry<C>)> {
        if a.0 == b.0 || a.0 >= self.slots.len() || b.0 >= self.slots.len() {
            return None;
        }

        let (first, second, swapped) = if a.0 < b.0 { (a.0, b.0, false) } else { (b.0, a.0, true) };
        let (head, tail) = self.slots.split_at_mut(second);
        let x = head[first].as_mut()?;
        let y = tail[0].as_mut()?;

        Some(if swapped { (y, x) } else { (x, y) })
    }

    /// Iterate over members (no sentinels) in ring order.
    pub fn members(&self) -> Members<'_, C> {
        Members {
            ring: self,
            cursor: self.link(LOW).next,
        }
    }

    /// Find the member whose range contains `key`.
    ///
    /// A miss means the coverage invariant is broken.
    pub fn find_owner(&self, key: Key) -> Result<EntryHandle, RingError> {
        self.members()
            .find(|(_, entry)| entry.owns(key))
            .map(|(handle, _)| handle)
            .ok_or(RingError::ConsistencyViolation(key))
    }

    /// Find a member by node id.
    pub fn find_by_id(&self, id: NodeId) -> Result<EntryHandle, RingError> {
        self.members()
            .find(|(_, entry)| entry.id == EntryId::Node(id))
            .map(|(handle, _)| handle)
            .ok_or(RingError::NotFound(id))
    }

    /// Split the owner of `new_id` and insert a new member below it.
    ///
    /// The new member takes `[owner.start, new_id]`; the owner keeps
    /// `[new_id + 1, owner.end]`.
    pub fn insert_split(
        &mut self,
        new_id: u32,
        address: Option<SocketAddr>,
    ) -> Result<Split, RingError> {
        if !in_key_space(new_id) {
            return Err(RingError::InvalidId {
                id: new_id,
                reason: "outside key space",
            });
        }
        let id = new_id as NodeId;

        if self.find_by_id(id).is_ok() {
            return Err(RingError::InvalidId {
                id: new_id,
                reason: "already a member",
            });
        }

        let owner = self.find_owner(id)?;
        let owner_range = self.range_of(owner.0);
        if id == owner_range.end {
            return Err(RingError::InvalidId {
                id: new_id,
                reason: "would leave the current owner with no keys",
            });
        }

        let moved = KeyRange {
            start: owner_range.start,
            end: id,
        };
        let kept = KeyRange {
            start: id + 1,
            end: owner_range.end,
        };

        let prev = self.link(owner.0).prev.unwrap_or(LOW);
        let mut entry = RingEntry::member(id, address, moved);
        entry.prev = Some(prev);
        entry.next = Some(owner.0);
        let joined = self.alloc(entry);

        self.link_mut(prev).next = Some(joined);
        let owner_entry = self.link_mut(owner.0);
        owner_entry.prev = Some(joined);
        owner_entry.range = Some(kept);
        self.version += 1;

        Ok(Split {
            joined: EntryHandle(joined),
            owner,
            moved,
        })
    }

    /// Unlink member `id` and widen its successor over the freed range.
    pub fn remove_merge(&mut self, id: NodeId) -> Result<Merge<C>, RingError> {
        let leaving = self.find_by_id(id)?;
        let succ = self.link(leaving.0).next.unwrap_or(HIGH);
        if succ == HIGH {
            return Err(RingError::LastNodeExit(id));
        }

        let moved = self.range_of(leaving.0);
        let succ_range = self.range_of(succ);
        let prev = self.link(leaving.0).prev.unwrap_or(LOW);

        let succ_entry = self.link_mut(succ);
        succ_entry.range = Some(KeyRange {
            start: moved.start,
            end: succ_range.end,
        });
        succ_entry.prev = Some(prev);
        self.link_mut(prev).next = Some(succ);

        let mut departed = self.slots[leaving.0]
            .take()
            .ok_or(RingError::NotFound(id))?;
        departed.prev = None;
        departed.next = None;
        self.free.push(leaving.0);
        self.version += 1;

        Ok(Merge {
            departed,
            successor: EntryHandle(succ),
            moved,
        })
    }

    /// Owned copy of membership for diagnostics.
    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            version: self.version,
            members: self
                .members()
                .filter_map(|(_, e)| {
                    Some(MemberInfo {
                        id: e.node_id()?,
                        range: e.range?,
                        address: e.address,
                    })
                })
                .collect(),
        }
    }

    /// Audit coverage, ordering, back links and id placement.
    ///
    /// On failure, reports the first key at which the ring stops being a
    /// contiguous partition of the key space.
    pub fn check_invariants(&self) -> Result<(), RingError> {
        let mut expected_start = KEY_MIN as u32;
        let mut prev = LOW;

        for (handle, entry) in self.members() {
            let range = entry.range.ok_or(RingError::ConsistencyViolation(expected_start as Key))?;
            if range.start as u32 != expected_start || entry.prev != Some(prev) {
                return Err(RingError::ConsistencyViolation(expected_start as Key));
            }
            if !self.is_coordinator(handle) && entry.node_id() != Some(range.end) {
                return Err(RingError::ConsistencyViolation(range.end));
            }
            expected_start = range.end as u32 + 1;
            prev = handle.0;
        }

        if expected_start != KEY_MAX as u32 + 1 || self.link(HIGH).prev != Some(prev) {
            return Err(RingError::ConsistencyViolation(expected_start.min(KEY_MAX as u32) as Key));
        }

        Ok(())
    }

    fn alloc(&mut self, entry: RingEntry<C>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(entry);
                slot
            }
            None => {
                self.slots.push(Some(entry));
                self.slots.len() - 1
            }
        }
    }

    // Slots reachable through links are always occupied.
    fn link(&self, slot: usize) -> &RingEntry<C> {
        self.slots[slot].as_ref().expect("linked slot is live")
    }

    fn link_mut(&mut self, slot: usize) -> &mut RingEntry<C> {
        self.slots[slot].as_mut().expect("linked slot is live")
    }

    fn range_of(&self, slot: usize) -> KeyRange {
        self.link(slot).range.unwrap_or_else(KeyRange::full)
    }
}

/// Ring-order iterator over members.
pub struct Members<'a, C> {
    ring: &'a MembershipRing<C>,
    cursor: Option<usize>,
}

impl<'a, C> Iterator for Members<'a, C> {
    type Item = (EntryHandle, &'a RingEntry<C>);

    fn next(&mut self) -> Option<Self::Item> {
        let slot = self.cursor?;
        if slot == HIGH {
            self.cursor = None;
            return None;
        }
        let entry = self.ring.slots.get(slot)?.as_ref()?;
        self.cursor = entry.next;
        Some((EntryHandle(slot), entry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> Option<SocketAddr> {
        Some(SocketAddr::from(([127, 0, 0, 1], port)))
    }

    fn ranges(ring: &MembershipRing<()>) -> Vec<(NodeId, Key, Key)> {
        ring.members()
            .map(|(_, e)| {
                let r = e.range().unwrap();
                (e.node_id().unwrap(), r.start, r.end)
            })
            .collect()
    }

    #[test]
    fn test_new_ring_coordinator_owns_everything() {
        let ring: MembershipRing<()> = MembershipRing::new();

        assert_eq!(ring.len(), 1);
        assert_eq!(ranges(&ring), vec![(0, 0, 1023)]);
        assert_eq!(ring.find_owner(0).unwrap(), ring.coordinator());
        assert_eq!(ring.find_owner(1023).unwrap(), ring.coordinator());
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_insert_split_takes_lower_half() {
        let mut ring: MembershipRing<()> = MembershipRing::new();

        let split = ring.insert_split(500, addr(9001)).unwrap();
        assert_eq!(split.owner, ring.coordinator());
        assert_eq!(split.moved, KeyRange::new(0, 500).unwrap());
        assert_eq!(ranges(&ring), vec![(500, 0, 500), (0, 501, 1023)]);

        let joined = ring.entry(split.joined).unwrap();
        assert_eq!(joined.address(), addr(9001));
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_split_routes_lower_ids_to_new_member() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();

        let split = ring.insert_split(200, addr(9002)).unwrap();
        assert_eq!(ring.entry(split.owner).unwrap().node_id(), Some(500));
        assert_eq!(split.moved, KeyRange::new(0, 200).unwrap());
        assert_eq!(
            ranges(&ring),
            vec![(200, 0, 200), (500, 201, 500), (0, 501, 1023)]
        );

        let split = ring.insert_split(800, addr(9003)).unwrap();
        assert!(ring.is_coordinator(split.owner));
        assert_eq!(split.moved, KeyRange::new(501, 800).unwrap());
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_insert_rejects_duplicate_and_out_of_range() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();
        let before = ring.snapshot();

        assert!(matches!(
            ring.insert_split(500, addr(9002)),
            Err(RingError::InvalidId { id: 500, .. })
        ));
        assert!(matches!(
            ring.insert_split(0, addr(9002)),
            Err(RingError::InvalidId { id: 0, .. })
        ));
        assert!(matches!(
            ring.insert_split(1024, addr(9002)),
            Err(RingError::InvalidId { id: 1024, .. })
        ));
        assert!(matches!(
            ring.insert_split(1023, addr(9002)),
            Err(RingError::InvalidId { id: 1023, .. })
        ));

        assert_eq!(ring.snapshot(), before);
    }

    #[test]
    fn test_remove_merge_widens_successor() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();
        ring.insert_split(200, addr(9002)).unwrap();

        let merge = ring.remove_merge(500).unwrap();
        assert_eq!(merge.departed.node_id(), Some(500));
        assert_eq!(merge.moved, KeyRange::new(201, 500).unwrap());
        assert!(ring.is_coordinator(merge.successor));
        assert_eq!(ranges(&ring), vec![(200, 0, 200), (0, 201, 1023)]);
        ring.check_invariants().unwrap();

        let merge = ring.remove_merge(200).unwrap();
        assert!(ring.is_coordinator(merge.successor));
        assert_eq!(ranges(&ring), vec![(0, 0, 1023)]);
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_merge_between_nodes() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();
        ring.insert_split(200, addr(9002)).unwrap();

        let merge = ring.remove_merge(200).unwrap();
        assert_eq!(ring.entry(merge.successor).unwrap().node_id(), Some(500));
        assert_eq!(ranges(&ring), vec![(500, 0, 500), (0, 501, 1023)]);
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_remove_unknown_id_leaves_ring_unchanged() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();
        let before = ring.snapshot();

        assert!(matches!(ring.remove_merge(42), Err(RingError::NotFound(42))));
        assert_eq!(ring.snapshot(), before);
    }

    #[test]
    fn test_coordinator_cannot_leave() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();

        assert!(matches!(
            ring.remove_merge(COORDINATOR_ID),
            Err(RingError::LastNodeExit(0))
        ));
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_slots_are_reused_after_leave() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        let first = ring.insert_split(500, addr(9001)).unwrap().joined;
        ring.remove_merge(500).unwrap();

        let second = ring.insert_split(300, addr(9002)).unwrap().joined;
        assert_eq!(first, second);
        assert_eq!(ring.entry(second).unwrap().node_id(), Some(300));
        ring.check_invariants().unwrap();
    }

    #[test]
    fn test_pair_mut_returns_requested_order() {
        let mut ring: MembershipRing<u32> = MembershipRing::new();
        let split = ring.insert_split(500, addr(9001)).unwrap();

        let (joined, owner) = ring.pair_mut(split.joined, split.owner).unwrap();
        assert_eq!(joined.node_id(), Some(500));
        assert_eq!(owner.node_id(), Some(COORDINATOR_ID));
        joined.conn = Some(7);

        assert!(ring.pair_mut(split.owner, split.owner).is_none());
        assert_eq!(ring.entry(split.joined).unwrap().conn, Some(7));
    }

    #[test]
    fn test_snapshot_lookup_and_display() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        ring.insert_split(500, addr(9001)).unwrap();

        let snapshot = ring.snapshot();
        assert_eq!(snapshot.version, 1);
        assert_eq!(snapshot.owner_of(5).unwrap().id, 500);
        assert_eq!(snapshot.owner_of(900).unwrap().id, 0);
        assert!(snapshot.to_string().contains("Node: 500, Start: 0, End: 500"));
    }

    #[test]
    fn test_coverage_holds_across_many_mutations() {
        let mut ring: MembershipRing<()> = MembershipRing::new();
        let ids = [512u32, 256, 768, 128, 900, 64, 300, 1000, 1];

        for (i, id) in ids.iter().enumerate() {
            ring.insert_split(*id, addr(9000 + i as u16)).unwrap();
            ring.check_invariants().unwrap();
        }
        for id in [256u16, 1, 1000, 512] {
            ring.remove_merge(id).unwrap();
            ring.check_invariants().unwrap();
        }

        let covered: usize = ring.snapshot().ranges().iter().map(KeyRange::len).sum();
        assert_eq!(covered, 1024);
        for key in KeyRange::full().keys() {
            let owner = ring.find_owner(key).unwrap();
            assert!(ring.entry(owner).unwrap().owns(key));
        }
    }
}
