//! Simplified Kademlia routing table of peer trackers.

use std::collections::BTreeMap;
use std::slice::Iter;

use super::{ClosestTrackers, K};
use crate::common::{Id, PeerTracker};

#[derive(Debug, Clone)]
/// Peer trackers bucketed by their distance from our own id.
pub struct RoutingTable {
    id: Id,
    buckets: BTreeMap<u8, KBucket>,
}

impl RoutingTable {
    /// Create a new [RoutingTable] with a given id.
    pub fn new(id: Id) -> Self {
        RoutingTable {
            id,
            buckets: BTreeMap::new(),
        }
    }

    /// Returns the [Id] of this node, where the distance is measured from.
    pub fn id(&self) -> &Id {
        &self.id
    }

    // === Public Methods ===

    /// Attempts to add or refresh a tracker, and return `true` if it did.
    ///
    /// Our own id, the unknown id and trackers without an address are never admitted.
    pub fn add(&mut self, tracker: PeerTracker) -> bool {
        if !tracker.is_identified() || !tracker.has_address() {
            return false;
        }

        let distance = self.id.distance(&tracker.id);

        if distance == 0 {
            // Do not add self to the routing_table
            return false;
        }

        self.buckets.entry(distance).or_default().add(tracker)
    }

    /// Remove a tracker from this routing table.
    pub fn remove(&mut self, id: &Id) {
        let distance = self.id.distance(id);

        if let Some(bucket) = self.buckets.get_mut(&distance) {
            bucket.remove(id)
        }
    }

    pub fn get(&self, id: &Id) -> Option<&PeerTracker> {
        self.buckets
            .get(&self.id.distance(id))
            .and_then(|bucket| bucket.iter().find(|tracker| &tracker.id == id))
    }

    /// Up to `k` trackers ordered by distance to `target`, skipping `exclude`.
    pub fn closest(&self, target: &Id, k: usize, exclude: Option<&Id>) -> Vec<PeerTracker> {
        let mut closest = ClosestTrackers::new(*target);

        for tracker in self.trackers() {
            if Some(&tracker.id) != exclude {
                closest.add(tracker.clone());
            }
        }

        closest.take(k)
    }

    /// Returns `true` if this routing table is empty.
    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(|bucket| bucket.is_empty())
    }

    /// Return the number of trackers in this routing table.
    pub fn size(&self) -> usize {
        self.buckets.values().map(|bucket| bucket.trackers.len()).sum()
    }

    /// Iterate over all trackers, closest buckets first.
    pub fn trackers(&self) -> impl Iterator<Item = &PeerTracker> {
        self.buckets.values().flat_map(|bucket| bucket.iter())
    }
}

/// A k-bucket, holding up to [K] trackers, least recently seen first.
#[derive(Debug, Clone)]
pub struct KBucket {
    trackers: Vec<PeerTracker>,
}

impl KBucket {
    pub fn new() -> Self {
        KBucket {
            trackers: Vec::with_capacity(K),
        }
    }

    // === Public Methods ===

    pub fn add(&mut self, incoming: PeerTracker) -> bool {
        if let Some(index) = self.iter().position(|tracker| tracker.id == incoming.id) {
            // Seen again, take the fresh addresses and move it to the tail.
            self.trackers.remove(index);
            self.trackers.push(incoming);

            true
        } else if self.trackers.len() < K {
            self.trackers.push(incoming);

            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, id: &Id) {
        self.trackers.retain(|tracker| &tracker.id != id);
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    pub fn iter(&self) -> Iter<'_, PeerTracker> {
        self.trackers.iter()
    }
}

impl Default for KBucket {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn tracker(id: Id, address: &str) -> PeerTracker {
        PeerTracker::new(id, vec![address.to_string()])
    }

    #[test]
    fn table_is_empty() {
        let mut table = RoutingTable::new(Id::random());
        assert!(table.is_empty());

        table.add(PeerTracker::random());
        assert!(!table.is_empty());
    }

    #[test]
    fn contains_and_remove() {
        let mut table = RoutingTable::new(Id::random());
        let peer = PeerTracker::random();

        assert!(table.get(&peer.id).is_none());

        table.add(peer.clone());
        assert_eq!(table.get(&peer.id), Some(&peer));

        table.remove(&peer.id);
        assert!(table.get(&peer.id).is_none());
    }

    #[test]
    fn buckets_are_sets() {
        let mut table = RoutingTable::new(Id::random());

        let first = PeerTracker::random();
        let second = tracker(first.id, "10.1.1.1:9000");

        assert!(table.add(first));
        assert!(table.add(second.clone()));

        assert_eq!(table.size(), 1);
        assert_eq!(table.get(&second.id), Some(&second));
    }

    #[test]
    fn should_not_add_self_unknown_or_unreachable() {
        let id = Id::random();
        let mut table = RoutingTable::new(id);

        assert!(!table.add(tracker(id, "10.0.0.1:1")));
        assert!(!table.add(tracker(Id::ZERO, "10.0.0.1:1")));
        assert!(!table.add(PeerTracker::new(Id::random(), vec![])));
        assert!(!table.add(tracker(Id::random(), "")));

        assert!(table.is_empty())
    }

    #[test]
    fn should_not_add_more_than_k() {
        let mut bucket = KBucket::new();

        for i in 0..K {
            assert!(bucket.add(PeerTracker::random()), "Failed to add tracker {i}");
        }

        assert!(!bucket.add(PeerTracker::random()));
    }

    #[test]
    fn refreshed_tracker_moves_to_tail() {
        let mut bucket = KBucket::new();

        let first = PeerTracker::random();
        bucket.add(first.clone());
        bucket.add(PeerTracker::random());

        assert_ne!(bucket.trackers[1].id, first.id);

        bucket.add(tracker(first.id, "10.2.2.2:7000"));

        assert_eq!(bucket.trackers.len(), 2);
        assert_eq!(bucket.trackers[1].id, first.id);
        assert_eq!(bucket.trackers[1].addresses, vec!["10.2.2.2:7000"]);
    }

    #[test]
    fn closest_is_ordered_and_excludes() {
        let mut table = RoutingTable::new(Id::random());

        for _ in 0..200 {
            table.add(PeerTracker::random());
        }

        let target = Id::random();
        let all = table.closest(&target, usize::MAX, None);

        assert_eq!(all.len(), table.size());
        for pair in all.windows(2) {
            assert!(pair[0].id.xor(&target) < pair[1].id.xor(&target));
        }

        let excluded = all[0].id;
        let closest = table.closest(&target, K, Some(&excluded));

        assert_eq!(closest.len(), K);
        assert!(closest.iter().all(|tracker| tracker.id != excluded));
        assert_eq!(closest[0], all[1]);
    }
}
