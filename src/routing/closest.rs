use crate::common::{Id, PeerTracker};

#[derive(Debug, Clone)]
/// Trackers sorted by their XOR distance to a target, without duplicate ids.
pub struct ClosestTrackers {
    target: Id,
    trackers: Vec<PeerTracker>,
}

impl ClosestTrackers {
    pub fn new(target: Id) -> Self {
        Self {
            target,
            trackers: Vec::new(),
        }
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.target
    }

    pub fn trackers(&self) -> &[PeerTracker] {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    // === Public Methods ===

    /// Insert a tracker at its position, ignoring ids that are already present.
    pub fn add(&mut self, tracker: PeerTracker) {
        let seek = tracker.id.xor(&self.target);

        if let Err(pos) = self
            .trackers
            .binary_search_by(|probe| probe.id.xor(&self.target).cmp(&seek))
        {
            self.trackers.insert(pos, tracker)
        }
    }

    /// Returns true if `id` is strictly closer to the target than the `k`th closest tracker,
    /// or if fewer than `k` trackers are known.
    pub fn would_improve(&self, id: &Id, k: usize) -> bool {
        match self.trackers.get(k.saturating_sub(1)) {
            Some(kth) if self.trackers.len() >= k => {
                id.xor(&self.target) < kth.id.xor(&self.target)
            }
            _ => true,
        }
    }

    /// Consume into at most `k` closest trackers.
    pub fn take(mut self, k: usize) -> Vec<PeerTracker> {
        self.trackers.truncate(k);
        self.trackers
    }
}
