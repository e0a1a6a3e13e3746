//! State of an iterative lookup, independent of how queries are sent.

use std::collections::HashSet;

use tracing::{debug, trace};

use super::{ClosestTrackers, FindTrackerReply, K};
use crate::common::{Id, PeerTracker};

#[derive(Debug, Clone, PartialEq, Eq)]
/// One query to send.
pub(crate) struct Visit {
    /// Id the tracker is known under, `None` for bootstrap contacts.
    pub expected: Option<Id>,
    pub address: String,
}

/// An iterative process of concurrently querying the closest known trackers to the target,
/// learning closer candidates from their answers, and repeating until no closer tracker
/// is left to visit.
#[derive(Debug)]
pub(crate) struct IterativeLookup {
    requester: Id,
    candidates: ClosestTrackers,
    bootstrap: Vec<String>,
    responders: ClosestTrackers,
    visited_ids: HashSet<Id>,
    visited_addresses: HashSet<String>,
    inflight: usize,
}

impl IterativeLookup {
    pub fn new(
        requester: Id,
        target: Id,
        known: Vec<PeerTracker>,
        bootstrap: Vec<String>,
    ) -> Self {
        trace!(?target, known = known.len(), bootstrap = bootstrap.len(), "New lookup");

        let mut lookup = IterativeLookup {
            requester,
            candidates: ClosestTrackers::new(target),
            bootstrap,
            responders: ClosestTrackers::new(target),
            visited_ids: HashSet::new(),
            visited_addresses: HashSet::new(),
            inflight: 0,
        };

        for tracker in known {
            lookup.add_candidate(tracker);
        }

        lookup
    }

    // === Getters ===

    pub fn target(&self) -> Id {
        self.candidates.target()
    }

    pub fn inflight(&self) -> usize {
        self.inflight
    }

    /// Consume into the closest trackers that answered.
    pub fn into_responders(self) -> Vec<PeerTracker> {
        debug!(
            target = ?self.target(),
            candidates = self.candidates.len(),
            visited = self.visited_addresses.len(),
            responders = self.responders.len(),
            "Done lookup"
        );

        self.responders.take(K)
    }

    // === Public Methods ===

    /// Pick the next trackers to query, keeping at most `alpha` queries in flight.
    pub fn next_visits(&mut self, alpha: usize) -> Vec<Visit> {
        let mut visits = Vec::new();

        while self.inflight < alpha {
            let Some(visit) = self.next_visit() else {
                break;
            };

            self.visited_addresses.insert(visit.address.clone());
            if let Some(id) = visit.expected {
                self.visited_ids.insert(id);
            }
            self.inflight += 1;

            visits.push(visit);
        }

        visits
    }

    /// Record an answer, returning the responder if it should be added to the routing table.
    pub fn on_reply(&mut self, visit: &Visit, reply: FindTrackerReply) -> Option<PeerTracker> {
        self.inflight = self.inflight.saturating_sub(1);

        if let Some(expected) = visit.expected {
            if expected != reply.responder {
                debug!(
                    address = visit.address,
                    ?expected,
                    responder = ?reply.responder,
                    "Responder identity changed, ignoring its answer"
                );
                return None;
            }
        }

        self.visited_ids.insert(reply.responder);

        for candidate in reply.candidates {
            self.add_candidate(candidate);
        }

        if reply.responder == self.requester || reply.responder.is_zero() {
            return None;
        }

        let responder = PeerTracker::new(reply.responder, vec![visit.address.clone()]);
        self.responders.add(responder.clone());

        Some(responder)
    }

    pub fn on_failure(&mut self, visit: &Visit) {
        self.inflight = self.inflight.saturating_sub(1);

        trace!(address = visit.address, "Lookup query failed");
    }

    /// Done once nothing is in flight and nothing is left to visit.
    pub fn is_done(&self) -> bool {
        self.inflight == 0 && self.next_visit().is_none()
    }

    // === Private Methods ===

    fn add_candidate(&mut self, tracker: PeerTracker) {
        if tracker.is_identified() && tracker.has_address() && tracker.id != self.requester {
            self.candidates.add(tracker);
        }
    }

    fn next_visit(&self) -> Option<Visit> {
        let closest = self
            .candidates
            .trackers()
            .iter()
            .take(K)
            .filter(|tracker| !self.visited_ids.contains(&tracker.id))
            .find_map(|tracker| {
                first_address(tracker)
                    .filter(|address| !self.visited_addresses.contains(*address))
                    .map(|address| Visit {
                        expected: Some(tracker.id),
                        address: address.to_string(),
                    })
            });

        closest.or_else(|| {
            self.bootstrap
                .iter()
                .find(|address| !address.is_empty() && !self.visited_addresses.contains(*address))
                .map(|address| Visit {
                    expected: None,
                    address: address.clone(),
                })
        })
    }
}

fn first_address(tracker: &PeerTracker) -> Option<&str> {
    tracker
        .addresses
        .iter()
        .find(|address| !address.is_empty())
        .map(String::as_str)
}

#[cfg(test)]
mod test {
    use super::*;

    fn tracker(byte: u8) -> PeerTracker {
        let mut id = [0_u8; 20];
        id[0] = byte;
        PeerTracker::new(id.into(), vec![format!("10.0.0.{byte}:4000")])
    }

    #[test]
    fn visits_closest_first_within_alpha() {
        let target = Id::ZERO;
        let known = vec![tracker(8), tracker(1), tracker(4), tracker(2)];

        let mut lookup = IterativeLookup::new(Id::random(), target, known, vec![]);

        let visits = lookup.next_visits(3);
        let addresses: Vec<_> = visits.iter().map(|visit| visit.address.as_str()).collect();

        assert_eq!(addresses, vec!["10.0.0.1:4000", "10.0.0.2:4000", "10.0.0.4:4000"]);
        assert_eq!(lookup.inflight(), 3);
        assert!(lookup.next_visits(3).is_empty());
    }

    #[test]
    fn bootstrap_contacts_are_visited_once() {
        let mut lookup = IterativeLookup::new(
            Id::random(),
            Id::random(),
            vec![],
            vec!["10.9.9.9:4000".to_string(), String::new()],
        );

        let visits = lookup.next_visits(3);
        assert_eq!(
            visits,
            vec![Visit {
                expected: None,
                address: "10.9.9.9:4000".to_string()
            }]
        );

        lookup.on_failure(&visits[0]);
        assert!(lookup.is_done());
    }

    #[test]
    fn replies_bring_closer_candidates() {
        let target = Id::ZERO;
        let mut lookup = IterativeLookup::new(Id::random(), target, vec![], vec![
            "10.9.9.9:4000".to_string(),
        ]);

        let visits = lookup.next_visits(3);
        let responder = tracker(9).id;

        let added = lookup.on_reply(
            &visits[0],
            FindTrackerReply {
                responder,
                candidates: vec![tracker(3), PeerTracker::unknown("10.0.0.77:1")],
            },
        );
        assert_eq!(
            added,
            Some(PeerTracker::new(responder, vec!["10.9.9.9:4000".to_string()]))
        );

        let visits = lookup.next_visits(3);
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].expected, Some(tracker(3).id));

        lookup.on_reply(
            &visits[0],
            FindTrackerReply {
                responder: tracker(3).id,
                candidates: vec![tracker(9)],
            },
        );

        assert!(lookup.is_done());

        let responders = lookup.into_responders();
        assert_eq!(responders.len(), 2);
        assert_eq!(responders[0].id, tracker(3).id);
        assert_eq!(responders[1].id, responder);
    }

    #[test]
    fn impostor_is_discarded() {
        let mut lookup = IterativeLookup::new(Id::random(), Id::random(), vec![tracker(5)], vec![]);

        let visits = lookup.next_visits(1);
        let added = lookup.on_reply(
            &visits[0],
            FindTrackerReply {
                responder: tracker(6).id,
                candidates: vec![tracker(7)],
            },
        );

        assert_eq!(added, None);
        assert!(lookup.is_done());
        assert!(lookup.into_responders().is_empty());
    }

    #[test]
    fn requester_is_never_a_candidate() {
        let requester = tracker(1).id;
        let mut lookup = IterativeLookup::new(requester, Id::ZERO, vec![tracker(1)], vec![]);

        assert!(lookup.next_visits(3).is_empty());
        assert!(lookup.is_done());
    }
}
