//! Kademlia overlay of peer trackers.
//!
//! The rest of the tracker only sees the [Routing] facade, [Router] is the engine behind it.

mod closest;
mod lookup;
mod router;
mod table;

use std::time::Duration;

use async_trait::async_trait;

use crate::common::{Id, PeerTracker};
use crate::Result;

pub use closest::ClosestTrackers;
pub use router::Router;
pub use table::{KBucket, RoutingTable};

/// Maximum size of a k-bucket, and number of candidates returned by a neighbor query.
pub const K: usize = 20;
/// Number of concurrent queries of an iterative lookup.
pub const ALPHA: usize = 3;

/// The overlay as seen by a tracker node.
#[async_trait]
pub trait Routing: Send + Sync {
    /// Seed the overlay. Trackers with an unknown id are only used as lookup entry points.
    fn init(&self, seeds: Vec<PeerTracker>);

    /// Iterative network-wide lookup of `target`, with at most `alpha` queries in flight.
    ///
    /// Every tracker that answers is added to the routing table along the way.
    /// Returns the closest responders found before `timeout`.
    async fn find_tracker(&self, target: &Id, alpha: usize, timeout: Duration)
        -> Vec<PeerTracker>;

    /// Add or refresh a tracker, returns `true` if the routing table holds it afterwards.
    fn add_tracker(&self, tracker: PeerTracker) -> bool;

    fn get_tracker(&self, id: &Id) -> Option<PeerTracker>;

    /// Up to `k` known trackers ordered by XOR distance to `target`, never including `exclude`.
    fn get_neighbors(&self, target: &Id, k: usize, exclude: Option<&Id>) -> Vec<PeerTracker>;
}

#[derive(Debug, Clone, PartialEq)]
/// Answer of a remote tracker to a find tracker query.
pub struct FindTrackerReply {
    /// Verified identity of the tracker that answered.
    pub responder: Id,
    pub candidates: Vec<PeerTracker>,
}

/// Sends find tracker queries to remote trackers.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn find_tracker(&self, address: &str, target: &Id) -> Result<FindTrackerReply>;
}
