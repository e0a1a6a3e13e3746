//! Routing table shared by all sessions, and the lookups that fill it.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use tracing::{debug, trace};

use super::lookup::IterativeLookup;
use super::{Dialer, Routing, RoutingTable, K};
use crate::common::{Id, PeerTracker};
use crate::config::REQUEST_TIMEOUT;
use crate::Error;

/// The overlay engine: a routing table plus the means to query remote trackers.
pub struct Router {
    id: Id,
    table: RwLock<RoutingTable>,
    bootstrap: RwLock<Vec<String>>,
    dialer: Arc<dyn Dialer>,
    request_timeout: Duration,
}

impl Router {
    pub fn new(id: Id, dialer: Arc<dyn Dialer>) -> Router {
        Router {
            id,
            table: RwLock::new(RoutingTable::new(id)),
            bootstrap: RwLock::new(Vec::new()),
            dialer,
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    /// Deadline of every single query of a lookup.
    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Router {
        self.request_timeout = request_timeout;
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Number of trackers in the routing table.
    pub fn size(&self) -> usize {
        self.table().size()
    }

    /// Snapshot of the routing table.
    pub fn to_owned_trackers(&self) -> Vec<PeerTracker> {
        self.table().trackers().cloned().collect()
    }

    // === Private Methods ===

    fn table(&self) -> RwLockReadGuard<'_, RoutingTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn table_mut(&self) -> RwLockWriteGuard<'_, RoutingTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run(&self, lookup: &mut IterativeLookup, alpha: usize) {
        let target = lookup.target();
        let mut inflight = FuturesUnordered::new();

        loop {
            for visit in lookup.next_visits(alpha.max(1)) {
                let dialer = self.dialer.clone();
                let request_timeout = self.request_timeout;

                inflight.push(async move {
                    let result =
                        tokio::time::timeout(request_timeout, dialer.find_tracker(&visit.address, &target))
                            .await
                            .map_err(Error::from)
                            .and_then(|reply| reply);

                    (visit, result)
                });
            }

            let Some((visit, result)) = inflight.next().await else {
                break;
            };

            match result {
                Ok(reply) => {
                    if let Some(responder) = lookup.on_reply(&visit, reply) {
                        self.add_tracker(responder);
                    }
                }
                Err(error) => {
                    debug!(address = visit.address, ?error, "Find tracker query failed");
                    lookup.on_failure(&visit);
                }
            }
        }
    }
}

#[async_trait]
impl Routing for Router {
    fn init(&self, seeds: Vec<PeerTracker>) {
        let mut bootstrap = self
            .bootstrap
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        for seed in seeds {
            if !seed.has_address() {
                continue;
            }

            for address in seed.addresses.iter().filter(|address| !address.is_empty()) {
                if !bootstrap.contains(address) {
                    bootstrap.push(address.clone());
                }
            }

            if seed.is_identified() {
                self.table_mut().add(seed);
            }
        }

        debug!(
            bootstrap = bootstrap.len(),
            table = self.size(),
            "Routing initialized"
        );
    }

    async fn find_tracker(
        &self,
        target: &Id,
        alpha: usize,
        timeout: Duration,
    ) -> Vec<PeerTracker> {
        let known = self.table().closest(target, K, None);
        let bootstrap = self
            .bootstrap
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut lookup = IterativeLookup::new(self.id, *target, known, bootstrap);

        if tokio::time::timeout(timeout, self.run(&mut lookup, alpha))
            .await
            .is_err()
        {
            debug!(?target, inflight = lookup.inflight(), "Lookup timed out");
        }

        lookup.into_responders()
    }

    fn add_tracker(&self, tracker: PeerTracker) -> bool {
        trace!(id = ?tracker.id, addresses = ?tracker.addresses, "Adding tracker");

        self.table_mut().add(tracker)
    }

    fn get_tracker(&self, id: &Id) -> Option<PeerTracker> {
        self.table().get(id).cloned()
    }

    fn get_neighbors(&self, target: &Id, k: usize, exclude: Option<&Id>) -> Vec<PeerTracker> {
        self.table().closest(target, k, exclude)
    }
}
