//! Struct and implementation of the peer tracker entry in the routing table
use crate::common::Id;

#[derive(Debug, Clone, PartialEq, Eq)]
/// A known peer tracker: its identity and the addresses it was last reachable at.
pub struct PeerTracker {
    pub id: Id,
    pub addresses: Vec<String>,
}

impl PeerTracker {
    /// Creates a new PeerTracker from an id and its addresses.
    pub fn new(id: Id, addresses: Vec<String>) -> PeerTracker {
        PeerTracker { id, addresses }
    }

    /// A tracker known only by address, its id is resolved once it answers a query.
    pub fn unknown(address: impl Into<String>) -> PeerTracker {
        PeerTracker {
            id: Id::ZERO,
            addresses: vec![address.into()],
        }
    }

    #[cfg(test)]
    pub fn random() -> PeerTracker {
        PeerTracker {
            id: Id::random(),
            addresses: vec![format!("127.0.0.1:{}", rand::random::<u16>())],
        }
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn addresses(&self) -> &[String] {
        &self.addresses
    }

    /// Returns true if at least one non-empty address is known.
    pub fn has_address(&self) -> bool {
        self.addresses.iter().any(|address| !address.is_empty())
    }

    /// Returns true if the identity of this tracker is known.
    pub fn is_identified(&self) -> bool {
        !self.id.is_zero()
    }
}
