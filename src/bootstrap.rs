//! Joining the overlay at startup.

use std::time::Duration;

use tracing::{info, warn};

use crate::common::PeerTracker;
use crate::routing::ALPHA;
use crate::server::Tracker;
use crate::Result;

/// Split operator supplied `--tracker` values, each may hold several space separated addresses.
pub fn parse_seed_addresses<S: AsRef<str>>(values: &[S]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.as_ref().split_whitespace())
        .map(str::to_string)
        .collect()
}

/// Seed the routing table and look ourselves up to populate it.
///
/// Seeds come from `addresses` if any were given, from the persisted peer trackers otherwise.
/// Returns the trackers that answered; none is not an error, the tracker then starts isolated.
/// Gives up early, with no trackers, once the tracker is shut down.
pub async fn bootstrap(
    tracker: &Tracker,
    addresses: &[String],
    timeout: Duration,
) -> Result<Vec<PeerTracker>> {
    let seeds = if addresses.is_empty() {
        tracker.database().load_trackers().await?
    } else {
        addresses
            .iter()
            .map(|address| PeerTracker::unknown(address.as_str()))
            .collect()
    };

    info!(seeds = seeds.len(), "Bootstrapping");

    let routing = tracker.routing();
    routing.init(seeds);

    let shutdown = tracker.shutdown_token();
    let found = tokio::select! {
        _ = shutdown.cancelled() => {
            info!("Shutdown during bootstrap");
            return Ok(Vec::new());
        }
        found = routing.find_tracker(tracker.id(), ALPHA, timeout) => found,
    };

    if found.is_empty() {
        warn!("No peer tracker reachable, starting isolated");
    } else {
        info!(found = found.len(), "Joined the overlay");
    }

    Ok(found)
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::common::Id;
    use crate::routing::{Dialer, FindTrackerReply, Router};
    use crate::storage::{BlobStore, Database};

    struct Silent;

    #[async_trait]
    impl Dialer for Silent {
        async fn find_tracker(&self, _address: &str, _target: &Id) -> Result<FindTrackerReply> {
            futures::future::pending().await
        }
    }

    /// Seeds never answer, and single queries outlive the bootstrap deadline.
    fn tracker() -> Tracker {
        let id = Id::random();
        let router = Router::new(id, Arc::new(Silent)).with_request_timeout(Duration::from_secs(60));

        Tracker::new(
            id,
            Arc::new(router),
            Database::open_in_memory().unwrap(),
            BlobStore::new(std::env::temp_dir().join("pie-bootstrap-test")),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_bootstrap() {
        let tracker = tracker();
        let started = tokio::time::Instant::now();

        let shutdown = tracker.shutdown_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            shutdown.cancel();
        });

        let found = bootstrap(
            &tracker,
            &["10.0.0.1:4000".to_string()],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(found.is_empty());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn bootstrap_after_shutdown_returns_at_once() {
        let tracker = tracker();
        tracker.shutdown();

        let started = tokio::time::Instant::now();
        let found = bootstrap(
            &tracker,
            &["10.0.0.1:4000".to_string()],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(found.is_empty());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn silent_seeds_are_given_up_at_the_deadline() {
        let tracker = tracker();
        let started = tokio::time::Instant::now();

        let found = bootstrap(
            &tracker,
            &["10.0.0.1:4000".to_string()],
            Duration::from_secs(30),
        )
        .await
        .unwrap();

        assert!(found.is_empty());
        assert!(started.elapsed() >= Duration::from_secs(30));
    }

    #[test]
    fn seed_addresses_are_split() {
        let values = vec![
            "192.0.2.1:4000 192.0.2.2:4000".to_string(),
            "  [2001:db8::1]:4000 ".to_string(),
            String::new(),
        ];

        assert_eq!(
            parse_seed_addresses(&values),
            vec!["192.0.2.1:4000", "192.0.2.2:4000", "[2001:db8::1]:4000"]
        );
    }
}
