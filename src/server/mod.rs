//! A tracker node serving sessions from a [Listener].

mod handler;
mod resource;
mod session;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use crate::common::Id;
use crate::config::RECV_CERT_TIMEOUT;
use crate::routing::Routing;
use crate::storage::{BlobStore, Database};
use crate::transport::Listener;

/// Everything a tracker's tasks share: identity, overlay, storage and the shutdown signal.
///
/// Built once at startup and handed to every task behind an [Arc].
pub struct Tracker {
    id: Id,
    routing: Arc<dyn Routing>,
    database: Database,
    blobs: BlobStore,
    require_record_binding: bool,
    cert_timeout: Duration,
    /// Held across the avatar write and the record upsert of a put.
    puts: Mutex<()>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl Tracker {
    pub fn new(id: Id, routing: Arc<dyn Routing>, database: Database, blobs: BlobStore) -> Tracker {
        Tracker {
            id,
            routing,
            database,
            blobs,
            require_record_binding: false,
            cert_timeout: RECV_CERT_TIMEOUT,
            puts: Mutex::new(()),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Only store user records whose id is the hash of their own certificate.
    pub fn with_record_binding(mut self, require_record_binding: bool) -> Tracker {
        self.require_record_binding = require_record_binding;
        self
    }

    /// Deadline for a peer tracker to present its certificate.
    pub fn with_cert_timeout(mut self, cert_timeout: Duration) -> Tracker {
        self.cert_timeout = cert_timeout;
        self
    }

    // === Getters ===

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn routing(&self) -> &Arc<dyn Routing> {
        &self.routing
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// The signal stopping [Self::run], cancel it to shut down.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // === Public Methods ===

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Accept sessions until shut down or the listener is closed, then wait for every
    /// session and stream task to finish.
    pub async fn run(self: &Arc<Self>, listener: &dyn Listener) {
        info!(id = %self.id, "Serving");

        loop {
            let session = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                session = listener.accept() => match session {
                    Ok(session) => session,
                    Err(error) => {
                        debug!(?error, "Listener closed");
                        break;
                    }
                },
            };

            let tracker = self.clone();
            self.tasks.spawn(async move { tracker.handle_session(session).await });
        }

        debug!(tasks = self.tasks.len(), "Draining tasks");

        self.tasks.close();
        self.tasks.wait().await;

        info!("Stopped serving");
    }
}
