//! Classify, verify and register incoming sessions.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::task::TaskTracker;
use tracing::{debug, error, trace};

use super::handler::Requester;
use super::Tracker;
use crate::common::{ClientCertRequest, Id, NetMessage, PeerTracker};
use crate::transport::{CloseCode, Protocol, Session};
use crate::{Error, Result};

impl Tracker {
    pub(super) async fn handle_session(self: Arc<Self>, session: Box<dyn Session>) {
        let remote_addr = session.remote_addr();

        let requester = match session.protocol() {
            Some(Protocol::User) => {
                debug!(?remote_addr, "Accepted user session");

                Requester::user(remote_addr)
            }
            Some(Protocol::Tracker) => match self.verify(session.as_ref()).await {
                Ok(id) => {
                    debug!(?remote_addr, %id, "Accepted tracker session");
                    self.register(id, remote_addr);

                    Requester::tracker(remote_addr, id)
                }
                Err(_) if self.shutdown.is_cancelled() => {
                    debug!(?remote_addr, "Shutdown before tracker verification");
                    session.close(CloseCode::Shutdown);

                    return;
                }
                Err(error) => {
                    debug!(?remote_addr, ?error, "Tracker verification failed");
                    session.close(CloseCode::VerificationFailed);

                    return;
                }
            },
            None => {
                debug!(?remote_addr, "Unknown protocol");
                session.close(CloseCode::UnknownProtocol);

                return;
            }
        };

        self.serve_streams(session.as_ref(), requester).await;

        session.close(if self.shutdown.is_cancelled() {
            CloseCode::Shutdown
        } else {
            CloseCode::NoReason
        });

        trace!(?remote_addr, "Session done");
    }

    /// Expect the peer tracker to present its certificate as the only message of its first stream.
    async fn verify(&self, session: &dyn Session) -> Result<Id> {
        let challenge = async {
            let mut stream = session.accept_stream().await?;
            stream.recv().await
        };

        let message = tokio::select! {
            _ = self.shutdown.cancelled() => return Err(Error::SessionClosed),
            message = tokio::time::timeout(self.cert_timeout, challenge) => message??,
        };

        match message {
            NetMessage::ClientCertReq(ClientCertRequest {
                cert_der,
                server_cert_sign: None,
            }) if !cert_der.is_empty() => {
                session.verify_client_certificate(&cert_der, None)?;

                Ok(Id::from_certificate(&cert_der))
            }
            NetMessage::ClientCertReq(_) => Err(Error::InvalidMessage("malformed client_cert_req")),
            other => {
                trace!(kind = other.kind(), "Unexpected message during verification");
                Err(Error::InvalidMessage("expected client_cert_req"))
            }
        }
    }

    /// Persist a tracker seen for the first time, and add it to the routing table.
    fn register(&self, id: Id, remote_addr: SocketAddr) {
        let tracker = PeerTracker::new(id, vec![remote_addr.to_string()]);

        if self.routing.get_tracker(&id).is_none() {
            let database = self.database.clone();
            let tracker = tracker.clone();

            self.tasks.spawn(async move {
                match database.insert_tracker_if_absent(&tracker).await {
                    Ok(inserted) => trace!(id = %tracker.id, inserted, "Persisted peer tracker"),
                    Err(error) => error!(id = %tracker.id, ?error, "Failed to persist peer tracker"),
                }
            });
        }

        self.routing.add_tracker(tracker);
    }

    /// Hand every stream of the session to its own task, until the session or the tracker ends.
    async fn serve_streams(self: &Arc<Self>, session: &dyn Session, requester: Requester) {
        let streams = TaskTracker::new();

        loop {
            let stream = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                stream = session.accept_stream() => match stream {
                    Ok(stream) => stream,
                    Err(error) => {
                        trace!(remote_addr = ?requester.remote_addr, ?error, "Stopped accepting streams");
                        break;
                    }
                },
            };

            let tracker = self.clone();
            let requester = requester.clone();
            streams.spawn(async move { tracker.handle_stream(stream, requester).await });
        }

        streams.close();
        streams.wait().await;
    }
}
