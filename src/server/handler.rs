//! Stream loop and message routing.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, trace};

use super::Tracker;
use crate::common::{
    FindTrackerRequest, FindTrackerResponse, GetAddrResponse, Id, NetMessage, Status,
};
use crate::routing::K;
use crate::transport::Stream;
use crate::Error;

#[derive(Debug, Clone)]
/// Who is on the other end of a stream.
pub(crate) struct Requester {
    pub remote_addr: SocketAddr,
    /// Verified identity, only for peer tracker sessions.
    pub tracker: Option<Id>,
}

impl Requester {
    pub fn user(remote_addr: SocketAddr) -> Requester {
        Requester {
            remote_addr,
            tracker: None,
        }
    }

    pub fn tracker(remote_addr: SocketAddr, id: Id) -> Requester {
        Requester {
            remote_addr,
            tracker: Some(id),
        }
    }
}

impl Tracker {
    pub(super) async fn handle_stream(self: Arc<Self>, mut stream: Box<dyn Stream>, requester: Requester) {
        loop {
            let received = tokio::select! {
                _ = self.shutdown.cancelled() => return,
                received = stream.recv() => received,
            };

            let message = match received {
                Ok(message) => message,
                Err(error @ (Error::BencodeError(_) | Error::InvalidMessage(_) | Error::InvalidIdSize(_))) => {
                    debug!(remote_addr = ?requester.remote_addr, ?error, "Ignoring undecodable message");
                    continue;
                }
                Err(error) => {
                    trace!(remote_addr = ?requester.remote_addr, ?error, "Stream ended");
                    return;
                }
            };

            if !self.handle_message(stream.as_mut(), &requester, message).await {
                return;
            }
        }
    }

    /// Returns `true` if the stream should be read further.
    async fn handle_message(
        &self,
        stream: &mut dyn Stream,
        requester: &Requester,
        message: NetMessage,
    ) -> bool {
        trace!(remote_addr = ?requester.remote_addr, kind = message.kind(), "Handling message");

        match message {
            NetMessage::GetAddrReq => self.handle_get_addr(stream, requester).await,
            NetMessage::FindTrackerReq(request) => {
                self.handle_find_tracker(stream, requester, request).await
            }
            NetMessage::FindResourceReq(request) => {
                self.handle_find_resource(stream, request).await
            }
            NetMessage::PutResourceReq(request) => self.handle_put_resource(stream, request).await,
            NetMessage::ClientCertReq(_)
            | NetMessage::GetAddrRes(_)
            | NetMessage::FindTrackerRes(_)
            | NetMessage::FindResourceRes(_)
            | NetMessage::PutResourceRes(_) => {
                debug!(kind = message.kind(), "Ignoring message that is not a request");
                return true;
            }
        }

        false
    }

    async fn handle_get_addr(&self, stream: &mut dyn Stream, requester: &Requester) {
        let response = NetMessage::GetAddrRes(GetAddrResponse {
            addresses: vec![requester.remote_addr.ip().to_string()],
        });

        send(stream, &response).await;
    }

    async fn handle_find_tracker(
        &self,
        stream: &mut dyn Stream,
        requester: &Requester,
        request: FindTrackerRequest,
    ) {
        let Ok(target) = Id::from_bytes(&request.id) else {
            debug!(len = request.id.len(), "Dropping find_tracker_req with invalid id");
            return;
        };

        let candidates = self
            .routing
            .get_neighbors(&target, K, requester.tracker.as_ref());

        send(
            stream,
            &NetMessage::FindTrackerRes(FindTrackerResponse {
                status: Status::Ok,
                candidates,
            }),
        )
        .await;
    }
}

/// Send a response, the requester sees a failure as a timeout anyway.
pub(super) async fn send(stream: &mut dyn Stream, message: &NetMessage) {
    if let Err(error) = stream.send(message).await {
        debug!(kind = message.kind(), ?error, "Failed to send response");
    }
}
