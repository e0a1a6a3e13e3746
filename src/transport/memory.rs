//! In-process transport with the same semantics as [super::quic].
//!
//! Messages still go through the bencode codec, so everything but the network is exercised.
//! Useful for tests and for embedding a tracker next to its clients.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use super::{CloseCode, Listener, Protocol, Session, Stream};
use crate::common::NetMessage;
use crate::{Error, Result};

/// Create a listener and the connector feeding it.
pub fn listener() -> (MemoryListener, MemoryConnector) {
    let (sender, receiver) = flume::unbounded();

    (
        MemoryListener { incoming: receiver },
        MemoryConnector { sender },
    )
}

#[derive(Debug)]
pub struct MemoryListener {
    incoming: flume::Receiver<MemorySession>,
}

#[derive(Debug, Clone)]
/// Opens sessions towards a [MemoryListener].
pub struct MemoryConnector {
    sender: flume::Sender<MemorySession>,
}

impl MemoryConnector {
    /// Establish a session as if it came from `remote_addr`.
    ///
    /// `certificate` plays the role of the client certificate of a TLS handshake.
    pub fn connect(
        &self,
        protocol: Option<Protocol>,
        remote_addr: SocketAddr,
        certificate: Option<Vec<u8>>,
    ) -> Result<MemoryClient> {
        let (streams_sender, streams_receiver) = flume::unbounded();
        let closed = Arc::new(Closed::default());

        let session = MemorySession {
            protocol,
            remote_addr,
            certificate,
            streams: streams_receiver,
            closed: closed.clone(),
        };

        self.sender
            .send(session)
            .map_err(|_| Error::SessionClosed)?;

        Ok(MemoryClient {
            streams: streams_sender,
            closed,
        })
    }
}

#[derive(Debug, Default)]
struct Closed {
    token: CancellationToken,
    code: Mutex<Option<CloseCode>>,
}

impl Closed {
    fn close(&self, code: CloseCode) {
        let mut current = self.code.lock().unwrap_or_else(PoisonError::into_inner);
        if current.is_none() {
            *current = Some(code);
        }
        self.token.cancel();
    }

    fn code(&self) -> Option<CloseCode> {
        *self.code.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
/// Tracker side of an in-process session.
pub struct MemorySession {
    protocol: Option<Protocol>,
    remote_addr: SocketAddr,
    certificate: Option<Vec<u8>>,
    streams: flume::Receiver<MemoryStream>,
    closed: Arc<Closed>,
}

#[derive(Debug)]
/// Client side of an in-process session.
pub struct MemoryClient {
    streams: flume::Sender<MemoryStream>,
    closed: Arc<Closed>,
}

impl MemoryClient {
    /// Open a new stream, visible to the tracker's next `accept_stream`.
    pub fn open_stream(&self) -> Result<MemoryStream> {
        if self.closed.token.is_cancelled() {
            return Err(Error::SessionClosed);
        }

        let (local, remote) = MemoryStream::pair();
        self.streams
            .send(remote)
            .map_err(|_| Error::SessionClosed)?;

        Ok(local)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.token.is_cancelled()
    }

    /// Wait until the tracker closes this session, returning the reason code.
    pub async fn closed(&self) -> Option<CloseCode> {
        self.closed.token.cancelled().await;
        self.closed.code()
    }
}

impl Drop for MemoryClient {
    fn drop(&mut self) {
        self.closed.close(CloseCode::NoReason);
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Session>> {
        let session = self
            .incoming
            .recv_async()
            .await
            .map_err(|_| Error::SessionClosed)?;

        Ok(Box::new(session))
    }
}

#[async_trait]
impl Session for MemorySession {
    fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    async fn accept_stream(&self) -> Result<Box<dyn Stream>> {
        tokio::select! {
            _ = self.closed.token.cancelled() => Err(Error::SessionClosed),
            stream = self.streams.recv_async() => {
                let stream = stream.map_err(|_| Error::SessionClosed)?;
                Ok(Box::new(stream) as Box<dyn Stream>)
            }
        }
    }

    fn verify_client_certificate(&self, cert_der: &[u8], _signature: Option<&[u8]>) -> Result<()> {
        match &self.certificate {
            Some(certificate) if certificate.as_slice() == cert_der => Ok(()),
            _ => Err(Error::CertificateMismatch),
        }
    }

    fn close(&self, code: CloseCode) {
        trace!(remote_addr = ?self.remote_addr, ?code, "Closing in-memory session");
        self.closed.close(code);
    }
}

#[derive(Debug)]
/// One end of an in-process stream.
pub struct MemoryStream {
    sender: flume::Sender<Vec<u8>>,
    receiver: flume::Receiver<Vec<u8>>,
}

impl MemoryStream {
    fn pair() -> (MemoryStream, MemoryStream) {
        let (a_sender, a_receiver) = flume::unbounded();
        let (b_sender, b_receiver) = flume::unbounded();

        (
            MemoryStream {
                sender: a_sender,
                receiver: b_receiver,
            },
            MemoryStream {
                sender: b_sender,
                receiver: a_receiver,
            },
        )
    }

    /// Send a frame that is not necessarily a valid message.
    pub fn send_raw(&self, bytes: Vec<u8>) -> Result<()> {
        self.sender.send(bytes).map_err(|_| Error::StreamClosed)
    }
}

#[async_trait]
impl Stream for MemoryStream {
    async fn recv(&mut self) -> Result<NetMessage> {
        let bytes = self
            .receiver
            .recv_async()
            .await
            .map_err(|_| Error::StreamClosed)?;

        NetMessage::from_bytes(&bytes)
    }

    async fn send(&mut self, message: &NetMessage) -> Result<()> {
        self.send_raw(message.to_bytes()?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn address() -> SocketAddr {
        "192.0.2.7:4000".parse().unwrap()
    }

    #[tokio::test]
    async fn messages_cross_the_session() {
        let (listener, connector) = listener();

        let client = connector
            .connect(Some(Protocol::User), address(), None)
            .unwrap();
        let session = listener.accept().await.unwrap();

        assert_eq!(session.protocol(), Some(Protocol::User));
        assert_eq!(session.remote_addr(), address());

        let mut local = client.open_stream().unwrap();
        let mut remote = session.accept_stream().await.unwrap();

        local.send(&NetMessage::GetAddrReq).await.unwrap();
        assert_eq!(remote.recv().await.unwrap(), NetMessage::GetAddrReq);
    }

    #[tokio::test]
    async fn close_is_observed_by_both_ends() {
        let (listener, connector) = listener();

        let client = connector
            .connect(Some(Protocol::Tracker), address(), None)
            .unwrap();
        let session = listener.accept().await.unwrap();

        session.close(CloseCode::VerificationFailed);

        assert_eq!(client.closed().await, Some(CloseCode::VerificationFailed));
        assert!(client.open_stream().is_err());
        assert!(session.accept_stream().await.is_err());
    }

    #[tokio::test]
    async fn dropped_client_ends_accept_stream() {
        let (listener, connector) = listener();

        let client = connector.connect(None, address(), None).unwrap();
        let session = listener.accept().await.unwrap();
        drop(client);

        assert!(matches!(
            session.accept_stream().await,
            Err(Error::SessionClosed)
        ));
    }

    #[tokio::test]
    async fn certificate_must_match_session() {
        let (listener, connector) = listener();

        let _client = connector
            .connect(Some(Protocol::Tracker), address(), Some(vec![1, 2, 3]))
            .unwrap();
        let session = listener.accept().await.unwrap();

        assert!(session.verify_client_certificate(&[1, 2, 3], None).is_ok());
        assert!(session.verify_client_certificate(&[1, 2, 4], None).is_err());
    }
}
