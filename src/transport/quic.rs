//! QUIC sessions over quinn, authenticated with self-signed TLS 1.3 certificates.
//!
//! A peer's identity is the hash of its certificate, so no chain of trust is checked.
//! Handshake signatures are still verified, proving possession of the certificate's key.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use quinn::crypto::rustls::{HandshakeData, QuicClientConfig, QuicServerConfig};
use quinn::{Connection, ConnectionError, Endpoint, RecvStream, SendStream, VarInt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, CryptoProvider};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme};
use rustls_pki_types::{CertificateDer, ServerName, UnixTime};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{read_message, write_message, CloseCode, Listener, Protocol, Session, Stream};
use super::{TRACKER_ALPN, USER_ALPN};
use crate::common::{ClientCertRequest, FindTrackerRequest, FindTrackerResponse, Id, NetMessage};
use crate::identity::{Certificate, SERVER_NAME};
use crate::routing::{Dialer, FindTrackerReply};
use crate::{Error, Result};

#[derive(Debug)]
/// Accepts QUIC sessions on a UDP socket.
pub struct QuicListener {
    endpoint: Endpoint,
    incoming: flume::Receiver<QuicSession>,
    accept_task: JoinHandle<()>,
    crypto: Crypto,
}

impl QuicListener {
    /// Bind a listening endpoint offering both the user and tracker protocols.
    pub fn bind(address: SocketAddr, certificate: &Certificate) -> Result<QuicListener> {
        let crypto = Crypto::new(certificate);
        let endpoint = Endpoint::server(crypto.server_config()?, address)?;

        let (sender, incoming) = flume::unbounded();
        let accept_task = tokio::spawn(accept_loop(endpoint.clone(), sender));

        debug!(local_addr = ?endpoint.local_addr(), "Listening");

        Ok(QuicListener {
            endpoint,
            incoming,
            accept_task,
            crypto,
        })
    }

    /// Bind `port` on every interface, dual-stack where the host has IPv6, IPv4 only otherwise.
    pub fn bind_any(port: u16, certificate: &Certificate) -> Result<QuicListener> {
        match Self::bind(SocketAddr::from((Ipv6Addr::UNSPECIFIED, port)), certificate) {
            Ok(listener) => Ok(listener),
            Err(error) => {
                warn!(?error, port, "IPv6 unavailable, listening on IPv4 only");
                Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), certificate)
            }
        }
    }

    /// A dialer sending from this listener's socket, so peers observe our listening address.
    pub fn dialer(&self) -> QuicDialer {
        QuicDialer {
            endpoint: self.endpoint.clone(),
            crypto: self.crypto.clone(),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Close every session with [CloseCode::Shutdown] and wait for the peers to be notified.
    pub async fn close(&self) {
        let code = CloseCode::Shutdown;
        self.endpoint
            .close(VarInt::from_u32(code.code()), code.reason());
        self.accept_task.abort();
        self.endpoint.wait_idle().await;
    }
}

async fn accept_loop(endpoint: Endpoint, sender: flume::Sender<QuicSession>) {
    while let Some(incoming) = endpoint.accept().await {
        let sender = sender.clone();

        // Handshakes complete independently so a slow peer does not hold up the others.
        tokio::spawn(async move {
            let remote_addr = incoming.remote_address();

            match incoming.await {
                Ok(connection) => {
                    let _ = sender.send_async(QuicSession::new(connection)).await;
                }
                Err(error) => debug!(?remote_addr, ?error, "Handshake failed"),
            }
        });
    }

    trace!("Endpoint closed, accept loop done");
}

#[async_trait]
impl Listener for QuicListener {
    async fn accept(&self) -> Result<Box<dyn Session>> {
        let session = self
            .incoming
            .recv_async()
            .await
            .map_err(|_| Error::SessionClosed)?;

        Ok(Box::new(session))
    }
}

#[derive(Debug)]
/// Accepting side of a QUIC connection.
pub struct QuicSession {
    connection: Connection,
    protocol: Option<Protocol>,
}

impl QuicSession {
    fn new(connection: Connection) -> QuicSession {
        let protocol = connection
            .handshake_data()
            .and_then(|data| data.downcast::<HandshakeData>().ok())
            .and_then(|data| data.protocol)
            .and_then(|alpn| Protocol::from_alpn(&alpn));

        QuicSession {
            connection,
            protocol,
        }
    }
}

#[async_trait]
impl Session for QuicSession {
    fn protocol(&self) -> Option<Protocol> {
        self.protocol
    }

    /// IPv4 peers of a dual-stack socket are reported with their plain IPv4 address.
    fn remote_addr(&self) -> SocketAddr {
        let remote = self.connection.remote_address();

        SocketAddr::new(remote.ip().to_canonical(), remote.port())
    }

    async fn accept_stream(&self) -> Result<Box<dyn Stream>> {
        let (send, recv) = self.connection.accept_bi().await?;

        Ok(Box::new(QuicStream { send, recv }))
    }

    fn verify_client_certificate(&self, cert_der: &[u8], _signature: Option<&[u8]>) -> Result<()> {
        match peer_certificate(&self.connection) {
            Some(certificate) if certificate.as_ref() == cert_der => Ok(()),
            _ => Err(Error::CertificateMismatch),
        }
    }

    fn close(&self, code: CloseCode) {
        self.connection
            .close(VarInt::from_u32(code.code()), code.reason());
    }
}

fn peer_certificate(connection: &Connection) -> Option<CertificateDer<'static>> {
    connection
        .peer_identity()
        .and_then(|identity| identity.downcast::<Vec<CertificateDer<'static>>>().ok())
        .and_then(|chain| chain.into_iter().next())
}

#[derive(Debug)]
/// A bidirectional QUIC stream carrying length-prefixed messages.
pub struct QuicStream {
    send: SendStream,
    recv: RecvStream,
}

#[async_trait]
impl Stream for QuicStream {
    async fn recv(&mut self) -> Result<NetMessage> {
        read_message(&mut self.recv).await
    }

    async fn send(&mut self, message: &NetMessage) -> Result<()> {
        write_message(&mut self.send, message).await
    }
}

#[derive(Debug, Clone)]
/// Opens outbound QUIC sessions.
pub struct QuicDialer {
    endpoint: Endpoint,
    crypto: Crypto,
}

impl QuicDialer {
    /// A dialer on its own ephemeral client socket.
    pub fn new(certificate: &Certificate) -> Result<QuicDialer> {
        let endpoint = Endpoint::client(SocketAddr::from(([0, 0, 0, 0], 0)))?;

        Ok(QuicDialer {
            endpoint,
            crypto: Crypto::new(certificate),
        })
    }

    /// Connect to `address` (`host:port`), negotiating `protocol`.
    pub async fn connect(&self, address: &str, protocol: Protocol) -> Result<QuicClient> {
        let remote = self.resolve(address).await?;

        let connection = self
            .endpoint
            .connect_with(self.crypto.client_config(protocol)?, remote, SERVER_NAME)?
            .await?;

        Ok(QuicClient {
            connection,
            cert_der: self.crypto.certificate.der().to_vec(),
        })
    }

    async fn resolve(&self, address: &str) -> Result<SocketAddr> {
        let local_is_ipv4 = self.endpoint.local_addr()?.is_ipv4();
        let candidates: Vec<SocketAddr> = tokio::net::lookup_host(address)
            .await
            .map_err(|_| Error::InvalidAddress(address.to_string()))?
            .collect();

        candidates
            .iter()
            .find(|candidate| candidate.is_ipv4() == local_is_ipv4)
            .or(candidates.first())
            .copied()
            .ok_or_else(|| Error::InvalidAddress(address.to_string()))
    }
}

#[async_trait]
impl Dialer for QuicDialer {
    async fn find_tracker(&self, address: &str, target: &Id) -> Result<FindTrackerReply> {
        let client = self.connect(address, Protocol::Tracker).await?;
        let responder = client.peer_id().ok_or(Error::CertificateMismatch)?;

        client.present_certificate().await?;
        let response = client
            .request(&NetMessage::FindTrackerReq(FindTrackerRequest {
                id: target.to_vec(),
            }))
            .await;
        client.close(CloseCode::NoReason);

        match response? {
            NetMessage::FindTrackerRes(FindTrackerResponse { candidates, .. }) => {
                Ok(FindTrackerReply {
                    responder,
                    candidates,
                })
            }
            _ => Err(Error::InvalidMessage("expected find_tracker_res")),
        }
    }
}

#[derive(Debug)]
/// Initiating side of a QUIC connection.
pub struct QuicClient {
    connection: Connection,
    cert_der: Vec<u8>,
}

impl QuicClient {
    /// Identity of the remote end, derived from its TLS certificate.
    pub fn peer_id(&self) -> Option<Id> {
        peer_certificate(&self.connection).map(|certificate| Id::from_certificate(&certificate))
    }

    pub async fn open_stream(&self) -> Result<QuicStream> {
        let (send, recv) = self.connection.open_bi().await?;

        Ok(QuicStream { send, recv })
    }

    /// Answer the tracker challenge by sending our certificate on a fresh stream.
    pub async fn present_certificate(&self) -> Result<()> {
        let mut stream = self.open_stream().await?;
        stream
            .send(&NetMessage::ClientCertReq(ClientCertRequest {
                cert_der: self.cert_der.clone(),
                server_cert_sign: None,
            }))
            .await?;
        if let Err(error) = stream.send.finish() {
            debug!(?error, "Failed to finish certificate stream");
        }

        Ok(())
    }

    /// Send one request on a new stream and wait for its response.
    pub async fn request(&self, message: &NetMessage) -> Result<NetMessage> {
        let mut stream = self.open_stream().await?;
        stream.send(message).await?;

        stream.recv().await
    }

    pub fn close(&self, code: CloseCode) {
        self.connection
            .close(VarInt::from_u32(code.code()), code.reason());
    }

    /// Wait for the connection to end, returning the code the remote end closed it with.
    pub async fn closed(&self) -> Option<CloseCode> {
        match self.connection.closed().await {
            ConnectionError::ApplicationClosed(close) => {
                CloseCode::from_code(close.error_code.into_inner())
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Crypto {
    certificate: Certificate,
    provider: Arc<CryptoProvider>,
    verifier: Arc<SelfSignedVerifier>,
}

impl Crypto {
    fn new(certificate: &Certificate) -> Crypto {
        let provider = Arc::new(rustls::crypto::ring::default_provider());

        Crypto {
            certificate: certificate.clone(),
            verifier: Arc::new(SelfSignedVerifier {
                provider: provider.clone(),
            }),
            provider,
        }
    }

    fn server_config(&self) -> Result<quinn::ServerConfig> {
        let mut crypto = rustls::ServerConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .with_client_cert_verifier(self.verifier.clone())
            .with_single_cert(self.certificate.chain(), self.certificate.key())?;
        crypto.alpn_protocols = vec![USER_ALPN.to_vec(), TRACKER_ALPN.to_vec()];

        Ok(quinn::ServerConfig::with_crypto(Arc::new(
            QuicServerConfig::try_from(crypto)?,
        )))
    }

    fn client_config(&self, protocol: Protocol) -> Result<quinn::ClientConfig> {
        let mut crypto = rustls::ClientConfig::builder_with_provider(self.provider.clone())
            .with_protocol_versions(&[&rustls::version::TLS13])?
            .dangerous()
            .with_custom_certificate_verifier(self.verifier.clone())
            .with_client_auth_cert(self.certificate.chain(), self.certificate.key())?;
        crypto.alpn_protocols = vec![protocol.alpn().to_vec()];

        Ok(quinn::ClientConfig::new(Arc::new(
            QuicClientConfig::try_from(crypto)?,
        )))
    }
}

#[derive(Debug)]
/// Accepts any certificate, but checks every handshake signature against it.
struct SelfSignedVerifier {
    provider: Arc<CryptoProvider>,
}

impl SelfSignedVerifier {
    fn check(&self, end_entity: &CertificateDer<'_>) -> std::result::Result<(), rustls::Error> {
        if end_entity.as_ref().is_empty() {
            return Err(rustls::Error::InvalidCertificate(
                rustls::CertificateError::BadEncoding,
            ));
        }

        Ok(())
    }
}

impl ServerCertVerifier for SelfSignedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        self.check(end_entity)?;
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}

impl ClientCertVerifier for SelfSignedVerifier {
    fn offer_client_auth(&self) -> bool {
        true
    }

    // User clients connect without a certificate.
    fn client_auth_mandatory(&self) -> bool {
        false
    }

    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> std::result::Result<ClientCertVerified, rustls::Error> {
        self.check(end_entity)?;
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.provider.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider
            .signature_verification_algorithms
            .supported_schemes()
    }
}
