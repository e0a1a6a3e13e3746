//! Secure multiplexed sessions carrying one [NetMessage] per frame.
//!
//! The tracker only talks to the transport through the [Listener], [Session] and [Stream]
//! traits. Deadlines are applied by the caller with [tokio::time::timeout].

mod frame;
pub mod memory;
pub mod quic;

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::common::NetMessage;
use crate::Result;

pub use frame::{read_message, write_message, MAX_FRAME_SIZE};

/// ALPN identifier negotiated by end-user clients.
pub const USER_ALPN: &[u8] = b"pie-user";
/// ALPN identifier negotiated by peer trackers.
pub const TRACKER_ALPN: &[u8] = b"pie-tracker";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Application protocol negotiated while establishing a session.
pub enum Protocol {
    User,
    Tracker,
}

impl Protocol {
    pub fn from_alpn(alpn: &[u8]) -> Option<Protocol> {
        match alpn {
            USER_ALPN => Some(Protocol::User),
            TRACKER_ALPN => Some(Protocol::Tracker),
            _ => None,
        }
    }

    pub fn alpn(&self) -> &'static [u8] {
        match self {
            Protocol::User => USER_ALPN,
            Protocol::Tracker => TRACKER_ALPN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Reason code sent to the far end when a session is closed.
pub enum CloseCode {
    NoReason,
    UnknownProtocol,
    VerificationFailed,
    Shutdown,
}

impl CloseCode {
    pub fn code(&self) -> u32 {
        match self {
            CloseCode::NoReason => 0,
            CloseCode::UnknownProtocol => 1,
            CloseCode::VerificationFailed => 2,
            CloseCode::Shutdown => 3,
        }
    }

    pub fn from_code(code: u64) -> Option<CloseCode> {
        match code {
            0 => Some(CloseCode::NoReason),
            1 => Some(CloseCode::UnknownProtocol),
            2 => Some(CloseCode::VerificationFailed),
            3 => Some(CloseCode::Shutdown),
            _ => None,
        }
    }

    pub(crate) fn reason(&self) -> &'static [u8] {
        match self {
            CloseCode::NoReason => b"",
            CloseCode::UnknownProtocol => b"unknown protocol",
            CloseCode::VerificationFailed => b"verification failed",
            CloseCode::Shutdown => b"shutdown",
        }
    }
}

/// Source of accepted sessions.
#[async_trait]
pub trait Listener: Send + Sync {
    /// Wait for the next established session.
    ///
    /// Returns an error once the listener is closed.
    async fn accept(&self) -> Result<Box<dyn Session>>;
}

/// An established session, owning any number of concurrently open streams.
#[async_trait]
pub trait Session: Send + Sync {
    /// Protocol negotiated during establishment, `None` if the peer offered none we know.
    fn protocol(&self) -> Option<Protocol>;

    /// Address the session's packets are observed coming from.
    fn remote_addr(&self) -> SocketAddr;

    /// Wait for the peer to open the next stream.
    async fn accept_stream(&self) -> Result<Box<dyn Stream>>;

    /// Check a certificate presented in-band by the peer.
    ///
    /// Succeeds only if `cert_der` is the certificate the peer authenticated the session with.
    fn verify_client_certificate(&self, cert_der: &[u8], signature: Option<&[u8]>) -> Result<()>;

    fn close(&self, code: CloseCode);
}

/// A bidirectional stream within a [Session].
#[async_trait]
pub trait Stream: Send {
    /// Receive the next message.
    ///
    /// Returns [crate::Error::BencodeError] or [crate::Error::InvalidMessage] for frames that
    /// arrived intact but do not hold a known message, any other error means the stream is gone.
    async fn recv(&mut self) -> Result<NetMessage>;

    async fn send(&mut self, message: &NetMessage) -> Result<()>;
}
