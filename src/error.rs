//! Main Crate Error

#[derive(thiserror::Error, Debug)]
/// Tracker crate error enum.
pub enum Error {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to parse message bytes: {0}")]
    BencodeError(#[from] serde_bencode::Error),

    /// A well formed frame carrying something that is not a valid [crate::NetMessage].
    #[error("Invalid message: {0}")]
    InvalidMessage(&'static str),

    /// Frame length prefix above [crate::transport::MAX_FRAME_SIZE].
    #[error("Frame of {0} bytes exceeds the size limit")]
    FrameTooLarge(usize),

    /// Indicates that the id is not [crate::ID_SIZE] bytes long.
    #[error("Invalid Id size, expected 20, got {0}")]
    InvalidIdSize(usize),

    #[error("Invalid Id encoding: {0}")]
    InvalidIdEncoding(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Invalid config file: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error(transparent)]
    NoInitialCipherSuite(#[from] quinn::crypto::rustls::NoInitialCipherSuite),

    #[error("Certificate error: {0}")]
    Certificate(String),

    /// The certificate presented in-band is not the one the peer authenticated the transport with.
    #[error("Certificate does not match the authenticated transport identity")]
    CertificateMismatch,

    #[error(transparent)]
    Connect(#[from] quinn::ConnectError),

    #[error(transparent)]
    Connection(#[from] quinn::ConnectionError),

    #[error("Could not resolve address: {0}")]
    InvalidAddress(String),

    #[error("Session closed")]
    SessionClosed,

    #[error("Stream closed")]
    StreamClosed,

    #[error("Timed out")]
    Timeout,

    /// Another instance holds the pid file.
    #[error("Another tracker is already running with pid {0}")]
    AlreadyRunning(u32),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Timeout
    }
}

/// Alias for `Result<T, Error>`.
pub type Result<T, E = Error> = std::result::Result<T, E>;
