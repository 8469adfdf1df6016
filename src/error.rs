//! Error types for peergate.

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed identity key material. Fatal at startup.
    #[error("identity error: {0}")]
    Identity(String),

    /// Endpoint bind failure. Fatal at startup.
    #[error("bind error: {0}")]
    Bind(#[from] iroh::endpoint::BindError),

    /// Dialing a peer failed. Recovered by retry in discovery.
    #[error("dial error: {0}")]
    Dial(#[from] iroh::endpoint::ConnectError),

    /// The selected egress peer could not be reached for a session.
    #[error("peer unreachable: {0}")]
    UnreachablePeer(String),

    /// Malformed SOCKS5 handshake or relay header. Session-local.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// A peer identifier string could not be parsed.
    #[error("unknown peer id format: {0}")]
    UnknownPeerFormat(String),

    /// Iroh connection error.
    #[error("connection error: {0}")]
    Connection(#[from] iroh::endpoint::ConnectionError),

    /// QUIC write error.
    #[error("stream write error: {0}")]
    StreamWrite(#[from] iroh::endpoint::WriteError),

    /// QUIC read error.
    #[error("stream read error: {0}")]
    StreamRead(#[from] iroh::endpoint::ReadError),

    /// Gossip API error.
    #[error("gossip error: {0}")]
    Gossip(#[from] iroh_gossip::api::ApiError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an identity error.
    pub fn identity<S: Into<String>>(msg: S) -> Self {
        Self::Identity(msg.into())
    }

    /// Create a protocol error.
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create an unreachable-peer error.
    pub fn unreachable_peer<S: Into<String>>(msg: S) -> Self {
        Self::UnreachablePeer(msg.into())
    }

    /// Create an unknown-peer-format error.
    pub fn unknown_peer_format<S: Into<String>>(msg: S) -> Self {
        Self::UnknownPeerFormat(msg.into())
    }
}
