//! Ingress listeners: locally bound TCP endpoints whose accepted
//! connections are tunneled through the relay.
//!
//! Ingress protocols form a small closed set sharing one capability:
//! obtain the session destination, then hand the raw connection to the
//! stream bridge. New protocols are new [`IngressKind`] variants.

pub mod socks5;

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;
use crate::relay::ProtocolTag;

/// The closed set of ingress protocol variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressKind {
    /// SOCKS5 CONNECT proxy; the destination is client-supplied.
    Socks5,
    /// Raw TCP passthrough to the egress node's SSH service; the
    /// destination is fixed, no protocol inspection.
    Ssh,
}

impl IngressKind {
    /// The relay protocol tag for sessions entering through this ingress.
    pub fn protocol_tag(self) -> ProtocolTag {
        match self {
            IngressKind::Socks5 => ProtocolTag::Socks5,
            IngressKind::Ssh => ProtocolTag::Ssh,
        }
    }

    /// Short label for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            IngressKind::Socks5 => "socks5",
            IngressKind::Ssh => "ssh",
        }
    }

    /// Obtain the session destination from a freshly accepted connection.
    ///
    /// SOCKS5 parses just enough of the handshake; SSH needs no parsing,
    /// the destination is the configured forward address.
    pub async fn resolve_destination<S>(self, stream: &mut S, ssh_forward: &str) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        match self {
            IngressKind::Socks5 => socks5::negotiate(stream).await,
            IngressKind::Ssh => Ok(ssh_forward.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_ssh_destination_is_fixed() {
        let (mut a, _b) = tokio::io::duplex(64);
        let dest = IngressKind::Ssh
            .resolve_destination(&mut a, "127.0.0.1:22")
            .await
            .unwrap();
        assert_eq!(dest, "127.0.0.1:22");
    }

    #[test]
    fn test_tags_match_kinds() {
        assert_eq!(IngressKind::Socks5.protocol_tag(), ProtocolTag::Socks5);
        assert_eq!(IngressKind::Ssh.protocol_tag(), ProtocolTag::Ssh);
    }
}
