//! Relay stream header codec.
//!
//! Every relay stream starts with one fixed-format header telling the
//! egress node where to forward:
//!
//! ```text
//! [protocol tag: 1 byte][destination length: 2 bytes BE][destination: UTF-8]
//! ```
//!
//! After the header the stream is an opaque byte pipe.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Which ingress protocol a relay stream carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProtocolTag {
    /// Traffic from the SOCKS5 ingress; destination is client-supplied.
    Socks5 = 0x01,
    /// Traffic from the SSH passthrough ingress; destination is the egress
    /// node's own SSH service.
    Ssh = 0x02,
}

impl ProtocolTag {
    /// Decode a wire tag byte.
    pub fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0x01 => Ok(Self::Socks5),
            0x02 => Ok(Self::Ssh),
            other => Err(Error::protocol(format!("unknown relay protocol tag {other:#04x}"))),
        }
    }

    /// The wire tag byte.
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// The per-stream relay header: protocol tag plus `host:port` destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayHeader {
    /// Protocol tag of the originating ingress.
    pub tag: ProtocolTag,
    /// Destination the egress node should dial.
    pub destination: String,
}

impl RelayHeader {
    /// Build a header, validating the destination.
    pub fn new(tag: ProtocolTag, destination: impl Into<String>) -> Result<Self> {
        let destination = destination.into();
        if destination.is_empty() {
            return Err(Error::protocol("empty relay destination"));
        }
        if destination.len() > u16::MAX as usize {
            return Err(Error::protocol("relay destination too long"));
        }
        Ok(Self { tag, destination })
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let dest = self.destination.as_bytes();
        let mut buf = Vec::with_capacity(3 + dest.len());
        buf.push(self.tag.as_byte());
        buf.extend_from_slice(&(dest.len() as u16).to_be_bytes());
        buf.extend_from_slice(dest);
        buf
    }

    /// Write the header as a single frame.
    pub async fn write_to<W: AsyncWrite + Unpin>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.encode()).await?;
        Ok(())
    }

    /// Read and validate a header from the start of a relay stream.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Self> {
        let mut fixed = [0u8; 3];
        reader.read_exact(&mut fixed).await?;
        let tag = ProtocolTag::from_byte(fixed[0])?;
        let len = u16::from_be_bytes([fixed[1], fixed[2]]) as usize;
        if len == 0 {
            return Err(Error::protocol("empty relay destination"));
        }
        let mut dest = vec![0u8; len];
        reader.read_exact(&mut dest).await?;
        let destination = String::from_utf8(dest)
            .map_err(|_| Error::protocol("relay destination is not UTF-8"))?;
        Ok(Self { tag, destination })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_header_round_trip() {
        let header = RelayHeader::new(ProtocolTag::Socks5, "example.org:80").unwrap();
        let encoded = header.encode();
        let decoded = RelayHeader::read_from(&mut &encoded[..]).await.unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_header_wire_layout() {
        let header = RelayHeader::new(ProtocolTag::Socks5, "example.org:80").unwrap();
        let encoded = header.encode();
        assert_eq!(encoded[0], 0x01);
        assert_eq!(&encoded[1..3], &(14u16).to_be_bytes());
        assert_eq!(&encoded[3..], b"example.org:80");
    }

    #[test]
    fn test_ssh_tag_byte() {
        let header = RelayHeader::new(ProtocolTag::Ssh, "127.0.0.1:22").unwrap();
        assert_eq!(header.encode()[0], 0x02);
    }

    #[tokio::test]
    async fn test_unknown_tag_rejected() {
        let bytes = [0x7fu8, 0x00, 0x01, b'x'];
        let err = RelayHeader::read_from(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_empty_destination_rejected() {
        assert!(RelayHeader::new(ProtocolTag::Socks5, "").is_err());
        let bytes = [0x01u8, 0x00, 0x00];
        let err = RelayHeader::read_from(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_non_utf8_destination_rejected() {
        let bytes = [0x01u8, 0x00, 0x02, 0xff, 0xfe];
        let err = RelayHeader::read_from(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_truncated_header_is_io_error() {
        let bytes = [0x01u8, 0x00, 0x05, b'a'];
        let err = RelayHeader::read_from(&mut &bytes[..]).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
