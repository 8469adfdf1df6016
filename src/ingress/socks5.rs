//! Minimal SOCKS5 (RFC 1928) ingress: no-auth negotiation, CONNECT only,
//! ATYP IPv4 / domain / IPv6.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

pub(crate) const VERSION: u8 = 0x05;
const CMD_CONNECT: u8 = 0x01;

/// Standard SOCKS5 reply codes used by the tunnel.
pub mod reply {
    /// Request granted.
    pub const SUCCEEDED: u8 = 0x00;
    /// Host unreachable; also sent when the selected egress peer is
    /// unreachable.
    pub const HOST_UNREACHABLE: u8 = 0x04;
    /// Connection refused by the destination.
    pub const CONNECTION_REFUSED: u8 = 0x05;
    /// Command not supported (anything but CONNECT).
    pub const COMMAND_NOT_SUPPORTED: u8 = 0x07;
    /// Address type not supported.
    pub const ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;
}

/// Perform the greeting and parse the CONNECT request, returning the
/// requested `host:port` destination.
///
/// Protocol violations get the standard error reply where the protocol
/// defines one, then fail with [`Error::Protocol`]; the caller closes the
/// connection. No reply is sent for the successful case here: that happens
/// once the far side of the bridge is established.
pub async fn negotiate<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // Greeting: VER, NMETHODS, METHODS...
    let mut head = [0u8; 2];
    stream.read_exact(&mut head).await?;
    if head[0] != VERSION {
        return Err(Error::protocol(format!(
            "unsupported socks version {}",
            head[0]
        )));
    }
    let mut methods = vec![0u8; head[1] as usize];
    stream.read_exact(&mut methods).await?;

    // Method selection: no-auth only.
    stream.write_all(&[VERSION, 0x00]).await?;

    // Request: VER, CMD, RSV, ATYP, DST.ADDR, DST.PORT
    let mut request = [0u8; 4];
    stream.read_exact(&mut request).await?;
    if request[0] != VERSION {
        return Err(Error::protocol(format!(
            "bad request version {}",
            request[0]
        )));
    }
    if request[1] != CMD_CONNECT {
        send_reply(stream, reply::COMMAND_NOT_SUPPORTED).await?;
        return Err(Error::protocol(format!(
            "unsupported socks command {:#04x}",
            request[1]
        )));
    }

    let destination = match request[3] {
        0x01 => {
            let mut ip = [0u8; 4];
            stream.read_exact(&mut ip).await?;
            let port = read_port(stream).await?;
            format!("{}.{}.{}.{}:{}", ip[0], ip[1], ip[2], ip[3], port)
        }
        0x03 => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            let mut name = vec![0u8; len[0] as usize];
            stream.read_exact(&mut name).await?;
            let name = String::from_utf8(name)
                .map_err(|_| Error::protocol("domain name is not UTF-8"))?;
            let port = read_port(stream).await?;
            format!("{name}:{port}")
        }
        0x04 => {
            let mut ip = [0u8; 16];
            stream.read_exact(&mut ip).await?;
            let port = read_port(stream).await?;
            format!("[{}]:{}", std::net::Ipv6Addr::from(ip), port)
        }
        other => {
            send_reply(stream, reply::ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(Error::protocol(format!("unsupported address type {other:#04x}")));
        }
    };

    Ok(destination)
}

/// Send a reply with a zeroed IPv4 bind address.
pub async fn send_reply<S>(stream: &mut S, code: u8) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[VERSION, code, 0x00, 0x01, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

async fn read_port<S: AsyncRead + Unpin>(stream: &mut S) -> Result<u16> {
    let mut port = [0u8; 2];
    stream.read_exact(&mut port).await?;
    Ok(u16::from_be_bytes(port))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    async fn drive(client_bytes: &[u8]) -> (Result<String>, Vec<u8>) {
        let (mut client, mut server) = duplex(1024);
        client.write_all(client_bytes).await.unwrap();
        let result = negotiate(&mut server).await;
        drop(server);
        let mut replies = Vec::new();
        client.read_to_end(&mut replies).await.unwrap();
        (result, replies)
    }

    #[tokio::test]
    async fn test_connect_domain() {
        let domain = b"example.org";
        let mut bytes = vec![0x05, 0x01, 0x00]; // greeting, one method: no-auth
        bytes.extend_from_slice(&[0x05, 0x01, 0x00, 0x03]); // CONNECT, domain
        bytes.push(domain.len() as u8);
        bytes.extend_from_slice(domain);
        bytes.extend_from_slice(&80u16.to_be_bytes());
        let (result, replies) = drive(&bytes).await;
        assert_eq!(result.unwrap(), "example.org:80");
        assert_eq!(&replies[..2], &[0x05, 0x00]);
    }

    #[tokio::test]
    async fn test_connect_ipv4() {
        let mut bytes = vec![0x05, 0x01, 0x00];
        bytes.extend_from_slice(&[0x05, 0x01, 0x00, 0x01, 127, 0, 0, 1]);
        bytes.extend_from_slice(&8080u16.to_be_bytes());
        let (result, _) = drive(&bytes).await;
        assert_eq!(result.unwrap(), "127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_bad_version_rejected() {
        let (result, replies) = drive(&[0x04, 0x01, 0x00]).await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_bind_command_gets_command_not_supported() {
        let mut bytes = vec![0x05, 0x01, 0x00];
        bytes.extend_from_slice(&[0x05, 0x02, 0x00, 0x01, 127, 0, 0, 1]);
        bytes.extend_from_slice(&80u16.to_be_bytes());
        let (result, replies) = drive(&bytes).await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
        assert_eq!(&replies[..2], &[0x05, 0x00]);
        assert_eq!(replies[2], 0x05);
        assert_eq!(replies[3], reply::COMMAND_NOT_SUPPORTED);
    }

    #[tokio::test]
    async fn test_unknown_atyp_gets_address_type_reply() {
        let mut bytes = vec![0x05, 0x01, 0x00];
        bytes.extend_from_slice(&[0x05, 0x01, 0x00, 0x09]);
        let (result, replies) = drive(&bytes).await;
        assert!(matches!(result.unwrap_err(), Error::Protocol(_)));
        assert_eq!(replies[3], reply::ADDRESS_TYPE_NOT_SUPPORTED);
    }
}
