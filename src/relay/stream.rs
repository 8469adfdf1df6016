//! AsyncRead/AsyncWrite wrapper for relay streams over iroh QUIC.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use iroh::NodeId;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

// Helper function to convert any error to IO error
fn error_to_io<E: std::error::Error + Send + Sync + 'static>(
    e: E,
    kind: std::io::ErrorKind,
) -> std::io::Error {
    std::io::Error::new(kind, e)
}

/// Peer information attached to a relay stream.
#[derive(Debug, Clone)]
pub struct RelayPeerInfo {
    /// The remote peer's node ID.
    pub node_id: NodeId,
    /// When the stream was established.
    pub established_at: Instant,
}

/// One relay stream: a QUIC send/recv pair unified into a single
/// bidirectional byte pipe for the bridge.
#[derive(Debug)]
pub struct RelayStream {
    send: iroh::endpoint::SendStream,
    recv: iroh::endpoint::RecvStream,
    peer_info: RelayPeerInfo,
}

impl Unpin for RelayStream {}

impl RelayStream {
    /// Creates a new RelayStream from send/recv streams and peer info.
    pub fn new(
        send: iroh::endpoint::SendStream,
        recv: iroh::endpoint::RecvStream,
        peer_info: RelayPeerInfo,
    ) -> Self {
        Self {
            send,
            recv,
            peer_info,
        }
    }

    /// The remote peer carrying this stream.
    pub fn peer_info(&self) -> &RelayPeerInfo {
        &self.peer_info
    }
}

impl AsyncRead for RelayStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match Pin::new(&mut self.recv).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => {
                Poll::Ready(Err(error_to_io(e, std::io::ErrorKind::UnexpectedEof)))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for RelayStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match Pin::new(&mut self.send).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => Poll::Ready(Ok(n)),
            Poll::Ready(Err(e)) => Poll::Ready(Err(error_to_io(e, std::io::ErrorKind::BrokenPipe))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match Pin::new(&mut self.send).poll_flush(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(error_to_io(e, std::io::ErrorKind::BrokenPipe))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match Pin::new(&mut self.send).poll_shutdown(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(())),
            Poll::Ready(Err(e)) => Poll::Ready(Err(error_to_io(e, std::io::ErrorKind::BrokenPipe))),
            Poll::Pending => Poll::Pending,
        }
    }
}
