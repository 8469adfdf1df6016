//! The byte-copy engine at the heart of every relay session.
//!
//! Two unidirectional pump tasks copy bytes between the client connection
//! and the far side. Either pump terminating (EOF, write error) or a
//! shutdown signal tears down both ends: half-close is not supported,
//! sessions end as a whole. Counters are for observability only; flow
//! control is left to the transports.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast;
use tracing::trace;

const COPY_BUF_SIZE: usize = 16 * 1024;

/// Byte counters from a finished bridge.
#[derive(Debug, Clone, Copy, Default)]
pub struct BridgeOutcome {
    /// Bytes copied from the client towards the far side.
    pub client_to_far: u64,
    /// Bytes copied from the far side towards the client.
    pub far_to_client: u64,
}

/// Copy bytes between `client` and `far` until either side closes, either
/// direction errors, or `shutdown` fires. Both ends are torn down before
/// returning.
pub async fn bridge<C, F>(client: C, far: F, mut shutdown: broadcast::Receiver<()>) -> BridgeOutcome
where
    C: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    F: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    let (client_read, client_write) = tokio::io::split(client);
    let (far_read, far_write) = tokio::io::split(far);

    let client_to_far = Arc::new(AtomicU64::new(0));
    let far_to_client = Arc::new(AtomicU64::new(0));

    let mut up = tokio::spawn(pump(client_read, far_write, Arc::clone(&client_to_far)));
    let mut down = tokio::spawn(pump(far_read, client_write, Arc::clone(&far_to_client)));

    tokio::select! {
        _ = &mut up => down.abort(),
        _ = &mut down => up.abort(),
        _ = shutdown.recv() => {
            up.abort();
            down.abort();
        }
    }

    BridgeOutcome {
        client_to_far: client_to_far.load(Ordering::Relaxed),
        far_to_client: far_to_client.load(Ordering::Relaxed),
    }
}

async fn pump<R, W>(mut reader: R, mut writer: W, count: Arc<AtomicU64>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    trace!(error = %e, "relay pump write ended");
                    break;
                }
                count.fetch_add(n as u64, Ordering::Relaxed);
            }
            Err(e) => {
                trace!(error = %e, "relay pump read ended");
                break;
            }
        }
    }
    let _ = writer.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_bridge_copies_both_directions() {
        let (client_near, mut client_far) = duplex(1024);
        let (far_near, mut far_far) = duplex(1024);
        let (_tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(bridge(client_near, far_near, rx));

        client_far.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        far_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        far_far.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        // Closing the client side ends the bridge.
        drop(client_far);
        let outcome = timeout(Duration::from_secs(5), handle)
            .await
            .expect("bridge did not finish")
            .unwrap();
        assert_eq!(outcome.client_to_far, 4);
        assert_eq!(outcome.far_to_client, 5);
    }

    #[tokio::test]
    async fn test_far_close_tears_down_client_side() {
        let (client_near, mut client_far) = duplex(1024);
        let (far_near, far_far) = duplex(1024);
        let (_tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(bridge(client_near, far_near, rx));

        drop(far_far);
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("bridge did not finish")
            .unwrap();

        // The client's peer observes EOF once the bridge is gone.
        let mut buf = [0u8; 1];
        let n = timeout(Duration::from_secs(5), client_far.read(&mut buf))
            .await
            .expect("client side not closed")
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_shutdown_signal_ends_bridge() {
        let (client_near, _client_far) = duplex(1024);
        let (far_near, _far_far) = duplex(1024);
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(bridge(client_near, far_near, rx));
        tx.send(()).unwrap();
        timeout(Duration::from_secs(5), handle)
            .await
            .expect("bridge ignored shutdown")
            .unwrap();
    }
}
