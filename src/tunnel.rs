//! The tunnel proxy: accepts ingress connections and drives each session
//! from destination resolution through egress resolution to bridging.
//!
//! Sessions are causally independent: one lightweight task per accepted
//! connection, no shared session state, and a failure in one session never
//! touches another. The egress target is snapshotted exactly once per
//! session, at session start.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use iroh::NodeId;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::host::Host;
use crate::ingress::{socks5, IngressKind};
use crate::relay::{
    bridge, BridgeOutcome, EgressSelector, EgressTarget, RelayHeader, RelayPeerInfo, RelayStream,
};

/// Session lifecycle. States advance strictly in order; `Closed` is
/// terminal and reachable from every state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Accepted,
    DestinationResolved,
    EgressResolved,
    Bridging,
    Closed,
}

/// Per-session bookkeeping, owned exclusively by the task driving it.
struct RelaySession {
    kind: IngressKind,
    client: SocketAddr,
    state: SessionState,
    started: Instant,
}

impl RelaySession {
    fn new(kind: IngressKind, client: SocketAddr) -> Self {
        trace!(ingress = kind.as_str(), client = %client, "session accepted");
        Self {
            kind,
            client,
            state: SessionState::Accepted,
            started: Instant::now(),
        }
    }

    fn advance(&mut self, next: SessionState) {
        trace!(
            ingress = self.kind.as_str(),
            client = %self.client,
            from = ?self.state,
            to = ?next,
            "session state"
        );
        self.state = next;
    }
}

/// The tunnel proxy front-end: ingress listeners plus the egress selector.
///
/// Cheap to clone; clones share the selector and host.
#[derive(Debug, Clone)]
pub struct Tunnel {
    host: Host,
    selector: Arc<EgressSelector>,
    ssh_forward: String,
    shutdown: broadcast::Sender<()>,
}

impl Tunnel {
    /// Create the tunnel proxy.
    pub fn new(
        host: Host,
        selector: Arc<EgressSelector>,
        ssh_forward: impl Into<String>,
        shutdown: broadcast::Sender<()>,
    ) -> Self {
        Self {
            host,
            selector,
            ssh_forward: ssh_forward.into(),
            shutdown,
        }
    }

    /// The egress selector shared with the control surface.
    pub fn selector(&self) -> &Arc<EgressSelector> {
        &self.selector
    }

    /// Accept loop for one ingress listener. Runs until shutdown.
    pub async fn serve(&self, kind: IngressKind, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown.subscribe();
        info!(
            ingress = kind.as_str(),
            addr = ?listener.local_addr().ok(),
            "ingress listening"
        );
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    debug!(ingress = kind.as_str(), "ingress listener shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, client)) => {
                            let tunnel = self.clone();
                            tokio::spawn(async move {
                                tunnel.run_session(stream, kind, client).await;
                            });
                        }
                        Err(e) => warn!(ingress = kind.as_str(), error = %e, "accept failed"),
                    }
                }
            }
        }
    }

    async fn run_session(&self, stream: TcpStream, kind: IngressKind, client: SocketAddr) {
        let mut session = RelaySession::new(kind, client);
        match self.drive_session(stream, &mut session).await {
            Ok(outcome) => {
                info!(
                    ingress = kind.as_str(),
                    client = %client,
                    sent = outcome.client_to_far,
                    received = outcome.far_to_client,
                    elapsed_ms = session.started.elapsed().as_millis() as u64,
                    "session closed"
                );
            }
            Err(e) => {
                debug!(ingress = kind.as_str(), client = %client, error = %e, "session failed");
            }
        }
        session.advance(SessionState::Closed);
    }

    async fn drive_session(
        &self,
        mut client: TcpStream,
        session: &mut RelaySession,
    ) -> Result<BridgeOutcome> {
        let kind = session.kind;
        let destination = kind
            .resolve_destination(&mut client, &self.ssh_forward)
            .await?;
        session.advance(SessionState::DestinationResolved);

        let target = self.selector.resolve();
        session.advance(SessionState::EgressResolved);
        debug!(
            ingress = kind.as_str(),
            destination = %destination,
            egress = ?target,
            "session routed"
        );

        match target {
            EgressTarget::Local => {
                let far = match TcpStream::connect(&destination).await {
                    Ok(far) => far,
                    Err(e) => {
                        if kind == IngressKind::Socks5 {
                            let _ =
                                socks5::send_reply(&mut client, socks5::reply::CONNECTION_REFUSED)
                                    .await;
                        }
                        return Err(e.into());
                    }
                };
                if kind == IngressKind::Socks5 {
                    socks5::send_reply(&mut client, socks5::reply::SUCCEEDED).await?;
                }
                session.advance(SessionState::Bridging);
                Ok(bridge(client, far, self.shutdown.subscribe()).await)
            }
            EgressTarget::Remote(peer) => {
                let far = match self.open_relay_stream(peer, &destination, kind).await {
                    Ok(far) => far,
                    Err(e) => {
                        if kind == IngressKind::Socks5 {
                            let _ = socks5::send_reply(&mut client, socks5::reply::HOST_UNREACHABLE)
                                .await;
                        }
                        return Err(e);
                    }
                };
                if kind == IngressKind::Socks5 {
                    socks5::send_reply(&mut client, socks5::reply::SUCCEEDED).await?;
                }
                session.advance(SessionState::Bridging);
                Ok(bridge(client, far, self.shutdown.subscribe()).await)
            }
        }
    }

    /// Open the overlay leg of a remote-egress session: connect to the peer
    /// if no connection exists, open one bi-stream, write the relay header.
    /// No retry within the session; the client is expected to reconnect.
    async fn open_relay_stream(
        &self,
        peer: NodeId,
        destination: &str,
        kind: IngressKind,
    ) -> Result<RelayStream> {
        let conn = match self.host.connection(peer) {
            Some(conn) => conn,
            None => self
                .host
                .connect(self.host.known_addr(peer))
                .await
                .map_err(|e| Error::unreachable_peer(format!("{}: {e}", peer.fmt_short())))?,
        };
        let (send, recv) = conn
            .open_bi()
            .await
            .map_err(|e| Error::unreachable_peer(format!("{}: {e}", peer.fmt_short())))?;
        let mut stream = RelayStream::new(
            send,
            recv,
            RelayPeerInfo {
                node_id: peer,
                established_at: Instant::now(),
            },
        );
        let header = RelayHeader::new(kind.protocol_tag(), destination)?;
        header.write_to(&mut stream).await?;
        Ok(stream)
    }
}
