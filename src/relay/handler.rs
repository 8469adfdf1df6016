//! Overlay-side relay protocol handler: the egress node role.
//!
//! Peers open connections on the relay ALPN and one bi-stream per proxied
//! session. Each stream starts with a [`RelayHeader`]; the handler dials
//! the requested destination locally and bridges bytes until either side
//! closes. Stream failures are logged and never affect sibling streams.

use std::future::Future;
use std::time::Instant;

use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::host::Host;
use crate::relay::bridge::bridge;
use crate::relay::header::{ProtocolTag, RelayHeader};
use crate::relay::stream::{RelayPeerInfo, RelayStream};

/// Accepts relay connections and serves their streams.
#[derive(Debug, Clone)]
pub struct RelayHandler {
    host: Host,
    ssh_forward: String,
    shutdown: broadcast::Sender<()>,
}

impl RelayHandler {
    /// Create a handler forwarding SSH-tagged streams to `ssh_forward`.
    pub fn new(host: Host, ssh_forward: impl Into<String>, shutdown: broadcast::Sender<()>) -> Self {
        Self {
            host,
            ssh_forward: ssh_forward.into(),
            shutdown,
        }
    }

    async fn serve_stream(&self, mut stream: RelayStream) -> Result<()> {
        let header = RelayHeader::read_from(&mut stream).await?;
        // SSH-tagged streams always land on this node's own SSH service;
        // only SOCKS5 streams carry a client-chosen destination.
        let destination = match header.tag {
            ProtocolTag::Ssh => self.ssh_forward.clone(),
            ProtocolTag::Socks5 => header.destination.clone(),
        };
        debug!(tag = ?header.tag, destination = %destination, "forwarding relay stream");

        let far = TcpStream::connect(&destination).await?;
        let outcome = bridge(stream, far, self.shutdown.subscribe()).await;
        info!(
            destination = %destination,
            to_destination = outcome.client_to_far,
            to_peer = outcome.far_to_client,
            "relay stream finished"
        );
        Ok(())
    }
}

impl ProtocolHandler for RelayHandler {
    fn accept(
        &self,
        connection: Connection,
    ) -> impl Future<Output = std::result::Result<(), AcceptError>> + Send {
        let handler = self.clone();

        async move {
            let remote = match connection.remote_node_id() {
                Ok(id) => id,
                Err(e) => {
                    warn!(error = %e, "relay connection without a node id");
                    return Ok(());
                }
            };
            handler.host.register_connection(remote, &connection);
            info!(peer = %remote.fmt_short(), "accepted relay connection");

            tokio::spawn(async move {
                loop {
                    // Each accept_bi() is one proxied session.
                    match connection.accept_bi().await {
                        Ok((send, recv)) => {
                            let stream = RelayStream::new(
                                send,
                                recv,
                                RelayPeerInfo {
                                    node_id: remote,
                                    established_at: Instant::now(),
                                },
                            );
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = handler.serve_stream(stream).await {
                                    debug!(
                                        peer = %remote.fmt_short(),
                                        error = %e,
                                        "relay stream ended with error"
                                    );
                                }
                            });
                        }
                        Err(_) => {
                            debug!(peer = %remote.fmt_short(), "relay connection closed");
                            break;
                        }
                    }
                }
            });

            Ok(())
        }
    }

    fn shutdown(&self) -> impl Future<Output = ()> + Send {
        async move {
            // Active bridges are ended through the shutdown channel; the
            // accept loops end when their connections close.
        }
    }
}
