//! Node identity and the overlay endpoint.
//!
//! The [`Host`] owns the process keypair, the bound iroh endpoint, and the
//! two tables the rest of the system reads: the peerstore (every peer we
//! have ever heard of, with addresses) and the live connection table.
//! Discovery appends to the peerstore and dials through [`Host::connect`];
//! the relay handler registers inbound connections. Every connection-table
//! entry has a peerstore entry.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use iroh::endpoint::Connection;
use iroh::{Endpoint, NodeAddr, NodeId, RelayMode, SecretKey};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::relay::RELAY_ALPN;

/// Configuration for [`Host::new`].
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Hex-encoded private key material. A fresh keypair is generated when
    /// absent; malformed material is a fatal identity error.
    pub key: Option<String>,
    /// Use public relay servers and global address discovery when dialing.
    /// Disabled in tests for hermetic, direct-address-only endpoints.
    pub relays: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            key: None,
            relays: true,
        }
    }
}

/// A known peer: addresses learned from discovery plus the time it was
/// first seen. Newer announcements update the addresses in place.
struct PeerRecord {
    addrs: Vec<SocketAddr>,
    discovered_at: u64,
}

/// A live connection to a peer.
struct ConnEntry {
    conn: Connection,
    addrs: Vec<SocketAddr>,
    connected_since: u64,
    gen: u64,
}

#[derive(Default)]
struct Tables {
    peerstore: HashMap<NodeId, PeerRecord>,
    connections: HashMap<NodeId, ConnEntry>,
    conn_gen: u64,
}

/// Projection of one connection-table row for external reporting.
#[derive(Debug, Clone, Serialize)]
pub struct PeerListEntry {
    /// The peer identifier, display-encoded.
    pub peer_id: String,
    /// Known direct addresses for the peer (may be empty for inbound peers).
    pub addrs: Vec<SocketAddr>,
    /// Unix timestamp of when the connection was registered.
    pub connected_since: u64,
}

/// The overlay network host: identity, endpoint, peerstore, connections.
///
/// Cheap to clone; all clones share the same endpoint and tables.
#[derive(Clone)]
pub struct Host {
    endpoint: Endpoint,
    tables: Arc<Mutex<Tables>>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("node_id", &self.endpoint.node_id())
            .finish_non_exhaustive()
    }
}

impl Host {
    /// Create the host: decode or generate the identity key and bind the
    /// overlay endpoint with the relay ALPN.
    pub async fn new(config: HostConfig) -> Result<Self> {
        let secret_key = match &config.key {
            Some(material) => SecretKey::from_str(material)
                .map_err(|e| Error::identity(format!("invalid private key material: {e}")))?,
            None => SecretKey::generate(rand::rngs::OsRng),
        };

        let mut builder = Endpoint::builder().secret_key(secret_key);
        if config.relays {
            builder = builder.discovery_n0();
        } else {
            builder = builder.relay_mode(RelayMode::Disabled).clear_discovery();
        }
        let endpoint = builder.bind().await?;
        debug!(node_id = %endpoint.node_id().fmt_short(), "endpoint bound");

        Ok(Self {
            endpoint,
            tables: Arc::new(Mutex::new(Tables::default())),
        })
    }

    /// The stable identifier derived from the public key.
    pub fn node_id(&self) -> NodeId {
        self.endpoint.node_id()
    }

    /// The underlying iroh endpoint.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// The signing key backing the endpoint identity.
    pub(crate) fn secret_key(&self) -> &SecretKey {
        self.endpoint.secret_key()
    }

    /// Socket addresses the endpoint is bound to.
    pub fn bound_sockets(&self) -> Vec<SocketAddr> {
        self.endpoint.bound_sockets()
    }

    /// Whether a live connection to `peer` exists right now.
    pub fn is_connected(&self, peer: NodeId) -> bool {
        self.tables.lock().unwrap().connections.contains_key(&peer)
    }

    /// Record addresses for a peer in the peerstore. Append/update only:
    /// a newer announcement replaces the stored address set.
    pub fn add_peer_addrs(&self, peer: NodeId, addrs: Vec<SocketAddr>) {
        let mut tables = self.tables.lock().unwrap();
        match tables.peerstore.get_mut(&peer) {
            Some(record) => record.addrs = addrs,
            None => {
                tables.peerstore.insert(
                    peer,
                    PeerRecord {
                        addrs,
                        discovered_at: unix_now(),
                    },
                );
            }
        }
    }

    /// Build a dialable address for a peer from the peerstore.
    pub fn known_addr(&self, peer: NodeId) -> NodeAddr {
        let addrs = self
            .tables
            .lock()
            .unwrap()
            .peerstore
            .get(&peer)
            .map(|record| record.addrs.clone())
            .unwrap_or_default();
        NodeAddr::new(peer).with_direct_addresses(addrs)
    }

    /// Dial a peer. Idempotent: returns the existing connection when one is
    /// already registered. Failures surface as [`Error::Dial`]; retrying is
    /// the caller's (discovery's) job.
    pub async fn connect(&self, addr: NodeAddr) -> Result<Connection> {
        let peer = addr.node_id;
        if let Some(conn) = self.connection(peer) {
            return Ok(conn);
        }
        let conn = self.endpoint.connect(addr, RELAY_ALPN).await?;
        self.register_connection(peer, &conn);
        debug!(peer = %peer.fmt_short(), "dialed peer");
        Ok(conn)
    }

    /// The live connection to a peer, if any.
    pub fn connection(&self, peer: NodeId) -> Option<Connection> {
        self.tables
            .lock()
            .unwrap()
            .connections
            .get(&peer)
            .map(|entry| entry.conn.clone())
    }

    /// Register a connection (inbound or outbound) in the connection table
    /// and spawn a watcher that removes the entry when the transport closes
    /// it. Also ensures the peerstore invariant.
    pub(crate) fn register_connection(&self, peer: NodeId, conn: &Connection) {
        let gen = {
            let mut tables = self.tables.lock().unwrap();
            tables.conn_gen += 1;
            let gen = tables.conn_gen;
            let addrs = {
                let record = tables.peerstore.entry(peer).or_insert_with(|| PeerRecord {
                    addrs: Vec::new(),
                    discovered_at: unix_now(),
                });
                record.addrs.clone()
            };
            tables.connections.insert(
                peer,
                ConnEntry {
                    conn: conn.clone(),
                    addrs,
                    connected_since: unix_now(),
                    gen,
                },
            );
            gen
        };

        let host = self.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            let reason = conn.closed().await;
            debug!(peer = %peer.fmt_short(), %reason, "peer connection closed");
            let mut tables = host.tables.lock().unwrap();
            // A reconnect may have replaced the entry; only remove our own.
            if tables.connections.get(&peer).map(|e| e.gen) == Some(gen) {
                tables.connections.remove(&peer);
            }
        });
    }

    /// Snapshot of the connection table, ordered by connection time then
    /// peer id. Empty when no peers are connected.
    pub fn peer_list(&self) -> Vec<PeerListEntry> {
        let tables = self.tables.lock().unwrap();
        let mut entries: Vec<PeerListEntry> = tables
            .connections
            .iter()
            .map(|(peer, entry)| PeerListEntry {
                peer_id: peer.to_string(),
                addrs: entry.addrs.clone(),
                connected_since: entry.connected_since,
            })
            .collect();
        entries.sort_by(|a, b| {
            a.connected_since
                .cmp(&b.connected_since)
                .then_with(|| a.peer_id.cmp(&b.peer_id))
        });
        entries
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> HostConfig {
        HostConfig {
            key: None,
            relays: false,
        }
    }

    #[tokio::test]
    async fn test_malformed_key_is_identity_error() {
        let config = HostConfig {
            key: Some("not-a-key".into()),
            relays: false,
        };
        let err = Host::new(config).await.unwrap_err();
        assert!(matches!(err, Error::Identity(_)));
    }

    #[tokio::test]
    async fn test_key_material_round_trips_to_same_id() {
        let secret = SecretKey::generate(rand::rngs::OsRng);
        let expected = secret.public();
        let material: String = secret
            .to_bytes()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();
        let config = HostConfig {
            key: Some(material),
            relays: false,
        };
        let host = Host::new(config).await.unwrap();
        assert_eq!(host.node_id(), expected);
    }

    #[tokio::test]
    async fn test_fresh_host_has_empty_peer_list() {
        let host = Host::new(local_config()).await.unwrap();
        assert!(host.peer_list().is_empty());
    }

    #[tokio::test]
    async fn test_peerstore_addrs_feed_known_addr() {
        let host = Host::new(local_config()).await.unwrap();
        let peer = SecretKey::generate(rand::rngs::OsRng).public();
        let addr: SocketAddr = "127.0.0.1:4444".parse().unwrap();
        host.add_peer_addrs(peer, vec![addr]);
        let node_addr = host.known_addr(peer);
        assert_eq!(node_addr.node_id, peer);
    }
}
