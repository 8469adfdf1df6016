//! Peer discovery strategies.
//!
//! Two interchangeable strategies feed the same host connection table:
//! announce (rendezvous over the BitTorrent mainline DHT) and advertise
//! (local-segment UDP beacons). Each runs as one background loop for the
//! process lifetime; a dial failure is never fatal, it only delays that
//! peer's next attempt.

pub mod advertise;
pub mod announce;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use iroh::NodeId;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::host::Host;

/// Default rendezvous topic all announcing nodes meet at.
pub const DEFAULT_RENDEZVOUS: &str = "peergate/rendezvous/v1";

/// Default UDP port for advertise-mode beacons.
pub const DEFAULT_BEACON_PORT: u16 = 42424;

/// Which discovery strategy to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DiscoveryMode {
    /// Rendezvous announce/query via the mainline DHT.
    Announce,
    /// Local-segment UDP broadcast beacons.
    #[default]
    Advertise,
}

/// Settings shared by both strategies.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// Rendezvous topic string for announce mode.
    pub rendezvous: String,
    /// Announce republish/query interval.
    pub announce_interval: Duration,
    /// UDP port beacons are sent to and received on.
    pub beacon_port: u16,
    /// Beacon destination override; defaults to the limited broadcast
    /// address on `beacon_port`.
    pub beacon_target: Option<SocketAddr>,
    /// Beacon send interval.
    pub beacon_interval: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            rendezvous: DEFAULT_RENDEZVOUS.to_string(),
            announce_interval: Duration::from_secs(30),
            beacon_port: DEFAULT_BEACON_PORT,
            beacon_target: None,
            beacon_interval: Duration::from_secs(5),
        }
    }
}

/// Spawn the selected strategy's background loop. The loop ends only when
/// the shutdown channel fires. Whichever strategy runs, the observable
/// effect is the same: the host's connection table gains entries.
pub fn spawn(
    mode: DiscoveryMode,
    host: Host,
    config: DiscoveryConfig,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    info!(?mode, "starting discovery");
    match mode {
        DiscoveryMode::Announce => tokio::spawn(announce::run(host, config, shutdown)),
        DiscoveryMode::Advertise => tokio::spawn(advertise::run(host, config, shutdown)),
    }
}

/// Per-peer dial backoff: exponential from 1s, capped at 30s, cleared on
/// success.
pub(crate) struct Backoff {
    entries: HashMap<NodeId, BackoffEntry>,
}

struct BackoffEntry {
    delay: Duration,
    not_before: Instant,
}

impl Backoff {
    const BASE: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(30);

    pub(crate) fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Whether a dial attempt for `peer` is due.
    fn ready(&self, peer: NodeId) -> bool {
        self.entries
            .get(&peer)
            .map(|entry| Instant::now() >= entry.not_before)
            .unwrap_or(true)
    }

    fn failure(&mut self, peer: NodeId) {
        let delay = self
            .entries
            .get(&peer)
            .map(|entry| (entry.delay * 2).min(Self::CAP))
            .unwrap_or(Self::BASE);
        self.entries.insert(
            peer,
            BackoffEntry {
                delay,
                not_before: Instant::now() + delay,
            },
        );
    }

    fn success(&mut self, peer: NodeId) {
        self.entries.remove(&peer);
    }

    #[cfg(test)]
    fn current_delay(&self, peer: NodeId) -> Option<Duration> {
        self.entries.get(&peer).map(|entry| entry.delay)
    }
}

/// Dial one discovered peer through the host, with backoff bookkeeping.
/// Skips self, already-connected peers, and peers still backing off.
pub(crate) async fn dial_discovered(
    host: &Host,
    backoff: &mut Backoff,
    peer: NodeId,
    addrs: Vec<SocketAddr>,
) {
    if peer == host.node_id() {
        return;
    }
    host.add_peer_addrs(peer, addrs);
    if host.is_connected(peer) {
        backoff.success(peer);
        return;
    }
    if !backoff.ready(peer) {
        return;
    }
    match host.connect(host.known_addr(peer)).await {
        Ok(_) => {
            info!(peer = %peer.fmt_short(), "connected to discovered peer");
            backoff.success(peer);
        }
        Err(e) => {
            debug!(peer = %peer.fmt_short(), error = %e, "dial failed, will retry");
            backoff.failure(peer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iroh::SecretKey;

    fn node_id() -> NodeId {
        SecretKey::generate(rand::rngs::OsRng).public()
    }

    #[test]
    fn test_backoff_starts_ready() {
        let backoff = Backoff::new();
        assert!(backoff.ready(node_id()));
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut backoff = Backoff::new();
        let peer = node_id();
        backoff.failure(peer);
        assert_eq!(backoff.current_delay(peer), Some(Duration::from_secs(1)));
        backoff.failure(peer);
        assert_eq!(backoff.current_delay(peer), Some(Duration::from_secs(2)));
        for _ in 0..10 {
            backoff.failure(peer);
        }
        assert_eq!(backoff.current_delay(peer), Some(Backoff::CAP));
        assert!(!backoff.ready(peer));
    }

    #[test]
    fn test_backoff_success_resets() {
        let mut backoff = Backoff::new();
        let peer = node_id();
        backoff.failure(peer);
        backoff.failure(peer);
        backoff.success(peer);
        assert!(backoff.ready(peer));
        assert_eq!(backoff.current_delay(peer), None);
    }

    #[test]
    fn test_backoff_is_per_peer() {
        let mut backoff = Backoff::new();
        let slow = node_id();
        let fresh = node_id();
        backoff.failure(slow);
        assert!(!backoff.ready(slow));
        assert!(backoff.ready(fresh));
    }
}
