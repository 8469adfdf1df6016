//! Local-segment discovery via UDP broadcast beacons.
//!
//! Each node periodically broadcasts a small JSON beacon naming its id and
//! listening addresses, and dials any beacon it hears. Beacon addresses
//! bound to the unspecified address are rewritten to the beacon's source
//! IP, which is the address that actually reaches the sender on this
//! segment.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use iroh::NodeId;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};

use crate::discovery::{dial_discovered, Backoff, DiscoveryConfig};
use crate::host::Host;

const MAX_BEACON_SIZE: usize = 2048;

/// One presence beacon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Beacon {
    /// Display-encoded node id of the advertiser.
    pub node_id: String,
    /// Socket addresses the advertiser's endpoint is bound to.
    pub addrs: Vec<SocketAddr>,
}

impl Beacon {
    fn for_host(host: &Host) -> Self {
        Self {
            node_id: host.node_id().to_string(),
            addrs: host.bound_sockets(),
        }
    }

    fn node_id(&self) -> Option<NodeId> {
        self.node_id.parse().ok()
    }
}

/// Rewrite unspecified-bound addresses to the beacon's source IP.
fn fix_addrs(addrs: Vec<SocketAddr>, source: SocketAddr) -> Vec<SocketAddr> {
    addrs
        .into_iter()
        .map(|addr| {
            if addr.ip().is_unspecified() {
                SocketAddr::new(source.ip(), addr.port())
            } else {
                addr
            }
        })
        .collect()
}

pub(crate) async fn run(host: Host, config: DiscoveryConfig, mut shutdown: broadcast::Receiver<()>) {
    let bind: SocketAddr = (Ipv4Addr::UNSPECIFIED, config.beacon_port).into();
    let socket = match UdpSocket::bind(bind).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!(error = %e, port = config.beacon_port, "failed to bind beacon socket, advertise discovery disabled");
            return;
        }
    };
    if let Err(e) = socket.set_broadcast(true) {
        warn!(error = %e, "failed to enable broadcast on beacon socket");
    }
    let target = config
        .beacon_target
        .unwrap_or_else(|| SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), config.beacon_port));

    let mut backoff = Backoff::new();
    let mut interval = tokio::time::interval(config.beacon_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut buf = [0u8; MAX_BEACON_SIZE];

    loop {
        tokio::select! {
            _ = interval.tick() => {
                match serde_json::to_vec(&Beacon::for_host(&host)) {
                    Ok(bytes) => {
                        if let Err(e) = socket.send_to(&bytes, target).await {
                            debug!(error = %e, "beacon send failed");
                        } else {
                            trace!(%target, "sent beacon");
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to encode beacon"),
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, source) = match received {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(error = %e, "beacon receive failed");
                        continue;
                    }
                };
                let beacon: Beacon = match serde_json::from_slice(&buf[..len]) {
                    Ok(beacon) => beacon,
                    Err(e) => {
                        trace!(error = %e, %source, "ignoring malformed beacon");
                        continue;
                    }
                };
                let Some(peer) = beacon.node_id() else {
                    trace!(%source, "ignoring beacon with invalid node id");
                    continue;
                };
                if peer == host.node_id() {
                    continue;
                }
                debug!(peer = %peer.fmt_short(), %source, "heard beacon");
                dial_discovered(&host, &mut backoff, peer, fix_addrs(beacon.addrs, source)).await;
            }
            _ = shutdown.recv() => {
                debug!("advertise discovery shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beacon_round_trip() {
        let beacon = Beacon {
            node_id: "abcdef".into(),
            addrs: vec!["0.0.0.0:7000".parse().unwrap(), "10.0.0.3:7001".parse().unwrap()],
        };
        let bytes = serde_json::to_vec(&beacon).unwrap();
        let decoded: Beacon = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.node_id, beacon.node_id);
        assert_eq!(decoded.addrs, beacon.addrs);
    }

    #[test]
    fn test_fix_addrs_rewrites_unspecified_only() {
        let source: SocketAddr = "192.168.1.9:5555".parse().unwrap();
        let fixed = fix_addrs(
            vec!["0.0.0.0:7000".parse().unwrap(), "10.0.0.3:7001".parse().unwrap()],
            source,
        );
        assert_eq!(fixed[0], "192.168.1.9:7000".parse::<SocketAddr>().unwrap());
        assert_eq!(fixed[1], "10.0.0.3:7001".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn test_invalid_node_id_is_none() {
        let beacon = Beacon {
            node_id: "definitely not a key".into(),
            addrs: vec![],
        };
        assert!(beacon.node_id().is_none());
    }
}
