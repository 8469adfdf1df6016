//! Rendezvous discovery over the BitTorrent mainline DHT.
//!
//! Presence is a signed record published under a topic derived from the
//! rendezvous string. One loop both republishes our own record and queries
//! for other announcers each tick; the query covers the current and the
//! previous minute to ride out clock drift between announcers.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use distributed_topic_tracker::{unix_minute, RecordPublisher, TopicId};
use ed25519_dalek::SigningKey;
use iroh::NodeId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::discovery::{dial_discovered, Backoff, DiscoveryConfig};
use crate::host::Host;

/// Content of one DHT announce record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnounceRecord {
    /// The announcer's node id bytes (32 bytes).
    pub node_id: [u8; 32],
    /// Direct socket addresses the announcer's endpoint is bound to.
    pub addrs: Vec<SocketAddr>,
    /// Unix timestamp when the record was published.
    pub published_at: u64,
}

impl AnnounceRecord {
    /// Build the record for our own host.
    pub fn for_host(host: &Host) -> Self {
        Self {
            node_id: *host.node_id().as_bytes(),
            addrs: host.bound_sockets(),
            published_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }

    /// The announcer's node id, if the stored bytes are a valid key.
    pub fn node_id(&self) -> Option<NodeId> {
        NodeId::from_bytes(&self.node_id).ok()
    }
}

/// Derive the DHT topic from the rendezvous string.
fn topic_for(rendezvous: &str) -> TopicId {
    TopicId::new(rendezvous.to_string())
}

/// Derive the record secret from the rendezvous string. Effectively public:
/// anyone who knows the rendezvous string can discover announcers.
fn secret_for(rendezvous: &str) -> Vec<u8> {
    Sha256::digest(rendezvous.as_bytes()).to_vec()
}

pub(crate) async fn run(host: Host, config: DiscoveryConfig, mut shutdown: broadcast::Receiver<()>) {
    // The record signing key is the endpoint identity key.
    let signing_key = SigningKey::from_bytes(&host.secret_key().to_bytes());
    let verifying_key = signing_key.verifying_key();
    let publisher = RecordPublisher::new(
        topic_for(&config.rendezvous),
        verifying_key,
        signing_key,
        None,
        secret_for(&config.rendezvous),
    );

    let mut backoff = Backoff::new();
    let mut interval = tokio::time::interval(config.announce_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                publish(&publisher, &host).await;
                query(&publisher, &host, &mut backoff).await;
            }
            _ = shutdown.recv() => {
                debug!("announce discovery shutting down");
                break;
            }
        }
    }
}

async fn publish(publisher: &RecordPublisher, host: &Host) {
    let minute = unix_minute(0);
    match publisher.new_record(minute, AnnounceRecord::for_host(host)) {
        Ok(record) => {
            if let Err(e) = publisher.publish_record(record).await {
                error!("failed to publish rendezvous record: {e}");
            } else {
                debug!(minute, "published rendezvous record");
            }
        }
        Err(e) => error!("failed to create rendezvous record: {e}"),
    }
}

async fn query(publisher: &RecordPublisher, host: &Host, backoff: &mut Backoff) {
    for minute in [unix_minute(0), unix_minute(-1)] {
        for record in publisher.get_records(minute).await {
            match record.content::<AnnounceRecord>() {
                Ok(announce) => {
                    let Some(peer) = announce.node_id() else {
                        warn!("announce record with invalid node id");
                        continue;
                    };
                    dial_discovered(host, backoff, peer, announce.addrs).await;
                }
                Err(e) => warn!(error = %e, "failed to deserialize announce record"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = AnnounceRecord {
            node_id: [7u8; 32],
            addrs: vec!["0.0.0.0:4433".parse().unwrap()],
            published_at: 1700000000,
        };
        let json = serde_json::to_vec(&record).unwrap();
        let decoded: AnnounceRecord = serde_json::from_slice(&json).unwrap();
        assert_eq!(decoded.node_id, record.node_id);
        assert_eq!(decoded.addrs, record.addrs);
    }

    #[test]
    fn test_topic_derivation_is_deterministic() {
        let a = topic_for("peergate/rendezvous/v1");
        let b = topic_for("peergate/rendezvous/v1");
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_secret_is_sha256_of_rendezvous() {
        let secret = secret_for("room");
        assert_eq!(secret.len(), 32);
        assert_eq!(secret, secret_for("room"));
        assert_ne!(secret, secret_for("other"));
    }
}
