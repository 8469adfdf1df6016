//! The coordination channel: a gossip room for peer presence and
//! human-readable messaging, riding alongside the relay traffic.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures_util::StreamExt;
use iroh::NodeId;
use iroh_gossip::api::{Event, GossipReceiver, GossipSender};
use iroh_gossip::net::Gossip;
use iroh_gossip::proto::TopicId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

/// Derive the gossip topic for a room name.
pub fn topic_for_room(room: &str) -> TopicId {
    let path = format!("peergate/chat/{room}");
    TopicId::from(*blake3::hash(path.as_bytes()).as_bytes())
}

/// One room message, JSON on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Display-encoded sender node id.
    pub sender_id: String,
    /// Sender's room username.
    pub username: String,
    /// Message body.
    pub text: String,
    /// Unix timestamp at send time.
    pub sent_at: u64,
}

/// Broadcast capability for a joined room. Cloneable independently of the
/// receive side.
#[derive(Debug, Clone)]
pub struct ChatHandle {
    sender: GossipSender,
    room: String,
    username: String,
    node_id: NodeId,
}

impl ChatHandle {
    /// Broadcast a message to the room.
    pub async fn send(&self, text: &str) -> Result<()> {
        let message = ChatMessage {
            sender_id: self.node_id.to_string(),
            username: self.username.clone(),
            text: text.to_string(),
            sent_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        };
        let bytes = serde_json::to_vec(&message)
            .map_err(|e| Error::protocol(format!("encode chat message: {e}")))?;
        self.sender.broadcast(Bytes::from(bytes)).await?;
        Ok(())
    }

    /// The room name.
    pub fn room(&self) -> &str {
        &self.room
    }

    /// The username used in the room.
    pub fn username(&self) -> &str {
        &self.username
    }
}

/// A joined chat room.
pub struct ChatRoom {
    handle: ChatHandle,
    receiver: GossipReceiver,
}

impl ChatRoom {
    /// Join a room, bootstrapping the gossip mesh off the given peers.
    pub async fn join(
        gossip: &Gossip,
        node_id: NodeId,
        room: &str,
        username: &str,
        bootstrap: Vec<NodeId>,
    ) -> Result<Self> {
        let topic = gossip.subscribe(topic_for_room(room), bootstrap).await?;
        let (sender, receiver) = topic.split();
        info!(room, username, "joined chat room");
        Ok(Self {
            handle: ChatHandle {
                sender,
                room: room.to_string(),
                username: username.to_string(),
                node_id,
            },
            receiver,
        })
    }

    /// The broadcast handle.
    pub fn handle(&self) -> ChatHandle {
        self.handle.clone()
    }

    /// Next decoded message. Neighbor events are skipped and undecodable
    /// payloads logged and dropped; returns `None` when the subscription
    /// ends.
    pub async fn recv(&mut self) -> Option<ChatMessage> {
        loop {
            match self.receiver.next().await {
                Some(Ok(Event::Received(message))) => {
                    match serde_json::from_slice::<ChatMessage>(&message.content) {
                        Ok(decoded) => return Some(decoded),
                        Err(e) => warn!(
                            error = %e,
                            from = %message.delivered_from.fmt_short(),
                            "failed to decode chat message"
                        ),
                    }
                }
                Some(Ok(event @ (Event::NeighborUp(_) | Event::NeighborDown(_) | Event::Lagged))) => {
                    trace!(?event, "gossip neighbor event");
                }
                Some(Err(e)) => {
                    warn!(error = %e, "chat subscription error");
                    return None;
                }
                None => return None,
            }
        }
    }

    /// Drive the room until shutdown, logging inbound messages.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(room = %self.handle.room, "chat room shutting down");
                    break;
                }
                message = self.recv() => {
                    match message {
                        Some(msg) => {
                            info!(room = %self.handle.room, from = %msg.username, "{}", msg.text);
                        }
                        None => {
                            debug!("chat subscription ended");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_is_deterministic() {
        assert_eq!(topic_for_room("lobby"), topic_for_room("lobby"));
    }

    #[test]
    fn test_distinct_rooms_get_distinct_topics() {
        assert_ne!(topic_for_room("lobby"), topic_for_room("ops"));
    }

    #[test]
    fn test_message_round_trip() {
        let message = ChatMessage {
            sender_id: "peer".into(),
            username: "alice".into(),
            text: "hello".into(),
            sent_at: 1700000000,
        };
        let bytes = serde_json::to_vec(&message).unwrap();
        let decoded: ChatMessage = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(decoded.username, "alice");
        assert_eq!(decoded.text, "hello");
    }
}
