//! P2P overlay proxy node.
//!
//! A peergate node joins an iroh overlay, discovers other participants,
//! and exposes local SOCKS5 and SSH ingress listeners whose traffic is
//! tunneled byte-for-byte over overlay streams to a selectable egress
//! peer — or dialed directly when the node itself is the egress. A gossip
//! chat room rides alongside for peer coordination.

#![deny(missing_docs)]

pub mod chat;
pub mod discovery;
pub mod error;
pub mod host;
pub mod ingress;
pub mod node;
pub mod relay;
pub mod tunnel;

// Re-export key types
pub use chat::{ChatHandle, ChatMessage, ChatRoom};
pub use discovery::{DiscoveryConfig, DiscoveryMode};
pub use error::{Error, Result};
pub use host::{Host, HostConfig, PeerListEntry};
pub use node::{NodeConfig, NodeGuard};
pub use relay::{EgressSelector, EgressTarget, ProtocolTag, RelayHeader, RELAY_ALPN};
pub use tunnel::Tunnel;

/// Re-export of the underlying overlay crate for embedders and tests.
pub use iroh;
