//! Tunnel relay: the egress selector, the relay stream protocol, and the
//! byte-bridging engine shared by the ingress and egress roles.

pub mod bridge;
pub mod handler;
pub mod header;
pub mod selector;
pub mod stream;

pub use bridge::{bridge, BridgeOutcome};
pub use handler::RelayHandler;
pub use header::{ProtocolTag, RelayHeader};
pub use selector::{EgressSelector, EgressTarget};
pub use stream::{RelayPeerInfo, RelayStream};

/// ALPN identifying relay traffic among overlay protocols.
pub const RELAY_ALPN: &[u8] = b"/peergate.relay/1.0";
