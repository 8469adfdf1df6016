//! Egress target selection.
//!
//! One synchronized value decides where new sessions exit: the local node
//! or a remote peer. Sessions snapshot the value once at session start; a
//! retarget never touches a session that is already bridging.

use std::sync::RwLock;

use iroh::NodeId;

use crate::error::{Error, Result};

/// Where proxied traffic exits the overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EgressTarget {
    /// Dial destinations directly from this node.
    Local,
    /// Tunnel to a remote peer which dials on our behalf.
    Remote(NodeId),
}

/// Holds the single mutable [`EgressTarget`].
///
/// Reads and writes exclude each other at the granularity of one
/// assignment; racing sessions may observe either the old or the new
/// target (latest write wins), never a torn value.
#[derive(Debug)]
pub struct EgressSelector {
    local_id: NodeId,
    target: RwLock<EgressTarget>,
}

impl EgressSelector {
    /// Create a selector starting at [`EgressTarget::Local`].
    pub fn new(local_id: NodeId) -> Self {
        Self {
            local_id,
            target: RwLock::new(EgressTarget::Local),
        }
    }

    /// Snapshot the current target. Called once per new session.
    pub fn resolve(&self) -> EgressTarget {
        *self.target.read().unwrap()
    }

    /// Select a remote egress peer. Selecting our own id is an explicit
    /// reset to local egress. No reachability check happens here;
    /// resolution failures surface lazily at session start.
    pub fn set_remote(&self, peer: NodeId) -> EgressTarget {
        let target = if peer == self.local_id {
            EgressTarget::Local
        } else {
            EgressTarget::Remote(peer)
        };
        *self.target.write().unwrap() = target;
        target
    }

    /// Reset to local egress.
    pub fn reset(&self) -> EgressTarget {
        *self.target.write().unwrap() = EgressTarget::Local;
        EgressTarget::Local
    }

    /// Control-surface entry point: an empty identifier is an explicit
    /// reset to local egress; anything else must parse as a peer id or the
    /// call fails with [`Error::UnknownPeerFormat`]. Ambiguous input never
    /// silently defaults.
    pub fn select(&self, identifier: &str) -> Result<EgressTarget> {
        let identifier = identifier.trim();
        if identifier.is_empty() {
            return Ok(self.reset());
        }
        let peer: NodeId = identifier
            .parse()
            .map_err(|e| Error::unknown_peer_format(format!("{identifier:?}: {e}")))?;
        Ok(self.set_remote(peer))
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
    fn test_initial_target_is_local() {
        let selector = EgressSelector::new(node_id());
        assert_eq!(selector.resolve(), EgressTarget::Local);
    }

    #[test]
    fn test_set_and_reset() {
        let selector = EgressSelector::new(node_id());
        let peer = node_id();
        assert_eq!(selector.set_remote(peer), EgressTarget::Remote(peer));
        assert_eq!(selector.resolve(), EgressTarget::Remote(peer));
        assert_eq!(selector.reset(), EgressTarget::Local);
        assert_eq!(selector.resolve(), EgressTarget::Local);
    }

    #[test]
    fn test_setting_own_id_resets_to_local() {
        let local = node_id();
        let selector = EgressSelector::new(local);
        selector.set_remote(node_id());
        assert_eq!(selector.set_remote(local), EgressTarget::Local);
        assert_eq!(selector.resolve(), EgressTarget::Local);
    }

    #[test]
    fn test_latest_write_wins() {
        let selector = EgressSelector::new(node_id());
        let first = node_id();
        let second = node_id();
        selector.set_remote(first);
        selector.set_remote(second);
        assert_eq!(selector.resolve(), EgressTarget::Remote(second));
    }

    #[test]
    fn test_select_empty_resets() {
        let selector = EgressSelector::new(node_id());
        selector.set_remote(node_id());
        assert_eq!(selector.select("").unwrap(), EgressTarget::Local);
        assert_eq!(selector.select("  ").unwrap(), EgressTarget::Local);
    }

    #[test]
    fn test_select_garbage_is_parse_error_not_fallback() {
        let selector = EgressSelector::new(node_id());
        let peer = node_id();
        selector.set_remote(peer);
        let err = selector.select("not-a-peer-id").unwrap_err();
        assert!(matches!(err, Error::UnknownPeerFormat(_)));
        // A failed select leaves the target untouched.
        assert_eq!(selector.resolve(), EgressTarget::Remote(peer));
    }

    #[test]
    fn test_select_valid_id_string() {
        let selector = EgressSelector::new(node_id());
        let peer = node_id();
        let target = selector.select(&peer.to_string()).unwrap();
        assert_eq!(target, EgressTarget::Remote(peer));
    }
}
