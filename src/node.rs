//! Node composition: the overlay endpoint, relay and gossip protocols,
//! discovery, the chat room, and the ingress listeners behind a single
//! spawn/shutdown lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;

use iroh::protocol::Router;
use iroh::NodeId;
use iroh_gossip::net::{Gossip, GOSSIP_ALPN};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::chat::{ChatHandle, ChatRoom};
use crate::discovery::{self, DiscoveryConfig, DiscoveryMode};
use crate::error::Result;
use crate::host::{Host, HostConfig, PeerListEntry};
use crate::ingress::IngressKind;
use crate::relay::{EgressSelector, EgressTarget, RelayHandler, RELAY_ALPN};
use crate::tunnel::Tunnel;

/// Everything needed to spawn a node.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Identity and relay settings.
    pub host: HostConfig,
    /// Discovery strategy. `None` runs without discovery (tests, embedding
    /// with manual dialing).
    pub discovery: Option<DiscoveryMode>,
    /// Discovery settings shared by both strategies.
    pub discovery_config: DiscoveryConfig,
    /// Chat room to join.
    pub room: String,
    /// Username shown in the chat room.
    pub username: String,
    /// SOCKS5 ingress bind address; `None` disables the listener.
    pub socks5_addr: Option<SocketAddr>,
    /// SSH ingress bind address; `None` disables the listener.
    pub ssh_addr: Option<SocketAddr>,
    /// Where SSH-tagged sessions land on the egress node.
    pub ssh_forward: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: HostConfig::default(),
            discovery: Some(DiscoveryMode::default()),
            discovery_config: DiscoveryConfig::default(),
            room: "lobby".into(),
            username: "anon".into(),
            socks5_addr: None,
            ssh_addr: None,
            ssh_forward: "127.0.0.1:22".into(),
        }
    }
}

impl NodeConfig {
    /// Spawn the node: bind the endpoint, register the relay and gossip
    /// protocols on one router, start discovery, join the chat room, and
    /// bind the ingress listeners. Startup failures are fatal.
    pub async fn spawn(self) -> Result<NodeGuard> {
        let host = Host::new(self.host.clone()).await?;
        let node_id = host.node_id();
        info!(node_id = %node_id, "node identity ready");

        let (shutdown_tx, _) = broadcast::channel(1);
        let selector = Arc::new(EgressSelector::new(node_id));

        let gossip = Gossip::builder().spawn(host.endpoint().clone());
        let relay_handler =
            RelayHandler::new(host.clone(), self.ssh_forward.clone(), shutdown_tx.clone());
        let router = Router::builder(host.endpoint().clone())
            .accept(RELAY_ALPN, relay_handler)
            .accept(GOSSIP_ALPN, gossip.clone())
            .spawn();

        let mut tasks = JoinSet::new();

        if let Some(mode) = self.discovery {
            let handle = discovery::spawn(
                mode,
                host.clone(),
                self.discovery_config.clone(),
                shutdown_tx.subscribe(),
            );
            tasks.spawn(async move {
                let _ = handle.await;
            });
        }

        let room = ChatRoom::join(&gossip, node_id, &self.room, &self.username, Vec::new()).await?;
        let chat = room.handle();
        tasks.spawn(room.run(shutdown_tx.subscribe()));

        let tunnel = Tunnel::new(
            host.clone(),
            Arc::clone(&selector),
            self.ssh_forward.clone(),
            shutdown_tx.clone(),
        );
        let socks5_addr =
            spawn_ingress(&mut tasks, &tunnel, IngressKind::Socks5, self.socks5_addr).await?;
        let ssh_addr = spawn_ingress(&mut tasks, &tunnel, IngressKind::Ssh, self.ssh_addr).await?;

        let driver = tokio::spawn(async move {
            while let Some(res) = tasks.join_next().await {
                if let Err(e) = res {
                    warn!("node task failed: {e}");
                }
            }
        });

        Ok(NodeGuard {
            host,
            selector,
            chat,
            gossip,
            router,
            shutdown_tx,
            driver,
            socks5_addr,
            ssh_addr,
        })
    }
}

async fn spawn_ingress(
    tasks: &mut JoinSet<()>,
    tunnel: &Tunnel,
    kind: IngressKind,
    addr: Option<SocketAddr>,
) -> Result<Option<SocketAddr>> {
    let Some(addr) = addr else {
        return Ok(None);
    };
    let listener = TcpListener::bind(addr).await?;
    let local = listener.local_addr()?;
    let tunnel = tunnel.clone();
    tasks.spawn(async move {
        tunnel.serve(kind, listener).await;
    });
    Ok(Some(local))
}

/// A running node and the control surface it exposes to collaborators
/// (HTTP API, CLI). Call [`shutdown`](NodeGuard::shutdown) for a graceful
/// stop.
pub struct NodeGuard {
    host: Host,
    selector: Arc<EgressSelector>,
    chat: ChatHandle,
    gossip: Gossip,
    router: Router,
    shutdown_tx: broadcast::Sender<()>,
    driver: tokio::task::JoinHandle<()>,
    socks5_addr: Option<SocketAddr>,
    ssh_addr: Option<SocketAddr>,
}

impl NodeGuard {
    /// This node's stable identifier.
    pub fn node_id(&self) -> NodeId {
        self.host.node_id()
    }

    /// The overlay host.
    pub fn host(&self) -> &Host {
        &self.host
    }

    /// Snapshot of currently connected peers.
    pub fn peer_list(&self) -> Vec<PeerListEntry> {
        self.host.peer_list()
    }

    /// Current egress target.
    pub fn egress(&self) -> EgressTarget {
        self.selector.resolve()
    }

    /// Route future sessions through a remote egress peer. Passing this
    /// node's own id resets to local egress.
    pub fn set_remote_peer(&self, peer: NodeId) -> EgressTarget {
        self.selector.set_remote(peer)
    }

    /// Reset future sessions to local egress.
    pub fn reset_egress(&self) -> EgressTarget {
        self.selector.reset()
    }

    /// Control-surface string entry point; see [`EgressSelector::select`].
    pub fn select_egress(&self, identifier: &str) -> Result<EgressTarget> {
        self.selector.select(identifier)
    }

    /// Broadcast handle for the joined chat room.
    pub fn chat(&self) -> &ChatHandle {
        &self.chat
    }

    /// Bound SOCKS5 ingress address, when enabled.
    pub fn socks5_addr(&self) -> Option<SocketAddr> {
        self.socks5_addr
    }

    /// Bound SSH ingress address, when enabled.
    pub fn ssh_addr(&self) -> Option<SocketAddr> {
        self.ssh_addr
    }

    /// Graceful shutdown: signal every loop and session, drain the task
    /// driver, then stop gossip and the router.
    pub async fn shutdown(self) -> Result<()> {
        let _ = self.shutdown_tx.send(());
        let _ = self.driver.await;

        if let Err(e) = self.gossip.shutdown().await {
            warn!("gossip shutdown error: {e}");
        }
        if let Err(e) = self.router.shutdown().await {
            warn!("router shutdown error: {e}");
        }
        Ok(())
    }
}
