use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use peergate::discovery::{DiscoveryConfig, DiscoveryMode, DEFAULT_RENDEZVOUS};
use peergate::{HostConfig, NodeConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(name = "peergate")]
#[clap(about = "P2P overlay proxy node with SOCKS5 and SSH ingress")]
struct Args {
    /// Node private key (hex encoded); a fresh key is generated if absent
    #[clap(long)]
    key: Option<String>,

    /// SOCKS5 ingress port
    #[clap(long, default_value = "1082")]
    socks5: u16,

    /// SSH ingress port
    #[clap(long, default_value = "222")]
    ssh: u16,

    /// Local service address SSH sessions land on at the egress node
    #[clap(long, default_value = "127.0.0.1:22")]
    ssh_forward: String,

    /// Discovery method: announce or advertise
    #[clap(long, default_value = "advertise")]
    discover: String,

    /// Rendezvous topic for announce discovery
    #[clap(long, default_value = DEFAULT_RENDEZVOUS)]
    rendezvous: String,

    /// Chat room to join
    #[clap(long, default_value = "lobby")]
    room: String,

    /// Username to use in the chat room
    #[clap(long, default_value = "anon")]
    user: String,

    /// Level of logs to print (trace, debug, info, warn, error)
    #[clap(long, default_value = "info")]
    log: String,

    /// Disable relay servers (direct connections only)
    #[clap(long)]
    no_relay: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let discovery = match args.discover.as_str() {
        "announce" => DiscoveryMode::Announce,
        _ => DiscoveryMode::Advertise,
    };

    let config = NodeConfig {
        host: HostConfig {
            key: args.key,
            relays: !args.no_relay,
        },
        discovery: Some(discovery),
        discovery_config: DiscoveryConfig {
            rendezvous: args.rendezvous,
            ..Default::default()
        },
        room: args.room,
        username: args.user,
        socks5_addr: Some(SocketAddr::from(([0, 0, 0, 0], args.socks5))),
        ssh_addr: Some(SocketAddr::from(([0, 0, 0, 0], args.ssh))),
        ssh_forward: args.ssh_forward,
    };

    let node = config.spawn().await?;
    info!(node_id = %node.node_id(), "peergate node running");
    let _ = node.chat().send("joined the room").await;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    node.shutdown().await?;
    Ok(())
}
