use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use xdagx_p2p::config::P2pConfig;
use xdagx_p2p::handshake::Identity;
use xdagx_p2p::orchestrator::cli::Args;
use xdagx_p2p::orchestrator::{default_events, init_tracing, Node};
use xdagx_p2p::types::NodeRecord;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.detailed_logging != 0);

    let bind_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let bootstrap_nodes = args
        .bootstrap_nodes
        .iter()
        .filter_map(|url| match url.parse::<NodeRecord>() {
            Ok(record) => Some(record.endpoint.tcp_addr()),
            Err(err) => {
                tracing::warn!(url, %err, "skipping malformed bootstrap node url");
                None
            }
        })
        .collect();

    let config = P2pConfig {
        tcp_listen_addr: bind_addr,
        udp_listen_addr: bind_addr,
        bootstrap_nodes,
        dns_tree_urls: args.url_schemes.clone(),
        network_id: args.network_id,
        network_version: args.network_version,
        detailed_logging: args.detailed_logging != 0,
        ..P2pConfig::default()
    };

    let identity = Identity::generate();
    tracing::info!(node_id = %identity.node_id, "starting node");

    let node = Node::start(config, identity, default_events()).await?;

    for static_node in &args.static_nodes {
        match static_node.parse::<NodeRecord>() {
            Ok(record) => {
                let manager = node.manager.clone();
                tokio::spawn(async move {
                    if let Err(err) = manager.dial(record.endpoint, Some(record.id)).await {
                        tracing::warn!(error = %err, "failed to dial static node");
                    }
                });
            }
            Err(err) => tracing::warn!(static_node, %err, "skipping malformed static node url"),
        }
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    node.shutdown().await;
    Ok(())
}
