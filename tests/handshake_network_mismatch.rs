//! A peer announcing a different network id than ours must be refused
//! and its IP banned, not merely disconnected.
//!
//! The initiator learns the responder's announced network id first (in
//! `HELLO`, before it ever replies with `WORLD`), so it is the initiator
//! that detects the mismatch and bans; the responder just sees its
//! connection drop while waiting for a `WORLD` that never arrives, which
//! is a plain transport error, not grounds for a ban on its own.

use std::net::SocketAddr;
use std::time::Duration;

use xdagx_p2p::config::P2pConfig;
use xdagx_p2p::handshake::Identity;
use xdagx_p2p::orchestrator::{default_events, Node};
use xdagx_p2p::types::Endpoint;

fn config_on(addr: SocketAddr, network_id: u8) -> P2pConfig {
    P2pConfig {
        tcp_listen_addr: addr,
        udp_listen_addr: addr,
        network_id,
        ..P2pConfig::default()
    }
}

#[tokio::test]
async fn wrong_network_id_is_refused_and_banned() {
    let addr_a: SocketAddr = "127.0.0.1:19911".parse().unwrap();
    let addr_b: SocketAddr = "127.0.0.1:19912".parse().unwrap();

    let node_a = Node::start(config_on(addr_a, 2), Identity::generate(), default_events())
        .await
        .unwrap();
    let node_b = Node::start(config_on(addr_b, 1), Identity::generate(), default_events())
        .await
        .unwrap();

    let endpoint_b = Endpoint {
        ip: addr_b.ip(),
        tcp_port: addr_b.port(),
        udp_port: addr_b.port(),
    };
    let result = node_a.manager.clone().dial(endpoint_b, None).await;
    assert!(result.is_err());

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(node_a.manager.active_channel_count().await, 0);
    assert_eq!(node_b.manager.active_channel_count().await, 0);
    assert!(node_a.manager.is_banned(&addr_b.ip()).await);

    node_a.shutdown().await;
    node_b.shutdown().await;
}
