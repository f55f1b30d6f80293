//! Three-node DHT recursive discovery over real loopback UDP sockets: N2
//! only knows N1 going in, learns N0 transitively through N1's FIND_NODE
//! answers, and ends up with a live PING/PONG-confirmed link to N0.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use xdagx_p2p::config::P2pConfig;
use xdagx_p2p::handshake::Identity;
use xdagx_p2p::kademlia::{Contact, ContactState};
use xdagx_p2p::orchestrator::{default_events, Node};
use xdagx_p2p::types::Endpoint;

fn config_on(addr: SocketAddr) -> P2pConfig {
    P2pConfig {
        tcp_listen_addr: addr,
        udp_listen_addr: addr,
        // Fast enough for a test timeline; production defaults are 7.2s
        // and 7200s respectively.
        discovery_interval: Duration::from_millis(150),
        bucket_refresh_interval: Duration::from_millis(150),
        ..P2pConfig::default()
    }
}

fn endpoint_of(addr: SocketAddr) -> Endpoint {
    Endpoint {
        ip: addr.ip(),
        tcp_port: addr.port(),
        udp_port: addr.port(),
    }
}

#[tokio::test]
async fn n2_discovers_n0_transitively_through_n1_and_confirms_it_alive() {
    let addr0: SocketAddr = "127.0.0.1:19950".parse().unwrap();
    let addr1: SocketAddr = "127.0.0.1:19951".parse().unwrap();
    let addr2: SocketAddr = "127.0.0.1:19952".parse().unwrap();

    let n0 = Node::start(config_on(addr0), Identity::generate(), default_events())
        .await
        .unwrap();
    let n1 = Node::start(config_on(addr1), Identity::generate(), default_events())
        .await
        .unwrap();
    let n2 = Node::start(config_on(addr2), Identity::generate(), default_events())
        .await
        .unwrap();

    // N1 is bootstrapped off N0; N2's only active peer is N1. Wire those
    // two links into the routing tables directly, exactly as a completed
    // bootstrap handshake would: from here on, N2's own discovery loop
    // (FIND_NODE against N1) is what must surface N0.
    n1.routing_table
        .insert(Contact::new(n0.identity.node_id, endpoint_of(addr0), SystemTime::now()))
        .await;
    n2.routing_table
        .insert(Contact::new(n1.identity.node_id, endpoint_of(addr1), SystemTime::now()))
        .await;

    tokio::time::sleep(Duration::from_secs(2)).await;

    let closest = n2.routing_table.closest_to(&n0.identity.node_id, 16).await;
    let learned_n0 = closest
        .iter()
        .find(|c| c.id == n0.identity.node_id)
        .expect("N2 should have learned about N0 via N1's FIND_NODE answers");
    assert_eq!(learned_n0.state, ContactState::Alive);
    assert!(n2.routing_table.len().await >= 2);

    n0.shutdown().await;
    n1.shutdown().await;
    n2.shutdown().await;
}
