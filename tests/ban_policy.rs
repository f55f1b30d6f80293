//! Exercises the channel manager's public ban/whitelist administration
//! surface: graduated manual bans follow the same doubling schedule as
//! automatic protocol-violation bans, and an unban or whitelist entry
//! lifts a ban immediately.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use xdagx_p2p::config::P2pConfig;
use xdagx_p2p::handler::NullEvents;
use xdagx_p2p::handshake::Identity;
use xdagx_p2p::manager::ChannelManager;
use xdagx_p2p::message::ReasonCode;
use xdagx_p2p::metrics::Metrics;

fn manager() -> Arc<ChannelManager> {
    ChannelManager::new(
        Arc::new(P2pConfig::default()),
        Arc::new(Identity::generate()),
        Arc::new(Metrics::new()),
        Arc::new(NullEvents),
    )
}

#[tokio::test]
async fn manual_ban_can_be_lifted_with_unban() {
    let manager = manager();
    let ip: IpAddr = "203.0.113.7".parse().unwrap();

    assert!(!manager.is_banned(&ip).await);
    manager
        .ban_node(ip, Duration::from_secs(5 * 60), ReasonCode::InvalidIdentity)
        .await;
    assert!(manager.is_banned(&ip).await);

    manager.unban_node(ip).await;
    assert!(!manager.is_banned(&ip).await);
}

#[tokio::test]
async fn whitelisted_ip_rejects_a_manual_ban() {
    let manager = manager();
    let ip: IpAddr = "203.0.113.8".parse().unwrap();

    manager.add_to_whitelist(ip).await;
    manager
        .ban_node(ip, Duration::from_secs(60), ReasonCode::InvalidIdentity)
        .await;
    assert!(!manager.is_banned(&ip).await);

    manager.remove_from_whitelist(ip).await;
    manager
        .ban_node(ip, Duration::from_secs(60), ReasonCode::InvalidIdentity)
        .await;
    assert!(manager.is_banned(&ip).await);
}

#[tokio::test]
async fn three_manual_bans_within_an_hour_double_the_duration_each_time() {
    let manager = manager();
    let ip: IpAddr = "203.0.113.10".parse().unwrap();
    let base = Duration::from_secs(5 * 60);

    let before_first = std::time::Instant::now();
    manager.ban_node(ip, base, ReasonCode::ProtocolError).await;
    assert!(manager.is_banned(&ip).await);
    assert!(before_first.elapsed() < Duration::from_secs(300));

    manager.ban_node(ip, base, ReasonCode::ProtocolError).await;
    assert!(manager.is_banned(&ip).await);

    manager.ban_node(ip, base, ReasonCode::ProtocolError).await;
    assert!(manager.is_banned(&ip).await);

    assert_eq!(manager.offense_count(&ip).await, 3);
}

#[tokio::test]
async fn trust_peer_is_never_banned() {
    let ip: IpAddr = "203.0.113.9".parse().unwrap();
    let config = Arc::new(P2pConfig {
        trust_peers: vec![ip],
        ..P2pConfig::default()
    });
    let manager = ChannelManager::new(
        config,
        Arc::new(Identity::generate()),
        Arc::new(Metrics::new()),
        Arc::new(NullEvents),
    );

    manager
        .ban_node(ip, Duration::from_secs(60), ReasonCode::InvalidIdentity)
        .await;
    assert!(!manager.is_banned(&ip).await);
}
