use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use bytes::BytesMut;
use rand::RngCore;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::message::discovery::DiscoveryMessage;
use crate::types::{Endpoint, NodeId};

use super::{Contact, ContactState, RoutingTable, K};

const MAX_DATAGRAM: usize = 1280;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

struct PendingEntry {
    id: NodeId,
    endpoint: Endpoint,
    sent_at: Instant,
    /// `true` if this ping is challenging an already-known contact ahead
    /// of eviction, rather than confirming a newly-learned one.
    challenge: bool,
}

/// Outstanding PING challenges, keyed by the nonce we sent, so a PONG can
/// be matched back to the contact it is meant to validate before admitting
/// it into the routing table.
pub struct PendingPings {
    inner: Mutex<std::collections::HashMap<u64, PendingEntry>>,
}

impl PendingPings {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for PendingPings {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the UDP side of the DHT: answers PING/FIND_NODE from peers and
/// admits new contacts on PONG, the way the discovery server this is
/// grounded on runs a single `recv_from` loop dispatching by packet type.
pub async fn run_server(
    socket: Arc<UdpSocket>,
    local_id: NodeId,
    local_endpoint: Endpoint,
    table: Arc<RoutingTable>,
    pending: Arc<PendingPings>,
    evict_timeout: std::time::Duration,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "udp recv_from failed");
                continue;
            }
        };
        if len < 33 {
            continue;
        }
        let packet_type = buf[0];
        let sender_id_bytes = &buf[1..33];
        let mut sender_id = [0u8; 32];
        sender_id.copy_from_slice(sender_id_bytes);
        let sender_id = NodeId(sender_id);

        let message = match DiscoveryMessage::decode(packet_type, &buf[33..len]) {
            Ok(message) => message,
            Err(err) => {
                debug!(%from, error = %err, "malformed discovery datagram");
                continue;
            }
        };

        if let Err(err) = handle_datagram(
            &socket,
            local_id,
            local_endpoint,
            &table,
            &pending,
            sender_id,
            from,
            message,
            evict_timeout,
        )
        .await
        {
            warn!(%from, error = %err, "failed to handle discovery datagram");
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_datagram(
    socket: &Arc<UdpSocket>,
    local_id: NodeId,
    local_endpoint: Endpoint,
    table: &Arc<RoutingTable>,
    pending: &Arc<PendingPings>,
    sender_id: NodeId,
    from: SocketAddr,
    message: DiscoveryMessage,
    evict_timeout: std::time::Duration,
) -> std::io::Result<()> {
    match message {
        DiscoveryMessage::Ping { echo_nonce, .. } => {
            send_datagram(
                socket,
                local_id,
                from,
                DiscoveryMessage::Pong {
                    to: Endpoint {
                        ip: from.ip(),
                        tcp_port: from.port(),
                        udp_port: from.port(),
                    },
                    echo_nonce,
                    timestamp: unix_now(),
                },
            )
            .await?;
            let newcomer = Contact::new(
                sender_id,
                Endpoint {
                    ip: from.ip(),
                    tcp_port: from.port(),
                    udp_port: from.port(),
                },
                SystemTime::now(),
            );
            if let Some(stale) = table.insert(newcomer.clone()).await {
                spawn_challenge(
                    socket.clone(),
                    local_id,
                    local_endpoint,
                    table.clone(),
                    pending.clone(),
                    stale,
                    newcomer,
                    evict_timeout,
                );
            }
        }
        DiscoveryMessage::Pong { echo_nonce, .. } => {
            let mut pending_guard = pending.inner.lock().await;
            if let Some(entry) = pending_guard.remove(&echo_nonce) {
                drop(pending_guard);
                let rtt = entry.sent_at.elapsed();
                if entry.challenge {
                    table.resolve_challenge(&entry.id, echo_nonce, rtt).await;
                } else {
                    let mut contact = Contact::new(entry.id, entry.endpoint, SystemTime::now());
                    contact.state = ContactState::Alive;
                    contact.rtt = Some(rtt);
                    table.insert(contact).await;
                }
            }
        }
        DiscoveryMessage::FindNode { target } => {
            let closest = table.closest_to(&target, K).await;
            let nodes = closest.into_iter().map(|c| (c.id, c.endpoint)).collect();
            send_datagram(
                socket,
                local_id,
                from,
                DiscoveryMessage::Neighbors { nodes },
            )
            .await?;
        }
        DiscoveryMessage::Neighbors { .. } => {
            // Handled by the iterative lookup driver, which reads
            // responses through its own correlation rather than this
            // unsolicited-traffic path.
        }
    }
    Ok(())
}

/// Spawns the challenge-before-evict flow triggered when a bucket is full:
/// pings `stale` and, if it hasn't answered within `evict_timeout`, evicts
/// it and admits `newcomer` in its place. A timely PONG resolves the
/// challenge from [`handle_datagram`]'s `Pong` arm instead, leaving
/// `stale` in place.
#[allow(clippy::too_many_arguments)]
fn spawn_challenge(
    socket: Arc<UdpSocket>,
    local_id: NodeId,
    local_endpoint: Endpoint,
    table: Arc<RoutingTable>,
    pending: Arc<PendingPings>,
    stale: Contact,
    newcomer: Contact,
    evict_timeout: std::time::Duration,
) {
    tokio::spawn(async move {
        let nonce = rand::thread_rng().next_u64();
        pending.inner.lock().await.insert(
            nonce,
            PendingEntry {
                id: stale.id,
                endpoint: stale.endpoint,
                sent_at: Instant::now(),
                challenge: true,
            },
        );
        table.mark_challenge(&stale.id, nonce).await;
        let _ = send_datagram(
            &socket,
            local_id,
            stale.endpoint.udp_addr(),
            DiscoveryMessage::Ping {
                from: local_endpoint,
                to: stale.endpoint,
                timestamp: unix_now(),
                echo_nonce: nonce,
            },
        )
        .await;

        tokio::time::sleep(evict_timeout).await;
        let still_pending = pending.inner.lock().await.remove(&nonce).is_some();
        if still_pending {
            table.evict_and_insert(&stale.id, newcomer).await;
        }
    });
}

/// Re-pings a contact that is already in the table, marking it an eviction
/// candidate while the challenge is outstanding. Used by the bucket-refresh
/// task; a timely PONG resolves it back to `Alive` through
/// [`handle_datagram`]'s `Pong` arm.
pub async fn send_challenge(
    socket: &UdpSocket,
    local_id: NodeId,
    local_endpoint: Endpoint,
    table: &Arc<RoutingTable>,
    target_id: NodeId,
    to: SocketAddr,
    pending: &Arc<PendingPings>,
) -> std::io::Result<()> {
    let nonce = rand::thread_rng().next_u64();
    let target_endpoint = Endpoint {
        ip: to.ip(),
        tcp_port: to.port(),
        udp_port: to.port(),
    };
    pending.inner.lock().await.insert(
        nonce,
        PendingEntry {
            id: target_id,
            endpoint: target_endpoint,
            sent_at: Instant::now(),
            challenge: true,
        },
    );
    table.mark_challenge(&target_id, nonce).await;
    send_datagram(
        socket,
        local_id,
        to,
        DiscoveryMessage::Ping {
            from: local_endpoint,
            to: target_endpoint,
            timestamp: unix_now(),
            echo_nonce: nonce,
        },
    )
    .await
}

pub async fn send_ping(
    socket: &UdpSocket,
    local_id: NodeId,
    local_endpoint: Endpoint,
    to: SocketAddr,
    target_id: NodeId,
    pending: &Arc<PendingPings>,
) -> std::io::Result<()> {
    let nonce = rand::thread_rng().next_u64();
    let target_endpoint = Endpoint {
        ip: to.ip(),
        tcp_port: to.port(),
        udp_port: to.port(),
    };
    pending.inner.lock().await.insert(
        nonce,
        PendingEntry {
            id: target_id,
            endpoint: target_endpoint,
            sent_at: Instant::now(),
            challenge: false,
        },
    );
    send_datagram(
        socket,
        local_id,
        to,
        DiscoveryMessage::Ping {
            from: local_endpoint,
            to: target_endpoint,
            timestamp: unix_now(),
            echo_nonce: nonce,
        },
    )
    .await
}

async fn send_datagram(
    socket: &UdpSocket,
    local_id: NodeId,
    to: SocketAddr,
    message: DiscoveryMessage,
) -> std::io::Result<()> {
    let mut buf = BytesMut::with_capacity(64);
    buf.extend_from_slice(&[message.packet_type()]);
    buf.extend_from_slice(&local_id.0);
    message.encode(&mut buf);
    socket.send_to(&buf, to).await?;
    Ok(())
}
