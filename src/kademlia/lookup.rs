use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::message::discovery::DiscoveryMessage;
use crate::types::{Endpoint, NodeId};

use super::{Contact, RoutingTable, K};

const ALPHA: usize = 3;
const ROUND_TIMEOUT: Duration = Duration::from_millis(500);
const MAX_ROUNDS: usize = 8;

/// Runs an iterative FIND_NODE lookup for `target` starting from the
/// closest contacts already known locally, querying `ALPHA` candidates per
/// round and folding newly discovered contacts into the frontier until a
/// round yields nothing closer than what is already held, as described for
/// the DHT's iterative lookup.
///
/// This uses a private, short-lived socket bound for the lookup's
/// duration rather than the node's long-lived discovery socket, so
/// response correlation does not have to race the main server's receive
/// loop for the same port.
pub async fn iterative_lookup(
    local_id: NodeId,
    target: NodeId,
    table: &Arc<RoutingTable>,
) -> std::io::Result<Vec<Contact>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;

    let mut frontier = table.closest_to(&target, K).await;
    let mut queried: HashSet<NodeId> = HashSet::new();

    for _ in 0..MAX_ROUNDS {
        let candidates: Vec<Contact> = frontier
            .iter()
            .filter(|c| !queried.contains(&c.id))
            .take(ALPHA)
            .cloned()
            .collect();
        if candidates.is_empty() {
            break;
        }

        let mut discovered_any = false;
        for candidate in &candidates {
            queried.insert(candidate.id);
            let Some(nodes) =
                query_one(&socket, local_id, target, candidate.endpoint.udp_addr()).await
            else {
                continue;
            };
            for (id, endpoint) in nodes {
                if id != local_id && !frontier.iter().any(|c| c.id == id) {
                    discovered_any = true;
                    frontier.push(Contact::new(id, endpoint, std::time::SystemTime::now()));
                }
            }
        }

        frontier.sort_by_key(|c| c.id.distance(&target));
        frontier.truncate(K);

        if !discovered_any {
            break;
        }
    }

    Ok(frontier)
}

async fn query_one(
    socket: &UdpSocket,
    local_id: NodeId,
    target: NodeId,
    to: SocketAddr,
) -> Option<Vec<(NodeId, Endpoint)>> {
    let mut buf = BytesMut::with_capacity(64);
    let message = DiscoveryMessage::FindNode { target };
    buf.extend_from_slice(&[message.packet_type()]);
    buf.extend_from_slice(&local_id.0);
    message.encode(&mut buf);
    socket.send_to(&buf, to).await.ok()?;

    let mut recv_buf = vec![0u8; 1280];
    let result = timeout(ROUND_TIMEOUT, socket.recv_from(&mut recv_buf)).await;
    let (len, from) = result.ok()?.ok()?;
    if from != to || len < 33 {
        return None;
    }
    match DiscoveryMessage::decode(recv_buf[0], &recv_buf[33..len]) {
        Ok(DiscoveryMessage::Neighbors { nodes }) => Some(nodes),
        _ => None,
    }
}
