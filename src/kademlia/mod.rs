pub mod lookup;
pub mod protocol;

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec::CodecError;
use crate::types::{Endpoint, NodeId};

pub const BUCKET_COUNT: usize = 256;
pub const K: usize = 16;

#[derive(Debug, Error)]
pub enum KademliaError {
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("lookup produced no candidates")]
    EmptyLookup,
}

/// Where a contact sits in the challenge/eviction lifecycle. A contact
/// learned passively (inbound PING, or as a neighbor in a FIND_NODE
/// response) starts `Discovered` and is only promoted to `Alive` once a
/// PING/PONG round-trip with it has actually completed; a bucket-full
/// insert pushes the bucket's stale front entry to `EvictCandidate` while
/// its challenge ping is outstanding, and `Dead` once that challenge times
/// out or fails `revalidation_max_failures` times in a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactState {
    Discovered,
    Alive,
    EvictCandidate,
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: NodeId,
    pub endpoint: Endpoint,
    pub last_seen: SystemTime,
    pub state: ContactState,
    /// Nonce of the challenge PING outstanding against this contact, if
    /// any; set when it is pushed to `EvictCandidate` or revalidated, and
    /// cleared on a matching PONG.
    pub pending_challenge_nonce: Option<u64>,
    /// Round-trip time of the last PING/PONG exchange that confirmed this
    /// contact, if one has completed.
    pub rtt: Option<Duration>,
}

impl Contact {
    pub fn new(id: NodeId, endpoint: Endpoint, last_seen: SystemTime) -> Self {
        Self {
            id,
            endpoint,
            last_seen,
            state: ContactState::Discovered,
            pending_challenge_nonce: None,
            rtt: None,
        }
    }
}

/// A single k-bucket: up to `K` contacts ordered least-recently-seen
/// first, so the front is always the next revalidation candidate, matching
/// the classic Kademlia eviction policy (challenge the oldest contact
/// before admitting a new one when the bucket is full).
#[derive(Default)]
struct Bucket {
    contacts: VecDeque<Contact>,
}

impl Bucket {
    fn touch_or_insert(&mut self, mut contact: Contact) -> Option<Contact> {
        if let Some(pos) = self.contacts.iter().position(|c| c.id == contact.id) {
            let existing = self.contacts.remove(pos).expect("position exists");
            // A passive touch (e.g. this id turning up as a FIND_NODE
            // neighbor) never demotes an already-verified contact.
            if existing.state == ContactState::Alive && contact.state == ContactState::Discovered {
                contact.state = ContactState::Alive;
            }
            if contact.rtt.is_none() {
                contact.rtt = existing.rtt;
            }
            self.contacts.push_back(contact);
            return None;
        }
        if self.contacts.len() < K {
            self.contacts.push_back(contact);
            return None;
        }
        // Bucket full: the caller must challenge the least-recently-seen
        // contact (the front) before this one can be admitted.
        Some(self.contacts.front().cloned().expect("bucket is full"))
    }

    fn remove(&mut self, id: &NodeId) {
        self.contacts.retain(|c| c.id != *id);
    }

    fn mark_challenge(&mut self, id: &NodeId, nonce: u64) {
        if let Some(contact) = self.contacts.iter_mut().find(|c| c.id == *id) {
            contact.state = ContactState::EvictCandidate;
            contact.pending_challenge_nonce = Some(nonce);
        }
    }

    /// Resolves an outstanding challenge on `id` matching `nonce`: marks it
    /// `Alive`, clears the challenge, refreshes `last_seen` and moves it to
    /// the back of the bucket. Returns whether a match was found.
    fn resolve_challenge(&mut self, id: &NodeId, nonce: u64, rtt: Duration) -> bool {
        let Some(pos) = self.contacts.iter().position(|c| c.id == *id) else {
            return false;
        };
        if self.contacts[pos].pending_challenge_nonce != Some(nonce) {
            return false;
        }
        let mut contact = self.contacts.remove(pos).expect("position exists");
        contact.state = ContactState::Alive;
        contact.pending_challenge_nonce = None;
        contact.last_seen = SystemTime::now();
        contact.rtt = Some(rtt);
        self.contacts.push_back(contact);
        true
    }
}

/// The node's Kademlia routing table: 256 buckets keyed by XOR-distance
/// bit-length from the local node id, as described for the DHT component.
pub struct RoutingTable {
    local_id: NodeId,
    buckets: Vec<Mutex<Bucket>>,
}

impl RoutingTable {
    pub fn new(local_id: NodeId) -> Self {
        let mut buckets = Vec::with_capacity(BUCKET_COUNT);
        for _ in 0..BUCKET_COUNT {
            buckets.push(Mutex::new(Bucket::default()));
        }
        Self { local_id, buckets }
    }

    fn bucket_for(&self, id: &NodeId) -> Option<usize> {
        self.local_id.bucket_index(id)
    }

    /// Inserts or refreshes a contact. Returns `Some(contact)` naming the
    /// stale contact that must be revalidated before `new_contact` can be
    /// admitted, if the target bucket is already full.
    pub async fn insert(&self, new_contact: Contact) -> Option<Contact> {
        let Some(index) = self.bucket_for(&new_contact.id) else {
            return None;
        };
        let mut bucket = self.buckets[index].lock().await;
        bucket.touch_or_insert(new_contact)
    }

    pub async fn remove(&self, id: &NodeId) {
        if let Some(index) = self.bucket_for(id) {
            self.buckets[index].lock().await.remove(id);
        }
    }

    /// Marks `id` as an eviction candidate with a challenge ping's `nonce`
    /// outstanding against it, per [`Bucket::touch_or_insert`]'s stale
    /// return.
    pub async fn mark_challenge(&self, id: &NodeId, nonce: u64) {
        if let Some(index) = self.bucket_for(id) {
            self.buckets[index].lock().await.mark_challenge(id, nonce);
        }
    }

    /// Records a PONG answering a challenge ping: promotes the contact back
    /// to `Alive` if `nonce` matches what's outstanding against it.
    pub async fn resolve_challenge(&self, id: &NodeId, nonce: u64, rtt: Duration) -> bool {
        let Some(index) = self.bucket_for(id) else {
            return false;
        };
        self.buckets[index]
            .lock()
            .await
            .resolve_challenge(id, nonce, rtt)
    }

    /// Evicts `evict_id` (a challenge candidate that failed to respond) and
    /// admits `newcomer` in its place.
    pub async fn evict_and_insert(&self, evict_id: &NodeId, newcomer: Contact) {
        let Some(index) = self.bucket_for(evict_id) else {
            return;
        };
        let mut bucket = self.buckets[index].lock().await;
        bucket.remove(evict_id);
        bucket.touch_or_insert(newcomer);
    }

    /// The least-recently-seen contact in each non-empty bucket, the
    /// revalidation task's per-bucket refresh candidate.
    pub async fn stalest_per_bucket(&self) -> Vec<Contact> {
        let mut stalest = Vec::new();
        for bucket in &self.buckets {
            if let Some(contact) = bucket.lock().await.contacts.front() {
                stalest.push(contact.clone());
            }
        }
        stalest
    }

    /// Returns up to `K` contacts closest to `target`, scanning outward
    /// from the exact bucket as plain Kademlia lookup does.
    pub async fn closest_to(&self, target: &NodeId, count: usize) -> Vec<Contact> {
        let mut all = Vec::new();
        for bucket in &self.buckets {
            all.extend(bucket.lock().await.contacts.iter().cloned());
        }
        all.sort_by_key(|c| c.id.distance(target));
        all.truncate(count);
        all
    }

    pub async fn len(&self) -> usize {
        let mut total = 0;
        for bucket in &self.buckets {
            total += bucket.lock().await.contacts.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Periodically revisits every non-empty bucket and re-pings its
/// least-recently-seen contact, the routing table's long-cycle challenge
/// pass independent of the shorter-cycle revalidation task. A challenge
/// already outstanding on a contact (from revalidation) is left alone
/// rather than double-pinged.
pub async fn run_bucket_refresh(
    table: std::sync::Arc<RoutingTable>,
    socket: std::sync::Arc<UdpSocket>,
    local_id: NodeId,
    local_endpoint: Endpoint,
    pending: std::sync::Arc<protocol::PendingPings>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let stalest = table.stalest_per_bucket().await;
        debug!(buckets_refreshed = stalest.len(), "bucket refresh tick");
        for contact in stalest {
            if contact.pending_challenge_nonce.is_some() {
                continue;
            }
            if let Err(err) = protocol::send_challenge(
                &socket,
                local_id,
                local_endpoint,
                &table,
                contact.id,
                contact.endpoint.udp_addr(),
                &pending,
            )
            .await
            {
                debug!(peer = %contact.id, error = %err, "bucket refresh ping failed");
            }
        }
    }
}

pub async fn bind_udp(addr: SocketAddr) -> std::io::Result<UdpSocket> {
    UdpSocket::bind(addr).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contact(byte: u8) -> Contact {
        Contact::new(
            NodeId([byte; 32]),
            Endpoint {
                ip: "127.0.0.1".parse().unwrap(),
                tcp_port: 8001,
                udp_port: 8001,
            },
            SystemTime::now(),
        )
    }

    #[tokio::test]
    async fn insert_and_closest_to_round_trip() {
        let table = RoutingTable::new(NodeId([0u8; 32]));
        for byte in 1..=5u8 {
            assert!(table.insert(contact(byte)).await.is_none());
        }
        assert_eq!(table.len().await, 5);

        let closest = table.closest_to(&NodeId([1u8; 32]), 3).await;
        assert_eq!(closest[0].id, NodeId([1u8; 32]));
    }

    #[tokio::test]
    async fn full_bucket_reports_stale_contact_instead_of_evicting() {
        let table = RoutingTable::new(NodeId([0u8; 32]));
        // Setting the top bit of the last byte fixes leading_zeros at 0 for
        // all of these ids, so they all land in the same bucket regardless
        // of their remaining low bits.
        for i in 0..K {
            let mut id = [0u8; 32];
            id[31] = 0x80 | i as u8;
            let stale = table
                .insert(Contact::new(NodeId(id), contact(1).endpoint, SystemTime::now()))
                .await;
            assert!(stale.is_none());
        }

        let mut overflow_id = [0u8; 32];
        overflow_id[31] = 0x80 | K as u8;
        let stale = table
            .insert(Contact::new(
                NodeId(overflow_id),
                contact(1).endpoint,
                SystemTime::now(),
            ))
            .await;
        assert!(stale.is_some());
        assert_eq!(table.len().await, K);
    }

    #[tokio::test]
    async fn remove_drops_a_contact() {
        let table = RoutingTable::new(NodeId([0u8; 32]));
        table.insert(contact(9)).await;
        table.remove(&NodeId([9u8; 32])).await;
        assert_eq!(table.len().await, 0);
    }

    #[tokio::test]
    async fn resolved_challenge_promotes_contact_to_alive() {
        let table = RoutingTable::new(NodeId([0u8; 32]));
        table.insert(contact(9)).await;
        table.mark_challenge(&NodeId([9u8; 32]), 42).await;

        assert!(!table.resolve_challenge(&NodeId([9u8; 32]), 41, Duration::from_millis(5)).await);
        assert!(table.resolve_challenge(&NodeId([9u8; 32]), 42, Duration::from_millis(5)).await);

        let closest = table.closest_to(&NodeId([9u8; 32]), 1).await;
        assert_eq!(closest[0].state, ContactState::Alive);
        assert!(closest[0].rtt.is_some());
    }

    #[tokio::test]
    async fn evict_and_insert_replaces_the_stale_contact() {
        let table = RoutingTable::new(NodeId([0u8; 32]));
        table.insert(contact(9)).await;
        table.evict_and_insert(&NodeId([9u8; 32]), contact(10)).await;

        assert_eq!(table.len().await, 1);
        let closest = table.closest_to(&NodeId([10u8; 32]), 1).await;
        assert_eq!(closest[0].id, NodeId([10u8; 32]));
    }
}
