use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// Runtime configuration shared by every component, constructed once at
/// startup and handed to constructors by reference or cheap clone, in place
/// of the scattered constants a first pass at this would reach for.
#[derive(Debug, Clone)]
pub struct P2pConfig {
    pub tcp_listen_addr: SocketAddr,
    pub udp_listen_addr: SocketAddr,

    /// Announced in every HELLO/WORLD and checked against the peer's own
    /// announcement; a mismatch fails the handshake with `BadNetwork`.
    pub network_id: u8,
    /// Announced alongside `network_id`; a mismatch fails the handshake
    /// with `BadNetworkVersion`.
    pub network_version: u16,

    /// Maximum number of simultaneously active channels.
    pub max_channels: usize,
    /// Maximum inbound channels accepted before outbound dials are favored.
    pub max_inbound_channels: usize,
    /// Floor the dial loop tries to keep outbound connections above.
    pub min_connections: usize,
    /// Maximum channels sharing one remote IP, trust peers exempt.
    pub max_connections_with_same_ip: usize,
    /// Maximum concurrent outbound dial attempts in flight.
    pub max_dial_pool: usize,

    pub ping_interval: Duration,
    pub idle_timeout: Duration,
    /// Overall handshake deadline (INIT through HELLO/WORLD); a handshake
    /// that hasn't completed within this window fails with
    /// `HandshakeError::Timeout`.
    pub handshake_timeout: Duration,
    /// Freshness window checked against `INIT`'s timestamp
    /// (`now - timestamp <= net_handshake_expiry`); replay of a stale
    /// `INIT` fails the handshake before any signature is even read.
    pub net_handshake_expiry: Duration,
    pub dial_timeout: Duration,

    pub send_queue_capacity: usize,
    /// Upper bound on a single wire frame's total length; threaded into
    /// every `FrameCodec` this node builds.
    pub max_frame_len: u32,

    /// Base ban duration; doubled per repeated offense up to `max_ban_duration`.
    pub base_ban_duration: Duration,
    pub max_ban_duration: Duration,

    pub bootstrap_nodes: Vec<SocketAddr>,
    pub dns_tree_urls: Vec<String>,

    /// How often the DHT discovery task picks a random target and runs a
    /// bounded iterative `FIND_NODE` lookup against it.
    pub discovery_interval: Duration,
    /// How often each bucket is force-refreshed with a lookup for a random
    /// id in its range, to keep stale buckets from going undiscovered.
    pub bucket_refresh_interval: Duration,
    /// How long a node may go unrevalidated before the revalidation task
    /// pings it again.
    pub revalidation_interval: Duration,
    /// Consecutive challenge-ping timeouts before a contact is marked
    /// `Dead` and evicted.
    pub revalidation_max_failures: u32,
    /// How long the routing table waits for an evict-candidate's challenge
    /// ping to be answered before declaring it `Dead` and admitting the
    /// newcomer that triggered the challenge.
    pub evict_timeout: Duration,

    /// IPs exempt from admission limits and from the disconnection
    /// policy's random eviction, configured out-of-band from discovery.
    pub trust_peers: Vec<IpAddr>,

    /// How often the dial loop checks whether it should draw fresh
    /// candidates to top up `min_connections`.
    pub dial_loop_interval: Duration,
    /// TTL of the recent-connections cache the dial loop consults to
    /// avoid repeatedly redialing an address it just tried.
    pub recent_dial_ttl: Duration,
    /// How often the disconnection policy considers evicting a random
    /// non-trust peer to make room for churn, when `max_channels` is
    /// reached.
    pub disconnect_policy_interval: Duration,
    pub enable_disconnect_policy: bool,

    /// Mirrors `ENABLE_DETAILED_LOGGING`: toggles debug-level tracing for
    /// harnesses instead of the default info level.
    pub detailed_logging: bool,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            tcp_listen_addr: "0.0.0.0:8001".parse().expect("valid default addr"),
            udp_listen_addr: "0.0.0.0:8001".parse().expect("valid default addr"),
            network_id: 1,
            network_version: 1,
            max_channels: 128,
            max_inbound_channels: 96,
            min_connections: 8,
            max_connections_with_same_ip: 4,
            max_dial_pool: 16,
            ping_interval: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(5),
            net_handshake_expiry: Duration::from_secs(5),
            dial_timeout: Duration::from_secs(5),
            send_queue_capacity: 256,
            max_frame_len: crate::codec::DEFAULT_MAX_FRAME_LEN,
            base_ban_duration: Duration::from_secs(60 * 10),
            max_ban_duration: Duration::from_secs(60 * 60 * 24 * 30),
            bootstrap_nodes: Vec::new(),
            dns_tree_urls: Vec::new(),
            discovery_interval: Duration::from_millis(7200),
            bucket_refresh_interval: Duration::from_secs(7200),
            revalidation_interval: Duration::from_secs(30),
            revalidation_max_failures: 3,
            evict_timeout: Duration::from_secs(5),
            trust_peers: Vec::new(),
            dial_loop_interval: Duration::from_secs(5),
            recent_dial_ttl: Duration::from_secs(30),
            disconnect_policy_interval: Duration::from_secs(30),
            enable_disconnect_policy: true,
            detailed_logging: false,
        }
    }
}
