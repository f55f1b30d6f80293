pub mod cli;

use std::sync::Arc;

use rand::RngCore;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::P2pConfig;
use crate::dns::{self, DnsError, RandomIterator, Resolver};
use crate::error::NetworkingError;
use crate::handler::{Events, NullEvents};
use crate::handshake::Identity;
use crate::kademlia::lookup::iterative_lookup;
use crate::kademlia::protocol::{self, PendingPings};
use crate::kademlia::{bind_udp, run_bucket_refresh, RoutingTable};
use crate::manager::{run_accept_loop, ChannelManager};
use crate::message::ReasonCode;
use crate::metrics::Metrics;
use crate::types::NodeRecord;

/// Installs a `tracing` subscriber honoring the `ENABLE_DETAILED_LOGGING`
/// style toggle. Library code never installs a subscriber on its own; this
/// helper exists only for the binary entry point.
pub fn init_tracing(detailed: bool) {
    let level = if detailed { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Owns every long-lived task and resource a running node needs: the
/// inbound TCP accept loop, the UDP Kademlia server and its bucket-refresh
/// ticker, and one DNS-tree refresh loop per configured tree, wired in the
/// startup order described for the orchestrator component.
pub struct Node {
    pub config: Arc<P2pConfig>,
    pub identity: Arc<Identity>,
    pub manager: Arc<ChannelManager>,
    pub routing_table: Arc<RoutingTable>,
    pub metrics: Arc<Metrics>,
    dns_iterators: Vec<Arc<RandomIterator>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    pub async fn start(
        config: P2pConfig,
        identity: Identity,
        events: Arc<dyn Events>,
    ) -> Result<Self, NetworkingError> {
        let config = Arc::new(config);
        let identity = Arc::new(identity);
        let metrics = Arc::new(Metrics::new());
        let manager = ChannelManager::new(config.clone(), identity.clone(), metrics.clone(), events);

        let tcp_listener = tokio::net::TcpListener::bind(config.tcp_listen_addr).await?;
        info!(addr = %config.tcp_listen_addr, "listening for inbound channels");

        let mut tasks = Vec::new();
        let accept_manager = manager.clone();
        tasks.push(tokio::spawn(run_accept_loop(accept_manager, tcp_listener)));

        let routing_table = Arc::new(RoutingTable::new(identity.node_id));
        let udp_socket = Arc::new(bind_udp(config.udp_listen_addr).await?);
        let pending_pings = Arc::new(PendingPings::new());
        let local_endpoint = crate::types::Endpoint {
            ip: config.tcp_listen_addr.ip(),
            tcp_port: config.tcp_listen_addr.port(),
            udp_port: config.udp_listen_addr.port(),
        };

        {
            let socket = udp_socket.clone();
            let local_id = identity.node_id;
            let table = routing_table.clone();
            let pending = pending_pings.clone();
            let evict_timeout = config.evict_timeout;
            tasks.push(tokio::spawn(protocol::run_server(
                socket,
                local_id,
                local_endpoint,
                table,
                pending,
                evict_timeout,
            )));
        }

        {
            let table = routing_table.clone();
            let socket = udp_socket.clone();
            let local_id = identity.node_id;
            let pending = pending_pings.clone();
            tasks.push(tokio::spawn(run_bucket_refresh(
                table,
                socket,
                local_id,
                local_endpoint,
                pending,
                config.bucket_refresh_interval,
            )));
        }

        {
            let table = routing_table.clone();
            let local_id = identity.node_id;
            let discovery_interval = config.discovery_interval;
            tasks.push(tokio::spawn(async move {
                run_discovery_loop(table, local_id, discovery_interval).await;
            }));
        }

        for bootstrap_addr in &config.bootstrap_nodes {
            let manager = manager.clone();
            let endpoint = crate::types::Endpoint {
                ip: bootstrap_addr.ip(),
                tcp_port: bootstrap_addr.port(),
                udp_port: bootstrap_addr.port(),
            };
            let bootstrap_ip = endpoint.ip;
            tasks.push(tokio::spawn(async move {
                if let Err(err) = manager.dial(endpoint, None).await {
                    warn!(ip = %bootstrap_ip, error = %err, "failed to dial bootstrap node");
                }
            }));
        }

        let mut dns_iterators = Vec::new();
        for tree_url in &config.dns_tree_urls {
            match spawn_dns_refresh(tree_url) {
                Ok((iterator, handle)) => {
                    dns_iterators.push(iterator);
                    tasks.push(handle);
                }
                Err(err) => warn!(tree_url, error = %err, "skipping malformed dns-tree url"),
            }
        }

        {
            let disconnect_manager = manager.clone();
            tasks.push(tokio::spawn(
                disconnect_manager.run_disconnection_policy(),
            ));
        }

        let node = Self {
            config,
            identity,
            manager,
            routing_table,
            metrics,
            dns_iterators,
            tasks,
        };

        let dial_loop_handle = tokio::spawn(run_dial_loop(
            node.manager.clone(),
            node.routing_table.clone(),
            node.dns_iterators.clone(),
            node.config.clone(),
            node.identity.clone(),
        ));

        Ok(node.with_task(dial_loop_handle))
    }

    fn with_task(mut self, task: JoinHandle<()>) -> Self {
        self.tasks.push(task);
        self
    }

    /// Draws one random node record from every configured DNS tree's
    /// current snapshot, for the orchestrator to feed into the dial pool
    /// alongside Kademlia-discovered and statically configured peers.
    pub async fn random_dns_peer(&self) -> Option<NodeRecord> {
        for iterator in &self.dns_iterators {
            if let Some(record) = iterator.next().await {
                return Some(record);
            }
        }
        None
    }

    /// Requests a graceful disconnect from every channel and aborts every
    /// background task, in the reverse of startup order.
    pub async fn shutdown(self) {
        self.manager.close_all(ReasonCode::ClientQuitting).await;
        for task in self.tasks {
            task.abort();
        }
        info!("node shut down");
    }
}

/// A `node-tree://<base64-pubkey>@<domain>` URL naming a DNS tree to sync
/// peers from, paired with the public key expected to sign its root.
fn spawn_dns_refresh(
    tree_url: &str,
) -> Result<(Arc<RandomIterator>, JoinHandle<()>), DnsError> {
    let (public_key, domain) = parse_tree_url(tree_url)?;
    let resolver: Arc<dyn Resolver> = Arc::new(
        dns::HickoryDnsResolver::from_system_config()
            .map_err(|e| DnsError::Lookup(e.to_string()))?,
    );
    let iterator = RandomIterator::new();
    let handle = tokio::spawn(dns::iterator::run_refresh_loop(
        iterator.clone(),
        resolver,
        domain,
        public_key,
        std::time::Duration::from_secs(600),
    ));
    Ok((iterator, handle))
}

fn parse_tree_url(url: &str) -> Result<(secp256k1::PublicKey, String), DnsError> {
    let rest = url
        .strip_prefix("tree://")
        .ok_or_else(|| DnsError::UnexpectedEntryKind(url.to_string()))?;
    let (key_part, domain) = rest
        .split_once('@')
        .ok_or_else(|| DnsError::UnexpectedEntryKind(url.to_string()))?;
    let key_bytes = crate::utils::base32_decode(key_part)
        .ok_or_else(|| DnsError::UnexpectedEntryKind(url.to_string()))?;
    let public_key = secp256k1::PublicKey::from_slice(&key_bytes)
        .map_err(|_| DnsError::UnexpectedEntryKind(url.to_string()))?;
    Ok((public_key, domain.to_string()))
}

/// Periodically tops up outbound connections toward `min_connections`,
/// drawing candidates from the Kademlia routing table, each configured
/// DNS tree's random iterator, and the static bootstrap list, in that
/// order of preference, skipping anything the manager already considers
/// connected, banned or recently dialed.
async fn run_dial_loop(
    manager: Arc<ChannelManager>,
    routing_table: Arc<RoutingTable>,
    dns_iterators: Vec<Arc<RandomIterator>>,
    config: Arc<P2pConfig>,
    identity: Arc<Identity>,
) {
    let mut ticker = tokio::time::interval(config.dial_loop_interval);
    loop {
        ticker.tick().await;

        let active = manager.active_channel_count().await;
        if active >= config.min_connections {
            continue;
        }
        let wanted = config.min_connections - active;

        let mut candidates: Vec<(crate::types::Endpoint, Option<crate::types::NodeId>)> = Vec::new();
        for contact in routing_table.closest_to(&identity.node_id, wanted * 4).await {
            candidates.push((contact.endpoint, Some(contact.id)));
        }
        for iterator in &dns_iterators {
            if candidates.len() >= wanted * 4 {
                break;
            }
            if let Some(record) = iterator.next().await {
                candidates.push((record.endpoint, Some(record.id)));
            }
        }
        for bootstrap_addr in &config.bootstrap_nodes {
            candidates.push((
                crate::types::Endpoint {
                    ip: bootstrap_addr.ip(),
                    tcp_port: bootstrap_addr.port(),
                    udp_port: bootstrap_addr.port(),
                },
                None,
            ));
        }

        let local_tcp_port = config.tcp_listen_addr.port();
        let mut dialed = 0;
        for (endpoint, expected_id) in candidates {
            if dialed >= wanted {
                break;
            }
            let addr = endpoint.tcp_addr();
            if manager.is_dial_candidate_skippable(addr, local_tcp_port).await {
                continue;
            }
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Err(err) = manager.dial(endpoint, expected_id).await {
                    debug_dial_failure(addr, err);
                }
            });
            dialed += 1;
        }
    }
}

fn debug_dial_failure(addr: std::net::SocketAddr, err: crate::manager::ManagerError) {
    warn!(%addr, error = %err, "dial loop candidate failed");
}

/// Periodically runs a bounded iterative `FIND_NODE` lookup against a
/// random target, the DHT's self-driven discovery task: each round
/// surfaces contacts the passive PING/PONG and bootstrap paths alone would
/// miss, and folds them into the routing table as a side effect of the
/// lookup's own `table.insert` calls on every response.
async fn run_discovery_loop(table: Arc<RoutingTable>, local_id: crate::types::NodeId, interval: std::time::Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let mut target_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut target_bytes);
        let target = crate::types::NodeId(target_bytes);
        match iterative_lookup(local_id, target, &table).await {
            Ok(found) => {
                for contact in found {
                    table.insert(contact).await;
                }
            }
            Err(err) => warn!(error = %err, "discovery lookup failed"),
        }
    }
}

pub fn default_events() -> Arc<dyn Events> {
    Arc::new(NullEvents)
}
