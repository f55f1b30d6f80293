pub mod ban;
pub mod dial;

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::SinkExt;
use rand::seq::IteratorRandom;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::channel::{self, ChannelHandle, Direction};
use crate::codec::FrameCodec;
use crate::config::P2pConfig;
use crate::handler::Events;
use crate::handshake::{self, Identity};
use crate::message::{Message, ReasonCode};
use crate::metrics::Metrics;
use crate::types::{Endpoint, NodeId};

use ban::BanStore;
use dial::DialPool;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("peer ip is currently banned")]
    Banned,
    #[error("a channel with this node id already exists")]
    DuplicatePeer,
    #[error("remote address matches our own node id")]
    SelfConnect,
    #[error("channel table is at capacity")]
    AtCapacity,
    #[error("inbound channel slots are at capacity")]
    InboundAtCapacity,
    #[error("too many channels already share this remote ip")]
    SameIpLimit,
    #[error("handshake failed: {0}")]
    Handshake(#[from] handshake::HandshakeError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl ManagerError {
    /// The DISCONNECT reason a rejected peer should be told, matching the
    /// admission policy's reason catalog one-to-one; `None` for errors that
    /// never reach the point of writing to the socket.
    pub fn reason_code(&self) -> Option<ReasonCode> {
        match self {
            ManagerError::Banned => Some(ReasonCode::Banned),
            ManagerError::DuplicatePeer => Some(ReasonCode::AlreadyConnected),
            ManagerError::SelfConnect => Some(ReasonCode::IdentityIsSelf),
            ManagerError::AtCapacity | ManagerError::InboundAtCapacity => {
                Some(ReasonCode::TooManyPeers)
            }
            ManagerError::SameIpLimit => Some(ReasonCode::SameIpLimit),
            ManagerError::Handshake(_) | ManagerError::Io(_) => None,
        }
    }
}

struct Tables {
    channels: HashMap<SocketAddr, ChannelHandle>,
    node_index: HashMap<NodeId, SocketAddr>,
}

/// Outcome of running the admission algorithm against a freshly
/// handshaked peer.
enum Admission {
    Admit,
    /// Admit the newcomer, but first close the existing channel at this
    /// address because it lost the earlier-`start_time` tiebreak.
    AdmitReplacing(SocketAddr),
    Reject(ManagerError),
}

/// Owns the channel table, ban store and dial pool, and implements the
/// single consolidated admission algorithm this crate uses in place of the
/// two historical variants: reject banned IPs, reject duplicate node
/// identities (keeping whichever channel started first), then apply
/// capacity limits that reserve headroom for outbound dials even under
/// heavy inbound pressure.
pub struct ChannelManager {
    config: Arc<P2pConfig>,
    identity: Arc<Identity>,
    tables: Mutex<Tables>,
    ban_store: Mutex<BanStore>,
    dial_pool: DialPool,
    recent_dials: Mutex<HashMap<SocketAddr, Instant>>,
    metrics: Arc<Metrics>,
    events: Arc<dyn Events>,
    shutting_down: AtomicBool,
}

impl ChannelManager {
    pub fn new(
        config: Arc<P2pConfig>,
        identity: Arc<Identity>,
        metrics: Arc<Metrics>,
        events: Arc<dyn Events>,
    ) -> Arc<Self> {
        let ban_store = BanStore::new(config.base_ban_duration, config.max_ban_duration);
        let dial_pool = DialPool::new(config.max_dial_pool, config.dial_timeout);
        Arc::new(Self {
            config,
            identity,
            tables: Mutex::new(Tables {
                channels: HashMap::new(),
                node_index: HashMap::new(),
            }),
            ban_store: Mutex::new(ban_store),
            dial_pool,
            recent_dials: Mutex::new(HashMap::new()),
            metrics,
            events,
            shutting_down: AtomicBool::new(false),
        })
    }

    pub async fn active_channel_count(&self) -> usize {
        self.tables.lock().await.channels.len()
    }

    pub async fn is_connected(&self, node_id: &NodeId) -> bool {
        self.tables.lock().await.node_index.contains_key(node_id)
    }

    pub fn is_trust_peer(&self, ip: &IpAddr) -> bool {
        self.config.trust_peers.contains(ip)
    }

    /// Admin surface mirroring the ban store's whitelist/unban operations,
    /// named for the channel manager's ban machinery.
    pub async fn ban_node(&self, ip: IpAddr, duration: Duration, reason: ReasonCode) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        if self.is_trust_peer(&ip) {
            return;
        }
        self.ban_store.lock().await.ban(ip, duration, reason);
        self.metrics.banned_peers.inc();
        self.metrics.record_offense(reason);
        let handles: Vec<ChannelHandle> = self
            .tables
            .lock()
            .await
            .channels
            .values()
            .filter(|c| c.remote_addr.ip() == ip)
            .cloned()
            .collect();
        for handle in handles {
            handle.close(reason).await;
        }
    }

    pub async fn unban_node(&self, ip: IpAddr) {
        self.ban_store.lock().await.unban(ip);
    }

    pub async fn add_to_whitelist(&self, ip: IpAddr) {
        self.ban_store.lock().await.whitelist(ip);
    }

    pub async fn remove_from_whitelist(&self, ip: IpAddr) {
        self.ban_store.lock().await.unwhitelist(ip);
    }

    pub async fn is_banned(&self, ip: &IpAddr) -> bool {
        self.ban_store.lock().await.is_banned(ip)
    }

    /// Total punishable offenses recorded against `ip`, manual bans and
    /// automatic protocol-violation bans alike.
    pub async fn offense_count(&self, ip: &IpAddr) -> u32 {
        self.ban_store.lock().await.offense_count(ip)
    }

    /// Whether `addr` was dialed, successfully or not, within the last
    /// `recent_dial_ttl`; consulted by the dial loop so a burst of
    /// candidates sharing an address doesn't open redundant sockets.
    pub async fn recently_dialed(&self, addr: SocketAddr) -> bool {
        let mut recent = self.recent_dials.lock().await;
        let ttl = self.config.recent_dial_ttl;
        recent.retain(|_, at| at.elapsed() < ttl);
        recent.contains_key(&addr)
    }

    async fn record_dial_attempt(&self, addr: SocketAddr) {
        self.recent_dials.lock().await.insert(addr, Instant::now());
    }

    /// Handshake failure semantics: any invalid field or timeout bans the
    /// originating IP for the reason's default duration, a bare transport
    /// error does not. Reuses the ban store's graduated doubling schedule
    /// rather than a flat penalty, same as [`Self::ban_node`].
    async fn record_handshake_failure(&self, ip: IpAddr, err: &handshake::HandshakeError) {
        if self.shutting_down.load(Ordering::SeqCst) || self.is_trust_peer(&ip) || !err.should_ban() {
            return;
        }
        let reason = err.reason_code();
        let mut ban_store = self.ban_store.lock().await;
        let base_duration = self.config.base_ban_duration;
        ban_store.ban(ip, base_duration, reason);
        drop(ban_store);
        self.metrics.banned_peers.inc();
        self.metrics.record_offense(reason);
        warn!(%ip, ?reason, "banned peer after handshake failure");
    }

    /// Whether `addr` is already connected, exactly or (on loopback) by
    /// the same IP with a known node id, used by the dial loop to skip
    /// candidates that would just be rejected by admission anyway.
    pub async fn is_dial_candidate_skippable(&self, addr: SocketAddr, local_tcp_port: u16) -> bool {
        if addr.ip().is_loopback() && addr.port() == local_tcp_port {
            return true;
        }
        if self.is_banned(&addr.ip()).await {
            return true;
        }
        if self.recently_dialed(addr).await {
            return true;
        }
        let tables = self.tables.lock().await;
        tables.channels.contains_key(&addr)
    }

    async fn evaluate_admission(
        &self,
        addr: SocketAddr,
        node_id: NodeId,
        direction: Direction,
        start_time: Instant,
    ) -> Admission {
        if node_id == self.identity.node_id {
            return Admission::Reject(ManagerError::SelfConnect);
        }
        if !self.is_trust_peer(&addr.ip()) && self.ban_store.lock().await.is_banned(&addr.ip()) {
            return Admission::Reject(ManagerError::Banned);
        }

        let tables = self.tables.lock().await;

        if let Some(existing_addr) = tables.node_index.get(&node_id) {
            let existing = tables
                .channels
                .get(existing_addr)
                .expect("node_index entry always has a matching channel");
            return if start_time < existing.start_time {
                Admission::AdmitReplacing(*existing_addr)
            } else {
                Admission::Reject(ManagerError::DuplicatePeer)
            };
        }

        if tables.channels.len() >= self.config.max_channels {
            return Admission::Reject(ManagerError::AtCapacity);
        }

        if direction == Direction::Inbound {
            let inbound_count = tables
                .channels
                .values()
                .filter(|c| c.direction == Direction::Inbound)
                .count();
            if inbound_count >= self.config.max_inbound_channels {
                return Admission::Reject(ManagerError::InboundAtCapacity);
            }
        }

        if !self.is_trust_peer(&addr.ip()) {
            let same_ip_count = tables
                .channels
                .values()
                .filter(|c| c.remote_addr.ip() == addr.ip())
                .count();
            if same_ip_count >= self.config.max_connections_with_same_ip {
                return Admission::Reject(ManagerError::SameIpLimit);
            }
        }

        Admission::Admit
    }

    async fn register(self: &Arc<Self>, handle: ChannelHandle) {
        let mut tables = self.tables.lock().await;
        tables.node_index.insert(handle.node_id, handle.remote_addr);
        tables.channels.insert(handle.remote_addr, handle);
        self.refresh_channel_metrics(&tables);
    }

    fn refresh_channel_metrics(&self, tables: &Tables) {
        self.metrics.active_channels.set(tables.channels.len() as i64);
        self.metrics.inbound_channels.set(
            tables
                .channels
                .values()
                .filter(|c| c.direction == Direction::Inbound)
                .count() as i64,
        );
        self.metrics.outbound_channels.set(
            tables
                .channels
                .values()
                .filter(|c| c.direction == Direction::Outbound)
                .count() as i64,
        );
    }

    async fn on_channel_closed(self: Arc<Self>, addr: SocketAddr, node_id: NodeId, reason: ReasonCode) {
        {
            let mut tables = self.tables.lock().await;
            // A replaced duplicate's close races the winner's registration;
            // only drop the node index entry if it still points at this
            // address, so the winner's entry survives.
            if tables.node_index.get(&node_id) == Some(&addr) {
                tables.node_index.remove(&node_id);
            }
            tables.channels.remove(&addr);
            self.refresh_channel_metrics(&tables);
        }
        if reason.is_punishable() && !self.shutting_down.load(Ordering::SeqCst) {
            self.ban_store.lock().await.record_offense(addr.ip(), reason);
            self.metrics.banned_peers.inc();
            self.metrics.record_offense(reason);
        }
        self.events.on_disconnect(node_id, reason).await;
        info!(%node_id, ?reason, "channel closed");
    }

    /// Accepts and admits a single inbound TCP connection, performing the
    /// handshake before the admission check can be fully evaluated (the
    /// peer's node id is only known after the handshake completes).
    pub async fn handle_inbound(self: &Arc<Self>, stream: TcpStream, remote_addr: SocketAddr) {
        if !self.is_trust_peer(&remote_addr.ip()) && self.ban_store.lock().await.is_banned(&remote_addr.ip()) {
            return;
        }
        let manager = self.clone();
        tokio::spawn(async move {
            if let Err(err) = manager.accept_inbound(stream, remote_addr).await {
                warn!(%remote_addr, error = %err, "inbound handshake failed");
            }
        });
    }

    async fn accept_inbound(
        self: Arc<Self>,
        mut stream: TcpStream,
        remote_addr: SocketAddr,
    ) -> Result<(), ManagerError> {
        let start_time = Instant::now();
        let local_endpoint = local_endpoint(&self.config);
        let established = match handshake::perform_inbound(
            &mut stream,
            &self.identity,
            local_endpoint,
            "xdagx-node",
            self.config.network_id,
            self.config.network_version,
            self.config.handshake_timeout,
            self.config.net_handshake_expiry,
        )
        .await
        {
            Ok(established) => established,
            Err(err) => {
                self.record_handshake_failure(remote_addr.ip(), &err).await;
                return Err(ManagerError::Handshake(err));
            }
        };

        self.admit_and_spawn(
            stream,
            remote_addr,
            established.node_id,
            established.public_key,
            Direction::Inbound,
            start_time,
        )
        .await
    }

    /// Dials a single peer and, on a successful handshake and admission
    /// check, registers the resulting channel.
    pub async fn dial(self: Arc<Self>, target: Endpoint, expected_id: Option<NodeId>) -> Result<(), ManagerError> {
        self.metrics.dial_attempts_total.inc();
        let addr = target.tcp_addr();
        self.record_dial_attempt(addr).await;
        if !self.is_trust_peer(&addr.ip()) && self.ban_store.lock().await.is_banned(&addr.ip()) {
            return Err(ManagerError::Banned);
        }

        let start_time = Instant::now();
        let mut stream = self.dial_pool.dial(addr).await?;
        let local_endpoint = local_endpoint(&self.config);
        let established = match handshake::perform_outbound(
            &mut stream,
            &self.identity,
            local_endpoint,
            "xdagx-node",
            self.config.network_id,
            self.config.network_version,
            self.config.handshake_timeout,
        )
        .await
        {
            Ok(established) => established,
            Err(err) => {
                self.record_handshake_failure(addr.ip(), &err).await;
                return Err(ManagerError::Handshake(err));
            }
        };

        if let Some(expected) = expected_id {
            if expected != established.node_id {
                return Err(ManagerError::Handshake(
                    handshake::HandshakeError::InvalidSignature,
                ));
            }
        }

        self.admit_and_spawn(
            stream,
            addr,
            established.node_id,
            established.public_key,
            Direction::Outbound,
            start_time,
        )
        .await
    }

    async fn admit_and_spawn(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        node_id: NodeId,
        public_key: secp256k1::PublicKey,
        direction: Direction,
        start_time: Instant,
    ) -> Result<(), ManagerError> {
        let admission = self.evaluate_admission(addr, node_id, direction, start_time).await;

        let previous_occupant = match admission {
            Admission::Admit => None,
            Admission::AdmitReplacing(existing_addr) => Some(existing_addr),
            Admission::Reject(err) => {
                if let Some(reason) = err.reason_code() {
                    send_disconnect_and_drop(stream, reason, self.config.max_frame_len).await;
                }
                return Err(err);
            }
        };

        if let Some(existing_addr) = previous_occupant {
            let existing = self.tables.lock().await.channels.get(&existing_addr).cloned();
            if let Some(existing) = existing {
                existing.close(ReasonCode::AlreadyConnected).await;
            }
        }

        let manager = self.clone();
        let handle = channel::spawn(
            stream,
            node_id,
            public_key,
            addr,
            direction,
            start_time,
            self.config.clone(),
            self.events.clone(),
            move |node_id, reason| {
                tokio::spawn(manager.on_channel_closed(addr, node_id, reason));
            },
        );
        self.register(handle).await;
        self.events.on_connect(node_id).await;
        Ok(())
    }

    /// Requests a graceful disconnect from every active channel, for use
    /// during orchestrator shutdown. Sets the shutdown flag first so no
    /// closing channel in this batch records a fresh ban offense.
    pub async fn close_all(&self, reason: ReasonCode) {
        self.shutting_down.store(true, Ordering::SeqCst);
        let handles: Vec<ChannelHandle> = self.tables.lock().await.channels.values().cloned().collect();
        for handle in handles {
            handle.close(reason).await;
        }
    }

    /// Picks a uniformly random non-trust-peer channel to close without a
    /// ban, implementing the disconnection policy's churn mechanism for
    /// when the table is saturated.
    pub async fn evict_random_non_trust_peer(&self) -> bool {
        let candidate = {
            let tables = self.tables.lock().await;
            if tables.channels.len() < self.config.max_channels {
                return false;
            }
            tables
                .channels
                .values()
                .filter(|c| !self.is_trust_peer(&c.remote_addr.ip()))
                .choose(&mut rand::thread_rng())
                .cloned()
        };
        match candidate {
            Some(handle) => {
                handle.close(ReasonCode::Requested).await;
                true
            }
            None => false,
        }
    }

    /// Runs the disconnection policy loop: periodically, if the table is
    /// at capacity, evict one random non-trust peer without banning it, to
    /// make room for dial-loop churn.
    pub async fn run_disconnection_policy(self: Arc<Self>) {
        if !self.config.enable_disconnect_policy {
            return;
        }
        let mut ticker = tokio::time::interval(self.config.disconnect_policy_interval);
        loop {
            ticker.tick().await;
            if self.evict_random_non_trust_peer().await {
                info!("disconnection policy evicted a peer to make room for churn");
            }
        }
    }
}

/// Best-effort courtesy DISCONNECT for a peer rejected by admission,
/// written over a freshly framed socket since the handshake already
/// completed by the time admission runs. Errors are swallowed: the stream
/// is being dropped either way.
async fn send_disconnect_and_drop(stream: TcpStream, reason: ReasonCode, max_frame_len: u32) {
    let mut framed = Framed::new(stream, FrameCodec::with_max_frame_len(max_frame_len));
    let frame = Message::Disconnect(crate::message::Disconnect {
        reason,
        detail: String::new(),
    })
    .into_frame(0);
    let _ = framed.send(frame).await;
    let _ = framed.close().await;
}

fn local_endpoint(config: &P2pConfig) -> Endpoint {
    Endpoint {
        ip: config.tcp_listen_addr.ip(),
        tcp_port: config.tcp_listen_addr.port(),
        udp_port: config.udp_listen_addr.port(),
    }
}

/// Runs the inbound accept loop against a bound listener until the process
/// shuts down, mirroring the `TcpListener` setup the networking crate this
/// is grounded on uses for its own serve loop.
pub async fn run_accept_loop(manager: Arc<ChannelManager>, listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => manager.handle_inbound(stream, addr).await,
            Err(err) => {
                warn!(error = %err, "accept() failed");
            }
        }
    }
}
