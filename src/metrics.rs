use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

use crate::message::ReasonCode;

/// Process-wide gauges and counters for the channel table, ban store and
/// DHT routing table, in the same vein as the peer/connection metrics the
/// crate this is grounded on exposes — publishing the metrics to an
/// exporter is left to the embedder.
pub struct Metrics {
    pub registry: Registry,
    pub active_channels: IntGauge,
    pub inbound_channels: IntGauge,
    pub outbound_channels: IntGauge,
    pub banned_peers: IntGauge,
    pub dial_attempts_total: IntCounter,
    pub handshake_failures_total: IntCounter,
    pub kademlia_bucket_occupancy: IntGauge,
    /// Offenses recorded by the ban store, broken down by `reason` label
    /// (see [`ReasonCode::metric_label`]).
    pub ban_offenses_total: IntCounterVec,
}

impl Metrics {
    pub fn record_offense(&self, reason: ReasonCode) {
        self.ban_offenses_total
            .with_label_values(&[reason.metric_label()])
            .inc();
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let active_channels =
            IntGauge::with_opts(Opts::new("p2p_active_channels", "Active channel count"))
                .expect("valid metric opts");
        let inbound_channels = IntGauge::with_opts(Opts::new(
            "p2p_inbound_channels",
            "Active inbound channel count",
        ))
        .expect("valid metric opts");
        let outbound_channels = IntGauge::with_opts(Opts::new(
            "p2p_outbound_channels",
            "Active outbound channel count",
        ))
        .expect("valid metric opts");
        let banned_peers =
            IntGauge::with_opts(Opts::new("p2p_banned_peers", "Currently banned peers"))
                .expect("valid metric opts");
        let dial_attempts_total = IntCounter::with_opts(Opts::new(
            "p2p_dial_attempts_total",
            "Total outbound dial attempts",
        ))
        .expect("valid metric opts");
        let handshake_failures_total = IntCounter::with_opts(Opts::new(
            "p2p_handshake_failures_total",
            "Total handshake failures",
        ))
        .expect("valid metric opts");
        let kademlia_bucket_occupancy = IntGauge::with_opts(Opts::new(
            "p2p_kademlia_bucket_occupancy",
            "Total nodes held across all k-buckets",
        ))
        .expect("valid metric opts");
        let ban_offenses_total = IntCounterVec::new(
            Opts::new("p2p_ban_offenses_total", "Punishable offenses recorded, by reason"),
            &["reason"],
        )
        .expect("valid metric opts");

        for collector in [
            Box::new(active_channels.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(inbound_channels.clone()),
            Box::new(outbound_channels.clone()),
            Box::new(banned_peers.clone()),
            Box::new(dial_attempts_total.clone()),
            Box::new(handshake_failures_total.clone()),
            Box::new(kademlia_bucket_occupancy.clone()),
            Box::new(ban_offenses_total.clone()),
        ] {
            let _ = registry.register(collector);
        }

        Self {
            registry,
            active_channels,
            inbound_channels,
            outbound_channels,
            banned_peers,
            dial_attempts_total,
            handshake_failures_total,
            kademlia_bucket_occupancy,
            ban_offenses_total,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
