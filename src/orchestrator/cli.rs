use clap::Parser;

/// Command-line surface for the node binary: listen port, detailed
/// logging toggle, static peer/bootstrap lists and DNS-tree URLs.
#[derive(Debug, Parser)]
#[command(name = "xdagx-node", about = "XDAG-style P2P node")]
pub struct Args {
    /// TCP/UDP listen port.
    #[arg(short = 'p', long = "port", default_value_t = 8001)]
    pub port: u16,

    /// Enable detailed (debug-level) logging: 0 or 1.
    #[arg(short = 'd', long = "detailed-logging", default_value_t = 0)]
    pub detailed_logging: u8,

    /// Comma-separated list of static `node://` peer URLs to dial at
    /// startup and keep reconnecting to.
    #[arg(short = 's', long = "static-nodes", value_delimiter = ',')]
    pub static_nodes: Vec<String>,

    /// Comma-separated list of `node://` bootstrap URLs used to seed
    /// discovery.
    #[arg(short = 'a', long = "bootstrap-nodes", value_delimiter = ',')]
    pub bootstrap_nodes: Vec<String>,

    /// Comma-separated list of EIP-1459 DNS-tree root URLs to sync peers
    /// from.
    #[arg(long = "url-schemes", value_delimiter = ',')]
    pub url_schemes: Vec<String>,

    /// Network id announced in HELLO/WORLD; peers announcing a different
    /// value are refused with `BadNetwork`.
    #[arg(long = "network-id", default_value_t = 1)]
    pub network_id: u8,

    /// Network version announced in HELLO/WORLD; peers announcing a
    /// different value are refused with `BadNetworkVersion`.
    #[arg(long = "network-version", default_value_t = 1)]
    pub network_version: u16,
}
