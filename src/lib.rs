//! # xdagx-p2p
//!
//! Peer-to-peer networking core for an XDAG-style blockchain node.
//!
//! ## Overview
//!
//! This crate implements the transport and discovery stack a node needs to
//! join and stay attached to a peer network:
//!
//! - **codec**: the wire frame layout and primitive value encodings
//! - **message**: the message taxonomy carried inside frames
//! - **handshake**: the INIT/HELLO/WORLD identity exchange
//! - **channel**: per-peer send queue, keep-alive and idle watchdog
//! - **manager**: channel table, admission policy, ban store, dial pool
//! - **kademlia**: the UDP Kademlia-style DHT used for node discovery
//! - **dns**: EIP-1459 style DNS-tree discovery
//! - **handler**: application message dispatch
//! - **orchestrator**: startup/shutdown wiring and the CLI surface
//!
//! Application logic, concrete DNS zone hosting, and metrics publishing
//! backends are left to the embedder; this crate only emits the hooks.
pub mod channel;
pub mod codec;
pub mod config;
pub mod dns;
pub mod error;
pub mod handler;
pub mod handshake;
pub mod kademlia;
pub mod manager;
pub mod message;
pub mod metrics;
pub mod orchestrator;
pub mod types;
pub mod utils;

pub use config::P2pConfig;
pub use error::NetworkingError;
pub use orchestrator::Node;
pub use types::{Endpoint, NodeId, NodeRecord};
