use std::time::SystemTimeError;

use thiserror::Error;

use crate::codec::CodecError;
use crate::dns::DnsError;
use crate::handshake::HandshakeError;
use crate::kademlia::KademliaError;
use crate::manager::ManagerError;

/// Top-level error type returned across the public surface of this crate.
///
/// Subsystem errors are folded in via `#[from]`, the same way the original
/// networking crate this is grounded on wraps its transport error into a
/// single `NetworkingError` at the boundary.
#[derive(Debug, Error)]
pub enum NetworkingError {
    #[error("{0}")]
    ConnectionError(String),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    SystemTimeError(#[from] SystemTimeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Manager(#[from] ManagerError),
    #[error(transparent)]
    Kademlia(#[from] KademliaError),
    #[error(transparent)]
    Dns(#[from] DnsError),
}
