use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use secp256k1::PublicKey;
use sha3::{Digest, Keccak256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeIdError {
    #[error("malformed node url: {0}")]
    MalformedUrl(String),
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// A node's routing identity: the 32-byte Kademlia XOR key derived from its
/// public key, i.e. `keccak256(compressed_pubkey)`.
///
/// Kept distinct from the node's chain [`Address`] the same way the crate
/// this is grounded on keeps an RLPx node id distinct from an account
/// address: one identifies a peer on the wire, the other identifies an
/// account on the ledger, and they are never interchangeable.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub [u8; 32]);

impl NodeId {
    pub fn from_public_key(key: &PublicKey) -> Self {
        let mut hasher = Keccak256::new();
        hasher.update(key.serialize());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn distance(&self, other: &NodeId) -> [u8; 32] {
        let mut out = [0u8; 32];
        for i in 0..32 {
            out[i] = self.0[i] ^ other.0[i];
        }
        out
    }

    /// Index (0..=255) of the highest set bit in the XOR distance, counted
    /// from the least significant bit of the 256-bit value, i.e. the
    /// Kademlia bucket this node falls into relative to `self`. Bucket 255
    /// holds the most distant peers, bucket 0 the nearest.
    pub fn bucket_index(&self, other: &NodeId) -> Option<usize> {
        let distance = self.distance(other);
        for (byte_idx, byte) in distance.iter().enumerate() {
            if *byte != 0 {
                let bit_from_msb = byte.leading_zeros() as usize;
                let position_from_msb = byte_idx * 8 + bit_from_msb;
                return Some(255 - position_from_msb);
            }
        }
        None
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// A node's chain-facing identity, derived like an account address: the low
/// 20 bytes of `keccak256(uncompressed_pubkey[1..])`, Base58Check-encoded
/// for display.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(pub [u8; 20]);

impl Address {
    pub fn from_public_key(key: &PublicKey) -> Self {
        let uncompressed = key.serialize_uncompressed();
        let mut hasher = Keccak256::new();
        hasher.update(&uncompressed[1..]);
        let digest = hasher.finalize();
        let mut bytes = [0u8; 20];
        bytes.copy_from_slice(&digest[12..]);
        Self(bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", bs58::encode(self.0).with_check().into_string())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

/// A reachable network endpoint: the address dialed for the transport
/// socket, plus the UDP port the discovery service listens on if it
/// differs from the TCP port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub ip: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
}

impl Endpoint {
    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.udp_port)
    }
}

/// A discovered or configured peer: its routing identity plus where to
/// reach it. Parsed from `node://<hex-node-id>@<ip>:<tcp>?discport=<udp>`
/// URLs, mirroring the `enode://` parsing the crate this is grounded on
/// performs for its own node records.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeRecord {
    pub id: NodeId,
    pub endpoint: Endpoint,
}

impl FromStr for NodeRecord {
    type Err = NodeIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix("node://")
            .ok_or_else(|| NodeIdError::MalformedUrl(s.to_string()))?;
        let (id_hex, remainder) = rest
            .split_once('@')
            .ok_or_else(|| NodeIdError::MalformedUrl(s.to_string()))?;
        let id_bytes = hex::decode(id_hex)
            .map_err(|e| NodeIdError::MalformedUrl(format!("bad node id hex: {e}")))?;
        if id_bytes.len() != 32 {
            return Err(NodeIdError::MalformedUrl(
                "node id must be 32 bytes".to_string(),
            ));
        }
        let mut id = [0u8; 32];
        id.copy_from_slice(&id_bytes);

        let (host_port, query) = match remainder.split_once('?') {
            Some((hp, q)) => (hp, Some(q)),
            None => (remainder, None),
        };
        let socket_addr: SocketAddr = host_port
            .parse()
            .map_err(|_| NodeIdError::MalformedUrl(format!("bad host:port: {host_port}")))?;
        let udp_port = query
            .and_then(|q| q.strip_prefix("discport="))
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(socket_addr.port());

        Ok(NodeRecord {
            id: NodeId(id),
            endpoint: Endpoint {
                ip: socket_addr.ip(),
                tcp_port: socket_addr.port(),
                udp_port,
            },
        })
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "node://{}@{}:{}?discport={}",
            self.id, self.endpoint.ip, self.endpoint.tcp_port, self.endpoint.udp_port
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_record_round_trips_through_display_and_parse() {
        let record = NodeRecord {
            id: NodeId([7u8; 32]),
            endpoint: Endpoint {
                ip: "127.0.0.1".parse().unwrap(),
                tcp_port: 8001,
                udp_port: 8002,
            },
        };
        let url = record.to_string();
        let parsed: NodeRecord = url.parse().unwrap();
        assert_eq!(record, parsed);
    }

    #[test]
    fn bucket_index_is_none_for_self() {
        let id = NodeId([1u8; 32]);
        assert_eq!(id.bucket_index(&id), None);
    }

    #[test]
    fn bucket_index_detects_high_bit() {
        let a = NodeId([0u8; 32]);
        let mut other = [0u8; 32];
        other[0] = 0b1000_0000;
        let b = NodeId(other);
        assert_eq!(a.bucket_index(&b), Some(255));
    }
}
