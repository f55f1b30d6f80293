use bytes::BytesMut;

use crate::codec::{get_bytes, get_string, get_varint, put_bytes, put_string, put_varint, CodecError};
use crate::types::Endpoint;

const MAX_NODE_TAG_LEN: usize = 64;
const SIGNATURE_LEN: usize = 65;

fn put_endpoint(buf: &mut BytesMut, endpoint: &Endpoint) {
    put_string(buf, &endpoint.ip.to_string());
    put_varint(buf, endpoint.tcp_port as u64);
    put_varint(buf, endpoint.udp_port as u64);
}

fn get_endpoint(data: &mut &[u8]) -> Result<Endpoint, CodecError> {
    let ip_str = get_string(data, 64)?;
    let ip = ip_str.parse().map_err(|_| CodecError::InvalidUtf8)?;
    let tcp_port = get_varint(data)? as u16;
    let udp_port = get_varint(data)? as u16;
    Ok(Endpoint {
        ip,
        tcp_port,
        udp_port,
    })
}

/// First message on a freshly-opened socket: announces protocol version, an
/// ephemeral nonce the responder must echo back signed in `WORLD`, and the
/// timestamp the responder checks for freshness before proceeding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Init {
    pub version: u8,
    pub nonce: [u8; 32],
    /// Unix timestamp, in seconds, of when the initiator sent `INIT`.
    /// Checked against `now - timestamp <= net_handshake_expiry` on
    /// receipt to reject a replayed or stale handshake attempt.
    pub timestamp: u64,
}

impl Init {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.version]);
        buf.extend_from_slice(&self.nonce);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < 41 {
            return Err(CodecError::Truncated);
        }
        let version = data[0];
        let mut nonce = [0u8; 32];
        nonce.copy_from_slice(&data[1..33]);
        let mut timestamp_bytes = [0u8; 8];
        timestamp_bytes.copy_from_slice(&data[33..41]);
        let timestamp = u64::from_be_bytes(timestamp_bytes);
        Ok(Self {
            version,
            nonce,
            timestamp,
        })
    }
}

/// Responder's half of the identity exchange: its public key, its endpoint
/// as it sees itself, a free-form tag, and a signature over the canonical
/// encoding of every other field plus the initiator's `INIT` nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    pub public_key: Vec<u8>,
    pub endpoint: Endpoint,
    pub network_id: u8,
    pub network_version: u16,
    pub node_tag: String,
    pub flags: u8,
    pub signature: [u8; SIGNATURE_LEN],
}

impl Hello {
    pub fn signing_payload(
        public_key: &[u8],
        endpoint: &Endpoint,
        network_id: u8,
        network_version: u16,
        node_tag: &str,
        flags: u8,
        peer_nonce: &[u8; 32],
    ) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_bytes(&mut buf, public_key);
        put_endpoint(&mut buf, endpoint);
        buf.extend_from_slice(&[network_id]);
        buf.extend_from_slice(&network_version.to_be_bytes());
        let truncated_tag = truncate_tag(node_tag);
        put_string(&mut buf, &truncated_tag);
        buf.extend_from_slice(&[flags]);
        buf.extend_from_slice(peer_nonce);
        buf.to_vec()
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        put_bytes(buf, &self.public_key);
        put_endpoint(buf, &self.endpoint);
        buf.extend_from_slice(&[self.network_id]);
        buf.extend_from_slice(&self.network_version.to_be_bytes());
        put_string(buf, &self.node_tag);
        buf.extend_from_slice(&[self.flags]);
        buf.extend_from_slice(&self.signature);
    }

    pub fn decode(data: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = data;
        let public_key = get_bytes(&mut cursor, 65)?;
        let endpoint = get_endpoint(&mut cursor)?;
        if cursor.len() < 3 {
            return Err(CodecError::Truncated);
        }
        let network_id = cursor[0];
        let network_version = u16::from_be_bytes([cursor[1], cursor[2]]);
        cursor = &cursor[3..];
        let node_tag = get_string(&mut cursor, MAX_NODE_TAG_LEN)?;
        if cursor.is_empty() {
            return Err(CodecError::Truncated);
        }
        let flags = cursor[0];
        cursor = &cursor[1..];
        if cursor.len() < SIGNATURE_LEN {
            return Err(CodecError::Truncated);
        }
        let mut signature = [0u8; SIGNATURE_LEN];
        signature.copy_from_slice(&cursor[..SIGNATURE_LEN]);
        Ok(Self {
            public_key,
            endpoint,
            network_id,
            network_version,
            node_tag,
            flags,
            signature,
        })
    }
}

/// Initiator's closing half, symmetrical to [`Hello`]: it signs over the
/// same shape of payload, using the responder's nonce recovered from its
/// `HELLO` signature.
pub type World = Hello;

fn truncate_tag(tag: &str) -> String {
    if tag.len() <= MAX_NODE_TAG_LEN {
        tag.to_string()
    } else {
        tag.chars().take(MAX_NODE_TAG_LEN).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let init = Init {
            version: 1,
            nonce: [9u8; 32],
            timestamp: 1_700_000_000,
        };
        let mut buf = BytesMut::new();
        init.encode(&mut buf);
        let decoded = Init::decode(&buf).unwrap();
        assert_eq!(decoded, init);
    }

    #[test]
    fn hello_round_trips() {
        let hello = Hello {
            public_key: vec![2u8; 33],
            endpoint: Endpoint {
                ip: "127.0.0.1".parse().unwrap(),
                tcp_port: 8001,
                udp_port: 8002,
            },
            network_id: 1,
            network_version: 7,
            node_tag: "test-node".to_string(),
            flags: 0,
            signature: [5u8; SIGNATURE_LEN],
        };
        let mut buf = BytesMut::new();
        hello.encode(&mut buf);
        let decoded = Hello::decode(&buf).unwrap();
        assert_eq!(decoded, hello);
    }
}
