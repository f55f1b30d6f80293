use bytes::{Buf, BufMut, BytesMut};

use crate::codec::{get_bytes, get_varint, put_bytes, put_varint, CodecError};
use crate::types::{Endpoint, NodeId};

/// UDP Kademlia wire messages, distinct from the TCP channel's [`super::keepalive`]
/// messages: these carry routing-table maintenance traffic rather than
/// liveness checks on an established channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMessage {
    Ping {
        from: Endpoint,
        to: Endpoint,
        timestamp: u64,
        echo_nonce: u64,
    },
    Pong {
        to: Endpoint,
        echo_nonce: u64,
        timestamp: u64,
    },
    FindNode { target: NodeId },
    Neighbors { nodes: Vec<(NodeId, Endpoint)> },
}

fn put_endpoint(buf: &mut BytesMut, endpoint: &Endpoint) {
    put_bytes(buf, endpoint.ip.to_string().as_bytes());
    buf.put_u16(endpoint.tcp_port);
    buf.put_u16(endpoint.udp_port);
}

fn get_endpoint(data: &mut &[u8]) -> Result<Endpoint, CodecError> {
    let ip_bytes = get_bytes(data, 64)?;
    let ip_str = String::from_utf8(ip_bytes).map_err(|_| CodecError::InvalidUtf8)?;
    let ip = ip_str.parse().map_err(|_| CodecError::InvalidUtf8)?;
    if data.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let tcp_port = data.get_u16();
    let udp_port = data.get_u16();
    Ok(Endpoint {
        ip,
        tcp_port,
        udp_port,
    })
}

impl DiscoveryMessage {
    pub fn packet_type(&self) -> u8 {
        match self {
            DiscoveryMessage::Ping { .. } => 1,
            DiscoveryMessage::Pong { .. } => 2,
            DiscoveryMessage::FindNode { .. } => 3,
            DiscoveryMessage::Neighbors { .. } => 4,
        }
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        match self {
            DiscoveryMessage::Ping {
                from,
                to,
                timestamp,
                echo_nonce,
            } => {
                put_endpoint(buf, from);
                put_endpoint(buf, to);
                buf.put_u64(*timestamp);
                buf.put_u64(*echo_nonce);
            }
            DiscoveryMessage::Pong {
                to,
                echo_nonce,
                timestamp,
            } => {
                put_endpoint(buf, to);
                buf.put_u64(*echo_nonce);
                buf.put_u64(*timestamp);
            }
            DiscoveryMessage::FindNode { target } => {
                buf.extend_from_slice(&target.0);
            }
            DiscoveryMessage::Neighbors { nodes } => {
                put_varint(buf, nodes.len() as u64);
                for (id, endpoint) in nodes {
                    buf.extend_from_slice(&id.0);
                    put_endpoint(buf, endpoint);
                }
            }
        }
    }

    pub fn decode(packet_type: u8, mut data: &[u8]) -> Result<Self, CodecError> {
        match packet_type {
            1 => {
                let from = get_endpoint(&mut data)?;
                let to = get_endpoint(&mut data)?;
                if data.len() < 16 {
                    return Err(CodecError::Truncated);
                }
                let timestamp = data.get_u64();
                let echo_nonce = data.get_u64();
                Ok(DiscoveryMessage::Ping {
                    from,
                    to,
                    timestamp,
                    echo_nonce,
                })
            }
            2 => {
                let to = get_endpoint(&mut data)?;
                if data.len() < 16 {
                    return Err(CodecError::Truncated);
                }
                let echo_nonce = data.get_u64();
                let timestamp = data.get_u64();
                Ok(DiscoveryMessage::Pong {
                    to,
                    echo_nonce,
                    timestamp,
                })
            }
            3 => {
                if data.len() < 32 {
                    return Err(CodecError::Truncated);
                }
                let mut id = [0u8; 32];
                id.copy_from_slice(&data[..32]);
                Ok(DiscoveryMessage::FindNode {
                    target: NodeId(id),
                })
            }
            4 => {
                let count = get_varint(&mut data)? as usize;
                const MAX_NEIGHBORS: usize = 64;
                if count > MAX_NEIGHBORS {
                    return Err(CodecError::FieldTooLarge {
                        len: count,
                        max_len: MAX_NEIGHBORS,
                    });
                }
                let mut nodes = Vec::with_capacity(count);
                for _ in 0..count {
                    if data.len() < 32 {
                        return Err(CodecError::Truncated);
                    }
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&data[..32]);
                    data = &data[32..];
                    let endpoint = get_endpoint(&mut data)?;
                    nodes.push((NodeId(id), endpoint));
                }
                Ok(DiscoveryMessage::Neighbors { nodes })
            }
            other => Err(CodecError::UnknownMessageType(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint {
            ip: "10.0.0.1".parse().unwrap(),
            tcp_port: 8001,
            udp_port: 8002,
        }
    }

    #[test]
    fn ping_round_trips() {
        let msg = DiscoveryMessage::Ping {
            from: endpoint(),
            to: endpoint(),
            timestamp: 1_700_000_000,
            echo_nonce: 42,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DiscoveryMessage::decode(msg.packet_type(), &buf).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn pong_round_trips() {
        let msg = DiscoveryMessage::Pong {
            to: endpoint(),
            echo_nonce: 42,
            timestamp: 1_700_000_000,
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DiscoveryMessage::decode(msg.packet_type(), &buf).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn neighbors_round_trips() {
        let msg = DiscoveryMessage::Neighbors {
            nodes: vec![(NodeId([1u8; 32]), endpoint()), (NodeId([2u8; 32]), endpoint())],
        };
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        let decoded = DiscoveryMessage::decode(msg.packet_type(), &buf).unwrap();
        assert_eq!(decoded, msg);
    }
}
