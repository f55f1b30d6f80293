use bytes::BytesMut;

use crate::codec::{get_string, put_string, CodecError};

/// Unified disconnect reason catalog, replacing the two parallel
/// enumerations noted as an open question: application code and transport
/// code now share one set of codes end to end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReasonCode {
    Requested,
    TcpError,
    ProtocolError,
    UselessPeer,
    TooManyPeers,
    AlreadyConnected,
    IncompatibleVersion,
    InvalidIdentity,
    ClientQuitting,
    UnexpectedIdentity,
    IdentityIsSelf,
    TimedOut,
    Banned,
    SameIpLimit,
    BadNetwork,
    BadNetworkVersion,
    MessageQueueFull,
    Other(u8),
}

impl ReasonCode {
    pub fn to_u8(self) -> u8 {
        match self {
            ReasonCode::Requested => 0,
            ReasonCode::TcpError => 1,
            ReasonCode::ProtocolError => 2,
            ReasonCode::UselessPeer => 3,
            ReasonCode::TooManyPeers => 4,
            ReasonCode::AlreadyConnected => 5,
            ReasonCode::IncompatibleVersion => 6,
            ReasonCode::InvalidIdentity => 7,
            ReasonCode::ClientQuitting => 8,
            ReasonCode::UnexpectedIdentity => 9,
            ReasonCode::IdentityIsSelf => 10,
            ReasonCode::TimedOut => 11,
            ReasonCode::Banned => 12,
            ReasonCode::SameIpLimit => 13,
            ReasonCode::BadNetwork => 14,
            ReasonCode::BadNetworkVersion => 15,
            ReasonCode::MessageQueueFull => 16,
            ReasonCode::Other(code) => code,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => ReasonCode::Requested,
            1 => ReasonCode::TcpError,
            2 => ReasonCode::ProtocolError,
            3 => ReasonCode::UselessPeer,
            4 => ReasonCode::TooManyPeers,
            5 => ReasonCode::AlreadyConnected,
            6 => ReasonCode::IncompatibleVersion,
            7 => ReasonCode::InvalidIdentity,
            8 => ReasonCode::ClientQuitting,
            9 => ReasonCode::UnexpectedIdentity,
            10 => ReasonCode::IdentityIsSelf,
            11 => ReasonCode::TimedOut,
            12 => ReasonCode::Banned,
            13 => ReasonCode::SameIpLimit,
            14 => ReasonCode::BadNetwork,
            15 => ReasonCode::BadNetworkVersion,
            16 => ReasonCode::MessageQueueFull,
            other => ReasonCode::Other(other),
        }
    }

    /// Whether a channel closed for this reason should count toward a
    /// peer's ban history, or is just routine churn.
    pub fn is_punishable(self) -> bool {
        matches!(
            self,
            ReasonCode::ProtocolError
                | ReasonCode::InvalidIdentity
                | ReasonCode::UnexpectedIdentity
                | ReasonCode::UselessPeer
                | ReasonCode::BadNetwork
                | ReasonCode::BadNetworkVersion
        )
    }

    /// Stable, low-cardinality label for the per-reason ban metric and
    /// offense histogram; `Other` collapses every unrecognized wire value
    /// into one bucket so a hostile peer can't blow up label cardinality
    /// by cycling through codes.
    pub fn metric_label(self) -> &'static str {
        match self {
            ReasonCode::Requested => "requested",
            ReasonCode::TcpError => "tcp_error",
            ReasonCode::ProtocolError => "protocol_error",
            ReasonCode::UselessPeer => "useless_peer",
            ReasonCode::TooManyPeers => "too_many_peers",
            ReasonCode::AlreadyConnected => "already_connected",
            ReasonCode::IncompatibleVersion => "incompatible_version",
            ReasonCode::InvalidIdentity => "invalid_identity",
            ReasonCode::ClientQuitting => "client_quitting",
            ReasonCode::UnexpectedIdentity => "unexpected_identity",
            ReasonCode::IdentityIsSelf => "identity_is_self",
            ReasonCode::TimedOut => "timed_out",
            ReasonCode::Banned => "banned",
            ReasonCode::SameIpLimit => "same_ip_limit",
            ReasonCode::BadNetwork => "bad_network",
            ReasonCode::BadNetworkVersion => "bad_network_version",
            ReasonCode::MessageQueueFull => "message_queue_full",
            ReasonCode::Other(_) => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disconnect {
    pub reason: ReasonCode,
    pub detail: String,
}

impl Disconnect {
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.reason.to_u8()]);
        put_string(buf, &self.detail);
    }

    pub fn decode(mut data: &[u8]) -> Result<Self, CodecError> {
        if data.is_empty() {
            return Err(CodecError::Truncated);
        }
        let reason = ReasonCode::from_u8(data[0]);
        data = &data[1..];
        let detail = get_string(&mut data, 256)?;
        Ok(Self { reason, detail })
    }
}
