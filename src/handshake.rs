use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use rand::RngCore;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message as SecpMessage, PublicKey, SecretKey, SECP256K1};
use sha3::{Digest, Keccak256};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::codec::PROTOCOL_VERSION;
use crate::message::handshake::{Hello, Init};
use crate::message::ReasonCode;
use crate::types::{Endpoint, NodeId};

#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("i/o error during handshake: {0}")]
    Io(#[from] std::io::Error),
    #[error("handshake timed out")]
    Timeout,
    #[error("codec error during handshake: {0}")]
    Codec(#[from] crate::codec::CodecError),
    #[error("peer announced incompatible protocol version {0}")]
    IncompatibleVersion(u8),
    #[error("peer announced a different network id than ours")]
    BadNetwork,
    #[error("peer announced a different network version than ours")]
    BadNetworkVersion,
    #[error("peer signature did not recover to its announced public key")]
    InvalidSignature,
    #[error("peer identity matches our own node id")]
    IdentityIsSelf,
    #[error("invalid public key bytes from peer")]
    InvalidPublicKey,
    #[error("peer's INIT timestamp is outside the handshake freshness window")]
    StaleInit,
}

impl HandshakeError {
    /// The DISCONNECT reason this failure corresponds to, for the channel
    /// manager to log and ban against.
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            HandshakeError::Io(_) => ReasonCode::TcpError,
            HandshakeError::Timeout => ReasonCode::TimedOut,
            HandshakeError::Codec(_) => ReasonCode::ProtocolError,
            HandshakeError::IncompatibleVersion(_) => ReasonCode::IncompatibleVersion,
            HandshakeError::BadNetwork => ReasonCode::BadNetwork,
            HandshakeError::BadNetworkVersion => ReasonCode::BadNetworkVersion,
            HandshakeError::InvalidSignature | HandshakeError::InvalidPublicKey => {
                ReasonCode::InvalidIdentity
            }
            HandshakeError::IdentityIsSelf => ReasonCode::IdentityIsSelf,
            HandshakeError::StaleInit => ReasonCode::InvalidIdentity,
        }
    }

    /// Whether the originating IP should be banned for this failure. Every
    /// invalid field or timeout bans per the handshake's failure contract;
    /// a bare transport I/O error does not, since it isn't necessarily the
    /// peer's fault.
    pub fn should_ban(&self) -> bool {
        !matches!(self, HandshakeError::Io(_))
    }
}

/// Local identity used to sign and verify the HELLO/WORLD exchange.
pub struct Identity {
    pub secret_key: SecretKey,
    pub public_key: PublicKey,
    pub node_id: NodeId,
}

impl Identity {
    pub fn new(secret_key: SecretKey) -> Self {
        let public_key = PublicKey::from_secret_key(SECP256K1, &secret_key);
        let node_id = NodeId::from_public_key(&public_key);
        Self {
            secret_key,
            public_key,
            node_id,
        }
    }

    pub fn generate() -> Self {
        let secret_key = SecretKey::new(&mut rand::thread_rng());
        Self::new(secret_key)
    }
}

/// Outcome of a completed handshake: the peer's verified identity and the
/// endpoint it announced, handed off to [`crate::channel::Channel`].
#[derive(Debug, Clone)]
pub struct EstablishedPeer {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub endpoint: Endpoint,
}

fn sign_payload(secret_key: &SecretKey, payload: &[u8]) -> [u8; 65] {
    let digest = Keccak256::digest(payload);
    let message = SecpMessage::from_digest_slice(&digest).expect("32-byte digest");
    let (recovery_id, raw) = SECP256K1
        .sign_ecdsa_recoverable(&message, secret_key)
        .serialize_compact();
    let mut signature = [0u8; 65];
    signature[..64].copy_from_slice(&raw);
    signature[64] = recovery_id.to_i32() as u8;
    signature
}

fn recover_public_key(payload: &[u8], signature: &[u8; 65]) -> Result<PublicKey, HandshakeError> {
    let digest = Keccak256::digest(payload);
    let message = SecpMessage::from_digest_slice(&digest).expect("32-byte digest");
    let recovery_id = RecoveryId::from_i32(signature[64] as i32)
        .map_err(|_| HandshakeError::InvalidSignature)?;
    let recoverable = RecoverableSignature::from_compact(&signature[..64], recovery_id)
        .map_err(|_| HandshakeError::InvalidSignature)?;
    SECP256K1
        .recover_ecdsa(&message, &recoverable)
        .map_err(|_| HandshakeError::InvalidSignature)
}

async fn write_message(stream: &mut TcpStream, bytes: &[u8]) -> Result<(), HandshakeError> {
    let mut framed = BytesMut::new();
    framed.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
    framed.extend_from_slice(bytes);
    stream.write_all(&framed).await?;
    Ok(())
}

async fn read_message(stream: &mut TcpStream, max_len: usize) -> Result<Vec<u8>, HandshakeError> {
    let mut len_bytes = [0u8; 4];
    stream.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > max_len {
        return Err(HandshakeError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "handshake message exceeds maximum length",
        )));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

fn build_hello(
    identity: &Identity,
    endpoint: Endpoint,
    network_id: u8,
    network_version: u16,
    node_tag: &str,
    peer_nonce: &[u8; 32],
) -> Hello {
    let public_key = identity.public_key.serialize().to_vec();
    let payload = Hello::signing_payload(
        &public_key,
        &endpoint,
        network_id,
        network_version,
        node_tag,
        0,
        peer_nonce,
    );
    let signature = sign_payload(&identity.secret_key, &payload);
    Hello {
        public_key,
        endpoint,
        network_id,
        network_version,
        node_tag: node_tag.to_string(),
        flags: 0,
        signature,
    }
}

fn verify_hello(hello: &Hello, our_nonce: &[u8; 32]) -> Result<PublicKey, HandshakeError> {
    let payload = Hello::signing_payload(
        &hello.public_key,
        &hello.endpoint,
        hello.network_id,
        hello.network_version,
        &hello.node_tag,
        hello.flags,
        our_nonce,
    );
    let recovered = recover_public_key(&payload, &hello.signature)?;
    let announced =
        PublicKey::from_slice(&hello.public_key).map_err(|_| HandshakeError::InvalidPublicKey)?;
    if recovered != announced {
        return Err(HandshakeError::InvalidSignature);
    }
    Ok(announced)
}

fn check_network(hello: &Hello, network_id: u8, network_version: u16) -> Result<(), HandshakeError> {
    if hello.network_id != network_id {
        return Err(HandshakeError::BadNetwork);
    }
    if hello.network_version != network_version {
        return Err(HandshakeError::BadNetworkVersion);
    }
    Ok(())
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is after the unix epoch")
        .as_secs()
}

fn check_init_freshness(init: &Init, net_handshake_expiry: Duration) -> Result<(), HandshakeError> {
    let now = unix_now();
    let age = now.saturating_sub(init.timestamp);
    if age > net_handshake_expiry.as_secs() {
        return Err(HandshakeError::StaleInit);
    }
    Ok(())
}

/// Drives the three-step INIT/HELLO/WORLD exchange as the dialing side.
#[allow(clippy::too_many_arguments)]
pub async fn perform_outbound(
    stream: &mut TcpStream,
    identity: &Identity,
    local_endpoint: Endpoint,
    node_tag: &str,
    network_id: u8,
    network_version: u16,
    handshake_timeout: Duration,
) -> Result<EstablishedPeer, HandshakeError> {
    timeout(
        handshake_timeout,
        perform_outbound_inner(stream, identity, local_endpoint, node_tag, network_id, network_version),
    )
    .await
    .map_err(|_| HandshakeError::Timeout)?
}

async fn perform_outbound_inner(
    stream: &mut TcpStream,
    identity: &Identity,
    local_endpoint: Endpoint,
    node_tag: &str,
    network_id: u8,
    network_version: u16,
) -> Result<EstablishedPeer, HandshakeError> {
    let mut our_nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut our_nonce);
    let init = Init {
        version: PROTOCOL_VERSION,
        nonce: our_nonce,
        timestamp: unix_now(),
    };
    let mut buf = BytesMut::new();
    init.encode(&mut buf);
    write_message(stream, &buf).await?;

    let hello_bytes = read_message(stream, 4096).await?;
    let peer_hello = Hello::decode(&hello_bytes)?;
    let peer_public_key = verify_hello(&peer_hello, &our_nonce)?;
    check_network(&peer_hello, network_id, network_version)?;
    let peer_node_id = NodeId::from_public_key(&peer_public_key);
    if peer_node_id == identity.node_id {
        return Err(HandshakeError::IdentityIsSelf);
    }

    let peer_nonce_bytes = read_message(stream, 64).await?;
    if peer_nonce_bytes.len() != 32 {
        return Err(HandshakeError::InvalidSignature);
    }
    let mut peer_nonce = [0u8; 32];
    peer_nonce.copy_from_slice(&peer_nonce_bytes);

    let world = build_hello(
        identity,
        local_endpoint,
        network_id,
        network_version,
        node_tag,
        &peer_nonce,
    );
    let mut buf = BytesMut::new();
    world.encode(&mut buf);
    write_message(stream, &buf).await?;

    Ok(EstablishedPeer {
        node_id: peer_node_id,
        public_key: peer_public_key,
        endpoint: peer_hello.endpoint,
    })
}

/// Drives the three-step INIT/HELLO/WORLD exchange as the accepting side.
#[allow(clippy::too_many_arguments)]
pub async fn perform_inbound(
    stream: &mut TcpStream,
    identity: &Identity,
    local_endpoint: Endpoint,
    node_tag: &str,
    network_id: u8,
    network_version: u16,
    handshake_timeout: Duration,
    net_handshake_expiry: Duration,
) -> Result<EstablishedPeer, HandshakeError> {
    timeout(
        handshake_timeout,
        perform_inbound_inner(
            stream,
            identity,
            local_endpoint,
            node_tag,
            network_id,
            network_version,
            net_handshake_expiry,
        ),
    )
    .await
    .map_err(|_| HandshakeError::Timeout)?
}

#[allow(clippy::too_many_arguments)]
async fn perform_inbound_inner(
    stream: &mut TcpStream,
    identity: &Identity,
    local_endpoint: Endpoint,
    node_tag: &str,
    network_id: u8,
    network_version: u16,
    net_handshake_expiry: Duration,
) -> Result<EstablishedPeer, HandshakeError> {
    let init_bytes = read_message(stream, 64).await?;
    let init = Init::decode(&init_bytes)?;
    if init.version != PROTOCOL_VERSION {
        return Err(HandshakeError::IncompatibleVersion(init.version));
    }
    check_init_freshness(&init, net_handshake_expiry)?;

    let mut our_nonce = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut our_nonce);
    let hello = build_hello(
        identity,
        local_endpoint,
        network_id,
        network_version,
        node_tag,
        &init.nonce,
    );
    let mut buf = BytesMut::new();
    hello.encode(&mut buf);
    write_message(stream, &buf).await?;
    write_message(stream, &our_nonce).await?;

    let world_bytes = read_message(stream, 4096).await?;
    let peer_world = Hello::decode(&world_bytes)?;
    let peer_public_key = verify_hello(&peer_world, &our_nonce)?;
    check_network(&peer_world, network_id, network_version)?;
    let peer_node_id = NodeId::from_public_key(&peer_public_key);
    if peer_node_id == identity.node_id {
        return Err(HandshakeError::IdentityIsSelf);
    }

    Ok(EstablishedPeer {
        node_id: peer_node_id,
        public_key: peer_public_key,
        endpoint: peer_world.endpoint,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn endpoint(port: u16) -> Endpoint {
        Endpoint {
            ip: "127.0.0.1".parse().unwrap(),
            tcp_port: port,
            udp_port: port,
        }
    }

    #[tokio::test]
    async fn handshake_establishes_mutual_identity() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = Identity::generate();
        let server_node_id = server_identity.node_id;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            perform_inbound(
                &mut stream,
                &server_identity,
                endpoint(addr.port()),
                "server",
                1,
                1,
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
            .await
            .unwrap()
        });

        let client_identity = Identity::generate();
        let client_node_id = client_identity.node_id;
        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let client_result = perform_outbound(
            &mut client_stream,
            &client_identity,
            endpoint(0),
            "client",
            1,
            1,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let server_result = server.await.unwrap();

        assert_eq!(client_result.node_id, server_node_id);
        assert_eq!(server_result.node_id, client_node_id);
    }

    #[tokio::test]
    async fn mismatched_network_id_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = Identity::generate();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            perform_inbound(
                &mut stream,
                &server_identity,
                endpoint(addr.port()),
                "server",
                1,
                1,
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
            .await
        });

        let client_identity = Identity::generate();
        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let client_result = perform_outbound(
            &mut client_stream,
            &client_identity,
            endpoint(0),
            "client",
            2,
            1,
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(client_result, Err(HandshakeError::BadNetwork)));
        let server_result = server.await.unwrap();
        assert!(matches!(server_result, Err(HandshakeError::BadNetwork)));
    }

    #[tokio::test]
    async fn stale_init_fails_the_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server_identity = Identity::generate();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            perform_inbound(
                &mut stream,
                &server_identity,
                endpoint(addr.port()),
                "server",
                1,
                1,
                Duration::from_secs(5),
                Duration::from_secs(5),
            )
            .await
        });

        let mut client_stream = TcpStream::connect(addr).await.unwrap();
        let init = Init {
            version: PROTOCOL_VERSION,
            nonce: [7u8; 32],
            timestamp: unix_now() - 3600,
        };
        let mut buf = BytesMut::new();
        init.encode(&mut buf);
        write_message(&mut client_stream, &buf).await.unwrap();

        let server_result = server.await.unwrap();
        assert!(matches!(server_result, Err(HandshakeError::StaleInit)));
    }
}
