pub mod keepalive;
pub mod send_queue;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use secp256k1::PublicKey;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::codec::{Frame, FrameCodec};
use crate::config::P2pConfig;
use crate::handler::Events;
use crate::message::{Disconnect, Message, ReasonCode};
use crate::types::NodeId;

use keepalive::{run_keepalive, KeepaliveOutcome, LivenessTracker};
use send_queue::{channel as send_queue_channel, SendQueue};

/// Direction a channel was established in, used by the admission policy and
/// by metrics to distinguish inbound pressure from outbound dialing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Lifecycle of a single peer channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Handshaking,
    Active,
    Closing,
    Closed,
}

/// Handle used by the rest of the crate to address an established channel
/// without holding the socket itself: enqueue frames, and ask it to close.
#[derive(Clone)]
pub struct ChannelHandle {
    pub node_id: NodeId,
    pub public_key: PublicKey,
    pub remote_addr: SocketAddr,
    pub direction: Direction,
    /// When this channel began handshaking, used by the admission policy
    /// to decide which of two same-`nodeId` channels is the survivor: the
    /// one with the earlier `start_time`.
    pub start_time: Instant,
    send_queue: SendQueue,
    close_tx: watch::Sender<bool>,
}

impl ChannelHandle {
    /// Enqueues `message` on the bounded normal lane. A full queue is not
    /// waited out: it fails the call with [`send_queue::SendQueueError::Full`]
    /// and tears the channel down with `MESSAGE_QUEUE_FULL`, per the
    /// send queue's full-queue disconnect policy.
    pub fn send(&self, message: Message) -> Result<(), send_queue::SendQueueError> {
        match self.send_queue.send(message.into_frame(0)) {
            Ok(()) => Ok(()),
            Err(send_queue::SendQueueError::Full) => {
                self.close_sync(ReasonCode::MessageQueueFull);
                Err(send_queue::SendQueueError::Full)
            }
            Err(err) => Err(err),
        }
    }

    pub fn send_fast(&self, message: Message) -> Result<(), send_queue::SendQueueError> {
        self.send_queue.send_fast(message.into_frame(0))
    }

    fn close_sync(&self, reason: ReasonCode) {
        let _ = self.send_fast(Message::Disconnect(Disconnect {
            reason,
            detail: String::new(),
        }));
        let _ = self.close_tx.send(true);
    }

    pub async fn close(&self, reason: ReasonCode) {
        self.close_sync(reason);
    }
}

/// Spawns the tasks that drive a single established channel: a read/write
/// loop over the framed socket and a keep-alive task, mirroring the
/// `connection_loop`/`check_periodic_tasks` split the plain (non-actor)
/// connection implementation this is grounded on uses.
pub fn spawn(
    stream: TcpStream,
    node_id: NodeId,
    public_key: PublicKey,
    remote_addr: SocketAddr,
    direction: Direction,
    start_time: Instant,
    config: Arc<P2pConfig>,
    events: Arc<dyn Events>,
    on_closed: impl FnOnce(NodeId, ReasonCode) + Send + 'static,
) -> ChannelHandle {
    let (send_queue, mut send_rx) = send_queue_channel(config.send_queue_capacity);
    let (close_tx, close_rx) = watch::channel(false);
    let liveness = LivenessTracker::new();

    let handle = ChannelHandle {
        node_id,
        public_key,
        remote_addr,
        direction,
        start_time,
        send_queue: send_queue.clone(),
        close_tx,
    };

    let keepalive_send = handle.send_queue.clone();
    let keepalive_liveness = liveness.clone();
    let keepalive_cancel = close_rx.clone();
    let ping_interval = config.ping_interval;
    let idle_timeout = config.idle_timeout;
    tokio::spawn(async move {
        let outcome = run_keepalive(
            keepalive_liveness,
            move |frame| keepalive_send.send_fast(frame),
            ping_interval,
            idle_timeout,
            keepalive_cancel,
        )
        .await;
        if let KeepaliveOutcome::IdleTimeout = outcome {
            debug!("channel idle timeout reached");
        }
    });

    let max_frame_len = config.max_frame_len;
    tokio::spawn(async move {
        let reason = run_connection_loop(
            stream,
            node_id,
            &mut send_rx,
            liveness,
            events,
            close_rx,
            max_frame_len,
        )
        .await;
        on_closed(node_id, reason);
    });

    handle
}

#[allow(clippy::too_many_arguments)]
async fn run_connection_loop(
    stream: TcpStream,
    node_id: NodeId,
    send_rx: &mut send_queue::SendQueueReceiver,
    liveness: LivenessTracker,
    events: Arc<dyn Events>,
    mut close_rx: watch::Receiver<bool>,
    max_frame_len: u32,
) -> ReasonCode {
    let mut framed = Framed::new(stream, FrameCodec::with_max_frame_len(max_frame_len));

    loop {
        tokio::select! {
            biased;

            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    let _ = framed.close().await;
                    return ReasonCode::Requested;
                }
            }

            outgoing = send_rx.recv() => {
                match outgoing {
                    Some(frame) => {
                        if let Err(err) = framed.send(frame).await {
                            warn!(%node_id, error = %err, "failed to write frame");
                            return ReasonCode::TcpError;
                        }
                    }
                    None => {
                        let _ = framed.close().await;
                        return ReasonCode::Requested;
                    }
                }
            }

            incoming = framed.next() => {
                match incoming {
                    Some(Ok(frame)) => {
                        liveness.record_read();
                        match handle_incoming(&frame, node_id, events.as_ref()).await {
                            Incoming::Close(reason) => return reason,
                            Incoming::Reply(reply) => {
                                if let Err(err) = framed.send(reply).await {
                                    warn!(%node_id, error = %err, "failed to write reply frame");
                                    return ReasonCode::TcpError;
                                }
                            }
                            Incoming::Continue => {}
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%node_id, error = %err, "frame decode error");
                        return ReasonCode::ProtocolError;
                    }
                    None => {
                        debug!(%node_id, "peer closed connection");
                        return ReasonCode::ClientQuitting;
                    }
                }
            }
        }
    }
}

enum Incoming {
    Continue,
    Reply(Frame),
    Close(ReasonCode),
}

async fn handle_incoming(frame: &Frame, node_id: NodeId, events: &dyn Events) -> Incoming {
    let message = match Message::from_frame(frame) {
        Ok(message) => message,
        Err(err) => {
            warn!(%node_id, error = %err, "malformed message");
            return Incoming::Close(ReasonCode::ProtocolError);
        }
    };

    match message {
        Message::Disconnect(disconnect) => {
            debug!(%node_id, reason = ?disconnect.reason, "peer requested disconnect");
            Incoming::Close(disconnect.reason)
        }
        Message::Ping(ping) => {
            Incoming::Reply(Message::Pong(crate::message::Pong { nonce: ping.nonce }).into_frame(0))
        }
        Message::Pong(_) => {
            // Liveness (and RTT sampling, once layered stats land) is
            // already recorded by the caller on every frame read.
            Incoming::Continue
        }
        Message::Application { type_id, payload } => {
            events.on_message(node_id, type_id, payload).await;
            Incoming::Continue
        }
        Message::Init(_) | Message::Hello(_) | Message::World(_) => {
            warn!(%node_id, "handshake message received after handshake completed");
            Incoming::Close(ReasonCode::ProtocolError)
        }
    }
}

/// Upper bound a caller should wait for a channel to settle into
/// [`ChannelState::Active`] before giving up, used by the manager's dial
/// loop.
pub fn default_establish_timeout() -> Duration {
    Duration::from_secs(10)
}
