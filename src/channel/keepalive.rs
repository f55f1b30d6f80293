use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::RngCore;
use tokio::time::interval;

use crate::codec::Frame;
use crate::message::{Message, Ping};

/// Tracks the last time any frame was read from a channel, shared between
/// the connection's read loop and its keep-alive task so the idle watchdog
/// never needs its own lock-protected clock.
#[derive(Clone)]
pub struct LivenessTracker {
    last_read_millis: Arc<AtomicU64>,
    epoch: Instant,
}

impl LivenessTracker {
    pub fn new() -> Self {
        Self {
            last_read_millis: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    pub fn record_read(&self) {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        self.last_read_millis.store(elapsed, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let elapsed = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_read_millis.load(Ordering::Relaxed);
        Duration::from_millis(elapsed.saturating_sub(last))
    }
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome reported by [`run_keepalive`] when it decides the channel must
/// be torn down, letting the caller distinguish a protocol-visible ping
/// timeout from a silent idle timeout.
pub enum KeepaliveOutcome {
    IdleTimeout,
    Cancelled,
}

/// Periodically enqueues a PING on the fast lane and watches the liveness
/// tracker for the idle cutoff, mirroring the periodic-ping-plus-idle-check
/// loop the connection task this is grounded on runs inline, split out here
/// so it can be unit tested independently of any socket.
pub async fn run_keepalive(
    liveness: LivenessTracker,
    send_fast: impl Fn(Frame) -> Result<(), crate::channel::send_queue::SendQueueError>,
    ping_interval: Duration,
    idle_timeout: Duration,
    mut cancel: tokio::sync::watch::Receiver<bool>,
) -> KeepaliveOutcome {
    let mut ticker = interval(ping_interval);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let nonce = rand::thread_rng().next_u64();
                let frame = Message::Ping(Ping { nonce }).into_frame(0);
                if send_fast(frame).is_err() {
                    return KeepaliveOutcome::Cancelled;
                }
                if liveness.idle_for() >= idle_timeout {
                    return KeepaliveOutcome::IdleTimeout;
                }
            }
            changed = cancel.changed() => {
                if changed.is_err() || *cancel.borrow() {
                    return KeepaliveOutcome::Cancelled;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn liveness_tracker_starts_idle_from_creation() {
        let tracker = LivenessTracker::new();
        assert!(tracker.idle_for() < Duration::from_secs(1));
    }

    #[test]
    fn record_read_resets_idle_duration() {
        let tracker = LivenessTracker::new();
        std::thread::sleep(Duration::from_millis(20));
        tracker.record_read();
        assert!(tracker.idle_for() < Duration::from_millis(20));
    }
}
