use tokio::sync::mpsc;

use crate::codec::Frame;

#[derive(Debug, thiserror::Error)]
pub enum SendQueueError {
    #[error("channel's send queue has been closed")]
    Closed,
    #[error("channel's send queue is full")]
    Full,
}

/// Per-channel outbound queue with a bounded "normal" lane and an unbounded
/// "fast" lane for control traffic (PING/DISCONNECT) that must not be stuck
/// behind a backlog of application messages, generalizing the single
/// `mpsc::Receiver` the connection loop this is grounded on drains.
#[derive(Clone)]
pub struct SendQueue {
    normal_tx: mpsc::Sender<Frame>,
    fast_tx: mpsc::UnboundedSender<Frame>,
}

pub struct SendQueueReceiver {
    normal_rx: mpsc::Receiver<Frame>,
    fast_rx: mpsc::UnboundedReceiver<Frame>,
}

pub fn channel(capacity: usize) -> (SendQueue, SendQueueReceiver) {
    let (normal_tx, normal_rx) = mpsc::channel(capacity);
    let (fast_tx, fast_rx) = mpsc::unbounded_channel();
    (
        SendQueue { normal_tx, fast_tx },
        SendQueueReceiver { normal_rx, fast_rx },
    )
}

impl SendQueue {
    /// Enqueues a frame on the bounded normal lane without waiting for
    /// room: a full queue fails immediately with [`SendQueueError::Full`]
    /// rather than exerting backpressure on the caller, matching the
    /// send-queue's "failure if full" contract.
    pub fn send(&self, frame: Frame) -> Result<(), SendQueueError> {
        self.normal_tx.try_send(frame).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => SendQueueError::Full,
            mpsc::error::TrySendError::Closed(_) => SendQueueError::Closed,
        })
    }

    pub fn send_fast(&self, frame: Frame) -> Result<(), SendQueueError> {
        self.fast_tx.send(frame).map_err(|_| SendQueueError::Closed)
    }
}

impl SendQueueReceiver {
    /// Returns the next frame to write, always preferring the fast lane so
    /// control traffic cannot be starved by a full normal queue.
    pub async fn recv(&mut self) -> Option<Frame> {
        if let Ok(frame) = self.fast_rx.try_recv() {
            return Some(frame);
        }
        tokio::select! {
            biased;
            frame = self.fast_rx.recv() => frame,
            frame = self.normal_rx.recv() => frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_lane_is_served_before_normal_lane() {
        let (queue, mut receiver) = channel(8);
        queue.send(Frame::new(1, 0, vec![1])).unwrap();
        queue.send_fast(Frame::new(2, 0, vec![2])).unwrap();

        let first = receiver.recv().await.unwrap();
        assert_eq!(first.packet_type, 2);
        let second = receiver.recv().await.unwrap();
        assert_eq!(second.packet_type, 1);
    }

    #[tokio::test]
    async fn recv_returns_none_once_closed() {
        let (queue, mut receiver) = channel(8);
        drop(queue);
        assert!(receiver.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_reports_full_instead_of_blocking() {
        let (queue, _receiver) = channel(1);
        queue.send(Frame::new(1, 0, vec![1])).unwrap();
        assert!(matches!(
            queue.send(Frame::new(1, 0, vec![2])),
            Err(SendQueueError::Full)
        ));
    }
}
