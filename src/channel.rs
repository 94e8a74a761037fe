// ============================================================================
// PACKET QUEUE
// ============================================================================
// Bounded hand-off between the UDP receiver and the parser task.
//
// Backpressure is drop-newest: when the queue is full the incoming datagram
// is discarded and counted, the receiver never blocks.
// ============================================================================

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use flume::{Receiver as FlumeReceiver, Sender as FlumeSender, TrySendError};
use serde::{Deserialize, Serialize};

/// One raw datagram, copied out of the receive buffer
pub type Packet = Vec<u8>;

// ----------------------------------------------------------------------------
// Channel Statistics
// ----------------------------------------------------------------------------

/// Live counters for a packet queue.
#[derive(Debug, Default)]
pub struct ChannelStats {
    /// Packets accepted into the queue
    pub sent: AtomicU64,
    /// Packets taken off the queue
    pub received: AtomicU64,
    /// Packets discarded because the queue was full
    pub dropped: AtomicU64,
    /// Current queue depth
    pub depth: AtomicUsize,
    /// High water mark (max depth seen)
    pub high_water_mark: AtomicUsize,
}

impl ChannelStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_send(&self) {
        self.sent.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub fn record_receive(&self) {
        self.received.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Count one dropped packet, returns the cumulative total
    pub fn record_drop(&self) -> u64 {
        self.dropped.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    pub fn update_depth(&self, depth: usize) {
        self.depth.store(depth, AtomicOrdering::Relaxed);

        let mut hwm = self.high_water_mark.load(AtomicOrdering::Relaxed);
        while depth > hwm {
            match self.high_water_mark.compare_exchange_weak(
                hwm,
                depth,
                AtomicOrdering::Relaxed,
                AtomicOrdering::Relaxed,
            ) {
                Ok(_) => break,
                Err(h) => hwm = h,
            }
        }
    }

    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            sent: self.sent.load(AtomicOrdering::Relaxed),
            received: self.received.load(AtomicOrdering::Relaxed),
            dropped: self.dropped.load(AtomicOrdering::Relaxed),
            depth: self.depth.load(AtomicOrdering::Relaxed),
            high_water_mark: self.high_water_mark.load(AtomicOrdering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatsSnapshot {
    pub sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub depth: usize,
    pub high_water_mark: usize,
}

// ----------------------------------------------------------------------------
// Packet Queue
// ----------------------------------------------------------------------------

/// Bounded FIFO of raw packets shared by the receiver and parser tasks.
#[derive(Debug)]
pub struct PacketQueue {
    sender: FlumeSender<Packet>,
    receiver: FlumeReceiver<Packet>,
    capacity: usize,
    stats: Arc<ChannelStats>,
}

impl PacketQueue {
    /// Create a queue holding at most `capacity` packets (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender,
            receiver,
            capacity,
            stats: Arc::new(ChannelStats::new()),
        }
    }

    /// Producer handle for the receiver task
    pub fn sender(&self) -> PacketSender {
        PacketSender {
            sender: self.sender.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Consumer handle for the parser task
    pub fn receiver(&self) -> PacketReceiver {
        PacketReceiver {
            receiver: self.receiver.clone(),
            stats: Arc::clone(&self.stats),
        }
    }

    /// Get current depth.
    pub fn len(&self) -> usize {
        self.sender.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sender.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> ChannelStatsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.depth = self.len();
        snapshot
    }
}

/// Sending half of a packet queue.
#[derive(Debug, Clone)]
pub struct PacketSender {
    sender: FlumeSender<Packet>,
    stats: Arc<ChannelStats>,
}

impl PacketSender {
    /// Enqueue without waiting. A full queue drops the packet and counts it.
    pub fn try_send(&self, packet: Packet) -> Result<(), TrySendError<Packet>> {
        match self.sender.try_send(packet) {
            Ok(()) => {
                self.stats.record_send();
                self.stats.update_depth(self.sender.len());
                Ok(())
            }
            Err(e @ TrySendError::Full(_)) => {
                self.stats.record_drop();
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Cumulative number of dropped packets
    pub fn dropped(&self) -> u64 {
        self.stats.dropped.load(AtomicOrdering::Relaxed)
    }
}

/// Receiving half of a packet queue.
#[derive(Debug, Clone)]
pub struct PacketReceiver {
    receiver: FlumeReceiver<Packet>,
    stats: Arc<ChannelStats>,
}

impl PacketReceiver {
    /// Wait for the next packet. `None` once every sender is gone and the
    /// queue is drained.
    pub async fn recv(&self) -> Option<Packet> {
        let packet = self.receiver.recv_async().await.ok()?;
        self.on_receive();
        Some(packet)
    }

    fn on_receive(&self) {
        self.stats.record_receive();
        self.stats.update_depth(self.receiver.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = PacketQueue::new(4);
        let tx = queue.sender();
        let rx = queue.receiver();

        tx.try_send(b"a:1|c".to_vec()).unwrap();
        tx.try_send(b"b:1|c".to_vec()).unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"a:1|c".to_vec());
        assert_eq!(rx.recv().await.unwrap(), b"b:1|c".to_vec());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let queue = PacketQueue::new(2);
        let tx = queue.sender();
        let rx = queue.receiver();

        tx.try_send(vec![1]).unwrap();
        tx.try_send(vec![2]).unwrap();
        assert!(matches!(tx.try_send(vec![3]), Err(TrySendError::Full(_))));
        assert!(matches!(tx.try_send(vec![4]), Err(TrySendError::Full(_))));
        assert_eq!(tx.dropped(), 2);

        // The packets already queued survive.
        assert_eq!(rx.recv().await.unwrap(), vec![1]);
        assert_eq!(rx.recv().await.unwrap(), vec![2]);

        let stats = queue.stats();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.dropped, 2);
        assert_eq!(stats.depth, 0);
        assert_eq!(stats.high_water_mark, 2);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue = PacketQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        assert!(queue.sender().try_send(vec![0]).is_ok());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_record_drop_returns_total() {
        let stats = ChannelStats::new();
        assert_eq!(stats.record_drop(), 1);
        assert_eq!(stats.record_drop(), 2);
    }

    #[tokio::test]
    async fn test_recv_ends_when_senders_dropped() {
        let (tx, rx) = {
            let queue = PacketQueue::new(4);
            (queue.sender(), queue.receiver())
        };

        tx.try_send(vec![9]).unwrap();
        drop(tx);

        assert_eq!(rx.recv().await, Some(vec![9]));
        assert_eq!(rx.recv().await, None);
    }
}
