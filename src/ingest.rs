/// Scan ingest queue: hands anchor sightings from the radio callback to the
/// registry writer.
///
/// The producer side never blocks: the radio callback must return quickly.
/// On a full queue everything pending is purged and the new sighting retried
/// once, so fresh data always wins over a backlog.
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::{Channel, TrySendError};

use crate::advert::APP_PAYLOAD_LEN;

/// Pending sightings before a purge.
pub const SCAN_QUEUE_DEPTH: usize = 32;

/// One anchor sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMessage {
    /// Registry slot of the sender.
    pub index: u8,
    pub rssi: i8,
    /// Application payload, all zeros if the sender carried none.
    pub payload: [u8; APP_PAYLOAD_LEN],
}

/// Outcome of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Accepted,
    /// The queue was full and its backlog discarded first.
    Purged,
}

pub struct ScanQueue<M: RawMutex, const N: usize = SCAN_QUEUE_DEPTH> {
    channel: Channel<M, ScanMessage, N>,
}

impl<M: RawMutex, const N: usize> ScanQueue<M, N> {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Non-blocking insert, purging on overflow.
    pub fn enqueue(&self, msg: ScanMessage) -> Enqueued {
        match self.channel.try_send(msg) {
            Ok(()) => Enqueued::Accepted,
            Err(TrySendError::Full(msg)) => {
                self.purge();
                // Only the callback produces, so the retry has room
                let _ = self.channel.try_send(msg);
                Enqueued::Purged
            }
        }
    }

    /// Wait for the next sighting.
    pub async fn dequeue(&self) -> ScanMessage {
        self.channel.receive().await
    }

    pub fn try_dequeue(&self) -> Option<ScanMessage> {
        self.channel.try_receive().ok()
    }

    fn purge(&self) {
        while self.channel.try_receive().is_ok() {}
    }
}

impl<M: RawMutex, const N: usize> Default for ScanQueue<M, N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

    fn msg(index: u8, rssi: i8) -> ScanMessage {
        ScanMessage {
            index,
            rssi,
            payload: [0u8; APP_PAYLOAD_LEN],
        }
    }

    fn drain<const N: usize>(q: &ScanQueue<CriticalSectionRawMutex, N>) -> std::vec::Vec<ScanMessage> {
        core::iter::from_fn(|| q.try_dequeue()).collect()
    }

    #[test]
    fn fifo_order() {
        let q: ScanQueue<CriticalSectionRawMutex> = ScanQueue::new();
        assert_eq!(q.enqueue(msg(0, -50)), Enqueued::Accepted);
        assert_eq!(q.enqueue(msg(1, -60)), Enqueued::Accepted);
        assert_eq!(block_on(q.dequeue()), msg(0, -50));
        assert_eq!(block_on(q.dequeue()), msg(1, -60));
        assert_eq!(q.try_dequeue(), None);
    }

    #[test]
    fn overflow_purges_then_accepts() {
        let q: ScanQueue<CriticalSectionRawMutex> = ScanQueue::new();
        for i in 0..SCAN_QUEUE_DEPTH {
            assert_eq!(q.enqueue(msg(i as u8 % 13, -50)), Enqueued::Accepted);
        }
        assert_eq!(q.enqueue(msg(4, -33)), Enqueued::Purged);

        // Backlog gone, only the new sighting remains
        assert_eq!(drain(&q), vec![msg(4, -33)]);
    }

    #[test]
    fn small_queue_overflow() {
        let q: ScanQueue<CriticalSectionRawMutex, 2> = ScanQueue::new();
        q.enqueue(msg(0, -1));
        q.enqueue(msg(1, -2));
        assert_eq!(q.enqueue(msg(2, -3)), Enqueued::Purged);
        assert_eq!(q.enqueue(msg(3, -4)), Enqueued::Accepted);
        assert_eq!(drain(&q), vec![msg(2, -3), msg(3, -4)]);
    }

    #[test]
    fn dequeue_waits_for_producer() {
        use std::sync::Arc;

        let q: Arc<ScanQueue<CriticalSectionRawMutex>> = Arc::new(ScanQueue::new());
        let consumer = {
            let q = q.clone();
            std::thread::spawn(move || block_on(q.dequeue()))
        };
        std::thread::sleep(std::time::Duration::from_millis(10));
        q.enqueue(msg(9, -77));
        assert_eq!(consumer.join().unwrap(), msg(9, -77));
    }
}
