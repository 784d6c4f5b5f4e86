//! Bounded offline queue
//!
//! Holds outbound messages while the tunnel is down. On overflow the oldest
//! entry is evicted and handed back to the caller so the loss is counted.

use std::collections::VecDeque;

use kb_protocol::Message;
use tokio::time::Instant;

/// A message waiting for the tunnel to come back
#[derive(Debug, Clone)]
pub struct OfflineQueueEntry {
    /// The message to send
    pub payload: Message,
    /// When it was queued
    pub enqueued_at: Instant,
}

impl OfflineQueueEntry {
    /// Wrap a message, stamping it with the current time
    pub fn new(payload: Message) -> Self {
        Self {
            payload,
            enqueued_at: Instant::now(),
        }
    }
}

/// Drop-oldest ring buffer of outbound messages
#[derive(Debug)]
pub struct OfflineQueue {
    entries: VecDeque<OfflineQueueEntry>,
    capacity: usize,
}

impl OfflineQueue {
    /// Create a queue holding at most `capacity` entries (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting and returning the oldest entry if full
    pub fn push(&mut self, payload: Message) -> Option<OfflineQueueEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(OfflineQueueEntry::new(payload));
        evicted
    }

    /// Put an entry whose send failed back at the head.
    ///
    /// If the queue filled up in the meantime the entry itself is the oldest
    /// and is returned as evicted.
    pub fn requeue_front(&mut self, entry: OfflineQueueEntry) -> Option<OfflineQueueEntry> {
        if self.entries.len() >= self.capacity {
            return Some(entry);
        }
        self.entries.push_front(entry);
        None
    }

    /// Take the oldest entry
    pub fn pop(&mut self) -> Option<OfflineQueueEntry> {
        self.entries.pop_front()
    }

    /// Number of queued entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heartbeat(n: u64) -> Message {
        Message::HeartbeatAck { timestamp: n }
    }

    fn timestamps(queue: &mut OfflineQueue) -> Vec<u64> {
        let mut out = Vec::new();
        while let Some(entry) = queue.pop() {
            match entry.payload {
                Message::HeartbeatAck { timestamp } => out.push(timestamp),
                other => panic!("unexpected {:?}", other),
            }
        }
        out
    }

    #[test]
    fn test_fifo_order() {
        let mut queue = OfflineQueue::new(10);
        for n in 0..3 {
            assert!(queue.push(heartbeat(n)).is_none());
        }
        assert_eq!(timestamps(&mut queue), vec![0, 1, 2]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let mut queue = OfflineQueue::new(10);
        let mut dropped = Vec::new();
        for n in 0..25 {
            if let Some(evicted) = queue.push(heartbeat(n)) {
                dropped.push(evicted);
            }
            assert!(queue.len() <= queue.capacity());
        }

        assert_eq!(dropped.len(), 15);
        assert_eq!(timestamps(&mut queue), (15..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_requeue_front() {
        let mut queue = OfflineQueue::new(2);
        queue.push(heartbeat(1));
        queue.push(heartbeat(2));

        let head = queue.pop().unwrap();
        assert!(queue.requeue_front(head).is_none());
        assert_eq!(queue.len(), 2);

        // Full again: the requeued entry is the oldest, so it is the one dropped
        let head = queue.pop().unwrap();
        queue.push(heartbeat(3));
        assert!(queue.requeue_front(head).is_some());
        assert_eq!(timestamps(&mut queue), vec![2, 3]);
    }

    #[test]
    fn test_zero_capacity_rounds_up() {
        let mut queue = OfflineQueue::new(0);
        assert_eq!(queue.capacity(), 1);
        queue.push(heartbeat(1));
        assert!(queue.push(heartbeat(2)).is_some());
        assert_eq!(timestamps(&mut queue), vec![2]);
    }
}
