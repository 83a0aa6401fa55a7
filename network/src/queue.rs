//! Bounded outbound message queue with oldest-first eviction.

use std::collections::VecDeque;

use log::debug;

use crate::protocol::WireMessage;

/// Per-link outbound buffer.
///
/// When the queue is full the oldest entry is evicted to make room for the
/// newest: stale visual updates are worse than missing ones. Contents are
/// flushed in FIFO order on reconnection.
#[derive(Debug)]
pub struct OutboundQueue {
    items: VecDeque<WireMessage>,
    capacity: usize,
    evicted: u64,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            evicted: 0,
        }
    }

    /// Append a message, evicting and returning the oldest entry if the
    /// queue is at capacity.
    pub fn push(&mut self, message: WireMessage) -> Option<WireMessage> {
        let evicted = if self.items.len() >= self.capacity {
            self.evicted += 1;
            debug!(
                "outbound queue full ({}), evicting oldest ({} total evictions)",
                self.capacity, self.evicted
            );
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(message);
        evicted
    }

    /// Remove and return the oldest message.
    pub fn pop(&mut self) -> Option<WireMessage> {
        self.items.pop_front()
    }

    /// Put a message back at the head after a failed send, preserving
    /// FIFO order for the next flush.
    pub fn requeue_front(&mut self, message: WireMessage) {
        if self.items.len() >= self.capacity {
            // Keep the invariant; the requeued message is the oldest, so it
            // is also the one freshness policy would sacrifice.
            return;
        }
        self.items.push_front(message);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total messages lost to overflow since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }
}
