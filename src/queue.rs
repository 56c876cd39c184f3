//! Bounded outbound message queue.
//!
//! Messages sent while the channel is not authenticated are held here and
//! flushed in FIFO order once authentication succeeds. The queue keeps only
//! the most recent `capacity` messages; the oldest is dropped on overflow.

use crate::models::Envelope;
use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct MessageQueue {
    items: VecDeque<Envelope>,
    capacity: usize,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(128)),
            capacity,
        }
    }

    /// Append an envelope, dropping the oldest entry when full.
    /// Returns `true` if an old entry was dropped.
    pub fn push(&mut self, envelope: Envelope) -> bool {
        let mut dropped = false;
        while self.items.len() >= self.capacity && self.capacity > 0 {
            self.items.pop_front();
            dropped = true;
        }
        if self.capacity > 0 {
            self.items.push_back(envelope);
        }
        dropped
    }

    /// Take every queued envelope, oldest first, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<Envelope> {
        self.items.drain(..).collect()
    }

    /// Put unsent envelopes back at the head of the queue, in order, ahead
    /// of anything queued since they were drained. Overflow drops the
    /// oldest entries, same as [`push`](MessageQueue::push).
    pub fn requeue_front(&mut self, envelopes: Vec<Envelope>) {
        for envelope in envelopes.into_iter().rev() {
            self.items.push_front(envelope);
        }
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env(n: usize) -> Envelope {
        Envelope::new("test", json!({ "n": n }))
    }

    #[test]
    fn test_fifo_order() {
        let mut q = MessageQueue::new(100);
        for n in 0..10 {
            q.push(env(n));
        }
        let drained = q.drain();
        assert_eq!(drained.len(), 10);
        for (i, e) in drained.iter().enumerate() {
            assert_eq!(e.data["n"], i);
        }
        assert!(q.is_empty());
    }

    #[test]
    fn test_bounded_drops_oldest() {
        let mut q = MessageQueue::new(100);
        for n in 0..150 {
            q.push(env(n));
        }
        assert_eq!(q.len(), 100);
        let drained = q.drain();
        // The first 50 were dropped; the queue holds 50..150.
        assert_eq!(drained.first().unwrap().data["n"], 50);
        assert_eq!(drained.last().unwrap().data["n"], 149);
    }

    #[test]
    fn test_requeue_front_goes_ahead_of_newer_messages() {
        let mut q = MessageQueue::new(100);
        for n in 0..5 {
            q.push(env(n));
        }
        let mut drained = q.drain();
        // 0 and 1 went out; 5 and 6 arrived while 2..5 were in flight.
        let unsent = drained.split_off(2);
        q.push(env(5));
        q.push(env(6));
        q.requeue_front(unsent);

        let order: Vec<u64> = q.drain().iter().map(|e| e.data["n"].as_u64().unwrap()).collect();
        assert_eq!(order, vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_requeue_front_overflow_drops_oldest() {
        let mut q = MessageQueue::new(3);
        q.push(env(10));
        q.push(env(11));
        q.requeue_front(vec![env(0), env(1), env(2)]);

        let order: Vec<u64> = q.drain().iter().map(|e| e.data["n"].as_u64().unwrap()).collect();
        assert_eq!(order, vec![2, 10, 11]);
    }

    #[test]
    fn test_push_reports_drop() {
        let mut q = MessageQueue::new(2);
        assert!(!q.push(env(0)));
        assert!(!q.push(env(1)));
        assert!(q.push(env(2)));
    }
}
