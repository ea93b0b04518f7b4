//! Outbound frame queue.

use std::collections::VecDeque;
use std::time::Duration;

use gatelink_proto::Frame;

/// Pause between two drains while more frames are waiting.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(10);

/// A frame waiting to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundEntry {
    /// The frame.
    pub frame: Frame,
    /// Whether it jumped the queue.
    pub high_priority: bool,
}

/// FIFO of outbound frames; high priority entries go to the front.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<OutboundEntry>,
}

impl OutboundQueue {
    /// Empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a frame. Returns true if it is now the only entry, i.e. nothing
    /// is draining and the caller should start a drain.
    pub fn enqueue(&mut self, frame: Frame, high_priority: bool) -> bool {
        let entry = OutboundEntry {
            frame,
            high_priority,
        };
        if high_priority {
            self.entries.push_front(entry);
        } else {
            self.entries.push_back(entry);
        }
        self.entries.len() == 1
    }

    /// Take the next entry to send.
    pub fn next(&mut self) -> Option<OutboundEntry> {
        self.entries.pop_front()
    }

    /// Number of waiting entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything, returning how many entries were discarded.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatelink_proto::OpCode;
    use serde_json::json;

    fn data(n: i64) -> Frame {
        Frame::new(OpCode::Dispatch, json!(n))
    }

    #[test]
    fn test_fifo_among_equal_priority() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(data(1), false);
        queue.enqueue(data(2), false);
        queue.enqueue(data(3), false);

        let order: Vec<_> = std::iter::from_fn(|| queue.next()).map(|e| e.frame.d).collect();
        assert_eq!(order, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_high_priority_goes_to_front() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(data(1), false);
        queue.enqueue(data(2), false);
        queue.enqueue(Frame::heartbeat(7), true);

        let first = queue.next().unwrap();
        assert!(first.high_priority);
        assert_eq!(first.frame.op, OpCode::Heartbeat);
        assert_eq!(queue.next().unwrap().frame.d, json!(1));
    }

    #[test]
    fn test_enqueue_reports_idle_queue() {
        let mut queue = OutboundQueue::new();
        assert!(queue.enqueue(data(1), false));
        assert!(!queue.enqueue(data(2), false));
        queue.next();
        queue.next();
        assert!(queue.enqueue(data(3), true));
    }

    #[test]
    fn test_clear_reports_dropped() {
        let mut queue = OutboundQueue::new();
        queue.enqueue(data(1), false);
        queue.enqueue(data(2), false);
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.len(), 0);
    }
}
