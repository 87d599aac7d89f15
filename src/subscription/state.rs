//! Subscription ready states and the pre-payload operation buffer.

use serde_json::Value;
use std::collections::vec_deque::{Drain, VecDeque};
use std::fmt;

/// Lifecycle of a subscription.
///
/// ```text
/// discovering → subscribing → subscribed → unsubscribing → unsubscribed
///      └────────────────────────────────────────────────────────↗
/// ```
///
/// `Unsubscribed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadyState {
    Discovering,
    Subscribing,
    Subscribed,
    Unsubscribing,
    Unsubscribed,
}

impl ReadyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovering => "discovering",
            Self::Subscribing => "subscribing",
            Self::Subscribed => "subscribed",
            Self::Unsubscribing => "unsubscribing",
            Self::Unsubscribed => "unsubscribed",
        }
    }

    /// Teardown has started or finished
    pub fn is_closing(&self) -> bool {
        *self >= Self::Unsubscribing
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FIFO of filtered operations received before the payload went out.
///
/// Draining (or clearing) ends buffering for good: later pushes are
/// handed back to the caller for immediate emission.
#[derive(Debug, Default)]
pub struct OpBuffer {
    entries: VecDeque<Value>,
    closed: bool,
}

impl OpBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_buffering(&self) -> bool {
        !self.closed
    }

    /// Queue an operation, or return it when buffering has ended
    pub fn push(&mut self, op: Value) -> Result<(), Value> {
        if self.closed {
            return Err(op);
        }
        self.entries.push_back(op);
        Ok(())
    }

    /// Take every queued operation in arrival order and stop buffering
    pub fn drain(&mut self) -> Drain<'_, Value> {
        self.closed = true;
        self.entries.drain(..)
    }

    /// Discard queued operations and stop buffering
    pub fn clear(&mut self) {
        self.closed = true;
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_state_order() {
        assert!(ReadyState::Discovering < ReadyState::Subscribing);
        assert!(!ReadyState::Subscribed.is_closing());
        assert!(ReadyState::Unsubscribing.is_closing());
        assert!(ReadyState::Unsubscribed.is_closing());
        assert_eq!(ReadyState::Subscribing.to_string(), "subscribing");
    }

    #[test]
    fn test_buffer_drains_once() {
        let mut buffer = OpBuffer::new();
        buffer.push(json!(1)).unwrap();
        buffer.push(json!(2)).unwrap();
        assert_eq!(buffer.len(), 2);

        let drained: Vec<_> = buffer.drain().collect();
        assert_eq!(drained, vec![json!(1), json!(2)]);
        assert!(!buffer.is_buffering());

        // never re-buffers after the flush
        assert_eq!(buffer.push(json!(3)), Err(json!(3)));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_clear_stops_buffering() {
        let mut buffer = OpBuffer::new();
        buffer.push(json!(1)).unwrap();
        buffer.clear();
        assert!(buffer.is_empty());
        assert!(buffer.push(json!(2)).is_err());
    }
}
