//! Offline send queue.

use std::collections::VecDeque;

use relay_proto::MessageEnvelope;

/// FIFO of envelopes sent while the client was not connected.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    items: VecDeque<MessageEnvelope>,
}

impl OutboundQueue {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an envelope.
    pub fn push(&mut self, envelope: MessageEnvelope) {
        self.items.push_back(envelope);
    }

    /// Put an envelope back at the head, ahead of everything queued.
    pub fn push_front(&mut self, envelope: MessageEnvelope) {
        self.items.push_front(envelope);
    }

    /// Take the oldest envelope.
    pub fn pop(&mut self) -> Option<MessageEnvelope> {
        self.items.pop_front()
    }

    /// Number of queued envelopes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_push_pop_order() {
        let mut queue = OutboundQueue::new();
        assert!(queue.is_empty());
        queue.push(MessageEnvelope::character_chat("c", "first"));
        queue.push(MessageEnvelope::character_chat("c", "second"));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop().unwrap().field("message"), Some("first"));
        assert_eq!(queue.pop().unwrap().field("message"), Some("second"));
        assert!(queue.pop().is_none());
    }

    #[test]
    fn test_push_front_restores_head() {
        let mut queue = OutboundQueue::new();
        queue.push(MessageEnvelope::character_chat("c", "a"));
        queue.push(MessageEnvelope::character_chat("c", "b"));
        let head = queue.pop().unwrap();
        queue.push_front(head);
        assert_eq!(queue.pop().unwrap().field("message"), Some("a"));
    }

    proptest! {
        #[test]
        fn prop_drain_order_equals_enqueue_order(messages in prop::collection::vec("[a-z]{1,8}", 0..50)) {
            let mut queue = OutboundQueue::new();
            for message in &messages {
                queue.push(MessageEnvelope::character_chat("c", message.clone()));
            }
            let drained: Vec<String> = std::iter::from_fn(|| queue.pop())
                .filter_map(|env| env.field("message").map(str::to_string))
                .collect();
            prop_assert_eq!(drained, messages);
        }
    }
}
