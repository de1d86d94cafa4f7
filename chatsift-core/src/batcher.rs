//! Message buffer with size and debounce flush triggers.
//!
//! The batcher is a plain state machine; the pipeline task owns it and drives
//! its deadline with `tokio::time::sleep_until`. Every message is numbered on
//! arrival so failed batches can be merged back in arrival order, whatever
//! order their classifications finish in.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::BatcherConfig;
use crate::models::{Batch, ChatMessage};

#[derive(Debug)]
struct Queued {
    seq: u64,
    message: ChatMessage,
}

#[derive(Debug)]
pub struct Batcher {
    buffer: VecDeque<Queued>,
    /// Arrival numbers of messages handed out and not yet settled, by id.
    taken: HashMap<String, u64>,
    next_seq: u64,
    flush_threshold: usize,
    batch_size: usize,
    debounce: Duration,
    deadline: Option<Instant>,
    active: bool,
}

impl Batcher {
    pub fn new(config: &BatcherConfig) -> Self {
        Self {
            buffer: VecDeque::new(),
            taken: HashMap::new(),
            next_seq: 1,
            flush_threshold: config.flush_threshold.max(1),
            batch_size: config.batch_size.max(1),
            debounce: config.debounce(),
            deadline: None,
            active: true,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Pending debounce deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn pending(&self) -> impl Iterator<Item = &ChatMessage> {
        self.buffer.iter().map(|queued| &queued.message)
    }

    /// Appends to the tail. Returns true when the size trigger has fired and
    /// the caller should take one batch with [`Batcher::take_ready`].
    ///
    /// While stopped, messages are still buffered but no trigger fires.
    pub fn push(&mut self, messages: impl IntoIterator<Item = ChatMessage>, now: Instant) -> bool {
        let before = self.buffer.len();
        for message in messages {
            self.buffer.push_back(Queued {
                seq: self.next_seq,
                message,
            });
            self.next_seq += 1;
        }
        if self.buffer.len() == before || !self.active {
            return false;
        }

        if self.buffer.len() >= self.flush_threshold {
            self.deadline = None;
            true
        } else {
            self.deadline = Some(now + self.debounce);
            false
        }
    }

    /// Takes a batch if the size trigger is satisfied.
    pub fn take_ready(&mut self, now: Instant) -> Option<Batch> {
        if !self.active || self.buffer.len() < self.flush_threshold {
            return None;
        }
        self.take_batch(now)
    }

    /// Takes a batch if the debounce deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<Batch> {
        match self.deadline {
            Some(deadline) if self.active && now >= deadline => {
                self.deadline = None;
                self.take_batch(now)
            }
            _ => None,
        }
    }

    /// Removes `min(batch_size, len)` messages from the head. Re-arms the
    /// deadline for whatever is left.
    pub fn take_batch(&mut self, now: Instant) -> Option<Batch> {
        if self.buffer.is_empty() {
            return None;
        }

        let count = self.batch_size.min(self.buffer.len());
        let mut messages = Vec::with_capacity(count);
        for queued in self.buffer.drain(..count) {
            self.taken.insert(queued.message.id.clone(), queued.seq);
            messages.push(queued.message);
        }

        self.deadline = if self.active && !self.buffer.is_empty() {
            Some(now + self.debounce)
        } else {
            None
        };

        debug!(taken = count, remaining = self.buffer.len(), "Flushed batch");
        Some(Batch::new(messages))
    }

    /// Puts a failed batch back ahead of every message that arrived after it,
    /// original order intact. Messages this batcher never handed out count as
    /// the oldest. Does not arm the deadline.
    pub fn requeue(&mut self, batch: Batch) {
        let count = batch.len();
        let returned: Vec<Queued> = batch
            .into_messages()
            .into_iter()
            .map(|message| Queued {
                seq: self.taken.remove(&message.id).unwrap_or(0),
                message,
            })
            .collect();

        let mut rest = std::mem::take(&mut self.buffer).into_iter().peekable();
        for queued in returned {
            while let Some(older) = rest.next_if(|r| r.seq < queued.seq) {
                self.buffer.push_back(older);
            }
            self.buffer.push_back(queued);
        }
        self.buffer.extend(rest);

        debug!(requeued = count, buffered = self.buffer.len(), "Re-queued batch");
    }

    /// Forgets the arrival numbers of a batch that will not come back.
    pub fn settle(&mut self, batch: &Batch) {
        for message in &batch.messages {
            self.taken.remove(&message.id);
        }
    }

    /// Arms the debounce deadline for buffered messages.
    pub fn arm(&mut self, now: Instant) {
        if self.active && !self.buffer.is_empty() {
            self.deadline = Some(now + self.debounce);
        }
    }

    /// Stops flushing. Buffered messages are kept.
    pub fn stop(&mut self) {
        self.active = false;
        self.deadline = None;
    }

    pub fn start(&mut self, now: Instant) {
        self.active = true;
        self.arm(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> ChatMessage {
        ChatMessage::new("viewer", format!("message {}", id)).with_id(id)
    }

    fn ids(batch: &Batch) -> Vec<&str> {
        batch.ids()
    }

    fn buffered_ids(batcher: &Batcher) -> Vec<String> {
        batcher.pending().map(|m| m.id.clone()).collect()
    }

    fn config(threshold: usize, size: usize) -> BatcherConfig {
        BatcherConfig {
            flush_threshold: threshold,
            batch_size: size,
            debounce_ms: 50,
        }
    }

    #[test]
    fn test_single_message_arms_debounce() {
        let mut batcher = Batcher::new(&config(2, 2));
        let now = Instant::now();

        assert!(!batcher.push([msg("a")], now));
        assert_eq!(batcher.deadline(), Some(now + Duration::from_millis(50)));
        assert!(batcher.take_ready(now).is_none());

        assert!(batcher.take_due(now + Duration::from_millis(49)).is_none());
        let batch = batcher.take_due(now + Duration::from_millis(50)).unwrap();
        assert_eq!(ids(&batch), vec!["a"]);
        assert!(batcher.deadline().is_none());
    }

    #[test]
    fn test_new_arrival_resets_debounce() {
        let mut batcher = Batcher::new(&config(3, 3));
        let start = Instant::now();

        batcher.push([msg("a")], start);
        let later = start + Duration::from_millis(30);
        batcher.push([msg("b")], later);

        assert_eq!(batcher.deadline(), Some(later + Duration::from_millis(50)));
        assert!(batcher.take_due(start + Duration::from_millis(60)).is_none());
    }

    #[test]
    fn test_threshold_flushes_immediately() {
        let mut batcher = Batcher::new(&config(2, 2));
        let now = Instant::now();

        batcher.push([msg("a")], now);
        assert!(batcher.push([msg("b")], now));
        assert!(batcher.deadline().is_none());

        let batch = batcher.take_ready(now).unwrap();
        assert_eq!(ids(&batch), vec!["a", "b"]);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_flush_takes_min_of_batch_size_and_len() {
        for (len, batch_size) in [(1, 2), (2, 2), (5, 2), (5, 3), (3, 10)] {
            let mut batcher = Batcher::new(&config(100, batch_size));
            let now = Instant::now();
            let all: Vec<String> = (0..len).map(|i| format!("m{}", i)).collect();
            batcher.push(all.iter().map(|id| msg(id)), now);

            let batch = batcher.take_batch(now).unwrap();
            let expected = batch_size.min(len);
            assert_eq!(batch.len(), expected);
            assert_eq!(ids(&batch), all[..expected].iter().map(String::as_str).collect::<Vec<_>>());
            assert_eq!(buffered_ids(&batcher), all[expected..].to_vec());
        }
    }

    #[test]
    fn test_remainder_rearms_deadline() {
        let mut batcher = Batcher::new(&config(2, 2));
        let now = Instant::now();

        batcher.push([msg("a"), msg("b"), msg("c")], now);
        batcher.take_ready(now).unwrap();

        assert_eq!(buffered_ids(&batcher), vec!["c"]);
        assert_eq!(batcher.deadline(), Some(now + Duration::from_millis(50)));
    }

    #[test]
    fn test_requeue_goes_to_head_in_order() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();

        batcher.push([msg("a"), msg("b"), msg("c")], now);
        let batch = batcher.take_batch(now).unwrap();
        batcher.push([msg("d")], now);

        batcher.requeue(batch);
        assert_eq!(buffered_ids(&batcher), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_requeue_out_of_order_restores_arrival_order() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();

        batcher.push([msg("a"), msg("b"), msg("c"), msg("d"), msg("e")], now);
        let older = batcher.take_batch(now).unwrap();
        let newer = batcher.take_batch(now).unwrap();
        batcher.push([msg("f")], now);

        // The newer batch fails first.
        batcher.requeue(newer);
        assert_eq!(buffered_ids(&batcher), vec!["c", "d", "e", "f"]);

        batcher.requeue(older);
        assert_eq!(buffered_ids(&batcher), vec!["a", "b", "c", "d", "e", "f"]);
    }

    #[test]
    fn test_requeue_after_reflush_keeps_arrival_order() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();

        batcher.push([msg("a"), msg("b"), msg("c"), msg("d")], now);
        let first = batcher.take_batch(now).unwrap();
        let second = batcher.take_batch(now).unwrap();

        // The first batch fails and goes out again while the second is
        // still in flight; then both fail, newest first.
        batcher.requeue(first);
        let retried = batcher.take_batch(now).unwrap();
        assert_eq!(ids(&retried), vec!["a", "b"]);

        batcher.requeue(second);
        batcher.requeue(retried);
        assert_eq!(buffered_ids(&batcher), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_foreign_batch_requeues_at_head() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();
        batcher.push([msg("c")], now);

        batcher.requeue(Batch::new(vec![msg("a"), msg("b")]));
        assert_eq!(buffered_ids(&batcher), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_settled_batch_is_forgotten() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();

        batcher.push([msg("a"), msg("b")], now);
        let batch = batcher.take_batch(now).unwrap();
        batcher.settle(&batch);
        assert!(batcher.taken.is_empty());
    }

    #[test]
    fn test_requeue_does_not_arm_deadline() {
        let mut batcher = Batcher::new(&config(10, 2));
        let now = Instant::now();

        batcher.push([msg("a")], now);
        let batch = batcher.take_due(now + Duration::from_millis(50)).unwrap();
        batcher.requeue(batch);

        assert!(batcher.deadline().is_none());
        batcher.arm(now);
        assert!(batcher.deadline().is_some());
    }

    #[test]
    fn test_stop_keeps_buffer_and_blocks_flushes() {
        let mut batcher = Batcher::new(&config(2, 2));
        let now = Instant::now();

        batcher.push([msg("a")], now);
        batcher.stop();
        assert!(batcher.deadline().is_none());

        // Arrivals while stopped are kept, never flushed.
        assert!(!batcher.push([msg("b")], now));
        assert!(batcher.take_ready(now).is_none());
        assert!(batcher.deadline().is_none());
        assert_eq!(batcher.len(), 2);

        batcher.start(now);
        assert!(batcher.deadline().is_some());
        assert_eq!(ids(&batcher.take_ready(now).unwrap()), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_push_is_noop() {
        let mut batcher = Batcher::new(&config(2, 2));
        assert!(!batcher.push(Vec::new(), Instant::now()));
        assert!(batcher.deadline().is_none());
        assert!(batcher.take_batch(Instant::now()).is_none());
    }
}
