//! Receipt Queue
//!
//! Receipts a messenger owes one counterpart chain, oldest first. Outbound
//! messages to that chain drain the front of the queue in bounded batches.

use std::collections::{HashSet, VecDeque};

use crate::codec::Receipt;
use crate::primitives::MessageId;

/// FIFO of receipts owed to one counterpart chain.
#[derive(Debug, Clone, Default)]
pub struct ReceiptQueue {
    receipts: VecDeque<Receipt>,
}

impl ReceiptQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.receipts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receipts.is_empty()
    }

    pub fn enqueue(&mut self, receipt: Receipt) {
        self.receipts.push_back(receipt);
    }

    /// Removes and returns up to `max` receipts from the front.
    pub fn dequeue_batch(&mut self, max: usize) -> Vec<Receipt> {
        let count = max.min(self.receipts.len());
        self.receipts.drain(..count).collect()
    }

    /// Drops every queued receipt whose id is in `ids`. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &HashSet<MessageId>) -> usize {
        let before = self.receipts.len();
        self.receipts.retain(|r| !ids.contains(&r.message_id));
        before - self.receipts.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Receipt> {
        self.receipts.iter()
    }
}
