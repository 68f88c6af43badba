//! Message store collaborator.
//!
//! Application messages arriving on the control port are persisted through
//! a `MessageStore`. The mesh only ever inserts; reading back is up to the
//! application.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::NodeAddr;

/// Errors reported by a message store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    #[error("message store rejected record: {0}")]
    Rejected(String),
}

/// One stored message, as seen by the receiving node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender_name: String,
    pub sender_address: NodeAddr,
    pub receiver_name: String,
    pub receiver_address: NodeAddr,
    pub text: String,
    /// Unix seconds at which the sender created the message.
    pub timestamp: u64,
}

/// Sink for received application messages.
pub trait MessageStore: Send {
    /// Persist one record.
    fn insert(&mut self, record: MessageRecord) -> Result<(), StoreError>;
}

/// In-memory store.
///
/// Clones share the same backing buffer, so a test or the host application
/// can keep a handle while the mesh worker owns another. When a capacity is
/// set, the oldest records are evicted first.
#[derive(Clone, Debug, Default)]
pub struct MemoryMessageStore {
    records: Arc<Mutex<VecDeque<MessageRecord>>>,
    capacity: Option<usize>,
}

impl MemoryMessageStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store keeping at most `capacity` records.
    pub fn bounded(capacity: usize) -> Self {
        Self {
            records: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Snapshot of stored records, oldest first.
    pub fn records(&self) -> Vec<MessageRecord> {
        match self.records.lock() {
            Ok(records) => records.iter().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().iter().cloned().collect(),
        }
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageStore for MemoryMessageStore {
    fn insert(&mut self, record: MessageRecord) -> Result<(), StoreError> {
        let mut records = self
            .records
            .lock()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        if let Some(capacity) = self.capacity {
            if capacity == 0 {
                return Err(StoreError::Rejected("store capacity is zero".into()));
            }
            while records.len() >= capacity {
                records.pop_front();
            }
        }
        records.push_back(record);
        Ok(())
    }
}
