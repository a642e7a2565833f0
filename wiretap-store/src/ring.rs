//! Bounded, most-recent-first log buffer with live fan-out to subscribers.
//!
//! The hot path (`push`) must never block on a slow subscriber or a full
//! queue: each subscriber gets its own bounded channel and a full queue just
//! drops the record for that one subscriber.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;
use wiretap_core::model::LogRecord;

pub struct SubscriberHandle(u64);

pub struct RingBuffer {
    capacity: usize,
    records: Mutex<VecDeque<LogRecord>>,
    subscribers: DashMap<u64, mpsc::Sender<LogRecord>>,
    next_id: AtomicU64,
}

impl RingBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            records: Mutex::new(VecDeque::with_capacity(capacity)),
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Insert at the head, evicting from the tail past capacity, then
    /// broadcast to every live subscriber.
    pub fn push(&self, record: LogRecord) {
        {
            let mut records = self.records.lock().unwrap();
            records.push_front(record.clone());
            while records.len() > self.capacity {
                records.pop_back();
            }
        }

        let mut dead = Vec::new();
        for entry in self.subscribers.iter() {
            match entry.value().try_send(record.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(subscriber = entry.key(), "dropping log for slow subscriber");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    dead.push(*entry.key());
                }
            }
        }
        for id in dead {
            self.subscribers.remove(&id);
        }
    }

    /// Shallow copy of the first `min(limit, len)` records, newest first.
    pub fn snapshot(&self, limit: usize) -> Vec<LogRecord> {
        let records = self.records.lock().unwrap();
        records.iter().take(limit).cloned().collect()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a live listener with a bounded outbound queue of `queue_depth`.
    pub fn subscribe(&self, queue_depth: usize) -> (SubscriberHandle, mpsc::Receiver<LogRecord>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(queue_depth);
        self.subscribers.insert(id, tx);
        (SubscriberHandle(id), rx)
    }

    pub fn unsubscribe(&self, handle: SubscriberHandle) {
        self.subscribers.remove(&handle.0);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}
