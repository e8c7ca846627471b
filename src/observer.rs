// src/observer.rs - Queue-backed observers for tag change notification
use crate::value::Value;
use chrono::{DateTime, Utc};
use crossbeam_queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_OBSERVER_ID: AtomicU64 = AtomicU64::new(1);

/// Immutable snapshot of one tag change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub tag_name: String,
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

/// Bounded lock-free queue of notifications.
///
/// Pushing into a full queue drops the new event and counts it. The
/// producer (the tag store) never blocks on a slow consumer.
#[derive(Debug)]
pub struct NotificationQueue {
    queue: ArrayQueue<Notification>,
    dropped: AtomicU64,
}

impl NotificationQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity.max(1)),
            dropped: AtomicU64::new(0),
        }
    }

    /// Returns false when the event was dropped.
    pub fn push(&self, notification: Notification) -> bool {
        match self.queue.push(notification) {
            Ok(()) => true,
            Err(_) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn pop(&self) -> Option<Notification> {
        self.queue.pop()
    }

    /// Take everything currently queued, oldest first
    pub fn drain(&self) -> Vec<Notification> {
        let mut out = Vec::with_capacity(self.queue.len());
        while let Some(n) = self.queue.pop() {
            out.push(n);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    /// Number of events lost to overflow since creation
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// A registration handle attached to one or more tags.
///
/// `owner` names the component holding the observer (an alarm manager, a
/// machine) and is what the store reports when a tag is in use.
#[derive(Debug, Clone)]
pub struct Observer {
    id: u64,
    owner: String,
    queue: Arc<NotificationQueue>,
}

impl Observer {
    pub fn new(owner: impl Into<String>, capacity: usize) -> Self {
        Self::with_queue(owner, Arc::new(NotificationQueue::new(capacity)))
    }

    /// Observer delivering into an existing, possibly shared, queue
    pub fn with_queue(owner: impl Into<String>, queue: Arc<NotificationQueue>) -> Self {
        Self {
            id: NEXT_OBSERVER_ID.fetch_add(1, Ordering::Relaxed),
            owner: owner.into(),
            queue,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn queue(&self) -> &Arc<NotificationQueue> {
        &self.queue
    }

    pub(crate) fn notify(&self, notification: Notification) -> bool {
        self.queue.push(notification)
    }
}
