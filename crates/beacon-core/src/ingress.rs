//! Bounded ingress queue
//!
//! The single object shared between socket tasks and the dispatcher.
//! Fixed capacity, one mutex held only for O(1) work. `push` never
//! blocks: a full queue rejects the event and the caller drops it after
//! bumping the error counter. The dispatcher pops with a bounded wait so
//! it can interleave draining with the periodic reaper.
//!
//! Connection lifecycle (`Accepted`/`Closed`) travels through the same
//! queue as frames, which keeps the dispatcher the sole registry mutator
//! and preserves per-connection ordering: a single socket task produces
//! accepted, then frames, then closed.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use beacon_protocol::{clock, Envelope};

use crate::conn::ConnHandle;

/// One unit of work for the dispatcher
#[derive(Debug)]
pub enum IngressEvent {
    /// Transport accepted a connection
    Accepted(ConnHandle),
    /// A parsed frame arrived on a connection
    Frame(ConnHandle, Envelope),
    /// Transport observed the connection close
    Closed(ConnHandle),
}

/// Queue entry: event plus enqueue timestamp in monotonic milliseconds
#[derive(Debug)]
pub struct IngressEntry {
    /// The queued event
    pub event: IngressEvent,
    /// When the producer enqueued it
    pub enqueued_ms: u64,
}

/// Push rejected: queue at capacity
#[derive(Debug, thiserror::Error)]
#[error("ingress queue full")]
pub struct QueueFull;

/// Mutex-guarded FIFO of fixed capacity
pub struct IngressQueue {
    inner: Mutex<VecDeque<IngressEntry>>,
    ready: Condvar,
    capacity: usize,
}

impl IngressQueue {
    /// Pre-allocate a queue of the given capacity
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            ready: Condvar::new(),
            capacity,
        }
    }

    // A poisoned lock means a producer panicked between two O(1) queue
    // operations; the deque itself is still consistent, so recover.
    fn lock(&self) -> MutexGuard<'_, VecDeque<IngressEntry>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue one event; fails without blocking when full
    pub fn push(&self, event: IngressEvent) -> Result<(), QueueFull> {
        let mut queue = self.lock();
        if queue.len() >= self.capacity {
            return Err(QueueFull);
        }
        queue.push_back(IngressEntry {
            event,
            enqueued_ms: clock::now_millis(),
        });
        drop(queue);
        self.ready.notify_one();
        Ok(())
    }

    /// Non-blocking pop
    pub fn try_pop(&self) -> Option<IngressEntry> {
        self.lock().pop_front()
    }

    /// Pop, waiting up to `timeout` for an entry to arrive
    pub fn pop_timeout(&self, timeout: Duration) -> Option<IngressEntry> {
        let mut queue = self.lock();
        if let Some(entry) = queue.pop_front() {
            return Some(entry);
        }
        let (mut queue, _) = self
            .ready
            .wait_timeout(queue, timeout)
            .unwrap_or_else(PoisonError::into_inner);
        queue.pop_front()
    }

    /// Entries currently queued
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
