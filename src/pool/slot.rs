//! Fixed-capacity slot queue
//!
//! The queue is both the pool's storage and its backpressure semaphore: an
//! item is either a live connection or an empty placeholder, and a caller
//! may only hold a connection after popping a slot. Items live in a
//! lock-free `ArrayQueue`; the semaphore's permit count mirrors the number
//! of queued items so that `pop` can wait without a lock.

use crossbeam_queue::ArrayQueue;
use tokio::sync::Semaphore;
use tokio::time::Instant;

/// One capacity unit of the pool
pub(crate) enum Slot<C> {
    /// Placeholder awaiting a lazy dial
    Empty,
    Live(LiveSlot<C>),
}

/// A connection parked in the queue with its bookkeeping
pub(crate) struct LiveSlot<C> {
    pub(crate) conn: C,
    pub(crate) created_at: Instant,
    pub(crate) last_used_at: Instant,
}

impl<C> Slot<C> {
    pub(crate) fn into_conn(self) -> Option<C> {
        match self {
            Slot::Empty => None,
            Slot::Live(live) => Some(live.conn),
        }
    }
}

pub(crate) struct SlotQueue<C> {
    items: ArrayQueue<Slot<C>>,
    ready: Semaphore,
}

impl<C> SlotQueue<C> {
    /// Create an empty queue holding at most `capacity` slots
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity),
            ready: Semaphore::new(0),
        }
    }

    /// Queue a slot without blocking.
    ///
    /// Hands the slot back if the queue is already full.
    pub(crate) fn push(&self, slot: Slot<C>) -> Result<(), Slot<C>> {
        self.items.push(slot)?;
        // Publish the permit only after the item is visible to poppers.
        self.ready.add_permits(1);
        Ok(())
    }

    /// Wait for a slot.
    ///
    /// Cancel-safe: dropping the future before it resolves consumes nothing.
    /// Returns `None` once the queue has been closed, or if `close` drained
    /// the item this call was entitled to.
    pub(crate) async fn pop(&self) -> Option<Slot<C>> {
        let permit = self.ready.acquire().await.ok()?;
        permit.forget();
        self.items.pop()
    }

    /// Wake every waiter and refuse further pops
    pub(crate) fn close(&self) {
        self.ready.close();
    }

    /// Remove every queued slot
    pub(crate) fn drain(&self) -> impl Iterator<Item = Slot<C>> + '_ {
        std::iter::from_fn(move || self.items.pop())
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.items.capacity()
    }
}
