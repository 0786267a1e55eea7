//! Row reorder buffer: ordered release over out-of-order completion
//!
//! Lets a bounded worker pool process submitted items concurrently while the
//! buffer enforces strict FIFO release order matching submission order, with
//! backpressure once too much work is in flight.
//!
//! ```text
//!  submit ──> seq 0,1,2,3...        complete (any order)
//!     │                                  │
//!     ▼                                  ▼
//!  ┌──────────────────────────────────────────────┐
//!  │  RowReorderBuffer                            │
//!  │  next_release ──────┐                        │
//!  │  [0:done][1:done][2:pending][3:done]         │
//!  └──────────────────────────────────────────────┘
//!                        │
//!            drain_ready ▼  releases 0,1 then stops at 2
//! ```
//!
//! Invariants (the property-test surface):
//! - `next_release_seq <= next_submit_seq` always
//! - `total_submitted == total_released + in_flight` at any quiescent point
//! - release order is a non-decreasing sequence of submission numbers; output
//!   is always a prefix of submission order, never a permutation
//! - completing the same ticket twice, or an unknown ticket, is an integrity
//!   error, not a silent no-op
//!
//! Backpressure is carried by a `tokio::sync::Semaphore`: `submit` awaits a
//! slot once `in_flight >= max_pending`, and `drain_ready` returns slots as
//! it releases items. `shutdown` closes the semaphore so blocked and future
//! submitters fail fast, while already-recorded completions stay drainable.

use crate::error::{PipelineError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Receipt for one submission; redeemed exactly once on completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReorderTicket {
    seq: u64,
}

impl ReorderTicket {
    /// Submission sequence number this ticket was issued for
    pub fn sequence(&self) -> u64 {
        self.seq
    }
}

#[derive(Debug)]
struct Inner<T> {
    next_submit: u64,
    next_release: u64,
    /// Submitted, not yet completed
    outstanding: HashSet<u64>,
    /// Completed, not yet released
    completed: HashMap<u64, T>,
    total_released: u64,
    shut_down: bool,
}

/// Concurrency primitive enforcing FIFO output order over concurrent workers
#[derive(Debug)]
pub struct RowReorderBuffer<T> {
    slots: Arc<Semaphore>,
    inner: Mutex<Inner<T>>,
}

impl<T> RowReorderBuffer<T> {
    /// Create a buffer admitting at most `max_pending` in-flight items
    pub fn new(max_pending: usize) -> Self {
        Self {
            slots: Arc::new(Semaphore::new(max_pending.max(1))),
            inner: Mutex::new(Inner {
                next_submit: 0,
                next_release: 0,
                outstanding: HashSet::new(),
                completed: HashMap::new(),
                total_released: 0,
                shut_down: false,
            }),
        }
    }

    /// Reserve the next submission slot, blocking under backpressure.
    ///
    /// Fails fast with [`PipelineError::Shutdown`] once [`shutdown`] has been
    /// called, including for submitters already parked on the semaphore.
    ///
    /// [`shutdown`]: Self::shutdown
    pub async fn submit(&self) -> Result<ReorderTicket> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| PipelineError::Shutdown("reorder buffer is shut down".to_string()))?;
        // Slot is returned by drain_ready when the item is released
        permit.forget();

        let mut inner = self.inner.lock();
        if inner.shut_down {
            drop(inner);
            self.slots.add_permits(1);
            return Err(PipelineError::Shutdown(
                "reorder buffer is shut down".to_string(),
            ));
        }
        let seq = inner.next_submit;
        inner.next_submit += 1;
        inner.outstanding.insert(seq);
        Ok(ReorderTicket { seq })
    }

    /// Record a completion. Does not itself release anything: release order
    /// is decided solely by [`drain_ready`](Self::drain_ready).
    pub fn complete(&self, ticket: ReorderTicket, result: T) -> Result<()> {
        let mut inner = self.inner.lock();
        if ticket.seq >= inner.next_submit {
            return Err(PipelineError::integrity(format!(
                "completion for unknown ticket {} (next submit is {})",
                ticket.seq, inner.next_submit
            )));
        }
        if !inner.outstanding.remove(&ticket.seq) {
            return Err(PipelineError::integrity(format!(
                "ticket {} completed twice",
                ticket.seq
            )));
        }
        inner.completed.insert(ticket.seq, result);
        Ok(())
    }

    /// Release the contiguous prefix of completed items in submission order,
    /// stopping at the first not-yet-completed sequence number.
    pub fn drain_ready(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        let mut released = Vec::new();
        loop {
            let seq = inner.next_release;
            match inner.completed.remove(&seq) {
                Some(item) => {
                    released.push(item);
                    inner.next_release += 1;
                }
                None => break,
            }
        }
        inner.total_released += released.len() as u64;
        drop(inner);

        if !released.is_empty() {
            self.slots.add_permits(released.len());
        }
        released
    }

    /// Refuse all further submissions. Completions already recorded remain
    /// drainable; abandoned in-flight items are recovered via the checkpoint
    /// path, never replayed from memory.
    pub fn shutdown(&self) {
        self.inner.lock().shut_down = true;
        self.slots.close();
    }

    /// Items submitted but not yet released
    pub fn in_flight(&self) -> u64 {
        let inner = self.inner.lock();
        inner.next_submit - inner.next_release
    }

    /// Total submissions accepted so far
    pub fn total_submitted(&self) -> u64 {
        self.inner.lock().next_submit
    }

    /// Total items released downstream so far
    pub fn total_released(&self) -> u64 {
        self.inner.lock().total_released
    }

    /// Sequence number the next submission would take
    pub fn next_submit_seq(&self) -> u64 {
        self.inner.lock().next_submit
    }

    /// Sequence number the next release is waiting on
    pub fn next_release_seq(&self) -> u64 {
        self.inner.lock().next_release
    }
}
