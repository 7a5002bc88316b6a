//! Wait coordinator.
//!
//! Consumers that find the queue empty park a waiter here. Waiters form a
//! FIFO by arrival; an operation that makes an item available wakes the
//! oldest waiter with a budget of exactly the items it just added, so one
//! push signals one waiter. A waiter whose receiving side is gone (its
//! deadline elapsed, or the caller dropped the future) is discarded without
//! consuming the budget.

use std::collections::VecDeque;

use tokio::sync::oneshot;
use tracing::debug;

/// FIFO list of pending waiters.
#[derive(Debug, Default)]
pub(crate) struct Waiters {
    pending: VecDeque<oneshot::Sender<()>>,
}

impl Waiters {
    /// Append a waiter and return the half that resolves when it is woken.
    pub fn register(&mut self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.pending.push_back(tx);
        rx
    }

    /// Whether no waiters are pending.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drop waiters whose receiving side is gone (timed out, or the caller
    /// dropped the future).
    pub fn sweep(&mut self) {
        self.pending.retain(|waiter| !waiter.is_closed());
    }

    /// Wake up to `newly_available` waiters, oldest first.
    ///
    /// The budget counts items the calling operation just made available,
    /// not the queue's total count. Each woken waiter receives exactly one
    /// success signal; the signal means opportunity, not reservation, so
    /// the woken consumer still races other consumers to `pop_open`.
    pub fn wake(&mut self, mut newly_available: u64) {
        while newly_available > 0 {
            let Some(waiter) = self.pending.pop_front() else {
                break;
            };
            if waiter.send(()).is_ok() {
                debug!("woke waiter");
                newly_available -= 1;
            }
        }
    }
}
