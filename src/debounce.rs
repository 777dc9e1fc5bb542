//! Latest-state-only coalescing for preview recomputation.
//!
//! Rapid edits (dragging, scroll-wheel scaling) submit a new state each
//! time. The worker waits until submissions have been quiet for a short
//! interval and then handles only the most recent state; intermediate
//! states are dropped, never queued.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::trace;

struct Slot<T> {
    pending: Option<T>,
    submitted_at: Instant,
    shutdown: bool,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    wake: Condvar,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Runs a handler on a background thread with the latest submitted value.
///
/// Dropping the debouncer stops the worker; a value still waiting out its
/// quiet period is discarded.
pub struct Debouncer<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Debouncer<T> {
    /// Spawn the worker thread.
    ///
    /// `handler` runs once `quiet` has elapsed since the last submission.
    pub fn spawn<F>(quiet: Duration, mut handler: F) -> Self
    where
        F: FnMut(T) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            slot: Mutex::new(Slot {
                pending: None,
                submitted_at: Instant::now(),
                shutdown: false,
            }),
            wake: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::spawn(move || {
            while let Some(value) = next_value(&worker_shared, quiet) {
                handler(value);
            }
        });

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Replace any pending value with `value` and restart the quiet period.
    pub fn submit(&self, value: T) {
        let mut slot = self.shared.lock();
        if slot.pending.replace(value).is_some() {
            trace!("coalesced pending preview update");
        }
        slot.submitted_at = Instant::now();
        self.shared.wake.notify_one();
    }
}

/// Block until a value has been quiet for `quiet`, or shutdown.
fn next_value<T>(shared: &Shared<T>, quiet: Duration) -> Option<T> {
    let mut slot = shared.lock();
    loop {
        if slot.shutdown {
            return None;
        }
        if slot.pending.is_none() {
            slot = shared
                .wake
                .wait(slot)
                .unwrap_or_else(PoisonError::into_inner);
            continue;
        }
        let elapsed = slot.submitted_at.elapsed();
        if elapsed >= quiet {
            return slot.pending.take();
        }
        slot = shared
            .wake
            .wait_timeout(slot, quiet - elapsed)
            .unwrap_or_else(PoisonError::into_inner)
            .0;
    }
}

impl<T: Send + 'static> Drop for Debouncer<T> {
    fn drop(&mut self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_one();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
