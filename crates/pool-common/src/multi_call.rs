//! Fan-in of several asynchronous results into one callback.
//!
//! [`MultiCall::new`] hands out one [`CallHandle`] per expected result. Each
//! handle is consumed by [`CallHandle::complete`], so a slot can only be
//! filled once. When the last slot is filled the callback receives all
//! results in slot order. The shared state lives as long as any handle does.
//!
//! A handle that is dropped without completing leaves the join unresolved and
//! the callback never runs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

type Callback<T> = Box<dyn FnOnce(Vec<T>) + Send>;

/// Shared state of one fan-in.
pub struct MultiCall<T> {
    slots: Mutex<Vec<Option<T>>>,
    finished: AtomicUsize,
    total: usize,
    callback: Mutex<Option<Callback<T>>>,
}

impl<T: Send + 'static> MultiCall<T> {
    /// Create handles for `total` results.
    ///
    /// With `total == 0` the callback runs immediately with no results and
    /// no handles are returned.
    pub fn new<F>(total: usize, callback: F) -> Vec<CallHandle<T>>
    where
        F: FnOnce(Vec<T>) + Send + 'static,
    {
        if total == 0 {
            callback(Vec::new());
            return Vec::new();
        }

        let shared = Arc::new(MultiCall {
            slots: Mutex::new((0..total).map(|_| None).collect()),
            finished: AtomicUsize::new(0),
            total,
            callback: Mutex::new(Some(Box::new(callback))),
        });

        (0..total)
            .map(|index| CallHandle {
                shared: Arc::clone(&shared),
                index,
            })
            .collect()
    }

    fn store(&self, index: usize, value: T) {
        self.slots.lock()[index] = Some(value);

        let finished = self.finished.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(index, finished, total = self.total, "Call completed");
        if finished != self.total {
            return;
        }

        let results: Vec<T> = self.slots.lock().drain(..).flatten().collect();
        if let Some(callback) = self.callback.lock().take() {
            debug!(total = self.total, "All calls completed");
            callback(results);
        }
    }
}

/// Completion handle for one slot of a [`MultiCall`].
pub struct CallHandle<T> {
    shared: Arc<MultiCall<T>>,
    index: usize,
}

impl<T: Send + 'static> CallHandle<T> {
    /// Slot this handle fills.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Deliver this slot's result.
    pub fn complete(self, value: T) {
        self.shared.store(self.index, value);
    }
}
