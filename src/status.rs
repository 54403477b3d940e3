//! Status tracking.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering::Relaxed};

#[derive(Default)]
pub struct Status {
    pub crashes: Crashes,
    cancelled: AtomicBool,
}

#[derive(Default)]
pub struct Crashes {
    complete: AtomicUsize,
    failed: AtomicUsize,
    total: AtomicUsize,
}

impl Status {
    /// Stop processing further crash ids.
    pub fn cancel(&self) {
        self.cancelled.store(true, Relaxed);
    }

    /// Return whether execution has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Relaxed)
    }
}

impl Crashes {
    pub fn set_total(&self, val: usize) {
        self.total.store(val, Relaxed)
    }

    pub fn total_count(&self) -> usize {
        self.total.load(Relaxed)
    }

    pub fn inc_complete(&self) {
        self.complete.fetch_add(1, Relaxed);
    }

    pub fn complete_count(&self) -> usize {
        self.complete.load(Relaxed)
    }

    pub fn inc_failed(&self) {
        self.failed.fetch_add(1, Relaxed);
    }

    pub fn failed_count(&self) -> usize {
        self.failed.load(Relaxed)
    }

    pub fn done(&self) -> bool {
        self.complete_count() == self.total_count()
    }
}
