use crate::cache::cargo::Cargo;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

/// The container's handle to one owner's cargo, plus its eviction schedule.
pub(crate) struct Cell<R> {
    pub(crate) cargo: Arc<Cargo<R>>,
    /// Unix seconds after which a clean cargo may be reclaimed; 0 = pinned.
    release_time: AtomicI64,
}

impl<R> Cell<R> {
    pub(crate) fn new(cargo: Arc<Cargo<R>>) -> Self {
        Cell {
            cargo,
            release_time: AtomicI64::new(0),
        }
    }

    pub(crate) fn release_time(&self) -> i64 {
        self.release_time.load(Ordering::Relaxed)
    }

    pub(crate) fn set_release_time(&self, at: i64) {
        self.release_time.store(at, Ordering::Relaxed);
    }
}
