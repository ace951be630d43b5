// tests/fairness.rs
//
// Scheduler round-robin over stub containers: a container that still has
// work keeps the index, a fully drained one advances it, and the wrap tick
// idles once per sweep.

use crate::cache::{AnyContainer, scheduler_tick};
use crate::metrics::ContainerStats;
use async_trait::async_trait;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

struct StubContainer {
    name: &'static str,
    update_size: usize,
    remaining: AtomicUsize,
    log: Arc<Mutex<Vec<(&'static str, usize)>>>,
}

impl StubContainer {
    fn new(
        name: &'static str,
        work: usize,
        update_size: usize,
        log: Arc<Mutex<Vec<(&'static str, usize)>>>,
    ) -> Arc<Self> {
        Arc::new(StubContainer {
            name,
            update_size,
            remaining: AtomicUsize::new(work),
            log,
        })
    }
}

#[async_trait]
impl AnyContainer for StubContainer {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn table(&self) -> &'static str {
        self.name
    }

    fn preloaded(&self) -> bool {
        false
    }

    async fn drain(&self) -> bool {
        let remaining = self.remaining.load(Ordering::Relaxed);
        let emitted = remaining.min(self.update_size);
        self.remaining.store(remaining - emitted, Ordering::Relaxed);
        self.log.lock().unwrap().push((self.name, emitted));
        emitted < self.update_size
    }

    fn pre_init(&self, _sid: u32) {}
    fn set_gc(&self, _sid: u32) {}
    fn unset_gc(&self, _sid: u32) {}

    fn stats(&self) -> ContainerStats {
        ContainerStats::default()
    }
}

#[tokio::test]
async fn round_robin_stays_on_a_busy_container() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = StubContainer::new("a", 250, 100, log.clone());
    let b = StubContainer::new("b", 250, 100, log.clone());
    let list: Vec<Arc<dyn AnyContainer>> = vec![a.clone(), b.clone()];

    let mut idx = 0usize;
    for _ in 0..6 {
        scheduler_tick(&list, &mut idx).await;
    }

    assert_eq!(
        log.lock().unwrap().as_slice(),
        &[
            ("a", 100),
            ("a", 100),
            ("a", 50),
            ("b", 100),
            ("b", 100),
            ("b", 50),
        ]
    );
    assert_eq!(a.remaining.load(Ordering::Relaxed), 0);
    assert_eq!(b.remaining.load(Ordering::Relaxed), 0);
    assert_eq!(idx, 2);
}

#[tokio::test]
async fn wrap_tick_idles_once_per_sweep() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let a = StubContainer::new("a", 10, 100, log.clone());
    let list: Vec<Arc<dyn AnyContainer>> = vec![a];

    let mut idx = 0usize;
    scheduler_tick(&list, &mut idx).await; // drains the 10
    assert_eq!(idx, 1);

    scheduler_tick(&list, &mut idx).await; // wrap: no drain this tick
    assert_eq!(idx, 0);
    assert_eq!(log.lock().unwrap().len(), 1);

    scheduler_tick(&list, &mut idx).await; // next sweep drains again (empty)
    assert_eq!(log.lock().unwrap().as_slice(), &[("a", 10), ("a", 0)]);
}

#[tokio::test]
async fn empty_list_keeps_idling() {
    let list: Vec<Arc<dyn AnyContainer>> = Vec::new();
    let mut idx = 0usize;
    scheduler_tick(&list, &mut idx).await;
    scheduler_tick(&list, &mut idx).await;
    assert_eq!(idx, 0);
}
