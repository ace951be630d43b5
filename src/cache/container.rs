//! Per-record-type manager: the owner -> cell map, the miss policy, change
//! scanning for the writer and the owner-scoped memory reclamation sweep.

use crate::bulk::quote_ident;
use crate::cache::cargo::{Cargo, CargoStatus};
use crate::cache::cell::Cell;
use crate::cache::loader::{self, LoaderHandle};
use crate::cache::writer;
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, ContainerStats};
use crate::record::{KeyArity, Record, RecordKey};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use std::any::Any;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cache-level knobs a container needs on its hot paths.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Tuning {
    pub(crate) update_size: usize,
    pub(crate) gc_seconds: i64,
    pub(crate) rw_analyse: bool,
}

pub(crate) struct Container<R> {
    pub(crate) pool: MySqlPool,
    pub(crate) preload: bool,
    pub(crate) tuning: Tuning,
    pub(crate) metrics: Arc<CacheMetrics>,

    arity: KeyArity,
    cells: DashMap<u32, Arc<Cell<R>>>,
    /// Serialises first-miss cell creation on preloaded containers.
    cell_lock: Mutex<()>,
    loader: LoaderHandle,

    pub(crate) db_load_num: AtomicU64,
    pub(crate) db_update_num: AtomicU64,
    pub(crate) db_delete_num: AtomicU64,
    gc_cell_num: AtomicU64,
    cell_reads: AtomicI64,
    cell_writes: AtomicI64,
}

impl<R: Record> Container<R> {
    pub(crate) fn new(
        pool: MySqlPool,
        preload: bool,
        tuning: Tuning,
        metrics: Arc<CacheMetrics>,
        cancel: CancellationToken,
    ) -> CacheResult<Arc<Self>> {
        let arity = KeyArity::of::<R>()?;
        assert!(
            R::COLUMNS.len() >= R::KEY_ARITY,
            "{} declares fewer columns than key parts",
            R::TABLE
        );

        let (wait_tx, wait_rx) = mpsc::channel(loader::WAIT_QUEUE);
        let container = Arc::new(Container {
            pool,
            preload,
            tuning,
            metrics,
            arity,
            cells: DashMap::new(),
            cell_lock: Mutex::new(()),
            loader: LoaderHandle::new(R::TABLE, wait_tx.clone()),
            db_load_num: AtomicU64::new(0),
            db_update_num: AtomicU64::new(0),
            db_delete_num: AtomicU64::new(0),
            gc_cell_num: AtomicU64::new(0),
            cell_reads: AtomicI64::new(0),
            cell_writes: AtomicI64::new(0),
        });
        loader::spawn(Arc::downgrade(&container), wait_rx, wait_tx, cancel);
        Ok(container)
    }

    fn cell_load(&self, sid: u32) -> Option<Arc<Cell<R>>> {
        if self.tuning.rw_analyse {
            self.cell_reads.fetch_add(1, Ordering::Relaxed);
        }
        self.cells.get(&sid).map(|entry| entry.value().clone())
    }

    fn cell_store(&self, sid: u32, cell: Arc<Cell<R>>) {
        if self.tuning.rw_analyse {
            self.cell_writes.fetch_add(1, Ordering::Relaxed);
        }
        self.cells.insert(sid, cell);
    }

    /// Install an empty cargo for the owner unless a cell already exists.
    fn ensure_cell(&self, sid: u32) -> Arc<Cell<R>> {
        match self.cells.entry(sid) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => {
                if self.tuning.rw_analyse {
                    self.cell_writes.fetch_add(1, Ordering::Relaxed);
                }
                entry
                    .insert(Arc::new(Cell::new(Arc::new(Cargo::new(self.arity)))))
                    .clone()
            }
        }
    }

    /// The miss path. `will_change` records mutation intent on the cargo.
    ///
    /// Preloaded containers never query the database: a missing owner simply
    /// gets an empty cargo, created under the cell lock so concurrent misses
    /// cannot install duplicates. Lazy containers delegate to the coalescing
    /// loader, which guarantees a cell exists afterwards even when the owner
    /// has no rows.
    pub(crate) async fn get(&self, sid: u32, will_change: bool) -> CacheResult<Arc<Cargo<R>>> {
        if let Some(cell) = self.cell_load(sid) {
            if will_change {
                cell.cargo.mark_changed();
            }
            return Ok(cell.cargo.clone());
        }

        if self.preload {
            let _guard = self.cell_lock.lock().expect("cell lock poisoned");
            // another miss may have won the lock first
            if let Some(cell) = self.cell_load(sid) {
                if will_change {
                    cell.cargo.mark_changed();
                }
                return Ok(cell.cargo.clone());
            }
            let cargo = Arc::new(Cargo::new(self.arity));
            if will_change {
                cargo.mark_changed();
            }
            self.cell_store(sid, Arc::new(Cell::new(cargo.clone())));
            return Ok(cargo);
        }

        self.loader.load(sid).await?;
        let cell = self.cell_load(sid).ok_or(CacheError::LoadFailed {
            table: R::TABLE,
            message: "no cell installed after batched load".into(),
        })?;
        if will_change {
            cell.cargo.mark_changed();
        }
        Ok(cell.cargo.clone())
    }

    pub(crate) fn get_all(&self) -> Vec<R> {
        let mut out = Vec::new();
        for entry in self.cells.iter() {
            entry.value().cargo.collect_all(&mut out);
        }
        out
    }

    /// Collect up to `budget` dirty entries across cells, marking each
    /// visited dirty cargo as syncing.
    pub(crate) fn scan_changed(&self, budget: usize) -> (Vec<R>, Vec<RecordKey>) {
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        let mut scanned = 0usize;
        for entry in self.cells.iter() {
            if scanned >= budget {
                break;
            }
            let cell = entry.value();
            if !cell.cargo.is_changed() {
                continue;
            }
            scanned += cell
                .cargo
                .collect_changed(*entry.key(), &mut updates, &mut deletes, true);
        }
        (updates, deletes)
    }

    /// Reconcile every syncing cargo, then reclaim expired clean cells.
    pub(crate) fn after_sync(&self, success: bool) {
        let now = Utc::now().timestamp();
        let mut evicted = 0u64;
        self.cells.retain(|_, cell| {
            cell.cargo.after_sync(success);
            if !self.preload && cell.cargo.status() == CargoStatus::Normal {
                let at = cell.release_time();
                if at > 0 && at < now {
                    evicted += 1;
                    return false;
                }
            }
            true
        });
        if evicted > 0 {
            self.gc_cell_num.fetch_add(evicted, Ordering::Relaxed);
            if self.tuning.rw_analyse {
                self.cell_writes.fetch_add(evicted as i64, Ordering::Relaxed);
            }
            self.metrics.add_evicted(R::TABLE, evicted);
        }
    }

    /// Bulk-load the whole table. Used once at registration for preloaded
    /// containers.
    pub(crate) async fn preload_all(&self) -> CacheResult<()> {
        let started = Instant::now();
        let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM ");
        qb.push(quote_ident(R::TABLE));
        let rows = qb.build_query_as::<R>().fetch_all(&self.pool).await?;

        let loaded = rows.len() as u64;
        for rec in rows {
            let sid = rec.owner_id();
            let cell = self.ensure_cell(sid);
            cell.cargo.load_from_db(rec);
        }
        self.db_load_num.fetch_add(loaded, Ordering::Relaxed);
        self.metrics.add_loaded(R::TABLE, loaded);
        info!(
            table = R::TABLE,
            rows = loaded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "preloaded table"
        );
        Ok(())
    }

    /// One coalesced loader round-trip: fetch every requested owner's rows
    /// in a single `IN` query and materialise them.
    pub(crate) async fn load_owners(&self, sids: &[u32]) -> CacheResult<()> {
        let mut qb = QueryBuilder::<MySql>::new("SELECT * FROM ");
        qb.push(quote_ident(R::TABLE));
        qb.push(" WHERE ");
        qb.push(quote_ident(R::COLUMNS[0]));
        qb.push(" IN (");
        {
            let mut sep = qb.separated(", ");
            for sid in sids {
                sep.push_bind(*sid);
            }
        }
        qb.push(")");
        let rows = qb.build_query_as::<R>().fetch_all(&self.pool).await?;

        self.metrics.inc_select_batch(R::TABLE);
        self.install_loaded(sids, rows);
        Ok(())
    }

    fn install_loaded(&self, sids: &[u32], rows: Vec<R>) {
        // every requested owner gets a cell, rows or not, so an owner with no
        // data cannot keep punching through to the database
        for sid in sids {
            self.ensure_cell(*sid);
        }
        let loaded = rows.len() as u64;
        for rec in rows {
            let sid = rec.owner_id();
            match self.cell_load(sid) {
                Some(cell) => cell.cargo.load_from_db(rec),
                None => error!(table = R::TABLE, sid, "no cell for loaded row"),
            }
        }
        self.db_load_num.fetch_add(loaded, Ordering::Relaxed);
        self.metrics.add_loaded(R::TABLE, loaded);
    }
}

/// Type-erased container handle: everything the scheduler and the cache-wide
/// owner operations need without knowing the record type.
#[async_trait]
pub(crate) trait AnyContainer: Send + Sync + 'static {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
    fn table(&self) -> &'static str;
    fn preloaded(&self) -> bool;
    /// One writer step. True means the container is fully drained.
    async fn drain(&self) -> bool;
    fn pre_init(&self, sid: u32);
    fn set_gc(&self, sid: u32);
    fn unset_gc(&self, sid: u32);
    fn stats(&self) -> ContainerStats;
}

#[async_trait]
impl<R: Record> AnyContainer for Container<R> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn table(&self) -> &'static str {
        R::TABLE
    }

    fn preloaded(&self) -> bool {
        self.preload
    }

    async fn drain(&self) -> bool {
        writer::drain(self).await
    }

    fn pre_init(&self, sid: u32) {
        if self.preload {
            return;
        }
        self.ensure_cell(sid);
    }

    fn set_gc(&self, sid: u32) {
        if self.preload {
            return;
        }
        if let Some(cell) = self.cell_load(sid) {
            cell.set_release_time(Utc::now().timestamp() + self.tuning.gc_seconds);
        }
    }

    fn unset_gc(&self, sid: u32) {
        if self.preload {
            return;
        }
        if let Some(cell) = self.cell_load(sid) {
            cell.set_release_time(0);
        }
    }

    fn stats(&self) -> ContainerStats {
        let mut stats = ContainerStats {
            table: R::TABLE,
            ..Default::default()
        };
        for entry in self.cells.iter() {
            let cell = entry.value();
            stats.cells += 1;
            let status = cell.cargo.status();
            if status != CargoStatus::Normal {
                stats.changed_cells += 1;
            }
            if !self.preload && status == CargoStatus::Normal && cell.release_time() > 0 {
                stats.gc_pending += 1;
            }
            stats.records += cell.cargo.record_count() as u64;
            let (updates, deletes) = cell.cargo.pending_counts();
            stats.pending_updates += updates;
            stats.pending_deletes += deletes;
        }
        stats.approx_memory_bytes = stats.records * std::mem::size_of::<R>() as u64;
        stats.gc_cells_total = self.gc_cell_num.load(Ordering::Relaxed);
        stats.db_loaded = self.db_load_num.load(Ordering::Relaxed);
        stats.db_upserted = self.db_update_num.load(Ordering::Relaxed);
        stats.db_deleted = self.db_delete_num.load(Ordering::Relaxed);
        stats.cell_reads = self.cell_reads.load(Ordering::Relaxed);
        stats.cell_writes = self.cell_writes.load(Ordering::Relaxed);
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testrows::{Inventory, lazy_pool};

    fn tuning() -> Tuning {
        Tuning {
            update_size: 100,
            gc_seconds: 60,
            rw_analyse: true,
        }
    }

    fn container(preload: bool) -> Arc<Container<Inventory>> {
        Container::new(
            lazy_pool(),
            preload,
            tuning(),
            Arc::new(CacheMetrics::new().unwrap()),
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn inv(sid: u32, item_id: u32, qty: i64) -> Inventory {
        Inventory { sid, item_id, qty }
    }

    #[tokio::test]
    async fn pre_init_installs_an_empty_cargo_once() {
        let c = container(false);
        c.pre_init(5);
        c.pre_init(5);
        assert_eq!(c.cells.len(), 1);

        let cargo = c.get(5, false).await.unwrap();
        assert!(cargo.get_many(&[]).is_empty());
    }

    #[tokio::test]
    async fn preloaded_miss_creates_without_touching_the_database() {
        let c = container(true);
        // the pool cannot connect, so reaching the database would error
        let cargo = c.get(9, true).await.unwrap();
        assert_eq!(cargo.status(), CargoStatus::Changed);
        assert_eq!(c.cells.len(), 1);

        // second get returns the same cargo
        let again = c.get(9, false).await.unwrap();
        assert!(Arc::ptr_eq(&cargo, &again));
    }

    #[tokio::test]
    async fn mutations_flow_through_get_with_will_change() {
        let c = container(false);
        c.pre_init(1);
        let cargo = c.get(1, true).await.unwrap();
        cargo.replace(inv(1, 10, 5));

        let (updates, deletes) = c.scan_changed(100);
        assert_eq!(updates.len(), 1);
        assert!(deletes.is_empty());
    }

    #[tokio::test]
    async fn scan_stops_at_the_budget() {
        let c = container(false);
        for sid in 1..=4u32 {
            c.pre_init(sid);
            let cargo = c.get(sid, true).await.unwrap();
            for item in 0..10u32 {
                cargo.replace(inv(sid, item, 1));
            }
        }

        let (updates, deletes) = c.scan_changed(20);
        // whole cargos are collected, so the scan stops after two owners
        assert_eq!(updates.len() + deletes.len(), 20);
        c.after_sync(true);

        // the other two owners are still pending
        let (rest, _) = c.scan_changed(1000);
        assert_eq!(rest.len(), 20);
    }

    #[tokio::test]
    async fn expired_clean_cells_are_reclaimed() {
        let c = container(false);
        c.pre_init(5);
        let cell = c.cell_load(5).unwrap();
        cell.set_release_time(Utc::now().timestamp() - 10);

        c.after_sync(true);
        assert!(c.cell_load(5).is_none());
        assert_eq!(c.gc_cell_num.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn dirty_cells_survive_the_sweep() {
        let c = container(false);
        c.pre_init(5);
        let cargo = c.get(5, true).await.unwrap();
        cargo.replace(inv(5, 1, 1));
        let cell = c.cell_load(5).unwrap();
        cell.set_release_time(Utc::now().timestamp() - 10);

        c.after_sync(true);
        assert!(c.cell_load(5).is_some(), "changed cell must not be evicted");
    }

    #[tokio::test]
    async fn pinned_cells_survive_the_sweep() {
        let c = container(false);
        c.pre_init(5);
        // release_time stays 0: pinned
        c.after_sync(true);
        assert!(c.cell_load(5).is_some());
    }

    #[tokio::test]
    async fn unset_gc_pins_the_cell_again() {
        let c = container(false);
        c.pre_init(5);
        c.set_gc(5);
        assert!(c.cell_load(5).unwrap().release_time() > 0);

        c.unset_gc(5);
        assert_eq!(c.cell_load(5).unwrap().release_time(), 0);
    }

    #[tokio::test]
    async fn preloaded_containers_ignore_gc_flags() {
        let c = container(true);
        let _ = c.get(5, false).await.unwrap();
        c.set_gc(5);
        assert_eq!(c.cell_load(5).unwrap().release_time(), 0);
    }

    #[tokio::test]
    async fn stats_reflect_the_container() {
        let c = container(false);
        c.pre_init(1);
        c.pre_init(2);
        let cargo = c.get(1, true).await.unwrap();
        cargo.replace(inv(1, 10, 5));
        cargo.replace(inv(1, 11, 2));
        let other = c.get(2, true).await.unwrap();
        other.replace(inv(2, 1, 1));
        other.delete_one(&inv(2, 1, 1));

        let stats = AnyContainer::stats(c.as_ref());
        assert_eq!(stats.table, "inventory");
        assert_eq!(stats.cells, 2);
        assert_eq!(stats.changed_cells, 2);
        assert_eq!(stats.records, 2);
        assert_eq!(stats.pending_updates, 2);
        assert_eq!(stats.pending_deletes, 1);
        assert!(stats.cell_reads > 0);
        assert!(stats.cell_writes > 0);
        assert_eq!(
            stats.approx_memory_bytes,
            2 * std::mem::size_of::<Inventory>() as u64
        );
    }
}
