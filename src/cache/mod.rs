//! The cache façade: routes operations to per-record-type containers and
//! drives the round-robin drain scheduler.

mod cargo;
mod cell;
mod container;
mod loader;
mod writer;

pub(crate) use container::{AnyContainer, Tuning};

use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::metrics::{CacheMetrics, ContainerStats};
use crate::record::Record;
use container::Container;
use sqlx::MySqlPool;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::info;

struct Shared {
    pool: MySqlPool,
    cfg: CacheConfig,
    metrics: Arc<CacheMetrics>,
    containers: RwLock<HashMap<TypeId, Arc<dyn AnyContainer>>>,
    /// Registration order; the scheduler walks this round-robin.
    container_list: RwLock<Vec<Arc<dyn AnyContainer>>>,
}

/// A write-behind object cache over MySQL.
///
/// Reads and mutations are served from per-owner in-memory record sets;
/// a background scheduler reconciles dirty entries to the database in
/// batches, one container per tick.
pub struct Cache {
    shared: Arc<Shared>,
    cancel: CancellationToken,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl Cache {
    /// Connect to the database and start the drain scheduler.
    pub async fn connect(cfg: CacheConfig) -> CacheResult<Cache> {
        cfg.validate()?;
        let pool = cfg.db.connect().await?;
        Self::with_pool(cfg, pool)
    }

    /// Build the cache on an existing pool.
    pub fn with_pool(cfg: CacheConfig, pool: MySqlPool) -> CacheResult<Cache> {
        cfg.validate()?;
        let metrics = Arc::new(CacheMetrics::new()?);
        let shared = Arc::new(Shared {
            pool,
            cfg,
            metrics,
            containers: RwLock::new(HashMap::new()),
            container_list: RwLock::new(Vec::new()),
        });
        let cancel = CancellationToken::new();
        let scheduler = tokio::spawn(run_scheduler(shared.clone(), cancel.clone()));
        Ok(Cache {
            shared,
            cancel,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Register a record type. Preloaded containers bulk-load their whole
    /// table now and never query the database again.
    pub async fn register<R: Record>(&self, preload: bool) -> CacheResult<()> {
        {
            let containers = self
                .shared
                .containers
                .read()
                .expect("container registry poisoned");
            if containers.contains_key(&TypeId::of::<R>()) {
                return Err(CacheError::ContainerExists(R::TABLE));
            }
        }

        let container = Container::<R>::new(
            self.shared.pool.clone(),
            preload,
            Tuning {
                update_size: self.shared.cfg.update_size,
                gc_seconds: self.shared.cfg.gc_seconds,
                rw_analyse: self.shared.cfg.rw_analyse,
            },
            self.shared.metrics.clone(),
            self.cancel.child_token(),
        )?;
        if preload {
            container.preload_all().await?;
        }

        let erased: Arc<dyn AnyContainer> = container;
        {
            let mut containers = self
                .shared
                .containers
                .write()
                .expect("container registry poisoned");
            if containers.contains_key(&TypeId::of::<R>()) {
                return Err(CacheError::ContainerExists(R::TABLE));
            }
            containers.insert(TypeId::of::<R>(), erased.clone());
        }
        self.shared
            .container_list
            .write()
            .expect("container list poisoned")
            .push(erased);
        info!(table = R::TABLE, preload, "container registered");
        Ok(())
    }

    fn container_of<R: Record>(&self) -> CacheResult<Arc<Container<R>>> {
        let any = {
            let containers = self
                .shared
                .containers
                .read()
                .expect("container registry poisoned");
            containers.get(&TypeId::of::<R>()).cloned()
        }
        .ok_or(CacheError::ContainerNotRegistered(R::TABLE))?;
        any.into_any()
            .downcast::<Container<R>>()
            .map_err(|_| CacheError::ContainerNotRegistered(R::TABLE))
    }

    fn list(&self) -> Vec<Arc<dyn AnyContainer>> {
        self.shared
            .container_list
            .read()
            .expect("container list poisoned")
            .clone()
    }

    /// Point lookup; `keys` are the sub-key parts after the owner id.
    pub async fn lookup<R: Record>(&self, sid: u32, keys: &[u32]) -> CacheResult<Option<R>> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(sid, false).await?;
        Ok(cargo.get_single(keys))
    }

    /// All of an owner's records whose leading key parts match `keys`.
    pub async fn lookup_many<R: Record>(&self, sid: u32, keys: &[u32]) -> CacheResult<Vec<R>> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(sid, false).await?;
        Ok(cargo.get_many(keys))
    }

    /// Every record currently cached for this type. Never queries the
    /// database.
    pub fn get_all<R: Record>(&self) -> CacheResult<Vec<R>> {
        let container = self.container_of::<R>()?;
        Ok(container.get_all())
    }

    /// Insert or overwrite one record.
    pub async fn replace<R: Record>(&self, rec: R) -> CacheResult<()> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(rec.owner_id(), true).await?;
        cargo.replace(rec);
        Ok(())
    }

    /// Delete one record by its keys.
    pub async fn delete<R: Record>(&self, rec: &R) -> CacheResult<()> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(rec.owner_id(), true).await?;
        cargo.delete_one(rec);
        Ok(())
    }

    /// Delete every record of one owner.
    pub async fn delete_all<R: Record>(&self, sid: u32) -> CacheResult<()> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(sid, true).await?;
        cargo.delete_all();
        Ok(())
    }

    /// Next free sub-key for the owner (keyed tables only).
    pub async fn next_uid<R: Record>(&self, sid: u32) -> CacheResult<u32> {
        let container = self.container_of::<R>()?;
        let cargo = container.get(sid, false).await?;
        Ok(cargo.next_uid())
    }

    /// Install empty cargos for a brand-new owner so its first mutations
    /// skip the loader. Preloaded containers are left alone.
    pub fn pre_init(&self, sid: u32) {
        for container in self.list() {
            container.pre_init(sid);
        }
    }

    /// Schedule the owner's cells for reclamation `gc_seconds` from now.
    pub fn set_gc(&self, sid: u32) {
        for container in self.list() {
            container.set_gc(sid);
        }
    }

    /// Pin the owner's cells again (owner came back online).
    pub fn unset_gc(&self, sid: u32) {
        for container in self.list() {
            container.unset_gc(sid);
        }
    }

    /// Drain every container to completion. Used at shutdown.
    pub async fn flush_all(&self) {
        for container in self.list() {
            while !container.drain().await {}
        }
    }

    /// Stop the scheduler, then flush everything synchronously.
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self
            .scheduler
            .lock()
            .expect("scheduler handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.flush_all().await;
    }

    /// Per-container snapshots, in registration order.
    pub fn stats(&self) -> Vec<ContainerStats> {
        self.list().iter().map(|c| c.stats()).collect()
    }

    pub fn metrics(&self) -> &CacheMetrics {
        &self.shared.metrics
    }

    #[cfg(test)]
    pub(crate) fn container_handles(&self) -> Vec<Arc<dyn AnyContainer>> {
        self.list()
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// One scheduler step over the round-robin list. A container that still has
/// work (or whose batch failed) keeps the index; the wrap tick deliberately
/// skips one period to give the database breathing room once per sweep.
pub(crate) async fn scheduler_tick(list: &[Arc<dyn AnyContainer>], idx: &mut usize) {
    if *idx >= list.len() {
        *idx = 0;
        return;
    }
    if list[*idx].drain().await {
        *idx += 1;
    }
}

async fn run_scheduler(shared: Arc<Shared>, cancel: CancellationToken) {
    let gap = Duration::from_secs(shared.cfg.update_gap_sec);
    let mut idx = 0usize;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(gap) => {}
        }
        let list = shared
            .container_list
            .read()
            .expect("container list poisoned")
            .clone();
        scheduler_tick(&list, &mut idx).await;
    }
}
