use crate::error::CacheResult;

#[cfg(feature = "metrics")]
use prometheus::{Encoder, IntCounterVec, Opts, Registry, TextEncoder};

/// Point-in-time snapshot of one container, for dashboards and logs.
#[derive(Debug, Clone, Default)]
pub struct ContainerStats {
    /// Table the container serves.
    pub table: &'static str,
    /// Cells held in memory.
    pub cells: u64,
    /// Cells with unsynced changes.
    pub changed_cells: u64,
    /// Cells scheduled for eviction.
    pub gc_pending: u64,
    /// Cells evicted since startup.
    pub gc_cells_total: u64,
    /// Records held in memory.
    pub records: u64,
    /// `records` times the in-memory record size.
    pub approx_memory_bytes: u64,
    /// Entries flagged for upsert.
    pub pending_updates: u64,
    /// Entries flagged for delete.
    pub pending_deletes: u64,
    /// Records loaded from the database since startup.
    pub db_loaded: u64,
    /// Records upserted to the database since startup.
    pub db_upserted: u64,
    /// Keys deleted from the database since startup.
    pub db_deleted: u64,
    /// Cell map reads (populated when `rw_analyse` is on).
    pub cell_reads: i64,
    /// Cell map writes (populated when `rw_analyse` is on).
    pub cell_writes: i64,
}

#[derive(Clone, Debug)]
pub struct CacheMetrics {
    #[cfg(feature = "metrics")]
    registry: Registry,

    // --------------------------------------------
    // Database traffic
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub records_loaded_total: IntCounterVec,

    #[cfg(feature = "metrics")]
    pub records_upserted_total: IntCounterVec,

    #[cfg(feature = "metrics")]
    pub keys_deleted_total: IntCounterVec,

    #[cfg(feature = "metrics")]
    pub select_batches_total: IntCounterVec,

    // --------------------------------------------
    // Failures
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub drain_errors_total: IntCounterVec,

    #[cfg(feature = "metrics")]
    pub load_errors_total: IntCounterVec,

    // --------------------------------------------
    // Memory reclamation
    // --------------------------------------------
    #[cfg(feature = "metrics")]
    pub evicted_cells_total: IntCounterVec,

    #[cfg(not(feature = "metrics"))]
    _noop: (),
}

impl CacheMetrics {
    pub fn new() -> CacheResult<Self> {
        #[cfg(feature = "metrics")]
        {
            let registry = Registry::new();

            let records_loaded_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_records_loaded_total",
                    "Records loaded from the database, by table",
                ),
                &["table"],
            )?;

            let records_upserted_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_records_upserted_total",
                    "Records written to the database via REPLACE INTO, by table",
                ),
                &["table"],
            )?;

            let keys_deleted_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_keys_deleted_total",
                    "Composite keys deleted from the database, by table",
                ),
                &["table"],
            )?;

            let select_batches_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_select_batches_total",
                    "Coalesced owner-miss SELECT batches issued, by table",
                ),
                &["table"],
            )?;

            let drain_errors_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_drain_errors_total",
                    "Failed drain steps (flags rolled back for retry), by table",
                ),
                &["table"],
            )?;

            let load_errors_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_load_errors_total",
                    "Failed coalesced SELECT batches, by table",
                ),
                &["table"],
            )?;

            let evicted_cells_total = IntCounterVec::new(
                Opts::new(
                    "hotcache_evicted_cells_total",
                    "Cells reclaimed after their owner logged off, by table",
                ),
                &["table"],
            )?;

            registry.register(Box::new(records_loaded_total.clone()))?;
            registry.register(Box::new(records_upserted_total.clone()))?;
            registry.register(Box::new(keys_deleted_total.clone()))?;
            registry.register(Box::new(select_batches_total.clone()))?;
            registry.register(Box::new(drain_errors_total.clone()))?;
            registry.register(Box::new(load_errors_total.clone()))?;
            registry.register(Box::new(evicted_cells_total.clone()))?;

            Ok(Self {
                registry,
                records_loaded_total,
                records_upserted_total,
                keys_deleted_total,
                select_batches_total,
                drain_errors_total,
                load_errors_total,
                evicted_cells_total,
            })
        }

        #[cfg(not(feature = "metrics"))]
        {
            Ok(Self { _noop: () })
        }
    }

    #[cfg(feature = "metrics")]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[cfg(feature = "metrics")]
    pub fn encode_text(&self) -> CacheResult<String> {
        let mf = self.registry.gather();
        let mut buf = Vec::new();
        TextEncoder::new().encode(&mf, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    // ------------------------------------------------------------
    // No-op helpers (compile away when the metrics feature is off)
    // ------------------------------------------------------------

    #[inline]
    pub fn add_loaded(&self, _table: &str, _n: u64) {
        #[cfg(feature = "metrics")]
        self.records_loaded_total.with_label_values(&[_table]).inc_by(_n);
    }

    #[inline]
    pub fn add_upserted(&self, _table: &str, _n: u64) {
        #[cfg(feature = "metrics")]
        self.records_upserted_total
            .with_label_values(&[_table])
            .inc_by(_n);
    }

    #[inline]
    pub fn add_deleted(&self, _table: &str, _n: u64) {
        #[cfg(feature = "metrics")]
        self.keys_deleted_total.with_label_values(&[_table]).inc_by(_n);
    }

    #[inline]
    pub fn inc_select_batch(&self, _table: &str) {
        #[cfg(feature = "metrics")]
        self.select_batches_total.with_label_values(&[_table]).inc();
    }

    #[inline]
    pub fn inc_drain_error(&self, _table: &str) {
        #[cfg(feature = "metrics")]
        self.drain_errors_total.with_label_values(&[_table]).inc();
    }

    #[inline]
    pub fn inc_load_error(&self, _table: &str) {
        #[cfg(feature = "metrics")]
        self.load_errors_total.with_label_values(&[_table]).inc();
    }

    #[inline]
    pub fn add_evicted(&self, _table: &str, _n: u64) {
        #[cfg(feature = "metrics")]
        self.evicted_cells_total.with_label_values(&[_table]).inc_by(_n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_register_and_count() {
        let metrics = CacheMetrics::new().unwrap();
        metrics.add_loaded("inventory", 3);
        metrics.add_loaded("inventory", 2);
        metrics.inc_select_batch("inventory");

        #[cfg(feature = "metrics")]
        {
            let text = metrics.encode_text().unwrap();
            assert!(text.contains("hotcache_records_loaded_total{table=\"inventory\"} 5"));
            assert!(text.contains("hotcache_select_batches_total{table=\"inventory\"} 1"));
        }
    }
}
