//! Per-owner write-behind object cache over MySQL.
//!
//! Hot per-owner record sets stay in memory and serve reads and mutations
//! without touching the database; a background scheduler reconciles dirty
//! entries in batched `REPLACE INTO` / `DELETE` statements, one container per
//! tick. Concurrent cache misses for one table coalesce into a single
//! `SELECT ... WHERE sid IN (...)` round-trip.
//!
//! ```no_run
//! use hotcache::{Cache, CacheConfig, Record};
//! use sqlx::MySql;
//! use sqlx::query_builder::Separated;
//!
//! #[derive(Clone, sqlx::FromRow)]
//! struct Item {
//!     sid: u32,
//!     item_id: u32,
//!     qty: i64,
//! }
//!
//! impl Record for Item {
//!     const TABLE: &'static str = "item";
//!     const COLUMNS: &'static [&'static str] = &["sid", "item_id", "qty"];
//!     const KEY_ARITY: usize = 2;
//!
//!     fn owner_id(&self) -> u32 {
//!         self.sid
//!     }
//!
//!     fn key2(&self) -> u32 {
//!         self.item_id
//!     }
//!
//!     fn push_binds(&self, b: &mut Separated<'_, '_, MySql, &'static str>) {
//!         b.push_bind(self.sid).push_bind(self.item_id).push_bind(self.qty);
//!     }
//! }
//!
//! # async fn run(cfg: CacheConfig) -> hotcache::CacheResult<()> {
//! let cache = Cache::connect(cfg).await?;
//! cache.register::<Item>(false).await?;
//!
//! cache.replace(Item { sid: 1, item_id: 10, qty: 5 }).await?;
//! let item = cache.lookup::<Item>(1, &[10]).await?;
//! # let _ = item;
//! # Ok(())
//! # }
//! ```

pub mod bulk;
pub mod cache;
pub mod config;
pub mod error;
pub mod metrics;
pub mod record;

#[cfg(test)]
pub(crate) mod testrows;

#[cfg(test)]
mod tests;

pub use cache::Cache;
pub use config::{CacheConfig, DbConfig};
pub use error::{CacheError, CacheResult};
pub use metrics::{CacheMetrics, ContainerStats};
pub use record::{KeyArity, Record, RecordKey};
