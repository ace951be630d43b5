//! Sample row types shared by the test suite.

use crate::record::Record;
use sqlx::query_builder::Separated;
use sqlx::{FromRow, MySql, MySqlPool};

/// Single-key table: one row per owner.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Profile {
    pub sid: u32,
    pub level: u32,
}

impl Record for Profile {
    const TABLE: &'static str = "profile";
    const COLUMNS: &'static [&'static str] = &["sid", "level"];
    const KEY_ARITY: usize = 1;

    fn owner_id(&self) -> u32 {
        self.sid
    }

    fn push_binds(&self, b: &mut Separated<'_, '_, MySql, &'static str>) {
        b.push_bind(self.sid).push_bind(self.level);
    }
}

/// Two-key table: `item_id -> row` per owner.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Inventory {
    pub sid: u32,
    pub item_id: u32,
    pub qty: i64,
}

impl Record for Inventory {
    const TABLE: &'static str = "inventory";
    const COLUMNS: &'static [&'static str] = &["sid", "item_id", "qty"];
    const KEY_ARITY: usize = 2;

    fn owner_id(&self) -> u32 {
        self.sid
    }

    fn key2(&self) -> u32 {
        self.item_id
    }

    fn push_binds(&self, b: &mut Separated<'_, '_, MySql, &'static str>) {
        b.push_bind(self.sid).push_bind(self.item_id).push_bind(self.qty);
    }
}

/// Three-key table: `(quest_id, step_id) -> row` per owner.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct QuestStep {
    pub sid: u32,
    pub quest_id: u32,
    pub step_id: u32,
    pub progress: i64,
}

impl Record for QuestStep {
    const TABLE: &'static str = "quest_step";
    const COLUMNS: &'static [&'static str] = &["sid", "quest_id", "step_id", "progress"];
    const KEY_ARITY: usize = 3;

    fn owner_id(&self) -> u32 {
        self.sid
    }

    fn key2(&self) -> u32 {
        self.quest_id
    }

    fn key3(&self) -> u32 {
        self.step_id
    }

    fn push_binds(&self, b: &mut Separated<'_, '_, MySql, &'static str>) {
        b.push_bind(self.sid)
            .push_bind(self.quest_id)
            .push_bind(self.step_id)
            .push_bind(self.progress);
    }
}

/// A pool that never connects. Tests that stay on the in-memory paths use it
/// to prove no query was issued; any real query against it fails fast.
pub fn lazy_pool() -> MySqlPool {
    let opts = sqlx::mysql::MySqlConnectOptions::new()
        .host("127.0.0.1")
        .port(1)
        .username("nobody")
        .database("nowhere");
    sqlx::mysql::MySqlPoolOptions::new()
        .acquire_timeout(std::time::Duration::from_secs(1))
        .connect_lazy_with(opts)
}

/// Baseline config for tests. The one-hour gap keeps the background
/// scheduler out of the way; tests drive drains themselves.
pub fn test_config() -> crate::CacheConfig {
    toml::from_str(
        r#"
            update_gap_sec = 3600
            update_size = 100
            gc_seconds = 60
            rw_analyse = true

            [db]
            host = "127.0.0.1"
            port = 1
            user = "nobody"
            pass = ""
            name = "nowhere"
            pool_size = 1
            connect_timeout_sec = 1
        "#,
    )
    .unwrap()
}
