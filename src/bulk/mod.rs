//! Parameterised multi-row UPSERT and composite-key DELETE statements.
//!
//! Statement shapes (MySQL dialect):
//!
//! ```sql
//! REPLACE INTO `items` (`sid`, `cfg_id`, `stack_num`) VALUES (?, ?, ?), (?, ?, ?)
//! DELETE FROM `items` WHERE (`sid`, `cfg_id`) IN ((?, ?), (?, ?))
//! ```
//!
//! `REPLACE INTO` inserts, or replaces an existing row with the same primary
//! key; callers rely on it to merge updates. A single call chunks its input
//! under the placeholder ceiling and runs every chunk inside one transaction,
//! rolling back on the first error.

use crate::error::CacheResult;
use crate::record::{Record, RecordKey};
use sqlx::{MySql, MySqlPool, QueryBuilder};

/// Hard ceiling on bind parameters per statement.
pub const MAX_PLACEHOLDERS: usize = 65_536;

/// Rows that fit in one statement given the per-row placeholder count.
pub(crate) fn rows_per_statement(placeholders_per_row: usize) -> usize {
    MAX_PLACEHOLDERS / placeholders_per_row
}

/// Backtick-quote an identifier, stripping any backticks it already carries.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("`{}`", name.trim_matches('`'))
}

fn build_upsert_chunk<'a, R: Record>(rows: &'a [R]) -> QueryBuilder<'a, MySql> {
    let mut qb = QueryBuilder::new("REPLACE INTO ");
    qb.push(quote_ident(R::TABLE));
    qb.push(" (");
    for (i, col) in R::COLUMNS.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(quote_ident(col));
    }
    qb.push(") ");
    qb.push_values(rows.iter(), |mut b, row| {
        row.push_binds(&mut b);
    });
    qb
}

fn build_delete_chunk<'a, R: Record>(keys: &'a [RecordKey]) -> QueryBuilder<'a, MySql> {
    let mut qb = QueryBuilder::new("DELETE FROM ");
    qb.push(quote_ident(R::TABLE));
    qb.push(" WHERE (");
    for (i, col) in R::key_columns().iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(quote_ident(col));
    }
    qb.push(") IN");
    qb.push_tuples(keys.iter(), |mut b, key| {
        for part in key.parts(R::KEY_ARITY) {
            b.push_bind(part);
        }
    });
    qb
}

/// Write every record with `REPLACE INTO`, chunked, in one transaction.
///
/// Empty input is a no-op and does not touch the pool.
pub async fn bulk_upsert<R: Record>(pool: &MySqlPool, records: &[R]) -> CacheResult<()> {
    if records.is_empty() {
        return Ok(());
    }

    let chunk_rows = rows_per_statement(R::COLUMNS.len());
    let mut tx = pool.begin().await?;

    for chunk in records.chunks(chunk_rows) {
        let mut qb = build_upsert_chunk(chunk);
        if let Err(e) = qb.build().execute(&mut *tx).await {
            tx.rollback().await.ok();
            return Err(e.into());
        }
    }

    tx.commit().await?;
    Ok(())
}

/// Delete every composite key, chunked, in one transaction.
///
/// Empty input is a no-op and does not touch the pool.
pub async fn bulk_delete<R: Record>(pool: &MySqlPool, keys: &[RecordKey]) -> CacheResult<()> {
    if keys.is_empty() {
        return Ok(());
    }

    let chunk_keys = rows_per_statement(R::KEY_ARITY);
    let mut tx = pool.begin().await?;

    for chunk in keys.chunks(chunk_keys) {
        let mut qb = build_delete_chunk::<R>(chunk);
        if let Err(e) = qb.build().execute(&mut *tx).await {
            tx.rollback().await.ok();
            return Err(e.into());
        }
    }

    tx.commit().await?;
    Ok(())
}
