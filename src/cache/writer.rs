//! The per-container drain step the scheduler drives.

use crate::bulk;
use crate::cache::container::Container;
use crate::record::Record;
use std::sync::atomic::Ordering;
use tracing::error;

/// Snapshot up to `update_size` dirty entries, push them to the database and
/// reconcile. Returns true when the container is fully drained; false keeps
/// it at the head of the round-robin, either because more work remains or
/// because the batch failed and the flags were rolled back for retry.
pub(crate) async fn drain<R: Record>(container: &Container<R>) -> bool {
    let update_size = container.tuning.update_size;
    let (updates, delete_keys) = container.scan_changed(update_size);

    if let Err(e) = bulk::bulk_upsert(&container.pool, &updates).await {
        error!(
            table = R::TABLE,
            rows = updates.len(),
            error = %e,
            "cache update failed"
        );
        container.metrics.inc_drain_error(R::TABLE);
        container.after_sync(false);
        return false;
    }
    container
        .db_update_num
        .fetch_add(updates.len() as u64, Ordering::Relaxed);
    container.metrics.add_upserted(R::TABLE, updates.len() as u64);

    if let Err(e) = bulk::bulk_delete::<R>(&container.pool, &delete_keys).await {
        error!(
            table = R::TABLE,
            keys = delete_keys.len(),
            error = %e,
            "cache delete failed"
        );
        container.metrics.inc_drain_error(R::TABLE);
        container.after_sync(false);
        return false;
    }
    container
        .db_delete_num
        .fetch_add(delete_keys.len() as u64, Ordering::Relaxed);
    container
        .metrics
        .add_deleted(R::TABLE, delete_keys.len() as u64);

    container.after_sync(true);
    updates.len() + delete_keys.len() < update_size
}
