//! Coalesces concurrent cache misses for one container into single
//! `SELECT ... WHERE sid IN (...)` round-trips.
//!
//! Two tasks per container: a dispatcher that buffers incoming requests and
//! ships them as a batch whenever the executor is idle, and an executor that
//! runs one batch at a time against the database. The `loading` flag keeps at
//! most one batch in flight; the `Poke` sentinel makes the dispatcher flush
//! whatever accumulated during the round-trip.

use crate::cache::container::Container;
use crate::error::{CacheError, CacheResult};
use crate::record::Record;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Pending-request queue capacity.
pub(crate) const WAIT_QUEUE: usize = 100;
/// In-flight batch queue capacity.
const BATCH_QUEUE: usize = 10;
/// Backstop for a waiter; a healthy batch completes far sooner.
const LOAD_DEADLINE: Duration = Duration::from_secs(3);

pub(crate) struct LoadRequest {
    sid: u32,
    done: oneshot::Sender<Result<(), String>>,
}

pub(crate) enum LoaderMsg {
    Load(LoadRequest),
    /// Executor finished a batch; flush anything buffered meanwhile.
    Poke,
}

/// The container's submit side of the loader.
pub(crate) struct LoaderHandle {
    table: &'static str,
    tx: mpsc::Sender<LoaderMsg>,
}

impl LoaderHandle {
    pub(crate) fn new(table: &'static str, tx: mpsc::Sender<LoaderMsg>) -> Self {
        LoaderHandle { table, tx }
    }

    /// Enqueue a miss and wait for the batch that covers it.
    pub(crate) async fn load(&self, sid: u32) -> CacheResult<()> {
        let (done_tx, done_rx) = oneshot::channel();
        self.tx
            .send(LoaderMsg::Load(LoadRequest { sid, done: done_tx }))
            .await
            .map_err(|_| CacheError::LoaderClosed { table: self.table })?;

        match timeout(LOAD_DEADLINE, done_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(CacheError::LoadFailed {
                table: self.table,
                message,
            }),
            Ok(Err(_)) => Err(CacheError::LoaderClosed { table: self.table }),
            Err(_) => Err(CacheError::LoadTimeout {
                table: self.table,
                sid,
            }),
        }
    }
}

/// Start the dispatcher/executor pair for one container. The tasks hold a
/// weak handle and exit once the container is gone or the token fires.
pub(crate) fn spawn<R: Record>(
    container: Weak<Container<R>>,
    mut wait_rx: mpsc::Receiver<LoaderMsg>,
    wait_tx: mpsc::Sender<LoaderMsg>,
    cancel: CancellationToken,
) {
    let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<LoadRequest>>(BATCH_QUEUE);
    let loading = Arc::new(AtomicBool::new(false));

    // dispatcher: buffer requests, ship a batch whenever the executor is idle
    {
        let loading = loading.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            let mut buffered: Vec<LoadRequest> = Vec::new();
            loop {
                let msg = tokio::select! {
                    _ = cancel.cancelled() => return,
                    msg = wait_rx.recv() => match msg {
                        Some(msg) => msg,
                        None => return,
                    },
                };
                if let LoaderMsg::Load(req) = msg {
                    buffered.push(req);
                }
                if !loading.load(Ordering::Acquire) && !buffered.is_empty() {
                    loading.store(true, Ordering::Release);
                    if batch_tx.send(std::mem::take(&mut buffered)).await.is_err() {
                        return;
                    }
                }
            }
        });
    }

    // executor: one batch at a time against the database
    tokio::spawn(async move {
        loop {
            let batch = tokio::select! {
                _ = cancel.cancelled() => return,
                batch = batch_rx.recv() => match batch {
                    Some(batch) => batch,
                    None => return,
                },
            };
            let Some(container) = container.upgrade() else {
                return;
            };

            let mut sids: Vec<u32> = batch.iter().map(|req| req.sid).collect();
            sids.sort_unstable();
            sids.dedup();

            match container.load_owners(&sids).await {
                Ok(()) => {
                    for req in batch {
                        let _ = req.done.send(Ok(()));
                    }
                }
                Err(e) => {
                    warn!(
                        table = R::TABLE,
                        owners = sids.len(),
                        error = %e,
                        "batched select failed"
                    );
                    container.metrics.inc_load_error(R::TABLE);
                    let message = e.to_string();
                    for req in batch {
                        let _ = req.done.send(Err(message.clone()));
                    }
                }
            }
            drop(container);

            loading.store(false, Ordering::Release);
            let _ = wait_tx.send(LoaderMsg::Poke).await;
        }
    });
}
