//! One owner's in-memory record set for one table, with per-entry
//! reconciliation flags and the status machine the writer drives.

use crate::record::{KeyArity, Record, RecordKey};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Per-entry database reconciliation flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DbFlag {
    None,
    Update,
    Delete,
}

/// Whole-cargo summary of entry flags and drain progress.
///
/// `Syncing` means a snapshot of the dirty entries has been handed to a
/// pending batch and nothing mutated since; a mutation during the flight
/// moves the cargo back to `Changed` without touching the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CargoStatus {
    Normal,
    Changed,
    Syncing,
}

#[derive(Debug)]
struct Meta<R> {
    flag: DbFlag,
    record: Option<R>,
    /// Entry is part of the in-flight batch. Cleared by any mutation, so a
    /// successful sync only resets flags that still match the snapshot.
    in_sync: bool,
}

impl<R> Meta<R> {
    fn empty() -> Self {
        Meta {
            flag: DbFlag::None,
            record: None,
            in_sync: false,
        }
    }

    fn loaded(record: R) -> Self {
        Meta {
            flag: DbFlag::None,
            record: Some(record),
            in_sync: false,
        }
    }

    fn update(&mut self, record: R) {
        self.record = Some(record);
        self.flag = DbFlag::Update;
        self.in_sync = false;
    }

    fn delete(&mut self) -> bool {
        if self.record.is_none() {
            return false;
        }
        self.record = None;
        self.flag = DbFlag::Delete;
        self.in_sync = false;
        true
    }
}

enum Entries<R> {
    /// Arity 1: a single record or absent.
    Single(Option<Meta<R>>),
    /// Arity 2: `k2 -> meta`.
    Keyed(HashMap<u32, Meta<R>>),
    /// Arity 3: `k2 -> k3 -> meta`.
    DoubleKeyed(HashMap<u32, HashMap<u32, Meta<R>>>),
}

impl<R> Entries<R> {
    fn new(arity: KeyArity) -> Self {
        match arity {
            KeyArity::Single => Entries::Single(None),
            KeyArity::Double => Entries::Keyed(HashMap::new()),
            KeyArity::Triple => Entries::DoubleKeyed(HashMap::new()),
        }
    }

    fn find_mut(&mut self, k2: u32, k3: u32) -> Option<&mut Meta<R>> {
        match self {
            Entries::Single(slot) => slot.as_mut(),
            Entries::Keyed(map) => map.get_mut(&k2),
            Entries::DoubleKeyed(map) => map.get_mut(&k2)?.get_mut(&k3),
        }
    }

    fn entry_mut(&mut self, k2: u32, k3: u32) -> &mut Meta<R> {
        match self {
            Entries::Single(slot) => slot.get_or_insert_with(Meta::empty),
            Entries::Keyed(map) => map.entry(k2).or_insert_with(Meta::empty),
            Entries::DoubleKeyed(map) => map
                .entry(k2)
                .or_default()
                .entry(k3)
                .or_insert_with(Meta::empty),
        }
    }

    fn for_each(&self, mut f: impl FnMut(u32, u32, &Meta<R>)) {
        match self {
            Entries::Single(slot) => {
                if let Some(meta) = slot {
                    f(0, 0, meta);
                }
            }
            Entries::Keyed(map) => {
                for (k2, meta) in map {
                    f(*k2, 0, meta);
                }
            }
            Entries::DoubleKeyed(map) => {
                for (k2, inner) in map {
                    for (k3, meta) in inner {
                        f(*k2, *k3, meta);
                    }
                }
            }
        }
    }

    fn for_each_mut(&mut self, mut f: impl FnMut(u32, u32, &mut Meta<R>)) {
        match self {
            Entries::Single(slot) => {
                if let Some(meta) = slot {
                    f(0, 0, meta);
                }
            }
            Entries::Keyed(map) => {
                for (k2, meta) in map.iter_mut() {
                    f(*k2, 0, meta);
                }
            }
            Entries::DoubleKeyed(map) => {
                for (k2, inner) in map.iter_mut() {
                    for (k3, meta) in inner.iter_mut() {
                        f(*k2, *k3, meta);
                    }
                }
            }
        }
    }
}

struct State<R> {
    status: CargoStatus,
    /// A dirty-entry snapshot is out with the writer.
    in_flight: bool,
    entries: Entries<R>,
}

pub(crate) struct Cargo<R> {
    state: RwLock<State<R>>,
}

impl<R: Record> Cargo<R> {
    pub(crate) fn new(arity: KeyArity) -> Self {
        Cargo {
            state: RwLock::new(State {
                status: CargoStatus::Normal,
                in_flight: false,
                entries: Entries::new(arity),
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State<R>> {
        self.state.read().expect("cargo lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, State<R>> {
        self.state.write().expect("cargo lock poisoned")
    }

    /// Insert or replace the entry for a database row. Loader/preload only;
    /// leaves the status untouched.
    pub(crate) fn load_from_db(&self, rec: R) {
        let mut guard = self.write();
        let (k2, k3) = (rec.key2(), rec.key3());
        *guard.entries.entry_mut(k2, k3) = Meta::loaded(rec);
    }

    pub(crate) fn replace(&self, rec: R) {
        let mut guard = self.write();
        let state = &mut *guard;
        let (k2, k3) = (rec.key2(), rec.key3());
        state.entries.entry_mut(k2, k3).update(rec);
        state.status = CargoStatus::Changed;
    }

    pub(crate) fn delete_one(&self, rec: &R) {
        let mut guard = self.write();
        let state = &mut *guard;
        if let Some(meta) = state.entries.find_mut(rec.key2(), rec.key3()) {
            if meta.delete() {
                state.status = CargoStatus::Changed;
            }
        }
    }

    pub(crate) fn delete_all(&self) {
        let mut guard = self.write();
        let state = &mut *guard;
        let mut any = false;
        state.entries.for_each_mut(|_, _, meta| {
            if meta.delete() {
                any = true;
            }
        });
        if any {
            state.status = CargoStatus::Changed;
        }
    }

    pub(crate) fn get_single(&self, keys: &[u32]) -> Option<R> {
        let state = self.read();
        match &state.entries {
            Entries::Single(slot) => slot.as_ref().and_then(|meta| meta.record.clone()),
            Entries::Keyed(map) => map.get(keys.first()?)?.record.clone(),
            Entries::DoubleKeyed(map) => {
                map.get(keys.first()?)?.get(keys.get(1)?)?.record.clone()
            }
        }
    }

    /// Records whose leading key parts match `keys`; an empty list matches
    /// everything.
    pub(crate) fn get_many(&self, keys: &[u32]) -> Vec<R> {
        let state = self.read();
        let mut out = Vec::new();
        match &state.entries {
            Entries::Single(slot) => {
                if let Some(meta) = slot {
                    if let Some(rec) = &meta.record {
                        out.push(rec.clone());
                    }
                }
            }
            Entries::Keyed(map) => {
                for (k2, meta) in map {
                    if keys.is_empty() || *k2 == keys[0] {
                        if let Some(rec) = &meta.record {
                            out.push(rec.clone());
                        }
                    }
                }
            }
            Entries::DoubleKeyed(map) => {
                for (k2, inner) in map {
                    if !keys.is_empty() && *k2 != keys[0] {
                        continue;
                    }
                    for (k3, meta) in inner {
                        if keys.len() >= 2 && *k3 != keys[1] {
                            continue;
                        }
                        if let Some(rec) = &meta.record {
                            out.push(rec.clone());
                        }
                    }
                }
            }
        }
        out
    }

    /// Append flagged entries to the outgoing batch: record clones for
    /// upserts, composite keys for deletes. With `mark_syncing` the cargo
    /// moves to `Syncing` and every emitted entry is marked as part of the
    /// snapshot.
    pub(crate) fn collect_changed(
        &self,
        sid: u32,
        updates: &mut Vec<R>,
        deletes: &mut Vec<RecordKey>,
        mark_syncing: bool,
    ) -> usize {
        let mut guard = self.write();
        let state = &mut *guard;
        let mut emitted = 0usize;
        state.entries.for_each_mut(|k2, k3, meta| match meta.flag {
            DbFlag::Delete => {
                deletes.push(RecordKey {
                    sid,
                    key2: k2,
                    key3: k3,
                });
                meta.in_sync = true;
                emitted += 1;
            }
            DbFlag::Update => {
                if let Some(rec) = &meta.record {
                    updates.push(rec.clone());
                    meta.in_sync = true;
                    emitted += 1;
                }
            }
            DbFlag::None => {}
        });
        if mark_syncing {
            state.status = CargoStatus::Syncing;
            state.in_flight = true;
        }
        emitted
    }

    /// Reconcile after the batch came back. No-op unless a snapshot is out.
    ///
    /// On success only entries still marked `in_sync` reset to `None`; a flag
    /// re-set by a mutation during the flight survives and is drained again.
    pub(crate) fn after_sync(&self, success: bool) {
        let mut guard = self.write();
        let state = &mut *guard;
        if !state.in_flight {
            return;
        }
        state.in_flight = false;
        if success {
            let mut dirty = false;
            state.entries.for_each_mut(|_, _, meta| {
                if meta.in_sync {
                    meta.flag = DbFlag::None;
                    meta.in_sync = false;
                }
                if meta.flag != DbFlag::None {
                    dirty = true;
                }
            });
            state.status = if dirty {
                CargoStatus::Changed
            } else {
                CargoStatus::Normal
            };
        } else {
            state.entries.for_each_mut(|_, _, meta| {
                meta.in_sync = false;
            });
            state.status = CargoStatus::Changed;
        }
    }

    /// Dense id allocation for keyed cargos: `max(k2) + 1`, at least 1.
    /// Single-key cargos have no sub-key and return 0.
    pub(crate) fn next_uid(&self) -> u32 {
        let state = self.read();
        match &state.entries {
            Entries::Single(_) => 0,
            Entries::Keyed(map) => map.keys().max().map_or(1, |k| k + 1),
            Entries::DoubleKeyed(map) => map.keys().max().map_or(1, |k| k + 1),
        }
    }

    /// Record intent to mutate before the mutation lands.
    pub(crate) fn mark_changed(&self) {
        self.write().status = CargoStatus::Changed;
    }

    pub(crate) fn status(&self) -> CargoStatus {
        self.read().status
    }

    pub(crate) fn is_changed(&self) -> bool {
        self.read().status != CargoStatus::Normal
    }

    pub(crate) fn collect_all(&self, out: &mut Vec<R>) {
        let state = self.read();
        state.entries.for_each(|_, _, meta| {
            if let Some(rec) = &meta.record {
                out.push(rec.clone());
            }
        });
    }

    pub(crate) fn record_count(&self) -> usize {
        let state = self.read();
        let mut n = 0usize;
        state.entries.for_each(|_, _, meta| {
            if meta.record.is_some() {
                n += 1;
            }
        });
        n
    }

    /// `(pending upserts, pending deletes)` without mutating anything.
    pub(crate) fn pending_counts(&self) -> (u64, u64) {
        let state = self.read();
        let (mut updates, mut deletes) = (0u64, 0u64);
        state.entries.for_each(|_, _, meta| match meta.flag {
            DbFlag::Update => updates += 1,
            DbFlag::Delete => deletes += 1,
            DbFlag::None => {}
        });
        (updates, deletes)
    }
}
