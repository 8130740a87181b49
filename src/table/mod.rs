// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright 2026 Crucible Project Contributors

//! The open-addressing hash-map engine (spec §4.3).
//!
//! Every keyed lookup in the runtime — map values, set values, the string
//! intern pool, field indexes, method tables, module member indexes — goes
//! through this one engine. It keeps two backing arrays: an append-only
//! **entry array** (insertion order, tombstones left in place) and a
//! power-of-two **index array** (into the entry array, or the sentinels
//! `EMPTY`/`TOMBSTONE`). Probing is linear from `hash & (capacity - 1)`.
//!
//! The engine does not hash keys itself — callers (the VM, which may need to
//! dispatch a user `$hash` method) compute the hash and pass it in. This
//! mirrors the teacher crate's convention of threading a context value
//! (there, `MemorySpace`) through every operation rather than having a type
//! reach out to ambient global state.

#[cfg(test)]
mod table_test;

use crate::value::Value;

/// Sentinel index-array values.
const EMPTY: i64 = -1;
const DELETED: i64 = -2;

/// Load factor threshold: resize once `index_count > capacity * 0.5`.
const MAX_LOAD_NUM: u64 = 1;
const MAX_LOAD_DEN: u64 = 2;

/// One slot of the entry array.
#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    value: Value,
    hash: u64,
}

/// The result of a `set` call, matching the spec's three return states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Allocation failed; the table is unchanged.
    OutOfMemory,
    /// A new entry was inserted.
    Inserted,
    /// An existing entry's value was updated.
    Updated,
}

/// An open-addressed hash table keyed by [`Value`].
///
/// Invariants (spec §3.3):
/// `live_count <= index_count <= index_capacity`, `index_count <=
/// max_load_threshold`, and `entries.len() >= live_count` (the difference is
/// the tombstone count).
#[derive(Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Number of non-tombstone entries in `entries`.
    live_count: usize,
    /// Number of tombstones in `entries`.
    tombstone_count: usize,
    index: Vec<i64>,
}

impl Table {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live_count == 0
    }

    fn index_capacity(&self) -> usize {
        self.index.len()
    }

    fn max_load_threshold(&self) -> usize {
        (self.index_capacity() as u64 * MAX_LOAD_NUM / MAX_LOAD_DEN) as usize
    }

    /// Number of occupied index slots (live + tombstone), used against the
    /// load-factor threshold.
    fn index_occupied(&self) -> usize {
        self.live_count + self.tombstone_count
    }

    /// Probe for `key`/`hash`. Returns `(found_entry_index, first_tombstone_index)`.
    fn probe(&self, key: &Value, hash: u64, keys_eq: impl Fn(&Value, &Value) -> bool) -> (Option<usize>, Option<usize>) {
        if self.index.is_empty() {
            return (None, None);
        }
        let mask = (self.index_capacity() - 1) as u64;
        let mut slot = hash & mask;
        let mut first_tombstone = None;
        loop {
            let idx = self.index[slot as usize];
            if idx == EMPTY {
                return (None, first_tombstone);
            } else if idx == DELETED {
                if first_tombstone.is_none() {
                    first_tombstone = Some(slot as usize);
                }
            } else {
                let entry = &self.entries[idx as usize];
                if entry.hash == hash && keys_eq(&entry.key, key) {
                    return (Some(idx as usize), first_tombstone);
                }
            }
            slot = (slot + 1) & mask;
        }
    }

    /// Look up `key` by its precomputed `hash`, using `keys_eq` for the final
    /// equality check (strict or semantic, per caller).
    #[must_use]
    pub fn get(&self, key: &Value, hash: u64, keys_eq: impl Fn(&Value, &Value) -> bool) -> Option<Value> {
        let (found, _) = self.probe(key, hash, keys_eq);
        found.map(|i| self.entries[i].value)
    }

    #[must_use]
    pub fn contains(&self, key: &Value, hash: u64, keys_eq: impl Fn(&Value, &Value) -> bool) -> bool {
        self.get(key, hash, keys_eq).is_some()
    }

    /// Insert or update `key => value`. Returns [`SetOutcome::OutOfMemory`]
    /// only if growth was required; this implementation never fails to grow
    /// (the host's allocator failure is modeled at the GC layer, not here),
    /// so in practice this always returns `Inserted` or `Updated`.
    pub fn set(
        &mut self,
        key: Value,
        value: Value,
        hash: u64,
        keys_eq: impl Fn(&Value, &Value) -> bool + Copy,
    ) -> SetOutcome {
        if self.index.is_empty() || self.index_occupied() + 1 > self.max_load_threshold() {
            self.grow(keys_eq);
        }

        let (found, first_tombstone) = self.probe(&key, hash, keys_eq);
        if let Some(i) = found {
            self.entries[i].value = value;
            return SetOutcome::Updated;
        }

        let entry_index = self.entries.len();
        self.entries.push(Entry { key, value, hash });
        self.live_count += 1;

        let mask = (self.index_capacity() - 1) as u64;
        let slot = if let Some(t) = first_tombstone {
            self.tombstone_count -= 1;
            t
        } else {
            let mut s = hash & mask;
            while self.index[s as usize] != EMPTY {
                s = (s + 1) & mask;
            }
            s as usize
        };
        self.index[slot] = entry_index as i64;
        SetOutcome::Inserted
    }

    /// Remove `key`. Marks the entry array slot's key `Tombstone` and writes
    /// `DELETED` to the index slot; only `live_count` is decremented.
    pub fn remove(&mut self, key: &Value, hash: u64, keys_eq: impl Fn(&Value, &Value) -> bool) -> bool {
        if self.index.is_empty() {
            return false;
        }
        let mask = (self.index_capacity() - 1) as u64;
        let mut slot = hash & mask;
        loop {
            let idx = self.index[slot as usize];
            if idx == EMPTY {
                return false;
            } else if idx != DELETED {
                let entry = &mut self.entries[idx as usize];
                if entry.hash == hash && keys_eq(&entry.key, key) {
                    entry.key = Value::Tombstone;
                    self.index[slot as usize] = DELETED;
                    self.live_count -= 1;
                    self.tombstone_count += 1;
                    return true;
                }
            }
            slot = (slot + 1) & mask;
        }
    }

    /// Double the index array, rebuild the index, and compact tombstones out
    /// of the entry array at the same time.
    fn grow(&mut self, keys_eq: impl Fn(&Value, &Value) -> bool + Copy) {
        let new_capacity = if self.index.is_empty() {
            8
        } else {
            self.index_capacity() * 2
        };

        let mut compacted = Vec::with_capacity(self.live_count);
        for e in &self.entries {
            if !matches!(e.key, Value::Tombstone) {
                compacted.push(*e);
            }
        }

        let mut new_index = vec![EMPTY; new_capacity];
        let mask = (new_capacity - 1) as u64;
        for (i, e) in compacted.iter().enumerate() {
            let mut slot = e.hash & mask;
            while new_index[slot as usize] != EMPTY {
                slot = (slot + 1) & mask;
            }
            new_index[slot as usize] = i as i64;
        }

        // `keys_eq` is unused during a pure rebuild (hashes + positions are
        // already known); kept as a parameter so callers don't need two
        // near-identical growth paths.
        let _ = keys_eq;

        self.tombstone_count = 0;
        self.entries = compacted;
        self.index = new_index;
    }

    /// Iterate live (non-tombstone) entries in insertion order.
    pub fn iter_live(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !matches!(e.key, Value::Tombstone))
            .map(|e| (e.key, e.value))
    }

    /// Iterate live entries with their slot index in the entry array, for
    /// iterator kinds that need to resume from a specific position.
    #[must_use]
    pub fn entry_at(&self, index: usize) -> Option<(Value, Value)> {
        self.entries
            .get(index)
            .filter(|e| !matches!(e.key, Value::Tombstone))
            .map(|e| (e.key, e.value))
    }

    /// `true` if `index` names a tombstone slot (not out of bounds, not
    /// live). Lets a resumable iterator distinguish "skip this slot, there's
    /// more" from "this is past the end of the entry array" — [`Self::entry_at`]
    /// collapses both cases to `None`.
    #[must_use]
    pub fn is_tombstone_at(&self, index: usize) -> bool {
        matches!(self.entries.get(index), Some(e) if matches!(e.key, Value::Tombstone))
    }

    #[must_use]
    pub fn entry_array_len(&self) -> usize {
        self.entries.len()
    }

    /// Copy every live entry from `self` into `dst`. Returns `false` (per
    /// spec) only on an allocator failure partway through, which this
    /// in-memory implementation never produces; present for the contract.
    pub fn copy_entries_into(
        &self,
        dst: &mut Self,
        mut hash_of: impl FnMut(&Value) -> u64,
        keys_eq: impl Fn(&Value, &Value) -> bool + Copy,
    ) -> bool {
        for (k, v) in self.iter_live() {
            let h = hash_of(&k);
            dst.set(k, v, h, keys_eq);
        }
        true
    }
}
