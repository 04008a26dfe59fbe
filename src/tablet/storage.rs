// Copyright 2023 The SeamDB Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! In-memory storage engine with memtable, flushed data and frontiers.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::clock::HybridTime;
use crate::error::{Result, TxnError};
use crate::types::OpId;

/// Log position and hybrid time of a write.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Frontier {
    pub op_id: OpId,
    pub hybrid_time: HybridTime,
}

impl Frontier {
    pub fn new(op_id: OpId, hybrid_time: HybridTime) -> Self {
        Self { op_id, hybrid_time }
    }
}

/// Smallest and largest frontiers covered by a memtable or flushed data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frontiers {
    pub smallest: Frontier,
    pub largest: Frontier,
}

impl Frontiers {
    pub fn new(frontier: Frontier) -> Self {
        Self { smallest: frontier, largest: frontier }
    }

    pub fn update(&mut self, frontier: Frontier) {
        self.smallest.op_id = self.smallest.op_id.min(frontier.op_id);
        self.smallest.hybrid_time = self.smallest.hybrid_time.min(frontier.hybrid_time);
        self.largest.op_id = self.largest.op_id.max(frontier.op_id);
        self.largest.hybrid_time = self.largest.hybrid_time.max(frontier.hybrid_time);
    }

    pub fn merge(&mut self, other: &Frontiers) {
        self.update(other.smallest);
        self.update(other.largest);
    }
}

fn merge_frontiers(frontiers: &mut Option<Frontiers>, other: Frontiers) {
    match frontiers {
        None => *frontiers = Some(other),
        Some(frontiers) => frontiers.merge(&other),
    }
}

/// Writes applied to db atomically.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    frontiers: Option<Frontiers>,
    size: usize,
}

impl WriteBatch {
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.size += key.len() + value.len();
        self.writes.push((key, Some(value)));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.size += key.len();
        self.writes.push((key, None));
    }

    pub fn set_frontier(&mut self, frontier: Frontier) {
        self.frontiers = Some(Frontiers::new(frontier));
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Approximate encoded size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushAbility {
    NoNewData,
    HasNewData,
}

#[derive(Default)]
struct DbState {
    /// [None] values are deletion markers.
    memtable: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    memtable_frontiers: Option<Frontiers>,
    flushed: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
    flushed_frontiers: Option<Frontiers>,
    flushes: u64,
    closed: bool,
}

/// Ordered key value db.
pub struct MemoryDb {
    name: String,
    state: Mutex<DbState>,
}

impl MemoryDb {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(DbState::default()) }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, DbState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self, state: &DbState) -> Result<()> {
        match state.closed {
            true => Err(TxnError::aborted(format!("{} db closed", self.name))),
            false => Ok(()),
        }
    }

    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        let mut state = self.lock();
        self.check_open(&state)?;
        if batch.is_empty() {
            return Ok(());
        }
        for (key, value) in batch.writes {
            state.memtable.insert(key, value);
        }
        if let Some(frontiers) = batch.frontiers {
            merge_frontiers(&mut state.memtable_frontiers, frontiers);
        }
        Ok(())
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let state = self.lock();
        self.check_open(&state)?;
        if let Some(value) = state.memtable.get(key) {
            return Ok(value.clone());
        }
        Ok(state.flushed.get(key).cloned().flatten())
    }

    /// Live entries with given prefix and greater than `after` if specified, at most `limit` entries.
    pub fn scan(&self, prefix: &[u8], after: Option<&[u8]>, limit: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let state = self.lock();
        self.check_open(&state)?;
        let lower = match after {
            Some(after) if after >= prefix => Bound::Excluded(after.to_vec()),
            _ => Bound::Included(prefix.to_vec()),
        };
        let range = (lower, Bound::Unbounded);
        let mut merged: BTreeMap<&[u8], &Option<Vec<u8>>> = BTreeMap::new();
        for (key, value) in state.flushed.range::<Vec<u8>, _>(range.clone()) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key, value);
        }
        for (key, value) in state.memtable.range::<Vec<u8>, _>(range) {
            if !key.starts_with(prefix) {
                break;
            }
            merged.insert(key, value);
        }
        Ok(merged
            .into_iter()
            .filter_map(|(key, value)| value.as_ref().map(|value| (key.to_vec(), value.clone())))
            .take(limit)
            .collect())
    }

    pub fn flush_ability(&self) -> FlushAbility {
        match self.lock().memtable.is_empty() {
            true => FlushAbility::NoNewData,
            false => FlushAbility::HasNewData,
        }
    }

    /// Moves memtable to flushed data. Returns false if there was nothing to flush.
    pub fn flush(&self) -> Result<bool> {
        let mut state = self.lock();
        self.check_open(&state)?;
        if state.memtable.is_empty() {
            return Ok(false);
        }
        let memtable = std::mem::take(&mut state.memtable);
        state.flushed.extend(memtable);
        if let Some(frontiers) = state.memtable_frontiers.take() {
            merge_frontiers(&mut state.flushed_frontiers, frontiers);
        }
        state.flushes += 1;
        Ok(true)
    }

    pub fn memtable_frontiers(&self) -> Option<Frontiers> {
        self.lock().memtable_frontiers
    }

    pub fn flushed_frontiers(&self) -> Option<Frontiers> {
        self.lock().flushed_frontiers
    }

    pub fn flushes(&self) -> u64 {
        self.lock().flushes
    }

    /// Compacts flushed data, `keep` decides on each entry in key order, [None] value is a deletion marker.
    /// Returns number of dropped entries.
    pub fn compact(&self, mut keep: impl FnMut(&[u8], Option<&[u8]>) -> bool) -> Result<usize> {
        let mut state = self.lock();
        self.check_open(&state)?;
        let before = state.flushed.len();
        state.flushed.retain(|key, value| keep(key.as_slice(), value.as_deref()));
        Ok(before - state.flushed.len())
    }

    pub fn close(&self) {
        self.lock().closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
