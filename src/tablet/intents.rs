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

//! Moves intents of resolved transactions out of intents db.

use std::fmt::Display;

use bytesize::ByteSize;
use prost::Message;
use tracing::{debug, error, trace};

use super::keys;
use super::storage::{Frontier, MemoryDb, WriteBatch};
use crate::clock::HybridTime;
use crate::error::Result;
use crate::protos::{AbortedSubTransactionSet, IntentValue, RegularValue, TransactionId};

const SCAN_BATCH: usize = 128;

/// Key range a tablet owns, intents outside are left untouched during apply.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeyBounds {
    pub lower: Vec<u8>,
    pub upper: Option<Vec<u8>>,
}

impl KeyBounds {
    pub fn new(lower: impl Into<Vec<u8>>, upper: Option<Vec<u8>>) -> Self {
        Self { lower: lower.into(), upper }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.lower.as_slice() && self.upper.as_ref().map_or(true, |upper| key < upper.as_slice())
    }
}

/// Cursor of an unfinished apply or remove, resume from entries after `key`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApplyTransactionState {
    pub key: Vec<u8>,
}

pub struct ApplyIntentsContext<'a> {
    pub log_prefix: &'a str,
    pub transaction: TransactionId,
    pub commit_time: HybridTime,
    /// Log position and hybrid time of the apply record.
    pub log_frontier: Frontier,
    pub aborted: &'a AbortedSubTransactionSet,
    pub key_bounds: &'a KeyBounds,
    pub batch_size: ByteSize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub records: u64,
    pub dropped: u64,
}

fn write_or_die(db: &MemoryDb, batch: WriteBatch, log_prefix: &str, operation: impl Display) {
    if let Err(err) = db.write(batch) {
        error!("{}fail to write {} db for {}: {}", log_prefix, db.name(), operation, err);
        panic!("{}fail to write {} db for {}: {}", log_prefix, db.name(), operation, err);
    }
}

/// Applies one batch of intents of a committed transaction to regular db.
///
/// Returns cursor to continue from if batch size is exhausted before all intents applied.
/// Engine write failure is fatal since the transaction is already committed.
pub fn apply_intents(
    regular: &MemoryDb,
    intents: &MemoryDb,
    context: &ApplyIntentsContext<'_>,
    state: Option<&ApplyTransactionState>,
    stats: &mut ApplyStats,
) -> Result<Option<ApplyTransactionState>> {
    let id = context.transaction;
    let prefix = keys::reverse_prefix(id);
    let budget = context.batch_size.as_u64() as usize;
    let mut regular_batch = WriteBatch::default();
    let mut intents_batch = WriteBatch::default();
    let mut cursor = state.map(|state| state.key.clone());
    loop {
        let entries = intents.scan(&prefix, cursor.as_deref(), SCAN_BATCH)?;
        if entries.is_empty() {
            break;
        }
        for (reverse_key, intent_key) in entries {
            if let Some(value) = intents.get(&intent_key)? {
                let intent = IntentValue::decode(value.as_slice())?;
                let (user_key, _, _) = keys::decode_intent_key(&intent_key)?;
                if context.aborted.contains(intent.subtransaction_id) {
                    trace!("{}drop intent of aborted subtransaction {}", context.log_prefix, intent.subtransaction_id);
                    stats.dropped += 1;
                } else if context.key_bounds.contains(user_key) {
                    let key = keys::regular_key(user_key, context.commit_time, intent.write_id);
                    let value = RegularValue { value: intent.value };
                    regular_batch.put(key, value.encode_to_vec());
                    stats.records += 1;
                }
                intents_batch.delete(intent_key);
            }
            intents_batch.delete(reverse_key.clone());
            if regular_batch.size() + intents_batch.size() >= budget {
                debug!("{}apply of {} paused at {:?}", context.log_prefix, id, reverse_key);
                flush_batches(regular, regular_batch, intents, intents_batch, context);
                return Ok(Some(ApplyTransactionState { key: reverse_key }));
            }
            cursor = Some(reverse_key);
        }
    }
    intents_batch.delete(keys::metadata_key(id));
    flush_batches(regular, regular_batch, intents, intents_batch, context);
    Ok(None)
}

fn flush_batches(
    regular: &MemoryDb,
    mut regular_batch: WriteBatch,
    intents: &MemoryDb,
    mut intents_batch: WriteBatch,
    context: &ApplyIntentsContext<'_>,
) {
    let operation = format!("apply of transaction {}", context.transaction);
    regular_batch.set_frontier(Frontier::new(context.log_frontier.op_id, context.commit_time));
    intents_batch.set_frontier(context.log_frontier);
    // Intents are deleted only after their regular records are written.
    write_or_die(regular, regular_batch, context.log_prefix, &operation);
    write_or_die(intents, intents_batch, context.log_prefix, &operation);
}

pub struct RemoveIntentsContext<'a> {
    pub log_prefix: &'a str,
    pub reason: &'a str,
    pub log_frontier: Frontier,
    pub batch_size: ByteSize,
}

/// Removes one batch of intents of given transactions without applying them.
///
/// Transactions are processed in id order, so cursor from previous call is valid
/// across them.
pub fn remove_intents(
    intents: &MemoryDb,
    transactions: &[TransactionId],
    context: &RemoveIntentsContext<'_>,
    state: Option<&ApplyTransactionState>,
) -> Result<Option<ApplyTransactionState>> {
    let mut transactions = transactions.to_vec();
    transactions.sort();
    let budget = context.batch_size.as_u64() as usize;
    let mut batch = WriteBatch::default();
    batch.set_frontier(context.log_frontier);
    for id in transactions {
        let prefix = keys::reverse_prefix(id);
        let mut cursor = state.map(|state| state.key.clone());
        loop {
            let entries = intents.scan(&prefix, cursor.as_deref(), SCAN_BATCH)?;
            if entries.is_empty() {
                break;
            }
            for (reverse_key, intent_key) in entries {
                batch.delete(intent_key);
                batch.delete(reverse_key.clone());
                if batch.size() >= budget {
                    debug!("{}remove of {} for {} paused at {:?}", context.log_prefix, id, context.reason, reverse_key);
                    write_or_die(intents, batch, context.log_prefix, context.reason);
                    return Ok(Some(ApplyTransactionState { key: reverse_key }));
                }
                cursor = Some(reverse_key);
            }
        }
        batch.delete(keys::metadata_key(id));
        debug!("{}removed intents of {}: {}", context.log_prefix, id, context.reason);
    }
    write_or_die(intents, batch, context.log_prefix, context.reason);
    Ok(None)
}
