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

//! Participant side of transactions: intents, apply and cleanup of them.

mod flush;
mod intents;
mod keys;
mod operation;
mod participant;
mod retention;
mod storage;

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use prost::Message;
use tracing::{debug, info, trace};

pub use self::flush::IntentsFlushFilter;
pub use self::intents::{ApplyStats, ApplyTransactionState, KeyBounds};
use self::intents::{ApplyIntentsContext, RemoveIntentsContext};
pub use self::operation::{RwOperationCounter, ScopedRwOperation, ScopedRwOperationPause};
pub use self::participant::TransactionParticipant;
pub use self::retention::HistoryRetentionPolicy;
pub use self::storage::{FlushAbility, Frontier, Frontiers, MemoryDb, WriteBatch};
use crate::clock::{Clock, HybridTime};
use crate::config::TransactionConfig;
use crate::error::{Result, TxnError};
use crate::metrics::{TabletMetrics, TabletReport};
use crate::protos::{
    AbortedSubTransactionSet,
    GetTransactionStatusAtParticipantRequest,
    GetTransactionStatusAtParticipantResponse,
    IntentValue,
    RegularValue,
    TransactionId,
    TransactionMetadataPb,
    TransactionStatus,
    UpdateTransactionRequest,
    UpdateTransactionResponse,
};
use crate::types::{OpId, TabletId};

/// Write of a user key, [None] value deletes it.
pub type KeyWrite = (Vec<u8>, Option<Vec<u8>>);

/// Data tablet with regular and intents db.
pub struct Tablet {
    tablet_id: TabletId,
    log_prefix: String,
    config: TransactionConfig,
    clock: Clock,
    key_bounds: KeyBounds,
    regular: Arc<MemoryDb>,
    intents: Arc<MemoryDb>,
    participant: Arc<TransactionParticipant>,
    retention: HistoryRetentionPolicy,
    flush_filter: IntentsFlushFilter,
    operations: RwOperationCounter,
    metrics: Arc<TabletMetrics>,
    next_index: AtomicI64,
    apply_lock: Mutex<()>,
}

impl std::fmt::Debug for Tablet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tablet").field("tablet_id", &self.tablet_id).finish_non_exhaustive()
    }
}

impl Tablet {
    pub fn new(tablet_id: impl Into<TabletId>, config: TransactionConfig, clock: Clock, key_bounds: KeyBounds) -> Self {
        let tablet_id = tablet_id.into();
        let log_prefix = format!("T {tablet_id}: ");
        let regular = Arc::new(MemoryDb::new("regular"));
        let intents = Arc::new(MemoryDb::new("intents"));
        let participant = Arc::new(TransactionParticipant::new(&tablet_id));
        let metrics = Arc::new(TabletMetrics::default());
        let retention =
            HistoryRetentionPolicy::new(log_prefix.clone(), config.history_retention_interval, participant.clone());
        let flush_filter = IntentsFlushFilter::new(
            log_prefix.clone(),
            regular.clone(),
            intents.clone(),
            config.intents_flush_max_delay,
            metrics.clone(),
        );
        let operations = RwOperationCounter::new(format!("{log_prefix}dbs"));
        Self {
            tablet_id,
            log_prefix,
            config,
            clock,
            key_bounds,
            regular,
            intents,
            participant,
            retention,
            flush_filter,
            operations,
            metrics,
            next_index: AtomicI64::new(1),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    pub fn key_bounds(&self) -> &KeyBounds {
        &self.key_bounds
    }

    pub fn participant(&self) -> &Arc<TransactionParticipant> {
        &self.participant
    }

    pub fn metrics(&self) -> &Arc<TabletMetrics> {
        &self.metrics
    }

    pub fn regular_db(&self) -> &Arc<MemoryDb> {
        &self.regular
    }

    pub fn intents_db(&self) -> &Arc<MemoryDb> {
        &self.intents
    }

    fn next_frontier(&self) -> Frontier {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        Frontier::new(OpId::new(1, index), self.clock.now())
    }

    fn check_bounds(&self, key: &[u8]) -> Result<()> {
        if self.key_bounds.contains(key) {
            return Ok(());
        }
        let msg = format!("key {:?} out of bounds {:?} of tablet {}", key, self.key_bounds, self.tablet_id);
        Err(TxnError::InvalidArgument(msg))
    }

    /// Writes provisional records of a transaction. The first write carries transaction metadata.
    pub fn write_intents(
        &self,
        id: TransactionId,
        metadata: Option<TransactionMetadataPb>,
        subtransaction_id: u32,
        writes: Vec<KeyWrite>,
    ) -> Result<()> {
        let _operation = self.operations.operation()?;
        for (key, _) in writes.iter() {
            self.check_bounds(key)?;
        }
        let mut batch = WriteBatch::default();
        if let Some(metadata) = metadata {
            if metadata.id()? != id {
                return Err(TxnError::InvalidArgument(format!("metadata of {} does not match {}", metadata.id()?, id)));
            }
            let encoded = metadata.encode_to_vec();
            if self.participant.add(metadata)? {
                batch.put(keys::metadata_key(id), encoded);
            }
        }
        let frontier = self.next_frontier();
        let first_write_id = self.participant.prepare_batch(id, writes.len(), frontier.hybrid_time)?;
        for (write_id, (key, value)) in (first_write_id..).zip(writes) {
            let intent_key = keys::intent_key(&key, id, write_id);
            let value = IntentValue { subtransaction_id, write_id, value };
            batch.put(intent_key.clone(), value.encode_to_vec());
            batch.put(keys::reverse_key(id, write_id), intent_key);
        }
        batch.set_frontier(frontier);
        trace!("{}write {} intents of {}", self.log_prefix, batch.len(), id);
        self.intents.write(batch)
    }

    /// Writes non transactional record.
    pub fn write(&self, key: &[u8], value: Option<Vec<u8>>) -> Result<HybridTime> {
        let _operation = self.operations.operation()?;
        self.check_bounds(key)?;
        let frontier = self.next_frontier();
        let mut batch = WriteBatch::default();
        let value = RegularValue { value };
        batch.put(keys::regular_key(key, frontier.hybrid_time, 0), value.encode_to_vec());
        batch.set_frontier(frontier);
        self.regular.write(batch)?;
        Ok(frontier.hybrid_time)
    }

    /// Reads committed value of `key` as of `read_time`.
    pub fn read(&self, key: &[u8], read_time: HybridTime) -> Result<Option<Vec<u8>>> {
        let _operation = self.operations.operation()?;
        let prefix = keys::regular_prefix(key);
        for (regular_key, value) in self.regular.scan(&prefix, None, usize::MAX)? {
            let (_, time, _) = keys::decode_regular_key(&regular_key)?;
            if time > read_time {
                continue;
            }
            return Ok(RegularValue::decode(value.as_slice())?.value);
        }
        Ok(None)
    }

    /// Applies intents of committed transaction, a no-op if it was applied already.
    pub fn apply_transaction(
        &self,
        id: TransactionId,
        commit_time: HybridTime,
        aborted: &AbortedSubTransactionSet,
    ) -> Result<ApplyStats> {
        let _operation = self.operations.operation()?;
        let _apply = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(applied_at) = self.participant.applied_at(&id) {
            debug!("{}transaction {} already applied at {}", self.log_prefix, id, applied_at);
            return Ok(ApplyStats::default());
        }
        if !self.participant.is_running(&id) {
            info!("{}no metadata of transaction {}, assume it was applied", self.log_prefix, id);
            return Ok(ApplyStats::default());
        }
        let context = ApplyIntentsContext {
            log_prefix: &self.log_prefix,
            transaction: id,
            commit_time,
            log_frontier: self.next_frontier(),
            aborted,
            key_bounds: &self.key_bounds,
            batch_size: self.config.apply_intents_batch_size,
        };
        let mut stats = ApplyStats::default();
        let mut state = None;
        loop {
            state = intents::apply_intents(&self.regular, &self.intents, &context, state.as_ref(), &mut stats)?;
            match &state {
                None => break,
                Some(state) => trace!("{}continue apply of {} after {:?}", self.log_prefix, id, state.key),
            }
        }
        self.participant.applied(id, commit_time);
        self.metrics.applied(stats.records);
        debug!("{}applied transaction {} at {}: {:?}", self.log_prefix, id, commit_time, stats);
        Ok(stats)
    }

    /// Removes intents of aborted transactions.
    pub fn remove_transactions(&self, ids: &[TransactionId], reason: &str) -> Result<()> {
        let _operation = self.operations.operation()?;
        let _apply = self.apply_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let ids: Vec<_> = ids.iter().copied().filter(|id| self.participant.applied_at(id).is_none()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let context = RemoveIntentsContext {
            log_prefix: &self.log_prefix,
            reason,
            log_frontier: self.next_frontier(),
            batch_size: self.config.apply_intents_batch_size,
        };
        let mut state = None;
        loop {
            state = intents::remove_intents(&self.intents, &ids, &context, state.as_ref())?;
            if state.is_none() {
                break;
            }
        }
        for id in ids {
            self.participant.aborted(id);
            self.metrics.removed();
        }
        Ok(())
    }

    /// Handles apply or cleanup notification from status tablet.
    pub fn handle_update_transaction(&self, request: UpdateTransactionRequest) -> Result<UpdateTransactionResponse> {
        self.clock.update(HybridTime::from_u64(request.propagated_hybrid_time));
        let Some(state) = request.state else {
            return Err(TxnError::InvalidArgument("update transaction request without state".to_string()));
        };
        let id = state.id()?;
        match state.transaction_status()? {
            TransactionStatus::Applying => {
                self.apply_transaction(id, state.commit_time(), &state.aborted_set())?;
            },
            status @ (TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup
            | TransactionStatus::Aborted) => {
                self.remove_transactions(&[id], status.as_str_name())?;
            },
            status => {
                return Err(TxnError::InvalidArgument(format!(
                    "{}unexpected status {:?} of transaction {} at participant",
                    self.log_prefix, status, id
                )))
            },
        }
        Ok(UpdateTransactionResponse { propagated_hybrid_time: self.clock.now().to_u64() })
    }

    pub fn get_transaction_status_at_participant(
        &self,
        request: &GetTransactionStatusAtParticipantRequest,
    ) -> Result<GetTransactionStatusAtParticipantResponse> {
        self.clock.update(HybridTime::from_u64(request.propagated_hybrid_time));
        let id = TransactionId::from_slice(&request.transaction_id)?;
        let mut response = self.participant.status_at_participant(&id, request.required_num_replicated_batches);
        response.propagated_hybrid_time = self.clock.now().to_u64();
        Ok(response)
    }

    pub fn flush_regular(&self) -> Result<bool> {
        self.regular.flush()
    }

    /// Flushes intents db if regular db has flushed far enough.
    pub fn flush_intents(&self) -> Result<bool> {
        self.flush_filter.flush_intents(Instant::now())
    }

    /// Flushes regular db and compacts its history. Returns number of dropped records.
    pub fn compact(&self) -> Result<usize> {
        let _operation = self.operations.operation()?;
        self.regular.flush()?;
        let cutoff = self.retention.history_cutoff(self.clock.now());
        let dropped = retention::compact_history(&self.regular, cutoff)?;
        debug!("{}compacted history at {}, dropped {}", self.log_prefix, cutoff, dropped);
        Ok(dropped)
    }

    pub fn history_cutoff(&self) -> HybridTime {
        self.retention.committed_cutoff()
    }

    /// Pauses reads and writes, resumed on drop of returned guard.
    pub async fn pause(&self, deadline: tokio::time::Instant) -> Result<ScopedRwOperationPause> {
        self.operations.pause(deadline).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.flush_filter.set_shutting_down();
        let deadline = tokio::time::Instant::now() + self.config.rw_operation_quiet_timeout;
        self.operations.stop(deadline).await?;
        if !self.flush_filter.flush_intents(Instant::now())? {
            self.flush_filter.flush_intents(Instant::now())?;
        }
        self.regular.close();
        self.intents.close();
        info!("{}tablet shut down", self.log_prefix);
        Ok(())
    }

    pub fn report(&self) -> TabletReport {
        TabletReport {
            tablet_id: self.tablet_id.clone(),
            running_transactions: self.participant.running_transactions(),
            metrics: self.metrics.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests;
