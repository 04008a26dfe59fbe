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

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use hashbrown::{HashMap, HashSet};
use tracing::{debug, trace};

use crate::clock::HybridTime;
use crate::error::{Result, TxnError};
use crate::protos::{GetTransactionStatusAtParticipantResponse, TransactionId, TransactionMetadataPb};

const RECENTLY_RESOLVED_CAPACITY: usize = 4096;

#[derive(Debug)]
struct RunningTransaction {
    metadata: TransactionMetadataPb,
    start_time: HybridTime,
    replicated_batches: i64,
    last_batch_time: HybridTime,
    next_write_id: u32,
}

#[derive(Clone, Copy, Debug)]
struct AppliedTransaction {
    commit_time: HybridTime,
    replicated_batches: i64,
}

#[derive(Default)]
struct ParticipantState {
    running: HashMap<TransactionId, RunningTransaction>,
    applied: HashMap<TransactionId, AppliedTransaction>,
    aborted: HashSet<TransactionId>,
    resolved: VecDeque<TransactionId>,
}

impl ParticipantState {
    fn resolve(&mut self, id: TransactionId) {
        self.resolved.push_back(id);
        while self.resolved.len() > RECENTLY_RESOLVED_CAPACITY {
            let Some(evicted) = self.resolved.pop_front() else {
                break;
            };
            self.applied.remove(&evicted);
            self.aborted.remove(&evicted);
        }
    }
}

/// Transactions with intents in a participant tablet.
pub struct TransactionParticipant {
    log_prefix: String,
    state: Mutex<ParticipantState>,
}

impl TransactionParticipant {
    pub fn new(tablet_id: &str) -> Self {
        Self { log_prefix: format!("T {tablet_id}: "), state: Mutex::new(ParticipantState::default()) }
    }

    fn lock(&self) -> MutexGuard<'_, ParticipantState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers transaction. Returns false if it is already running.
    pub fn add(&self, metadata: TransactionMetadataPb) -> Result<bool> {
        let id = metadata.id()?;
        let mut state = self.lock();
        if state.running.contains_key(&id) {
            return Ok(false);
        }
        if state.aborted.contains(&id) {
            return Err(TxnError::aborted(format!("Transaction {id} was aborted")));
        }
        if state.applied.contains_key(&id) {
            return Err(TxnError::illegal_state(format!("Transaction {id} was applied")));
        }
        debug!("{}add transaction {}", self.log_prefix, id);
        let start_time = metadata.start_time();
        let running = RunningTransaction {
            metadata,
            start_time,
            replicated_batches: 0,
            last_batch_time: HybridTime::MIN,
            next_write_id: 0,
        };
        state.running.insert(id, running);
        Ok(true)
    }

    /// Records a batch of `writes` intents replicated at `time`, returns first write id of the batch.
    pub fn prepare_batch(&self, id: TransactionId, writes: usize, time: HybridTime) -> Result<u32> {
        let mut state = self.lock();
        let Some(running) = state.running.get_mut(&id) else {
            let msg = format!("Transaction metadata missing: {id}, looks like it was just aborted");
            return Err(TxnError::TryAgain(msg));
        };
        let first_write_id = running.next_write_id;
        running.next_write_id += u32::try_from(writes).unwrap_or(u32::MAX);
        running.replicated_batches += 1;
        running.last_batch_time = running.last_batch_time.max(time);
        trace!("{}transaction {} replicated batch {} at {}", self.log_prefix, id, running.replicated_batches, time);
        Ok(first_write_id)
    }

    pub fn metadata(&self, id: &TransactionId) -> Option<TransactionMetadataPb> {
        self.lock().running.get(id).map(|running| running.metadata.clone())
    }

    pub fn is_running(&self, id: &TransactionId) -> bool {
        self.lock().running.contains_key(id)
    }

    pub fn running_transactions(&self) -> usize {
        self.lock().running.len()
    }

    /// Commit time of recently applied transaction.
    pub fn applied_at(&self, id: &TransactionId) -> Option<HybridTime> {
        self.lock().applied.get(id).map(|applied| applied.commit_time)
    }

    pub fn was_aborted(&self, id: &TransactionId) -> bool {
        self.lock().aborted.contains(id)
    }

    pub fn applied(&self, id: TransactionId, commit_time: HybridTime) {
        let mut state = self.lock();
        let replicated_batches = state.running.remove(&id).map(|running| running.replicated_batches).unwrap_or(0);
        if state.applied.insert(id, AppliedTransaction { commit_time, replicated_batches }).is_none() {
            state.resolve(id);
        }
    }

    pub fn aborted(&self, id: TransactionId) {
        let mut state = self.lock();
        state.running.remove(&id);
        if state.aborted.insert(id) {
            state.resolve(id);
        }
    }

    /// Start time of the oldest running transaction, [HybridTime::MAX] if none.
    pub fn min_running_hybrid_time(&self) -> HybridTime {
        self.lock().running.values().map(|running| running.start_time).min().unwrap_or(HybridTime::MAX)
    }

    pub fn status_at_participant(
        &self,
        id: &TransactionId,
        required_batches: Option<i64>,
    ) -> GetTransactionStatusAtParticipantResponse {
        let state = self.lock();
        let (aborted, batches, time) = if let Some(running) = state.running.get(id) {
            (false, running.replicated_batches, running.last_batch_time)
        } else if let Some(applied) = state.applied.get(id) {
            (false, applied.replicated_batches, applied.commit_time)
        } else {
            // Not replicated any batch yet, or resolved long ago.
            (state.aborted.contains(id), 0, HybridTime::MIN)
        };
        if let Some(required) = required_batches.filter(|required| !aborted && *required != batches) {
            debug!("{}transaction {} replicated {} batches, {} expected", self.log_prefix, id, batches, required);
        }
        GetTransactionStatusAtParticipantResponse {
            aborted,
            num_replicated_batches: batches,
            status_hybrid_time: time.to_u64(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;

    fn metadata(id: TransactionId, start: u64) -> TransactionMetadataPb {
        TransactionMetadataPb {
            transaction_id: id.to_vec(),
            status_tablet: "status".to_string(),
            start_hybrid_time: HybridTime::from_micros(start).to_u64(),
        }
    }

    #[test]
    fn test_running_transactions() {
        let participant = TransactionParticipant::new("t1");
        assert_that!(participant.min_running_hybrid_time()).is_equal_to(HybridTime::MAX);

        let (id1, id2) = (TransactionId::new_random(), TransactionId::new_random());
        assert_that!(participant.add(metadata(id1, 200)).unwrap()).is_true();
        assert_that!(participant.add(metadata(id1, 200)).unwrap()).is_false();
        participant.add(metadata(id2, 100)).unwrap();
        assert_that!(participant.min_running_hybrid_time()).is_equal_to(HybridTime::from_micros(100));

        participant.aborted(id2);
        assert_that!(participant.min_running_hybrid_time()).is_equal_to(HybridTime::from_micros(200));
        assert_that!(participant.was_aborted(&id2)).is_true();
        assert_that!(participant.add(metadata(id2, 100)).is_err()).is_true();

        participant.applied(id1, HybridTime::from_micros(300));
        assert_that!(participant.applied_at(&id1)).is_equal_to(Some(HybridTime::from_micros(300)));
        assert_that!(participant.running_transactions()).is_equal_to(0);
    }

    #[test]
    fn test_prepare_batch() {
        let participant = TransactionParticipant::new("t1");
        let id = TransactionId::new_random();
        let err = participant.prepare_batch(id, 1, HybridTime::from_micros(1)).unwrap_err();
        assert_that!(err.to_string()).contains("Transaction metadata missing");
        assert_that!(err.is_retryable()).is_true();

        participant.add(metadata(id, 1)).unwrap();
        assert_that!(participant.prepare_batch(id, 3, HybridTime::from_micros(10)).unwrap()).is_equal_to(0);
        assert_that!(participant.prepare_batch(id, 2, HybridTime::from_micros(20)).unwrap()).is_equal_to(3);

        let response = participant.status_at_participant(&id, Some(2));
        assert_that!(response.aborted).is_false();
        assert_that!(response.num_replicated_batches).is_equal_to(2);
        assert_that!(response.status_time()).is_equal_to(HybridTime::from_micros(20));

        let unknown = TransactionId::new_random();
        let response = participant.status_at_participant(&unknown, Some(1));
        assert_that!(response.aborted).is_false();
        assert_that!(response.num_replicated_batches).is_equal_to(0);

        participant.aborted(unknown);
        let response = participant.status_at_participant(&unknown, Some(1));
        assert_that!(response.aborted).is_true();
    }
}
