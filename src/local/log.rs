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
use std::sync::{Arc, Mutex, PoisonError};

use prost::Message;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, HybridTime};
use crate::coordinator::{AbortedData, ReplicatedData, TransactionCoordinator, UpdateTxnOperation};
use crate::error::{Result, TxnError};
use crate::protos::LogEntry;
use crate::types::OpId;
use crate::utils::TaskHandle;

#[derive(Debug)]
struct Submission {
    operation: UpdateTxnOperation,
    term: i64,
}

#[derive(Debug)]
struct LogContent {
    term: i64,
    leader: bool,
    /// Index of first entry in `entries`.
    start: i64,
    entries: VecDeque<Vec<u8>>,
}

impl LogContent {
    fn next_index(&self) -> i64 {
        self.start + self.entries.len() as i64
    }
}

/// Single node log of status tablet.
///
/// Submissions are replicated in order by a replicator task which reports outcomes back to
/// coordinator.
#[derive(Debug)]
pub struct LocalLog {
    log_prefix: String,
    clock: Clock,
    content: Mutex<LogContent>,
    submissions: mpsc::UnboundedSender<Submission>,
}

/// Replicates submissions of [LocalLog].
#[derive(Debug)]
pub struct Replicator {
    log: Arc<LocalLog>,
    receiver: mpsc::UnboundedReceiver<Submission>,
}

impl LocalLog {
    /// Constructs log led by this node in term 1.
    pub fn new(tablet_id: &str, clock: Clock) -> (Arc<LocalLog>, Replicator) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let content = LogContent { term: 1, leader: true, start: 1, entries: VecDeque::new() };
        let log = Arc::new(LocalLog {
            log_prefix: format!("T {tablet_id}: "),
            clock,
            content: Mutex::new(content),
            submissions: sender,
        });
        let replicator = Replicator { log: log.clone(), receiver };
        (log, replicator)
    }

    fn content(&self) -> std::sync::MutexGuard<'_, LogContent> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn leader_term(&self) -> Option<i64> {
        let content = self.content();
        content.leader.then_some(content.term)
    }

    pub fn term(&self) -> i64 {
        self.content().term
    }

    /// Gives up leadership, pending submissions of current term fail to replicate.
    pub fn step_down(&self) {
        let mut content = self.content();
        content.leader = false;
        info!("{}step down in term {}", self.log_prefix, content.term);
    }

    /// Takes leadership in a new term.
    pub fn become_leader(&self) -> i64 {
        let mut content = self.content();
        content.term += 1;
        content.leader = true;
        info!("{}become leader in term {}", self.log_prefix, content.term);
        content.term
    }

    pub fn submit(&self, operation: UpdateTxnOperation, leader_term: i64) -> Result<()> {
        let content = self.content();
        if !content.leader || content.term != leader_term {
            return Err(TxnError::illegal_state(format!(
                "not leader in term {leader_term}, current term {}",
                content.term
            )));
        }
        drop(content);
        self.submissions
            .send(Submission { operation, term: leader_term })
            .map_err(|_| TxnError::aborted("log replicator stopped"))
    }

    fn append(&self, submission: &Submission) -> Option<(OpId, HybridTime)> {
        let mut content = self.content();
        if !content.leader || content.term != submission.term {
            return None;
        }
        let op_id = OpId::new(content.term, content.next_index());
        let hybrid_time = self.clock.now();
        let entry = LogEntry {
            term: op_id.term,
            index: op_id.index,
            hybrid_time: hybrid_time.to_u64(),
            state: Some(submission.operation.state.clone()),
        };
        content.entries.push_back(entry.encode_to_vec());
        Some((op_id, hybrid_time))
    }

    /// Index of first retained entry.
    pub fn first_index(&self) -> i64 {
        self.content().start
    }

    pub fn last_index(&self) -> i64 {
        self.content().next_index() - 1
    }

    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        let content = self.content();
        let mut entries = Vec::with_capacity(content.entries.len());
        for bytes in content.entries.iter() {
            entries.push(LogEntry::decode(bytes.as_slice())?);
        }
        Ok(entries)
    }

    /// Drops entries before `min_index`, returns number of dropped entries.
    pub fn gc(&self, min_index: i64) -> usize {
        let mut content = self.content();
        let mut dropped = 0;
        while content.start < min_index && !content.entries.is_empty() {
            content.entries.pop_front();
            content.start += 1;
            dropped += 1;
        }
        if dropped != 0 {
            debug!("{}gc {} entries, first index {}", self.log_prefix, dropped, content.start);
        }
        dropped
    }
}

impl Replicator {
    pub fn start(self, coordinator: TransactionCoordinator) -> TaskHandle<()> {
        TaskHandle::new(tokio::spawn(self.serve(coordinator)))
    }

    async fn serve(mut self, coordinator: TransactionCoordinator) {
        while let Some(submission) = self.receiver.recv().await {
            let Some((op_id, hybrid_time)) = self.log.append(&submission) else {
                let Submission { operation, term } = submission;
                coordinator.process_aborted(AbortedData {
                    state: operation.state,
                    op_id: None,
                    handle: Some(operation.handle),
                    error: TxnError::illegal_state(format!("Leader changed since term {term}")),
                });
                continue;
            };
            let Submission { operation, term } = submission;
            let data = ReplicatedData {
                leader_term: self.log.leader_term().filter(|current| *current == term),
                state: operation.state,
                op_id,
                hybrid_time,
                handle: Some(operation.handle),
            };
            if let Err(err) = coordinator.process_replicated(data) {
                warn!("{}fail to process replicated {}: {}", self.log.log_prefix, op_id, err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::coordinator::OperationHandle;
    use crate::protos::{TransactionId, TransactionStatePb, TransactionStatus};

    fn operation() -> UpdateTxnOperation {
        let state = TransactionStatePb::new(TransactionId::new_random(), TransactionStatus::Created);
        UpdateTxnOperation { handle: OperationHandle::next(), state }
    }

    #[test]
    fn test_log_append() {
        let (log, _replicator) = LocalLog::new("status", Clock::new());
        assert_that!(log.leader_term()).is_equal_to(Some(1));
        for _ in 0..3 {
            let submission = Submission { operation: operation(), term: 1 };
            log.append(&submission).unwrap();
        }
        assert_that!(log.first_index()).is_equal_to(1);
        assert_that!(log.last_index()).is_equal_to(3);
        let entries = log.entries().unwrap();
        assert_that!(entries.iter().map(|entry| entry.index).collect::<Vec<_>>()).is_equal_to(vec![1, 2, 3]);
        assert_that!(entries[0].hybrid_time < entries[2].hybrid_time).is_true();

        assert_that!(log.gc(3)).is_equal_to(2);
        assert_that!(log.first_index()).is_equal_to(3);
        assert_that!(log.gc(i64::MAX)).is_equal_to(1);
        assert_that!(log.first_index()).is_equal_to(4);
        assert_that!(log.last_index()).is_equal_to(3);
    }

    #[test]
    fn test_log_leadership() {
        let (log, _replicator) = LocalLog::new("status", Clock::new());
        log.step_down();
        assert_that!(log.leader_term()).is_equal_to(None);
        assert_that!(matches!(log.submit(operation(), 1).unwrap_err(), TxnError::IllegalState(_))).is_true();
        let submission = Submission { operation: operation(), term: 1 };
        assert_that!(log.append(&submission)).is_equal_to(None);

        let term = log.become_leader();
        assert_that!(term).is_equal_to(2);
        assert_that!(log.submit(operation(), 1).is_err()).is_true();
        log.submit(operation(), 2).unwrap();
    }
}
