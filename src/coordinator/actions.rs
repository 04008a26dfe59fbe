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

//! Effects decided under coordinator lock and carried out after it is released.

use std::sync::atomic::{AtomicU64, Ordering};

use ignore_result::Ignore;
use smallvec::SmallVec;
use tokio::sync::oneshot;

use crate::clock::HybridTime;
use crate::error::Result;
use crate::protos::{AbortedSubTransactionSet, TransactionId, TransactionStatePb, TransactionStatus};
use crate::types::TabletId;

/// Status reported to readers and abort callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransactionStatusResult {
    pub status: TransactionStatus,
    pub status_time: HybridTime,
}

impl TransactionStatusResult {
    pub fn new(status: TransactionStatus, status_time: HybridTime) -> Self {
        Self { status, status_time }
    }

    pub fn aborted() -> Self {
        Self::new(TransactionStatus::Aborted, HybridTime::MAX)
    }
}

pub type AbortCallback = oneshot::Sender<Result<TransactionStatusResult>>;

/// Identifies one submission to replication so its outcome can be matched back.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct OperationHandle(u64);

impl OperationHandle {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Transaction status record to be replicated through status tablet log.
#[derive(Clone, Debug)]
pub struct UpdateTxnOperation {
    pub handle: OperationHandle,
    pub state: TransactionStatePb,
}

/// Status update request from client, participant or coordinator itself.
#[derive(Debug)]
pub struct UpdateTxnRequest {
    pub state: TransactionStatePb,
    responser: Option<oneshot::Sender<Result<()>>>,
}

impl UpdateTxnRequest {
    pub fn new(state: TransactionStatePb) -> (Self, oneshot::Receiver<Result<()>>) {
        let (sender, receiver) = oneshot::channel();
        (Self { state, responser: Some(sender) }, receiver)
    }

    /// Request nobody waits on.
    pub fn detached(state: TransactionStatePb) -> Self {
        Self { state, responser: None }
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.status()
    }

    pub fn complete(self, result: Result<()>) {
        if let Some(responser) = self.responser {
            responser.send(result).ignore();
        }
    }
}

/// Apply notification for one involved tablet.
#[derive(Clone, Debug, PartialEq)]
pub struct NotifyApplyingData {
    pub tablet: TabletId,
    pub transaction: TransactionId,
    pub aborted: AbortedSubTransactionSet,
    pub commit_time: HybridTime,
    pub sealed: bool,
    pub is_external: bool,
}

/// Best effort notification that aborted transaction's intents could be removed.
#[derive(Clone, Debug, PartialEq)]
pub struct NotifyCleanupData {
    pub tablet: TabletId,
    pub transaction: TransactionId,
}

#[derive(Debug)]
pub enum LeaderAction {
    Complete(UpdateTxnRequest, Result<()>),
    CompleteAbort(AbortCallback, Result<TransactionStatusResult>),
    NotifyApplying(NotifyApplyingData),
    NotifyCleanup(NotifyCleanupData),
    Submit(UpdateTxnOperation),
}

impl LeaderAction {
    /// Completions run on followers too, everything else is leader only.
    pub fn is_completion(&self) -> bool {
        matches!(self, LeaderAction::Complete(..) | LeaderAction::CompleteAbort(..))
    }
}

#[derive(Debug, Default)]
pub struct LeaderActions {
    pub leader_term: Option<i64>,
    actions: SmallVec<[LeaderAction; 4]>,
}

impl LeaderActions {
    pub fn new(leader_term: Option<i64>) -> Self {
        Self { leader_term, actions: SmallVec::new() }
    }

    pub fn is_leader(&self) -> bool {
        self.leader_term.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn complete(&mut self, request: UpdateTxnRequest, result: Result<()>) {
        self.actions.push(LeaderAction::Complete(request, result));
    }

    pub fn complete_abort(&mut self, callback: AbortCallback, result: Result<TransactionStatusResult>) {
        self.actions.push(LeaderAction::CompleteAbort(callback, result));
    }

    pub fn notify_applying(&mut self, data: NotifyApplyingData) {
        self.actions.push(LeaderAction::NotifyApplying(data));
    }

    pub fn notify_cleanup(&mut self, data: NotifyCleanupData) {
        self.actions.push(LeaderAction::NotifyCleanup(data));
    }

    pub fn submit(&mut self, operation: UpdateTxnOperation) {
        self.actions.push(LeaderAction::Submit(operation));
    }

    pub fn take(&mut self) -> SmallVec<[LeaderAction; 4]> {
        std::mem::take(&mut self.actions)
    }

    #[cfg(test)]
    pub fn actions(&self) -> &[LeaderAction] {
        &self.actions
    }
}
