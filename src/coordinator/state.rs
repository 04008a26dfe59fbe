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
use std::fmt::{self, Display, Formatter};
use std::time::Instant;

use hashbrown::HashMap;
use tracing::{debug, error, info, trace, warn};

use super::actions::{
    AbortCallback,
    LeaderActions,
    NotifyApplyingData,
    NotifyCleanupData,
    OperationHandle,
    TransactionStatusResult,
    UpdateTxnOperation,
    UpdateTxnRequest,
};
use super::context::{AbortedData, ReplicatedData};
use crate::clock::{Clock, HybridTime};
use crate::config::TransactionConfig;
use crate::error::{Result, TxnError};
use crate::protos::{AbortedSubTransactionSet, TransactionId, TransactionStatePb, TransactionStatus};
use crate::types::TabletId;

/// Environment of one locked mutation.
pub struct StateContext<'a> {
    pub clock: &'a Clock,
    pub config: &'a TransactionConfig,
    pub now: Instant,
    pub actions: &'a mut LeaderActions,
}

impl StateContext<'_> {
    fn is_leader(&self) -> bool {
        self.actions.is_leader()
    }
}

/// Participant whose replicated batch count must be confirmed for sealed transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedTabletBatches {
    pub tablet: TabletId,
    pub batches: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct InvolvedTabletState {
    required_replicated_batches: i64,
    all_batches_replicated: bool,
    all_intents_applied: bool,
}

#[derive(Debug)]
struct Replicating {
    handle: OperationHandle,
    status: TransactionStatus,
    submit_time: HybridTime,
    request: UpdateTxnRequest,
}

/// State of one transaction tracked by status tablet.
///
/// At most one record is in replication at any time, later requests wait in
/// `request_queue` so updates to one transaction are totally ordered.
#[derive(Debug)]
pub struct TransactionState {
    id: TransactionId,
    log_prefix: String,
    status: TransactionStatus,
    last_touch: HybridTime,
    commit_time: HybridTime,
    is_external: bool,
    involved_tablets: HashMap<TabletId, InvolvedTabletState>,
    tablets_with_not_replicated_batches: usize,
    tablets_with_not_applied_intents: usize,
    resend_applying_time: Option<Instant>,
    first_entry_raft_index: i64,
    aborted: AbortedSubTransactionSet,
    replicating: Option<Replicating>,
    request_queue: VecDeque<UpdateTxnRequest>,
    abort_waiters: Vec<AbortCallback>,
}

impl TransactionState {
    pub fn new(id: TransactionId, tablet_id: &str, last_touch: HybridTime) -> Self {
        Self {
            id,
            log_prefix: format!("T {tablet_id} ID {id}: "),
            status: TransactionStatus::Pending,
            last_touch,
            commit_time: HybridTime::MIN,
            is_external: false,
            involved_tablets: HashMap::new(),
            tablets_with_not_replicated_batches: 0,
            tablets_with_not_applied_intents: 0,
            resend_applying_time: None,
            first_entry_raft_index: i64::MAX,
            aborted: AbortedSubTransactionSet::default(),
            replicating: None,
            request_queue: VecDeque::new(),
            abort_waiters: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn last_touch(&self) -> HybridTime {
        self.last_touch
    }

    pub fn commit_time(&self) -> HybridTime {
        self.commit_time
    }

    pub fn first_entry_raft_index(&self) -> i64 {
        self.first_entry_raft_index
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    pub fn aborted_set(&self) -> &AbortedSubTransactionSet {
        &self.aborted
    }

    pub fn tablets_with_not_applied_intents(&self) -> usize {
        self.tablets_with_not_applied_intents
    }

    pub fn tablets_with_not_replicated_batches(&self) -> usize {
        self.tablets_with_not_replicated_batches
    }

    pub fn has_replicating(&self) -> bool {
        self.replicating.is_some()
    }

    pub fn queued_requests(&self) -> usize {
        self.request_queue.len()
    }

    pub fn involved_tablets(&self) -> Vec<TabletId> {
        let mut tablets: Vec<_> = self.involved_tablets.keys().cloned().collect();
        tablets.sort();
        tablets
    }

    pub fn completed(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted | TransactionStatus::AppliedInAllInvolvedTablets)
    }

    pub fn should_be_committed(&self) -> bool {
        self.should_be_in_status(TransactionStatus::Committed)
            || self.should_be_in_status(TransactionStatus::AppliedInAllInvolvedTablets)
    }

    pub fn should_be_aborted(&self) -> bool {
        self.should_be_in_status(TransactionStatus::Aborted)
    }

    /// Whether transaction is in or heading to given status through replicating or queued requests.
    pub fn should_be_in_status(&self, status: TransactionStatus) -> bool {
        if self.status == status {
            return true;
        }
        let Some(replicating) = &self.replicating else {
            return false;
        };
        replicating.status == status || self.request_queue.iter().any(|request| request.status() == status)
    }

    pub fn expired_at(&self, now: HybridTime, config: &TransactionConfig) -> bool {
        if self.is_external || self.should_be_committed() || self.should_be_in_status(TransactionStatus::Sealed) {
            return false;
        }
        now.physical_since(self.last_touch) > config.transaction_timeout()
    }

    pub fn get_status(
        &self,
        expected_tablet_batches: Option<&mut Vec<ExpectedTabletBatches>>,
        now: HybridTime,
        ht_lease_expiration: HybridTime,
    ) -> Result<TransactionStatusResult> {
        match self.status {
            TransactionStatus::Committed | TransactionStatus::AppliedInAllInvolvedTablets => {
                Ok(TransactionStatusResult::new(TransactionStatus::Committed, self.commit_time))
            },
            TransactionStatus::Sealed => {
                if self.tablets_with_not_replicated_batches == 0 {
                    return Ok(TransactionStatusResult::new(TransactionStatus::Committed, self.commit_time));
                }
                if let Some(expected) = expected_tablet_batches {
                    self.fill_expected_tablet_batches(expected);
                }
                Ok(TransactionStatusResult::new(TransactionStatus::Sealed, self.commit_time))
            },
            TransactionStatus::Aborted => Ok(TransactionStatusResult::aborted()),
            TransactionStatus::Pending => {
                let status_time = match &self.replicating {
                    Some(replicating)
                        if matches!(replicating.status, TransactionStatus::Committed | TransactionStatus::Aborted) =>
                    {
                        replicating.submit_time
                    },
                    _ => now,
                };
                let status_time = status_time.min(ht_lease_expiration).decremented();
                Ok(TransactionStatusResult::new(TransactionStatus::Pending, status_time))
            },
            TransactionStatus::Created
            | TransactionStatus::Promoted
            | TransactionStatus::Applying
            | TransactionStatus::AppliedInOneOfInvolvedTablets
            | TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup => Err(TxnError::Corruption(format!(
                "{}transaction in unexpected state {:?}",
                self.log_prefix, self.status
            ))),
        }
    }

    fn fill_expected_tablet_batches(&self, expected: &mut Vec<ExpectedTabletBatches>) {
        for (tablet, state) in self.involved_tablets.iter() {
            if !state.all_batches_replicated {
                expected.push(ExpectedTabletBatches {
                    tablet: tablet.clone(),
                    batches: state.required_replicated_batches,
                });
            }
        }
        expected.sort_by(|a, b| a.tablet.cmp(&b.tablet));
    }

    /// Applies effect of a replicated record.
    pub fn process_replicated(&mut self, data: &ReplicatedData, ctx: &mut StateContext<'_>) -> Result<()> {
        let replicating = match self.replicating.take() {
            Some(replicating) if data.handle == Some(replicating.handle) => Some(replicating),
            Some(replicating) => {
                warn!(
                    "{}replicated {:?} at {} while replicating {:?}",
                    self.log_prefix, data.state.status(), data.op_id, replicating.status
                );
                ctx.actions.complete(
                    replicating.request,
                    Err(TxnError::illegal_state("replication superseded by other record")),
                );
                None
            },
            None => None,
        };

        let result = self.do_process_replicated(data, ctx);
        if let Some(replicating) = replicating {
            ctx.actions.complete(replicating.request, result.clone());
        }

        if data.leader_term.is_none() {
            self.clear_requests(TxnError::illegal_state("Leader changed"), ctx);
        } else {
            match self.status {
                TransactionStatus::AppliedInAllInvolvedTablets => {
                    self.clear_requests(TxnError::AlreadyPresent("Transaction committed".to_string()), ctx)
                },
                TransactionStatus::Aborted => self.clear_requests(TxnError::expired("Transaction aborted"), ctx),
                TransactionStatus::Created
                | TransactionStatus::Pending
                | TransactionStatus::Committed
                | TransactionStatus::Sealed
                | TransactionStatus::Promoted
                | TransactionStatus::Applying
                | TransactionStatus::AppliedInOneOfInvolvedTablets
                | TransactionStatus::ImmediateCleanup
                | TransactionStatus::GracefulCleanup => self.process_queue(ctx),
            }
        }
        result
    }

    fn do_process_replicated(&mut self, data: &ReplicatedData, ctx: &mut StateContext<'_>) -> Result<()> {
        let status = data.state.transaction_status()?;
        match status {
            TransactionStatus::Aborted => self.aborted_replication_finished(data, ctx),
            TransactionStatus::Sealed => self.sealed_replication_finished(data),
            TransactionStatus::Committed => self.committed_replication_finished(data, ctx),
            TransactionStatus::Created | TransactionStatus::Promoted | TransactionStatus::Pending => {
                self.pending_replication_finished(data, ctx);
                Ok(())
            },
            TransactionStatus::AppliedInAllInvolvedTablets => self.applied_in_all_replication_finished(data),
            TransactionStatus::Applying
            | TransactionStatus::AppliedInOneOfInvolvedTablets
            | TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup => Err(TxnError::illegal_state(format!(
                "{}unexpected status {:?} in replicated record",
                self.log_prefix, status
            ))),
        }
    }

    /// Releases requests whose replication failed.
    pub fn process_aborted(&mut self, data: &AbortedData, ctx: &mut StateContext<'_>) {
        if let (Some(replicating), Some(handle)) = (&self.replicating, data.handle) {
            if replicating.handle != handle {
                warn!("{}aborted replication of {:?} is not the one in flight", self.log_prefix, data.state.status());
                return;
            }
        }
        self.clear_requests(data.error.clone(), ctx);
    }

    pub fn handle(&mut self, request: UpdateTxnRequest, ctx: &mut StateContext<'_>) {
        if request.status() == TransactionStatus::AppliedInOneOfInvolvedTablets {
            let result = match request.state.tablets.first() {
                Some(tablet) => {
                    let tablet = tablet.clone();
                    self.applied_in_one_of_involved_tablets(&tablet, ctx)
                },
                None => Err(TxnError::InvalidArgument("applied notification carries no tablet".to_string())),
            };
            ctx.actions.complete(request, result);
            return;
        }
        if self.replicating.is_some() {
            trace!("{}queue request {:?}", self.log_prefix, request.status());
            self.request_queue.push_back(request);
            return;
        }
        self.do_handle(request, ctx);
    }

    fn do_handle(&mut self, request: UpdateTxnRequest, ctx: &mut StateContext<'_>) {
        let result = match request.status() {
            TransactionStatus::Committed => self.handle_commit(ctx),
            TransactionStatus::Pending | TransactionStatus::Created if self.status != TransactionStatus::Pending => {
                Err(TxnError::illegal_state(format!(
                    "transaction {} in wrong state when starting: {:?}",
                    self.id, self.status
                )))
            },
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!("{}reject request {:?}: {}", self.log_prefix, request.status(), err);
            ctx.actions.complete(request, Err(err));
            return;
        }
        self.submit_request(request, ctx);
    }

    fn handle_commit(&mut self, ctx: &mut StateContext<'_>) -> Result<()> {
        let now = ctx.clock.now();
        if self.expired_at(now, ctx.config) {
            self.abort(ctx);
            return Err(TxnError::expired(format!("commit of expired transaction {}", self.id)));
        }
        if self.status != TransactionStatus::Pending {
            return Err(TxnError::illegal_state(format!(
                "transaction {} in wrong state to commit: {:?}",
                self.id, self.status
            )));
        }
        Ok(())
    }

    fn submit_request(&mut self, request: UpdateTxnRequest, ctx: &mut StateContext<'_>) -> bool {
        if !ctx.is_leader() {
            ctx.actions.complete(request, Err(TxnError::illegal_state("Submit update transaction on non leader")));
            return false;
        }
        let handle = OperationHandle::next();
        let state = request.state.clone();
        trace!("{}submit {:?}", self.log_prefix, request.status());
        self.replicating =
            Some(Replicating { handle, status: request.status(), submit_time: ctx.clock.now(), request });
        ctx.actions.submit(UpdateTxnOperation { handle, state });
        true
    }

    fn submit_update_status(&mut self, status: TransactionStatus, ctx: &mut StateContext<'_>) {
        debug!("{}submit update status {:?}", self.log_prefix, status);
        let request = UpdateTxnRequest::detached(TransactionStatePb::new(self.id, status));
        if self.replicating.is_some() {
            self.request_queue.push_back(request);
        } else {
            self.submit_request(request, ctx);
        }
    }

    fn process_queue(&mut self, ctx: &mut StateContext<'_>) {
        while self.replicating.is_none() {
            let Some(request) = self.request_queue.pop_front() else {
                break;
            };
            self.do_handle(request, ctx);
        }
    }

    pub fn clear_requests(&mut self, err: TxnError, ctx: &mut StateContext<'_>) {
        if let Some(replicating) = self.replicating.take() {
            ctx.actions.complete(replicating.request, Err(err.clone()));
        }
        for request in self.request_queue.drain(..) {
            ctx.actions.complete(request, Err(err.clone()));
        }
        self.notify_abort_waiters(Err(err), ctx);
    }

    fn notify_abort_waiters(&mut self, result: Result<TransactionStatusResult>, ctx: &mut StateContext<'_>) {
        for waiter in self.abort_waiters.drain(..) {
            ctx.actions.complete_abort(waiter, result.clone());
        }
    }

    /// Aborts transaction on behalf of caller, which gets final status through `callback`.
    pub fn abort_with_callback(&mut self, callback: AbortCallback, ctx: &mut StateContext<'_>) {
        let result = match self.status {
            TransactionStatus::Committed | TransactionStatus::AppliedInAllInvolvedTablets => {
                Ok(TransactionStatusResult::new(TransactionStatus::Committed, self.commit_time))
            },
            TransactionStatus::Aborted => Ok(TransactionStatusResult::aborted()),
            TransactionStatus::Pending if self.should_be_committed() => {
                Ok(TransactionStatusResult::new(TransactionStatus::Committed, HybridTime::MAX))
            },
            TransactionStatus::Pending => {
                self.abort_waiters.push(callback);
                self.abort(ctx);
                return;
            },
            TransactionStatus::Sealed => Ok(TransactionStatusResult::new(TransactionStatus::Sealed, self.commit_time)),
            TransactionStatus::Created
            | TransactionStatus::Promoted
            | TransactionStatus::Applying
            | TransactionStatus::AppliedInOneOfInvolvedTablets
            | TransactionStatus::ImmediateCleanup
            | TransactionStatus::GracefulCleanup => Err(TxnError::illegal_state(format!(
                "{}abort in unexpected state {:?}",
                self.log_prefix, self.status
            ))),
        };
        ctx.actions.complete_abort(callback, result);
    }

    pub fn abort(&mut self, ctx: &mut StateContext<'_>) {
        if self.should_be_committed() {
            error!("{}abort of committed transaction", self.log_prefix);
            return;
        }
        if self.should_be_aborted() {
            return;
        }
        if self.status != TransactionStatus::Pending {
            error!("{}abort of transaction in status {:?}", self.log_prefix, self.status);
            return;
        }
        self.submit_update_status(TransactionStatus::Aborted, ctx);
    }

    pub fn poll(&mut self, ctx: &mut StateContext<'_>) {
        let fully_sealed = self.status == TransactionStatus::Sealed && self.tablets_with_not_replicated_batches == 0;
        if self.status != TransactionStatus::Committed && !fully_sealed {
            return;
        }
        if self.tablets_with_not_applied_intents == 0 {
            if ctx.is_leader() && !self.should_be_in_status(TransactionStatus::AppliedInAllInvolvedTablets) {
                self.submit_update_status(TransactionStatus::AppliedInAllInvolvedTablets, ctx);
            }
        } else if self.resend_applying_time.map_or(true, |resend_time| ctx.now >= resend_time) {
            if ctx.is_leader() {
                let tablets: Vec<_> = self
                    .involved_tablets
                    .iter()
                    .filter(|(_, state)| !state.all_intents_applied)
                    .map(|(tablet, _)| tablet.clone())
                    .collect();
                for tablet in tablets {
                    self.notify_applying(tablet, ctx);
                }
            }
            self.resend_applying_time = Some(ctx.now + ctx.config.resend_applying_interval);
        }
    }

    fn notify_applying(&self, tablet: TabletId, ctx: &mut StateContext<'_>) {
        ctx.actions.notify_applying(NotifyApplyingData {
            tablet,
            transaction: self.id,
            aborted: self.aborted.clone(),
            commit_time: self.commit_time,
            sealed: self.status == TransactionStatus::Sealed,
            is_external: self.is_external,
        });
    }

    fn start_apply(&mut self, ctx: &mut StateContext<'_>) {
        debug!("{}start apply at {}", self.log_prefix, self.commit_time);
        self.resend_applying_time = Some(ctx.now + ctx.config.resend_applying_interval);
        self.tablets_with_not_applied_intents = self.involved_tablets.len();
        if ctx.is_leader() {
            let mut tablets: Vec<_> = self.involved_tablets.keys().cloned().collect();
            tablets.sort();
            for tablet in tablets {
                self.notify_applying(tablet, ctx);
            }
        }
        let committed = TransactionStatusResult::new(TransactionStatus::Committed, self.commit_time);
        self.notify_abort_waiters(Ok(committed), ctx);
    }

    /// Participant `tablet` has replicated all expected batches of sealed transaction by `last_time`.
    pub fn replicated_all_batches_at(&mut self, tablet: &str, last_time: HybridTime, ctx: &mut StateContext<'_>) {
        if self.status != TransactionStatus::Sealed {
            return;
        }
        let Some(state) = self.involved_tablets.get_mut(tablet) else {
            warn!("{}replicated batches in unknown tablet {}", self.log_prefix, tablet);
            return;
        };
        if state.all_batches_replicated {
            return;
        }
        state.all_batches_replicated = true;
        if !self.is_external {
            self.commit_time = self.commit_time.max(last_time);
        }
        self.tablets_with_not_replicated_batches -= 1;
        if self.tablets_with_not_replicated_batches == 0 {
            self.start_apply(ctx);
        }
    }

    /// Participant reported sealed transaction aborted.
    pub fn mark_aborted(&mut self, ctx: &mut StateContext<'_>) {
        if !matches!(self.status, TransactionStatus::Pending | TransactionStatus::Sealed) {
            return;
        }
        info!("{}aborted by participant", self.log_prefix);
        self.status = TransactionStatus::Aborted;
        self.notify_abort_waiters(Ok(TransactionStatusResult::aborted()), ctx);
    }

    /// Replaces split `source` tablet with its `children`. Returns whether children should be notified.
    pub fn add_involved_tablets(&mut self, source: &str, children: &[TabletId]) -> Result<bool> {
        let Some(source_state) = self.involved_tablets.get(source).copied() else {
            return Err(TxnError::illegal_state(format!("{}unknown split source tablet {}", self.log_prefix, source)));
        };
        if source_state.all_intents_applied {
            debug!("{}split tablet {} has already applied intents", self.log_prefix, source);
            return Ok(false);
        }
        for child in children {
            if self.involved_tablets.contains_key(child) {
                continue;
            }
            let child_state = InvolvedTabletState { all_intents_applied: false, ..source_state };
            self.involved_tablets.insert(child.clone(), child_state);
            self.tablets_with_not_applied_intents += 1;
        }
        self.involved_tablets.remove(source);
        self.tablets_with_not_applied_intents -= 1;
        Ok(true)
    }

    pub fn applied_in_one_of_involved_tablets(&mut self, tablet: &str, ctx: &mut StateContext<'_>) -> Result<()> {
        if !matches!(self.status, TransactionStatus::Committed | TransactionStatus::Sealed) {
            info!("{}applied in tablet {} while in status {:?}", self.log_prefix, tablet, self.status);
            return Ok(());
        }
        let Some(state) = self.involved_tablets.get_mut(tablet) else {
            warn!("{}applied in unknown tablet {}", self.log_prefix, tablet);
            return Ok(());
        };
        if state.all_intents_applied || self.tablets_with_not_applied_intents == 0 {
            return Ok(());
        }
        state.all_intents_applied = true;
        self.tablets_with_not_applied_intents -= 1;
        if self.tablets_with_not_applied_intents == 0 {
            self.submit_update_status(TransactionStatus::AppliedInAllInvolvedTablets, ctx);
        }
        Ok(())
    }

    fn pending_replication_finished(&mut self, data: &ReplicatedData, ctx: &mut StateContext<'_>) {
        if ctx.is_leader() && self.expired_at(data.hybrid_time, ctx.config) {
            info!("{}expired during replication of {:?}", self.log_prefix, data.state.status());
            self.abort(ctx);
            return;
        }
        if self.status != TransactionStatus::Pending {
            error!("{}bad status during {:?} replication: {:?}", self.log_prefix, data.state.status(), self.status);
            return;
        }
        self.last_touch = data.hybrid_time;
        self.first_entry_raft_index = data.op_id.index;
        self.is_external = data.state.is_external();
        if let Some(aborted) = &data.state.aborted {
            if !aborted.is_empty() {
                self.aborted = aborted.clone();
            }
        }
    }

    fn sealed_replication_finished(&mut self, data: &ReplicatedData) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(TxnError::illegal_state(format!(
                "{}unexpected status during SEALED replication: {:?}",
                self.log_prefix, self.status
            )));
        }
        if data.state.tablets.len() != data.state.tablet_batches.len() {
            return Err(TxnError::InvalidArgument(format!(
                "{}sealed record with {} tablets but {} batch counts",
                self.log_prefix,
                data.state.tablets.len(),
                data.state.tablet_batches.len()
            )));
        }
        self.last_touch = data.hybrid_time;
        self.commit_time = data.hybrid_time;
        self.first_entry_raft_index = data.op_id.index;
        self.is_external = data.state.is_external();
        self.aborted = data.state.aborted_set();
        self.status = TransactionStatus::Sealed;
        for (tablet, batches) in data.state.tablets.iter().zip(data.state.tablet_batches.iter()) {
            if *batches == 0 {
                error!("{}sealed with zero batches in tablet {}", self.log_prefix, tablet);
            }
            let state = InvolvedTabletState { required_replicated_batches: *batches, ..Default::default() };
            if self.involved_tablets.insert(tablet.clone(), state).is_none() {
                self.tablets_with_not_replicated_batches += 1;
            }
        }
        Ok(())
    }

    fn committed_replication_finished(&mut self, data: &ReplicatedData, ctx: &mut StateContext<'_>) -> Result<()> {
        if self.status != TransactionStatus::Pending {
            return Err(TxnError::illegal_state(format!(
                "{}unexpected status during COMMITTED replication: {:?}",
                self.log_prefix, self.status
            )));
        }
        self.last_touch = data.hybrid_time;
        self.commit_time = data.state.external_time().unwrap_or(data.hybrid_time);
        self.first_entry_raft_index = data.op_id.index;
        self.is_external = data.state.is_external();
        self.aborted = data.state.aborted_set();
        for tablet in data.state.tablets.iter() {
            let state = InvolvedTabletState { all_batches_replicated: true, ..Default::default() };
            self.involved_tablets.insert(tablet.clone(), state);
        }
        self.status = TransactionStatus::Committed;
        self.start_apply(ctx);
        Ok(())
    }

    fn applied_in_all_replication_finished(&mut self, data: &ReplicatedData) -> Result<()> {
        match self.status {
            TransactionStatus::Committed | TransactionStatus::Sealed => {},
            TransactionStatus::AppliedInAllInvolvedTablets => return Ok(()),
            status => {
                return Err(TxnError::illegal_state(format!(
                    "{}unexpected status during APPLIED_IN_ALL_INVOLVED_TABLETS replication: {:?}",
                    self.log_prefix, status
                )))
            },
        }
        self.last_touch = data.hybrid_time;
        self.is_external = data.state.is_external();
        self.status = TransactionStatus::AppliedInAllInvolvedTablets;
        Ok(())
    }

    fn aborted_replication_finished(&mut self, data: &ReplicatedData, ctx: &mut StateContext<'_>) -> Result<()> {
        match self.status {
            TransactionStatus::Pending => {},
            TransactionStatus::Aborted => return Ok(()),
            status => {
                return Err(TxnError::illegal_state(format!(
                    "{}unexpected status during ABORTED replication: {:?}",
                    self.log_prefix, status
                )))
            },
        }
        self.first_entry_raft_index = data.op_id.index;
        self.status = TransactionStatus::Aborted;
        self.notify_abort_waiters(Ok(TransactionStatusResult::aborted()), ctx);
        if ctx.is_leader() {
            for tablet in data.state.tablets.iter() {
                ctx.actions.notify_cleanup(NotifyCleanupData { tablet: tablet.clone(), transaction: self.id });
            }
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn set_first_entry_raft_index_for_test(&mut self, index: i64, last_touch: HybridTime) {
        self.first_entry_raft_index = index;
        self.last_touch = last_touch;
    }
}

impl Display for TransactionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{{ id: {} status: {:?} last_touch: {} commit_time: {} is_external: {} involved_tablets: {:?} \
             not_replicated_batches: {} not_applied_intents: {} first_entry_raft_index: {} replicating: {:?} \
             queued: {} }}",
            self.id,
            self.status,
            self.last_touch,
            self.commit_time,
            self.is_external,
            self.involved_tablets(),
            self.tablets_with_not_replicated_batches,
            self.tablets_with_not_applied_intents,
            self.first_entry_raft_index,
            self.replicating.as_ref().map(|replicating| replicating.status),
            self.request_queue.len(),
        )
    }
}
