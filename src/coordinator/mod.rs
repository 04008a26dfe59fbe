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

//! Transaction coordinator of a transaction status tablet.
//!
//! All mutations of managed transactions happen under one lock. Decisions that
//! need I/O (replication submissions, RPCs to participants and request
//! completions) are collected as [LeaderActions] and carried out after the lock
//! is released.

mod actions;
mod context;
mod deadlock;
mod managed;
mod poller;
mod state;

use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use ignore_result::Ignore;
use tokio::sync::{oneshot, watch};
use tracing::{debug, debug_span, info, trace, warn, Instrument};

pub use self::actions::{
    AbortCallback,
    LeaderAction,
    LeaderActions,
    NotifyApplyingData,
    NotifyCleanupData,
    OperationHandle,
    TransactionStatusResult,
    UpdateTxnOperation,
    UpdateTxnRequest,
};
pub use self::context::{AbortedData, CoordinatorContext, ReplicatedData, TransactionRpc};
pub use self::deadlock::{DeadlockDetector, TransactionAbortController};
use self::managed::ManagedTransactions;
pub use self::poller::Poller;
pub use self::state::ExpectedTabletBatches;
use self::state::{StateContext, TransactionState};
use crate::clock::HybridTime;
use crate::config::TransactionConfig;
use crate::error::{Result, TxnError};
use crate::metrics::{CoordinatorMetrics, CoordinatorReport};
use crate::protos::{
    AbortTransactionRequest,
    AbortTransactionResponse,
    AbortedSubTransactionSet,
    GetTransactionStatusAtParticipantRequest,
    GetTransactionStatusAtParticipantResponse,
    GetTransactionStatusRequest,
    GetTransactionStatusResponse,
    ProbeRequest,
    ProbeResponse,
    TransactionId,
    TransactionStatePb,
    TransactionStatus,
    UpdateTransactionRequest,
    WaitForReportRequest,
    WaitForReportResponse,
};
use crate::types::TabletId;

enum Admission {
    Handle,
    Ignore,
}

struct StatusLookup {
    result: TransactionStatusResult,
    expected: Vec<ExpectedTabletBatches>,
    coordinator_safe_time: HybridTime,
    aborted: AbortedSubTransactionSet,
}

struct CoordinatorInner {
    context: Arc<dyn CoordinatorContext>,
    config: TransactionConfig,
    log_prefix: String,
    managed: Mutex<ManagedTransactions>,
    managed_count: watch::Sender<usize>,
    deleting: AtomicBool,
    stopped: AtomicBool,
    metrics: Arc<CoordinatorMetrics>,
    deadlock_detector: Mutex<Option<Arc<dyn DeadlockDetector>>>,
    pollers: Mutex<Vec<Poller>>,
    runtime: tokio::runtime::Handle,
}

/// Coordinates transactions whose status tablet is this tablet.
///
/// Must be created inside a tokio runtime, participant RPCs are spawned onto it.
#[derive(Clone)]
pub struct TransactionCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl TransactionCoordinator {
    pub fn new(context: Arc<dyn CoordinatorContext>, config: TransactionConfig) -> Self {
        let log_prefix = format!("T {}: ", context.tablet_id());
        let (managed_count, _) = watch::channel(0);
        let inner = CoordinatorInner {
            context,
            config,
            log_prefix,
            managed: Mutex::new(ManagedTransactions::default()),
            managed_count,
            deleting: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            metrics: Arc::new(CoordinatorMetrics::default()),
            deadlock_detector: Mutex::new(None),
            pollers: Mutex::new(Vec::new()),
            runtime: tokio::runtime::Handle::current(),
        };
        Self { inner: Arc::new(inner) }
    }

    pub fn tablet_id(&self) -> &str {
        self.inner.context.tablet_id()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &Arc<CoordinatorMetrics> {
        &self.inner.metrics
    }

    pub fn set_deadlock_detector(&self, detector: Arc<dyn DeadlockDetector>) {
        *self.inner.deadlock_detector.lock().unwrap_or_else(PoisonError::into_inner) = Some(detector);
    }

    fn deadlock_detector(&self) -> Option<Arc<dyn DeadlockDetector>> {
        if !self.inner.config.enable_deadlock_detection {
            return None;
        }
        self.inner.deadlock_detector.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn lock(&self) -> MutexGuard<'_, ManagedTransactions> {
        self.inner.managed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state_context<'a>(&'a self, actions: &'a mut LeaderActions, now: Instant) -> StateContext<'a> {
        StateContext { clock: self.inner.context.clock(), config: &self.inner.config, now, actions }
    }

    fn update_managed_count(&self, managed: &ManagedTransactions) {
        self.inner.managed_count.send_replace(managed.len());
    }

    /// Starts transaction and deadlock detection pollers.
    pub fn start(&self) {
        let mut pollers = self.inner.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        if !pollers.is_empty() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        pollers.push(Poller::start(
            format!("{}transaction poller", self.inner.log_prefix),
            self.inner.config.check_interval,
            move || {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                TransactionCoordinator { inner }.poll();
                true
            },
        ));
        let weak = Arc::downgrade(&self.inner);
        pollers.push(Poller::start(
            format!("{}deadlock detection poller", self.inner.log_prefix),
            self.inner.config.deadlock_detection_interval,
            move || {
                let Some(inner) = weak.upgrade() else {
                    return false;
                };
                TransactionCoordinator { inner }.poll_deadlock_detector();
                true
            },
        ));
    }

    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let pollers = std::mem::take(&mut *self.inner.pollers.lock().unwrap_or_else(PoisonError::into_inner));
        for poller in pollers {
            poller.stop().await;
        }
        if let Some(detector) = self.deadlock_detector() {
            detector.shutdown();
        }
        info!("{}transaction coordinator shut down", self.inner.log_prefix);
    }

    fn check_transaction_not_found(&self, id: TransactionId, status: TransactionStatus) -> Result<()> {
        if !matches!(status, TransactionStatus::Created | TransactionStatus::Promoted) {
            return Err(TxnError::expired(format!("Transaction {id} expired or aborted by a conflict")));
        }
        if self.inner.deleting.load(Ordering::SeqCst) {
            return Err(TxnError::aborted(format!("Transaction {id} rejected because status tablet is being deleted")));
        }
        Ok(())
    }

    /// External records are replayed from producer cluster and may arrive after local resolution.
    fn check_external_transaction(
        managed: &ManagedTransactions,
        id: &TransactionId,
        status: TransactionStatus,
    ) -> Result<Admission> {
        let ignore = match status {
            TransactionStatus::Created => managed.contains(id),
            TransactionStatus::Committed => match managed.get(id) {
                None => true,
                Some(txn) => !matches!(txn.status(), TransactionStatus::Created | TransactionStatus::Pending),
            },
            status => {
                return Err(TxnError::illegal_state(format!(
                    "unexpected status {status:?} of external transaction {id}"
                )))
            },
        };
        Ok(if ignore { Admission::Ignore } else { Admission::Handle })
    }

    fn admit(
        &self,
        managed: &mut ManagedTransactions,
        state: &TransactionStatePb,
    ) -> Result<(TransactionId, Admission)> {
        let id = state.id()?;
        let status = state.transaction_status()?;
        if state.is_external() {
            if let Admission::Ignore = Self::check_external_transaction(managed, &id, status)? {
                debug!("{}ignore external {:?} of transaction {}", self.inner.log_prefix, status, id);
                return Ok((id, Admission::Ignore));
            }
        }
        if !managed.contains(&id) {
            self.check_transaction_not_found(id, status)?;
            let now = self.inner.context.clock().now();
            managed.insert(TransactionState::new(id, self.tablet_id(), now));
            self.update_managed_count(managed);
        }
        Ok((id, Admission::Handle))
    }

    /// Routes status update request to its transaction.
    pub fn handle(&self, request: UpdateTxnRequest, leader_term: Option<i64>) {
        let mut actions = LeaderActions::new(leader_term);
        let rejected = {
            let mut managed = self.lock();
            match self.admit(&mut managed, &request.state) {
                Ok((id, Admission::Handle)) => {
                    let mut ctx = self.state_context(&mut actions, Instant::now());
                    managed.modify(&id, |txn| txn.handle(request, &mut ctx));
                    None
                },
                Ok((_, Admission::Ignore)) => Some((request, Ok(()))),
                Err(err) => Some((request, Err(err))),
            }
        };
        if let Some((request, result)) = rejected {
            request.complete(result);
        }
        self.execute(actions);
    }

    /// Handles status update and waits for its outcome.
    pub async fn update_transaction(&self, state: TransactionStatePb) -> Result<()> {
        let (request, receiver) = UpdateTxnRequest::new(state);
        self.handle(request, self.inner.context.leader_term());
        receiver.await.map_err(|_| TxnError::aborted("update transaction request dropped"))?
    }

    /// Handles rpc request from client or participant.
    pub async fn handle_update_transaction_request(&self, request: UpdateTransactionRequest) -> Result<()> {
        let clock = self.inner.context.clock();
        clock.update(HybridTime::from_u64(request.propagated_hybrid_time));
        let Some(mut state) = request.state else {
            return Err(TxnError::InvalidArgument("update transaction request without state".to_string()));
        };
        if request.is_external && state.external_hybrid_time.is_none() {
            state.external_hybrid_time = Some(state.commit_hybrid_time);
        }
        self.update_transaction(state).await
    }

    /// Applies replicated record.
    pub fn process_replicated(&self, data: ReplicatedData) -> Result<()> {
        let id = data.state.id()?;
        let status = data.state.transaction_status()?;
        let mut actions = LeaderActions::new(data.leader_term);
        let result = {
            let mut managed = self.lock();
            if !managed.contains(&id) {
                if status.is_terminal() {
                    debug!("{}transaction {} already completed, skip {:?}", self.inner.log_prefix, id, status);
                    return Ok(());
                }
                managed.insert(TransactionState::new(id, self.tablet_id(), data.hybrid_time));
            }
            let result = managed
                .modify(&id, |txn| txn.process_replicated(&data, &mut self.state_context(&mut actions, Instant::now())))
                .unwrap_or(Ok(()));
            self.check_completed(&mut managed, &id, &mut actions);
            self.update_managed_count(&managed);
            result
        };
        if let Err(err) = &result {
            warn!("{}fail to process replicated {:?} of {}: {}", self.inner.log_prefix, status, id, err);
        } else if status == TransactionStatus::Committed {
            self.inner.metrics.committed();
        }
        self.execute(actions);
        result
    }

    /// Releases requests of failed replication.
    pub fn process_aborted(&self, data: AbortedData) {
        let id = match data.state.id() {
            Ok(id) => id,
            Err(err) => {
                warn!("{}process aborted of invalid record: {}", self.inner.log_prefix, err);
                return;
            },
        };
        let mut actions = LeaderActions::new(self.inner.context.leader_term());
        {
            let mut managed = self.lock();
            let mut ctx = self.state_context(&mut actions, Instant::now());
            if managed.modify(&id, |txn| txn.process_aborted(&data, &mut ctx)).is_none() {
                warn!("{}process aborted of unknown transaction {}", self.inner.log_prefix, id);
            }
        }
        self.execute(actions);
    }

    fn check_completed(&self, managed: &mut ManagedTransactions, id: &TransactionId, actions: &mut LeaderActions) {
        if !managed.get(id).is_some_and(|txn| txn.completed()) {
            return;
        }
        let Some(mut txn) = managed.remove(id) else {
            return;
        };
        txn.clear_requests(
            TxnError::expired(format!("Transaction completed: {id}")),
            &mut self.state_context(actions, Instant::now()),
        );
        match txn.status() {
            TransactionStatus::Aborted => self.inner.metrics.aborted(),
            _ => self.inner.metrics.applied(),
        }
        debug!("{}transaction {} completed with {:?}", self.inner.log_prefix, id, txn.status());
    }

    fn lookup_status(&self, id: TransactionId) -> Result<StatusLookup> {
        let managed = self.lock();
        let Some(txn) = managed.get(&id) else {
            let coordinator_safe_time = self.inner.context.leader_safe_time()?;
            return Ok(StatusLookup {
                result: TransactionStatusResult::aborted(),
                expected: Vec::new(),
                coordinator_safe_time,
                aborted: AbortedSubTransactionSet::default(),
            });
        };
        let mut expected = Vec::new();
        let now = self.inner.context.clock().now();
        let result = txn.get_status(Some(&mut expected), now, self.inner.context.ht_lease_expiration())?;
        let aborted = txn.aborted_set().clone();
        Ok(StatusLookup { result, expected, coordinator_safe_time: HybridTime::MIN, aborted })
    }

    /// Answers status of transactions, resolving sealed ones with participants.
    pub async fn get_status(
        &self,
        request: &GetTransactionStatusRequest,
        deadline: tokio::time::Instant,
    ) -> Result<GetTransactionStatusResponse> {
        let clock = self.inner.context.clock();
        clock.update(HybridTime::from_u64(request.propagated_hybrid_time));
        self.inner.metrics.status_request();
        let mut response = GetTransactionStatusResponse::default();
        for raw_id in request.transaction_ids.iter() {
            let id = TransactionId::from_slice(raw_id)?;
            let StatusLookup { mut result, expected, coordinator_safe_time, aborted } = self.lookup_status(id)?;
            if result.status == TransactionStatus::Sealed {
                result = self.resolve_sealed_status(id, result.status_time, expected, deadline).await;
            }
            trace!("{}status of {}: {:?}", self.inner.log_prefix, id, result);
            let aborted = match result.status {
                TransactionStatus::Committed | TransactionStatus::Pending => aborted,
                _ => AbortedSubTransactionSet::default(),
            };
            response.status.push(result.status.into());
            response.status_hybrid_time.push(result.status_time.to_u64());
            response.coordinator_safe_time.push(coordinator_safe_time.to_u64());
            response.aborted_subtxn_set.push(aborted);
        }
        response.propagated_hybrid_time = clock.now().to_u64();
        Ok(response)
    }

    async fn resolve_sealed_status(
        &self,
        id: TransactionId,
        commit_time: HybridTime,
        expected: Vec<ExpectedTabletBatches>,
        deadline: tokio::time::Instant,
    ) -> TransactionStatusResult {
        let rpc = self.inner.context.rpc();
        let clock = self.inner.context.clock().clone();
        let requests = expected.iter().map(|batches| {
            let request = GetTransactionStatusAtParticipantRequest {
                tablet_id: batches.tablet.clone(),
                transaction_id: id.to_vec(),
                propagated_hybrid_time: clock.now().to_u64(),
                required_num_replicated_batches: Some(batches.batches),
            };
            let rpc = rpc.clone();
            async move {
                match tokio::time::timeout_at(deadline, rpc.get_transaction_status_at_participant(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(TxnError::TimedOut("get transaction status at participant".to_string())),
                }
            }
        });
        let responses = futures::future::join_all(requests).await;
        let mut actions = LeaderActions::new(self.inner.context.leader_term());
        let result = self.apply_sealed_resolution(id, commit_time, &expected, responses, &mut actions);
        self.execute(actions);
        result
    }

    fn apply_sealed_resolution(
        &self,
        id: TransactionId,
        commit_time: HybridTime,
        expected: &[ExpectedTabletBatches],
        responses: Vec<Result<GetTransactionStatusAtParticipantResponse>>,
        actions: &mut LeaderActions,
    ) -> TransactionStatusResult {
        let pending = TransactionStatusResult::new(TransactionStatus::Pending, commit_time.decremented());
        let clock = self.inner.context.clock();
        let mut managed = self.lock();
        let resolved = managed.modify(&id, |txn| {
            let mut ctx = self.state_context(actions, Instant::now());
            for (batches, response) in expected.iter().zip(responses) {
                match response {
                    Ok(response) => {
                        clock.update(HybridTime::from_u64(response.propagated_hybrid_time));
                        if response.aborted {
                            txn.mark_aborted(&mut ctx);
                            break;
                        }
                        if response.num_replicated_batches == batches.batches {
                            txn.replicated_all_batches_at(&batches.tablet, response.status_time(), &mut ctx);
                        }
                    },
                    Err(err) => {
                        warn!(
                            "{}fail to get status of {} at participant {}: {}",
                            self.inner.log_prefix, id, batches.tablet, err
                        );
                    },
                }
            }
            txn.get_status(None, clock.now(), self.inner.context.ht_lease_expiration())
        });
        self.check_completed(&mut managed, &id, actions);
        self.update_managed_count(&managed);
        match resolved {
            None => {
                debug!("{}transaction {} vanished during sealed resolution", self.inner.log_prefix, id);
                pending
            },
            Some(Ok(result)) if result.status != TransactionStatus::Sealed => result,
            Some(Ok(_)) => pending,
            Some(Err(err)) => {
                warn!("{}fail to get status of sealed transaction {}: {}", self.inner.log_prefix, id, err);
                pending
            },
        }
    }

    /// Aborts transaction, `callback` receives final or current outcome.
    pub fn abort(&self, id: TransactionId, leader_term: Option<i64>, callback: AbortCallback) {
        if leader_term.is_none() {
            callback.send(Err(TxnError::illegal_state("abort transaction on non leader"))).ignore();
            return;
        }
        let mut actions = LeaderActions::new(leader_term);
        {
            let mut managed = self.lock();
            if managed.contains(&id) {
                managed.modify(&id, |txn| {
                    txn.abort_with_callback(callback, &mut self.state_context(&mut actions, Instant::now()))
                });
            } else {
                actions.complete_abort(callback, Ok(TransactionStatusResult::aborted()));
            }
        }
        self.execute(actions);
    }

    pub async fn abort_transaction(&self, request: AbortTransactionRequest) -> Result<AbortTransactionResponse> {
        let clock = self.inner.context.clock();
        clock.update(HybridTime::from_u64(request.propagated_hybrid_time));
        let id = TransactionId::from_slice(&request.transaction_id)?;
        let (sender, receiver) = oneshot::channel();
        self.abort(id, self.inner.context.leader_term(), sender);
        let result = receiver.await.map_err(|_| TxnError::aborted("abort transaction dropped"))??;
        Ok(AbortTransactionResponse {
            status: result.status.into(),
            status_hybrid_time: result.status_time.to_u64(),
            propagated_hybrid_time: clock.now().to_u64(),
        })
    }

    /// Minimum raft index that must be retained, [i64::MAX] if no transaction needs any.
    pub fn prepare_gc(&self, details: Option<&mut String>) -> i64 {
        let managed = self.lock();
        let index = managed.min_first_entry_raft_index();
        if let Some(details) = details {
            if let Some(txn) = managed.oldest_by_raft_index() {
                writeln!(details, "Transaction coordinator: {txn}").ignore();
            }
        }
        index
    }

    /// Stops accepting new transactions and waits for tracked ones to drain.
    pub async fn prepare_for_deletion(&self, deadline: tokio::time::Instant) -> Result<()> {
        self.inner.deleting.store(true, Ordering::SeqCst);
        let mut receiver = self.inner.managed_count.subscribe();
        let drained = tokio::time::timeout_at(deadline, receiver.wait_for(|count| *count == 0))
            .await
            .map(|result| result.is_ok());
        match drained {
            Ok(true) => Ok(()),
            Ok(false) => Err(TxnError::aborted("transaction coordinator dropped")),
            Err(_) => Err(TxnError::TimedOut(format!(
                "{}{} transactions still running",
                self.inner.log_prefix,
                self.count_transactions()
            ))),
        }
    }

    pub fn poll(&self) {
        self.poll_at(self.inner.context.clock().now(), Instant::now())
    }

    /// Expiration sweep followed by per transaction poll.
    pub fn poll_at(&self, now: HybridTime, instant: Instant) {
        let leader_term = self.inner.context.leader_term();
        let mut actions = LeaderActions::new(leader_term);
        {
            let mut managed = self.lock();
            let config = &self.inner.config;
            for id in managed.touched_before(now, config.transaction_timeout()) {
                let Some(txn) = managed.get(&id) else {
                    continue;
                };
                if !txn.expired_at(now, config) {
                    continue;
                }
                if txn.status() == TransactionStatus::Aborted {
                    self.check_completed(&mut managed, &id, &mut actions);
                } else if leader_term.is_some() {
                    self.inner.metrics.expired();
                    info!("{}transaction {} expired, aborting", self.inner.log_prefix, id);
                    managed.modify(&id, |txn| txn.abort(&mut self.state_context(&mut actions, instant)));
                }
            }
            for id in managed.ids() {
                managed.modify(&id, |txn| txn.poll(&mut self.state_context(&mut actions, instant)));
            }
            self.update_managed_count(&managed);
        }
        self.execute(actions);
    }

    pub fn poll_deadlock_detector(&self) {
        if self.inner.context.leader_term().is_none() {
            return;
        }
        if let Some(detector) = self.deadlock_detector() {
            detector.trigger_probes();
        }
    }

    pub async fn process_wait_for_report(&self, request: WaitForReportRequest) -> Result<WaitForReportResponse> {
        match self.deadlock_detector() {
            None => Ok(WaitForReportResponse::default()),
            Some(detector) => detector.process_wait_for_report(request).await,
        }
    }

    pub async fn process_probe(&self, request: ProbeRequest) -> Result<ProbeResponse> {
        match self.deadlock_detector() {
            None => Ok(ProbeResponse::default()),
            Some(detector) => detector.process_probe(request).await,
        }
    }

    pub fn count_transactions(&self) -> usize {
        self.lock().len()
    }

    pub fn dump_transactions(&self) -> String {
        let managed = self.lock();
        let mut dump = String::new();
        for txn in managed.iter() {
            writeln!(dump, "{txn}").ignore();
        }
        dump
    }

    pub fn report(&self) -> CoordinatorReport {
        let managed = self.lock();
        CoordinatorReport {
            tablet_id: self.tablet_id().to_string(),
            managed_transactions: managed.len(),
            min_first_entry_raft_index: managed.min_first_entry_raft_index(),
            metrics: self.inner.metrics.snapshot(),
        }
    }

    fn execute(&self, mut actions: LeaderActions) {
        let leader_term = actions.leader_term;
        for action in actions.take() {
            match action {
                LeaderAction::Complete(request, result) => request.complete(result),
                LeaderAction::CompleteAbort(callback, result) => callback.send(result).ignore(),
                LeaderAction::NotifyApplying(data) => {
                    if leader_term.is_some() {
                        self.spawn(self.clone().notify_applying(data));
                    }
                },
                LeaderAction::NotifyCleanup(data) => {
                    if leader_term.is_some() {
                        self.spawn(self.clone().notify_cleanup(data));
                    }
                },
                LeaderAction::Submit(operation) => {
                    if let Some(term) = leader_term {
                        self.submit(operation, term);
                    }
                },
            }
        }
    }

    fn spawn(&self, task: BoxFuture<'static, ()>) {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return;
        }
        self.inner.runtime.spawn(task);
    }

    fn submit(&self, operation: UpdateTxnOperation, leader_term: i64) {
        let state = operation.state.clone();
        let handle = operation.handle;
        if let Err(err) = self.inner.context.submit_update_transaction(operation, leader_term) {
            warn!("{}fail to submit {:?}: {}", self.inner.log_prefix, state.status(), err);
            self.process_aborted(AbortedData { state, op_id: None, handle: Some(handle), error: err });
        }
    }

    fn participant_deadline(&self, is_external: bool) -> tokio::time::Instant {
        let timeout = match is_external {
            true => self.inner.config.external_rpc_timeout,
            false => self.inner.config.rpc_timeout,
        };
        tokio::time::Instant::now() + timeout
    }

    fn notify_applying(self, data: NotifyApplyingData) -> BoxFuture<'static, ()> {
        let span = debug_span!("notify_applying", tablet = %data.tablet, txn.id = %data.transaction);
        async move {
            let clock = self.inner.context.clock();
            let mut state = TransactionStatePb::new(data.transaction, TransactionStatus::Applying)
                .with_tablets([self.tablet_id().to_string()]);
            state.commit_hybrid_time = data.commit_time.to_u64();
            state.sealed = data.sealed;
            state.aborted = Some(data.aborted.clone());
            if data.is_external {
                state.external_hybrid_time = Some(data.commit_time.to_u64());
            }
            let request = UpdateTransactionRequest {
                tablet_id: data.tablet.clone(),
                state: Some(state),
                propagated_hybrid_time: clock.now().to_u64(),
                is_external: data.is_external,
            };
            let deadline = self.participant_deadline(data.is_external);
            let rpc = self.inner.context.rpc();
            self.inner.metrics.notify_applying();
            let result = match tokio::time::timeout_at(deadline, rpc.update_transaction(request)).await {
                Ok(result) => result,
                Err(_) => Err(TxnError::TimedOut("update transaction".to_string())),
            };
            match result {
                Ok(response) => clock.update(HybridTime::from_u64(response.propagated_hybrid_time)),
                Err(TxnError::TryAgain(_)) if data.is_external => {},
                Err(err) if err.is_not_found() => self.handle_tablet_not_found(&data, err.split_child_tablet_ids()),
                Err(err) => {
                    let prefix = &self.inner.log_prefix;
                    warn!("{}fail to send apply of {} to {}: {}", prefix, data.transaction, data.tablet, err)
                },
            }
        }
        .instrument(span)
        .boxed()
    }

    fn handle_tablet_not_found(&self, data: &NotifyApplyingData, children: &[TabletId]) {
        let mut actions = LeaderActions::new(self.inner.context.leader_term());
        {
            let mut managed = self.lock();
            let mut ctx = self.state_context(&mut actions, Instant::now());
            if children.is_empty() {
                info!("{}tablet {} not found, treat it as applied", self.inner.log_prefix, data.tablet);
                if let Some(Err(err)) = managed.modify(&data.transaction, |txn| {
                    txn.applied_in_one_of_involved_tablets(&data.tablet, &mut ctx)
                }) {
                    let prefix = &self.inner.log_prefix;
                    warn!("{}fail to mark {} applied in {}: {}", prefix, data.transaction, data.tablet, err);
                }
            } else {
                info!("{}tablet {} split into {:?}", self.inner.log_prefix, data.tablet, children);
                match managed.modify(&data.transaction, |txn| txn.add_involved_tablets(&data.tablet, children)) {
                    Some(Ok(true)) => {
                        for child in children {
                            ctx.actions.notify_applying(NotifyApplyingData { tablet: child.clone(), ..data.clone() });
                        }
                    },
                    Some(Err(err)) => {
                        warn!("{}fail to add split tablets of {}: {}", self.inner.log_prefix, data.tablet, err)
                    },
                    Some(Ok(false)) | None => {},
                }
            }
        }
        self.execute(actions);
    }

    fn notify_cleanup(self, data: NotifyCleanupData) -> BoxFuture<'static, ()> {
        let span = debug_span!("notify_cleanup", tablet = %data.tablet, txn.id = %data.transaction);
        async move {
            let clock = self.inner.context.clock();
            let state = TransactionStatePb::new(data.transaction, TransactionStatus::ImmediateCleanup)
                .with_tablets([self.tablet_id().to_string()]);
            let request = UpdateTransactionRequest {
                tablet_id: data.tablet.clone(),
                state: Some(state),
                propagated_hybrid_time: clock.now().to_u64(),
                is_external: false,
            };
            let deadline = self.participant_deadline(false);
            let rpc = self.inner.context.rpc();
            let prefix = &self.inner.log_prefix;
            match tokio::time::timeout_at(deadline, rpc.update_transaction(request)).await {
                Ok(Ok(response)) => clock.update(HybridTime::from_u64(response.propagated_hybrid_time)),
                Ok(Err(err)) => debug!("{}fail to clean up {} in {}: {}", prefix, data.transaction, data.tablet, err),
                Err(_) => debug!("{}timed out cleaning up {} in {}", prefix, data.transaction, data.tablet),
            }
        }
        .instrument(span)
        .boxed()
    }
}

impl TransactionAbortController for TransactionCoordinator {
    fn abort(&self, id: TransactionId, leader_term: Option<i64>, callback: AbortCallback) {
        TransactionCoordinator::abort(self, id, leader_term, callback)
    }

    fn remove_inactive_transactions(&self, waiters: &mut Vec<TransactionId>) {
        let managed = self.lock();
        waiters.retain(|id| managed.get(id).is_some_and(|txn| !txn.completed()));
    }
}
