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

use std::sync::Arc;

use async_trait::async_trait;

use super::actions::{OperationHandle, UpdateTxnOperation};
use crate::clock::{Clock, HybridTime};
use crate::error::{Result, TxnError};
use crate::protos::{
    GetTransactionStatusAtParticipantRequest,
    GetTransactionStatusAtParticipantResponse,
    TransactionStatePb,
    UpdateTransactionRequest,
    UpdateTransactionResponse,
};
use crate::types::OpId;

/// Record durably replicated by status tablet log.
#[derive(Clone, Debug)]
pub struct ReplicatedData {
    /// Leader term of this node at the time of apply, [None] on followers.
    pub leader_term: Option<i64>,
    pub state: TransactionStatePb,
    pub op_id: OpId,
    pub hybrid_time: HybridTime,
    /// Present on the node that submitted this record.
    pub handle: Option<OperationHandle>,
}

/// Submission that failed to replicate.
#[derive(Clone, Debug)]
pub struct AbortedData {
    pub state: TransactionStatePb,
    pub op_id: Option<OpId>,
    pub handle: Option<OperationHandle>,
    /// Failure reported to the request waiting on this submission.
    pub error: TxnError,
}

/// Capabilities status tablet provides to its coordinator.
pub trait CoordinatorContext: Send + Sync + 'static {
    fn tablet_id(&self) -> &str;

    fn clock(&self) -> &Clock;

    /// Current leader term or [None] if this node is not leader.
    fn leader_term(&self) -> Option<i64>;

    fn leader_safe_time(&self) -> Result<HybridTime>;

    fn ht_lease_expiration(&self) -> HybridTime;

    /// Submits operation for replication, result reports back through
    /// [super::TransactionCoordinator::process_replicated] or
    /// [super::TransactionCoordinator::process_aborted].
    fn submit_update_transaction(&self, operation: UpdateTxnOperation, leader_term: i64) -> Result<()>;

    fn rpc(&self) -> Arc<dyn TransactionRpc>;
}

/// Requests coordinator sends to participant tablets.
#[async_trait]
pub trait TransactionRpc: Send + Sync + 'static {
    async fn update_transaction(&self, request: UpdateTransactionRequest) -> Result<UpdateTransactionResponse>;

    async fn get_transaction_status_at_participant(
        &self,
        request: GetTransactionStatusAtParticipantRequest,
    ) -> Result<GetTransactionStatusAtParticipantResponse>;
}
