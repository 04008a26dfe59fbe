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

use async_trait::async_trait;

use super::actions::AbortCallback;
use crate::error::Result;
use crate::protos::{ProbeRequest, ProbeResponse, TransactionId, WaitForReportRequest, WaitForReportResponse};

/// What deadlock detector could do to transactions of its coordinator.
pub trait TransactionAbortController: Send + Sync {
    fn abort(&self, id: TransactionId, leader_term: Option<i64>, callback: AbortCallback);

    /// Retains only transactions that are still tracked and not completed.
    fn remove_inactive_transactions(&self, waiters: &mut Vec<TransactionId>);
}

/// Deadlock detection subsystem living beside the coordinator.
#[async_trait]
pub trait DeadlockDetector: Send + Sync + 'static {
    async fn process_wait_for_report(&self, request: WaitForReportRequest) -> Result<WaitForReportResponse>;

    async fn process_probe(&self, request: ProbeRequest) -> Result<ProbeResponse>;

    fn trigger_probes(&self);

    fn shutdown(&self) {}
}
