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

//! In process status tablet with participant tablets, wired the way a tablet server wires them.

mod log;
mod rpc;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub use self::log::{LocalLog, Replicator};
pub use self::rpc::LocalRpc;
use crate::clock::{Clock, HybridTime};
use crate::config::TransactionConfig;
use crate::coordinator::{
    CoordinatorContext,
    TransactionCoordinator,
    TransactionRpc,
    TransactionStatusResult,
    UpdateTxnOperation,
};
use crate::error::{Result, TxnError};
use crate::protos::{
    AbortTransactionRequest,
    GetTransactionStatusRequest,
    TransactionId,
    TransactionMetadataPb,
    TransactionStatePb,
    TransactionStatus,
};
use crate::tablet::{KeyBounds, KeyWrite, Tablet};
use crate::types::TabletId;
use crate::utils::TaskHandle;

pub const STATUS_TABLET_ID: &str = "status";

const LEADER_LEASE: Duration = Duration::from_secs(2);

/// Status tablet side capabilities backed by [LocalLog] and [LocalRpc].
pub struct LocalCoordinatorContext {
    tablet_id: TabletId,
    clock: Clock,
    log: Arc<LocalLog>,
    rpc: Arc<LocalRpc>,
}

impl CoordinatorContext for LocalCoordinatorContext {
    fn tablet_id(&self) -> &str {
        &self.tablet_id
    }

    fn clock(&self) -> &Clock {
        &self.clock
    }

    fn leader_term(&self) -> Option<i64> {
        self.log.leader_term()
    }

    fn leader_safe_time(&self) -> Result<HybridTime> {
        match self.log.leader_term() {
            Some(_) => Ok(self.clock.now()),
            None => Err(TxnError::illegal_state(format!("{} is not leader", self.tablet_id))),
        }
    }

    fn ht_lease_expiration(&self) -> HybridTime {
        self.clock.now() + LEADER_LEASE
    }

    fn submit_update_transaction(&self, operation: UpdateTxnOperation, leader_term: i64) -> Result<()> {
        self.log.submit(operation, leader_term)
    }

    fn rpc(&self) -> Arc<dyn TransactionRpc> {
        self.rpc.clone()
    }
}

async fn report_applied(mut reports: mpsc::UnboundedReceiver<TransactionStatePb>, coordinator: TransactionCoordinator) {
    while let Some(state) = reports.recv().await {
        if let Err(err) = coordinator.update_transaction(state).await {
            debug!("fail to report applied transaction: {}", err);
        }
    }
}

/// Status tablet, its coordinator and participant tablets of one process.
pub struct LocalCluster {
    clock: Clock,
    log: Arc<LocalLog>,
    rpc: Arc<LocalRpc>,
    coordinator: TransactionCoordinator,
    _replicator: TaskHandle<()>,
    _reporter: TaskHandle<()>,
}

impl LocalCluster {
    /// Starts cluster with given participant tablets. Must be called inside tokio runtime.
    pub fn start(config: TransactionConfig, clock: Clock, participants: &[&str]) -> Self {
        let (sender, reports) = mpsc::unbounded_channel();
        let rpc = Arc::new(LocalRpc::new(sender));
        for tablet_id in participants {
            let tablet = Tablet::new(*tablet_id, config.clone(), clock.clone(), KeyBounds::default());
            rpc.add_tablet(Arc::new(tablet));
        }
        let (log, replicator) = LocalLog::new(STATUS_TABLET_ID, clock.clone());
        let context = LocalCoordinatorContext {
            tablet_id: STATUS_TABLET_ID.to_string(),
            clock: clock.clone(),
            log: log.clone(),
            rpc: rpc.clone(),
        };
        let coordinator = TransactionCoordinator::new(Arc::new(context), config);
        let replicator = replicator.start(coordinator.clone());
        let reporter = TaskHandle::new(tokio::spawn(report_applied(reports, coordinator.clone())));
        coordinator.start();
        info!("started local cluster with participants {:?}", participants);
        Self { clock, log, rpc, coordinator, _replicator: replicator, _reporter: reporter }
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn coordinator(&self) -> &TransactionCoordinator {
        &self.coordinator
    }

    pub fn log(&self) -> &Arc<LocalLog> {
        &self.log
    }

    pub fn rpc(&self) -> &Arc<LocalRpc> {
        &self.rpc
    }

    pub fn tablet(&self, tablet_id: &str) -> Result<Arc<Tablet>> {
        self.rpc.tablet(tablet_id)
    }

    pub async fn begin(&self) -> Result<TransactionId> {
        let id = TransactionId::new_random();
        self.coordinator.update_transaction(TransactionStatePb::new(id, TransactionStatus::Created)).await?;
        Ok(id)
    }

    pub async fn heartbeat(&self, id: TransactionId) -> Result<()> {
        self.coordinator.update_transaction(TransactionStatePb::new(id, TransactionStatus::Pending)).await
    }

    /// Writes intents of transaction to participant tablet.
    pub fn write(&self, id: TransactionId, tablet_id: &str, writes: Vec<KeyWrite>) -> Result<()> {
        let tablet = self.rpc.tablet(tablet_id)?;
        let metadata = TransactionMetadataPb {
            transaction_id: id.to_vec(),
            status_tablet: STATUS_TABLET_ID.to_string(),
            start_hybrid_time: self.clock.now().to_u64(),
        };
        tablet.write_intents(id, Some(metadata), 0, writes)
    }

    pub async fn commit(&self, id: TransactionId, tablets: &[&str]) -> Result<()> {
        let state = TransactionStatePb::new(id, TransactionStatus::Committed).with_tablets(tablets.iter().copied());
        self.coordinator.update_transaction(state).await
    }

    pub async fn status(&self, id: TransactionId) -> Result<TransactionStatusResult> {
        let request = GetTransactionStatusRequest {
            tablet_id: STATUS_TABLET_ID.to_string(),
            transaction_ids: vec![id.to_vec()],
            propagated_hybrid_time: self.clock.now().to_u64(),
        };
        let deadline = tokio::time::Instant::now() + self.coordinator.config().rpc_timeout;
        let response = self.coordinator.get_status(&request, deadline).await?;
        let (Some(status), Some(time)) = (response.status.first(), response.status_hybrid_time.first()) else {
            return Err(TxnError::illegal_state(format!("no status of transaction {id}")));
        };
        let status = TransactionStatus::try_from(*status)
            .map_err(|_| TxnError::Corruption(format!("unknown transaction status {status}")))?;
        Ok(TransactionStatusResult::new(status, HybridTime::from_u64(*time)))
    }

    pub async fn abort(&self, id: TransactionId) -> Result<TransactionStatusResult> {
        let request = AbortTransactionRequest {
            tablet_id: STATUS_TABLET_ID.to_string(),
            transaction_id: id.to_vec(),
            propagated_hybrid_time: self.clock.now().to_u64(),
        };
        let response = self.coordinator.abort_transaction(request).await?;
        Ok(TransactionStatusResult::new(response.status(), HybridTime::from_u64(response.status_hybrid_time)))
    }

    /// Drops log entries no transaction needs any more.
    pub fn gc_log(&self) -> usize {
        let mut details = String::new();
        let min_index = self.coordinator.prepare_gc(Some(&mut details));
        if !details.is_empty() {
            debug!("log gc retained by {}", details.trim_end());
        }
        self.log.gc(min_index)
    }

    pub async fn shutdown(self) {
        self.coordinator.shutdown().await;
        for tablet in self.rpc.tablets() {
            if let Err(err) = tablet.shutdown().await {
                warn!("fail to shut down tablet {}: {}", tablet.tablet_id(), err);
            }
        }
        info!("local cluster shut down");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assertor::*;

    use super::*;

    fn config() -> TransactionConfig {
        TransactionConfig {
            heartbeat_interval: Duration::from_millis(200),
            max_missed_heartbeat_periods: 2.0,
            check_interval: Duration::from_millis(20),
            resend_applying_interval: Duration::from_millis(100),
            rpc_timeout: Duration::from_secs(1),
            ..Default::default()
        }
    }

    fn put(key: &str, value: &str) -> KeyWrite {
        (key.as_bytes().to_vec(), Some(value.as_bytes().to_vec()))
    }

    async fn wait_transactions(cluster: &LocalCluster, count: usize) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while cluster.coordinator().count_transactions() != count {
            assert!(tokio::time::Instant::now() < deadline, "{}", cluster.coordinator().dump_transactions());
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_completed(cluster: &LocalCluster) {
        wait_transactions(cluster, 0).await;
    }

    fn read(cluster: &LocalCluster, tablet: &str, key: &str) -> Option<String> {
        let value = cluster.tablet(tablet).unwrap().read(key.as_bytes(), HybridTime::MAX).unwrap();
        value.map(|value| String::from_utf8(value).unwrap())
    }

    #[test_log::test(tokio::test)]
    #[tracing_test::traced_test]
    async fn test_commit() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a", "b"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();
        cluster.write(id, "b", vec![put("k2", "v2")]).unwrap();
        assert_that!(cluster.status(id).await.unwrap().status).is_equal_to(TransactionStatus::Pending);
        assert_that!(read(&cluster, "a", "k1")).is_equal_to(None);

        cluster.commit(id, &["a", "b"]).await.unwrap();
        wait_completed(&cluster).await;

        assert_that!(read(&cluster, "a", "k1")).is_equal_to(Some("v1".to_string()));
        assert_that!(read(&cluster, "b", "k2")).is_equal_to(Some("v2".to_string()));
        let metrics = cluster.coordinator().metrics();
        assert_that!(metrics.committed_transactions()).is_equal_to(1);
        assert_that!(metrics.applied_transactions()).is_equal_to(1);
        assert_that!(cluster.tablet("a").unwrap().participant().applied_at(&id).is_some()).is_true();
        assert!(logs_contain("started local cluster"));
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_expired_without_heartbeat() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();
        wait_completed(&cluster).await;

        assert_that!(cluster.coordinator().metrics().expired_transactions()).is_equal_to(1);
        assert_that!(cluster.status(id).await.unwrap().status).is_equal_to(TransactionStatus::Aborted);
        let err = cluster.commit(id, &["a"]).await.unwrap_err();
        assert_that!(matches!(err, TxnError::Expired(_))).is_true();
        assert_that!(read(&cluster, "a", "k1")).is_equal_to(None);
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_heartbeat_keeps_alive() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            cluster.heartbeat(id).await.unwrap();
        }
        assert_that!(cluster.coordinator().count_transactions()).is_equal_to(1);
        assert_that!(cluster.coordinator().metrics().expired_transactions()).is_equal_to(0);

        cluster.commit(id, &[]).await.unwrap();
        wait_completed(&cluster).await;
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_abort() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();

        let result = cluster.abort(id).await.unwrap();
        assert_that!(result.status).is_equal_to(TransactionStatus::Aborted);
        wait_completed(&cluster).await;
        assert_that!(cluster.coordinator().metrics().aborted_transactions()).is_equal_to(1);
        assert_that!(read(&cluster, "a", "k1")).is_equal_to(None);
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_split_participant() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1"), put("k2", "v2")]).unwrap();
        cluster.rpc().split_tablet("a", &["a1", "a2"]).unwrap();

        cluster.commit(id, &["a"]).await.unwrap();
        wait_completed(&cluster).await;

        assert_that!(read(&cluster, "a1", "k1")).is_equal_to(Some("v1".to_string()));
        assert_that!(read(&cluster, "a2", "k2")).is_equal_to(Some("v2".to_string()));
        assert_that!(cluster.coordinator().metrics().applied_transactions()).is_equal_to(1);
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_deleted_participant() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a", "b"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();
        cluster.write(id, "b", vec![put("k2", "v2")]).unwrap();
        cluster.rpc().delete_tablet("b").unwrap();

        cluster.commit(id, &["a", "b"]).await.unwrap();
        wait_completed(&cluster).await;
        assert_that!(read(&cluster, "a", "k1")).is_equal_to(Some("v1".to_string()));
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_sealed() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();
        cluster.write(id, "a", vec![put("k2", "v2")]).unwrap();

        let mut sealed = TransactionStatePb::new(id, TransactionStatus::Sealed).with_tablets(["a"]);
        sealed.tablet_batches = vec![2];
        cluster.coordinator().update_transaction(sealed).await.unwrap();

        let result = cluster.status(id).await.unwrap();
        assert_that!(result.status).is_equal_to(TransactionStatus::Committed);
        wait_completed(&cluster).await;
        assert_that!(read(&cluster, "a", "k2")).is_equal_to(Some("v2".to_string()));
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_sealed_before_participant_write() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        let id = cluster.begin().await.unwrap();
        let mut sealed = TransactionStatePb::new(id, TransactionStatus::Sealed).with_tablets(["a"]);
        sealed.tablet_batches = vec![1];
        cluster.coordinator().update_transaction(sealed).await.unwrap();

        let result = cluster.status(id).await.unwrap();
        assert_that!(result.status).is_equal_to(TransactionStatus::Pending);
        assert_that!(cluster.coordinator().count_transactions()).is_equal_to(1);

        cluster.write(id, "a", vec![put("k1", "v1")]).unwrap();
        let result = cluster.status(id).await.unwrap();
        assert_that!(result.status).is_equal_to(TransactionStatus::Committed);
        wait_completed(&cluster).await;
        assert_that!(read(&cluster, "a", "k1")).is_equal_to(Some("v1".to_string()));
        assert_that!(cluster.coordinator().metrics().aborted_transactions()).is_equal_to(0);
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_log_gc() {
        let config = TransactionConfig { heartbeat_interval: Duration::from_secs(5), ..config() };
        let cluster = LocalCluster::start(config, Clock::new(), &["a"]);
        let first = cluster.begin().await.unwrap();
        cluster.heartbeat(first).await.unwrap();
        let retained = cluster.log().last_index();
        let second = cluster.begin().await.unwrap();
        cluster.commit(second, &[]).await.unwrap();
        wait_transactions(&cluster, 1).await;

        assert_that!(cluster.gc_log()).is_equal_to((retained - 1) as usize);
        assert_that!(cluster.log().first_index()).is_equal_to(retained);

        cluster.commit(first, &[]).await.unwrap();
        wait_completed(&cluster).await;
        let last_index = cluster.log().last_index();
        assert_that!(cluster.gc_log()).is_equal_to((last_index - retained + 1) as usize);
        assert_that!(cluster.log().entries().unwrap().is_empty()).is_true();
        cluster.shutdown().await;
    }

    #[test_log::test(tokio::test)]
    async fn test_leader_change() {
        let cluster = LocalCluster::start(config(), Clock::new(), &["a"]);
        cluster.log().step_down();
        let err = cluster.begin().await.unwrap_err();
        assert_that!(matches!(err, TxnError::IllegalState(_))).is_true();
        assert_that!(cluster.status(TransactionId::new_random()).await.is_err()).is_true();

        cluster.log().become_leader();
        let id = cluster.begin().await.unwrap();
        assert_that!(cluster.status(id).await.unwrap().status).is_equal_to(TransactionStatus::Pending);
        cluster.shutdown().await;
    }
}
