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

use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use hashbrown::HashMap;
use ignore_result::Ignore;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::coordinator::TransactionRpc;
use crate::error::{Result, TxnError};
use crate::protos::{
    GetTransactionStatusAtParticipantRequest,
    GetTransactionStatusAtParticipantResponse,
    TransactionStatePb,
    TransactionStatus,
    UpdateTransactionRequest,
    UpdateTransactionResponse,
};
use crate::tablet::Tablet;
use crate::types::TabletId;

#[derive(Default)]
struct Routes {
    tablets: HashMap<TabletId, Arc<Tablet>>,
    splits: HashMap<TabletId, Vec<TabletId>>,
}

/// Routes coordinator requests to in process participant tablets.
///
/// Successful applies are reported back to status tablet as
/// [TransactionStatus::AppliedInOneOfInvolvedTablets] through `reports`.
pub struct LocalRpc {
    routes: RwLock<Routes>,
    reports: mpsc::UnboundedSender<TransactionStatePb>,
}

impl LocalRpc {
    pub fn new(reports: mpsc::UnboundedSender<TransactionStatePb>) -> Self {
        Self { routes: RwLock::new(Routes::default()), reports }
    }

    pub fn add_tablet(&self, tablet: Arc<Tablet>) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        routes.tablets.insert(tablet.tablet_id().to_string(), tablet);
    }

    pub fn tablet(&self, tablet_id: &str) -> Result<Arc<Tablet>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(tablet) = routes.tablets.get(tablet_id) {
            return Ok(tablet.clone());
        }
        match routes.splits.get(tablet_id) {
            Some(children) => Err(TxnError::tablet_split(tablet_id, children.clone())),
            None => Err(TxnError::not_found(format!("tablet {tablet_id}"))),
        }
    }

    pub fn tablets(&self) -> Vec<Arc<Tablet>> {
        let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
        routes.tablets.values().cloned().collect()
    }

    /// Splits tablet into `children`. Children serve data of the split tablet.
    pub fn split_tablet(&self, tablet_id: &str, children: &[&str]) -> Result<()> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let Some(tablet) = routes.tablets.remove(tablet_id) else {
            return Err(TxnError::not_found(format!("tablet {tablet_id}")));
        };
        for child in children {
            routes.tablets.insert(child.to_string(), tablet.clone());
        }
        routes.splits.insert(tablet_id.to_string(), children.iter().map(|child| child.to_string()).collect());
        info!("split tablet {} into {:?}", tablet_id, children);
        Ok(())
    }

    pub fn delete_tablet(&self, tablet_id: &str) -> Option<Arc<Tablet>> {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        let tablet = routes.tablets.remove(tablet_id);
        if tablet.is_some() {
            info!("deleted tablet {}", tablet_id);
        }
        tablet
    }
}

#[async_trait]
impl TransactionRpc for LocalRpc {
    async fn update_transaction(&self, request: UpdateTransactionRequest) -> Result<UpdateTransactionResponse> {
        let tablet = self.tablet(&request.tablet_id)?;
        let applying = match request.state.as_ref() {
            Some(state) if state.status() == TransactionStatus::Applying => Some(state.id()?),
            _ => None,
        };
        let tablet_id = request.tablet_id.clone();
        let response = tablet.handle_update_transaction(request)?;
        if let Some(id) = applying {
            debug!("report {} applied in {}", id, tablet_id);
            let state =
                TransactionStatePb::new(id, TransactionStatus::AppliedInOneOfInvolvedTablets).with_tablets([tablet_id]);
            self.reports.send(state).ignore();
        }
        Ok(response)
    }

    async fn get_transaction_status_at_participant(
        &self,
        request: GetTransactionStatusAtParticipantRequest,
    ) -> Result<GetTransactionStatusAtParticipantResponse> {
        let tablet = self.tablet(&request.tablet_id)?;
        tablet.get_transaction_status_at_participant(&request)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::clock::Clock;
    use crate::config::TransactionConfig;
    use crate::protos::TransactionId;
    use crate::tablet::KeyBounds;

    fn rpc(tablets: &[&str]) -> (LocalRpc, mpsc::UnboundedReceiver<TransactionStatePb>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let rpc = LocalRpc::new(sender);
        for id in tablets {
            let tablet = Tablet::new(*id, TransactionConfig::default(), Clock::new(), KeyBounds::default());
            rpc.add_tablet(Arc::new(tablet));
        }
        (rpc, receiver)
    }

    #[test]
    fn test_routes() {
        let (rpc, _receiver) = rpc(&["a", "b"]);
        assert_that!(rpc.tablet("a").unwrap().tablet_id()).is_equal_to("a");
        assert_that!(rpc.tablets().len()).is_equal_to(2);

        rpc.split_tablet("a", &["a1", "a2"]).unwrap();
        let err = rpc.tablet("a").unwrap_err();
        assert_that!(err.is_not_found()).is_true();
        assert_that!(err.split_child_tablet_ids().to_vec()).is_equal_to(vec!["a1".to_string(), "a2".to_string()]);
        assert_that!(Arc::ptr_eq(&rpc.tablet("a1").unwrap(), &rpc.tablet("a2").unwrap())).is_true();

        assert_that!(rpc.delete_tablet("b").is_some()).is_true();
        let err = rpc.tablet("b").unwrap_err();
        assert_that!(err.is_not_found()).is_true();
        assert_that!(err.split_child_tablet_ids().is_empty()).is_true();
        assert_that!(rpc.split_tablet("b", &["b1"]).is_err()).is_true();
    }

    #[tokio::test]
    async fn test_applying_reported() {
        let (rpc, mut receiver) = rpc(&["a"]);
        let id = TransactionId::new_random();
        let mut state = TransactionStatePb::new(id, TransactionStatus::Applying).with_tablets(["status"]);
        state.commit_hybrid_time = Clock::new().now().to_u64();
        let request = UpdateTransactionRequest { tablet_id: "a".to_string(), state: Some(state), ..Default::default() };
        rpc.update_transaction(request).await.unwrap();

        let report = receiver.try_recv().unwrap();
        assert_that!(report.id().unwrap()).is_equal_to(id);
        assert_that!(report.status()).is_equal_to(TransactionStatus::AppliedInOneOfInvolvedTablets);
        assert_that!(report.tablets.clone()).is_equal_to(vec!["a".to_string()]);

        let state = TransactionStatePb::new(id, TransactionStatus::ImmediateCleanup);
        let request = UpdateTransactionRequest { tablet_id: "a".to_string(), state: Some(state), ..Default::default() };
        rpc.update_transaction(request).await.unwrap();
        assert_that!(receiver.try_recv().is_err()).is_true();
    }
}
