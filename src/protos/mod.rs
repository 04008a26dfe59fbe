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

//! Wire and storage records.

#[rustfmt::skip]
#[path = "generated/tabletxn.rs"]
mod generated;
mod status;
mod uuid;

pub use self::generated::*;
pub use self::uuid::TransactionId;
use crate::clock::HybridTime;
use crate::error::{Result, TxnError};

impl AbortedSubTransactionSet {
    pub fn from_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let mut set: Vec<u32> = ids.into_iter().collect();
        set.sort_unstable();
        set.dedup();
        Self { set }
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn contains(&self, subtransaction_id: u32) -> bool {
        self.set.contains(&subtransaction_id)
    }
}

impl TransactionStatePb {
    pub fn new(id: TransactionId, status: TransactionStatus) -> Self {
        Self { transaction_id: id.to_vec(), status: status.into(), ..Default::default() }
    }

    pub fn with_tablets(mut self, tablets: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tablets = tablets.into_iter().map(|tablet| tablet.into()).collect();
        self
    }

    pub fn id(&self) -> Result<TransactionId> {
        TransactionId::from_slice(&self.transaction_id)
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::try_from(self.status)
            .map_err(|_| TxnError::InvalidArgument(format!("unknown transaction status {}", self.status)))
    }

    pub fn commit_time(&self) -> HybridTime {
        HybridTime::from_u64(self.commit_hybrid_time)
    }

    pub fn external_time(&self) -> Option<HybridTime> {
        self.external_hybrid_time.map(HybridTime::from_u64)
    }

    pub fn is_external(&self) -> bool {
        self.external_hybrid_time.is_some()
    }

    pub fn aborted_set(&self) -> AbortedSubTransactionSet {
        self.aborted.clone().unwrap_or_default()
    }
}

impl TransactionMetadataPb {
    pub fn id(&self) -> Result<TransactionId> {
        TransactionId::from_slice(&self.transaction_id)
    }

    pub fn start_time(&self) -> HybridTime {
        HybridTime::from_u64(self.start_hybrid_time)
    }
}

impl GetTransactionStatusAtParticipantResponse {
    pub fn status_time(&self) -> HybridTime {
        HybridTime::from_u64(self.status_hybrid_time)
    }
}

#[cfg(test)]
mod tests {
    use assertor::*;
    use prost::Message;

    use super::*;

    #[test]
    fn test_aborted_set() {
        let set = AbortedSubTransactionSet::from_ids([5, 1, 3, 1]);
        assert_that!(set.set.clone()).is_equal_to(vec![1, 3, 5]);
        assert_that!(set.contains(3)).is_equal_to(true);
        assert_that!(set.contains(2)).is_equal_to(false);
        assert_that!(AbortedSubTransactionSet::default().is_empty()).is_equal_to(true);
    }

    #[test]
    fn test_state_record() {
        let id = TransactionId::new_random();
        let mut state = TransactionStatePb::new(id, TransactionStatus::Committed).with_tablets(["t1", "t2"]);
        state.commit_hybrid_time = HybridTime::new(100, 1).to_u64();
        let decoded = TransactionStatePb::decode(state.encode_to_vec().as_slice()).unwrap();
        assert_that!(decoded.id().unwrap()).is_equal_to(id);
        assert_that!(decoded.transaction_status().unwrap()).is_equal_to(TransactionStatus::Committed);
        assert_that!(decoded.commit_time()).is_equal_to(HybridTime::new(100, 1));
        assert_that!(decoded.tablets.clone()).is_equal_to(vec!["t1".to_string(), "t2".to_string()]);
        assert_that!(decoded.is_external()).is_equal_to(false);
    }

    #[test]
    fn test_state_record_invalid() {
        let state = TransactionStatePb { transaction_id: vec![1, 2, 3], status: 3, ..Default::default() };
        assert_that!(state.id().is_err()).is_equal_to(true);
        assert_that!(state.transaction_status().is_err()).is_equal_to(true);
    }
}
