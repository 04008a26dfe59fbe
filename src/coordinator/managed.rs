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

use std::collections::BTreeSet;
use std::time::Duration;

use hashbrown::HashMap;

use super::state::TransactionState;
use crate::clock::HybridTime;
use crate::protos::TransactionId;

/// Transactions of one status tablet, indexed by id, last touch and first raft index.
#[derive(Default)]
pub struct ManagedTransactions {
    transactions: HashMap<TransactionId, TransactionState>,
    by_last_touch: BTreeSet<(HybridTime, TransactionId)>,
    by_first_entry_raft_index: BTreeSet<(i64, TransactionId)>,
}

impl ManagedTransactions {
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    pub fn contains(&self, id: &TransactionId) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn get(&self, id: &TransactionId) -> Option<&TransactionState> {
        self.transactions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionState> {
        self.transactions.values()
    }

    pub fn ids(&self) -> Vec<TransactionId> {
        self.transactions.keys().copied().collect()
    }

    /// Inserts state if its id is absent.
    pub fn insert(&mut self, state: TransactionState) -> bool {
        let id = state.id();
        if self.transactions.contains_key(&id) {
            return false;
        }
        self.by_last_touch.insert((state.last_touch(), id));
        self.by_first_entry_raft_index.insert((state.first_entry_raft_index(), id));
        self.transactions.insert(id, state);
        true
    }

    pub fn remove(&mut self, id: &TransactionId) -> Option<TransactionState> {
        let state = self.transactions.remove(id)?;
        self.by_last_touch.remove(&(state.last_touch(), *id));
        self.by_first_entry_raft_index.remove(&(state.first_entry_raft_index(), *id));
        Some(state)
    }

    /// Mutates state in place and keeps secondary indexes in sync.
    pub fn modify<R>(&mut self, id: &TransactionId, f: impl FnOnce(&mut TransactionState) -> R) -> Option<R> {
        let state = self.transactions.get_mut(id)?;
        let last_touch = state.last_touch();
        let first_entry_raft_index = state.first_entry_raft_index();
        let result = f(state);
        if state.last_touch() != last_touch {
            self.by_last_touch.remove(&(last_touch, *id));
            self.by_last_touch.insert((state.last_touch(), *id));
        }
        if state.first_entry_raft_index() != first_entry_raft_index {
            self.by_first_entry_raft_index.remove(&(first_entry_raft_index, *id));
            self.by_first_entry_raft_index.insert((state.first_entry_raft_index(), *id));
        }
        Some(result)
    }

    /// Transactions whose last touch lies more than `timeout` before `now`, oldest first.
    pub fn touched_before(&self, now: HybridTime, timeout: Duration) -> Vec<TransactionId> {
        self.by_last_touch
            .iter()
            .take_while(|(last_touch, _)| now.physical_since(*last_touch) > timeout)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Minimum raft index still required, [i64::MAX] if nothing is tracked.
    pub fn min_first_entry_raft_index(&self) -> i64 {
        self.by_first_entry_raft_index.first().map(|(index, _)| *index).unwrap_or(i64::MAX)
    }

    pub fn oldest_by_raft_index(&self) -> Option<&TransactionState> {
        let (_, id) = self.by_first_entry_raft_index.first()?;
        self.transactions.get(id)
    }
}
