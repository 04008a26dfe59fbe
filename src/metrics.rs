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

//! Counters exported through tablet heartbeats.

use std::sync::atomic::{AtomicU64, Ordering};

macro_rules! counters {
    ($metrics:ident, $snapshot:ident { $($name:ident),* $(,)? }) => {
        #[derive(Debug, Default)]
        pub struct $metrics {
            $($name: AtomicU64,)*
        }

        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $snapshot {
            $(pub $name: u64,)*
        }

        impl $metrics {
            $(
                pub fn $name(&self) -> u64 {
                    self.$name.load(Ordering::Relaxed)
                }
            )*

            pub fn snapshot(&self) -> $snapshot {
                $snapshot { $($name: self.$name(),)* }
            }
        }
    };
}

counters!(CoordinatorMetrics, CoordinatorMetricsSnapshot {
    expired_transactions,
    committed_transactions,
    aborted_transactions,
    applied_transactions,
    notify_applying_requests,
    status_requests,
});

counters!(TabletMetrics, TabletMetricsSnapshot {
    applied_transactions,
    applied_records,
    removed_transactions,
    intents_flushes,
    forced_regular_flushes,
});

impl CoordinatorMetrics {
    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn expired(&self) {
        Self::incr(&self.expired_transactions)
    }

    pub(crate) fn committed(&self) {
        Self::incr(&self.committed_transactions)
    }

    pub(crate) fn aborted(&self) {
        Self::incr(&self.aborted_transactions)
    }

    pub(crate) fn applied(&self) {
        Self::incr(&self.applied_transactions)
    }

    pub(crate) fn notify_applying(&self) {
        Self::incr(&self.notify_applying_requests)
    }

    pub(crate) fn status_request(&self) {
        Self::incr(&self.status_requests)
    }
}

impl TabletMetrics {
    pub(crate) fn applied(&self, records: u64) {
        self.applied_transactions.fetch_add(1, Ordering::Relaxed);
        self.applied_records.fetch_add(records, Ordering::Relaxed);
    }

    pub(crate) fn removed(&self) {
        self.removed_transactions.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn intents_flushed(&self) {
        self.intents_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn regular_force_flushed(&self) {
        self.forced_regular_flushes.fetch_add(1, Ordering::Relaxed);
    }
}

/// Status tablet state piggybacked on heartbeats to master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinatorReport {
    pub tablet_id: String,
    pub managed_transactions: usize,
    pub min_first_entry_raft_index: i64,
    pub metrics: CoordinatorMetricsSnapshot,
}

/// Participant tablet state piggybacked on heartbeats to master.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TabletReport {
    pub tablet_id: String,
    pub running_transactions: usize,
    pub metrics: TabletMetricsSnapshot,
}
