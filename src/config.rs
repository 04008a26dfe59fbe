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

use std::time::Duration;

use bytesize::ByteSize;

/// Tunables of transaction coordination and intents apply.
#[derive(Clone, Debug)]
pub struct TransactionConfig {
    /// Interval at which clients heartbeat pending transactions.
    pub heartbeat_interval: Duration,
    /// Heartbeat periods a transaction may miss before it expires.
    pub max_missed_heartbeat_periods: f64,
    /// Coordinator poll interval.
    pub check_interval: Duration,
    pub resend_applying_interval: Duration,
    pub deadlock_detection_interval: Duration,
    pub enable_deadlock_detection: bool,
    pub rpc_timeout: Duration,
    pub external_rpc_timeout: Duration,
    /// Maximum time an intents flush waits for the regular db before forcing it to flush.
    pub intents_flush_max_delay: Duration,
    /// Size budget of one apply/remove intents batch.
    pub apply_intents_batch_size: ByteSize,
    pub history_retention_interval: Duration,
    pub rw_operation_quiet_timeout: Duration,
}

impl TransactionConfig {
    pub fn transaction_timeout(&self) -> Duration {
        self.heartbeat_interval.mul_f64(self.max_missed_heartbeat_periods.max(0.0))
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(500),
            max_missed_heartbeat_periods: 10.0,
            check_interval: Duration::from_millis(500),
            resend_applying_interval: Duration::from_secs(5),
            deadlock_detection_interval: Duration::from_secs(60),
            enable_deadlock_detection: true,
            rpc_timeout: Duration::from_secs(5),
            external_rpc_timeout: Duration::from_secs(30),
            intents_flush_max_delay: Duration::from_millis(2000),
            apply_intents_batch_size: ByteSize::mib(4),
            history_retention_interval: Duration::from_secs(900),
            rw_operation_quiet_timeout: Duration::from_secs(60),
        }
    }
}
