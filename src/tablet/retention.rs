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

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use prost::Message;
use tracing::debug;

use super::keys;
use super::participant::TransactionParticipant;
use super::storage::MemoryDb;
use crate::clock::HybridTime;
use crate::error::Result;
use crate::protos::RegularValue;

/// History older than cutoff is invisible to reads and could be compacted.
pub struct HistoryRetentionPolicy {
    log_prefix: String,
    retention: Duration,
    participant: Arc<TransactionParticipant>,
    cutoff: Mutex<HybridTime>,
}

impl HistoryRetentionPolicy {
    pub fn new(log_prefix: String, retention: Duration, participant: Arc<TransactionParticipant>) -> Self {
        Self { log_prefix, retention, participant, cutoff: Mutex::new(HybridTime::MIN) }
    }

    /// Cutoff below min running transaction start time which never moves backwards.
    pub fn history_cutoff(&self, now: HybridTime) -> HybridTime {
        let min_running = self.participant.min_running_hybrid_time();
        let proposed = (now - self.retention).min(min_running.decremented());
        let mut cutoff = self.cutoff.lock().unwrap_or_else(PoisonError::into_inner);
        if proposed > *cutoff {
            *cutoff = proposed;
        } else if proposed < *cutoff {
            debug!("{}keep history cutoff {} over proposed {}", self.log_prefix, *cutoff, proposed);
        }
        *cutoff
    }

    pub fn committed_cutoff(&self) -> HybridTime {
        *self.cutoff.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Drops versions of user keys shadowed at `cutoff` together with deletion markers at or
/// below it. Returns number of dropped records.
pub fn compact_history(regular: &MemoryDb, cutoff: HybridTime) -> Result<usize> {
    let mut current_key: Option<Vec<u8>> = None;
    let mut visible_found = false;
    regular.compact(|key, value| {
        let Ok((user_key, time, _)) = keys::decode_regular_key(key) else {
            return true;
        };
        if current_key.as_deref() != Some(user_key) {
            current_key = Some(user_key.to_vec());
            visible_found = false;
        }
        if time > cutoff {
            return true;
        }
        if visible_found {
            return false;
        }
        visible_found = true;
        value.is_some_and(|value| !is_deletion(value))
    })
}

fn is_deletion(value: &[u8]) -> bool {
    RegularValue::decode(value).map_or(false, |value| value.value.is_none())
}

#[cfg(test)]
mod tests {
    use assertor::*;

    use super::*;
    use crate::protos::{TransactionId, TransactionMetadataPb};
    use crate::tablet::storage::WriteBatch;

    fn put(db: &MemoryDb, key: &str, time: u64, value: Option<&str>) {
        let mut batch = WriteBatch::default();
        let value = RegularValue { value: value.map(|value| value.as_bytes().to_vec()) };
        batch.put(keys::regular_key(key.as_bytes(), HybridTime::from_micros(time), 0), value.encode_to_vec());
        db.write(batch).unwrap();
    }

    #[test]
    fn test_history_cutoff() {
        let participant = Arc::new(TransactionParticipant::new("t1"));
        let policy = HistoryRetentionPolicy::new("T t1: ".to_string(), Duration::from_secs(10), participant.clone());
        let now = HybridTime::from_micros(100_000_000);
        assert_that!(policy.history_cutoff(now)).is_equal_to(HybridTime::from_micros(90_000_000));

        let id = TransactionId::new_random();
        let metadata = TransactionMetadataPb {
            transaction_id: id.to_vec(),
            start_hybrid_time: HybridTime::from_micros(95_000_000).to_u64(),
            ..Default::default()
        };
        participant.add(metadata).unwrap();
        let later = HybridTime::from_micros(110_000_000);
        let cutoff = policy.history_cutoff(later);
        assert_that!(cutoff).is_less_than(HybridTime::from_micros(95_000_000));
        assert_that!(cutoff).is_greater_than(HybridTime::from_micros(94_999_999));

        // Never goes backwards.
        assert_that!(policy.history_cutoff(now)).is_equal_to(cutoff);
        assert_that!(policy.committed_cutoff()).is_equal_to(cutoff);
    }

    #[test]
    fn test_compact_history() {
        let regular = MemoryDb::new("regular");
        put(&regular, "a", 10, Some("a10"));
        put(&regular, "a", 20, Some("a20"));
        put(&regular, "a", 40, Some("a40"));
        put(&regular, "b", 10, Some("b10"));
        put(&regular, "b", 20, None);
        put(&regular, "c", 50, None);
        regular.flush().unwrap();

        let dropped = compact_history(&regular, HybridTime::from_micros(30)).unwrap();
        assert_that!(dropped).is_equal_to(3);
        let remaining: Vec<_> = regular
            .scan(&[], None, usize::MAX)
            .unwrap()
            .into_iter()
            .map(|(key, _)| {
                let (user_key, time, _) = keys::decode_regular_key(&key).unwrap();
                (String::from_utf8(user_key.to_vec()).unwrap(), time.physical_micros())
            })
            .collect();
        assert_that!(remaining).is_equal_to(vec![
            ("a".to_string(), 40),
            ("a".to_string(), 20),
            ("c".to_string(), 50),
        ]);
    }
}
