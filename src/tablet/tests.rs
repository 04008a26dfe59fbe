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

use assertor::*;
use bytesize::ByteSize;
use test_case::test_case;

use super::*;

fn new_tablet(config: TransactionConfig) -> (Clock, Tablet) {
    let clock = Clock::manual(HybridTime::from_micros(1_000_000));
    let tablet = Tablet::new("t1", config, clock.clone(), KeyBounds::default());
    (clock, tablet)
}

fn metadata(id: TransactionId, start_time: HybridTime) -> TransactionMetadataPb {
    TransactionMetadataPb {
        transaction_id: id.to_vec(),
        status_tablet: "status".to_string(),
        start_hybrid_time: start_time.to_u64(),
    }
}

fn kv(key: &str, value: Option<&str>) -> KeyWrite {
    (key.as_bytes().to_vec(), value.map(|value| value.as_bytes().to_vec()))
}

fn update_request(id: TransactionId, status: TransactionStatus, commit_time: HybridTime) -> UpdateTransactionRequest {
    let mut state = crate::protos::TransactionStatePb::new(id, status).with_tablets(["status"]);
    state.commit_hybrid_time = commit_time.to_u64();
    UpdateTransactionRequest { tablet_id: "t1".to_string(), state: Some(state), ..Default::default() }
}

#[test_log::test]
fn test_apply_transaction() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    let start = clock.now();
    tablet.write_intents(id, Some(metadata(id, start)), 0, vec![kv("a", Some("a1")), kv("b", Some("b1"))]).unwrap();
    tablet.write_intents(id, None, 0, vec![kv("a", Some("a2"))]).unwrap();

    let commit_time = clock.now();
    assert_that!(tablet.read(b"a", commit_time).unwrap()).is_none();
    let stats = tablet.apply_transaction(id, commit_time, &AbortedSubTransactionSet::default()).unwrap();
    assert_that!(stats.records).is_equal_to(3);

    assert_that!(tablet.read(b"a", commit_time).unwrap()).is_equal_to(Some(b"a2".to_vec()));
    assert_that!(tablet.read(b"b", commit_time).unwrap()).is_equal_to(Some(b"b1".to_vec()));
    assert_that!(tablet.read(b"a", commit_time.decremented()).unwrap()).is_none();
    assert_that!(tablet.intents_db().scan(&[], None, usize::MAX).unwrap()).is_empty();
    assert_that!(tablet.participant().applied_at(&id)).is_equal_to(Some(commit_time));

    let report = tablet.report();
    assert_that!(report.running_transactions).is_equal_to(0);
    assert_that!(report.metrics.applied_transactions).is_equal_to(1);
    assert_that!(report.metrics.applied_records).is_equal_to(3);
}

#[test]
fn test_apply_twice_is_noop() {
    let config = TransactionConfig { apply_intents_batch_size: ByteSize::b(64), ..Default::default() };
    let (clock, tablet) = new_tablet(config);
    let id = TransactionId::new_random();
    let writes = (0..20).map(|i| kv(&format!("key{i:02}"), Some("value"))).collect();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 0, writes).unwrap();

    let commit_time = clock.now();
    let request = update_request(id, TransactionStatus::Applying, commit_time);
    tablet.handle_update_transaction(request.clone()).unwrap();
    let regular = tablet.regular_db().scan(&[], None, usize::MAX).unwrap();
    assert_that!(regular.len()).is_equal_to(20);

    tablet.handle_update_transaction(request).unwrap();
    assert_that!(tablet.regular_db().scan(&[], None, usize::MAX).unwrap()).is_equal_to(regular);
    assert_that!(tablet.metrics().applied_transactions()).is_equal_to(1);
}

#[test]
fn test_apply_drops_aborted_subtransactions() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 1, vec![kv("a", Some("1"))]).unwrap();
    tablet.write_intents(id, None, 2, vec![kv("b", Some("2"))]).unwrap();

    let commit_time = clock.now();
    let mut request = update_request(id, TransactionStatus::Applying, commit_time);
    if let Some(state) = request.state.as_mut() {
        state.aborted = Some(AbortedSubTransactionSet::from_ids([2]));
    }
    tablet.handle_update_transaction(request).unwrap();
    assert_that!(tablet.read(b"a", commit_time).unwrap()).is_equal_to(Some(b"1".to_vec()));
    assert_that!(tablet.read(b"b", commit_time).unwrap()).is_none();
}

#[test_case(TransactionStatus::ImmediateCleanup; "immediate cleanup")]
#[test_case(TransactionStatus::GracefulCleanup; "graceful cleanup")]
#[test_case(TransactionStatus::Aborted; "aborted")]
fn test_remove_intents(status: TransactionStatus) {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 0, vec![kv("a", Some("1"))]).unwrap();

    tablet.handle_update_transaction(update_request(id, status, HybridTime::MIN)).unwrap();
    assert_that!(tablet.intents_db().scan(&[], None, usize::MAX).unwrap()).is_empty();
    assert_that!(tablet.participant().was_aborted(&id)).is_true();
    assert_that!(tablet.metrics().removed_transactions()).is_equal_to(1);

    let err = tablet.write_intents(id, None, 0, vec![kv("b", Some("2"))]).unwrap_err();
    assert_that!(matches!(err, TxnError::TryAgain(_))).is_true();
    assert_that!(err.to_string()).contains("looks like it was just aborted");
}

#[test]
fn test_cleanup_after_apply_keeps_data() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 0, vec![kv("a", Some("1"))]).unwrap();
    let commit_time = clock.now();
    tablet.apply_transaction(id, commit_time, &AbortedSubTransactionSet::default()).unwrap();

    tablet.handle_update_transaction(update_request(id, TransactionStatus::ImmediateCleanup, HybridTime::MIN)).unwrap();
    assert_that!(tablet.read(b"a", commit_time).unwrap()).is_equal_to(Some(b"1".to_vec()));
    assert_that!(tablet.participant().was_aborted(&id)).is_false();
}

#[test]
fn test_unexpected_status() {
    let (_clock, tablet) = new_tablet(TransactionConfig::default());
    let request = update_request(TransactionId::new_random(), TransactionStatus::Committed, HybridTime::MIN);
    let err = tablet.handle_update_transaction(request).unwrap_err();
    assert_that!(matches!(err, TxnError::InvalidArgument(_))).is_true();
}

#[test]
fn test_status_at_participant() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 0, vec![kv("a", Some("1"))]).unwrap();
    tablet.write_intents(id, None, 0, vec![kv("b", Some("1"))]).unwrap();

    let request = GetTransactionStatusAtParticipantRequest {
        tablet_id: "t1".to_string(),
        transaction_id: id.to_vec(),
        required_num_replicated_batches: Some(2),
        ..Default::default()
    };
    let response = tablet.get_transaction_status_at_participant(&request).unwrap();
    assert_that!(response.aborted).is_false();
    assert_that!(response.num_replicated_batches).is_equal_to(2);
    assert_that!(response.propagated_hybrid_time).is_greater_than(response.status_hybrid_time);
}

#[test]
fn test_metadata_mismatch() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    let other = metadata(TransactionId::new_random(), clock.now());
    let err = tablet.write_intents(id, Some(other), 0, vec![kv("a", Some("1"))]).unwrap_err();
    assert_that!(matches!(err, TxnError::InvalidArgument(_))).is_true();
}

#[test]
fn test_key_bounds() {
    let clock = Clock::manual(HybridTime::from_micros(1_000_000));
    let key_bounds = KeyBounds::new(b"m".to_vec(), None);
    let tablet = Tablet::new("t2", TransactionConfig::default(), clock.clone(), key_bounds);
    let err = tablet.write(b"a", Some(b"1".to_vec())).unwrap_err();
    assert_that!(matches!(err, TxnError::InvalidArgument(_))).is_true();
    let time = tablet.write(b"x", Some(b"1".to_vec())).unwrap();
    assert_that!(tablet.read(b"x", time).unwrap()).is_equal_to(Some(b"1".to_vec()));
}

#[test]
fn test_compact_retains_history_of_running_transactions() {
    let config = TransactionConfig { history_retention_interval: Duration::from_secs(1), ..Default::default() };
    let (clock, tablet) = new_tablet(config);
    let first = tablet.write(b"a", Some(b"1".to_vec())).unwrap();
    clock.advance(Duration::from_secs(1));
    let id = TransactionId::new_random();
    let start = clock.now();
    tablet.write_intents(id, Some(metadata(id, start)), 0, vec![kv("b", Some("1"))]).unwrap();
    clock.advance(Duration::from_secs(1));
    let second = tablet.write(b"a", Some(b"2".to_vec())).unwrap();
    clock.advance(Duration::from_secs(10));
    tablet.write(b"a", Some(b"3".to_vec())).unwrap();

    assert_that!(tablet.compact().unwrap()).is_equal_to(0);
    assert_that!(tablet.history_cutoff()).is_less_than(start);
    assert_that!(tablet.read(b"a", first).unwrap()).is_equal_to(Some(b"1".to_vec()));

    tablet.apply_transaction(id, clock.now(), &AbortedSubTransactionSet::default()).unwrap();
    assert_that!(tablet.compact().unwrap()).is_equal_to(1);
    assert_that!(tablet.read(b"a", first).unwrap()).is_none();
    assert_that!(tablet.read(b"a", second).unwrap()).is_equal_to(Some(b"2".to_vec()));
}

#[tokio::test]
async fn test_shutdown() {
    let (clock, tablet) = new_tablet(TransactionConfig::default());
    let id = TransactionId::new_random();
    tablet.write(b"a", Some(b"1".to_vec())).unwrap();
    tablet.write_intents(id, Some(metadata(id, clock.now())), 0, vec![kv("b", Some("1"))]).unwrap();

    let pause = tablet.pause(tokio::time::Instant::now() + Duration::from_secs(1)).await.unwrap();
    let err = tablet.read(b"a", clock.now()).unwrap_err();
    assert_that!(matches!(err, TxnError::TryAgain(_))).is_true();
    drop(pause);

    tablet.shutdown().await.unwrap();
    assert_that!(tablet.intents_db().flushes()).is_equal_to(1);
    assert_that!(tablet.regular_db().flushes()).is_equal_to(1);
    let err = tablet.read(b"a", clock.now()).unwrap_err();
    assert_that!(matches!(err, TxnError::Aborted(_))).is_true();
}
