use fms_common::{ManualClock, MeasurementSink};
use fms_delivery::{BackoffPolicy, DeadLetterRecord, DeadLetterStore, DeliveryQueue};
use fms_test_utils::{epoch, measurement, FlakySink};
use proptest::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    clock: Arc<ManualClock>,
    sink: Arc<FlakySink>,
    store: Arc<DeadLetterStore>,
    queue: DeliveryQueue,
}

async fn harness(path: &Path, sink: Arc<FlakySink>, policy: BackoffPolicy) -> Harness {
    let store = Arc::new(DeadLetterStore::open(path).await.unwrap());
    let clock = Arc::new(ManualClock::new(epoch()));
    let queue = DeliveryQueue::new(sink.clone(), store.clone())
        .with_clock(clock.clone())
        .with_policy(policy);
    Harness {
        clock,
        sink,
        store,
        queue,
    }
}

/// First write attempt, then hand off to the queue on failure
async fn ingest(h: &Harness, tag: &str, value: f64) {
    let m = measurement(tag, value);
    if h.sink.write(&m).await.is_err() {
        h.queue.add(m);
    }
}

/// Run retry passes until the queue is empty
async fn settle(h: &Harness) {
    for _ in 0..16 {
        if h.queue.is_empty() {
            return;
        }
        h.clock.advance_secs(600);
        h.queue.process_due().await;
    }
    panic!("queue did not settle");
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_measurement_is_persisted_or_dead_lettered(failures in 0usize..6) {
        runtime().block_on(async {
            let dir = TempDir::new().unwrap();
            let sink = Arc::new(FlakySink::failing_first(failures));
            let h = harness(&dir.path().join("dlq.jsonl"), sink, BackoffPolicy::default()).await;

            ingest(&h, "fermenter_temp", 37.0).await;
            settle(&h).await;

            let persisted = h.sink.written_count();
            let dead = h.store.load().await.unwrap().records.len();
            assert_eq!(persisted + dead, 1, "failures={failures}");
            // one direct attempt plus max_retries + 1 queued attempts
            assert_eq!(persisted == 1, failures <= 4);

            // eventual success after the budget is spent: recovery delivers it
            h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();
            assert_eq!(h.sink.written_count(), 1);
            assert!(h.store.is_empty());
            assert!(h.queue.is_empty());
        });
    }
}

#[tokio::test]
async fn retry_count_never_exceeds_budget_while_queued() {
    let dir = TempDir::new().unwrap();
    let sink = Arc::new(FlakySink::unavailable());
    let h = harness(&dir.path().join("dlq.jsonl"), sink, BackoffPolicy::default()).await;

    for value in [36.0, 37.0, 38.0, 39.0] {
        ingest(&h, "fermenter_temp", value).await;
    }

    let max = h.queue.policy().max_retries;
    let mut promoted = 0;
    while !h.queue.is_empty() {
        h.clock.advance_secs(1);
        promoted += h.queue.process_due().await.promoted;
        assert!(h.queue.pending().iter().all(|item| item.retry_count <= max));
    }

    assert_eq!(promoted, 4);
    let records = h.store.load().await.unwrap().records;
    assert_eq!(records.len(), 4);
    assert!(records.iter().all(|r| r.retry_count == max + 1));
}

#[tokio::test]
async fn corrupt_tail_recovers_preceding_records() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dlq.jsonl");

    let mut contents = String::new();
    for value in [40.0, 41.0, 42.0] {
        let rec = DeadLetterRecord::new(&measurement("fermenter_temp", value), 4, epoch(), epoch());
        contents.push_str(&rec.encode_line().unwrap());
    }
    contents.push_str(r#"{"timestamp": "2024-01-01T12:00:00Z", "tag": "ferm"#);
    std::fs::write(&path, contents).unwrap();

    let h = harness(&path, Arc::new(FlakySink::healthy()), BackoffPolicy::default()).await;
    let report = h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();

    assert_eq!(report.scanned, 3);
    assert_eq!(report.recovered, 3);
    assert_eq!(report.corrupt, 1);
    assert_eq!(report.quarantined, 1);
    assert_eq!(h.sink.written_count(), 3);

    let scan = h.store.load().await.unwrap();
    assert!(scan.is_empty());
    let side = std::fs::read_to_string(h.store.quarantine_path()).unwrap();
    assert!(side.starts_with(r#"{"timestamp""#));
}

#[tokio::test]
async fn recovery_twice_leaves_state_unchanged() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dlq.jsonl");
    let h = harness(&path, Arc::new(FlakySink::healthy()), BackoffPolicy::default()).await;

    let rec = DeadLetterRecord::new(&measurement("agitator_rpm", 700.0), 4, epoch(), epoch());
    h.store.append(&rec).await.unwrap();

    let first = h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();
    assert_eq!(first.recovered, 1);
    let bytes_after_first = std::fs::read(&path).unwrap();

    let second = h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();
    assert!(second.is_noop());
    assert_eq!(std::fs::read(&path).unwrap(), bytes_after_first);
    assert_eq!(h.sink.written_count(), 1);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn pending_items_survive_restart() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dlq.jsonl");

    {
        let h = harness(&path, Arc::new(FlakySink::unavailable()), BackoffPolicy::default()).await;
        ingest(&h, "fermenter_ph", 7.1).await;
        ingest(&h, "fermenter_ph", 7.2).await;
        assert_eq!(h.queue.size(), 2);

        let drained = h.queue.drain_to_dead_letter().await;
        assert_eq!(drained.written, 2);
    }

    let h = harness(&path, Arc::new(FlakySink::healthy()), BackoffPolicy::default()).await;
    assert_eq!(h.store.len(), 2);

    let report = h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();
    assert_eq!(report.recovered, 2);
    let mut values: Vec<f64> = h.sink.written().iter().map(|m| m.value).collect();
    values.sort_by(f64::total_cmp);
    assert_eq!(values, vec![7.1, 7.2]);
}

#[tokio::test]
async fn requeued_record_delivered_by_retry_is_removed_from_log() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("dlq.jsonl");
    // recovery attempt fails, the first queued retry succeeds
    let h = harness(&path, Arc::new(FlakySink::failing_first(1)), BackoffPolicy::default()).await;

    let rec = DeadLetterRecord::new(&measurement("fermenter_temp", 47.0), 4, epoch(), epoch());
    h.store.append(&rec).await.unwrap();

    let report = h.store.recover_all(h.sink.as_ref(), &h.queue).await.unwrap();
    assert_eq!(report.requeued, 1);
    assert_eq!(h.store.len(), 1);

    settle(&h).await;
    assert_eq!(h.sink.written_count(), 1);
    assert!(h.store.is_empty());
    assert!(h.store.load().await.unwrap().records.is_empty());
}
