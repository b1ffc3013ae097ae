use fms_common::{ManualClock, MeasurementSink, RawMeasurement};
use fms_core::{
    HealthStatus, IngestStatus, IngestionOrchestrator, MeasurementQuery, MemoryStore,
    QueueStatus, ServiceConfig,
};
use fms_test_utils::{epoch, raw, FlakySink};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use tempfile::TempDir;

fn config(dir: &TempDir) -> ServiceConfig {
    ServiceConfig::default().with_dead_letter_path(dir.path().join("dlq.jsonl"))
}

fn store(config: &ServiceConfig) -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new(config.registry().names()))
}

#[tokio::test]
async fn batch_reports_each_item() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = store(&config);
    let orch = IngestionOrchestrator::open(&config, store.clone()).await.unwrap();

    let batch = vec![
        raw("fermenter_temp", 37.0),
        raw("unknown_sensor", 1.0),
        raw("fermenter_ph", 8.5),
        RawMeasurement::new("not a time", "agitator_rpm", 400.0),
    ];
    let resp = orch.handle_batch(batch).await;

    assert_eq!((resp.processed, resp.accepted, resp.rejected), (4, 2, 2));
    let statuses: Vec<IngestStatus> = resp.results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![
            IngestStatus::Success,
            IngestStatus::Rejected,
            IngestStatus::Success,
            IngestStatus::Rejected,
        ]
    );
    assert_eq!(resp.results[1].tag, "unknown_sensor");
    assert_eq!(resp.results[2].is_anomaly, Some(true));
    assert_eq!(store.len(), 2);
}

#[tokio::test]
async fn outage_is_absorbed_by_the_queue() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = store(&config);
    let clock = Arc::new(ManualClock::new(epoch()));
    let orch = IngestionOrchestrator::open_with_clock(&config, store.clone(), clock.clone())
        .await
        .unwrap();

    store.set_available(false);
    for value in [36.0, 37.0, 38.0] {
        let resp = orch.handle(raw("fermenter_temp", value)).await;
        assert_eq!(resp.status, IngestStatus::QueuedForRetry);
    }

    let stats = orch.stats(store.totals());
    assert_eq!(stats.retry_queue_size, 3);
    assert_eq!(stats.retry_queue_status, QueueStatus::Pending);
    assert_eq!(stats.total_measurements, 0);
    assert_eq!(orch.health().await.status, HealthStatus::Degraded);

    store.set_available(true);
    clock.advance_secs(1);
    let tick = orch.process_retries().await;
    assert_eq!(tick.delivered, 3);

    let stats = orch.stats(store.totals());
    assert_eq!(stats.total_measurements, 3);
    assert_eq!(stats.retry_queue_status, QueueStatus::Clear);
    assert_eq!(orch.health().await.status, HealthStatus::Healthy);

    // measurements keep their original timestamps
    let rows = store.query(&MeasurementQuery::all().with_tag("fermenter_temp"));
    assert!(rows.iter().all(|r| r.measurement.timestamp == epoch()));
}

#[tokio::test]
async fn queue_threshold_degrades_health() {
    let dir = TempDir::new().unwrap();
    let mut config = config(&dir);
    config.health.retry_queue_warn_threshold = 2;
    let sink = Arc::new(FlakySink::failing_first(2));
    let orch = IngestionOrchestrator::open(&config, sink.clone()).await.unwrap();

    orch.handle(raw("fermenter_ph", 7.0)).await;
    let report = orch.health().await;
    assert_eq!(report.status, HealthStatus::Healthy);
    assert_eq!(report.retry_queue_size, 1);

    orch.handle(raw("fermenter_ph", 7.1)).await;
    let report = orch.health().await;
    assert_eq!(report.status, HealthStatus::Degraded);
    assert_eq!(report.database, "healthy");
}

#[tokio::test]
async fn restart_with_backend_still_down_requeues_and_keeps_log() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let sink = Arc::new(FlakySink::unavailable());

    {
        let orch = IngestionOrchestrator::open(&config, sink.clone()).await.unwrap();
        orch.handle(raw("fermenter_temp", 39.0)).await;
        orch.shutdown().await.unwrap();
    }

    let orch = IngestionOrchestrator::open(&config, sink.clone()).await.unwrap();
    assert_eq!(orch.recovery().requeued, 1);
    assert_eq!(orch.retry_queue_size(), 1);
    assert_eq!(orch.queue().pending()[0].retry_count, 0);
    assert_eq!(orch.dead_letter_count(), 1);
    assert!(orch.health().await.dead_letter_present);

    // shutting down again does not duplicate the record
    orch.shutdown().await.unwrap();
    assert_eq!(orch.dead_letter_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_ingestion_across_tags() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir);
    let store = store(&config);
    let orch = Arc::new(IngestionOrchestrator::open(&config, store.clone()).await.unwrap());

    let mut handles = Vec::new();
    for (tag, base) in [("fermenter_temp", 37.0), ("fermenter_ph", 7.0), ("agitator_rpm", 450.0)] {
        for i in 0..20 {
            let orch = orch.clone();
            handles.push(tokio::spawn(async move {
                let value = base + f64::from(i % 2) * 0.1;
                orch.handle(raw(tag, value)).await
            }));
        }
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_accepted());
    }

    assert_eq!(store.len(), 60);
    for tag in ["fermenter_temp", "fermenter_ph", "agitator_rpm"] {
        assert_eq!(orch.detector().window_len(tag), 20);
    }
    assert!(store.ping().await.is_ok());
}
