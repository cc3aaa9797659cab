//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "testing"
//! vg_type: "source"
//! vg_scope: "test"
//! vg_description: "Generation controller lifecycle and tick loop tests."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use vgraph_common::config::GenerationConfig;
use vgraph_core::{
    BroadcastHub, GenerationController, GenerationError, ListenerConnection, StartRequest,
};
use vgraph_sim::{NoiseSource, Sample, SampleKind, ScriptedNoise};
use vgraph_storage::{MemoryStore, PersistenceSink};

struct Harness {
    controller: GenerationController,
    hub: BroadcastHub,
    sink: Arc<PersistenceSink>,
    store: Arc<MemoryStore>,
}

fn harness() -> Harness {
    let store = Arc::new(MemoryStore::default());
    let hub = BroadcastHub::spawn(64, None);
    let sink = Arc::new(PersistenceSink::spawn(store.clone(), 64, None));
    let controller = GenerationController::builder(
        GenerationConfig::default(),
        hub.clone(),
        store.clone(),
        sink.clone(),
    )
    .noise_factory(Arc::new(|| {
        Box::new(ScriptedNoise::silent()) as Box<dyn NoiseSource>
    }))
    .build();
    Harness {
        controller,
        hub,
        sink,
        store,
    }
}

fn request(interval_ms: u64, chart_id: &str) -> StartRequest {
    StartRequest {
        interval_ms: Some(interval_ms),
        chart_id: Some(chart_id.to_owned()),
    }
}

async fn drain(hub: &BroadcastHub, listener: &mut ListenerConnection) -> Vec<Arc<Sample>> {
    hub.settled_listener_count().await.unwrap();
    let mut samples = Vec::new();
    while let Some(sample) = listener.try_recv() {
        samples.push(sample);
    }
    samples
}

#[tokio::test(start_paused = true)]
async fn five_ticks_deliver_ten_samples() {
    let h = harness();
    let mut listener = h.hub.connect().await.unwrap();

    let started = h.controller.start(request(20, "A")).await.unwrap();
    assert_eq!(started.status, "running");
    assert_eq!(started.interval, 20);

    sleep(Duration::from_millis(110)).await;
    let stopped = h.controller.stop().await.unwrap();
    assert_eq!(stopped.status, "stopped");
    assert_eq!(stopped.ticks, 5);

    let samples = drain(&h.hub, &mut listener).await;
    assert_eq!(samples.len(), 10);
    assert!(samples.iter().all(|s| s.chart_id == "A"));

    let mut last_elapsed = -1.0;
    for pair in samples.chunks(2) {
        assert_eq!(pair[0].kind, SampleKind::Current);
        assert_eq!(pair[1].kind, SampleKind::Voltage);
        assert_eq!(pair[0].elapsed_seconds, pair[1].elapsed_seconds);
        assert_eq!(pair[0].timestamp, pair[1].timestamp);
        assert_eq!(pair[0].overload, pair[1].overload);
        assert!(pair[0].elapsed_seconds > last_elapsed);
        last_elapsed = pair[0].elapsed_seconds;
    }

    h.sink.shutdown().await;
    let rows = h.store.rows();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[0].circuit_id, "circuit_B");
    assert_eq!(rows[0].sensor_model, "I-Sensor-Pro");
}

#[tokio::test(start_paused = true)]
async fn status_reflects_running_session() {
    let h = harness();
    let idle = h.controller.status().await;
    assert!(!idle.is_generating);
    assert_eq!(idle.status, "stopped");
    assert!(idle.session.is_none());

    let _listener = h.hub.connect().await.unwrap();
    let started = h.controller.start(request(50, "chart-7")).await.unwrap();
    sleep(Duration::from_millis(120)).await;

    let status = h.controller.status().await;
    assert!(status.is_generating);
    assert_eq!(status.status, "running");
    assert_eq!(status.clients, 1);
    let session = status.session.unwrap();
    assert_eq!(session.session_id, started.session_id);
    assert_eq!(session.chart_id, "chart-7");
    assert_eq!(session.interval, 50);
    assert_eq!(session.ticks, 2);

    h.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected_without_touching_session() {
    let h = harness();
    h.controller.start(request(20, "A")).await.unwrap();
    let before = h.controller.status().await.session.unwrap();

    let err = h.controller.start(request(100, "B")).await.unwrap_err();
    assert_eq!(err, GenerationError::AlreadyRunning);

    let after = h.controller.status().await.session.unwrap();
    assert_eq!(after.session_id, before.session_id);
    assert_eq!(after.chart_id, "A");
    assert_eq!(after.started_at, before.started_at);
    assert_eq!(after.interval, 20);

    h.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_while_idle_is_a_conflict() {
    let h = harness();
    assert_eq!(
        h.controller.stop().await.unwrap_err(),
        GenerationError::NotRunning
    );
    assert!(!h.controller.status().await.is_generating);

    h.controller.start(StartRequest::default()).await.unwrap();
    h.controller.stop().await.unwrap();
    assert_eq!(
        h.controller.stop().await.unwrap_err(),
        GenerationError::NotRunning
    );
}

#[tokio::test(start_paused = true)]
async fn unreachable_storage_blocks_start() {
    let h = harness();
    h.store.set_available(false);
    let err = h.controller.start(request(20, "A")).await.unwrap_err();
    assert!(matches!(err, GenerationError::StorageUnavailable(_)));
    assert!(!h.controller.status().await.is_generating);

    h.store.set_available(true);
    h.controller.start(request(20, "A")).await.unwrap();
    h.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn storage_outage_mid_session_does_not_interrupt_stream() {
    let h = harness();
    let mut listener = h.hub.connect().await.unwrap();
    h.controller.start(request(20, "A")).await.unwrap();

    sleep(Duration::from_millis(30)).await;
    h.store.set_available(false);
    sleep(Duration::from_millis(80)).await;
    let stopped = h.controller.stop().await.unwrap();
    assert_eq!(stopped.ticks, 5);
    assert_eq!(drain(&h.hub, &mut listener).await.len(), 10);

    h.sink.shutdown().await;
    let stats = h.sink.snapshot();
    assert_eq!(stats.written + stats.failed, 5);
    assert!(stats.failed >= 4);
}

#[tokio::test(start_paused = true)]
async fn interval_is_clamped_and_defaulted() {
    let h = harness();
    assert_eq!(h.controller.start(request(0, "")).await.unwrap().interval, 5);
    h.controller.stop().await.unwrap();

    let huge = h.controller.start(request(1_000_000, "")).await.unwrap();
    assert_eq!(huge.interval, 10_000);
    h.controller.stop().await.unwrap();

    let default = h.controller.start(StartRequest::default()).await.unwrap();
    assert_eq!(default.interval, 20);
    h.controller.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_does_not_wait_for_next_tick() {
    let h = harness();
    h.controller.start(request(5_000, "slow")).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    let before = Instant::now();
    let stopped = h.controller.stop().await.unwrap();
    assert!(before.elapsed() < Duration::from_millis(5_000));
    assert_eq!(stopped.ticks, 0);
}

#[tokio::test(start_paused = true)]
async fn restart_resets_counter_and_elapsed_time() {
    let h = harness();
    let mut listener = h.hub.connect().await.unwrap();

    let first = h.controller.start(request(20, "A")).await.unwrap();
    sleep(Duration::from_millis(50)).await;
    h.controller.stop().await.unwrap();
    drain(&h.hub, &mut listener).await;

    let second = h.controller.start(request(20, "B")).await.unwrap();
    assert_ne!(first.session_id, second.session_id);
    sleep(Duration::from_millis(30)).await;
    h.controller.stop().await.unwrap();

    let samples = drain(&h.hub, &mut listener).await;
    assert_eq!(samples.len(), 2);
    assert_eq!(samples[0].chart_id, "B");
    assert!((samples[0].elapsed_seconds - 0.02).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn listener_leaving_mid_session_does_not_disturb_others() {
    let h = harness();
    let mut leaving = h.hub.connect().await.unwrap();
    let mut staying = h.hub.connect().await.unwrap();
    h.controller.start(request(20, "A")).await.unwrap();

    sleep(Duration::from_millis(50)).await;
    let before_leaving = drain(&h.hub, &mut leaving).await;
    assert_eq!(before_leaving.len(), 4);
    leaving.disconnect();

    sleep(Duration::from_millis(60)).await;
    h.controller.stop().await.unwrap();

    assert!(leaving.recv().await.is_none());
    let all = drain(&h.hub, &mut staying).await;
    assert_eq!(all.len(), 10);
    assert_eq!(h.hub.listener_count(), 1);
}
