//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "testing"
//! vg_type: "source"
//! vg_scope: "test"
//! vg_description: "Broadcast hub fan-out, eviction and ordering tests."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use chrono::Utc;
use vgraph_core::BroadcastHub;
use vgraph_metrics::{new_registry, GenerationMetrics};
use vgraph_sim::{Sample, SampleKind};

fn sample(elapsed: f64) -> Sample {
    Sample {
        kind: SampleKind::Voltage,
        elapsed_seconds: elapsed,
        value: 6.0,
        chart_id: "hub".into(),
        timestamp: Utc::now(),
        overload: false,
    }
}

#[tokio::test]
async fn full_listener_is_evicted_without_blocking_others() {
    let registry = new_registry();
    let metrics = GenerationMetrics::new(registry.clone()).unwrap();
    let hub = BroadcastHub::spawn(3, Some(metrics));
    let mut stalled = hub.connect().await.unwrap();
    let mut reader = hub.connect().await.unwrap();

    hub.publish(sample(0.1)).unwrap();
    hub.publish(sample(0.2)).unwrap();
    assert_eq!(reader.recv().await.unwrap().elapsed_seconds, 0.1);
    assert_eq!(reader.recv().await.unwrap().elapsed_seconds, 0.2);

    for i in 3..=5 {
        hub.publish(sample(i as f64 / 10.0)).unwrap();
    }
    assert_eq!(hub.settled_listener_count().await.unwrap(), 1);
    for expected in [0.3, 0.4, 0.5] {
        assert_eq!(reader.recv().await.unwrap().elapsed_seconds, expected);
    }

    for expected in [0.1, 0.2, 0.3] {
        assert_eq!(stalled.recv().await.unwrap().elapsed_seconds, expected);
    }
    assert!(stalled.recv().await.is_none());
    assert!(!stalled.is_connected());

    let evictions = registry
        .gather()
        .into_iter()
        .find(|f| f.get_name() == "vgraph_listener_evictions_total")
        .unwrap();
    assert_eq!(evictions.get_metric()[0].get_counter().get_value(), 1.0);
    hub.shutdown().await;
}

#[tokio::test]
async fn late_listener_sees_no_replay() {
    let hub = BroadcastHub::spawn(16, None);
    for i in 0..3 {
        hub.publish(sample(i as f64)).unwrap();
    }
    let mut late = hub.connect().await.unwrap();
    hub.publish(sample(3.0)).unwrap();
    hub.settled_listener_count().await.unwrap();

    assert_eq!(late.try_recv().unwrap().elapsed_seconds, 3.0);
    assert!(late.try_recv().is_none());
    hub.shutdown().await;
}

#[tokio::test]
async fn publish_order_is_preserved_per_listener() {
    let hub = BroadcastHub::spawn(512, None);
    let mut a = hub.connect().await.unwrap();
    let mut b = hub.connect().await.unwrap();
    for i in 0..200 {
        hub.publish(sample(i as f64)).unwrap();
    }
    hub.settled_listener_count().await.unwrap();
    for listener in [&mut a, &mut b] {
        let mut expected = 0.0;
        while let Some(s) = listener.try_recv() {
            assert_eq!(s.elapsed_seconds, expected);
            expected += 1.0;
        }
        assert_eq!(expected, 200.0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn churn_during_publish_is_safe() {
    let hub = BroadcastHub::spawn(1024, None);
    let mut churners = Vec::new();
    for _ in 0..8 {
        let hub = hub.clone();
        churners.push(tokio::spawn(async move {
            for _ in 0..50 {
                let mut conn = hub.connect().await.unwrap();
                tokio::task::yield_now().await;
                while conn.try_recv().is_some() {}
                conn.disconnect();
            }
        }));
    }
    for i in 0..1000 {
        hub.publish(sample(i as f64)).unwrap();
    }
    for churner in churners {
        churner.await.unwrap();
    }
    assert_eq!(hub.settled_listener_count().await.unwrap(), 0);
    hub.shutdown().await;
    assert_eq!(hub.listener_count(), 0);
}
