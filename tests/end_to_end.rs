//! ---
//! vg_section: "15-testing-qa-runbook"
//! vg_subsection: "integration-tests"
//! vg_type: "source"
//! vg_scope: "test"
//! vg_description: "Journal-backed daemon stack exercised over HTTP and WebSocket."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::{json, Value};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use vgraph_common::config::{ApiConfig, AppConfig};
use vgraph_core::{BroadcastHub, GenerationController};
use vgraph_metrics::{new_registry, GenerationMetrics};
use vgraph_net::{ApiServerBuilder, ApiServerHandle};
use vgraph_storage::{JournalStore, MeasurementQuery, MeasurementStore, PersistenceSink, StorageMetrics};

struct Stack {
    api: ApiServerHandle,
    controller: GenerationController,
    hub: BroadcastHub,
    sink: Arc<PersistenceSink>,
}

impl Stack {
    async fn boot(journal: &Path) -> anyhow::Result<Self> {
        let mut config = AppConfig::default();
        config.generation.noise_seed = Some(11);
        config.api = ApiConfig {
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..ApiConfig::default()
        };

        let registry = new_registry();
        let store: Arc<dyn MeasurementStore> = Arc::new(JournalStore::open(journal)?);
        let sink = Arc::new(PersistenceSink::spawn(
            store.clone(),
            config.storage.queue_capacity,
            Some(StorageMetrics::new(registry.clone())?),
        ));
        let metrics = GenerationMetrics::new(registry.clone())?;
        let hub = BroadcastHub::spawn(config.hub.listener_capacity, Some(metrics.clone()));
        let controller = GenerationController::builder(
            config.generation.clone(),
            hub.clone(),
            store.clone(),
            sink.clone(),
        )
        .metrics(Some(metrics))
        .build();
        let api = ApiServerBuilder::new(controller.clone(), store)
            .with_api_config(config.api.clone())
            .with_hub_config(config.hub.clone())
            .with_metrics_registry(registry)
            .spawn()
            .await?;
        Ok(Self {
            api,
            controller,
            hub,
            sink,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.api.local_addr(), path)
    }

    async fn halt(self) -> anyhow::Result<()> {
        self.controller.shutdown().await;
        self.hub.shutdown().await;
        self.api.shutdown().await?;
        self.sink.shutdown().await;
        Ok(())
    }
}

#[tokio::test]
async fn session_streams_records_and_survives_restart() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let journal = dir.path().join("data").join("measurements.jsonl");
    let http = reqwest::Client::new();

    let stack = Stack::boot(&journal).await?;
    let ws_url = format!("ws://{}/ws", stack.api.local_addr());
    let (mut socket, _) = connect_async(ws_url.as_str()).await?;
    for _ in 0..50 {
        if stack.hub.settled_listener_count().await? == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let started: Value = http
        .post(stack.url("/api/generation/start"))
        .json(&json!({"interval": 10, "chartId": "e2e"}))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(started["interval"], 10);

    let mut received = 0;
    while received < 20 {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await?
            .expect("stream ended early")?;
        if let Message::Text(text) = frame {
            let sample: Value = serde_json::from_str(&text)?;
            assert_eq!(sample["chartId"], "e2e");
            received += 1;
        }
    }

    let stopped: Value = http
        .post(stack.url("/api/generation/stop"))
        .send()
        .await?
        .json()
        .await?;
    let ticks = stopped["ticks"].as_u64().unwrap();
    assert!(ticks >= 10);
    drop(socket);

    let snapshot_before = stack.sink.snapshot();
    stack.halt().await?;
    let reopened = JournalStore::open(&journal)?;
    let rows = reopened
        .query_measurements(&MeasurementQuery::range(None, None, 100_000))
        .await?;
    assert_eq!(rows.len() as u64, ticks);
    assert!(snapshot_before.written <= ticks);
    assert!(rows.windows(2).all(|pair| pair[0].id < pair[1].id));
    assert!(rows.iter().all(|row| row.circuit_id == "circuit_B"));

    let stack = Stack::boot(&journal).await?;
    let history: Value = http
        .get(stack.url("/generation/history"))
        .query(&[("limit", "5"), ("type", "voltage")])
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(history["count"], 5);
    assert_eq!(history["type"], "voltage");
    assert!(history["data"]
        .as_array()
        .unwrap()
        .iter()
        .all(|sample| sample["time"].as_f64().unwrap() >= 0.0));
    stack.halt().await?;
    Ok(())
}
