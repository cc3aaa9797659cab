//! ---
//! vg_section: "05-networking-external-interfaces"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "HTTP control surface for the generation controller."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use vgraph_common::config::{ApiConfig, HubConfig};
use vgraph_core::{GenerationController, GenerationError, StartRequest};
use vgraph_metrics::{metrics_router, SharedRegistry};
use vgraph_sim::SampleKind;
use vgraph_storage::{MeasurementQuery, MeasurementStore, StorageError};

use crate::history::{chart_records, ChartResponse};
use crate::websocket;

/// Shared state injected into the axum handlers.
pub(crate) struct ApiState {
    pub(crate) controller: GenerationController,
    pub(crate) store: Arc<dyn MeasurementStore>,
    pub(crate) limits: ApiConfig,
    pub(crate) transport: HubConfig,
}

/// Builder used to configure and spawn the API server.
#[derive(Clone)]
pub struct ApiServerBuilder {
    listen: SocketAddr,
    controller: GenerationController,
    store: Arc<dyn MeasurementStore>,
    limits: ApiConfig,
    transport: HubConfig,
    metrics: Option<SharedRegistry>,
}

impl ApiServerBuilder {
    /// Construct a builder with default limits and transport settings.
    pub fn new(controller: GenerationController, store: Arc<dyn MeasurementStore>) -> Self {
        let limits = ApiConfig::default();
        Self {
            listen: limits.listen,
            controller,
            store,
            limits,
            transport: HubConfig::default(),
            metrics: None,
        }
    }

    /// Apply the `[api]` section; this also sets the listen address.
    pub fn with_api_config(mut self, config: ApiConfig) -> Self {
        self.listen = config.listen;
        self.limits = config;
        self
    }

    pub fn with_hub_config(mut self, config: HubConfig) -> Self {
        self.transport = config;
        self
    }

    pub fn with_listen(mut self, listen: SocketAddr) -> Self {
        self.listen = listen;
        self
    }

    /// Attach a Prometheus registry exposed at `/metrics`.
    pub fn with_metrics_registry(mut self, registry: SharedRegistry) -> Self {
        self.metrics = Some(registry);
        self
    }

    /// Assemble the router without binding a socket.
    pub fn router(&self) -> Router {
        let state = Arc::new(ApiState {
            controller: self.controller.clone(),
            store: self.store.clone(),
            limits: self.limits.clone(),
            transport: self.transport.clone(),
        });
        let mut router = Router::new()
            .merge(generation_routes())
            .nest("/api", generation_routes())
            .route("/ws", get(websocket::upgrade_handler))
            .with_state(state);
        if let Some(registry) = &self.metrics {
            router = router.merge(metrics_router(registry.clone()));
        }
        router.layer(TraceLayer::new_for_http())
    }

    /// Spawn the API server and return a handle that can be awaited for shutdown.
    pub async fn spawn(self) -> anyhow::Result<ApiServerHandle> {
        let listener = TcpListener::bind(self.listen).await?;
        let local_addr = listener.local_addr()?;
        info!(address = %local_addr, "api server listening");

        let router = self.router();
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
        let task = tokio::spawn(async move {
            if let Err(err) = server.await {
                warn!(error = %err, "api server exited with error");
            }
        });

        Ok(ApiServerHandle {
            address: local_addr,
            task,
            shutdown: shutdown_tx,
        })
    }
}

/// Handle returned from [`ApiServerBuilder::spawn`].
pub struct ApiServerHandle {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl ApiServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

fn generation_routes() -> Router<Arc<ApiState>> {
    Router::new()
        .route("/generation/start", post(start_generation))
        .route("/generation/stop", post(stop_generation))
        .route("/generation/status", get(generation_status))
        .route("/generation/latest", get(latest_data))
        .route("/generation/history", get(data_history))
}

/// Missing or malformed bodies fall back to defaults field by field, so a
/// wrongly typed `interval` still keeps a valid `chartId`. Negative intervals
/// become zero and are clamped by the controller.
fn parse_start_body(body: &[u8]) -> StartRequest {
    let fields = match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => fields,
        Ok(other) => {
            debug!(body = %other, "start body is not an object; using defaults");
            return StartRequest::default();
        }
        Err(err) => {
            if !body.is_empty() {
                debug!(error = %err, "unreadable start body; using defaults");
            }
            return StartRequest::default();
        }
    };

    let interval_ms = match fields.get("interval") {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_i64() {
            Some(ms) => Some(ms.max(0) as u64),
            None => {
                debug!(interval = %value, "ignoring non-integer interval");
                None
            }
        },
    };
    let chart_id = match fields.get("chartId") {
        None | Some(Value::Null) => None,
        Some(Value::String(chart_id)) => Some(chart_id.clone()),
        Some(value) => {
            debug!(chart_id = %value, "ignoring non-string chartId");
            None
        }
    };
    StartRequest {
        interval_ms,
        chart_id,
    }
}

async fn start_generation(State(state): State<Arc<ApiState>>, body: Bytes) -> Response {
    match state.controller.start(parse_start_body(&body)).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => generation_error(err),
    }
}

async fn stop_generation(State(state): State<Arc<ApiState>>) -> Response {
    match state.controller.stop().await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(err) => generation_error(err),
    }
}

async fn generation_status(State(state): State<Arc<ApiState>>) -> Response {
    Json(state.controller.status().await).into_response()
}

#[derive(Debug, Deserialize)]
struct LatestParams {
    limit: Option<usize>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "chartId")]
    chart_id: Option<String>,
}

async fn latest_data(
    State(state): State<Arc<ApiState>>,
    params: Result<Query<LatestParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let Some(limit) = params.limit.filter(|limit| *limit > 0) else {
        return bad_request("limit is required and must be positive");
    };
    let kind = match parse_kind(params.kind.as_deref()) {
        Ok(kind) => kind,
        Err(response) => return response,
    };

    let query = MeasurementQuery::latest(limit.min(state.limits.latest_limit_max));
    match state.store.query_measurements(&query).await {
        Ok(mut rows) => {
            rows.reverse();
            let chart_id = params.chart_id.unwrap_or_default();
            let data = chart_records(&rows, kind, &chart_id, Utc::now());
            Json(ChartResponse::new(data, kind, chart_id)).into_response()
        }
        Err(err) => storage_error(err),
    }
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    #[serde(rename = "startTime")]
    start_time: Option<String>,
    #[serde(rename = "endTime")]
    end_time: Option<String>,
    limit: Option<usize>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(rename = "chartId")]
    chart_id: Option<String>,
}

async fn data_history(
    State(state): State<Arc<ApiState>>,
    params: Result<Query<HistoryParams>, QueryRejection>,
) -> Response {
    let Query(params) = match params {
        Ok(params) => params,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    let start = match parse_bound("startTime", params.start_time.as_deref()) {
        Ok(start) => start,
        Err(response) => return response,
    };
    let end = match parse_bound("endTime", params.end_time.as_deref()) {
        Ok(end) => end,
        Err(response) => return response,
    };
    let kind = match parse_kind(params.kind.as_deref()) {
        Ok(kind) => kind,
        Err(response) => return response,
    };
    let limit = match params.limit {
        None | Some(0) => state.limits.history_limit_default,
        Some(limit) => limit,
    }
    .min(state.limits.history_limit_max);

    let query = MeasurementQuery::range(start, end, limit);
    match state.store.query_measurements(&query).await {
        Ok(rows) => {
            let chart_id = params.chart_id.unwrap_or_default();
            let data = chart_records(&rows, kind, &chart_id, Utc::now());
            Json(ChartResponse::new(data, kind, chart_id)).into_response()
        }
        Err(err) => storage_error(err),
    }
}

fn parse_kind(raw: Option<&str>) -> Result<Option<SampleKind>, Response> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<SampleKind>()
            .map(Some)
            .map_err(|_| bad_request(format!("type must be current or voltage, got {raw}"))),
    }
}

fn parse_bound(name: &str, raw: Option<&str>) -> Result<Option<DateTime<Utc>>, Response> {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|parsed| Some(parsed.with_timezone(&Utc)))
            .map_err(|err| bad_request(format!("invalid {name}: {err}"))),
    }
}

fn generation_error(err: GenerationError) -> Response {
    let status = match err {
        GenerationError::AlreadyRunning | GenerationError::NotRunning => StatusCode::CONFLICT,
        GenerationError::StorageUnavailable(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(serde_json::json!({ "error": err.to_string() }))).into_response()
}

fn storage_error(err: StorageError) -> Response {
    if let StorageError::InvalidQuery(msg) = &err {
        return bad_request(msg.clone());
    }
    warn!(error = %err, "historical read failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": err.to_string() })),
    )
        .into_response()
}

fn bad_request(msg: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({ "error": msg.into() })),
    )
        .into_response()
}
