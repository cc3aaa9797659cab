//! ---
//! vg_section: "03-persistence-logging"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Metrics collection and export utilities."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Router exposing the registry at `/metrics`, for merging into another app.
pub fn metrics_router(registry: SharedRegistry) -> Router {
    Router::new().route(
        "/metrics",
        get(move || metrics_handler(registry.clone())),
    )
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = metrics_router(registry);

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let local_addr = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Prometheus scrape endpoint.
async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"))],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the generation controller and broadcast hub.
#[derive(Clone, Debug)]
pub struct GenerationMetrics {
    registry: SharedRegistry,
    session_active: IntGauge,
    ticks_total: IntCounter,
    samples_published: IntCounterVec,
    listeners: IntGauge,
    listener_evictions: IntCounterVec,
    tick_duration: Histogram,
}

impl GenerationMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let session_active = IntGauge::with_opts(Opts::new(
            "vgraph_session_active",
            "Indicator (0/1) whether a generation session is running",
        ))?;
        registry.register(Box::new(session_active.clone()))?;

        let ticks_total = IntCounter::with_opts(Opts::new(
            "vgraph_ticks_total",
            "Total number of generation ticks across all sessions",
        ))?;
        registry.register(Box::new(ticks_total.clone()))?;

        let samples_published = IntCounterVec::new(
            Opts::new(
                "vgraph_samples_published_total",
                "Samples handed to the broadcast hub by kind",
            ),
            &["kind"],
        )?;
        registry.register(Box::new(samples_published.clone()))?;

        let listeners = IntGauge::with_opts(Opts::new(
            "vgraph_listeners",
            "Number of listeners currently registered with the hub",
        ))?;
        registry.register(Box::new(listeners.clone()))?;

        let listener_evictions = IntCounterVec::new(
            Opts::new(
                "vgraph_listener_evictions_total",
                "Listeners removed by the hub, by reason",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(listener_evictions.clone()))?;

        let buckets = prometheus::exponential_buckets(0.00005, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "vgraph_tick_duration_seconds",
                "Time spent synthesizing and dispatching one tick",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Self {
            registry,
            session_active,
            ticks_total,
            samples_published,
            listeners,
            listener_evictions,
            tick_duration,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn set_session_active(&self, active: bool) {
        self.session_active.set(i64::from(active));
    }

    pub fn observe_tick(&self, seconds: f64) {
        self.ticks_total.inc();
        self.tick_duration.observe(seconds);
    }

    pub fn record_published(&self, kind: &str) {
        self.samples_published.with_label_values(&[kind]).inc();
    }

    pub fn set_listeners(&self, count: usize) {
        self.listeners.set(count as i64);
    }

    pub fn record_eviction(&self, reason: &str) {
        self.listener_evictions.with_label_values(&[reason]).inc();
    }
}

pub use prometheus;
