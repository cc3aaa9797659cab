//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Single-session generation state machine and tick loop."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;
use vgraph_common::config::GenerationConfig;
use vgraph_common::metrics::LoopTimingReporter;
use vgraph_common::time::jitter_us;
use vgraph_metrics::GenerationMetrics;
use vgraph_sim::{NoiseSource, SeededNoise, WaveformSynthesizer};
use vgraph_storage::{Measurement, MeasurementStore, PersistenceSink};

use crate::error::{GenerationError, Result};
use crate::hub::BroadcastHub;
use crate::scheduling::TickTimer;

/// Builds the noise source handed to each new session's synthesizer.
pub type NoiseFactory = Arc<dyn Fn() -> Box<dyn NoiseSource> + Send + Sync>;

const STARTED_MESSAGE: &str = "Data generation started";
const STOPPED_MESSAGE: &str = "Data generation stopped";
const STATUS_MESSAGE: &str = "Current generation status";

/// Parameters accepted by [`GenerationController::start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    /// Requested tick period; `None` selects the configured default.
    pub interval_ms: Option<u64>,
    pub chart_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartOutcome {
    pub message: String,
    pub status: &'static str,
    /// Effective tick period after clamping.
    pub interval: u64,
    #[serde(rename = "sessionId")]
    pub session_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StopOutcome {
    pub message: String,
    pub status: &'static str,
    /// Ticks completed by the session that was stopped.
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetails {
    pub session_id: Uuid,
    pub chart_id: String,
    pub interval: u64,
    pub started_at: DateTime<Utc>,
    pub ticks: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    pub is_generating: bool,
    pub status: &'static str,
    pub clients: usize,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionDetails>,
}

#[derive(Debug, Clone)]
struct SessionInfo {
    session_id: Uuid,
    chart_id: String,
    interval_ms: u64,
    started_at: DateTime<Utc>,
}

struct ActiveSession {
    info: SessionInfo,
    ticks: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

enum ControllerState {
    Idle,
    Running(ActiveSession),
}

struct ControllerInner {
    config: GenerationConfig,
    hub: BroadcastHub,
    store: Arc<dyn MeasurementStore>,
    sink: Arc<PersistenceSink>,
    noise: NoiseFactory,
    metrics: Option<GenerationMetrics>,
    state: Mutex<ControllerState>,
}

/// Owns at most one generation session.
///
/// Start, stop and status serialize on one async mutex; the session loop runs
/// on its own task and is cancelled cooperatively at tick boundaries.
#[derive(Clone)]
pub struct GenerationController {
    inner: Arc<ControllerInner>,
}

/// Builder for [`GenerationController`].
pub struct GenerationControllerBuilder {
    config: GenerationConfig,
    hub: BroadcastHub,
    store: Arc<dyn MeasurementStore>,
    sink: Arc<PersistenceSink>,
    noise: Option<NoiseFactory>,
    metrics: Option<GenerationMetrics>,
}

impl GenerationControllerBuilder {
    /// Override how each session's noise source is created.
    pub fn noise_factory(mut self, factory: NoiseFactory) -> Self {
        self.noise = Some(factory);
        self
    }

    pub fn metrics(mut self, metrics: Option<GenerationMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> GenerationController {
        let noise = self.noise.unwrap_or_else(|| default_noise(self.config.noise_seed));
        GenerationController {
            inner: Arc::new(ControllerInner {
                config: self.config,
                hub: self.hub,
                store: self.store,
                sink: self.sink,
                noise,
                metrics: self.metrics,
                state: Mutex::new(ControllerState::Idle),
            }),
        }
    }
}

fn default_noise(seed: Option<u64>) -> NoiseFactory {
    match seed {
        Some(seed) => {
            Arc::new(move || Box::new(SeededNoise::from_seed(seed)) as Box<dyn NoiseSource>)
        }
        None => Arc::new(|| Box::new(SeededNoise::from_clock()) as Box<dyn NoiseSource>),
    }
}

impl GenerationController {
    pub fn builder(
        config: GenerationConfig,
        hub: BroadcastHub,
        store: Arc<dyn MeasurementStore>,
        sink: Arc<PersistenceSink>,
    ) -> GenerationControllerBuilder {
        GenerationControllerBuilder {
            config,
            hub,
            store,
            sink,
            noise: None,
            metrics: None,
        }
    }

    pub fn hub(&self) -> &BroadcastHub {
        &self.inner.hub
    }

    pub fn config(&self) -> &GenerationConfig {
        &self.inner.config
    }

    /// `Idle -> Running`.
    pub async fn start(&self, request: StartRequest) -> Result<StartOutcome> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if let ControllerState::Running(active) = &*state {
            warn!(
                session_id = %active.info.session_id,
                "start rejected: generation already running"
            );
            return Err(GenerationError::AlreadyRunning);
        }
        if let Err(err) = inner.store.ping().await {
            warn!(error = %err, "start rejected: storage unavailable");
            return Err(GenerationError::StorageUnavailable(err.to_string()));
        }

        let interval_ms = inner.config.clamp_interval_ms(request.interval_ms);
        let info = SessionInfo {
            session_id: Uuid::new_v4(),
            chart_id: request.chart_id.unwrap_or_default(),
            interval_ms,
            started_at: Utc::now(),
        };
        let ticks = Arc::new(AtomicU64::new(0));
        let cancel = CancellationToken::new();
        let session = SessionLoop {
            info: info.clone(),
            origin: Instant::now(),
            synthesizer: WaveformSynthesizer::new(inner.config.waveform.clone(), (inner.noise)()),
            hub: inner.hub.clone(),
            sink: inner.sink.clone(),
            circuit_id: inner.config.circuit_id.clone(),
            sensor_model: inner.config.sensor_model.clone(),
            ticks: ticks.clone(),
            cancel: cancel.clone(),
            metrics: inner.metrics.clone(),
        };
        let task = tokio::spawn(session.run());

        if let Some(metrics) = &inner.metrics {
            metrics.set_session_active(true);
        }
        info!(
            session_id = %info.session_id,
            chart_id = %info.chart_id,
            interval_ms,
            requested_interval_ms = ?request.interval_ms,
            "generation started"
        );

        let outcome = StartOutcome {
            message: STARTED_MESSAGE.to_owned(),
            status: "running",
            interval: interval_ms,
            session_id: info.session_id,
        };
        *state = ControllerState::Running(ActiveSession {
            info,
            ticks,
            cancel,
            task,
        });
        Ok(outcome)
    }

    /// `Running -> Idle`. Returns once the session loop has exited.
    pub async fn stop(&self) -> Result<StopOutcome> {
        let mut state = self.inner.state.lock().await;
        let active = match std::mem::replace(&mut *state, ControllerState::Idle) {
            ControllerState::Running(active) => active,
            ControllerState::Idle => {
                info!("stop rejected: generation not running");
                return Err(GenerationError::NotRunning);
            }
        };

        active.cancel.cancel();
        if let Err(err) = active.task.await {
            warn!(session_id = %active.info.session_id, error = %err, "generation task failed");
        }
        if let Some(metrics) = &self.inner.metrics {
            metrics.set_session_active(false);
        }

        let ticks = active.ticks.load(Ordering::SeqCst);
        info!(
            session_id = %active.info.session_id,
            chart_id = %active.info.chart_id,
            ticks,
            "generation stopped"
        );
        Ok(StopOutcome {
            message: STOPPED_MESSAGE.to_owned(),
            status: "stopped",
            ticks,
        })
    }

    pub async fn status(&self) -> GenerationStatus {
        let state = self.inner.state.lock().await;
        let session = match &*state {
            ControllerState::Idle => None,
            ControllerState::Running(active) => Some(SessionDetails {
                session_id: active.info.session_id,
                chart_id: active.info.chart_id.clone(),
                interval: active.info.interval_ms,
                started_at: active.info.started_at,
                ticks: active.ticks.load(Ordering::SeqCst),
            }),
        };
        let is_generating = session.is_some();
        GenerationStatus {
            is_generating,
            status: if is_generating { "running" } else { "stopped" },
            clients: self.inner.hub.listener_count(),
            message: STATUS_MESSAGE.to_owned(),
            session,
        }
    }

    /// Stop the active session, if any.
    pub async fn shutdown(&self) {
        match self.stop().await {
            Ok(outcome) => debug!(ticks = outcome.ticks, "session stopped during shutdown"),
            Err(GenerationError::NotRunning) => {}
            Err(err) => warn!(error = %err, "failed to stop session during shutdown"),
        }
    }
}

impl std::fmt::Debug for GenerationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationController")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

struct SessionLoop {
    info: SessionInfo,
    origin: Instant,
    synthesizer: WaveformSynthesizer,
    hub: BroadcastHub,
    sink: Arc<PersistenceSink>,
    circuit_id: String,
    sensor_model: String,
    ticks: Arc<AtomicU64>,
    cancel: CancellationToken,
    metrics: Option<GenerationMetrics>,
}

impl SessionLoop {
    async fn run(mut self) {
        let period = Duration::from_millis(self.info.interval_ms);
        let mut timer = TickTimer::new(self.origin, period);
        let reporter = LoopTimingReporter::<Instant>::new(period);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(session_id = %self.info.session_id, "session cancellation observed");
                    break;
                }
                scheduled = timer.tick() => {
                    reporter.record_tick(Instant::now());
                    self.tick(scheduled);
                }
            }
        }

        if let Some(summary) = reporter.histogram().summary() {
            debug!(
                session_id = %self.info.session_id,
                mean_jitter_us = summary.mean_us,
                max_jitter_us = summary.max_us,
                samples = summary.samples,
                "session tick jitter"
            );
        }
    }

    fn tick(&mut self, scheduled: Instant) {
        let began = Instant::now();
        let counter = self.ticks.load(Ordering::SeqCst);
        let elapsed = began.duration_since(self.origin).as_secs_f64();
        let reading = self.synthesizer.synthesize(counter, elapsed);

        for sample in reading.samples(elapsed, &self.info.chart_id) {
            let kind = sample.kind;
            match self.hub.publish(sample) {
                Ok(()) => {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_published(kind.as_ref());
                    }
                }
                Err(err) => debug!(tick = counter, error = %err, "sample not published"),
            }
        }

        let row = Measurement {
            id: None,
            measurement_time: reading.timestamp,
            current_value: reading.current,
            voltage_value: reading.voltage,
            circuit_id: self.circuit_id.clone(),
            sensor_model: self.sensor_model.clone(),
            is_overload: reading.overload,
        };
        if let Err(err) = self.sink.record(row) {
            warn!(
                session_id = %self.info.session_id,
                tick = counter,
                error = %err,
                "measurement not queued for persistence"
            );
        }

        self.ticks.store(counter + 1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.observe_tick(began.elapsed().as_secs_f64());
        }
        trace!(
            session_id = %self.info.session_id,
            tick = counter,
            elapsed_s = elapsed,
            lateness_us = jitter_us(
                began.duration_since(self.origin),
                scheduled.duration_since(self.origin)
            ),
            overload = reading.overload,
            "tick"
        );
    }
}
