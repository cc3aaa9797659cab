//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Shared primitives and utilities for the telemetry runtime."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;

use crate::logging::LogFormat;

fn default_interval_ms() -> u64 {
    20
}

fn default_min_interval_ms() -> u64 {
    5
}

fn default_max_interval_ms() -> u64 {
    10_000
}

fn default_circuit_id() -> String {
    "circuit_B".to_owned()
}

fn default_sensor_model() -> String {
    "I-Sensor-Pro".to_owned()
}

fn default_listener_capacity() -> usize {
    256
}

fn default_write_timeout() -> Duration {
    Duration::from_millis(1000)
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Journal
}

fn default_journal_path() -> PathBuf {
    PathBuf::from("target/data/current_measurements.jsonl")
}

fn default_memory_retain() -> usize {
    100_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_api_enabled() -> bool {
    true
}

fn default_api_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_latest_limit_max() -> usize {
    1000
}

fn default_history_limit_default() -> usize {
    1000
}

fn default_history_limit_max() -> usize {
    5000
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 9898))
}

/// Primary configuration object for the telemetry daemon.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    /// `None` when no file was found and built-in defaults are in effect.
    pub source: Option<PathBuf>,
}

impl LoadedAppConfig {
    pub fn source_label(&self) -> String {
        match &self.source {
            Some(path) => path.display().to_string(),
            None => "defaults".to_owned(),
        }
    }
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &'static str = "VGRAPH_CONFIG";
    pub const ENV_PREFIX: &'static str = "VGRAPH";

    /// Load configuration, respecting the `VGRAPH_CONFIG` override and
    /// `VGRAPH_<SECTION>__<KEY>` environment overrides.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                if !path.exists() {
                    return Err(anyhow!(
                        "{} points at missing file {}",
                        Self::ENV_CONFIG_PATH,
                        path.display()
                    ));
                }
                let config = Self::layered(Some(&path))?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            let path = candidate.as_ref();
            if path.exists() {
                let config = Self::layered(Some(path))?;
                return Ok(LoadedAppConfig {
                    config,
                    source: Some(path.to_path_buf()),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedAppConfig {
            config: Self::layered(None)?,
            source: None,
        })
    }

    fn layered(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(config_path = %path.display(), "loading configuration");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml));
        }
        builder = builder.add_source(
            Environment::with_prefix(Self::ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        let source = path
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "environment".to_owned());
        let config: AppConfig = builder
            .build()
            .with_context(|| format!("failed to assemble configuration from {source}"))?
            .try_deserialize()
            .with_context(|| format!("failed to parse configuration from {source}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.generation.validate()?;
        self.hub.validate()?;
        self.storage.validate()?;
        self.api.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Session parameters and synthesizer tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_interval_ms")]
    pub max_interval_ms: u64,
    #[serde(default = "default_circuit_id")]
    pub circuit_id: String,
    #[serde(default = "default_sensor_model")]
    pub sensor_model: String,
    /// Fixed noise seed. When unset each session seeds from the wall clock.
    #[serde(default)]
    pub noise_seed: Option<u64>,
    #[serde(default)]
    pub waveform: WaveformConfig,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            max_interval_ms: default_max_interval_ms(),
            circuit_id: default_circuit_id(),
            sensor_model: default_sensor_model(),
            noise_seed: None,
            waveform: WaveformConfig::default(),
        }
    }
}

impl GenerationConfig {
    /// Resolve a requested tick period into the configured bounds.
    pub fn clamp_interval_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.default_interval_ms)
            .clamp(self.min_interval_ms, self.max_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.min_interval_ms == 0 {
            return Err(anyhow!("generation.min_interval_ms must be positive"));
        }
        if !(self.min_interval_ms <= self.default_interval_ms
            && self.default_interval_ms <= self.max_interval_ms)
        {
            return Err(anyhow!(
                "generation interval bounds must satisfy min ({}) <= default ({}) <= max ({})",
                self.min_interval_ms,
                self.default_interval_ms,
                self.max_interval_ms
            ));
        }
        self.waveform.validate()
    }
}

/// Constants driving the synthetic current/voltage waveform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    pub base_min_current: f64,
    pub base_max_current: f64,
    pub base_min_voltage: f64,
    pub base_max_voltage: f64,
    pub current_frequency_hz: f64,
    pub voltage_frequency_hz: f64,
    pub current_amplitude: f64,
    pub voltage_amplitude: f64,
    /// Overload windows are centred on odd multiples of this period.
    pub overload_period_s: f64,
    pub overload_half_width_s: f64,
    pub current_overload_values: Vec<f64>,
    pub voltage_overload_values: Vec<f64>,
    pub current_jitter: f64,
    pub voltage_jitter: f64,
    pub current_sigma: f64,
    pub voltage_sigma: f64,
    pub spike_frequency_hz: f64,
    pub spike_threshold: f64,
    pub spike_probability: f64,
    pub spike_amplitude: f64,
    pub trend_frequency_hz: f64,
    pub trend_amplitude: f64,
    pub current_clamp_margin: f64,
    pub voltage_clamp_margin: f64,
    pub sawtooth_every_s: f64,
    pub sawtooth_window_s: f64,
    pub fast_sine_every_s: f64,
    pub fast_sine_window_s: f64,
    pub fast_sine_frequency_hz: f64,
    pub fast_sine_amplitude: f64,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            base_min_current: 1.8,
            base_max_current: 2.6,
            base_min_voltage: 2.0,
            base_max_voltage: 10.0,
            current_frequency_hz: 0.5,
            voltage_frequency_hz: 0.3,
            current_amplitude: 0.4,
            voltage_amplitude: 3.0,
            overload_period_s: 5.0,
            overload_half_width_s: 0.5,
            current_overload_values: vec![9.123, 0.045, 8.765, 0.123, 7.891, 0.234, 10.456, 0.067],
            voltage_overload_values: vec![0.5, 15.0, 0.1, 18.0, 0.05, 20.0, 0.01, 25.0],
            current_jitter: 0.1,
            voltage_jitter: 0.2,
            current_sigma: 0.02,
            voltage_sigma: 0.05,
            spike_frequency_hz: 2.0,
            spike_threshold: 0.9,
            spike_probability: 0.3,
            spike_amplitude: 0.2,
            trend_frequency_hz: 0.1,
            trend_amplitude: 0.5,
            current_clamp_margin: 0.5,
            voltage_clamp_margin: 1.0,
            sawtooth_every_s: 30.0,
            sawtooth_window_s: 2.0,
            fast_sine_every_s: 45.0,
            fast_sine_window_s: 5.0,
            fast_sine_frequency_hz: 5.0,
            fast_sine_amplitude: 0.3,
        }
    }
}

impl WaveformConfig {
    pub fn mid_current(&self) -> f64 {
        (self.base_min_current + self.base_max_current) / 2.0
    }

    pub fn mid_voltage(&self) -> f64 {
        (self.base_min_voltage + self.base_max_voltage) / 2.0
    }

    pub fn validate(&self) -> Result<()> {
        if self.current_overload_values.is_empty() {
            return Err(anyhow!("waveform overload tables must not be empty"));
        }
        if self.current_overload_values.len() != self.voltage_overload_values.len() {
            return Err(anyhow!(
                "waveform overload tables differ in length ({} current vs {} voltage)",
                self.current_overload_values.len(),
                self.voltage_overload_values.len()
            ));
        }
        if self.base_min_current > self.base_max_current
            || self.base_min_voltage > self.base_max_voltage
        {
            return Err(anyhow!("waveform base ranges must have min <= max"));
        }
        if self.current_clamp_margin < 0.0 || self.voltage_clamp_margin < 0.0 {
            return Err(anyhow!("waveform clamp margins must be non-negative"));
        }
        if self.overload_period_s <= 0.0
            || self.sawtooth_every_s <= 0.0
            || self.sawtooth_window_s <= 0.0
            || self.fast_sine_every_s <= 0.0
        {
            return Err(anyhow!("waveform periods must be positive"));
        }
        Ok(())
    }
}

/// Fan-out settings for connected listeners.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Samples queued per listener before it is considered stalled.
    #[serde(default = "default_listener_capacity")]
    pub listener_capacity: usize,
    #[serde(default = "default_write_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub write_timeout: Duration,
    /// Echo listener frames back to the sender. Debug only.
    #[serde(default)]
    pub echo_inbound: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            listener_capacity: default_listener_capacity(),
            write_timeout: default_write_timeout(),
            echo_inbound: false,
        }
    }
}

impl HubConfig {
    pub fn validate(&self) -> Result<()> {
        if self.listener_capacity == 0 {
            return Err(anyhow!("hub.listener_capacity must be positive"));
        }
        if self.write_timeout.is_zero() {
            return Err(anyhow!("hub.write_timeout must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Journal,
    Memory,
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "journal" => Ok(StorageBackend::Journal),
            "memory" => Ok(StorageBackend::Memory),
            other => Err(format!("unknown storage backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_backend")]
    pub backend: StorageBackend,
    #[serde(default = "default_journal_path")]
    pub journal_path: PathBuf,
    #[serde(default = "default_memory_retain")]
    pub memory_retain: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_storage_backend(),
            journal_path: default_journal_path(),
            memory_retain: default_memory_retain(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.queue_capacity == 0 {
            return Err(anyhow!("storage.queue_capacity must be positive"));
        }
        if self.backend == StorageBackend::Memory && self.memory_retain == 0 {
            return Err(anyhow!("storage.memory_retain must be positive"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_enabled")]
    pub enabled: bool,
    #[serde(default = "default_api_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_latest_limit_max")]
    pub latest_limit_max: usize,
    #[serde(default = "default_history_limit_default")]
    pub history_limit_default: usize,
    #[serde(default = "default_history_limit_max")]
    pub history_limit_max: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: default_api_enabled(),
            listen: default_api_listen(),
            latest_limit_max: default_latest_limit_max(),
            history_limit_default: default_history_limit_default(),
            history_limit_max: default_history_limit_max(),
        }
    }
}

impl ApiConfig {
    pub fn validate(&self) -> Result<()> {
        if self.latest_limit_max == 0 || self.history_limit_max == 0 {
            return Err(anyhow!("api read limits must be positive"));
        }
        if self.history_limit_default > self.history_limit_max {
            return Err(anyhow!(
                "api.history_limit_default ({}) exceeds api.history_limit_max ({})",
                self.history_limit_default,
                self.history_limit_max
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}
