//! ---
//! vg_section: "02-generation"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Synthetic current/voltage waveform with overload and feature overlays."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use vgraph_common::config::WaveformConfig;
use vgraph_common::time::round_to;

use crate::noise::NoiseSource;
use crate::sample::Reading;

/// Produces one reading per tick from elapsed session time.
///
/// Layering, in order:
/// 1. base sinusoids for current and voltage;
/// 2. overload windows substitute an entry of the anomaly tables;
/// 3. outside overload windows, uniform jitter, a probabilistic spike, a slow
///    voltage trend and gaussian noise are added, then values are clamped
///    around the base ranges and rounded to three decimals;
/// 4. a sawtooth overlay, then a fast-sine overlay, perturb the result.
pub struct WaveformSynthesizer {
    profile: WaveformConfig,
    noise: Box<dyn NoiseSource>,
}

impl std::fmt::Debug for WaveformSynthesizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaveformSynthesizer")
            .field("profile", &self.profile)
            .finish_non_exhaustive()
    }
}

impl WaveformSynthesizer {
    pub fn new(profile: WaveformConfig, noise: Box<dyn NoiseSource>) -> Self {
        Self { profile, noise }
    }

    pub fn profile(&self) -> &WaveformConfig {
        &self.profile
    }

    /// Synthesize the reading for `counter` at `elapsed_seconds`, stamped now.
    pub fn synthesize(&mut self, counter: u64, elapsed_seconds: f64) -> Reading {
        self.synthesize_at(counter, elapsed_seconds, Utc::now())
    }

    /// Like [`synthesize`](Self::synthesize) with an explicit timestamp.
    ///
    /// Overload-table values are returned as-is and never clamped to the
    /// nominal band, so anomalies stay out of range.
    pub fn synthesize_at(
        &mut self,
        counter: u64,
        elapsed_seconds: f64,
        timestamp: DateTime<Utc>,
    ) -> Reading {
        let t = elapsed_seconds;
        let p = &self.profile;

        let (mut current, mut voltage, overload) = match self.overload_index(counter, t) {
            Some(index) => (
                p.current_overload_values[index],
                p.voltage_overload_values[index],
                true,
            ),
            None => {
                let (current, voltage) = self.noisy_base(t);
                (current, voltage, false)
            }
        };

        let p = &self.profile;
        if t % p.sawtooth_every_s < p.sawtooth_window_s {
            let ramp = (t % p.sawtooth_window_s) / p.sawtooth_window_s;
            current = p.base_min_current + (p.base_max_current - p.base_min_current) * ramp;
            voltage = p.base_min_voltage + (p.base_max_voltage - p.base_min_voltage) * (1.0 - ramp);
        }

        if t % p.fast_sine_every_s < p.fast_sine_window_s {
            let fast = (2.0 * PI * p.fast_sine_frequency_hz * t).sin() * p.fast_sine_amplitude;
            current += fast;
            voltage -= fast * 2.0;
        }

        Reading {
            current,
            voltage,
            overload,
            timestamp,
        }
    }

    /// Whether `elapsed_seconds` falls in an overload window: a band of
    /// `±overload_half_width_s` around odd multiples of `overload_period_s`.
    pub fn in_overload_window(&self, elapsed_seconds: f64) -> bool {
        let p = &self.profile;
        let phase = elapsed_seconds % (p.overload_period_s * 2.0);
        phase >= p.overload_period_s - p.overload_half_width_s
            && phase < p.overload_period_s + p.overload_half_width_s
    }

    /// Anomaly table entry selected for this tick, if in an overload window.
    pub fn overload_index(&self, counter: u64, elapsed_seconds: f64) -> Option<usize> {
        if !self.in_overload_window(elapsed_seconds) {
            return None;
        }
        let len = self.profile.current_overload_values.len() as u64;
        Some((counter % len) as usize)
    }

    fn noisy_base(&mut self, t: f64) -> (f64, f64) {
        let p = &self.profile;
        let base_current =
            p.mid_current() + (2.0 * PI * p.current_frequency_hz * t).sin() * p.current_amplitude;
        let base_voltage =
            p.mid_voltage() + (2.0 * PI * p.voltage_frequency_hz * t).sin() * p.voltage_amplitude;
        let spike_chance = (2.0 * PI * p.spike_frequency_hz * t).sin();
        let trend = (2.0 * PI * p.trend_frequency_hz * t).sin() * p.trend_amplitude;

        let mut current_noise = (self.noise.uniform() - 0.5) * p.current_jitter;
        if spike_chance > p.spike_threshold && self.noise.uniform() < p.spike_probability {
            current_noise += self.noise.uniform() * p.spike_amplitude;
        }
        let voltage_noise = (self.noise.uniform() - 0.5) * p.voltage_jitter;

        let current = base_current + current_noise + self.noise.gaussian() * p.current_sigma;
        let voltage =
            base_voltage + voltage_noise + trend + self.noise.gaussian() * p.voltage_sigma;

        let current = current.clamp(
            p.base_min_current - p.current_clamp_margin,
            p.base_max_current + p.current_clamp_margin,
        );
        let voltage = voltage.clamp(
            p.base_min_voltage - p.voltage_clamp_margin,
            p.base_max_voltage + p.voltage_clamp_margin,
        );
        (round_to(current, 3), round_to(voltage, 3))
    }
}
