//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Shared primitives and utilities for the telemetry runtime."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

/// Number of most recent jitter samples kept for summaries.
pub const JITTER_WINDOW: usize = 4096;

#[derive(Debug, Default)]
pub struct JitterHistogram {
    samples: Mutex<VecDeque<f64>>,
}

impl JitterHistogram {
    pub fn record(&self, jitter: Duration) {
        let micros = jitter.as_secs_f64() * 1_000_000.0;
        let mut samples = self.samples.lock();
        if samples.len() == JITTER_WINDOW {
            samples.pop_front();
        }
        samples.push_back(micros);
    }

    pub fn summary(&self) -> Option<JitterSummary> {
        let mut samples = self.samples.lock();
        let slice: &[f64] = samples.make_contiguous();
        if slice.is_empty() {
            return None;
        }
        let count = slice.len() as f64;
        let mean = slice.iter().sum::<f64>() / count;
        let variance = if slice.len() > 1 {
            let sum_sq = slice
                .iter()
                .map(|value| {
                    let delta = value - mean;
                    delta * delta
                })
                .sum::<f64>();
            sum_sq / (count - 1.0)
        } else {
            0.0
        };
        let max = slice.iter().copied().fold(f64::MIN, f64::max);
        let min = slice.iter().copied().fold(f64::MAX, f64::min);
        Some(JitterSummary {
            mean_us: mean,
            std_dev_us: variance.sqrt(),
            max_us: max,
            min_us: min,
            samples: slice.len() as u64,
        })
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JitterSummary {
    pub mean_us: f64,
    pub std_dev_us: f64,
    pub max_us: f64,
    pub min_us: f64,
    pub samples: u64,
}

/// Measures actual tick spacing against a target period.
///
/// Timestamps are supplied by the caller so the reporter works with both the
/// system clock and tokio's pausable clock.
#[derive(Debug)]
pub struct LoopTimingReporter<I = std::time::Instant> {
    target_interval: Duration,
    last_tick: Mutex<Option<I>>,
    histogram: JitterHistogram,
}

impl<I> LoopTimingReporter<I>
where
    I: Copy + std::ops::Sub<I, Output = Duration>,
{
    pub fn new(target_interval: Duration) -> Self {
        Self {
            target_interval,
            last_tick: Mutex::new(None),
            histogram: JitterHistogram::default(),
        }
    }

    pub fn record_tick(&self, now: I) {
        let mut last_tick = self.last_tick.lock();
        if let Some(previous) = *last_tick {
            let actual = now - previous;
            let jitter = if actual > self.target_interval {
                actual - self.target_interval
            } else {
                self.target_interval - actual
            };
            self.histogram.record(jitter);
        }
        *last_tick = Some(now);
    }

    pub fn histogram(&self) -> &JitterHistogram {
        &self.histogram
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn first_tick_only_primes_reporter() {
        let reporter = LoopTimingReporter::<Instant>::new(Duration::from_millis(20));
        reporter.record_tick(Instant::now());
        assert!(reporter.histogram().summary().is_none());
    }

    #[test]
    fn jitter_is_measured_against_target() {
        let reporter = LoopTimingReporter::<Instant>::new(Duration::from_millis(20));
        let start = Instant::now();
        reporter.record_tick(start);
        reporter.record_tick(start + Duration::from_millis(25));
        reporter.record_tick(start + Duration::from_millis(40));
        let summary = reporter.histogram().summary().unwrap();
        assert_eq!(summary.samples, 2);
        assert!((summary.max_us - 5_000.0).abs() < 1.0);
        assert!((summary.min_us - 5_000.0).abs() < 1.0);
    }

    #[test]
    fn histogram_keeps_recent_window() {
        let histogram = JitterHistogram::default();
        for _ in 0..JITTER_WINDOW + 10 {
            histogram.record(Duration::from_micros(3));
        }
        assert_eq!(
            histogram.summary().unwrap().samples,
            JITTER_WINDOW as u64
        );
    }
}
