//! ---
//! vg_section: "01-core-functionality"
//! vg_subsection: "module"
//! vg_type: "source"
//! vg_scope: "code"
//! vg_description: "Fixed-period tick timer for the generation loop."
//! vg_version: "v0.1.0"
//! vg_owner: "tbd"
//! ---
use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior};

/// Fixed-period ticker whose first tick lands one period after `origin`.
///
/// Late ticks are delayed rather than bunched, so consecutive ticks are never
/// closer than one period.
#[derive(Debug)]
pub struct TickTimer {
    interval: Interval,
    period: Duration,
}

impl TickTimer {
    pub fn new(origin: Instant, period: Duration) -> Self {
        let mut interval = tokio::time::interval_at(origin + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Wait for the next tick and return its scheduled instant.
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn first_tick_waits_one_period() {
        let origin = Instant::now();
        let mut timer = TickTimer::new(origin, Duration::from_millis(20));
        let first = timer.tick().await;
        let second = timer.tick().await;
        assert_eq!(first - origin, Duration::from_millis(20));
        assert_eq!(second - first, timer.period());
    }
}
