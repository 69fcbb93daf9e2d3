use crate::config::DEFAULT_REFRESH_HZ;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::warn;

/// Paces the frame loop. One tick per displayed frame.
#[async_trait]
pub trait RefreshClock: Send {
    /// Wait until the next display refresh.
    async fn next_refresh(&mut self);
}

/// Ticks at a fixed refresh rate. Late ticks push the schedule back instead
/// of bursting to catch up.
pub struct IntervalClock {
    interval: Interval,
}

impl IntervalClock {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    /// A clock for a display refreshing `hz` times per second.
    ///
    /// A rate that is not a positive finite number, or too high to give a
    /// non-zero period, falls back to [`DEFAULT_REFRESH_HZ`].
    pub fn from_hz(hz: f64) -> Self {
        Self::new(refresh_period(hz).unwrap_or_else(|| {
            warn!(
                "Invalid refresh rate {} Hz, falling back to {} Hz",
                hz, DEFAULT_REFRESH_HZ
            );
            Duration::from_secs_f64(1.0 / DEFAULT_REFRESH_HZ)
        }))
    }

    pub fn period(&self) -> Duration {
        self.interval.period()
    }
}

fn refresh_period(hz: f64) -> Option<Duration> {
    if !hz.is_finite() || hz <= 0.0 {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / hz)
        .ok()
        .filter(|period| !period.is_zero())
}

#[async_trait]
impl RefreshClock for IntervalClock {
    async fn next_refresh(&mut self) {
        self.interval.tick().await;
    }
}

/// Hands control back to the executor once per tick and otherwise runs as
/// fast as inference allows.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldClock;

#[async_trait]
impl RefreshClock for YieldClock {
    async fn next_refresh(&mut self) {
        tokio::task::yield_now().await;
    }
}

/// How a scheduler paces its iterations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Pacing {
    /// Synchronize to a display refreshing this many times per second
    Display { hz: f64 },
    /// Run the next iteration as soon as the executor gets to it
    Immediate,
}

impl Pacing {
    pub fn clock(&self) -> Box<dyn RefreshClock> {
        match *self {
            Pacing::Display { hz } => Box::new(IntervalClock::from_hz(hz)),
            Pacing::Immediate => Box::new(YieldClock),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_interval_clock_ticks_at_rate() {
        let mut clock = IntervalClock::from_hz(50.0);
        let start = tokio::time::Instant::now();
        // the first tick completes immediately
        clock.next_refresh().await;
        clock.next_refresh().await;
        clock.next_refresh().await;
        assert_eq!(start.elapsed(), Duration::from_millis(40));
    }

    #[tokio::test]
    async fn test_invalid_rate_uses_default() {
        let default = Duration::from_secs_f64(1.0 / DEFAULT_REFRESH_HZ);
        for hz in [0.0, -30.0, f64::NAN, f64::INFINITY, 1e300] {
            assert_eq!(IntervalClock::from_hz(hz).period(), default, "{hz}");
        }
        assert_eq!(
            IntervalClock::from_hz(50.0).period(),
            Duration::from_millis(20)
        );
    }
}
