//! Repeating timers for the poll loop and the pulse driver
//!
//! Both loops use `tokio::time::Interval`: the first tick completes
//! immediately and later deadlines sit on the `start + n * period` grid, so
//! jitter in a tick handler never accumulates. Ticks missed by more than a
//! period are skipped rather than fired back to back.

use huertbeat_common::{Error, Result};
use std::time::Duration;
use tokio::time::{Interval, MissedTickBehavior};

/// Interval with a validated period and skip-on-miss behavior
///
/// `tokio::time::interval` panics on a zero period; this returns an error
/// instead.
pub fn interval(period: Duration) -> Result<Interval> {
    if period.is_zero() {
        return Err(Error::InvalidInput(
            "timer period must be positive".to_string(),
        ));
    }
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn assert_close(actual: Instant, expected: Instant) {
        let diff = if actual > expected {
            actual - expected
        } else {
            expected - actual
        };
        assert!(
            diff <= Duration::from_millis(2),
            "tick off by {:?}",
            diff
        );
    }

    #[tokio::test]
    async fn test_zero_period_rejected() {
        assert!(interval(Duration::ZERO).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_tick_is_immediate() {
        let start = Instant::now();
        let mut timer = interval(Duration::from_secs(1)).unwrap();

        timer.tick().await;
        assert_close(Instant::now(), start);

        timer.tick().await;
        assert_close(Instant::now(), start + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_does_not_accumulate() {
        let period = Duration::from_millis(100);
        let mut timer = interval(period).unwrap();
        let start = Instant::now();

        for n in 0..20u32 {
            timer.tick().await;
            assert_close(Instant::now(), start + period * n);
            // Simulated per-tick work of varying length, always below one period
            tokio::time::sleep(Duration::from_millis(u64::from(n % 4) * 20)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrun_skips_missed_ticks() {
        let period = Duration::from_millis(100);
        let mut timer = interval(period).unwrap();
        let start = Instant::now();

        timer.tick().await; // t = 0
        timer.tick().await; // t = 100
        tokio::time::sleep(Duration::from_millis(250)).await; // handler overran to t = 350

        // One late tick for the missed deadlines, not one per deadline
        timer.tick().await;
        assert_close(Instant::now(), start + Duration::from_millis(350));

        // Then back on the original grid
        timer.tick().await;
        assert_close(Instant::now(), start + period * 4);

        for _ in 5..10 {
            timer.tick().await;
        }
        assert_close(Instant::now(), start + period * 9);
    }
}
