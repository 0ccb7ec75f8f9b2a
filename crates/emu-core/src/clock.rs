//! Bridge between the host's high-resolution timer and emulated CPU tacts.
//!
//! The emulated machine runs as fast as the host allows; the bridge is what
//! slows it back down to real time. It converts host counter ticks into CPU
//! tacts and blocks the host thread until a target counter value is reached.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/// Below this much remaining wait time, spin instead of sleeping.
const SLEEP_THRESHOLD: Duration = Duration::from_millis(2);

/// How much earlier than the target a sleep wakes up, to absorb OS jitter.
const SLEEP_SLACK: Duration = Duration::from_millis(1);

#[derive(Debug, Error, PartialEq)]
pub enum ClockError {
    #[error("host counter frequency {0} Hz cannot drive the emulated clock")]
    InvalidHostFrequency(i64),
    #[error("emulated CPU frequency {0} MHz is not a positive finite value")]
    InvalidEmulatedFrequency(f64),
}

/// A raw host timer.
pub trait HostCounter {
    /// Counter ticks per second. Anything `<= 0` is unusable.
    fn frequency(&self) -> i64;

    /// Current raw counter value.
    fn counter(&self) -> u64;
}

/// Host counter backed by [`Instant`], ticking in nanoseconds.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicCounter {
    origin: Instant,
}

impl MonotonicCounter {
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCounter for MonotonicCounter {
    fn frequency(&self) -> i64 {
        1_000_000_000
    }

    fn counter(&self) -> u64 {
        self.origin.elapsed().as_nanos() as u64
    }
}

/// Cooperative cancellation flag shared between the host UI and the
/// emulation thread. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Converts host counter ticks into emulated CPU tacts.
pub struct ClockBridge<C: HostCounter = MonotonicCounter> {
    counter: C,
    emulated_mhz: f64,
    host_frequency: u64,
    /// Counter value captured by the last `reset`.
    baseline: u64,
    /// Host ticks per emulated tact.
    ratio: f64,
}

impl ClockBridge<MonotonicCounter> {
    /// Bridge driven by the process-wide monotonic clock.
    pub fn monotonic(emulated_mhz: f64) -> Result<Self, ClockError> {
        Self::new(MonotonicCounter::new(), emulated_mhz)
    }
}

impl<C: HostCounter> ClockBridge<C> {
    pub fn new(counter: C, emulated_mhz: f64) -> Result<Self, ClockError> {
        if !emulated_mhz.is_finite() || emulated_mhz <= 0.0 {
            return Err(ClockError::InvalidEmulatedFrequency(emulated_mhz));
        }
        let mut bridge = Self {
            counter,
            emulated_mhz,
            host_frequency: 0,
            baseline: 0,
            ratio: 0.0,
        };
        bridge.reset()?;
        Ok(bridge)
    }

    /// Capture the host frequency and a fresh baseline counter value.
    pub fn reset(&mut self) -> Result<(), ClockError> {
        let frequency = self.counter.frequency();
        if frequency <= 0 {
            return Err(ClockError::InvalidHostFrequency(frequency));
        }
        self.host_frequency = frequency as u64;
        self.ratio = frequency as f64 / self.emulated_mhz / 1e6;
        self.baseline = self.counter.counter();
        log::debug!(
            "Clock bridge reset: host {} Hz, {:.3} host ticks per tact",
            self.host_frequency,
            self.ratio
        );
        Ok(())
    }

    /// Raw host counter value.
    #[must_use]
    pub fn native_counter(&self) -> u64 {
        self.counter.counter()
    }

    /// Host counter ticks per second, as captured by the last `reset`.
    #[must_use]
    pub fn host_frequency(&self) -> u64 {
        self.host_frequency
    }

    /// Emulated tacts elapsed since the last `reset`.
    #[must_use]
    pub fn emulated_tick_count(&self) -> u64 {
        let elapsed = self.native_counter().saturating_sub(self.baseline);
        (elapsed as f64 / self.ratio) as u64
    }

    /// Host counter ticks that correspond to `tacts` emulated tacts.
    #[must_use]
    pub fn host_ticks_for_tacts(&self, tacts: u64) -> u64 {
        (tacts as f64 * self.ratio) as u64
    }

    /// Block until the host counter reaches `target`.
    ///
    /// Returns `true` when the target was reached and `false` when the token
    /// was cancelled first.
    pub fn wait_until(&self, target: u64, token: &CancellationToken) -> bool {
        loop {
            if token.is_cancelled() {
                return false;
            }
            let now = self.native_counter();
            if now >= target {
                return true;
            }
            let remaining =
                Duration::from_secs_f64((target - now) as f64 / self.host_frequency as f64);
            if remaining > SLEEP_THRESHOLD {
                thread::sleep(remaining - SLEEP_SLACK);
            } else {
                thread::yield_now();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use test_log::test;

    /// Counter that advances by a fixed step every time it is read.
    struct SteppingCounter {
        frequency: i64,
        value: Cell<u64>,
        step: u64,
    }

    impl SteppingCounter {
        fn new(frequency: i64, step: u64) -> Self {
            Self {
                frequency,
                value: Cell::new(0),
                step,
            }
        }
    }

    impl HostCounter for SteppingCounter {
        fn frequency(&self) -> i64 {
            self.frequency
        }

        fn counter(&self) -> u64 {
            let v = self.value.get();
            self.value.set(v + self.step);
            v
        }
    }

    #[test]
    fn zero_host_frequency_fails_fast() {
        let result = ClockBridge::new(SteppingCounter::new(0, 1), 3.5);
        assert_eq!(result.err(), Some(ClockError::InvalidHostFrequency(0)));
    }

    #[test]
    fn negative_host_frequency_fails_fast() {
        let result = ClockBridge::new(SteppingCounter::new(-10, 1), 3.5);
        assert_eq!(result.err(), Some(ClockError::InvalidHostFrequency(-10)));
    }

    #[test]
    fn non_positive_emulated_frequency_rejected() {
        assert!(ClockBridge::new(SteppingCounter::new(1_000, 1), 0.0).is_err());
        assert!(ClockBridge::new(SteppingCounter::new(1_000, 1), f64::NAN).is_err());
    }

    #[test]
    fn emulated_ticks_follow_frequency_ratio() {
        // 7 MHz host against a 3.5 MHz CPU: two host ticks per tact.
        // Every read advances the counter by 1000 host ticks.
        let bridge = ClockBridge::new(SteppingCounter::new(7_000_000, 1_000), 3.5)
            .expect("valid frequencies");
        // Baseline was read once during reset (value 0); this read returns 1000.
        assert_eq!(bridge.emulated_tick_count(), 500);
        assert_eq!(bridge.host_ticks_for_tacts(69_888), 139_776);
    }

    #[test]
    fn wait_until_reaches_target() {
        let bridge = ClockBridge::new(SteppingCounter::new(1_000_000_000, 10), 3.5)
            .expect("valid frequencies");
        let token = CancellationToken::new();
        assert!(bridge.wait_until(1_000, &token));
        assert!(bridge.native_counter() >= 1_000);
    }

    #[test]
    fn wait_until_observes_cancellation() {
        let bridge = ClockBridge::new(SteppingCounter::new(1_000_000_000, 1), 3.5)
            .expect("valid frequencies");
        let token = CancellationToken::new();
        token.clone().cancel();
        assert!(!bridge.wait_until(u64::MAX, &token));
    }

    #[test]
    fn monotonic_bridge_moves_forward() {
        let bridge = ClockBridge::monotonic(3.5).expect("monotonic clock is usable");
        let target = bridge.native_counter() + 100_000; // 100 microseconds
        assert!(bridge.wait_until(target, &CancellationToken::new()));
        assert!(bridge.emulated_tick_count() >= 350);
    }
}
