//! Timing decorrelation.
//!
//! A deposit event and the session join that follows it must not line up in
//! time, so every join waits a uniformly random delay drawn from the OS
//! random source. The anonymous submission gets its own, shorter jitter.

use std::time::Duration;

use rand::{CryptoRng, Rng, RngCore, rngs::OsRng};

pub const DEFAULT_JOIN_DELAY_MIN: Duration = Duration::from_secs(5);
pub const DEFAULT_JOIN_DELAY_MAX: Duration = Duration::from_secs(35);
pub const DEFAULT_SUBMISSION_JITTER_MAX: Duration = Duration::from_secs(3);

/// Uniform delay window `[min, max]`, millisecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinDelay {
    min: Duration,
    max: Duration,
}

impl Default for JoinDelay {
    fn default() -> Self {
        Self {
            min: DEFAULT_JOIN_DELAY_MIN,
            max: DEFAULT_JOIN_DELAY_MAX,
        }
    }
}

impl JoinDelay {
    /// Bounds are swapped if given in the wrong order.
    pub fn new(min: Duration, max: Duration) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn up_to(max: Duration) -> Self {
        Self::new(Duration::ZERO, max)
    }

    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    pub fn sample(&self) -> Duration {
        self.sample_with_rng(&mut OsRng)
    }

    pub fn sample_with_rng<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if min == max {
            return self.min;
        }
        Duration::from_millis(rng.gen_range(min..=max))
    }

    /// Sleep for a fresh sample. No other side effects.
    pub async fn wait(&self) -> Duration {
        let delay = self.sample();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        delay
    }
}
