//! # Backoff strategies.
//!
//! A [`Strategy`] maps the number of attempts that have *failed* so far to the
//! delay before the next attempt. Exactly three variants exist:
//!
//! | name                  | defaults                    | delay for `n` failures                              |
//! |-----------------------|-----------------------------|-----------------------------------------------------|
//! | `fixed-interval`      | interval = 1s               | `interval`                                          |
//! | `linear-backoff`      | start = 1s, increment = 1s  | `start + increment × n`                             |
//! | `exponential-backoff` | min = 1s, max = 30s         | `min + random × (2^n × 1s − min)`, clamped to `[min, max]` |
//!
//! `n` counts failures only. Successful attempts that keep polling do not
//! advance it, so a run of successes reuses the same delay.

use std::{convert::Infallible, fmt, str::FromStr, time::Duration};

const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);
const DEFAULT_START: Duration = Duration::from_millis(1000);
const DEFAULT_INCREMENT: Duration = Duration::from_millis(1000);
const DEFAULT_MIN: Duration = Duration::from_millis(1000);
const DEFAULT_MAX: Duration = Duration::from_millis(30_000);

/// Unscaled base of exponential growth, in milliseconds.
const EXPONENTIAL_UNIT_MS: f64 = 1000.0;

/// Name of a backoff strategy, as accepted from configuration.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StrategyName {
    #[default]
    FixedInterval,
    LinearBackoff,
    ExponentialBackoff,
}

impl StrategyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyName::FixedInterval => "fixed-interval",
            StrategyName::LinearBackoff => "linear-backoff",
            StrategyName::ExponentialBackoff => "exponential-backoff",
        }
    }

    /// Strategy with this name and its default parameters.
    pub fn defaults(&self) -> Strategy {
        match self {
            StrategyName::FixedInterval => Strategy::FixedInterval {
                interval: DEFAULT_INTERVAL,
            },
            StrategyName::LinearBackoff => Strategy::LinearBackoff {
                start: DEFAULT_START,
                increment: DEFAULT_INCREMENT,
            },
            StrategyName::ExponentialBackoff => Strategy::ExponentialBackoff {
                min: DEFAULT_MIN,
                max: DEFAULT_MAX,
            },
        }
    }
}

impl fmt::Display for StrategyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown names select [`StrategyName::FixedInterval`].
impl FromStr for StrategyName {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "fixed-interval" => StrategyName::FixedInterval,
            "linear-backoff" => StrategyName::LinearBackoff,
            "exponential-backoff" => StrategyName::ExponentialBackoff,
            other => {
                tracing::warn!(strategy = other, "unknown strategy, using fixed-interval");
                StrategyName::FixedInterval
            }
        })
    }
}

/// A backoff strategy with its merged parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    FixedInterval { interval: Duration },
    LinearBackoff { start: Duration, increment: Duration },
    ExponentialBackoff { min: Duration, max: Duration },
}

impl Default for Strategy {
    fn default() -> Self {
        StrategyName::default().defaults()
    }
}

impl Strategy {
    pub fn name(&self) -> StrategyName {
        match self {
            Strategy::FixedInterval { .. } => StrategyName::FixedInterval,
            Strategy::LinearBackoff { .. } => StrategyName::LinearBackoff,
            Strategy::ExponentialBackoff { .. } => StrategyName::ExponentialBackoff,
        }
    }

    /// Delay before the next attempt after `failed` failed attempts.
    pub fn next_interval(&self, failed: u32) -> Duration {
        self.next_interval_with(failed, unit_random())
    }

    /// Like [`next_interval`](Self::next_interval) with an explicit jitter
    /// sample from `[0, 1)`. Only exponential backoff reads it.
    pub fn next_interval_with(&self, failed: u32, sample: f64) -> Duration {
        match *self {
            Strategy::FixedInterval { interval } => interval,
            Strategy::LinearBackoff { start, increment } => {
                start.saturating_add(increment.saturating_mul(failed))
            }
            Strategy::ExponentialBackoff { min, max } => exponential(min, max, failed, sample),
        }
    }
}

fn exponential(min: Duration, max: Duration, failed: u32, sample: f64) -> Duration {
    let min_ms = min.as_secs_f64() * 1000.0;
    let max_ms = max.as_secs_f64() * 1000.0;

    let exp = failed.min(i32::MAX as u32) as i32;
    let base_ms = 2f64.powi(exp) * EXPONENTIAL_UNIT_MS;
    let raw_ms = (min_ms + sample * (base_ms - min_ms)).round();

    // The range collapses or inverts when min exceeds the base, so clamp last.
    if !raw_ms.is_finite() || raw_ms >= max_ms {
        max
    } else if raw_ms <= min_ms {
        min
    } else {
        Duration::from_secs_f64(raw_ms / 1000.0)
    }
}

#[cfg(feature = "rand")]
fn unit_random() -> f64 {
    rand::random::<f64>()
}

#[cfg(not(feature = "rand"))]
fn unit_random() -> f64 {
    0.5
}
