//! # Poll policy.
//!
//! [`PollPolicy`] is the immutable, merged configuration of one poll
//! operation. It is produced by [`PollPolicyBuilder::build`], which starts from
//! the defaults of the selected [`StrategyName`], applies every value the caller
//! set explicitly, and validates the result.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use poller::{PollPolicy, Strategy};
//!
//! let policy = PollPolicy::linear_backoff()
//!     .with_increment(Duration::from_millis(250))
//!     .with_retries(3)
//!     .with_attempt_deadline(Duration::from_secs(2))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(
//!     policy.strategy(),
//!     Strategy::LinearBackoff {
//!         start: Duration::from_secs(1),
//!         increment: Duration::from_millis(250),
//!     }
//! );
//! ```

use std::time::Duration;

use crate::{
    error::ConfigError,
    strategy::{Strategy, StrategyName},
};

/// Number of failed attempts tolerated when none is configured.
pub const DEFAULT_RETRIES: u32 = 5;

/// Merged configuration of a poll operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollPolicy {
    strategy: Strategy,
    retries: u32,
    master_deadline: Option<Duration>,
    attempt_deadline: Option<Duration>,
}

impl Default for PollPolicy {
    /// Fixed 1s interval, 5 retries, no deadlines.
    fn default() -> Self {
        Self {
            strategy: Strategy::default(),
            retries: DEFAULT_RETRIES,
            master_deadline: None,
            attempt_deadline: None,
        }
    }
}

impl PollPolicy {
    pub fn builder(name: StrategyName) -> PollPolicyBuilder {
        PollPolicyBuilder::new(name)
    }

    pub fn fixed_interval() -> PollPolicyBuilder {
        Self::builder(StrategyName::FixedInterval)
    }

    pub fn linear_backoff() -> PollPolicyBuilder {
        Self::builder(StrategyName::LinearBackoff)
    }

    pub fn exponential_backoff() -> PollPolicyBuilder {
        Self::builder(StrategyName::ExponentialBackoff)
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Failed attempts tolerated before giving up.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Ceiling on the whole operation. `None` when unset or zero.
    pub fn master_deadline(&self) -> Option<Duration> {
        self.master_deadline
    }

    /// Ceiling on each attempt. `None` when unset or zero.
    pub fn attempt_deadline(&self) -> Option<Duration> {
        self.attempt_deadline
    }
}

/// Collects caller overrides for a [`PollPolicy`].
///
/// Parameters that do not belong to the selected strategy are ignored.
#[derive(Clone, Debug, Default)]
pub struct PollPolicyBuilder {
    name: StrategyName,
    retries: Option<u32>,
    master_deadline: Option<Duration>,
    attempt_deadline: Option<Duration>,
    interval: Option<Duration>,
    start: Option<Duration>,
    increment: Option<Duration>,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl PollPolicyBuilder {
    pub fn new(name: StrategyName) -> Self {
        Self {
            name,
            ..Self::default()
        }
    }

    pub fn with_strategy(mut self, name: StrategyName) -> Self {
        self.name = name;
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn with_master_deadline(mut self, deadline: Duration) -> Self {
        self.master_deadline = Some(deadline);
        self
    }

    pub fn with_attempt_deadline(mut self, deadline: Duration) -> Self {
        self.attempt_deadline = Some(deadline);
        self
    }

    /// fixed-interval delay.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// linear-backoff delay after zero failures.
    pub fn with_start(mut self, start: Duration) -> Self {
        self.start = Some(start);
        self
    }

    /// linear-backoff growth per failure.
    pub fn with_increment(mut self, increment: Duration) -> Self {
        self.increment = Some(increment);
        self
    }

    /// exponential-backoff lower bound.
    pub fn with_min_delay(mut self, min: Duration) -> Self {
        self.min = Some(min);
        self
    }

    /// exponential-backoff upper bound.
    pub fn with_max_delay(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Merge strategy defaults with the explicit values and validate.
    pub fn build(self) -> Result<PollPolicy, ConfigError> {
        let strategy = match self.name.defaults() {
            Strategy::FixedInterval { interval } => Strategy::FixedInterval {
                interval: self.interval.unwrap_or(interval),
            },
            Strategy::LinearBackoff { start, increment } => Strategy::LinearBackoff {
                start: self.start.unwrap_or(start),
                increment: self.increment.unwrap_or(increment),
            },
            Strategy::ExponentialBackoff { min, max } => {
                let min = self.min.unwrap_or(min);
                let max = self.max.unwrap_or(max);
                if min > max {
                    return Err(ConfigError::InvalidRange { min, max });
                }
                Strategy::ExponentialBackoff { min, max }
            }
        };

        Ok(PollPolicy {
            strategy,
            retries: self.retries.unwrap_or(DEFAULT_RETRIES),
            master_deadline: self.master_deadline.filter(|d| !d.is_zero()),
            attempt_deadline: self.attempt_deadline.filter(|d| !d.is_zero()),
        })
    }
}
