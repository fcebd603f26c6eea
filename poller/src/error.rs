//! Error types produced while polling.
//!
//! - [`ConfigError`] rejects a policy before any attempt runs.
//! - [`Failure`] is the reason a single attempt failed.
//! - [`PollError`] is how a whole poll operation ends when it does not resolve.
//!
//! The two timing sentinels render exactly as `timeout` and `masterTimeout`
//! so callers that only see the `Display` form can still branch on them.

use std::time::Duration;

use thiserror::Error;

/// Invalid policy parameters, reported by
/// [`PollPolicyBuilder::build`](crate::PollPolicyBuilder::build).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Exponential backoff cannot satisfy `min <= delay <= max`.
    #[error("exponential-backoff min {min:?} exceeds max {max:?}")]
    InvalidRange {
        /// Lower delay bound.
        min: Duration,
        /// Upper delay bound.
        max: Duration,
    },
}

impl ConfigError {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::InvalidRange { .. } => "config_invalid_range",
        }
    }
}

/// Why one attempt failed.
#[derive(Error, Debug)]
pub enum Failure<E> {
    /// The task itself reported an error.
    #[error("task failed: {0:?}")]
    Task(E),

    /// The attempt did not settle before the per-attempt deadline.
    #[error("timeout")]
    Timeout,

    /// The task panicked, either when called or while its future was polled.
    #[error("task panicked: {0}")]
    Panicked(String),
}

impl<E> Failure<E> {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            Failure::Task(_) => "task_failed",
            Failure::Timeout => "attempt_timeout",
            Failure::Panicked(_) => "task_panicked",
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Failure::Timeout)
    }

    /// The task's own error, if this failure came from the task.
    pub fn task_error(&self) -> Option<&E> {
        match self {
            Failure::Task(err) => Some(err),
            _ => None,
        }
    }

    pub fn into_task_error(self) -> Option<E> {
        match self {
            Failure::Task(err) => Some(err),
            _ => None,
        }
    }
}

/// Why a poll operation did not resolve.
#[derive(Error, Debug)]
pub enum PollError<E> {
    /// Retries were exhausted or the condition declined to continue after a failure.
    ///
    /// Holds every failure in attempt order, not just the last one.
    #[error("gave up after {} failed attempt(s)", .0.len())]
    Rejected(Vec<Failure<E>>),

    /// The master deadline elapsed before the operation settled.
    #[error("masterTimeout")]
    MasterTimeout,

    /// The operation was cancelled through its cancellation token.
    #[error("cancelled")]
    Cancelled,
}

impl<E> PollError<E> {
    /// Short stable label for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            PollError::Rejected(_) => "poll_rejected",
            PollError::MasterTimeout => "poll_master_timeout",
            PollError::Cancelled => "poll_cancelled",
        }
    }

    /// Collected attempt failures; empty for timing or cancellation outcomes.
    pub fn failures(&self) -> &[Failure<E>] {
        match self {
            PollError::Rejected(failures) => failures,
            _ => &[],
        }
    }

    pub fn is_master_timeout(&self) -> bool {
        matches!(self, PollError::MasterTimeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PollError::Cancelled)
    }
}
