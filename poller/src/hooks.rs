//! Optional observers of a poll operation.
//!
//! Both hooks default to a no-op type, so an operation without them does no
//! extra work.

use std::time::Duration;

use crate::{
    error::{Failure, PollError},
    strategy::StrategyName,
};

/// Notified each time a failed attempt consumes a retry and another attempt
/// is about to be scheduled.
///
/// Implemented for `FnMut(u32, &Failure<E>)`, where the first argument is the
/// number of failed attempts so far.
pub trait Progress<E> {
    fn on_retry(&mut self, failed: u32, failure: &Failure<E>);
}

/// No progress notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl<E> Progress<E> for NoProgress {
    fn on_retry(&mut self, _: u32, _: &Failure<E>) {}
}

impl<F, E> Progress<E> for F
where
    F: FnMut(u32, &Failure<E>),
{
    fn on_retry(&mut self, failed: u32, failure: &Failure<E>) {
        self(failed, failure)
    }
}

/// Context handed to a [`Reporter`] along with the final error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
    /// Attempts started, including one interrupted by a deadline or cancellation.
    pub attempts: u32,
    /// Attempts that failed.
    pub failed: u32,
    /// Time from the start of the operation to settlement.
    pub elapsed: Duration,
    pub strategy: StrategyName,
}

/// Receives the error of an operation that did not resolve, exactly once.
///
/// This is the hand-off point to whatever surfaces errors to users.
/// Implemented for `FnMut(&PollError<E>, &Report)`.
pub trait Reporter<E> {
    fn report(&mut self, error: &PollError<E>, report: &Report);
}

/// Errors are only returned, not reported.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoReport;

impl<E> Reporter<E> for NoReport {
    fn report(&mut self, _: &PollError<E>, _: &Report) {}
}

impl<F, E> Reporter<E> for F
where
    F: FnMut(&PollError<E>, &Report),
{
    fn report(&mut self, error: &PollError<E>, report: &Report) {
        self(error, report)
    }
}
