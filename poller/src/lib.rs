//! Poll or retry an async task until a condition says stop.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use poller::{Failure, PollPolicy};
//!
//! # async fn job_status() -> Result<&'static str, std::io::Error> { Ok("done") }
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = PollPolicy::exponential_backoff()
//!     .with_retries(8)
//!     .with_attempt_deadline(Duration::from_secs(5))
//!     .with_master_deadline(Duration::from_secs(120))
//!     .build()?;
//!
//! let status = policy
//!     .poll(job_status, |failure: Option<&Failure<std::io::Error>>, status: Option<&&str>| {
//!         failure.is_some() || status != Some(&"done")
//!     })
//!     .on_progress(|failed: u32, failure: &Failure<std::io::Error>| {
//!         tracing::warn!(failed, %failure, "retrying");
//!     })
//!     .run()
//!     .await;
//! # let _ = status;
//! # Ok(())
//! # }
//! ```

use std::future::{ready, Future, Ready};

mod deadline;
mod error;
mod executor;
mod hooks;
mod poll_loop;
mod policy;
mod racer;
mod strategy;

pub use error::{ConfigError, Failure, PollError};
pub use hooks::{NoProgress, NoReport, Progress, Report, Reporter};
pub use poll_loop::Poller;
pub use policy::{PollPolicy, PollPolicyBuilder, DEFAULT_RETRIES};
pub use strategy::{Strategy, StrategyName};
pub use tokio_util::sync::CancellationToken;

/// Retry `task` with the default policy until it succeeds.
pub async fn retry<T>(task: T) -> Result<T::Item, PollError<T::Error>>
where
    T: Task,
{
    poll(task, UntilSuccess).await
}

/// Poll `task` with the default policy while `condition` asks to continue.
pub async fn poll<T, C>(task: T, condition: C) -> Result<T::Item, PollError<T::Error>>
where
    T: Task,
    C: Condition<T::Item, T::Error>,
{
    PollPolicy::default().poll(task, condition).run().await
}

/// Decides after every attempt whether to keep polling.
///
/// Called with `(Some(failure), None)` after a failed attempt and with
/// `(None, Some(item))` after a successful one.
/// A implementation is provided for `FnMut(Option<&Failure<E>>, Option<&T>) -> bool`
/// allowing you to use a simple closure or fn handles
pub trait Condition<T, E> {
    fn should_continue(&mut self, failure: Option<&Failure<E>>, item: Option<&T>) -> bool;
}

/// Keep polling regardless of the outcome, until retries run out.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl<T, E> Condition<T, E> for Always {
    fn should_continue(&mut self, _: Option<&Failure<E>>, _: Option<&T>) -> bool {
        true
    }
}

/// Retry failures, stop at the first success.
#[derive(Debug, Clone, Copy, Default)]
pub struct UntilSuccess;

impl<T, E> Condition<T, E> for UntilSuccess {
    fn should_continue(&mut self, failure: Option<&Failure<E>>, _: Option<&T>) -> bool {
        failure.is_some()
    }
}

impl<F, T, E> Condition<T, E> for F
where
    F: FnMut(Option<&Failure<E>>, Option<&T>) -> bool,
{
    fn should_continue(&mut self, failure: Option<&Failure<E>>, item: Option<&T>) -> bool {
        self(failure, item)
    }
}

/// A unit of work to be polled.
/// A implementation is provided for `FnMut() -> Future`
pub trait Task {
    type Item;
    type Error: std::fmt::Debug;
    type Fut: Future<Output = Result<Self::Item, Self::Error>>;

    fn call(&mut self) -> Self::Fut;
}

impl<F, Fut, I, E> Task for F
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<I, E>>,
    E: std::fmt::Debug,
{
    type Item = I;
    type Error = E;
    type Fut = Fut;

    fn call(&mut self) -> Self::Fut {
        self()
    }
}

/// Task whose result is available as soon as it is called.
#[derive(Debug, Clone)]
pub struct SyncTask<F>(F);

/// Adapt `FnMut() -> Result` into a [`Task`].
pub fn sync_task<F, I, E>(f: F) -> SyncTask<F>
where
    F: FnMut() -> Result<I, E>,
{
    SyncTask(f)
}

impl<F, I, E> Task for SyncTask<F>
where
    F: FnMut() -> Result<I, E>,
    E: std::fmt::Debug,
{
    type Item = I;
    type Error = E;
    type Fut = Ready<Result<I, E>>;

    fn call(&mut self) -> Self::Fut {
        ready((self.0)())
    }
}
