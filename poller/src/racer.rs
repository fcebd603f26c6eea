//! Race an attempt against its per-attempt deadline.
//!
//! ```text
//! attempt ──┐
//!           ├─ select ─► attempt first: drop timer, keep outcome
//! timer ────┘          └► timer first:   drop attempt, Failure::Timeout
//! ```
//!
//! The loser is dropped before this returns, so a late task outcome can never
//! reach the caller and the timer never outlives the attempt.

use std::{future::Future, time::Duration};

use futures::{
    future::{self, Either},
    pin_mut,
};

use crate::{
    deadline::{Deadline, DeadlineKind},
    error::Failure,
};

/// Await `attempt`, failing with [`Failure::Timeout`] once `limit` elapses.
///
/// Without a limit the attempt is awaited as is.
pub(crate) async fn race_deadline<F, I, E>(attempt: F, limit: Option<Duration>) -> Result<I, Failure<E>>
where
    F: Future<Output = Result<I, Failure<E>>>,
{
    let Some(limit) = limit.filter(|d| !d.is_zero()) else {
        return attempt.await;
    };

    let timer = Deadline::arm(limit, DeadlineKind::Attempt);
    pin_mut!(attempt);

    match future::select(attempt, timer).await {
        Either::Left((outcome, timer)) => {
            drop(timer);
            outcome
        }
        Either::Right(((), _late)) => {
            tracing::debug!(?limit, "attempt exceeded its deadline");
            Err(Failure::Timeout)
        }
    }
}
