//! Owned timers.
//!
//! Every timer the poller starts is a [`Deadline`]. Dropping it before it
//! fires deregisters the underlying `wasm_timer::Delay`, so a timer is
//! released on exactly one path: when it fires, or when its owner drops it.

use std::{
    future::Future,
    pin::Pin,
    task::{ready, Context, Poll},
    time::Duration,
};

use wasm_timer::Delay;

/// What a [`Deadline`] bounds. Only used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum DeadlineKind {
    /// Per-attempt ceiling.
    Attempt,
    /// Whole-operation ceiling.
    Master,
    /// Wait between attempts.
    Backoff,
}

/// A one-shot timer that resolves once `after` has elapsed.
pub(crate) struct Deadline {
    delay: Delay,
    after: Duration,
    kind: DeadlineKind,
    fired: bool,
}

impl Deadline {
    pub(crate) fn arm(after: Duration, kind: DeadlineKind) -> Self {
        tracing::trace!(?kind, ?after, "timer armed");
        #[cfg(test)]
        live::armed();

        Self {
            delay: Delay::new(after),
            after,
            kind,
            fired: false,
        }
    }
}

impl Future for Deadline {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        if this.fired {
            return Poll::Ready(());
        }

        if let Err(err) = ready!(Pin::new(&mut this.delay).poll(cx)) {
            tracing::warn!(kind = ?this.kind, %err, "timer backend unavailable, treating as elapsed");
        }
        tracing::trace!(kind = ?this.kind, after = ?this.after, "timer fired");
        this.fired = true;
        Poll::Ready(())
    }
}

impl Drop for Deadline {
    fn drop(&mut self) {
        if !self.fired {
            tracing::trace!(kind = ?self.kind, after = ?self.after, "timer cleared");
        }
        #[cfg(test)]
        live::released();
    }
}
