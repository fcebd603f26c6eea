//! # The poll loop.
//!
//! Drives one poll operation from its first attempt to settlement.
//!
//! ```text
//! Idle ─► Attempting ─► (classify) ─┬─► Waiting(delay) ─► Attempting ─► …
//!                                   ├─► Resolved(item)
//!                                   └─► Rejected(failures)
//!
//! master deadline / cancellation ──► Rejected(MasterTimeout | Cancelled)
//! ```
//!
//! ## Rules
//! - One attempt in flight at a time. Attempt `n + 1` starts only after attempt
//!   `n` is classified and its delay has elapsed.
//! - Success: the condition sees the item. Continue waits
//!   `strategy(failed so far)`, the retry counter is untouched.
//! - Failure: the failure is recorded and one retry consumed. While retries
//!   remain and the condition agrees, progress is notified, then the loop waits
//!   `strategy(failed so far)`. Otherwise every recorded failure is returned.
//! - The master deadline and cancellation are raced against every suspension
//!   point and win over whatever outcome has not been classified yet.
//! - The operation settles once. The first settlement is the result.

use std::{future::Future, mem, pin::Pin, task::Context, task::Poll};

use futures::{
    future::{self, Either},
    pin_mut,
};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::Instrument;
use wasm_timer::Instant;

use crate::{
    deadline::{Deadline, DeadlineKind},
    error::{Failure, PollError},
    executor,
    hooks::{NoProgress, NoReport, Progress, Report, Reporter},
    policy::PollPolicy,
    racer, Condition, Task,
};

impl PollPolicy {
    /// Prepare a poll operation of `task` under this policy.
    ///
    /// Nothing runs until [`Poller::run`] is awaited.
    pub fn poll<T, C>(&self, task: T, condition: C) -> Poller<T, C>
    where
        T: Task,
        C: Condition<T::Item, T::Error>,
    {
        Poller {
            policy: *self,
            task,
            condition,
            progress: NoProgress,
            reporter: NoReport,
            cancel: None,
        }
    }
}

/// A configured poll operation, ready to [`run`](Poller::run).
#[must_use = "a poller does nothing until `run` is awaited"]
pub struct Poller<T, C, P = NoProgress, R = NoReport> {
    policy: PollPolicy,
    task: T,
    condition: C,
    progress: P,
    reporter: R,
    cancel: Option<CancellationToken>,
}

impl<T, C, P, R> Poller<T, C, P, R>
where
    T: Task,
    C: Condition<T::Item, T::Error>,
    P: Progress<T::Error>,
    R: Reporter<T::Error>,
{
    /// Notify `progress` before each retry delay.
    pub fn on_progress<P2>(self, progress: P2) -> Poller<T, C, P2, R>
    where
        P2: Progress<T::Error>,
    {
        Poller {
            policy: self.policy,
            task: self.task,
            condition: self.condition,
            progress,
            reporter: self.reporter,
            cancel: self.cancel,
        }
    }

    /// Hand the final error, if any, to `reporter`.
    pub fn report_to<R2>(self, reporter: R2) -> Poller<T, C, P, R2>
    where
        R2: Reporter<T::Error>,
    {
        Poller {
            policy: self.policy,
            task: self.task,
            condition: self.condition,
            progress: self.progress,
            reporter,
            cancel: self.cancel,
        }
    }

    /// Settle as [`PollError::Cancelled`] once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Run attempts until the operation settles.
    pub async fn run(self) -> Result<T::Item, PollError<T::Error>> {
        let Poller {
            policy,
            task,
            condition,
            progress,
            mut reporter,
            cancel,
        } = self;

        let strategy = policy.strategy().name();
        let span = tracing::debug_span!("poll", %strategy, retries = policy.retries());

        async move {
            let started = Instant::now();
            let mut poll_loop = PollLoop {
                policy,
                task,
                condition,
                progress,
                state: RetryState::new(policy.retries()),
                interrupts: Interrupts::arm(&policy, cancel),
            };

            let result = poll_loop.drive().await;
            let report = Report {
                attempts: poll_loop.state.attempts,
                failed: poll_loop.state.failed,
                elapsed: started.elapsed(),
                strategy,
            };
            match &result {
                Ok(_) => tracing::debug!(attempts = report.attempts, elapsed = ?report.elapsed, "resolved"),
                Err(err) => {
                    tracing::debug!(
                        attempts = report.attempts,
                        elapsed = ?report.elapsed,
                        reason = err.as_label(),
                        "rejected"
                    );
                    reporter.report(err, &report);
                }
            }
            result
        }
        .instrument(span)
        .await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Attempting,
    Waiting,
    Resolved,
    Rejected,
}

impl Phase {
    fn is_settled(self) -> bool {
        matches!(self, Phase::Resolved | Phase::Rejected)
    }
}

/// Mutable bookkeeping of one operation. Only [`PollLoop`] touches it.
struct RetryState<I, E> {
    phase: Phase,
    /// Retries left; only failed attempts consume one.
    remaining: u32,
    /// Equals `failures.len()` until the failures are handed out.
    failed: u32,
    attempts: u32,
    failures: Vec<Failure<E>>,
    result: Option<Result<I, PollError<E>>>,
}

impl<I, E> RetryState<I, E> {
    fn new(retries: u32) -> Self {
        Self {
            phase: Phase::Idle,
            remaining: retries,
            failed: 0,
            attempts: 0,
            failures: Vec::new(),
            result: None,
        }
    }

    fn transition(&mut self, phase: Phase) {
        tracing::trace!(from = ?self.phase, to = ?phase, "phase");
        self.phase = phase;
    }

    /// Record a failed attempt and return the retries left.
    fn record_failure(&mut self, failure: Failure<E>) -> u32 {
        self.failures.push(failure);
        self.failed += 1;
        self.remaining = self.remaining.saturating_sub(1);
        self.remaining
    }

    /// Fix the result. Only the first call has an effect.
    fn settle(&mut self, result: Result<I, PollError<E>>) {
        if self.phase.is_settled() {
            tracing::trace!("already settled, outcome discarded");
            return;
        }
        self.transition(if result.is_ok() {
            Phase::Resolved
        } else {
            Phase::Rejected
        });
        self.result = Some(result);
    }

    fn reject(&mut self) {
        let failures = mem::take(&mut self.failures);
        self.settle(Err(PollError::Rejected(failures)));
    }
}

enum Interrupt {
    MasterTimeout,
    Cancelled,
}

/// Events that end the operation from outside the attempt sequence.
struct Interrupts {
    master: Option<Deadline>,
    token: Option<CancellationToken>,
    cancelled: Option<Pin<Box<WaitForCancellationFutureOwned>>>,
}

impl Interrupts {
    fn arm(policy: &PollPolicy, token: Option<CancellationToken>) -> Self {
        Self {
            master: policy
                .master_deadline()
                .map(|after| Deadline::arm(after, DeadlineKind::Master)),
            cancelled: token.clone().map(|t| Box::pin(t.cancelled_owned())),
            token,
        }
    }

    fn is_cancelled(&self) -> bool {
        self.token.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn disarm(&mut self) {
        if self.master.take().is_some() {
            tracing::trace!("master deadline cancelled");
        }
        self.cancelled = None;
        self.token = None;
    }
}

impl Future for Interrupts {
    type Output = Interrupt;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Interrupt> {
        let this = self.get_mut();
        if let Some(master) = this.master.as_mut() {
            if Pin::new(master).poll(cx).is_ready() {
                return Poll::Ready(Interrupt::MasterTimeout);
            }
        }
        if let Some(cancelled) = this.cancelled.as_mut() {
            if cancelled.as_mut().poll(cx).is_ready() {
                return Poll::Ready(Interrupt::Cancelled);
            }
        }
        Poll::Pending
    }
}

/// Await `fut` unless an interrupt comes first.
async fn interruptible<F>(fut: F, interrupts: &mut Interrupts) -> Result<F::Output, Interrupt>
where
    F: Future,
{
    pin_mut!(fut);
    match future::select(interrupts, fut).await {
        Either::Left((interrupt, _)) => Err(interrupt),
        Either::Right((output, _)) => Ok(output),
    }
}

struct PollLoop<T: Task, C, P> {
    policy: PollPolicy,
    task: T,
    condition: C,
    progress: P,
    state: RetryState<T::Item, T::Error>,
    interrupts: Interrupts,
}

impl<T, C, P> PollLoop<T, C, P>
where
    T: Task,
    C: Condition<T::Item, T::Error>,
    P: Progress<T::Error>,
{
    async fn drive(&mut self) -> Result<T::Item, PollError<T::Error>> {
        loop {
            if let Some(result) = self.state.result.take() {
                self.interrupts.disarm();
                return result;
            }
            if self.interrupts.is_cancelled() {
                self.interrupted(Interrupt::Cancelled);
                continue;
            }
            self.step().await;
        }
    }

    /// One attempt, its classification and, if polling continues, its delay.
    async fn step(&mut self) {
        self.state.attempts += 1;
        let attempt = self.state.attempts;
        self.state.transition(Phase::Attempting);
        tracing::debug!(attempt, "attempt starting");

        let run = racer::race_deadline(
            executor::execute(&mut self.task),
            self.policy.attempt_deadline(),
        );
        let outcome = match interruptible(run, &mut self.interrupts).await {
            Ok(outcome) => outcome,
            Err(interrupt) => return self.interrupted(interrupt),
        };

        let delay = match outcome {
            Ok(item) => {
                if !self.condition.should_continue(None, Some(&item)) {
                    tracing::debug!(attempt, "condition met");
                    return self.state.settle(Ok(item));
                }
                self.policy.strategy().next_interval(self.state.failed)
            }
            Err(failure) => {
                tracing::debug!(attempt, reason = failure.as_label(), %failure, "attempt failed");
                let remaining = self.state.record_failure(failure);
                let failed = self.state.failed;

                let condition = &mut self.condition;
                let last = self.state.failures.last();
                let keep_going = remaining > 0
                    && last.is_some_and(|failure| condition.should_continue(Some(failure), None));
                if !keep_going {
                    tracing::debug!(attempt, remaining, "giving up");
                    return self.state.reject();
                }
                if let Some(failure) = last {
                    self.progress.on_retry(failed, failure);
                }
                self.policy.strategy().next_interval(failed)
            }
        };

        self.state.transition(Phase::Waiting);
        tracing::debug!(attempt, ?delay, failed = self.state.failed, "next attempt scheduled");
        let wait = Deadline::arm(delay, DeadlineKind::Backoff);
        if let Err(interrupt) = interruptible(wait, &mut self.interrupts).await {
            self.interrupted(interrupt);
        }
    }

    fn interrupted(&mut self, interrupt: Interrupt) {
        let err = match interrupt {
            Interrupt::MasterTimeout => {
                tracing::debug!("master deadline elapsed");
                PollError::MasterTimeout
            }
            Interrupt::Cancelled => {
                tracing::debug!("cancelled");
                PollError::Cancelled
            }
        };
        self.state.settle(Err(err));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{deadline::live, sync_task, Always, UntilSuccess};
    use std::{
        sync::{
            atomic::{AtomicU32, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fixed(interval: Duration, retries: u32) -> PollPolicy {
        PollPolicy::fixed_interval()
            .with_interval(interval)
            .with_retries(retries)
            .build()
            .unwrap()
    }

    fn gaps(stamps: &[std::time::Instant]) -> Vec<Duration> {
        stamps.windows(2).map(|w| w[1] - w[0]).collect()
    }

    #[tokio::test]
    async fn always_failing_task_exhausts_budget() {
        tracing_init::init_for_tests();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stamps);
        let task = sync_task(move || {
            seen.lock().unwrap().push(std::time::Instant::now());
            Err::<(), _>("boom")
        });

        let err = fixed(ms(30), 3).poll(task, Always).run().await.unwrap_err();

        assert_eq!(err.failures().len(), 3);
        assert!(err.failures().iter().all(|f| f.task_error() == Some(&"boom")));
        let stamps = stamps.lock().unwrap();
        assert_eq!(stamps.len(), 3);
        for gap in gaps(&stamps) {
            assert!(gap >= ms(30), "attempts spaced by {gap:?}");
        }
    }

    #[tokio::test]
    async fn first_success_resolves_without_delay() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let progressed = Arc::new(AtomicU32::new(0));
        let notified = Arc::clone(&progressed);
        let task = sync_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, ()>("ok")
        });
        let started = std::time::Instant::now();

        let item = fixed(ms(500), 5)
            .poll(task, |_: Option<&Failure<()>>, _: Option<&&str>| false)
            .on_progress(move |_: u32, _: &Failure<()>| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
            .run()
            .await
            .unwrap();

        assert_eq!(item, "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(progressed.load(Ordering::SeqCst), 0);
        assert!(started.elapsed() < ms(500));
    }

    #[tokio::test]
    async fn zero_budget_rejects_on_first_failure() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = sync_task(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("nope")
        });

        let err = fixed(ms(10), 0).poll(task, Always).run().await.unwrap_err();

        assert_eq!(err.failures().len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refusal_after_failure_returns_full_history() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = sync_task(move || match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err("transient"),
            _ => Err("fatal"),
        });
        let condition = |failure: Option<&Failure<&str>>, _: Option<&()>| {
            failure.and_then(Failure::task_error) != Some(&"fatal")
        };

        let err = fixed(ms(10), 5).poll(task, condition).run().await.unwrap_err();

        let reasons: Vec<_> = err.failures().iter().filter_map(Failure::task_error).collect();
        assert_eq!(reasons, [&"transient", &"fatal"]);
    }

    #[tokio::test]
    async fn progress_is_notified_in_failure_order() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = sync_task(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 3 {
                Err(format!("e{n}"))
            } else {
                Ok(n)
            }
        });
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);

        let item = fixed(ms(5), 5)
            .poll(task, UntilSuccess)
            .on_progress(move |failed: u32, failure: &Failure<String>| {
                sink.lock().unwrap().push((failed, failure.task_error().cloned()));
            })
            .run()
            .await
            .unwrap();

        assert_eq!(item, 4);
        assert_eq!(
            *log.lock().unwrap(),
            [
                (1, Some("e1".to_owned())),
                (2, Some("e2".to_owned())),
                (3, Some("e3".to_owned())),
            ]
        );
    }

    #[tokio::test]
    async fn no_progress_when_budget_is_spent() {
        let progressed = Arc::new(AtomicU32::new(0));
        let notified = Arc::clone(&progressed);

        let err = fixed(ms(5), 2)
            .poll(sync_task(|| Err::<(), _>(())), Always)
            .on_progress(move |_: u32, _: &Failure<()>| {
                notified.fetch_add(1, Ordering::SeqCst);
            })
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 2);
        assert_eq!(progressed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn successful_attempts_reuse_the_failure_count() {
        let policy = PollPolicy::linear_backoff()
            .with_start(ms(5))
            .with_increment(ms(100))
            .with_retries(5)
            .build()
            .unwrap();
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&stamps);
        let task = sync_task(move || {
            let mut seen = seen.lock().unwrap();
            seen.push(std::time::Instant::now());
            match seen.len() {
                1 => Err("warming up"),
                n => Ok(n),
            }
        });
        let condition = |failure: Option<&Failure<&str>>, item: Option<&usize>| {
            failure.is_some() || item < Some(&4)
        };

        assert_eq!(policy.poll(task, condition).run().await.unwrap(), 4);

        let gaps = gaps(&stamps.lock().unwrap());
        assert_eq!(gaps.len(), 3);
        for gap in &gaps {
            // One failure so far: 5ms + 100ms × 1, never 5ms + 100ms × 2.
            assert!(*gap >= ms(105), "gap {gap:?}");
            assert!(*gap < ms(205), "gap {gap:?}");
        }
    }

    #[tokio::test]
    async fn attempt_deadline_fails_hanging_attempt() {
        let before = live::count();
        let seen_timeout = Arc::new(AtomicU32::new(0));
        let seen = Arc::clone(&seen_timeout);
        let policy = PollPolicy::fixed_interval()
            .with_interval(ms(5))
            .with_retries(2)
            .with_attempt_deadline(ms(50))
            .build()
            .unwrap();
        let condition = move |failure: Option<&Failure<()>>, _: Option<&()>| {
            if failure.is_some_and(Failure::is_timeout) {
                seen.fetch_add(1, Ordering::SeqCst);
            }
            true
        };

        let err = policy
            .poll(future::pending::<Result<(), ()>>, condition)
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.failures().len(), 2);
        assert!(err.failures().iter().all(Failure::is_timeout));
        // The second failure exhausts the budget before the condition is asked.
        assert_eq!(seen_timeout.load(Ordering::SeqCst), 1);
        assert_eq!(live::count(), before);
    }

    #[tokio::test]
    async fn master_deadline_overrides_attempt_failures() {
        let before = live::count();
        let policy = PollPolicy::fixed_interval()
            .with_interval(ms(5))
            .with_master_deadline(ms(100))
            .build()
            .unwrap();
        let task = || async {
            tokio::time::sleep(ms(200)).await;
            Err::<(), _>("slow failure")
        };
        let reports = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&reports);
        let started = std::time::Instant::now();

        let err = policy
            .poll(task, Always)
            .report_to(move |err: &PollError<&str>, report: &Report| {
                sink.lock().unwrap().push((err.to_string(), *report));
            })
            .run()
            .await
            .unwrap_err();

        let elapsed = started.elapsed();
        assert!(err.is_master_timeout());
        assert_eq!(err.to_string(), "masterTimeout");
        assert!(elapsed >= ms(100) && elapsed < ms(200), "{elapsed:?}");
        assert_eq!(live::count(), before);

        let reports = reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].0, "masterTimeout");
        assert_eq!(reports[0].1.attempts, 1);
        assert_eq!(reports[0].1.failed, 0);
    }

    #[tokio::test]
    async fn settling_normally_clears_master_deadline() {
        let before = live::count();
        let policy = PollPolicy::fixed_interval()
            .with_master_deadline(Duration::from_secs(60))
            .build()
            .unwrap();

        let item = policy.poll(sync_task(|| Ok::<_, ()>(1)), UntilSuccess).run().await;

        assert_eq!(item.unwrap(), 1);
        assert_eq!(live::count(), before);
    }

    #[tokio::test]
    async fn cancellation_interrupts_backoff() {
        let before = live::count();
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(ms(50)).await;
            trigger.cancel();
        });
        let started = std::time::Instant::now();

        let err = fixed(Duration::from_secs(10), 5)
            .poll(sync_task(|| Err::<(), _>(())), Always)
            .with_cancellation(token)
            .run()
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(live::count(), before);
    }

    #[tokio::test]
    async fn cancelled_token_prevents_any_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let token = CancellationToken::new();
        token.cancel();

        let err = fixed(ms(5), 5)
            .poll(
                sync_task(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(())
                }),
                Always,
            )
            .with_cancellation(token)
            .run()
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn panicking_task_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let task = sync_task(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first call explodes");
            }
            Ok::<_, ()>("recovered")
        });

        let item = fixed(ms(5), 3).poll(task, UntilSuccess).run().await.unwrap();

        assert_eq!(item, "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn settle_is_first_wins() {
        let mut state = RetryState::<u8, ()>::new(1);
        state.settle(Err(PollError::MasterTimeout));
        state.settle(Ok(1));

        assert_eq!(state.phase, Phase::Rejected);
        assert!(matches!(state.result, Some(Err(PollError::MasterTimeout))));
    }

    #[test]
    fn retry_counter_only_moves_on_failure() {
        let mut state = RetryState::<u8, &str>::new(2);
        assert_eq!(state.record_failure(Failure::Task("a")), 1);
        assert_eq!(state.record_failure(Failure::Timeout), 0);
        assert_eq!(state.record_failure(Failure::Task("c")), 0);
        assert_eq!(state.failed as usize, state.failures.len());
    }
}
