#![allow(dead_code)]

use std::future::{ready, Ready};
use std::time::Duration;

use poller::{CancellationToken, Failure, PollError, PollPolicy, Report};

#[derive(Debug)]
enum Error {
    Retryable,
    Fatal,
}

struct MyTask {
    count: u32,
}

impl poller::Task for MyTask {
    type Item = ();
    type Error = Error;
    type Fut = Ready<Result<Self::Item, Self::Error>>;

    fn call(&mut self) -> Self::Fut {
        self.count += 1;

        tracing::info!("MyTask call() {}", self.count);

        if self.count < 3 {
            ready(Err(Error::Retryable))
        } else {
            ready(Err(Error::Fatal))
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), poller::ConfigError> {
    tracing_init::init();

    let policy = PollPolicy::linear_backoff()
        .with_start(Duration::from_millis(100))
        .with_increment(Duration::from_millis(100))
        .build()?;
    let my_task = MyTask { count: 0 };

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let result = policy
        .poll(
            my_task,
            |failure: Option<&Failure<Error>>, _: Option<&()>| {
                matches!(failure, Some(Failure::Task(Error::Retryable)))
            },
        )
        .report_to(|err: &PollError<Error>, report: &Report| {
            tracing::error!(?report, "{err}: {:?}", err.failures());
        })
        .with_cancellation(token)
        .run()
        .await;

    tracing::info!("{result:?}");
    Ok(())
}
