#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use poller::{Failure, PollPolicy};

#[derive(Debug)]
enum Error {
    Retryable,
    Fatal,
}

#[tokio::main]
async fn main() -> Result<(), poller::ConfigError> {
    tracing_init::init();

    let policy = PollPolicy::exponential_backoff()
        .with_min_delay(Duration::from_millis(200))
        .with_max_delay(Duration::from_secs(5))
        .with_attempt_deadline(Duration::from_secs(1))
        .with_master_deadline(Duration::from_secs(20))
        .with_retries(4)
        .build()?;

    let call_count = Arc::new(AtomicU64::new(0));

    let result = policy
        .poll(
            || {
                let call_count = Arc::clone(&call_count);
                async move {
                    let n = call_count.fetch_add(1, Ordering::SeqCst) + 1;

                    tracing::info!(n, "task run!");

                    if n < 3 {
                        Err::<u64, Error>(Error::Retryable)
                    } else {
                        Ok(n)
                    }
                }
            },
            |failure: Option<&Failure<Error>>, progress: Option<&u64>| match failure {
                Some(Failure::Task(Error::Fatal)) => false,
                Some(_) => true,
                // keep polling until the job reports enough progress
                None => progress < Some(&5),
            },
        )
        .on_progress(|failed: u32, failure: &Failure<Error>| {
            tracing::warn!(failed, %failure, "retrying");
        })
        .run()
        .await;

    tracing::info!("{result:?} {call_count:?}");
    Ok(())
}
