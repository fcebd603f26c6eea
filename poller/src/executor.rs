//! Run one attempt of a task.
//!
//! Calling the task and polling the future it returns are both guarded
//! against panics, so every attempt ends in exactly one `Result`.

use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
};

use futures::FutureExt;

use crate::{error::Failure, Task};

/// Invoke `task` once and normalize whatever happens into an outcome.
pub(crate) async fn execute<T>(task: &mut T) -> Result<T::Item, Failure<T::Error>>
where
    T: Task,
{
    let fut = match panic::catch_unwind(AssertUnwindSafe(|| task.call())) {
        Ok(fut) => fut,
        Err(payload) => return Err(Failure::Panicked(panic_message(payload))),
    };

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(item)) => Ok(item),
        Ok(Err(err)) => Err(Failure::Task(err)),
        Err(payload) => Err(Failure::Panicked(panic_message(payload))),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_task;

    #[tokio::test]
    async fn ready_value_is_success() {
        let mut task = sync_task(|| Ok::<_, ()>(7));
        assert_eq!(execute(&mut task).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn async_error_is_task_failure() {
        let mut task = || async { Err::<(), _>("boom") };
        let failure = execute(&mut task).await.unwrap_err();
        assert_eq!(failure.task_error(), Some(&"boom"));
    }

    #[tokio::test]
    async fn panic_when_called_is_caught() {
        let mut task = sync_task(|| -> Result<(), ()> { panic!("bad call") });
        match execute(&mut task).await {
            Err(Failure::Panicked(msg)) => assert_eq!(msg, "bad call"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn panic_while_polled_is_caught() {
        let mut task = || async {
            let code = 42;
            if code == 42 {
                panic!("bad future {code}");
            }
            Ok::<(), ()>(())
        };
        match execute(&mut task).await {
            Err(Failure::Panicked(msg)) => assert_eq!(msg, "bad future 42"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn task_is_called_once_per_attempt() {
        let mut calls = 0;
        let mut task = sync_task(|| {
            calls += 1;
            Ok::<_, ()>(())
        });
        execute(&mut task).await.unwrap();
        execute(&mut task).await.unwrap();
        drop(task);
        assert_eq!(calls, 2);
    }
}
