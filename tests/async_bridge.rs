//! Running computations from tokio with the `async` feature.

#![cfg(feature = "async")]

use std::time::Duration;

use undertow::{ExecutionContext, Outcome, IO};

#[tokio::test]
async fn into_future_yields_the_outcome() {
    let ctx = ExecutionContext::concurrent("bridge");

    let done = IO::<String, _>::sleep(Duration::from_millis(5))
        .map(|()| 42)
        .into_future(ctx.clone())
        .await;
    assert_eq!(done, Outcome::Completed(42));

    let failed = IO::<String, i32>::raise_error("offline".to_string())
        .into_future(ctx)
        .await;
    assert_eq!(failed, Outcome::Errored("offline".to_string()));
}

#[tokio::test]
async fn into_future_runs_alongside_tokio_tasks() {
    let ctx = ExecutionContext::concurrent("bridge-concurrent");

    let blocking = IO::<(), _>::sleep(Duration::from_millis(50))
        .map(|()| "io")
        .into_future(ctx);
    let task = tokio::spawn(async { "task" });

    let (io, task) = tokio::join!(blocking, task);
    assert_eq!(io, Outcome::Completed("io"));
    assert_eq!(task.unwrap(), "task");
}
