mod support;

use std::{sync::Arc, time::Duration};

use futures::future::join_all;
use leasekeep_common::ManualClock;
use leasekeep_lock::{
    Context, FixedBackoff, LimitRetry, LockError, Locker, MemoryBackend, ObtainOptions,
};
use support::CountingBackend;
use tokio::time::Instant;

async fn held(backend: Arc<MemoryBackend>) -> leasekeep_lock::Lock {
    Locker::new(backend)
        .obtain("X", Duration::from_secs(3600), &Context::background())
        .await
        .expect("initial holder")
}

#[tokio::test(start_paused = true)]
async fn cancel_wakes_waiting_obtain_without_finishing_backoff() {
    let backend = Arc::new(MemoryBackend::default());
    let _held = held(backend.clone()).await;

    let counting = Arc::new(CountingBackend::new(backend.clone()));
    let locker = Locker::new(counting.clone());
    let options = ObtainOptions::new().retry(FixedBackoff::new(Duration::from_secs(60)));
    let (ctx, cancel) = Context::with_cancel();

    let started = Instant::now();
    let waiter = tokio::spawn(async move {
        locker
            .obtain_with("X", Duration::from_secs(3600), &options, &ctx)
            .await
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let err = waiter.await.expect("join").expect_err("cancelled");
    assert!(matches!(err, LockError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(counting.try_sets(), 1);
}

#[tokio::test(start_paused = true)]
async fn caller_deadline_is_reported_as_deadline_exceeded() {
    let backend = Arc::new(MemoryBackend::default());
    let _held = held(backend.clone()).await;

    let locker = Locker::new(backend);
    let options = ObtainOptions::new().retry(FixedBackoff::new(Duration::from_millis(100)));
    let ctx = Context::background().with_timeout(Duration::from_millis(450));

    let err = locker
        .obtain_with("X", Duration::from_secs(3600), &options, &ctx)
        .await
        .expect_err("deadline");
    assert!(matches!(err, LockError::DeadlineExceeded));
    assert!(err.is_cancellation());
}

#[tokio::test]
async fn lease_bounded_wait_gives_up_as_not_obtained() {
    let clock = Arc::new(ManualClock::default());
    let backend = Arc::new(MemoryBackend::new(clock.clone()));
    Locker::new(backend.clone())
        .with_clock(clock.clone())
        .obtain("X", Duration::from_secs(3600), &Context::background())
        .await
        .expect("initial holder");

    let counting = Arc::new(CountingBackend::new(backend));
    let locker = Locker::new(counting.clone()).with_clock(clock.clone());
    let options = ObtainOptions::new().retry(FixedBackoff::new(Duration::from_millis(100)));

    let err = locker
        .obtain_with("X", Duration::from_millis(350), &options, &Context::background())
        .await
        .expect_err("still held");

    assert!(err.is_not_obtained(), "unexpected {err:?}");
    assert_eq!(clock.total_slept(), Duration::from_millis(350));
    assert_eq!(counting.try_sets(), 4);
}

#[tokio::test(start_paused = true)]
async fn unbounded_wait_stops_only_at_retry_limit() {
    let backend = Arc::new(MemoryBackend::default());
    let _held = held(backend.clone()).await;

    let counting = Arc::new(CountingBackend::new(backend));
    let locker = Locker::new(counting.clone());
    let options = ObtainOptions::new()
        .retry(LimitRetry::new(
            FixedBackoff::new(Duration::from_millis(100)),
            20,
        ))
        .bound_wait_by_ttl(false);

    let err = locker
        .obtain_with("X", Duration::from_millis(350), &options, &Context::background())
        .await
        .expect_err("still held");

    assert!(matches!(err, LockError::NotObtained { attempts: 20, .. }));
    assert_eq!(counting.try_sets(), 20);
}

#[tokio::test(start_paused = true)]
async fn one_cancel_stops_every_waiter() {
    let backend = Arc::new(MemoryBackend::default());
    let _held = held(backend.clone()).await;
    let (ctx, cancel) = Context::with_cancel();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let locker = Locker::new(backend.clone());
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let options =
                    ObtainOptions::new().retry(FixedBackoff::new(Duration::from_millis(50)));
                locker
                    .obtain_with("X", Duration::from_secs(3600), &options, &ctx)
                    .await
            })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();

    for result in join_all(waiters).await {
        let err = result.expect("join").expect_err("cancelled");
        assert!(matches!(err, LockError::Cancelled));
    }
    assert_eq!(backend.live_records().expect("count"), 1);
}
