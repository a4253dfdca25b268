mod util;

use betide::{pair, spawn, spawn_on, Error, Future, InlineExecutor, WaitStatus};
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;
use util::{sleep_ms, spawn as spawn_thread};

#[derive(Debug, PartialEq)]
struct Boom(&'static str);

#[test]
fn test_pair_round_trip() {
    let (promise, mut future) = pair::<i32>();

    spawn_thread(move || {
        sleep_ms(50);
        promise.set_value(42).unwrap();
    });

    assert_eq!(future.get().unwrap(), 42);
}

#[test]
fn test_dropped_promise_breaks_the_future() {
    let (promise, mut future) = pair::<i32>();

    drop(promise);

    assert!(future.is_ready());
    assert_eq!(future.get(), Err(Error::BrokenPromise));
}

#[test]
fn test_abort_breaks_the_future() {
    let (promise, mut future) = pair::<i32>();

    promise.abort();

    assert_eq!(future.get(), Err(Error::BrokenPromise));
}

#[test]
fn test_get_consumes_the_state() {
    let mut future = Future::of(1);
    assert!(future.valid());

    assert_eq!(future.get().unwrap(), 1);

    assert!(!future.valid());
    assert_eq!(future.get(), Err(Error::NoState));
    assert!(matches!(future.wait(), Err(Error::NoState)));
}

#[test]
fn test_set_failure_reraises_on_get() {
    let (promise, mut future) = pair::<i32>();

    promise.set_failure(Box::new(Boom("bad"))).unwrap();

    let payload = panic::catch_unwind(AssertUnwindSafe(|| future.get())).unwrap_err();
    assert_eq!(*payload.downcast::<Boom>().unwrap(), Boom("bad"));
}

#[test]
fn test_then_chains_values() {
    let (promise, future) = pair::<i32>();

    let mut result = future
        .then(&InlineExecutor, |res| res.unwrap() + 1)
        .then(&InlineExecutor, |res| res.unwrap() * 2);

    promise.set_value(20).unwrap();

    assert_eq!(result.get().unwrap(), 42);
}

#[test]
fn test_then_after_completion_dispatches_now() {
    let mut result = Future::of(5).then(&InlineExecutor, |res| res.unwrap() + 1);

    // The parent was already complete, so the continuation already ran.
    assert!(result.is_ready());
    assert_eq!(result.get().unwrap(), 6);
}

#[test]
fn test_then_carries_parent_panic() {
    let future = spawn(|| -> i32 { panic::panic_any(Boom("upstream")) });
    let mut child = future.then(&InlineExecutor, |res| res);

    let payload = panic::catch_unwind(AssertUnwindSafe(|| child.get())).unwrap_err();
    assert_eq!(*payload.downcast::<Boom>().unwrap(), Boom("upstream"));
}

#[test]
fn test_then_carries_broken_promise() {
    let (promise, future) = pair::<i32>();
    let mut child = future.then(&InlineExecutor, |res| res.unwrap_err());

    drop(promise);

    assert_eq!(child.get().unwrap(), Error::BrokenPromise);
}

#[test]
fn test_spawn_runs_on_another_thread() {
    let caller = std::thread::current().id();
    let mut future = spawn(move || std::thread::current().id() != caller);

    assert!(future.get().unwrap());
}

#[test]
fn test_spawn_on_runs_inline() {
    let mut future = spawn_on(&InlineExecutor, || 9);

    assert!(future.is_ready());
    assert_eq!(future.get().unwrap(), 9);
}

#[test]
fn test_wait_for_timeout_then_complete() {
    let (promise, mut future) = pair::<i32>();

    assert_eq!(
        future.wait_for(Duration::from_millis(50)).unwrap(),
        WaitStatus::Timeout
    );

    promise.set_value(1).unwrap();

    assert_eq!(future.wait().unwrap(), WaitStatus::Ready);
    assert_eq!(future.get().unwrap(), 1);
}

#[test]
fn test_consumer_stop_request_reaches_producer() {
    let (promise, future) = pair::<i32>();

    assert!(!promise.stop_requested());
    assert!(future.request_stop().unwrap());
    assert!(promise.stop_requested());
    assert!(promise.stop_token().unwrap().stop_requested());

    promise.set_value(0).unwrap();
    let mut future = future;
    assert_eq!(future.get().unwrap(), 0);
}
