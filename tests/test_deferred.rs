mod util;

use betide::{
    DeferredState, InlineExecutor, OperationState, Status, ThreadExecutor, WaitStatus, Waitable,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use util::{sleep_ms, spawn};

#[test]
fn test_passive_wait_does_not_launch() {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();

    let state = DeferredState::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
        "hello".to_string()
    });

    assert_eq!(state.status(), Status::Deferred);
    assert_eq!(state.wait_passive(), WaitStatus::Deferred);
    assert_eq!(runs.load(Ordering::Relaxed), 0);

    // The first launching observation runs the task, exactly once.
    assert_eq!(*state.get().unwrap(), "hello");
    assert_eq!(runs.load(Ordering::Relaxed), 1);

    assert_eq!(state.wait(), WaitStatus::Ready);
    assert_eq!(*state.get().unwrap(), "hello");
    assert_eq!(runs.load(Ordering::Relaxed), 1);
}

#[test]
fn test_timed_wait_launches() {
    let state = DeferredState::new(|| 5);

    assert_eq!(
        state.wait_for(Duration::from_secs(1)),
        WaitStatus::Ready
    );
    assert_eq!(*state.get().unwrap(), 5);
}

#[test]
fn test_launch_runs_on_attached_executor() {
    let state = DeferredState::with_executor(ThreadExecutor, || thread::current().id());

    let launched_on = *state.get().unwrap();
    assert_ne!(launched_on, thread::current().id());
}

#[test]
fn test_inline_executor_runs_on_waiting_thread() {
    let state = DeferredState::with_executor(InlineExecutor, || thread::current().id());

    let launched_on = *state.get().unwrap();
    assert_eq!(launched_on, thread::current().id());
}

#[test]
fn test_continuation_waits_for_parent() {
    let parent = Arc::new(OperationState::<i32>::new());

    let input = parent.clone();
    let child = DeferredState::continuation(parent.clone(), move || {
        // The launch path waited for the parent before dispatching us.
        assert!(input.is_ready());
        *input.get().unwrap() + 1
    });

    let producer = parent.clone();
    spawn(move || {
        sleep_ms(50);
        producer.set_value(41).unwrap();
    });

    assert_eq!(*child.get().unwrap(), 42);
}

#[test]
fn test_chained_deferred_continuations() {
    let root = DeferredState::new(|| 1);
    let next = DeferredState::continuation(root.clone(), {
        let root = root.clone();
        move || *root.get().unwrap() + 1
    });

    // Observing the tail launches the chain front to back.
    assert_eq!(*next.get().unwrap(), 2);
    assert!(root.is_ready());
}

#[test]
fn test_stoppable_deferred_sees_early_request() {
    let state = DeferredState::stoppable(|token| token.stop_requested());

    state.stop_source().request_stop();

    assert!(*state.get().unwrap());
}

#[test]
fn test_deferred_continuation_registry() {
    let state = DeferredState::new(|| 3);
    let ran = Arc::new(AtomicUsize::new(0));

    let r = ran.clone();
    let accepted = state.push_continuation(
        &InlineExecutor,
        Box::new(move || {
            r.fetch_add(1, Ordering::Relaxed);
        }),
    );
    assert!(accepted);
    assert_eq!(ran.load(Ordering::Relaxed), 0);

    state.wait();
    assert_eq!(ran.load(Ordering::Relaxed), 1);
}

#[test]
fn test_deferred_task_panic_is_captured() {
    let state = DeferredState::new(|| -> i32 { panic!("deferred boom") });

    let payload =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| state.get())).unwrap_err();
    assert_eq!(*payload.downcast::<&str>().unwrap(), "deferred boom");
    assert!(state.has_failed());
}
