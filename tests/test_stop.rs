mod util;

use betide::{
    spawn_stoppable, NoContinuations, NoExecutor, OperationState, StopSource,
};
use std::sync::Arc;
use util::sleep_ms;

#[test]
fn test_requests_are_idempotent() {
    let source = StopSource::new();
    let token = source.token();

    assert!(!token.stop_requested());
    assert!(source.request_stop());
    assert!(!source.request_stop());
    assert!(token.stop_requested());
}

#[test]
fn test_clones_share_the_flag() {
    let source = StopSource::new();
    let other = source.clone();
    let token = other.token();

    source.request_stop();

    assert!(other.stop_requested());
    assert!(token.stop_requested());
}

#[test]
fn test_task_observes_stop_request() {
    let future = spawn_stoppable(|token| {
        let mut polls = 0u32;
        while !token.stop_requested() {
            sleep_ms(5);
            polls += 1;
        }
        polls
    });

    sleep_ms(25);
    assert!(future.request_stop().unwrap());

    let mut future = future;
    assert!(future.get().is_ok());
}

#[test]
fn test_dropping_stoppable_state_requests_stop() {
    let state = Arc::new(OperationState::<i32, NoExecutor, NoContinuations, StopSource>::with_parts(
        NoExecutor,
        NoContinuations,
        StopSource::new(),
    ));
    let source = state.stop_source().clone();

    assert!(!source.stop_requested());
    drop(state);
    assert!(source.stop_requested());
}

#[test]
fn test_apply_with_token_hands_over_the_state_token() {
    let state = OperationState::<bool, NoExecutor, NoContinuations, StopSource>::with_parts(
        NoExecutor,
        NoContinuations,
        StopSource::new(),
    );

    state.stop_source().request_stop();
    state.apply_with_token(|token| token.stop_requested());

    assert!(*state.get().unwrap());
}
