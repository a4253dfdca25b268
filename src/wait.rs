use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::state::{AnySignal, WaitStatus, Waitable, WaiterHandle};

/// Wait until every state in `states` is ready.
///
/// States are visited in slice order; deferred states launch as they are
/// reached.
pub fn wait_for_all<W: Waitable + ?Sized>(states: &[&W]) {
    for state in states {
        state.wait();
    }
}

/// Wait until every state is ready or `deadline` passes.
///
/// Each state is given the same single deadline rather than a per-state
/// allowance; the result is [`WaitStatus::Ready`] iff every state ended up
/// ready.
pub fn wait_for_all_until<W: Waitable + ?Sized>(states: &[&W], deadline: Instant) -> WaitStatus {
    for state in states {
        state.wait_until(deadline);
    }

    if states.iter().all(|state| state.is_ready()) {
        WaitStatus::Ready
    } else {
        WaitStatus::Timeout
    }
}

/// [`wait_for_all_until`] with a relative timeout.
pub fn wait_for_all_for<W: Waitable + ?Sized>(states: &[&W], timeout: Duration) -> WaitStatus {
    wait_for_all_until(states, Instant::now() + timeout)
}

/// Wait until any state in `states` is ready and return its position.
///
/// Among several ready states the first position wins. No busy loop: a
/// shared [`AnySignal`] is registered with every state, the caller blocks on
/// it, and every registration is removed again before returning. Deferred
/// inputs are launched by the registration pass.
///
/// ```
/// use betide::{wait_for_any, OperationState};
/// use std::sync::Arc;
/// use std::thread;
///
/// let a = Arc::new(OperationState::<u32>::new());
/// let b = Arc::new(OperationState::<u32>::new());
///
/// let producer = b.clone();
/// thread::spawn(move || producer.set_value(7).unwrap());
///
/// let ready = wait_for_any(&[&*a, &*b]);
/// assert_eq!(ready, 1);
/// ```
///
/// # Panics
///
/// Panics when `states` is empty; there is nothing to wait for.
pub fn wait_for_any<W: Waitable + ?Sized>(states: &[&W]) -> usize {
    assert!(!states.is_empty(), "wait_for_any on no states");

    if let Some(position) = first_ready(states) {
        return position;
    }

    let signal = Arc::new(AnySignal::new());
    let handles = register_all(states, &signal);

    let mut guard = signal.lock();
    let position = loop {
        // Rescan under the signal lock: a state that completed between the
        // registration pass and this point has already sent (or is blocked
        // sending) its notification.
        if let Some(position) = first_ready(states) {
            break position;
        }

        signal.wait(&mut guard);
    };
    drop(guard);

    deregister_all(states, handles);

    position
}

/// [`wait_for_any`] with a deadline; `None` when it passes with no state
/// ready.
pub fn wait_for_any_until<W: Waitable + ?Sized>(
    states: &[&W],
    deadline: Instant,
) -> Option<usize> {
    assert!(!states.is_empty(), "wait_for_any on no states");

    if let Some(position) = first_ready(states) {
        return Some(position);
    }

    let signal = Arc::new(AnySignal::new());
    let handles = register_all(states, &signal);

    let mut guard = signal.lock();
    let position = loop {
        if let Some(position) = first_ready(states) {
            break Some(position);
        }

        if signal.wait_until(&mut guard, deadline) {
            // Deadline elapsed; one final scan decides.
            break first_ready(states);
        }
    };
    drop(guard);

    deregister_all(states, handles);

    position
}

/// [`wait_for_any_until`] with a relative timeout.
pub fn wait_for_any_for<W: Waitable + ?Sized>(states: &[&W], timeout: Duration) -> Option<usize> {
    wait_for_any_until(states, Instant::now() + timeout)
}

fn first_ready<W: Waitable + ?Sized>(states: &[&W]) -> Option<usize> {
    states.iter().position(|state| state.is_ready())
}

fn register_all<W: Waitable + ?Sized>(
    states: &[&W],
    signal: &Arc<AnySignal>,
) -> Vec<WaiterHandle> {
    states
        .iter()
        .map(|state| state.notify_when_ready(signal.clone()))
        .collect()
}

fn deregister_all<W: Waitable + ?Sized>(states: &[&W], handles: Vec<WaiterHandle>) {
    for (state, handle) in states.iter().zip(handles) {
        state.unnotify_when_ready(handle);
    }
}
