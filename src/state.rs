use log::debug;
use parking_lot::{Condvar, Mutex, MutexGuard};
use smallvec::SmallVec;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::continuations::{Continuations, NoContinuations, SerialContinuations};
use crate::continuations::ContinuationsSource;
use crate::error::{Error, Failure, Panic};
use crate::executor::{Executor, ExecutorSlot, NoExecutor, Task, WithExecutor};
use crate::stop::{NoStop, StopSlot, StopSource, StopToken};
use crate::storage::Storage;

/*
 *
 * ===== Status =====
 *
 */

/// Lifecycle of an operation state.
///
/// Transitions are monotone along `Deferred → Launched → Waiting → Ready`,
/// except that a timed-out wait downgrades `Waiting` back to `Launched` so a
/// later waiter can re-arm. `Ready` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    /// The task has not been submitted; the first observation launches it.
    Deferred,
    /// The task has been launched (eager states start here).
    Launched,
    /// Some thread is blocked waiting for the result.
    Waiting,
    /// The result has been set and everyone was notified.
    Ready,
}

/// Outcome of a timed or passive wait. `Timeout` is a status, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitStatus {
    Ready,
    Timeout,
    /// A passive wait declined to launch a deferred state.
    Deferred,
}

/*
 *
 * ===== External waiters =====
 *
 */

/// Condition-variable bundle an external caller blocks on to learn that one
/// of several states became ready. This is what makes `wait_for_any`
/// possible without busy waiting.
///
/// Producers notify with the signal's own mutex held and with the state's
/// waiters mutex already released, so the notification cannot slip into the
/// gap between a registrant's readiness scan and its block, and the lock
/// order stays acyclic.
pub struct AnySignal {
    lock: Mutex<()>,
    cond: Condvar,
}

impl AnySignal {
    pub fn new() -> AnySignal {
        AnySignal {
            lock: Mutex::new(()),
            cond: Condvar::new(),
        }
    }

    /// Wake every thread blocked on this signal.
    pub fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock()
    }

    pub(crate) fn wait(&self, guard: &mut MutexGuard<'_, ()>) {
        self.cond.wait(guard);
    }

    /// Returns true if the deadline elapsed before a notification.
    pub(crate) fn wait_until(&self, guard: &mut MutexGuard<'_, ()>, deadline: Instant) -> bool {
        self.cond.wait_until(guard, deadline).timed_out()
    }
}

impl Default for AnySignal {
    fn default() -> AnySignal {
        AnySignal::new()
    }
}

/// Registration handle returned by `notify_when_ready`; stays valid until
/// passed back to `unnotify_when_ready`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaiterHandle(u64);

/*
 *
 * ===== Waitable =====
 *
 */

/// Uniform consumer surface over eager and deferred operation states.
///
/// `wait`, `wait_for` and `wait_until` are launching waits: on a deferred
/// state they post the task (after waiting for its parent) the first time
/// one of them is called. `wait_passive` is the non-launching observation:
/// on a deferred state it returns [`WaitStatus::Deferred`] immediately, and
/// a caller holding only passive access must eventually issue a launching
/// wait to make progress. This asymmetry is inherited from the engine's
/// design and is deliberate.
pub trait Waitable: Send + Sync {
    fn is_ready(&self) -> bool;

    /// Block until ready, launching a deferred task first.
    fn wait(&self) -> WaitStatus;

    /// Block until ready or the deadline, launching a deferred task first.
    /// A timeout releases only this waiter; the task keeps running toward
    /// its own completion.
    fn wait_until(&self, deadline: Instant) -> WaitStatus;

    fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.wait_until(Instant::now() + timeout)
    }

    /// Block until ready without launching; returns `Deferred` immediately
    /// on a deferred state.
    fn wait_passive(&self) -> WaitStatus;

    /// Timed variant of [`Waitable::wait_passive`].
    fn wait_passive_until(&self, deadline: Instant) -> WaitStatus;

    fn wait_passive_for(&self, timeout: Duration) -> WaitStatus {
        self.wait_passive_until(Instant::now() + timeout)
    }

    /// Register an external signal to be notified once the state is ready.
    ///
    /// This is a launching observation, like `wait`. If the state is already
    /// ready no notification is issued, so callers must scan readiness after
    /// registering and before blocking.
    fn notify_when_ready(&self, signal: Arc<AnySignal>) -> WaiterHandle;

    fn unnotify_when_ready(&self, handle: WaiterHandle);
}

/*
 *
 * ===== State base =====
 *
 */

struct BaseState {
    status: Status,
    failure: Option<Failure>,
    external: SmallVec<[(u64, Arc<AnySignal>); 2]>,
    next_waiter: u64,
}

/// Synchronisation fabric shared by every operation state shape: the status
/// machine, the waiters mutex and internal condition variable, the failure
/// slot, and the external-waiter list.
pub(crate) struct StateBase {
    sync: Mutex<BaseState>,
    waiter: Condvar,
    // Mirror of `status == Ready`, so readiness scans stay lock-free.
    ready: AtomicBool,
}

type Signals = SmallVec<[Arc<AnySignal>; 2]>;

impl StateBase {
    fn new(deferred: bool) -> StateBase {
        StateBase {
            sync: Mutex::new(BaseState {
                status: if deferred {
                    Status::Deferred
                } else {
                    Status::Launched
                },
                failure: None,
                external: SmallVec::new(),
                next_waiter: 0,
            }),
            waiter: Condvar::new(),
            ready: AtomicBool::new(false),
        }
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn status(&self) -> Status {
        self.sync.lock().status
    }

    // Flip the state to Ready under the lock. The internal condvar is
    // notified here; external signals are cloned out and notified by the
    // caller after the lock is released, keeping the lock order acyclic.
    // They are notified regardless of the previous status because a timed
    // wait may have downgraded Waiting to Launched since they registered.
    fn mark_ready_locked(&self, state: &mut BaseState) -> Signals {
        let prev = state.status;
        debug!("state ready; prev={:?}", prev);

        state.status = Status::Ready;
        self.ready.store(true, Ordering::Release);
        self.waiter.notify_all();

        state.external.iter().map(|(_, s)| s.clone()).collect()
    }

    fn notify_external(signals: Signals) {
        for signal in signals {
            signal.notify();
        }
    }

    // The launching wait/notify protocol. `launch` runs off the lock and is
    // reached exactly once per state: only the observer that transitions
    // Deferred → Launched calls it.
    pub(crate) fn wait_sync(
        &self,
        deadline: Option<Instant>,
        passive: bool,
        launch: impl FnOnce(),
    ) -> WaitStatus {
        let mut state = self.sync.lock();

        if state.status == Status::Deferred {
            if passive {
                return WaitStatus::Deferred;
            }

            state.status = Status::Launched;
            debug!("first observation; posting deferred task");
            drop(state);

            launch();

            state = self.sync.lock();
        }

        loop {
            if state.status == Status::Ready {
                return WaitStatus::Ready;
            }

            state.status = Status::Waiting;

            match deadline {
                Some(deadline) => {
                    if self.waiter.wait_until(&mut state, deadline).timed_out() {
                        if state.status == Status::Ready {
                            return WaitStatus::Ready;
                        }

                        // Release this waiter only; a later one may re-arm.
                        state.status = Status::Launched;
                        return WaitStatus::Timeout;
                    }
                }
                None => self.waiter.wait(&mut state),
            }
        }
    }

    pub(crate) fn register_external(&self, signal: Arc<AnySignal>, launch: impl FnOnce()) -> WaiterHandle {
        let mut state = self.sync.lock();

        if state.status == Status::Deferred {
            state.status = Status::Launched;
            debug!("external registration; posting deferred task");
            drop(state);

            launch();

            state = self.sync.lock();
        }

        if state.status != Status::Ready {
            state.status = Status::Waiting;
        }

        let id = state.next_waiter;
        state.next_waiter += 1;
        state.external.push((id, signal));

        WaiterHandle(id)
    }

    pub(crate) fn deregister_external(&self, handle: WaiterHandle) {
        let mut state = self.sync.lock();
        state.external.retain(|(id, _)| *id != handle.0);
    }
}

/*
 *
 * ===== Typed operation state =====
 *
 */

/// The shared artifact coordinating one producer, any number of consumers,
/// continuations, and cancellation for a single asynchronous computation
/// producing an `R`.
///
/// The slot parameters select the compile-time options: `X` the attached
/// executor ([`NoExecutor`] or [`WithExecutor`]), `C` the continuation
/// registry ([`NoContinuations`], [`ContinuationsSource`], or
/// [`SerialContinuations`]), and `K` cancellation ([`NoStop`] or
/// [`StopSource`]). Disabled slots are zero-sized, so a state pays only for
/// the options it enables. Sharing a state is cloning the `Arc` that owns
/// it; the always-deferred shape is the separate
/// [`DeferredState`](crate::DeferredState) type.
///
/// ```
/// use betide::OperationState;
/// use std::sync::Arc;
/// use std::thread;
///
/// let state = Arc::new(OperationState::<i32>::new());
/// let producer = state.clone();
///
/// thread::spawn(move || {
///     producer.set_value(42).unwrap();
/// });
///
/// assert_eq!(*state.get().unwrap(), 42);
/// ```
pub struct OperationState<R, X = NoExecutor, C = NoContinuations, K = NoStop>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    base: StateBase,
    storage: Storage<R>,
    executor: X,
    continuations: C,
    stop: K,
}

impl<R: Send + Sync + 'static> OperationState<R> {
    /// An eager state with no attached executor, no continuation registry,
    /// and no stop source.
    pub fn new() -> OperationState<R> {
        OperationState::with_parts(NoExecutor, NoContinuations, NoStop)
    }
}

impl<R: Send + Sync + 'static> Default for OperationState<R> {
    fn default() -> OperationState<R> {
        OperationState::new()
    }
}

impl<R, X, C, K> OperationState<R, X, C, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    /// An eager state assembled from explicit option slots.
    pub fn with_parts(executor: X, continuations: C, stop: K) -> OperationState<R, X, C, K> {
        OperationState {
            base: StateBase::new(false),
            storage: Storage::new(),
            executor,
            continuations,
            stop,
        }
    }

    pub(crate) fn deferred_parts(executor: X, continuations: C, stop: K) -> OperationState<R, X, C, K> {
        OperationState {
            base: StateBase::new(true),
            storage: Storage::new(),
            executor,
            continuations,
            stop,
        }
    }

    pub fn status(&self) -> Status {
        self.base.status()
    }

    /// True when the state is ready and holds a value rather than a failure.
    pub fn succeeded(&self) -> bool {
        self.base.is_ready() && self.storage.is_set()
    }

    /// True when the state is ready with a captured panic or broken promise.
    pub fn has_failed(&self) -> bool {
        self.base.is_ready() && !self.storage.is_set()
    }

    /// Complete the state with a value.
    ///
    /// Wakes every blocked waiter, notifies registered external signals, and
    /// then asks the continuation registry to run. All dispatch happens
    /// outside the waiters mutex.
    pub fn set_value(&self, value: R) -> Result<(), Error> {
        let mut state = self.base.sync.lock();

        if state.status == Status::Ready {
            return Err(Error::PromiseAlreadySatisfied);
        }

        // Sole producer between Launched and Ready; the status check above
        // is the at-most-once guard.
        unsafe { self.storage.set(value) };

        let signals = self.base.mark_ready_locked(&mut state);
        drop(state);

        StateBase::notify_external(signals);
        self.continuations.request_run();

        Ok(())
    }

    /// Complete the state with a captured task panic.
    pub fn set_failure(&self, payload: Panic) -> Result<(), Error> {
        self.complete_with(Failure::Panicked(Some(payload)))
    }

    /// Tell the state its producer is gone. If the state is not ready this
    /// injects the broken-promise failure and completes it; continuations
    /// still run, observing the failure.
    pub fn signal_promise_destroyed(&self) {
        if self.complete_with(Failure::BrokenPromise).is_ok() {
            debug!("producer dropped before completion; promise broken");
        }
    }

    fn complete_with(&self, failure: Failure) -> Result<(), Error> {
        let mut state = self.base.sync.lock();

        if state.status == Status::Ready {
            return Err(Error::PromiseAlreadySatisfied);
        }

        state.failure = Some(failure);

        let signals = self.base.mark_ready_locked(&mut state);
        drop(state);

        StateBase::notify_external(signals);
        self.continuations.request_run();

        Ok(())
    }

    /// Run `f` and route its outcome into the state: the return value goes
    /// to `set_value`, a panic is captured and goes to `set_failure`. Task
    /// panics never escape.
    pub fn apply(&self, f: impl FnOnce() -> R) {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => {
                if self.set_value(value).is_err() {
                    debug!("apply on an already-completed state; value dropped");
                }
            }
            Err(payload) => {
                if self.set_failure(payload).is_err() {
                    debug!("apply on an already-completed state; panic dropped");
                }
            }
        }
    }

    /// [`apply`](Self::apply) with the task's bound arguments passed
    /// separately, for launch paths that store a callable and its inputs
    /// apart.
    pub fn apply_args<A>(&self, f: impl FnOnce(A) -> R, args: A) {
        self.apply(move || f(args));
    }

    /// Wait for readiness and borrow the result.
    ///
    /// A captured task panic is re-raised here with its original payload; a
    /// broken promise surfaces as `Err`.
    pub fn get(&self) -> Result<&R, Error> {
        self.wait();
        self.result_ref()
    }

    /// Wait for readiness and move the value out. Reserved to the single
    /// consuming observer (a second take reports `PromiseUninitialized`).
    pub fn take_value(&self) -> Result<R, Error> {
        self.wait();
        self.take_ready_value()
    }

    /// The captured panic payload, if the state failed that way. Requires
    /// readiness. The payload moves to the first caller; later calls see
    /// `None`.
    pub fn take_panic(&self) -> Result<Option<Panic>, Error> {
        let mut state = self.base.sync.lock();

        if state.status != Status::Ready {
            return Err(Error::PromiseUninitialized);
        }

        match state.failure {
            Some(Failure::Panicked(ref mut payload)) => Ok(payload.take()),
            _ => Ok(None),
        }
    }

    pub(crate) fn base(&self) -> &StateBase {
        &self.base
    }

    pub(crate) fn executor_slot(&self) -> &X {
        &self.executor
    }

    pub(crate) fn result_ref(&self) -> Result<&R, Error> {
        let mut state = self.base.sync.lock();
        debug_assert_eq!(state.status, Status::Ready);

        match state.failure {
            Some(Failure::Panicked(ref mut payload)) => {
                let payload = payload.take();
                drop(state);
                resume_task_panic(payload)
            }
            Some(Failure::BrokenPromise) => Err(Error::BrokenPromise),
            None => {
                drop(state);
                // Ready with no failure: the producer stored the payload
                // before the status fence.
                Ok(unsafe { self.storage.get() })
            }
        }
    }

    pub(crate) fn take_ready_value(&self) -> Result<R, Error> {
        let mut state = self.base.sync.lock();
        debug_assert_eq!(state.status, Status::Ready);

        match state.failure {
            Some(Failure::Panicked(ref mut payload)) => {
                let payload = payload.take();
                drop(state);
                resume_task_panic(payload)
            }
            Some(Failure::BrokenPromise) => Err(Error::BrokenPromise),
            None => {
                if !self.storage.is_set() {
                    // Someone already moved the value out.
                    return Err(Error::PromiseUninitialized);
                }
                drop(state);
                Ok(unsafe { self.storage.take() })
            }
        }
    }
}

fn resume_task_panic<T>(payload: Option<Panic>) -> T {
    match payload {
        Some(payload) => panic::resume_unwind(payload),
        // The payload already went to an earlier observer of this shared
        // state.
        None => panic!("task panicked"),
    }
}

impl<R, X, C, K> Waitable for OperationState<R, X, C, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    fn is_ready(&self) -> bool {
        self.base.is_ready()
    }

    fn wait(&self) -> WaitStatus {
        self.base.wait_sync(None, false, || {})
    }

    fn wait_until(&self, deadline: Instant) -> WaitStatus {
        self.base.wait_sync(Some(deadline), false, || {})
    }

    fn wait_passive(&self) -> WaitStatus {
        self.base.wait_sync(None, true, || {})
    }

    fn wait_passive_until(&self, deadline: Instant) -> WaitStatus {
        self.base.wait_sync(Some(deadline), true, || {})
    }

    fn notify_when_ready(&self, signal: Arc<AnySignal>) -> WaiterHandle {
        self.base.register_external(signal, || {})
    }

    fn unnotify_when_ready(&self, handle: WaiterHandle) {
        self.base.deregister_external(handle)
    }
}

impl<R, X, C, K> Drop for OperationState<R, X, C, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    fn drop(&mut self) {
        // Stoppable states cancel their still-running task on the way out.
        self.stop.request();
    }
}

/*
 *
 * ===== Option-gated accessors =====
 *
 */

impl<R, E, C, K> OperationState<R, WithExecutor<E>, C, K>
where
    R: Send + Sync + 'static,
    E: Executor,
    C: Continuations,
    K: StopSlot,
{
    pub fn executor(&self) -> &E {
        &self.executor.0
    }
}

impl<R, X, K> OperationState<R, X, ContinuationsSource, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    K: StopSlot,
{
    pub fn continuations_source(&self) -> &ContinuationsSource {
        &self.continuations
    }

    /// Attach a continuation; see [`Continuations::push`] for the race
    /// semantics.
    pub fn push_continuation(&self, executor: &dyn Executor, f: Task) -> bool {
        self.continuations.push(executor, f)
    }
}

impl<R, X, K> OperationState<R, X, SerialContinuations, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    K: StopSlot,
{
    pub fn push_continuation(&self, executor: &dyn Executor, f: Task) -> bool {
        self.continuations.push(executor, f)
    }
}

impl<R, X, C> OperationState<R, X, C, StopSource>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
{
    pub fn stop_source(&self) -> &StopSource {
        &self.stop
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.token()
    }

    /// [`apply`](Self::apply) for stoppable tasks: the state's stop token is
    /// passed as the leading argument.
    pub fn apply_with_token(&self, f: impl FnOnce(StopToken) -> R) {
        let token = self.stop.token();
        self.apply(move || f(token));
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn eager_state_starts_launched() {
        let state = OperationState::<u32>::new();
        assert_eq!(state.status(), Status::Launched);
        assert!(!state.is_ready());
    }

    #[test]
    fn second_completion_is_rejected() {
        let state = OperationState::<u32>::new();

        assert!(state.set_value(1).is_ok());
        assert_eq!(state.set_value(2), Err(Error::PromiseAlreadySatisfied));
        assert_eq!(
            state.set_failure(Box::new("nope")),
            Err(Error::PromiseAlreadySatisfied)
        );
        assert_eq!(*state.get().unwrap(), 1);
    }

    #[test]
    fn take_panic_requires_readiness() {
        let state = OperationState::<u32>::new();
        assert!(matches!(
            state.take_panic(),
            Err(Error::PromiseUninitialized)
        ));
    }
}
