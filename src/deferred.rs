use log::debug;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Instant;

use crate::continuations::{Continuations, SerialContinuations};
use crate::error::{Error, Panic};
use crate::executor::{Executor, ExecutorSlot, NoExecutor, Task, WithExecutor};
use crate::state::{AnySignal, OperationState, Status, WaitStatus, Waitable, WaiterHandle};
use crate::stop::{NoStop, StopSlot, StopSource, StopToken};

/// The task a deferred state owns: a callable already bound to its inputs,
/// realised as a zero-argument invocable.
pub type BoundTask<R> = Box<dyn FnOnce() -> R + Send + 'static>;

/// An operation state that also owns its task and launches it on demand.
///
/// The state starts in [`Status::Deferred`]. The first launching observation
/// (`wait`, `wait_for`, `wait_until`, `get`, or an external registration via
/// `notify_when_ready`) waits for the parent state when the task is a
/// continuation, then posts the task: to the attached executor when one is
/// present, otherwise synchronously on the observing thread. The task is
/// consumed exactly once. A passive wait never launches; it reports
/// [`WaitStatus::Deferred`] and leaves the task untouched.
///
/// Constructors hand back an `Arc`, so sharing the state is cloning the
/// handle.
///
/// ```
/// use betide::{DeferredState, WaitStatus, Waitable};
///
/// let state = DeferredState::new(|| "hello".to_string());
///
/// // A passive wait declines to launch.
/// assert_eq!(state.wait_passive(), WaitStatus::Deferred);
///
/// // The first real observation runs the task.
/// assert_eq!(*state.get().unwrap(), "hello");
/// ```
pub struct DeferredState<R, X = NoExecutor, C = SerialContinuations, K = NoStop>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    state: OperationState<R, X, C, K>,
    task: Mutex<Option<BoundTask<R>>>,
    parent: Option<Arc<dyn Waitable>>,
    // Needed to hand an owning handle to the executor on launch.
    weak: Weak<DeferredState<R, X, C, K>>,
}

impl<R: Send + Sync + 'static> DeferredState<R> {
    /// A deferred state around an arbitrary task.
    pub fn new(f: impl FnOnce() -> R + Send + 'static) -> Arc<DeferredState<R>> {
        DeferredState::from_parts(
            NoExecutor,
            SerialContinuations::new(),
            NoStop,
            None,
            Box::new(f),
        )
    }

    /// A deferred continuation: the task consumes `parent`'s result, so the
    /// launch path waits for `parent` before running it.
    pub fn continuation(
        parent: Arc<dyn Waitable>,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Arc<DeferredState<R>> {
        DeferredState::from_parts(
            NoExecutor,
            SerialContinuations::new(),
            NoStop,
            Some(parent),
            Box::new(f),
        )
    }
}

impl<R, E> DeferredState<R, WithExecutor<E>>
where
    R: Send + Sync + 'static,
    E: Executor,
{
    /// A deferred state that posts its task to `executor` when launched,
    /// instead of running it on the observing thread.
    pub fn with_executor(
        executor: E,
        f: impl FnOnce() -> R + Send + 'static,
    ) -> Arc<DeferredState<R, WithExecutor<E>>> {
        DeferredState::from_parts(
            WithExecutor(executor),
            SerialContinuations::new(),
            NoStop,
            None,
            Box::new(f),
        )
    }
}

impl<R: Send + Sync + 'static> DeferredState<R, NoExecutor, SerialContinuations, StopSource> {
    /// A deferred state whose task observes the state's stop token.
    pub fn stoppable(
        f: impl FnOnce(StopToken) -> R + Send + 'static,
    ) -> Arc<DeferredState<R, NoExecutor, SerialContinuations, StopSource>> {
        let stop = StopSource::new();
        let token = stop.token();

        DeferredState::from_parts(
            NoExecutor,
            SerialContinuations::new(),
            stop,
            None,
            Box::new(move || f(token)),
        )
    }
}

impl<R, X, C, K> DeferredState<R, X, C, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    /// A deferred state assembled from explicit option slots.
    pub fn from_parts(
        executor: X,
        continuations: C,
        stop: K,
        parent: Option<Arc<dyn Waitable>>,
        task: BoundTask<R>,
    ) -> Arc<DeferredState<R, X, C, K>> {
        Arc::new_cyclic(|weak| DeferredState {
            state: OperationState::deferred_parts(executor, continuations, stop),
            task: Mutex::new(Some(task)),
            parent,
            weak: weak.clone(),
        })
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn succeeded(&self) -> bool {
        self.state.succeeded()
    }

    pub fn has_failed(&self) -> bool {
        self.state.has_failed()
    }

    /// Wait for readiness (launching the task if needed) and borrow the
    /// result. Captured task panics are re-raised with their original
    /// payload.
    pub fn get(&self) -> Result<&R, Error> {
        self.wait();
        self.state.result_ref()
    }

    /// Wait for readiness and move the value out.
    pub fn take_value(&self) -> Result<R, Error> {
        self.wait();
        self.state.take_ready_value()
    }

    pub fn take_panic(&self) -> Result<Option<Panic>, Error> {
        self.state.take_panic()
    }

    // Post the bound task. The base calls this exactly once, from the
    // observer that transitioned the state out of Deferred.
    fn post_deferred(&self) {
        let task = self.task.lock().take();

        let Some(task) = task else {
            debug!("deferred task already consumed");
            return;
        };

        let this = self
            .weak
            .upgrade()
            .expect("deferred state dropped mid-launch");
        let job: Task = Box::new(move || this.state.apply(task));

        if let Err(job) = self.state.executor_slot().submit(job) {
            // No executor attached; run on the observing thread.
            job();
        }
    }

    // Continuation tasks consume their parent's result; make sure the
    // parent finished before the task is dispatched.
    fn wait_for_parent(&self) {
        if let Some(ref parent) = self.parent {
            debug!("waiting for parent state before dispatch");
            parent.wait();
        }
    }
}

impl<R, X, C, K> Waitable for DeferredState<R, X, C, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
    K: StopSlot,
{
    fn is_ready(&self) -> bool {
        self.state.is_ready()
    }

    fn wait(&self) -> WaitStatus {
        self.state.base().wait_sync(None, false, || {
            self.wait_for_parent();
            self.post_deferred();
        })
    }

    fn wait_until(&self, deadline: Instant) -> WaitStatus {
        self.state.base().wait_sync(Some(deadline), false, || {
            self.wait_for_parent();
            self.post_deferred();
        })
    }

    fn wait_passive(&self) -> WaitStatus {
        self.state.base().wait_sync(None, true, || {})
    }

    fn wait_passive_until(&self, deadline: Instant) -> WaitStatus {
        self.state.base().wait_sync(Some(deadline), true, || {})
    }

    fn notify_when_ready(&self, signal: Arc<AnySignal>) -> WaiterHandle {
        self.state.base().register_external(signal, || {
            self.wait_for_parent();
            self.post_deferred();
        })
    }

    fn unnotify_when_ready(&self, handle: WaiterHandle) {
        self.state.base().deregister_external(handle)
    }
}

/*
 *
 * ===== Option-gated accessors =====
 *
 */

impl<R, X, K> DeferredState<R, X, SerialContinuations, K>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    K: StopSlot,
{
    /// Attach a continuation; see
    /// [`Continuations::push`](crate::Continuations::push) for the race
    /// semantics.
    pub fn push_continuation(&self, executor: &dyn Executor, f: Task) -> bool {
        self.state.push_continuation(executor, f)
    }
}

impl<R, X, C> DeferredState<R, X, C, StopSource>
where
    R: Send + Sync + 'static,
    X: ExecutorSlot,
    C: Continuations,
{
    pub fn stop_source(&self) -> &StopSource {
        self.state.stop_source()
    }

    pub fn stop_token(&self) -> StopToken {
        self.state.stop_token()
    }
}
