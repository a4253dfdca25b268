use log::debug;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::continuations::{Continuations, ContinuationsSource};
use crate::error::{Error, Panic};
use crate::executor::{Executor, NoExecutor, Task};
use crate::state::{AnySignal, OperationState, WaitStatus, Waitable, WaiterHandle};
use crate::stop::{StopSource, StopToken};

// The canonical options combination behind the promise/future pair: eager,
// continuable (then), stoppable, no attached executor.
type FutureState<R> = OperationState<R, NoExecutor, ContinuationsSource, StopSource>;

fn new_state<R: Send + Sync + 'static>() -> Arc<FutureState<R>> {
    Arc::new(OperationState::with_parts(
        NoExecutor,
        ContinuationsSource::new(),
        StopSource::new(),
    ))
}

/// Create a connected producer/consumer pair over a fresh operation state.
///
/// ```
/// use betide::pair;
/// use std::thread;
///
/// let (promise, mut future) = pair::<u32>();
///
/// thread::spawn(move || promise.set_value(42).unwrap());
///
/// assert_eq!(future.get().unwrap(), 42);
/// ```
pub fn pair<R: Send + Sync + 'static>() -> (Promise<R>, Future<R>) {
    let state = new_state::<R>();

    (
        Promise {
            state: Some(state.clone()),
        },
        Future { state: Some(state) },
    )
}

/*
 *
 * ===== Promise =====
 *
 */

/// Producer handle: fulfils or fails the associated [`Future`].
///
/// Dropping a promise without completing it breaks it; the consumer's `get`
/// then reports [`Error::BrokenPromise`].
#[must_use = "dropping an unused promise breaks the associated future"]
pub struct Promise<R: Send + Sync + 'static> {
    state: Option<Arc<FutureState<R>>>,
}

impl<R: Send + Sync + 'static> Promise<R> {
    /// Fulfil the promise with a value.
    pub fn set_value(mut self, value: R) -> Result<(), Error> {
        let state = self.state.take().ok_or(Error::NoState)?;
        state.set_value(value)
    }

    /// Fail the promise with a captured panic payload; the consumer's `get`
    /// re-raises it.
    pub fn set_failure(mut self, payload: Panic) -> Result<(), Error> {
        let state = self.state.take().ok_or(Error::NoState)?;
        state.set_failure(payload)
    }

    /// Break the promise explicitly.
    pub fn abort(self) {
        drop(self);
    }

    /// True once the consumer side requested cancellation.
    pub fn stop_requested(&self) -> bool {
        match self.state {
            Some(ref state) => state.stop_source().stop_requested(),
            None => false,
        }
    }

    /// Token for handing to the producing task.
    pub fn stop_token(&self) -> Result<StopToken, Error> {
        let state = self.state.as_ref().ok_or(Error::NoState)?;
        Ok(state.stop_token())
    }
}

impl<R: Send + Sync + 'static> Drop for Promise<R> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            debug!("promise dropped without completing");
            state.signal_promise_destroyed();
        }
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Promise<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Promise {{ .. }}")
    }
}

/*
 *
 * ===== Future =====
 *
 */

/// Consumer handle over an eager, continuable, stoppable operation state.
///
/// `get` consumes the handle's state: the first call waits and moves the
/// result out, later calls report [`Error::NoState`]. Shared consumption is
/// done at the state level (`Arc<OperationState>`), not through this handle.
#[must_use = "futures do nothing unless consumed"]
pub struct Future<R: Send + Sync + 'static> {
    state: Option<Arc<FutureState<R>>>,
}

impl<R: Send + Sync + 'static> Future<R> {
    /// A future that is already fulfilled.
    pub fn of(value: R) -> Future<R> {
        let state = new_state::<R>();
        state
            .set_value(value)
            .expect("fresh operation state already satisfied");

        Future { state: Some(state) }
    }

    /// True while the handle still refers to an operation state.
    pub fn valid(&self) -> bool {
        self.state.is_some()
    }

    pub fn is_ready(&self) -> bool {
        match self.state {
            Some(ref state) => Waitable::is_ready(&**state),
            None => false,
        }
    }

    pub fn wait(&self) -> Result<WaitStatus, Error> {
        Ok(self.state()?.wait())
    }

    pub fn wait_until(&self, deadline: Instant) -> Result<WaitStatus, Error> {
        Ok(self.state()?.wait_until(deadline))
    }

    pub fn wait_for(&self, timeout: Duration) -> Result<WaitStatus, Error> {
        Ok(Waitable::wait_for(&**self.state()?, timeout))
    }

    /// Wait for completion and take the result.
    ///
    /// Re-raises a captured task panic with its original payload; a broken
    /// promise surfaces as `Err`. The handle is left without a state.
    pub fn get(&mut self) -> Result<R, Error> {
        let state = self.state.take().ok_or(Error::NoState)?;
        state.take_value()
    }

    /// Request cooperative cancellation of the producing task. Returns true
    /// iff this call latched the request.
    pub fn request_stop(&self) -> Result<bool, Error> {
        Ok(self.state()?.stop_source().request_stop())
    }

    pub fn stop_source(&self) -> Result<StopSource, Error> {
        Ok(self.state()?.stop_source().clone())
    }

    /// Attach a continuation and return the future of its result.
    ///
    /// The callback receives the parent's outcome once it is ready. When the
    /// parent is already complete the callback is dispatched on `executor`
    /// right away; either way it runs exactly once, and a panic inside the
    /// parent task or the callback is carried into the returned future.
    ///
    /// ```
    /// use betide::{pair, InlineExecutor};
    ///
    /// let (promise, future) = pair::<u32>();
    /// let mut doubled = future.then(&InlineExecutor, |res| res.unwrap() * 2);
    ///
    /// promise.set_value(21).unwrap();
    /// assert_eq!(doubled.get().unwrap(), 42);
    /// ```
    pub fn then<U, F>(mut self, executor: &dyn Executor, f: F) -> Future<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Result<R, Error>) -> U + Send + 'static,
    {
        let parent = self.state.take().expect("future has no state");
        let child = new_state::<U>();

        let source = parent.continuations_source().clone();
        let completer = child.clone();
        let job: Task = Box::new(move || {
            // take_value re-raises a parent panic; route it, like any panic
            // out of the callback itself, into the child state.
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(parent.take_value())));
            match outcome {
                Ok(value) => {
                    let _ = completer.set_value(value);
                }
                Err(payload) => {
                    let _ = completer.set_failure(payload);
                }
            }
        });

        if !source.push(executor, job) {
            debug!("parent already complete; continuation dispatched eagerly");
        }

        Future { state: Some(child) }
    }

    fn state(&self) -> Result<&Arc<FutureState<R>>, Error> {
        self.state.as_ref().ok_or(Error::NoState)
    }

    fn state_expect(&self) -> &Arc<FutureState<R>> {
        self.state.as_ref().expect("future has no state")
    }
}

impl<R: Send + Sync + 'static> Waitable for Future<R> {
    fn is_ready(&self) -> bool {
        Future::is_ready(self)
    }

    fn wait(&self) -> WaitStatus {
        self.state_expect().wait()
    }

    fn wait_until(&self, deadline: Instant) -> WaitStatus {
        self.state_expect().wait_until(deadline)
    }

    fn wait_passive(&self) -> WaitStatus {
        self.state_expect().wait_passive()
    }

    fn wait_passive_until(&self, deadline: Instant) -> WaitStatus {
        self.state_expect().wait_passive_until(deadline)
    }

    fn notify_when_ready(&self, signal: Arc<AnySignal>) -> WaiterHandle {
        self.state_expect().notify_when_ready(signal)
    }

    fn unnotify_when_ready(&self, handle: WaiterHandle) {
        self.state_expect().unnotify_when_ready(handle)
    }
}

impl<R: Send + Sync + 'static> fmt::Debug for Future<R> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Future {{ .. }}")
    }
}

/*
 *
 * ===== Launch helpers =====
 *
 */

/// Run `f` on a newly spawned thread and return the future of its result.
///
/// ```
/// use betide::spawn;
///
/// let mut future = spawn(|| (0..10).sum::<u32>());
/// assert_eq!(future.get().unwrap(), 45);
/// ```
pub fn spawn<R, F>(f: F) -> Future<R>
where
    R: Send + Sync + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let state = new_state::<R>();
    let producer = state.clone();

    thread::spawn(move || producer.apply(f));

    Future { state: Some(state) }
}

/// Run `f` on `executor` and return the future of its result.
pub fn spawn_on<R, F>(executor: &dyn Executor, f: F) -> Future<R>
where
    R: Send + Sync + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let state = new_state::<R>();
    let producer = state.clone();

    executor.execute(Box::new(move || producer.apply(f)));

    Future { state: Some(state) }
}

/// Like [`spawn`], for tasks that observe cooperative cancellation: `f`
/// receives the state's stop token as its leading argument.
pub fn spawn_stoppable<R, F>(f: F) -> Future<R>
where
    R: Send + Sync + 'static,
    F: FnOnce(StopToken) -> R + Send + 'static,
{
    let state = new_state::<R>();
    let producer = state.clone();

    thread::spawn(move || producer.apply_with_token(f));

    Future { state: Some(state) }
}
