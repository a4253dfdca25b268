//! Operation-state engine for futures and promises
//!
//! This crate is the core of a futures-and-promises library: the shared
//! state behind every future the surrounding layers hand out. An
//! [`OperationState`] represents one in-flight computation whose result (a
//! value, a void completion, or a captured task panic) becomes available
//! later, and coordinates the producer, any number of consumers, attached
//! continuations, cooperative cancellation, and external waiters over that
//! result.
//!
//! ## Producing and consuming
//!
//! The simplest surface is the [`pair`] of a [`Promise`] and a [`Future`]:
//!
//! ```
//! use betide::pair;
//! use std::thread;
//!
//! let (promise, mut future) = pair::<i32>();
//!
//! thread::spawn(move || {
//!     promise.set_value(6 * 7).unwrap();
//! });
//!
//! assert_eq!(future.get().unwrap(), 42);
//! ```
//!
//! States can also be driven directly. [`spawn`] runs a task on a new
//! thread, and [`Future::then`] chains continuations that fire exactly once
//! when the parent completes:
//!
//! ```
//! use betide::{spawn, InlineExecutor};
//!
//! let mut future = spawn(|| 6).then(&InlineExecutor, |res| res.unwrap() + 1);
//! assert_eq!(future.get().unwrap(), 7);
//! ```
//!
//! ## Deferred states
//!
//! A [`DeferredState`] owns its task and launches it on the first real
//! observation. Passive waits decline to launch: `wait_passive` on a
//! deferred state returns [`WaitStatus::Deferred`] immediately, and the
//! caller must issue a launching wait (`wait`, `wait_for`, `wait_until`,
//! `get`) to make progress. That asymmetry is part of the engine's contract;
//! see [`Waitable`].
//!
//! ## Waiting on many states
//!
//! [`wait_for_all`] and [`wait_for_any`] compose waits over several states
//! without busy loops, via external condition-variable registration
//! ([`Waitable::notify_when_ready`]):
//!
//! ```
//! use betide::{wait_for_any, OperationState};
//! use std::sync::Arc;
//! use std::thread;
//!
//! let slow = Arc::new(OperationState::<&str>::new());
//! let fast = Arc::new(OperationState::<&str>::new());
//!
//! let producer = fast.clone();
//! thread::spawn(move || producer.set_value("first").unwrap());
//!
//! assert_eq!(wait_for_any(&[&*slow, &*fast]), 1);
//! ```
//!
//! ## Errors and task failures
//!
//! Protocol misuse (completing twice, reading too early, operating on an
//! empty handle) surfaces as [`Error`] at the call site. Task failures are
//! different: a panic inside a task is captured by
//! [`apply`](OperationState::apply), completes the state, and is re-raised
//! with its original payload when the result is read. A producer that goes
//! away without completing breaks its promise and consumers see
//! [`Error::BrokenPromise`].

pub use crate::continuations::{
    Continuations, ContinuationsSource, NoContinuations, SerialContinuations,
};
pub use crate::deferred::{BoundTask, DeferredState};
pub use crate::error::{Error, Panic};
pub use crate::executor::{
    Executor, ExecutorSlot, InlineExecutor, NoExecutor, Task, ThreadExecutor, WithExecutor,
};
pub use crate::future::{pair, spawn, spawn_on, spawn_stoppable, Future, Promise};
pub use crate::state::{
    AnySignal, OperationState, Status, WaitStatus, Waitable, WaiterHandle,
};
pub use crate::stop::{NoStop, StopSlot, StopSource, StopToken};
pub use crate::wait::{
    wait_for_all, wait_for_all_for, wait_for_all_until, wait_for_any, wait_for_any_for,
    wait_for_any_until,
};

mod continuations;
mod deferred;
mod error;
mod executor;
mod future;
mod state;
mod stop;
mod storage;
mod wait;
