use log::debug;
use parking_lot::Mutex;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Panic;
use crate::executor::{Executor, Task};

/// Type-level selection of the continuable option.
///
/// A registry holds continuations that must fire exactly once when
/// completion is declared, in the order they were attached, with no lost
/// callbacks when attachment races completion:
///
/// * `push` appends while the run latch is clear and returns `true`;
///   afterwards it dispatches the rejected callback on the caller-supplied
///   executor immediately and returns `false`, so no callback is silently
///   dropped.
/// * `request_run` latches the flag; the first caller alone drains and
///   invokes every entry and returns `true`.
pub trait Continuations: Send + Sync + 'static {
    fn push(&self, executor: &dyn Executor, f: Task) -> bool;

    fn request_run(&self) -> bool;

    fn is_run_requested(&self) -> bool;
}

/// Slot filled by states compiled without continuation support. Zero-sized.
/// Pushing through it behaves like pushing after a run request: the callback
/// goes straight to the executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoContinuations;

impl Continuations for NoContinuations {
    fn push(&self, executor: &dyn Executor, f: Task) -> bool {
        executor.execute(f);
        false
    }

    fn request_run(&self) -> bool {
        false
    }

    fn is_run_requested(&self) -> bool {
        true
    }
}

// Run one continuation, holding the first captured panic so the remaining
// entries still get their turn.
fn dispatch(f: Task, first_panic: &mut Option<Panic>) {
    if let Err(p) = panic::catch_unwind(AssertUnwindSafe(f)) {
        debug!("continuation panicked; payload held until the drain finishes");
        if first_panic.is_none() {
            *first_panic = Some(p);
        }
    }
}

/*
 *
 * ===== Eager registry =====
 *
 */

struct SourceState {
    queue: crossbeam_queue::SegQueue<Task>,
    run_requested: AtomicBool,
    // Serialises a push that raced the run latch against the final drain.
    gate: Mutex<()>,
}

/// Concurrent continuation registry for eager states.
///
/// Multiple threads may attach while the producer completes the state. The
/// latch is atomic and the container is a lock-free queue with stable
/// insertion order; the short mutex is held by `push` only around the latch
/// inspection and append, and by `request_run` only for the final sweep that
/// catches entries that were mid-publication when the latch flipped.
///
/// Cloning shares the registry, as shared futures share their continuations.
#[derive(Clone)]
pub struct ContinuationsSource {
    shared: Arc<SourceState>,
}

impl ContinuationsSource {
    pub fn new() -> ContinuationsSource {
        ContinuationsSource {
            shared: Arc::new(SourceState {
                queue: crossbeam_queue::SegQueue::new(),
                run_requested: AtomicBool::new(false),
                gate: Mutex::new(()),
            }),
        }
    }
}

impl Default for ContinuationsSource {
    fn default() -> ContinuationsSource {
        ContinuationsSource::new()
    }
}

impl Continuations for ContinuationsSource {
    fn push(&self, executor: &dyn Executor, f: Task) -> bool {
        let gate = self.shared.gate.lock();

        if !self.shared.run_requested.load(Ordering::Acquire) {
            self.shared.queue.push(f);
            return true;
        }

        drop(gate);

        // The state is already complete; the callback runs on an unspecified
        // thread of the supplied executor.
        debug!("continuations already ran; dispatching pushed callback now");
        executor.execute(f);
        false
    }

    fn request_run(&self) -> bool {
        if self
            .shared
            .run_requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        let mut first_panic = None;

        // Pop and execute what we can without the gate.
        while let Some(f) = self.shared.queue.pop() {
            dispatch(f, &mut first_panic);
        }

        // Some other thread may have been publishing an entry while the
        // latch flipped. Take the gate to wait that out, then drain whatever
        // is left.
        let gate = self.shared.gate.lock();
        while let Some(f) = self.shared.queue.pop() {
            dispatch(f, &mut first_panic);
        }
        drop(gate);

        if let Some(p) = first_panic {
            panic::resume_unwind(p);
        }

        true
    }

    fn is_run_requested(&self) -> bool {
        self.shared.run_requested.load(Ordering::Acquire)
    }
}

impl Drop for SourceState {
    fn drop(&mut self) {
        // Last owner gone without a run request; the entries still run, but
        // panics cannot be allowed out of a destructor.
        while let Some(f) = self.queue.pop() {
            let _ = panic::catch_unwind(AssertUnwindSafe(f));
        }
    }
}

/*
 *
 * ===== Always-deferred registry =====
 *
 */

struct SerialState {
    run_requested: bool,
    entries: Vec<Task>,
}

/// Continuation registry for always-deferred states.
///
/// Deferred states are single-producer/single-consumer by construction, so
/// the latch is a plain bool and the container a plain vector behind one
/// uncontended mutex; no atomics, no lock-free queue.
pub struct SerialContinuations {
    state: Mutex<SerialState>,
}

impl SerialContinuations {
    pub fn new() -> SerialContinuations {
        SerialContinuations {
            state: Mutex::new(SerialState {
                run_requested: false,
                entries: Vec::new(),
            }),
        }
    }
}

impl Default for SerialContinuations {
    fn default() -> SerialContinuations {
        SerialContinuations::new()
    }
}

impl Continuations for SerialContinuations {
    fn push(&self, executor: &dyn Executor, f: Task) -> bool {
        let mut state = self.state.lock();

        if !state.run_requested {
            state.entries.push(f);
            return true;
        }

        drop(state);
        executor.execute(f);
        false
    }

    fn request_run(&self) -> bool {
        let mut state = self.state.lock();

        if state.run_requested {
            return false;
        }
        state.run_requested = true;

        let entries = mem::take(&mut state.entries);
        drop(state);

        let mut first_panic = None;
        for f in entries {
            dispatch(f, &mut first_panic);
        }

        if let Some(p) = first_panic {
            panic::resume_unwind(p);
        }

        true
    }

    fn is_run_requested(&self) -> bool {
        self.state.lock().run_requested
    }
}

impl Drop for SerialContinuations {
    fn drop(&mut self) {
        let entries = mem::take(&mut self.state.get_mut().entries);
        for f in entries {
            let _ = panic::catch_unwind(AssertUnwindSafe(f));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::executor::InlineExecutor;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn drains_in_insertion_order() {
        let source = ContinuationsSource::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..4 {
            let seen = seen.clone();
            assert!(source.push(&InlineExecutor, Box::new(move || seen.lock().push(i))));
        }

        assert!(source.request_run());
        assert!(!source.request_run());
        assert_eq!(*seen.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn push_after_run_dispatches_immediately() {
        let source = ContinuationsSource::new();
        assert!(source.request_run());

        let ran = Arc::new(AtomicUsize::new(0));
        let r = ran.clone();

        assert!(!source.push(
            &InlineExecutor,
            Box::new(move || {
                r.fetch_add(1, Ordering::Relaxed);
            })
        ));
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn serial_registry_same_contract() {
        let source = SerialContinuations::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let r = ran.clone();
        assert!(source.push(
            &InlineExecutor,
            Box::new(move || {
                r.fetch_add(1, Ordering::Relaxed);
            })
        ));
        assert!(!source.is_run_requested());
        assert!(source.request_run());
        assert!(!source.request_run());
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }
}
