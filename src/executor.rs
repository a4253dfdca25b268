use std::sync::Arc;
use std::thread;

/// Unit of work handed to an executor: a boxed zero-argument callable.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Submission interface the engine drives.
///
/// The core submits exactly one task per deferred launch and one per
/// continuation that arrives after its registry already ran. No assumption
/// is made about whether the executor runs tasks synchronously or on another
/// thread; building or tuning a real pool is the surrounding library's job.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Task);
}

/// Runs every task immediately on the submitting thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Task) {
        task();
    }
}

/// Spawns one thread per task.
///
/// ```
/// use betide::{Executor, ThreadExecutor};
/// use std::sync::mpsc::channel;
///
/// let (tx, rx) = channel();
/// ThreadExecutor.execute(Box::new(move || tx.send(2 + 2).unwrap()));
/// assert_eq!(rx.recv().unwrap(), 4);
/// ```
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Task) {
        thread::spawn(task);
    }
}

impl<E: Executor> Executor for Arc<E> {
    fn execute(&self, task: Task) {
        (**self).execute(task)
    }
}

/*
 *
 * ===== Executor slot =====
 *
 */

/// Slot filled by states compiled without an attached executor. Zero-sized.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoExecutor;

/// Slot carrying an attached executor of type `E`.
#[derive(Clone, Debug, Default)]
pub struct WithExecutor<E>(pub E);

/// Type-level selection of the has-executor option.
///
/// `submit` hands the task to the attached executor, or gives it back when
/// the slot is empty so the caller can run it inline.
pub trait ExecutorSlot: Send + Sync + 'static {
    fn submit(&self, task: Task) -> Result<(), Task>;
}

impl ExecutorSlot for NoExecutor {
    fn submit(&self, task: Task) -> Result<(), Task> {
        Err(task)
    }
}

impl<E: Executor> ExecutorSlot for WithExecutor<E> {
    fn submit(&self, task: Task) -> Result<(), Task> {
        self.0.execute(task);
        Ok(())
    }
}
