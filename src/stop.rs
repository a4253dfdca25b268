use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cooperative-cancellation flag with a one-way "request stop"
/// transition.
///
/// A `StopSource` is owned by the operation state (and cloneable to anyone
/// who should be allowed to request a stop); the running task observes the
/// request through a [`StopToken`]. Cancellation is cooperative only: the
/// task may return early, but the state still has to be completed for
/// consumers to observe anything.
///
/// ```
/// use betide::StopSource;
///
/// let source = StopSource::new();
/// let token = source.token();
///
/// assert!(!token.stop_requested());
/// assert!(source.request_stop());
/// // Requests are idempotent; later calls report that the flag was set.
/// assert!(!source.request_stop());
/// assert!(token.stop_requested());
/// ```
#[derive(Clone, Debug)]
pub struct StopSource {
    shared: Arc<AtomicBool>,
}

/// Observer half of a [`StopSource`].
#[derive(Clone, Debug)]
pub struct StopToken {
    shared: Arc<AtomicBool>,
}

impl StopSource {
    pub fn new() -> StopSource {
        StopSource {
            shared: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Latch the stop flag. Returns true iff this call made the transition.
    pub fn request_stop(&self) -> bool {
        !self.shared.swap(true, Ordering::AcqRel)
    }

    pub fn stop_requested(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }

    pub fn token(&self) -> StopToken {
        StopToken {
            shared: self.shared.clone(),
        }
    }
}

impl Default for StopSource {
    fn default() -> StopSource {
        StopSource::new()
    }
}

impl StopToken {
    pub fn stop_requested(&self) -> bool {
        self.shared.load(Ordering::Acquire)
    }
}

/*
 *
 * ===== Stop slot =====
 *
 */

/// Slot filled by states compiled without cancellation support. Zero-sized;
/// a non-stoppable state carries no flag and no atomics for it.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStop;

/// Type-level selection of the stoppable option.
///
/// Implemented by [`StopSource`] (stoppable states) and [`NoStop`]
/// (everything else). The state destructor uses `request` so that dropping a
/// stoppable state cancels its still-running task.
pub trait StopSlot: Send + Sync + 'static {
    fn request(&self);

    fn source(&self) -> Option<&StopSource> {
        None
    }
}

impl StopSlot for NoStop {
    fn request(&self) {}
}

impl StopSlot for StopSource {
    fn request(&self) {
        self.request_stop();
    }

    fn source(&self) -> Option<&StopSource> {
        Some(self)
    }
}
