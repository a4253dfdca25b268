use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};

/// One-slot storage for an operation state's payload.
///
/// The slot starts uninitialised and is constructed in place by the producer
/// exactly once, between `Launched` and `Ready`. Consumers read it only after
/// the state is ready, so the only synchronisation the cell itself needs is
/// the release/acquire edge on its init flag; the status machine above it
/// polices everything else. `R = ()` is the void case and stores nothing of
/// consequence.
pub(crate) struct Storage<R> {
    slot: UnsafeCell<MaybeUninit<R>>,
    init: AtomicBool,
}

// Exclusive-producer writes before the init flag flips, shared reads after:
// cross-thread writes need R: Send, shared `get` borrows need R: Sync.
unsafe impl<R: Send + Sync> Sync for Storage<R> {}

impl<R> Storage<R> {
    pub fn new() -> Storage<R> {
        Storage {
            slot: UnsafeCell::new(MaybeUninit::uninit()),
            init: AtomicBool::new(false),
        }
    }

    /// Construct the payload in place.
    ///
    /// # Safety
    ///
    /// The caller must be the sole producer and must call this at most once;
    /// the operation state enforces both with its status machine.
    pub unsafe fn set(&self, value: R) {
        debug_assert!(!self.init.load(Ordering::Relaxed), "payload already set");
        unsafe {
            (*self.slot.get()).write(value);
        }
        self.init.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.init.load(Ordering::Acquire)
    }

    /// Borrow the payload.
    ///
    /// # Safety
    ///
    /// The payload must have been set, and no call to `take` may race with
    /// the returned borrow. Callers check readiness first.
    pub unsafe fn get(&self) -> &R {
        debug_assert!(self.init.load(Ordering::Acquire), "payload not set");
        unsafe { (*self.slot.get()).assume_init_ref() }
    }

    /// Move the payload out, leaving the slot empty.
    ///
    /// # Safety
    ///
    /// The payload must have been set and the caller must be the only
    /// consumer taking it.
    pub unsafe fn take(&self) -> R {
        debug_assert!(self.init.load(Ordering::Acquire), "payload not set");
        self.init.store(false, Ordering::Relaxed);
        unsafe { (*self.slot.get()).assume_init_read() }
    }
}

impl<R> Drop for Storage<R> {
    fn drop(&mut self) {
        // Destroy the payload iff it was ever constructed and not taken.
        if *self.init.get_mut() {
            unsafe { self.slot.get_mut().assume_init_drop() }
        }
    }
}

#[cfg(test)]
mod test {
    use super::Storage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn set_then_get_and_take() {
        let storage = Storage::new();
        assert!(!storage.is_set());

        unsafe {
            storage.set(7usize);
            assert!(storage.is_set());
            assert_eq!(*storage.get(), 7);
            assert_eq!(storage.take(), 7);
        }

        assert!(!storage.is_set());
    }

    #[test]
    fn drops_payload_iff_constructed() {
        struct Counted(Arc<AtomicUsize>);

        impl Drop for Counted {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::Relaxed);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));

        let empty = Storage::<Counted>::new();
        drop(empty);
        assert_eq!(drops.load(Ordering::Relaxed), 0);

        let full = Storage::new();
        unsafe { full.set(Counted(drops.clone())) };
        drop(full);
        assert_eq!(drops.load(Ordering::Relaxed), 1);

        let taken = Storage::new();
        unsafe {
            taken.set(Counted(drops.clone()));
            drop(taken.take());
        }
        assert_eq!(drops.load(Ordering::Relaxed), 2);
        drop(taken);
        assert_eq!(drops.load(Ordering::Relaxed), 2);
    }
}
