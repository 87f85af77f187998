use std::{
    fmt::Debug,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

use crate::ptr::RefCounted;

// A max reference count that will trigger a panic once surpassed.
pub(crate) const REFCOUNT_MAX: usize = if (u32::MAX as usize) < (usize::MAX >> 1) {
    u32::MAX as usize
} else {
    usize::MAX >> 1
};

#[cold]
#[track_caller]
fn panic_refcount_overflow() -> ! {
    panic!("intrusive reference count surpassed {REFCOUNT_MAX} references")
}

#[cold]
#[track_caller]
fn panic_refcount_underflow() -> ! {
    panic!("intrusive reference count decremented below zero")
}

/// An atomic share count embedded directly in a pointee.
///
/// A type becomes manageable by [`IntrusivePtr`](crate::IntrusivePtr) by
/// storing one of these and exposing it through [`HasRefCount`]. The count
/// starts at zero and tracks how many handles currently share the object;
/// it can only be modified by the handle machinery, never directly.
///
/// Cloning a `RefCount` yields a fresh zero count: the count describes
/// handles to *this* allocation, so a copied pointee starts out unshared.
#[derive(Default)]
pub struct RefCount {
    count: AtomicUsize,
}

impl RefCount {
    #[inline]
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Returns the current share count.
    ///
    /// Purely observational. Other threads may be incrementing or
    /// decrementing concurrently, so this is not a reliable snapshot —
    /// only the value observed by the final decrement is authoritative.
    #[inline]
    pub fn use_count(&self) -> usize {
        self.count.load(Ordering::Relaxed)
    }

    pub(crate) fn fetch_inc(&self) {
        // Incrementing can be Relaxed: a new reference is only ever formed
        // from an existing one, and handing a reference to another thread
        // already requires synchronization.
        let prev = self.count.fetch_add(1, Ordering::Relaxed);

        if prev >= REFCOUNT_MAX {
            panic_refcount_overflow();
        }
    }

    /// Returns `true` exactly when this call took the count to zero.
    pub(crate) fn dec(&self) -> bool {
        // Release on the decrement so every use of the pointee
        // happens-before the destruction performed by whichever caller
        // observes the 1 -> 0 transition; that caller acquires below.
        let prev = self.count.fetch_sub(1, Ordering::Release);

        if prev == 0 {
            // Undo the wrap-around before reporting the misuse so a caught
            // panic doesn't leave the count poisoned at usize::MAX.
            self.count.fetch_add(1, Ordering::Relaxed);
            panic_refcount_underflow();
        }
        if prev != 1 {
            return false;
        }

        fence(Ordering::Acquire);
        true
    }
}

impl Clone for RefCount {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Debug for RefCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RefCount").field(&self.use_count()).finish()
    }
}

/// The embedding seam between a pointee type and its [`RefCount`].
///
/// Implementing this opts a type into the blanket [`RefCounted`] impl,
/// which supplies the handle hooks in terms of the embedded count and
/// destroys the pointee by reconstructing the `Box` it was allocated in.
/// Because of that, every pointee managed through this trait **must** have
/// been allocated with `Box` (which [`IntrusivePtr::new`] and
/// `From<Box<T>>` take care of); hand a stack or arena pointer to the
/// `unsafe` adoption constructors and the final release will deallocate
/// through the wrong allocator.
///
/// Types with their own counting scheme can skip this trait and implement
/// [`RefCounted`] directly instead.
///
/// # Safety
///
/// The blanket hooks decide when to free the pointee based on whatever
/// counter `ref_count` hands back, so the implementation must be trivial:
/// it must always return the same [`RefCount`], embedded in `self` and
/// shared with no other object, and must have no side effects. Returning
/// a different or shared counter between calls desynchronizes the count
/// from the set of live handles and causes premature destruction.
///
/// A safe impl is rejected:
///
/// ```compile_fail
/// use intrusive_rc::{HasRefCount, RefCount};
///
/// struct Broken(RefCount);
///
/// impl HasRefCount for Broken {
///     fn ref_count(&self) -> &RefCount {
///         &self.0
///     }
/// }
/// ```
///
/// [`IntrusivePtr::new`]: crate::IntrusivePtr::new
pub unsafe trait HasRefCount {
    fn ref_count(&self) -> &RefCount;
}

// SAFETY: `fetch_inc`/`dec` pair up one to one with the hook calls and
// `ref_count` is contractually the same exclusive counter every time, so
// `dec` reports the zero transition to exactly one caller even under
// concurrent releases, and destruction only happens on that transition.
unsafe impl<T: ?Sized + HasRefCount> RefCounted for T {
    #[inline]
    fn add_ref(&self) {
        self.ref_count().fetch_inc();
    }

    #[inline]
    unsafe fn release(&self) {
        if self.ref_count().dec() {
            // Last owner is gone. Reclaim the Box this pointee was
            // allocated in, running the most-derived destructor (through
            // the vtable when `T` is a trait object).
            unsafe { drop(Box::from_raw(self as *const T as *mut T)) };
        }
    }
}
