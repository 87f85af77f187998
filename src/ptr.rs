use std::{
    cmp::Ordering,
    fmt::{Debug, Display},
    hash::{Hash, Hasher},
    mem,
    ops::Deref,
    ptr::NonNull,
};

use crate::count::HasRefCount;

/// The two hook operations a pointee provides to be manageable by
/// [`IntrusivePtr`].
///
/// Resolved statically per pointee type; object-safe so handles over trait
/// objects work. Most types get this for free by embedding a
/// [`RefCount`](crate::RefCount) and implementing
/// [`HasRefCount`](crate::HasRefCount); implement it directly only for
/// pointees with their own counting scheme.
///
/// # Safety
///
/// Implementations must uphold the handle's ownership contract:
/// - `add_ref` and `release` are safe to call concurrently on the same
///   object from different threads.
/// - each `release` balances one prior `add_ref`, and the call balancing
///   the last outstanding `add_ref` destroys the pointee exactly once,
///   even when multiple releases race.
/// - `add_ref` never invalidates the pointee.
pub unsafe trait RefCounted {
    fn add_ref(&self);

    /// Gives up one reference, destroying the pointee if it was the last.
    ///
    /// # Safety
    ///
    /// The caller must own an outstanding reference and must not use the
    /// pointee afterwards through any pointer derived from this one.
    unsafe fn release(&self);
}

#[cold]
#[track_caller]
fn panic_deref_null() -> ! {
    panic!("dereferenced a null IntrusivePtr")
}

/// A shared-ownership handle to a pointee that embeds its own reference
/// count.
///
/// Unlike [`std::sync::Arc`] there is no separate control block: the count
/// lives inside the pointee, so a handle is a single raw pointer and can be
/// reconstructed from one (see [`IntrusivePtr::into_raw`] and
/// [`IntrusivePtr::from_raw`]).
///
/// A handle is either empty ("null") or owns one reference to its pointee:
/// cloning increments the embedded count, dropping decrements it, and the
/// decrement that observes the count reach zero destroys the pointee.
/// Moves transfer the owned reference without touching the count.
///
/// Distinct handles aliasing the same pointee may be used from different
/// threads freely (the count is atomic); mutating one *handle instance*
/// from two threads still requires external synchronization, same as any
/// `&mut` access.
pub struct IntrusivePtr<T: ?Sized + RefCounted> {
    ptr: Option<NonNull<T>>,
}

impl<T: ?Sized + RefCounted> IntrusivePtr<T> {
    /// An empty handle.
    #[inline]
    pub const fn null() -> Self {
        Self { ptr: None }
    }

    /// Moves `value` to the heap and returns the first handle to it,
    /// performing the initial increment.
    #[inline]
    pub fn new(value: T) -> Self
    where
        T: Sized,
    {
        Self::from(Box::new(value))
    }

    /// Adopts a raw pointer **without** incrementing the count, taking over
    /// one outstanding reference from the caller. Null yields an empty
    /// handle.
    ///
    /// This is the inverse of [`IntrusivePtr::into_raw`] and the way to
    /// re-wrap a pointee that was handed out with a reference "baked in".
    ///
    /// # Safety
    ///
    /// `ptr` must be null, or point to a live pointee on which the caller
    /// owns an outstanding reference that is transferred to the new handle
    /// (the caller must not release it itself afterwards). Whether the
    /// allocation matches what `T`'s `release` will reclaim is the
    /// caller's responsibility — for [`HasRefCount`] pointees that means
    /// the object came from a `Box`.
    #[inline]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new(ptr),
        }
    }

    /// Adopts a raw pointer and increments the count, leaving the caller's
    /// own reference (if any) untouched. Null yields an empty handle.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or point to a live pointee that stays live for
    /// the duration of this call.
    #[inline]
    pub unsafe fn from_raw_add_ref(ptr: *mut T) -> Self {
        let ptr = NonNull::new(ptr);
        if let Some(ptr) = ptr {
            unsafe { ptr.as_ref() }.add_ref();
        }
        Self { ptr }
    }

    /// Detaches the pointer without decrementing, consuming the handle.
    ///
    /// The caller becomes responsible for the handle's reference: balance
    /// it with exactly one [`release`](RefCounted::release) or adopt it
    /// back with [`IntrusivePtr::from_raw`]. Returns `None` for an empty
    /// handle.
    #[inline]
    pub fn into_raw(this: Self) -> Option<NonNull<T>> {
        let ptr = this.ptr;
        mem::forget(this);
        ptr
    }

    /// Takes the pointer out of `self`, leaving it empty. The count is
    /// untouched; the returned handle now owns the reference.
    #[inline]
    pub fn take(&mut self) -> Self {
        mem::replace(self, Self::null())
    }

    /// Drops the current content (releasing its reference) and leaves the
    /// handle empty. Replacing the content instead is plain assignment.
    #[inline]
    pub fn reset(&mut self) {
        *self = Self::null();
    }

    /// Checked access to the pointee.
    #[inline]
    pub fn get(&self) -> Option<&T> {
        self.ptr.map(|ptr| unsafe { ptr.as_ref() })
    }

    /// The raw pointer, null for an empty handle. Ownership is unaffected
    /// and the pointee is only guaranteed live while some handle owns it.
    #[inline]
    pub fn as_ptr(&self) -> *mut T
    where
        T: Sized,
    {
        match self.ptr {
            Some(ptr) => ptr.as_ptr(),
            None => std::ptr::null_mut(),
        }
    }

    #[inline]
    pub const fn is_null(&self) -> bool {
        self.ptr.is_none()
    }

    /// Exchanges the pointers of two handles. The counts are untouched.
    #[inline]
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
    }

    // Address identity, usable for unsized pointees and empty handles.
    fn thin(&self) -> *const () {
        match self.ptr {
            Some(ptr) => ptr.as_ptr() as *const (),
            None => std::ptr::null(),
        }
    }
}

impl<T: ?Sized + HasRefCount> IntrusivePtr<T> {
    /// Number of handles currently sharing the pointee, 0 for an empty
    /// handle. Same caveats as [`RefCount::use_count`](crate::RefCount::use_count).
    ///
    /// Associated fn so it can't shadow a pointee method.
    #[inline]
    pub fn use_count(this: &Self) -> usize {
        match this.get() {
            Some(value) => value.ref_count().use_count(),
            None => 0,
        }
    }
}

/// Adopts an existing allocation, performing the initial increment.
impl<T: ?Sized + RefCounted> From<Box<T>> for IntrusivePtr<T> {
    fn from(value: Box<T>) -> Self {
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(value)) };
        unsafe { ptr.as_ref() }.add_ref();
        Self { ptr: Some(ptr) }
    }
}

impl<T: ?Sized + RefCounted> Clone for IntrusivePtr<T> {
    #[inline]
    fn clone(&self) -> Self {
        if let Some(value) = self.get() {
            value.add_ref();
        }
        Self { ptr: self.ptr }
    }
}

impl<T: ?Sized + RefCounted> Drop for IntrusivePtr<T> {
    #[inline]
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr {
            // This handle owns a reference, which satisfies `release`'s
            // contract; the pointee is not touched afterwards.
            unsafe { ptr.as_ref().release() };
        }
    }
}

impl<T: ?Sized + RefCounted> Default for IntrusivePtr<T> {
    #[inline]
    fn default() -> Self {
        Self::null()
    }
}

impl<T: ?Sized + RefCounted> Deref for IntrusivePtr<T> {
    type Target = T;

    #[inline]
    #[track_caller]
    fn deref(&self) -> &T {
        match self.get() {
            Some(value) => value,
            None => panic_deref_null(),
        }
    }
}

// Comparisons are raw-pointer identity, never deep equality, so handles can
// key ordered and hashed containers. Cross-pointee-type equality is allowed
// (two handles produced by an upcast still compare equal).

impl<T: ?Sized + RefCounted, U: ?Sized + RefCounted> PartialEq<IntrusivePtr<U>>
    for IntrusivePtr<T>
{
    #[inline]
    fn eq(&self, other: &IntrusivePtr<U>) -> bool {
        self.thin() == other.thin()
    }
}

impl<T: ?Sized + RefCounted> Eq for IntrusivePtr<T> {}

impl<T: ?Sized + RefCounted> PartialEq<*mut T> for IntrusivePtr<T> {
    #[inline]
    fn eq(&self, other: &*mut T) -> bool {
        self.thin() == *other as *const ()
    }
}

impl<T: ?Sized + RefCounted> PartialEq<*const T> for IntrusivePtr<T> {
    #[inline]
    fn eq(&self, other: &*const T) -> bool {
        self.thin() == *other as *const ()
    }
}

impl<T: ?Sized + RefCounted> PartialOrd for IntrusivePtr<T> {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: ?Sized + RefCounted> Ord for IntrusivePtr<T> {
    #[inline]
    fn cmp(&self, other: &Self) -> Ordering {
        self.thin().cmp(&other.thin())
    }
}

impl<T: ?Sized + RefCounted> Hash for IntrusivePtr<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.thin().hash(state);
    }
}

impl<T: Debug + ?Sized + RefCounted> Debug for IntrusivePtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => Debug::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

impl<T: Display + ?Sized + RefCounted> Display for IntrusivePtr<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.get() {
            Some(value) => Display::fmt(value, f),
            None => f.write_str("null"),
        }
    }
}

unsafe impl<T: Send + Sync + ?Sized + RefCounted> Send for IntrusivePtr<T> {}
unsafe impl<T: Send + Sync + ?Sized + RefCounted> Sync for IntrusivePtr<T> {}

/// Converts an `IntrusivePtr<T>` into an `IntrusivePtr<dyn Trait>` for a
/// trait `T` implements, preserving the owned reference (the count is
/// untouched). Empty handles convert to empty handles.
///
/// The conversion is the built-in unsizing coercion applied to the detached
/// pointer, so an invalid target type is a compile error:
///
/// ```
/// use intrusive_rc::{upcast, HasRefCount, IntrusivePtr, RefCount};
///
/// trait Draw: HasRefCount {
///     fn draw(&self) -> &'static str;
/// }
///
/// struct Point(RefCount);
///
/// // SAFETY: the count is embedded in and exclusive to this pointee.
/// unsafe impl HasRefCount for Point {
///     fn ref_count(&self) -> &RefCount {
///         &self.0
///     }
/// }
///
/// impl Draw for Point {
///     fn draw(&self) -> &'static str {
///         "."
///     }
/// }
///
/// let point = IntrusivePtr::new(Point(RefCount::new()));
/// let drawable: IntrusivePtr<dyn Draw> = upcast!(point.clone() => dyn Draw);
/// assert_eq!(IntrusivePtr::use_count(&drawable), 2);
/// assert_eq!(drawable.draw(), ".");
/// ```
#[macro_export]
macro_rules! upcast {
    ($ptr:expr => $Target:ty) => {
        match $crate::IntrusivePtr::into_raw($ptr) {
            ::std::option::Option::Some(raw) => {
                // Unsizing coercion; rejects anything but a valid upcast.
                let raw: *mut $Target = raw.as_ptr();
                // SAFETY: `raw` carries the reference the source handle
                // owned; the coercion changes only pointer metadata.
                unsafe { $crate::IntrusivePtr::<$Target>::from_raw(raw) }
            }
            ::std::option::Option::None => $crate::IntrusivePtr::<$Target>::null(),
        }
    };
}

#[cfg(test)]
mod test {
    use std::collections::{BTreeSet, HashSet};

    use crate::{HasRefCount, IntrusivePtr, RefCount};

    #[derive(Debug)]
    struct Leaf {
        refs: RefCount,
        value: u32,
    }

    impl Leaf {
        fn new(value: u32) -> IntrusivePtr<Leaf> {
            IntrusivePtr::new(Leaf {
                refs: RefCount::new(),
                value,
            })
        }
    }

    // SAFETY: `refs` is embedded in and exclusive to this pointee.
    unsafe impl HasRefCount for Leaf {
        fn ref_count(&self) -> &RefCount {
            &self.refs
        }
    }

    impl std::fmt::Display for Leaf {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "leaf #{}", self.value)
        }
    }

    #[test]
    fn clone_and_drop_track_the_count() {
        let first = Leaf::new(7);
        assert_eq!(IntrusivePtr::use_count(&first), 1);

        let second = first.clone();
        assert_eq!(IntrusivePtr::use_count(&first), 2);
        assert_eq!(second.value, 7);

        drop(first);
        assert_eq!(IntrusivePtr::use_count(&second), 1);
    }

    #[test]
    fn take_transfers_without_counting() {
        let mut first = Leaf::new(3);
        let second = first.take();

        assert!(first.is_null());
        assert_eq!(IntrusivePtr::use_count(&first), 0);
        assert_eq!(IntrusivePtr::use_count(&second), 1);
    }

    #[test]
    fn reset_and_assign_release() {
        let mut handle = Leaf::new(1);
        let alias = handle.clone();

        handle.reset();
        assert!(handle.is_null());
        assert_eq!(IntrusivePtr::use_count(&alias), 1);

        handle = alias.clone();
        assert_eq!(IntrusivePtr::use_count(&alias), 2);
        assert!(handle == alias);
        handle = Leaf::new(2);
        assert_eq!(IntrusivePtr::use_count(&alias), 1);
        assert_eq!(handle.value, 2);
    }

    #[test]
    fn swap_exchanges_pointers_only() {
        let mut first = Leaf::new(1);
        let mut second = Leaf::new(2);

        first.swap(&mut second);
        assert_eq!(first.value, 2);
        assert_eq!(second.value, 1);
        assert_eq!(IntrusivePtr::use_count(&first), 1);
        assert_eq!(IntrusivePtr::use_count(&second), 1);
    }

    #[test]
    fn detach_and_adopt_round_trip() {
        let first = Leaf::new(9);
        let second = first.clone();
        assert_eq!(IntrusivePtr::use_count(&first), 2);

        let raw = IntrusivePtr::into_raw(second).unwrap();
        assert_eq!(IntrusivePtr::use_count(&first), 2);

        let adopted = unsafe { IntrusivePtr::from_raw(raw.as_ptr()) };
        assert_eq!(IntrusivePtr::use_count(&first), 2);
        drop(adopted);
        assert_eq!(IntrusivePtr::use_count(&first), 1);
    }

    #[test]
    fn from_raw_add_ref_shares() {
        let first = Leaf::new(4);
        let second = unsafe { IntrusivePtr::from_raw_add_ref(first.as_ptr()) };

        assert_eq!(IntrusivePtr::use_count(&first), 2);
        assert_eq!(second.value, 4);
    }

    #[test]
    fn null_pointers_are_legal() {
        let adopted = unsafe { IntrusivePtr::<Leaf>::from_raw(std::ptr::null_mut()) };
        assert!(adopted.is_null());

        let shared = unsafe { IntrusivePtr::<Leaf>::from_raw_add_ref(std::ptr::null_mut()) };
        assert!(shared.is_null());
        assert!(IntrusivePtr::into_raw(shared).is_none());
    }

    #[test]
    fn get_is_checked() {
        let handle = Leaf::new(5);
        assert_eq!(handle.get().map(|leaf| leaf.value), Some(5));
        assert!(IntrusivePtr::<Leaf>::null().get().is_none());
    }

    #[test]
    #[should_panic(expected = "null IntrusivePtr")]
    fn deref_null_panics() {
        let handle = IntrusivePtr::<Leaf>::null();
        let _value = handle.value;
    }

    #[test]
    fn identity_comparisons() {
        let first = Leaf::new(1);
        let alias = first.clone();
        let other = Leaf::new(1);

        assert_eq!(first, alias);
        assert_ne!(first, other);
        assert_eq!(first, first.as_ptr());
        assert_eq!(first, first.as_ptr() as *const Leaf);
        assert_ne!(first, other.as_ptr());
        assert_eq!(IntrusivePtr::<Leaf>::null(), IntrusivePtr::<Leaf>::null());
        assert_eq!(IntrusivePtr::<Leaf>::null(), std::ptr::null_mut::<Leaf>());
    }

    #[test]
    fn container_keys() {
        let first = Leaf::new(1);
        let second = Leaf::new(2);

        let ordered: BTreeSet<_> = [first.clone(), second.clone(), first.clone()]
            .into_iter()
            .collect();
        assert_eq!(ordered.len(), 2);

        let hashed: HashSet<_> = [first.clone(), second, first].into_iter().collect();
        assert_eq!(hashed.len(), 2);
    }

    #[test]
    fn debug_forwards_to_pointee() {
        let handle = Leaf::new(6);
        assert_eq!(
            format!("{handle:?}"),
            "Leaf { refs: RefCount(1), value: 6 }"
        );
        assert_eq!(format!("{:?}", IntrusivePtr::<Leaf>::null()), "null");
    }

    #[test]
    fn display_forwards_to_pointee() {
        let handle = Leaf::new(8);
        assert_eq!(handle.to_string(), "leaf #8");
        assert_eq!(IntrusivePtr::<Leaf>::null().to_string(), "null");
    }
}
