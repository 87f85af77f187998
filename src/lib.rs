//! Intrusive reference counting: a shared-ownership smart pointer for
//! pointees that embed their own count.
//!
//! [`IntrusivePtr`] is a single raw pointer wide — there is no separate
//! control block, the share count lives inside the pointee as a
//! [`RefCount`]. A type opts in by exposing its embedded count through
//! [`HasRefCount`]; types with their own counting scheme implement the
//! [`RefCounted`] hooks directly instead.
//!
//! The pointee is destroyed exactly once, synchronously, by whichever
//! handle performs the release that takes the count to zero — safe under
//! contention from any number of threads holding their own handles to it.
//! Cycles are kept alive forever and there are no weak references; this is
//! a leaf-data primitive, not a garbage collector.
//!
//! ```
//! use intrusive_rc::{HasRefCount, IntrusivePtr, RefCount};
//!
//! struct Texture {
//!     refs: RefCount,
//!     id: u32,
//! }
//!
//! // SAFETY: `refs` is embedded in and exclusive to this pointee.
//! unsafe impl HasRefCount for Texture {
//!     fn ref_count(&self) -> &RefCount {
//!         &self.refs
//!     }
//! }
//!
//! let first = IntrusivePtr::new(Texture {
//!     refs: RefCount::new(),
//!     id: 7,
//! });
//! let second = first.clone();
//! assert_eq!(IntrusivePtr::use_count(&second), 2);
//! assert_eq!(second.id, 7);
//!
//! drop(first);
//! assert_eq!(IntrusivePtr::use_count(&second), 1);
//! ```

pub mod count;
pub mod ptr;

pub use count::{HasRefCount, RefCount};
pub use ptr::{IntrusivePtr, RefCounted};
