// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Lock abstraction traits.
//!
//! Without `std`, what kind of lock is available depends entirely on where
//! the code runs: a bare spinlock in firmware, a scheduler-aware mutex
//! elsewhere. Code in this crate is therefore generic over [`SyncTypes`],
//! whose associated [`Lock`] type the embedding environment supplies.
//!
//! [`StdSyncTypes`], available with the `std` feature, maps it onto
//! [`std::sync::Mutex`](std::sync::Mutex).

use core::{convert, marker, ops};

/// Mutual exclusion primitive supplied by the execution environment.
///
/// Implementations may well spin. While a guard is alive, its holder is
/// restricted to short, bounded state updates: no blocking, no memory
/// allocation, no logging and no calls into code passed in from the outside,
/// [`Waker`](core::task::Waker)s in particular. Whatever needs any of these
/// gets recorded under the lock and carried out after the guard is dropped.
pub trait Lock<T: ?Sized>: marker::Send + marker::Sync {
    /// Guard granting access to the protected `T`, releases on drop.
    type Guard<'a>: ops::Deref<Target = T> + ops::DerefMut
    where
        Self: 'a;

    /// Acquire exclusive access, spinning or blocking as the environment
    /// sees fit.
    fn lock(&self) -> Self::Guard<'_>;
}

/// [`Lock`] which can be created around a value and bypassed given exclusive
/// access to it.
pub trait ConstructibleLock<T>: Lock<T> + convert::From<T> {
    /// Access the protected value without locking.
    ///
    /// A `&mut self` rules out any concurrent guard.
    fn get_mut(&mut self) -> &mut T;
}

/// Convenience grouping of an execution environment's synchronization related
/// trait implementations.
pub trait SyncTypes: marker::Unpin + 'static {
    /// The execution environment's implementation of the [`ConstructibleLock`]
    /// trait.
    type Lock<T: marker::Send>: ConstructibleLock<T>;
}

#[cfg(feature = "std")]
mod std_sync_types;
#[cfg(feature = "std")]
pub use std_sync_types::{StdLock, StdSyncTypes};
