// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

extern crate alloc;
use alloc::collections::VecDeque;

use crate::sync_types;
use core::{marker, ops};

/// Error returned by [`SyncVecDeque::try_reserve()`] and
/// [`SyncVecDeque::try_with_capacity()`].
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum SyncVecDequeError {
    /// The memory allocation has failed.
    #[error("memory allocation failure")]
    MemoryAllocationFailure,
}

/// [`Lock`](sync_types::Lock)-protectable [`VecDeque`] proxy with support for
/// unlocked reallocations.
///
/// As an execution environment's [`Lock`](sync_types::Lock) implementation
/// might be of the spinlock kind, memory allocations under such a lock are to
/// be avoided. `SyncVecDeque` implements a "Read-Copy-Update" style pattern
/// for growing a [`VecDeque`]: the lock will get dropped for the memory
/// allocation, reacquired afterwards and the original [`VecDeque`]'s elements
/// moved over to the new storage under the reacquired lock, retaining their
/// order.
///
/// `SyncVecDeque` does not wrap itself in a [`Lock`](sync_types::Lock): it is
/// expected to live in some containing `struct` protected by one as a whole.
/// [`try_reserve()`](Self::try_reserve) gets handed a projection function for
/// locating the `SyncVecDeque` within the locked containing value.
///
/// Even though the inner [`VecDeque`] is fully exposed via
/// [`DerefMut`](ops::DerefMut), users should not push elements through a
/// [locking guard](sync_types::Lock::Guard) without having reserved capacity
/// for them first.
pub struct SyncVecDeque<T: marker::Send> {
    /// The managed [`VecDeque`] instance.
    d: VecDeque<T>,
    /// Sum of the requested additional capacities of all currently pending
    /// concurrent [`try_reserve()`](Self::try_reserve) requests.
    pending_reservations_additional_capacity: usize,
}

impl<T: marker::Send> SyncVecDeque<T> {
    /// Create a new empty `SyncVecDeque`.
    pub fn new() -> Self {
        Self {
            d: VecDeque::new(),
            pending_reservations_additional_capacity: 0,
        }
    }

    /// Create a new empty `SyncVecDeque` with storage preallocated for
    /// `capacity` elements.
    ///
    /// # Errors:
    ///
    /// * [`SyncVecDequeError::MemoryAllocationFailure`] - Memory allocation
    ///   failure.
    pub fn try_with_capacity(capacity: usize) -> Result<Self, SyncVecDequeError> {
        let mut d = VecDeque::new();
        d.try_reserve_exact(capacity)
            .map_err(|_| SyncVecDequeError::MemoryAllocationFailure)?;
        Ok(Self {
            d,
            pending_reservations_additional_capacity: 0,
        })
    }

    /// Reserve capacity for `additional_capacity` more elements with lock
    /// management support.
    ///
    /// To be called with the [`Lock`](sync_types::Lock) protecting the
    /// containing `OT` locked. The corresponding locking `guard` is to be
    /// handed over by the caller and will get returned back. **Note that the
    /// `guard` may get dropped and reacquired in the course, so any state
    /// protected by the [`Lock`](sync_types::Lock) must get reread and
    /// reevaluated by the caller!** Moreover, the capacity reservation is
    /// valid only for the lifetime of the returned guard.
    ///
    /// If the underlying [`VecDeque`]'s capacity is already sufficient, the
    /// original `guard` simply gets returned back. Otherwise
    /// * the guard will get dropped,
    /// * storage sufficient to hold the additional requested capacity gets
    ///   allocated outside the lock,
    /// * the lock gets reacquired,
    /// * if the memory allocation was successful, the original elements get
    ///   moved into the new storage, in order,
    /// * the guard for the *reacquired* lock gets returned back to the caller.
    ///
    /// Multiple concurrent reservations are accounted for.
    ///
    /// # Arguments:
    ///
    /// * `lock` - The [`Lock`](sync_types::Lock) protecting the containing
    ///   `OT`.
    /// * `guard` - [`Locking guard`](sync_types::Lock::Guard) for `lock`. Will
    ///   get returned back to the caller, **but might have been dropped and
    ///   reacquired in the course**.
    /// * `project` - Locate the `SyncVecDeque` within the containing `OT`.
    /// * `additional_capacity` - The additional capacity to reserve.
    pub fn try_reserve<'a, OT: ?Sized, L: sync_types::Lock<OT>>(
        lock: &'a L,
        mut guard: L::Guard<'a>,
        project: fn(&mut OT) -> &mut Self,
        additional_capacity: usize,
    ) -> (L::Guard<'a>, Result<(), SyncVecDequeError>) {
        let reallocated_capacity = {
            let this = project(&mut guard);
            match this
                .d
                .len()
                .checked_add(this.pending_reservations_additional_capacity)
                .and_then(|c| c.checked_add(additional_capacity))
            {
                Some(reallocated_capacity) => reallocated_capacity,
                None => return (guard, Err(SyncVecDequeError::MemoryAllocationFailure)),
            }
        };

        if project(&mut guard).d.capacity() >= reallocated_capacity {
            return (guard, Ok(()));
        }
        // Announce the pending reallocation. From now on, after releasing the lock,
        // any subsequent concurrent reallocation will include the requested
        // number of spare entries for us.
        project(&mut guard).pending_reservations_additional_capacity += additional_capacity;
        drop(guard);

        let mut reallocated_d = VecDeque::new();
        if reallocated_d.try_reserve_exact(reallocated_capacity).is_err() {
            let mut guard = lock.lock();
            project(&mut guard).pending_reservations_additional_capacity -= additional_capacity;
            return (guard, Err(SyncVecDequeError::MemoryAllocationFailure));
        }

        let mut guard = lock.lock();
        let this = project(&mut guard);
        if this.d.capacity()
            >= reallocated_capacity.min(this.d.len() + this.pending_reservations_additional_capacity)
        {
            // Someone else came in and did the allocation already, including
            // the entries for us.
            this.pending_reservations_additional_capacity -= additional_capacity;
            return (guard, Ok(()));
        }

        debug_assert!(reallocated_capacity > this.d.len());
        reallocated_d.append(&mut this.d);
        this.d = reallocated_d;
        this.pending_reservations_additional_capacity -= additional_capacity;

        (guard, Ok(()))
    }
}

impl<T: marker::Send> ops::Deref for SyncVecDeque<T> {
    type Target = VecDeque<T>;

    fn deref(&self) -> &Self::Target {
        &self.d
    }
}

impl<T: marker::Send> ops::DerefMut for SyncVecDeque<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.d
    }
}

impl<T: marker::Send> Default for SyncVecDeque<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[test]
fn test_sync_vec_deque_reserve_keeps_order() {
    use crate::sync_types::Lock as _;
    use crate::test::TestNopLock;

    struct Outer {
        unrelated: u32,
        d: SyncVecDeque<u32>,
    }

    fn outer_d(outer: &mut Outer) -> &mut SyncVecDeque<u32> {
        &mut outer.d
    }

    let lock = TestNopLock::from(Outer {
        unrelated: 7,
        d: SyncVecDeque::new(),
    });

    for i in 0..3u32 {
        let (mut guard, r) = SyncVecDeque::try_reserve(&lock, lock.lock(), outer_d, 1);
        r.unwrap();
        let cap = guard.d.capacity();
        guard.d.push_back(i);
        assert_eq!(guard.d.capacity(), cap);
    }

    // Force a reallocation with elements present, after wrapping the ring
    // buffer's head around.
    {
        let mut guard = lock.lock();
        assert_eq!(guard.d.pop_front(), Some(0));
        guard.d.push_back(3);
    }
    let additional = lock.lock().d.capacity() + 5;
    let (mut guard, r) = SyncVecDeque::try_reserve(&lock, lock.lock(), outer_d, additional);
    r.unwrap();
    assert!(guard.d.capacity() >= guard.d.len() + additional);
    assert_eq!(guard.d.iter().copied().collect::<alloc::vec::Vec<_>>(), [1, 2, 3]);
    assert_eq!(guard.unrelated, 7);
    assert_eq!(guard.d.pending_reservations_additional_capacity, 0);
    guard.d.push_back(4);
    assert_eq!(guard.d.back(), Some(&4));
}

#[test]
fn test_sync_vec_deque_reserve_overflow() {
    use crate::sync_types::Lock as _;
    use crate::test::TestNopLock;

    fn ident(d: &mut SyncVecDeque<u8>) -> &mut SyncVecDeque<u8> {
        d
    }

    let lock = TestNopLock::from(SyncVecDeque::<u8>::new());
    lock.lock().push_back(0);
    let (guard, r) = SyncVecDeque::try_reserve(&lock, lock.lock(), ident, usize::MAX);
    assert!(matches!(r, Err(SyncVecDequeError::MemoryAllocationFailure)));
    assert_eq!(guard.len(), 1);
    assert_eq!(guard.pending_reservations_additional_capacity, 0);
}
