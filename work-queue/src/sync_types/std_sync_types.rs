// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`SyncTypes`](super::SyncTypes) for the locking types
//! provided by Rust `std`.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::{convert, marker};

/// [`Lock`](super::Lock) trait implementation built on Rust `std`
/// [`Mutex`](std::sync::Mutex).
///
/// Poisoning is ignored: none of this crate's users of the lock leave the
/// protected state inconsistent across a potential panic point.
pub struct StdLock<T: marker::Send> {
    mtx: Mutex<T>,
}

impl<T: marker::Send> super::Lock<T> for StdLock<T> {
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        T: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        self.mtx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: marker::Send> super::ConstructibleLock<T> for StdLock<T> {
    fn get_mut(&mut self) -> &mut T {
        self.mtx.get_mut().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: marker::Send> convert::From<T> for StdLock<T> {
    fn from(value: T) -> Self {
        Self { mtx: Mutex::new(value) }
    }
}

/// [`SyncTypes`](super::SyncTypes) trait implementation based on Rust
/// [`std::sync`].
pub struct StdSyncTypes {}

impl super::SyncTypes for StdSyncTypes {
    type Lock<T: marker::Send> = StdLock<T>;
}

#[test]
fn test_std_lock_recovers_from_poison() {
    use super::Lock as _;
    use std::sync::Arc;

    let lock = Arc::new(StdLock::from(1u32));
    let poisoner = lock.clone();
    let r = std::thread::spawn(move || {
        let _guard = poisoner.lock();
        panic!("poison the lock");
    })
    .join();
    assert!(r.is_err());

    *lock.lock() += 1;
    assert_eq!(*lock.lock(), 2);
}
