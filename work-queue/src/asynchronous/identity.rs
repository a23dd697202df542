// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`PtrIdentity`]

extern crate alloc;
use alloc::sync::Arc;

use core::{convert, ops};

/// Requester identity compared by reference.
///
/// Two `PtrIdentity` instances compare equal if and only if they refer to the
/// same allocation, irrespective of the pointee's value. Suitable for use as
/// an [`AsyncAdmissionQueue`](super::AsyncAdmissionQueue) identity whenever
/// logical callers are represented by some shared object, like a session or
/// an inspector instance.
pub struct PtrIdentity<T: ?Sized> {
    p: Arc<T>,
}

impl<T: ?Sized> PtrIdentity<T> {
    /// Wrap `p` as an identity equal only to clones of the same [`Arc`].
    pub fn new(p: Arc<T>) -> Self {
        Self { p }
    }

    /// Access the referenced [`Arc`].
    pub fn get(&self) -> &Arc<T> {
        &self.p
    }
}

impl<T: ?Sized> convert::From<Arc<T>> for PtrIdentity<T> {
    fn from(value: Arc<T>) -> Self {
        Self::new(value)
    }
}

impl<T: ?Sized> Clone for PtrIdentity<T> {
    fn clone(&self) -> Self {
        Self { p: self.p.clone() }
    }
}

impl<T: ?Sized> PartialEq for PtrIdentity<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.p, &other.p)
    }
}

impl<T: ?Sized> Eq for PtrIdentity<T> {}

impl<T: ?Sized> ops::Deref for PtrIdentity<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.p
    }
}

#[test]
fn test_ptr_identity_eq() {
    let a = PtrIdentity::new(Arc::new([1u8, 2]));
    let b = PtrIdentity::from(Arc::new([1u8, 2]));
    assert!(a == a.clone());
    assert!(a != b);
    assert_eq!(*a, *b);

    let c = PtrIdentity::new(a.get().clone());
    assert!(a == c);
}
