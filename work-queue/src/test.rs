// SPDX-License-Identifier: Apache-2.0
// Copyright 2023-2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Lock implementations for tests, [`TestNopSyncTypes`] and, with the `std`
//! feature, the hook-running `TestHookSyncTypes`, plus
//! [`Waker`](task::Waker) helpers for driving futures by hand.

extern crate alloc;
use alloc::sync;

use crate::sync_types;
use core::{cell, convert, future, marker, ops, pin, sync::atomic, task};

/// Single-threaded [`Lock`](sync_types::Lock) asserting the absence of
/// recursive locking.
///
/// Taking a `TestNopLock` which is held already panics instead of spinning or
/// blocking. Tests use it to verify that no code path calls back into a lock
/// user, e.g. through a [`Waker`](task::Waker), while its lock is held.
pub struct TestNopLock<T: marker::Send> {
    held: atomic::AtomicBool,
    value: cell::UnsafeCell<T>,
}

impl<T: marker::Send> TestNopLock<T> {
    fn acquire(&self) -> TestNopLockGuard<'_, T> {
        if self.held.swap(true, atomic::Ordering::Acquire) {
            panic!("TestNopLock taken recursively");
        }
        TestNopLockGuard { lock: self }
    }
}

impl<T: marker::Send> convert::From<T> for TestNopLock<T> {
    fn from(value: T) -> Self {
        Self {
            held: atomic::AtomicBool::new(false),
            value: cell::UnsafeCell::new(value),
        }
    }
}

// Safety: access to the value is serialized through the held flag.
unsafe impl<T: marker::Send> marker::Send for TestNopLock<T> {}
unsafe impl<T: marker::Send> marker::Sync for TestNopLock<T> {}

impl<T: marker::Send> sync_types::Lock<T> for TestNopLock<T> {
    type Guard<'a>
        = TestNopLockGuard<'a, T>
    where
        Self: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        self.acquire()
    }
}

impl<T: marker::Send> sync_types::ConstructibleLock<T> for TestNopLock<T> {
    fn get_mut(&mut self) -> &mut T {
        debug_assert!(!*self.held.get_mut());
        self.value.get_mut()
    }
}

/// Guard returned from locking a [`TestNopLock`].
pub struct TestNopLockGuard<'a, T: marker::Send> {
    lock: &'a TestNopLock<T>,
}

impl<'a, T: marker::Send> Drop for TestNopLockGuard<'a, T> {
    fn drop(&mut self) {
        let was_held = self.lock.held.swap(false, atomic::Ordering::Release);
        debug_assert!(was_held);
    }
}

impl<'a, T: marker::Send> ops::Deref for TestNopLockGuard<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // Safety: the guard's existence implies exclusive access.
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T: marker::Send> ops::DerefMut for TestNopLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // Safety: the guard's existence implies exclusive access.
        unsafe { &mut *self.lock.value.get() }
    }
}

/// [`SyncTypes`](sync_types::SyncTypes) built on [`TestNopLock`].
pub struct TestNopSyncTypes;

impl sync_types::SyncTypes for TestNopSyncTypes {
    type Lock<T: marker::Send> = TestNopLock<T>;
}

#[cfg(feature = "std")]
type TestLockHook = alloc::boxed::Box<dyn FnOnce()>;

#[cfg(feature = "std")]
std::thread_local! {
    /// Number of [`TestHookLock`] lock operations to let pass before running the hook.
    static TEST_LOCK_HOOK: cell::RefCell<Option<(usize, TestLockHook)>> = const { cell::RefCell::new(None) };
}

/// Arm a one-shot hook to run on the current thread right before the
/// `skip + 1`-th subsequent [`TestHookLock`] acquisition.
///
/// The hook runs with no [`TestHookLock`] held and may lock any of them
/// itself.
#[cfg(feature = "std")]
pub fn arm_test_lock_hook<F: FnOnce() + 'static>(skip: usize, hook: F) {
    let hook: TestLockHook = alloc::boxed::Box::new(hook);
    TEST_LOCK_HOOK.with(|h| *h.borrow_mut() = Some((skip, hook)));
}

/// Whether a hook armed through [`arm_test_lock_hook()`] is still pending.
#[cfg(feature = "std")]
pub fn test_lock_hook_pending() -> bool {
    TEST_LOCK_HOOK.with(|h| h.borrow().is_some())
}

#[cfg(feature = "std")]
fn run_test_lock_hook() {
    let hook = TEST_LOCK_HOOK.with(|h| {
        let mut h = h.borrow_mut();
        match h.take() {
            Some((0, hook)) => Some(hook),
            Some((skip, hook)) => {
                *h = Some((skip - 1, hook));
                None
            }
            None => None,
        }
    });
    if let Some(hook) = hook {
        hook();
    }
}

/// [`TestNopLock`] running a hook armed through [`arm_test_lock_hook()`]
/// before acquisition.
///
/// Enables tests to deterministically interleave some action with a lock
/// user's sequence of lock operations, e.g. while it had the lock dropped for
/// a memory allocation.
#[cfg(feature = "std")]
pub struct TestHookLock<T: marker::Send> {
    inner: TestNopLock<T>,
}

#[cfg(feature = "std")]
impl<T: marker::Send> convert::From<T> for TestHookLock<T> {
    fn from(value: T) -> Self {
        Self {
            inner: TestNopLock::from(value),
        }
    }
}

#[cfg(feature = "std")]
impl<T: marker::Send> sync_types::Lock<T> for TestHookLock<T> {
    type Guard<'a>
        = TestNopLockGuard<'a, T>
    where
        Self: 'a;

    fn lock(&self) -> Self::Guard<'_> {
        run_test_lock_hook();
        self.inner.acquire()
    }
}

#[cfg(feature = "std")]
impl<T: marker::Send> sync_types::ConstructibleLock<T> for TestHookLock<T> {
    fn get_mut(&mut self) -> &mut T {
        sync_types::ConstructibleLock::get_mut(&mut self.inner)
    }
}

/// [`SyncTypes`](sync_types::SyncTypes) built on [`TestHookLock`].
#[cfg(feature = "std")]
pub struct TestHookSyncTypes;

#[cfg(feature = "std")]
impl sync_types::SyncTypes for TestHookSyncTypes {
    type Lock<T: marker::Send> = TestHookLock<T>;
}

/// [`Waker`](task::Waker) counting its wake-ups.
///
/// Obtain the actual [`Waker`](task::Waker) through
/// [`waker()`](Self::waker) and inspect the number of wake-ups observed so
/// far through [`wakes()`](Self::wakes).
#[derive(Clone, Default)]
pub struct TestWakeCounter {
    wakes: sync::Arc<atomic::AtomicUsize>,
}

struct TestWakeCounterWaker {
    wakes: sync::Arc<atomic::AtomicUsize>,
}

impl alloc::task::Wake for TestWakeCounterWaker {
    fn wake(self: sync::Arc<Self>) {
        self.wakes.fetch_add(1, atomic::Ordering::Relaxed);
    }
}

impl TestWakeCounter {
    /// Create a new [`TestWakeCounter`] with zero wake-ups recorded.
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtain a [`Waker`](task::Waker) accounting its wake-ups at `self`.
    pub fn waker(&self) -> task::Waker {
        task::Waker::from(sync::Arc::new(TestWakeCounterWaker {
            wakes: self.wakes.clone(),
        }))
    }

    /// Number of wake-ups recorded so far.
    pub fn wakes(&self) -> usize {
        self.wakes.load(atomic::Ordering::Relaxed)
    }
}

/// Poll an [`Unpin`](marker::Unpin) [`Future`](future::Future) exactly once.
pub fn poll_once<F: future::Future + marker::Unpin>(f: &mut F, waker: &task::Waker) -> task::Poll<F::Output> {
    let mut cx = task::Context::from_waker(waker);
    future::Future::poll(pin::Pin::new(f), &mut cx)
}

#[test]
#[should_panic(expected = "taken recursively")]
fn test_test_nop_lock_detects_reentry() {
    use sync_types::Lock as _;

    let lock = TestNopLock::from(0u32);
    let _guard = lock.lock();
    let _reentered = lock.lock();
}

#[test]
fn test_test_wake_counter() {
    let counter = TestWakeCounter::new();
    let waker = counter.waker();
    waker.wake_by_ref();
    waker.clone().wake();
    assert_eq!(counter.wakes(), 2);

    let mut ready = core::future::ready(42u32);
    assert!(matches!(poll_once(&mut ready, &waker), task::Poll::Ready(42)));
    assert_eq!(counter.wakes(), 2);
}

#[cfg(feature = "std")]
#[test]
fn test_test_hook_lock_runs_hook_once() {
    use sync_types::Lock as _;

    let runs = sync::Arc::new(atomic::AtomicUsize::new(0));
    let lock = sync::Arc::new(TestHookLock::from(0u32));
    {
        let runs = runs.clone();
        let lock = lock.clone();
        arm_test_lock_hook(1, move || {
            // Not held while the hook runs.
            *lock.lock() += 10;
            runs.fetch_add(1, atomic::Ordering::Relaxed);
        });
    }

    *lock.lock() += 1;
    assert!(test_lock_hook_pending());
    assert_eq!(runs.load(atomic::Ordering::Relaxed), 0);
    *lock.lock() += 1;
    assert!(!test_lock_hook_pending());
    assert_eq!(runs.load(atomic::Ordering::Relaxed), 1);
    assert_eq!(*lock.lock(), 12);
}
