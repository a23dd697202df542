// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Implementation of [`AsyncAdmissionQueue`]

extern crate alloc;
use alloc::sync::Arc;

use crate::{
    alloc::{SyncVecDeque, SyncVecDequeError},
    sync_types::{self, ConstructibleLock as _, Lock as _},
};
use core::{convert, future, marker, mem, num, pin, task};
use log::{debug, trace, warn};

/// Error information returned by the [`AsyncAdmissionQueue`] API.
#[derive(Clone, Copy, Debug, thiserror::Error)]
pub enum AsyncAdmissionQueueError {
    /// Memory allocation failure.
    ///
    /// The request has not been enqueued and the queue's state is unchanged.
    #[error("memory allocation failure")]
    MemoryAllocationFailure,

    /// Internal error.
    #[error("internal error")]
    Internal,
}

impl convert::From<SyncVecDequeError> for AsyncAdmissionQueueError {
    fn from(value: SyncVecDequeError) -> Self {
        match value {
            SyncVecDequeError::MemoryAllocationFailure => Self::MemoryAllocationFailure,
        }
    }
}

/// Internal representation of a waiter enqueued to an
/// [`AsyncAdmissionQueue`].
struct AsyncAdmissionQueueWaiter<I: Eq + marker::Send> {
    /// The identity to make the owner once the waiter is due.
    identity: I,
    /// The waker to invoke once ownership has been handed over to the waiter.
    waker: Option<task::Waker>,
    /// The waiter's assigned id.
    waiter_id: num::NonZeroU64,
}

/// The current owner's exclusive hold on an [`AsyncAdmissionQueue`].
struct AsyncAdmissionQueueHold<I: Eq + marker::Send> {
    /// The owner's identity.
    owner: I,
    /// Number of grants issued to `owner` in the current generation and not
    /// returned yet. Never zero.
    outstanding: usize,
    /// Id of the waiter ownership has been handed over to, as long as the
    /// associated [`AsyncAdmissionQueueRequestFuture`] hasn't claimed its
    /// grant yet. The unclaimed grant is included in `outstanding`.
    handed_over_to: Option<num::NonZeroU64>,
}

/// Noteworthy [`AsyncAdmissionQueue`] state transitions, recorded under the
/// lock and logged after its release.
#[derive(Clone, Copy, Debug)]
enum AsyncAdmissionQueueEvent {
    Granted {
        generation: u64,
    },
    Reentered {
        generation: u64,
        outstanding: usize,
    },
    Enqueued {
        waiter_id: num::NonZeroU64,
        generation: u64,
        waiting: usize,
    },
    StaleReturn {
        generation: u64,
        current_generation: u64,
    },
    ExcessReturn {
        generation: u64,
    },
    HandedOver {
        waiter_id: num::NonZeroU64,
        generation: u64,
    },
    Idle {
        generation: u64,
    },
    WaiterCancelled {
        waiter_id: num::NonZeroU64,
    },
    HandoverAbandoned {
        waiter_id: num::NonZeroU64,
        generation: u64,
    },
}

impl AsyncAdmissionQueueEvent {
    fn log(&self) {
        match *self {
            Self::Granted { generation } => {
                trace!("admission queue: idle, granted generation {}", generation);
            }
            Self::Reentered {
                generation,
                outstanding,
            } => {
                trace!(
                    "admission queue: reentrant grant in generation {}, {} outstanding",
                    generation, outstanding
                );
            }
            Self::Enqueued {
                waiter_id,
                generation,
                waiting,
            } => {
                trace!(
                    "admission queue: enqueued waiter {} behind generation {}, {} waiting",
                    waiter_id, generation, waiting
                );
            }
            Self::StaleReturn {
                generation,
                current_generation,
            } => {
                trace!(
                    "admission queue: ignoring release from stale generation {}, current is {}",
                    generation, current_generation
                );
            }
            Self::ExcessReturn { generation } => {
                warn!(
                    "admission queue: release in generation {} with no grants outstanding, ignoring",
                    generation
                );
            }
            Self::HandedOver { waiter_id, generation } => {
                debug!(
                    "admission queue: handing over to waiter {}, generation {}",
                    waiter_id, generation
                );
            }
            Self::Idle { generation } => {
                debug!("admission queue: idle after generation {}", generation);
            }
            Self::WaiterCancelled { waiter_id } => {
                debug!("admission queue: cancelling enqueued waiter {}", waiter_id);
            }
            Self::HandoverAbandoned { waiter_id, generation } => {
                debug!(
                    "admission queue: waiter {} dropped before claiming generation {}",
                    waiter_id, generation
                );
            }
        }
    }
}

/// Work to be carried out only after the [`AsyncAdmissionQueue`]'s lock has
/// been released.
///
/// Waking a [`Waker`](task::Waker) or dropping one, dropping an identity and
/// emitting log records all potentially run arbitrary code, which might even
/// call back into the queue. None of that may happen with the lock held.
#[must_use]
struct AsyncAdmissionQueueUnlockedWork<I> {
    /// At most two transitions happen per locked section: an abandoned
    /// handover followed by the resulting one.
    events: [Option<AsyncAdmissionQueueEvent>; 2],
    wake: Option<task::Waker>,
    dispose_waker: Option<task::Waker>,
    dispose_identity: Option<I>,
}

impl<I> AsyncAdmissionQueueUnlockedWork<I> {
    fn none() -> Self {
        Self {
            events: [None, None],
            wake: None,
            dispose_waker: None,
            dispose_identity: None,
        }
    }

    fn event(event: AsyncAdmissionQueueEvent) -> Self {
        Self::none().preceded_by(event)
    }

    /// Record `event` as having happened before any other recorded already.
    fn preceded_by(mut self, event: AsyncAdmissionQueueEvent) -> Self {
        debug_assert!(self.events[1].is_none());
        self.events = [Some(event), self.events[0]];
        self
    }

    fn with_disposed_identity(mut self, identity: I) -> Self {
        self.dispose_identity = Some(identity);
        self
    }

    /// Carry out the deferred work. Must not be called with the queue's lock
    /// held.
    fn run(self) {
        let Self {
            events,
            wake,
            dispose_waker,
            dispose_identity,
        } = self;
        drop(dispose_identity);
        drop(dispose_waker);
        for event in events.iter().flatten() {
            event.log();
        }
        if let Some(wake) = wake {
            wake.wake();
        }
    }
}

/// An [`AsyncAdmissionQueue`]'s internal state, protected by a single lock.
struct AsyncAdmissionQueueState<I: Eq + marker::Send> {
    /// The current owner's hold, `None` if idle.
    hold: Option<AsyncAdmissionQueueHold<I>>,
    /// Incremented with each transition of ownership to a new identity.
    generation: u64,
    /// Waiters, in arrival order. Empty whenever `hold` is `None`.
    waiters: SyncVecDeque<AsyncAdmissionQueueWaiter<I>>,
    /// Waiter id to assign to the next enqueued waiter.
    next_waiter_id: num::NonZeroU64,
}

impl<I: Eq + marker::Send> AsyncAdmissionQueueState<I> {
    fn new(waiters: SyncVecDeque<AsyncAdmissionQueueWaiter<I>>) -> Self {
        Self {
            hold: None,
            generation: 0,
            waiters,
            next_waiter_id: num::NonZeroU64::MIN,
        }
    }

    /// Projection for [`SyncVecDeque::try_reserve()`].
    fn waiters_mut(this: &mut Self) -> &mut SyncVecDeque<AsyncAdmissionQueueWaiter<I>> {
        &mut this.waiters
    }

    /// Match a waiter id to an index in the waiter queue.
    fn waiter_position(&self, waiter_id: num::NonZeroU64) -> Option<usize> {
        self.waiters.iter().position(|waiter| waiter.waiter_id == waiter_id)
    }

    /// Try to issue a grant to `identity` right away.
    ///
    /// Succeeds if the queue is idle or if `identity` is the current owner.
    /// Waiters possibly enqueued for the same `identity` are not considered.
    ///
    /// On success, the generation the grant has been issued under gets
    /// returned, together with the unneeded `identity` in case of a reentrant
    /// grant, which is to get disposed of outside the lock. Otherwise
    /// `identity` is handed back.
    fn try_grant(&mut self, identity: I) -> Result<(u64, AsyncAdmissionQueueUnlockedWork<I>), I> {
        match &mut self.hold {
            None => {
                debug_assert!(self.waiters.is_empty());
                self.generation = self.generation.wrapping_add(1);
                self.hold = Some(AsyncAdmissionQueueHold {
                    owner: identity,
                    outstanding: 1,
                    handed_over_to: None,
                });
                let generation = self.generation;
                Ok((
                    generation,
                    AsyncAdmissionQueueUnlockedWork::event(AsyncAdmissionQueueEvent::Granted { generation }),
                ))
            }
            Some(hold) if hold.owner == identity => {
                hold.outstanding += 1;
                let event = AsyncAdmissionQueueEvent::Reentered {
                    generation: self.generation,
                    outstanding: hold.outstanding,
                };
                Ok((
                    self.generation,
                    AsyncAdmissionQueueUnlockedWork::event(event).with_disposed_identity(identity),
                ))
            }
            Some(_) => Err(identity),
        }
    }

    /// Append a waiter for `identity` to the tail of the waiter queue.
    ///
    /// Capacity must have been reserved beforehand.
    fn enqueue_waiter(&mut self, identity: I) -> (num::NonZeroU64, AsyncAdmissionQueueUnlockedWork<I>) {
        debug_assert!(self.hold.is_some());
        let waiter_id = self.next_waiter_id;
        self.next_waiter_id = waiter_id.checked_add(1).unwrap_or(num::NonZeroU64::MIN);
        debug_assert!(self.waiters.len() < self.waiters.capacity());
        self.waiters.push_back(AsyncAdmissionQueueWaiter {
            identity,
            waker: None,
            waiter_id,
        });
        let event = AsyncAdmissionQueueEvent::Enqueued {
            waiter_id,
            generation: self.generation,
            waiting: self.waiters.len(),
        };
        (waiter_id, AsyncAdmissionQueueUnlockedWork::event(event))
    }

    /// Poll the queue on behalf of a waiter.
    ///
    /// Returns the generation of the grant if ownership has been handed over
    /// to the waiter in the meanwhile, `None` otherwise. In the latter case,
    /// `waker` gets installed at the waiter entry and the previously
    /// installed one, if any, is returned for disposal outside the lock.
    fn poll_waiter(
        &mut self,
        waiter_id: num::NonZeroU64,
        waker: task::Waker,
    ) -> (Result<Option<u64>, AsyncAdmissionQueueError>, Option<task::Waker>) {
        if let Some(index) = self.waiter_position(waiter_id) {
            let previous_waker = self.waiters[index].waker.replace(waker);
            return (Ok(None), previous_waker);
        }

        match &mut self.hold {
            Some(hold) if hold.handed_over_to == Some(waiter_id) => {
                hold.handed_over_to = None;
                (Ok(Some(self.generation)), Some(waker))
            }
            _ => (Err(AsyncAdmissionQueueError::Internal), Some(waker)),
        }
    }

    /// Return one grant issued under `generation`.
    ///
    /// Returns against a superseded generation are ignored. If this had been
    /// the last grant outstanding, ownership gets handed over to the next
    /// waiter, if any, or the queue becomes idle.
    fn return_grant(&mut self, generation: u64) -> AsyncAdmissionQueueUnlockedWork<I> {
        if generation != self.generation {
            return AsyncAdmissionQueueUnlockedWork::event(AsyncAdmissionQueueEvent::StaleReturn {
                generation,
                current_generation: self.generation,
            });
        }

        let hold = match &mut self.hold {
            Some(hold) if hold.outstanding != 0 => hold,
            _ => {
                return AsyncAdmissionQueueUnlockedWork::event(AsyncAdmissionQueueEvent::ExcessReturn { generation });
            }
        };

        hold.outstanding -= 1;
        if hold.outstanding != 0 {
            return AsyncAdmissionQueueUnlockedWork::none();
        }
        self.hand_over()
    }

    /// Transfer ownership to the earliest waiter or become idle.
    fn hand_over(&mut self) -> AsyncAdmissionQueueUnlockedWork<I> {
        let (next_hold, wake, event) = match self.waiters.pop_front() {
            Some(waiter) => {
                self.generation = self.generation.wrapping_add(1);
                let event = AsyncAdmissionQueueEvent::HandedOver {
                    waiter_id: waiter.waiter_id,
                    generation: self.generation,
                };
                let next_hold = AsyncAdmissionQueueHold {
                    owner: waiter.identity,
                    outstanding: 1,
                    handed_over_to: Some(waiter.waiter_id),
                };
                (Some(next_hold), waiter.waker, event)
            }
            None => (
                None,
                None,
                AsyncAdmissionQueueEvent::Idle {
                    generation: self.generation,
                },
            ),
        };

        let previous_hold = mem::replace(&mut self.hold, next_hold);
        let mut unlocked_work = AsyncAdmissionQueueUnlockedWork::event(event);
        unlocked_work.wake = wake;
        unlocked_work.dispose_identity = previous_hold.map(|hold| hold.owner);
        unlocked_work
    }

    /// Cancel a waiter whose [`AsyncAdmissionQueueRequestFuture`] is being
    /// dropped.
    ///
    /// A still enqueued waiter simply gets removed, retaining the order of the
    /// remaining ones. If ownership had been handed over to the waiter
    /// already, the unclaimed grant gets returned.
    fn cancel_waiter(&mut self, waiter_id: num::NonZeroU64) -> AsyncAdmissionQueueUnlockedWork<I> {
        if let Some(index) = self.waiter_position(waiter_id) {
            let mut unlocked_work =
                AsyncAdmissionQueueUnlockedWork::event(AsyncAdmissionQueueEvent::WaiterCancelled { waiter_id });
            if let Some(waiter) = self.waiters.remove(index) {
                unlocked_work.dispose_waker = waiter.waker;
                unlocked_work.dispose_identity = Some(waiter.identity);
            }
            return unlocked_work;
        }

        match &mut self.hold {
            Some(hold) if hold.handed_over_to == Some(waiter_id) => {
                hold.handed_over_to = None;
                let generation = self.generation;
                self.return_grant(generation)
                    .preceded_by(AsyncAdmissionQueueEvent::HandoverAbandoned { waiter_id, generation })
            }
            _ => AsyncAdmissionQueueUnlockedWork::none(),
        }
    }
}

/// The part of an [`AsyncAdmissionQueue`] shared between the queue handles,
/// its pending requests and its grants.
struct AsyncAdmissionQueueShared<ST: sync_types::SyncTypes, I: Eq + marker::Send> {
    state: ST::Lock<AsyncAdmissionQueueState<I>>,
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> AsyncAdmissionQueueShared<ST, I> {
    fn request(this: &Arc<Self>, identity: I) -> Result<AsyncAdmissionQueueRequestFuture<ST, I>, AsyncAdmissionQueueError> {
        let mut locked_state = this.state.lock();
        let identity = match locked_state.try_grant(identity) {
            Ok((generation, unlocked_work)) => {
                drop(locked_state);
                unlocked_work.run();
                return Ok(AsyncAdmissionQueueRequestFuture::granted(this, generation));
            }
            Err(identity) => identity,
        };

        let (mut locked_state, r) =
            SyncVecDeque::try_reserve(&this.state, locked_state, AsyncAdmissionQueueState::waiters_mut, 1);
        if let Err(e) = r {
            drop(locked_state);
            drop(identity);
            return Err(AsyncAdmissionQueueError::from(e));
        }

        // The lock might have been dropped and reacquired for the reservation,
        // in which case the owner could have gone in the meanwhile.
        let identity = match locked_state.try_grant(identity) {
            Ok((generation, unlocked_work)) => {
                drop(locked_state);
                unlocked_work.run();
                return Ok(AsyncAdmissionQueueRequestFuture::granted(this, generation));
            }
            Err(identity) => identity,
        };
        let (waiter_id, unlocked_work) = locked_state.enqueue_waiter(identity);
        drop(locked_state);
        unlocked_work.run();

        Ok(AsyncAdmissionQueueRequestFuture {
            state: AsyncAdmissionQueueRequestFutureState::Waiting {
                queue: this.clone(),
                waiter_id,
            },
        })
    }

    fn try_request(this: &Arc<Self>, identity: I) -> Option<AsyncAdmissionQueueToken<ST, I>> {
        let r = this.state.lock().try_grant(identity);
        match r {
            Ok((generation, unlocked_work)) => {
                unlocked_work.run();
                Some(AsyncAdmissionQueueToken::new(this.clone(), generation))
            }
            Err(identity) => {
                drop(identity);
                None
            }
        }
    }

    fn poll_waiter(
        &self,
        waiter_id: num::NonZeroU64,
        waker: &task::Waker,
    ) -> Result<Option<u64>, AsyncAdmissionQueueError> {
        // Don't clone (or drop) wakers under the lock.
        let waker = waker.clone();
        let (r, disposed_waker) = self.state.lock().poll_waiter(waiter_id, waker);
        drop(disposed_waker);
        r
    }

    fn return_grant(&self, generation: u64) {
        let unlocked_work = self.state.lock().return_grant(generation);
        unlocked_work.run();
    }

    fn cancel_waiter(&self, waiter_id: num::NonZeroU64) {
        let unlocked_work = self.state.lock().cancel_waiter(waiter_id);
        unlocked_work.run();
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> Drop for AsyncAdmissionQueueShared<ST, I> {
    fn drop(&mut self) {
        // Waiters keep the queue alive.
        debug_assert!(self.state.get_mut().waiters.is_empty());
    }
}

/// An asynchronous admission queue granting exclusive, reentrant access to
/// one owner identity at a time.
///
/// An `AsyncAdmissionQueue` serializes sequences of operations issued by
/// concurrent callers against some shared resource living outside of the
/// queue. Each caller presents an identity `I` when
/// [requesting](Self::request) access:
/// * If the queue is idle, the caller becomes the owner right away.
/// * If the caller's identity compares equal to the current owner's, the
///   request is granted right away as well, irrespective of any waiters
///   enqueued. This enables recursive call patterns by the same logical
///   caller.
/// * Otherwise the request gets enqueued and granted in arrival order once
///   all grants issued to the current owner have been released.
///
/// Grants are handed out as [`AsyncAdmissionQueueToken`]s, which release
/// their grant upon [`release()`](AsyncAdmissionQueueToken::release) or drop.
/// An owner's grants are reference counted: they can get released in any
/// order, ownership moves on once the last one is gone.
///
/// Note that reentrancy is only ever determined against the current owner.
/// A request from an identity that is itself still enqueued gets enqueued
/// once more, behind everybody else. Awaiting such a second request while
/// holding on to the grant from the first one will never complete.
///
/// `AsyncAdmissionQueue` handles are cheap to clone, all clones refer to the
/// same queue. Independent resources should use independent queues.
///
/// Identities are compared by means of their [`Eq`] implementation, invoked
/// with the queue's internal lock held. [`PtrIdentity`](super::PtrIdentity)
/// provides comparison by pointer identity.
pub struct AsyncAdmissionQueue<ST: sync_types::SyncTypes, I: Eq + marker::Send> {
    shared: Arc<AsyncAdmissionQueueShared<ST, I>>,
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> AsyncAdmissionQueue<ST, I> {
    /// Instantiate a new, idle [`AsyncAdmissionQueue`].
    pub fn new() -> Self {
        Self::from_waiters(SyncVecDeque::new())
    }

    /// Instantiate a new, idle [`AsyncAdmissionQueue`] with storage for
    /// `capacity` waiters preallocated.
    ///
    /// # Errors:
    ///
    /// * [`AsyncAdmissionQueueError::MemoryAllocationFailure`] - Memory
    ///   allocation failure.
    pub fn try_with_waiter_capacity(capacity: usize) -> Result<Self, AsyncAdmissionQueueError> {
        Ok(Self::from_waiters(SyncVecDeque::try_with_capacity(capacity)?))
    }

    fn from_waiters(waiters: SyncVecDeque<AsyncAdmissionQueueWaiter<I>>) -> Self {
        Self {
            shared: Arc::new(AsyncAdmissionQueueShared {
                state: ST::Lock::from(AsyncAdmissionQueueState::new(waiters)),
            }),
        }
    }

    /// Asynchronously request a grant on behalf of `identity`.
    ///
    /// The decision whether to grant right away or to enqueue is made by the
    /// time of the call, not upon the first poll: a returned future which
    /// isn't [waiting](AsyncAdmissionQueueRequestFuture::is_waiting)
    /// completes on its first poll.
    ///
    /// Note that the returned future holds on to its position in the queue
    /// -- it **must** either get polled to completion or dropped. Dropping it
    /// withdraws the request.
    ///
    /// # Errors:
    ///
    /// * [`AsyncAdmissionQueueError::MemoryAllocationFailure`] - Memory
    ///   allocation failure, the request has not been enqueued.
    pub fn request(&self, identity: I) -> Result<AsyncAdmissionQueueRequestFuture<ST, I>, AsyncAdmissionQueueError> {
        AsyncAdmissionQueueShared::request(&self.shared, identity)
    }

    /// Try to synchronously obtain a grant on behalf of `identity`.
    ///
    /// Succeeds only if the queue is idle or `identity` is the current owner,
    /// returns `None` otherwise. Never enqueues.
    pub fn try_request(&self, identity: I) -> Option<AsyncAdmissionQueueToken<ST, I>> {
        AsyncAdmissionQueueShared::try_request(&self.shared, identity)
    }

    /// Whether no identity currently owns the queue.
    pub fn is_idle(&self) -> bool {
        self.shared.state.lock().hold.is_none()
    }

    /// Number of grants issued to the current owner and not released yet.
    pub fn outstanding_grants(&self) -> usize {
        self.shared
            .state
            .lock()
            .hold
            .as_ref()
            .map(|hold| hold.outstanding)
            .unwrap_or(0)
    }

    /// Number of enqueued waiters.
    pub fn waiter_count(&self) -> usize {
        self.shared.state.lock().waiters.len()
    }

    /// The generation of the current or, if idle, the last owner.
    pub fn generation(&self) -> u64 {
        self.shared.state.lock().generation
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> Clone for AsyncAdmissionQueue<ST, I> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> Default for AsyncAdmissionQueue<ST, I> {
    fn default() -> Self {
        Self::new()
    }
}

/// A grant issued by an [`AsyncAdmissionQueue`].
///
/// The grant gets returned upon [`release()`](Self::release) or when the
/// token is dropped, whichever comes first.
pub struct AsyncAdmissionQueueToken<ST: sync_types::SyncTypes, I: Eq + marker::Send> {
    queue: Arc<AsyncAdmissionQueueShared<ST, I>>,
    generation: u64,
    released: bool,
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> AsyncAdmissionQueueToken<ST, I> {
    fn new(queue: Arc<AsyncAdmissionQueueShared<ST, I>>, generation: u64) -> Self {
        Self {
            queue,
            generation,
            released: false,
        }
    }

    /// Return the grant.
    ///
    /// Idempotent, any invocation past the first one is a nop.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.queue.return_grant(self.generation);
    }

    /// Whether the grant has been [released](Self::release) already.
    pub fn is_released(&self) -> bool {
        self.released
    }

    /// The generation the grant had been issued under.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> Drop for AsyncAdmissionQueueToken<ST, I> {
    fn drop(&mut self) {
        self.release();
    }
}

enum AsyncAdmissionQueueRequestFutureState<ST: sync_types::SyncTypes, I: Eq + marker::Send> {
    Granted {
        token: AsyncAdmissionQueueToken<ST, I>,
    },
    Waiting {
        queue: Arc<AsyncAdmissionQueueShared<ST, I>>,
        waiter_id: num::NonZeroU64,
    },
    Done,
}

/// Asynchronous wait for a grant from an [`AsyncAdmissionQueue`].
///
/// To be obtained through [`AsyncAdmissionQueue::request()`].
///
/// Dropping a pending `AsyncAdmissionQueueRequestFuture` withdraws the
/// request: if still enqueued, it gets removed from the queue, otherwise, if
/// ownership had been handed over already, the grant gets released again.
pub struct AsyncAdmissionQueueRequestFuture<ST: sync_types::SyncTypes, I: Eq + marker::Send> {
    state: AsyncAdmissionQueueRequestFutureState<ST, I>,
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> AsyncAdmissionQueueRequestFuture<ST, I> {
    fn granted(queue: &Arc<AsyncAdmissionQueueShared<ST, I>>, generation: u64) -> Self {
        Self {
            state: AsyncAdmissionQueueRequestFutureState::Granted {
                token: AsyncAdmissionQueueToken::new(queue.clone(), generation),
            },
        }
    }

    /// Whether the request had to get enqueued and has not been completed
    /// yet.
    pub fn is_waiting(&self) -> bool {
        matches!(self.state, AsyncAdmissionQueueRequestFutureState::Waiting { .. })
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> marker::Unpin for AsyncAdmissionQueueRequestFuture<ST, I> {}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> future::Future for AsyncAdmissionQueueRequestFuture<ST, I> {
    type Output = Result<AsyncAdmissionQueueToken<ST, I>, AsyncAdmissionQueueError>;

    /// Poll for the grant.
    ///
    /// Upon future completion, either an [`AsyncAdmissionQueueToken`] is
    /// returned or, if polled past completion,
    /// [`AsyncAdmissionQueueError::Internal`].
    fn poll(self: pin::Pin<&mut Self>, cx: &mut task::Context<'_>) -> task::Poll<Self::Output> {
        let this = self.get_mut();
        match mem::replace(&mut this.state, AsyncAdmissionQueueRequestFutureState::Done) {
            AsyncAdmissionQueueRequestFutureState::Granted { token } => task::Poll::Ready(Ok(token)),
            AsyncAdmissionQueueRequestFutureState::Waiting { queue, waiter_id } => {
                match queue.poll_waiter(waiter_id, cx.waker()) {
                    Ok(Some(generation)) => task::Poll::Ready(Ok(AsyncAdmissionQueueToken::new(queue, generation))),
                    Ok(None) => {
                        this.state = AsyncAdmissionQueueRequestFutureState::Waiting { queue, waiter_id };
                        task::Poll::Pending
                    }
                    Err(e) => task::Poll::Ready(Err(e)),
                }
            }
            AsyncAdmissionQueueRequestFutureState::Done => task::Poll::Ready(Err(AsyncAdmissionQueueError::Internal)),
        }
    }
}

impl<ST: sync_types::SyncTypes, I: Eq + marker::Send> Drop for AsyncAdmissionQueueRequestFuture<ST, I> {
    fn drop(&mut self) {
        if let AsyncAdmissionQueueRequestFutureState::Waiting { queue, waiter_id } = &self.state {
            queue.cancel_waiter(*waiter_id);
        }
    }
}

#[cfg(test)]
type TestAsyncAdmissionQueue = AsyncAdmissionQueue<crate::test::TestNopSyncTypes, &'static str>;

#[cfg(test)]
type TestAsyncAdmissionQueueToken = AsyncAdmissionQueueToken<crate::test::TestNopSyncTypes, &'static str>;

#[cfg(test)]
fn test_expect_granted<ST: sync_types::SyncTypes, I: Eq + marker::Send>(
    fut: &mut AsyncAdmissionQueueRequestFuture<ST, I>,
    waker: &task::Waker,
) -> AsyncAdmissionQueueToken<ST, I> {
    match crate::test::poll_once(fut, waker) {
        task::Poll::Ready(Ok(token)) => token,
        task::Poll::Ready(Err(e)) => panic!("request failed: {e}"),
        task::Poll::Pending => panic!("request unexpectedly pending"),
    }
}

#[cfg(test)]
fn test_expect_pending<ST: sync_types::SyncTypes, I: Eq + marker::Send>(
    fut: &mut AsyncAdmissionQueueRequestFuture<ST, I>,
    waker: &task::Waker,
) {
    assert!(matches!(crate::test::poll_once(fut, waker), task::Poll::Pending));
}

#[test]
fn test_async_admission_queue_idle_grant() {
    use crate::test::TestWakeCounter;

    let wakes = TestWakeCounter::new();
    let waker = wakes.waker();
    let queue = TestAsyncAdmissionQueue::new();
    assert!(queue.is_idle());

    let mut r1_fut = queue.request("r1").unwrap();
    assert!(!r1_fut.is_waiting());
    assert!(!queue.is_idle());
    let mut r1 = test_expect_granted(&mut r1_fut, &waker);
    assert_eq!(queue.outstanding_grants(), 1);
    let first_generation = r1.generation();

    r1.release();
    assert!(r1.is_released());
    assert!(queue.is_idle());
    assert_eq!(queue.outstanding_grants(), 0);

    // A distinct requester is granted synchronously, under a new generation.
    let r2 = queue.try_request("r2").unwrap();
    assert_ne!(r2.generation(), first_generation);
    drop(r2);
    assert!(queue.is_idle());
    assert_eq!(wakes.wakes(), 0);
}

#[test]
fn test_async_admission_queue_handover() {
    use crate::test::TestWakeCounter;

    let r2_wakes = TestWakeCounter::new();
    let r2_waker = r2_wakes.waker();
    let queue = TestAsyncAdmissionQueue::new();

    let mut r1 = queue.try_request("r1").unwrap();
    let mut r2_fut = queue.request("r2").unwrap();
    assert!(r2_fut.is_waiting());
    test_expect_pending(&mut r2_fut, &r2_waker);
    assert_eq!(queue.waiter_count(), 1);
    assert!(queue.try_request("r2").is_none());

    r1.release();
    assert_eq!(r2_wakes.wakes(), 1);
    assert_eq!(queue.waiter_count(), 0);
    assert!(!queue.is_idle());

    let r2 = test_expect_granted(&mut r2_fut, &r2_waker);
    assert_eq!(r2.generation(), r1.generation() + 1);
    assert!(!r2_fut.is_waiting());

    // The new owner's nested requests are synchronous.
    let r2_nested = queue.try_request("r2").unwrap();
    assert_eq!(queue.outstanding_grants(), 2);
    assert!(queue.try_request("r1").is_none());
    drop(r2_nested);
    drop(r2);
    assert!(queue.is_idle());
}

#[test]
fn test_async_admission_queue_nested_release_child_first() {
    use crate::test::TestWakeCounter;

    let r2_wakes = TestWakeCounter::new();
    let r2_waker = r2_wakes.waker();
    let queue = TestAsyncAdmissionQueue::new();

    let mut r1a = queue.try_request("r1").unwrap();
    let mut r1b_fut = queue.request("r1").unwrap();
    let mut r1b = test_expect_granted(&mut r1b_fut, &r2_waker);
    assert_eq!(r1a.generation(), r1b.generation());

    let mut r2_fut = queue.request("r2").unwrap();
    test_expect_pending(&mut r2_fut, &r2_waker);

    r1b.release();
    assert_eq!(r2_wakes.wakes(), 0);
    test_expect_pending(&mut r2_fut, &r2_waker);

    r1a.release();
    assert_eq!(r2_wakes.wakes(), 1);
    let _r2 = test_expect_granted(&mut r2_fut, &r2_waker);
}

#[test]
fn test_async_admission_queue_nested_release_parent_first() {
    use crate::test::TestWakeCounter;

    let r2_wakes = TestWakeCounter::new();
    let r2_waker = r2_wakes.waker();
    let queue = TestAsyncAdmissionQueue::new();

    let mut r1a = queue.try_request("r1").unwrap();
    let mut r2_fut = queue.request("r2").unwrap();
    test_expect_pending(&mut r2_fut, &r2_waker);

    // The owner's reentrant request is granted despite r2 waiting ahead.
    let mut r1b_fut = queue.request("r1").unwrap();
    assert!(!r1b_fut.is_waiting());
    let mut r1b = test_expect_granted(&mut r1b_fut, &r2_waker);
    assert_eq!(queue.outstanding_grants(), 2);

    r1a.release();
    assert_eq!(r2_wakes.wakes(), 0);
    test_expect_pending(&mut r2_fut, &r2_waker);
    assert_eq!(queue.outstanding_grants(), 1);

    r1b.release();
    assert_eq!(r2_wakes.wakes(), 1);
    let _r2 = test_expect_granted(&mut r2_fut, &r2_waker);
}

#[test]
fn test_async_admission_queue_idempotent_release() {
    use crate::test::TestWakeCounter;

    let wakes = TestWakeCounter::new();
    let waker = wakes.waker();
    let queue = TestAsyncAdmissionQueue::new();

    let mut r1a = queue.try_request("r1").unwrap();
    let mut r1b = queue.try_request("r1").unwrap();
    let mut r2_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    test_expect_pending(&mut r2_fut, &waker);
    test_expect_pending(&mut r3_fut, &waker);

    r1a.release();
    r1a.release();
    drop(r1a);
    assert_eq!(queue.outstanding_grants(), 1);
    assert_eq!(wakes.wakes(), 0);

    r1b.release();
    r1b.release();
    assert_eq!(wakes.wakes(), 1);
    assert_eq!(queue.waiter_count(), 1);
    assert_eq!(queue.outstanding_grants(), 1);

    let mut r2 = test_expect_granted(&mut r2_fut, &waker);
    test_expect_pending(&mut r3_fut, &waker);
    drop(r1b);
    assert_eq!(queue.outstanding_grants(), 1);

    r2.release();
    let _r3 = test_expect_granted(&mut r3_fut, &waker);
    drop(r2);
    assert_eq!(queue.outstanding_grants(), 1);
}

#[test]
fn test_async_admission_queue_stale_and_excess_returns() {
    let queue = TestAsyncAdmissionQueue::new();

    let r1 = queue.try_request("r1").unwrap();
    let stale_generation = r1.generation();
    let mut r2_fut = queue.request("r2").unwrap();
    drop(r1);

    let waker = crate::test::TestWakeCounter::new().waker();
    let r2 = test_expect_granted(&mut r2_fut, &waker);
    queue.shared.return_grant(stale_generation);
    assert_eq!(queue.outstanding_grants(), 1);
    assert_eq!(queue.generation(), r2.generation());

    // An excess return is clamped rather than corrupting the queue.
    let current_generation = r2.generation();
    drop(r2);
    assert!(queue.is_idle());
    queue.shared.return_grant(current_generation);
    assert!(queue.is_idle());
    assert_eq!(queue.generation(), current_generation);

    let r3 = queue.try_request("r3").unwrap();
    assert_eq!(queue.outstanding_grants(), 1);
    drop(r3);
    assert!(queue.is_idle());
}

#[test]
fn test_async_admission_queue_fifo_order() {
    use crate::test::TestWakeCounter;

    let queue = TestAsyncAdmissionQueue::new();
    let r1 = queue.try_request("r1").unwrap();

    let r2_wakes = TestWakeCounter::new();
    let r3_wakes = TestWakeCounter::new();
    let r4_wakes = TestWakeCounter::new();
    let mut r2_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    let mut r4_fut = queue.request("r4").unwrap();
    test_expect_pending(&mut r4_fut, &r4_wakes.waker());
    test_expect_pending(&mut r3_fut, &r3_wakes.waker());
    test_expect_pending(&mut r2_fut, &r2_wakes.waker());
    assert_eq!(queue.waiter_count(), 3);

    drop(r1);
    assert_eq!((r2_wakes.wakes(), r3_wakes.wakes(), r4_wakes.wakes()), (1, 0, 0));
    test_expect_pending(&mut r3_fut, &r3_wakes.waker());
    test_expect_pending(&mut r4_fut, &r4_wakes.waker());
    let r2 = test_expect_granted(&mut r2_fut, &r2_wakes.waker());

    drop(r2);
    assert_eq!((r2_wakes.wakes(), r3_wakes.wakes(), r4_wakes.wakes()), (1, 1, 0));
    let r3 = test_expect_granted(&mut r3_fut, &r3_wakes.waker());

    drop(r3);
    assert_eq!((r2_wakes.wakes(), r3_wakes.wakes(), r4_wakes.wakes()), (1, 1, 1));
    let r4 = test_expect_granted(&mut r4_fut, &r4_wakes.waker());
    drop(r4);
    assert!(queue.is_idle());
}

#[test]
fn test_async_admission_queue_enqueued_identity_enqueues_again() {
    let waker = crate::test::TestWakeCounter::new().waker();
    let queue = TestAsyncAdmissionQueue::new();
    let r1 = queue.try_request("r1").unwrap();

    let mut r2_first_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    let mut r2_second_fut = queue.request("r2").unwrap();
    assert!(r2_second_fut.is_waiting());
    assert_eq!(queue.waiter_count(), 3);

    drop(r1);
    let r2 = test_expect_granted(&mut r2_first_fut, &waker);
    // Now the owner, but the second request stays behind r3.
    test_expect_pending(&mut r2_second_fut, &waker);
    let r2_nested = queue.try_request("r2").unwrap();

    drop(r2);
    drop(r2_nested);
    let r3 = test_expect_granted(&mut r3_fut, &waker);
    test_expect_pending(&mut r2_second_fut, &waker);
    drop(r3);
    let _r2 = test_expect_granted(&mut r2_second_fut, &waker);
}

#[test]
fn test_async_admission_queue_cancel_enqueued() {
    use crate::test::TestWakeCounter;

    let r2_wakes = TestWakeCounter::new();
    let r3_wakes = TestWakeCounter::new();
    let queue = TestAsyncAdmissionQueue::new();
    let r1 = queue.try_request("r1").unwrap();

    let mut r2_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    test_expect_pending(&mut r2_fut, &r2_wakes.waker());
    test_expect_pending(&mut r3_fut, &r3_wakes.waker());

    drop(r2_fut);
    assert_eq!(queue.waiter_count(), 1);
    assert_eq!(queue.outstanding_grants(), 1);

    drop(r1);
    assert_eq!((r2_wakes.wakes(), r3_wakes.wakes()), (0, 1));
    let _r3 = test_expect_granted(&mut r3_fut, &r3_wakes.waker());
}

#[test]
fn test_async_admission_queue_cancel_after_handover() {
    use crate::test::TestWakeCounter;

    let r2_wakes = TestWakeCounter::new();
    let r3_wakes = TestWakeCounter::new();
    let queue = TestAsyncAdmissionQueue::new();
    let r1 = queue.try_request("r1").unwrap();

    let mut r2_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    test_expect_pending(&mut r2_fut, &r2_wakes.waker());
    test_expect_pending(&mut r3_fut, &r3_wakes.waker());

    drop(r1);
    assert_eq!(r2_wakes.wakes(), 1);
    let r2_generation = queue.generation();
    assert!(queue.try_request("r2").is_some());

    // r2 loses interest without ever claiming its grant.
    drop(r2_fut);
    assert_eq!(r3_wakes.wakes(), 1);
    let r3 = test_expect_granted(&mut r3_fut, &r3_wakes.waker());
    assert_eq!(r3.generation(), r2_generation + 1);
    assert_eq!(queue.outstanding_grants(), 1);
    drop(r3);
    assert!(queue.is_idle());
}

#[test]
fn test_async_admission_queue_drop_unpolled_grant() {
    let queue = TestAsyncAdmissionQueue::new();
    let r1_fut = queue.request("r1").unwrap();
    assert!(!queue.is_idle());
    drop(r1_fut);
    assert!(queue.is_idle());

    let r1: TestAsyncAdmissionQueueToken = queue.try_request("r1").unwrap();
    let r2_fut = queue.request("r2").unwrap();
    drop(r1);
    // Handed over to r2, whose future then gets dropped unpolled.
    assert!(!queue.is_idle());
    drop(r2_fut);
    assert!(queue.is_idle());
}

#[test]
fn test_async_admission_queue_poll_past_completion() {
    let waker = crate::test::TestWakeCounter::new().waker();
    let queue = TestAsyncAdmissionQueue::new();
    let mut r1_fut = queue.request("r1").unwrap();
    let _r1 = test_expect_granted(&mut r1_fut, &waker);
    assert!(matches!(
        crate::test::poll_once(&mut r1_fut, &waker),
        task::Poll::Ready(Err(AsyncAdmissionQueueError::Internal))
    ));
    assert_eq!(queue.outstanding_grants(), 1);
}

#[test]
fn test_async_admission_queue_wake_reenters_queue() {
    use crate::test::TestNopSyncTypes;
    use core::sync::atomic;

    // The queue's TestNopLock panics if locked recursively, so waking with
    // the lock held would fail this test.
    struct ReenteringWaker {
        queue: TestAsyncAdmissionQueue,
        observed_waiters: atomic::AtomicUsize,
        r3_granted: atomic::AtomicBool,
    }

    impl alloc::task::Wake for ReenteringWaker {
        fn wake(self: Arc<Self>) {
            self.wake_by_ref();
        }

        fn wake_by_ref(self: &Arc<Self>) {
            self.observed_waiters
                .store(self.queue.waiter_count(), atomic::Ordering::Relaxed);
            let r3 = self.queue.try_request("r3");
            self.r3_granted.store(r3.is_some(), atomic::Ordering::Relaxed);
        }
    }

    let queue = AsyncAdmissionQueue::<TestNopSyncTypes, &'static str>::new();
    let reentering = Arc::new(ReenteringWaker {
        queue: queue.clone(),
        observed_waiters: atomic::AtomicUsize::new(usize::MAX),
        r3_granted: atomic::AtomicBool::new(true),
    });
    let waker = task::Waker::from(reentering.clone());

    let r1 = queue.try_request("r1").unwrap();
    let mut r2_fut = queue.request("r2").unwrap();
    let mut r3_fut = queue.request("r3").unwrap();
    test_expect_pending(&mut r2_fut, &waker);
    drop(r1);

    assert_eq!(reentering.observed_waiters.load(atomic::Ordering::Relaxed), 1);
    assert!(!reentering.r3_granted.load(atomic::Ordering::Relaxed));
    let r2 = test_expect_granted(&mut r2_fut, &waker);
    drop(r2);
    let _r3 = test_expect_granted(&mut r3_fut, &waker);
}

#[test]
fn test_async_admission_queue_ptr_identity() {
    use super::PtrIdentity;
    use crate::test::TestNopSyncTypes;

    let a = PtrIdentity::new(Arc::new(7u32));
    let b = PtrIdentity::new(Arc::new(7u32));
    let queue = AsyncAdmissionQueue::<TestNopSyncTypes, PtrIdentity<u32>>::try_with_waiter_capacity(4).unwrap();

    let _a0 = queue.try_request(a.clone()).unwrap();
    let _a1 = queue.try_request(a.clone()).unwrap();
    // Equal value, but a distinct caller.
    assert!(queue.try_request(b.clone()).is_none());
    let b_fut = queue.request(b).unwrap();
    assert!(b_fut.is_waiting());
    assert_eq!(queue.outstanding_grants(), 2);
}

#[test]
fn test_async_admission_queue_await_nested() {
    let queue = TestAsyncAdmissionQueue::new();
    let r = pollster::block_on(async {
        let outer = queue.request("r1")?.await?;
        let inner = queue.request("r1")?.await?;
        assert_eq!(outer.generation(), inner.generation());
        assert_eq!(queue.outstanding_grants(), 2);
        drop(outer);
        assert_eq!(queue.outstanding_grants(), 1);
        drop(inner);
        Ok::<(), AsyncAdmissionQueueError>(())
    });
    assert!(r.is_ok());
    assert!(queue.is_idle());
}

#[cfg(feature = "std")]
#[test]
fn test_async_admission_queue_threads_mutual_exclusion() {
    use crate::sync_types::StdSyncTypes;
    use core::sync::atomic;

    const THREADS: usize = 8;
    const ITERATIONS: usize = 200;

    let queue = AsyncAdmissionQueue::<StdSyncTypes, usize>::new();
    // Identity + 1 of the current owner, zero if none.
    let active = atomic::AtomicUsize::new(0);

    std::thread::scope(|s| {
        for id in 0..THREADS {
            let queue = queue.clone();
            let active = &active;
            s.spawn(move || {
                for i in 0..ITERATIONS {
                    let mut outer = pollster::block_on(queue.request(id).unwrap()).unwrap();
                    assert_eq!(active.swap(id + 1, atomic::Ordering::SeqCst), 0);

                    let inner_fut = queue.request(id).unwrap();
                    assert!(!inner_fut.is_waiting());
                    let mut inner = pollster::block_on(inner_fut).unwrap();
                    std::thread::yield_now();
                    assert_eq!(active.load(atomic::Ordering::SeqCst), id + 1);

                    // Alternate the order the nested grants get released in.
                    if i % 2 == 0 {
                        outer.release();
                        assert_eq!(active.load(atomic::Ordering::SeqCst), id + 1);
                        active.store(0, atomic::Ordering::SeqCst);
                        inner.release();
                    } else {
                        inner.release();
                        assert_eq!(active.load(atomic::Ordering::SeqCst), id + 1);
                        active.store(0, atomic::Ordering::SeqCst);
                        outer.release();
                    }
                }
            });
        }
    });

    assert!(queue.is_idle());
    assert_eq!(queue.waiter_count(), 0);
    assert_eq!(queue.generation(), (THREADS * ITERATIONS) as u64);
}

#[cfg(feature = "std")]
#[test]
fn test_async_admission_queue_logs_outside_lock() {
    use core::{cell, sync::atomic};

    std::thread_local! {
        static INSPECTED_QUEUE: cell::RefCell<Option<TestAsyncAdmissionQueue>> = const { cell::RefCell::new(None) };
    }
    static INSPECTED_RECORDS: atomic::AtomicUsize = atomic::AtomicUsize::new(0);

    // Locks the queue from within each record emitted on this thread, which
    // the queue's TestNopLock would reject if it were still held.
    struct QueueInspectingLogger;

    impl log::Log for QueueInspectingLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }

        fn log(&self, _record: &log::Record) {
            INSPECTED_QUEUE.with(|queue| {
                if let Some(queue) = queue.borrow().as_ref() {
                    queue.waiter_count();
                    INSPECTED_RECORDS.fetch_add(1, atomic::Ordering::Relaxed);
                }
            });
        }

        fn flush(&self) {}
    }

    static LOGGER: QueueInspectingLogger = QueueInspectingLogger;
    // Only ever installed here, failure means a previous run in this process.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);

    let waker = crate::test::TestWakeCounter::new().waker();
    let queue = TestAsyncAdmissionQueue::new();
    INSPECTED_QUEUE.with(|q| *q.borrow_mut() = Some(queue.clone()));

    let r1 = queue.try_request("r1").unwrap();
    let r1_nested = queue.try_request("r1").unwrap();
    let stale_generation = r1.generation();
    let mut r2_fut = queue.request("r2").unwrap();
    let r3_fut = queue.request("r3").unwrap();
    drop(r3_fut);
    drop(r1_nested);
    drop(r1);
    let r2 = test_expect_granted(&mut r2_fut, &waker);
    queue.shared.return_grant(stale_generation);
    let r4_fut = queue.request("r4").unwrap();
    drop(r2);
    drop(r4_fut);
    queue.shared.return_grant(queue.generation());
    assert!(queue.is_idle());

    // Granted, reentered, 3x enqueued, cancelled, handed over, stale return,
    // handed over, abandoned, idle, excess return.
    assert!(INSPECTED_RECORDS.load(atomic::Ordering::Relaxed) >= 12);
    INSPECTED_QUEUE.with(|q| *q.borrow_mut() = None);
}

#[cfg(feature = "std")]
#[test]
fn test_async_admission_queue_owner_gone_during_reservation() {
    use crate::test::{TestHookSyncTypes, arm_test_lock_hook, test_lock_hook_pending};

    let queue = AsyncAdmissionQueue::<TestHookSyncTypes, &'static str>::new();
    let r1 = queue.try_request("r1").unwrap();
    assert_eq!(queue.shared.state.lock().waiters.capacity(), 0);

    // The request's first lock operation finds r1 owning the queue. The
    // second one reacquires the lock after growing the waiter list and runs
    // the hook right before, with the lock dropped.
    arm_test_lock_hook(1, move || drop(r1));
    let mut r2_fut = queue.request("r2").unwrap();
    assert!(!test_lock_hook_pending());

    assert!(!r2_fut.is_waiting());
    assert_eq!(queue.waiter_count(), 0);
    assert_eq!(queue.outstanding_grants(), 1);
    let waker = crate::test::TestWakeCounter::new().waker();
    let r2 = test_expect_granted(&mut r2_fut, &waker);
    drop(r2);
    assert!(queue.is_idle());
}
