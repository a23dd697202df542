// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Rust `async` admission control primitives.

mod admission_queue;
pub use admission_queue::{
    AsyncAdmissionQueue, AsyncAdmissionQueueError, AsyncAdmissionQueueRequestFuture, AsyncAdmissionQueueToken,
};
mod identity;
pub use identity::PtrIdentity;
