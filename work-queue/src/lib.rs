// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 SUSE LLC
// Author: Nicolai Stange <nstange@suse.de>

//! Asynchronous reentrant admission control.
//!
//! Serialize sequences of asynchronous operations issued by concurrent
//! callers against some shared resource, like an inspection backend which
//! can serve only one logical caller at a time. See
//! [`AsyncAdmissionQueue`](asynchronous::AsyncAdmissionQueue).

#![no_std]

// Lifetimes are not always obvious at first sight, allow for making them explicit even if
// redundant.
#![allow(clippy::needless_lifetimes)]

#[cfg(feature = "std")]
extern crate std;

pub mod alloc;
pub mod asynchronous;
pub mod sync_types;
pub mod test;
