// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arbor Bus: batched move notifications and deferred commands for a single-threaded tree.
//!
//! ## Overview
//!
//! - [`EventBus`] carries [`MoveEvent`]s. Batches nest; while any batch is open, events
//!   queue and are flushed FIFO when the outermost batch ends. Each event reaches exactly
//!   two recipients through a [`MoveRecipient`]: the moved node and, if it differs from the
//!   new parent, the previous parent.
//! - [`DeferredQueue`] holds commands requested while a node is mid-draw, either until the
//!   end of the current pass or until the next stable pass.
//!
//! Neither type owns the nodes. The owner passes itself as the recipient, which keeps
//! borrows short and delivery order explicit.
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

pub mod bus;
pub mod deferred;

pub use bus::{EventBus, MoveEvent, MoveRecipient};
pub use deferred::{Deferral, DeferredQueue};

/// Errors reported by the bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum BusError {
    /// `end_batch` was called without a matching `begin_batch`.
    #[error("end_batch called without a matching begin_batch")]
    UnbalancedBatch,
}
