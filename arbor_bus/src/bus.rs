// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Batched structural-move notifications.
//!
//! A [`MoveEvent`] records that a node now presents under a different parent. Outside a
//! batch it is delivered immediately; inside one it is queued and flushed in FIFO order
//! when the outermost batch ends.
//!
//! ## Delivery
//!
//! Each event has exactly two recipients, both reached through [`MoveRecipient`]:
//!
//! 1. the moved node, via [`MoveRecipient::on_moved`], which updates its parent link;
//! 2. its previous parent, via [`MoveRecipient::on_child_left`], only when one exists and
//!    differs from the new parent.
//!
//! Inside a batch a node has at most one queued event. Publishing another move of the
//! same node retargets the queued event and keeps its original `from`, so the previous
//! parent is notified once, against where the node finally ends up.
//!
//! ```
//! use arbor_bus::{EventBus, MoveEvent, MoveRecipient};
//!
//! #[derive(Default)]
//! struct Log(Vec<&'static str>);
//!
//! impl MoveRecipient<u32> for Log {
//!     fn on_moved(&mut self, _node: u32, _new_parent: Option<u32>) {
//!         self.0.push("moved");
//!     }
//!     fn on_child_left(&mut self, _previous_parent: u32, _node: u32) {
//!         self.0.push("left");
//!     }
//! }
//!
//! let mut bus = EventBus::new();
//! let mut log = Log::default();
//!
//! bus.begin_batch();
//! assert!(!bus.publish(MoveEvent::new(7, Some(1), Some(2)), &mut log));
//! assert!(log.0.is_empty());
//! assert_eq!(bus.end_batch(&mut log), Ok(1));
//! assert_eq!(log.0, ["moved", "left"]);
//! ```

use alloc::collections::VecDeque;

use crate::BusError;

/// A node changed the parent it is presented under.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct MoveEvent<K> {
    /// The moved node.
    pub node: K,
    /// Parent before the move, if any.
    pub from: Option<K>,
    /// Parent after the move; `None` when the node was detached.
    pub to: Option<K>,
}

impl<K> MoveEvent<K> {
    /// Create a move event.
    pub fn new(node: K, from: Option<K>, to: Option<K>) -> Self {
        Self { node, from, to }
    }
}

/// Receives delivered [`MoveEvent`]s.
///
/// Typically implemented by the structure that owns the nodes, so both recipients can be
/// reached through one mutable borrow.
pub trait MoveRecipient<K> {
    /// The moved node learns its new parent.
    fn on_moved(&mut self, node: K, new_parent: Option<K>);

    /// The previous parent drops `node` from its runtime children, if present.
    fn on_child_left(&mut self, previous_parent: K, node: K);
}

/// Nestable batching bus for [`MoveEvent`]s.
#[derive(Clone, Debug)]
pub struct EventBus<K> {
    depth: u32,
    queue: VecDeque<MoveEvent<K>>,
}

impl<K> Default for EventBus<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> EventBus<K> {
    /// Create an idle bus.
    pub fn new() -> Self {
        Self {
            depth: 0,
            queue: VecDeque::new(),
        }
    }
}

impl<K: Copy + PartialEq> EventBus<K> {
    /// Enter a batch. Batches nest.
    pub fn begin_batch(&mut self) {
        self.depth += 1;
    }

    /// Leave a batch. When the outermost batch ends, queued events are delivered FIFO.
    ///
    /// Returns the number of events delivered by this call.
    pub fn end_batch<R: MoveRecipient<K>>(&mut self, recipient: &mut R) -> Result<usize, BusError> {
        if self.depth == 0 {
            return Err(BusError::UnbalancedBatch);
        }
        self.depth -= 1;
        if self.depth > 0 {
            return Ok(0);
        }
        let mut delivered = 0;
        // Recipients cannot reach the bus, so nothing is queued while draining.
        while let Some(ev) = self.queue.pop_front() {
            deliver(&ev, recipient);
            delivered += 1;
        }
        Ok(delivered)
    }

    /// Publish an event. Returns `true` if it was delivered now, `false` if it was queued.
    ///
    /// A queued event for the same node is retargeted to `event.to` instead of queueing a
    /// second one.
    pub fn publish<R: MoveRecipient<K>>(&mut self, event: MoveEvent<K>, recipient: &mut R) -> bool {
        if self.depth > 0 {
            match self.queue.iter_mut().find(|q| q.node == event.node) {
                Some(queued) => queued.to = event.to,
                None => self.queue.push_back(event),
            }
            false
        } else {
            deliver(&event, recipient);
            true
        }
    }

    /// Returns `true` while inside a batch.
    pub fn is_batching(&self) -> bool {
        self.depth > 0
    }

    /// Current batch nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of queued events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// The event queued for `node`, if any.
    pub fn queued(&self, node: K) -> Option<&MoveEvent<K>> {
        self.queue.iter().find(|q| q.node == node)
    }
}

/// Deliver one event to its two recipients.
pub fn deliver<K: Copy + PartialEq, R: MoveRecipient<K>>(event: &MoveEvent<K>, recipient: &mut R) {
    recipient.on_moved(event.node, event.to);
    if let Some(previous) = event.from
        && event.to != Some(previous)
    {
        recipient.on_child_left(previous, event.node);
    }
}
