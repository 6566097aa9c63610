// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Node identifiers, UI state flags, and the per-node record kept by the arena.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::definition::Definition;
use crate::entry::{ShapeKey, ValueEntry};
use crate::resolve::{AttributeSet, HandlerChain, ProcessorChain};

/// Identifier for a node in a [`Tree`](crate::Tree) (generational).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub(crate) u32, pub(crate) u32);

impl NodeId {
    pub(crate) const fn new(idx: u32, generation: u32) -> Self {
        Self(idx, generation)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }
}

bitflags::bitflags! {
    /// Persisted UI flags of a node.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct NodeState: u8 {
        /// Children are shown and kept up to date.
        const EXPANDED = 0b0000_0001;
        /// The node is shown.
        const VISIBLE  = 0b0000_0010;
        /// The node accepts edits.
        const ENABLED  = 0b0000_0100;
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::VISIBLE | Self::ENABLED
    }
}

impl NodeState {
    /// Flag names used as persistence keys.
    pub const NAMES: [(&'static str, Self); 3] = [
        ("expanded", Self::EXPANDED),
        ("visible", Self::VISIBLE),
        ("enabled", Self::ENABLED),
    ];
}

/// Refresh lifecycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Phase {
    /// Resolvers and children must be recomputed before use.
    #[default]
    Stale,
    /// Recomputing.
    Refreshing,
    /// Up to date for `last_token`.
    Refreshed,
}

/// Counters for observing how often a node was rebuilt.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct NodeStats {
    /// Completed refreshes.
    pub refreshes: u32,
    /// Times the value entry's wrapper was built, rebuilt, or dropped.
    pub rewraps: u32,
}

#[derive(Debug)]
pub(crate) struct Node {
    pub(crate) generation: u32,
    pub(crate) definition: Definition,
    /// Node whose structure produced this one; never changes.
    pub(crate) logical_parent: Option<NodeId>,
    /// Node currently presenting this one.
    pub(crate) parent: Option<NodeId>,
    pub(crate) structural: Vec<NodeId>,
    pub(crate) runtime: Vec<NodeId>,
    pub(crate) entry: Option<ValueEntry>,
    pub(crate) shape: ShapeKey,
    pub(crate) state: NodeState,
    pub(crate) phase: Phase,
    pub(crate) last_token: u64,
    pub(crate) refresh_requested: bool,
    pub(crate) attributes: Option<AttributeSet>,
    pub(crate) handlers: HandlerChain,
    pub(crate) processors: ProcessorChain,
    pub(crate) resolvers: usize,
    pub(crate) error: Option<String>,
    pub(crate) path: RefCell<Option<Rc<str>>>,
    pub(crate) stats: NodeStats,
}

impl Node {
    pub(crate) fn new(
        generation: u32,
        definition: Definition,
        logical_parent: Option<NodeId>,
        entry: Option<ValueEntry>,
        state: NodeState,
    ) -> Self {
        Self {
            generation,
            definition,
            logical_parent,
            parent: logical_parent,
            structural: Vec::new(),
            runtime: Vec::new(),
            entry,
            shape: ShapeKey::default(),
            state,
            phase: Phase::Stale,
            last_token: 0,
            refresh_requested: false,
            attributes: None,
            handlers: HandlerChain::default(),
            processors: ProcessorChain::default(),
            resolvers: 0,
            error: None,
            path: RefCell::new(None),
            stats: NodeStats::default(),
        }
    }

    /// Drop the cached path. Returns `true` if one was cached.
    pub(crate) fn invalidate_path(&self) -> bool {
        self.path.borrow_mut().take().is_some()
    }
}
