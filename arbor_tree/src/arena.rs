// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Generational node storage and the structural links between nodes.

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use arbor_bus::MoveRecipient;

use crate::node::{Node, NodeId};

#[allow(
    clippy::cast_possible_truncation,
    reason = "NodeId uses 32-bit indices by design."
)]
fn slot_id(idx: usize, generation: u32) -> NodeId {
    NodeId::new(idx as u32, generation)
}

/// Slot storage for nodes. Freed slots are reused with a bumped generation so stale
/// [`NodeId`]s are detected.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    /// slots
    nodes: Vec<Option<Node>>,
    /// last generation per slot (persists across frees)
    generations: Vec<u32>,
    free_list: Vec<usize>,
}

impl Arena {
    /// Insert a node built by `make`, which receives the slot generation.
    pub(crate) fn insert(&mut self, make: impl FnOnce(u32) -> Node) -> NodeId {
        let (idx, generation) = if let Some(idx) = self.free_list.pop() {
            let generation = self.generations[idx].saturating_add(1);
            self.generations[idx] = generation;
            self.nodes[idx] = Some(make(generation));
            (idx, generation)
        } else {
            let generation = 1_u32;
            self.nodes.push(Some(make(generation)));
            self.generations.push(generation);
            (self.nodes.len() - 1, generation)
        };
        slot_id(idx, generation)
    }

    /// Free a single slot. Links from other nodes are the caller's concern.
    pub(crate) fn free(&mut self, id: NodeId) -> Option<Node> {
        if !self.is_alive(id) {
            return None;
        }
        let node = self.nodes[id.idx()].take();
        self.free_list.push(id.idx());
        node
    }

    pub(crate) fn is_alive(&self, id: NodeId) -> bool {
        self.nodes
            .get(id.idx())
            .and_then(|slot| slot.as_ref())
            .is_some_and(|n| n.generation == id.1)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes
            .get(id.idx())
            .and_then(|slot| slot.as_ref())
            .filter(|n| n.generation == id.1)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes
            .get_mut(id.idx())
            .and_then(|slot| slot.as_mut())
            .filter(|n| n.generation == id.1)
    }

    /// Number of live nodes.
    pub(crate) fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    /// Drop cached paths of `id` and everything it presents.
    ///
    /// A node only caches its path after its parent did, so the walk stops at nodes with
    /// nothing cached. Runtime lists may still hold a node whose move is queued.
    pub(crate) fn invalidate_paths(&self, id: NodeId) {
        let mut stack = alloc::vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(n) = self.get(cur)
                && n.invalidate_path()
            {
                stack.extend(n.runtime.iter().copied());
            }
        }
    }

    /// Invalidate cached paths of the runtime children of `parent` from `index` on.
    pub(crate) fn invalidate_from(&self, parent: NodeId, index: usize) {
        let Some(p) = self.get(parent) else { return };
        for &c in p.runtime.iter().skip(index) {
            self.invalidate_paths(c);
        }
    }

    /// Path of `id`: its parent's path, `/`, and its name. Cached per node.
    pub(crate) fn path(&self, id: NodeId) -> Option<Rc<str>> {
        let node = self.get(id)?;
        if let Some(p) = node.path.borrow().as_ref() {
            return Some(p.clone());
        }
        let path: Rc<str> = match node.parent.and_then(|p| self.path(p)) {
            Some(parent) => {
                let mut s = String::with_capacity(parent.len() + 1 + node.definition.name().len());
                s.push_str(&parent);
                s.push('/');
                s.push_str(node.definition.name());
                s.into()
            }
            None => node.definition.name().into(),
        };
        *node.path.borrow_mut() = Some(path.clone());
        Some(path)
    }

    /// Insert `child` into the runtime children of `parent` at `index` (clamped).
    pub(crate) fn insert_runtime(&mut self, parent: NodeId, child: NodeId, index: usize) {
        let Some(p) = self.get_mut(parent) else { return };
        let at = index.min(p.runtime.len());
        p.runtime.insert(at, child);
        self.invalidate_from(parent, at);
    }

    /// Remove `child` from the runtime children of `parent`, if present.
    pub(crate) fn remove_runtime(&mut self, parent: NodeId, child: NodeId) {
        let Some(p) = self.get_mut(parent) else { return };
        if let Some(at) = p.runtime.iter().position(|c| *c == child) {
            p.runtime.remove(at);
            self.invalidate_from(parent, at);
        }
    }
}

impl MoveRecipient<NodeId> for Arena {
    fn on_moved(&mut self, node: NodeId, new_parent: Option<NodeId>) {
        if let Some(n) = self.get_mut(node) {
            n.parent = new_parent;
            self.invalidate_paths(node);
        }
    }

    fn on_child_left(&mut self, previous_parent: NodeId, node: NodeId) {
        self.remove_runtime(previous_parent, node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use crate::node::NodeState;
    use arbor_match::TypeTable;

    fn leaf(arena: &mut Arena, parent: Option<NodeId>, name: &str) -> NodeId {
        let types = TypeTable::new();
        let def = Definition::group(name, types.builtins().object, Vec::new()).unwrap();
        let id = arena.insert(|g| Node::new(g, def, parent, None, NodeState::default()));
        if let Some(p) = parent {
            let len = arena.get(p).unwrap().runtime.len();
            arena.insert_runtime(p, id, len);
        }
        id
    }

    #[test]
    fn stale_ids_are_rejected_after_reuse() {
        let mut arena = Arena::default();
        let a = leaf(&mut arena, None, "a");
        arena.free(a);
        let b = leaf(&mut arena, None, "b");
        assert_eq!(a.idx(), b.idx());
        assert!(!arena.is_alive(a));
        assert!(arena.is_alive(b));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn paths_are_cached_and_invalidated_on_move() {
        let mut arena = Arena::default();
        let root = leaf(&mut arena, None, "root");
        let x = leaf(&mut arena, Some(root), "x");
        let y = leaf(&mut arena, Some(root), "y");
        let z = leaf(&mut arena, Some(x), "z");
        assert_eq!(arena.path(z).as_deref(), Some("root/x/z"));

        arena.insert_runtime(y, z, 0);
        arena.on_moved(z, Some(y));
        arena.on_child_left(x, z);
        assert_eq!(arena.path(z).as_deref(), Some("root/y/z"));
        assert!(arena.get(x).unwrap().runtime.is_empty());
    }

    #[test]
    fn invalidation_terminates_on_mutual_listings() {
        let mut arena = Arena::default();
        let root = leaf(&mut arena, None, "root");
        let s = leaf(&mut arena, Some(root), "s");
        let x = leaf(&mut arena, Some(s), "x");
        assert_eq!(arena.path(x).as_deref(), Some("root/s/x"));

        // `x` still listed under `s` while `s` is listed under `x`.
        arena.insert_runtime(x, s, 0);
        arena.on_moved(s, Some(x));
        assert!(arena.get(x).unwrap().path.borrow().is_none());
        assert!(arena.get(s).unwrap().path.borrow().is_none());
    }
}
