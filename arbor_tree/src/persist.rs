// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Collaborators outside the tree: the host's persistence and the UI state store.

use alloc::rc::Rc;
use core::fmt;

use hashbrown::HashMap;

use crate::value::Value;

/// The host's persistence mechanism.
pub trait Persistence {
    /// `target` changed during the last apply and should be saved.
    fn mark_dirty(&mut self, target: &Value);

    /// Resolve a host-specific path to an external handle.
    fn find_by_path(&self, path: &str) -> Option<Value>;
}

/// Key of one persisted UI flag.
///
/// Stable across tree reconstructions while the node's path is stable.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StateKey {
    /// Name of the root's declared type.
    pub root_type: Rc<str>,
    /// Node path.
    pub path: Rc<str>,
    /// Flag name, one of [`NodeState::NAMES`](crate::NodeState::NAMES).
    pub flag: &'static str,
}

/// Storage for persisted UI flags.
pub trait StateStore {
    /// Stored flag, if any.
    fn get(&self, key: &StateKey) -> Option<bool>;

    /// Store a flag.
    fn set(&mut self, key: StateKey, value: bool);
}

/// In-memory [`StateStore`].
#[derive(Default)]
pub struct MemoryStateStore {
    flags: HashMap<StateKey, bool>,
}

impl fmt::Debug for MemoryStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStateStore")
            .field("len", &self.flags.len())
            .finish()
    }
}

impl MemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored flags.
    pub fn len(&self) -> usize {
        self.flags.len()
    }

    /// Returns `true` if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn get(&self, key: &StateKey) -> Option<bool> {
        self.flags.get(key).copied()
    }

    fn set(&mut self, key: StateKey, value: bool) {
        self.flags.insert(key, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_are_keyed_by_root_type_path_and_name() {
        let mut store = MemoryStateStore::new();
        let key = |root: &str, path: &str, flag| StateKey {
            root_type: root.into(),
            path: path.into(),
            flag,
        };
        store.set(key("A", "$ROOT$/x", "expanded"), true);
        assert_eq!(store.get(&key("A", "$ROOT$/x", "expanded")), Some(true));
        assert_eq!(store.get(&key("B", "$ROOT$/x", "expanded")), None);
        assert_eq!(store.get(&key("A", "$ROOT$/x", "visible")), None);
        store.set(key("A", "$ROOT$/x", "expanded"), false);
        assert_eq!(store.get(&key("A", "$ROOT$/x", "expanded")), Some(false));
        assert_eq!(store.len(), 1);
    }
}
