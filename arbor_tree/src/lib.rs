// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arbor Tree: a live property tree mirroring a dynamic object graph.
//!
//! A [`Tree`] presents one or more targets of the same type as nodes: fields, methods, list
//! items, and map entries. Which children, attributes, handlers, and post-processors a node
//! gets is decided by resolvers selected by type from a [`ResolverRegistry`], so a list of
//! integers, a struct, and a polymorphic field holding a subtype each get the behavior
//! registered for their runtime type.
//!
//! ## Passes
//!
//! The host drives the tree one pass at a time:
//!
//! - [`Tree::begin_draw`] runs commands queued for the next stable pass, bumps the update
//!   token, and updates the visible subtree. A node whose token is current is not touched
//!   again; a node whose value changed type or shape is refreshed, which rebuilds its
//!   resolvers and reconciles its children.
//! - [`Tree::draw_node`] or [`Tree::draw_all`] run handler chains.
//! - [`Tree::end_draw`] applies queued writes until no entry is dirty, tells the
//!   [`Persistence`] collaborator which targets changed, runs commands queued for the end of
//!   the pass, and flushes batched move events.
//!
//! Queries between passes update only the node they touch.
//!
//! ## Values and writes
//!
//! Every value-bearing node has a [`ValueEntry`] reading one value per target. When all
//! targets agree on a runtime type narrower than the declared one, the entry is wrapped and
//! reads, writes, and resolver selection use that type. Writes are queued and applied in
//! [`Tree::end_draw`]; writing into a field of a struct produces a replacement struct that is
//! written back to its owner in the same call.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use arbor_match::{TypeDef, TypeTable};
//! use arbor_tree::{ResolverRegistry, Tree, Value};
//!
//! let mut types = TypeTable::new();
//! let b = *types.builtins();
//! let list_int = types.instantiate(b.list, &[b.int])?;
//! let sample = types.define(
//!     TypeDef::class("Sample")
//!         .field("IntField", b.int)
//!         .field("ListField", list_int),
//! )?;
//! let registry = ResolverRegistry::with_defaults(&types);
//!
//! let list = Value::list(list_int, vec![Value::Int(1), Value::Int(2)]);
//! let target = Value::object(sample, vec![Value::Int(5), list.clone()]);
//! let mut tree = Tree::new(Rc::new(types), Rc::new(registry), vec![target])?;
//!
//! tree.begin_draw()?;
//! let fields = tree.children(tree.root())?.to_vec();
//! assert_eq!(tree.definition(fields[0])?.name(), "IntField");
//! assert_eq!(tree.definition(fields[1])?.name(), "ListField");
//! assert_eq!(tree.children(fields[1])?.len(), 2);
//! tree.end_draw()?;
//!
//! list.push(Value::Int(3));
//! tree.begin_draw()?;
//! assert_eq!(tree.children(fields[1])?.len(), 3);
//! tree.end_draw()?;
//! # Ok::<(), arbor_tree::Error>(())
//! ```
//!
//! This crate is `no_std` and uses `alloc`. Logging goes through `tracing`.

#![no_std]

extern crate alloc;

mod access;
mod arena;
mod definition;
mod entry;
mod error;
mod node;
mod persist;
pub mod resolve;
mod tree;
mod value;

pub use arbor_bus::Deferral;

pub use access::{Accessor, MethodFn, MethodTable};
pub use definition::{Definition, ROOT_NAME, Role};
pub use entry::{
    Applied, BaseEntry, Change, EntryState, Mutator, Observation, ShapeKey, ValueEntry,
};
pub use error::{AccessError, DefinitionError, Error, ResolverError};
pub use node::{NodeId, NodeState, NodeStats, Phase};
pub use persist::{MemoryStateStore, Persistence, StateKey, StateStore};
pub use resolve::ResolverRegistry;
pub use tree::{DrawOutcome, PassReport, Tree, TreeBuilder, TreeConfig};
pub use value::{Mapping, Record, Sequence, Value};
