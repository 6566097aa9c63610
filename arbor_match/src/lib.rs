// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Arbor Match: an explicit type table and prioritized matching over open generic shapes.
//!
//! ## Overview
//!
//! Arbor builds live property trees over object graphs. Which resolver handles a node is
//! decided by the node's type, so this crate provides the two pieces that decision needs:
//!
//! - [`TypeTable`]: registered type descriptors with bases, interfaces, members, generic
//!   definitions and their memoized instances, and arrays.
//! - [`TypeMatcher`]: candidates registered against [`Pattern`]s such as `IList<T>` or
//!   `object`, ranked per target type and memoized.
//!
//! ## Ranking
//!
//! For a target type the matcher returns every candidate whose shape fits the target (or, unless
//! the candidate is [`exact_only`](Candidate::exact_only), one of its ancestors) and whose
//! constraints hold. Results are ordered by:
//!
//! 1. higher priority,
//! 2. better [`MatchQuality`] (the target itself, then nearer ancestors, then wildcards),
//! 3. fewer type parameters,
//! 4. registration order.
//!
//! Generic shapes bind type parameters. `IList<T>` against `List<int>` binds `T = int`
//! through the interface `List<int>` implements.
//!
//! ```rust
//! use arbor_match::{Bound, Candidate, Pattern, TypeMatcher, TypeTable};
//!
//! let mut types = TypeTable::new();
//! let b = *types.builtins();
//! let list_int = types.instantiate(b.list, &[b.int]).unwrap();
//!
//! let mut matcher = TypeMatcher::new();
//! matcher.push(
//!     Candidate::new("value items", Pattern::generic(b.ilist, [Pattern::Param(0)]))
//!         .constraint(0, Bound::ValueType),
//! );
//! let best = matcher.best(&types, list_int).unwrap();
//! assert_eq!(best.bindings.get(0), Some(b.int));
//! ```
//!
//! This crate is `no_std` and uses `alloc`.

#![no_std]

extern crate alloc;

mod error;
mod matcher;
mod pattern;
mod table;
mod types;

pub use error::TypeError;
pub use matcher::{Bound, Candidate, Constraint, MatchResult, TypeMatcher};
pub use pattern::{Bindings, MatchQuality, Pattern, match_shape, unify};
pub use table::{Builtins, CollectionKind, TypeTable};
pub use types::{
    Attribute, GenericInfo, Member, MemberKind, Param, Ty, TypeDef, TypeDesc, TypeKind, Visibility,
};
