// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Type patterns and their unification against concrete types.

use alloc::boxed::Box;
use alloc::vec::Vec;
use smallvec::SmallVec;

use crate::table::TypeTable;
use crate::types::{Ty, TypeKind};

/// A type shape with holes, matched against concrete types.
///
/// `Param(i)` binds the i-th type parameter of a candidate. A pattern without `Param`
/// or `Any` is *closed*.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Pattern {
    /// Matches any type without binding.
    Any,
    /// Matches exactly this type (or, at the top level, a descendant of it).
    Exact(Ty),
    /// Binds the type parameter at this position.
    Param(u8),
    /// Matches an instance of `origin` whose arguments match `args`.
    Generic {
        /// The open generic definition.
        origin: Ty,
        /// Patterns for each type argument.
        args: Vec<Pattern>,
    },
    /// Matches an array whose element type matches the inner pattern.
    Array(Box<Pattern>),
}

impl Pattern {
    /// Shorthand for [`Pattern::Generic`].
    pub fn generic(origin: Ty, args: impl IntoIterator<Item = Self>) -> Self {
        Self::Generic {
            origin,
            args: args.into_iter().collect(),
        }
    }

    /// Shorthand for [`Pattern::Array`].
    pub fn array(element: Self) -> Self {
        Self::Array(Box::new(element))
    }

    /// Number of type parameters referenced, i.e. highest `Param` index plus one.
    pub fn arity(&self) -> usize {
        match self {
            Self::Any | Self::Exact(_) => 0,
            Self::Param(i) => usize::from(*i) + 1,
            Self::Generic { args, .. } => args.iter().map(Self::arity).max().unwrap_or(0),
            Self::Array(inner) => inner.arity(),
        }
    }

    /// Returns `true` if the pattern has no holes.
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Any | Self::Param(_) => false,
            Self::Exact(_) => true,
            Self::Generic { args, .. } => args.iter().all(Self::is_closed),
            Self::Array(inner) => inner.is_closed(),
        }
    }
}

/// Type arguments bound while unifying, indexed by parameter position.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Bindings {
    slots: SmallVec<[Option<Ty>; 4]>,
}

impl Bindings {
    /// Empty bindings for `arity` parameters.
    pub fn with_arity(arity: usize) -> Self {
        Self {
            slots: core::iter::repeat_n(None, arity).collect(),
        }
    }

    /// Bound argument at `param`, if any.
    pub fn get(&self, param: usize) -> Option<Ty> {
        self.slots.get(param).copied().flatten()
    }

    /// Bind `param` to `ty`. Returns `false` if it is already bound to a different type.
    pub fn bind(&mut self, param: usize, ty: Ty) -> bool {
        if param >= self.slots.len() {
            self.slots.resize(param + 1, None);
        }
        match self.slots[param] {
            Some(existing) => existing == ty,
            None => {
                self.slots[param] = Some(ty);
                true
            }
        }
    }

    /// Number of parameter slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns `true` if there are no parameter slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of slots still unbound.
    pub fn unbound(&self) -> usize {
        self.slots.iter().filter(|s| s.is_none()).count()
    }

    /// Bound arguments in parameter order; unbound slots are `None`.
    pub fn iter(&self) -> impl Iterator<Item = Option<Ty>> + '_ {
        self.slots.iter().copied()
    }
}

/// How closely a candidate's shape fits the target. Smaller is better.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum MatchQuality {
    /// The target itself has the shape.
    Exact,
    /// An ancestor or interface at this distance has the shape.
    Ancestor(u32),
    /// The shape is a bare parameter or `Any`.
    Wildcard,
}

/// Structural unification of `pattern` with `target`, without walking ancestry.
///
/// Bindings are only committed when the whole pattern unifies. A target that is itself an
/// unbound type parameter unifies with anything.
pub fn unify(table: &TypeTable, pattern: &Pattern, target: Ty, bindings: &mut Bindings) -> bool {
    if table.is_param(target) {
        return true;
    }
    match pattern {
        Pattern::Any => true,
        Pattern::Exact(t) => *t == target,
        Pattern::Param(i) => bindings.bind(usize::from(*i), target),
        Pattern::Generic { origin, args } => {
            if table.generic_origin(target) != Some(*origin) {
                return false;
            }
            let targs = table.generic_args(target);
            if targs.len() != args.len() {
                return false;
            }
            let mut scratch = bindings.clone();
            for (p, t) in args.iter().zip(targs) {
                if !unify(table, p, *t, &mut scratch) {
                    return false;
                }
            }
            *bindings = scratch;
            true
        }
        Pattern::Array(inner) => match table.try_get(target).map(|d| d.kind) {
            Some(TypeKind::Array(elem)) => unify(table, inner, elem, bindings),
            _ => false,
        },
    }
}

/// Match a top-level shape against `target`, walking ancestry when `inherit` is set.
///
/// Closed shapes match the target or, with `inherit`, any of its ancestors. Generic shapes
/// look for the nearest type in the target's ancestry with the same generic origin and
/// unify its arguments; only that first type is considered.
pub fn match_shape(
    table: &TypeTable,
    pattern: &Pattern,
    target: Ty,
    inherit: bool,
    bindings: &mut Bindings,
) -> Option<MatchQuality> {
    if table.is_param(target) {
        return Some(MatchQuality::Exact);
    }
    match pattern {
        Pattern::Any => Some(MatchQuality::Wildcard),
        Pattern::Param(i) => bindings
            .bind(usize::from(*i), target)
            .then_some(MatchQuality::Wildcard),
        Pattern::Exact(t) => {
            if *t == target {
                Some(MatchQuality::Exact)
            } else if !inherit {
                None
            } else if let Some(d) = table.ancestor_distance(target, *t) {
                Some(MatchQuality::Ancestor(d))
            } else if *t == table.builtins().object {
                // Interfaces have no base but every value is an object.
                Some(MatchQuality::Ancestor(u32::MAX))
            } else {
                None
            }
        }
        Pattern::Generic { origin, .. } => {
            let found = table
                .ancestors(target)
                .into_iter()
                .take_while(|(_, d)| inherit || *d == 0)
                .find(|(t, _)| table.generic_origin(*t) == Some(*origin));
            let (ancestor, distance) = found?;
            unify(table, pattern, ancestor, bindings).then_some(if distance == 0 {
                MatchQuality::Exact
            } else {
                MatchQuality::Ancestor(distance)
            })
        }
        Pattern::Array(_) => unify(table, pattern, target, bindings).then_some(MatchQuality::Exact),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TypeDef;

    #[test]
    fn generic_pattern_binds_through_interface() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let list_str = types.instantiate(b.list, &[b.string]).unwrap();
        let pattern = Pattern::generic(b.ilist, [Pattern::Param(0)]);
        let mut bindings = Bindings::with_arity(1);
        let q = match_shape(&types, &pattern, list_str, true, &mut bindings);
        assert_eq!(q, Some(MatchQuality::Ancestor(1)));
        assert_eq!(bindings.get(0), Some(b.string));
    }

    #[test]
    fn generic_pattern_without_inheritance_needs_exact_origin() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let list_str = types.instantiate(b.list, &[b.string]).unwrap();
        let pattern = Pattern::generic(b.ilist, [Pattern::Param(0)]);
        let mut bindings = Bindings::with_arity(1);
        assert_eq!(
            match_shape(&types, &pattern, list_str, false, &mut bindings),
            None
        );
    }

    #[test]
    fn arrays_unify_by_element() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let arr = types.array_of(b.float).unwrap();
        let mut bindings = Bindings::with_arity(1);
        assert!(unify(
            &types,
            &Pattern::array(Pattern::Param(0)),
            arr,
            &mut bindings
        ));
        assert_eq!(bindings.get(0), Some(b.float));
        assert!(!unify(
            &types,
            &Pattern::array(Pattern::Exact(b.int)),
            arr,
            &mut Bindings::default()
        ));
    }

    #[test]
    fn conflicting_bindings_fail_without_partial_commit() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let pair = types
            .define_generic(&["A", "B"], |_| TypeDef::class("Pair"))
            .unwrap();
        let pair_int_str = types.instantiate(pair, &[b.int, b.string]).unwrap();
        let same = Pattern::generic(pair, [Pattern::Param(0), Pattern::Param(0)]);
        let mut bindings = Bindings::with_arity(1);
        assert!(!unify(&types, &same, pair_int_str, &mut bindings));
        assert_eq!(bindings.get(0), None);
    }

    #[test]
    fn unbound_parameter_target_unifies_trivially() {
        let types = TypeTable::new();
        let b = *types.builtins();
        let t = types.generic_args(b.list)[0];
        assert!(unify(
            &types,
            &Pattern::Exact(b.int),
            t,
            &mut Bindings::default()
        ));
    }

    #[test]
    fn closed_shapes_and_arity() {
        let types = TypeTable::new();
        let b = *types.builtins();
        let p = Pattern::generic(b.map, [Pattern::Param(2)]);
        assert_eq!(p.arity(), 3);
        assert!(!p.is_closed());
        assert!(Pattern::Exact(b.int).is_closed());
    }
}
