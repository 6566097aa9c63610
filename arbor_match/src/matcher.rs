// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Prioritized candidate matching over open generic shapes.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::pattern::{Bindings, MatchQuality, Pattern, match_shape};
use crate::table::TypeTable;
use crate::types::Ty;

/// Requirement placed on a bound type parameter.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Bound {
    /// The bound type must be assignable to the pattern; unifying may bind further params.
    Assignable(Pattern),
    /// The bound type must be a value type.
    ValueType,
    /// The bound type must be a reference type.
    ReferenceType,
}

/// A bound on one type parameter of a candidate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Constraint {
    /// Parameter index.
    pub param: u8,
    /// The requirement.
    pub bound: Bound,
}

/// A value registered against a type shape.
#[derive(Clone, Debug)]
pub struct Candidate<T> {
    /// Payload returned on match.
    pub value: T,
    /// Shape the target (or one of its ancestors) must have.
    pub shape: Pattern,
    /// Higher wins.
    pub priority: i32,
    /// Bounds on type parameters.
    pub constraints: Vec<Constraint>,
    /// Whether ancestors of the target are considered.
    pub inherit: bool,
}

impl<T> Candidate<T> {
    /// A candidate with priority 0 that also matches descendants.
    pub fn new(value: T, shape: Pattern) -> Self {
        Self {
            value,
            shape,
            priority: 0,
            constraints: Vec::new(),
            inherit: true,
        }
    }

    /// Set the priority.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a bound on a type parameter.
    pub fn constraint(mut self, param: u8, bound: Bound) -> Self {
        self.constraints.push(Constraint { param, bound });
        self
    }

    /// Only match targets whose own shape fits, not their ancestors'.
    pub fn exact_only(mut self) -> Self {
        self.inherit = false;
        self
    }

    /// Number of type parameters, from the shape and every constraint.
    pub fn arity(&self) -> usize {
        let from_constraints = self.constraints.iter().map(|c| {
            let own = usize::from(c.param) + 1;
            match &c.bound {
                Bound::Assignable(p) => own.max(p.arity()),
                _ => own,
            }
        });
        from_constraints.fold(self.shape.arity(), usize::max)
    }
}

/// One accepted candidate for a target type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MatchResult {
    /// Registration index of the candidate.
    pub index: usize,
    /// Candidate priority.
    pub priority: i32,
    /// Shape quality.
    pub quality: MatchQuality,
    /// Type arguments bound during matching.
    pub bindings: Bindings,
}

/// Ordered registry of [`Candidate`]s with per-type memoization.
///
/// Results are sorted by descending priority, then by [`MatchQuality`], then by fewer type
/// parameters; remaining ties keep registration order.
///
/// The memo is keyed by [`Ty`] alone, so a matcher must only be queried against one table.
/// Changing the candidate set clears it.
///
/// ## Example
///
/// ```rust
/// use arbor_match::{Candidate, Pattern, TypeMatcher, TypeTable};
///
/// let mut types = TypeTable::new();
/// let b = *types.builtins();
/// let list_int = types.instantiate(b.list, &[b.int]).unwrap();
///
/// let mut matcher = TypeMatcher::new();
/// matcher.push(Candidate::new("object", Pattern::Exact(b.object)));
/// matcher.push(
///     Candidate::new("list", Pattern::generic(b.ilist, [Pattern::Param(0)])).priority(10),
/// );
///
/// let best = matcher.best(&types, list_int).unwrap();
/// assert_eq!(*matcher.candidate(&best), "list");
/// assert_eq!(best.bindings.get(0), Some(b.int));
/// ```
pub struct TypeMatcher<T> {
    candidates: Vec<Candidate<T>>,
    memo: RefCell<HashMap<Ty, Rc<[MatchResult]>>>,
}

impl<T> Default for TypeMatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for TypeMatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMatcher")
            .field("candidates", &self.candidates)
            .field("memoized", &self.memo.borrow().len())
            .finish()
    }
}

impl<T> TypeMatcher<T> {
    /// Create an empty matcher.
    pub fn new() -> Self {
        Self {
            candidates: Vec::new(),
            memo: RefCell::new(HashMap::new()),
        }
    }

    /// Append a candidate. Returns its registration index.
    pub fn push(&mut self, candidate: Candidate<T>) -> usize {
        self.memo.get_mut().clear();
        self.candidates.push(candidate);
        self.candidates.len() - 1
    }

    /// Replace the whole candidate set.
    pub fn register(&mut self, candidates: impl IntoIterator<Item = Candidate<T>>) {
        self.memo.get_mut().clear();
        self.candidates = candidates.into_iter().collect();
    }

    /// All candidates in registration order.
    pub fn candidates(&self) -> &[Candidate<T>] {
        &self.candidates
    }

    /// Number of registered candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Payload of the candidate a result refers to.
    ///
    /// # Panics
    ///
    /// Panics if `result` came from a different matcher.
    pub fn candidate(&self, result: &MatchResult) -> &T {
        &self.candidates[result.index].value
    }

    /// Every accepted candidate for `target`, best first.
    pub fn match_type(&self, types: &TypeTable, target: Ty) -> Rc<[MatchResult]> {
        if let Some(hit) = self.memo.borrow().get(&target) {
            return hit.clone();
        }
        let mut results: Vec<(usize, MatchResult)> = Vec::new();
        for (index, candidate) in self.candidates.iter().enumerate() {
            let arity = candidate.arity();
            let mut bindings = Bindings::with_arity(arity);
            let Some(quality) = match_shape(
                types,
                &candidate.shape,
                target,
                candidate.inherit,
                &mut bindings,
            ) else {
                continue;
            };
            if !satisfy_constraints(types, &candidate.constraints, &mut bindings) {
                continue;
            }
            if bindings.unbound() > 0 {
                continue;
            }
            results.push((
                arity,
                MatchResult {
                    index,
                    priority: candidate.priority,
                    quality,
                    bindings,
                },
            ));
        }
        results.sort_by(|(a_arity, a), (b_arity, b)| {
            b.priority
                .cmp(&a.priority)
                .then(a.quality.cmp(&b.quality))
                .then(a_arity.cmp(b_arity))
        });
        let results: Rc<[MatchResult]> = results.into_iter().map(|(_, r)| r).collect();
        self.memo.borrow_mut().insert(target, results.clone());
        results
    }

    /// The best candidate for `target`, if any.
    pub fn best(&self, types: &TypeTable, target: Ty) -> Option<MatchResult> {
        self.match_type(types, target).first().cloned()
    }
}

/// Check constraints in dependency order: a constraint waits until its parameter is bound,
/// and checking an `Assignable` bound may bind further parameters.
fn satisfy_constraints(
    types: &TypeTable,
    constraints: &[Constraint],
    bindings: &mut Bindings,
) -> bool {
    let mut pending: SmallVec<[&Constraint; 4]> = constraints.iter().collect();
    while !pending.is_empty() {
        let before = pending.len();
        let mut i = 0;
        while i < pending.len() {
            let c = pending[i];
            let Some(bound_ty) = bindings.get(usize::from(c.param)) else {
                i += 1;
                continue;
            };
            let ok = match &c.bound {
                Bound::ValueType => types.is_value_type(bound_ty),
                Bound::ReferenceType => !types.is_value_type(bound_ty),
                Bound::Assignable(p) => match_shape(types, p, bound_ty, true, bindings).is_some(),
            };
            if !ok {
                return false;
            }
            pending.remove(i);
        }
        if pending.len() == before {
            return false;
        }
    }
    true
}
