// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Value entries: per-node read access, queued writes, and runtime-type wrapping.
//!
//! A [`ValueEntry`] is either a plain [`BaseEntry`] typed by the declared type, or a
//! wrapper that re-targets reads and writes at the observed runtime type while the base
//! keeps the storage. The wrapper is rebuilt whenever the observed runtime type changes.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;
use smallvec::SmallVec;

use arbor_match::{Builtins, Ty, TypeTable};

use crate::access::Accessor;
use crate::definition::Definition;
use crate::error::{AccessError, Error};
use crate::value::Value;

/// Agreement of the values observed across targets.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum EntryState {
    /// All targets hold equal values of one type.
    Consistent,
    /// All targets hold values of one type, but not equal ones.
    TypeConsistent,
    /// Targets hold values of different types.
    Mixed,
    /// The value could not be read.
    Error,
}

impl EntryState {
    /// Returns `true` if a runtime-type wrapper may be built in this state.
    pub fn permits_wrapper(self) -> bool {
        matches!(self, Self::Consistent | Self::TypeConsistent)
    }
}

/// What a mutator did to one target.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// Store this value.
    Set(Value),
    /// The mutator changed the shared value itself.
    InPlace,
    /// Nothing to do.
    Unchanged,
}

/// Deferred write, called once per target with the target index and its current value.
pub type Mutator = Box<dyn FnMut(usize, &Value) -> Result<Change, Error>>;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
struct TargetShape {
    null: bool,
    len: Option<usize>,
    identity: Option<usize>,
}

/// Structural fingerprint of the observed values: nullness, plus length and identity of
/// collections. A change means the node's children must be recomputed.
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ShapeKey {
    targets: SmallVec<[TargetShape; 2]>,
}

/// Result of [`ValueEntry::update`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Observation {
    /// The wrapper was built, rebuilt, or dropped.
    pub rewrapped: bool,
    /// Fingerprint of the values just read.
    pub shape: ShapeKey,
}

/// Result of [`ValueEntry::apply_changes`].
#[derive(Debug, Default)]
pub struct Applied {
    /// Targets that changed, ascending.
    pub changed_targets: SmallVec<[usize; 4]>,
    /// Replacement owners produced by writes into value-type owners.
    pub owner_writes: Vec<(usize, Value)>,
    /// Per-target failures; the failed targets were left untouched.
    pub failures: Vec<(usize, Error)>,
    /// A mutator raised [`Error::ExitPass`]. It is spent; the mutators after it stay queued.
    pub exited: bool,
}

impl Applied {
    /// Returns `true` if any target changed.
    pub fn changed(&self) -> bool {
        !self.changed_targets.is_empty()
    }

    fn mark(&mut self, target: usize) {
        if let Err(at) = self.changed_targets.binary_search(&target) {
            self.changed_targets.insert(at, target);
        }
    }
}

/// Storage and read/write access typed by the declared type.
pub struct BaseEntry {
    name: String,
    declared: Ty,
    accessor: Accessor,
    read_only: bool,
    owners: Vec<Value>,
    values: Vec<Value>,
    state: EntryState,
    observed: Option<Ty>,
    error: Option<AccessError>,
    pending: Vec<Mutator>,
}

impl fmt::Debug for BaseEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseEntry")
            .field("name", &self.name)
            .field("declared", &self.declared)
            .field("accessor", &self.accessor)
            .field("values", &self.values)
            .field("state", &self.state)
            .field("observed", &self.observed)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl BaseEntry {
    fn new(definition: &Definition, types: &TypeTable, targets: usize) -> Self {
        let accessor = definition.accessor().cloned().unwrap_or(Accessor::Local);
        let values = if accessor == Accessor::Local {
            let initial = Value::default_for(types, definition.declared_type());
            alloc::vec![initial; targets]
        } else {
            Vec::new()
        };
        let mut entry = Self {
            name: definition.debug_name(),
            declared: definition.declared_type(),
            accessor,
            read_only: definition.is_read_only(),
            owners: Vec::new(),
            values,
            state: EntryState::Consistent,
            observed: None,
            error: None,
            pending: Vec::new(),
        };
        entry.recompute(types.builtins());
        entry
    }

    fn detached(declared: Ty) -> Self {
        Self {
            name: String::new(),
            declared,
            accessor: Accessor::Local,
            read_only: true,
            owners: Vec::new(),
            values: Vec::new(),
            state: EntryState::Consistent,
            observed: None,
            error: None,
            pending: Vec::new(),
        }
    }

    fn update(&mut self, owners: Vec<Value>, b: &Builtins) {
        if self.accessor != Accessor::Local {
            let read: Result<Vec<Value>, AccessError> =
                owners.iter().map(|o| self.accessor.get(o)).collect();
            self.owners = owners;
            match read {
                Ok(values) => {
                    self.values = values;
                    self.error = None;
                }
                Err(e) => {
                    self.values.clear();
                    self.error = Some(e);
                    self.state = EntryState::Error;
                    self.observed = None;
                    return;
                }
            }
        }
        self.recompute(b);
    }

    fn recompute(&mut self, b: &Builtins) {
        let Some(first) = self.values.first() else {
            self.state = EntryState::Consistent;
            self.observed = None;
            return;
        };
        let ty = first.runtime_ty(b);
        self.observed = ty;
        self.state = if self.values.iter().any(|v| v.runtime_ty(b) != ty) {
            EntryState::Mixed
        } else if self.values.iter().all(|v| v.same(first)) {
            EntryState::Consistent
        } else {
            EntryState::TypeConsistent
        };
    }

    fn wrap_target(&self) -> Option<Ty> {
        if !self.state.permits_wrapper() {
            return None;
        }
        self.observed.filter(|t| *t != self.declared)
    }

    fn shape(&self) -> ShapeKey {
        ShapeKey {
            targets: self
                .values
                .iter()
                .map(|v| {
                    let len = v.len();
                    TargetShape {
                        null: v.is_null(),
                        len,
                        identity: len.and(v.identity()),
                    }
                })
                .collect(),
        }
    }

    /// Queue a write of `value`, checked against `expected`.
    fn enqueue_checked(
        &mut self,
        value: Value,
        expected: Ty,
        types: &TypeTable,
    ) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly(self.name.clone()));
        }
        let ok = match value.runtime_ty(types.builtins()) {
            None => !types.is_value_type(expected),
            Some(t) => types.is_assignable(t, expected),
        };
        if !ok {
            let found = value
                .runtime_ty(types.builtins())
                .map_or("null", |t| types.name(t));
            return Err(Error::TypeMismatch {
                expected: types.name(expected).into(),
                found: found.into(),
            });
        }
        self.pending
            .push(Box::new(move |_, _| Ok(Change::Set(value.clone()))));
        Ok(())
    }

    /// Queue a write checked against the declared type, bypassing any wrapper.
    pub fn enqueue_set(&mut self, value: Value, types: &TypeTable) -> Result<(), Error> {
        let declared = self.declared;
        self.enqueue_checked(value, declared, types)
    }

    fn write(&mut self, target: usize, value: Value, applied: &mut Applied) -> Result<(), Error> {
        if self.accessor != Accessor::Local {
            let owner = self
                .owners
                .get(target)
                .ok_or(AccessError::OutOfRange(target))?;
            if let Some(replacement) = self.accessor.set(owner, value.clone())? {
                self.owners[target] = replacement.clone();
                applied.owner_writes.push((target, replacement));
            }
        }
        self.values[target] = value;
        Ok(())
    }

    fn apply_changes(&mut self) -> Applied {
        let mut applied = Applied::default();
        if self.pending.is_empty() {
            return applied;
        }
        if self.values.is_empty() {
            // Nothing observed to write through: the queued writes fail instead of vanishing.
            self.pending.clear();
            let error = self.error.clone().unwrap_or(AccessError::NotReadable);
            for target in 0..self.owners.len().max(1) {
                applied.failures.push((target, error.clone().into()));
            }
            return applied;
        }
        let mut pending = core::mem::take(&mut self.pending).into_iter();
        while let Some(mut mutator) = pending.next() {
            for target in 0..self.values.len() {
                let current = self.values[target].clone();
                match mutator(target, &current) {
                    Ok(Change::Set(value)) => match self.write(target, value, &mut applied) {
                        Ok(()) => applied.mark(target),
                        Err(e) => applied.failures.push((target, e)),
                    },
                    Ok(Change::InPlace) => applied.mark(target),
                    Ok(Change::Unchanged) => {}
                    Err(Error::ExitPass) => {
                        self.pending.extend(pending);
                        applied.exited = true;
                        return applied;
                    }
                    Err(e) => applied.failures.push((target, e)),
                }
            }
        }
        applied
    }

    /// Declared type.
    pub fn declared_type(&self) -> Ty {
        self.declared
    }

    /// Common runtime type of the observed values, if they agree and are not null.
    pub fn observed_type(&self) -> Option<Ty> {
        self.observed
    }
}

/// The value handle of a value-bearing node.
#[derive(Debug)]
pub enum ValueEntry {
    /// Typed by the declared type.
    Base(BaseEntry),
    /// Re-targeted at a narrower runtime type; storage stays in `base`.
    Wrapped {
        /// The storage.
        base: BaseEntry,
        /// Runtime type the wrapper is bound to.
        runtime: Ty,
    },
}

impl ValueEntry {
    /// Create an unwrapped entry for `definition` over `targets` targets.
    pub fn new(definition: &Definition, types: &TypeTable, targets: usize) -> Self {
        Self::Base(BaseEntry::new(definition, types, targets))
    }

    /// The base entry.
    pub fn base(&self) -> &BaseEntry {
        match self {
            Self::Base(base) | Self::Wrapped { base, .. } => base,
        }
    }

    /// The base entry, mutably.
    pub fn base_mut(&mut self) -> &mut BaseEntry {
        match self {
            Self::Base(base) | Self::Wrapped { base, .. } => base,
        }
    }

    /// Re-read the live values from `owners` (one per target), recompute the state, and
    /// rebuild the wrapper if the runtime type it should be bound to changed.
    pub fn update(&mut self, owners: Vec<Value>, types: &TypeTable) -> Observation {
        self.base_mut().update(owners, types.builtins());
        let target = self.base().wrap_target();
        let rewrapped = self.bound_runtime() != target;
        if rewrapped {
            self.rewrap(target);
        }
        Observation {
            rewrapped,
            shape: self.base().shape(),
        }
    }

    /// Discard the wrapper and, for `Some(runtime)`, bind a new one.
    pub fn rewrap(&mut self, runtime: Option<Ty>) {
        let placeholder = Self::Base(BaseEntry::detached(self.base().declared));
        let base = match core::mem::replace(self, placeholder) {
            Self::Base(base) | Self::Wrapped { base, .. } => base,
        };
        *self = match runtime {
            Some(runtime) => Self::Wrapped { base, runtime },
            None => Self::Base(base),
        };
    }

    /// Runtime type the wrapper is bound to, `None` when unwrapped.
    pub fn bound_runtime(&self) -> Option<Ty> {
        match self {
            Self::Base(_) => None,
            Self::Wrapped { runtime, .. } => Some(*runtime),
        }
    }

    /// Type reads and writes go through: the wrapper's runtime type, else the declared type.
    pub fn runtime_type(&self) -> Ty {
        self.bound_runtime().unwrap_or(self.base().declared)
    }

    /// Declared type.
    pub fn declared_type(&self) -> Ty {
        self.base().declared
    }

    /// Agreement state.
    pub fn state(&self) -> EntryState {
        self.base().state
    }

    /// Number of targets currently observed.
    pub fn target_count(&self) -> usize {
        self.base().values.len()
    }

    /// Observed value for one target.
    pub fn get(&self, target: usize) -> Option<&Value> {
        self.base().values.get(target)
    }

    /// Observed values, one per target.
    pub fn values(&self) -> &[Value] {
        &self.base().values
    }

    /// Returns `true` if every observed value is `Null`.
    pub fn is_null(&self) -> bool {
        self.values().iter().all(Value::is_null)
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.base().read_only
    }

    /// Why the value could not be read, in the `Error` state.
    pub fn error(&self) -> Option<&AccessError> {
        self.base().error.as_ref()
    }

    /// Returns `true` if writes are queued.
    pub fn has_pending(&self) -> bool {
        !self.base().pending.is_empty()
    }

    /// Queue a mutator. It runs once per target on the next apply.
    pub fn enqueue_change(&mut self, mutator: Mutator) -> Result<(), Error> {
        if self.is_read_only() {
            return Err(Error::ReadOnly(self.base().name.clone()));
        }
        self.base_mut().pending.push(mutator);
        Ok(())
    }

    /// Queue a write of `value` to every target, checked against [`ValueEntry::runtime_type`].
    pub fn enqueue_set(&mut self, value: Value, types: &TypeTable) -> Result<(), Error> {
        let expected = self.runtime_type();
        self.base_mut().enqueue_checked(value, expected, types)
    }

    /// Queue a replacement for a single target, as produced by a write into a child of a
    /// value-type owner.
    pub(crate) fn enqueue_owner_write(&mut self, target: usize, value: Value) {
        self.base_mut().pending.push(Box::new(move |t, _| {
            Ok(if t == target {
                Change::Set(value.clone())
            } else {
                Change::Unchanged
            })
        }));
    }

    /// Run queued mutators against the live targets, oldest first.
    ///
    /// Failures are per target and reported in [`Applied::failures`]. Writes queued while no
    /// target could be read fail on every target. Only the pass-exit signal stops early; see
    /// [`Applied::exited`].
    pub fn apply_changes(&mut self) -> Applied {
        self.base_mut().apply_changes()
    }
}
