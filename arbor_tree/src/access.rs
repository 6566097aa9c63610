// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Accessors that read and write one value out of its owner, and the method table.

use alloc::rc::Rc;
use alloc::string::String;
use core::fmt;
use hashbrown::HashMap;

use arbor_match::{Ty, TypeTable};

use crate::error::{AccessError, Error};
use crate::value::Value;

/// How a node's value is reached from its owner.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Accessor {
    /// The owner itself. Used by the root, whose owners are the tree targets.
    Root,
    /// Field at a layout slot of a struct or object.
    Field {
        /// Layout slot.
        slot: usize,
    },
    /// Item of a list or array.
    Item(usize),
    /// Entry of a map.
    Entry(Rc<str>),
    /// Method of the owner. Not readable; see [`MethodTable`].
    Method(Rc<str>),
    /// Value held by the node itself rather than by an owner.
    Local,
}

impl Accessor {
    /// Read the value out of `owner`.
    pub fn get(&self, owner: &Value) -> Result<Value, AccessError> {
        match self {
            Self::Root => Ok(owner.clone()),
            Self::Field { slot } => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::Struct(_) | Value::Object(_) => {
                    owner.field(*slot).ok_or(AccessError::OutOfRange(*slot))
                }
                _ => Err(AccessError::WrongOwner("a record")),
            },
            Self::Item(i) => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::List(l) => l
                    .borrow()
                    .items
                    .get(*i)
                    .cloned()
                    .ok_or(AccessError::OutOfRange(*i)),
                _ => Err(AccessError::WrongOwner("a list")),
            },
            Self::Entry(key) => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::Map(m) => m
                    .borrow()
                    .get(key)
                    .cloned()
                    .ok_or_else(|| AccessError::MissingKey(String::from(&**key))),
                _ => Err(AccessError::WrongOwner("a map")),
            },
            Self::Method(_) | Self::Local => Err(AccessError::NotReadable),
        }
    }

    /// Write `value` into `owner`.
    ///
    /// Shared owners are updated in place and `None` is returned. Value-type owners cannot
    /// be updated in place: the replacement owner is returned and must be written to
    /// wherever the owner itself lives. For [`Accessor::Root`] the replacement is `value`.
    pub fn set(&self, owner: &Value, value: Value) -> Result<Option<Value>, AccessError> {
        match self {
            Self::Root => Ok(Some(value)),
            Self::Field { slot } => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::Object(r) => {
                    let mut record = r.borrow_mut();
                    let field = record
                        .fields
                        .get_mut(*slot)
                        .ok_or(AccessError::OutOfRange(*slot))?;
                    *field = value;
                    Ok(None)
                }
                Value::Struct(r) => {
                    let mut record = (**r).clone();
                    let field = record
                        .fields
                        .get_mut(*slot)
                        .ok_or(AccessError::OutOfRange(*slot))?;
                    *field = value;
                    Ok(Some(Value::Struct(Rc::new(record))))
                }
                _ => Err(AccessError::WrongOwner("a record")),
            },
            Self::Item(i) => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::List(l) => {
                    let mut seq = l.borrow_mut();
                    let item = seq.items.get_mut(*i).ok_or(AccessError::OutOfRange(*i))?;
                    *item = value;
                    Ok(None)
                }
                _ => Err(AccessError::WrongOwner("a list")),
            },
            Self::Entry(key) => match owner {
                Value::Null => Err(AccessError::NullOwner),
                Value::Map(m) => {
                    m.borrow_mut().insert(key, value);
                    Ok(None)
                }
                _ => Err(AccessError::WrongOwner("a map")),
            },
            Self::Method(_) | Self::Local => Err(AccessError::NotWritable),
        }
    }
}

/// Implementation of a method: receives the target and the argument values.
pub type MethodFn = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, Error>>;

/// Method implementations keyed by declaring type and name.
///
/// Lookups walk the target type's ancestry, so an implementation registered on a base type
/// serves its descendants.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<Ty, HashMap<Rc<str>, MethodFn>>,
}

impl fmt::Debug for MethodTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("types", &self.methods.len())
            .finish_non_exhaustive()
    }
}

impl MethodTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the implementation of `name` on `ty`, replacing any previous one.
    pub fn register(
        &mut self,
        ty: Ty,
        name: &str,
        f: impl Fn(&Value, &[Value]) -> Result<Value, Error> + 'static,
    ) {
        self.methods
            .entry(ty)
            .or_default()
            .insert(name.into(), Rc::new(f));
    }

    /// Find the implementation of `name` for a target of type `ty`.
    pub fn lookup(&self, types: &TypeTable, ty: Ty, name: &str) -> Option<MethodFn> {
        types
            .ancestors(ty)
            .into_iter()
            .find_map(|(t, _)| self.methods.get(&t)?.get(name).cloned())
    }
}
