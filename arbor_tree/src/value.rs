// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Dynamic values making up the observed object graph.

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use arbor_match::{Builtins, Ty, TypeKind, TypeTable};

/// Fields of a struct or object, laid out by the type's field slots.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    /// Concrete type of the record.
    pub ty: Ty,
    /// Field values by slot.
    pub fields: Vec<Value>,
}

/// Items of an ordered collection.
#[derive(Clone, Debug)]
pub struct Sequence {
    /// Concrete collection type, e.g. `List<int>` or `int[]`.
    pub ty: Ty,
    /// Items in order.
    pub items: Vec<Value>,
}

/// Entries of a string-keyed collection. Key order is insertion order.
#[derive(Clone, Debug)]
pub struct Mapping {
    /// Concrete map type.
    pub ty: Ty,
    /// Key/value pairs.
    pub entries: Vec<(Rc<str>, Value)>,
}

impl Mapping {
    /// Value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| &**k == key)
            .map(|(_, v)| v)
    }

    /// Insert or replace the value stored under `key`.
    pub fn insert(&mut self, key: &str, value: Value) {
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| &**k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key.into(), value));
        }
    }
}

/// A node of the object graph.
///
/// `Struct` values have value semantics: they are never mutated in place, a write produces
/// a replacement. `Object`, `List`, and `Map` are shared and compared by identity.
#[derive(Clone, Default)]
pub enum Value {
    /// Absent reference.
    #[default]
    Null,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(Rc<str>),
    /// Immutable value-type record.
    Struct(Rc<Record>),
    /// Shared reference-type record.
    Object(Rc<RefCell<Record>>),
    /// Shared ordered collection.
    List(Rc<RefCell<Sequence>>),
    /// Shared keyed collection.
    Map(Rc<RefCell<Mapping>>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::Struct(r) => f.debug_tuple("Struct").field(&r.fields).finish(),
            Self::Object(r) => write!(f, "Object@{:p}", Rc::as_ptr(r)),
            Self::List(l) => write!(f, "List@{:p}[{}]", Rc::as_ptr(l), l.borrow().items.len()),
            Self::Map(m) => write!(f, "Map@{:p}[{}]", Rc::as_ptr(m), m.borrow().entries.len()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.into())
    }
}

impl Value {
    /// A new shared object.
    pub fn object(ty: Ty, fields: Vec<Self>) -> Self {
        Self::Object(Rc::new(RefCell::new(Record { ty, fields })))
    }

    /// A new struct value.
    pub fn structure(ty: Ty, fields: Vec<Self>) -> Self {
        Self::Struct(Rc::new(Record { ty, fields }))
    }

    /// A new shared list (or array).
    pub fn list(ty: Ty, items: Vec<Self>) -> Self {
        Self::List(Rc::new(RefCell::new(Sequence { ty, items })))
    }

    /// A new shared map.
    pub fn map(ty: Ty, entries: Vec<(&str, Self)>) -> Self {
        Self::Map(Rc::new(RefCell::new(Mapping {
            ty,
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        })))
    }

    /// The default value a slot of type `ty` starts with.
    pub fn default_for(types: &TypeTable, ty: Ty) -> Self {
        let b = types.builtins();
        if ty == b.boolean {
            Self::Bool(false)
        } else if ty == b.int {
            Self::Int(0)
        } else if ty == b.float {
            Self::Float(0.0)
        } else if ty == b.string {
            Self::Str("".into())
        } else if types.try_get(ty).map(|d| d.kind) == Some(TypeKind::Struct) {
            let count = types.get(ty).field_count();
            let mut fields = Vec::with_capacity(count);
            for m in types.members(ty).into_iter().filter(|m| m.is_field()) {
                fields.push(Self::default_for(types, m.ty));
            }
            Self::structure(ty, fields)
        } else {
            Self::Null
        }
    }

    /// Concrete type of the value, `None` for `Null`.
    pub fn runtime_ty(&self, b: &Builtins) -> Option<Ty> {
        match self {
            Self::Null => None,
            Self::Bool(_) => Some(b.boolean),
            Self::Int(_) => Some(b.int),
            Self::Float(_) => Some(b.float),
            Self::Str(_) => Some(b.string),
            Self::Struct(r) => Some(r.ty),
            Self::Object(r) => Some(r.borrow().ty),
            Self::List(l) => Some(l.borrow().ty),
            Self::Map(m) => Some(m.borrow().ty),
        }
    }

    /// Host equality: scalars and structs by value, shared values by identity.
    pub fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Struct(a), Self::Struct(b)) => {
                Rc::ptr_eq(a, b)
                    || (a.ty == b.ty
                        && a.fields.len() == b.fields.len()
                        && a.fields.iter().zip(&b.fields).all(|(x, y)| x.same(y)))
            }
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            (Self::List(a), Self::List(b)) => Rc::ptr_eq(a, b),
            (Self::Map(a), Self::Map(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Address of a shared value, used to notice when a different instance is observed.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Self::Object(r) => Some(Rc::as_ptr(r).cast::<()>() as usize),
            Self::List(l) => Some(Rc::as_ptr(l).cast::<()>() as usize),
            Self::Map(m) => Some(Rc::as_ptr(m).cast::<()>() as usize),
            _ => None,
        }
    }

    /// Number of items or entries of a collection.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::List(l) => Some(l.borrow().items.len()),
            Self::Map(m) => Some(m.borrow().entries.len()),
            _ => None,
        }
    }

    /// Returns `true` for `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Integer payload.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Float payload.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(x) => Some(*x),
            _ => None,
        }
    }

    /// Boolean payload.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// String payload.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Field at `slot` of a struct or object.
    pub fn field(&self, slot: usize) -> Option<Self> {
        match self {
            Self::Struct(r) => r.fields.get(slot).cloned(),
            Self::Object(r) => r.borrow().fields.get(slot).cloned(),
            _ => None,
        }
    }

    /// Append to a list. Returns `false` if the value is not a list.
    pub fn push(&self, item: Self) -> bool {
        match self {
            Self::List(l) => {
                l.borrow_mut().items.push(item);
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arbor_match::TypeDef;

    #[test]
    fn shared_values_compare_by_identity() {
        let types = TypeTable::new();
        let b = *types.builtins();
        let a = Value::object(b.object, Vec::new());
        let twin = Value::object(b.object, Vec::new());
        assert!(a.same(&a.clone()));
        assert!(!a.same(&twin));
        assert_eq!(a.identity(), a.clone().identity());
    }

    #[test]
    fn structs_compare_by_value() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let point = types
            .define(TypeDef::structure("Point").field("x", b.int).field("y", b.int))
            .unwrap();
        let p = Value::structure(point, alloc::vec![Value::Int(1), Value::Int(2)]);
        let q = Value::structure(point, alloc::vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(p, q);
        assert_eq!(Value::default_for(&types, point).field(1), Some(Value::Int(0)));
    }

    #[test]
    fn runtime_types_and_lengths() {
        let mut types = TypeTable::new();
        let b = *types.builtins();
        let list_int = types.instantiate(b.list, &[b.int]).unwrap();
        let list = Value::list(list_int, alloc::vec![Value::Int(1)]);
        assert_eq!(list.runtime_ty(&b), Some(list_int));
        assert_eq!(Value::Null.runtime_ty(&b), None);
        assert!(list.push(Value::Int(2)));
        assert_eq!(list.len(), Some(2));
        assert!(!Value::Int(3).push(Value::Int(4)));
    }
}
