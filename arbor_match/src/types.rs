// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Public types for the type table: handles, descriptors, members, and attributes.

use alloc::string::String;
use alloc::vec::Vec;
use smallvec::SmallVec;

/// Handle of a type registered in a [`TypeTable`](crate::TypeTable).
///
/// Handles are only meaningful for the table that produced them.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct Ty(pub(crate) u32);

impl Ty {
    pub(crate) const fn new(idx: u32) -> Self {
        Self(idx)
    }

    pub(crate) const fn idx(self) -> usize {
        self.0 as usize
    }

    /// Raw index of this handle inside its table.
    pub const fn index(self) -> u32 {
        self.0
    }
}

/// Broad classification of a type.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TypeKind {
    /// Built-in scalar (`bool`, `int`, `float`, `string`).
    Primitive,
    /// Reference type with identity.
    Class,
    /// Value type, copied on assignment.
    Struct,
    /// Abstract contract implemented by classes and structs.
    Interface,
    /// Array of the element type.
    Array(Ty),
    /// Unbound type parameter at the given position of its generic definition.
    Param(u8),
}

/// Visibility of a member.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Visibility {
    /// Enumerated by the default structure resolver.
    #[default]
    Public,
    /// Skipped by the default structure resolver.
    Private,
}

/// A named annotation with positional string arguments.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Attribute {
    /// Attribute name, used as the override key.
    pub name: String,
    /// Positional arguments.
    pub args: Vec<String>,
}

impl Attribute {
    /// An attribute without arguments.
    pub fn flag(name: &str) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
        }
    }

    /// An attribute with a single argument.
    pub fn with_arg(name: &str, arg: &str) -> Self {
        Self {
            name: name.into(),
            args: alloc::vec![arg.into()],
        }
    }

    /// First argument, if any.
    pub fn arg(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }
}

/// A method parameter.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Param {
    /// Parameter name.
    pub name: String,
    /// Declared parameter type.
    pub ty: Ty,
}

/// What a member is.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum MemberKind {
    /// Stored field. `slot` is the position in the record layout, inherited fields first.
    Field {
        /// Layout slot, assigned by the table.
        slot: usize,
    },
    /// Invokable method.
    Method {
        /// Parameters in declaration order.
        params: Vec<Param>,
    },
}

/// A field or method declared on a type.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Member {
    /// Member name, unique within the declaring type and its ancestors.
    pub name: String,
    /// Field type, or the return type of a method.
    pub ty: Ty,
    /// Field or method.
    pub kind: MemberKind,
    /// Visibility.
    pub visibility: Visibility,
    /// Whether writes through this member are rejected.
    pub read_only: bool,
    /// Member-level attributes.
    pub attributes: Vec<Attribute>,
}

impl Member {
    /// Returns `true` for stored fields.
    pub fn is_field(&self) -> bool {
        matches!(self.kind, MemberKind::Field { .. })
    }

    /// Layout slot of a field.
    pub fn slot(&self) -> Option<usize> {
        match self.kind {
            MemberKind::Field { slot } => Some(slot),
            MemberKind::Method { .. } => None,
        }
    }
}

/// Generic shape of a type: its open definition and its type arguments.
///
/// For a generic definition, `origin` is the type itself and `args` are its parameters.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct GenericInfo {
    /// The open generic definition.
    pub origin: Ty,
    /// Type arguments, possibly parameters.
    pub args: SmallVec<[Ty; 2]>,
}

/// Full descriptor of a registered type.
#[derive(Clone, Debug)]
pub struct TypeDesc {
    /// Display name, e.g. `List<int>`.
    pub name: String,
    /// Classification.
    pub kind: TypeKind,
    /// Base type, if any.
    pub base: Option<Ty>,
    /// Implemented interfaces.
    pub interfaces: Vec<Ty>,
    /// Generic origin and arguments, for generic definitions and their instances.
    pub generic: Option<GenericInfo>,
    /// Members declared on this type (not inherited ones).
    pub members: Vec<Member>,
    /// Type-level attributes.
    pub attributes: Vec<Attribute>,
    /// Number of field slots including inherited fields.
    pub(crate) field_count: usize,
}

impl TypeDesc {
    /// Returns `true` for value types (structs and primitives).
    pub fn is_value_type(&self) -> bool {
        matches!(self.kind, TypeKind::Primitive | TypeKind::Struct)
    }

    /// Number of field slots in a record of this type, inherited fields included.
    pub fn field_count(&self) -> usize {
        self.field_count
    }
}

/// Builder for a type declaration, consumed by [`TypeTable::define`](crate::TypeTable::define).
#[derive(Clone, Debug)]
pub struct TypeDef {
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) base: Option<Ty>,
    pub(crate) interfaces: Vec<Ty>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) methods: Vec<(String, Vec<Param>, Ty, Vec<Attribute>)>,
    pub(crate) attributes: Vec<Attribute>,
}

#[derive(Clone, Debug)]
pub(crate) struct FieldDef {
    pub(crate) name: String,
    pub(crate) ty: Ty,
    pub(crate) visibility: Visibility,
    pub(crate) read_only: bool,
    pub(crate) attributes: Vec<Attribute>,
}

impl TypeDef {
    fn new(name: &str, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    /// Declare a reference type.
    pub fn class(name: &str) -> Self {
        Self::new(name, TypeKind::Class)
    }

    /// Declare a value type.
    pub fn structure(name: &str) -> Self {
        Self::new(name, TypeKind::Struct)
    }

    /// Declare an interface.
    pub fn interface(name: &str) -> Self {
        Self::new(name, TypeKind::Interface)
    }

    /// Set the base type.
    pub fn base(mut self, base: Ty) -> Self {
        self.base = Some(base);
        self
    }

    /// Add an implemented interface.
    pub fn implements(mut self, interface: Ty) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Add a public, writable field.
    pub fn field(self, name: &str, ty: Ty) -> Self {
        self.field_with(name, ty, Visibility::Public, false, Vec::new())
    }

    /// Add a field with explicit visibility, writability, and attributes.
    pub fn field_with(
        mut self,
        name: &str,
        ty: Ty,
        visibility: Visibility,
        read_only: bool,
        attributes: Vec<Attribute>,
    ) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            ty,
            visibility,
            read_only,
            attributes,
        });
        self
    }

    /// Add a public method. `returns` is the return type.
    pub fn method(mut self, name: &str, params: &[(&str, Ty)], returns: Ty) -> Self {
        let params = params
            .iter()
            .map(|(n, t)| Param {
                name: (*n).into(),
                ty: *t,
            })
            .collect();
        self.methods.push((name.into(), params, returns, Vec::new()));
        self
    }

    /// Add a type-level attribute.
    pub fn attribute(mut self, attribute: Attribute) -> Self {
        self.attributes.push(attribute);
        self
    }
}
