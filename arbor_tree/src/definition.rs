// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Immutable descriptors of tree positions.

use alloc::format;
use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use arbor_match::{Attribute, Ty, TypeTable};

use crate::access::Accessor;
use crate::error::DefinitionError;

/// Name of the root definition.
pub const ROOT_NAME: &str = "$ROOT$";

/// What a tree position represents.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Role {
    /// A field holding a scalar or record.
    Value,
    /// A field holding a list, array, or map.
    Collection,
    /// One item or entry of a collection.
    CollectionItem,
    /// An invokable method.
    Method,
    /// An argument of a method, held by the node.
    MethodParameter,
    /// A named group of sibling members.
    Group,
    /// The tree root.
    Root,
}

impl Role {
    /// `Collection` for collection types, `Value` otherwise.
    pub fn for_type(types: &TypeTable, ty: Ty) -> Self {
        if types.collection_kind(ty).is_some() {
            Self::Collection
        } else {
            Self::Value
        }
    }

    /// Returns `true` if nodes in this role carry a value entry.
    pub fn is_value_bearing(self) -> bool {
        !matches!(self, Self::Method | Self::Group)
    }
}

/// Descriptor of one tree position.
///
/// Definitions are compared structurally when a parent refreshes: a child whose definition
/// is still produced is kept, anything else is recreated.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Definition {
    name: Rc<str>,
    declared_type: Ty,
    role: Role,
    accessor: Option<Accessor>,
    read_only: bool,
    attributes: Vec<Attribute>,
    members: Vec<Definition>,
}

impl Definition {
    /// Build a definition.
    ///
    /// Value-bearing roles need an accessor.
    pub fn new(
        name: &str,
        declared_type: Ty,
        role: Role,
        accessor: Option<Accessor>,
    ) -> Result<Self, DefinitionError> {
        if name.is_empty() {
            return Err(DefinitionError::EmptyName);
        }
        if role.is_value_bearing() && accessor.is_none() {
            return Err(DefinitionError::MissingAccessor(name.into()));
        }
        Ok(Self {
            name: name.into(),
            declared_type,
            role,
            accessor,
            read_only: false,
            attributes: Vec::new(),
            members: Vec::new(),
        })
    }

    /// The root definition for targets of `declared_type`.
    pub fn root(declared_type: Ty) -> Self {
        Self {
            name: ROOT_NAME.into(),
            declared_type,
            role: Role::Root,
            accessor: Some(Accessor::Root),
            read_only: false,
            attributes: Vec::new(),
            members: Vec::new(),
        }
    }

    /// Item `index` of an ordered collection, named `$index`.
    pub fn item(index: usize, element: Ty) -> Self {
        Self {
            name: format!("${index}").into(),
            declared_type: element,
            role: Role::CollectionItem,
            accessor: Some(Accessor::Item(index)),
            read_only: false,
            attributes: Vec::new(),
            members: Vec::new(),
        }
    }

    /// A method returning `returns`, with its parameter definitions.
    pub fn method(name: &str, returns: Ty, params: Vec<Self>) -> Result<Self, DefinitionError> {
        Ok(Self::new(name, returns, Role::Method, Some(Accessor::Method(name.into())))?
            .with_members(params))
    }

    /// A method parameter; its value is held by the node.
    pub fn parameter(name: &str, ty: Ty) -> Result<Self, DefinitionError> {
        Self::new(name, ty, Role::MethodParameter, Some(Accessor::Local))
    }

    /// A named group of member definitions presented under one node.
    pub fn group(name: &str, owner: Ty, members: Vec<Self>) -> Result<Self, DefinitionError> {
        Ok(Self::new(name, owner, Role::Group, None)?.with_members(members))
    }

    /// Mark as read-only.
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Attach member-level attributes.
    pub fn with_attributes(mut self, attributes: Vec<Attribute>) -> Self {
        self.attributes = attributes;
        self
    }

    /// Attach nested definitions (group members or method parameters).
    pub fn with_members(mut self, members: Vec<Self>) -> Self {
        self.members = members;
        self
    }

    /// Name, unique among siblings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statically declared type.
    pub fn declared_type(&self) -> Ty {
        self.declared_type
    }

    /// Role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Accessor, absent for groups.
    pub fn accessor(&self) -> Option<&Accessor> {
        self.accessor.as_ref()
    }

    /// Whether writes are rejected.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Member-level attributes.
    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    /// Nested definitions.
    pub fn members(&self) -> &[Self] {
        &self.members
    }

    /// Attribute by name.
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// Returns `true` if nodes for this definition carry a value entry.
    pub fn is_value_bearing(&self) -> bool {
        self.role.is_value_bearing()
    }

    /// Name of the method this definition invokes.
    pub fn method_name(&self) -> Option<&str> {
        match &self.accessor {
            Some(Accessor::Method(name)) => Some(name),
            _ => None,
        }
    }

    pub(crate) fn debug_name(&self) -> String {
        String::from(&*self.name)
    }
}
