// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Builtin structure providers.

use alloc::format;
use alloc::vec::Vec;

use arbor_match::{Bindings, Member, MemberKind, TypeTable, Visibility};

use super::{NodeView, Provider, Structure};
use crate::access::Accessor;
use crate::definition::{Definition, Role};
use crate::error::ResolverError;
use crate::value::Value;

/// Attribute gathering a member into a named group.
pub const GROUP: &str = "group";
/// Attribute excluding a member from enumeration.
pub const HIDDEN: &str = "hidden";

/// Public fields and methods of the node's type, inherited members first.
///
/// Members carrying `group(name)` are gathered into one [`Role::Group`] definition placed
/// where the first of them would be. Members carrying `hidden` are skipped. A node whose
/// value is null on every target has no members.
#[derive(Copy, Clone, Debug, Default)]
pub struct ObjectMembers;

enum Slot<'a> {
    Single(Definition),
    Group(&'a str, Vec<Definition>),
}

fn member_definition(types: &TypeTable, m: &Member) -> Result<Definition, ResolverError> {
    let def = match &m.kind {
        MemberKind::Field { slot } => Definition::new(
            &m.name,
            m.ty,
            Role::for_type(types, m.ty),
            Some(Accessor::Field { slot: *slot }),
        )?
        .read_only(m.read_only),
        MemberKind::Method { params } => {
            let params = params
                .iter()
                .map(|p| Definition::parameter(&p.name, p.ty))
                .collect::<Result<Vec<_>, _>>()?;
            Definition::method(&m.name, m.ty, params)?
        }
    };
    Ok(def.with_attributes(m.attributes.clone()))
}

impl Provider<Structure> for ObjectMembers {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        !matches!(node.definition.role(), Role::Method | Role::Group)
    }

    fn create(&self, node: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        if node.entry.is_some_and(|e| e.target_count() == 0 || e.is_null()) {
            return Ok(Vec::new());
        }
        let types = node.types;
        let mut slots: Vec<Slot<'_>> = Vec::new();
        for m in types.members(node.match_ty()) {
            if m.visibility == Visibility::Private
                || m.attributes.iter().any(|a| a.name == HIDDEN)
            {
                continue;
            }
            let def = member_definition(types, m)?;
            let group = m
                .attributes
                .iter()
                .find(|a| a.name == GROUP)
                .and_then(|a| a.arg());
            match group {
                None => slots.push(Slot::Single(def)),
                Some(name) => {
                    let existing = slots.iter_mut().find_map(|s| match s {
                        Slot::Group(n, members) if *n == name => Some(members),
                        _ => None,
                    });
                    match existing {
                        Some(members) => members.push(def),
                        None => slots.push(Slot::Group(name, alloc::vec![def])),
                    }
                }
            }
        }
        let owner = node.match_ty();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            out.push(match slot {
                Slot::Single(def) => def,
                Slot::Group(name, members) => Definition::group(name, owner, members)?,
            });
        }
        Ok(out)
    }
}

/// Items of an ordered collection, named `$0`, `$1`, and so on.
///
/// Matched against `IList<T>`; `T` is the item type. With several targets only the
/// items every target has are enumerated.
#[derive(Copy, Clone, Debug, Default)]
pub struct CollectionItems;

impl Provider<Structure> for CollectionItems {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        node.entry.is_some()
    }

    fn create(
        &self,
        node: &NodeView<'_>,
        bindings: &Bindings,
    ) -> Result<Vec<Definition>, ResolverError> {
        let element = bindings.get(0).ok_or_else(|| {
            ResolverError::Construction(format!(
                "no element type bound for `{}`",
                node.types.name(node.match_ty())
            ))
        })?;
        let count = node
            .values()
            .iter()
            .map(|v| v.len().unwrap_or(0))
            .min()
            .unwrap_or(0);
        Ok((0..count).map(|i| Definition::item(i, element)).collect())
    }
}

/// Entries of a map, named by key, in the first target's key order.
///
/// Matched against `Map<V>`; `V` is the value type. With several targets only keys every
/// target has are enumerated.
#[derive(Copy, Clone, Debug, Default)]
pub struct MapEntries;

impl Provider<Structure> for MapEntries {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        node.entry.is_some()
    }

    fn create(
        &self,
        node: &NodeView<'_>,
        bindings: &Bindings,
    ) -> Result<Vec<Definition>, ResolverError> {
        let element = bindings
            .get(0)
            .ok_or_else(|| ResolverError::Construction("no value type bound for map".into()))?;
        let values = node.values();
        let Some(Value::Map(first)) = values.first() else {
            return Ok(Vec::new());
        };
        let first = first.borrow();
        let mut out = Vec::with_capacity(first.entries.len());
        for (key, _) in &first.entries {
            let everywhere = values[1..].iter().all(|v| match v {
                Value::Map(m) => m.borrow().get(key).is_some(),
                _ => false,
            });
            if everywhere {
                out.push(Definition::new(
                    key,
                    element,
                    Role::CollectionItem,
                    Some(Accessor::Entry(key.clone())),
                )?);
            }
        }
        Ok(out)
    }
}

/// Parameters of a method node.
#[derive(Copy, Clone, Debug, Default)]
pub struct MethodParameters;

impl Provider<Structure> for MethodParameters {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        node.definition.role() == Role::Method
    }

    fn create(&self, node: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        Ok(node.definition.members().to_vec())
    }
}

/// Members of a group node.
#[derive(Copy, Clone, Debug, Default)]
pub struct GroupMembers;

impl Provider<Structure> for GroupMembers {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        node.definition.role() == Role::Group
    }

    fn create(&self, node: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        Ok(node.definition.members().to_vec())
    }
}
