// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Effective attributes of a node.

use alloc::vec::Vec;

use arbor_match::{Attribute, Bindings};

use super::{Attributes, NodeView, Provider};
use crate::error::ResolverError;

/// Where an effective attribute came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AttributeSource {
    /// Declared on the member the node represents.
    Member,
    /// Declared on the node's runtime type.
    Type,
    /// Declared on a base type or interface.
    Inherited,
}

/// Attributes by name, each with its source. The first insertion of a name wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AttributeSet {
    entries: Vec<(Attribute, AttributeSource)>,
}

impl AttributeSet {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `attribute` unless one with the same name is already present.
    pub fn insert(&mut self, attribute: Attribute, source: AttributeSource) -> bool {
        if self.contains(&attribute.name) {
            return false;
        }
        self.entries.push((attribute, source));
        true
    }

    /// Attribute by name.
    pub fn get(&self, name: &str) -> Option<&Attribute> {
        self.entries
            .iter()
            .find(|(a, _)| a.name == name)
            .map(|(a, _)| a)
    }

    /// Source of the attribute with `name`.
    pub fn source(&self, name: &str) -> Option<AttributeSource> {
        self.entries
            .iter()
            .find(|(a, _)| a.name == name)
            .map(|(_, s)| *s)
    }

    /// Returns `true` if an attribute with `name` is present.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(a, _)| a.name == name)
    }

    /// Attributes with their sources, in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&Attribute, AttributeSource)> + '_ {
        self.entries.iter().map(|(a, s)| (a, *s))
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if there are no attributes.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Member attributes override type attributes, which override inherited ones.
#[derive(Copy, Clone, Debug, Default)]
pub struct MemberAttributes;

impl Provider<Attributes> for MemberAttributes {
    fn create(&self, node: &NodeView<'_>, _: &Bindings) -> Result<AttributeSet, ResolverError> {
        let mut set = AttributeSet::new();
        for a in node.definition.attributes() {
            set.insert(a.clone(), AttributeSource::Member);
        }
        for (ty, distance) in node.types.ancestors(node.match_ty()) {
            let source = if distance == 0 {
                AttributeSource::Type
            } else {
                AttributeSource::Inherited
            };
            for a in &node.types.get(ty).attributes {
                set.insert(a.clone(), source);
            }
        }
        Ok(set)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Definition;
    use crate::node::{NodeId, NodeState};
    use alloc::vec;
    use arbor_match::{TypeDef, TypeTable};

    #[test]
    fn overrides_follow_source_order() {
        let mut types = TypeTable::new();
        let base = types
            .define(
                TypeDef::class("Base")
                    .attribute(Attribute::with_arg("color", "red"))
                    .attribute(Attribute::flag("sealed")),
            )
            .unwrap();
        let derived = types
            .define(
                TypeDef::class("Derived")
                    .base(base)
                    .attribute(Attribute::with_arg("color", "blue")),
            )
            .unwrap();
        let def = Definition::group("g", derived, vec![])
            .unwrap()
            .with_attributes(vec![Attribute::with_arg("label", "Thing")]);
        let view = NodeView {
            id: NodeId::new(0, 1),
            definition: &def,
            entry: None,
            attributes: None,
            state: NodeState::default(),
            types: &types,
        };
        let set = MemberAttributes.create(&view, &Bindings::default()).unwrap();
        assert_eq!(set.source("label"), Some(AttributeSource::Member));
        assert_eq!(set.get("color").and_then(Attribute::arg), Some("blue"));
        assert_eq!(set.source("color"), Some(AttributeSource::Type));
        assert_eq!(set.source("sealed"), Some(AttributeSource::Inherited));
        assert_eq!(set.len(), 3);
    }
}
