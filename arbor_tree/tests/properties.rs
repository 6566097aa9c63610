// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! End-to-end behavior of the update cycle.

use std::rc::Rc;

use arbor_match::{Bindings, Pattern, TypeDef, TypeTable, Visibility};
use arbor_tree::resolve::{NodeView, Provider, Structure};
use arbor_tree::{
    Accessor, Definition, EntryState, NodeId, ResolverError, ResolverRegistry, Role, Tree, Value,
};

fn names(tree: &mut Tree, id: NodeId) -> Vec<String> {
    let children = tree.children(id).unwrap().to_vec();
    children
        .into_iter()
        .map(|c| tree.definition(c).unwrap().name().to_owned())
        .collect()
}

fn tree_over(types: TypeTable, targets: Vec<Value>) -> Tree {
    let registry = ResolverRegistry::with_defaults(&types);
    Tree::new(Rc::new(types), Rc::new(registry), targets).unwrap()
}

#[test]
fn scenario_int_field_and_list_field() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let list_int = types.instantiate(b.list, &[b.int]).unwrap();
    let sample = types
        .define(
            TypeDef::class("Sample")
                .field("IntField", b.int)
                .field("ListField", list_int),
        )
        .unwrap();
    let list = Value::list(list_int, vec![Value::Int(4), Value::Int(5), Value::Int(6)]);
    let target = Value::object(sample, vec![Value::Int(1), list.clone()]);
    let mut tree = tree_over(types, vec![target]);

    tree.begin_draw().unwrap();
    let root = tree.root();
    assert_eq!(names(&mut tree, root), ["IntField", "ListField"]);
    let list_node = tree.child_by_name(root, "ListField").unwrap().unwrap();
    assert_eq!(tree.definition(list_node).unwrap().role(), Role::Collection);
    assert_eq!(names(&mut tree, list_node), ["$0", "$1", "$2"]);
    tree.end_draw().unwrap();

    list.push(Value::Int(7));
    tree.begin_draw().unwrap();
    assert_eq!(tree.children(list_node).unwrap().len(), 4);
    let last = tree.child_at(list_node, 3).unwrap().unwrap();
    assert_eq!(
        tree.value_entry(last).unwrap().unwrap().get(0),
        Some(&Value::Int(7))
    );
    assert_eq!(&*tree.path(last).unwrap(), "$ROOT$/ListField/$3");
    tree.end_draw().unwrap();
}

#[test]
fn public_members_become_children_in_declaration_order() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let base = types
        .define(TypeDef::class("Base").field("id", b.int))
        .unwrap();
    let ty = types
        .define(
            TypeDef::class("Settings")
                .base(base)
                .field("width", b.int)
                .field_with("secret", b.int, Visibility::Private, false, vec![])
                .field("title", b.string)
                .method("reset", &[], b.void),
        )
        .unwrap();
    let target = Value::object(
        ty,
        vec![Value::Int(1), Value::Int(2), Value::Int(3), Value::from("t")],
    );
    let mut tree = tree_over(types, vec![target]);
    tree.begin_draw().unwrap();
    let root = tree.root();
    assert_eq!(names(&mut tree, root), ["id", "width", "title", "reset"]);
    tree.end_draw().unwrap();
}

#[test]
fn repeated_updates_within_a_token_are_no_ops() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let ty = types
        .define(TypeDef::class("Thing").field("a", b.int).field("b", b.int))
        .unwrap();
    let target = Value::object(ty, vec![Value::Int(1), Value::Int(2)]);
    let mut tree = tree_over(types, vec![target]);
    tree.begin_draw().unwrap();
    let root = tree.root();
    let first = tree.children(root).unwrap().to_vec();
    let stats = tree.node_stats(root).unwrap();
    let created = tree.resolver_stats().created;
    let second = tree.children(root).unwrap().to_vec();
    tree.value_entry(root).unwrap();
    assert_eq!(first, second);
    assert_eq!(tree.node_stats(root).unwrap(), stats);
    assert_eq!(tree.resolver_stats().created, created);
    tree.end_draw().unwrap();

    // A new token with nothing changed keeps every child.
    tree.begin_draw().unwrap();
    assert_eq!(tree.children(root).unwrap(), first.as_slice());
    assert_eq!(tree.node_stats(root).unwrap().refreshes, stats.refreshes);
    tree.end_draw().unwrap();
}

#[test]
fn appended_item_keeps_prior_children() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let list_str = types.instantiate(b.list, &[b.string]).unwrap();
    let list = Value::list(list_str, vec![Value::from("a"), Value::from("b")]);
    let mut tree = tree_over(types, vec![list.clone()]);
    tree.begin_draw().unwrap();
    let root = tree.root();
    let before = tree.children(root).unwrap().to_vec();
    assert_eq!(before.len(), 2);
    tree.end_draw().unwrap();

    list.push(Value::from("c"));
    tree.begin_draw().unwrap();
    let after = tree.children(root).unwrap().to_vec();
    assert_eq!(after.len(), 3);
    assert_eq!(&after[..2], before.as_slice());
    tree.end_draw().unwrap();
}

struct Named(&'static str);

impl Provider<Structure> for Named {
    fn create(&self, node: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        Ok(vec![Definition::new(
            self.0,
            node.definition.declared_type(),
            Role::Value,
            Some(Accessor::Root),
        )?])
    }
}

#[test]
fn higher_priority_generic_candidate_wins() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let list_int = types.instantiate(b.list, &[b.int]).unwrap();
    let mut registry = ResolverRegistry::with_defaults(&types);
    let shape = Pattern::generic(b.ilist, [Pattern::Param(0)]);
    registry.add::<Structure>(shape.clone(), 15, Named("low"));
    registry.add::<Structure>(shape, 20, Named("high"));
    let list = Value::list(list_int, vec![Value::Int(1)]);
    let mut tree = Tree::new(Rc::new(types), Rc::new(registry), vec![list]).unwrap();
    let root = tree.root();
    assert_eq!(names(&mut tree, root), ["high"]);
}

#[test]
fn replacing_the_subtype_rewraps_and_refreshes_once() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let animal = types
        .define(TypeDef::class("Animal").field("name", b.string))
        .unwrap();
    let dog = types
        .define(TypeDef::class("Dog").base(animal).field("bark", b.int))
        .unwrap();
    let cat = types
        .define(TypeDef::class("Cat").base(animal).field("meow", b.int))
        .unwrap();
    let home = types
        .define(TypeDef::class("Home").field("pet", animal))
        .unwrap();
    let rex = Value::object(dog, vec![Value::from("rex"), Value::Int(3)]);
    let tom = Value::object(cat, vec![Value::from("tom"), Value::Int(9)]);
    let target = Value::object(home, vec![rex]);
    let mut tree = tree_over(types, vec![target]);

    tree.begin_draw().unwrap();
    let pet = tree.child_by_name(tree.root(), "pet").unwrap().unwrap();
    assert_eq!(names(&mut tree, pet), ["name", "bark"]);
    assert_eq!(tree.value_entry(pet).unwrap().unwrap().bound_runtime(), Some(dog));
    // The wrapper checks writes against the runtime type.
    assert!(tree.set_value(pet, tom.clone()).is_err());
    tree.set_declared_value(pet, tom).unwrap();
    tree.end_draw().unwrap();
    let before = tree.node_stats(pet).unwrap();

    tree.begin_draw().unwrap();
    let after = tree.node_stats(pet).unwrap();
    assert_eq!(after.rewraps, before.rewraps + 1);
    assert_eq!(after.refreshes, before.refreshes + 1);
    assert_eq!(tree.value_entry(pet).unwrap().unwrap().bound_runtime(), Some(cat));
    assert_eq!(names(&mut tree, pet), ["name", "meow"]);
    tree.end_draw().unwrap();

    tree.begin_draw().unwrap();
    assert_eq!(tree.node_stats(pet).unwrap(), after);
    tree.end_draw().unwrap();
}

#[test]
fn writes_that_dirty_their_owner_apply_in_the_same_pass() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let inner = types
        .define(TypeDef::structure("Inner").field("v", b.int))
        .unwrap();
    let outer = types
        .define(TypeDef::class("Outer").field("inner", inner))
        .unwrap();
    let target = Value::object(
        outer,
        vec![Value::structure(inner, vec![Value::Int(1)])],
    );
    let mut tree = tree_over(types, vec![target.clone()]);
    tree.begin_draw().unwrap();
    let inner_node = tree.children(tree.root()).unwrap()[0];
    let v = tree.children(inner_node).unwrap()[0];
    tree.set_value(v, Value::Int(42)).unwrap();
    let report = tree.end_draw().unwrap();
    assert_eq!(report.iterations, 2);
    assert_eq!(report.applied, 2);
    assert!(report.failures.is_empty());
    assert!(tree.dirty().is_empty());
    let stored = target.field(0).unwrap();
    assert_eq!(stored.field(0), Some(Value::Int(42)));
}

#[test]
fn multiple_targets_share_one_tree() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let list_int = types.instantiate(b.list, &[b.int]).unwrap();
    let ty = types
        .define(
            TypeDef::class("Sample")
                .field("n", b.int)
                .field("items", list_int),
        )
        .unwrap();
    let t0 = Value::object(
        ty,
        vec![Value::Int(1), Value::list(list_int, vec![Value::Int(1), Value::Int(2)])],
    );
    let t1 = Value::object(
        ty,
        vec![Value::Int(2), Value::list(list_int, vec![Value::Int(1)])],
    );
    let mut tree = tree_over(types, vec![t0.clone(), t1.clone()]);
    tree.begin_draw().unwrap();
    let root = tree.root();
    let n = tree.child_by_name(root, "n").unwrap().unwrap();
    let items = tree.child_by_name(root, "items").unwrap().unwrap();
    assert_eq!(
        tree.value_entry(n).unwrap().unwrap().state(),
        EntryState::TypeConsistent
    );
    assert_eq!(tree.children(items).unwrap().len(), 1);
    tree.set_value(n, Value::Int(5)).unwrap();
    tree.end_draw().unwrap();

    assert_eq!(t0.field(0), Some(Value::Int(5)));
    assert_eq!(t1.field(0), Some(Value::Int(5)));
    tree.begin_draw().unwrap();
    assert_eq!(
        tree.value_entry(n).unwrap().unwrap().state(),
        EntryState::Consistent
    );
    tree.end_draw().unwrap();
}

#[test]
fn map_entries_follow_the_map() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let map_int = types.instantiate(b.map, &[b.int]).unwrap();
    let map = Value::map(map_int, vec![("x", Value::Int(1)), ("y", Value::Int(2))]);
    let mut tree = tree_over(types, vec![map]);
    tree.begin_draw().unwrap();
    let root = tree.root();
    assert_eq!(names(&mut tree, root), ["x", "y"]);
    let y = tree.child_by_name(root, "y").unwrap().unwrap();
    tree.set_value(y, Value::Int(20)).unwrap();
    tree.end_draw().unwrap();
    tree.begin_draw().unwrap();
    assert_eq!(
        tree.value_entry(y).unwrap().unwrap().get(0),
        Some(&Value::Int(20))
    );
    tree.end_draw().unwrap();
}
