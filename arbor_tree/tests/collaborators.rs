// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Deferred work, runtime structure edits, host collaborators, and error containment.

use std::cell::RefCell;
use std::fmt::Write as _;
use std::rc::Rc;

use arbor_match::{Attribute, Bindings, Pattern, Ty, TypeDef, TypeTable};
use arbor_tree::resolve::{
    AttributeSource, Handler, NodeView, Outcome, PresentCx, Provider, Structure,
};
use arbor_tree::{
    Accessor, Deferral, Definition, Error, MemoryStateStore, MethodTable, NodeId, NodeState,
    Persistence, ResolverError, ResolverRegistry, Role, Tree, TreeConfig, Value,
};

struct Fixture {
    types: Rc<TypeTable>,
    pair: Ty,
    leaf: Ty,
}

/// `Pair { left: Leaf, right: Leaf }`, `Leaf { v: int }`.
fn fixture() -> Fixture {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let leaf = types
        .define(TypeDef::class("Leaf").field("v", b.int))
        .unwrap();
    let pair = types
        .define(TypeDef::class("Pair").field("left", leaf).field("right", leaf))
        .unwrap();
    Fixture {
        types: Rc::new(types),
        pair,
        leaf,
    }
}

impl Fixture {
    fn target(&self) -> Value {
        Value::object(
            self.pair,
            vec![
                Value::object(self.leaf, vec![Value::Int(1)]),
                Value::object(self.leaf, vec![Value::Int(2)]),
            ],
        )
    }

    fn tree(&self) -> Tree {
        let registry = ResolverRegistry::with_defaults(&self.types);
        Tree::new(self.types.clone(), Rc::new(registry), vec![self.target()]).unwrap()
    }
}

fn child(tree: &mut Tree, id: NodeId, name: &str) -> NodeId {
    tree.child_by_name(id, name).unwrap().unwrap()
}

#[test]
fn stable_pass_callbacks_run_before_the_update() {
    let fx = fixture();
    let mut tree = fx.tree();
    let log = Rc::new(RefCell::new(Vec::new()));

    let l = log.clone();
    tree.request(move |t| {
        l.borrow_mut().push(("now", t.token()));
        Ok(())
    })
    .unwrap();
    let l = log.clone();
    tree.request_until_next_stable_pass(move |t| {
        l.borrow_mut().push(("stable", t.token()));
        Ok(())
    })
    .unwrap();
    assert_eq!(tree.pending(Deferral::NextStablePass), 1);

    tree.begin_draw().unwrap();
    let l = log.clone();
    tree.request(move |t| {
        l.borrow_mut().push(("end", t.token()));
        Ok(())
    })
    .unwrap();
    assert_eq!(log.borrow().len(), 2);
    tree.end_draw().unwrap();

    assert_eq!(*log.borrow(), [("now", 0), ("stable", 0), ("end", 1)]);
}

#[test]
fn moves_are_batched_and_deferred_while_drawing() {
    let fx = fixture();
    let mut tree = fx.tree();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let right = child(&mut tree, root, "right");
    let v = child(&mut tree, left, "v");

    tree.begin_batch().unwrap();
    tree.move_child(v, right, 0).unwrap();
    assert_eq!(tree.parent(v).unwrap(), Some(left));
    assert!(tree.children(left).unwrap().contains(&v));
    assert_eq!(tree.children(right).unwrap()[0], v);
    assert_eq!(tree.end_batch().unwrap(), 1);

    assert_eq!(tree.parent(v).unwrap(), Some(right));
    assert!(tree.children(left).unwrap().is_empty());
    assert_eq!(tree.children(right).unwrap().len(), 2);
    assert_eq!(&*tree.path(v).unwrap(), "$ROOT$/right/v");
    assert_eq!(tree.logical_parent(v).unwrap(), Some(left));

    // A moved structural child stays away from its logical parent across refreshes.
    tree.request_refresh(left).unwrap();
    tree.begin_draw().unwrap();
    assert!(tree.children(left).unwrap().is_empty());
    assert_eq!(tree.structural_children(left).unwrap(), [v]);

    // While drawing, moves wait for the next pass.
    tree.move_child(v, left, 0).unwrap();
    assert_eq!(tree.parent(v).unwrap(), Some(right));
    tree.end_draw().unwrap();
    tree.begin_draw().unwrap();
    assert_eq!(tree.parent(v).unwrap(), Some(left));
    assert_eq!(tree.children(left).unwrap(), [v]);
    tree.end_draw().unwrap();

    assert_eq!(tree.move_child(left, v, 0), Err(Error::InvalidMove));
    assert_eq!(tree.move_child(root, left, 0), Err(Error::InvalidMove));
}

#[test]
fn repeated_moves_in_one_batch_leave_a_single_listing() {
    let fx = fixture();
    let mut tree = fx.tree();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let right = child(&mut tree, root, "right");
    let v = child(&mut tree, left, "v");

    tree.begin_batch().unwrap();
    tree.move_child(v, right, 0).unwrap();
    tree.move_child(v, root, 0).unwrap();
    assert_eq!(tree.end_batch().unwrap(), 1);
    assert_eq!(tree.parent(v).unwrap(), Some(root));
    assert_eq!(tree.children(root).unwrap(), [v, left, right]);
    assert!(!tree.children(left).unwrap().contains(&v));
    assert!(!tree.children(right).unwrap().contains(&v));

    // Out and back again within one batch.
    tree.begin_batch().unwrap();
    tree.move_child(v, left, 0).unwrap();
    tree.move_child(v, root, 2).unwrap();
    assert_eq!(tree.end_batch().unwrap(), 1);
    assert_eq!(tree.parent(v).unwrap(), Some(root));
    assert_eq!(tree.children(root).unwrap(), [left, right, v]);
    assert!(!tree.children(left).unwrap().contains(&v));
    assert_eq!(&*tree.path(v).unwrap(), "$ROOT$/v");
}

#[test]
fn moves_queued_in_a_batch_count_toward_cycles() {
    let fx = fixture();
    let mut tree = fx.tree();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let right = child(&mut tree, root, "right");
    let v = child(&mut tree, left, "v");

    tree.begin_batch().unwrap();
    tree.move_child(left, right, 0).unwrap();
    assert_eq!(tree.move_child(right, left, 0), Err(Error::InvalidMove));
    assert_eq!(tree.move_child(right, v, 0), Err(Error::InvalidMove));
    assert_eq!(tree.end_batch().unwrap(), 1);
    assert_eq!(tree.parent(left).unwrap(), Some(right));
    assert_eq!(tree.parent(right).unwrap(), Some(root));
    assert_eq!(&*tree.path(v).unwrap(), "$ROOT$/right/left/v");

    // `v` leaves `left`, then `left` moves under `v` while still listing it.
    tree.begin_batch().unwrap();
    tree.move_child(v, root, 0).unwrap();
    tree.move_child(left, v, 0).unwrap();
    assert_eq!(tree.end_batch().unwrap(), 2);
    assert_eq!(&*tree.path(left).unwrap(), "$ROOT$/v/left");
    assert_eq!(tree.children(v).unwrap(), [left]);
    assert!(tree.children(left).unwrap().is_empty());

    tree.set_expanded(v, true).unwrap();
    tree.set_expanded(left, true).unwrap();
    tree.begin_draw().unwrap();
    tree.end_draw().unwrap();
}

#[test]
fn injected_nodes_survive_refresh_and_removed_children_stay_absent() {
    let fx = fixture();
    let mut tree = fx.tree();
    let root = tree.root();
    let b = *fx.types.builtins();
    tree.children(root).unwrap();
    let extra = Definition::new("extra", fx.leaf, Role::Value, Some(Accessor::Field { slot: 0 }))
        .unwrap();
    let injected = tree.inject_child(root, extra, 1).unwrap();
    let names = |tree: &mut Tree| {
        let children = tree.children(root).unwrap().to_vec();
        children
            .into_iter()
            .map(|c| tree.definition(c).unwrap().name().to_owned())
            .collect::<Vec<_>>()
    };
    assert_eq!(names(&mut tree), ["left", "extra", "right"]);
    assert_eq!(&*tree.path(injected).unwrap(), "$ROOT$/extra");

    let right = child(&mut tree, root, "right");
    tree.remove_child(right).unwrap();
    assert!(tree.is_alive(right));
    tree.request_refresh(root).unwrap();
    tree.begin_draw().unwrap();
    assert_eq!(names(&mut tree), ["left", "extra"]);
    tree.end_draw().unwrap();

    tree.remove_child(injected).unwrap();
    assert!(!tree.is_alive(injected));
    assert_eq!(names(&mut tree), ["left"]);

    let loose = Definition::new("loose", b.int, Role::Value, None);
    assert!(loose.is_err());
}

#[derive(Clone, Default)]
struct Recorder {
    dirty: Rc<RefCell<Vec<i64>>>,
}

impl Persistence for Recorder {
    fn mark_dirty(&mut self, target: &Value) {
        let v = target.field(0).and_then(|v| v.as_int()).unwrap_or(-1);
        self.dirty.borrow_mut().push(v);
    }

    fn find_by_path(&self, path: &str) -> Option<Value> {
        Some(Value::from(path))
    }
}

#[test]
fn persistence_sees_each_changed_target_once() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let ty = types
        .define(TypeDef::class("Counter").field("n", b.int).field("m", b.int))
        .unwrap();
    let recorder = Recorder::default();
    let registry = ResolverRegistry::with_defaults(&types);
    let targets = vec![
        Value::object(ty, vec![Value::Int(0), Value::Int(0)]),
        Value::object(ty, vec![Value::Int(0), Value::Int(0)]),
    ];
    let mut tree = Tree::builder(Rc::new(types), Rc::new(registry))
        .persistence(recorder.clone())
        .build(targets)
        .unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let n = child(&mut tree, root, "n");
    let m = child(&mut tree, root, "m");
    tree.set_value(n, Value::Int(3)).unwrap();
    tree.enqueue_change(m, |target, _| {
        Ok(if target == 1 {
            arbor_tree::Change::Set(Value::Int(8))
        } else {
            arbor_tree::Change::Unchanged
        })
    })
    .unwrap();
    tree.end_draw().unwrap();
    assert_eq!(*recorder.dirty.borrow(), [3, 3]);

    tree.begin_draw().unwrap();
    tree.end_draw().unwrap();
    assert_eq!(recorder.dirty.borrow().len(), 2);

    assert_eq!(
        tree.find_external(m).unwrap(),
        Some(Value::from("$ROOT$/m"))
    );
}

#[test]
fn apply_failures_are_reported_per_target() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let ty = types
        .define(TypeDef::class("Counter").field("n", b.int))
        .unwrap();
    let t0 = Value::object(ty, vec![Value::Int(0)]);
    let t1 = Value::object(ty, vec![Value::Int(0)]);
    let registry = ResolverRegistry::with_defaults(&types);
    let mut tree = Tree::new(Rc::new(types), Rc::new(registry), vec![t0.clone(), t1.clone()])
        .unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let n = child(&mut tree, root, "n");
    tree.enqueue_change(n, |target, _| {
        if target == 0 {
            Err(Error::NotAMethod)
        } else {
            Ok(arbor_tree::Change::Set(Value::Int(1)))
        }
    })
    .unwrap();
    let report = tree.end_draw().unwrap();
    assert_eq!(report.failures, [(n, 0, Error::NotAMethod)]);
    assert_eq!(t0.field(0), Some(Value::Int(0)));
    assert_eq!(t1.field(0), Some(Value::Int(1)));
}

#[test]
fn exit_during_apply_keeps_unapplied_writes_queued() {
    let fx = fixture();
    let target = fx.target();
    let registry = ResolverRegistry::with_defaults(&fx.types);
    let mut tree = Tree::new(fx.types.clone(), Rc::new(registry), vec![target.clone()]).unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let right = child(&mut tree, root, "right");
    let left_v = child(&mut tree, left, "v");
    let right_v = child(&mut tree, right, "v");
    tree.enqueue_change(left_v, |_, _| Err(Error::ExitPass)).unwrap();
    tree.set_value(right_v, Value::Int(99)).unwrap();
    assert_eq!(tree.end_draw(), Err(Error::ExitPass));
    assert!(!tree.is_drawing());
    assert_eq!(tree.dirty(), [right_v]);

    tree.begin_draw().unwrap();
    let report = tree.end_draw().unwrap();
    assert_eq!(report.applied, 1);
    assert!(report.failures.is_empty());
    assert!(tree.dirty().is_empty());
    assert_eq!(target.field(1).unwrap().field(0), Some(Value::Int(99)));
    assert_eq!(target.field(0).unwrap().field(0), Some(Value::Int(1)));
}

#[test]
fn changes_queued_on_untouched_nodes_are_applied() {
    let fx = fixture();
    let target = fx.target();
    let registry = ResolverRegistry::with_defaults(&fx.types);
    let mut tree = Tree::new(fx.types.clone(), Rc::new(registry), vec![target.clone()]).unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let left_v = tree.structural_children(left).unwrap()[0];
    tree.enqueue_change(left_v, |_, _| Ok(arbor_tree::Change::Set(Value::Int(5)))).unwrap();
    let report = tree.end_draw().unwrap();
    assert_eq!(report.applied, 1);
    assert!(report.failures.is_empty());
    assert_eq!(target.field(0).unwrap().field(0), Some(Value::Int(5)));
}

#[test]
fn ui_state_outlives_the_tree() {
    let fx = fixture();
    let store = Rc::new(RefCell::new(MemoryStateStore::new()));
    let build = |store: &Rc<RefCell<MemoryStateStore>>| {
        let registry = ResolverRegistry::with_defaults(&fx.types);
        Tree::builder(fx.types.clone(), Rc::new(registry))
            .state_store(store.clone())
            .build(vec![fx.target()])
            .unwrap()
    };

    let mut first = build(&store);
    let root = first.root();
    let left = child(&mut first, root, "left");
    first.set_expanded(left, true).unwrap();
    assert_eq!(store.borrow().len(), 1);
    first.dispose().unwrap();

    let mut second = build(&store);
    let root = second.root();
    let left = child(&mut second, root, "left");
    let right = child(&mut second, root, "right");
    assert!(second.state(left).unwrap().contains(NodeState::EXPANDED));
    assert!(!second.state(right).unwrap().contains(NodeState::EXPANDED));
}

#[test]
fn methods_are_invoked_with_parameter_values() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let ty = types
        .define(
            TypeDef::class("Counter")
                .field("count", b.int)
                .method("add", &[("by", b.int)], b.int),
        )
        .unwrap();
    let mut methods = MethodTable::new();
    methods.register(ty, "add", |this, args| {
        let count = this.field(0).and_then(|v| v.as_int()).unwrap_or(0);
        let by = args[0].as_int().unwrap_or(0);
        Ok(Value::Int(count + by))
    });
    let registry = ResolverRegistry::with_defaults(&types);
    let targets = vec![
        Value::object(ty, vec![Value::Int(10)]),
        Value::object(ty, vec![Value::Int(20)]),
    ];
    let mut tree = Tree::builder(Rc::new(types), Rc::new(registry))
        .methods(Rc::new(methods))
        .build(targets)
        .unwrap();
    let root = tree.root();
    let add = child(&mut tree, root, "add");
    let count = child(&mut tree, root, "count");
    assert_eq!(tree.definition(add).unwrap().role(), Role::Method);
    let by = child(&mut tree, add, "by");
    assert_eq!(tree.definition(by).unwrap().role(), Role::MethodParameter);

    tree.set_value(by, Value::Int(5)).unwrap();
    tree.end_draw().unwrap();
    assert_eq!(
        tree.invoke(add).unwrap(),
        [Value::Int(15), Value::Int(25)]
    );
    assert_eq!(tree.invoke(count), Err(Error::NotAMethod));
}

struct Failing;

impl Provider<Structure> for Failing {
    fn create(&self, _: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        Err(ResolverError::Construction("cannot enumerate".into()))
    }
}

struct Exiting;

impl Provider<Structure> for Exiting {
    fn create(&self, _: &NodeView<'_>, _: &Bindings) -> Result<Vec<Definition>, ResolverError> {
        Err(ResolverError::ExitPass)
    }
}

#[test]
fn resolver_failures_stay_local_but_exit_propagates() {
    let fx = fixture();
    let mut registry = ResolverRegistry::with_defaults(&fx.types);
    registry.add::<Structure>(Pattern::Exact(fx.leaf), 50, Failing);
    let mut tree = Tree::new(fx.types.clone(), Rc::new(registry), vec![fx.target()]).unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    assert_eq!(
        tree.error(left).unwrap(),
        Some("resolver construction failed: cannot enumerate")
    );
    assert!(tree.children(left).unwrap().is_empty());
    assert_eq!(tree.error(root).unwrap(), None);
    assert_eq!(tree.children(root).unwrap().len(), 2);
    let mut out = String::new();
    let drawn = tree.draw_node(left, &mut out).unwrap();
    assert!(drawn.error.is_some());
    tree.end_draw().unwrap();

    let mut registry = ResolverRegistry::with_defaults(&fx.types);
    registry.add::<Structure>(Pattern::Exact(fx.leaf), 50, Exiting);
    let mut tree = Tree::new(fx.types.clone(), Rc::new(registry), vec![fx.target()]).unwrap();
    assert_eq!(tree.begin_draw(), Err(Error::ExitPass));
    assert!(!tree.is_drawing());
    assert_eq!(tree.begin_draw(), Err(Error::ExitPass));
}

struct Outline;

impl Handler for Outline {
    fn present(&self, cx: &mut PresentCx<'_>) -> Result<Outcome, Error> {
        let indent = "  ".repeat(cx.depth);
        let _ = writeln!(cx.out, "{indent}{}", cx.node.definition.name());
        Ok(Outcome::Continue)
    }
}

struct Silence;

impl Handler for Silence {
    fn can_handle(&self, node: &NodeView<'_>) -> bool {
        node.attribute("quiet").is_some()
    }

    fn present(&self, _: &mut PresentCx<'_>) -> Result<Outcome, Error> {
        Ok(Outcome::Stop)
    }
}

#[test]
fn draw_all_walks_expanded_visible_nodes() {
    let mut types = TypeTable::new();
    let b = *types.builtins();
    let leaf = types
        .define(TypeDef::class("Leaf").field("v", b.int))
        .unwrap();
    let pair = types
        .define(
            TypeDef::class("Pair")
                .field("left", leaf)
                .field_with(
                    "right",
                    leaf,
                    arbor_match::Visibility::Public,
                    true,
                    vec![Attribute::flag("quiet")],
                ),
        )
        .unwrap();
    let mut registry = ResolverRegistry::with_defaults(&types);
    registry.add_handler(Pattern::Any, 10, Silence);
    registry.add_handler(Pattern::Any, 0, Outline);
    let target = Value::object(
        pair,
        vec![
            Value::object(leaf, vec![Value::Int(1)]),
            Value::object(leaf, vec![Value::Int(2)]),
        ],
    );
    let mut tree = Tree::builder(Rc::new(types), Rc::new(registry))
        .config(TreeConfig::default().draw_collapsed(false))
        .build(vec![target])
        .unwrap();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    let right = child(&mut tree, root, "right");
    tree.set_expanded(left, true).unwrap();

    let mut out = String::new();
    assert_eq!(tree.draw_all(&mut out).unwrap(), 4);
    assert_eq!(out, "$ROOT$\n  left\n    v\n");
    assert!(!tree.state(right).unwrap().contains(NodeState::ENABLED));
    assert_eq!(
        tree.attributes(right).unwrap().unwrap().source("quiet"),
        Some(AttributeSource::Member)
    );
    tree.end_draw().unwrap();

    let mut state = tree.state(left).unwrap();
    state.remove(NodeState::VISIBLE);
    tree.set_state(left, state).unwrap();
    let mut out = String::new();
    assert_eq!(tree.draw_all(&mut out).unwrap(), 2);
}

#[test]
fn disposal_releases_every_resolver() {
    let fx = fixture();
    let mut tree = fx.tree();
    tree.begin_draw().unwrap();
    let root = tree.root();
    let left = child(&mut tree, root, "left");
    tree.set_expanded(left, true).unwrap();
    tree.end_draw().unwrap();
    tree.begin_draw().unwrap();
    tree.end_draw().unwrap();
    assert!(tree.resolver_stats().live() > 0);

    tree.dispose().unwrap();
    assert_eq!(tree.resolver_stats().live(), 0);
    assert_eq!(tree.children(root), Err(Error::TreeDisposed));
    assert_eq!(tree.end_draw(), Err(Error::TreeDisposed));
    assert_eq!(tree.dispose(), Err(Error::TreeDisposed));
    assert_eq!(tree.begin_batch(), Err(Error::TreeDisposed));
}
