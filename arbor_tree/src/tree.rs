// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The tree: node storage, the update token, the dirty set, and the draw pass.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;

use arbor_bus::{Deferral, DeferredQueue, EventBus, MoveEvent};
use arbor_match::TypeTable;
use hashbrown::HashSet;
use smallvec::SmallVec;
use tracing::{debug, error, trace, warn};

use crate::access::MethodTable;
use crate::arena::Arena;
use crate::definition::Definition;
use crate::entry::{Applied, Change, ValueEntry};
use crate::error::{AccessError, Error};
use crate::node::{Node, NodeId, NodeState, NodeStats, Phase};
use crate::persist::{Persistence, StateKey, StateStore};
use crate::resolve::{
    AttributeSet, Attributes, HandlerChain, Handling, NodeView, PostProcessing, PresentCx,
    ProcessCx, ProcessorChain, ResolverRegistry, ResolverStats, Structure,
};
use crate::value::Value;

/// Work deferred to a later point of the draw cycle.
pub(crate) enum Command {
    Refresh(NodeId),
    Move {
        node: NodeId,
        parent: NodeId,
        index: usize,
    },
    Remove(NodeId),
    Callback(Box<dyn FnOnce(&mut Tree) -> Result<(), Error>>),
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Refresh(id) => f.debug_tuple("Refresh").field(id).finish(),
            Self::Move {
                node,
                parent,
                index,
            } => f
                .debug_struct("Move")
                .field("node", node)
                .field("parent", parent)
                .field("index", index)
                .finish(),
            Self::Remove(id) => f.debug_tuple("Remove").field(id).finish(),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Tunables for a [`Tree`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TreeConfig {
    max_apply_iterations: usize,
    update_collapsed: bool,
    draw_collapsed: bool,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            max_apply_iterations: 64,
            update_collapsed: false,
            draw_collapsed: false,
        }
    }
}

impl TreeConfig {
    /// Cap on rounds of the apply loop in [`Tree::end_draw`]. Writes still pending when
    /// the cap is hit stay queued for the next pass.
    pub fn max_apply_iterations(mut self, n: usize) -> Self {
        self.max_apply_iterations = n.max(1);
        self
    }

    /// Whether [`Tree::begin_draw`] also updates children of collapsed nodes.
    pub fn update_collapsed(mut self, yes: bool) -> Self {
        self.update_collapsed = yes;
        self
    }

    /// Whether [`Tree::draw_all`] descends into collapsed nodes.
    pub fn draw_collapsed(mut self, yes: bool) -> Self {
        self.draw_collapsed = yes;
        self
    }

    /// Current iteration cap.
    pub fn apply_iteration_cap(&self) -> usize {
        self.max_apply_iterations
    }

    /// Returns `true` if collapsed nodes are updated.
    pub fn updates_collapsed(&self) -> bool {
        self.update_collapsed
    }

    /// Returns `true` if collapsed nodes are drawn.
    pub fn draws_collapsed(&self) -> bool {
        self.draw_collapsed
    }
}

/// What [`Tree::end_draw`] did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PassReport {
    /// Token of the pass.
    pub token: u64,
    /// Entry applications that changed at least one target.
    pub applied: usize,
    /// Rounds of the apply loop.
    pub iterations: usize,
    /// Writes that failed, by node and target. Those targets were left unchanged.
    pub failures: Vec<(NodeId, usize, Error)>,
}

/// What [`Tree::draw_node`] did.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DrawOutcome {
    /// Handlers in the node's chain.
    pub handlers: usize,
    /// Index of the handler that stopped the chain.
    pub stopped: Option<usize>,
    /// Node-local error: a resolver failure, or the handler error of this draw.
    pub error: Option<String>,
}

/// Builder for a [`Tree`].
pub struct TreeBuilder {
    types: Rc<TypeTable>,
    registry: Rc<ResolverRegistry>,
    methods: Rc<MethodTable>,
    config: TreeConfig,
    persistence: Option<Box<dyn Persistence>>,
    state_store: Option<Rc<RefCell<dyn StateStore>>>,
}

impl fmt::Debug for TreeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeBuilder")
            .field("config", &self.config)
            .field("persistence", &self.persistence.is_some())
            .field("state_store", &self.state_store.is_some())
            .finish_non_exhaustive()
    }
}

impl TreeBuilder {
    /// Set the configuration.
    pub fn config(mut self, config: TreeConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the host persistence collaborator.
    pub fn persistence(mut self, persistence: impl Persistence + 'static) -> Self {
        self.persistence = Some(Box::new(persistence));
        self
    }

    /// Set the store persisted UI flags are loaded from and saved to.
    pub fn state_store(mut self, store: Rc<RefCell<dyn StateStore>>) -> Self {
        self.state_store = Some(store);
        self
    }

    /// Set the method implementations used by [`Tree::invoke`].
    pub fn methods(mut self, methods: Rc<MethodTable>) -> Self {
        self.methods = methods;
        self
    }

    /// Build a tree over `targets`.
    ///
    /// Targets must be non-empty, non-null, and share one runtime type, which becomes the
    /// root's declared type.
    pub fn build(self, targets: Vec<Value>) -> Result<Tree, Error> {
        let b = self.types.builtins();
        let first = targets.first().ok_or(Error::InvalidTargets("no targets"))?;
        let ty = first
            .runtime_ty(b)
            .ok_or(Error::InvalidTargets("null target"))?;
        if targets.iter().any(|t| t.runtime_ty(b) != Some(ty)) {
            return Err(Error::InvalidTargets("targets differ in type"));
        }
        let definition = Definition::root(ty);
        let entry = ValueEntry::new(&definition, &self.types, targets.len());
        let mut arena = Arena::default();
        let root = arena.insert(|generation| {
            Node::new(
                generation,
                definition,
                None,
                Some(entry),
                NodeState::default() | NodeState::EXPANDED,
            )
        });
        let mut tree = Tree {
            root_type: self.types.name(ty).into(),
            types: self.types,
            registry: self.registry,
            methods: self.methods,
            config: self.config,
            arena,
            root,
            targets,
            token: 0,
            dirty: Vec::new(),
            bus: EventBus::new(),
            deferred: DeferredQueue::new(),
            persistence: self.persistence,
            state_store: self.state_store,
            drawing: false,
            disposed: false,
        };
        tree.load_state(root);
        Ok(tree)
    }
}

/// A live property tree over one or more targets of the same type.
///
/// The host drives passes: [`Tree::begin_draw`], any number of [`Tree::draw_node`] calls,
/// then [`Tree::end_draw`]. Queries between passes update only the node they touch.
pub struct Tree {
    types: Rc<TypeTable>,
    registry: Rc<ResolverRegistry>,
    methods: Rc<MethodTable>,
    config: TreeConfig,
    arena: Arena,
    root: NodeId,
    root_type: Rc<str>,
    targets: Vec<Value>,
    token: u64,
    /// Nodes with queued writes, in the order they were first queued.
    dirty: Vec<NodeId>,
    bus: EventBus<NodeId>,
    deferred: DeferredQueue<Command>,
    persistence: Option<Box<dyn Persistence>>,
    state_store: Option<Rc<RefCell<dyn StateStore>>>,
    drawing: bool,
    disposed: bool,
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("root", &self.root)
            .field("root_type", &self.root_type)
            .field("targets", &self.targets.len())
            .field("nodes", &self.arena.len())
            .field("token", &self.token)
            .field("dirty", &self.dirty)
            .field("drawing", &self.drawing)
            .field("disposed", &self.disposed)
            .finish_non_exhaustive()
    }
}

impl Tree {
    /// Start building a tree.
    pub fn builder(types: Rc<TypeTable>, registry: Rc<ResolverRegistry>) -> TreeBuilder {
        TreeBuilder {
            types,
            registry,
            methods: Rc::new(MethodTable::new()),
            config: TreeConfig::default(),
            persistence: None,
            state_store: None,
        }
    }

    /// Build a tree with default settings.
    pub fn new(
        types: Rc<TypeTable>,
        registry: Rc<ResolverRegistry>,
        targets: Vec<Value>,
    ) -> Result<Self, Error> {
        Self::builder(types, registry).build(targets)
    }

    // --- pass ---

    /// Start a pass.
    ///
    /// Runs commands queued for the next stable pass, bumps the token, and updates the root
    /// and, through expanded nodes, the visible subtree.
    pub fn begin_draw(&mut self) -> Result<(), Error> {
        self.check()?;
        self.drain(Deferral::NextStablePass)?;
        self.token += 1;
        self.drawing = true;
        self.bus.begin_batch();
        if let Err(e) = self.update_node(self.root, false, true) {
            self.drawing = false;
            self.bus.end_batch(&mut self.arena)?;
            return Err(e);
        }
        Ok(())
    }

    /// Finish a pass.
    ///
    /// Applies queued writes until no node is dirty, notifies persistence once per changed
    /// target, runs commands queued for the end of the pass, and flushes move events.
    pub fn end_draw(&mut self) -> Result<PassReport, Error> {
        self.check()?;
        let mut report = PassReport {
            token: self.token,
            ..PassReport::default()
        };
        let applied = self.apply_dirty(&mut report);
        let was_drawing = core::mem::replace(&mut self.drawing, false);
        let drained = match applied {
            Ok(()) => self.drain(Deferral::EndOfPass),
            Err(e) => Err(e),
        };
        if was_drawing {
            self.bus.end_batch(&mut self.arena)?;
        }
        drained?;
        debug!(
            token = report.token,
            applied = report.applied,
            iterations = report.iterations,
            failures = report.failures.len(),
            "pass finished"
        );
        Ok(report)
    }

    /// Apply queued writes until nothing is dirty.
    ///
    /// On the pass-exit signal the interrupted node, if it still has writes queued, and the
    /// nodes not reached yet stay dirty for the next pass.
    fn apply_dirty(&mut self, report: &mut PassReport) -> Result<(), Error> {
        let mut changed: SmallVec<[usize; 4]> = SmallVec::new();
        let mut exited = false;
        'passes: while !self.dirty.is_empty() {
            if report.iterations == self.config.max_apply_iterations {
                warn!(
                    pending = self.dirty.len(),
                    "apply loop hit its iteration cap"
                );
                break;
            }
            report.iterations += 1;
            let mut batch = core::mem::take(&mut self.dirty).into_iter();
            while let Some(id) = batch.next() {
                let Some(entry) = self.arena.get_mut(id).and_then(|n| n.entry.as_mut()) else {
                    continue;
                };
                let Applied {
                    changed_targets,
                    owner_writes,
                    failures,
                    exited: stopped,
                } = entry.apply_changes();
                let still_pending = entry.has_pending();
                for (target, e) in failures {
                    error!(node = ?id, target, error = %e, "write failed");
                    report.failures.push((id, target, e));
                }
                if !changed_targets.is_empty() {
                    report.applied += 1;
                    for t in changed_targets {
                        if !changed.contains(&t) {
                            changed.push(t);
                        }
                    }
                }
                for (target, replacement) in owner_writes {
                    self.write_owner(id, target, replacement);
                }
                if stopped {
                    let mut requeue: Vec<NodeId> =
                        still_pending.then_some(id).into_iter().chain(batch).collect();
                    for d in core::mem::take(&mut self.dirty) {
                        if !requeue.contains(&d) {
                            requeue.push(d);
                        }
                    }
                    self.dirty = requeue;
                    exited = true;
                    break 'passes;
                }
            }
        }
        if let Some(persistence) = self.persistence.as_mut() {
            changed.sort_unstable();
            for t in changed {
                if let Some(target) = self.targets.get(t) {
                    persistence.mark_dirty(target);
                }
            }
        }
        if exited {
            return Err(Error::ExitPass);
        }
        Ok(())
    }

    /// Hand a replacement owner to whoever stores it: the nearest value-bearing logical
    /// ancestor, or the tree targets.
    fn write_owner(&mut self, id: NodeId, target: usize, value: Value) {
        let mut cur = self.arena.get(id).and_then(|n| n.logical_parent);
        while let Some(p) = cur {
            let Some(node) = self.arena.get_mut(p) else {
                break;
            };
            if let Some(entry) = node.entry.as_mut() {
                entry.enqueue_owner_write(target, value);
                self.mark_dirty(p);
                return;
            }
            cur = node.logical_parent;
        }
        if let Some(slot) = self.targets.get_mut(target) {
            *slot = value;
        }
    }

    fn drain(&mut self, when: Deferral) -> Result<(), Error> {
        let mut pending = self.deferred.take(when).into_iter();
        while let Some(command) = pending.next() {
            match self.run_command(command) {
                Ok(()) => {}
                Err(Error::ExitPass) => {
                    for rest in pending {
                        self.deferred.push(when, rest);
                    }
                    return Err(Error::ExitPass);
                }
                Err(e) => warn!(error = %e, "deferred command failed"),
            }
        }
        Ok(())
    }

    fn run_command(&mut self, command: Command) -> Result<(), Error> {
        match command {
            Command::Refresh(id) => {
                let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
                node.refresh_requested = true;
                Ok(())
            }
            Command::Move {
                node,
                parent,
                index,
            } => self.move_now(node, parent, index),
            Command::Remove(id) => self.remove_now(id),
            Command::Callback(f) => f(self),
        }
    }

    fn defer(&mut self, when: Deferral, command: Command) -> Result<(), Error> {
        if self.drawing || when == Deferral::NextStablePass {
            self.deferred.push(when, command);
            Ok(())
        } else {
            self.run_command(command)
        }
    }

    // --- update ---

    fn update_node(&mut self, id: NodeId, force: bool, cascade: bool) -> Result<(), Error> {
        self.update_self(id, force)?;
        if !cascade {
            return Ok(());
        }
        let node = self.live(id)?;
        let descend = id == self.root
            || node.state.contains(NodeState::EXPANDED)
            || self.config.update_collapsed;
        if descend {
            for child in node.runtime.clone() {
                if self.presented_by(id, child)
                    && self
                        .arena
                        .get(child)
                        .is_some_and(|c| c.state.contains(NodeState::VISIBLE))
                {
                    self.update_node(child, false, true)?;
                }
            }
        }
        Ok(())
    }

    /// Bring one node up to date with the current token.
    fn update_self(&mut self, id: NodeId, force: bool) -> Result<(), Error> {
        let token = self.token;
        let node = self.live(id)?;
        if !force
            && node.last_token == token
            && node.phase == Phase::Refreshed
            && !node.refresh_requested
        {
            return Ok(());
        }
        let mut needs = force || node.phase != Phase::Refreshed || node.refresh_requested;
        if node.entry.is_some() {
            let owners = self.owners_of(id);
            let types = Rc::clone(&self.types);
            let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
            if let Some(entry) = node.entry.as_mut() {
                let observed = entry.update(owners, &types);
                if observed.rewrapped {
                    node.stats.rewraps += 1;
                    needs = true;
                    trace!(
                        node = ?id,
                        runtime = types.name(entry.runtime_type()),
                        "value entry rewrapped"
                    );
                }
                if observed.shape != node.shape {
                    node.shape = observed.shape;
                    needs = true;
                }
            }
        }
        self.arena.get_mut(id).ok_or(Error::Disposed(id))?.last_token = token;
        if needs {
            self.refresh(id)?;
        }
        Ok(())
    }

    /// Values the node's accessor reads from: those of the nearest value-bearing logical
    /// ancestor, or the tree targets for the root.
    fn owners_of(&self, id: NodeId) -> Vec<Value> {
        let mut cur = self.arena.get(id).and_then(|n| n.logical_parent);
        while let Some(p) = cur {
            let Some(node) = self.arena.get(p) else {
                break;
            };
            if let Some(entry) = &node.entry {
                return entry.values().to_vec();
            }
            cur = node.logical_parent;
        }
        self.targets.clone()
    }

    fn refresh(&mut self, id: NodeId) -> Result<(), Error> {
        let result = self.rebuild(id);
        if let Some(node) = self.arena.get_mut(id) {
            if result.is_ok() {
                node.phase = Phase::Refreshed;
                node.stats.refreshes += 1;
            } else {
                node.phase = Phase::Stale;
            }
        }
        result
    }

    fn rebuild(&mut self, id: NodeId) -> Result<(), Error> {
        let registry = Rc::clone(&self.registry);
        {
            let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
            node.phase = Phase::Refreshing;
            node.refresh_requested = false;
            node.error = None;
            node.attributes = None;
            node.handlers = HandlerChain::default();
            node.processors = ProcessorChain::default();
            registry.release(core::mem::take(&mut node.resolvers));
        }
        let mut resolvers = 0;
        let mut failure = None;

        let structure = registry
            .factory::<Structure>(&self.types)
            .create(&self.view(id)?);
        match structure {
            Ok(defs) => {
                resolvers += usize::from(defs.is_some());
                self.reconcile(id, defs.unwrap_or_default())?;
            }
            Err(e) => keep_local(id, &mut failure, e.into())?,
        }

        let attributes = registry
            .factory::<Attributes>(&self.types)
            .create(&self.view(id)?);
        match attributes {
            Ok(set) => {
                resolvers += usize::from(set.is_some());
                self.arena.get_mut(id).ok_or(Error::Disposed(id))?.attributes = set;
            }
            Err(e) => keep_local(id, &mut failure, e.into())?,
        }

        let handlers = registry
            .factory::<Handling>(&self.types)
            .create_all(&self.view(id)?);
        match handlers {
            Ok(handlers) => {
                resolvers += handlers.len();
                self.arena.get_mut(id).ok_or(Error::Disposed(id))?.handlers =
                    HandlerChain::new(handlers);
            }
            Err(e) => keep_local(id, &mut failure, e.into())?,
        }

        let processors = registry
            .factory::<PostProcessing>(&self.types)
            .create_all(&self.view(id)?);
        match processors {
            Ok(processors) => {
                resolvers += processors.len();
                let chain = ProcessorChain::new(processors);
                let mut state = self.live(id)?.state;
                let ran = chain.run(&mut ProcessCx {
                    node: self.view(id)?,
                    state: &mut state,
                });
                let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
                node.processors = chain;
                match ran {
                    Ok(()) => node.state = state,
                    Err(e) => keep_local(id, &mut failure, e)?,
                }
            }
            Err(e) => keep_local(id, &mut failure, e.into())?,
        }

        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        node.resolvers = resolvers;
        node.error = failure;
        trace!(
            node = ?id,
            name = node.definition.name(),
            children = node.runtime.len(),
            resolvers,
            "refreshed"
        );
        Ok(())
    }

    /// Rebuild the structural children of `id` from `defs` and merge them into its runtime
    /// children.
    ///
    /// Children whose definition is still produced are kept; the rest are destroyed. Nodes
    /// injected or moved in at runtime stay after the structural child they followed, and
    /// structural children removed at runtime stay absent.
    fn reconcile(&mut self, id: NodeId, defs: Vec<Definition>) -> Result<(), Error> {
        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        let old = core::mem::take(&mut node.structural);
        let mut pool: Vec<Option<NodeId>> = old
            .into_iter()
            .filter(|c| self.arena.is_alive(*c))
            .map(Some)
            .collect();
        let mut slots: Vec<Result<NodeId, Definition>> = Vec::with_capacity(defs.len());
        for def in defs {
            let found = pool.iter().position(|c| {
                c.is_some_and(|c| self.arena.get(c).is_some_and(|n| n.definition == def))
            });
            match found.and_then(|i| pool[i].take()) {
                Some(c) => slots.push(Ok(c)),
                None => slots.push(Err(def)),
            }
        }
        for vanished in pool.into_iter().flatten() {
            self.destroy(vanished);
        }

        let mut structural = Vec::with_capacity(slots.len());
        let mut fresh = HashSet::new();
        for slot in slots {
            let child = match slot {
                Ok(c) => c,
                Err(def) => {
                    let c = self.materialize(id, def);
                    fresh.insert(c);
                    c
                }
            };
            structural.push(child);
        }

        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        let old_runtime = core::mem::take(&mut node.runtime);
        let kept: HashSet<NodeId> = structural.iter().copied().collect();
        let mut runtime = Vec::with_capacity(old_runtime.len().max(structural.len()));
        let mut segments: Vec<(NodeId, Vec<NodeId>)> = Vec::new();
        for c in old_runtime {
            if !self.arena.is_alive(c) {
                continue;
            }
            if kept.contains(&c) {
                segments.push((c, Vec::new()));
            } else if let Some((_, followers)) = segments.last_mut() {
                followers.push(c);
            } else {
                runtime.push(c);
            }
        }
        for c in &structural {
            if fresh.contains(c) {
                runtime.push(*c);
            } else if let Some((_, followers)) = segments.iter_mut().find(|(s, _)| s == c) {
                runtime.push(*c);
                runtime.append(followers);
            }
        }

        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        node.structural = structural;
        node.runtime = runtime;
        self.arena.invalidate_from(id, 0);
        Ok(())
    }

    fn materialize(&mut self, parent: NodeId, definition: Definition) -> NodeId {
        let entry = definition
            .is_value_bearing()
            .then(|| ValueEntry::new(&definition, &self.types, self.targets.len()));
        let id = self.arena.insert(|generation| {
            Node::new(
                generation,
                definition,
                Some(parent),
                entry,
                NodeState::default(),
            )
        });
        self.load_state(id);
        id
    }

    /// Free `id` and everything below it, unlinking it from its presenting parent and its
    /// logical parent.
    fn destroy(&mut self, id: NodeId) {
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let Some(node) = self.arena.get(cur) else {
                continue;
            };
            let (parent, logical) = (node.parent, node.logical_parent);
            let presented: Vec<NodeId> = node
                .runtime
                .iter()
                .copied()
                .filter(|c| self.presented_by(cur, *c))
                .collect();
            if let Some(p) = parent {
                self.arena.remove_runtime(p, cur);
            }
            if let Some(p) = self.effective_parent(cur)
                && Some(p) != parent
            {
                self.arena.remove_runtime(p, cur);
            }
            if let Some(l) = logical.and_then(|l| self.arena.get_mut(l)) {
                l.structural.retain(|c| *c != cur);
            }
            let Some(node) = self.arena.free(cur) else {
                continue;
            };
            self.registry.release(node.resolvers);
            self.dirty.retain(|d| *d != cur);
            stack.extend(node.structural);
            stack.extend(presented);
        }
    }

    fn load_state(&mut self, id: NodeId) {
        let Some(store) = self.state_store.clone() else {
            return;
        };
        let Some(path) = self.arena.path(id) else {
            return;
        };
        let store = store.borrow();
        let Some(node) = self.arena.get_mut(id) else {
            return;
        };
        for (flag, bit) in NodeState::NAMES {
            let key = StateKey {
                root_type: self.root_type.clone(),
                path: path.clone(),
                flag,
            };
            if let Some(on) = store.get(&key) {
                node.state.set(bit, on);
            }
        }
    }

    fn mark_dirty(&mut self, id: NodeId) {
        if !self.dirty.contains(&id) {
            self.dirty.push(id);
        }
    }

    fn check(&self) -> Result<(), Error> {
        if self.disposed {
            Err(Error::TreeDisposed)
        } else {
            Ok(())
        }
    }

    fn live(&self, id: NodeId) -> Result<&Node, Error> {
        self.check()?;
        self.arena.get(id).ok_or(Error::Disposed(id))
    }

    fn view(&self, id: NodeId) -> Result<NodeView<'_>, Error> {
        let node = self.live(id)?;
        Ok(NodeView {
            id,
            definition: &node.definition,
            entry: node.entry.as_ref(),
            attributes: node.attributes.as_ref(),
            state: node.state,
            types: &self.types,
        })
    }

    /// Update `id` alone, as every query does.
    fn touch(&mut self, id: NodeId) -> Result<(), Error> {
        self.update_node(id, false, false)
    }

    fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut cur = self.arena.get(id).and_then(|n| n.parent);
        while let Some(p) = cur {
            depth += 1;
            cur = self.arena.get(p).and_then(|n| n.parent);
        }
        depth
    }

    // --- queries ---

    /// The root node.
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Current update token.
    pub fn token(&self) -> u64 {
        self.token
    }

    /// Returns `true` between [`Tree::begin_draw`] and [`Tree::end_draw`].
    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    /// Returns `true` once [`Tree::dispose`] ran.
    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Returns `true` if `id` refers to a live node.
    pub fn is_alive(&self, id: NodeId) -> bool {
        !self.disposed && self.arena.is_alive(id)
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.arena.len()
    }

    /// Returns `true` if the tree holds no nodes, which is only the case once disposed.
    pub fn is_empty(&self) -> bool {
        self.arena.len() == 0
    }

    /// The tree targets.
    pub fn targets(&self) -> &[Value] {
        &self.targets
    }

    /// The type table.
    pub fn types(&self) -> &TypeTable {
        &self.types
    }

    /// The resolver registry.
    pub fn registry(&self) -> &ResolverRegistry {
        &self.registry
    }

    /// Resolver counters of the registry.
    pub fn resolver_stats(&self) -> ResolverStats {
        self.registry.stats()
    }

    /// The configuration.
    pub fn config(&self) -> TreeConfig {
        self.config
    }

    /// Runtime children: those presented under `id`, in order.
    pub fn children(&mut self, id: NodeId) -> Result<&[NodeId], Error> {
        self.touch(id)?;
        Ok(self.live(id)?.runtime.as_slice())
    }

    /// Structural children: those produced by `id`'s structure resolver, in order.
    pub fn structural_children(&mut self, id: NodeId) -> Result<&[NodeId], Error> {
        self.touch(id)?;
        Ok(self.live(id)?.structural.as_slice())
    }

    /// Runtime child at `index`.
    pub fn child_at(&mut self, id: NodeId, index: usize) -> Result<Option<NodeId>, Error> {
        Ok(self.children(id)?.get(index).copied())
    }

    /// Runtime child named `name`.
    pub fn child_by_name(&mut self, id: NodeId, name: &str) -> Result<Option<NodeId>, Error> {
        self.touch(id)?;
        let node = self.live(id)?;
        Ok(node.runtime.iter().copied().find(|c| {
            self.arena
                .get(*c)
                .is_some_and(|n| n.definition.name() == name)
        }))
    }

    /// Path of `id`: `$ROOT$/name/...` along presenting parents.
    pub fn path(&self, id: NodeId) -> Result<Rc<str>, Error> {
        self.live(id)?;
        self.arena.path(id).ok_or(Error::Disposed(id))
    }

    /// Definition of `id`.
    pub fn definition(&self, id: NodeId) -> Result<&Definition, Error> {
        Ok(&self.live(id)?.definition)
    }

    /// Value entry of `id`, `None` for nodes without a value.
    pub fn value_entry(&mut self, id: NodeId) -> Result<Option<&ValueEntry>, Error> {
        self.touch(id)?;
        Ok(self.live(id)?.entry.as_ref())
    }

    /// Node currently presenting `id`.
    pub fn parent(&self, id: NodeId) -> Result<Option<NodeId>, Error> {
        Ok(self.live(id)?.parent)
    }

    /// Node whose structure produced `id`.
    pub fn logical_parent(&self, id: NodeId) -> Result<Option<NodeId>, Error> {
        Ok(self.live(id)?.logical_parent)
    }

    /// Refresh lifecycle phase of `id`.
    pub fn phase(&self, id: NodeId) -> Result<Phase, Error> {
        Ok(self.live(id)?.phase)
    }

    /// UI flags of `id`.
    pub fn state(&self, id: NodeId) -> Result<NodeState, Error> {
        Ok(self.live(id)?.state)
    }

    /// Replace the UI flags of `id`, saving changed flags to the state store.
    pub fn set_state(&mut self, id: NodeId, state: NodeState) -> Result<(), Error> {
        let path = self.path(id)?;
        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        let changed = node.state ^ state;
        node.state = state;
        if let Some(store) = &self.state_store {
            let mut store = store.borrow_mut();
            for (flag, bit) in NodeState::NAMES {
                if changed.contains(bit) {
                    let key = StateKey {
                        root_type: self.root_type.clone(),
                        path: path.clone(),
                        flag,
                    };
                    store.set(key, state.contains(bit));
                }
            }
        }
        Ok(())
    }

    /// Expand or collapse `id`.
    pub fn set_expanded(&mut self, id: NodeId, expanded: bool) -> Result<(), Error> {
        let mut state = self.state(id)?;
        state.set(NodeState::EXPANDED, expanded);
        self.set_state(id, state)
    }

    /// Node-local error of the last refresh.
    pub fn error(&self, id: NodeId) -> Result<Option<&str>, Error> {
        Ok(self.live(id)?.error.as_deref())
    }

    /// Effective attributes of `id`.
    pub fn attributes(&mut self, id: NodeId) -> Result<Option<&AttributeSet>, Error> {
        self.touch(id)?;
        Ok(self.live(id)?.attributes.as_ref())
    }

    /// Refresh and rewrap counters of `id`.
    pub fn node_stats(&self, id: NodeId) -> Result<NodeStats, Error> {
        Ok(self.live(id)?.stats)
    }

    // --- writes ---

    fn entry_mut(&mut self, id: NodeId) -> Result<&mut ValueEntry, Error> {
        self.check()?;
        self.arena
            .get_mut(id)
            .ok_or(Error::Disposed(id))?
            .entry
            .as_mut()
            .ok_or(Error::Access(AccessError::NotWritable))
    }

    /// Queue a write of `value` to every target of `id`, checked against the runtime type.
    pub fn set_value(&mut self, id: NodeId, value: Value) -> Result<(), Error> {
        self.touch(id)?;
        let types = Rc::clone(&self.types);
        self.entry_mut(id)?.enqueue_set(value, &types)?;
        self.mark_dirty(id);
        Ok(())
    }

    /// Queue a write of `value` to every target of `id`, checked against the declared type.
    pub fn set_declared_value(&mut self, id: NodeId, value: Value) -> Result<(), Error> {
        self.touch(id)?;
        let types = Rc::clone(&self.types);
        self.entry_mut(id)?.base_mut().enqueue_set(value, &types)?;
        self.mark_dirty(id);
        Ok(())
    }

    /// Queue a mutator that runs once per target of `id` when the pass ends.
    pub fn enqueue_change(
        &mut self,
        id: NodeId,
        mutator: impl FnMut(usize, &Value) -> Result<Change, Error> + 'static,
    ) -> Result<(), Error> {
        self.touch(id)?;
        self.entry_mut(id)?.enqueue_change(Box::new(mutator))?;
        self.mark_dirty(id);
        Ok(())
    }

    /// Nodes with queued writes.
    pub fn dirty(&self) -> &[NodeId] {
        &self.dirty
    }

    // --- structure ---

    /// Present a new node built from `definition` under `parent` at `index` (clamped).
    ///
    /// The node reads its value through `parent` and survives refreshes of `parent`.
    pub fn inject_child(
        &mut self,
        parent: NodeId,
        definition: Definition,
        index: usize,
    ) -> Result<NodeId, Error> {
        self.live(parent)?;
        let id = self.materialize(parent, definition);
        self.arena.insert_runtime(parent, id, index);
        Ok(id)
    }

    /// Present `node` under `parent` at `index` (clamped).
    ///
    /// Deferred to the next stable pass while drawing. Inside a batch the previous parent
    /// keeps listing the node until the batch ends.
    pub fn move_child(&mut self, node: NodeId, parent: NodeId, index: usize) -> Result<(), Error> {
        self.live(node)?;
        self.live(parent)?;
        if self.drawing {
            self.deferred.push(
                Deferral::NextStablePass,
                Command::Move {
                    node,
                    parent,
                    index,
                },
            );
            return Ok(());
        }
        self.move_now(node, parent, index)
    }

    fn move_now(&mut self, node: NodeId, parent: NodeId, index: usize) -> Result<(), Error> {
        self.live(parent)?;
        let settled = self.live(node)?.parent;
        let from = self.effective_parent(node);
        if node == self.root || self.presents(node, parent) {
            return Err(Error::InvalidMove);
        }
        // Drop the listing made by a queued move, or the current one when reordering.
        if let Some(f) = from
            && (f == parent || from != settled)
        {
            self.arena.remove_runtime(f, node);
        }
        // Back under the parent that still lists it until the batch ends.
        if settled == Some(parent) && from != settled {
            self.arena.remove_runtime(parent, node);
        }
        self.arena.insert_runtime(parent, node, index);
        self.bus
            .publish(MoveEvent::new(node, settled, Some(parent)), &mut self.arena);
        Ok(())
    }

    /// Parent `id` presents under once queued move events are delivered.
    fn effective_parent(&self, id: NodeId) -> Option<NodeId> {
        match self.bus.queued(id) {
            Some(event) => event.to,
            None => self.arena.get(id).and_then(|n| n.parent),
        }
    }

    /// Returns `true` if `ancestor` is `id` or presents it once queued moves are delivered.
    fn presents(&self, ancestor: NodeId, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            if c == ancestor {
                return true;
            }
            cur = self.effective_parent(c);
        }
        false
    }

    /// Returns `true` if `child` presents under `parent` once queued moves are delivered.
    fn presented_by(&self, parent: NodeId, child: NodeId) -> bool {
        self.effective_parent(child) == Some(parent)
    }

    /// Stop presenting `node`.
    ///
    /// Injected nodes are destroyed. Structural children are only detached, and stay absent
    /// until their definition stops being produced. Deferred to the next stable pass while
    /// drawing.
    pub fn remove_child(&mut self, node: NodeId) -> Result<(), Error> {
        self.live(node)?;
        if self.drawing {
            self.deferred
                .push(Deferral::NextStablePass, Command::Remove(node));
            return Ok(());
        }
        self.remove_now(node)
    }

    fn remove_now(&mut self, id: NodeId) -> Result<(), Error> {
        if id == self.root {
            return Err(Error::InvalidMove);
        }
        let node = self.live(id)?;
        let settled = node.parent;
        let structural = node
            .logical_parent
            .and_then(|l| self.arena.get(l))
            .is_some_and(|l| l.structural.contains(&id));
        if let Some(f) = self.effective_parent(id)
            && Some(f) != settled
        {
            self.arena.remove_runtime(f, id);
        }
        self.bus
            .publish(MoveEvent::new(id, settled, None), &mut self.arena);
        if !structural {
            self.destroy(id);
        }
        Ok(())
    }

    /// Enter a move-event batch.
    pub fn begin_batch(&mut self) -> Result<(), Error> {
        self.check()?;
        self.bus.begin_batch();
        Ok(())
    }

    /// Leave a move-event batch. Returns the number of events delivered.
    pub fn end_batch(&mut self) -> Result<usize, Error> {
        self.check()?;
        Ok(self.bus.end_batch(&mut self.arena)?)
    }

    // --- deferred work ---

    /// Refresh `id` on its next update. While drawing, the request takes effect after the
    /// pass.
    pub fn request_refresh(&mut self, id: NodeId) -> Result<(), Error> {
        self.live(id)?;
        self.defer(Deferral::EndOfPass, Command::Refresh(id))
    }

    /// Run `f` at the end of the current pass, or now when no pass is running.
    pub fn request(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), Error> + 'static,
    ) -> Result<(), Error> {
        self.check()?;
        self.defer(Deferral::EndOfPass, Command::Callback(Box::new(f)))
    }

    /// Run `f` when the next pass begins, before anything is updated.
    pub fn request_until_next_stable_pass(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<(), Error> + 'static,
    ) -> Result<(), Error> {
        self.check()?;
        self.defer(Deferral::NextStablePass, Command::Callback(Box::new(f)))
    }

    /// Commands waiting for `when`.
    pub fn pending(&self, when: Deferral) -> usize {
        self.deferred.len(when)
    }

    // --- drawing ---

    /// Run the handler chain of `id`, writing to `out`.
    ///
    /// Handler failures are node-local and reported in the outcome.
    pub fn draw_node(
        &mut self,
        id: NodeId,
        out: &mut dyn fmt::Write,
    ) -> Result<DrawOutcome, Error> {
        self.touch(id)?;
        let depth = self.depth(id);
        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        let mut chain = core::mem::take(&mut node.handlers);
        let (result, requests) = {
            let mut cx = PresentCx::new(self.view(id)?, depth, out);
            let result = chain.run(&mut cx);
            (result, cx.requests)
        };
        let node = self.arena.get_mut(id).ok_or(Error::Disposed(id))?;
        node.handlers = chain;
        let mut outcome = DrawOutcome {
            handlers: node.handlers.len(),
            stopped: None,
            error: node.error.clone(),
        };
        for (when, command) in requests {
            self.defer(when, command)?;
        }
        match result {
            Ok(stopped) => outcome.stopped = stopped,
            Err(Error::ExitPass) => return Err(Error::ExitPass),
            Err(e) => {
                warn!(node = ?id, error = %e, "handler failed");
                outcome.error = Some(e.to_string());
            }
        }
        Ok(outcome)
    }

    /// Draw the visible subtree depth first. Returns the number of nodes drawn.
    pub fn draw_all(&mut self, out: &mut dyn fmt::Write) -> Result<usize, Error> {
        let mut stack = vec![self.root];
        let mut drawn = 0;
        while let Some(id) = stack.pop() {
            self.draw_node(id, &mut *out)?;
            drawn += 1;
            let node = self.live(id)?;
            if id == self.root
                || node.state.contains(NodeState::EXPANDED)
                || self.config.draw_collapsed
            {
                stack.extend(node.runtime.iter().rev().copied().filter(|c| {
                    self.presented_by(id, *c)
                        && self
                            .arena
                            .get(*c)
                            .is_some_and(|n| n.state.contains(NodeState::VISIBLE))
                }));
            }
        }
        Ok(drawn)
    }

    // --- methods and host ---

    /// Call the method `id` represents on every target, with the values held by its
    /// parameter children. Returns one result per target.
    pub fn invoke(&mut self, id: NodeId) -> Result<Vec<Value>, Error> {
        self.touch(id)?;
        let node = self.live(id)?;
        let name = String::from(node.definition.method_name().ok_or(Error::NotAMethod)?);
        let params = node.structural.clone();
        for p in &params {
            self.touch(*p)?;
        }
        let owners = self.owners_of(id);
        let mut results = Vec::with_capacity(owners.len());
        for (target, owner) in owners.iter().enumerate() {
            let ty = owner
                .runtime_ty(self.types.builtins())
                .ok_or(AccessError::NullOwner)?;
            let method = self
                .methods
                .lookup(&self.types, ty, &name)
                .ok_or_else(|| Error::MissingMethod(name.clone()))?;
            let args: Vec<Value> = params
                .iter()
                .map(|p| {
                    self.arena
                        .get(*p)
                        .and_then(|n| n.entry.as_ref())
                        .and_then(|e| e.get(target))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect();
            results.push(method(owner, &args)?);
        }
        Ok(results)
    }

    /// Ask the persistence collaborator for the external handle at `id`'s path.
    pub fn find_external(&self, id: NodeId) -> Result<Option<Value>, Error> {
        let path = self.path(id)?;
        Ok(self
            .persistence
            .as_ref()
            .and_then(|p| p.find_by_path(&path)))
    }

    // --- disposal ---

    /// Destroy `id` and everything below it. Disposing the root disposes the tree.
    pub fn dispose_node(&mut self, id: NodeId) -> Result<(), Error> {
        self.live(id)?;
        if id == self.root {
            self.dispose()?;
        } else {
            self.destroy(id);
        }
        Ok(())
    }

    /// Destroy every node and drop queued work. Later calls, including a second `dispose`,
    /// fail with [`Error::TreeDisposed`].
    pub fn dispose(&mut self) -> Result<(), Error> {
        self.check()?;
        self.destroy(self.root);
        self.deferred.clear();
        self.dirty.clear();
        self.drawing = false;
        self.disposed = true;
        debug!(root_type = %self.root_type, "tree disposed");
        Ok(())
    }
}

fn keep_local(id: NodeId, slot: &mut Option<String>, e: Error) -> Result<(), Error> {
    if e.is_exit() {
        return Err(e);
    }
    warn!(node = ?id, error = %e, "resolver failed");
    slot.get_or_insert_with(|| e.to_string());
    Ok(())
}
