// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Resolver selection: per-kind candidate tables and the factories that instantiate them.
//!
//! There are four resolver kinds, each a marker type implementing [`ResolverKind`]:
//!
//! - [`Structure`]: the ordered child [`Definition`]s of a node.
//! - [`Attributes`]: the effective [`AttributeSet`] of a node.
//! - [`Handling`]: one [`Handler`]; every accepted handler joins the node's [`HandlerChain`].
//! - [`PostProcessing`]: one [`Processor`]; every accepted processor joins the node's
//!   [`ProcessorChain`].
//!
//! A [`ResolverFactory`] asks its kind's [`TypeMatcher`] for candidates against the node's
//! runtime type (declared type for nodes without a value), walks them best first, and
//! instantiates the first provider whose [`Provider::can_resolve`] accepts the node.
//! No match is not an error.

mod attributes;
mod chain;
mod structure;

pub use attributes::{AttributeSet, AttributeSource, MemberAttributes};
pub use chain::{
    Handler, HandlerChain, Outcome, PresentCx, ProcessCx, Processor, ProcessorChain,
    ReadOnlyDisables,
};
pub use structure::{
    CollectionItems, GROUP, GroupMembers, HIDDEN, MapEntries, MethodParameters, ObjectMembers,
};

use alloc::rc::Rc;
use alloc::vec::Vec;
use core::cell::Cell;
use core::fmt;
use core::marker::PhantomData;

use arbor_match::{Attribute, Bindings, Candidate, Pattern, Ty, TypeMatcher, TypeTable};

use crate::definition::Definition;
use crate::entry::ValueEntry;
use crate::error::ResolverError;
use crate::node::{NodeId, NodeState};
use crate::value::Value;

/// Read-only view of a node handed to providers, handlers, and processors.
#[derive(Clone, Copy, Debug)]
pub struct NodeView<'a> {
    /// The node.
    pub id: NodeId,
    /// Its definition.
    pub definition: &'a Definition,
    /// Its value entry, for value-bearing nodes.
    pub entry: Option<&'a ValueEntry>,
    /// Its resolved attributes, once the attribute resolver ran.
    pub attributes: Option<&'a AttributeSet>,
    /// Its UI flags.
    pub state: NodeState,
    /// The type table.
    pub types: &'a TypeTable,
}

impl<'a> NodeView<'a> {
    /// Type resolvers are matched against: the entry's runtime type, else the declared type.
    pub fn match_ty(&self) -> Ty {
        self.entry
            .map_or(self.definition.declared_type(), ValueEntry::runtime_type)
    }

    /// Observed values, one per target. Empty for nodes without a value.
    pub fn values(&self) -> &'a [Value] {
        self.entry.map(ValueEntry::values).unwrap_or_default()
    }

    /// Effective attribute by name, falling back to the definition's own attributes.
    pub fn attribute(&self, name: &str) -> Option<&'a Attribute> {
        match self.attributes {
            Some(set) => set.get(name),
            None => self.definition.attribute(name),
        }
    }
}

/// Builds one resolver of kind `K` for a node.
pub trait Provider<K: ResolverKind> {
    /// Runtime check beyond the type shape. Defaults to accepting every node.
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        let _ = node;
        true
    }

    /// Instantiate the resolver. `bindings` holds the type arguments bound by the match.
    fn create(&self, node: &NodeView<'_>, bindings: &Bindings) -> Result<K::Output, ResolverError>;
}

/// A resolver kind with its own candidate table.
pub trait ResolverKind: Sized + 'static {
    /// What a provider of this kind produces.
    type Output;

    /// Name used in logs.
    const NAME: &'static str;

    /// The kind's candidate table.
    fn matcher(registry: &ResolverRegistry) -> &TypeMatcher<Rc<dyn Provider<Self>>>;

    /// The kind's candidate table, mutably.
    fn matcher_mut(registry: &mut ResolverRegistry) -> &mut TypeMatcher<Rc<dyn Provider<Self>>>;
}

/// Child enumeration.
#[derive(Copy, Clone, Debug)]
pub struct Structure;

/// Attribute discovery.
#[derive(Copy, Clone, Debug)]
pub struct Attributes;

/// Presentation handlers.
#[derive(Copy, Clone, Debug)]
pub struct Handling;

/// Side-effect-only processors run once per refresh.
#[derive(Copy, Clone, Debug)]
pub struct PostProcessing;

impl ResolverKind for Structure {
    type Output = Vec<Definition>;
    const NAME: &'static str = "structure";

    fn matcher(registry: &ResolverRegistry) -> &TypeMatcher<Rc<dyn Provider<Self>>> {
        &registry.structure
    }

    fn matcher_mut(registry: &mut ResolverRegistry) -> &mut TypeMatcher<Rc<dyn Provider<Self>>> {
        &mut registry.structure
    }
}

impl ResolverKind for Attributes {
    type Output = AttributeSet;
    const NAME: &'static str = "attributes";

    fn matcher(registry: &ResolverRegistry) -> &TypeMatcher<Rc<dyn Provider<Self>>> {
        &registry.attributes
    }

    fn matcher_mut(registry: &mut ResolverRegistry) -> &mut TypeMatcher<Rc<dyn Provider<Self>>> {
        &mut registry.attributes
    }
}

impl ResolverKind for Handling {
    type Output = Rc<dyn Handler>;
    const NAME: &'static str = "handling";

    fn matcher(registry: &ResolverRegistry) -> &TypeMatcher<Rc<dyn Provider<Self>>> {
        &registry.handling
    }

    fn matcher_mut(registry: &mut ResolverRegistry) -> &mut TypeMatcher<Rc<dyn Provider<Self>>> {
        &mut registry.handling
    }
}

impl ResolverKind for PostProcessing {
    type Output = Rc<dyn Processor>;
    const NAME: &'static str = "post-processing";

    fn matcher(registry: &ResolverRegistry) -> &TypeMatcher<Rc<dyn Provider<Self>>> {
        &registry.post_processing
    }

    fn matcher_mut(registry: &mut ResolverRegistry) -> &mut TypeMatcher<Rc<dyn Provider<Self>>> {
        &mut registry.post_processing
    }
}

struct HandlerProvider(Rc<dyn Handler>);

impl Provider<Handling> for HandlerProvider {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        self.0.can_handle(node)
    }

    fn create(&self, _: &NodeView<'_>, _: &Bindings) -> Result<Rc<dyn Handler>, ResolverError> {
        Ok(self.0.clone())
    }
}

struct ProcessorProvider(Rc<dyn Processor>);

impl Provider<PostProcessing> for ProcessorProvider {
    fn can_resolve(&self, node: &NodeView<'_>) -> bool {
        self.0.can_process(node)
    }

    fn create(&self, _: &NodeView<'_>, _: &Bindings) -> Result<Rc<dyn Processor>, ResolverError> {
        Ok(self.0.clone())
    }
}

/// Counts of resolvers handed out and returned.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct ResolverStats {
    /// Resolvers instantiated.
    pub created: usize,
    /// Resolvers released by refreshing or disposed nodes.
    pub released: usize,
}

impl ResolverStats {
    /// Resolvers currently held by nodes.
    pub fn live(&self) -> usize {
        self.created - self.released
    }
}

/// Candidate tables for all four resolver kinds.
///
/// ## Example
///
/// ```rust
/// use core::fmt::Write as _;
///
/// use arbor_match::{Pattern, TypeTable};
/// use arbor_tree::resolve::{Handler, Outcome, PresentCx, ResolverRegistry};
/// use arbor_tree::Error;
///
/// struct Label;
///
/// impl Handler for Label {
///     fn present(&self, cx: &mut PresentCx<'_>) -> Result<Outcome, Error> {
///         let _ = writeln!(cx.out, "{}", cx.node.definition.name());
///         Ok(Outcome::Continue)
///     }
/// }
///
/// let types = TypeTable::new();
/// let mut registry = ResolverRegistry::with_defaults(&types);
/// registry.add_handler(Pattern::Any, 0, Label);
/// ```
pub struct ResolverRegistry {
    structure: TypeMatcher<Rc<dyn Provider<Structure>>>,
    attributes: TypeMatcher<Rc<dyn Provider<Attributes>>>,
    handling: TypeMatcher<Rc<dyn Provider<Handling>>>,
    post_processing: TypeMatcher<Rc<dyn Provider<PostProcessing>>>,
    created: Cell<usize>,
    released: Cell<usize>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("structure", &self.structure.len())
            .field("attributes", &self.attributes.len())
            .field("handling", &self.handling.len())
            .field("post_processing", &self.post_processing.len())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Default for ResolverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverRegistry {
    /// An empty registry: every node resolves to no children, attributes, or handlers.
    pub fn new() -> Self {
        Self {
            structure: TypeMatcher::new(),
            attributes: TypeMatcher::new(),
            handling: TypeMatcher::new(),
            post_processing: TypeMatcher::new(),
            created: Cell::new(0),
            released: Cell::new(0),
        }
    }

    /// A registry with the builtin resolvers installed.
    ///
    /// | kind            | shape         | priority | provider             |
    /// |-----------------|---------------|----------|----------------------|
    /// | structure       | `object`      | 0        | [`ObjectMembers`]    |
    /// | structure       | `IList<T>`    | 10       | [`CollectionItems`]  |
    /// | structure       | `Map<V>`      | 10       | [`MapEntries`]       |
    /// | structure       | any           | 100      | [`MethodParameters`] |
    /// | structure       | any           | 100      | [`GroupMembers`]     |
    /// | attributes      | any           | 0        | [`MemberAttributes`] |
    /// | post-processing | any           | 0        | [`ReadOnlyDisables`] |
    pub fn with_defaults(types: &TypeTable) -> Self {
        let b = types.builtins();
        let mut registry = Self::new();
        registry.add::<Structure>(Pattern::Exact(b.object), 0, ObjectMembers);
        registry.add::<Structure>(
            Pattern::generic(b.ilist, [Pattern::Param(0)]),
            10,
            CollectionItems,
        );
        registry.add::<Structure>(Pattern::generic(b.map, [Pattern::Param(0)]), 10, MapEntries);
        registry.add::<Structure>(Pattern::Any, 100, MethodParameters);
        registry.add::<Structure>(Pattern::Any, 100, GroupMembers);
        registry.add::<Attributes>(Pattern::Any, 0, MemberAttributes);
        registry.add_processor(Pattern::Any, 0, ReadOnlyDisables);
        registry
    }

    /// Append a provider of kind `K` for `shape`. Returns its registration index.
    pub fn add<K: ResolverKind>(
        &mut self,
        shape: Pattern,
        priority: i32,
        provider: impl Provider<K> + 'static,
    ) -> usize {
        let provider: Rc<dyn Provider<K>> = Rc::new(provider);
        self.add_candidate(Candidate::new(provider, shape).priority(priority))
    }

    /// Append a fully specified candidate of kind `K`.
    pub fn add_candidate<K: ResolverKind>(
        &mut self,
        candidate: Candidate<Rc<dyn Provider<K>>>,
    ) -> usize {
        K::matcher_mut(self).push(candidate)
    }

    /// Replace every candidate of kind `K`.
    pub fn register<K: ResolverKind>(
        &mut self,
        candidates: impl IntoIterator<Item = Candidate<Rc<dyn Provider<K>>>>,
    ) {
        K::matcher_mut(self).register(candidates);
    }

    /// Append a presentation handler for `shape`.
    pub fn add_handler(
        &mut self,
        shape: Pattern,
        priority: i32,
        handler: impl Handler + 'static,
    ) -> usize {
        self.add::<Handling>(shape, priority, HandlerProvider(Rc::new(handler)))
    }

    /// Append a post-processor for `shape`.
    pub fn add_processor(
        &mut self,
        shape: Pattern,
        priority: i32,
        processor: impl Processor + 'static,
    ) -> usize {
        self.add::<PostProcessing>(shape, priority, ProcessorProvider(Rc::new(processor)))
    }

    /// Factory for resolvers of kind `K`.
    pub fn factory<'a, K: ResolverKind>(&'a self, types: &'a TypeTable) -> ResolverFactory<'a, K> {
        ResolverFactory {
            registry: self,
            types,
            kind: PhantomData,
        }
    }

    /// Return `count` resolvers previously handed out.
    pub fn release(&self, count: usize) {
        self.released.set(self.released.get() + count);
    }

    /// Counters of created and released resolvers.
    pub fn stats(&self) -> ResolverStats {
        ResolverStats {
            created: self.created.get(),
            released: self.released.get(),
        }
    }
}

/// Instantiates resolvers of one kind for nodes.
pub struct ResolverFactory<'a, K: ResolverKind> {
    registry: &'a ResolverRegistry,
    types: &'a TypeTable,
    kind: PhantomData<K>,
}

impl<K: ResolverKind> fmt::Debug for ResolverFactory<'_, K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverFactory")
            .field("kind", &K::NAME)
            .field("candidates", &K::matcher(self.registry).len())
            .finish_non_exhaustive()
    }
}

impl<K: ResolverKind> ResolverFactory<'_, K> {
    /// The best resolver for `node`, or `None` if no candidate accepts it.
    pub fn create(&self, node: &NodeView<'_>) -> Result<Option<K::Output>, ResolverError> {
        let matcher = K::matcher(self.registry);
        for result in matcher.match_type(self.types, node.match_ty()).iter() {
            let provider = matcher.candidate(result);
            if provider.can_resolve(node) {
                let resolver = provider.create(node, &result.bindings)?;
                self.registry.created.set(self.registry.created.get() + 1);
                return Ok(Some(resolver));
            }
        }
        Ok(None)
    }

    /// Every accepting resolver for `node`, best first.
    pub fn create_all(&self, node: &NodeView<'_>) -> Result<Vec<K::Output>, ResolverError> {
        let matcher = K::matcher(self.registry);
        let mut out = Vec::new();
        for result in matcher.match_type(self.types, node.match_ty()).iter() {
            let provider = matcher.candidate(result);
            if provider.can_resolve(node) {
                out.push(provider.create(node, &result.bindings)?);
            }
        }
        self.registry
            .created
            .set(self.registry.created.get() + out.len());
        Ok(out)
    }
}
