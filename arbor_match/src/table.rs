// Copyright 2025 the Arbor Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! The type table: registration, generic instantiation, and ancestry queries.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;
use hashbrown::HashMap;
use smallvec::SmallVec;

use crate::error::TypeError;
use crate::types::{GenericInfo, Member, MemberKind, Param, Ty, TypeDef, TypeDesc, TypeKind};

/// Handles of the built-in types every table starts with.
#[derive(Copy, Clone, Debug)]
pub struct Builtins {
    /// Root of every type.
    pub object: Ty,
    /// Root of primitives and structs.
    pub value: Ty,
    /// `bool`.
    pub boolean: Ty,
    /// 64-bit signed integer.
    pub int: Ty,
    /// 64-bit float.
    pub float: Ty,
    /// Immutable string.
    pub string: Ty,
    /// Return type of methods that return nothing.
    pub void: Ty,
    /// Open `IList<T>` interface.
    pub ilist: Ty,
    /// Open `List<T>` class, implements `IList<T>`.
    pub list: Ty,
    /// Open string-keyed `Map<V>` class.
    pub map: Ty,
}

/// Shape of a collection type as seen through its ancestry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CollectionKind {
    /// Index-addressed, ordered collection of the element type.
    Ordered(Ty),
    /// Key-addressed, unordered collection of the value type.
    Unordered(Ty),
}

impl CollectionKind {
    /// The element (or value) type.
    pub fn element(self) -> Ty {
        match self {
            Self::Ordered(t) | Self::Unordered(t) => t,
        }
    }
}

/// Registry of type descriptors.
///
/// Rust has no runtime reflection, so everything the tree needs to know about the shape of
/// a value is declared here up front. Handles ([`Ty`]) are cheap to copy and compare.
///
/// ## Example
///
/// ```rust
/// use arbor_match::{TypeDef, TypeTable};
///
/// let mut types = TypeTable::new();
/// let b = *types.builtins();
/// let list_of_int = types.instantiate(b.list, &[b.int]).unwrap();
/// let holder = types
///     .define(
///         TypeDef::class("Holder")
///             .field("IntField", b.int)
///             .field("ListField", list_of_int),
///     )
///     .unwrap();
///
/// assert_eq!(types.name(list_of_int), "List<int>");
/// assert_eq!(types.members(holder).len(), 2);
/// assert!(types.is_assignable(list_of_int, b.object));
/// ```
#[derive(Clone, Debug)]
pub struct TypeTable {
    types: Vec<TypeDesc>,
    by_name: HashMap<String, Ty>,
    instances: HashMap<(Ty, SmallVec<[Ty; 2]>), Ty>,
    arrays: HashMap<Ty, Ty>,
    builtins: Builtins,
}

impl Default for TypeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeTable {
    /// Create a table holding only the built-in types.
    pub fn new() -> Self {
        let placeholder = Ty::new(0);
        let mut table = Self {
            types: Vec::new(),
            by_name: HashMap::new(),
            instances: HashMap::new(),
            arrays: HashMap::new(),
            builtins: Builtins {
                object: placeholder,
                value: placeholder,
                boolean: placeholder,
                int: placeholder,
                float: placeholder,
                string: placeholder,
                void: placeholder,
                ilist: placeholder,
                list: placeholder,
                map: placeholder,
            },
        };
        let object = table.push(TypeDesc {
            name: "object".into(),
            kind: TypeKind::Class,
            base: None,
            interfaces: Vec::new(),
            generic: None,
            members: Vec::new(),
            attributes: Vec::new(),
            field_count: 0,
        });
        table.builtins.object = object;
        let value = table.push_simple("value", TypeKind::Class, Some(object));
        table.builtins.value = value;
        table.builtins.boolean = table.push_simple("bool", TypeKind::Primitive, Some(value));
        table.builtins.int = table.push_simple("int", TypeKind::Primitive, Some(value));
        table.builtins.float = table.push_simple("float", TypeKind::Primitive, Some(value));
        table.builtins.string = table.push_simple("string", TypeKind::Primitive, Some(value));
        table.builtins.void = table.push_simple("void", TypeKind::Primitive, Some(value));

        // Builtin names are unique, so these cannot fail.
        let ilist = table
            .define_generic(&["T"], |_| TypeDef::interface("IList"))
            .unwrap_or(object);
        table.builtins.ilist = ilist;
        let list = table
            .define_generic(&["T"], |_| TypeDef::class("List"))
            .unwrap_or(object);
        if let Some(&param) = table.generic_args(list).first()
            && let Ok(ilist_of_param) = table.instantiate(ilist, &[param])
        {
            table.types[list.idx()].interfaces.push(ilist_of_param);
        }
        table.builtins.list = list;
        let map = table
            .define_generic(&["V"], |_| TypeDef::class("Map"))
            .unwrap_or(object);
        table.builtins.map = map;
        table
    }

    /// Handles of the built-in types.
    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Number of registered types, instances included.
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Returns `true` if nothing is registered. Never the case for a table built with
    /// [`TypeTable::new`].
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn push(&mut self, desc: TypeDesc) -> Ty {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "Ty uses 32-bit indices by design."
        )]
        let ty = Ty::new(self.types.len() as u32);
        if !matches!(desc.kind, TypeKind::Param(_)) {
            self.by_name.entry(desc.name.clone()).or_insert(ty);
        }
        self.types.push(desc);
        ty
    }

    fn push_simple(&mut self, name: &str, kind: TypeKind, base: Option<Ty>) -> Ty {
        self.push(TypeDesc {
            name: name.into(),
            kind,
            base,
            interfaces: Vec::new(),
            generic: None,
            members: Vec::new(),
            attributes: Vec::new(),
            field_count: 0,
        })
    }

    fn check(&self, ty: Ty) -> Result<(), TypeError> {
        if ty.idx() < self.types.len() {
            Ok(())
        } else {
            Err(TypeError::UnknownType(ty.index()))
        }
    }

    /// Register a non-generic type.
    ///
    /// Classes without an explicit base derive from `object`, structs from `value`, and
    /// interfaces have no base. Field slots continue after the base type's slots.
    pub fn define(&mut self, def: TypeDef) -> Result<Ty, TypeError> {
        if self.by_name.contains_key(&def.name) {
            return Err(TypeError::DuplicateName(def.name));
        }
        let base = match (def.base, def.kind) {
            (Some(b), _) => Some(b),
            (None, TypeKind::Struct) => Some(self.builtins.value),
            (None, TypeKind::Interface) => None,
            (None, _) => Some(self.builtins.object),
        };
        if let Some(b) = base {
            self.check(b)?;
        }
        for &i in &def.interfaces {
            self.check(i)?;
        }
        let first_slot = base.map(|b| self.types[b.idx()].field_count).unwrap_or(0);
        let mut members = Vec::with_capacity(def.fields.len() + def.methods.len());
        for (i, f) in def.fields.into_iter().enumerate() {
            self.check(f.ty)?;
            if self.member_in_chain(base, &f.name)
                || members.iter().any(|m: &Member| m.name == f.name)
            {
                return Err(TypeError::DuplicateMember(f.name));
            }
            members.push(Member {
                name: f.name,
                ty: f.ty,
                kind: MemberKind::Field {
                    slot: first_slot + i,
                },
                visibility: f.visibility,
                read_only: f.read_only,
                attributes: f.attributes,
            });
        }
        let field_count = first_slot + members.len();
        for (name, params, returns, attributes) in def.methods {
            self.check(returns)?;
            members.push(Member {
                name,
                ty: returns,
                kind: MemberKind::Method { params },
                visibility: crate::types::Visibility::Public,
                read_only: true,
                attributes,
            });
        }
        Ok(self.push(TypeDesc {
            name: def.name,
            kind: def.kind,
            base,
            interfaces: def.interfaces,
            generic: None,
            members,
            attributes: def.attributes,
            field_count,
        }))
    }

    /// Register an open generic definition.
    ///
    /// `build` receives the parameter handles so fields, bases, and interfaces can refer to
    /// them. The returned handle is the open definition; close it with
    /// [`TypeTable::instantiate`].
    pub fn define_generic(
        &mut self,
        params: &[&str],
        build: impl FnOnce(&[Ty]) -> TypeDef,
    ) -> Result<Ty, TypeError> {
        let mut handles: SmallVec<[Ty; 2]> = SmallVec::new();
        for (i, name) in params.iter().enumerate() {
            #[allow(
                clippy::cast_possible_truncation,
                reason = "Generic arity is tiny."
            )]
            let kind = TypeKind::Param(i as u8);
            handles.push(self.push_simple(name, kind, None));
        }
        let def = build(&handles);
        let ty = self.define(def)?;
        self.types[ty.idx()].generic = Some(GenericInfo {
            origin: ty,
            args: handles,
        });
        Ok(ty)
    }

    /// Close an open generic definition over concrete (or parameter) arguments.
    ///
    /// Instances are memoized, so instantiating twice yields the same handle. Base types,
    /// interfaces, and member types are substituted.
    pub fn instantiate(&mut self, definition: Ty, args: &[Ty]) -> Result<Ty, TypeError> {
        self.check(definition)?;
        for &a in args {
            self.check(a)?;
        }
        let desc = &self.types[definition.idx()];
        let Some(generic) = desc.generic.as_ref().filter(|g| g.origin == definition) else {
            return Err(TypeError::NotGeneric(desc.name.clone()));
        };
        if generic.args.len() != args.len() {
            return Err(TypeError::Arity {
                name: desc.name.clone(),
                expected: generic.args.len(),
                found: args.len(),
            });
        }
        if generic.args.as_slice() == args {
            return Ok(definition);
        }
        let key = (definition, SmallVec::from_slice(args));
        if let Some(&ty) = self.instances.get(&key) {
            return Ok(ty);
        }

        let map: SmallVec<[(Ty, Ty); 2]> = generic
            .args
            .iter()
            .copied()
            .zip(args.iter().copied())
            .collect();
        let template = desc.clone();
        let name = format!(
            "{}<{}>",
            template.name,
            args.iter()
                .map(|a| self.name(*a))
                .collect::<Vec<_>>()
                .join(", ")
        );

        let base = match template.base {
            Some(b) => Some(self.substitute(b, &map)?),
            None => None,
        };
        let mut interfaces = Vec::with_capacity(template.interfaces.len());
        for i in template.interfaces {
            interfaces.push(self.substitute(i, &map)?);
        }
        let mut members = Vec::with_capacity(template.members.len());
        for mut m in template.members {
            m.ty = self.substitute(m.ty, &map)?;
            if let MemberKind::Method { params } = &mut m.kind {
                for p in params.iter_mut() {
                    p.ty = self.substitute(p.ty, &map)?;
                }
            }
            members.push(m);
        }
        let ty = self.push(TypeDesc {
            name,
            kind: template.kind,
            base,
            interfaces,
            generic: Some(GenericInfo {
                origin: definition,
                args: SmallVec::from_slice(args),
            }),
            members,
            attributes: template.attributes,
            field_count: template.field_count,
        });
        self.instances.insert(key, ty);
        Ok(ty)
    }

    /// The array type over `element`, memoized. Arrays implement `IList<element>`.
    pub fn array_of(&mut self, element: Ty) -> Result<Ty, TypeError> {
        self.check(element)?;
        if let Some(&ty) = self.arrays.get(&element) {
            return Ok(ty);
        }
        let ilist = self.instantiate(self.builtins.ilist, &[element])?;
        let ty = self.push(TypeDesc {
            name: format!("{}[]", self.name(element)),
            kind: TypeKind::Array(element),
            base: Some(self.builtins.object),
            interfaces: alloc::vec![ilist],
            generic: None,
            members: Vec::new(),
            attributes: Vec::new(),
            field_count: 0,
        });
        self.arrays.insert(element, ty);
        Ok(ty)
    }

    fn substitute(&mut self, ty: Ty, map: &[(Ty, Ty)]) -> Result<Ty, TypeError> {
        let desc = &self.types[ty.idx()];
        match desc.kind {
            TypeKind::Param(_) => {
                return Ok(map
                    .iter()
                    .find(|(p, _)| *p == ty)
                    .map(|(_, a)| *a)
                    .unwrap_or(ty));
            }
            TypeKind::Array(elem) => {
                let substituted = self.substitute(elem, map)?;
                return if substituted == elem {
                    Ok(ty)
                } else {
                    self.array_of(substituted)
                };
            }
            _ => {}
        }
        let Some(generic) = desc.generic.clone() else {
            return Ok(ty);
        };
        let mut args: SmallVec<[Ty; 2]> = SmallVec::with_capacity(generic.args.len());
        for a in &generic.args {
            args.push(self.substitute(*a, map)?);
        }
        if args == generic.args {
            Ok(ty)
        } else {
            self.instantiate(generic.origin, &args)
        }
    }

    fn member_in_chain(&self, mut cur: Option<Ty>, name: &str) -> bool {
        while let Some(t) = cur {
            let desc = &self.types[t.idx()];
            if desc.members.iter().any(|m| m.name == name) {
                return true;
            }
            cur = desc.base;
        }
        false
    }

    /// Descriptor of a type.
    ///
    /// # Panics
    ///
    /// Panics if `ty` was not produced by this table.
    pub fn get(&self, ty: Ty) -> &TypeDesc {
        &self.types[ty.idx()]
    }

    /// Descriptor of a type, or `None` for a foreign handle.
    pub fn try_get(&self, ty: Ty) -> Option<&TypeDesc> {
        self.types.get(ty.idx())
    }

    /// Display name of a type.
    pub fn name(&self, ty: Ty) -> &str {
        self.try_get(ty).map(|d| d.name.as_str()).unwrap_or("<unknown>")
    }

    /// Look up a type (or a previously created instance such as `List<int>`) by name.
    pub fn by_name(&self, name: &str) -> Option<Ty> {
        self.by_name.get(name).copied()
    }

    /// Returns `true` for value types.
    pub fn is_value_type(&self, ty: Ty) -> bool {
        self.try_get(ty).is_some_and(TypeDesc::is_value_type)
    }

    /// Returns `true` if `ty` is an unbound type parameter.
    pub fn is_param(&self, ty: Ty) -> bool {
        matches!(self.try_get(ty).map(|d| d.kind), Some(TypeKind::Param(_)))
    }

    /// Generic origin of an instance or definition.
    pub fn generic_origin(&self, ty: Ty) -> Option<Ty> {
        self.try_get(ty)?.generic.as_ref().map(|g| g.origin)
    }

    /// Type arguments of a generic instance or definition.
    pub fn generic_args(&self, ty: Ty) -> &[Ty] {
        self.try_get(ty)
            .and_then(|d| d.generic.as_ref())
            .map(|g| g.args.as_slice())
            .unwrap_or(&[])
    }

    /// All members visible on `ty`, inherited members first, in declaration order.
    pub fn members(&self, ty: Ty) -> Vec<&Member> {
        let mut chain = Vec::new();
        let mut cur = Some(ty);
        while let Some(t) = cur {
            let Some(desc) = self.try_get(t) else { break };
            chain.push(desc);
            cur = desc.base;
        }
        chain
            .iter()
            .rev()
            .flat_map(|d| d.members.iter())
            .collect()
    }

    /// Find a member by name on `ty` or its bases.
    pub fn member(&self, ty: Ty, name: &str) -> Option<&Member> {
        let mut cur = Some(ty);
        while let Some(t) = cur {
            let desc = self.try_get(t)?;
            if let Some(m) = desc.members.iter().find(|m| m.name == name) {
                return Some(m);
            }
            cur = desc.base;
        }
        None
    }

    /// Layout slot of a field by name.
    pub fn field_slot(&self, ty: Ty, name: &str) -> Option<usize> {
        self.member(ty, name).and_then(Member::slot)
    }

    /// Parameters of a method member.
    pub fn method_params<'a>(&'a self, ty: Ty, name: &str) -> Option<&'a [Param]> {
        match &self.member(ty, name)?.kind {
            MemberKind::Method { params } => Some(params),
            MemberKind::Field { .. } => None,
        }
    }

    /// `ty` and every base and interface reachable from it, breadth first, with distance.
    ///
    /// The type itself comes first at distance 0. Each type appears once, at its nearest
    /// distance.
    pub fn ancestors(&self, ty: Ty) -> Vec<(Ty, u32)> {
        let mut out: Vec<(Ty, u32)> = Vec::new();
        if self.try_get(ty).is_none() {
            return out;
        }
        out.push((ty, 0));
        let mut cursor = 0;
        while cursor < out.len() {
            let (t, d) = out[cursor];
            cursor += 1;
            let desc = &self.types[t.idx()];
            for next in desc.base.iter().chain(desc.interfaces.iter()) {
                if !out.iter().any(|(seen, _)| seen == next) {
                    out.push((*next, d + 1));
                }
            }
        }
        out
    }

    /// Distance from `from` to the ancestor `to`, if `to` is `from` or one of its ancestors.
    pub fn ancestor_distance(&self, from: Ty, to: Ty) -> Option<u32> {
        self.ancestors(from)
            .into_iter()
            .find(|(t, _)| *t == to)
            .map(|(_, d)| d)
    }

    /// Returns `true` if a value of type `from` can be stored where `to` is expected.
    ///
    /// Unbound parameters are assignable in both directions.
    pub fn is_assignable(&self, from: Ty, to: Ty) -> bool {
        from == to
            || self.is_param(from)
            || self.is_param(to)
            || to == self.builtins.object
            || self.ancestor_distance(from, to).is_some()
    }

    /// Collection shape of `ty`, found through `IList<T>` or `Map<V>` in its ancestry.
    pub fn collection_kind(&self, ty: Ty) -> Option<CollectionKind> {
        for (t, _) in self.ancestors(ty) {
            let Some(origin) = self.generic_origin(t) else {
                continue;
            };
            let args = self.generic_args(t);
            if origin == self.builtins.ilist && origin != t {
                return args.first().map(|a| CollectionKind::Ordered(*a));
            }
            if origin == self.builtins.map && origin != t {
                return args.first().map(|a| CollectionKind::Unordered(*a));
            }
        }
        None
    }
}
