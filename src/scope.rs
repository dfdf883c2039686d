use std::fmt::Write;
use std::ops::BitOr;

use indexmap::IndexMap;
use tracing::trace;

use crate::error::ProblemKind;
use crate::lex::{FileId, Kind, Loc};
use crate::symbols::Symbol;
use crate::types::{Arg, Bindings, Type, TypeId, Types};

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct ScopeId(pub u32);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, PartialOrd, Ord)]
pub struct DeclId(pub u32);

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ScopeKind { Global, Namespace, Class, Enum, Function, Block, Template }

/// The source range a scope covers, for positional queries.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Extent { pub file: FileId, pub start: usize, pub end: usize }

pub struct Scope<'i> {
    pub kind: ScopeKind,
    pub parent: Option<ScopeId>,
    pub owner: Option<DeclId>,
    pub extent: Option<Extent>,
    bindings: IndexMap<Symbol<'i, Kind>, Vec<DeclId>>,
    directives: Vec<ScopeId>,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum DeclKind {
    Namespace, NamespaceAlias,
    Class, Struct, Union, Enum, Enumerator,
    Typedef, Variable, Parameter, Field,
    Function, Method, Constructor, Destructor,
    TypeParam, ValueParam,
}

impl DeclKind {
    pub fn is_class(self) -> bool { matches!(self, DeclKind::Class | DeclKind::Struct | DeclKind::Union) }

    pub fn is_function(self) -> bool {
        matches!(self, DeclKind::Function | DeclKind::Method | DeclKind::Constructor | DeclKind::Destructor)
    }

    pub fn is_type(self) -> bool {
        self.is_class() || matches!(self, DeclKind::Enum | DeclKind::Typedef | DeclKind::TypeParam)
    }

    pub fn name(self) -> &'static str {
        match self {
            DeclKind::Namespace => { "namespace" }
            DeclKind::NamespaceAlias => { "namespace alias" }
            DeclKind::Class => { "class" }
            DeclKind::Struct => { "struct" }
            DeclKind::Union => { "union" }
            DeclKind::Enum => { "enum" }
            DeclKind::Enumerator => { "enumerator" }
            DeclKind::Typedef => { "typedef" }
            DeclKind::Variable => { "variable" }
            DeclKind::Parameter => { "parameter" }
            DeclKind::Field => { "field" }
            DeclKind::Function => { "function" }
            DeclKind::Method => { "method" }
            DeclKind::Constructor => { "constructor" }
            DeclKind::Destructor => { "destructor" }
            DeclKind::TypeParam => { "template type parameter" }
            DeclKind::ValueParam => { "template value parameter" }
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Flags(u16);

impl Flags {
    pub const DEFINITION: Flags = Flags(1 << 0);
    pub const FRIEND: Flags = Flags(1 << 1);
    pub const EXTERN: Flags = Flags(1 << 2);
    pub const STATIC: Flags = Flags(1 << 3);
    pub const INLINE: Flags = Flags(1 << 4);
    pub const VIRTUAL: Flags = Flags(1 << 5);
    /// A class whose closing brace has been seen.
    pub const COMPLETE: Flags = Flags(1 << 6);
    pub const EXPLICIT_SPECIALIZATION: Flags = Flags(1 << 7);
    pub const SCOPED: Flags = Flags(1 << 8);
    /// A const-qualified member function.
    pub const CONST: Flags = Flags(1 << 9);
    /// A class with a conversion function.
    pub const CONVERTIBLE: Flags = Flags(1 << 10);

    pub fn contains(self, other: Flags) -> bool { self.0 & other.0 == other.0 }

    pub fn insert(&mut self, other: Flags) { self.0 |= other.0; }
}

impl BitOr for Flags {
    type Output = Flags;
    fn bitor(self, other: Flags) -> Flags { Flags(self.0 | other.0) }
}

#[derive(Clone, PartialEq, Debug)]
pub struct TemplateParam { pub decl: DeclId, pub default: Option<Arg>, pub pack: bool }

#[derive(Clone, Default, PartialEq, Debug)]
pub struct Template {
    pub params: Vec<TemplateParam>,
    /// Partial specializations, in declaration order.
    pub specializations: Vec<DeclId>,
    /// For a partial specialization, the argument pattern it matches.
    pub pattern: Option<Vec<Arg>>,
}

#[derive(Clone, Debug)]
pub struct Decl<'i> {
    pub name: Option<Symbol<'i, Kind>>,
    pub kind: DeclKind,
    pub ty: TypeId,
    pub scope: ScopeId,
    /// The scope this declaration opens, if any.
    pub inner: Option<ScopeId>,
    pub loc: Loc,
    pub flags: Flags,
    /// The previous declaration of the same entity.
    pub prev: Option<DeclId>,
    /// On the first declaration of an entity, its defining declaration.
    pub definition: Option<DeclId>,
    pub(crate) latest: Option<DeclId>,
    pub bases: Vec<TypeId>,
    pub template: Option<Box<Template>>,
    /// For an instantiation or explicit specialization, the template and its arguments.
    pub instance_of: Option<(DeclId, Vec<Arg>)>,
    /// The namespace a namespace alias names.
    pub target: Option<DeclId>,
    pub value: Option<i64>,
    /// The number of trailing parameters with default arguments.
    pub defaults: usize,
}

impl<'i> Decl<'i> {
    pub fn new(kind: DeclKind, name: Option<Symbol<'i, Kind>>, ty: TypeId, scope: ScopeId, loc: Loc) -> Decl<'i> {
        Decl {
            name, kind, ty, scope, loc,
            inner: None,
            flags: Flags::default(),
            prev: None,
            definition: None,
            latest: None,
            bases: Vec::default(),
            template: None,
            instance_of: None,
            target: None,
            value: None,
            defaults: 0,
        }
    }

    pub fn with_flags(mut self, flags: Flags) -> Decl<'i> { self.flags.insert(flags); self }

    pub fn with_inner(mut self, inner: ScopeId) -> Decl<'i> { self.inner = Some(inner); self }

    pub fn is_definition(&self) -> bool { self.flags.contains(Flags::DEFINITION) }
}

/// The result of [`Table::declare`].
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Declared {
    pub id: DeclId,
    /// The entity was declared before; `id` is linked to its earlier declarations.
    pub redeclared: bool,
    pub problem: Option<ProblemKind>,
}

/// A position in the undo journal.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Mark(usize);

enum Undo<'i> {
    Scope,
    Decl,
    Bind { scope: ScopeId, name: Symbol<'i, Kind>, added: bool },
    Directive(ScopeId),
    Restore(DeclId, Box<Decl<'i>>),
    Extent(ScopeId, Option<Extent>),
    Instance,
}

/// Every scope and declaration of a translation unit, addressed by handle.
pub struct Table<'i> {
    pub types: Types,
    scopes: Vec<Scope<'i>>,
    decls: Vec<Decl<'i>>,
    pub(crate) instances: IndexMap<(DeclId, Vec<Arg>), DeclId>,
    journal: Vec<Undo<'i>>,
    speculation: usize,
    pub(crate) instantiating: usize,
}

impl<'i> Default for Table<'i> {
    fn default() -> Table<'i> {
        let mut table = Table {
            types: Types::default(),
            scopes: Vec::default(),
            decls: Vec::default(),
            instances: IndexMap::default(),
            journal: Vec::default(),
            speculation: 0,
            instantiating: 0,
        };
        table.push_scope(ScopeKind::Global, None, None);
        table
    }
}

impl<'i> Table<'i> {
    pub fn scope(&self, id: ScopeId) -> &Scope<'i> { &self.scopes[id.0 as usize] }

    pub fn decl(&self, id: DeclId) -> &Decl<'i> { &self.decls[id.0 as usize] }

    pub fn decls(&self) -> impl Iterator<Item = (DeclId, &Decl<'i>)> {
        self.decls.iter().enumerate().map(|(i, decl)| (DeclId(i as u32), decl))
    }

    pub fn scopes(&self) -> impl Iterator<Item = (ScopeId, &Scope<'i>)> {
        self.scopes.iter().enumerate().map(|(i, scope)| (ScopeId(i as u32), scope))
    }

    /// Mutable access to a declaration. The old value is journaled while speculating.
    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl<'i> {
        if self.speculation > 0 {
            let old = Box::new(self.decls[id.0 as usize].clone());
            self.journal.push(Undo::Restore(id, old));
        }
        &mut self.decls[id.0 as usize]
    }

    fn record(&mut self, undo: Undo<'i>) {
        if self.speculation > 0 { self.journal.push(undo); }
    }

    pub fn push_scope(&mut self, kind: ScopeKind, parent: Option<ScopeId>, owner: Option<DeclId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        let bindings = IndexMap::default();
        let directives = Vec::default();
        self.scopes.push(Scope { kind, parent, owner, extent: None, bindings, directives });
        self.record(Undo::Scope);
        id
    }

    pub fn set_owner(&mut self, scope: ScopeId, owner: DeclId) {
        self.scopes[scope.0 as usize].owner = Some(owner);
    }

    pub fn set_extent(&mut self, scope: ScopeId, extent: Extent) {
        let old = self.scopes[scope.0 as usize].extent.replace(extent);
        self.record(Undo::Extent(scope, old));
    }

    /// Add a declaration without binding its name.
    pub fn add_decl(&mut self, decl: Decl<'i>) -> DeclId {
        let id = DeclId(self.decls.len() as u32);
        self.decls.push(decl);
        self.record(Undo::Decl);
        id
    }

    pub fn bind(&mut self, scope: ScopeId, name: Symbol<'i, Kind>, id: DeclId) {
        trace!(%name, decl = id.0, scope = scope.0, "bind");
        let bindings = &mut self.scopes[scope.0 as usize].bindings;
        let added = !bindings.contains_key(&name);
        bindings.entry(name).or_default().push(id);
        self.record(Undo::Bind { scope, name, added });
    }

    pub fn add_directive(&mut self, scope: ScopeId, nominated: ScopeId) {
        self.scopes[scope.0 as usize].directives.push(nominated);
        self.record(Undo::Directive(scope));
    }

    pub fn mark(&mut self) -> Mark {
        self.speculation += 1;
        Mark(self.journal.len())
    }

    pub fn commit(&mut self, _: Mark) {
        self.speculation -= 1;
        if self.speculation == 0 { self.journal.clear(); }
    }

    pub fn rollback(&mut self, Mark(len): Mark) {
        while self.journal.len() > len {
            let undo = match self.journal.pop() {
                Some(undo) => { undo }
                None => { break; }
            };
            match undo {
                Undo::Scope => { self.scopes.pop(); }
                Undo::Decl => { self.decls.pop(); }
                Undo::Bind { scope, name, added } => {
                    let bindings = &mut self.scopes[scope.0 as usize].bindings;
                    if added {
                        bindings.pop();
                    } else if let Some(ids) = bindings.get_mut(&name) {
                        ids.pop();
                    }
                }
                Undo::Directive(scope) => { self.scopes[scope.0 as usize].directives.pop(); }
                Undo::Restore(id, decl) => { self.decls[id.0 as usize] = *decl; }
                Undo::Extent(scope, extent) => { self.scopes[scope.0 as usize].extent = extent; }
                Undo::Instance => { self.instances.pop(); }
            }
        }
        self.speculation -= 1;
        if self.speculation == 0 { self.journal.clear(); }
    }

    pub(crate) fn record_instance(&mut self, key: (DeclId, Vec<Arg>), instance: DeclId) {
        self.instances.insert(key, instance);
        self.record(Undo::Instance);
    }

    /// Declare `decl` in its scope, linking it to an earlier declaration of the same entity.
    pub fn declare(&mut self, decl: Decl<'i>) -> Declared {
        let name = match decl.name {
            Some(name) => { name }
            None => { return Declared { id: self.add_decl(decl), redeclared: false, problem: None }; }
        };
        let existing = self.scope(decl.scope).bindings.get(&name).cloned().unwrap_or_default();

        let mut earlier = None;
        let mut conflict = false;
        for &old in &existing {
            let old_kind = self.decl(old).kind;
            match (old_kind, decl.kind) {
                (DeclKind::Namespace, DeclKind::Namespace) => {
                    return Declared { id: old, redeclared: true, problem: None };
                }
                (a, b) if a.is_function() && b.is_function() => {
                    if self.same_signature(old, &decl) { earlier = Some(old); break; }
                }
                (a, b) if (a.is_class() || a == DeclKind::Enum) && (b.is_class() || b == DeclKind::Enum) => {
                    earlier = Some(old);
                    break;
                }
                (DeclKind::Variable, DeclKind::Variable) | (DeclKind::Typedef, DeclKind::Typedef) => {
                    if self.decl(old).ty == decl.ty { earlier = Some(old); } else { conflict = true; }
                    break;
                }
                (a, DeclKind::Typedef) if a.is_class() || a == DeclKind::Enum => {
                    // `typedef struct S S;` names the class it shadows.
                    let class = self.canonical(old);
                    match *self.types.get(decl.ty) {
                        Type::Class(named) | Type::Enum(named) if named == class => {}
                        _ => { conflict = true; }
                    }
                }
                (a, b) if a.is_class() || b.is_class() || a == DeclKind::Enum || b == DeclKind::Enum => {}
                (a, b) if a.is_function() != b.is_function() => { conflict = true; }
                (a, b) if !a.is_function() && !b.is_function() => { conflict = true; }
                _ => {}
            }
        }

        let definition = decl.is_definition();
        let id = self.add_decl(decl);
        if conflict {
            trace!(%name, "conflicting declaration");
            return Declared { id, redeclared: false, problem: Some(ProblemKind::Redeclaration) };
        }
        let canonical = match earlier {
            Some(old) => { self.canonical(old) }
            None => {
                self.bind(self.decl(id).scope, name, id);
                if definition { self.decl_mut(id).definition = Some(id); }
                return Declared { id, redeclared: false, problem: None };
            }
        };

        let prev = self.decl(canonical).latest.unwrap_or(canonical);
        self.decl_mut(id).prev = Some(prev);
        let first = self.decl_mut(canonical);
        first.latest = Some(id);
        let mut problem = None;
        if definition {
            match first.definition {
                Some(_) => { problem = Some(ProblemKind::Redefinition); }
                None => { first.definition = Some(id); }
            }
        }
        trace!(%name, decl = id.0, canonical = canonical.0, "redeclaration");
        Declared { id, redeclared: true, problem }
    }

    fn same_signature(&mut self, old: DeclId, new: &Decl<'i>) -> bool {
        let (old_ty, old_template) = {
            let old = self.decl(old);
            (old.ty, old.template.as_ref().map(|template| template.params.clone()))
        };
        let new_template = new.template.as_ref().map(|template| &template.params);

        // Template parameters are positional, so rename the new declaration's to the old one's.
        let mut bindings = Bindings::default();
        match (old_template, new_template) {
            (None, None) => {}
            (Some(old), Some(new)) if old.len() == new.len() => {
                for (old, new) in old.iter().zip(new) {
                    let arg = match self.decl(old.decl).kind {
                        DeclKind::TypeParam => { Arg::Type(self.types.intern(Type::Param(old.decl))) }
                        _ => { Arg::Param(old.decl) }
                    };
                    bindings.insert(new.decl, arg);
                }
            }
            _ => { return false; }
        }
        let new_ty = self.types.substitute(new.ty, &bindings);
        self.parameters(old_ty) == self.parameters(new_ty)
    }

    /// A function type's parameter types, ignoring top-level qualifiers.
    fn parameters(&mut self, ty: TypeId) -> Option<(Vec<TypeId>, bool)> {
        match self.types.get(ty).clone() {
            Type::Function { params, variadic, .. } => {
                let params = params.into_iter().map(|param| self.types.unqualified(param).1).collect();
                Some((params, variadic))
            }
            _ => { None }
        }
    }

    pub fn canonical(&self, mut id: DeclId) -> DeclId {
        while let Some(prev) = self.decl(id).prev { id = prev; }
        id
    }

    /// Every declaration of the entity `id` declares, first to last.
    pub fn redeclarations(&self, id: DeclId) -> Vec<DeclId> {
        let canonical = self.canonical(id);
        let mut chain = Vec::default();
        let mut current = self.decl(canonical).latest;
        while let Some(id) = current {
            chain.push(id);
            current = self.decl(id).prev;
        }
        if chain.last() != Some(&canonical) { chain.push(canonical); }
        chain.reverse();
        chain
    }

    pub fn definition(&self, id: DeclId) -> Option<DeclId> {
        self.decl(self.canonical(id)).definition
    }

    /// The scope holding the members of a class, namespace or enumeration named by `id`.
    pub fn members_scope(&self, id: DeclId) -> Option<ScopeId> {
        let decl = self.decl(id);
        match decl.kind {
            DeclKind::NamespaceAlias => { decl.target.and_then(|target| self.members_scope(target)) }
            DeclKind::Typedef => match *self.types.get(decl.ty) {
                Type::Class(class) | Type::Enum(class) => { self.members_scope(class) }
                _ => { None }
            }
            _ => {
                let defining = self.definition(id).unwrap_or(id);
                self.decl(defining).inner.or(decl.inner)
            }
        }
    }

    /// The type a name denotes when used as a type-name.
    pub fn type_of_name(&mut self, id: DeclId) -> Option<TypeId> {
        let (kind, ty) = (self.decl(id).kind, self.decl(id).ty);
        let canonical = self.canonical(id);
        match kind {
            kind if kind.is_class() => { Some(self.types.intern(Type::Class(canonical))) }
            DeclKind::Enum => { Some(self.types.intern(Type::Enum(canonical))) }
            DeclKind::Typedef => { Some(ty) }
            DeclKind::TypeParam => { Some(self.types.intern(Type::Param(id))) }
            _ => { None }
        }
    }

    /// Names bound directly in `scope`.
    pub fn bindings(&self, scope: ScopeId) -> impl Iterator<Item = (Symbol<'i, Kind>, &[DeclId])> {
        self.scope(scope).bindings.iter().map(|(&name, ids)| (name, &ids[..]))
    }

    pub fn local(&self, scope: ScopeId, name: Symbol<'i, Kind>) -> &[DeclId] {
        self.scope(scope).bindings.get(&name).map_or(&[], |ids| &ids[..])
    }

    /// Unqualified lookup: the innermost scope with any binding for `name` wins.
    pub fn lookup(&self, scope: ScopeId, name: Symbol<'i, Kind>) -> Vec<DeclId> {
        let mut nominated = Vec::default();
        let mut current = Some(scope);
        while let Some(id) = current {
            self.collect_directives(id, id, &mut nominated);

            let mut found = self.local(id, name).to_vec();
            if found.is_empty() && self.scope(id).kind == ScopeKind::Class {
                if let Some(owner) = self.scope(id).owner { found = self.base_lookup(owner, name, 0); }
            }
            for &(namespace, common) in &nominated {
                if common != id { continue; }
                for &decl in self.local(namespace, name) {
                    if !found.contains(&decl) { found.push(decl); }
                }
            }
            if !found.is_empty() { return found; }

            current = self.scope(id).parent;
        }
        Vec::default()
    }

    /// Namespaces nominated by using-directives in `from`, with the scope where their members
    /// become visible to lookups from `user`.
    fn collect_directives(&self, from: ScopeId, user: ScopeId, out: &mut Vec<(ScopeId, ScopeId)>) {
        for &namespace in &self.scope(from).directives {
            if out.iter().any(|&(seen, _)| seen == namespace) { continue; }
            out.push((namespace, self.common_ancestor(user, namespace)));
            self.collect_directives(namespace, user, out);
        }
    }

    pub fn common_ancestor(&self, a: ScopeId, b: ScopeId) -> ScopeId {
        let mut ancestors = Vec::default();
        let mut current = Some(a);
        while let Some(id) = current { ancestors.push(id); current = self.scope(id).parent; }

        let mut current = Some(b);
        while let Some(id) = current {
            if ancestors.contains(&id) { return id; }
            current = self.scope(id).parent;
        }
        ScopeId::GLOBAL
    }

    /// Qualified lookup: only `scope` itself, its base classes, and namespaces it nominates.
    pub fn lookup_in(&self, scope: ScopeId, name: Symbol<'i, Kind>) -> Vec<DeclId> {
        let found = self.local(scope, name).to_vec();
        if !found.is_empty() { return found; }

        match self.scope(scope).kind {
            ScopeKind::Class => {
                self.scope(scope).owner.map_or_else(Vec::default, |owner| self.base_lookup(owner, name, 0))
            }
            ScopeKind::Namespace | ScopeKind::Global => {
                let mut nominated = Vec::default();
                self.collect_directives(scope, scope, &mut nominated);
                let mut found = Vec::default();
                for (namespace, _) in nominated {
                    for &decl in self.local(namespace, name) {
                        if !found.contains(&decl) { found.push(decl); }
                    }
                }
                found
            }
            _ => { Vec::default() }
        }
    }

    /// Member lookup in a class: its own members, then its bases depth-first.
    pub fn member(&self, class: DeclId, name: Symbol<'i, Kind>) -> Vec<DeclId> {
        if let Some(scope) = self.members_scope(class) {
            let found = self.local(scope, name).to_vec();
            if !found.is_empty() { return found; }
        }
        self.base_lookup(class, name, 0)
    }

    fn base_lookup(&self, class: DeclId, name: Symbol<'i, Kind>, depth: usize) -> Vec<DeclId> {
        if depth > 64 { return Vec::default(); }
        let defining = self.definition(class).unwrap_or(class);
        for &base in &self.decl(defining).bases {
            let base = match *self.types.get(base) {
                Type::Class(base) => { base }
                _ => { continue; }
            };
            if let Some(scope) = self.members_scope(base) {
                let found = self.local(scope, name);
                if !found.is_empty() { return found.to_vec(); }
            }
            let found = self.base_lookup(base, name, depth + 1);
            if !found.is_empty() { return found; }
        }
        Vec::default()
    }

    /// Whether `base` is `derived` or one of its (transitive) base classes.
    pub fn is_base_of(&self, base: DeclId, derived: DeclId) -> bool {
        let base = self.canonical(base);
        let mut stack = vec![self.canonical(derived)];
        let mut seen = Vec::default();
        while let Some(class) = stack.pop() {
            if class == base { return true; }
            if seen.contains(&class) { continue; }
            seen.push(class);
            let defining = self.definition(class).unwrap_or(class);
            for &ty in &self.decl(defining).bases {
                if let Type::Class(next) = *self.types.get(ty) { stack.push(self.canonical(next)); }
            }
        }
        false
    }

    /// The innermost scope whose extent contains `offset` in `file`.
    pub fn scope_at(&self, file: FileId, offset: usize) -> ScopeId {
        self.scopes()
            .filter_map(|(id, scope)| scope.extent.map(|extent| (id, extent)))
            .filter(|&(_, extent)| extent.file == file && extent.start <= offset && offset <= extent.end)
            .min_by_key(|&(id, extent)| (extent.end - extent.start, std::cmp::Reverse(id)))
            .map_or(ScopeId::GLOBAL, |(id, _)| id)
    }

    pub fn qualified_name(&self, id: DeclId) -> String {
        let mut parts = Vec::default();
        parts.push(self.simple_name(id));

        let mut scope = Some(self.decl(id).scope);
        while let Some(current) = scope {
            let Scope { kind, owner, parent, .. } = *self.scope(current);
            match (kind, owner) {
                (ScopeKind::Namespace | ScopeKind::Class | ScopeKind::Enum, Some(owner)) => {
                    let named = kind != ScopeKind::Enum || self.decl(owner).flags.contains(Flags::SCOPED);
                    if named { parts.push(self.simple_name(owner)); }
                }
                (ScopeKind::Function, Some(owner)) => { parts.push(self.simple_name(owner)); }
                _ => {}
            }
            scope = parent;
        }

        parts.reverse();
        parts.join("::")
    }

    fn simple_name(&self, id: DeclId) -> String {
        let decl = self.decl(id);
        let mut name = match decl.name {
            Some(name) => { name.as_str().to_owned() }
            None if decl.kind == DeclKind::Namespace => { "(anonymous namespace)".to_owned() }
            None => { format!("(anonymous {})", decl.kind.name()) }
        };
        if let Some((_, ref args)) = decl.instance_of {
            name.push('<');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 { name.push_str(", "); }
                name.push_str(&self.display_arg(arg));
            }
            name.push('>');
        }
        name
    }

    pub fn display_arg(&self, arg: &Arg) -> String {
        match *arg {
            Arg::Type(ty) => { self.display_type(ty) }
            Arg::Value(value) => { value.to_string() }
            Arg::Param(param) => { self.simple_name(param) }
            Arg::Unknown => { "?".to_owned() }
        }
    }

    pub fn display_type(&self, ty: TypeId) -> String {
        let mut out = String::default();
        self.write_type(&mut out, ty);
        out
    }

    fn write_type(&self, out: &mut String, ty: TypeId) {
        match *self.types.get(ty) {
            Type::Unknown => { out.push('?'); }
            Type::Dependent => { out.push_str("<dependent>"); }
            Type::Void => { out.push_str("void"); }
            Type::Builtin(builtin) => { out.push_str(builtin.name()); }
            Type::Qualified(cv, inner) => {
                if cv.const_ { out.push_str("const "); }
                if cv.volatile { out.push_str("volatile "); }
                self.write_type(out, inner);
            }
            Type::Pointer(inner) => { self.write_type(out, inner); out.push_str(" *"); }
            Type::LValueRef(inner) => { self.write_type(out, inner); out.push_str(" &"); }
            Type::RValueRef(inner) => { self.write_type(out, inner); out.push_str(" &&"); }
            Type::Array(inner, len) => {
                self.write_type(out, inner);
                match len {
                    Some(len) => { let _ = write!(out, " [{}]", len); }
                    None => { out.push_str(" []"); }
                }
            }
            Type::Function { ret, ref params, variadic } => {
                self.write_type(out, ret);
                out.push_str(" (");
                for (i, &param) in params.iter().enumerate() {
                    if i > 0 { out.push_str(", "); }
                    self.write_type(out, param);
                }
                if variadic { out.push_str(if params.is_empty() { "..." } else { ", ..." }); }
                out.push(')');
            }
            Type::Class(class) | Type::Enum(class) | Type::Param(class) => {
                out.push_str(&self.qualified_name(class));
            }
            Type::Specialization(template, ref args) => {
                out.push_str(&self.qualified_name(template));
                out.push('<');
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 { out.push_str(", "); }
                    out.push_str(&self.display_arg(arg));
                }
                out.push('>');
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Decl, DeclKind, Flags, ScopeId, ScopeKind, Table};
    use crate::error::ProblemKind;
    use crate::lex::{Kind, Loc};
    use crate::symbols::SymbolMap;
    use crate::types::{Builtin, TypeId};

    #[test]
    fn hiding() {
        let symbols = SymbolMap::default();
        let x = symbols.intern(b"x", Kind::Identifier);
        let mut table = Table::default();
        let int = table.types.builtin(Builtin::Int);

        let outer = table.declare(Decl::new(DeclKind::Variable, Some(x), int, ScopeId::GLOBAL, Loc::default())).id;
        let block = table.push_scope(ScopeKind::Block, Some(ScopeId::GLOBAL), None);
        let inner = table.declare(Decl::new(DeclKind::Variable, Some(x), int, block, Loc::default())).id;
        let nested = table.push_scope(ScopeKind::Block, Some(block), None);

        assert_eq!(table.lookup(nested, x), [inner]);
        assert_eq!(table.lookup(ScopeId::GLOBAL, x), [outer]);
        assert_ne!(inner, outer);
    }

    #[test]
    fn using_directive() {
        let symbols = SymbolMap::default();
        let n = symbols.intern(b"N", Kind::Identifier);
        let y = symbols.intern(b"y", Kind::Identifier);
        let mut table = Table::default();

        let ns = table.push_scope(ScopeKind::Namespace, Some(ScopeId::GLOBAL), None);
        let decl = table.declare(Decl::new(DeclKind::Namespace, Some(n), TypeId::VOID, ScopeId::GLOBAL, Loc::default()).with_inner(ns)).id;
        table.set_owner(ns, decl);
        let member = table.declare(Decl::new(DeclKind::Variable, Some(y), TypeId::UNKNOWN, ns, Loc::default())).id;

        let function = table.push_scope(ScopeKind::Function, Some(ScopeId::GLOBAL), None);
        assert!(table.lookup(function, y).is_empty());
        table.add_directive(function, ns);
        assert_eq!(table.lookup(function, y), [member]);
        assert_eq!(table.common_ancestor(function, ns), ScopeId::GLOBAL);
        assert!(table.lookup_in(ScopeId::GLOBAL, y).is_empty());
        assert_eq!(table.qualified_name(member), "N::y");
    }

    #[test]
    fn redeclaration() {
        let symbols = SymbolMap::default();
        let f = symbols.intern(b"f", Kind::Identifier);
        let s = symbols.intern(b"S", Kind::Identifier);
        let mut table = Table::default();
        let int = table.types.builtin(Builtin::Int);
        let f_int = table.types.function(TypeId::VOID, vec![int], false);
        let f_void = table.types.function(TypeId::VOID, vec![], false);
        let global = ScopeId::GLOBAL;

        let first = table.declare(Decl::new(DeclKind::Function, Some(f), f_int, global, Loc::default()));
        let definition = Decl::new(DeclKind::Function, Some(f), f_int, global, Loc::default()).with_flags(Flags::DEFINITION);
        let second = table.declare(definition.clone());
        assert!(second.redeclared);
        assert_eq!(table.decl(second.id).prev, Some(first.id));
        assert_eq!(table.definition(first.id), Some(second.id));
        assert_eq!(table.declare(definition).problem, Some(ProblemKind::Redefinition));

        let overload = table.declare(Decl::new(DeclKind::Function, Some(f), f_void, global, Loc::default()));
        assert!(!overload.redeclared);
        assert_eq!(table.lookup(global, f), [first.id, overload.id]);

        table.declare(Decl::new(DeclKind::Struct, Some(s), TypeId::VOID, global, Loc::default()));
        let typedef = table.declare(Decl::new(DeclKind::Typedef, Some(s), int, global, Loc::default()));
        assert_eq!(typedef.problem, Some(ProblemKind::Redeclaration));
    }

    #[test]
    fn rollback() {
        let symbols = SymbolMap::default();
        let x = symbols.intern(b"x", Kind::Identifier);
        let mut table = Table::default();

        let mark = table.mark();
        let scope = table.push_scope(ScopeKind::Block, Some(ScopeId::GLOBAL), None);
        table.declare(Decl::new(DeclKind::Variable, Some(x), TypeId::UNKNOWN, ScopeId::GLOBAL, Loc::default()));
        table.declare(Decl::new(DeclKind::Variable, Some(x), TypeId::UNKNOWN, scope, Loc::default()));
        assert_eq!(table.lookup(ScopeId::GLOBAL, x).len(), 1);
        table.rollback(mark);

        assert!(table.lookup(ScopeId::GLOBAL, x).is_empty());
        assert_eq!(table.scopes().count(), 1);
        assert_eq!(table.decls().count(), 0);
    }
}
