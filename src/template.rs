use tracing::{debug, trace};

use crate::error::{Failure, ProblemKind};
use crate::lex::{Kind, Loc};
use crate::scope::{Decl, DeclId, DeclKind, Flags, ScopeId, ScopeKind, Table, TemplateParam};
use crate::symbols::Symbol;
use crate::types::{Arg, Bindings, Type, TypeId};

/// Instantiations nested deeper than this stay deferred.
const MAX_INSTANTIATION_DEPTH: usize = 32;

impl<'i> Table<'i> {
    pub fn is_template(&self, id: DeclId) -> bool {
        self.redeclarations(id).into_iter().any(|id| self.decl(id).template.is_some())
    }

    /// The parameters of the declaration that defines the template, or of its first declaration.
    pub fn template_params(&self, template: DeclId) -> Vec<TemplateParam> {
        let defining = self.definition(template).unwrap_or_else(|| self.canonical(template));
        let mut params = self.decl(defining).template.as_ref().map(|t| t.params.clone()).unwrap_or_default();

        // Defaults may be given on any declaration.
        for id in self.redeclarations(template) {
            let other = match self.decl(id).template {
                Some(ref template) => { &template.params }
                None => { continue; }
            };
            for (param, other) in params.iter_mut().zip(other) {
                if param.default.is_none() { param.default = other.default.clone(); }
            }
        }
        params
    }

    /// Bind the parameters of every declaration of `template` to `args`, positionally.
    fn bind_params(&self, template: DeclId, args: &[Arg]) -> Bindings {
        let mut bindings = Bindings::default();
        for id in self.redeclarations(template) {
            if let Some(ref template) = self.decl(id).template {
                for (param, arg) in template.params.iter().zip(args) {
                    bindings.insert(param.decl, arg.clone());
                }
            }
        }
        bindings
    }

    /// Fill in default arguments for the parameters `args` leaves out.
    pub fn complete_args(&mut self, template: DeclId, mut args: Vec<Arg>) -> Result<Vec<Arg>, ProblemKind> {
        let params = self.template_params(template);
        let pack = params.last().map_or(false, |param| param.pack);
        if args.len() > params.len() && !pack { return Err(ProblemKind::TemplateArguments); }

        for (param, arg) in params.iter().zip(&args) {
            let fits = match (self.decl(param.decl).kind, arg) {
                (_, &Arg::Type(TypeId::DEPENDENT)) => { true }
                (DeclKind::TypeParam, Arg::Type(_)) => { true }
                (DeclKind::TypeParam, _) => { false }
                (_, Arg::Type(_)) => { false }
                _ => { true }
            };
            if !fits { return Err(ProblemKind::TemplateArguments); }
        }

        while args.len() < params.len() {
            if params[args.len()].pack { break; }
            let default = match params[args.len()].default {
                Some(ref default) => { default.clone() }
                None => { return Err(ProblemKind::TemplateArguments); }
            };
            let bindings = self.bind_params(template, &args);
            let arg = self.types.substitute_arg(&default, &bindings);
            args.push(arg);
        }
        Ok(args)
    }

    fn is_complete(&self, template: DeclId) -> bool {
        self.definition(template).map_or(false, |id| self.decl(id).flags.contains(Flags::COMPLETE))
    }

    /// The type a template-id names. Dependent arguments, or a template still being defined,
    /// yield a deferred specialization that [`Table::resolve_type`] materializes later.
    pub fn specialize(&mut self, template: DeclId, args: Vec<Arg>, loc: Loc) -> Result<TypeId, Failure> {
        let template = self.canonical(template);
        if let Some(&instance) = self.instances.get(&(template, args.clone())) {
            return Ok(self.types.intern(Type::Class(instance)));
        }

        let dependent = args.iter().any(|arg| self.types.is_dependent_arg(arg));
        if dependent || !self.is_complete(template) || self.instantiating >= MAX_INSTANTIATION_DEPTH {
            return Ok(self.types.intern(Type::Specialization(template, args)));
        }

        let instance = self.instantiate(template, args, loc)?;
        Ok(self.types.intern(Type::Class(instance)))
    }

    /// Materialize deferred specializations anywhere inside `ty` whose arguments are now concrete.
    pub fn resolve_type(&mut self, ty: TypeId, loc: Loc) -> Result<TypeId, Failure> {
        let ty = match self.types.get(ty).clone() {
            Type::Specialization(template, args) => { self.specialize(template, args, loc)? }
            Type::Qualified(cv, inner) => {
                let inner = self.resolve_type(inner, loc)?;
                self.types.qualified(cv, inner)
            }
            Type::Pointer(inner) => {
                let inner = self.resolve_type(inner, loc)?;
                self.types.pointer(inner)
            }
            Type::LValueRef(inner) => {
                let inner = self.resolve_type(inner, loc)?;
                self.types.lvalue_ref(inner)
            }
            Type::RValueRef(inner) => {
                let inner = self.resolve_type(inner, loc)?;
                self.types.rvalue_ref(inner)
            }
            Type::Array(inner, len) => {
                let inner = self.resolve_type(inner, loc)?;
                self.types.array(inner, len)
            }
            _ => { ty }
        };
        Ok(ty)
    }

    /// The instance of a class template for complete, concrete arguments. Instances are
    /// memoized: equal arguments give the same declaration.
    pub fn instantiate(&mut self, template: DeclId, args: Vec<Arg>, loc: Loc) -> Result<DeclId, Failure> {
        let template = self.canonical(template);
        let key = (template, args);
        if let Some(&instance) = self.instances.get(&key) {
            trace!(template = template.0, instance = instance.0, "instance memo hit");
            return Ok(instance);
        }
        let (_, args) = key;

        let (source, bindings) = match self.select_specialization(template, &args, loc)? {
            Some((spec, bindings)) => { (self.definition(spec).unwrap_or(spec), bindings) }
            None => {
                let primary = self.definition(template).unwrap_or(template);
                (primary, self.bind_params(template, &args))
            }
        };

        let (kind, name, scope, complete, bases, members) = {
            let source = self.decl(source);
            let members = source.inner.map(|inner| {
                self.bindings(inner)
                    .flat_map(|(name, ids)| ids.iter().map(move |&id| (name, id)))
                    .collect::<Vec<_>>()
            });
            let name = self.decl(template).name;
            let complete = source.flags.contains(Flags::COMPLETE);
            (source.kind, name, self.decl(template).scope, complete, source.bases.clone(), members)
        };

        let mut decl = Decl::new(kind, name, TypeId::VOID, scope, self.decl(source).loc);
        decl.flags.insert(Flags::DEFINITION);
        if complete { decl.flags.insert(Flags::COMPLETE); }
        decl.instance_of = Some((template, args.clone()));
        let instance = self.add_decl(decl);
        self.record_instance((template, args), instance);
        debug!(template = template.0, source = source.0, instance = instance.0, "instantiate");

        let parent = self.decl(source).inner.and_then(|inner| self.scope(inner).parent);
        let inner = self.push_scope(ScopeKind::Class, parent, Some(instance));
        {
            let decl = self.decl_mut(instance);
            decl.inner = Some(inner);
            decl.definition = Some(instance);
        }

        self.instantiating += 1;
        let result = self.instantiate_members(instance, inner, bases, members.unwrap_or_default(), &bindings, loc);
        self.instantiating -= 1;
        result?;

        Ok(instance)
    }

    fn instantiate_members(
        &mut self, instance: DeclId, inner: ScopeId, bases: Vec<TypeId>,
        members: Vec<(Symbol<'i, Kind>, DeclId)>, bindings: &Bindings, loc: Loc,
    ) -> Result<(), Failure> {
        let mut substituted = Vec::with_capacity(bases.len());
        for base in bases {
            let base = self.types.substitute(base, bindings);
            substituted.push(self.resolve_type(base, loc)?);
        }
        self.decl_mut(instance).bases = substituted;

        // Member types are substituted but not resolved, so a member naming its own class
        // template stays a deferred specialization until someone asks for it.
        for (name, member) in members {
            let mut copy = self.decl(member).clone();
            copy.scope = inner;
            copy.ty = self.types.substitute(copy.ty, bindings);
            copy.prev = None;
            copy.latest = None;
            copy.definition = None;
            let id = self.add_decl(copy);
            if self.decl(id).is_definition() { self.decl_mut(id).definition = Some(id); }
            self.bind(inner, name, id);
        }
        Ok(())
    }

    /// The most specialized partial specialization matching `args`, with its deduced bindings.
    fn select_specialization(
        &mut self, template: DeclId, args: &[Arg], loc: Loc,
    ) -> Result<Option<(DeclId, Bindings)>, Failure> {
        let specializations = self.decl(template).template.as_ref()
            .map(|template| template.specializations.clone())
            .unwrap_or_default();

        let mut matches = Vec::default();
        for spec in specializations {
            let (params, pattern) = self.pattern(spec);
            if let Some(bindings) = self.deduce(&params, &pattern, args) {
                matches.push((spec, bindings));
            }
        }
        if matches.len() <= 1 { return Ok(matches.pop()); }

        let best: Vec<usize> = (0..matches.len())
            .filter(|&i| (0..matches.len()).all(|j| i == j || self.more_specialized(matches[i].0, matches[j].0)))
            .collect();
        if let [best] = best[..] {
            debug!(template = template.0, specialization = matches[best].0 .0, "select partial specialization");
            return Ok(Some(matches.swap_remove(best)));
        }

        let arguments = args.iter().map(|arg| self.display_arg(arg)).collect::<Vec<_>>().join(", ");
        let failure = Failure::AmbiguousSpecialization { template: self.qualified_name(template), arguments, loc };
        debug!(%failure, "ambiguous partial specialization");
        Err(failure)
    }

    fn pattern(&self, spec: DeclId) -> (Vec<DeclId>, Vec<Arg>) {
        match self.decl(spec).template {
            Some(ref template) => {
                let params = template.params.iter().map(|param| param.decl).collect();
                (params, template.pattern.clone().unwrap_or_default())
            }
            None => { (Vec::default(), Vec::default()) }
        }
    }

    /// Whether `a` is more specialized than `b`: `b`'s pattern matches everything `a`'s does,
    /// but not the other way around.
    pub fn more_specialized(&self, a: DeclId, b: DeclId) -> bool {
        let (a_params, a_pattern) = self.pattern(a);
        let (b_params, b_pattern) = self.pattern(b);
        self.deduce(&b_params, &b_pattern, &a_pattern).is_some()
            && self.deduce(&a_params, &a_pattern, &b_pattern).is_none()
    }

    /// Match `pattern` against `args`, treating `params` as wildcards that must bind consistently.
    pub fn deduce(&self, params: &[DeclId], pattern: &[Arg], args: &[Arg]) -> Option<Bindings> {
        if pattern.len() != args.len() { return None; }
        let mut bindings = Bindings::default();
        for (pattern, arg) in pattern.iter().zip(args) {
            if !self.match_arg(params, pattern, arg, &mut bindings) { return None; }
        }
        Some(bindings)
    }

    fn match_arg(&self, params: &[DeclId], pattern: &Arg, arg: &Arg, bindings: &mut Bindings) -> bool {
        match (pattern, arg) {
            (&Arg::Param(param), arg) if params.contains(&param) => {
                if let Arg::Type(_) = *arg { return false; }
                bind(bindings, param, arg.clone())
            }
            (&Arg::Type(pattern), &Arg::Type(arg)) => { self.match_type(params, pattern, arg, bindings) }
            (pattern, arg) => { pattern == arg }
        }
    }

    fn match_type(&self, params: &[DeclId], pattern: TypeId, arg: TypeId, bindings: &mut Bindings) -> bool {
        match (self.types.get(pattern), self.types.get(arg)) {
            (&Type::Param(param), _) if params.contains(&param) => { bind(bindings, param, Arg::Type(arg)) }
            (&Type::Pointer(p), &Type::Pointer(a)) |
            (&Type::LValueRef(p), &Type::LValueRef(a)) |
            (&Type::RValueRef(p), &Type::RValueRef(a)) => { self.match_type(params, p, a, bindings) }
            (&Type::Qualified(pcv, p), &Type::Qualified(acv, a)) if pcv == acv => {
                self.match_type(params, p, a, bindings)
            }
            (&Type::Array(p, plen), &Type::Array(a, alen)) if plen == alen => {
                self.match_type(params, p, a, bindings)
            }
            (&Type::Function { ret: pret, params: ref pparams, variadic: pvar },
             &Type::Function { ret: aret, params: ref aparams, variadic: avar }) => {
                pvar == avar && pparams.len() == aparams.len()
                    && self.match_type(params, pret, aret, bindings)
                    && pparams.iter().zip(aparams).all(|(&p, &a)| self.match_type(params, p, a, bindings))
            }
            (&Type::Specialization(ptemplate, ref pargs), &Type::Specialization(atemplate, ref aargs)) => {
                ptemplate == atemplate && self.match_args(params, pargs, aargs, bindings)
            }
            (&Type::Specialization(ptemplate, ref pargs), &Type::Class(class)) => {
                match self.decl(class).instance_of {
                    Some((template, ref aargs)) if template == self.canonical(ptemplate) => {
                        self.match_args(params, pargs, aargs, bindings)
                    }
                    _ => { false }
                }
            }
            _ => { pattern == arg }
        }
    }

    fn match_args(&self, params: &[DeclId], pattern: &[Arg], args: &[Arg], bindings: &mut Bindings) -> bool {
        pattern.len() == args.len()
            && pattern.iter().zip(args).all(|(p, a)| self.match_arg(params, p, a, bindings))
    }

    /// Deduce a function template's arguments from a call. `explicit` arguments bind the leading
    /// parameters; the rest come from argument types or defaults. `None` removes the template
    /// from the candidate set.
    pub fn deduce_call(&mut self, template: DeclId, explicit: &[Arg], arg_types: &[TypeId]) -> Option<Bindings> {
        let params = self.decl(template).template.as_ref()?.params.clone();
        if explicit.len() > params.len() { return None; }
        let fn_params = match *self.types.get(self.decl(template).ty) {
            Type::Function { ref params, .. } => { params.clone() }
            _ => { return None; }
        };

        let mut bindings = Bindings::default();
        for (param, arg) in params.iter().zip(explicit) {
            bindings.insert(param.decl, arg.clone());
        }
        let wildcards: Vec<DeclId> = params.iter()
            .map(|param| param.decl)
            .filter(|param| !bindings.contains_key(param))
            .collect();

        for (&param, &arg) in fn_params.iter().zip(arg_types) {
            if !self.types.is_dependent(param) || !self.types.is_known(arg) { continue; }
            let param = self.types.substitute(param, &bindings);

            let (pattern, arg) = match *self.types.get(param) {
                Type::LValueRef(inner) | Type::RValueRef(inner) => {
                    let (_, pattern) = self.types.unqualified(inner);
                    let (_, arg) = self.types.unqualified(self.types.strip_references(arg));
                    (pattern, arg)
                }
                _ => {
                    let (_, pattern) = self.types.unqualified(param);
                    (pattern, self.types.decay(arg))
                }
            };
            if !self.match_type(&wildcards, pattern, arg, &mut bindings) {
                trace!(template = template.0, "deduction failed");
                return None;
            }
        }

        for param in &params {
            if bindings.contains_key(&param.decl) { continue; }
            if param.pack {
                bindings.insert(param.decl, Arg::Unknown);
                continue;
            }
            let default = param.default.clone()?;
            let arg = self.types.substitute_arg(&default, &bindings);
            bindings.insert(param.decl, arg);
        }
        Some(bindings)
    }

    /// Register a partial specialization of `template`.
    pub fn add_partial_specialization(&mut self, template: DeclId, spec: DeclId) {
        let template = self.canonical(template);
        if let Some(ref mut template) = self.decl_mut(template).template {
            template.specializations.push(spec);
        }
    }

    /// Register an explicit specialization. It takes the place of instantiation for exactly
    /// these arguments, so it must come before any use that instantiates them.
    pub fn add_explicit_specialization(&mut self, template: DeclId, args: Vec<Arg>, spec: DeclId) -> Option<ProblemKind> {
        let template = self.canonical(template);
        let key = (template, args);
        match self.instances.get(&key) {
            Some(&existing) if self.decl(existing).flags.contains(Flags::EXPLICIT_SPECIALIZATION) => {
                let existing = self.canonical(existing);
                if self.decl(spec).is_definition() && self.definition(existing).is_some() {
                    return Some(ProblemKind::Redefinition);
                }
                let latest = self.decl(existing).latest.unwrap_or(existing);
                self.decl_mut(spec).prev = Some(latest);
                let definition = self.decl(spec).is_definition();
                let first = self.decl_mut(existing);
                first.latest = Some(spec);
                if definition { first.definition = Some(spec); }
                None
            }
            Some(_) => { Some(ProblemKind::LateSpecialization) }
            None => {
                if self.decl(spec).is_definition() { self.decl_mut(spec).definition = Some(spec); }
                self.record_instance(key, spec);
                None
            }
        }
    }
}

fn bind(bindings: &mut Bindings, param: DeclId, arg: Arg) -> bool {
    match bindings.get(&param) {
        Some(bound) => { *bound == arg }
        None => { bindings.insert(param, arg); true }
    }
}

#[cfg(test)]
mod tests {
    use crate::error::{Failure, ProblemKind};
    use crate::lex::{Kind, Loc};
    use crate::scope::{Decl, DeclId, DeclKind, Flags, ScopeId, ScopeKind, Table, Template, TemplateParam};
    use crate::symbols::{Symbol, SymbolMap};
    use crate::types::{Arg, Builtin, Type, TypeId};

    /// Declare `template <class.. | int..> struct name { members }` with type members named by
    /// parameter index.
    fn class_template<'i>(
        table: &mut Table<'i>, name: Symbol<'i, Kind>, params: &[DeclKind], member: Option<(Symbol<'i, Kind>, usize)>,
    ) -> (DeclId, Vec<DeclId>) {
        let scope = table.push_scope(ScopeKind::Template, Some(ScopeId::GLOBAL), None);
        let params: Vec<DeclId> = params.iter()
            .map(|&kind| table.add_decl(Decl::new(kind, None, TypeId::UNKNOWN, scope, Loc::default())))
            .collect();

        let inner = table.push_scope(ScopeKind::Class, Some(scope), None);
        let mut decl = Decl::new(DeclKind::Struct, Some(name), TypeId::VOID, ScopeId::GLOBAL, Loc::default())
            .with_flags(Flags::DEFINITION | Flags::COMPLETE)
            .with_inner(inner);
        let template_params = params.iter().map(|&decl| TemplateParam { decl, default: None, pack: false }).collect();
        decl.template = Some(Box::new(Template { params: template_params, ..Template::default() }));
        let id = table.declare(decl).id;
        table.set_owner(inner, id);

        if let Some((member, index)) = member {
            let ty = table.types.intern(Type::Param(params[index]));
            table.declare(Decl::new(DeclKind::Field, Some(member), ty, inner, Loc::default()));
        }
        (id, params)
    }

    fn partial<'i>(table: &mut Table<'i>, primary: DeclId, pattern: impl Fn(&mut Table<'i>, &[DeclId]) -> Vec<Arg>) -> DeclId {
        let kinds = [DeclKind::TypeParam, DeclKind::TypeParam, DeclKind::ValueParam];
        let scope = table.push_scope(ScopeKind::Template, Some(ScopeId::GLOBAL), None);
        let params: Vec<DeclId> = kinds.iter()
            .map(|&kind| table.add_decl(Decl::new(kind, None, TypeId::UNKNOWN, scope, Loc::default())))
            .collect();
        let pattern = pattern(table, &params);

        let name = table.decl(primary).name;
        let mut decl = Decl::new(DeclKind::Struct, name, TypeId::VOID, ScopeId::GLOBAL, Loc::default())
            .with_flags(Flags::DEFINITION | Flags::COMPLETE);
        let template_params = params.iter().map(|&decl| TemplateParam { decl, default: None, pack: false }).collect();
        decl.template = Some(Box::new(Template { params: template_params, pattern: Some(pattern), ..Template::default() }));
        let spec = table.add_decl(decl);
        table.add_partial_specialization(primary, spec);
        spec
    }

    #[test]
    fn member_substitution() {
        let symbols = SymbolMap::default();
        let a = symbols.intern(b"A", Kind::Identifier);
        let t = symbols.intern(b"t", Kind::Identifier);
        let mut table = Table::default();
        let (template, _) = class_template(&mut table, a, &[DeclKind::TypeParam], Some((t, 0)));

        let int = table.types.builtin(Builtin::Int);
        let first = table.instantiate(template, vec![Arg::Type(int)], Loc::default()).unwrap();
        let second = table.instantiate(template, vec![Arg::Type(int)], Loc::default()).unwrap();
        assert_eq!(first, second);

        let member = table.member(first, t);
        assert_eq!(member.len(), 1);
        assert_eq!(table.decl(member[0]).ty, int);
        assert_eq!(table.qualified_name(member[0]), "A<int>::t");

        let char_ = table.types.builtin(Builtin::Char);
        let other = table.instantiate(template, vec![Arg::Type(char_)], Loc::default()).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn partial_ordering() {
        let symbols = SymbolMap::default();
        let a = symbols.intern(b"A", Kind::Identifier);
        let mut table = Table::default();
        let kinds = [DeclKind::TypeParam, DeclKind::TypeParam, DeclKind::ValueParam];
        let (template, _) = class_template(&mut table, a, &kinds, None);

        let first_pointer = partial(&mut table, template, |table, params| {
            let t1 = table.types.intern(Type::Param(params[0]));
            let t1_pointer = table.types.pointer(t1);
            let t2 = table.types.intern(Type::Param(params[1]));
            vec![Arg::Type(t1_pointer), Arg::Type(t2), Arg::Param(params[2])]
        });
        let second_pointer = partial(&mut table, template, |table, params| {
            let t1 = table.types.intern(Type::Param(params[0]));
            let t2 = table.types.intern(Type::Param(params[1]));
            let t2_pointer = table.types.pointer(t2);
            vec![Arg::Type(t1), Arg::Type(t2_pointer), Arg::Param(params[2])]
        });
        assert!(!table.more_specialized(first_pointer, second_pointer));
        assert!(!table.more_specialized(second_pointer, first_pointer));

        let int = table.types.builtin(Builtin::Int);
        let int_pointer = table.types.pointer(int);

        let args = vec![Arg::Type(int_pointer), Arg::Type(int), Arg::Value(2)];
        let instance = table.instantiate(template, args, Loc::default()).unwrap();
        assert_eq!(table.decl(instance).instance_of.as_ref().map(|(t, _)| *t), Some(template));

        let args = vec![Arg::Type(int), Arg::Type(int), Arg::Value(2)];
        assert!(table.instantiate(template, args, Loc::default()).is_ok());

        let args = vec![Arg::Type(int_pointer), Arg::Type(int_pointer), Arg::Value(1)];
        match table.instantiate(template, args, Loc::default()) {
            Err(Failure::AmbiguousSpecialization { template, arguments, .. }) => {
                assert_eq!(template, "A");
                assert_eq!(arguments, "int *, int *, 1");
            }
            result => { panic!("expected ambiguity, got {:?}", result) }
        }
    }

    #[test]
    fn defaults_and_deferral() {
        let symbols = SymbolMap::default();
        let a = symbols.intern(b"A", Kind::Identifier);
        let mut table = Table::default();
        let (template, params) = class_template(&mut table, a, &[DeclKind::TypeParam, DeclKind::TypeParam], None);

        let first = table.types.intern(Type::Param(params[0]));
        let first_pointer = table.types.pointer(first);
        let canonical = table.canonical(template);
        if let Some(ref mut template) = table.decl_mut(canonical).template {
            template.params[1].default = Some(Arg::Type(first_pointer));
        }

        let int = table.types.builtin(Builtin::Int);
        let int_pointer = table.types.pointer(int);
        let args = table.complete_args(template, vec![Arg::Type(int)]).unwrap();
        assert_eq!(args, [Arg::Type(int), Arg::Type(int_pointer)]);
        assert_eq!(table.complete_args(template, vec![Arg::Value(1)]), Err(ProblemKind::TemplateArguments));

        let deferred = table.specialize(template, vec![Arg::Type(first), Arg::Type(first)], Loc::default()).unwrap();
        assert!(matches!(table.types.get(deferred), Type::Specialization(..)));
        let concrete = table.specialize(template, args, Loc::default()).unwrap();
        assert!(matches!(table.types.get(concrete), Type::Class(_)));
    }

    #[test]
    fn explicit_specialization() {
        let symbols = SymbolMap::default();
        let a = symbols.intern(b"A", Kind::Identifier);
        let mut table = Table::default();
        let (template, _) = class_template(&mut table, a, &[DeclKind::TypeParam], None);
        let int = table.types.builtin(Builtin::Int);
        let char_ = table.types.builtin(Builtin::Char);

        let spec = table.add_decl(Decl::new(DeclKind::Struct, Some(a), TypeId::VOID, ScopeId::GLOBAL, Loc::default())
            .with_flags(Flags::DEFINITION | Flags::EXPLICIT_SPECIALIZATION));
        assert_eq!(table.add_explicit_specialization(template, vec![Arg::Type(int)], spec), None);
        assert_eq!(table.instantiate(template, vec![Arg::Type(int)], Loc::default()).unwrap(), spec);

        table.instantiate(template, vec![Arg::Type(char_)], Loc::default()).unwrap();
        let late = table.add_decl(Decl::new(DeclKind::Struct, Some(a), TypeId::VOID, ScopeId::GLOBAL, Loc::default())
            .with_flags(Flags::DEFINITION | Flags::EXPLICIT_SPECIALIZATION));
        assert_eq!(table.add_explicit_specialization(template, vec![Arg::Type(char_)], late), Some(ProblemKind::LateSpecialization));
    }

    #[test]
    fn call_deduction() {
        let symbols = SymbolMap::default();
        let a = symbols.intern(b"A", Kind::Identifier);
        let f = symbols.intern(b"f", Kind::Identifier);
        let mut table = Table::default();
        let (class, _) = class_template(&mut table, a, &[DeclKind::TypeParam], None);

        // template <class T> void f(A<T> &);
        let scope = table.push_scope(ScopeKind::Template, Some(ScopeId::GLOBAL), None);
        let t = table.add_decl(Decl::new(DeclKind::TypeParam, None, TypeId::UNKNOWN, scope, Loc::default()));
        let t_ty = table.types.intern(Type::Param(t));
        let a_t = table.types.intern(Type::Specialization(class, vec![Arg::Type(t_ty)]));
        let param = table.types.lvalue_ref(a_t);
        let ty = table.types.function(TypeId::VOID, vec![param], false);
        let mut decl = Decl::new(DeclKind::Function, Some(f), ty, ScopeId::GLOBAL, Loc::default());
        decl.template = Some(Box::new(Template { params: vec![TemplateParam { decl: t, default: None, pack: false }], ..Template::default() }));
        let function = table.declare(decl).id;

        let int = table.types.builtin(Builtin::Int);
        let a_int = table.specialize(class, vec![Arg::Type(int)], Loc::default()).unwrap();
        let bindings = table.deduce_call(function, &[], &[a_int]).unwrap();
        assert_eq!(bindings.get(&t), Some(&Arg::Type(int)));

        assert!(table.deduce_call(function, &[], &[int]).is_none());
    }
}
