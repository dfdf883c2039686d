use tracing::trace;

use crate::scope::{DeclId, DeclKind, Flags, Table};
use crate::types::{Arg, Builtin, Type, TypeId};

/// How well an argument converts to a parameter. Lower is better.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Rank { Exact, Promotion, Conversion, UserDefined, Ellipsis }

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Candidate {
    pub decl: DeclId,
    /// The function type, with deduced template arguments substituted.
    pub ty: TypeId,
    pub template: bool,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Resolution {
    Unique(Candidate),
    /// Several viable candidates with none better than all the others.
    Ambiguous(Vec<DeclId>),
    NoMatch,
}

impl<'i> Table<'i> {
    /// The implicit conversion rank from `arg` to `param`, or `None` if there is no conversion.
    /// Types that are unknown or dependent convert to anything.
    pub fn rank(&mut self, param: TypeId, arg: TypeId) -> Option<Rank> {
        self.rank_conversion(param, arg, true)
    }

    fn rank_conversion(&mut self, param: TypeId, arg: TypeId, user_defined: bool) -> Option<Rank> {
        if !self.types.is_known(param) || !self.types.is_known(arg) { return Some(Rank::Exact); }
        if self.types.is_deferred(param) || self.types.is_deferred(arg) { return Some(Rank::Exact); }

        let param = match *self.types.get(param) {
            Type::LValueRef(inner) | Type::RValueRef(inner) => {
                let (_, target) = self.types.unqualified(inner);
                let (_, source) = self.types.unqualified(self.types.strip_references(arg));
                if target == source { return Some(Rank::Exact); }
                inner
            }
            _ => { param }
        };

        let (_, param) = self.types.unqualified(param);
        let arg = self.types.decay(arg);
        if param == arg { return Some(Rank::Exact); }

        match (self.types.get(param).clone(), self.types.get(arg).clone()) {
            (Type::Builtin(to), Type::Builtin(from)) if to.is_arithmetic() && from.is_arithmetic() => {
                if from.promotion() == Some(to) { Some(Rank::Promotion) } else { Some(Rank::Conversion) }
            }
            (Type::Builtin(to), Type::Enum(_)) if to.is_integral() => {
                if to == Builtin::Int { Some(Rank::Promotion) } else { Some(Rank::Conversion) }
            }
            (Type::Builtin(Builtin::Bool), Type::Pointer(_)) => { Some(Rank::Conversion) }
            (Type::Pointer(_), Type::Builtin(Builtin::Nullptr)) => { Some(Rank::Conversion) }
            (Type::Pointer(to), Type::Pointer(from)) => {
                let (to_cv, to) = self.types.unqualified(to);
                let (from_cv, from) = self.types.unqualified(from);
                let widens = (to_cv.const_ || !from_cv.const_) && (to_cv.volatile || !from_cv.volatile);
                if !widens { return None; }
                match (self.types.get(to).clone(), self.types.get(from).clone()) {
                    _ if to == from => { Some(Rank::Exact) }
                    (Type::Void, _) => { Some(Rank::Conversion) }
                    (Type::Class(base), Type::Class(derived)) if self.is_base_of(base, derived) => {
                        Some(Rank::Conversion)
                    }
                    _ => { None }
                }
            }
            (Type::Class(base), Type::Class(derived)) if self.is_base_of(base, derived) => {
                Some(Rank::Conversion)
            }
            (_, Type::Class(class)) if user_defined && self.converts(class) => { Some(Rank::UserDefined) }
            (Type::Class(class), _) if user_defined => {
                self.converting_constructor(class, arg).then_some(Rank::UserDefined)
            }
            _ => { None }
        }
    }

    /// Whether `class` or one of its bases declares a conversion function.
    fn converts(&self, class: DeclId) -> bool {
        let class = self.definition(class).unwrap_or(class);
        let decl = self.decl(class);
        decl.flags.contains(Flags::CONVERTIBLE) || decl.bases.iter().any(|&base| match *self.types.get(base) {
            Type::Class(base) => { self.converts(base) }
            _ => { false }
        })
    }

    /// Whether `class` has a non-explicit constructor taking one argument of type `arg`.
    fn converting_constructor(&mut self, class: DeclId, arg: TypeId) -> bool {
        let name = match self.decl(class).name {
            Some(name) => { name }
            None => { return false; }
        };
        let constructors: Vec<(TypeId, usize)> = self.member(class, name).into_iter()
            .filter(|&id| self.decl(id).kind == DeclKind::Constructor)
            .map(|id| (self.decl(id).ty, self.defaults(id)))
            .collect();

        constructors.into_iter().any(|(ty, defaults)| {
            let params = match *self.types.get(ty) {
                Type::Function { ref params, .. } => { params.clone() }
                _ => { return false; }
            };
            match params.first() {
                Some(&param) if params.len().saturating_sub(defaults) <= 1 => {
                    self.rank_conversion(param, arg, false).is_some()
                }
                _ => { false }
            }
        })
    }

    /// The number of trailing parameters with default arguments, across all redeclarations.
    pub fn defaults(&self, function: DeclId) -> usize {
        self.redeclarations(function).into_iter().map(|id| self.decl(id).defaults).max().unwrap_or(0)
    }

    /// Ranks for each argument of a call to a function of type `ty`, or `None` if not viable.
    fn call_ranks(&mut self, ty: TypeId, args: &[TypeId], defaults: usize) -> Option<Vec<Rank>> {
        let (params, variadic) = match *self.types.get(ty) {
            Type::Function { ref params, variadic, .. } => { (params.clone(), variadic) }
            _ => { return None; }
        };
        if args.len() + defaults < params.len() { return None; }
        if args.len() > params.len() && !variadic { return None; }

        let mut ranks = Vec::with_capacity(args.len());
        for (i, &arg) in args.iter().enumerate() {
            match params.get(i) {
                Some(&param) => { ranks.push(self.rank(param, arg)?); }
                None => { ranks.push(Rank::Ellipsis); }
            }
        }
        Some(ranks)
    }

    /// Pick the best function among `candidates` for a call with `args`. With `explicit`
    /// template arguments only templates are considered.
    pub fn resolve_call(&mut self, candidates: &[DeclId], explicit: Option<&[Arg]>, args: &[TypeId]) -> Resolution {
        self.resolve_member_call(candidates, explicit, None, args)
    }

    /// Like [`Table::resolve_call`], with the constness of the object a member function is called
    /// on. A const object rules out non-const member functions; otherwise non-const ones are preferred.
    pub fn resolve_member_call(
        &mut self, candidates: &[DeclId], explicit: Option<&[Arg]>, object: Option<bool>, args: &[TypeId],
    ) -> Resolution {
        let mut viable: Vec<(Candidate, Vec<Rank>)> = Vec::default();
        let mut seen = Vec::default();

        for &decl in candidates {
            let canonical = self.canonical(decl);
            if !self.decl(decl).kind.is_function() || seen.contains(&canonical) { continue; }
            seen.push(canonical);

            let template = self.decl(decl).template.is_some();
            if explicit.is_some() && !template { continue; }

            let ty = if template {
                let bindings = match self.deduce_call(decl, explicit.unwrap_or(&[]), args) {
                    Some(bindings) => { bindings }
                    None => { continue; }
                };
                let ty = self.decl(decl).ty;
                self.types.substitute(ty, &bindings)
            } else {
                self.decl(decl).ty
            };

            let defaults = self.defaults(decl);
            let mut ranks = match self.call_ranks(ty, args, defaults) {
                Some(ranks) => { ranks }
                None => { continue; }
            };
            if let (Some(const_object), DeclKind::Method) = (object, self.decl(decl).kind) {
                let const_method = self.decl(decl).flags.contains(Flags::CONST);
                if const_object && !const_method { continue; }
                ranks.push(if const_object == const_method { Rank::Exact } else { Rank::Promotion });
            }
            viable.push((Candidate { decl, ty, template }, ranks));
        }

        let best: Vec<usize> = (0..viable.len())
            .filter(|&i| (0..viable.len()).all(|j| i == j || better(&viable[i], &viable[j])))
            .collect();
        trace!(viable = viable.len(), best = best.len(), "resolve call");

        match best[..] {
            [best] => { Resolution::Unique(viable[best].0) }
            _ if viable.is_empty() => { Resolution::NoMatch }
            _ => { Resolution::Ambiguous(viable.into_iter().map(|(candidate, _)| candidate.decl).collect()) }
        }
    }
}

/// Whether `a` is a better candidate than `b`: no argument converts worse, and either one
/// converts better or `a` is not a template where `b` is.
fn better(a: &(Candidate, Vec<Rank>), b: &(Candidate, Vec<Rank>)) -> bool {
    let mut strictly = false;
    for (ra, rb) in a.1.iter().zip(&b.1) {
        if ra > rb { return false; }
        if ra < rb { strictly = true; }
    }
    strictly || (!a.0.template && b.0.template)
}

#[cfg(test)]
mod tests {
    use super::{Rank, Resolution};
    use crate::lex::{Kind, Loc};
    use crate::scope::{Decl, DeclId, DeclKind, ScopeId, ScopeKind, Table, Template, TemplateParam};
    use crate::symbols::SymbolMap;
    use crate::types::{Arg, Builtin, Type, TypeId};

    #[test]
    fn ranks() {
        let mut table = Table::default();
        let int = table.types.builtin(Builtin::Int);
        let char_ = table.types.builtin(Builtin::Char);
        let double = table.types.builtin(Builtin::Double);
        let nullptr = table.types.builtin(Builtin::Nullptr);
        let int_ref = table.types.lvalue_ref(int);
        let int_pointer = table.types.pointer(int);
        let void_pointer = table.types.pointer(TypeId::VOID);
        let int_array = table.types.array(int, Some(3));

        assert_eq!(table.rank(int, int_ref), Some(Rank::Exact));
        assert_eq!(table.rank(int_ref, int), Some(Rank::Exact));
        assert_eq!(table.rank(int, char_), Some(Rank::Promotion));
        assert_eq!(table.rank(int, double), Some(Rank::Conversion));
        assert_eq!(table.rank(int_pointer, int_array), Some(Rank::Exact));
        assert_eq!(table.rank(int_pointer, nullptr), Some(Rank::Conversion));
        assert_eq!(table.rank(void_pointer, int_pointer), Some(Rank::Conversion));
        assert_eq!(table.rank(int_pointer, int), None);
        assert_eq!(table.rank(int, TypeId::UNKNOWN), Some(Rank::Exact));
    }

    #[test]
    fn derived_to_base() {
        let symbols = SymbolMap::default();
        let mut table = Table::default();
        let names = [symbols.intern(b"Base", Kind::Identifier), symbols.intern(b"Derived", Kind::Identifier)];
        let base = table.declare(Decl::new(DeclKind::Struct, Some(names[0]), TypeId::VOID, ScopeId::GLOBAL, Loc::default())).id;
        let base_ty = table.types.intern(Type::Class(base));
        let mut derived = Decl::new(DeclKind::Struct, Some(names[1]), TypeId::VOID, ScopeId::GLOBAL, Loc::default());
        derived.bases.push(base_ty);
        let derived = table.declare(derived).id;
        let derived_ty = table.types.intern(Type::Class(derived));

        let base_pointer = table.types.pointer(base_ty);
        let derived_pointer = table.types.pointer(derived_ty);
        assert_eq!(table.rank(base_pointer, derived_pointer), Some(Rank::Conversion));
        assert_eq!(table.rank(derived_pointer, base_pointer), None);
        assert!(table.is_base_of(base, derived));
    }

    fn function(table: &mut Table<'_>, ty: TypeId) -> DeclId {
        table.add_decl(Decl::new(DeclKind::Function, None, ty, ScopeId::GLOBAL, Loc::default()))
    }

    #[test]
    fn resolution() {
        let mut table = Table::default();
        let int = table.types.builtin(Builtin::Int);
        let long = table.types.builtin(Builtin::Long);
        let char_ = table.types.builtin(Builtin::Char);
        let double = table.types.builtin(Builtin::Double);

        let ty = table.types.function(TypeId::VOID, vec![int], false);
        let f_int = function(&mut table, ty);
        let ty = table.types.function(TypeId::VOID, vec![long], false);
        let f_long = function(&mut table, ty);
        let ty = table.types.function(TypeId::VOID, vec![], true);
        let f_ellipsis = function(&mut table, ty);

        let candidates = [f_int, f_long, f_ellipsis];
        assert!(matches!(table.resolve_call(&candidates, None, &[int]), Resolution::Unique(c) if c.decl == f_int));
        assert!(matches!(table.resolve_call(&candidates, None, &[char_]), Resolution::Unique(c) if c.decl == f_int));
        assert_eq!(table.resolve_call(&candidates, None, &[double]), Resolution::Ambiguous(vec![f_int, f_long, f_ellipsis]));
        assert!(matches!(table.resolve_call(&candidates, None, &[]), Resolution::Unique(c) if c.decl == f_ellipsis));
        assert_eq!(table.resolve_call(&[f_int], None, &[int, int]), Resolution::NoMatch);
    }

    #[test]
    fn templates() {
        let mut table = Table::default();
        let int = table.types.builtin(Builtin::Int);
        let ty = table.types.function(TypeId::VOID, vec![int], false);
        let plain = function(&mut table, ty);

        let scope = table.push_scope(ScopeKind::Template, Some(ScopeId::GLOBAL), None);
        let t = table.add_decl(Decl::new(DeclKind::TypeParam, None, TypeId::UNKNOWN, scope, Loc::default()));
        let t_ty = table.types.intern(Type::Param(t));
        let ty = table.types.function(TypeId::VOID, vec![t_ty], false);
        let mut decl = Decl::new(DeclKind::Function, None, ty, ScopeId::GLOBAL, Loc::default());
        decl.template = Some(Box::new(Template { params: vec![TemplateParam { decl: t, default: None, pack: false }], ..Template::default() }));
        let template = table.add_decl(decl);

        let candidates = [plain, template];
        match table.resolve_call(&candidates, None, &[int]) {
            Resolution::Unique(candidate) => { assert_eq!(candidate.decl, plain); }
            other => { panic!("{:?}", other) }
        }
        match table.resolve_call(&candidates, Some(&[Arg::Type(int)]), &[int]) {
            Resolution::Unique(candidate) => {
                assert_eq!(candidate.decl, template);
                assert!(candidate.template);
                assert_eq!(table.types.get(candidate.ty), &Type::Function { ret: TypeId::VOID, params: vec![int], variadic: false });
            }
            other => { panic!("{:?}", other) }
        }
    }
}
