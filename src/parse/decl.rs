use std::mem;

use tracing::trace;

use super::{Deferred, Miss, Parsed, Parser, TemplateHeader};
use crate::ast::Event;
use crate::config::{Language, Mode};
use crate::error::{Failure, ProblemKind};
use crate::lex::{Kind, Loc, Token};
use crate::scope::{Decl, DeclId, DeclKind, Flags, ScopeId, ScopeKind, Template, TemplateParam};
use crate::symbols::Symbol;
use crate::types::{Arg, Bindings, Builtin, Cv, Type, TypeId};

/// Where a declaration appears.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum Context {
    File,
    Member(DeclId),
    Block,
    Parameter,
    Type,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum NameKind { Plain, Destructor, Operator, Conversion }

/// An id-expression: a possibly qualified name, with template arguments if it had any.
#[derive(Clone, Debug)]
pub(super) struct Name<'i> {
    pub name: Symbol<'i, Kind>,
    pub loc: Loc,
    pub kind: NameKind,
    /// The scope a nested-name-specifier named.
    pub qualifier: Option<ScopeId>,
    /// The qualifier depends on template parameters.
    pub dependent: bool,
    /// The qualifier could not be found.
    pub unresolved: bool,
    pub candidates: Vec<DeclId>,
    pub args: Option<Vec<Arg>>,
    /// A `<` follows a template name but no argument list parses.
    pub unterminated: bool,
    /// Maps the parameters of a class template named in the qualifier to the arguments it was
    /// named with. Member types are in terms of the former.
    pub rename: Bindings,
    /// The target type of a conversion function.
    pub ty: Option<TypeId>,
}

impl<'i> Name<'i> {
    pub fn is_qualified(&self) -> bool { self.qualifier.is_some() || self.dependent || self.unresolved }
}

enum Qualifier {
    Scope(ScopeId, Bindings),
    Dependent,
    Unresolved,
}

#[derive(Clone, Debug, Default)]
pub(super) struct Specifiers {
    pub ty: Option<TypeId>,
    pub cv: Cv,
    pub flags: Flags,
    pub typedef: bool,
    pub constexpr: bool,
    pub auto: bool,
    /// Any specifier at all.
    pub any: bool,
    base: Option<Kind>,
    signed: Option<bool>,
    short: bool,
    long: u8,
}

impl Specifiers {
    fn has_type(&self) -> bool {
        self.ty.is_some() || self.base.is_some() || self.signed.is_some() || self.short || self.long > 0
    }
}

#[derive(Clone, Debug)]
pub(super) enum Op<'i> {
    Pointer(Cv),
    LRef,
    RRef,
    MemberPointer(Cv),
    Array(Option<u64>),
    Function(Signature<'i>),
}

#[derive(Clone, Debug)]
pub(super) struct Signature<'i> {
    pub params: Vec<Param<'i>>,
    pub variadic: bool,
    pub cv: Cv,
    pub trailing: Option<TypeId>,
}

#[derive(Clone, Debug)]
pub(super) struct Param<'i> {
    pub ty: TypeId,
    pub name: Option<(Symbol<'i, Kind>, Loc)>,
    pub default: bool,
    pub pack: bool,
}

#[derive(Clone, Debug)]
pub(super) struct Declarator<'i> {
    pub name: Option<Name<'i>>,
    /// Type constructors in the order they apply to the base type.
    pub ops: Vec<Op<'i>>,
    pub loc: Loc,
    pub pack: bool,
}

impl<'i> Declarator<'i> {
    /// The parameter list that makes this declarator declare a function.
    pub fn function(&self) -> Option<&Signature<'i>> {
        match self.ops.last() {
            Some(Op::Function(signature)) => { Some(signature) }
            _ => { None }
        }
    }
}

/// Whether a declarator may or must leave out its name.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub(super) enum Abstract { No, Maybe, Only }

pub(super) fn is_builtin_type(kind: Kind) -> bool {
    matches!(kind,
        Kind::Void | Kind::Bool | Kind::Char | Kind::Char16 | Kind::Char32 | Kind::WcharT |
        Kind::Short | Kind::Int | Kind::Long | Kind::Signed | Kind::Unsigned | Kind::Float | Kind::Double)
}

impl<'i, 'c, 'r> Parser<'i, 'c, 'r> {
    pub(super) fn declaration(&mut self) -> Parsed<()> {
        self.discard();
        match self.peek() {
            Kind::Semi => { self.bump(); Ok(()) }
            Kind::Namespace => { self.namespace_definition() }
            Kind::Inline if self.nth(1) == Kind::Namespace => { self.namespace_definition() }
            Kind::Using => { self.using() }
            Kind::Template => { self.template_declaration(Context::File) }
            Kind::Export | Kind::Extern if self.nth(1) == Kind::Template => {
                self.bump();
                self.template_declaration(Context::File)
            }
            Kind::Extern if self.nth(1) == Kind::String => { self.linkage_specification() }
            Kind::StaticAssert => { self.static_assert() }
            Kind::Asm => { self.asm_declaration() }
            Kind::Identifier if self.is_identifier(self.names.extension) => {
                self.bump();
                self.declaration()
            }
            _ => { self.simple_declaration(Context::File) }
        }
    }

    // Names

    fn may_begin_name(&mut self) -> bool {
        match self.peek() {
            Kind::Identifier | Kind::Operator => { true }
            Kind::ColonColon => { self.language == Language::Cpp }
            Kind::Tilde => { self.nth(1) == Kind::Identifier }
            _ => { false }
        }
    }

    /// Parse a possibly qualified name and look it up.
    pub(super) fn id_expression(&mut self) -> Parsed<Name<'i>> {
        let cpp = self.language == Language::Cpp;
        let mut qualifier = None;
        let mut dependent = false;
        let mut unresolved = false;
        let mut rename = Bindings::default();
        if cpp && self.eat(Kind::ColonColon).is_some() {
            qualifier = Some(ScopeId::GLOBAL);
        }

        loop {
            let qualified = qualifier.is_some() || dependent || unresolved;
            let template = qualified && self.eat(Kind::Template).is_some();

            let token = self.peek_token();
            let (name, kind, ty) = match token.kind() {
                Kind::Identifier => {
                    self.bump();
                    (token.spelling(), NameKind::Plain, None)
                }
                Kind::Tilde if self.nth(1) == Kind::Identifier => {
                    self.bump();
                    let class = self.bump();
                    (self.intern(&format!("~{}", class.spelling())), NameKind::Destructor, None)
                }
                Kind::Operator if cpp => { self.operator_name()? }
                _ => { return Err(Miss::NoMatch); }
            };

            let candidates = match qualifier {
                _ if dependent || unresolved => { Vec::default() }
                Some(scope) => { self.table.lookup_in(scope, name) }
                None => { self.table.lookup(self.scope, name) }
            };

            let mut args = None;
            let mut unterminated = false;
            if cpp && self.peek() == Kind::Lt && kind != NameKind::Destructor {
                let known = candidates.iter().any(|&decl| self.table.is_template(decl));
                if template || known || candidates.is_empty() {
                    match self.speculate(Self::template_arguments) {
                        Ok(list) => { args = Some(list); }
                        Err(Miss::NoMatch) => { unterminated = template || known; }
                        Err(fatal) => { return Err(fatal); }
                    }
                }
            }

            let nested = cpp && kind == NameKind::Plain && !unterminated
                && self.peek() == Kind::ColonColon && self.nth(1) != Kind::Star;
            if !nested {
                return Ok(Name {
                    name, loc: token.loc(), kind, qualifier, dependent, unresolved,
                    candidates, args, unterminated, rename, ty,
                });
            }

            self.bump();
            let scope = if dependent {
                Qualifier::Dependent
            } else if unresolved {
                Qualifier::Unresolved
            } else {
                self.qualifier_scope(name, token.loc(), &candidates, args)?
            };
            match scope {
                Qualifier::Scope(scope, bindings) => { qualifier = Some(scope); rename = bindings; }
                Qualifier::Dependent => { dependent = true; }
                Qualifier::Unresolved => { unresolved = true; }
            }
        }
    }

    /// The scope a nested-name-specifier component names.
    fn qualifier_scope(
        &mut self, name: Symbol<'i, Kind>, loc: Loc, candidates: &[DeclId], args: Option<Vec<Arg>>,
    ) -> Parsed<Qualifier> {
        let found = candidates.iter().copied().find(|&decl| {
            let kind = self.table.decl(decl).kind;
            matches!(kind, DeclKind::Namespace | DeclKind::NamespaceAlias) || kind.is_type()
        });
        let decl = match found {
            Some(decl) => { decl }
            None => {
                self.undeclared(name, loc);
                return Ok(Qualifier::Unresolved);
            }
        };
        self.reference(loc, name, decl);

        match self.table.decl(decl).kind {
            DeclKind::Namespace | DeclKind::NamespaceAlias => match self.table.members_scope(decl) {
                Some(scope) => { Ok(Qualifier::Scope(scope, Bindings::default())) }
                None => { Ok(Qualifier::Unresolved) }
            }
            _ => {
                let ty = self.named_type(decl, args, loc)?;
                Ok(self.type_scope(ty))
            }
        }
    }

    fn type_scope(&mut self, ty: TypeId) -> Qualifier {
        let (_, ty) = self.table.types.unqualified(ty);
        match self.table.types.get(ty).clone() {
            Type::Class(decl) | Type::Enum(decl) => match self.table.members_scope(decl) {
                Some(scope) => { Qualifier::Scope(scope, Bindings::default()) }
                None => { Qualifier::Unresolved }
            }
            Type::Specialization(template, args) => {
                let rename = self.table.template_params(template).iter()
                    .map(|param| param.decl)
                    .zip(args)
                    .collect();
                match self.table.members_scope(template) {
                    Some(scope) => { Qualifier::Scope(scope, rename) }
                    None => { Qualifier::Dependent }
                }
            }
            Type::Param(_) | Type::Dependent => { Qualifier::Dependent }
            _ => { Qualifier::Unresolved }
        }
    }

    /// `operator` followed by an operator, `new`/`delete`, a literal suffix or a conversion type.
    fn operator_name(&mut self) -> Parsed<(Symbol<'i, Kind>, NameKind, Option<TypeId>)> {
        self.expect(Kind::Operator)?;
        let token = self.peek_token();
        let spelling = match token.kind() {
            Kind::New | Kind::Delete => {
                self.bump();
                let mut spelling = format!("operator {}", token.spelling());
                if self.peek() == Kind::LeftBracket && self.nth(1) == Kind::RightBracket {
                    self.bump();
                    self.bump();
                    spelling.push_str("[]");
                }
                spelling
            }
            Kind::LeftParen if self.nth(1) == Kind::RightParen => {
                self.bump();
                self.bump();
                "operator()".to_owned()
            }
            Kind::LeftBracket if self.nth(1) == Kind::RightBracket => {
                self.bump();
                self.bump();
                "operator[]".to_owned()
            }
            Kind::String if self.nth(1) == Kind::Identifier => {
                self.bump();
                let suffix = self.bump();
                format!("operator\"\" {}", suffix.spelling())
            }
            kind if (Kind::Arrow as u8..=Kind::Comma as u8).contains(&(kind as u8)) => {
                self.bump();
                format!("operator{}", token.spelling())
            }
            _ => {
                let specifiers = self.decl_specifiers(Context::Type)?;
                let mut ty = specifiers.ty.ok_or(Miss::NoMatch)?;
                loop {
                    ty = match self.peek() {
                        Kind::Star => {
                            self.bump();
                            let cv = self.cv_qualifiers();
                            let pointer = self.table.types.pointer(ty);
                            self.table.types.qualified(cv, pointer)
                        }
                        Kind::Amp => { self.bump(); self.table.types.lvalue_ref(ty) }
                        Kind::AmpAmp => { self.bump(); self.table.types.rvalue_ref(ty) }
                        _ => { break; }
                    };
                }
                let name = format!("operator {}", self.table.display_type(ty));
                return Ok((self.intern(&name), NameKind::Conversion, Some(ty)));
            }
        };
        Ok((self.intern(&spelling), NameKind::Operator, None))
    }

    // Specifiers

    pub(super) fn decl_specifiers(&mut self, context: Context) -> Parsed<Specifiers> {
        let cpp = self.language == Language::Cpp;
        let mut s = Specifiers::default();
        loop {
            let token = self.peek_token();
            match token.kind() {
                Kind::Typedef => { s.typedef = true; }
                Kind::Static => { s.flags.insert(Flags::STATIC); }
                Kind::Extern => { s.flags.insert(Flags::EXTERN); }
                Kind::Inline => { s.flags.insert(Flags::INLINE); }
                Kind::Virtual => { s.flags.insert(Flags::VIRTUAL); }
                Kind::Friend => { s.flags.insert(Flags::FRIEND); }
                Kind::Constexpr => { s.constexpr = true; }
                Kind::Explicit | Kind::Register | Kind::Mutable | Kind::ThreadLocal |
                Kind::Noreturn | Kind::Restrict => {}
                Kind::Const => { s.cv.const_ = true; }
                Kind::Volatile => { s.cv.volatile = true; }
                Kind::Auto => {
                    if cpp {
                        if s.has_type() { break; }
                        s.auto = true;
                    }
                }
                Kind::Signed | Kind::Unsigned => {
                    if s.ty.is_some() { break; }
                    s.signed = Some(token.kind() == Kind::Signed);
                }
                Kind::Short => {
                    if s.ty.is_some() { break; }
                    s.short = true;
                }
                Kind::Long => {
                    if s.ty.is_some() { break; }
                    s.long += 1;
                }
                kind if is_builtin_type(kind) => {
                    if s.ty.is_some() || s.base.is_some() || s.auto { break; }
                    s.base = Some(kind);
                }
                Kind::Alignas => {
                    self.bump();
                    self.skip_balanced();
                    s.any = true;
                    continue;
                }
                Kind::LeftBracket if self.nth(1) == Kind::LeftBracket => {
                    self.skip_attributes();
                    continue;
                }
                Kind::Class | Kind::Struct | Kind::Union => {
                    if s.has_type() { break; }
                    let ty = self.class_specifier(s.flags.contains(Flags::FRIEND))?;
                    s.ty = Some(ty);
                    s.any = true;
                    continue;
                }
                Kind::Enum => {
                    if s.has_type() { break; }
                    let ty = self.enum_specifier()?;
                    s.ty = Some(ty);
                    s.any = true;
                    continue;
                }
                Kind::Typename => {
                    if s.has_type() { break; }
                    self.bump();
                    let fatal = self.depth == 0;
                    s.ty = Some(self.type_name(true, fatal)?);
                    s.any = true;
                    continue;
                }
                Kind::Decltype => {
                    if s.has_type() { break; }
                    if self.nth(1) == Kind::LeftParen && self.nth(2) == Kind::Auto && self.nth(3) == Kind::RightParen {
                        for _ in 0..4 { self.bump(); }
                        s.auto = true;
                    } else {
                        s.ty = Some(self.decltype()?);
                    }
                    s.any = true;
                    continue;
                }
                Kind::Identifier if token.spelling() == self.names.typeof_ && self.nth(1) == Kind::LeftParen => {
                    if s.has_type() { break; }
                    s.ty = Some(self.decltype()?);
                    s.any = true;
                    continue;
                }
                Kind::Identifier if self.is_attribute() => {
                    self.skip_attributes();
                    continue;
                }
                Kind::Identifier if token.spelling() == self.names.extension => {}
                Kind::Identifier | Kind::ColonColon => {
                    if s.has_type() || s.auto { break; }
                    if let Context::Member(class) = context {
                        if self.is_constructor(class) { break; }
                    }
                    let fatal = self.depth == 0;
                    match self.speculate(|p| p.type_name(false, fatal)) {
                        Ok(ty) => {
                            s.ty = Some(ty);
                            s.any = true;
                            continue;
                        }
                        Err(Miss::NoMatch) => { break; }
                        Err(fatal) => { return Err(fatal); }
                    }
                }
                _ => { break; }
            }
            self.bump();
            s.any = true;
        }

        if let Some(ty) = self.builtin_type(&s) { s.ty = Some(ty); }
        if s.ty.is_none() && s.auto { s.ty = Some(TypeId::UNKNOWN); }
        if let Some(ty) = s.ty { s.ty = Some(self.table.types.qualified(s.cv, ty)); }
        Ok(s)
    }

    fn builtin_type(&mut self, s: &Specifiers) -> Option<TypeId> {
        let unsigned = s.signed == Some(false);
        let builtin = match s.base {
            None if s.signed.is_none() && !s.short && s.long == 0 => { return None; }
            Some(Kind::Void) => { return Some(TypeId::VOID); }
            Some(Kind::Bool) => { Builtin::Bool }
            Some(Kind::Char) => match s.signed {
                None => { Builtin::Char }
                Some(true) => { Builtin::SignedChar }
                Some(false) => { Builtin::UnsignedChar }
            }
            Some(Kind::WcharT) => { Builtin::WcharT }
            Some(Kind::Char16) => { Builtin::Char16 }
            Some(Kind::Char32) => { Builtin::Char32 }
            Some(Kind::Float) => { Builtin::Float }
            Some(Kind::Double) if s.long > 0 => { Builtin::LongDouble }
            Some(Kind::Double) => { Builtin::Double }
            _ if s.short => { if unsigned { Builtin::UnsignedShort } else { Builtin::Short } }
            _ if s.long == 1 => { if unsigned { Builtin::UnsignedLong } else { Builtin::Long } }
            _ if s.long > 1 => { if unsigned { Builtin::UnsignedLongLong } else { Builtin::LongLong } }
            _ => { if unsigned { Builtin::UnsignedInt } else { Builtin::Int } }
        };
        Some(self.table.types.builtin(builtin))
    }

    /// `decltype(...)` or `typeof(...)`.
    fn decltype(&mut self) -> Parsed<TypeId> {
        self.bump();
        self.expect(Kind::LeftParen)?;
        let ty = self.speculate(|p| {
            let ty = p.type_id()?;
            if p.peek() == Kind::RightParen { Ok(ty) } else { Err(Miss::NoMatch) }
        });
        let ty = match ty {
            Ok(ty) => { ty }
            Err(Miss::NoMatch) => { self.with_no_gt(false, Self::expression)?.ty }
            Err(fatal) => { return Err(fatal); }
        };
        self.expect(Kind::RightParen)?;
        Ok(ty)
    }

    pub(super) fn is_attribute(&mut self) -> bool {
        let token = self.peek_token();
        match token.kind() {
            Kind::LeftBracket => { self.nth(1) == Kind::LeftBracket }
            Kind::Identifier => {
                let spelling = token.spelling();
                (spelling == self.names.attribute || spelling == self.names.declspec) && self.nth(1) == Kind::LeftParen
            }
            Kind::Alignas => { true }
            _ => { false }
        }
    }

    /// Skip `[[...]]`, `__attribute__((...))`, `__declspec(...)` and `alignas(...)`.
    pub(super) fn skip_attributes(&mut self) {
        while self.is_attribute() {
            if self.peek() != Kind::LeftBracket { self.bump(); }
            self.skip_balanced();
        }
    }

    fn is_constructor(&mut self, class: DeclId) -> bool {
        let token = self.peek_token();
        token.kind() == Kind::Identifier
            && Some(token.spelling()) == self.table.decl(class).name
            && self.nth(1) == Kind::LeftParen
    }

    /// A name used as a type. `typename` accepts dependent names unconditionally. An
    /// unterminated template argument list is `fatal` only outside speculation.
    pub(super) fn type_name(&mut self, typename: bool, fatal: bool) -> Parsed<TypeId> {
        let name = self.id_expression()?;
        if name.kind != NameKind::Plain { return Err(Miss::NoMatch); }
        if name.unterminated {
            if !fatal { return Err(Miss::NoMatch); }
            let failure = Failure::UnterminatedTemplateArguments { name: name.name.as_str().to_owned(), loc: name.loc };
            return Err(failure.into());
        }
        if name.dependent || name.unresolved {
            if !typename && self.peek() != Kind::Identifier { return Err(Miss::NoMatch); }
            return Ok(if name.dependent { TypeId::DEPENDENT } else { TypeId::UNKNOWN });
        }

        let decl = match self.type_decl(&name.candidates, name.is_qualified()) {
            Some(decl) => { decl }
            None if name.candidates.is_empty() && self.peek() == Kind::Identifier => {
                // `undeclared_t x;` still declares `x`.
                self.undeclared(name.name, name.loc);
                return Ok(TypeId::UNKNOWN);
            }
            None => { return Err(Miss::NoMatch); }
        };
        self.reference(name.loc, name.name, decl);
        let ty = self.named_type(decl, name.args, name.loc)?;
        Ok(self.table.types.substitute(ty, &name.rename))
    }

    /// The type among `candidates`. Unqualified, a constructor stands for its class.
    pub(super) fn type_decl(&self, candidates: &[DeclId], qualified: bool) -> Option<DeclId> {
        let ty = candidates.iter().copied().find(|&decl| self.table.decl(decl).kind.is_type());
        if ty.is_some() || qualified { return ty; }
        candidates.iter().find_map(|&decl| {
            let decl = self.table.decl(decl);
            if decl.kind != DeclKind::Constructor { return None; }
            self.table.scope(decl.scope).owner
        })
    }

    /// The type `decl` names, given the template arguments written after it.
    pub(super) fn named_type(&mut self, decl: DeclId, args: Option<Vec<Arg>>, loc: Loc) -> Parsed<TypeId> {
        let template = self.table.is_template(decl);
        match args {
            Some(args) if template => {
                let args = match self.table.complete_args(decl, args) {
                    Ok(args) => { args }
                    Err(kind) => {
                        let name = self.table.qualified_name(decl);
                        self.problem(kind, loc, name);
                        return Ok(TypeId::UNKNOWN);
                    }
                };
                if self.table.decl(decl).kind == DeclKind::Typedef {
                    let bindings: Bindings = self.table.template_params(decl).iter()
                        .map(|param| param.decl)
                        .zip(args)
                        .collect();
                    let ty = self.table.decl(decl).ty;
                    return Ok(self.table.types.substitute(ty, &bindings));
                }
                Ok(self.table.specialize(decl, args, loc)?)
            }
            None if template && self.table.decl(decl).kind.is_class() => {
                match self.injected(decl) {
                    Some(ty) => { Ok(ty) }
                    None => { Ok(self.table.type_of_name(decl).unwrap_or(TypeId::UNKNOWN)) }
                }
            }
            _ => { Ok(self.table.type_of_name(decl).unwrap_or(TypeId::UNKNOWN)) }
        }
    }

    /// Inside a class template or one of its specializations, its name alone means the
    /// specialization being defined.
    fn injected(&mut self, template: DeclId) -> Option<TypeId> {
        let template = self.table.canonical(template);
        let mut scope = Some(self.scope);
        while let Some(id) = scope {
            scope = self.table.scope(id).parent;
            let owner = match (self.table.scope(id).kind, self.table.scope(id).owner) {
                (ScopeKind::Class, Some(owner)) => { owner }
                _ => { continue; }
            };

            if self.table.canonical(owner) == template {
                let params = self.table.decl(owner).template.as_ref().map(|t| t.params.clone()).unwrap_or_default();
                let args = params.iter().map(|param| self.param_arg(param)).collect();
                return Some(self.table.types.intern(Type::Specialization(template, args)));
            }

            let partial = self.table.decl(template).template.as_ref()
                .map_or(false, |t| t.specializations.contains(&owner));
            if partial {
                let pattern = self.table.decl(owner).template.as_ref().and_then(|t| t.pattern.clone());
                if let Some(pattern) = pattern {
                    return Some(self.table.types.intern(Type::Specialization(template, pattern)));
                }
            }

            let explicit = match self.table.decl(owner).instance_of {
                Some((of, _)) => { self.table.canonical(of) == template }
                None => { false }
            };
            if explicit { return Some(self.table.types.intern(Type::Class(owner))); }
        }
        None
    }

    /// A template parameter as an argument standing for itself.
    pub(super) fn param_arg(&mut self, param: &TemplateParam) -> Arg {
        match self.table.decl(param.decl).kind {
            DeclKind::ValueParam => { Arg::Param(param.decl) }
            _ => { Arg::Type(self.table.types.intern(Type::Param(param.decl))) }
        }
    }

    // Declarators

    fn cv_qualifiers(&mut self) -> Cv {
        let mut cv = Cv::default();
        loop {
            match self.peek() {
                Kind::Const => { cv.const_ = true; }
                Kind::Volatile => { cv.volatile = true; }
                Kind::Restrict => {}
                _ => { return cv; }
            }
            self.bump();
        }
    }

    /// `C::*`, possibly with more qualification.
    fn member_pointer_ahead(&mut self) -> bool {
        let mut i = if self.peek() == Kind::ColonColon { 1 } else { 0 };
        loop {
            if self.nth(i) != Kind::Identifier || self.nth(i + 1) != Kind::ColonColon { return false; }
            i += 2;
            if self.nth(i) == Kind::Star { return true; }
        }
    }

    fn ptr_operator(&mut self) -> Option<Op<'i>> {
        let op = match self.peek() {
            Kind::Star => {
                self.bump();
                Op::Pointer(self.cv_qualifiers())
            }
            Kind::Amp if self.language == Language::Cpp => { self.bump(); Op::LRef }
            Kind::AmpAmp if self.language == Language::Cpp => { self.bump(); Op::RRef }
            Kind::Identifier | Kind::ColonColon if self.language == Language::Cpp && self.member_pointer_ahead() => {
                while self.peek() != Kind::Star { self.bump(); }
                self.bump();
                Op::MemberPointer(self.cv_qualifiers())
            }
            _ => { return None; }
        };
        self.skip_attributes();
        Some(op)
    }

    pub(super) fn declarator(&mut self, mode: Abstract) -> Parsed<Declarator<'i>> {
        self.nested(|p| p.declarator_inner(mode))
    }

    fn declarator_inner(&mut self, mode: Abstract) -> Parsed<Declarator<'i>> {
        let mut loc = self.peek_token().loc();
        let mut ops = Vec::default();
        while let Some(op) = self.ptr_operator() { ops.push(op); }
        let mut pack = self.eat(Kind::Ellipsis).is_some();

        let mut name = None;
        let mut inner = Vec::default();
        if self.peek() == Kind::LeftParen {
            let nested = self.speculate(|p| {
                p.bump();
                let inner = p.declarator(mode)?;
                p.expect(Kind::RightParen)?;
                if inner.name.is_none() && inner.ops.is_empty() { return Err(Miss::NoMatch); }
                Ok(inner)
            });
            match nested {
                Ok(declarator) => {
                    name = declarator.name;
                    inner = declarator.ops;
                    pack |= declarator.pack;
                }
                Err(Miss::NoMatch) => {}
                Err(fatal) => { return Err(fatal); }
            }
        } else if mode != Abstract::Only && self.may_begin_name() {
            name = Some(self.id_expression()?);
        }
        if mode == Abstract::No && name.is_none() { return Err(Miss::NoMatch); }
        if let Some(ref name) = name { loc = name.loc; }

        let mut suffix = Vec::default();
        loop {
            match self.peek() {
                Kind::LeftBracket if self.nth(1) != Kind::LeftBracket => {
                    self.bump();
                    let mut len = None;
                    if self.peek() != Kind::RightBracket {
                        let value = self.with_no_gt(false, Self::expression)?;
                        len = value.value.and_then(|value| u64::try_from(value).ok());
                    }
                    self.expect(Kind::RightBracket)?;
                    suffix.push(Op::Array(len));
                }
                Kind::LeftParen => match self.speculate(Self::parameters) {
                    Ok(signature) => { suffix.push(Op::Function(signature)); }
                    Err(Miss::NoMatch) => { break; }
                    Err(fatal) => { return Err(fatal); }
                }
                _ => { break; }
            }
        }

        ops.extend(suffix.into_iter().rev());
        ops.extend(inner);
        Ok(Declarator { name, ops, loc, pack })
    }

    /// A parenthesized parameter list and whatever may follow it in a function declarator.
    pub(super) fn parameters(&mut self) -> Parsed<Signature<'i>> {
        self.expect(Kind::LeftParen)?;
        let mut signature = Signature { params: Vec::default(), variadic: false, cv: Cv::default(), trailing: None };
        if self.peek() == Kind::Void && self.nth(1) == Kind::RightParen {
            self.bump();
        } else if self.peek() != Kind::RightParen {
            loop {
                if self.eat(Kind::Ellipsis).is_some() {
                    signature.variadic = true;
                    break;
                }
                let param = self.parameter()?;
                signature.variadic |= param.pack;
                signature.params.push(param);
                if self.eat(Kind::Comma).is_none() {
                    signature.variadic |= self.eat(Kind::Ellipsis).is_some();
                    break;
                }
            }
        }
        self.expect(Kind::RightParen)?;

        loop {
            match self.peek() {
                Kind::Const => { self.bump(); signature.cv.const_ = true; }
                Kind::Volatile => { self.bump(); signature.cv.volatile = true; }
                Kind::Amp | Kind::AmpAmp if matches!(self.nth(1),
                    Kind::Semi | Kind::LeftBrace | Kind::Eq | Kind::Noexcept | Kind::Arrow | Kind::Const |
                    Kind::RightParen | Kind::Comma) => {
                    self.bump();
                }
                Kind::Noexcept => {
                    self.bump();
                    self.skip_balanced();
                }
                Kind::Throw if self.nth(1) == Kind::LeftParen => {
                    self.bump();
                    self.skip_balanced();
                }
                Kind::Identifier if self.is_identifier(self.names.final_) || self.is_identifier(self.names.override_) => {
                    self.bump();
                }
                Kind::Arrow => {
                    self.bump();
                    signature.trailing = Some(self.type_id()?);
                }
                _ if self.is_attribute() => { self.skip_attributes(); }
                _ => { break; }
            }
        }
        Ok(signature)
    }

    fn parameter(&mut self) -> Parsed<Param<'i>> {
        self.skip_attributes();
        let specifiers = self.decl_specifiers(Context::Parameter)?;
        let base = specifiers.ty.ok_or(Miss::NoMatch)?;
        let declarator = self.declarator(Abstract::Maybe)?;
        let ty = self.apply(base, &declarator.ops);
        let ty = self.adjust_parameter(ty);
        self.skip_attributes();

        let default = self.eat(Kind::Eq).is_some();
        if default { self.default_argument(); }
        let name = declarator.name.map(|name| (name.name, name.loc));
        Ok(Param { ty, name, default, pack: declarator.pack })
    }

    fn default_argument(&mut self) {
        let parsed = self.speculate(|p| {
            p.initializer_clause()?;
            if matches!(p.peek(), Kind::Comma | Kind::RightParen) || p.at_close_angle() { Ok(()) } else { Err(Miss::NoMatch) }
        });
        if parsed.is_ok() { return; }
        loop {
            match self.peek() {
                Kind::EndOfFile | Kind::Comma | Kind::RightParen => { return; }
                Kind::LeftParen | Kind::LeftBracket | Kind::LeftBrace => { self.skip_balanced(); }
                _ => { self.bump(); }
            }
        }
    }

    /// Array and function parameters are pointers.
    fn adjust_parameter(&mut self, ty: TypeId) -> TypeId {
        match *self.table.types.get(ty) {
            Type::Array(element, _) => { self.table.types.pointer(element) }
            Type::Function { .. } => { self.table.types.pointer(ty) }
            _ => { ty }
        }
    }

    /// Build the declared type from the specifiers' type and a declarator's operators.
    pub(super) fn apply(&mut self, base: TypeId, ops: &[Op<'i>]) -> TypeId {
        let mut ty = base;
        for op in ops {
            ty = match *op {
                Op::Pointer(cv) | Op::MemberPointer(cv) => {
                    let pointer = self.table.types.pointer(ty);
                    self.table.types.qualified(cv, pointer)
                }
                Op::LRef => { self.table.types.lvalue_ref(ty) }
                Op::RRef => { self.table.types.rvalue_ref(ty) }
                Op::Array(len) => { self.table.types.array(ty, len) }
                Op::Function(ref signature) => {
                    let ret = signature.trailing.unwrap_or(ty);
                    let params = signature.params.iter().filter(|param| !param.pack).map(|param| param.ty).collect();
                    self.table.types.function(ret, params, signature.variadic)
                }
            };
        }
        ty
    }

    pub(super) fn type_id(&mut self) -> Parsed<TypeId> {
        let specifiers = self.decl_specifiers(Context::Type)?;
        let base = specifiers.ty.ok_or(Miss::NoMatch)?;
        let declarator = self.declarator(Abstract::Only)?;
        Ok(self.apply(base, &declarator.ops))
    }

    pub(super) fn template_arguments(&mut self) -> Parsed<Vec<Arg>> {
        self.expect(Kind::Lt)?;
        let mut args = Vec::default();
        if self.close_angle() { return Ok(args); }
        loop {
            args.push(self.template_argument()?);
            self.eat(Kind::Ellipsis);
            if self.eat(Kind::Comma).is_none() { break; }
        }
        if !self.close_angle() { return Err(Miss::NoMatch); }
        Ok(args)
    }

    fn template_argument(&mut self) -> Parsed<Arg> {
        let ty = self.speculate(|p| {
            let ty = p.type_id()?;
            match p.peek() {
                Kind::Comma | Kind::Gt | Kind::GtGt | Kind::Ellipsis => { Ok(ty) }
                _ => { Err(Miss::NoMatch) }
            }
        });
        match ty {
            Ok(ty) => { return Ok(Arg::Type(ty)); }
            Err(Miss::NoMatch) => {}
            Err(fatal) => { return Err(fatal); }
        }
        let value = self.with_no_gt(true, Self::conditional)?;
        Ok(value.as_arg())
    }

    // Simple declarations

    pub(super) fn simple_declaration(&mut self, context: Context) -> Parsed<()> {
        self.skip_attributes();
        let specifiers = self.decl_specifiers(context)?;
        if self.peek() == Kind::Semi {
            if !specifiers.any { return Err(Miss::NoMatch); }
            self.bump();
            self.template = None;
            return Ok(());
        }

        loop {
            let declarator = self.declarator(Abstract::No)?;
            let name = match declarator.name {
                Some(ref name) => { name.clone() }
                None => { return Err(Miss::NoMatch); }
            };
            let function = declarator.function().is_some() && !specifiers.typedef;
            let scope = name.qualifier.unwrap_or_else(|| self.decl_scope());

            let base = match specifiers.ty {
                Some(ty) => { ty }
                None if function && name.kind == NameKind::Conversion => { name.ty.unwrap_or(TypeId::UNKNOWN) }
                None if function && name.kind == NameKind::Destructor => { TypeId::VOID }
                None if function && self.is_constructor_name(&name, scope) => { TypeId::VOID }
                None if self.language == Language::C && context == Context::File && (function || specifiers.any) => {
                    self.table.types.builtin(Builtin::Int)
                }
                None => { return Err(Miss::NoMatch); }
            };
            let ty = self.apply(base, &declarator.ops);
            self.skip_attributes();
            self.asm_label();

            let member = matches!(context, Context::Member(_));
            let definition = if function {
                match self.peek() {
                    Kind::LeftBrace | Kind::Try => { true }
                    Kind::Colon => { self.language == Language::Cpp }
                    Kind::Eq => { matches!(self.nth(1), Kind::Default | Kind::Delete) }
                    _ => { false }
                }
            } else {
                !specifiers.typedef
                    && !(specifiers.flags.contains(Flags::EXTERN) && self.peek() != Kind::Eq)
                    && !(member && specifiers.flags.contains(Flags::STATIC))
            };

            let id = self.declare(&specifiers, &name, ty, &declarator, definition);

            if function && definition && matches!(self.peek(), Kind::LeftBrace | Kind::Colon | Kind::Try) {
                let params = declarator.function().map_or_else(Vec::default, |signature| signature.params.clone());
                return self.function_body(context, id, params, name.rename);
            }
            if function {
                if self.eat(Kind::Eq).is_some() { self.bump(); }
            } else {
                self.initializer(id, &specifiers)?;
            }

            if self.eat(Kind::Comma).is_none() {
                self.expect(Kind::Semi)?;
                return Ok(());
            }
        }
    }

    /// `__asm__("symbol")` after a declarator.
    fn asm_label(&mut self) {
        if self.peek() == Kind::Asm && self.nth(1) == Kind::LeftParen {
            self.bump();
            self.skip_balanced();
            self.skip_attributes();
        }
    }

    fn is_constructor_name(&self, name: &Name<'i>, scope: ScopeId) -> bool {
        if name.kind != NameKind::Plain { return false; }
        let scope = self.table.scope(scope);
        scope.kind == ScopeKind::Class
            && scope.owner.map_or(false, |owner| self.table.decl(owner).name == Some(name.name))
    }

    fn enclosing_namespace(&self) -> ScopeId {
        let mut scope = self.scope;
        loop {
            let current = self.table.scope(scope);
            if matches!(current.kind, ScopeKind::Namespace | ScopeKind::Global) { return scope; }
            match current.parent {
                Some(parent) => { scope = parent; }
                None => { return scope; }
            }
        }
    }

    /// Map the arguments a class template was named with back to its own parameters.
    fn inverse(&mut self, rename: &Bindings) -> Bindings {
        let mut inverse = Bindings::default();
        for (&param, arg) in rename {
            let own = match self.table.decl(param).kind {
                DeclKind::ValueParam => { Arg::Param(param) }
                _ => { Arg::Type(self.table.types.intern(Type::Param(param))) }
            };
            match *arg {
                Arg::Param(renamed) => { inverse.insert(renamed, own); }
                Arg::Type(ty) => {
                    if let Type::Param(renamed) = *self.table.types.get(ty) { inverse.insert(renamed, own); }
                }
                Arg::Value(_) | Arg::Unknown => {}
            }
        }
        inverse
    }

    fn declare(
        &mut self, specifiers: &Specifiers, name: &Name<'i>, ty: TypeId, declarator: &Declarator<'i>,
        definition: bool,
    ) -> DeclId {
        let friend = specifiers.flags.contains(Flags::FRIEND);
        let scope = match name.qualifier {
            Some(scope) => { scope }
            None if friend => { self.enclosing_namespace() }
            None => { self.decl_scope() }
        };
        let in_class = self.table.scope(scope).kind == ScopeKind::Class;
        let signature = declarator.function().filter(|_| !specifiers.typedef);

        let kind = if specifiers.typedef {
            DeclKind::Typedef
        } else if signature.is_some() {
            match name.kind {
                NameKind::Destructor => { DeclKind::Destructor }
                _ if self.is_constructor_name(name, scope) => { DeclKind::Constructor }
                _ if in_class => { DeclKind::Method }
                _ => { DeclKind::Function }
            }
        } else if in_class && name.qualifier.is_none() && !specifiers.flags.contains(Flags::STATIC) {
            DeclKind::Field
        } else {
            DeclKind::Variable
        };

        let mut ty = ty;
        let mut header = self.template.take();
        if !name.rename.is_empty() {
            let inverse = self.inverse(&name.rename);
            ty = self.table.types.substitute(ty, &inverse);
            let member_template = name.candidates.iter().any(|&decl| self.table.decl(decl).template.is_some());
            if !member_template { header = None; }
        }

        let mut flags = specifiers.flags;
        if definition { flags.insert(Flags::DEFINITION); }
        if signature.map_or(false, |signature| signature.cv.const_) { flags.insert(Flags::CONST); }
        let mut decl = Decl::new(kind, Some(name.name), ty, scope, name.loc).with_flags(flags);
        decl.defaults = signature.map_or(0, |signature| {
            signature.params.iter().rev().take_while(|param| param.default).count()
        });
        match header {
            Some(header) if header.params.is_empty() => { decl.flags.insert(Flags::EXPLICIT_SPECIALIZATION); }
            Some(header) => {
                decl.template = Some(Box::new(Template { params: header.params, ..Template::default() }));
            }
            None => {}
        }

        let id = if friend {
            self.table.add_decl(decl)
        } else {
            let declared = self.table.declare(decl);
            if let Some(problem) = declared.problem {
                self.problem(problem, name.loc, name.name.as_str());
            }
            declared.id
        };

        if name.kind == NameKind::Conversion {
            if let Some(owner) = self.table.scope(scope).owner {
                self.table.decl_mut(owner).flags.insert(Flags::CONVERTIBLE);
            }
        }

        let entity = self.entity(id);
        self.emit(match kind {
            DeclKind::Typedef => { Event::Typedef(entity) }
            DeclKind::Field => { Event::Field(entity) }
            DeclKind::Variable => { Event::Variable(entity) }
            _ => { Event::Function(entity) }
        });
        trace!(name = %name.name, kind = kind.name(), decl = id.0, "declared");
        id
    }

    fn initializer(&mut self, id: DeclId, specifiers: &Specifiers) -> Parsed<()> {
        let value = match self.peek() {
            Kind::Eq => {
                self.bump();
                Some(self.initializer_clause()?)
            }
            Kind::LeftParen => {
                self.bump();
                let mut list = self.expression_list(Kind::RightParen)?;
                self.expect(Kind::RightParen)?;
                if list.len() == 1 { list.pop() } else { None }
            }
            Kind::LeftBrace => { Some(self.braced_init_list()?) }
            Kind::Colon => {
                self.bump();
                self.with_no_gt(false, Self::conditional)?;
                None
            }
            _ => { None }
        };

        let value = match value {
            Some(value) => { value }
            None => { return Ok(()); }
        };
        if specifiers.auto && self.table.decl(id).ty == TypeId::UNKNOWN {
            let ty = self.table.types.strip_references(value.ty);
            let (_, ty) = self.table.types.unqualified(ty);
            let ty = self.table.types.decay(ty);
            let ty = self.table.types.qualified(specifiers.cv, ty);
            self.table.decl_mut(id).ty = ty;
        }
        if specifiers.cv.const_ || specifiers.constexpr {
            if let Some(constant) = value.value { self.table.decl_mut(id).value = Some(constant); }
        }
        Ok(())
    }

    // Function bodies

    fn function_body(&mut self, context: Context, id: DeclId, params: Vec<Param<'i>>, rename: Bindings) -> Parsed<()> {
        if let Context::Member(_) = context {
            let start = self.pos;
            self.skip_function_body()?;
            self.deferred.push(Deferred { decl: id, params, start });
            return Ok(());
        }
        self.body(id, params, &rename)
    }

    /// Skip a function body by brace matching, with its member initializers and handlers.
    fn skip_function_body(&mut self) -> Parsed<()> {
        let handlers = self.eat(Kind::Try).is_some();
        if self.eat(Kind::Colon).is_some() {
            let mut prev = Kind::Colon;
            loop {
                match self.peek() {
                    Kind::EndOfFile => { return Err(Miss::NoMatch); }
                    Kind::LeftBrace if !matches!(prev, Kind::Identifier | Kind::Gt | Kind::GtGt) => { break; }
                    Kind::LeftParen | Kind::LeftBrace => {
                        self.skip_balanced();
                        prev = Kind::RightParen;
                    }
                    kind => {
                        self.bump();
                        prev = kind;
                    }
                }
            }
        }
        if self.peek() != Kind::LeftBrace { return Err(Miss::NoMatch); }
        self.skip_balanced();
        if handlers {
            while self.eat(Kind::Catch).is_some() {
                self.skip_balanced();
                self.skip_balanced();
            }
        }
        Ok(())
    }

    /// Parse the body of function `id` in a new function scope.
    pub(super) fn body(&mut self, id: DeclId, mut params: Vec<Param<'i>>, rename: &Bindings) -> Parsed<()> {
        if self.mode == Mode::Structural { return self.skip_function_body(); }

        let decl_scope = self.table.decl(id).scope;
        let mut parent = self.scope;
        if decl_scope != self.decl_scope() && !self.table.decl(id).flags.contains(Flags::FRIEND) {
            parent = decl_scope;
            if !rename.is_empty() {
                parent = self.rebind_template_params(parent, rename);
                let inverse = self.inverse(rename);
                for param in &mut params { param.ty = self.table.types.substitute(param.ty, &inverse); }
            }
        }

        let scope = self.table.push_scope(ScopeKind::Function, Some(parent), Some(id));
        self.table.decl_mut(id).inner = Some(scope);
        let this = self.this_type(id);
        let outer_scope = mem::replace(&mut self.scope, scope);
        let outer_this = mem::replace(&mut self.this, this);
        let outer_template = self.template.take();

        for param in &params {
            if let Some((name, loc)) = param.name { self.declare_parameter(param.ty, name, loc); }
        }
        self.emit(Event::EnterFunctionBody(self.entity(id)));
        let result = self.function_block(scope);
        self.emit(Event::ExitFunctionBody);

        self.scope = outer_scope;
        self.this = outer_this;
        self.template = outer_template;
        result
    }

    /// Make the template parameter names of an out-of-line member definition's header name the
    /// class template's own parameters.
    fn rebind_template_params(&mut self, parent: ScopeId, rename: &Bindings) -> ScopeId {
        let scope = self.table.push_scope(ScopeKind::Template, Some(parent), None);
        for (&param, arg) in rename {
            let renamed = match *arg {
                Arg::Param(renamed) => { Some(renamed) }
                Arg::Type(ty) => match *self.table.types.get(ty) {
                    Type::Param(renamed) => { Some(renamed) }
                    _ => { None }
                }
                Arg::Value(_) | Arg::Unknown => { None }
            };
            if let Some(name) = renamed.and_then(|renamed| self.table.decl(renamed).name) {
                self.table.bind(scope, name, param);
            }
        }
        scope
    }

    fn function_block(&mut self, scope: ScopeId) -> Parsed<()> {
        let handlers = self.eat(Kind::Try).is_some();
        if self.peek() == Kind::Colon {
            match self.mem_initializers() {
                Ok(()) => {}
                Err(Miss::NoMatch) => {
                    let token = self.peek_token();
                    self.problem(ProblemKind::Syntax, token.loc(), "malformed member initializer");
                    loop {
                        match self.peek() {
                            Kind::EndOfFile | Kind::LeftBrace => { break; }
                            Kind::LeftParen => { self.skip_balanced(); }
                            _ => { self.bump(); }
                        }
                    }
                }
                Err(fatal) => { return Err(fatal); }
            }
        }

        let open = self.expect(Kind::LeftBrace)?;
        self.sequence(Kind::RightBrace, Self::statement)?;
        let close = self.close_brace();
        self.extent(scope, open.loc(), close);
        if handlers {
            while self.peek() == Kind::Catch { self.handler()?; }
        }
        Ok(())
    }

    fn mem_initializers(&mut self) -> Parsed<()> {
        self.expect(Kind::Colon)?;
        loop {
            let name = self.id_expression()?;
            match name.candidates.first() {
                Some(&decl) => { self.reference(name.loc, name.name, decl); }
                None if !name.dependent && !name.unresolved => { self.undeclared(name.name, name.loc); }
                None => {}
            }
            match self.peek() {
                Kind::LeftParen => {
                    self.bump();
                    self.expression_list(Kind::RightParen)?;
                    self.expect(Kind::RightParen)?;
                }
                Kind::LeftBrace => { self.braced_init_list()?; }
                _ => { return Err(Miss::NoMatch); }
            }
            self.eat(Kind::Ellipsis);
            if self.eat(Kind::Comma).is_none() { return Ok(()); }
        }
    }

    /// The type of `this` in the body of `id`, with its constness.
    fn this_type(&mut self, id: DeclId) -> Option<(TypeId, bool)> {
        let decl = self.table.decl(id);
        let member = matches!(decl.kind, DeclKind::Method | DeclKind::Constructor | DeclKind::Destructor);
        if !member || decl.flags.contains(Flags::STATIC) { return None; }
        let const_ = decl.flags.contains(Flags::CONST);
        let class = self.table.scope(decl.scope).owner?;

        let ty = if self.table.decl(class).template.is_some() && self.table.decl(class).kind.is_class() {
            let params = self.table.template_params(class);
            let args = params.iter().map(|param| self.param_arg(param)).collect();
            let template = self.table.canonical(class);
            self.table.types.intern(Type::Specialization(template, args))
        } else {
            self.table.type_of_name(class)?
        };
        Some((ty, const_))
    }

    // Classes

    fn class_specifier(&mut self, friend: bool) -> Parsed<TypeId> {
        let key = self.bump();
        let kind = match key.kind() {
            Kind::Class => { DeclKind::Class }
            Kind::Struct => { DeclKind::Struct }
            _ => { DeclKind::Union }
        };
        self.skip_attributes();

        let named = match self.peek() {
            Kind::Identifier => {
                !(self.is_identifier(self.names.final_) && matches!(self.nth(1), Kind::LeftBrace | Kind::Colon))
            }
            Kind::ColonColon => { true }
            _ => { false }
        };
        let name = if named { Some(self.id_expression()?) } else { None };
        if self.is_identifier(self.names.final_) && matches!(self.nth(1), Kind::LeftBrace | Kind::Colon) {
            self.bump();
        }
        self.skip_attributes();

        let definition = match self.peek() {
            Kind::LeftBrace => { true }
            Kind::Colon => { self.language == Language::Cpp && name.is_some() }
            _ => { false }
        };
        match name {
            Some(name) if !definition => { self.elaborated(kind, name, friend) }
            None if !definition => { Err(Miss::NoMatch) }
            name => { self.class_definition(kind, key.loc(), name) }
        }
    }

    /// `struct S` without a body: a use, or a declaration if `S` is new.
    fn elaborated(&mut self, kind: DeclKind, name: Name<'i>, friend: bool) -> Parsed<TypeId> {
        if name.dependent { return Ok(TypeId::DEPENDENT); }
        if name.unresolved { return Ok(TypeId::UNKNOWN); }
        if name.args.is_some() && self.template.is_some() {
            // A forward declaration of a specialization.
            self.template = None;
            return Ok(TypeId::UNKNOWN);
        }

        let existing = name.candidates.iter().copied().find(|&decl| {
            let kind = self.table.decl(decl).kind;
            kind.is_class() || kind == DeclKind::Enum
        });
        if let Some(decl) = existing {
            self.template = None;
            self.reference(name.loc, name.name, decl);
            return self.named_type(decl, name.args, name.loc);
        }
        if name.is_qualified() {
            self.undeclared(name.name, name.loc);
            return Ok(TypeId::UNKNOWN);
        }

        let scope = if friend { self.enclosing_namespace() } else { self.decl_scope() };
        let mut decl = Decl::new(kind, Some(name.name), TypeId::UNKNOWN, scope, name.loc);
        if let Some(header) = self.template.take() {
            if !header.params.is_empty() {
                decl.template = Some(Box::new(Template { params: header.params, ..Template::default() }));
            }
        }
        let declared = self.table.declare(decl);
        Ok(self.table.type_of_name(declared.id).unwrap_or(TypeId::UNKNOWN))
    }

    fn class_definition(&mut self, kind: DeclKind, loc: Loc, name: Option<Name<'i>>) -> Parsed<TypeId> {
        let header = self.template.take();
        let parent = name.as_ref().and_then(|name| name.qualifier).unwrap_or(self.scope);

        let id = match name {
            Some(ref name) => {
                let template = name.candidates.iter().copied().find(|&decl| self.table.is_template(decl));
                match (template, header) {
                    (Some(template), Some(header)) if name.args.is_some() => {
                        self.specialization(kind, name, template, header)
                    }
                    (_, header) => {
                        let scope = name.qualifier.unwrap_or_else(|| self.decl_scope());
                        let mut decl = Decl::new(kind, Some(name.name), TypeId::UNKNOWN, scope, name.loc)
                            .with_flags(Flags::DEFINITION);
                        if let Some(header) = header.filter(|header| !header.params.is_empty()) {
                            decl.template = Some(Box::new(Template { params: header.params, ..Template::default() }));
                        }
                        let declared = self.table.declare(decl);
                        if let Some(problem) = declared.problem {
                            self.problem(problem, name.loc, name.name.as_str());
                        }
                        declared.id
                    }
                }
            }
            None => {
                let decl = Decl::new(kind, None, TypeId::UNKNOWN, self.decl_scope(), loc).with_flags(Flags::DEFINITION);
                self.table.add_decl(decl)
            }
        };

        let scope = self.table.push_scope(ScopeKind::Class, Some(parent), Some(id));
        self.table.decl_mut(id).inner = Some(scope);
        if self.peek() == Kind::Colon { self.base_clause(id)?; }

        let open = self.expect(Kind::LeftBrace)?;
        self.emit(Event::EnterClassSpecifier(self.entity(id)));
        let outer = mem::replace(&mut self.scope, scope);
        let from = self.deferred.len();
        let result = self.sequence(Kind::RightBrace, |p| p.member_declaration(id));
        if let Err(failure) = result {
            self.scope = outer;
            return Err(failure.into());
        }
        let close = self.close_brace();
        self.table.decl_mut(id).flags.insert(Flags::COMPLETE);
        self.scope = outer;

        // Member function bodies see the complete class, including members of enclosing classes.
        if self.table.scope(self.decl_scope()).kind != ScopeKind::Class {
            self.deferred_bodies(from)?;
        }
        self.extent(scope, open.loc(), close);
        self.emit(Event::ExitClassSpecifier);

        let anonymous = self.table.decl(id).name.is_none();
        if anonymous && self.peek() == Kind::Semi {
            let members: Vec<(Symbol<'i, Kind>, DeclId)> = self.table.bindings(scope)
                .flat_map(|(name, ids)| ids.iter().map(move |&id| (name, id)))
                .collect();
            let enclosing = self.decl_scope();
            for (name, member) in members { self.table.bind(enclosing, name, member); }
        }
        Ok(self.table.type_of_name(id).unwrap_or(TypeId::UNKNOWN))
    }

    /// A partial or explicit specialization of a class template.
    fn specialization(&mut self, kind: DeclKind, name: &Name<'i>, template: DeclId, header: TemplateHeader) -> DeclId {
        let template = self.table.canonical(template);
        let args = name.args.clone().unwrap_or_default();
        let args = match self.table.complete_args(template, args.clone()) {
            Ok(args) => { args }
            Err(problem) => {
                self.problem(problem, name.loc, name.name.as_str());
                args
            }
        };
        let scope = name.qualifier.unwrap_or_else(|| self.decl_scope());
        let mut decl = Decl::new(kind, Some(name.name), TypeId::UNKNOWN, scope, name.loc).with_flags(Flags::DEFINITION);

        if header.params.is_empty() {
            decl.flags.insert(Flags::EXPLICIT_SPECIALIZATION);
            decl.instance_of = Some((template, args.clone()));
            let id = self.table.add_decl(decl);
            if let Some(problem) = self.table.add_explicit_specialization(template, args, id) {
                self.problem(problem, name.loc, name.name.as_str());
            }
            trace!(template = template.0, spec = id.0, "explicit specialization");
            id
        } else {
            decl.template = Some(Box::new(Template {
                params: header.params,
                specializations: Vec::default(),
                pattern: Some(args),
            }));
            let id = self.table.add_decl(decl);
            self.table.add_partial_specialization(template, id);
            trace!(template = template.0, spec = id.0, "partial specialization");
            id
        }
    }

    fn base_clause(&mut self, class: DeclId) -> Parsed<()> {
        self.expect(Kind::Colon)?;
        loop {
            while matches!(self.peek(), Kind::Public | Kind::Private | Kind::Protected | Kind::Virtual) {
                self.bump();
            }
            let fatal = self.depth == 0;
            match self.speculate(|p| p.type_name(true, fatal)) {
                Ok(ty) => { self.table.decl_mut(class).bases.push(ty); }
                Err(Miss::NoMatch) => {
                    let token = self.peek_token();
                    if token.kind() == Kind::Identifier { self.undeclared(token.spelling(), token.loc()); }
                    while !matches!(self.peek(), Kind::Comma | Kind::LeftBrace | Kind::EndOfFile) {
                        if self.peek() == Kind::LeftParen { self.skip_balanced(); } else { self.bump(); }
                    }
                }
                Err(fatal) => { return Err(fatal); }
            }
            self.eat(Kind::Ellipsis);
            if self.eat(Kind::Comma).is_none() { return Ok(()); }
        }
    }

    fn deferred_bodies(&mut self, from: usize) -> Result<(), Failure> {
        if from >= self.deferred.len() { return Ok(()); }
        let resume = self.position();
        let outer = self.scope;
        for Deferred { decl, params, start } in self.deferred.split_off(from) {
            self.pos = start;
            self.half = false;
            self.scope = self.table.decl(decl).scope;
            match self.body(decl, params, &Bindings::default()) {
                Ok(()) | Err(Miss::NoMatch) => {}
                Err(Miss::Fatal(failure)) => {
                    self.scope = outer;
                    return Err(failure);
                }
            }
        }
        self.scope = outer;
        self.pos = resume.0;
        self.half = resume.1;
        Ok(())
    }

    fn member_declaration(&mut self, class: DeclId) -> Parsed<()> {
        match self.peek() {
            Kind::Public | Kind::Private | Kind::Protected => {
                self.bump();
                self.expect(Kind::Colon)?;
                Ok(())
            }
            Kind::Using => { self.using() }
            Kind::Template => { self.template_declaration(Context::Member(class)) }
            Kind::StaticAssert => { self.static_assert() }
            Kind::Semi => { self.bump(); Ok(()) }
            Kind::Identifier if self.is_identifier(self.names.extension) => {
                self.bump();
                self.member_declaration(class)
            }
            _ => { self.simple_declaration(Context::Member(class)) }
        }
    }

    // Enumerations

    fn enum_specifier(&mut self) -> Parsed<TypeId> {
        self.bump();
        let scoped = matches!(self.peek(), Kind::Class | Kind::Struct);
        if scoped { self.bump(); }
        self.skip_attributes();
        let name = match self.peek() {
            Kind::Identifier | Kind::ColonColon => { Some(self.id_expression()?) }
            _ => { None }
        };
        let underlying = self.peek() == Kind::Colon && self.language == Language::Cpp;
        if underlying {
            self.bump();
            self.type_id()?;
        }

        if self.peek() != Kind::LeftBrace {
            let name = name.ok_or(Miss::NoMatch)?;
            let existing = name.candidates.iter().copied().find(|&decl| self.table.decl(decl).kind == DeclKind::Enum);
            if let Some(decl) = existing {
                self.reference(name.loc, name.name, decl);
                return Ok(self.table.type_of_name(decl).unwrap_or(TypeId::UNKNOWN));
            }
            if (scoped || underlying) && self.peek() == Kind::Semi && !name.is_qualified() {
                let mut decl = Decl::new(DeclKind::Enum, Some(name.name), TypeId::UNKNOWN, self.decl_scope(), name.loc);
                if scoped { decl.flags.insert(Flags::SCOPED); }
                let declared = self.table.declare(decl);
                return Ok(self.table.type_of_name(declared.id).unwrap_or(TypeId::UNKNOWN));
            }
            self.undeclared(name.name, name.loc);
            return Ok(TypeId::UNKNOWN);
        }

        let enclosing = self.decl_scope();
        let mut flags = Flags::DEFINITION;
        if scoped { flags.insert(Flags::SCOPED); }
        let id = match name {
            Some(ref name) => {
                let scope = name.qualifier.unwrap_or(enclosing);
                let decl = Decl::new(DeclKind::Enum, Some(name.name), TypeId::UNKNOWN, scope, name.loc).with_flags(flags);
                let declared = self.table.declare(decl);
                if let Some(problem) = declared.problem {
                    self.problem(problem, name.loc, name.name.as_str());
                }
                declared.id
            }
            None => {
                let loc = self.peek_token().loc();
                self.table.add_decl(Decl::new(DeclKind::Enum, None, TypeId::UNKNOWN, enclosing, loc).with_flags(flags))
            }
        };
        self.emit(Event::Enumeration(self.entity(id)));

        let inner = self.table.push_scope(ScopeKind::Enum, Some(self.scope), Some(id));
        self.table.decl_mut(id).inner = Some(inner);
        let ty = self.table.type_of_name(id).unwrap_or(TypeId::UNKNOWN);
        let outer = mem::replace(&mut self.scope, inner);
        let result = self.enumerators(ty, scoped, enclosing);
        self.scope = outer;
        let (open, close) = result?;
        self.extent(inner, open, close);
        Ok(ty)
    }

    /// The braced enumerator list, with the locations of its braces.
    fn enumerators(&mut self, ty: TypeId, scoped: bool, enclosing: ScopeId) -> Parsed<(Loc, Loc)> {
        let open = self.expect(Kind::LeftBrace)?;
        let mut next = 0i64;
        while self.peek() != Kind::RightBrace {
            let token = self.expect(Kind::Identifier)?;
            self.skip_attributes();
            if self.eat(Kind::Eq).is_some() {
                let value = self.with_no_gt(false, Self::conditional)?;
                if let Some(value) = value.value { next = value; }
            }

            let name = token.spelling();
            let mut decl = Decl::new(DeclKind::Enumerator, Some(name), ty, self.scope, token.loc())
                .with_flags(Flags::DEFINITION);
            decl.value = Some(next);
            let id = self.table.add_decl(decl);
            self.table.bind(self.scope, name, id);
            if !scoped { self.table.bind(enclosing, name, id); }
            self.emit(Event::Enumerator(self.entity(id)));
            next = next.wrapping_add(1);

            if self.eat(Kind::Comma).is_none() { break; }
        }
        let close = self.close_brace();
        Ok((open.loc(), close))
    }

    // Namespaces

    pub(super) fn namespace_definition(&mut self) -> Parsed<()> {
        let inline = self.eat(Kind::Inline).is_some();
        let key = self.expect(Kind::Namespace)?;
        self.skip_attributes();
        if self.peek() == Kind::Identifier && self.nth(1) == Kind::Eq {
            return self.namespace_alias();
        }

        let mut names = Vec::default();
        while let Some(token) = self.eat(Kind::Identifier) {
            names.push(token);
            if self.eat(Kind::ColonColon).is_none() { break; }
            self.eat(Kind::Inline);
        }
        self.skip_attributes();
        let open = self.expect(Kind::LeftBrace)?;

        let outer = self.scope;
        let mut opened = Vec::default();
        if names.is_empty() {
            opened.push(self.open_namespace(None, key.loc(), inline));
        }
        for token in names {
            opened.push(self.open_namespace(Some(token.spelling()), token.loc(), inline));
        }

        let result = self.sequence(Kind::RightBrace, Self::declaration);
        if let Err(failure) = result {
            self.scope = outer;
            return Err(failure.into());
        }
        let close = self.close_brace();
        for &id in opened.iter().rev() {
            if let Some(inner) = self.table.decl(id).inner {
                if self.table.scope(inner).extent.is_none() { self.extent(inner, open.loc(), close); }
            }
            self.emit(Event::ExitNamespace);
        }
        self.scope = outer;
        Ok(())
    }

    /// Enter namespace `name` in the current scope, reopening it if it exists.
    fn open_namespace(&mut self, name: Option<Symbol<'i, Kind>>, loc: Loc, inline: bool) -> DeclId {
        let existing = match name {
            Some(name) => {
                self.table.local(self.scope, name).iter().copied()
                    .find(|&decl| self.table.decl(decl).kind == DeclKind::Namespace)
            }
            None => {
                let scope = self.scope;
                self.table.decls()
                    .find(|(_, decl)| decl.kind == DeclKind::Namespace && decl.name.is_none() && decl.scope == scope)
                    .map(|(id, _)| id)
            }
        };

        let id = match existing {
            Some(id) => { id }
            None => {
                let decl = Decl::new(DeclKind::Namespace, name, TypeId::UNKNOWN, self.scope, loc).with_flags(Flags::DEFINITION);
                let declared = self.table.declare(decl);
                if let Some(problem) = declared.problem {
                    self.problem(problem, loc, name.map_or("", |name| name.as_str()));
                }
                let inner = self.table.push_scope(ScopeKind::Namespace, Some(self.scope), Some(declared.id));
                self.table.decl_mut(declared.id).inner = Some(inner);
                if name.is_none() || inline { self.table.add_directive(self.scope, inner); }
                declared.id
            }
        };

        self.emit(Event::EnterNamespace(self.entity(id)));
        if let Some(inner) = self.table.decl(id).inner { self.scope = inner; }
        id
    }

    fn namespace_alias(&mut self) -> Parsed<()> {
        let token = self.bump();
        self.bump();
        let target = self.id_expression()?;
        let namespace = target.candidates.iter().copied()
            .find(|&decl| matches!(self.table.decl(decl).kind, DeclKind::Namespace | DeclKind::NamespaceAlias));
        match namespace {
            Some(namespace) => { self.reference(target.loc, target.name, namespace); }
            None => { self.undeclared(target.name, target.loc); }
        }
        let namespace = namespace.map(|namespace| match self.table.decl(namespace).kind {
            DeclKind::NamespaceAlias => { self.table.decl(namespace).target.unwrap_or(namespace) }
            _ => { namespace }
        });

        let mut decl = Decl::new(DeclKind::NamespaceAlias, Some(token.spelling()), TypeId::UNKNOWN, self.decl_scope(), token.loc())
            .with_flags(Flags::DEFINITION);
        decl.target = namespace;
        let declared = self.table.declare(decl);
        if let Some(problem) = declared.problem {
            self.problem(problem, token.loc(), token.spelling().as_str());
        }
        self.expect(Kind::Semi)?;
        Ok(())
    }

    /// Using-directives, alias declarations and using-declarations.
    pub(super) fn using(&mut self) -> Parsed<()> {
        let key = self.expect(Kind::Using)?;
        if self.eat(Kind::Namespace).is_some() {
            let name = self.id_expression()?;
            let namespace = name.candidates.iter().copied()
                .find(|&decl| matches!(self.table.decl(decl).kind, DeclKind::Namespace | DeclKind::NamespaceAlias));
            match namespace {
                Some(namespace) => {
                    self.reference(name.loc, name.name, namespace);
                    if let Some(scope) = self.table.members_scope(namespace) {
                        self.table.add_directive(self.scope, scope);
                    }
                }
                None => { self.undeclared(name.name, name.loc); }
            }
            self.emit(Event::UsingDirective { namespace, loc: key.loc() });
            self.expect(Kind::Semi)?;
            return Ok(());
        }

        if self.peek() == Kind::Identifier && (self.nth(1) == Kind::Eq || self.nth(1) == Kind::LeftBracket) {
            let token = self.bump();
            self.skip_attributes();
            self.expect(Kind::Eq)?;
            let ty = self.type_id()?;
            let mut decl = Decl::new(DeclKind::Typedef, Some(token.spelling()), ty, self.decl_scope(), token.loc())
                .with_flags(Flags::DEFINITION);
            if let Some(header) = self.template.take().filter(|header| !header.params.is_empty()) {
                decl.template = Some(Box::new(Template { params: header.params, ..Template::default() }));
            }
            let declared = self.table.declare(decl);
            if let Some(problem) = declared.problem {
                self.problem(problem, token.loc(), token.spelling().as_str());
            }
            self.emit(Event::Typedef(self.entity(declared.id)));
            self.expect(Kind::Semi)?;
            return Ok(());
        }

        self.eat(Kind::Typename);
        let name = self.id_expression()?;
        let targets = name.candidates.clone();
        match targets.first() {
            Some(&first) => { self.reference(name.loc, name.name, first); }
            None if !name.dependent => { self.undeclared(name.name, name.loc); }
            None => {}
        }
        let scope = self.decl_scope();
        for &target in &targets {
            if !self.table.local(scope, name.name).contains(&target) {
                self.table.bind(scope, name.name, target);
            }
        }
        self.emit(Event::UsingDeclaration { name: name.name, targets, loc: name.loc });
        self.expect(Kind::Semi)?;
        Ok(())
    }

    // Templates

    fn template_declaration(&mut self, context: Context) -> Parsed<()> {
        let key = self.expect(Kind::Template)?;
        if self.peek() != Kind::Lt { return self.explicit_instantiation(); }

        let scope = self.table.push_scope(ScopeKind::Template, Some(self.scope), None);
        let outer = mem::replace(&mut self.scope, scope);
        let outer_template = self.template.take();
        let params = match self.template_parameters() {
            Ok(params) => { params }
            Err(miss) => {
                self.scope = outer;
                self.template = outer_template;
                return Err(miss);
            }
        };

        let specialization = params.is_empty();
        self.emit(if specialization {
            Event::EnterTemplateSpecialization(key.loc())
        } else {
            Event::EnterTemplateDeclaration(key.loc())
        });
        self.template = Some(TemplateHeader { params });

        let start = self.position();
        let result = match context {
            Context::Member(class) => { self.member_declaration(class) }
            _ => { self.declaration() }
        };
        let result = match result {
            Err(Miss::NoMatch) => { self.recover(start); Ok(()) }
            result => { result }
        };

        self.template = outer_template;
        self.scope = outer;
        self.emit(if specialization { Event::ExitTemplateSpecialization } else { Event::ExitTemplateDeclaration });
        result
    }

    fn template_parameters(&mut self) -> Parsed<Vec<TemplateParam>> {
        self.expect(Kind::Lt)?;
        let mut params = Vec::default();
        if self.close_angle() { return Ok(params); }
        loop {
            params.push(self.template_parameter()?);
            if self.eat(Kind::Comma).is_none() { break; }
        }
        if !self.close_angle() { return Err(Miss::NoMatch); }
        Ok(params)
    }

    fn template_parameter(&mut self) -> Parsed<TemplateParam> {
        match self.peek() {
            Kind::Template => {
                self.bump();
                self.scoped(ScopeKind::Template, Self::template_parameters)?;
                if !matches!(self.peek(), Kind::Class | Kind::Typename) { return Err(Miss::NoMatch); }
                self.bump();
                self.type_parameter()
            }
            Kind::Class | Kind::Typename
                if matches!(self.nth(1), Kind::Identifier | Kind::Comma | Kind::Gt | Kind::GtGt | Kind::Eq | Kind::Ellipsis) =>
            {
                self.bump();
                self.type_parameter()
            }
            _ => {
                let specifiers = self.decl_specifiers(Context::Parameter)?;
                let base = specifiers.ty.ok_or(Miss::NoMatch)?;
                let declarator = self.with_no_gt(true, |p| p.declarator(Abstract::Maybe))?;
                let ty = self.apply(base, &declarator.ops);
                let (name, loc) = match declarator.name {
                    Some(ref name) => { (Some(name.name), name.loc) }
                    None => { (None, declarator.loc) }
                };
                let id = self.table.add_decl(Decl::new(DeclKind::ValueParam, name, ty, self.scope, loc).with_flags(Flags::DEFINITION));
                if let Some(name) = name { self.table.bind(self.scope, name, id); }
                let default = match self.eat(Kind::Eq) {
                    Some(_) => { Some(self.with_no_gt(true, Self::conditional)?.as_arg()) }
                    None => { None }
                };
                Ok(TemplateParam { decl: id, default, pack: declarator.pack })
            }
        }
    }

    fn type_parameter(&mut self) -> Parsed<TemplateParam> {
        let pack = self.eat(Kind::Ellipsis).is_some();
        let name: Option<Token<'i>> = self.eat(Kind::Identifier);
        let loc = match name {
            Some(token) => { token.loc() }
            None => { self.peek_token().loc() }
        };
        let spelling = name.map(|token| token.spelling());
        let id = self.table.add_decl(Decl::new(DeclKind::TypeParam, spelling, TypeId::UNKNOWN, self.scope, loc).with_flags(Flags::DEFINITION));
        if let Some(spelling) = spelling { self.table.bind(self.scope, spelling, id); }
        let default = match self.eat(Kind::Eq) {
            Some(_) => { Some(Arg::Type(self.type_id()?)) }
            None => { None }
        };
        Ok(TemplateParam { decl: id, default, pack })
    }

    /// `template class A<int>;` instantiates eagerly. Other explicit instantiations are skipped.
    fn explicit_instantiation(&mut self) -> Parsed<()> {
        if !matches!(self.peek(), Kind::Class | Kind::Struct | Kind::Union) {
            self.skip_to_end();
            return Ok(());
        }
        self.bump();
        let name = self.id_expression()?;
        let template = name.candidates.iter().copied().find(|&decl| self.table.is_template(decl));
        if let Some(template) = template {
            self.reference(name.loc, name.name, template);
            let ty = self.named_type(template, name.args, name.loc)?;
            self.table.resolve_type(ty, name.loc)?;
        }
        self.expect(Kind::Semi)?;
        Ok(())
    }

    // Other declarations

    fn linkage_specification(&mut self) -> Parsed<()> {
        let key = self.bump();
        let literal = self.bump();
        let linkage = literal.spelling().as_str().trim_matches('"').to_owned();
        self.emit(Event::EnterLinkage(linkage, key.loc()));

        let result = if self.eat(Kind::LeftBrace).is_some() {
            match self.sequence(Kind::RightBrace, Self::declaration) {
                Ok(()) => { self.close_brace(); Ok(()) }
                Err(failure) => { Err(failure.into()) }
            }
        } else {
            let start = self.position();
            match self.declaration() {
                Err(Miss::NoMatch) => { self.recover(start); Ok(()) }
                result => { result }
            }
        };
        self.emit(Event::ExitLinkage);
        result
    }

    pub(super) fn static_assert(&mut self) -> Parsed<()> {
        self.bump();
        self.expect(Kind::LeftParen)?;
        self.with_no_gt(false, Self::assignment)?;
        if self.eat(Kind::Comma).is_some() {
            while self.eat(Kind::String).is_some() {}
        }
        self.expect(Kind::RightParen)?;
        self.expect(Kind::Semi)?;
        Ok(())
    }

    pub(super) fn asm_declaration(&mut self) -> Parsed<()> {
        let key = self.bump();
        while matches!(self.peek(), Kind::Volatile | Kind::Goto | Kind::Inline) { self.bump(); }
        self.expect(Kind::LeftParen)?;

        let mut text = String::default();
        while let Some(token) = self.eat(Kind::String) {
            let literal = token.spelling().as_str();
            let contents = literal.strip_prefix('"').and_then(|literal| literal.strip_suffix('"')).unwrap_or(literal);
            text.push_str(contents);
        }
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Kind::EndOfFile => { return Err(Miss::NoMatch); }
                Kind::LeftParen => { depth += 1; }
                Kind::RightParen if depth == 0 => { break; }
                Kind::RightParen => { depth -= 1; }
                _ => {}
            }
            self.bump();
        }
        self.expect(Kind::RightParen)?;
        self.emit(Event::Asm(text, key.loc()));
        self.expect(Kind::Semi)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::ast::{Event, Events, Tree};
    use crate::config::{Config, Memory};
    use crate::error::ProblemKind;
    use crate::scope::{DeclKind, Flags};
    use crate::symbols::SymbolMap;
    use crate::types::{Arg, Builtin, Type};

    fn tree(config: &Config, text: &str) -> String {
        let symbols = SymbolMap::default();
        let mut tree = Tree::default();
        crate::parse::parse(&symbols, config, &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut tree)
            .unwrap();
        tree.finish().to_string()
    }

    #[test]
    fn declarator_types() {
        let symbols = SymbolMap::default();
        let text = "int *a[3]; int (*b)[3]; int (*c)(int, char); const char *const d = 0; unsigned long long e;";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let ty = |name: &str| unit.display_type(unit.table.decl(unit.lookup(name)[0]).ty);
        assert_eq!(ty("a"), "int * [3]");
        assert_eq!(ty("b"), "int [3] *");
        assert_eq!(ty("e"), "unsigned long long");
        assert_eq!(unit.table.decl(unit.lookup("c")[0]).kind, DeclKind::Variable);
        let d = unit.table.decl(unit.lookup("d")[0]).ty;
        assert!(matches!(*unit.table.types.get(d), Type::Qualified(cv, _) if cv.const_));
    }

    #[test]
    fn members_and_special_functions() {
        let text = "class A { public: A(); ~A(); operator bool() const; static int n; int m; };";
        assert_eq!(tree(&Config::cpp(), text), "\
translation unit a.cc
  class A
    constructor A
    destructor ~A
    method operator bool
    variable n
    field m
");
    }

    #[test]
    fn out_of_line_definitions() {
        let symbols = SymbolMap::default();
        let text = "namespace N { struct S { void f(); static int n; }; }\n\
                    void N::S::f() { n = 1; }\n\
                    int N::S::n = 0;";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let f = unit.lookup("N::S::f")[0];
        assert!(unit.table.definition(f).is_some());
        let n = unit.lookup("N::S::n")[0];
        assert_eq!(unit.references_to(n).len(), 1);
    }

    #[test]
    fn enumerators() {
        let symbols = SymbolMap::default();
        let text = "enum E { A, B = 5, C }; enum class F : int { A = 2 }; int x = C;";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert_eq!(unit.table.decl(unit.lookup("C")[0]).value, Some(6));
        assert_eq!(unit.table.decl(unit.lookup("F::A")[0]).value, Some(2));
        assert_eq!(unit.table.decl(unit.lookup("A")[0]).value, Some(0));
        let f = unit.lookup("F")[0];
        assert!(unit.table.decl(f).flags.contains(Flags::SCOPED));
    }

    #[test]
    fn namespaces_reopen() {
        let symbols = SymbolMap::default();
        let mut events = Events::default();
        let text = "namespace N { int a; } namespace N { int b; } namespace { int c; } inline namespace v1 { int d; }\n\
                    int e = a;";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut events)
            .unwrap();
        assert_eq!(unit.lookup("N").len(), 1);
        assert_eq!(unit.lookup("N::b").len(), 1);
        assert_eq!(unit.lookup("c").len(), 1);
        assert_eq!(unit.lookup("d").len(), 1);
        assert!(unit.problems.iter().any(|problem| problem.kind == ProblemKind::Undeclared));
        let entered = events.events.iter().filter(|event| matches!(event, Event::EnterNamespace(_))).count();
        assert_eq!(entered, 4);
    }

    #[test]
    fn typedefs_and_aliases() {
        let symbols = SymbolMap::default();
        let text = "typedef unsigned int uint; using word = uint; word w;\n\
                    template <class T> struct Box { T value; }; template <class T> using Ptr = T *; Ptr<int> p;";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let w = unit.table.decl(unit.lookup("w")[0]).ty;
        assert_eq!(*unit.table.types.get(w), Type::Builtin(Builtin::UnsignedInt));
        assert_eq!(unit.display_type(unit.table.decl(unit.lookup("p")[0]).ty), "int *");
    }

    #[test]
    fn linkage_and_asm() {
        let text = "extern \"C\" { int f(void); } extern \"C\" int g; asm(\"nop\");";
        assert_eq!(tree(&Config::cpp(), text), "\
translation unit a.cc
  extern C
    function f
  extern C
    variable g
  asm nop
");
    }

    #[test]
    fn c_declarations() {
        let text = "struct S { int x; }; typedef struct S S; S s; main() { return 0; }";
        assert_eq!(tree(&Config::c(), text), "\
translation unit a.cc
  struct S
    field x
  typedef S
  variable s
  function main
  body
");
    }

    #[test]
    fn redefinition_is_a_problem() {
        let symbols = SymbolMap::default();
        let text = "int f() { return 0; } int f() { return 1; } struct S {}; struct S {};";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let count = unit.problems.iter().filter(|problem| problem.kind == ProblemKind::Redefinition).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn member_bodies_see_later_members() {
        let symbols = SymbolMap::default();
        let text = "struct S { int get() { return value; } int value; };";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let value = unit.lookup("S::value")[0];
        assert_eq!(unit.references_to(value).len(), 1);
    }

    #[test]
    fn explicit_instantiation_is_eager() {
        let symbols = SymbolMap::default();
        let text = "template <class T> struct A { T t; }; template class A<int>;";
        let mut unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        assert_eq!(unit.table.instances.len(), 1);
        let instance = *unit.table.instances.values().next().unwrap();
        assert_eq!(unit.qualified_name(instance), "A<int>");

        let a = unit.lookup("A")[0];
        let int = unit.table.types.builtin(Builtin::Int);
        assert_eq!(unit.instantiate(a, vec![Arg::Type(int)]).unwrap(), instance);
        assert_eq!(unit.table.instances.len(), 1);
        let t = unit.member(instance, "t")[0];
        assert_eq!(unit.display_type(unit.type_of(t)), "int");
    }

    #[test]
    fn using_declaration_binds_target() {
        let symbols = SymbolMap::default();
        let text = "namespace N { int v; }\nusing N::v;\nint w = v;";
        let mut events = Events::default();
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut events)
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let v = unit.lookup("N::v");
        assert_eq!(unit.lookup("v"), v);

        let references = unit.references_to(v[0]);
        assert_eq!(references.len(), 2);
        assert_eq!(references[0].loc.offset, text.find("v;\nint").unwrap());
        assert_eq!(references[1].loc.offset, text.rfind('v').unwrap());
        assert!(events.events.iter().any(|event| matches!(event, Event::UsingDeclaration { targets, .. } if *targets == v)));
    }
}
