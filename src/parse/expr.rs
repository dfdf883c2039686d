use tracing::trace;

use super::decl::{is_builtin_type, Context, NameKind};
use super::{Miss, Parsed, Parser};
use crate::config::{Language, Mode};
use crate::error::Failure;
use crate::lex::{self, Kind, Loc};
use crate::overload::Resolution;
use crate::scope::{DeclId, DeclKind, Flags, ScopeKind};
use crate::symbols::Symbol;
use crate::types::{Arg, Bindings, Builtin, Cv, Type, TypeId};

/// What the parser knows about an expression.
#[derive(Clone, Debug)]
pub(super) struct Expr<'i> {
    pub ty: TypeId,
    /// The value of an integral constant expression.
    pub value: Option<i64>,
    /// The expression is a non-type template parameter by itself.
    pub param: Option<DeclId>,
    pub dependent: bool,
    /// The expression names a type, as in a functional cast.
    pub is_type: bool,
    /// A function name whose overload is picked by the call that follows, if any.
    overloads: Option<Overloads<'i>>,
}

#[derive(Clone, Debug)]
struct Overloads<'i> {
    name: Symbol<'i, Kind>,
    loc: Loc,
    candidates: Vec<DeclId>,
    explicit: Option<Vec<Arg>>,
    /// The constness of the object a member function is called on.
    object: Option<bool>,
}

impl<'i> Expr<'i> {
    fn of(ty: TypeId) -> Expr<'i> {
        Expr { ty, value: None, param: None, dependent: ty == TypeId::DEPENDENT, is_type: false, overloads: None }
    }

    fn constant(ty: TypeId, value: i64) -> Expr<'i> {
        Expr { value: Some(value), ..Expr::of(ty) }
    }

    /// This expression as a template argument.
    pub fn as_arg(&self) -> Arg {
        match (self.param, self.value) {
            (Some(param), _) => { Arg::Param(param) }
            (None, Some(value)) => { Arg::Value(value) }
            (None, None) => { Arg::Unknown }
        }
    }
}

fn precedence(kind: Kind) -> Option<u8> {
    let prec = match kind {
        Kind::PipePipe => { 1 }
        Kind::AmpAmp => { 2 }
        Kind::Pipe => { 3 }
        Kind::Caret => { 4 }
        Kind::Amp => { 5 }
        Kind::EqEq | Kind::ExclaimEq => { 6 }
        Kind::Lt | Kind::Gt | Kind::LtEq | Kind::GtEq => { 7 }
        Kind::LtEqGt => { 8 }
        Kind::LtLt | Kind::GtGt => { 9 }
        Kind::Plus | Kind::Minus => { 10 }
        Kind::Star | Kind::Slash | Kind::Percent => { 11 }
        Kind::DotStar | Kind::ArrowStar => { 12 }
        _ => { return None; }
    };
    Some(prec)
}

fn is_assignment(kind: Kind) -> bool {
    matches!(kind,
        Kind::Eq | Kind::PlusEq | Kind::MinusEq | Kind::StarEq | Kind::SlashEq | Kind::PercentEq |
        Kind::CaretEq | Kind::AmpEq | Kind::PipeEq | Kind::LtLtEq | Kind::GtGtEq)
}

fn fold(op: Kind, a: i64, b: i64) -> Option<i64> {
    let value = match op {
        Kind::PipePipe => { (a != 0 || b != 0) as i64 }
        Kind::AmpAmp => { (a != 0 && b != 0) as i64 }
        Kind::Pipe => { a | b }
        Kind::Caret => { a ^ b }
        Kind::Amp => { a & b }
        Kind::EqEq => { (a == b) as i64 }
        Kind::ExclaimEq => { (a != b) as i64 }
        Kind::Lt => { (a < b) as i64 }
        Kind::Gt => { (a > b) as i64 }
        Kind::LtEq => { (a <= b) as i64 }
        Kind::GtEq => { (a >= b) as i64 }
        Kind::LtLt => { a.checked_shl(u32::try_from(b).ok()?)? }
        Kind::GtGt => { a.checked_shr(u32::try_from(b).ok()?)? }
        Kind::Plus => { a.wrapping_add(b) }
        Kind::Minus => { a.wrapping_sub(b) }
        Kind::Star => { a.wrapping_mul(b) }
        Kind::Slash => { a.checked_div(b)? }
        Kind::Percent => { a.checked_rem(b)? }
        _ => { return None; }
    };
    Some(value)
}

impl<'i, 'c, 'r> Parser<'i, 'c, 'r> {
    pub(super) fn expression(&mut self) -> Parsed<Expr<'i>> {
        let mut expr = self.assignment()?;
        while self.eat(Kind::Comma).is_some() {
            expr = self.assignment()?;
        }
        Ok(expr)
    }

    pub(super) fn assignment(&mut self) -> Parsed<Expr<'i>> {
        if self.eat(Kind::Throw).is_some() {
            if !matches!(self.peek(), Kind::Semi | Kind::RightParen | Kind::Comma | Kind::Colon | Kind::RightBrace) {
                self.assignment()?;
            }
            return Ok(Expr::of(TypeId::VOID));
        }

        let lhs = self.conditional()?;
        let op = self.peek();
        if !is_assignment(op) || (op == Kind::GtGtEq && self.no_gt) { return Ok(lhs); }
        self.bump();
        if self.peek() == Kind::LeftBrace { self.braced_init_list()?; } else { self.assignment()?; }
        Ok(Expr { value: None, param: None, ..lhs })
    }

    pub(super) fn conditional(&mut self) -> Parsed<Expr<'i>> {
        let condition = self.binary(1)?;
        if self.eat(Kind::Question).is_none() { return Ok(condition); }

        let then = self.with_no_gt(false, Self::expression)?;
        self.expect(Kind::Colon)?;
        let otherwise = self.assignment()?;
        let ty = if self.table.types.is_known(then.ty) { then.ty } else { otherwise.ty };
        let value = match (condition.value, then.value, otherwise.value) {
            (Some(c), Some(a), Some(b)) => { Some(if c != 0 { a } else { b }) }
            _ => { None }
        };
        let dependent = condition.dependent || then.dependent || otherwise.dependent;
        Ok(Expr { value, dependent, ..Expr::of(ty) })
    }

    /// Binary operators binding at least as tightly as `min`.
    fn binary(&mut self, min: u8) -> Parsed<Expr<'i>> {
        let mut lhs = self.cast_expression()?;
        loop {
            let op = self.peek();
            let prec = match precedence(op) {
                Some(prec) if prec >= min => { prec }
                _ => { break; }
            };
            if self.no_gt && self.at_close_angle() { break; }
            self.bump();
            let rhs = self.binary(prec + 1)?;
            lhs = self.combine(op, lhs, rhs);
        }
        Ok(lhs)
    }

    fn combine(&mut self, op: Kind, lhs: Expr<'i>, rhs: Expr<'i>) -> Expr<'i> {
        let dependent = lhs.dependent || rhs.dependent;
        let truth = match self.language {
            Language::Cpp => { self.table.types.builtin(Builtin::Bool) }
            Language::C => { self.table.types.builtin(Builtin::Int) }
        };
        let ty = match op {
            Kind::PipePipe | Kind::AmpAmp | Kind::EqEq | Kind::ExclaimEq |
            Kind::Lt | Kind::Gt | Kind::LtEq | Kind::GtEq => { truth }
            Kind::LtEqGt | Kind::DotStar | Kind::ArrowStar => { TypeId::UNKNOWN }
            Kind::LtLt | Kind::GtGt => { self.promote(lhs.ty) }
            _ => { self.arithmetic(lhs.ty, rhs.ty) }
        };
        let value = match (lhs.value, rhs.value) {
            (Some(a), Some(b)) => { fold(op, a, b) }
            _ => { None }
        };
        let ty = if dependent && !self.table.types.is_known(ty) { TypeId::DEPENDENT } else { ty };
        Expr { value, dependent, ..Expr::of(ty) }
    }

    fn promote(&mut self, ty: TypeId) -> TypeId {
        let ty = self.table.types.decay(ty);
        match *self.table.types.get(ty) {
            Type::Builtin(builtin) => { builtin.promotion().map_or(ty, |promoted| self.table.types.builtin(promoted)) }
            Type::Enum(_) => { self.table.types.builtin(Builtin::Int) }
            _ => { ty }
        }
    }

    /// The usual arithmetic conversions, and pointer arithmetic.
    fn arithmetic(&mut self, a: TypeId, b: TypeId) -> TypeId {
        let (a, b) = (self.promote(a), self.promote(b));
        match (self.table.types.get(a).clone(), self.table.types.get(b).clone()) {
            (Type::Builtin(x), Type::Builtin(y)) => { self.table.types.builtin(x.max(y)) }
            (Type::Pointer(_), Type::Pointer(_)) => { self.table.types.builtin(Builtin::Long) }
            (Type::Pointer(_), _) => { a }
            (_, Type::Pointer(_)) => { b }
            _ => { TypeId::UNKNOWN }
        }
    }

    fn cast_expression(&mut self) -> Parsed<Expr<'i>> {
        self.nested(|p| {
            if p.peek() == Kind::LeftParen {
                let cast = p.speculate(|p| {
                    p.bump();
                    let ty = p.type_id()?;
                    p.expect(Kind::RightParen)?;
                    if !p.may_begin_operand() { return Err(Miss::NoMatch); }
                    Ok(ty)
                });
                match cast {
                    Ok(ty) => {
                        let operand = if p.peek() == Kind::LeftBrace { p.braced_init_list()? } else { p.cast_expression()? };
                        let value = operand.value.filter(|_| p.is_integral(ty));
                        return Ok(Expr { value, dependent: operand.dependent, ..Expr::of(ty) });
                    }
                    Err(Miss::NoMatch) => {}
                    Err(fatal) => { return Err(fatal); }
                }
            }
            p.unary()
        })
    }

    fn is_integral(&self, ty: TypeId) -> bool {
        let (_, ty) = self.table.types.unqualified(ty);
        matches!(*self.table.types.get(ty), Type::Builtin(builtin) if builtin.is_integral())
    }

    /// Whether the next token can start the operand of a cast.
    fn may_begin_operand(&mut self) -> bool {
        match self.peek() {
            Kind::Identifier | Kind::Number | Kind::Character | Kind::String | Kind::LeftParen |
            Kind::LeftBrace | Kind::ColonColon | Kind::Tilde | Kind::Exclaim | Kind::Plus | Kind::Minus |
            Kind::Star | Kind::Amp | Kind::PlusPlus | Kind::MinusMinus | Kind::This | Kind::True |
            Kind::False | Kind::Nullptr | Kind::Sizeof | Kind::Alignof | Kind::New | Kind::Delete |
            Kind::StaticCast | Kind::DynamicCast | Kind::ReinterpretCast | Kind::ConstCast |
            Kind::Typeid | Kind::Operator | Kind::Noexcept | Kind::Throw => { true }
            kind => { is_builtin_type(kind) }
        }
    }

    /// Whether the next tokens could begin a type-id.
    pub(super) fn may_begin_type(&mut self) -> bool {
        match self.peek() {
            Kind::Const | Kind::Volatile | Kind::Struct | Kind::Class | Kind::Union | Kind::Enum |
            Kind::Typename | Kind::Decltype | Kind::Auto => { true }
            Kind::Identifier | Kind::ColonColon => { true }
            kind => { is_builtin_type(kind) }
        }
    }

    fn unary(&mut self) -> Parsed<Expr<'i>> {
        let token = self.peek_token();
        match token.kind() {
            Kind::PlusPlus | Kind::MinusMinus => {
                self.bump();
                let operand = self.cast_expression()?;
                Ok(Expr { value: None, param: None, ..operand })
            }
            Kind::Star => {
                self.bump();
                let operand = self.cast_expression()?;
                let operand = self.settle(operand);
                let ty = self.pointee(operand.ty);
                Ok(Expr { dependent: operand.dependent, ..Expr::of(ty) })
            }
            Kind::Amp => {
                self.bump();
                let operand = self.cast_expression()?;
                let operand = self.settle(operand);
                let ty = if self.table.types.is_known(operand.ty) { self.table.types.pointer(operand.ty) } else { operand.ty };
                Ok(Expr { dependent: operand.dependent, ..Expr::of(ty) })
            }
            Kind::Plus | Kind::Minus | Kind::Tilde | Kind::Exclaim => {
                self.bump();
                let operand = self.cast_expression()?;
                let operand = self.settle(operand);
                let (ty, value) = match token.kind() {
                    Kind::Plus => { (self.promote(operand.ty), operand.value) }
                    Kind::Minus => { (self.promote(operand.ty), operand.value.map(i64::wrapping_neg)) }
                    Kind::Tilde => { (self.promote(operand.ty), operand.value.map(|value| !value)) }
                    _ => {
                        let truth = if self.language == Language::Cpp { Builtin::Bool } else { Builtin::Int };
                        (self.table.types.builtin(truth), operand.value.map(|value| (value == 0) as i64))
                    }
                };
                Ok(Expr { value, dependent: operand.dependent, ..Expr::of(ty) })
            }
            Kind::Sizeof | Kind::Alignof => {
                self.bump();
                self.eat(Kind::Ellipsis);
                let size = self.table.types.builtin(Builtin::UnsignedLong);
                if self.peek() == Kind::LeftParen {
                    let ty = self.speculate(|p| {
                        p.bump();
                        let ty = p.type_id()?;
                        p.expect(Kind::RightParen)?;
                        Ok(ty)
                    });
                    match ty {
                        Ok(_) => { return Ok(Expr::of(size)); }
                        Err(Miss::NoMatch) => {}
                        Err(fatal) => { return Err(fatal); }
                    }
                }
                let operand = self.unary()?;
                self.settle(operand);
                Ok(Expr::of(size))
            }
            Kind::Noexcept => {
                self.bump();
                self.expect(Kind::LeftParen)?;
                self.with_no_gt(false, Self::expression)?;
                self.expect(Kind::RightParen)?;
                Ok(Expr::of(self.table.types.builtin(Builtin::Bool)))
            }
            Kind::New => { self.new_expression() }
            Kind::ColonColon if self.nth(1) == Kind::New => {
                self.bump();
                self.new_expression()
            }
            Kind::Delete => { self.delete_expression() }
            Kind::ColonColon if self.nth(1) == Kind::Delete => {
                self.bump();
                self.delete_expression()
            }
            Kind::Identifier if self.is_identifier(self.names.extension) => {
                self.bump();
                self.cast_expression()
            }
            _ => {
                let expr = self.postfix()?;
                Ok(self.settle(expr))
            }
        }
    }

    fn pointee(&mut self, ty: TypeId) -> TypeId {
        let ty = self.table.types.strip_references(ty);
        let (_, ty) = self.table.types.unqualified(ty);
        match *self.table.types.get(ty) {
            Type::Pointer(inner) | Type::Array(inner, _) => { inner }
            Type::Dependent | Type::Param(_) => { TypeId::DEPENDENT }
            _ => { TypeId::UNKNOWN }
        }
    }

    fn new_expression(&mut self) -> Parsed<Expr<'i>> {
        self.expect(Kind::New)?;
        if self.peek() == Kind::LeftParen {
            // Placement arguments, unless the parentheses hold the type.
            let placement = self.speculate(|p| {
                p.bump();
                p.expression_list(Kind::RightParen)?;
                p.expect(Kind::RightParen)?;
                if p.peek() == Kind::LeftParen || p.may_begin_type() { Ok(()) } else { Err(Miss::NoMatch) }
            });
            if let Err(Miss::Fatal(failure)) = placement { return Err(failure.into()); }
        }

        let ty = if self.eat(Kind::LeftParen).is_some() {
            let ty = self.type_id()?;
            self.expect(Kind::RightParen)?;
            ty
        } else {
            let specifiers = self.decl_specifiers(Context::Type)?;
            let base = specifiers.ty.ok_or(Miss::NoMatch)?;
            let mut ty = base;
            while self.eat(Kind::Star).is_some() {
                let pointer = self.table.types.pointer(ty);
                ty = pointer;
            }
            while self.eat(Kind::LeftBracket).is_some() {
                if self.peek() != Kind::RightBracket { self.with_no_gt(false, Self::expression)?; }
                self.expect(Kind::RightBracket)?;
            }
            ty
        };

        match self.peek() {
            Kind::LeftParen => {
                self.bump();
                self.expression_list(Kind::RightParen)?;
                self.expect(Kind::RightParen)?;
            }
            Kind::LeftBrace => { self.braced_init_list()?; }
            _ => {}
        }
        let dependent = self.table.types.is_dependent(ty);
        Ok(Expr { dependent, ..Expr::of(self.table.types.pointer(ty)) })
    }

    fn delete_expression(&mut self) -> Parsed<Expr<'i>> {
        self.expect(Kind::Delete)?;
        if self.peek() == Kind::LeftBracket && self.nth(1) == Kind::RightBracket {
            self.bump();
            self.bump();
        }
        let operand = self.cast_expression()?;
        self.settle(operand);
        Ok(Expr::of(TypeId::VOID))
    }

    fn postfix(&mut self) -> Parsed<Expr<'i>> {
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Kind::LeftParen => {
                    let open = self.bump();
                    let args = self.expression_list(Kind::RightParen)?;
                    self.expect(Kind::RightParen)?;
                    expr = self.call(expr, args, open.loc())?;
                }
                Kind::LeftBrace if expr.is_type => {
                    self.braced_init_list()?;
                    expr = Expr { dependent: expr.dependent, ..Expr::of(expr.ty) };
                }
                Kind::LeftBracket if self.nth(1) != Kind::LeftBracket => {
                    let base = self.settle(expr);
                    self.bump();
                    let index = self.with_no_gt(false, Self::expression)?;
                    self.expect(Kind::RightBracket)?;
                    let ty = self.pointee(base.ty);
                    expr = Expr { dependent: base.dependent || index.dependent, ..Expr::of(ty) };
                }
                Kind::Dot | Kind::Arrow => {
                    let arrow = self.bump().kind() == Kind::Arrow;
                    let object = self.settle(expr);
                    expr = self.member_access(object, arrow)?;
                }
                Kind::PlusPlus | Kind::MinusMinus => {
                    self.bump();
                    let operand = self.settle(expr);
                    expr = Expr { value: None, param: None, ..operand };
                }
                _ => { return Ok(expr); }
            }
        }
    }

    /// Record the reference a function name makes when nothing picks an overload for it.
    fn settle(&mut self, mut expr: Expr<'i>) -> Expr<'i> {
        if let Some(overloads) = expr.overloads.take() {
            if let Some(&decl) = overloads.candidates.first() {
                self.reference(overloads.loc, overloads.name, decl);
                if overloads.candidates.len() == 1 { expr.ty = self.table.decl(decl).ty; }
            }
        }
        expr
    }

    fn call(&mut self, callee: Expr<'i>, args: Vec<Expr<'i>>, loc: Loc) -> Parsed<Expr<'i>> {
        let dependent = callee.dependent || args.iter().any(|arg| arg.dependent);
        if callee.is_type {
            return Ok(Expr { dependent, ..Expr::of(callee.ty) });
        }
        let overloads = match callee.overloads {
            Some(overloads) => { overloads }
            None => {
                let ty = match self.table.types.return_type(callee.ty) {
                    Some(ret) => { ret }
                    None if dependent => { TypeId::DEPENDENT }
                    None => { TypeId::UNKNOWN }
                };
                return Ok(Expr { dependent, ..Expr::of(ty) });
            }
        };

        if self.mode == Mode::Structural || self.language == Language::C {
            let callee = self.settle(Expr { overloads: Some(overloads), ..Expr::of(callee.ty) });
            let ty = self.table.types.return_type(callee.ty).unwrap_or(TypeId::UNKNOWN);
            return Ok(Expr { dependent, ..Expr::of(ty) });
        }

        let types: Vec<TypeId> = args.iter().map(|arg| arg.ty).collect();
        let explicit = overloads.explicit.as_deref();
        let mut resolution = self.table.resolve_member_call(&overloads.candidates, explicit, overloads.object, &types);
        if resolution == Resolution::NoMatch && args.iter().any(|arg| arg.value == Some(0)) {
            // A literal zero may be a null pointer constant.
            let types: Vec<TypeId> = args.iter()
                .map(|arg| if arg.value == Some(0) { TypeId::UNKNOWN } else { arg.ty })
                .collect();
            resolution = self.table.resolve_member_call(&overloads.candidates, explicit, overloads.object, &types);
        }

        let known = !dependent && types.iter().all(|&ty| self.table.types.is_known(ty))
            && overloads.explicit.iter().flatten().all(|arg| !self.table.types.is_dependent_arg(arg) && *arg != Arg::Unknown);
        trace!(name = %overloads.name, ?resolution, known, "call");
        match resolution {
            Resolution::Unique(candidate) => {
                self.reference(overloads.loc, overloads.name, candidate.decl);
                let ty = self.table.types.return_type(candidate.ty).unwrap_or(TypeId::UNKNOWN);
                let ty = self.table.resolve_type(ty, loc)?;
                Ok(Expr { dependent, ..Expr::of(ty) })
            }
            Resolution::Ambiguous(_) if known => {
                Err(Failure::AmbiguousCall { name: overloads.name.as_str().to_owned(), loc: overloads.loc }.into())
            }
            Resolution::NoMatch if known => {
                Err(Failure::NoMatchingFunction { name: overloads.name.as_str().to_owned(), loc: overloads.loc }.into())
            }
            Resolution::Ambiguous(_) | Resolution::NoMatch => {
                Ok(Expr { dependent, ..Expr::of(if dependent { TypeId::DEPENDENT } else { TypeId::UNKNOWN }) })
            }
        }
    }

    /// The class a type names, with bindings for the parameters of a class template its members
    /// are written in terms of.
    fn class_of(&mut self, ty: TypeId, loc: Loc) -> Parsed<Option<(DeclId, Bindings)>> {
        let ty = self.table.types.strip_references(ty);
        let (_, ty) = self.table.types.unqualified(ty);
        let ty = self.table.resolve_type(ty, loc)?;
        let class = match self.table.types.get(ty).clone() {
            Type::Class(class) => { Some((class, Bindings::default())) }
            Type::Specialization(template, args) => {
                let bindings = self.table.template_params(template).iter().map(|param| param.decl).zip(args).collect();
                Some((template, bindings))
            }
            _ => { None }
        };
        Ok(class)
    }

    fn member_access(&mut self, object: Expr<'i>, arrow: bool) -> Parsed<Expr<'i>> {
        let ty = if arrow { self.pointee(object.ty) } else { object.ty };
        self.eat(Kind::Template);
        let token = self.peek_token();
        let (name, kind) = match token.kind() {
            Kind::Identifier => { self.bump(); (token.spelling(), NameKind::Plain) }
            Kind::Tilde if self.nth(1) == Kind::Identifier => {
                self.bump();
                let class = self.bump();
                (self.intern(&format!("~{}", class.spelling())), NameKind::Destructor)
            }
            Kind::Operator => {
                let name = self.id_expression()?;
                (name.name, name.kind)
            }
            _ => { return Err(Miss::NoMatch); }
        };

        let class = self.class_of(ty, token.loc())?;
        let (class, bindings) = match class {
            Some(class) => { class }
            None => {
                if self.peek() == Kind::Lt {
                    if let Err(Miss::Fatal(failure)) = self.speculate(Self::template_arguments) { return Err(failure.into()); }
                }
                let unknown = if object.dependent || self.table.types.is_dependent(ty) { TypeId::DEPENDENT } else { TypeId::UNKNOWN };
                return Ok(Expr::of(unknown));
            }
        };

        let members = self.table.member(class, name);
        let mut explicit = None;
        if self.peek() == Kind::Lt && members.iter().any(|&decl| self.table.is_template(decl)) {
            match self.speculate(Self::template_arguments) {
                Ok(args) => { explicit = Some(args); }
                Err(Miss::NoMatch) => {}
                Err(fatal) => { return Err(fatal); }
            }
        }

        let complete = self.table.definition(class)
            .map_or(false, |definition| self.table.decl(definition).flags.contains(Flags::COMPLETE));
        if members.is_empty() {
            if complete && kind != NameKind::Destructor && bindings.is_empty() {
                self.undeclared(name, token.loc());
            }
            return Ok(Expr::of(TypeId::UNKNOWN));
        }

        if members.iter().any(|&decl| self.table.decl(decl).kind.is_function()) {
            let (cv, _) = self.table.types.unqualified(self.table.types.strip_references(ty));
            let candidates = members.into_iter().filter(|&decl| self.table.decl(decl).kind.is_function()).collect();
            let overloads = Overloads { name, loc: token.loc(), candidates, explicit, object: Some(cv.const_) };
            return Ok(Expr { overloads: Some(overloads), ..Expr::of(TypeId::UNKNOWN) });
        }

        let member = members[0];
        self.reference(token.loc(), name, member);
        let ty = self.table.decl(member).ty;
        let ty = self.table.types.substitute(ty, &bindings);
        Ok(Expr { value: self.table.decl(member).value, ..Expr::of(ty) })
    }

    fn primary(&mut self) -> Parsed<Expr<'i>> {
        let token = self.peek_token();
        match token.kind() {
            Kind::Number => {
                self.bump();
                let spelling = token.spelling().key();
                let number = match lex::number(spelling) {
                    Some(number) => { number }
                    None => { return Ok(Expr::of(TypeId::UNKNOWN)); }
                };
                if number.float {
                    let float = matches!(spelling.last(), Some(b'f' | b'F'));
                    return Ok(Expr::of(self.table.types.builtin(if float { Builtin::Float } else { Builtin::Double })));
                }
                let builtin = match (number.long, number.unsigned) {
                    (0, false) => { Builtin::Int }
                    (0, true) => { Builtin::UnsignedInt }
                    (1, false) => { Builtin::Long }
                    (1, true) => { Builtin::UnsignedLong }
                    (_, false) => { Builtin::LongLong }
                    (_, true) => { Builtin::UnsignedLongLong }
                };
                let ty = self.table.types.builtin(builtin);
                Ok(Expr { value: i64::try_from(number.value).ok(), ..Expr::of(ty) })
            }
            Kind::Character => {
                self.bump();
                let ty = self.table.types.builtin(Builtin::Char);
                let value = lex::character(token.spelling().key()).and_then(|value| i64::try_from(value).ok());
                Ok(Expr { value, ..Expr::of(ty) })
            }
            Kind::String => {
                while self.eat(Kind::String).is_some() {}
                let char_ = self.table.types.builtin(Builtin::Char);
                let element = self.table.types.qualified(Cv { const_: true, volatile: false }, char_);
                Ok(Expr::of(self.table.types.pointer(element)))
            }
            Kind::True | Kind::False => {
                self.bump();
                let ty = self.table.types.builtin(Builtin::Bool);
                Ok(Expr::constant(ty, (token.kind() == Kind::True) as i64))
            }
            Kind::Nullptr => {
                self.bump();
                Ok(Expr::of(self.table.types.builtin(Builtin::Nullptr)))
            }
            Kind::This => {
                self.bump();
                let ty = match self.this {
                    Some((class, const_)) => {
                        let class = self.table.types.qualified(Cv { const_, volatile: false }, class);
                        self.table.types.pointer(class)
                    }
                    None => { TypeId::UNKNOWN }
                };
                let dependent = self.table.types.is_dependent(ty);
                Ok(Expr { dependent, ..Expr::of(ty) })
            }
            Kind::LeftParen => {
                self.bump();
                let expr = self.with_no_gt(false, Self::expression)?;
                self.expect(Kind::RightParen)?;
                Ok(expr)
            }
            Kind::LeftBracket => { self.lambda() }
            Kind::LeftBrace => { self.braced_init_list() }
            Kind::StaticCast | Kind::DynamicCast | Kind::ReinterpretCast | Kind::ConstCast => {
                self.bump();
                self.expect(Kind::Lt)?;
                let ty = self.with_no_gt(true, Self::type_id)?;
                if !self.close_angle() { return Err(Miss::NoMatch); }
                self.expect(Kind::LeftParen)?;
                let operand = self.with_no_gt(false, Self::expression)?;
                self.expect(Kind::RightParen)?;
                let value = operand.value.filter(|_| self.is_integral(ty));
                Ok(Expr { value, dependent: operand.dependent, ..Expr::of(ty) })
            }
            Kind::Typeid => {
                self.bump();
                self.skip_balanced();
                Ok(Expr::of(TypeId::UNKNOWN))
            }
            Kind::Typename => {
                let specifiers = self.decl_specifiers(Context::Type)?;
                let ty = specifiers.ty.ok_or(Miss::NoMatch)?;
                Ok(Expr { is_type: true, ..Expr::of(ty) })
            }
            kind if is_builtin_type(kind) || kind == Kind::Decltype => {
                let specifiers = self.decl_specifiers(Context::Type)?;
                let ty = specifiers.ty.ok_or(Miss::NoMatch)?;
                if !matches!(self.peek(), Kind::LeftParen | Kind::LeftBrace) { return Err(Miss::NoMatch); }
                Ok(Expr { is_type: true, ..Expr::of(ty) })
            }
            Kind::Identifier if token.spelling().as_str().starts_with("__builtin_") && self.nth(1) == Kind::LeftParen => {
                let name = token.spelling();
                if self.table.lookup(self.scope, name).is_empty() {
                    // Compiler intrinsics, some of which take types as arguments.
                    self.bump();
                    self.skip_balanced();
                    return Ok(Expr::of(TypeId::UNKNOWN));
                }
                self.name_expression()
            }
            Kind::Identifier | Kind::ColonColon | Kind::Operator | Kind::Tilde => { self.name_expression() }
            _ => { Err(Miss::NoMatch) }
        }
    }

    fn name_expression(&mut self) -> Parsed<Expr<'i>> {
        let name = self.id_expression()?;
        if name.dependent { return Ok(Expr::of(TypeId::DEPENDENT)); }
        if name.unresolved { return Ok(Expr::of(TypeId::UNKNOWN)); }
        if name.candidates.is_empty() {
            if name.kind != NameKind::Destructor { self.undeclared(name.name, name.loc); }
            return Ok(Expr::of(TypeId::UNKNOWN));
        }

        let functions: Vec<DeclId> = name.candidates.iter().copied()
            .filter(|&decl| self.table.decl(decl).kind.is_function())
            .collect();
        if !functions.is_empty() {
            let object = self.this.map(|(_, const_)| const_);
            let overloads = Overloads { name: name.name, loc: name.loc, candidates: functions, explicit: name.args, object };
            return Ok(Expr { overloads: Some(overloads), ..Expr::of(TypeId::UNKNOWN) });
        }

        let value = name.candidates.iter().copied().find(|&decl| {
            let kind = self.table.decl(decl).kind;
            !kind.is_type() && !matches!(kind, DeclKind::Namespace | DeclKind::NamespaceAlias)
        });
        let decl = match value {
            Some(decl) => { decl }
            None => {
                let decl = match self.type_decl(&name.candidates, name.is_qualified()) {
                    Some(decl) => { decl }
                    None => { return Err(Miss::NoMatch); }
                };
                self.reference(name.loc, name.name, decl);
                let ty = self.named_type(decl, name.args, name.loc)?;
                let ty = self.table.types.substitute(ty, &name.rename);
                let dependent = self.table.types.is_dependent(ty);
                return Ok(Expr { is_type: true, dependent, ..Expr::of(ty) });
            }
        };

        self.reference(name.loc, name.name, decl);
        let ty = self.table.decl(decl).ty;
        let ty = self.table.types.substitute(ty, &name.rename);
        if self.table.decl(decl).kind == DeclKind::ValueParam {
            return Ok(Expr { param: Some(decl), dependent: true, ..Expr::of(ty) });
        }
        let dependent = self.table.types.is_dependent(ty);
        Ok(Expr { value: self.table.decl(decl).value, dependent, ..Expr::of(ty) })
    }

    fn lambda(&mut self) -> Parsed<Expr<'i>> {
        if self.peek() != Kind::LeftBracket { return Err(Miss::NoMatch); }
        self.skip_balanced();
        let scope = self.table.push_scope(ScopeKind::Block, Some(self.scope), None);
        let outer = std::mem::replace(&mut self.scope, scope);
        let result = self.lambda_inner();
        self.scope = outer;
        result?;
        Ok(Expr::of(TypeId::UNKNOWN))
    }

    fn lambda_inner(&mut self) -> Parsed<()> {
        if self.peek() == Kind::LeftParen {
            let signature = self.parameters()?;
            while matches!(self.peek(), Kind::Mutable | Kind::Constexpr) { self.bump(); }
            if self.eat(Kind::Arrow).is_some() { self.type_id()?; }
            for param in signature.params {
                if let Some((name, loc)) = param.name { self.declare_parameter(param.ty, name, loc); }
            }
        }
        if self.mode == Mode::Structural {
            if self.peek() != Kind::LeftBrace { return Err(Miss::NoMatch); }
            self.skip_balanced();
            return Ok(());
        }
        self.compound_statement()
    }

    /// Comma-separated initializer clauses up to `close`, which is left for the caller.
    pub(super) fn expression_list(&mut self, close: Kind) -> Parsed<Vec<Expr<'i>>> {
        let mut list = Vec::default();
        if self.peek() == close { return Ok(list); }
        self.with_no_gt(false, |p| {
            loop {
                let expr = p.initializer_clause()?;
                list.push(p.settle(expr));
                p.eat(Kind::Ellipsis);
                if p.eat(Kind::Comma).is_none() { return Ok(()); }
            }
        })?;
        Ok(list)
    }

    pub(super) fn initializer_clause(&mut self) -> Parsed<Expr<'i>> {
        if self.peek() == Kind::LeftBrace { return self.braced_init_list(); }
        let expr = self.assignment()?;
        Ok(self.settle(expr))
    }

    pub(super) fn braced_init_list(&mut self) -> Parsed<Expr<'i>> {
        self.expect(Kind::LeftBrace)?;
        let mut single = None;
        let mut count = 0;
        while self.peek() != Kind::RightBrace {
            // Designated initializers.
            while matches!(self.peek(), Kind::Dot | Kind::LeftBracket) {
                if self.eat(Kind::Dot).is_some() {
                    self.expect(Kind::Identifier)?;
                } else {
                    self.skip_balanced();
                }
                if self.peek() == Kind::Eq { self.bump(); }
            }
            let expr = self.with_no_gt(false, Self::initializer_clause)?;
            single = Some(expr);
            count += 1;
            self.eat(Kind::Ellipsis);
            if self.eat(Kind::Comma).is_none() { break; }
        }
        self.expect(Kind::RightBrace)?;
        match single {
            Some(expr) if count == 1 => { Ok(expr) }
            _ => { Ok(Expr::of(TypeId::UNKNOWN)) }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::config::{Config, Memory};
    use crate::error::Failure;
    use crate::symbols::SymbolMap;
    use crate::unit::Unit;

    fn parse<'i>(symbols: &'i SymbolMap<crate::lex::Kind>, text: &str) -> Result<Unit<'i>, Failure> {
        crate::parse::parse(symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
    }

    #[test]
    fn constant_folding() {
        let symbols = SymbolMap::default();
        let unit = parse(&symbols, "const int a = 1 + 2 * 3; const int b = (a << 2) - 1; const int c = a > 5 ? 10 : 20;")
            .unwrap();
        let value = |name: &str| unit.table.decl(unit.lookup(name)[0]).value;
        assert_eq!(value("a"), Some(7));
        assert_eq!(value("b"), Some(27));
        assert_eq!(value("c"), Some(10));
    }

    #[test]
    fn arithmetic_conversions() {
        let symbols = SymbolMap::default();
        let text = "int i; long l; char c; unsigned u; auto a = i + l; auto b = c + c; auto d = i * 2.0; auto e = u - i;";
        let unit = parse(&symbols, text).unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let ty = |name: &str| unit.display_type(unit.table.decl(unit.lookup(name)[0]).ty);
        assert_eq!(ty("a"), "long");
        assert_eq!(ty("b"), "int");
        assert_eq!(ty("d"), "double");
        assert_eq!(ty("e"), "unsigned int");
    }

    #[test]
    fn casts_and_parentheses() {
        let symbols = SymbolMap::default();
        let text = "struct T {}; int a; long b = (long)a; int c = (a) - 1; T *d = (T *)0; auto e = static_cast<char>(a);";
        let unit = parse(&symbols, text).unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        assert_eq!(unit.display_type(unit.table.decl(unit.lookup("e")[0]).ty), "char");
    }

    #[test]
    fn member_calls_pick_overloads() {
        let symbols = SymbolMap::default();
        let text = "\
struct S { int get(int); double get(double); int n; };
void f(S s, S *p) { auto a = s.get(1); auto b = p->get(1.5); auto c = s.n; }";
        let unit = parse(&symbols, text).unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let ty = |name: &str| unit.display_type(unit.table.decl(unit.lookup(name)[0]).ty);
        assert_eq!(ty("f::a"), "int");
        assert_eq!(ty("f::b"), "double");
        assert_eq!(ty("f::c"), "int");
        let gets = unit.lookup("S::get");
        assert_eq!(unit.references_to(gets[0]).len(), 1);
        assert_eq!(unit.references_to(gets[1]).len(), 1);
    }

    #[test]
    fn ambiguous_call_fails() {
        let symbols = SymbolMap::default();
        let result = parse(&symbols, "void f(long); void f(short); void g() { f(1); }");
        assert!(matches!(result, Err(Failure::AmbiguousCall { ref name, .. }) if name == "f"));
    }

    #[test]
    fn no_matching_function_fails() {
        let symbols = SymbolMap::default();
        let result = parse(&symbols, "struct S {}; void f(int *); void g() { S s; f(s); }");
        assert!(matches!(result, Err(Failure::NoMatchingFunction { ref name, .. }) if name == "f"));
    }

    #[test]
    fn null_pointer_constant() {
        let symbols = SymbolMap::default();
        let unit = parse(&symbols, "void f(int *); void g() { f(0); }").unwrap();
        let f = unit.lookup("f")[0];
        assert_eq!(unit.references_to(f).len(), 1);
    }

    #[test]
    fn unknown_arguments_do_not_fail() {
        let symbols = SymbolMap::default();
        let unit = parse(&symbols, "void f(long); void f(short); void g() { f(h); }").unwrap();
        assert_eq!(unit.problems.len(), 1);
    }

    #[test]
    fn lambdas_and_new() {
        let symbols = SymbolMap::default();
        let text = "struct T { T(int); }; void g() { auto l = [](int x) { return x; }; T *t = new T(1); delete t; }";
        let unit = parse(&symbols, text).unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let t = unit.lookup("g::t")[0];
        assert_eq!(unit.references_to(t).len(), 1);
    }
}
