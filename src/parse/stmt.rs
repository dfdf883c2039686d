use std::mem;

use super::decl::Context;
use super::{Miss, Parsed, Parser};
use crate::ast::Event;
use crate::lex::{Kind, Loc};
use crate::scope::{Decl, DeclKind, Flags, ScopeKind};
use crate::symbols::Symbol;
use crate::types::TypeId;

impl<'i, 'c, 'r> Parser<'i, 'c, 'r> {
    pub(super) fn statement(&mut self) -> Parsed<()> {
        self.nested(Self::statement_inner)
    }

    fn statement_inner(&mut self) -> Parsed<()> {
        match self.peek() {
            Kind::LeftBrace => { self.compound_statement() }
            Kind::Semi => { self.bump(); Ok(()) }
            Kind::If => {
                self.bump();
                self.eat(Kind::Constexpr);
                self.block_scope(|p| {
                    p.expect(Kind::LeftParen)?;
                    p.condition()?;
                    p.expect(Kind::RightParen)?;
                    p.substatement()?;
                    if p.eat(Kind::Else).is_some() { p.substatement()?; }
                    Ok(())
                })
            }
            Kind::Switch | Kind::While => {
                self.bump();
                self.block_scope(|p| {
                    p.expect(Kind::LeftParen)?;
                    p.condition()?;
                    p.expect(Kind::RightParen)?;
                    p.substatement()
                })
            }
            Kind::Do => {
                self.bump();
                self.substatement()?;
                self.expect(Kind::While)?;
                self.expect(Kind::LeftParen)?;
                self.expression()?;
                self.expect(Kind::RightParen)?;
                self.expect(Kind::Semi)?;
                Ok(())
            }
            Kind::For => {
                self.bump();
                self.block_scope(Self::for_statement)
            }
            Kind::Case => {
                self.bump();
                self.conditional()?;
                if self.eat(Kind::Ellipsis).is_some() { self.conditional()?; }
                self.expect(Kind::Colon)?;
                Ok(())
            }
            Kind::Default => {
                self.bump();
                self.expect(Kind::Colon)?;
                Ok(())
            }
            Kind::Break | Kind::Continue => {
                self.bump();
                self.expect(Kind::Semi)?;
                Ok(())
            }
            Kind::Return => {
                self.bump();
                match self.peek() {
                    Kind::Semi => {}
                    Kind::LeftBrace => { self.braced_init_list()?; }
                    _ => { self.expression()?; }
                }
                self.expect(Kind::Semi)?;
                Ok(())
            }
            Kind::Goto => {
                self.bump();
                self.expect(Kind::Identifier)?;
                self.expect(Kind::Semi)?;
                Ok(())
            }
            Kind::Try => {
                self.bump();
                self.compound_statement()?;
                while self.peek() == Kind::Catch { self.handler()?; }
                Ok(())
            }
            Kind::Identifier if self.nth(1) == Kind::Colon => {
                self.bump();
                self.bump();
                Ok(())
            }
            Kind::Asm => { self.asm_declaration() }
            Kind::Using => { self.using() }
            Kind::StaticAssert => { self.static_assert() }
            Kind::Namespace if self.nth(2) == Kind::Eq => { self.namespace_definition() }
            _ => { self.declaration_or_expression() }
        }
    }

    /// A statement that may also be a declaration. The declaration wins when both parse.
    fn declaration_or_expression(&mut self) -> Parsed<()> {
        match self.speculate(|p| p.simple_declaration(Context::Block)) {
            Ok(()) => { return Ok(()); }
            Err(Miss::NoMatch) => {}
            Err(fatal) => { return Err(fatal); }
        }
        self.expression()?;
        self.expect(Kind::Semi)?;
        Ok(())
    }

    pub(super) fn compound_statement(&mut self) -> Parsed<()> {
        let open = self.expect(Kind::LeftBrace)?;
        let scope = self.table.push_scope(ScopeKind::Block, Some(self.scope), None);
        let outer = mem::replace(&mut self.scope, scope);
        self.emit(Event::EnterCodeBlock(open.loc()));
        let result = self.sequence(Kind::RightBrace, Self::statement);
        let close = self.close_brace();
        self.emit(Event::ExitCodeBlock);
        self.scope = outer;
        result?;
        self.extent(scope, open.loc(), close);
        Ok(())
    }

    /// A statement that is its own scope even without braces.
    fn substatement(&mut self) -> Parsed<()> {
        if self.peek() == Kind::LeftBrace { return self.compound_statement(); }
        self.block_scope(Self::statement)
    }

    /// Run `f` in a block scope whose extent covers the tokens it consumes.
    fn block_scope(&mut self, f: impl FnOnce(&mut Self) -> Parsed<()>) -> Parsed<()> {
        let start = self.peek_token().loc();
        let scope = self.table.push_scope(ScopeKind::Block, Some(self.scope), None);
        let outer = mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = outer;
        let end = self.last_loc();
        self.extent(scope, start, end);
        result
    }

    fn for_statement(&mut self) -> Parsed<()> {
        self.expect(Kind::LeftParen)?;
        let range = self.speculate(|p| {
            let specifiers = p.decl_specifiers(Context::Block)?;
            let base = specifiers.ty.ok_or(Miss::NoMatch)?;
            let declarator = p.declarator(super::decl::Abstract::No)?;
            let name = declarator.name.clone().ok_or(Miss::NoMatch)?;
            p.expect(Kind::Colon)?;
            let ty = p.apply(base, &declarator.ops);
            Ok((ty, name.name, name.loc))
        });
        match range {
            Ok((ty, name, loc)) => {
                let range = if self.peek() == Kind::LeftBrace { self.braced_init_list()? } else { self.expression()? };
                let ty = if ty == TypeId::UNKNOWN { self.element_type(range.ty) } else { ty };
                self.declare_local(ty, name, loc);
                self.expect(Kind::RightParen)?;
                return self.substatement();
            }
            Err(Miss::NoMatch) => {}
            Err(fatal) => { return Err(fatal); }
        }

        if self.peek() != Kind::Semi {
            self.declaration_or_expression()?;
        } else {
            self.bump();
        }
        if self.peek() != Kind::Semi { self.condition()?; }
        self.expect(Kind::Semi)?;
        if self.peek() != Kind::RightParen { self.expression()?; }
        self.expect(Kind::RightParen)?;
        self.substatement()
    }

    /// The element type of an array being iterated over, if it is one.
    fn element_type(&mut self, ty: TypeId) -> TypeId {
        let ty = self.table.types.strip_references(ty);
        let (_, ty) = self.table.types.unqualified(ty);
        match *self.table.types.get(ty) {
            crate::types::Type::Array(element, _) => { element }
            _ => { TypeId::UNKNOWN }
        }
    }

    /// The condition of `if`, `while` or `switch`: an expression, or a declaration with an initializer.
    fn condition(&mut self) -> Parsed<()> {
        let declaration = self.speculate(|p| {
            let specifiers = p.decl_specifiers(Context::Block)?;
            let base = specifiers.ty.ok_or(Miss::NoMatch)?;
            let declarator = p.declarator(super::decl::Abstract::No)?;
            if !matches!(p.peek(), Kind::Eq | Kind::LeftBrace) { return Err(Miss::NoMatch); }
            let name = declarator.name.clone().ok_or(Miss::NoMatch)?;
            let ty = p.apply(base, &declarator.ops);
            if p.eat(Kind::Eq).is_some() { p.initializer_clause()?; } else { p.braced_init_list()?; }
            Ok((ty, name.name, name.loc))
        });
        match declaration {
            Ok((ty, name, loc)) => {
                self.declare_local(ty, name, loc);
                Ok(())
            }
            Err(Miss::NoMatch) => {
                self.expression()?;
                Ok(())
            }
            Err(fatal) => { Err(fatal) }
        }
    }

    fn declare_local(&mut self, ty: TypeId, name: Symbol<'i, Kind>, loc: Loc) {
        let decl = Decl::new(DeclKind::Variable, Some(name), ty, self.scope, loc).with_flags(Flags::DEFINITION);
        let declared = self.table.declare(decl);
        if let Some(problem) = declared.problem { self.problem(problem, loc, name.as_str()); }
        self.emit(Event::Variable(self.entity(declared.id)));
    }

    /// `catch (declaration) { ... }`
    pub(super) fn handler(&mut self) -> Parsed<()> {
        self.expect(Kind::Catch)?;
        let open = self.expect(Kind::LeftParen)?;
        let scope = self.table.push_scope(ScopeKind::Block, Some(self.scope), None);
        let outer = mem::replace(&mut self.scope, scope);
        let result = self.handler_inner();
        self.scope = outer;
        result?;
        let end = self.last_loc();
        self.extent(scope, open.loc(), end);
        Ok(())
    }

    fn handler_inner(&mut self) -> Parsed<()> {
        if self.eat(Kind::Ellipsis).is_none() {
            let specifiers = self.decl_specifiers(Context::Parameter)?;
            let base = specifiers.ty.ok_or(Miss::NoMatch)?;
            let declarator = self.declarator(super::decl::Abstract::Maybe)?;
            let ty = self.apply(base, &declarator.ops);
            if let Some(name) = declarator.name { self.declare_parameter(ty, name.name, name.loc); }
        }
        self.expect(Kind::RightParen)?;
        self.compound_statement()
    }

    pub(super) fn declare_parameter(&mut self, ty: TypeId, name: Symbol<'i, Kind>, loc: Loc) {
        let decl = Decl::new(DeclKind::Parameter, Some(name), ty, self.scope, loc).with_flags(Flags::DEFINITION);
        let declared = self.table.declare(decl);
        if let Some(problem) = declared.problem { self.problem(problem, loc, name.as_str()); }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::ast::Tree;
    use crate::config::{Config, Memory};
    use crate::error::ProblemKind;
    use crate::lex::FileId;
    use crate::symbols::SymbolMap;

    fn tree(text: &str) -> String {
        let symbols = SymbolMap::default();
        let mut tree = Tree::default();
        crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut tree)
            .unwrap();
        tree.finish().to_string()
    }

    #[test]
    fn control_flow() {
        let text = "\
void f(int n) {
    for (int i = 0; i < n; i++) { int j; }
    if (int k = n) { } else ;
    while (n) n--;
    switch (n) { case 1: break; default: ; }
    do { } while (0);
}";
        assert_eq!(tree(text), "\
translation unit a.cc
  function f
  body
    variable i
    block
      variable j
    variable k
    block
    block
    block
");
    }

    #[test]
    fn range_for_deduces_element_type() {
        let symbols = SymbolMap::default();
        let text = "void f() { int xs[4]; for (auto x : xs) { x; } }";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let x = unit.lookup("f::x");
        assert_eq!(x.len(), 1);
        assert_eq!(unit.display_type(unit.table.decl(x[0]).ty), "int");
    }

    #[test]
    fn statements_resolve_names() {
        let symbols = SymbolMap::default();
        let text = "int g; void f(int p) { g = p; try { throw 1; } catch (int e) { g = e; } catch (...) { } h(); }";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let g = unit.lookup("g")[0];
        assert_eq!(unit.references_to(g).len(), 2);
        let undeclared: Vec<_> = unit.problems.iter().filter(|problem| problem.kind == ProblemKind::Undeclared).collect();
        assert_eq!(undeclared.len(), 1);
        assert_eq!(undeclared[0].detail, "h");
    }

    #[test]
    fn declaration_statement_wins() {
        let symbols = SymbolMap::default();
        let text = "struct T {}; void f() { T(x); T *y; }";
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        assert_eq!(unit.lookup("f::x").len(), 1);
        assert_eq!(unit.lookup("f::y").len(), 1);
    }

    #[test]
    fn else_branch_declares_in_its_own_scope() {
        let text = "void f(bool c) { if (c) { int x = 2; } else int x = 3; }";
        assert_eq!(tree(text), "\
translation unit a.cc
  function f
  body
    block
      variable x
    variable x
");

        let symbols = SymbolMap::default();
        let unit = crate::parse::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        let xs = unit.lookup("f::x");
        assert_eq!(xs.len(), 2);
        assert_ne!(unit.decl(xs[0]).scope, unit.decl(xs[1]).scope);

        let file = FileId(0);
        assert_eq!(unit.resolve(file, text.find("2;").unwrap(), "x"), vec![xs[0]]);
        assert_eq!(unit.resolve(file, text.find("3;").unwrap(), "x"), vec![xs[1]]);
    }
}
