use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::ast::{Entity, Event, Reference, Requestor};
use crate::config::{Config, Language, Mode, Source};
use crate::cpp::{PpEvent, Preprocessor};
use crate::error::{Failure, Problem, ProblemKind};
use crate::lex::{Kind, Loc, Token};
use crate::scope::{DeclId, Extent, Mark, ScopeId, ScopeKind, Table, TemplateParam};
use crate::symbols::{Symbol, SymbolMap};
use crate::types::TypeId;
use crate::unit::Unit;

mod decl;
mod expr;
mod stmt;

use self::decl::Param;

/// Deeper nesting of blocks, declarators or expressions fails the translation unit.
const MAX_NESTING: usize = 256;

/// How many consumed tokens to hold before discarding them.
const DISCARD_BELOW: usize = 1024;

/// Why an alternative did not parse.
pub(crate) enum Miss {
    /// The tokens do not fit this alternative. Another may still match.
    NoMatch,
    Fatal(Failure),
}

impl From<Failure> for Miss {
    fn from(failure: Failure) -> Miss { Miss::Fatal(failure) }
}

type Parsed<T> = Result<T, Miss>;

/// Parse a whole translation unit, reporting to `requestor` as it goes.
pub fn parse<'i>(
    symbols: &'i SymbolMap<Kind>, config: &Config, source: &dyn Source,
    name: &str, text: Rc<[u8]>, requestor: &mut dyn Requestor<'i>,
) -> Result<Unit<'i>, Failure> {
    Parser::new(symbols, config, source, name, text, requestor).parse()
}

pub struct Parser<'i, 'c, 'r> {
    symbols: &'i SymbolMap<Kind>,
    language: Language,
    mode: Mode,
    name: String,
    cpp: Preprocessor<'i, 'c>,

    /// Tokens pulled from the preprocessor, starting at index `base`. Backtracking only moves
    /// `pos`; tokens no checkpoint or deferred body can return to are discarded.
    tokens: Vec<Token<'i>>,
    base: usize,
    /// Preprocessor events, tagged with the index of the token they came before.
    pp: Vec<(usize, PpEvent<'i>)>,
    pp_next: usize,
    pos: usize,
    /// The first `>` of the `>>` at `pos` has been consumed.
    half: bool,
    /// `>` closes a template argument list rather than comparing.
    no_gt: bool,
    nesting: usize,

    table: Table<'i>,
    scope: ScopeId,
    template: Option<TemplateHeader>,
    /// The class type and constness of the member function being parsed.
    this: Option<(TypeId, bool)>,
    deferred: Vec<Deferred<'i>>,

    pending: Vec<Event<'i>>,
    depth: usize,
    aborted: bool,
    references: Vec<Reference<'i>>,
    problems: Vec<Problem>,
    requestor: &'r mut dyn Requestor<'i>,

    names: Names<'i>,
}

/// The parameters of the template declaration whose declaration is being parsed. Taken by
/// the first entity declared. No parameters means an explicit specialization.
#[derive(Clone, Debug)]
struct TemplateHeader { params: Vec<TemplateParam> }

/// A member function body inside a class, parsed once the class is complete.
struct Deferred<'i> { decl: DeclId, params: Vec<Param<'i>>, start: usize }

struct Checkpoint {
    pos: usize,
    half: bool,
    pending: usize,
    pp_next: usize,
    mark: Mark,
    scope: ScopeId,
    template: Option<TemplateHeader>,
}

/// Identifiers with meaning in some positions.
struct Names<'i> {
    final_: Symbol<'i, Kind>,
    override_: Symbol<'i, Kind>,
    attribute: Symbol<'i, Kind>,
    declspec: Symbol<'i, Kind>,
    extension: Symbol<'i, Kind>,
    typeof_: Symbol<'i, Kind>,
}

impl<'i, 'c, 'r> Parser<'i, 'c, 'r> {
    pub fn new(
        symbols: &'i SymbolMap<Kind>, config: &Config, source: &'c dyn Source,
        name: &str, text: Rc<[u8]>, requestor: &'r mut dyn Requestor<'i>,
    ) -> Parser<'i, 'c, 'r> {
        let cpp = Preprocessor::new(symbols, config, source, name, text);
        let intern = |name: &str| symbols.intern(name.as_bytes(), Kind::Identifier);
        let names = Names {
            final_: intern("final"),
            override_: intern("override"),
            attribute: intern("__attribute__"),
            declspec: intern("__declspec"),
            extension: intern("__extension__"),
            typeof_: intern("typeof"),
        };

        Parser {
            symbols,
            language: config.language,
            mode: config.mode,
            name: name.to_owned(),
            cpp,

            tokens: Vec::default(),
            base: 0,
            pp: Vec::default(),
            pp_next: 0,
            pos: 0,
            half: false,
            no_gt: false,
            nesting: 0,

            table: Table::default(),
            scope: ScopeId::GLOBAL,
            template: None,
            this: None,
            deferred: Vec::default(),

            pending: Vec::default(),
            depth: 0,
            aborted: false,
            references: Vec::default(),
            problems: Vec::default(),
            requestor,

            names,
        }
    }

    #[tracing::instrument(skip_all)]
    pub fn parse(mut self) -> Result<Unit<'i>, Failure> {
        self.emit(Event::EnterTranslationUnit(self.name.clone()));
        self.sync();
        if let Err(failure) = self.sequence(Kind::EndOfFile, Self::declaration) {
            debug!(%failure, "parse failed");
            return Err(failure);
        }
        self.sync();
        self.emit(Event::ExitTranslationUnit);
        self.check()?;

        debug!(
            tokens = self.base + self.tokens.len(),
            decls = self.table.decls().count(),
            problems = self.problems.len(),
            "parsed translation unit"
        );
        let files = self.cpp.files().to_vec();
        Ok(Unit::new(self.symbols, self.table, self.references, self.problems, files))
    }

    // Tokens

    fn fill(&mut self, index: usize) {
        while self.base + self.tokens.len() <= index {
            if let Some(last) = self.tokens.last() {
                if last.kind() == Kind::EndOfFile { return; }
            }
            let token = self.cpp.next_token();
            let at = self.base + self.tokens.len();
            for event in self.cpp.take_events() { self.pp.push((at, event)); }
            self.tokens.push(token);
        }
        self.sync();
    }

    fn token(&mut self, index: usize) -> Token<'i> {
        self.fill(index);
        let last = self.tokens.len() - 1;
        self.tokens[index.saturating_sub(self.base).min(last)]
    }

    /// Drop the tokens and delivered preprocessor events behind the current position, once
    /// enough have piled up. Only between declarations outside any speculation.
    fn discard(&mut self) {
        if self.depth > 0 || !self.deferred.is_empty() { return; }
        let keep = self.pos.saturating_sub(1);
        if keep < self.base + DISCARD_BELOW { return; }
        let count = (keep - self.base).min(self.tokens.len().saturating_sub(1));
        self.tokens.drain(..count);
        self.base += count;
        self.pp.drain(..self.pp_next);
        self.pp_next = 0;
        trace!(base = self.base, "discarded tokens");
    }

    fn peek_token(&mut self) -> Token<'i> {
        let token = self.token(self.pos);
        if self.half {
            let loc = token.loc();
            token.with_kind(Kind::Gt).with_loc(Loc { offset: loc.offset + 1, len: 1, ..loc })
        } else {
            token
        }
    }

    fn peek(&mut self) -> Kind { self.peek_token().kind() }

    fn nth(&mut self, n: usize) -> Kind {
        if n == 0 { self.peek() } else { self.token(self.pos + n).kind() }
    }

    fn bump(&mut self) -> Token<'i> {
        let token = self.peek_token();
        if token.kind() != Kind::EndOfFile {
            self.pos += 1;
            self.half = false;
        }
        self.sync();
        token
    }

    fn eat(&mut self, kind: Kind) -> Option<Token<'i>> {
        if self.peek() == kind { Some(self.bump()) } else { None }
    }

    fn expect(&mut self, kind: Kind) -> Parsed<Token<'i>> {
        self.eat(kind).ok_or(Miss::NoMatch)
    }

    /// Consume a `>` closing a template argument list, splitting `>>` in two.
    fn close_angle(&mut self) -> bool {
        match self.peek() {
            Kind::Gt => { self.bump(); true }
            Kind::GtGt => { self.half = true; true }
            _ => { false }
        }
    }

    /// Whether the next token could close a template argument list.
    fn at_close_angle(&mut self) -> bool { matches!(self.peek(), Kind::Gt | Kind::GtGt) }

    fn position(&self) -> (usize, bool) { (self.pos, self.half) }

    /// The location of the last token consumed.
    fn last_loc(&mut self) -> Loc { self.token(self.pos.saturating_sub(1)).loc() }

    fn is_identifier(&mut self, name: Symbol<'i, Kind>) -> bool {
        let token = self.peek_token();
        token.kind() == Kind::Identifier && token.spelling() == name
    }

    /// Skip an opening bracket and everything up to its match.
    fn skip_balanced(&mut self) {
        if !matches!(self.peek(), Kind::LeftBrace | Kind::LeftParen | Kind::LeftBracket) { return; }
        let mut depth = 0usize;
        loop {
            match self.peek() {
                Kind::EndOfFile => { return; }
                Kind::LeftBrace | Kind::LeftParen | Kind::LeftBracket => { depth += 1; }
                Kind::RightBrace | Kind::RightParen | Kind::RightBracket => {
                    depth = depth.saturating_sub(1);
                    if depth == 0 { self.bump(); return; }
                }
                _ => {}
            }
            self.bump();
        }
    }

    /// Skip to just past the `;` ending the current construct, or to just before the `}` ending
    /// the enclosing one. Unclosed parentheses and brackets never swallow that `}`.
    fn skip_to_end(&mut self) {
        let mut braces = 0usize;
        let mut parens = 0usize;
        loop {
            match self.peek() {
                Kind::EndOfFile => { return; }
                Kind::LeftBrace => { braces += 1; }
                Kind::LeftParen | Kind::LeftBracket => { parens += 1; }
                Kind::RightParen | Kind::RightBracket => { parens = parens.saturating_sub(1); }
                Kind::RightBrace => {
                    if braces == 0 { return; }
                    braces -= 1;
                    if braces == 0 && parens == 0 {
                        self.bump();
                        self.eat(Kind::Semi);
                        return;
                    }
                }
                Kind::Semi if braces == 0 && parens == 0 => { self.bump(); return; }
                _ => {}
            }
            self.bump();
        }
    }

    // Events

    /// Deliver the preprocessor's events for tokens up to the current one.
    fn sync(&mut self) {
        while let Some(&(at, _)) = self.pp.get(self.pp_next) {
            if at > self.pos { break; }
            let event = match self.pp[self.pp_next].1.clone() {
                PpEvent::EnterInclusion { name, file, loc } => { Event::EnterInclusion { name, file, loc } }
                PpEvent::ExitInclusion { file } => { Event::ExitInclusion(file) }
                PpEvent::Macro { name, loc, function_like } => { Event::Macro { name, loc, function_like } }
                PpEvent::Problem(problem) => { Event::Problem(problem) }
            };
            self.pp_next += 1;
            self.emit(event);
        }
    }

    fn emit(&mut self, event: Event<'i>) {
        if self.depth > 0 {
            self.pending.push(event);
        } else {
            self.deliver(event);
        }
    }

    fn deliver(&mut self, event: Event<'i>) {
        if self.aborted { return; }
        match event {
            Event::Reference(reference) => { self.references.push(reference); }
            Event::Problem(ref problem) => {
                debug!(%problem, "problem");
                self.problems.push(problem.clone());
            }
            _ => {}
        }
        if !event.deliver(&mut *self.requestor) {
            debug!("requestor aborted the parse");
            self.aborted = true;
        }
    }

    fn check(&self) -> Result<(), Failure> {
        if self.aborted { Err(Failure::Aborted) } else { Ok(()) }
    }

    fn problem(&mut self, kind: ProblemKind, loc: Loc, detail: impl Into<String>) {
        self.emit(Event::Problem(Problem::new(kind, loc, detail)));
    }

    fn undeclared(&mut self, name: Symbol<'i, Kind>, loc: Loc) {
        if self.mode == Mode::Complete {
            self.problem(ProblemKind::Undeclared, loc, name.as_str());
        }
    }

    fn reference(&mut self, loc: Loc, name: Symbol<'i, Kind>, decl: DeclId) {
        if self.mode == Mode::Complete {
            self.emit(Event::Reference(Reference { loc, name, decl }));
        }
    }

    fn entity(&self, decl: DeclId) -> Entity<'i> {
        let d = self.table.decl(decl);
        Entity { decl, kind: d.kind, name: d.name, loc: d.loc }
    }

    // Speculation

    /// Run one alternative. If it does not match, the token position, the symbol table and the
    /// events buffered since are put back. Nothing reaches the requestor while speculating.
    fn speculate<T>(&mut self, f: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        let checkpoint = Checkpoint {
            pos: self.pos,
            half: self.half,
            pending: self.pending.len(),
            pp_next: self.pp_next,
            mark: self.table.mark(),
            scope: self.scope,
            template: self.template.clone(),
        };
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;

        match result {
            Ok(value) => {
                self.table.commit(checkpoint.mark);
                if self.depth == 0 {
                    for event in mem::take(&mut self.pending) { self.deliver(event); }
                }
                Ok(value)
            }
            Err(miss) => {
                trace!(from = self.pos, to = checkpoint.pos, "backtrack");
                self.pos = checkpoint.pos;
                self.half = checkpoint.half;
                self.pending.truncate(checkpoint.pending);
                self.pp_next = checkpoint.pp_next;
                self.table.rollback(checkpoint.mark);
                self.scope = checkpoint.scope;
                self.template = checkpoint.template;
                Err(miss)
            }
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        if self.nesting >= MAX_NESTING {
            let loc = self.peek_token().loc();
            return Err(Failure::NestingTooDeep { loc }.into());
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn with_no_gt<T>(&mut self, no_gt: bool, f: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        let outer = mem::replace(&mut self.no_gt, no_gt);
        let result = f(self);
        self.no_gt = outer;
        result
    }

    // Scopes

    /// The scope declarations bind in: template parameter scopes are skipped.
    fn decl_scope(&self) -> ScopeId {
        let mut scope = self.scope;
        while self.table.scope(scope).kind == ScopeKind::Template {
            match self.table.scope(scope).parent {
                Some(parent) => { scope = parent; }
                None => { break; }
            }
        }
        scope
    }

    /// Run `f` in a new scope of `kind`.
    fn scoped<T>(&mut self, kind: ScopeKind, f: impl FnOnce(&mut Self) -> Parsed<T>) -> Parsed<T> {
        let scope = self.table.push_scope(kind, Some(self.scope), None);
        let outer = mem::replace(&mut self.scope, scope);
        let result = f(self);
        self.scope = outer;
        result
    }

    fn extent(&mut self, scope: ScopeId, start: Loc, end: Loc) {
        if start.file == end.file {
            let extent = Extent { file: start.file, start: start.offset, end: end.offset + end.len };
            self.table.set_extent(scope, extent);
        }
    }

    fn intern(&self, name: &str) -> Symbol<'i, Kind> { self.symbols.intern(name.as_bytes(), Kind::Identifier) }

    // Recovery

    /// Parse `item`s up to `close` or the end of input. An item that does not parse is
    /// reported once and skipped.
    fn sequence(&mut self, close: Kind, mut item: impl FnMut(&mut Self) -> Parsed<()>) -> Result<(), Failure> {
        loop {
            self.check()?;
            match self.peek() {
                Kind::EndOfFile => { return Ok(()); }
                kind if kind == close => { return Ok(()); }
                Kind::RightBrace => {
                    let token = self.bump();
                    self.problem(ProblemKind::Syntax, token.loc(), "unmatched `}`");
                    continue;
                }
                _ => {}
            }

            let start = self.position();
            match item(self) {
                Ok(()) => {}
                Err(Miss::NoMatch) => { self.recover(start); }
                Err(Miss::Fatal(failure)) => { return Err(failure); }
            }
        }
    }

    fn recover(&mut self, start: (usize, bool)) {
        let token = self.peek_token();
        match token.kind() {
            Kind::EndOfFile => { self.problem(ProblemKind::UnexpectedEof, token.loc(), "incomplete declaration"); }
            _ => { self.problem(ProblemKind::Syntax, token.loc(), format!("unexpected `{}`", token.spelling())); }
        }
        self.skip_to_end();
        if self.position() == start { self.bump(); }
    }

    /// Expect the `}` closing a construct, reporting the end of input instead.
    fn close_brace(&mut self) -> Loc {
        match self.eat(Kind::RightBrace) {
            Some(token) => { token.loc() }
            None => {
                let loc = self.peek_token().loc();
                self.problem(ProblemKind::UnexpectedEof, loc, "expected `}`");
                loc
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::ast::{Counter, Events, Event, Tree};
    use crate::config::{Config, Memory};
    use crate::error::{Failure, ProblemKind};
    use crate::lex::Kind;
    use crate::scope::DeclKind;
    use crate::symbols::SymbolMap;

    fn tree(text: &str) -> String {
        let symbols = SymbolMap::default();
        let mut tree = Tree::default();
        super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut tree)
            .unwrap();
        tree.finish().to_string()
    }

    #[test]
    fn namespaces_and_classes() {
        let text = "namespace N { struct S { int x; void f(); }; int y; }";
        assert_eq!(tree(text), "\
translation unit a.cc
  namespace N
    struct S
      field x
      method f
    variable y
");
    }

    #[test]
    fn function_bodies() {
        let text = "int g(int a) { int b = a; { int c; } return b; }";
        assert_eq!(tree(text), "\
translation unit a.cc
  function g
  body
    variable b
    block
      variable c
");
    }

    #[test]
    fn structural_mode_skips_bodies() {
        let symbols = SymbolMap::default();
        let mut counter = Counter::default();
        let text = "int f() { undeclared(1); int x; return 0; } int y;";
        let config = Config::cpp().structural();
        let unit = super::parse(&symbols, &config, &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut counter)
            .unwrap();
        assert_eq!(counter.declarations, 2);
        assert_eq!(counter.references, 0);
        assert!(unit.problems.is_empty());
    }

    #[test]
    fn events_stay_balanced_after_errors() {
        let symbols = SymbolMap::default();
        let mut events = Events::default();
        let text = "namespace N { struct S { int x = ; @ }; void f() { ) } } int ok;";
        let unit = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut events)
            .unwrap();
        assert!(unit.problems.iter().any(|problem| problem.kind == ProblemKind::Syntax));

        let depth: isize = events.events.iter().map(Event::depth_change).sum();
        assert_eq!(depth, 0);
        assert!(events.events.iter().any(|event| matches!(event,
            Event::Variable(entity) if entity.name.map(|name| name.as_str()) == Some("ok"))));
    }

    #[test]
    fn unclosed_parenthesis_keeps_later_declarations() {
        let symbols = SymbolMap::default();
        let mut events = Events::default();
        let text = "int x; void f() { int y = (x; } int z;";
        let unit = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut events)
            .unwrap();
        assert_eq!(unit.lookup("z").len(), 1);
        assert_eq!(unit.table.decl(unit.lookup("z")[0]).scope, unit.table.decl(unit.lookup("x")[0]).scope);
        assert!(unit.problems.iter().any(|problem| problem.kind == ProblemKind::Syntax));
        assert!(unit.problems.iter().all(|problem| problem.kind != ProblemKind::UnexpectedEof));

        let depth: isize = events.events.iter().map(Event::depth_change).sum();
        assert_eq!(depth, 0);
    }

    #[test]
    fn consumed_tokens_are_discarded() {
        let symbols = SymbolMap::default();
        let mut text = String::from("#define T int\n");
        for i in 0..1000 { text.push_str(&format!("T a{};\n", i)); }
        text.push_str("struct S { int f() { return g(); } int g(); };\nint last = a0;\n");

        let mut sink = ();
        let config = Config::cpp();
        let memory = Memory::default();
        let mut parser = super::Parser::new(&symbols, &config, &memory, "a.cc", Rc::from(text.as_bytes()), &mut sink);
        parser.sequence(Kind::EndOfFile, super::Parser::declaration).unwrap();
        assert!(parser.base > 0);
        assert!(parser.tokens.len() < 2 * super::DISCARD_BELOW);

        let unit = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        assert!(unit.problems.is_empty(), "{:?}", unit.problems);
        assert_eq!(unit.references_to(unit.lookup("a0")[0]).len(), 1);
        assert_eq!(unit.references_to(unit.lookup("S::g")[0]).len(), 1);
    }

    #[test]
    fn vexing_parse() {
        let symbols = SymbolMap::default();
        let text = "struct T {}; int a; T f(int); T g(a); T h();";
        let unit = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ())
            .unwrap();
        let kind = |name: &str| unit.table.decl(unit.lookup(name)[0]).kind;
        assert_eq!(kind("f"), DeclKind::Function);
        assert_eq!(kind("g"), DeclKind::Variable);
        assert_eq!(kind("h"), DeclKind::Function);
    }

    #[test]
    fn template_arguments_or_comparison() {
        let symbols = SymbolMap::default();
        let text = "template <int N> struct A { static const int v = N; };\n\
                    int a = 1, b = 2;\n\
                    bool c = a < b;\n\
                    int d = A<3>::v;\n\
                    A<(2 > 1)> e;";
        let result = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ());
        let unit = result.unwrap();
        assert!(!unit.lookup("c").is_empty());
        assert!(!unit.lookup("e").is_empty());
        assert!(!unit.lookup("d").is_empty());
    }

    #[test]
    fn unterminated_template_arguments() {
        let symbols = SymbolMap::default();
        let text = "template <class T> struct A {}; A<int x;";
        let result = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut ());
        assert!(matches!(result, Err(Failure::UnterminatedTemplateArguments { ref name, .. }) if name == "A"));
    }

    #[test]
    fn rejected_problem_aborts() {
        struct Strict;
        impl<'i> crate::ast::Requestor<'i> for Strict {
            fn accept_problem(&mut self, _: &crate::error::Problem) -> bool { false }
        }

        let symbols = SymbolMap::default();
        let text = "int x = y; int z;";
        let result = super::parse(&symbols, &Config::cpp(), &Memory::default(), "a.cc", Rc::from(text.as_bytes()), &mut Strict);
        assert_eq!(result.err(), Some(Failure::Aborted));
    }

    #[test]
    fn inclusions_in_order() {
        let symbols = SymbolMap::default();
        let source = Memory::default().with("b.h", "int b;\n");
        let mut events = Events::default();
        let text = "int a;\n#include \"b.h\"\nint c;\n";
        super::parse(&symbols, &Config::cpp(), &source, "a.cc", Rc::from(text.as_bytes()), &mut events).unwrap();

        let order: Vec<String> = events.events.iter().filter_map(|event| match event {
            Event::Variable(entity) => { entity.name.map(|name| name.as_str().to_owned()) }
            Event::EnterInclusion { name, .. } => { Some(format!("enter {}", name)) }
            Event::ExitInclusion(_) => { Some("exit".to_owned()) }
            _ => { None }
        }).collect();
        assert_eq!(order, ["a", "enter b.h", "b", "exit", "c"]);
    }
}
