use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::mem;
use std::rc::Rc;

use tracing::{debug, trace};

use crate::config::{Config, Source};
use crate::error::{Problem, ProblemKind};
use crate::lex::{self, FileId, Kind, Loc, Shape};
use crate::symbols::{SymbolMap, Symbol};

/// Translation phase 4 - preprocessing directives and macro expansion
pub struct Preprocessor<'i, 'c> {
    cpp: State<'i, 'c>,
    tokens: Tokens<'i>,
}

/// Something the requestor may want to hear about, other than tokens.
#[derive(Clone, Debug)]
pub enum PpEvent<'i> {
    EnterInclusion { name: String, file: FileId, loc: Loc },
    ExitInclusion { file: FileId },
    Macro { name: Symbol<'i, Kind>, loc: Loc, function_like: bool },
    Problem(Problem),
}

/// Definitions and directive state, shared by every file in the translation unit.
struct State<'i, 'c> {
    symbols: &'i SymbolMap<Kind>,
    source: &'c dyn Source,
    max_depth: usize,

    files: Vec<String>,
    once: HashSet<String>,
    lexers: Vec<Frame>,
    conditionals: Vec<Conditional>,
    macros: HashMap<Symbol<'i, Kind>, Macro<'i>>,
    events: Vec<PpEvent<'i>>,

    defined: Symbol<'i, Kind>,
    true_: Symbol<'i, Kind>,
    va_args: Symbol<'i, Kind>,
    once_: Symbol<'i, Kind>,

    if_: Symbol<'i, Kind>,
    ifdef: Symbol<'i, Kind>,
    ifndef: Symbol<'i, Kind>,
    elif: Symbol<'i, Kind>,
    else_: Symbol<'i, Kind>,
    endif: Symbol<'i, Kind>,
    include: Symbol<'i, Kind>,
    define: Symbol<'i, Kind>,
    undef: Symbol<'i, Kind>,
    line: Symbol<'i, Kind>,
    error: Symbol<'i, Kind>,
    warning: Symbol<'i, Kind>,
    pragma: Symbol<'i, Kind>,
}

/// A suspended includer.
struct Frame { tokens: lex::Tokens, base: usize }

#[derive(Copy, Clone)]
struct Conditional {
    /// Whether the enclosing group was live when this conditional began.
    live: bool,
    /// Whether some group of this conditional has been taken already.
    taken: bool,
    has_else: bool,
}

struct Macro<'i> {
    parameters: Option<Vec<Symbol<'i, Kind>>>,
    variadic: bool,
    replacement: Vec<Pending<'i>>,
    active: Cell<bool>,
}

/// The expansion side of the preprocessor: the current lexer and pending macro output.
struct Tokens<'i> {
    newline: bool,
    base: usize,
    tokens: lex::Tokens,

    /// Expanded tokens not yet consumed, in reverse order.
    buffer: Vec<Pending<'i>>,
    invoked: Vec<Invoked<'i>>,

    problems: Vec<Problem>,
    scratch: Vec<u8>,
}

#[derive(Copy, Clone)]
struct Pending<'i> {
    space: Shape,
    token: lex::Token<'i>,
    /// Cleared for identifiers that named a macro while it was being expanded.
    replace: bool,
}

/// The macro `name` stays active until the buffer shrinks back to `begin`.
#[derive(Copy, Clone)]
struct Invoked<'i> { name: Symbol<'i, Kind>, begin: usize }

#[derive(Copy, Clone)]
struct Value { unsigned: bool, value: u64 }

impl<'i, 'c> Preprocessor<'i, 'c> {
    /// Start preprocessing `text`, the main file. Keywords for `config.language` are interned
    /// into `symbols` first, so a `SymbolMap` should only ever serve one language.
    pub fn new(
        symbols: &'i SymbolMap<Kind>, config: &Config, source: &'c dyn Source,
        name: &str, text: Rc<[u8]>,
    ) -> Preprocessor<'i, 'c> {
        lex::Tokens::keywords(symbols, config.language);
        let intern = |name: &str| symbols.intern(name.as_bytes(), Kind::Identifier);

        let mut cpp = State {
            symbols,
            source,
            max_depth: config.max_include_depth,

            files: vec![name.to_owned()],
            once: HashSet::default(),
            lexers: Vec::default(),
            conditionals: Vec::default(),
            macros: HashMap::default(),
            events: Vec::default(),

            defined: intern("defined"),
            true_: intern("true"),
            va_args: intern("__VA_ARGS__"),
            once_: intern("once"),

            if_: intern("if"),
            ifdef: intern("ifdef"),
            ifndef: intern("ifndef"),
            elif: intern("elif"),
            else_: intern("else"),
            endif: intern("endif"),
            include: intern("include"),
            define: intern("define"),
            undef: intern("undef"),
            line: intern("line"),
            error: intern("error"),
            warning: intern("warning"),
            pragma: intern("pragma"),
        };

        let mut predefined: Vec<(&str, &str)> = config.predefined();
        predefined.extend(config.macros.iter().map(|(name, value)| (&name[..], &value[..])));
        for (name, value) in predefined {
            cpp.define_text(name, value);
        }

        let tokens = Tokens {
            newline: true,
            base: 0,
            tokens: lex::Tokens::from_bytes(text, FileId(0)),
            buffer: Vec::default(),
            invoked: Vec::default(),
            problems: Vec::default(),
            scratch: Vec::default(),
        };

        Preprocessor { cpp, tokens }
    }

    /// The next token after phase 7 conversion: keywords have their own kinds.
    pub fn next_token(&mut self) -> lex::Token<'i> {
        let token = self.tokens.preprocessed_token(&mut self.cpp);
        let kind = token.keyword_kind();
        token.with_kind(kind)
    }

    /// Take the events produced since the last call.
    pub fn take_events(&mut self) -> Vec<PpEvent<'i>> { mem::take(&mut self.cpp.events) }

    /// File names, indexed by `FileId`.
    pub fn files(&self) -> &[String] { &self.cpp.files }

    pub fn is_defined(&self, name: &str) -> bool {
        self.cpp.symbols.get(name.as_bytes()).map_or(false, |name| self.cpp.macros.contains_key(&name))
    }
}

impl<'i, 'c> State<'i, 'c> {
    fn define_text(&mut self, name: &str, value: &str) {
        let mut lexer = lex::Tokens::from_bytes(Rc::from(value.as_bytes()), FileId(0));
        let mut scratch = Vec::default();
        let mut replacement = Vec::default();
        loop {
            let space = lexer.whitespace(false);
            let token = lexer.preprocessing_token(self.symbols, &mut scratch);
            if token.kind() == Kind::EndOfFile { break; }
            replacement.push(Pending { space: space.kind, token, replace: true });
        }

        let name = self.symbols.intern(name.as_bytes(), Kind::Identifier);
        let active = Cell::new(false);
        self.macros.insert(name, Macro { parameters: None, variadic: false, replacement, active });
    }

    fn problem(&mut self, kind: ProblemKind, loc: Loc, detail: impl Into<String>) {
        let problem = Problem::new(kind, loc, detail);
        debug!(%problem, "preprocessor problem");
        self.events.push(PpEvent::Problem(problem));
    }
}

impl<'i> Tokens<'i> {
    fn preprocessed_token(&mut self, cpp: &mut State<'i, '_>) -> lex::Token<'i> {
        loop {
            let token = self.expanded_token(cpp, false);
            cpp.events.extend(self.problems.drain(..).map(PpEvent::Problem));

            match token.token.kind() {
                Kind::EndOfFile => {
                    if cpp.conditionals.len() > self.base {
                        cpp.problem(ProblemKind::UnterminatedConditional, token.token.loc(), "");
                        cpp.conditionals.truncate(self.base);
                    }

                    if let Some(Frame { tokens, base }) = cpp.lexers.pop() {
                        let file = self.tokens.file();
                        debug!(file = file.0, "leaving include");
                        cpp.events.push(PpEvent::ExitInclusion { file });
                        self.tokens = tokens;
                        self.base = base;
                        self.newline = true;
                        continue;
                    }
                }

                Kind::Hash if token.space == Shape::Newline && self.buffer.is_empty() => {
                    self.directive(cpp, token.token.loc());
                    continue;
                }

                _ => {}
            }

            break token.token;
        }
    }

    fn directive(&mut self, cpp: &mut State<'i, '_>, loc: Loc) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        let name = match token.kind() {
            Kind::EndOfLine => { return; }
            Kind::Identifier => { token.spelling() }
            // GNU line markers
            Kind::Number => { return self.discard_directive(cpp); }
            _ => { return self.bad_directive(cpp, token.loc(), "expected directive name"); }
        };
        trace!(directive = %name);

        if name == cpp.if_ {
            self.if_directive(cpp);
        } else if name == cpp.ifdef || name == cpp.ifndef {
            self.ifdef_directive(cpp, name == cpp.ifdef);
        } else if name == cpp.elif || name == cpp.else_ {
            self.else_directive(cpp, token.loc(), name == cpp.else_);
        } else if name == cpp.endif {
            self.endif_directive(cpp, token.loc());
        } else if name == cpp.include {
            self.include_directive(cpp, loc);
        } else if name == cpp.define {
            self.define_directive(cpp);
        } else if name == cpp.undef {
            self.undef_directive(cpp);
        } else if name == cpp.error {
            let message = self.rest_of_directive(cpp);
            cpp.problem(ProblemKind::ErrorDirective, loc, message);
        } else if name == cpp.pragma {
            self.pragma_directive(cpp);
        } else if name == cpp.line || name == cpp.warning {
            self.discard_directive(cpp);
        } else {
            self.bad_directive(cpp, token.loc(), format!("unknown directive `{}`", name));
        }
    }

    fn if_directive(&mut self, cpp: &mut State<'i, '_>) {
        let active = self.condition(cpp);
        cpp.conditionals.push(Conditional { live: true, taken: active, has_else: false });
        if !active { self.skip_groups(cpp); }
    }

    fn ifdef_directive(&mut self, cpp: &mut State<'i, '_>, defined: bool) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        let active = match token.kind() {
            Kind::Identifier => {
                let active = cpp.macros.contains_key(&token.spelling()) == defined;
                self.end_directive(cpp);
                active
            }
            _ => {
                self.bad_directive(cpp, token.loc(), "expected macro name");
                false
            }
        };

        cpp.conditionals.push(Conditional { live: true, taken: active, has_else: false });
        if !active { self.skip_groups(cpp); }
    }

    /// `#elif` or `#else` reached from a live group: every remaining group is dead.
    fn else_directive(&mut self, cpp: &mut State<'i, '_>, loc: Loc, else_: bool) {
        self.discard_directive(cpp);
        if cpp.conditionals.len() <= self.base {
            return cpp.problem(ProblemKind::UnbalancedConditional, loc, "");
        }
        if let Some(conditional) = cpp.conditionals.last_mut() {
            if conditional.has_else {
                cpp.problem(ProblemKind::BadDirective, loc, "directive after #else");
            } else if else_ {
                conditional.has_else = true;
            }
        }
        self.skip_groups(cpp);
    }

    fn endif_directive(&mut self, cpp: &mut State<'i, '_>, loc: Loc) {
        self.end_directive(cpp);
        if cpp.conditionals.len() <= self.base {
            return cpp.problem(ProblemKind::UnbalancedConditional, loc, "");
        }
        cpp.conditionals.pop();
    }

    /// Skip dead groups until one is taken or the conditional ends.
    fn skip_groups(&mut self, cpp: &mut State<'i, '_>) {
        loop {
            let token = self.unexpanded_token(cpp, false);
            match token.token.kind() {
                Kind::EndOfFile => { return; }
                Kind::Hash if token.space == Shape::Newline => {}
                _ => { continue; }
            }

            let Pending { token, .. } = self.unexpanded_token(cpp, true);
            let name = match token.kind() {
                Kind::EndOfLine => { continue; }
                Kind::Identifier => { token.spelling() }
                _ => { self.discard_directive(cpp); continue; }
            };

            if name == cpp.if_ || name == cpp.ifdef || name == cpp.ifndef {
                self.discard_directive(cpp);
                cpp.conditionals.push(Conditional { live: false, taken: false, has_else: false });
            } else if name == cpp.elif {
                let Conditional { live, taken, has_else } = match cpp.conditionals.last() {
                    Some(&conditional) => { conditional }
                    None => { self.discard_directive(cpp); continue; }
                };
                if has_else {
                    cpp.problem(ProblemKind::BadDirective, token.loc(), "#elif after #else");
                }
                if !live || taken || has_else {
                    self.discard_directive(cpp);
                    continue;
                }
                if self.condition(cpp) {
                    if let Some(conditional) = cpp.conditionals.last_mut() { conditional.taken = true; }
                    return;
                }
            } else if name == cpp.else_ {
                self.end_directive(cpp);
                let conditional = match cpp.conditionals.last_mut() {
                    Some(conditional) => { conditional }
                    None => { continue; }
                };
                if conditional.has_else {
                    cpp.problem(ProblemKind::BadDirective, token.loc(), "#else after #else");
                    continue;
                }
                conditional.has_else = true;
                if conditional.live && !conditional.taken {
                    conditional.taken = true;
                    return;
                }
            } else if name == cpp.endif {
                self.end_directive(cpp);
                if let Some(Conditional { live: true, .. }) = cpp.conditionals.pop() { return; }
            } else {
                self.discard_directive(cpp);
            }
        }
    }

    /// Evaluate the controlling expression of `#if` or `#elif`.
    fn condition(&mut self, cpp: &mut State<'i, '_>) -> bool {
        let mut token = self.expanded_token(cpp, true);
        let loc = token.token.loc();
        let value = self.constant_expression(cpp, &mut token, true, 1);
        cpp.events.extend(self.problems.drain(..).map(PpEvent::Problem));
        match value {
            Some(Value { value, .. }) if token.token.kind() == Kind::EndOfLine => { value != 0 }
            _ => {
                if token.token.kind() != Kind::EndOfLine { self.discard_directive(cpp); }
                cpp.problem(ProblemKind::BadDirective, loc, "invalid constant expression");
                false
            }
        }
    }

    fn include_directive(&mut self, cpp: &mut State<'i, '_>, loc: Loc) {
        let space = self.tokens.whitespace(true);
        if space.kind == Shape::Newline {
            self.newline = true;
            return cpp.problem(ProblemKind::BadDirective, loc, "expected header name");
        }

        let mut header = Vec::default();
        match self.tokens.try_header_name(cpp.symbols, &mut self.scratch) {
            Some(token) => { token.write_spelling(&mut header); }
            None => {
                let Pending { token, .. } = self.expanded_token(cpp, true);
                match token.kind() {
                    Kind::String => { token.write_spelling(&mut header); }
                    Kind::Lt => {
                        header.push(b'<');
                        loop {
                            let Pending { space, token, .. } = self.expanded_token(cpp, true);
                            match token.kind() {
                                Kind::EndOfLine => { header.clear(); break; }
                                Kind::Gt => { header.push(b'>'); break; }
                                _ => {}
                            }
                            if space != Shape::None && header.len() > 1 { header.push(b' '); }
                            token.write_spelling(&mut header);
                        }
                    }
                    _ => {}
                }
            }
        }
        self.end_directive(cpp);

        let (angle, name) = match header[..] {
            [b'<', ref name @ .., b'>'] if !name.is_empty() => { (true, name) }
            [b'"', ref name @ .., b'"'] if !name.is_empty() => { (false, name) }
            _ => { return cpp.problem(ProblemKind::BadDirective, loc, "expected header name"); }
        };
        let name = String::from_utf8_lossy(name).into_owned();

        if cpp.lexers.len() >= cpp.max_depth {
            return cpp.problem(ProblemKind::IncludeDepth, loc, name);
        }
        let includer = &cpp.files[self.tokens.file().0 as usize];
        let (path, text) = match cpp.source.include(&name, angle, includer) {
            Some(file) => { file }
            None => { return cpp.problem(ProblemKind::IncludeNotFound, loc, name); }
        };
        if cpp.once.contains(&path) {
            trace!(%path, "skipping #pragma once file");
            return;
        }

        let file = FileId(cpp.files.len() as u32);
        debug!(%path, file = file.0, "entering include");
        cpp.files.push(path.clone());
        cpp.events.push(PpEvent::EnterInclusion { name: path, file, loc });

        let tokens = mem::replace(&mut self.tokens, lex::Tokens::from_bytes(text, file));
        let base = mem::replace(&mut self.base, cpp.conditionals.len());
        cpp.lexers.push(Frame { tokens, base });
        self.newline = true;
    }

    fn define_directive(&mut self, cpp: &mut State<'i, '_>) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        let name = match token.kind() {
            Kind::Identifier => { token.spelling() }
            _ => { return self.bad_directive(cpp, token.loc(), "expected macro name"); }
        };
        let loc = token.loc();

        let mut variadic = false;
        let parameters = if self.tokens.try_lparen() {
            let mut parameters = Vec::default();
            loop {
                let Pending { token, .. } = self.unexpanded_token(cpp, true);
                match token.kind() {
                    Kind::RightParen if parameters.is_empty() => { break; }
                    Kind::Identifier => { parameters.push(token.spelling()); }
                    Kind::Ellipsis => { parameters.push(cpp.va_args); variadic = true; }
                    _ => { return self.bad_directive(cpp, token.loc(), "expected macro parameter"); }
                }

                let Pending { mut token, .. } = self.unexpanded_token(cpp, true);
                if token.kind() == Kind::Ellipsis && !variadic {
                    // GNU named variadic parameter
                    variadic = true;
                    token = self.unexpanded_token(cpp, true).token;
                }
                match token.kind() {
                    Kind::Comma if !variadic => {}
                    Kind::RightParen => { break; }
                    _ => { return self.bad_directive(cpp, token.loc(), "expected `,` or `)`"); }
                }
            }
            Some(parameters)
        } else {
            None
        };

        let mut replacement = Vec::default();
        loop {
            let token = self.unexpanded_token(cpp, true);
            if token.token.kind() == Kind::EndOfLine { break; }
            replacement.push(token);
        }

        let paste_at_edge = |token: Option<&Pending<'_>>| {
            token.map_or(false, |token| token.token.kind() == Kind::HashHash)
        };
        if paste_at_edge(replacement.first()) || paste_at_edge(replacement.last()) {
            return cpp.problem(ProblemKind::BadDirective, loc, "`##` at edge of replacement list");
        }
        if let Some(ref parameters) = parameters {
            let stringizes_parameter = |(i, token): (usize, &Pending<'i>)| {
                token.token.kind() != Kind::Hash || replacement.get(i + 1).map_or(false, |next| {
                    next.token.kind() == Kind::Identifier && parameters.contains(&next.token.spelling())
                })
            };
            if !replacement.iter().enumerate().all(stringizes_parameter) {
                return cpp.problem(ProblemKind::BadDirective, loc, "`#` is not followed by a parameter");
            }
        }

        debug!(%name, function_like = parameters.is_some(), "define");
        let function_like = parameters.is_some();
        let active = Cell::new(false);
        cpp.macros.insert(name, Macro { parameters, variadic, replacement, active });
        cpp.events.push(PpEvent::Macro { name, loc, function_like });
    }

    fn undef_directive(&mut self, cpp: &mut State<'i, '_>) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        match token.kind() {
            Kind::Identifier => {
                cpp.macros.remove(&token.spelling());
                self.end_directive(cpp);
            }
            _ => { self.bad_directive(cpp, token.loc(), "expected macro name"); }
        }
    }

    fn pragma_directive(&mut self, cpp: &mut State<'i, '_>) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        if token.kind() == Kind::Identifier && token.spelling() == cpp.once_ {
            let file = cpp.files[self.tokens.file().0 as usize].clone();
            cpp.once.insert(file);
        }
        if token.kind() != Kind::EndOfLine { self.discard_directive(cpp); }
    }

    /// The remaining tokens of a directive, as text.
    fn rest_of_directive(&mut self, cpp: &State<'i, '_>) -> String {
        let mut text = Vec::default();
        loop {
            let Pending { space, token, .. } = self.unexpanded_token(cpp, true);
            if token.kind() == Kind::EndOfLine { break; }
            if space != Shape::None && !text.is_empty() { text.push(b' '); }
            token.write_spelling(&mut text);
        }
        String::from_utf8_lossy(&text).into_owned()
    }

    /// Expect the end of a directive. Extra tokens are ignored.
    fn end_directive(&mut self, cpp: &State<'i, '_>) {
        let Pending { token, .. } = self.unexpanded_token(cpp, true);
        if token.kind() != Kind::EndOfLine { self.discard_directive(cpp); }
    }

    fn discard_directive(&mut self, cpp: &State<'i, '_>) {
        while self.unexpanded_token(cpp, true).token.kind() != Kind::EndOfLine {}
    }

    fn bad_directive(&mut self, cpp: &mut State<'i, '_>, loc: Loc, detail: impl Into<String>) {
        cpp.problem(ProblemKind::BadDirective, loc, detail);
        self.discard_directive(cpp);
    }

    fn constant_expression(
        &mut self, cpp: &State<'i, '_>, token: &mut Pending<'i>, live: bool, precedence: u8
    ) -> Option<Value> {
        let mut left = match token.token.kind() {
            Kind::Identifier => {
                let name = token.token.spelling();
                let value = if name == cpp.defined {
                    *token = self.unexpanded_token(cpp, true);
                    let paren = token.token.kind() == Kind::LeftParen;
                    if paren { *token = self.unexpanded_token(cpp, true); }
                    if token.token.kind() != Kind::Identifier { return None; }
                    let value = cpp.macros.contains_key(&token.token.spelling()) as u64;
                    if paren {
                        *token = self.unexpanded_token(cpp, true);
                        if token.token.kind() != Kind::RightParen { return None; }
                    }
                    value
                } else {
                    (name == cpp.true_) as u64
                };
                *token = self.expanded_token(cpp, true);
                Value { unsigned: false, value }
            }
            Kind::Number => {
                let number = lex::number(token.token.spelling().key())?;
                if number.float { return None; }
                let unsigned = number.unsigned || number.overflow || number.value > i64::MAX as u64;
                *token = self.expanded_token(cpp, true);
                Value { unsigned, value: number.value }
            }
            Kind::Character => {
                let value = lex::character(token.token.spelling().key())?;
                *token = self.expanded_token(cpp, true);
                Value { unsigned: false, value }
            }
            Kind::LeftParen => {
                *token = self.expanded_token(cpp, true);
                let value = self.constant_expression(cpp, token, live, 1)?;
                if token.token.kind() != Kind::RightParen { return None; }
                *token = self.expanded_token(cpp, true);
                value
            }
            Kind::Plus | Kind::Minus | Kind::Tilde | Kind::Exclaim => {
                let operator = token.token.kind();
                *token = self.expanded_token(cpp, true);
                let mut value = self.constant_expression(cpp, token, live, 15)?;
                match operator {
                    Kind::Minus => { value.value = value.value.wrapping_neg(); }
                    Kind::Tilde => { value.value = !value.value; }
                    Kind::Exclaim => { value = Value { unsigned: false, value: (value.value == 0) as u64 }; }
                    _ => {}
                }
                value
            }
            _ => { return None; }
        };

        loop {
            let operator = token.token.kind();
            let op = match operator {
                Kind::Star | Kind::Slash | Kind::Percent => { 14 }
                Kind::Plus | Kind::Minus => { 13 }
                Kind::LtLt | Kind::GtGt => { 12 }
                Kind::Lt | Kind::Gt | Kind::LtEq | Kind::GtEq => { 10 }
                Kind::EqEq | Kind::ExclaimEq => { 9 }
                Kind::Amp => { 8 }
                Kind::Caret => { 7 }
                Kind::Pipe => { 6 }
                Kind::AmpAmp => { 5 }
                Kind::PipePipe => { 4 }
                Kind::Question => { 3 }
                Kind::Comma => { 1 }
                Kind::Colon | Kind::RightParen | Kind::EndOfLine => { 0 }
                _ => { return None; }
            };
            if op < precedence { return Some(left); }

            *token = self.expanded_token(cpp, true);
            let right_live = match operator {
                Kind::AmpAmp if left.value == 0 => { false }
                Kind::PipePipe if left.value != 0 => { false }
                Kind::Question if left.value == 0 => { false }
                _ => { live }
            };
            let right_precedence = match operator {
                Kind::Question => { 1 }
                _ => { op + 1 }
            };
            let right = self.constant_expression(cpp, token, right_live, right_precedence)?;

            if operator == Kind::Question {
                if token.token.kind() != Kind::Colon { return None; }
                *token = self.expanded_token(cpp, true);
                let otherwise = self.constant_expression(cpp, token, live && left.value == 0, 3)?;
                let unsigned = right.unsigned | otherwise.unsigned;
                let value = if left.value != 0 { right.value } else { otherwise.value };
                left = Value { unsigned, value };
                continue;
            }

            let unsigned = match operator {
                Kind::LtLt | Kind::GtGt => { left.unsigned }
                Kind::AmpAmp | Kind::PipePipe | Kind::Comma => { false }
                _ => {
                    let unsigned = left.unsigned | right.unsigned;
                    left.unsigned = unsigned;
                    match operator {
                        Kind::Lt | Kind::Gt | Kind::LtEq | Kind::GtEq |
                        Kind::EqEq | Kind::ExclaimEq => { false }
                        _ => { unsigned }
                    }
                }
            };
            let (l, r) = (left.value, right.value);
            let compare = |ordering: fn(&i128, &i128) -> bool| {
                let (l, r) = if left.unsigned { (l as i128, r as i128) } else { (l as i64 as i128, r as i64 as i128) };
                ordering(&l, &r) as u64
            };
            let value = match operator {
                Kind::Star => { l.wrapping_mul(r) }
                Kind::Slash | Kind::Percent if r == 0 => {
                    if live { return None; }
                    0
                }
                Kind::Slash if unsigned => { l / r }
                Kind::Slash => { (l as i64).wrapping_div(r as i64) as u64 }
                Kind::Percent if unsigned => { l % r }
                Kind::Percent => { (l as i64).wrapping_rem(r as i64) as u64 }
                Kind::Plus => { l.wrapping_add(r) }
                Kind::Minus => { l.wrapping_sub(r) }
                Kind::LtLt => if r >= 64 { 0 } else { l << r }
                Kind::GtGt if unsigned => if r >= 64 { 0 } else { l >> r }
                Kind::GtGt => { ((l as i64) >> r.min(63)) as u64 }
                Kind::Lt => { compare(i128::lt) }
                Kind::Gt => { compare(i128::gt) }
                Kind::LtEq => { compare(i128::le) }
                Kind::GtEq => { compare(i128::ge) }
                Kind::EqEq => { (l == r) as u64 }
                Kind::ExclaimEq => { (l != r) as u64 }
                Kind::Amp => { l & r }
                Kind::Caret => { l ^ r }
                Kind::Pipe => { l | r }
                Kind::AmpAmp => { (l != 0 && r != 0) as u64 }
                Kind::PipePipe => { (l != 0 || r != 0) as u64 }
                _ => { r }
            };
            left = Value { unsigned, value };
        }
    }

    fn expanded_token(&mut self, cpp: &State<'i, '_>, horizontal: bool) -> Pending<'i> {
        loop {
            let mut token = self.unexpanded_token(cpp, horizontal);
            if !self.try_replace_macro(cpp, &mut token, horizontal) { break token; }
        }
    }

    fn finish_invocations(&mut self, cpp: &State<'i, '_>) {
        while let Some(&Invoked { name, begin }) = self.invoked.last() {
            if begin < self.buffer.len() { break; }
            if let Some(definition) = cpp.macros.get(&name) { definition.active.set(false); }
            self.invoked.pop();
        }
    }

    fn unexpanded_token(&mut self, cpp: &State<'i, '_>, horizontal: bool) -> Pending<'i> {
        self.finish_invocations(cpp);
        if let Some(mut token) = self.buffer.pop() {
            if self.newline { token.space = Shape::Newline; }
            self.newline = false;
            return token;
        }

        let mut space = self.tokens.whitespace(horizontal).kind;
        if self.newline { space = Shape::Newline; }
        if space == Shape::Newline { self.newline = true; }

        if horizontal && self.newline {
            let loc = Loc { file: self.tokens.file(), offset: self.tokens.offset(), len: 0 };
            let token = lex::Token::marker(cpp.symbols, Kind::EndOfLine, loc);
            return Pending { space, token, replace: true };
        }

        let token = self.tokens.preprocessing_token(cpp.symbols, &mut self.scratch);
        self.newline = false;
        Pending { space, token, replace: true }
    }

    fn try_left_paren(&mut self, cpp: &State<'i, '_>, horizontal: bool) -> bool {
        self.finish_invocations(cpp);
        if let Some(token) = self.buffer.last() {
            if token.token.kind() != Kind::LeftParen { return false; }
            self.buffer.pop();
            self.newline = false;
            return true;
        }

        let mut lexer = self.tokens.clone();
        if lexer.whitespace(horizontal).kind == Shape::Newline && horizontal { return false; }
        let token = lexer.preprocessing_token(cpp.symbols, &mut self.scratch);
        if token.kind() != Kind::LeftParen { return false; }

        self.tokens = lexer;
        self.newline = false;
        true
    }

    fn try_replace_macro(&mut self, cpp: &State<'i, '_>, token: &mut Pending<'i>, horizontal: bool) -> bool {
        if token.token.kind() != Kind::Identifier { return false; }
        let name = token.token.spelling();
        let definition = match cpp.macros.get(&name) {
            Some(definition) => { definition }
            None => { return false; }
        };
        if definition.active.get() { token.replace = false; }
        if !token.replace { return false; }

        let loc = token.token.loc();
        let params = definition.parameters.as_deref().unwrap_or(&[]);
        let function_like = definition.parameters.is_some();

        let mut args = Vec::default();
        if function_like {
            if !self.try_left_paren(cpp, horizontal) { return false; }

            let mut arg = Vec::default();
            let mut depth = 0;
            loop {
                let mut next = self.unexpanded_token(cpp, horizontal);
                match next.token.kind() {
                    Kind::EndOfFile | Kind::EndOfLine => {
                        if next.token.kind() == Kind::EndOfFile { self.buffer.push(next); }
                        let problem = Problem::new(ProblemKind::Syntax, loc, format!("unterminated invocation of `{}`", name));
                        self.problems.push(problem);
                        return false;
                    }
                    Kind::Identifier => {
                        if cpp.macros.get(&next.token.spelling()).map_or(false, |m| m.active.get()) {
                            next.replace = false;
                        }
                    }
                    Kind::LeftParen => { depth += 1; }
                    Kind::RightParen if depth == 0 => { break; }
                    Kind::RightParen => { depth -= 1; }
                    Kind::Comma if depth == 0 && !(definition.variadic && args.len() + 1 >= params.len()) => {
                        args.push(mem::take(&mut arg));
                        continue;
                    }
                    _ => {}
                }
                if next.space == Shape::Newline { next.space = Shape::Horizontal; }
                arg.push(next);
            }
            args.push(arg);

            if params.is_empty() && args.len() == 1 && args[0].is_empty() { args.clear(); }
            if definition.variadic && args.len() + 1 == params.len() { args.push(Vec::default()); }
            if args.len() != params.len() {
                let problem = Problem::new(ProblemKind::Syntax, loc, format!(
                    "`{}` takes {} arguments but {} were given", name, params.len(), args.len()
                ));
                self.problems.push(problem);
                return false;
            }
        }
        trace!(%name, "expanding");

        let expanded: Vec<_> = args.iter().map(|arg| self.expand_argument(cpp, arg, horizontal)).collect();
        let param = |token: &Pending<'i>| -> Option<usize> {
            if token.token.kind() != Kind::Identifier { return None; }
            params.iter().position(|&param| param == token.token.spelling())
        };

        let replacement = &definition.replacement;
        let mut output: Vec<Pending<'i>> = Vec::default();
        let mut placemarker = false;
        let mut i = 0;
        while i < replacement.len() {
            let item = replacement[i];
            let next = replacement.get(i + 1);

            if function_like && item.token.kind() == Kind::Hash {
                if let Some(p) = next.and_then(&param) {
                    output.push(self.stringize(cpp, &args[p], item.space, loc));
                    placemarker = false;
                    i += 2;
                    continue;
                }
            }

            if item.token.kind() == Kind::HashHash && i > 0 {
                let right = match next {
                    Some(&right) => { right }
                    None => { break; }
                };
                let stringized = replacement.get(i + 2).and_then(&param);
                let (operand, consumed) = match (right.token.kind(), stringized) {
                    (Kind::Hash, Some(p)) if function_like => {
                        (vec![self.stringize(cpp, &args[p], right.space, loc)], 3)
                    }
                    _ => match param(&right) {
                        Some(p) => { (args[p].clone(), 2) }
                        None => { (vec![right], 2) }
                    }
                };
                i += consumed;

                // GNU `, ## __VA_ARGS__` drops the comma when there are no variadic arguments
                let comma = output.last().map_or(false, |last| last.token.kind() == Kind::Comma);
                let gnu_comma = definition.variadic && comma && !placemarker &&
                    param(&right) == Some(params.len() - 1);
                if operand.is_empty() {
                    if gnu_comma { output.pop(); }
                    continue;
                }
                if gnu_comma {
                    output.extend(operand);
                    continue;
                }
                if placemarker {
                    placemarker = false;
                    output.extend(operand);
                    continue;
                }
                match output.pop() {
                    Some(left) => {
                        let pasted = self.paste(cpp, &left, &operand[0]);
                        output.push(pasted);
                        output.extend_from_slice(&operand[1..]);
                    }
                    None => { output.extend(operand); }
                }
                continue;
            }

            if let Some(p) = param(&item) {
                let pasted = (i > 0 && replacement[i - 1].token.kind() == Kind::HashHash) ||
                    next.map_or(false, |next| next.token.kind() == Kind::HashHash);
                let arg = if pasted { &args[p] } else { &expanded[p] };
                placemarker = arg.is_empty();
                for (j, &token) in arg.iter().enumerate() {
                    let space = if j == 0 { item.space } else { token.space };
                    output.push(Pending { space, ..token });
                }
                i += 1;
                continue;
            }

            output.push(item);
            placemarker = false;
            i += 1;
        }

        for (j, pending) in output.iter_mut().enumerate() {
            pending.token = pending.token.with_loc(loc);
            if j == 0 { pending.space = token.space; }
        }

        self.invoked.push(Invoked { name, begin: self.buffer.len() });
        definition.active.set(true);
        self.buffer.extend(output.into_iter().rev());
        true
    }

    /// Fully macro-expand an argument in isolation, behind an end of file sentinel.
    fn expand_argument(&mut self, cpp: &State<'i, '_>, arg: &[Pending<'i>], horizontal: bool) -> Vec<Pending<'i>> {
        let begin = self.buffer.len();
        let loc = arg.first().map_or(Loc::default(), |token| token.token.loc());
        let sentinel = lex::Token::marker(cpp.symbols, Kind::EndOfFile, loc);
        self.buffer.push(Pending { space: Shape::None, token: sentinel, replace: true });
        self.buffer.extend(arg.iter().rev().copied());

        let newline = mem::replace(&mut self.newline, false);
        let mut expanded = Vec::default();
        while self.buffer.len() > begin {
            expanded.push(self.expanded_token(cpp, horizontal));
        }
        self.newline = newline;

        if expanded.last().map_or(false, |token| token.token.kind() == Kind::EndOfFile) {
            expanded.pop();
        }
        expanded
    }

    fn stringize(&mut self, cpp: &State<'i, '_>, arg: &[Pending<'i>], space: Shape, loc: Loc) -> Pending<'i> {
        let mut text = vec![b'"'];
        for (i, pending) in arg.iter().enumerate() {
            if i > 0 && pending.space != Shape::None { text.push(b' '); }

            self.scratch.clear();
            pending.token.write_spelling(&mut self.scratch);
            let escape = matches!(pending.token.kind(), Kind::String | Kind::Character);
            for &b in &self.scratch {
                if escape && (b == b'"' || b == b'\\') { text.push(b'\\'); }
                text.push(b);
            }
        }
        text.push(b'"');

        let spelling = cpp.symbols.intern(&text, Kind::String);
        Pending { space, token: lex::Token::new(Kind::String, spelling, loc), replace: true }
    }

    fn paste(&mut self, cpp: &State<'i, '_>, left: &Pending<'i>, right: &Pending<'i>) -> Pending<'i> {
        let mut text = Vec::default();
        left.token.write_spelling(&mut text);
        right.token.write_spelling(&mut text);

        let loc = left.token.loc();
        let mut lexer = lex::Tokens::from_bytes(Rc::from(&text[..]), loc.file);
        let token = lexer.preprocessing_token(cpp.symbols, &mut self.scratch);
        let rest = lexer.preprocessing_token(cpp.symbols, &mut self.scratch);
        let token = if rest.kind() == Kind::EndOfFile {
            token
        } else {
            let problem = Problem::new(ProblemKind::Syntax, loc, format!(
                "pasting does not give a valid token: `{}`", String::from_utf8_lossy(&text)
            ));
            self.problems.push(problem);
            lex::Token::new(Kind::Error, cpp.symbols.intern(&text, Kind::Error), loc)
        };

        Pending { space: left.space, token: token.with_loc(loc), replace: true }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::{Preprocessor, PpEvent};
    use crate::config::{Config, Memory};
    use crate::error::ProblemKind;
    use crate::lex::{FileId, Kind};
    use crate::symbols::SymbolMap;

    fn preprocess(config: &Config, source: &Memory, text: &str) -> (Vec<(Kind, String)>, Vec<String>) {
        let symbols = SymbolMap::default();
        let mut cpp = Preprocessor::new(&symbols, config, source, "main.cpp", Rc::from(text.as_bytes()));
        let mut tokens = Vec::default();
        loop {
            let token = cpp.next_token();
            if token.kind() == Kind::EndOfFile { break; }
            tokens.push((token.kind(), token.spelling().as_str().to_owned()));
        }
        let events = cpp.take_events().into_iter().map(|event| match event {
            PpEvent::EnterInclusion { name, .. } => { format!("enter {}", name) }
            PpEvent::ExitInclusion { file } => { format!("exit {}", file.0) }
            PpEvent::Macro { name, .. } => { format!("macro {}", name) }
            PpEvent::Problem(problem) => { format!("{:?}", problem.kind) }
        }).collect();
        (tokens, events)
    }

    fn kinds(text: &str) -> Vec<Kind> {
        let (tokens, _) = preprocess(&Config::cpp(), &Memory::default(), text);
        tokens.into_iter().map(|(kind, _)| kind).collect()
    }

    fn spellings(text: &str) -> Vec<String> {
        let (tokens, _) = preprocess(&Config::cpp(), &Memory::default(), text);
        tokens.into_iter().map(|(_, spelling)| spelling).collect()
    }

    #[test]
    fn hello() {
        let source = r#"
#include <stdio.h>

int main() {
    printf("hello world\n");
    return 0;
}
"#;
        let (tokens, events) = preprocess(&Config::cpp(), &Memory::default(), source);
        let kinds: Vec<_> = tokens.into_iter().map(|(kind, _)| kind).collect();
        assert_eq!(kinds, [
            Kind::Int, Kind::Identifier, Kind::LeftParen, Kind::RightParen, Kind::LeftBrace,
            Kind::Identifier, Kind::LeftParen, Kind::String, Kind::RightParen, Kind::Semi,
            Kind::Return, Kind::Number, Kind::Semi,
            Kind::RightBrace,
        ]);
        assert_eq!(events, ["IncludeNotFound"]);
    }

    #[test]
    fn conditional() {
        let source = r#"
#define A 1
#define B 0
#if A == B
abc
#elif defined(B)
#ifndef C
def
#else
ghi
#endif
#endif
"#;
        assert_eq!(spellings(source), ["def"]);

        let source = "#if 0\n#if 1\na\n#else\nb\n#endif\n#elif 2 > 1 && !defined A\nc\n#else\nd\n#endif\n";
        assert_eq!(spellings(source), ["c"]);

        let source = "#if (1 ? 2 : 0) == 2 && -1 < 0 && 0u - 1 > 0 && 'a' == 97\nyes\n#endif\n";
        assert_eq!(spellings(source), ["yes"]);
    }

    #[test]
    fn conditional_problems() {
        let (tokens, events) = preprocess(&Config::cpp(), &Memory::default(), "#endif\n#if 1\nx\n");
        assert_eq!(tokens.len(), 1);
        assert_eq!(events, ["UnbalancedConditional", "UnterminatedConditional"]);

        let (tokens, events) = preprocess(&Config::cpp(), &Memory::default(), "#if 1 +\nx\n#endif\ny\n");
        assert_eq!(tokens, [(Kind::Identifier, "y".to_owned())]);
        assert_eq!(events, ["BadDirective"]);
    }

    #[test]
    fn define() {
        let source = r#"
#define OBJ0
#define OBJ1 a + b
#define FN0() c
#define FN1(x, y) x * y + FN0()
FN1(OBJ1, FN0())
"#;
        assert_eq!(kinds(source), [
            Kind::Identifier, Kind::Plus, Kind::Identifier,
            Kind::Star,
            Kind::Identifier,
            Kind::Plus,
            Kind::Identifier,
        ]);
    }

    #[test]
    fn rescan() {
        let source = r#"
#define f(a) a*g
#define g(a) f(a)
f(2)(9)
#define z z[0]
z
"#;
        assert_eq!(spellings(source), ["2", "*", "9", "*", "g", "z", "[", "0", "]"]);
    }

    #[test]
    fn va_args() {
        let source = r#"
#define debug(...) fprintf(stderr, __VA_ARGS__)
#define showlist(...) puts(#__VA_ARGS__)
#define report(test, ...) ((test)?puts(#test):\
    printf(__VA_ARGS__))
debug("Flag");
showlist(The first, second, and third items.);
report(x>y, "x is %d but y is %d", x, y);
"#;
        let tokens = spellings(source);
        assert_eq!(tokens[..8], ["fprintf", "(", "stderr", ",", "\"Flag\"", ")", ";", "puts"]);
        assert_eq!(tokens[9], "\"The first, second, and third items.\"");
        assert!(tokens.contains(&"\"x>y\"".to_owned()));
        assert_eq!(tokens.iter().filter(|t| *t == "printf").count(), 1);
    }

    #[test]
    fn gnu_comma_paste() {
        let source = "#define log(fmt, ...) f(fmt, ## __VA_ARGS__)\nlog(a)\nlog(a, b)\n";
        assert_eq!(spellings(source), ["f", "(", "a", ")", "f", "(", "a", ",", "b", ")"]);
    }

    #[test]
    fn paste() {
        let source = r#"
#define str(s)      # s
#define xstr(s)     str(s)
#define debug(s, t) printf("x" # s "= %d, x" # t "= %s", \
               x ## s, x ## t)
#define INCFILE(n)  vers ## n
#define glue(a, b)  a ## b
#define xglue(a, b) glue(a, b)
#define HIGHLOW     "hello"
#define LOW         LOW ", world"

debug(1, 2);
fputs(str(strncmp("abc\0d", "abc", '\4')        // this goes away
    == 0) str(: @\n), s);
#include xstr(INCFILE(2).h)
glue(HIGH, LOW);
xglue(HIGH, LOW)
"#;
        let (tokens, events) = preprocess(&Config::cpp(), &Memory::default(), source);
        let kinds: Vec<_> = tokens.iter().map(|&(kind, _)| kind).collect();
        assert_eq!(kinds, [
            Kind::Identifier, Kind::LeftParen,
            Kind::String, Kind::String, Kind::String, Kind::String, Kind::String, Kind::Comma,
            Kind::Identifier, Kind::Comma, Kind::Identifier, Kind::RightParen, Kind::Semi,

            Kind::Identifier, Kind::LeftParen, Kind::String, Kind::String, Kind::Comma,
            Kind::Identifier, Kind::RightParen, Kind::Semi,

            Kind::String, Kind::Semi,
            Kind::String, Kind::String,
        ]);
        assert_eq!(tokens[3].1, "\"1\"");
        assert_eq!(tokens[8].1, "x1");
        assert_eq!(tokens[15].1, r#""strncmp(\"abc\\0d\", \"abc\", '\\4') == 0""#);
        assert_eq!(tokens[21].1, "\"hello\"");
        assert_eq!(tokens[24].1, "\", world\"");
        assert_eq!(events.last().map(String::as_str), Some("IncludeNotFound"));
    }

    #[test]
    fn include() {
        let source = Memory::default()
            .with("a.h", "#pragma once\n#define A 1\nint a;\n")
            .with("b.h", "#include \"a.h\"\nint b = A;\n");
        let text = "#include \"a.h\"\n#include <b.h>\n#include \"a.h\"\nint c;\n";
        let (tokens, events) = preprocess(&Config::cpp(), &source, text);
        let spellings: Vec<_> = tokens.iter().map(|(_, spelling)| &spelling[..]).collect();
        assert_eq!(spellings, ["int", "a", ";", "int", "b", "=", "1", ";", "int", "c", ";"]);
        assert_eq!(events, ["enter a.h", "macro A", "exit 1", "enter b.h", "exit 2"]);
    }

    #[test]
    fn include_depth() {
        let source = Memory::default().with("self.h", "#include \"self.h\"\n");
        let config = Config { max_include_depth: 3, ..Config::cpp() };
        let (_, events) = preprocess(&config, &source, "#include \"self.h\"\n");
        assert_eq!(events.iter().filter(|event| event.starts_with("enter")).count(), 3);
        assert!(events.contains(&"IncludeDepth".to_owned()));
    }

    #[test]
    fn error_directive() {
        let symbols = SymbolMap::default();
        let config = Config::cpp();
        let source = Memory::default();
        let text = Rc::from(&b"#error stop here\nx\n"[..]);
        let mut cpp = Preprocessor::new(&symbols, &config, &source, "main.cpp", text);
        assert_eq!(cpp.next_token().spelling().as_str(), "x");
        match &cpp.take_events()[..] {
            [PpEvent::Problem(problem)] => {
                assert_eq!(problem.kind, ProblemKind::ErrorDirective);
                assert_eq!(problem.detail, "stop here");
                assert_eq!(problem.loc.file, FileId(0));
            }
            events => { panic!("unexpected events {:?}", events); }
        }
    }

    #[test]
    fn predefined() {
        let config = Config::c().define("N", "3");
        let (tokens, _) = preprocess(&config, &Memory::default(), "#ifdef __cplusplus\nx\n#endif\nN __STDC__\n");
        let spellings: Vec<_> = tokens.iter().map(|(_, spelling)| &spelling[..]).collect();
        assert_eq!(spellings, ["3", "1"]);
    }

    #[test]
    fn expansion_location() {
        let symbols = SymbolMap::default();
        let config = Config::cpp();
        let source = Memory::default();
        let text = Rc::from(&b"#define M a b\n  M\n"[..]);
        let mut cpp = Preprocessor::new(&symbols, &config, &source, "main.cpp", text);
        let a = cpp.next_token();
        let b = cpp.next_token();
        assert_eq!(a.loc(), b.loc());
        assert_eq!(a.loc().offset, 16);
        assert!(cpp.is_defined("M"));
    }
}
