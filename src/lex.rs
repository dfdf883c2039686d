use std::rc::Rc;

use crate::config::Language;
use crate::symbols::{SymbolMap, Symbol};

/// Translation phase 3 - whitespace and comments, and preprocessing tokens
#[derive(Clone)]
pub struct Tokens { bytes: Rc<[u8]>, pos: usize, file: FileId }

#[derive(Copy, Clone, Debug)]
pub struct Space { pub kind: Shape, pub len: usize }

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Shape { None, Horizontal, Newline }

/// An index into the preprocessor's table of files. The main file is always `FileId(0)`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct FileId(pub u32);

/// Where a token came from. Tokens produced by macro expansion carry the location of the
/// macro name at the invocation site.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Default)]
pub struct Loc { pub file: FileId, pub offset: usize, pub len: usize }

/// A preprocessing token, or once it leaves the preprocessor, a token.
#[derive(Copy, Clone)]
pub struct Token<'i> { kind: Kind, spelling: Symbol<'i, Kind>, loc: Loc }

#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    EndOfFile, EndOfLine,

    HeaderName,

    Identifier, Number, Character, String,

    Hash, HashHash,

    LeftBrace, RightBrace, LeftBracket, RightBracket, LeftParen, RightParen,
    Semi, Colon, Ellipsis,
    Question, ColonColon, Dot, DotStar, Arrow, ArrowStar, Tilde,
    Exclaim, Plus, Minus, Star, Slash, Percent, Caret, Amp, Pipe,
    Eq, PlusEq, MinusEq, StarEq, SlashEq, PercentEq, CaretEq, AmpEq, PipeEq,
    EqEq, ExclaimEq, Lt, Gt, LtEq, GtEq, LtEqGt, AmpAmp, PipePipe,
    LtLt, GtGt, LtLtEq, GtGtEq, PlusPlus, MinusMinus, Comma,

    Error,

    // Keywords. The preprocessor sees these as identifiers; they only take on their own kinds
    // once a token leaves phase 4.
    Alignas, Alignof, Asm, Auto, Bool, Break, Case, Catch, Char, Char16, Char32, Class, Const,
    ConstCast, Constexpr, Continue, Decltype, Default, Delete, Do, Double, DynamicCast, Else,
    Enum, Explicit, Export, Extern, False, Float, For, Friend, Goto, If, Inline, Int, Long,
    Mutable, Namespace, New, Noexcept, Noreturn, Nullptr, Operator, Private, Protected, Public,
    Register, ReinterpretCast, Restrict, Return, Short, Signed, Sizeof, Static, StaticAssert,
    StaticCast, Struct, Switch, Template, This, ThreadLocal, Throw, True, Try, Typedef, Typeid,
    Typename, Union, Unsigned, Using, Virtual, Void, Volatile, WcharT, While,
}

impl Kind {
    pub fn is_keyword(self) -> bool { self as u8 >= Kind::Alignas as u8 }

    pub fn is_literal(self) -> bool {
        matches!(self, Kind::Number | Kind::Character | Kind::String)
    }
}

const FLAG_SPLICE: u8 = 1 << 0;

static COMMON_KEYWORDS: &[(&str, Kind)] = &[
    ("auto", Kind::Auto), ("break", Kind::Break), ("case", Kind::Case), ("char", Kind::Char),
    ("const", Kind::Const), ("continue", Kind::Continue), ("default", Kind::Default),
    ("do", Kind::Do), ("double", Kind::Double), ("else", Kind::Else), ("enum", Kind::Enum),
    ("extern", Kind::Extern), ("float", Kind::Float), ("for", Kind::For), ("goto", Kind::Goto),
    ("if", Kind::If), ("inline", Kind::Inline), ("int", Kind::Int), ("long", Kind::Long),
    ("register", Kind::Register), ("return", Kind::Return), ("short", Kind::Short),
    ("signed", Kind::Signed), ("sizeof", Kind::Sizeof), ("static", Kind::Static),
    ("struct", Kind::Struct), ("switch", Kind::Switch), ("typedef", Kind::Typedef),
    ("union", Kind::Union), ("unsigned", Kind::Unsigned), ("void", Kind::Void),
    ("volatile", Kind::Volatile), ("while", Kind::While),
    ("asm", Kind::Asm), ("__asm__", Kind::Asm), ("__asm", Kind::Asm),
    ("__inline", Kind::Inline), ("__inline__", Kind::Inline),
    ("__restrict", Kind::Restrict), ("__restrict__", Kind::Restrict),
    ("__const", Kind::Const), ("__volatile__", Kind::Volatile),
    ("__signed__", Kind::Signed), ("__typeof__", Kind::Decltype),
];

static C_KEYWORDS: &[(&str, Kind)] = &[
    ("restrict", Kind::Restrict), ("_Bool", Kind::Bool), ("_Static_assert", Kind::StaticAssert),
    ("_Alignas", Kind::Alignas), ("_Alignof", Kind::Alignof),
    ("_Thread_local", Kind::ThreadLocal), ("_Noreturn", Kind::Noreturn),
];

static CPP_KEYWORDS: &[(&str, Kind)] = &[
    ("alignas", Kind::Alignas), ("alignof", Kind::Alignof), ("bool", Kind::Bool),
    ("catch", Kind::Catch), ("char16_t", Kind::Char16), ("char32_t", Kind::Char32),
    ("class", Kind::Class), ("const_cast", Kind::ConstCast), ("constexpr", Kind::Constexpr),
    ("decltype", Kind::Decltype), ("delete", Kind::Delete), ("dynamic_cast", Kind::DynamicCast),
    ("explicit", Kind::Explicit), ("export", Kind::Export), ("false", Kind::False),
    ("friend", Kind::Friend), ("mutable", Kind::Mutable), ("namespace", Kind::Namespace),
    ("new", Kind::New), ("noexcept", Kind::Noexcept), ("nullptr", Kind::Nullptr),
    ("operator", Kind::Operator), ("private", Kind::Private), ("protected", Kind::Protected),
    ("public", Kind::Public), ("reinterpret_cast", Kind::ReinterpretCast),
    ("static_assert", Kind::StaticAssert), ("static_cast", Kind::StaticCast),
    ("template", Kind::Template), ("this", Kind::This), ("thread_local", Kind::ThreadLocal),
    ("throw", Kind::Throw), ("true", Kind::True), ("try", Kind::Try), ("typeid", Kind::Typeid),
    ("typename", Kind::Typename), ("using", Kind::Using), ("virtual", Kind::Virtual),
    ("wchar_t", Kind::WcharT),
];

impl Tokens {
    pub fn from_bytes(bytes: Rc<[u8]>, file: FileId) -> Tokens {
        Tokens { bytes, pos: 0, file }
    }

    /// Assign kinds to alternative token spellings and keywords.
    ///
    /// Must be called before interning anything else that might overlap.
    pub fn keywords(symbols: &SymbolMap<Kind>, language: Language) {
        if language == Language::Cpp {
            symbols.intern(b"and", Kind::AmpAmp);
            symbols.intern(b"and_eq", Kind::AmpEq);
            symbols.intern(b"bitand", Kind::Amp);
            symbols.intern(b"bitor", Kind::Pipe);
            symbols.intern(b"compl", Kind::Tilde);
            symbols.intern(b"not", Kind::Exclaim);
            symbols.intern(b"not_eq", Kind::ExclaimEq);
            symbols.intern(b"or", Kind::PipePipe);
            symbols.intern(b"or_eq", Kind::PipeEq);
            symbols.intern(b"xor", Kind::Caret);
            symbols.intern(b"xor_eq", Kind::CaretEq);
        }

        let table = match language {
            Language::C => { C_KEYWORDS }
            Language::Cpp => { CPP_KEYWORDS }
        };
        for &(spelling, kind) in COMMON_KEYWORDS.iter().chain(table) {
            symbols.intern(spelling.as_bytes(), kind);
        }
    }

    pub fn file(&self) -> FileId { self.file }

    pub fn offset(&self) -> usize { self.pos }

    fn at_end(&self, pos: usize) -> bool { pos >= self.bytes.len() }

    /// Translation phase 2 - physical source lines spliced to logical source lines
    fn byte(&self, flags: &mut u8, pos: usize) -> (u8, usize) {
        let b = match self.bytes.get(pos) {
            Some(&b) => { b }
            None => { return (0, self.bytes.len()); }
        };
        if b != b'\\' { return (b, pos + 1); }

        let mut end = pos + 1;
        while let Some(b'\t' | b'\x0B' | b'\x0C' | b' ') = self.bytes.get(end) { end += 1; }
        if let (Some(b'\r'), Some(b'\n')) = (self.bytes.get(end), self.bytes.get(end + 1)) {
            end += 1;
        }
        match self.bytes.get(end) {
            Some(b'\n') => { *flags |= FLAG_SPLICE; self.byte(flags, end + 1) }
            _ => { (b'\\', pos + 1) }
        }
    }

    /// Consume whitespace and comments.
    pub fn whitespace(&mut self, horizontal: bool) -> Space {
        let flags = &mut 0;

        let mut whitespace = false;
        let mut newline = false;
        let mut pos = self.pos;
        loop {
            if self.at_end(pos) {
                whitespace = true;
                newline = true;
                break;
            }

            pos = match self.byte(flags, pos) {
                (b' ' | b'\t' | b'\x0B' | b'\x0C' | b'\r', pos) => { pos }
                (b'\n', pos) => { newline = true; pos }
                (b'/', next) => match self.byte(flags, next) {
                    (b'/', mut next) => loop {
                        if self.at_end(next) { break next; }
                        next = match self.byte(flags, next) {
                            (b'\n', _) => { break next; }
                            (_, next) => { next }
                        };
                    }
                    (b'*', mut next) => loop {
                        if self.at_end(next) { break next; }
                        next = match self.byte(flags, next) {
                            (b'*', after) => match self.byte(flags, after) {
                                (b'/', after) => { break after; }
                                _ => { after }
                            }
                            (_, next) => { next }
                        };
                    }
                    _ => { break; }
                }
                _ => { break; }
            };
            whitespace = true;
            if horizontal && newline { break; }
        }

        let kind = match (whitespace, newline) {
            (false, _) => { Shape::None }
            (true, true) => { Shape::Newline }
            (true, false) => { Shape::Horizontal }
        };
        let len = pos - self.pos;
        self.pos = pos;
        Space { kind, len }
    }

    /// Consume a preprocessing token. Whitespace must be skipped first with [`Tokens::whitespace`].
    pub fn preprocessing_token<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>
    ) -> Token<'i> {
        let flags = &mut 0;
        let start = self.pos;
        if self.at_end(start) { return self.make_token(symbols, scratch, flags, Kind::EndOfFile, start); }

        match self.byte(flags, start) {
            (b @ b'L' | b @ b'u' | b @ b'U', pos) => match self.byte(flags, pos) {
                (b'\'', pos) => { self.quoted(symbols, scratch, flags, Kind::Character, b'\'', pos) }
                (b'"', pos) => { self.quoted(symbols, scratch, flags, Kind::String, b'"', pos) }
                (b'R', next) if self.byte(flags, next).0 == b'"' => {
                    self.raw_string(symbols, scratch, flags, next + 1)
                }
                (b'8', next) if b == b'u' => match self.byte(flags, next) {
                    (b'\'', pos) => { self.quoted(symbols, scratch, flags, Kind::Character, b'\'', pos) }
                    (b'"', pos) => { self.quoted(symbols, scratch, flags, Kind::String, b'"', pos) }
                    (b'R', r) if self.byte(flags, r).0 == b'"' => {
                        self.raw_string(symbols, scratch, flags, r + 1)
                    }
                    _ => { self.identifier(symbols, scratch, flags, next) }
                }
                _ => { self.identifier(symbols, scratch, flags, pos) }
            }
            (b'R', pos) => match self.byte(flags, pos) {
                (b'"', pos) => { self.raw_string(symbols, scratch, flags, pos) }
                _ => { self.identifier(symbols, scratch, flags, pos) }
            }

            (b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' | 0x80.., pos) => {
                self.identifier(symbols, scratch, flags, pos)
            }
            (b'0'..=b'9', pos) => { self.preprocessing_number(symbols, scratch, flags, pos) }
            (b'\'', pos) => { self.quoted(symbols, scratch, flags, Kind::Character, b'\'', pos) }
            (b'"', pos) => { self.quoted(symbols, scratch, flags, Kind::String, b'"', pos) }

            (b'#', pos) => match self.byte(flags, pos) {
                (b'#', pos) => { self.make_token(symbols, scratch, flags, Kind::HashHash, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Hash, pos) }
            }

            (b'{', pos) => { self.make_token(symbols, scratch, flags, Kind::LeftBrace, pos) }
            (b'}', pos) => { self.make_token(symbols, scratch, flags, Kind::RightBrace, pos) }
            (b'[', pos) => { self.make_token(symbols, scratch, flags, Kind::LeftBracket, pos) }
            (b']', pos) => { self.make_token(symbols, scratch, flags, Kind::RightBracket, pos) }
            (b'(', pos) => { self.make_token(symbols, scratch, flags, Kind::LeftParen, pos) }
            (b')', pos) => { self.make_token(symbols, scratch, flags, Kind::RightParen, pos) }

            (b';', pos) => { self.make_token(symbols, scratch, flags, Kind::Semi, pos) }
            (b':', pos) => match self.byte(flags, pos) {
                (b'>', pos) => { self.make_token(symbols, scratch, flags, Kind::RightBracket, pos) }
                (b':', pos) => { self.make_token(symbols, scratch, flags, Kind::ColonColon, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Colon, pos) }
            }
            (b'.', pos) => match self.byte(flags, pos) {
                (b'0'..=b'9', pos) => { self.preprocessing_number(symbols, scratch, flags, pos) }
                (b'*', next) => { self.make_token(symbols, scratch, flags, Kind::DotStar, next) }
                (b'.', next) => match self.byte(flags, next) {
                    (b'.', end) => { self.make_token(symbols, scratch, flags, Kind::Ellipsis, end) }
                    _ => { self.make_token(symbols, scratch, flags, Kind::Dot, pos) }
                }
                _ => { self.make_token(symbols, scratch, flags, Kind::Dot, pos) }
            }

            (b'?', pos) => { self.make_token(symbols, scratch, flags, Kind::Question, pos) }
            (b'~', pos) => { self.make_token(symbols, scratch, flags, Kind::Tilde, pos) }

            (b'!', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::ExclaimEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Exclaim, pos) }
            }
            (b'+', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::PlusEq, pos) }
                (b'+', pos) => { self.make_token(symbols, scratch, flags, Kind::PlusPlus, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Plus, pos) }
            }
            (b'-', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::MinusEq, pos) }
                (b'-', pos) => { self.make_token(symbols, scratch, flags, Kind::MinusMinus, pos) }
                (b'>', pos) => match self.byte(flags, pos) {
                    (b'*', pos) => { self.make_token(symbols, scratch, flags, Kind::ArrowStar, pos) }
                    _ => { self.make_token(symbols, scratch, flags, Kind::Arrow, pos) }
                }
                _ => { self.make_token(symbols, scratch, flags, Kind::Minus, pos) }
            }
            (b'*', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::StarEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Star, pos) }
            }
            (b'/', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::SlashEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Slash, pos) }
            }
            (b'%', pos) => match self.byte(flags, pos) {
                (b'>', pos) => { self.make_token(symbols, scratch, flags, Kind::RightBrace, pos) }
                (b':', pos) => match self.byte(flags, pos) {
                    (b'%', next) => match self.byte(flags, next) {
                        (b':', end) => { self.make_token(symbols, scratch, flags, Kind::HashHash, end) }
                        _ => { self.make_token(symbols, scratch, flags, Kind::Hash, pos) }
                    }
                    _ => { self.make_token(symbols, scratch, flags, Kind::Hash, pos) }
                }
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::PercentEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Percent, pos) }
            }
            (b'^', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::CaretEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Caret, pos) }
            }
            (b'&', pos) => match self.byte(flags, pos) {
                (b'&', pos) => { self.make_token(symbols, scratch, flags, Kind::AmpAmp, pos) }
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::AmpEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Amp, pos) }
            }
            (b'|', pos) => match self.byte(flags, pos) {
                (b'|', pos) => { self.make_token(symbols, scratch, flags, Kind::PipePipe, pos) }
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::PipeEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Pipe, pos) }
            }

            (b'=', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::EqEq, pos) }
                _ => { self.make_token(symbols, scratch, flags, Kind::Eq, pos) }
            }
            (b'<', pos) => match self.byte(flags, pos) {
                (b':', end) => match self.byte(flags, end) {
                    // `<::` is `< ::` unless followed by `:` or `>`.
                    (b':', end2) => match self.byte(flags, end2) {
                        (b'>' | b':', _) => { self.make_token(symbols, scratch, flags, Kind::LeftBracket, end) }
                        _ => { self.make_token(symbols, scratch, flags, Kind::Lt, pos) }
                    }
                    _ => { self.make_token(symbols, scratch, flags, Kind::LeftBracket, end) }
                }
                (b'%', pos) => { self.make_token(symbols, scratch, flags, Kind::LeftBrace, pos) }
                (b'=', pos) => match self.byte(flags, pos) {
                    (b'>', pos) => { self.make_token(symbols, scratch, flags, Kind::LtEqGt, pos) }
                    _ => { self.make_token(symbols, scratch, flags, Kind::LtEq, pos) }
                }
                (b'<', pos) => match self.byte(flags, pos) {
                    (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::LtLtEq, pos) }
                    _ => { self.make_token(symbols, scratch, flags, Kind::LtLt, pos) }
                }
                _ => { self.make_token(symbols, scratch, flags, Kind::Lt, pos) }
            }
            (b'>', pos) => match self.byte(flags, pos) {
                (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::GtEq, pos) }
                (b'>', pos) => match self.byte(flags, pos) {
                    (b'=', pos) => { self.make_token(symbols, scratch, flags, Kind::GtGtEq, pos) }
                    _ => { self.make_token(symbols, scratch, flags, Kind::GtGt, pos) }
                }
                _ => { self.make_token(symbols, scratch, flags, Kind::Gt, pos) }
            }

            (b',', pos) => { self.make_token(symbols, scratch, flags, Kind::Comma, pos) }

            (_, pos) => { self.make_token(symbols, scratch, flags, Kind::Error, pos) }
        }
    }

    /// Check for and consume a header-name token. Only makes sense in `#include` directives.
    pub fn try_header_name<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>
    ) -> Option<Token<'i>> {
        let flags = &mut 0;

        let (delim, mut pos) = match self.byte(flags, self.pos) {
            (b'"', pos) => { (b'"', pos) }
            (b'<', pos) => { (b'>', pos) }
            _ => { return None; }
        };

        loop {
            if self.at_end(pos) { return None; }
            pos = match self.byte(flags, pos) {
                (b'\n', _) => { return None; }
                (b, end) if b == delim => { pos = end; break; }
                (_, pos) => { pos }
            };
        }

        Some(self.make_token(symbols, scratch, flags, Kind::HeaderName, pos))
    }

    /// Check for and consume a `(` immediately following the previous token, which is what
    /// makes a `#define` function-like.
    pub fn try_lparen(&mut self) -> bool {
        match self.byte(&mut 0, self.pos) {
            (b'(', next) if !self.at_end(self.pos) => { self.pos = next; true }
            _ => { false }
        }
    }

    fn identifier<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>, flags: &mut u8,
        mut pos: usize
    ) -> Token<'i> {
        while !self.at_end(pos) {
            pos = match self.byte(flags, pos) {
                (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'$' | 0x80.., pos) => { pos }
                _ => { break; }
            };
        }

        let mut token = self.make_token(symbols, scratch, flags, Kind::Identifier, pos);
        token.kind = match *token.spelling.value() {
            kind if kind.is_keyword() => { Kind::Identifier }
            kind => { kind }
        };
        token
    }

    fn preprocessing_number<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>, flags: &mut u8,
        mut pos: usize
    ) -> Token<'i> {
        while !self.at_end(pos) {
            pos = match self.byte(flags, pos) {
                (b'e' | b'E' | b'p' | b'P', pos) => match self.byte(flags, pos) {
                    (b'+' | b'-', sign) => { sign }
                    _ => { pos }
                }
                (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_' | b'.', pos) => { pos }
                (b'\'', next) => match self.byte(flags, next) {
                    (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_', next) => { next }
                    _ => { break; }
                }
                _ => { break; }
            };
        }

        self.make_token(symbols, scratch, flags, Kind::Number, pos)
    }

    fn quoted<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>, flags: &mut u8,
        kind: Kind, delim: u8, mut pos: usize
    ) -> Token<'i> {
        loop {
            if self.at_end(pos) { return self.make_token(symbols, scratch, flags, Kind::Error, pos); }
            pos = match self.byte(flags, pos) {
                (b'\n', _) => { return self.make_token(symbols, scratch, flags, Kind::Error, pos); }
                (b'\\', next) => {
                    if self.at_end(next) { return self.make_token(symbols, scratch, flags, Kind::Error, next); }
                    self.byte(flags, next).1
                }
                (b, end) if b == delim => { pos = end; break; }
                (_, pos) => { pos }
            };
        }
        if kind == Kind::Character && pos - self.pos == 2 {
            return self.make_token(symbols, scratch, flags, Kind::Error, pos);
        }

        pos = self.ud_suffix(flags, pos);
        self.make_token(symbols, scratch, flags, kind, pos)
    }

    fn raw_string<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>, flags: &mut u8,
        mut pos: usize
    ) -> Token<'i> {
        let prefix = pos;
        loop {
            pos = match self.bytes.get(pos) {
                Some(b'(') => { break; }
                Some(b' ' | b')' | b'\\' | b'\t' | b'\x0B' | b'\x0C' | b'\n') | None => {
                    return self.quoted(symbols, scratch, flags, Kind::Error, b'"', pos);
                }
                Some(_) if pos - prefix < 16 => { pos + 1 }
                Some(_) => { return self.quoted(symbols, scratch, flags, Kind::Error, b'"', pos); }
            };
        }
        let delimiter = prefix..pos;
        pos += 1;

        loop {
            match self.bytes.get(pos) {
                None => { return self.make_token(symbols, scratch, flags, Kind::Error, pos); }
                Some(b')') => {
                    let close = pos + 1;
                    let end = close + delimiter.len();
                    if self.bytes.get(close..end) == Some(&self.bytes[delimiter.clone()]) &&
                        self.bytes.get(end) == Some(&b'"')
                    {
                        pos = end + 1;
                        break;
                    }
                    pos += 1;
                }
                Some(_) => { pos += 1; }
            }
        }

        pos = self.ud_suffix(flags, pos);
        self.make_token(symbols, scratch, flags, Kind::String, pos)
    }

    fn ud_suffix(&self, flags: &mut u8, pos: usize) -> usize {
        let mut end = match self.byte(flags, pos) {
            (b'a'..=b'z' | b'A'..=b'Z' | b'_', next) if !self.at_end(pos) => { next }
            _ => { return pos; }
        };
        while !self.at_end(end) {
            end = match self.byte(flags, end) {
                (b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'_', next) => { next }
                _ => { break; }
            };
        }
        end
    }

    fn make_token<'i>(
        &mut self, symbols: &'i SymbolMap<Kind>, scratch: &mut Vec<u8>, flags: &mut u8,
        kind: Kind, end: usize
    ) -> Token<'i> {
        let start = self.pos;
        let raw = &self.bytes[start..end];
        let spelling = if *flags & FLAG_SPLICE == 0 {
            symbols.intern(raw, kind)
        } else {
            scratch.clear();
            clean_spelling(scratch, raw);
            let spelling = symbols.intern(&scratch[..], kind);
            scratch.clear();
            spelling
        };

        self.pos = end;
        let loc = Loc { file: self.file, offset: start, len: end - start };
        Token { kind, spelling, loc }
    }
}

/// Write `raw` to `buf` without line splices.
#[cold]
fn clean_spelling(buf: &mut Vec<u8>, raw: &[u8]) {
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'\\' {
            let mut end = i + 1;
            while let Some(b'\t' | b'\x0B' | b'\x0C' | b' ') = raw.get(end) { end += 1; }
            if raw.get(end) == Some(&b'\r') { end += 1; }
            if raw.get(end) == Some(&b'\n') { i = end + 1; continue; }
        }
        buf.push(raw[i]);
        i += 1;
    }
}

impl<'i> Token<'i> {
    pub fn new(kind: Kind, spelling: Symbol<'i, Kind>, loc: Loc) -> Token<'i> {
        Token { kind, spelling, loc }
    }

    /// A synthetic token with no spelling of its own, e.g. end of line or end of file.
    pub fn marker(symbols: &'i SymbolMap<Kind>, kind: Kind, loc: Loc) -> Token<'i> {
        Token { kind, spelling: symbols.intern(b"", Kind::EndOfFile), loc }
    }

    #[inline]
    pub fn kind(&self) -> Kind { self.kind }

    #[inline]
    pub fn loc(&self) -> Loc { self.loc }

    #[inline]
    pub fn len(&self) -> usize { self.loc.len }

    #[inline]
    pub fn is_empty(&self) -> bool { self.loc.len == 0 }

    /// The interned spelling, with splices removed. For identifiers this is the name.
    #[inline]
    pub fn spelling(&self) -> Symbol<'i, Kind> { self.spelling }

    pub fn with_kind(self, kind: Kind) -> Token<'i> { Token { kind, ..self } }

    pub fn with_loc(self, loc: Loc) -> Token<'i> { Token { loc, ..self } }

    /// Phase 7 - the kind this token has once keywords are no longer identifiers.
    pub fn keyword_kind(&self) -> Kind {
        match self.kind {
            Kind::Identifier => { *self.spelling.value() }
            kind => { kind }
        }
    }

    /// Write this token's spelling into `buf`.
    pub fn write_spelling(&self, buf: &mut Vec<u8>) { buf.extend_from_slice(self.spelling.key()); }
}

/// The value of an integer or floating point literal, as far as the front end cares.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Number { pub value: u64, pub float: bool, pub unsigned: bool, pub long: u8, pub overflow: bool }

/// Interpret a pp-number's spelling. Returns `None` for spellings that are not valid literals.
pub fn number(spelling: &[u8]) -> Option<Number> {
    let digits: Vec<u8> = spelling.iter().copied().filter(|&b| b != b'\'').collect();
    let (radix, body) = match digits[..] {
        [b'0', b'x' | b'X', ref rest @ ..] => { (16, rest) }
        [b'0', b'b' | b'B', ref rest @ ..] => { (2, rest) }
        [b'0', ref rest @ ..] if rest.first().map_or(false, u8::is_ascii_digit) => { (8, rest) }
        ref rest => { (10, rest) }
    };

    let is_float = radix != 2 && body.iter().any(|&b| match b {
        b'.' => { true }
        b'e' | b'E' => { radix == 10 || radix == 8 }
        b'p' | b'P' => { radix == 16 }
        _ => { false }
    });
    if is_float {
        return Some(Number { value: 0, float: true, unsigned: false, long: 0, overflow: false });
    }

    let split = body.iter().position(|b| !(*b as char).is_digit(radix)).unwrap_or(body.len());
    let (body, suffix) = body.split_at(split);
    if body.is_empty() && radix != 8 { return None; }

    let mut unsigned = false;
    let mut long = 0;
    for &b in suffix {
        match b {
            b'u' | b'U' if !unsigned => { unsigned = true; }
            b'l' | b'L' if long < 2 => { long += 1; }
            _ => { return None; }
        }
    }

    let mut value = 0u64;
    let mut overflow = false;
    for &b in body {
        let digit = (b as char).to_digit(radix)? as u64;
        match value.checked_mul(radix as u64).and_then(|v| v.checked_add(digit)) {
            Some(v) => { value = v; }
            None => { overflow = true; value = u64::MAX; }
        }
    }

    Some(Number { value, float: false, unsigned, long, overflow })
}

/// The value of a character literal, ignoring its encoding prefix. Multi-character literals
/// combine their characters big-endian as most compilers do.
pub fn character(spelling: &[u8]) -> Option<u64> {
    let start = spelling.iter().position(|&b| b == b'\'')? + 1;
    let end = spelling.iter().rposition(|&b| b == b'\'')?;
    if end <= start { return None; }

    let mut value = 0u64;
    let mut i = start;
    while i < end {
        let c = match spelling[i] {
            b'\\' => {
                i += 1;
                match *spelling.get(i)? {
                    b'n' => { b'\n' as u64 }
                    b't' => { b'\t' as u64 }
                    b'r' => { b'\r' as u64 }
                    b'a' => { 7 }
                    b'b' => { 8 }
                    b'f' => { 12 }
                    b'v' => { 11 }
                    b'x' => {
                        let mut v = 0;
                        while let Some(d) = spelling.get(i + 1).and_then(|&b| (b as char).to_digit(16)) {
                            v = v * 16 + d as u64;
                            i += 1;
                        }
                        v
                    }
                    b @ b'0'..=b'7' => {
                        let mut v = (b - b'0') as u64;
                        for _ in 0..2 {
                            match spelling.get(i + 1) {
                                Some(&d @ b'0'..=b'7') => { v = v * 8 + (d - b'0') as u64; i += 1; }
                                _ => { break; }
                            }
                        }
                        v
                    }
                    b => { b as u64 }
                }
            }
            b => { b as u64 }
        };
        value = (value << 8) | (c & 0xff);
        i += 1;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;
    use super::{Tokens, Shape, Kind, FileId, number, character};
    use crate::config::Language;
    use crate::symbols::SymbolMap;

    fn lex(text: &str) -> Tokens {
        Tokens::from_bytes(Rc::from(text.as_bytes()), FileId(0))
    }

    #[test]
    fn hello() {
        let symbols = &SymbolMap::default();
        Tokens::keywords(symbols, Language::Cpp);

        let mut tokens = lex("if (x < 3) {\n    printf(\"hello world\");\n}\n");
        let scratch = &mut Vec::default();

        let result = [
            (Shape::None, 0, Kind::Identifier),
            (Shape::Horizontal, 1, Kind::LeftParen),
            (Shape::None, 0, Kind::Identifier),
            (Shape::Horizontal, 1, Kind::Lt),
            (Shape::Horizontal, 1, Kind::Number),
            (Shape::None, 0, Kind::RightParen),
            (Shape::Horizontal, 1, Kind::LeftBrace),
            (Shape::Newline, 5, Kind::Identifier),
            (Shape::None, 0, Kind::LeftParen),
            (Shape::None, 0, Kind::String),
            (Shape::None, 0, Kind::RightParen),
            (Shape::None, 0, Kind::Semi),
            (Shape::Newline, 1, Kind::RightBrace),
            (Shape::Newline, 1, Kind::EndOfFile),
        ];
        for (shape, len, kind) in result {
            let space = tokens.whitespace(false);
            assert_eq!((space.kind, space.len), (shape, len));
            let token = tokens.preprocessing_token(symbols, scratch);
            assert_eq!(token.kind(), kind);
        }
    }

    #[test]
    fn keywords_stay_identifiers_until_phase_seven() {
        let symbols = &SymbolMap::default();
        Tokens::keywords(symbols, Language::Cpp);

        let mut tokens = lex("class bitand template");
        let scratch = &mut Vec::default();

        tokens.whitespace(false);
        let class = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(class.kind(), Kind::Identifier);
        assert_eq!(class.keyword_kind(), Kind::Class);

        tokens.whitespace(false);
        let bitand = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(bitand.kind(), Kind::Amp);

        tokens.whitespace(false);
        let template = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(template.keyword_kind(), Kind::Template);
        assert_eq!(template.loc().offset, 13);
    }

    #[test]
    fn c_has_no_cpp_keywords() {
        let symbols = &SymbolMap::default();
        Tokens::keywords(symbols, Language::C);

        let mut tokens = lex("class _Bool");
        let scratch = &mut Vec::default();
        tokens.whitespace(false);
        assert_eq!(tokens.preprocessing_token(symbols, scratch).keyword_kind(), Kind::Identifier);
        tokens.whitespace(false);
        assert_eq!(tokens.preprocessing_token(symbols, scratch).keyword_kind(), Kind::Bool);
    }

    #[test]
    fn splices_and_raw_strings() {
        let symbols = &SymbolMap::default();
        Tokens::keywords(symbols, Language::Cpp);

        let mut tokens = lex("ab\\\ncd R\"x(a)\"b)x\" <: %> >>= 1.5e+3");
        let scratch = &mut Vec::default();

        tokens.whitespace(false);
        let ident = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(ident.spelling().as_str(), "abcd");
        assert_eq!(ident.len(), 6);

        tokens.whitespace(false);
        let raw = tokens.preprocessing_token(symbols, scratch);
        assert_eq!(raw.kind(), Kind::String);
        assert_eq!(raw.spelling().as_str(), "R\"x(a)\"b)x\"");

        let rest = [Kind::LeftBracket, Kind::RightBrace, Kind::GtGtEq, Kind::Number, Kind::EndOfFile];
        for kind in rest {
            tokens.whitespace(false);
            assert_eq!(tokens.preprocessing_token(symbols, scratch).kind(), kind);
        }
    }

    #[test]
    fn numbers() {
        assert_eq!(number(b"42").map(|n| n.value), Some(42));
        assert_eq!(number(b"0x1F").map(|n| n.value), Some(31));
        assert_eq!(number(b"017").map(|n| n.value), Some(15));
        assert_eq!(number(b"0").map(|n| n.value), Some(0));
        assert_eq!(number(b"1'000'000").map(|n| n.value), Some(1_000_000));
        let n = number(b"10ull").unwrap();
        assert!(n.unsigned && n.long == 2);
        assert!(number(b"1.5").unwrap().float);
        assert!(number(b"12abc").is_none());
    }

    #[test]
    fn characters() {
        assert_eq!(character(b"'a'"), Some(97));
        assert_eq!(character(b"'\\n'"), Some(10));
        assert_eq!(character(b"L'\\x41'"), Some(0x41));
        assert_eq!(character(b"'\\0'"), Some(0));
    }
}
