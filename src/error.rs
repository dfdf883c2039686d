use thiserror::Error;

use crate::lex::Loc;

/// What went wrong in a recoverable problem.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug, Error)]
pub enum ProblemKind {
    #[error("malformed preprocessing directive")]
    BadDirective,
    #[error("include file not found")]
    IncludeNotFound,
    #[error("#error directive")]
    ErrorDirective,
    #[error("conditional directive without matching #if")]
    UnbalancedConditional,
    #[error("unterminated conditional directive")]
    UnterminatedConditional,
    #[error("include nesting too deep")]
    IncludeDepth,
    #[error("syntax error")]
    Syntax,
    #[error("undeclared identifier")]
    Undeclared,
    #[error("conflicting declaration")]
    Redeclaration,
    #[error("redefinition")]
    Redefinition,
    #[error("explicit specialization after instantiation")]
    LateSpecialization,
    #[error("invalid template arguments")]
    TemplateArguments,
    #[error("unexpected end of file")]
    UnexpectedEof,
}

/// A recoverable error. Reported through `accept_problem`; parsing continues.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("{kind} at offset {}: {detail}", .loc.offset)]
pub struct Problem {
    pub kind: ProblemKind,
    pub loc: Loc,
    pub detail: String,
}

impl Problem {
    pub fn new(kind: ProblemKind, loc: Loc, detail: impl Into<String>) -> Problem {
        Problem { kind, loc, detail: detail.into() }
    }
}

/// A fatal error. The whole translation unit fails with no result beyond the events already
/// delivered.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
pub enum Failure {
    #[error("ambiguous partial specializations of `{template}` for `{arguments}`")]
    AmbiguousSpecialization { template: String, arguments: String, loc: Loc },
    #[error("ambiguous call to `{name}`")]
    AmbiguousCall { name: String, loc: Loc },
    #[error("no matching function for call to `{name}`")]
    NoMatchingFunction { name: String, loc: Loc },
    #[error("unterminated template argument list for `{name}`")]
    UnterminatedTemplateArguments { name: String, loc: Loc },
    #[error("nesting too deep")]
    NestingTooDeep { loc: Loc },
    #[error("parse aborted by requestor")]
    Aborted,
}

impl Failure {
    pub fn loc(&self) -> Option<Loc> {
        match *self {
            Failure::AmbiguousSpecialization { loc, .. } |
            Failure::AmbiguousCall { loc, .. } |
            Failure::NoMatchingFunction { loc, .. } |
            Failure::UnterminatedTemplateArguments { loc, .. } |
            Failure::NestingTooDeep { loc } => { Some(loc) }
            Failure::Aborted => { None }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Failure, Problem, ProblemKind};
    use crate::lex::{FileId, Loc};

    #[test]
    fn display() {
        let loc = Loc { file: FileId(0), offset: 12, len: 1 };
        let problem = Problem::new(ProblemKind::Undeclared, loc, "x");
        assert_eq!(problem.to_string(), "undeclared identifier at offset 12: x");

        let failure = Failure::AmbiguousCall { name: "f".into(), loc };
        assert_eq!(failure.to_string(), "ambiguous call to `f`");
        assert_eq!(failure.loc(), Some(loc));
        assert_eq!(Failure::Aborted.loc(), None);
    }
}
