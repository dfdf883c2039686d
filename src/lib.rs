pub mod lex;
pub mod cpp;
pub mod parse;
pub mod ast;
pub mod unit;

pub mod symbols;
pub mod config;
pub mod error;
pub mod types;
pub mod scope;
pub mod template;
pub mod overload;

pub use crate::parse::parse;
pub use crate::unit::Unit;
