//! SQL front end: tokenizer, syntax tree, and parser.

pub mod ast;
mod lexer;
mod parser;

pub use ast::*;
pub use parser::{parse, parse_one, Parsed};
