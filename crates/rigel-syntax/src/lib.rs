//! Positioned Java syntax for debugger snippets.
//!
//! This crate lexes and parses the subset of Java that evaluation snippets
//! use: expressions, local variable declarations, `if`/`while`/`return`
//! statements, plus enough of class declarations to locate a method body to
//! splice synthesized source into. Two complementary entry points:
//! - [`parse_compilation_unit`]: parses a whole file's declaration skeleton
//!   (package, types, member signatures and body ranges).
//! - [`parse_block_body`]: parses a braceless run of statements located at a
//!   byte offset inside a larger file, so every node's [`Span`] comes out
//!   file-relative.
//!
//! Parsing never fails: malformed input produces `Missing` nodes and the
//! problems are reported as [`SyntaxError`] values alongside the tree.

pub mod ast;
mod lexer;
mod literals;
mod parser;

pub use ast::Span;
pub use lexer::{Lexer, Token, TokenKind};
pub use literals::{
    decode as decode_literal, parse_double_literal, parse_float_literal, parse_int_literal,
    parse_long_literal, unescape_char_literal, unescape_string_literal, LiteralError,
    LiteralValue,
};
pub use parser::{parse_block_body, parse_compilation_unit, BodyParse, Parse, SyntaxError};

#[cfg(test)]
mod tests;
