//! Token stream types shared by the lexer layers and the parser.

use crate::position::Position;

/// Kinds of token produced by the lexer pipeline.
///
/// `Continuation` only survives until the continuation flattener rewrites it
/// into a single `Whitespace`; `Indent`/`Dedent` are synthesised by the
/// indenter and never come from the scanner itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
  Continuation,
  Newline,
  Whitespace,
  Comment,
  String,
  StringLiteral,
  MultilineString,
  Ident,
  Cmd,
  Var,
  Number,
  Char,
  Indent,
  Dedent,
  Eof,
}

/// A single token. `value` is the raw source slice for every kind except the
/// synthetic ones: a flattened continuation is `" "`, a split `Newline` is
/// `"\n"`, an `Indent` carries the residual indent string that opened its
/// frame, and a `Dedent` is empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
  pub kind: TokenKind,
  pub value: String,
  pub pos: Position,
}

impl Token {
  pub fn new(kind: TokenKind, value: impl Into<String>, pos: Position) -> Self {
    Self { kind, value: value.into(), pos }
  }

  /// True for a `Char` token holding exactly `ch`.
  pub fn is_char(&self, ch: char) -> bool {
    self.kind == TokenKind::Char && self.value.chars().next() == Some(ch)
  }
}
