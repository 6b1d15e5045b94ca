//! The Bitfile lexer.
//!
//! A stateful scanner with two modes (root and multiline string) produces the
//! raw token stream; two layered transformations sit on top of it:
//!
//! - [`continuation::Flattener`] rewrites a line continuation (`\` + newline)
//!   into a single whitespace token, erasing the line break;
//! - [`indenter::Indenter`] synthesises `Indent`/`Dedent` tokens from the
//!   whitespace run attached to each newline.
//!
//! [`tokenize`] runs the whole pipeline and collects the result.

pub mod continuation;
pub mod indenter;

use crate::error::ParseError;
use crate::position::Position;
use crate::token::{Token, TokenKind};

/// Lex `src` through the full pipeline (scanner, indenter, continuation
/// flattener) into a token vector ending with a single `Eof` token.
pub fn tokenize(src: &str) -> Result<Vec<Token>, ParseError> {
  continuation::Flattener::new(indenter::Indenter::new(Scanner::new(src))).collect()
}

/// The raw scanner. Produces one token per lexeme; newline tokens carry their
/// trailing indentation run so the indenter can detect scope changes.
pub struct Scanner<'s> {
  src: &'s str,
  offset: usize,
  line: u32,
  column: u32,
  eof: bool,
}

impl<'s> Scanner<'s> {
  pub fn new(src: &'s str) -> Self {
    Self { src, offset: 0, line: 1, column: 1, eof: false }
  }

  fn pos(&self) -> Position {
    Position { line: self.line, column: self.column, offset: self.offset as u32 }
  }

  fn rest(&self) -> &'s str {
    &self.src[self.offset..]
  }

  /// Consume `n` bytes, updating line/column bookkeeping.
  fn advance(&mut self, n: usize) -> &'s str {
    let taken = &self.src[self.offset..self.offset + n];
    for ch in taken.chars() {
      if ch == '\n' {
        self.line += 1;
        self.column = 1;
      } else {
        self.column += 1;
      }
    }
    self.offset += n;
    taken
  }

  /// Length of the leading run of characters matching `pred`.
  fn run(&self, from: usize, pred: impl Fn(char) -> bool) -> usize {
    self.src[self.offset + from..]
      .char_indices()
      .find(|(_, c)| !pred(*c))
      .map(|(i, _)| i)
      .unwrap_or(self.src.len() - self.offset - from)
  }

  fn token(&mut self, kind: TokenKind, len: usize, pos: Position) -> Token {
    let value = self.advance(len);
    Token::new(kind, value, pos)
  }

  fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
    if self.offset >= self.src.len() {
      if self.eof {
        return Ok(None);
      }
      self.eof = true;
      return Ok(Some(Token::new(TokenKind::Eof, "", self.pos())));
    }

    let pos = self.pos();
    let rest = self.rest();
    let ch = rest.chars().next().unwrap();

    match ch {
      ' ' | '\t' | '\\' => {
        // A whitespace run followed by `\` + newline is a continuation,
        // together with the indentation of the continued line.
        let ws = self.run(0, |c| c == ' ' || c == '\t');
        if rest[ws..].starts_with("\\\n") {
          let trailing = self.run(ws + 2, |c| c == ' ' || c == '\t');
          Ok(Some(self.token(TokenKind::Continuation, ws + 2 + trailing, pos)))
        } else if ws > 0 {
          Ok(Some(self.token(TokenKind::Whitespace, ws, pos)))
        } else {
          Ok(Some(self.token(TokenKind::Char, ch.len_utf8(), pos)))
        }
      }
      '\n' => {
        let indent = self.run(1, |c| c == ' ' || c == '\t');
        Ok(Some(self.token(TokenKind::Newline, 1 + indent, pos)))
      }
      '#' => {
        let len = self.run(0, |c| c != '\n');
        Ok(Some(self.token(TokenKind::Comment, len, pos)))
      }
      '"' => self.scan_string(pos),
      '\'' => {
        if rest.starts_with("'''") {
          match rest[3..].find("'''") {
            Some(end) => Ok(Some(self.token(TokenKind::MultilineString, end + 6, pos))),
            None => Err(ParseError::new(pos, "unterminated multiline string")),
          }
        } else {
          match rest[1..].find(|c| c == '\'' || c == '\n') {
            Some(end) if rest[1..].as_bytes()[end] == b'\'' => {
              Ok(Some(self.token(TokenKind::StringLiteral, end + 2, pos)))
            }
            _ => Ok(Some(self.token(TokenKind::Char, 1, pos))),
          }
        }
      }
      '%' => {
        if rest.starts_with("%(") {
          match rest.find(")%") {
            Some(end) => Ok(Some(self.token(TokenKind::Cmd, end + 2, pos))),
            None => Ok(Some(self.token(TokenKind::Char, 1, pos))),
          }
        } else if rest.starts_with("%{") {
          // Variable names are identifiers, plus bare numbers for the
          // capture-group locals bound by implicit targets.
          let name = self.run(2, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
          if name > 0 && rest[2 + name..].starts_with('}') {
            Ok(Some(self.token(TokenKind::Var, name + 3, pos)))
          } else {
            Ok(Some(self.token(TokenKind::Char, 1, pos)))
          }
        } else {
          Ok(Some(self.token(TokenKind::Char, 1, pos)))
        }
      }
      c if is_ident_start(c) => {
        let len = self.run(0, |c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        Ok(Some(self.token(TokenKind::Ident, len, pos)))
      }
      c if c.is_ascii_digit() => {
        let len = self.run(0, |c| c.is_ascii_digit());
        Ok(Some(self.token(TokenKind::Number, len, pos)))
      }
      c => Ok(Some(self.token(TokenKind::Char, c.len_utf8(), pos))),
    }
  }

  fn scan_string(&mut self, pos: Position) -> Result<Option<Token>, ParseError> {
    let bytes = self.rest().as_bytes();
    let mut i = 1;
    while i < bytes.len() {
      match bytes[i] {
        b'\\' => i += 2,
        b'"' => return Ok(Some(self.token(TokenKind::String, i + 1, pos))),
        _ => i += 1,
      }
    }
    Err(ParseError::new(pos, "unterminated string"))
  }
}

fn is_ident_start(c: char) -> bool {
  c.is_ascii_alphabetic() || c == '_'
}

impl Iterator for Scanner<'_> {
  type Item = Result<Token, ParseError>;

  fn next(&mut self) -> Option<Self::Item> {
    self.next_token().transpose()
  }
}
