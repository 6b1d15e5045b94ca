//! Indent/dedent synthesis.
//!
//! Sits on top of a lexer whose newline tokens carry the indentation run of
//! the following line. After every newline the run is compared against a
//! stack of open indent frames: matching frames are consumed from the left,
//! any non-matching frames are closed with one `Dedent` each, and a non-empty
//! residue opens a new frame and emits one `Indent`. At end of input a final
//! newline is synthesised so the parser never has to treat EOF specially, and
//! all remaining frames are drained as dedents.
//!
//! Synthesised tokens are emitted before the newline that triggered them, so
//! the parser sees `Indent NL` at the start of a block and `Dedent NL` at its
//! end.

use std::collections::VecDeque;

use crate::error::ParseError;
use crate::position::Position;
use crate::token::{Token, TokenKind};

pub struct Indenter<I> {
  inner: I,
  indents: Vec<String>,
  buffered: VecDeque<Token>,
  saw_eof: bool,
}

impl<I> Indenter<I>
where
  I: Iterator<Item = Result<Token, ParseError>>,
{
  pub fn new(inner: I) -> Self {
    Self { inner, indents: Vec::new(), buffered: VecDeque::new(), saw_eof: false }
  }

  /// Split a newline token into scope tokens plus a bare `"\n"` newline.
  fn process_newline(&mut self, tok: Token) {
    let indent_full = tok.value.strip_prefix('\n').unwrap_or(&tok.value).to_string();
    let newline = Token::new(TokenKind::Newline, "\n", tok.pos);

    // Position of the indentation itself: start of the next line.
    let mut pos = Position {
      line: tok.pos.line + 1,
      column: 1,
      offset: tok.pos.offset + 1,
    };

    let mut indent = indent_full.as_str();
    let mut kept = self.indents.len();
    for (i, frame) in self.indents.iter().enumerate() {
      if let Some(rest) = indent.strip_prefix(frame.as_str()) {
        pos.column += frame.chars().count() as u32;
        pos.offset += frame.len() as u32;
        indent = rest;
      } else {
        kept = i;
        break;
      }
    }
    for _ in kept..self.indents.len() {
      self.buffered.push_back(Token::new(TokenKind::Dedent, "", pos));
    }
    self.indents.truncate(kept);

    if !indent.is_empty() {
      self.indents.push(indent.to_string());
      self.buffered.push_back(Token::new(TokenKind::Indent, indent, pos));
    }
    self.buffered.push_back(newline);
  }
}

impl<I> Iterator for Indenter<I>
where
  I: Iterator<Item = Result<Token, ParseError>>,
{
  type Item = Result<Token, ParseError>;

  fn next(&mut self) -> Option<Self::Item> {
    if let Some(tok) = self.buffered.pop_front() {
      return Some(Ok(tok));
    }
    let tok = match self.inner.next()? {
      Ok(tok) => tok,
      Err(err) => return Some(Err(err)),
    };
    match tok.kind {
      TokenKind::Newline => {
        self.process_newline(tok);
        self.next()
      }
      TokenKind::Eof if !self.saw_eof => {
        // A trailing newline guarantees open frames are drained before EOF.
        self.saw_eof = true;
        let nl = Token::new(TokenKind::Newline, "\n", tok.pos);
        self.process_newline(nl);
        self.buffered.push_back(tok);
        self.next()
      }
      _ => Some(Ok(tok)),
    }
  }
}
