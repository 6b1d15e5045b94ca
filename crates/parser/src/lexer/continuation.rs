//! Line-continuation collapsing.
//!
//! A `\` at end of line continues the logical line. The scanner emits the
//! whole continuation (surrounding whitespace included) as one token; this
//! layer rewrites it into a single space so downstream layers never see the
//! line break.

use crate::error::ParseError;
use crate::token::{Token, TokenKind};

pub struct Flattener<I> {
  inner: I,
}

impl<I> Flattener<I>
where
  I: Iterator<Item = Result<Token, ParseError>>,
{
  pub fn new(inner: I) -> Self {
    Self { inner }
  }
}

impl<I> Iterator for Flattener<I>
where
  I: Iterator<Item = Result<Token, ParseError>>,
{
  type Item = Result<Token, ParseError>;

  fn next(&mut self) -> Option<Self::Item> {
    let mut tok = match self.inner.next()? {
      Ok(tok) => tok,
      Err(err) => return Some(Err(err)),
    };
    if tok.kind == TokenKind::Continuation {
      tok.kind = TokenKind::Whitespace;
      tok.value = " ".to_string();
    }
    Some(Ok(tok))
  }
}
