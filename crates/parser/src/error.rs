//! Parse errors.

use thiserror::Error;

use crate::position::Position;

/// A position-bearing syntax error. Never recovered from; the CLI renders it
/// against the offending source line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{pos}: {message}")]
pub struct ParseError {
  pub pos: Position,
  pub message: String,
}

impl ParseError {
  pub fn new(pos: Position, message: impl Into<String>) -> Self {
    Self { pos, message: message.into() }
  }

  /// Rebase this error from an embedded string into its outer source.
  pub fn translate(mut self, parent: Position) -> Self {
    self.pos = parent.translate(self.pos);
    self
  }
}
