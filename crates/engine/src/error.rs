//! Engine errors.
//!
//! Everything attributable to a Bitfile location carries a position; other
//! failures carry wrapped context describing what was attempted. Errors are
//! never recovered from; they bubble to the command entrypoint.

use std::io;

use thiserror::Error;

use bit_parser::{ParseError, Position};

use crate::db::DbError;
use crate::glob::GlobError;

#[derive(Debug, Error)]
pub enum EngineError {
  /// A semantic error at a Bitfile location: unknown or circular variables,
  /// schema violations, failed commands, missing outputs.
  #[error("{pos}: {message}")]
  Positioned { pos: Position, message: String },

  #[error(transparent)]
  Parse(#[from] ParseError),

  #[error(transparent)]
  Db(#[from] DbError),

  #[error(transparent)]
  Glob(#[from] GlobError),

  /// A failure with free-form context (filesystem, subprocess plumbing).
  #[error("{context}")]
  Context {
    context: String,
    #[source]
    source: io::Error,
  },

  #[error("{0}")]
  Other(String),
}

impl EngineError {
  pub fn new(pos: Position, message: impl Into<String>) -> Self {
    EngineError::Positioned { pos, message: message.into() }
  }

  pub fn context(context: impl Into<String>, source: io::Error) -> Self {
    EngineError::Context { context: context.into(), source }
  }

  /// The Bitfile position this error is attributable to, if any.
  pub fn position(&self) -> Option<Position> {
    match self {
      EngineError::Positioned { pos, .. } => Some(*pos),
      EngineError::Parse(err) => Some(err.pos),
      _ => None,
    }
  }

  /// The message without its position prefix, for renderers that print the
  /// offending source line themselves.
  pub fn message(&self) -> String {
    match self {
      EngineError::Positioned { message, .. } => message.clone(),
      EngineError::Parse(err) => err.message.clone(),
      other => other.to_string(),
    }
  }
}
