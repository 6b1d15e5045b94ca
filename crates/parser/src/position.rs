//! Source positions.

use std::fmt;

/// A location in Bitfile source text.
///
/// Lines and columns are 1-based, the offset is a 0-based byte offset. The
/// file name is carried once at the rendering boundary (the CLI knows which
/// file it loaded) rather than in every position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
  pub line: u32,
  pub column: u32,
  pub offset: u32,
}

impl Position {
  /// The first position in a source file.
  pub fn start() -> Self {
    Self { line: 1, column: 1, offset: 0 }
  }

  /// Translate a position relative to an embedded string (a splice body or a
  /// reparsed block) into a position in the outer source.
  ///
  /// If the inner position is on its first line it is column-relative to this
  /// position; on later lines only the line is joined and the inner column is
  /// kept verbatim. Offsets always add.
  pub fn translate(self, inner: Position) -> Position {
    let mut out = self;
    if inner.line == 1 {
      out.column += inner.column - 1;
    } else {
      out.line += inner.line - 1;
      out.column = inner.column;
    }
    out.offset += inner.offset;
    out
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.line, self.column)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn translate_same_line_joins_columns() {
    let outer = Position { line: 4, column: 10, offset: 100 };
    let inner = Position { line: 1, column: 3, offset: 2 };
    let got = outer.translate(inner);
    assert_eq!(got, Position { line: 4, column: 12, offset: 102 });
  }

  #[test]
  fn translate_later_line_keeps_inner_column() {
    let outer = Position { line: 4, column: 10, offset: 100 };
    let inner = Position { line: 3, column: 5, offset: 40 };
    let got = outer.translate(inner);
    assert_eq!(got, Position { line: 6, column: 5, offset: 140 });
  }
}
