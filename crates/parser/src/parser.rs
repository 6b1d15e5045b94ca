//! Recursive-descent parser for the Bitfile grammar.
//!
//! Entries are disambiguated by bounded lookahead over significant tokens:
//! `virtual`, `implicit` and `template` are ordinary identifiers that only
//! introduce their entry kind when the following tokens fit, so targets named
//! after the keywords still parse.
//!
//! Block bodies come in two shapes: trailing on the same line, or an
//! indented block whose inner content (whitespace and newlines included) is
//! captured verbatim. Both are assembled from raw token values, so splices
//! and quoted strings inside command bodies survive untouched.

use crate::ast::*;
use crate::error::ParseError;
use crate::lexer::tokenize;
use crate::position::Position;
use crate::token::{Token, TokenKind};

/// Characters allowed inside an unquoted ref, besides idents and numbers.
const REF_CHARS: &str = "-/.*@[]{}!,?";

/// Parse a whole Bitfile.
pub fn parse(src: &str) -> Result<Bitfile, ParseError> {
  let tokens = tokenize(src)?;
  Parser::new(tokens).bitfile()
}

/// Parse a string as a standalone ref list, translating positions (and any
/// error) into the parent source. Newlines are collapsed to spaces first, so
/// multi-line `inputs:` blocks reparse cleanly.
pub fn parse_ref_list(parent: Position, text: &str) -> Result<RefList, ParseError> {
  let cleaned = text.replace('\n', " ");
  let tokens = tokenize(&cleaned).map_err(|err| err.translate(parent))?;
  let mut p = Parser::new(tokens);
  let mut list = RefList::default();
  list.pos = parent;
  loop {
    p.skip_ws();
    while matches!(p.peek().kind, TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent) {
      p.bump();
    }
    if p.peek().kind == TokenKind::Eof {
      break;
    }
    match p.parse_ref() {
      Some(mut r) => {
        r.pos = parent.translate(r.pos);
        if list.refs.is_empty() {
          list.pos = r.pos;
        }
        list.refs.push(r);
      }
      None => {
        let tok = p.peek().clone();
        return Err(
          ParseError::new(tok.pos, format!("unexpected token {:?} in reference list", tok.value))
            .translate(parent),
        );
      }
    }
  }
  Ok(list)
}

struct Parser {
  tokens: Vec<Token>,
  i: usize,
}

impl Parser {
  fn new(tokens: Vec<Token>) -> Self {
    Self { tokens, i: 0 }
  }

  fn peek(&self) -> &Token {
    self.tokens.get(self.i).unwrap_or(self.tokens.last().expect("token stream ends with Eof"))
  }

  fn bump(&mut self) -> Token {
    let tok = self.peek().clone();
    if self.i < self.tokens.len() - 1 {
      self.i += 1;
    }
    tok
  }

  /// Skip whitespace and comments.
  fn skip_ws(&mut self) {
    while matches!(self.peek().kind, TokenKind::Whitespace | TokenKind::Comment) {
      self.i += 1;
    }
  }

  /// Skip whitespace, comments and newlines.
  fn skip_blank(&mut self) {
    while matches!(
      self.peek().kind,
      TokenKind::Whitespace | TokenKind::Comment | TokenKind::Newline
    ) {
      self.i += 1;
    }
  }

  /// Skip whitespace and newlines but leave comments for docs collection.
  fn skip_newlines(&mut self) {
    while matches!(self.peek().kind, TokenKind::Whitespace | TokenKind::Newline) {
      self.i += 1;
    }
  }

  /// The nth significant token from the cursor, skipping whitespace and
  /// comments but stopping at line structure.
  fn sig(&self, n: usize) -> &Token {
    let mut seen = 0;
    let mut j = self.i;
    loop {
      let tok = self.tokens.get(j).unwrap_or(self.tokens.last().unwrap());
      match tok.kind {
        TokenKind::Whitespace | TokenKind::Comment => {}
        _ => {
          if seen == n {
            return tok;
          }
          seen += 1;
        }
      }
      if j >= self.tokens.len() - 1 {
        return self.tokens.last().unwrap();
      }
      j += 1;
    }
  }

  fn expect_char(&mut self, ch: char) -> Result<Token, ParseError> {
    self.skip_ws();
    let tok = self.peek().clone();
    if tok.is_char(ch) {
      Ok(self.bump())
    } else {
      Err(ParseError::new(
        tok.pos,
        format!("unexpected token {:?} (expected {:?})", tok.value, ch),
      ))
    }
  }

  fn expect_ident(&mut self) -> Result<Token, ParseError> {
    self.skip_ws();
    let tok = self.peek().clone();
    if tok.kind == TokenKind::Ident {
      Ok(self.bump())
    } else {
      Err(ParseError::new(
        tok.pos,
        format!("unexpected token {:?} (expected identifier)", tok.value),
      ))
    }
  }

  // ---------------------------------------------------------------------
  // Entries
  // ---------------------------------------------------------------------

  fn bitfile(mut self) -> Result<Bitfile, ParseError> {
    let pos = self.peek().pos;
    self.skip_newlines();
    let docs = self.collect_docs();
    let mut entries = Vec::new();
    loop {
      self.skip_newlines();
      let entry_docs = self.collect_docs();
      self.skip_newlines();
      if self.peek().kind == TokenKind::Eof {
        break;
      }
      entries.push(self.entry(entry_docs)?);
    }
    Ok(Bitfile { pos, docs, entries })
  }

  /// Gather a block of adjacent comment lines ahead of the cursor. A blank
  /// line ends the block.
  fn collect_docs(&mut self) -> Option<String> {
    let mut lines: Vec<String> = Vec::new();
    while self.peek().kind == TokenKind::Comment {
      let tok = self.bump();
      let text = tok.value.trim_start_matches('#');
      lines.push(text.strip_prefix(' ').unwrap_or(text).to_string());
      if self.peek().kind != TokenKind::Newline {
        break;
      }
      self.bump();
    }
    if lines.is_empty() { None } else { Some(lines.join("\n")) }
  }

  fn entry(&mut self, docs: Option<String>) -> Result<Entry, ParseError> {
    let t0 = self.sig(0).clone();
    if t0.kind == TokenKind::Ident {
      match t0.value.as_str() {
        "virtual" if self.sig(1).kind == TokenKind::Ident && self.sig(2).is_char(':') => {
          return self.virtual_target(docs).map(Entry::VirtualTarget);
        }
        "template" if self.sig(1).kind == TokenKind::Ident && self.sig(2).is_char('(') => {
          return self.template(docs).map(Entry::Template);
        }
        "implicit" if !self.sig(1).is_char(':') => {
          return self.implicit_target(docs).map(Entry::ImplicitTarget);
        }
        "export" if self.sig(1).kind == TokenKind::Ident => {
          return self.assignment(docs).map(Entry::Assignment);
        }
        _ => {}
      }
      if self.sig(1).is_char('=')
        || (is_override(self.sig(1)) && self.sig(2).is_char('='))
      {
        return self.assignment(docs).map(Entry::Assignment);
      }
    }
    self.target(docs).map(Entry::Target)
  }

  fn assignment(&mut self, docs: Option<String>) -> Result<Assignment, ParseError> {
    self.skip_ws();
    let pos = self.peek().pos;
    let mut export = false;
    if self.peek().kind == TokenKind::Ident
      && self.peek().value == "export"
      && self.sig(1).kind == TokenKind::Ident
    {
      self.bump();
      export = true;
    }
    let name = self.expect_ident()?;
    self.skip_ws();
    let override_ = self.parse_override();
    self.expect_char('=')?;
    let value = self.block()?;
    Ok(Assignment { pos, docs, export, name: name.value, override_, value })
  }

  fn target(&mut self, docs: Option<String>) -> Result<Target, ParseError> {
    self.skip_ws();
    let pos = self.peek().pos;
    let outputs = self.ref_list();
    self.expect_char(':')?;
    let inputs = self.ref_list();
    let directives = self.directive_block()?;
    Ok(Target { pos, docs, outputs, inputs, directives })
  }

  fn virtual_target(&mut self, docs: Option<String>) -> Result<VirtualTarget, ParseError> {
    self.skip_ws();
    let pos = self.peek().pos;
    self.bump(); // virtual
    let name = self.expect_ident()?;
    self.expect_char(':')?;
    let inputs = self.ref_list();
    let directives = self.directive_block()?;
    Ok(VirtualTarget { pos, docs, name: name.value, inputs, directives })
  }

  fn implicit_target(&mut self, docs: Option<String>) -> Result<ImplicitTarget, ParseError> {
    self.skip_ws();
    let pos = self.peek().pos;
    self.bump(); // implicit
    self.skip_ws();
    let replace = self
      .parse_ref()
      .ok_or_else(|| ParseError::new(self.peek().pos, "expected replacement reference"))?;
    self.expect_char(':')?;
    self.skip_ws();
    let pattern = self
      .parse_ref()
      .ok_or_else(|| ParseError::new(self.peek().pos, "expected input pattern"))?;
    let directives = self.directive_block()?;
    Ok(ImplicitTarget { pos, docs, replace, pattern, directives })
  }

  fn template(&mut self, docs: Option<String>) -> Result<Template, ParseError> {
    self.skip_ws();
    let pos = self.peek().pos;
    self.bump(); // template
    let name = self.expect_ident()?;
    self.expect_char('(')?;
    let mut parameters = Vec::new();
    loop {
      self.skip_ws();
      if self.peek().is_char(')') {
        self.bump();
        break;
      }
      let pname = self.expect_ident()?;
      self.skip_ws();
      let value = if self.peek().is_char('=') {
        self.bump();
        Some(self.quoted_string()?)
      } else {
        None
      };
      parameters.push(Parameter { pos: pname.pos, name: pname.value, value });
      self.skip_ws();
      if self.peek().is_char(',') {
        self.bump();
      }
    }
    let outputs = self.ref_list();
    self.expect_char(':')?;
    let inputs = self.ref_list();
    let directives = self.directive_block()?;
    Ok(Template { pos, docs, name: name.value, parameters, outputs, inputs, directives })
  }

  // ---------------------------------------------------------------------
  // Directives
  // ---------------------------------------------------------------------

  fn directive_block(&mut self) -> Result<Vec<Directive>, ParseError> {
    self.skip_blank();
    let tok = self.peek().clone();
    if tok.kind != TokenKind::Indent {
      return Err(ParseError::new(tok.pos, "expected an indented block"));
    }
    self.bump();
    let mut directives = Vec::new();
    loop {
      self.skip_blank();
      match self.peek().kind {
        TokenKind::Dedent => {
          self.bump();
          break;
        }
        TokenKind::Eof => {
          return Err(ParseError::new(self.peek().pos, "unterminated directive block"));
        }
        _ => directives.push(self.directive()?),
      }
    }
    Ok(directives)
  }

  fn directive(&mut self) -> Result<Directive, ParseError> {
    self.skip_ws();
    let tok = self.peek().clone();

    if tok.is_char('<') {
      self.bump();
      let target = self.expect_ident()?;
      let mut arguments = Vec::new();
      self.skip_ws();
      if self.peek().is_char('(') {
        self.bump();
        loop {
          self.skip_ws();
          if self.peek().is_char(')') {
            self.bump();
            break;
          }
          let name = self.expect_ident()?;
          self.expect_char('=')?;
          let value = self.quoted_string()?;
          arguments.push(Argument { pos: name.pos, name: name.value, value });
          self.skip_ws();
          if self.peek().is_char(',') {
            self.bump();
          }
        }
      }
      return Ok(Directive::Inherit(Inherit { pos: tok.pos, target: target.value, arguments }));
    }

    if is_override(&tok) {
      let override_ = self.parse_override();
      let name = self.expect_ident()?;
      return self.command(tok.pos, override_, name.value).map(Directive::Command);
    }

    if tok.kind == TokenKind::Ident {
      if tok.value == "export" && self.sig(1).kind == TokenKind::Ident {
        return self.assignment(None).map(Directive::Assignment);
      }
      if self.sig(1).is_char('=') || (is_override(self.sig(1)) && self.sig(2).is_char('=')) {
        return self.assignment(None).map(Directive::Assignment);
      }
      if tok.value == "cd" && !self.sig(1).is_char(':') {
        self.bump();
        self.skip_ws();
        let dir = self
          .parse_ref()
          .ok_or_else(|| ParseError::new(self.peek().pos, "expected directory reference"))?;
        return Ok(Directive::Chdir(Chdir { pos: tok.pos, dir }));
      }
      let name = self.bump();
      return self.command(tok.pos, Override::Replace, name.value).map(Directive::Command);
    }

    Err(ParseError::new(tok.pos, format!("unexpected token {:?} (expected directive)", tok.value)))
  }

  fn command(
    &mut self,
    pos: Position,
    override_: Override,
    command: String,
  ) -> Result<Command, ParseError> {
    self.skip_ws();
    let value = if self.peek().is_char(':') {
      self.bump();
      Some(self.block()?)
    } else {
      None
    };
    Ok(Command { pos, override_, command, value })
  }

  fn parse_override(&mut self) -> Override {
    let tok = self.peek().clone();
    let override_ = match tok.value.as_str() {
      "^" if tok.kind == TokenKind::Char => Override::Prepend,
      "+" if tok.kind == TokenKind::Char => Override::Append,
      "-" if tok.kind == TokenKind::Char => Override::Delete,
      _ => return Override::Replace,
    };
    self.bump();
    self.skip_ws();
    override_
  }

  // ---------------------------------------------------------------------
  // Blocks, refs, strings
  // ---------------------------------------------------------------------

  /// Capture a block body: either the rest of the line, or an indented block
  /// whose content is reassembled verbatim (nested indentation included).
  fn block(&mut self) -> Result<Block, ParseError> {
    if self.peek().kind == TokenKind::Whitespace {
      self.bump();
    }
    if self.peek().kind == TokenKind::Indent {
      self.bump();
      while self.peek().kind == TokenKind::Newline {
        self.bump();
      }
      let pos = self.peek().pos;
      let mut body = String::new();
      // Indent frames opened inside the block; a deeper frame is emitted
      // before the newline it follows, so its run is re-applied as a line
      // prefix after each captured newline instead.
      let mut open: Vec<String> = Vec::new();
      loop {
        let tok = self.peek().clone();
        match tok.kind {
          TokenKind::Dedent => {
            if open.pop().is_none() {
              self.bump();
              break;
            }
            self.bump();
          }
          TokenKind::Indent => {
            open.push(tok.value);
            self.bump();
          }
          TokenKind::Newline => {
            body.push('\n');
            for frame in &open {
              body.push_str(frame);
            }
            self.bump();
          }
          TokenKind::Eof => return Err(ParseError::new(tok.pos, "unterminated block")),
          _ => {
            body.push_str(&tok.value);
            self.bump();
          }
        }
      }
      Ok(Block { pos, body })
    } else {
      let pos = self.peek().pos;
      let mut body = String::new();
      while !matches!(
        self.peek().kind,
        TokenKind::Newline | TokenKind::Indent | TokenKind::Dedent | TokenKind::Eof
      ) {
        body.push_str(&self.bump().value);
      }
      Ok(Block { pos, body })
    }
  }

  /// Zero or more whitespace-separated refs.
  fn ref_list(&mut self) -> RefList {
    let mut list = RefList::default();
    loop {
      self.skip_ws();
      match self.parse_ref() {
        Some(r) => {
          if list.refs.is_empty() {
            list.pos = r.pos;
          }
          list.refs.push(r);
        }
        None => break,
      }
    }
    list
  }

  /// A single ref: a quoted string, or an adjacent run of idents, numbers,
  /// splices and path punctuation.
  fn parse_ref(&mut self) -> Option<Ref> {
    let tok = self.peek().clone();
    match tok.kind {
      TokenKind::String | TokenKind::StringLiteral | TokenKind::MultilineString => {
        self.bump();
        Some(Ref::new(tok.pos, unquote(&tok)))
      }
      _ if is_ref_token(&tok) => {
        let pos = tok.pos;
        let mut text = String::new();
        while is_ref_token(self.peek()) {
          text.push_str(&self.bump().value);
        }
        Some(Ref::new(pos, text))
      }
      _ => None,
    }
  }

  fn quoted_string(&mut self) -> Result<String, ParseError> {
    self.skip_ws();
    let tok = self.peek().clone();
    match tok.kind {
      TokenKind::String | TokenKind::StringLiteral | TokenKind::MultilineString => {
        self.bump();
        Ok(unquote(&tok))
      }
      _ => Err(ParseError::new(
        tok.pos,
        format!("unexpected token {:?} (expected string)", tok.value),
      )),
    }
  }
}

fn is_override(tok: &Token) -> bool {
  tok.kind == TokenKind::Char && matches!(tok.value.as_str(), "^" | "+" | "-")
}

fn is_ref_token(tok: &Token) -> bool {
  match tok.kind {
    TokenKind::Var | TokenKind::Cmd | TokenKind::Ident | TokenKind::Number => true,
    TokenKind::Char => tok.value.chars().next().is_some_and(|c| REF_CHARS.contains(c)),
    _ => false,
  }
}

/// Strip quotes from a string token, processing backslash escapes in
/// double-quoted strings only.
fn unquote(tok: &Token) -> String {
  match tok.kind {
    TokenKind::String => {
      let inner = &tok.value[1..tok.value.len() - 1];
      let mut out = String::with_capacity(inner.len());
      let mut chars = inner.chars();
      while let Some(c) = chars.next() {
        if c == '\\' {
          match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some(other) => out.push(other),
            None => {}
          }
        } else {
          out.push(c);
        }
      }
      out
    }
    TokenKind::StringLiteral => tok.value[1..tok.value.len() - 1].to_string(),
    TokenKind::MultilineString => tok.value[3..tok.value.len() - 3].to_string(),
    _ => tok.value.clone(),
  }
}
