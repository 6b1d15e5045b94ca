//! The Bitfile AST.
//!
//! Entries and directives are closed enums so that evaluation can match
//! exhaustively; adding a node kind is a deliberate, compiler-checked change.

use std::fmt;

use crate::position::Position;

/// A parsed Bitfile: optional leading docs plus top-level entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitfile {
  pub pos: Position,
  pub docs: Option<String>,
  pub entries: Vec<Entry>,
}

/// A top-level entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
  Target(Target),
  VirtualTarget(VirtualTarget),
  ImplicitTarget(ImplicitTarget),
  Template(Template),
  Assignment(Assignment),
}

impl Entry {
  pub fn pos(&self) -> Position {
    match self {
      Entry::Target(e) => e.pos,
      Entry::VirtualTarget(e) => e.pos,
      Entry::ImplicitTarget(e) => e.pos,
      Entry::Template(e) => e.pos,
      Entry::Assignment(e) => e.pos,
    }
  }
}

/// `outputs : inputs` plus an indented directive block.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
  pub pos: Position,
  pub docs: Option<String>,
  pub outputs: RefList,
  pub inputs: RefList,
  pub directives: Vec<Directive>,
}

/// `virtual name: inputs`: a labelled target with no filesystem output.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualTarget {
  pub pos: Position,
  pub docs: Option<String>,
  pub name: String,
  pub inputs: RefList,
  pub directives: Vec<Directive>,
}

/// `implicit replacement: pattern`: a pattern rule expanded to one concrete
/// target per matching input file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImplicitTarget {
  pub pos: Position,
  pub docs: Option<String>,
  pub replace: Ref,
  pub pattern: Ref,
  pub directives: Vec<Directive>,
}

/// `template name(params) outputs : inputs`: a parameterized target body
/// spliced into targets that inherit it.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
  pub pos: Position,
  pub docs: Option<String>,
  pub name: String,
  pub parameters: Vec<Parameter>,
  pub outputs: RefList,
  pub inputs: RefList,
  pub directives: Vec<Directive>,
}

/// A template parameter with an optional quoted default.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
  pub pos: Position,
  pub name: String,
  pub value: Option<String>,
}

/// A call-site argument to an inherited template.
#[derive(Debug, Clone, PartialEq)]
pub struct Argument {
  pub pos: Position,
  pub name: String,
  pub value: String,
}

/// A directive inside a target body.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
  Inherit(Inherit),
  Chdir(Chdir),
  Assignment(Assignment),
  Command(Command),
}

impl Directive {
  pub fn pos(&self) -> Position {
    match self {
      Directive::Inherit(d) => d.pos,
      Directive::Chdir(d) => d.pos,
      Directive::Assignment(d) => d.pos,
      Directive::Command(d) => d.pos,
    }
  }
}

/// `< name(args)`: splice a template into this target.
#[derive(Debug, Clone, PartialEq)]
pub struct Inherit {
  pub pos: Position,
  pub target: String,
  pub arguments: Vec<Argument>,
}

/// `cd dir`: directory the target's commands run in.
#[derive(Debug, Clone, PartialEq)]
pub struct Chdir {
  pub pos: Position,
  pub dir: Ref,
}

/// A named variable binding, at file level or inside a target.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
  pub pos: Position,
  pub docs: Option<String>,
  pub export: bool,
  pub name: String,
  pub override_: Override,
  pub value: Block,
}

/// `build: ...`, `inputs: ...` and friends, with an optional override prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
  pub pos: Position,
  pub override_: Override,
  pub command: String,
  pub value: Option<Block>,
}

/// How an assignment or command combines with an existing value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Override {
  #[default]
  Replace,
  Prepend,
  Append,
  Delete,
}

impl fmt::Display for Override {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      Override::Replace => "replace",
      Override::Prepend => "prepend",
      Override::Append => "append",
      Override::Delete => "delete",
    };
    f.write_str(s)
  }
}

/// A command or assignment body: a single trailing line, or the verbatim
/// content of an indented block. Immutable after parse.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
  pub pos: Position,
  pub body: String,
}

/// A textual reference to a file or virtual target. May contain variable and
/// command splices and glob meta-characters before evaluation; evaluation
/// rewrites `text` in place.
#[derive(Debug, Clone, PartialEq)]
pub struct Ref {
  pub pos: Position,
  pub text: String,
}

impl Ref {
  pub fn new(pos: Position, text: impl Into<String>) -> Self {
    Self { pos, text: text.into() }
  }
}

impl fmt::Display for Ref {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.text)
  }
}

/// An ordered list of refs with the position of its first element.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RefList {
  pub pos: Position,
  pub refs: Vec<Ref>,
}

impl RefList {
  pub fn strings(&self) -> Vec<String> {
    self.refs.iter().map(|r| r.text.clone()).collect()
  }

  pub fn is_empty(&self) -> bool {
    self.refs.is_empty()
  }
}
