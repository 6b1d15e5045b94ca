//! The build engine.
//!
//! `Engine::compile` turns a parsed Bitfile into a resolved target graph:
//!
//! 1. global variables are bound (exported ones into a scoped child
//!    environment, never the parent process);
//! 2. templates are registered and implicit targets are materialized into one
//!    concrete target per matching file;
//! 3. each entry's directives are analysed into a `Target`;
//! 4. outputs are evaluated, normalised and registered (duplicates are
//!    fatal), then inputs are evaluated and glob-expanded;
//! 5. every target is fingerprinted twice: once from the hash database and
//!    once from the live filesystem.
//!
//! `Engine::build` then walks the dependency graph serially, running the
//! build command of every target whose fingerprints disagree. Targets are
//! held in a vector and referenced by index from the output and input maps,
//! so iteration order is deterministic and the graph has no ownership
//! cycles.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;

use regex::Regex;
use tracing::debug;

use bit_parser::text::{self, Fragment};
use bit_parser::{
  Assignment, Bitfile, Block, Directive, Entry, ImplicitTarget, Override, Position, Ref, RefList,
  Template, parse_ref_list,
};

use crate::db::HashDb;
use crate::error::EngineError;
use crate::glob::{Globber, is_glob};
use crate::hasher::Hasher;
use crate::logging::Logger;
use crate::memo::Memo;

/// Index of a target in the engine's target vector.
pub type TargetId = usize;

/// One step of a target's clean function.
#[derive(Debug, Clone)]
enum CleanStep {
  /// Remove every output path recursively, tolerating already-absent files.
  RemoveOutputs,
  /// Run a shell command from a `clean:` directive.
  Run(Block),
}

/// Which hasher fingerprints an output ref.
#[derive(Debug, Clone, Copy)]
enum HashKind {
  /// The last persisted hash from the database; missing entries hash to 0.
  Db,
  /// Live filesystem state. During seeding a missing file hashes to 0; after
  /// a build it is fatal.
  Real { allow_missing: bool },
}

/// A resolved build target.
#[derive(Debug)]
pub struct Target {
  pos: Position,
  inputs: RefList,
  outputs: RefList,
  build: Option<Block>,
  chdir: Ref,
  vars: BTreeMap<String, Block>,
  hash_cmd: Option<Block>,
  hash_memo: Memo<u64>,
  clean: Vec<CleanStep>,
  stored_hash: u64,
  real_hash: u64,
  synthetic: bool,
  virtual_: bool,
}

impl Target {
  fn new(pos: Position) -> Self {
    Self {
      pos,
      inputs: RefList::default(),
      outputs: RefList::default(),
      build: None,
      chdir: Ref::new(pos, "."),
      vars: BTreeMap::new(),
      hash_cmd: None,
      hash_memo: Memo::new(),
      clean: vec![CleanStep::RemoveOutputs],
      stored_hash: 0,
      real_hash: 0,
      synthetic: false,
      virtual_: false,
    }
  }
}

/// The engine for a single run: variables, target table, path indices,
/// globber and hash database.
#[derive(Debug)]
pub struct Engine {
  cwd: PathBuf,
  log: Logger,
  vars: BTreeMap<String, Block>,
  env: BTreeMap<String, String>,
  db: HashDb,
  globber: Globber,
  targets: Vec<Target>,
  outputs: BTreeMap<String, TargetId>,
  inputs: BTreeMap<String, TargetId>,
  templates: BTreeMap<String, Template>,
}

impl Engine {
  /// Compile `bitfile` against the working directory `cwd`, using the
  /// per-directory hash database under the user cache dir.
  pub fn compile(log: Logger, cwd: impl Into<PathBuf>, bitfile: Bitfile) -> Result<Self, EngineError> {
    let cwd = cwd.into();
    let db = HashDb::open(HashDb::default_path(&cwd)?)?;
    Self::compile_with_db(log, cwd, db, bitfile)
  }

  /// Compile with an explicit hash database.
  pub fn compile_with_db(
    log: Logger,
    cwd: impl Into<PathBuf>,
    db: HashDb,
    bitfile: Bitfile,
  ) -> Result<Self, EngineError> {
    let cwd: PathBuf = cwd.into();
    let cwd = fs::canonicalize(&cwd)
      .map_err(|source| EngineError::context(format!("failed to resolve {cwd:?}"), source))?;
    let globber = Globber::new(&cwd)?;
    let mut engine = Engine {
      cwd,
      log,
      vars: BTreeMap::new(),
      env: BTreeMap::new(),
      db,
      globber,
      targets: Vec::new(),
      outputs: BTreeMap::new(),
      inputs: BTreeMap::new(),
      templates: BTreeMap::new(),
    };
    engine.vars.insert(
      "CWD".to_string(),
      Block { pos: Position::default(), body: engine.cwd.display().to_string() },
    );

    engine.set_globals(&bitfile)?;
    engine.analyse(&bitfile)?;
    engine.evaluate_outputs()?;
    engine.evaluate_inputs()?;
    engine.seed_hashes()?;
    debug!(targets = engine.targets.len(), "compiled");
    Ok(engine)
  }

  // -----------------------------------------------------------------------
  // Compile pipeline
  // -----------------------------------------------------------------------

  /// Bind global variables and templates; exported assignments also flow
  /// into the scoped child environment.
  fn set_globals(&mut self, bitfile: &Bitfile) -> Result<(), EngineError> {
    let mut exported: Vec<Assignment> = Vec::new();
    for entry in &bitfile.entries {
      match entry {
        Entry::Assignment(a) => {
          apply_override(&mut self.vars, &a.name, a.override_, &a.value);
          if a.export {
            exported.push(a.clone());
          }
        }
        Entry::Template(t) => {
          if self.templates.insert(t.name.clone(), t.clone()).is_some() {
            return Err(EngineError::new(t.pos, format!("duplicate template {:?}", t.name)));
          }
        }
        _ => {}
      }
    }
    // Exported values are evaluated once every global is bound, so they may
    // reference variables defined later in the file.
    for a in exported {
      let mut seen = vec![a.name.clone()];
      let value = self.evaluate_string(a.value.pos, &a.value.body, None, &mut seen)?;
      let existing = self
        .env
        .get(&a.name)
        .cloned()
        .or_else(|| std::env::var(&a.name).ok())
        .unwrap_or_default();
      match a.override_ {
        Override::Replace => {
          self.env.insert(a.name, value);
        }
        Override::Append => {
          self.env.insert(a.name, format!("{existing}{value}"));
        }
        Override::Prepend => {
          self.env.insert(a.name, format!("{value}{existing}"));
        }
        Override::Delete => {
          self.env.remove(&a.name);
        }
      }
    }
    Ok(())
  }

  /// Turn every target-like entry into a `Target`, expanding implicit
  /// targets into one concrete target per matched file.
  fn analyse(&mut self, bitfile: &Bitfile) -> Result<(), EngineError> {
    for entry in &bitfile.entries {
      match entry {
        Entry::Target(t) => {
          let mut target = Target::new(t.pos);
          target.outputs = t.outputs.clone();
          target.inputs = t.inputs.clone();
          self.process_directives(&mut target, &t.directives)?;
          self.finish_target(target)?;
        }
        Entry::VirtualTarget(v) => {
          let mut target = Target::new(v.pos);
          target.virtual_ = true;
          target.clean = Vec::new();
          target.outputs = RefList { pos: v.pos, refs: vec![Ref::new(v.pos, v.name.clone())] };
          target.inputs = v.inputs.clone();
          self.process_directives(&mut target, &v.directives)?;
          self.finish_target(target)?;
        }
        Entry::ImplicitTarget(i) => self.expand_implicit(i)?,
        Entry::Assignment(_) | Entry::Template(_) => {}
      }
    }
    Ok(())
  }

  fn finish_target(&mut self, target: Target) -> Result<(), EngineError> {
    if target.build.is_none() {
      return Err(EngineError::new(target.pos, "target has no build command"));
    }
    if target.outputs.is_empty() {
      return Err(EngineError::new(target.pos, "target has no outputs"));
    }
    self.targets.push(target);
    Ok(())
  }

  /// Materialize an implicit target: one concrete target per file matching
  /// the input pattern, with `IN` and the pattern's capture groups bound as
  /// target-local variables.
  fn expand_implicit(&mut self, implicit: &ImplicitTarget) -> Result<(), EngineError> {
    let mut seen = Vec::new();
    let pattern =
      self.evaluate_string(implicit.pattern.pos, &implicit.pattern.text, None, &mut seen)?;
    let pattern = self.normalise(&pattern);
    if pattern.contains(['{', '}', '[', ']']) {
      return Err(EngineError::new(
        implicit.pattern.pos,
        "brace and character-class patterns are not supported in implicit targets",
      ));
    }
    let regex = glob_to_regex(&pattern)
      .map_err(|err| EngineError::new(implicit.pattern.pos, format!("invalid pattern: {err}")))?;
    // The pattern's fixed directory prefix is folded into the first capture
    // group, so `implicit %{1}.o: src/*.c` produces outputs alongside their
    // inputs.
    let meta = pattern.find(|c| "*?{}[]".contains(c)).unwrap_or(pattern.len());
    let dir_prefix = match pattern[..meta].rfind('/') {
      Some(slash) => &pattern[..=slash],
      None => "",
    };

    let files = self.globber.matches(&pattern, &[])?;
    for file in files {
      let Some(caps) = regex.captures(&file) else { continue };
      let mut target = Target::new(implicit.pos);
      target.outputs = RefList { pos: implicit.replace.pos, refs: vec![implicit.replace.clone()] };
      target.inputs =
        RefList { pos: implicit.pattern.pos, refs: vec![Ref::new(implicit.pattern.pos, file.clone())] };
      target
        .vars
        .insert("IN".to_string(), Block { pos: implicit.pattern.pos, body: file.clone() });
      for (i, cap) in caps.iter().enumerate() {
        let mut value = cap.map(|m| m.as_str().to_string()).unwrap_or_default();
        if i == 1 {
          value = format!("{dir_prefix}{value}");
        }
        target
          .vars
          .insert(i.to_string(), Block { pos: implicit.replace.pos, body: value });
      }
      self.process_directives(&mut target, &implicit.directives)?;
      self.finish_target(target)?;
    }
    Ok(())
  }

  /// Apply an entry's directives to a target, splicing in inherited
  /// templates.
  fn process_directives(
    &self,
    target: &mut Target,
    directives: &[Directive],
  ) -> Result<(), EngineError> {
    for directive in directives {
      match directive {
        Directive::Command(cmd) => self.process_command(target, cmd)?,
        Directive::Assignment(a) => {
          if a.export {
            return Err(EngineError::new(a.pos, "cannot export a target-local variable"));
          }
          // Compose against the shadowed value: an earlier target-local,
          // else the global.
          if !target.vars.contains_key(&a.name) {
            if let Some(global) = self.vars.get(&a.name) {
              target.vars.insert(a.name.clone(), global.clone());
            }
          }
          apply_override(&mut target.vars, &a.name, a.override_, &a.value);
        }
        Directive::Chdir(c) => {
          target.chdir = c.dir.clone();
        }
        Directive::Inherit(inherit) => {
          let template = self.templates.get(&inherit.target).ok_or_else(|| {
            EngineError::new(inherit.pos, format!("unknown template {:?}", inherit.target))
          })?;
          for arg in &inherit.arguments {
            if !template.parameters.iter().any(|p| p.name == arg.name) {
              return Err(EngineError::new(
                arg.pos,
                format!("unknown parameter {:?} of template {:?}", arg.name, inherit.target),
              ));
            }
          }
          for param in &template.parameters {
            let value = inherit
              .arguments
              .iter()
              .find(|a| a.name == param.name)
              .map(|a| a.value.clone())
              .or_else(|| param.value.clone())
              .ok_or_else(|| {
                EngineError::new(
                  inherit.pos,
                  format!(
                    "missing argument {:?} to template {:?}",
                    param.name, inherit.target
                  ),
                )
              })?;
            target.vars.insert(param.name.clone(), Block { pos: inherit.pos, body: value });
          }
          target.outputs.refs.extend(template.outputs.refs.iter().cloned());
          target.inputs.refs.extend(template.inputs.refs.iter().cloned());
          self.process_directives(target, &template.directives)?;
        }
      }
    }
    Ok(())
  }

  fn process_command(
    &self,
    target: &mut Target,
    cmd: &bit_parser::Command,
  ) -> Result<(), EngineError> {
    let required_body = || -> Result<Block, EngineError> {
      cmd
        .value
        .clone()
        .ok_or_else(|| EngineError::new(cmd.pos, format!("{} requires a body", cmd.command)))
    };
    // Only `clean` composes with overrides; everything else replaces.
    if cmd.command != "clean" && cmd.override_ != Override::Replace {
      return Err(EngineError::new(
        cmd.pos,
        format!("cannot override {:?}", cmd.command),
      ));
    }
    match cmd.command.as_str() {
      "build" => {
        let block = required_body()?;
        if block.body.trim().is_empty() {
          return Err(EngineError::new(cmd.pos, "build requires a non-empty command"));
        }
        target.build = Some(block);
      }
      "inputs" => {
        let block = required_body()?;
        let list = parse_ref_list(block.pos, &block.body)?;
        target.inputs.refs.extend(list.refs);
      }
      "outputs" => {
        let block = required_body()?;
        let list = parse_ref_list(block.pos, &block.body)?;
        target.outputs.refs.extend(list.refs);
      }
      "hash" => {
        target.hash_cmd = Some(required_body()?);
      }
      "clean" => match cmd.override_ {
        Override::Replace => target.clean = vec![CleanStep::Run(required_body()?)],
        Override::Append => target.clean.push(CleanStep::Run(required_body()?)),
        Override::Prepend => target.clean.insert(0, CleanStep::Run(required_body()?)),
        Override::Delete => {
          if cmd.value.is_some() {
            return Err(EngineError::new(
              cmd.pos,
              format!("-{} cannot have a body", cmd.command),
            ));
          }
          target.clean = Vec::new();
        }
      },
      other => {
        return Err(EngineError::new(cmd.pos, format!("unknown command {other:?}")));
      }
    }
    Ok(())
  }

  /// Evaluation pass A: expand and register outputs, then the chdir.
  fn evaluate_outputs(&mut self) -> Result<(), EngineError> {
    for id in 0..self.targets.len() {
      let chdir = self.targets[id].chdir.clone();
      let dir = self.evaluate_string(chdir.pos, &chdir.text, Some(id), &mut Vec::new())?;
      self.targets[id].chdir.text = dir;

      let refs = self.targets[id].outputs.refs.clone();
      let virtual_ = self.targets[id].virtual_;
      let mut resolved: Vec<Ref> = Vec::new();
      for r in refs {
        let evaluated = self.evaluate_string(r.pos, &r.text, Some(id), &mut Vec::new())?;
        if virtual_ {
          self.register_output(r.pos, evaluated.clone(), id)?;
          resolved.push(Ref::new(r.pos, evaluated));
          continue;
        }
        // Evaluation may expand one ref into several.
        let list = parse_ref_list(r.pos, &evaluated)?;
        for sub in list.refs {
          let norm = self.normalise(&sub.text);
          if is_glob(&norm) {
            return Err(EngineError::new(
              sub.pos,
              format!("glob characters are not allowed in outputs: {:?}", sub.text),
            ));
          }
          if Path::new(&norm).is_absolute() || norm == ".." || norm.starts_with("../") {
            return Err(EngineError::new(
              sub.pos,
              format!("output {:?} is outside the working directory", sub.text),
            ));
          }
          self.register_output(sub.pos, norm.clone(), id)?;
          resolved.push(Ref::new(sub.pos, norm));
        }
      }
      resolved.sort_by(|a, b| a.text.cmp(&b.text));
      self.targets[id].outputs.refs = resolved;
    }
    Ok(())
  }

  fn register_output(&mut self, pos: Position, name: String, id: TargetId) -> Result<(), EngineError> {
    if self.outputs.insert(name.clone(), id).is_some() {
      return Err(EngineError::new(pos, format!("duplicate output {name:?}")));
    }
    Ok(())
  }

  /// Evaluation pass B: expand inputs through the globber and bind the `IN`
  /// and `OUT` target-locals.
  fn evaluate_inputs(&mut self) -> Result<(), EngineError> {
    let output_names: Vec<String> = self.outputs.keys().cloned().collect();
    for id in 0..self.targets.len() {
      let refs = self.targets[id].inputs.refs.clone();
      let mut resolved: Vec<Ref> = Vec::new();
      for r in refs {
        let evaluated = self.evaluate_string(r.pos, &r.text, Some(id), &mut Vec::new())?;
        let list = parse_ref_list(r.pos, &evaluated)?;
        for sub in list.refs {
          let matches = self.globber.matches(&sub.text, &output_names)?;
          if matches.is_empty() {
            // An unmatched pattern passes through literally; it either
            // resolves to a target's output or becomes a synthetic target at
            // build time.
            let norm = self.normalise(&sub.text);
            self.inputs.insert(norm.clone(), id);
            resolved.push(Ref::new(sub.pos, norm));
          } else {
            for m in matches {
              let norm = self.normalise(&m);
              self.inputs.insert(norm.clone(), id);
              resolved.push(Ref::new(sub.pos, norm));
            }
          }
        }
      }
      let in_join = resolved.iter().map(|r| r.text.as_str()).collect::<Vec<_>>().join(" ");
      let out_join = self.targets[id]
        .outputs
        .refs
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
      let target = &mut self.targets[id];
      target.inputs.refs = resolved;
      let pos = target.pos;
      target.vars.insert("IN".to_string(), Block { pos, body: in_join });
      target.vars.insert("OUT".to_string(), Block { pos, body: out_join });
    }
    Ok(())
  }

  /// Reconstruct both fingerprints for every target: the stored hash from
  /// the database and the real hash from the filesystem.
  fn seed_hashes(&mut self) -> Result<(), EngineError> {
    for id in 0..self.targets.len() {
      let stored = self.deep_hash(id, HashKind::Db, &mut HashSet::new())?;
      let real = self.deep_hash(id, HashKind::Real { allow_missing: true }, &mut HashSet::new())?;
      let target = &mut self.targets[id];
      target.stored_hash = stored;
      target.real_hash = real;
    }
    Ok(())
  }

  // -----------------------------------------------------------------------
  // Fingerprinting
  // -----------------------------------------------------------------------

  /// Deep combine: recurse into input targets (each visited once via
  /// `seen`), treating plain files as single-output leaf targets, then fold
  /// in this target's own outputs.
  fn deep_hash(
    &self,
    id: TargetId,
    kind: HashKind,
    seen: &mut HashSet<String>,
  ) -> Result<u64, EngineError> {
    let mut h = Hasher::new();
    let input_refs = self.targets[id].inputs.refs.clone();
    for input in &input_refs {
      if !seen.insert(input.text.clone()) {
        continue;
      }
      match self.outputs.get(&input.text) {
        Some(&dep) if dep != id => h.int(self.deep_hash(dep, kind, seen)?),
        _ => h.int(self.leaf_hash(kind, id, input)?),
      }
    }
    for output in &self.targets[id].outputs.refs {
      h.update(Hasher::from(self.ref_hash(kind, id, output)?));
    }
    Ok(h.value())
  }

  /// Flat combine: fold each input target's current stored hash, then this
  /// target's own outputs. Used to update `real_hash` after a build.
  fn flat_hash(&self, id: TargetId, kind: HashKind) -> Result<u64, EngineError> {
    let mut h = Hasher::new();
    for input in &self.targets[id].inputs.refs {
      match self.outputs.get(&input.text) {
        Some(&dep) if dep != id => h.int(self.targets[dep].stored_hash),
        _ => h.int(self.leaf_hash(kind, id, input)?),
      }
    }
    for output in &self.targets[id].outputs.refs {
      h.update(Hasher::from(self.ref_hash(kind, id, output)?));
    }
    Ok(h.value())
  }

  /// The fingerprint a plain-file input would have as a synthetic target,
  /// keeping seeded hashes consistent with post-build ones.
  fn leaf_hash(&self, kind: HashKind, id: TargetId, r: &Ref) -> Result<u64, EngineError> {
    let mut h = Hasher::new();
    h.update(Hasher::from(self.ref_hash(kind, id, r)?));
    Ok(h.value())
  }

  /// Fingerprint a single output ref.
  fn ref_hash(&self, kind: HashKind, id: TargetId, r: &Ref) -> Result<u64, EngineError> {
    match kind {
      HashKind::Db => Ok(self.db.get(&r.text).unwrap_or(0)),
      HashKind::Real { allow_missing } => {
        let mut h = Hasher::new();
        h.str(&r.text);
        let target = &self.targets[id];
        if let Some(cmd) = &target.hash_cmd {
          let digest = target.hash_memo.get(|| {
            let command = self.evaluate_string(cmd.pos, &cmd.body, Some(id), &mut Vec::new())?;
            let out = self.log.capture(&self.cwd, &command, &self.env).map_err(|err| {
              EngineError::new(cmd.pos, format!("hash command failed: {err}"))
            })?;
            let mut hh = Hasher::new();
            hh.bytes(out.as_bytes());
            Ok::<u64, EngineError>(hh.value())
          })?;
          h.int(digest);
          return Ok(h.value());
        }
        if target.virtual_ {
          return Ok(h.value());
        }
        match fs::metadata(self.cwd.join(&r.text)) {
          Ok(meta) => {
            h.int(file_mode(&meta));
            if !meta.is_dir() {
              h.int(meta.len());
              h.int(mtime_nanos(&meta));
            }
            Ok(h.value())
          }
          Err(err) if err.kind() == io::ErrorKind::NotFound && allow_missing => Ok(0),
          Err(err) if err.kind() == io::ErrorKind::NotFound => Err(EngineError::new(
            r.pos,
            format!("target did not generate output {:?}", r.text),
          )),
          Err(source) => {
            Err(EngineError::context(format!("failed to stat {:?}", r.text), source))
          }
        }
      }
    }
  }

  // -----------------------------------------------------------------------
  // Build / clean / close
  // -----------------------------------------------------------------------

  /// Build the requested targets (or everything if none are requested),
  /// dependencies first.
  pub fn build(&mut self, requests: &[String]) -> Result<(), EngineError> {
    let mut names = self.expand_requests(requests)?;
    if names.is_empty() {
      names = self.outputs();
    }
    let mut seen = HashSet::new();
    for name in names {
      self.build_target(&mut seen, &name)?;
    }
    Ok(())
  }

  fn expand_requests(&self, requests: &[String]) -> Result<Vec<String>, EngineError> {
    let extra: Vec<String> = self.outputs.keys().cloned().collect();
    let mut out = Vec::new();
    for request in requests {
      let matches = self.globber.matches(request, &extra)?;
      if matches.is_empty() {
        return Err(EngineError::Other(format!("no files match {request:?}")));
      }
      out.extend(matches);
    }
    Ok(out)
  }

  fn build_target(&mut self, seen: &mut HashSet<String>, name: &str) -> Result<(), EngineError> {
    let norm = self.normalise(name);
    if !seen.insert(norm.clone()) {
      return Ok(());
    }
    let id = match self.outputs.get(&norm) {
      Some(&id) => id,
      None => self.synthetic_target(&norm)?,
    };

    {
      let target = &self.targets[id];
      if target.stored_hash == target.real_hash {
        if !target.synthetic {
          self.log.scope(&norm).notice("Up to date.");
        }
        return Ok(());
      }
    }

    let inputs: Vec<Ref> = self.targets[id].inputs.refs.clone();
    for input in &inputs {
      self.build_target(seen, &input.text).map_err(|err| match err.position() {
        Some(_) => err,
        None => EngineError::new(input.pos, format!("{err}")),
      })?;
    }

    if let Some(build) = self.targets[id].build.clone() {
      let command = self.evaluate_string(build.pos, &build.body, Some(id), &mut Vec::new())?;
      let dir = self.cwd.join(&self.targets[id].chdir.text);
      self
        .log
        .scope(&norm)
        .exec(&dir, &command, &self.env)
        .map_err(|err| EngineError::new(build.pos, format!("command failed: {err}")))?;
    }

    let real = self.flat_hash(id, HashKind::Real { allow_missing: false })?;
    let target = &mut self.targets[id];
    target.real_hash = real;
    target.stored_hash = real;
    Ok(())
  }

  /// Insert a synthetic target for a bare source file. The file must exist.
  fn synthetic_target(&mut self, norm: &str) -> Result<TargetId, EngineError> {
    fs::metadata(self.cwd.join(norm))
      .map_err(|source| EngineError::context(format!("no such file or target {norm:?}"), source))?;
    let pos = Position::default();
    let mut target = Target::new(pos);
    target.synthetic = true;
    target.outputs = RefList { pos, refs: vec![Ref::new(pos, norm)] };
    self.targets.push(target);
    let id = self.targets.len() - 1;
    self.outputs.insert(norm.to_string(), id);
    let stored = self.deep_hash(id, HashKind::Db, &mut HashSet::new())?;
    let real = self.deep_hash(id, HashKind::Real { allow_missing: true }, &mut HashSet::new())?;
    let target = &mut self.targets[id];
    target.stored_hash = stored;
    target.real_hash = real;
    Ok(id)
  }

  /// Clean the requested targets, or all of them. A target is a unit: if any
  /// of its outputs is requested, all of them are cleaned.
  pub fn clean(&mut self, requests: &[String]) -> Result<(), EngineError> {
    let requested: HashSet<String> =
      self.expand_requests(requests)?.into_iter().map(|n| self.normalise(&n)).collect();
    for id in 0..self.targets.len() {
      {
        let target = &self.targets[id];
        if target.synthetic {
          continue;
        }
        if !requested.is_empty() && !target.outputs.refs.iter().any(|r| requested.contains(&r.text))
        {
          continue;
        }
      }
      let steps = self.targets[id].clean.clone();
      let virtual_ = self.targets[id].virtual_;
      let outputs: Vec<String> =
        self.targets[id].outputs.refs.iter().map(|r| r.text.clone()).collect();
      let scope = outputs.first().cloned().unwrap_or_default();
      for step in steps {
        match step {
          CleanStep::RemoveOutputs => {
            if virtual_ {
              continue;
            }
            for output in &outputs {
              self.remove_recursively(output)?;
            }
          }
          CleanStep::Run(block) => {
            let command = self.evaluate_string(block.pos, &block.body, Some(id), &mut Vec::new())?;
            let dir = self.cwd.join(&self.targets[id].chdir.text);
            self
              .log
              .scope(&scope)
              .exec(&dir, &command, &self.env)
              .map_err(|err| EngineError::new(block.pos, format!("clean failed: {err}")))?;
          }
        }
      }
    }
    Ok(())
  }

  fn remove_recursively(&self, output: &str) -> Result<(), EngineError> {
    let path = self.cwd.join(output);
    let meta = match fs::symlink_metadata(&path) {
      Ok(meta) => meta,
      Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(()),
      Err(source) => return Err(EngineError::context(format!("failed to stat {output:?}"), source)),
    };
    let result = if meta.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
    match result {
      Ok(()) => {
        self.log.scope(output).notice("Removed.");
        Ok(())
      }
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(EngineError::context(format!("failed to remove {output:?}"), source)),
    }
  }

  /// Persist the fingerprint of every known output and write the database.
  pub fn close(&mut self) -> Result<(), EngineError> {
    for id in 0..self.targets.len() {
      let refs = self.targets[id].outputs.refs.clone();
      for r in refs {
        self.db.delete(&r.text);
        let hash = self.ref_hash(HashKind::Real { allow_missing: true }, id, &r)?;
        if hash != 0 {
          self.db.set(&r.text, hash);
        }
      }
    }
    self.db.close()?;
    Ok(())
  }

  // -----------------------------------------------------------------------
  // Introspection
  // -----------------------------------------------------------------------

  /// Sorted non-synthetic output paths.
  pub fn outputs(&self) -> Vec<String> {
    self
      .outputs
      .iter()
      .filter(|&(_, &id)| !self.targets[id].synthetic)
      .map(|(name, _)| name.clone())
      .collect()
  }

  /// Dependency edges: every non-synthetic output and the inputs it is built
  /// from.
  pub fn deps(&self) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    for target in &self.targets {
      if target.synthetic {
        continue;
      }
      for output in &target.outputs.refs {
        out.insert(output.text.clone(), target.inputs.strings());
      }
    }
    out
  }

  /// Every path the engine knows about: the scanned tree plus declared
  /// outputs.
  pub fn files(&self) -> Vec<String> {
    let extra: Vec<String> = self.outputs.keys().cloned().collect();
    self.globber.files(&extra)
  }

  /// The ignore patterns loaded for this run.
  pub fn ignored(&self) -> &[String] {
    self.globber.ignored()
  }

  // -----------------------------------------------------------------------
  // Text evaluation
  // -----------------------------------------------------------------------

  /// Expand `text` fully: variable splices resolve against target-local then
  /// global variables, command splices run via the shell and substitute
  /// their trimmed stdout. `seen` is the stack of variable names currently
  /// being expanded, for cycle detection.
  fn evaluate_string(
    &self,
    pos: Position,
    text: &str,
    target: Option<TargetId>,
    seen: &mut Vec<String>,
  ) -> Result<String, EngineError> {
    let mut out = String::new();
    for fragment in text::parse(text) {
      match fragment {
        Fragment::Text(t) => out.push_str(&t.text),
        Fragment::Var(v) => {
          let at = pos.translate(v.pos);
          if seen.contains(&v.name) {
            return Err(EngineError::new(
              at,
              format!("circular variable reference {:?}", v.name),
            ));
          }
          let block = self
            .lookup(target, &v.name)
            .ok_or_else(|| EngineError::new(at, format!("unknown variable {:?}", v.name)))?
            .clone();
          seen.push(v.name.clone());
          let value = self.evaluate_string(block.pos, &block.body, target, seen)?;
          seen.pop();
          out.push_str(&value);
        }
        Fragment::Cmd(c) => {
          let at = pos.translate(c.pos);
          let command = self.evaluate_string(at, &c.cmd, target, seen)?;
          let stdout = self
            .log
            .capture(&self.cwd, &command, &self.env)
            .map_err(|err| EngineError::new(at, format!("command {command:?} failed: {err}")))?;
          out.push_str(&stdout);
        }
      }
    }
    Ok(out)
  }

  fn lookup(&self, target: Option<TargetId>, name: &str) -> Option<&Block> {
    if let Some(id) = target {
      if let Some(block) = self.targets[id].vars.get(name) {
        return Some(block);
      }
    }
    self.vars.get(name)
  }

  /// Normalise a path: resolved against the working directory, lexically
  /// cleaned, and stripped of the working directory prefix. Paths outside
  /// the working directory stay absolute.
  fn normalise(&self, path: &str) -> String {
    let p = Path::new(path);
    let abs = if p.is_absolute() { p.to_path_buf() } else { self.cwd.join(p) };
    let cleaned = clean_path(&abs);
    match cleaned.strip_prefix(&self.cwd) {
      Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
      Ok(rel) => rel.to_string_lossy().into_owned(),
      Err(_) => cleaned.to_string_lossy().into_owned(),
    }
  }
}

fn apply_override(vars: &mut BTreeMap<String, Block>, name: &str, override_: Override, value: &Block) {
  match override_ {
    Override::Replace => {
      vars.insert(name.to_string(), value.clone());
    }
    Override::Append => {
      let body = match vars.get(name) {
        Some(existing) => format!("{}{}", existing.body, value.body),
        None => value.body.clone(),
      };
      vars.insert(name.to_string(), Block { pos: value.pos, body });
    }
    Override::Prepend => {
      let body = match vars.get(name) {
        Some(existing) => format!("{}{}", value.body, existing.body),
        None => value.body.clone(),
      };
      vars.insert(name.to_string(), Block { pos: value.pos, body });
    }
    Override::Delete => {
      vars.remove(name);
    }
  }
}

/// Lexically clean a path: resolve `.` and `..` components without touching
/// the filesystem.
fn clean_path(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        if !out.pop() {
          out.push("..");
        }
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

/// Convert a doublestar glob into an anchored regex with one capture group
/// per wildcard.
fn glob_to_regex(pattern: &str) -> Result<Regex, regex::Error> {
  let mut re = String::from("^");
  let mut rest = pattern;
  while !rest.is_empty() {
    if let Some(r) = rest.strip_prefix("**/") {
      re.push_str("(.*?/?)?");
      rest = r;
    } else if let Some(r) = rest.strip_prefix('*') {
      re.push_str("([^/]*)");
      rest = r;
    } else if let Some(r) = rest.strip_prefix('?') {
      re.push('.');
      rest = r;
    } else if rest.starts_with('{') {
      match rest.find('}') {
        Some(end) => {
          let alternatives: Vec<String> =
            rest[1..end].split(',').map(regex::escape).collect();
          re.push('(');
          re.push_str(&alternatives.join("|"));
          re.push(')');
          rest = &rest[end + 1..];
        }
        None => {
          re.push_str(&regex::escape("{"));
          rest = &rest[1..];
        }
      }
    } else {
      let ch = rest.chars().next().unwrap();
      re.push_str(&regex::escape(&ch.to_string()));
      rest = &rest[ch.len_utf8()..];
    }
  }
  re.push('$');
  Regex::new(&re)
}

#[cfg(unix)]
fn file_mode(meta: &fs::Metadata) -> u64 {
  use std::os::unix::fs::PermissionsExt;
  meta.permissions().mode() as u64
}

#[cfg(not(unix))]
fn file_mode(meta: &fs::Metadata) -> u64 {
  if meta.permissions().readonly() { 0o444 } else { 0o644 }
}

fn mtime_nanos(meta: &fs::Metadata) -> u64 {
  meta
    .modified()
    .ok()
    .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
    .map(|d| d.as_nanos() as u64)
    .unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::logging::LogLevel;
  use std::time::{Duration, SystemTime};

  fn tree(entries: &[(&str, &str)]) -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in entries {
      let full = dir.path().join(path);
      fs::create_dir_all(full.parent().unwrap()).unwrap();
      fs::write(full, content).unwrap();
    }
    dir
  }

  fn compile(dir: &Path, src: &str) -> Result<Engine, EngineError> {
    let db = HashDb::open(dir.join(".bit.json")).unwrap();
    let bitfile = bit_parser::parse(src).expect("fixture Bitfile must parse");
    Engine::compile_with_db(Logger::new(LogLevel::Error), dir, db, bitfile)
  }

  fn must_compile(dir: &Path, src: &str) -> Engine {
    compile(dir, src).expect("compile failed")
  }

  // ==========================================================================
  // Compile: variables, outputs, schema
  // ==========================================================================

  #[test]
  fn variable_expansion_in_outputs() {
    let dir = tree(&[("hello.c", "int main() {}")]);
    let engine = must_compile(
      dir.path(),
      "dest = build\n%{dest}/hello: hello.c\n  build: cp %{IN} %{OUT}\n",
    );
    assert_eq!(engine.outputs(), vec!["build/hello"]);
  }

  #[test]
  fn circular_variable_is_fatal() {
    let dir = tree(&[("in", "")]);
    let err = compile(dir.path(), "a = %{b}\nb = %{a}\nout-%{a}: in\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("circular variable reference \"a\""), "{err}");
  }

  #[test]
  fn unknown_variable_is_fatal() {
    let dir = tree(&[("in", "")]);
    let err = compile(dir.path(), "out-%{nope}: in\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("unknown variable \"nope\""), "{err}");
  }

  #[test]
  fn duplicate_output_is_fatal() {
    let dir = tree(&[("a.js", ""), ("b.js", "")]);
    let err = compile(
      dir.path(),
      "dist/x.js: a.js\n  build: true\ndist/x.js: b.js\n  build: true\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("duplicate output \"dist/x.js\""), "{err}");
    assert_eq!(err.position().unwrap().line, 3);
  }

  #[test]
  fn glob_in_output_is_fatal() {
    let dir = tree(&[("a.js", "")]);
    let err = compile(dir.path(), "dist/*.js: a.js\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("glob characters"), "{err}");
  }

  #[test]
  fn output_outside_working_directory_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "../evil: a.c\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("outside the working directory"), "{err}");
  }

  #[test]
  fn target_without_build_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "out: a.c\n  inputs: a.c\n").unwrap_err();
    assert!(err.to_string().contains("no build command"), "{err}");
  }

  #[test]
  fn unknown_command_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "out: a.c\n  frobnicate: x\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("unknown command \"frobnicate\""), "{err}");
  }

  #[test]
  fn exported_local_is_rejected() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "out: a.c\n  export foo = 1\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("cannot export"), "{err}");
  }

  #[test]
  fn outputs_directive_supplies_outputs() {
    let dir = tree(&[("a.c", "")]);
    let engine = must_compile(dir.path(), ": a.c\n  outputs: gen.txt\n  build: touch gen.txt\n");
    assert_eq!(engine.outputs(), vec!["gen.txt"]);
  }

  #[test]
  fn evaluation_is_idempotent_without_splices() {
    let dir = tree(&[("a.c", "")]);
    let engine = must_compile(dir.path(), "out: a.c\n  build: true\n");
    let text = "cc -o out in.c  # 100% plain";
    let got = engine
      .evaluate_string(Position::start(), text, None, &mut Vec::new())
      .unwrap();
    assert_eq!(got, text);
  }

  // ==========================================================================
  // Command splices
  // ==========================================================================

  #[test]
  fn command_splice_substitutes_stdout() {
    let dir = tree(&[("a.c", "")]);
    let engine = must_compile(
      dir.path(),
      "ver = %(printf 1.2)%\nout-%{ver}: a.c\n  build: touch %{OUT}\n",
    );
    assert_eq!(engine.outputs(), vec!["out-1.2"]);
  }

  #[test]
  fn failing_command_splice_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "bad = %(exit 1)%\nout-%{bad}: a.c\n  build: true\n").unwrap_err();
    assert!(err.position().is_some());
    assert!(err.to_string().contains("failed"), "{err}");
  }

  // ==========================================================================
  // Implicit targets
  // ==========================================================================

  #[test]
  fn implicit_target_expands_per_matching_file() {
    let dir = tree(&[("src/a.c", "a"), ("src/b.c", "b")]);
    let engine = must_compile(
      dir.path(),
      "implicit %{1}.o: src/*.c\n  build: cp %{IN} %{OUT}\n",
    );
    assert_eq!(engine.outputs(), vec!["src/a.o", "src/b.o"]);

    let id = engine.outputs["src/a.o"];
    let target = &engine.targets[id];
    assert_eq!(target.vars["0"].body, "src/a.c");
    assert_eq!(target.vars["1"].body, "src/a");
    assert_eq!(target.vars["IN"].body, "src/a.c");
    assert_eq!(target.vars["OUT"].body, "src/a.o");
    assert_eq!(target.inputs.strings(), vec!["src/a.c"]);
  }

  #[test]
  fn implicit_rejects_brace_patterns() {
    let dir = tree(&[("src/a.c", "")]);
    let err = compile(dir.path(), "implicit %{1}.o: src/*.{c,h}\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("not supported"), "{err}");
  }

  #[test]
  fn implicit_doublestar_captures_directories() {
    let dir = tree(&[("lib/x.c", ""), ("lib/deep/y.c", "")]);
    let engine = must_compile(
      dir.path(),
      "implicit %{1}%{2}.o: **/*.c\n  build: cp %{IN} %{OUT}\n",
    );
    assert_eq!(engine.outputs(), vec!["lib/deep/y.o", "lib/x.o"]);
  }

  // ==========================================================================
  // Build
  // ==========================================================================

  #[test]
  fn build_produces_output_and_persists_hash() {
    let dir = tree(&[("hello.c", "int main() {}")]);
    let src = "dest = build\n%{dest}/hello: hello.c\n  build: mkdir -p %{dest} && cp %{IN} %{OUT}\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&["build/hello".to_string()]).unwrap();
    assert!(dir.path().join("build/hello").exists());
    engine.close().unwrap();

    let db = HashDb::open(dir.path().join(".bit.json")).unwrap();
    assert!(db.get("build/hello").is_some_and(|h| h != 0));

    // Unchanged state: the target is up to date on recompile.
    let engine = must_compile(dir.path(), src);
    let id = engine.outputs["build/hello"];
    assert_eq!(engine.targets[id].stored_hash, engine.targets[id].real_hash);

    // A source edit makes it stale again.
    fs::write(dir.path().join("hello.c"), "int main() { return 1; }").unwrap();
    let engine = must_compile(dir.path(), src);
    let id = engine.outputs["build/hello"];
    assert_ne!(engine.targets[id].stored_hash, engine.targets[id].real_hash);
  }

  #[test]
  fn second_build_runs_no_shell_command() {
    let dir = tree(&[("in.txt", "v1")]);
    let src = "out.txt: in.txt\n  build: echo run >> trace.log && cp in.txt out.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&[]).unwrap();
    engine.build(&[]).unwrap();
    let trace = fs::read_to_string(dir.path().join("trace.log")).unwrap();
    assert_eq!(trace.lines().count(), 1);
  }

  #[test]
  fn inputs_build_before_their_consumers() {
    let dir = tree(&[("base.txt", "base")]);
    let src = "mid.txt: base.txt\n  build: cp base.txt mid.txt\n\
               top.txt: mid.txt\n  build: cp mid.txt top.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&["top.txt".to_string()]).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("top.txt")).unwrap(), "base");
  }

  #[test]
  fn missing_input_file_is_fatal() {
    let dir = tree(&[("present.c", "")]);
    let mut engine = must_compile(dir.path(), "out: missing.c\n  build: touch out\n");
    let err = engine.build(&["out".to_string()]).unwrap_err();
    assert!(err.to_string().contains("no such file or target"), "{err}");
  }

  #[test]
  fn missing_output_after_build_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let mut engine = must_compile(dir.path(), "never.txt: a.c\n  build: true\n");
    let err = engine.build(&["never.txt".to_string()]).unwrap_err();
    assert!(err.to_string().contains("did not generate output"), "{err}");
  }

  #[test]
  fn failing_build_command_is_positioned() {
    let dir = tree(&[("a.c", "")]);
    let mut engine = must_compile(dir.path(), "out.txt: a.c\n  build: exit 7\n");
    let err = engine.build(&["out.txt".to_string()]).unwrap_err();
    assert!(err.position().is_some());
    assert!(err.to_string().contains("command failed"), "{err}");
  }

  #[test]
  fn unknown_request_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let mut engine = must_compile(dir.path(), "out: a.c\n  build: touch out\n");
    let err = engine.build(&["nothing/*.zig".to_string()]).unwrap_err();
    assert!(err.to_string().contains("no files match"), "{err}");
  }

  #[test]
  fn glob_requests_expand_against_declared_outputs() {
    let dir = tree(&[("a.c", "")]);
    let mut engine =
      must_compile(dir.path(), "dist/a.js: a.c\n  build: mkdir -p dist && touch %{OUT}\n");
    engine.build(&["dist/*.js".to_string()]).unwrap();
    assert!(dir.path().join("dist/a.js").exists());
  }

  #[test]
  fn virtual_target_builds_its_inputs() {
    let dir = tree(&[("in.txt", "x")]);
    let src = "virtual all: out.txt\n  build: true\n\
               out.txt: in.txt\n  build: cp in.txt out.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&["all".to_string()]).unwrap();
    assert!(dir.path().join("out.txt").exists());
  }

  #[test]
  fn chdir_runs_the_command_in_the_directory() {
    let dir = tree(&[("sub/in.txt", "data")]);
    let src = "sub/out.txt: sub/in.txt\n  cd sub\n  build: cp in.txt out.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&["sub/out.txt".to_string()]).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("sub/out.txt")).unwrap(), "data");
  }

  #[test]
  fn exported_variables_reach_the_shell_but_not_the_process() {
    let dir = tree(&[("a.c", "")]);
    let src = "export BIT_EXPORT_PROBE = marker\nout.txt: a.c\n  build: printf \"$BIT_EXPORT_PROBE\" > %{OUT}\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&["out.txt".to_string()]).unwrap();
    assert_eq!(fs::read_to_string(dir.path().join("out.txt")).unwrap(), "marker");
    assert!(std::env::var("BIT_EXPORT_PROBE").is_err());
  }

  #[test]
  fn template_inheritance_binds_parameters() {
    let dir = tree(&[("in.txt", "content")]);
    let src = "template copy(suffix = \".bak\") : \n  build: cp %{IN} %{OUT}\n\
               in.txt%{suffix}: in.txt\n  < copy()\n";
    let mut engine = must_compile(dir.path(), src);
    assert_eq!(engine.outputs(), vec!["in.txt.bak"]);
    engine.build(&[]).unwrap();
    assert!(dir.path().join("in.txt.bak").exists());
  }

  #[test]
  fn unknown_template_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "out: a.c\n  < nothing()\n  build: true\n").unwrap_err();
    assert!(err.to_string().contains("unknown template"), "{err}");
  }

  // ==========================================================================
  // Fingerprinting
  // ==========================================================================

  #[test]
  fn mtime_change_alters_real_hash() {
    let dir = tree(&[("out.txt", "fixed"), ("a.c", "")]);
    let engine = must_compile(dir.path(), "out.txt: a.c\n  build: touch out.txt\n");
    let id = engine.outputs["out.txt"];
    let r = Ref::new(Position::default(), "out.txt");
    let before = engine.ref_hash(HashKind::Real { allow_missing: false }, id, &r).unwrap();

    let file = fs::File::options().append(true).open(dir.path().join("out.txt")).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30)).unwrap();
    let after = engine.ref_hash(HashKind::Real { allow_missing: false }, id, &r).unwrap();
    assert_ne!(before, after);
  }

  #[test]
  fn hash_directive_overrides_file_metadata() {
    let dir = tree(&[("in.txt", "src")]);
    let src = "gen.txt: in.txt\n  hash: printf static-digest\n  build: cp in.txt gen.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&[]).unwrap();
    engine.close().unwrap();

    // Touching the output would normally make the target stale; the hash
    // command pins its fingerprint instead.
    let file = fs::File::options().append(true).open(dir.path().join("gen.txt")).unwrap();
    file.set_modified(SystemTime::now() + Duration::from_secs(30)).unwrap();
    let engine = must_compile(dir.path(), src);
    let id = engine.outputs["gen.txt"];
    assert_eq!(engine.targets[id].stored_hash, engine.targets[id].real_hash);
  }

  // ==========================================================================
  // Clean
  // ==========================================================================

  #[test]
  fn clean_removes_the_whole_target() {
    let dir = tree(&[("a.c", "")]);
    let src = "build/x build/y: a.c\n  build: mkdir -p build && touch build/x build/y\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&[]).unwrap();
    assert!(dir.path().join("build/x").exists());

    // Cleaning one output cleans the target as a unit.
    engine.clean(&["build/x".to_string()]).unwrap();
    assert!(!dir.path().join("build/x").exists());
    assert!(!dir.path().join("build/y").exists());

    // Already-absent outputs are not an error.
    engine.clean(&["build/x".to_string()]).unwrap();
  }

  #[test]
  fn custom_clean_replaces_the_default() {
    let dir = tree(&[("a.c", "")]);
    let src = "out.txt: a.c\n  build: touch out.txt && touch side.txt\n  clean: rm -f side.txt\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&[]).unwrap();
    engine.clean(&[]).unwrap();
    assert!(!dir.path().join("side.txt").exists());
    // The replaced clean no longer removes the output itself.
    assert!(dir.path().join("out.txt").exists());
  }

  #[test]
  fn deleted_clean_is_a_no_op() {
    let dir = tree(&[("a.c", "")]);
    let src = "out.txt: a.c\n  build: touch out.txt\n  -clean\n";
    let mut engine = must_compile(dir.path(), src);
    engine.build(&[]).unwrap();
    engine.clean(&[]).unwrap();
    assert!(dir.path().join("out.txt").exists());
  }

  #[test]
  fn delete_clean_with_body_is_fatal() {
    let dir = tree(&[("a.c", "")]);
    let err = compile(dir.path(), "out: a.c\n  build: true\n  -clean: rm -rf /\n").unwrap_err();
    assert!(err.to_string().contains("cannot have a body"), "{err}");
  }

  // ==========================================================================
  // Introspection
  // ==========================================================================

  #[test]
  fn deps_map_lists_inputs_per_output() {
    let dir = tree(&[("a.c", ""), ("b.c", "")]);
    let engine = must_compile(dir.path(), "out: a.c b.c\n  build: touch out\n");
    let deps = engine.deps();
    assert_eq!(deps["out"], vec!["a.c", "b.c"]);
  }

  #[test]
  fn files_include_declared_outputs() {
    let dir = tree(&[("a.c", "")]);
    let engine = must_compile(dir.path(), "gen/out.bin: a.c\n  build: true\n");
    let files = engine.files();
    assert!(files.contains(&"a.c".to_string()));
    assert!(files.contains(&"gen/out.bin".to_string()));
  }
}
