//! End-to-end engine scenarios through the public API.
//!
//! Each scenario compiles a Bitfile against an isolated working tree and
//! drives real builds through `sh`, checking the on-disk results and the
//! persisted hash database rather than engine internals.

use std::fs;
use std::path::Path;

use bit_engine::{Engine, HashDb, LogLevel, Logger};

// =============================================================================
// Fixtures
// =============================================================================

struct Project {
  dir: tempfile::TempDir,
  bitfile: String,
}

impl Project {
  fn new(bitfile: &str, files: &[(&str, &str)]) -> Self {
    let dir = tempfile::tempdir().unwrap();
    for (path, content) in files {
      let full = dir.path().join(path);
      fs::create_dir_all(full.parent().unwrap()).unwrap();
      fs::write(full, content).unwrap();
    }
    Self { dir, bitfile: bitfile.to_string() }
  }

  fn engine(&self) -> Engine {
    let db = HashDb::open(self.dir.path().join(".bit.json")).unwrap();
    let bitfile = bit_parser::parse(&self.bitfile).expect("scenario Bitfile must parse");
    Engine::compile_with_db(Logger::new(LogLevel::Error), self.dir.path(), db, bitfile)
      .expect("scenario Bitfile must compile")
  }

  fn path(&self, rel: &str) -> std::path::PathBuf {
    self.dir.path().join(rel)
  }

  fn read(&self, rel: &str) -> String {
    fs::read_to_string(self.path(rel)).unwrap_or_else(|_| panic!("missing {rel}"))
  }

  fn write(&self, rel: &str, content: &str) {
    fs::write(self.path(rel), content).unwrap();
  }
}

fn exists(p: &Path) -> bool {
  p.exists()
}

// =============================================================================
// Dependency-ordered pipelines
// =============================================================================

#[test]
fn two_stage_pipeline_builds_in_order() {
  let project = Project::new(
    "gen.txt: seed.txt\n  build: tr a-z A-Z < seed.txt > gen.txt\n\
     final.txt: gen.txt\n  build: cat gen.txt gen.txt > final.txt\n",
    &[("seed.txt", "abc")],
  );
  let mut engine = project.engine();
  engine.build(&["final.txt".to_string()]).unwrap();
  assert_eq!(project.read("final.txt"), "ABCABC");
}

#[test]
fn diamond_dependencies_build_each_target_once() {
  // base feeds left and right; top consumes both. Every build appends a
  // marker, so the trace counts shell invocations.
  let project = Project::new(
    "base.txt: seed.txt\n  build: echo base >> trace && cp seed.txt base.txt\n\
     left.txt: base.txt\n  build: echo left >> trace && cp base.txt left.txt\n\
     right.txt: base.txt\n  build: echo right >> trace && cp base.txt right.txt\n\
     top.txt: left.txt right.txt\n  build: echo top >> trace && cat left.txt right.txt > top.txt\n",
    &[("seed.txt", "s")],
  );
  let mut engine = project.engine();
  engine.build(&["top.txt".to_string()]).unwrap();
  let trace = project.read("trace");
  assert_eq!(trace.matches("base").count(), 1, "{trace}");
  assert_eq!(trace.matches("top").count(), 1, "{trace}");
  assert_eq!(project.read("top.txt"), "ss");
}

#[test]
fn rebuild_is_limited_to_the_dirty_subgraph() {
  let project = Project::new(
    "a.out: a.in\n  build: echo a >> trace && cp a.in a.out\n\
     b.out: b.in\n  build: echo b >> trace && cp b.in b.out\n",
    &[("a.in", "1"), ("b.in", "1")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.close().unwrap();

  project.write("b.in", "changed");
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.close().unwrap();

  let trace = project.read("trace");
  assert_eq!(trace.matches('a').count(), 1, "{trace}");
  assert_eq!(trace.matches('b').count(), 2, "{trace}");
}

#[test]
fn deleting_an_output_triggers_a_rebuild() {
  let project = Project::new(
    "out.txt: in.txt\n  build: cp in.txt out.txt\n",
    &[("in.txt", "content")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.close().unwrap();

  fs::remove_file(project.path("out.txt")).unwrap();
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  assert_eq!(project.read("out.txt"), "content");
}

// =============================================================================
// Implicit rules end to end
// =============================================================================

#[test]
fn implicit_rule_builds_every_match() {
  let project = Project::new(
    "implicit %{1}.up: src/*.txt\n  build: tr a-z A-Z < %{IN} > %{OUT}\n\
     virtual all: src/one.up src/two.up\n  build: true\n",
    &[("src/one.txt", "one"), ("src/two.txt", "two")],
  );
  let mut engine = project.engine();
  engine.build(&["all".to_string()]).unwrap();
  assert_eq!(project.read("src/one.up"), "ONE");
  assert_eq!(project.read("src/two.up"), "TWO");
}

#[test]
fn implicit_rule_rebuilds_only_changed_sources() {
  let project = Project::new(
    "implicit %{1}.out: src/*.src\n  build: echo %{IN} >> trace && cp %{IN} %{OUT}\n",
    &[("src/a.src", "a"), ("src/b.src", "b")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.close().unwrap();

  project.write("src/a.src", "a-changed");
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  let trace = project.read("trace");
  assert_eq!(trace.matches("src/a.src").count(), 2, "{trace}");
  assert_eq!(trace.matches("src/b.src").count(), 1, "{trace}");
}

// =============================================================================
// Clean composition
// =============================================================================

#[test]
fn clean_chain_runs_prepend_default_append_in_order() {
  let project = Project::new(
    "out.txt: in.txt\n  build: touch out.txt\n\
    \x20\x20^clean: echo first >> clean-trace\n\
    \x20\x20+clean: echo last >> clean-trace\n",
    &[("in.txt", "")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  assert!(exists(&project.path("out.txt")));

  engine.clean(&[]).unwrap();
  // Prepended command, then the default removal, then the appended command.
  assert!(!exists(&project.path("out.txt")));
  assert_eq!(project.read("clean-trace"), "first\nlast\n");
}

#[test]
fn clean_of_one_glob_leaves_other_targets_alone() {
  let project = Project::new(
    "dist/a.js: a.in\n  build: mkdir -p dist && cp a.in dist/a.js\n\
     other.txt: a.in\n  build: cp a.in other.txt\n",
    &[("a.in", "x")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.clean(&["dist/*.js".to_string()]).unwrap();
  assert!(!exists(&project.path("dist/a.js")));
  assert!(exists(&project.path("other.txt")));
}

// =============================================================================
// Determinism
// =============================================================================

#[test]
fn output_lists_are_deterministic_across_compiles() {
  let project = Project::new(
    "z.out y.out: in.txt\n  build: touch z.out y.out\n\
     implicit %{1}.gen: src/*.dat\n  build: cp %{IN} %{OUT}\n",
    &[("in.txt", ""), ("src/p.dat", ""), ("src/q.dat", "")],
  );
  let first = project.engine().outputs();
  let second = project.engine().outputs();
  assert_eq!(first, second);
  assert_eq!(first, vec!["src/p.gen", "src/q.gen", "y.out", "z.out"]);
}

#[test]
fn deps_cover_glob_expanded_inputs() {
  let project = Project::new(
    "bundle.txt: src/*.part\n  build: cat src/*.part > bundle.txt\n",
    &[("src/1.part", "a"), ("src/2.part", "b")],
  );
  let engine = project.engine();
  let deps = engine.deps();
  assert_eq!(deps["bundle.txt"], vec!["src/1.part", "src/2.part"]);
}

// =============================================================================
// Hash database lifecycle
// =============================================================================

#[test]
fn close_persists_an_entry_per_output() {
  let project = Project::new(
    "x.out y.out: in.txt\n  build: touch x.out y.out\n",
    &[("in.txt", "")],
  );
  let mut engine = project.engine();
  engine.build(&[]).unwrap();
  engine.close().unwrap();

  let db = HashDb::open(project.path(".bit.json")).unwrap();
  assert!(db.get("x.out").is_some());
  assert!(db.get("y.out").is_some());
  assert!(db.get("in.txt").is_some());
}

#[test]
fn command_splices_see_exported_variables() {
  let project = Project::new(
    "export GREETING = hello\nname = %(printf \"$GREETING\")%-world\n\
     %{name}.txt: in.txt\n  build: touch %{OUT}\n",
    &[("in.txt", "")],
  );
  let engine = project.engine();
  assert_eq!(engine.outputs(), vec!["hello-world.txt"]);
}
