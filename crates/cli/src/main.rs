//! bit: a simple yet powerful content-aware build tool.
//!
//! Loads a Bitfile, compiles it into a target graph and runs one of the
//! output modes: build (the default), clean, list, describe or dot. Errors
//! that carry a Bitfile position are rendered against the offending source
//! line with a caret.

use std::fs;
use std::path::PathBuf;
use std::process::exit;
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tracing_subscriber::FmtSubscriber;

use bit_engine::{Engine, EngineError, LogLevel, Logger};

#[derive(Parser)]
#[command(name = "bit", version, about = "A simple yet powerful build tool")]
struct Cli {
  /// Bitfile to load.
  #[arg(short = 'f', long = "file", default_value = "Bitfile")]
  file: PathBuf,

  /// Change to directory before running.
  #[arg(short = 'C', long = "chdir", value_name = "DIR")]
  chdir: Option<PathBuf>,

  /// Print timing information.
  #[arg(short = 't', long)]
  timing: bool,

  /// Print dependency graph as a .dot file.
  #[arg(long, group = "command")]
  dot: bool,

  /// List available targets.
  #[arg(short = 'l', long, group = "command")]
  list: bool,

  /// Describe an aspect of the build.
  #[arg(short = 'D', long, value_name = "ASPECT", group = "command")]
  describe: Option<Aspect>,

  /// Clean targets.
  #[arg(short = 'c', long, group = "command")]
  clean: bool,

  /// Log level.
  #[arg(long, default_value = "info")]
  level: LogLevel,

  /// Enable debug logging.
  #[arg(long, conflicts_with = "trace")]
  debug: bool,

  /// Enable trace logging.
  #[arg(long)]
  trace: bool,

  /// Targets to run.
  targets: Vec<String>,
}

#[derive(ValueEnum, Clone, Copy)]
enum Aspect {
  /// List all files bit has determined are inputs and outputs.
  Files,
  /// Show the dependency graph.
  Deps,
  /// List all targets.
  Targets,
  /// List all loaded ignore patterns (from .gitignore files).
  Ignored,
}

fn main() {
  let cli = Cli::parse();

  let level = if cli.trace {
    LogLevel::Trace
  } else if cli.debug {
    LogLevel::Debug
  } else {
    cli.level
  };
  let logger = Logger::new(level);
  let tracing_level = match level {
    LogLevel::Trace => tracing::Level::TRACE,
    LogLevel::Debug => tracing::Level::DEBUG,
    _ => tracing::Level::WARN,
  };
  let _ = FmtSubscriber::builder()
    .with_max_level(tracing_level)
    .with_target(false)
    .without_time()
    .try_init();

  if let Err(err) = run(&cli, &logger) {
    match err.downcast_ref::<EngineError>() {
      Some(engine_err) => report(&cli, &logger, engine_err),
      None => logger.error(format!("error: {err:#}")),
    }
    exit(1);
  }
}

fn run(cli: &Cli, logger: &Logger) -> anyhow::Result<()> {
  if let Some(dir) = &cli.chdir {
    std::env::set_current_dir(dir)
      .with_context(|| format!("failed to change directory to {dir:?}"))?;
  }

  let source =
    fs::read_to_string(&cli.file).with_context(|| format!("failed to read {:?}", cli.file))?;
  let start = Instant::now();

  let bitfile = bit_parser::parse(&source).map_err(EngineError::from)?;
  let cwd = std::env::current_dir().context("failed to get working directory")?;
  let mut engine = Engine::compile(logger.clone(), cwd, bitfile)?;

  if cli.list || matches!(cli.describe, Some(Aspect::Targets)) {
    for target in engine.outputs() {
      println!("{target}");
    }
  } else if cli.clean {
    engine.clean(&cli.targets)?;
  } else if let Some(Aspect::Deps) = cli.describe {
    print_deps(&engine);
  } else if let Some(Aspect::Files) = cli.describe {
    for file in engine.files() {
      println!("{file}");
    }
  } else if let Some(Aspect::Ignored) = cli.describe {
    for pattern in engine.ignored() {
      println!("{pattern}");
    }
  } else if cli.dot {
    println!("digraph {{");
    for (output, deps) in engine.deps() {
      for dep in deps {
        println!("\t{output:?} -> {dep:?};");
      }
    }
    println!("}}");
  } else {
    engine.build(&cli.targets)?;
    engine.close()?;
  }

  if cli.timing {
    logger.notice(format!("Completed in {:.3}s", start.elapsed().as_secs_f64()));
  }
  Ok(())
}

/// Dependency edges as Make-style rules, wrapped with continuations at 80
/// columns.
fn print_deps(engine: &Engine) {
  for (output, deps) in engine.deps() {
    let mut width = output.len() + 1;
    print!("{output}:");
    for dep in deps {
      if width + dep.len() > 80 {
        print!(" \\\n\t");
        width = 8;
      }
      width += dep.len();
      print!(" {dep}");
    }
    println!();
  }
}

/// Render an error against its Bitfile source line, with a caret under the
/// offending column.
fn report(cli: &Cli, logger: &Logger, err: &EngineError) {
  let Some(pos) = err.position() else {
    logger.error(format!("error: {err}"));
    return;
  };
  let name = cli
    .file
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_else(|| cli.file.display().to_string());
  let prefix = format!("{name}:{}:{}: ", pos.line, pos.column);
  let source = fs::read_to_string(&cli.file).unwrap_or_default();
  match source.lines().nth(pos.line as usize - 1) {
    Some(line) => {
      logger.info(format!("{prefix}{line}"));
      let indent = " ".repeat(prefix.len() + pos.column as usize - 1);
      logger.error(format!("{indent}^ error: {}", err.message()));
    }
    None => logger.error(format!("{prefix}error: {}", err.message())),
  }
}
