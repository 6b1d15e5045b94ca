//! Scoped structured logging and shell execution.
//!
//! The logger carries a level and an optional per-target scope. Scoped lines
//! are printed behind a fixed-width coloured margin so interleaved target
//! output stays readable; child process output is streamed through the CSI
//! rewriter so cursor tricks (progress bars, spinners) respect the margin.
//!
//! Shell commands run as `sh -c` with the engine's scoped environment laid
//! over the inherited one; stdout and stderr are drained line-by-line at Info
//! level.

pub mod csi;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use std::thread;

use owo_colors::{AnsiColors, OwoColorize, Stream};
use thiserror::Error;

use crate::hasher::Hasher;

const SCOPE_WIDTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum LogLevel {
  Trace,
  Debug,
  #[default]
  Info,
  Notice,
  Warn,
  Error,
}

impl FromStr for LogLevel {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "trace" => Ok(LogLevel::Trace),
      "debug" => Ok(LogLevel::Debug),
      "info" => Ok(LogLevel::Info),
      "notice" => Ok(LogLevel::Notice),
      "warn" => Ok(LogLevel::Warn),
      "error" => Ok(LogLevel::Error),
      _ => Err(format!("invalid log level {s:?}")),
    }
  }
}

impl fmt::Display for LogLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      LogLevel::Trace => "trace",
      LogLevel::Debug => "debug",
      LogLevel::Info => "info",
      LogLevel::Notice => "notice",
      LogLevel::Warn => "warn",
      LogLevel::Error => "error",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum ExecError {
  #[error("failed to run shell")]
  Io(#[from] io::Error),

  #[error("command exited with status {0}")]
  Failed(i32),
}

/// A leveled logger with an optional target scope.
#[derive(Debug, Clone)]
pub struct Logger {
  level: LogLevel,
  scope: String,
}

impl Logger {
  pub fn new(level: LogLevel) -> Self {
    Self { level, scope: String::new() }
  }

  /// A child logger whose output is prefixed with `scope`, truncated from
  /// the left and padded to a fixed width.
  pub fn scope(&self, scope: &str) -> Logger {
    let mut scope = scope.to_string();
    if scope.chars().count() > SCOPE_WIDTH {
      let tail: String = scope
        .chars()
        .rev()
        .take(SCOPE_WIDTH - 1)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
      scope = format!("…{tail}");
    }
    Logger { level: self.level, scope: format!("{:<width$}", scope, width = SCOPE_WIDTH) }
  }

  pub fn enabled(&self, level: LogLevel) -> bool {
    level >= self.level
  }

  /// Width of the margin written ahead of scoped output.
  fn margin(&self) -> usize {
    if self.scope.is_empty() { 0 } else { SCOPE_WIDTH + 2 }
  }

  fn prefix(&self) -> String {
    if self.scope.is_empty() {
      String::new()
    } else {
      format!(
        "{}| ",
        self.scope.if_supports_color(Stream::Stdout, |s| s.color(scope_colour(&self.scope)))
      )
    }
  }

  fn log(&self, level: LogLevel, msg: &str) {
    if !self.enabled(level) {
      return;
    }
    let colour = match level {
      LogLevel::Trace => Some(AnsiColors::BrightBlack),
      LogLevel::Debug => Some(AnsiColors::Blue),
      LogLevel::Info => None,
      LogLevel::Notice => Some(AnsiColors::Green),
      LogLevel::Warn => Some(AnsiColors::Yellow),
      LogLevel::Error => Some(AnsiColors::Red),
    };
    for line in msg.split('\n') {
      match colour {
        Some(c) => println!(
          "{}{}",
          self.prefix(),
          line.if_supports_color(Stream::Stdout, |s| s.color(c))
        ),
        None => println!("{}{}", self.prefix(), line),
      }
    }
  }

  pub fn trace(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Trace, msg.as_ref());
  }

  pub fn debug(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Debug, msg.as_ref());
  }

  pub fn info(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Info, msg.as_ref());
  }

  pub fn notice(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Notice, msg.as_ref());
  }

  pub fn warn(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Warn, msg.as_ref());
  }

  pub fn error(&self, msg: impl AsRef<str>) {
    self.log(LogLevel::Error, msg.as_ref());
  }

  /// Run `command` under `sh -c` in `dir`, streaming its output through this
  /// logger at Info level. `env` is laid over the inherited environment.
  pub fn exec(
    &self,
    dir: &Path,
    command: &str,
    env: &BTreeMap<String, String>,
  ) -> Result<(), ExecError> {
    if dir.as_os_str() != "." && !dir.as_os_str().is_empty() {
      self.notice(format!("$ cd {}", dir.display()));
    }
    for (i, line) in command.lines().enumerate() {
      if i == 0 {
        self.notice(format!("$ {line}"));
      } else {
        self.notice(format!("  {line}"));
      }
    }

    let mut child = Command::new("sh")
      .arg("-c")
      .arg(command)
      .current_dir(dir)
      .envs(env)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()?;

    let stdout = child.stdout.take().expect("stdout is piped");
    let stderr = child.stderr.take().expect("stderr is piped");
    thread::scope(|s| {
      s.spawn(|| self.drain(stderr));
      self.drain(stdout);
    });

    let status = child.wait()?;
    if !status.success() {
      return Err(ExecError::Failed(status.code().unwrap_or(-1)));
    }
    Ok(())
  }

  /// Capture the stdout of `command`, trimmed. Used for `%(...)%` splices
  /// and `hash` directives.
  pub fn capture(
    &self,
    dir: &Path,
    command: &str,
    env: &BTreeMap<String, String>,
  ) -> Result<String, ExecError> {
    self.debug(format!("$ {command}"));
    let output = Command::new("sh")
      .arg("-c")
      .arg(command)
      .current_dir(dir)
      .envs(env)
      .stdin(Stdio::null())
      .output()?;
    if !output.status.success() {
      return Err(ExecError::Failed(output.status.code().unwrap_or(-1)));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
  }

  fn drain(&self, reader: impl Read) {
    let reader = BufReader::new(reader);
    for line in reader.lines() {
      match line {
        Ok(line) => {
          let rewritten = csi::rewrite(line.as_bytes(), self.margin(), &self.prefix());
          self.info(String::from_utf8_lossy(&rewritten));
        }
        Err(err) => {
          self.error(format!("error reading command output: {err}"));
          break;
        }
      }
    }
  }
}

/// Stable scope colour, picked by hash so a target keeps its colour across
/// runs.
fn scope_colour(scope: &str) -> AnsiColors {
  const PALETTE: [AnsiColors; 6] = [
    AnsiColors::Cyan,
    AnsiColors::Magenta,
    AnsiColors::Blue,
    AnsiColors::Green,
    AnsiColors::Yellow,
    AnsiColors::BrightCyan,
  ];
  let mut h = Hasher::new();
  h.str(scope);
  PALETTE[(h.value() % PALETTE.len() as u64) as usize]
}
