//! Gitignore-aware file globbing.
//!
//! The globber walks the working tree once per run, loading `.gitignore`
//! files from every directory it visits and pruning ignored directories from
//! the walk. Queries match doublestar-style patterns (`*`, `**/`, `?`,
//! `{a,b}`, `[abc]`) against the scanned tree plus whatever extra paths the
//! caller supplies; the engine passes its declared outputs, which may not
//! exist on disk yet.
//!
//! Scan matches are cached per pattern; matches against the extra list are
//! recomputed every query, since outputs are discovered mid-build.

pub mod ignore;

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use ignore::{DEFAULT_IGNORE, load_git_ignore};

/// Glob meta-characters. A string containing none of these is a plain path.
const GLOB_CHARS: &str = "*?{}[]";

pub fn is_glob(pattern: &str) -> bool {
  pattern.chars().any(|c| GLOB_CHARS.contains(c))
}

#[derive(Debug, Error)]
pub enum GlobError {
  #[error("failed to walk {path:?}")]
  Walk {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("invalid glob pattern {pattern:?}")]
  Pattern {
    pattern: String,
    #[source]
    source: globset::Error,
  },
}

/// A file globber rooted at a working directory.
#[derive(Debug)]
pub struct Globber {
  files: Vec<String>,
  ignored: Vec<String>,
  cache: RefCell<HashMap<String, (GlobMatcher, Vec<String>)>>,
}

impl Globber {
  /// Walk the tree rooted at `dir`, applying ignore patterns as they are
  /// discovered. The resulting file list is sorted and relative to `dir`.
  pub fn new(dir: &Path) -> Result<Self, GlobError> {
    let mut patterns: Vec<String> = DEFAULT_IGNORE.iter().map(|s| s.to_string()).collect();
    patterns.extend(load_git_ignore(dir));
    let matchers: RefCell<Vec<GlobMatcher>> = RefCell::new(
      patterns.iter().map(|p| compile(p)).collect::<Result<_, _>>()?,
    );
    let ignored: RefCell<Vec<String>> = RefCell::new(patterns);
    let errors: RefCell<Option<GlobError>> = RefCell::new(None);

    let mut files = Vec::new();
    let walker = WalkDir::new(dir).sort_by_file_name().into_iter().filter_entry(|entry| {
      let Ok(rel) = entry.path().strip_prefix(dir) else {
        return true;
      };
      if rel.as_os_str().is_empty() {
        return true; // the root itself
      }
      let rel = rel.to_string_lossy();
      if matchers.borrow().iter().any(|m| m.is_match(rel.as_ref())) {
        return false;
      }
      if entry.file_type().is_dir() {
        for pattern in load_git_ignore(entry.path()) {
          match compile(&pattern) {
            Ok(m) => {
              matchers.borrow_mut().push(m);
              ignored.borrow_mut().push(pattern);
            }
            Err(err) => {
              errors.borrow_mut().get_or_insert(err);
            }
          }
        }
      }
      true
    });

    for entry in walker {
      let entry = entry.map_err(|source| GlobError::Walk { path: dir.to_path_buf(), source })?;
      let Ok(rel) = entry.path().strip_prefix(dir) else { continue };
      if rel.as_os_str().is_empty() {
        continue;
      }
      files.push(rel.to_string_lossy().into_owned());
    }
    if let Some(err) = errors.into_inner() {
      return Err(err);
    }
    files.sort();
    debug!(files = files.len(), "scanned working tree");
    Ok(Self { files, ignored: ignored.into_inner(), cache: RefCell::new(HashMap::new()) })
  }

  /// All known paths: the scanned tree unioned with `extra`, sorted.
  pub fn files(&self, extra: &[String]) -> Vec<String> {
    let mut out = self.files.clone();
    for path in extra {
      if self.files.binary_search(path).is_err() {
        out.push(path.clone());
      }
    }
    out.sort();
    out.dedup();
    out
  }

  /// The ignore patterns in effect for this run.
  pub fn ignored(&self) -> &[String] {
    &self.ignored
  }

  /// Match `glob` against the known files plus `extra`. A pattern without
  /// glob meta-characters is returned as-is.
  pub fn matches(&self, glob: &str, extra: &[String]) -> Result<Vec<String>, GlobError> {
    if !is_glob(glob) {
      return Ok(vec![glob.to_string()]);
    }
    let mut cache = self.cache.borrow_mut();
    if !cache.contains_key(glob) {
      let matcher = compile(glob)?;
      // Seek to the literal directory prefix, then match forward only while
      // the prefix still applies.
      let meta = glob.find(|c| GLOB_CHARS.contains(c)).unwrap_or(glob.len());
      let prefix = &glob[..meta];
      let start = self.files.partition_point(|f| f.as_str() < prefix);
      let mut found = Vec::new();
      for file in &self.files[start..] {
        if !file.starts_with(prefix) {
          break;
        }
        if matcher.is_match(file) {
          found.push(file.clone());
        }
      }
      cache.insert(glob.to_string(), (matcher, found));
    }
    let (matcher, found) = &cache[glob];
    let mut out = found.clone();
    for path in extra {
      if matcher.is_match(path) {
        out.push(path.clone());
      }
    }
    out.sort();
    out.dedup();
    Ok(out)
  }
}

fn compile(pattern: &str) -> Result<GlobMatcher, GlobError> {
  GlobBuilder::new(pattern)
    .literal_separator(true)
    .build()
    .map(|g| g.compile_matcher())
    .map_err(|source| GlobError::Pattern { pattern: pattern.to_string(), source })
}
