//! Ignore-file loading.
//!
//! Every directory visited by the tree walk may carry a `.gitignore`; its
//! entries are normalised into doublestar globs that apply anywhere under the
//! working root. Negation (`!pattern`) is not supported and such lines are
//! dropped, as are blanks and comments.

use std::fs;
use std::path::Path;

/// Ignore patterns that are always active: dotfiles and dot-directories.
pub const DEFAULT_IGNORE: [&str; 2] = ["**/.*", "**/.*/**"];

/// Load and normalise `.gitignore` entries from `dir`. Returns an empty list
/// when the file is missing or unreadable.
pub fn load_git_ignore(dir: &Path) -> Vec<String> {
  let Ok(content) = fs::read_to_string(dir.join(".gitignore")) else {
    return Vec::new();
  };
  let mut ignore = Vec::new();
  for line in content.lines() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') {
      continue;
    }
    let glob = if let Some(stripped) = line.strip_suffix('/') {
      format!("**/{stripped}/**/*")
    } else if !line.contains('/') {
      format!("**/{line}")
    } else {
      line.to_string()
    };
    ignore.push(glob);
  }
  ignore
}
