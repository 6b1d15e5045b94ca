//! The persistent hash database.
//!
//! A single JSON object mapping output path to the last observed 64-bit
//! fingerprint, stored per working directory under the user cache dir as
//! `bit/<sha256_hex(cwd)>.json`. The file is loaded whole on open and written
//! back atomically on close (sibling tempfile, then rename), so a crashed run
//! never leaves a truncated database behind.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
  #[error("failed to locate the user cache directory")]
  NoCacheDir,

  #[error("failed to create cache directory {path:?}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to read hash database {path:?}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to decode hash database {path:?}")]
  Decode {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write hash database {path:?}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Persistent mapping from output path to fingerprint.
#[derive(Debug)]
pub struct HashDb {
  path: PathBuf,
  hashes: BTreeMap<String, u64>,
}

impl HashDb {
  /// The database path for builds rooted at `cwd`.
  pub fn default_path(cwd: &Path) -> Result<PathBuf, DbError> {
    let cache = dirs::cache_dir().ok_or(DbError::NoCacheDir)?;
    let dir = cache.join("bit");
    fs::create_dir_all(&dir).map_err(|source| DbError::CreateDir { path: dir.clone(), source })?;
    let digest = Sha256::digest(cwd.as_os_str().as_encoded_bytes());
    Ok(dir.join(format!("{digest:x}.json")))
  }

  /// Open the database at `path`. A missing file is an empty database; a
  /// file that fails to decode is fatal.
  pub fn open(path: PathBuf) -> Result<Self, DbError> {
    let hashes = match fs::read(&path) {
      Ok(data) => serde_json::from_slice(&data)
        .map_err(|source| DbError::Decode { path: path.clone(), source })?,
      Err(err) if err.kind() == io::ErrorKind::NotFound => BTreeMap::new(),
      Err(source) => return Err(DbError::Read { path: path.clone(), source }),
    };
    Ok(Self { path, hashes })
  }

  pub fn get(&self, path: &str) -> Option<u64> {
    self.hashes.get(path).copied()
  }

  pub fn set(&mut self, path: &str, hash: u64) {
    self.hashes.insert(path.to_string(), hash);
  }

  pub fn delete(&mut self, path: &str) {
    self.hashes.remove(path);
  }

  /// Persist the database: write a sibling tempfile and rename it into
  /// place.
  pub fn close(&self) -> Result<(), DbError> {
    let tmp = PathBuf::from(format!("{}~", self.path.display()));
    let write = |source| DbError::Write { path: self.path.clone(), source };
    let data = serde_json::to_vec(&self.hashes)
      .map_err(|source| DbError::Decode { path: self.path.clone(), source })?;
    fs::write(&tmp, data).map_err(write)?;
    fs::rename(&tmp, &self.path).map_err(write)?;
    Ok(())
  }
}
