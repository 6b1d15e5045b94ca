//! 64-bit FNV-1a fingerprint builder.
//!
//! Fingerprints summarise target state: output paths, file metadata and
//! derived digests all feed the same hash. FNV-1a is deterministic across
//! runs and platforms, which the hash database depends on.

use std::fmt;

const OFFSET64: u64 = 14695981039346656037;
const PRIME64: u64 = 1099511628211;

/// An incremental FNV-1a 64 hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hasher(u64);

impl Hasher {
  pub fn new() -> Self {
    Self(OFFSET64)
  }

  /// Fold a u64 into the hash.
  pub fn int(&mut self, data: u64) {
    self.0 ^= data;
    self.0 = self.0.wrapping_mul(PRIME64);
  }

  /// Fold another hash into this one.
  pub fn update(&mut self, other: Hasher) {
    self.int(other.0);
  }

  /// Fold a string in, one codepoint at a time.
  pub fn str(&mut self, data: &str) {
    for c in data.chars() {
      self.int(c as u64);
    }
  }

  /// Fold a byte slice in, one byte at a time.
  pub fn bytes(&mut self, data: &[u8]) {
    for b in data {
      self.int(*b as u64);
    }
  }

  pub fn value(&self) -> u64 {
    self.0
  }
}

impl Default for Hasher {
  fn default() -> Self {
    Self::new()
  }
}

impl From<u64> for Hasher {
  fn from(v: u64) -> Self {
    Self(v)
  }
}

impl fmt::Display for Hasher {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:x}", self.0)
  }
}
