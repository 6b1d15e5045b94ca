//! bit-engine: the incremental build engine behind `bit`.
//!
//! The engine compiles a parsed Bitfile into a resolved target graph
//! (variable expansion, template inheritance, implicit-target
//! materialization, glob expansion) and drives dependency-ordered builds over
//! it. Builds are content-aware: every target carries a 64-bit fingerprint of
//! its input and output state, persisted across runs in a small JSON
//! database, and a target is rebuilt only when its stored and live
//! fingerprints disagree.

pub mod db;
pub mod engine;
pub mod error;
pub mod glob;
pub mod hasher;
pub mod logging;
pub mod memo;

pub use db::HashDb;
pub use engine::Engine;
pub use error::EngineError;
pub use glob::Globber;
pub use hasher::Hasher;
pub use logging::{LogLevel, Logger};
