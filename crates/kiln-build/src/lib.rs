//! Build-context packaging for kiln.
//!
//! # Packaging pipeline
//!
//! ```text
//! kiln package
//!   1. Ignore rules ── <Dockerfile>.dockerignore → .dockerignore → defaults
//!   2. Walk         ── lexical order, ignored paths pruned
//!   3. Archive      ── tar + gzip, mtime/uid/gid fixed
//!   4. Digest       ── sha256-<base64> over the archive (skipped with --force)
//! ```
//!
//! # Always-included files
//!
//! The Dockerfile and the ignore file that governs it are added even when
//! the ignore patterns match them: the remote builder needs both.

pub mod context;
pub mod ignore;

pub use context::{BuildContext, ContextError, ContextLimits, ContextPackager, digest};
pub use ignore::{IgnoreMatcher, IgnoreSource};
