//! Cache Manager
//!
//! Content-addressed storage for compiled artifacts. Keys are SHA-256
//! digests of everything that determines the artifact: the source text,
//! the canonical build configuration and, for project builds, the
//! canonical dependency set and build mode.
//!
//! Corruption never surfaces as an error. A torn or unreadable entry is a
//! miss and the caller rebuilds.

mod error;
mod key;
mod metadata;
mod store;

pub use error::CacheError;
pub use key::{code_hash, content_digest, project_inputs, CacheKey};
pub use metadata::{CacheEntry, CacheMetadata};
pub use store::{CacheManager, CACHE_DIR_ENV};

/// Namespace holding dependency-bearing project builds
pub const PROJECTS_NAMESPACE: &str = "projects";
