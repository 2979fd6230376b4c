//! Cache entry metadata

use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::key::{code_hash, CacheKey};

/// Metadata stored as `metadata/<key>.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub cache_key: String,
    /// Decimal string of a 64-bit hash of the source text
    pub code_hash: String,
    /// Canonical configuration the artifact was built with
    pub compiler_config: String,
    pub target_triple: String,
    /// ISO-8601 UTC creation time
    pub created_at: String,
    /// Exported function names
    #[serde(default)]
    pub functions: Vec<String>,
}

impl CacheMetadata {
    /// Metadata stamped with the current time
    pub fn new(
        key: &CacheKey,
        source_digest: &str,
        compiler_config: impl Into<String>,
        target_triple: impl Into<String>,
    ) -> Self {
        Self {
            cache_key: key.to_string(),
            code_hash: code_hash(source_digest).to_string(),
            compiler_config: compiler_config.into(),
            target_triple: target_triple.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<String>) -> Self {
        self.functions = functions;
        self
    }
}

/// A complete cache entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub artifact_path: PathBuf,
    pub metadata: CacheMetadata,
}
