//! Deterministic cache keys

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::compiler::{BuildConfig, BuildMode, BuildUnit};
use crate::project::{canonical_dependencies, DependencySpec};

/// Lowercase hex SHA-256 of the source text
pub fn content_digest(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// 64-bit code hash recorded in metadata, taken from the digest prefix
pub fn code_hash(digest: &str) -> u64 {
    digest
        .get(..16)
        .and_then(|prefix| u64::from_str_radix(prefix, 16).ok())
        .unwrap_or_default()
}

/// Canonical text of everything besides the source that shapes a project
/// artifact; also recorded as the entry's `build_config`
pub fn project_inputs(
    dependencies: &[DependencySpec],
    mode: BuildMode,
    config: &BuildConfig,
) -> String {
    format!(
        "deps={};mode={};{}",
        canonical_dependencies(dependencies),
        mode,
        config.source_inputs()
    )
}

/// 64-character lowercase hex key identifying one build
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Key for a single-file build: digest of (source digest, canonical config)
    pub fn for_unit(unit: &BuildUnit) -> Self {
        Self::derive(&content_digest(&unit.source), &unit.config.canonical())
    }

    /// Key for a project build: digest of (source digest, canonical
    /// dependencies, build mode, edition, lowering revision, markers,
    /// helper flag)
    ///
    /// Optimization, debug info and target come from the cargo profile and
    /// do not enter the key.
    pub fn for_project(
        source: &str,
        dependencies: &[DependencySpec],
        mode: BuildMode,
        config: &BuildConfig,
    ) -> Self {
        Self::derive(&content_digest(source), &project_inputs(dependencies, mode, config))
    }

    fn derive(digest: &str, inputs: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(digest.as_bytes());
        hasher.update(b"\n");
        hasher.update(inputs.as_bytes());
        CacheKey(hex::encode(hasher.finalize()))
    }

    /// Accept an existing key string, e.g. a file stem read back from disk
    pub fn parse(text: &str) -> Option<Self> {
        let valid = text.len() == 64
            && text
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| CacheKey(text.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, for crate names and log lines
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(source: &str) -> BuildUnit {
        BuildUnit::new(source, BuildConfig::default())
    }

    #[test]
    fn test_key_is_deterministic() {
        let a = CacheKey::for_unit(&unit("fn a() {}"));
        let b = CacheKey::for_unit(&unit("fn a() {}"));
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 64);
        assert!(CacheKey::parse(a.as_str()).is_some());
    }

    #[test]
    fn test_key_sensitive_to_source_and_config() {
        let base = CacheKey::for_unit(&unit("fn a() {}"));
        assert_ne!(base, CacheKey::for_unit(&unit("fn a() { }")));

        let mut config = BuildConfig::default();
        config.opt_level = 0;
        assert_ne!(base, CacheKey::for_unit(&BuildUnit::new("fn a() {}", config)));

        let mut config = BuildConfig::default();
        config.target_triple = Some("wasm32-unknown-unknown".into());
        assert_ne!(base, CacheKey::for_unit(&BuildUnit::new("fn a() {}", config)));
    }

    #[test]
    fn test_project_key_ignores_dependency_order() {
        let serde = DependencySpec::new("serde")
            .with_version("1")
            .with_features(["derive", "alloc"]);
        let rand = DependencySpec::new("rand").with_version("0.8");
        let serde_reordered = DependencySpec::new("serde")
            .with_version("1")
            .with_features(["alloc", "derive"]);

        let config = BuildConfig::default();
        let a = CacheKey::for_project("src", &[serde, rand.clone()], BuildMode::Release, &config);
        let b =
            CacheKey::for_project("src", &[rand, serde_reordered], BuildMode::Release, &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_project_key_sensitive_to_mode_and_deps() {
        let deps = [DependencySpec::new("rand").with_version("0.8")];
        let config = BuildConfig::default();
        let release = CacheKey::for_project("src", &deps, BuildMode::Release, &config);
        assert_ne!(release, CacheKey::for_project("src", &deps, BuildMode::Debug, &config));
        assert_ne!(release, CacheKey::for_project("src", &[], BuildMode::Release, &config));
    }

    #[test]
    fn test_project_key_sensitive_to_lowering_inputs() {
        let project =
            |config: &BuildConfig| CacheKey::for_project("src", &[], BuildMode::Debug, config);
        let base = project(&BuildConfig::default());

        let edition = BuildConfig {
            edition: "2024".into(),
            ..BuildConfig::default()
        };
        assert_ne!(base, project(&edition));

        let markers = BuildConfig {
            markers: vec!["julia".into()],
            ..BuildConfig::default()
        };
        assert_ne!(base, project(&markers));

        let helpers = BuildConfig {
            ownership_helpers: true,
            ..BuildConfig::default()
        };
        assert_ne!(base, project(&helpers));

        let reordered = BuildConfig {
            markers: vec!["no_mangle".into(), "export".into()],
            ..BuildConfig::default()
        };
        assert_eq!(base, project(&reordered));

        // profile-only settings stay out of project keys
        let optimized = BuildConfig {
            opt_level: 0,
            ..BuildConfig::default()
        };
        assert_eq!(base, project(&optimized));

        let inputs = project_inputs(&[], BuildMode::Debug, &BuildConfig::default());
        assert!(inputs.contains(&format!("lowering={}", crate::compiler::LOWERING_REVISION)));
    }

    #[test]
    fn test_unit_key_sensitive_to_markers_and_helpers() {
        let base = CacheKey::for_unit(&unit("fn a() {}"));
        let markers = BuildConfig {
            markers: vec!["julia".into()],
            ..BuildConfig::default()
        };
        assert_ne!(base, CacheKey::for_unit(&BuildUnit::new("fn a() {}", markers)));

        let helpers = BuildConfig {
            ownership_helpers: true,
            ..BuildConfig::default()
        };
        assert_ne!(base, CacheKey::for_unit(&BuildUnit::new("fn a() {}", helpers)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(CacheKey::parse("abc").is_none());
        assert!(CacheKey::parse(&"G".repeat(64)).is_none());
        assert!(CacheKey::parse(&"A".repeat(64)).is_none());
    }

    #[test]
    fn test_code_hash() {
        let digest = content_digest("x");
        assert_eq!(code_hash(&digest), u64::from_str_radix(&digest[..16], 16).unwrap());
        assert_eq!(code_hash("zz"), 0);
    }
}
