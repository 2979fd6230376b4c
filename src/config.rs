//! Nativecall Configuration
//!
//! Handles parsing and management of nativecall.toml configuration files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::cache::CacheManager;
use crate::compiler::{BuildConfig, BuildMode};
use crate::signature::DEFAULT_MARKERS;

/// File name searched for by [`NativecallConfig::find_and_load`].
pub const CONFIG_FILE: &str = "nativecall.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Config file not found: {0}")]
    NotFound(String),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Root configuration structure matching nativecall.toml.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NativecallConfig {
    /// Artifact cache location and limits
    #[serde(default)]
    pub cache: CacheSettings,

    /// External toolchain binaries
    #[serde(default)]
    pub toolchain: ToolchainSettings,

    /// Build options folded into cache keys
    #[serde(default)]
    pub build: BuildSettings,

    /// Export marker attributes
    #[serde(default)]
    pub exports: ExportSettings,
}

impl NativecallConfig {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: NativecallConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration from the current directory or parents.
    pub fn load_from_cwd() -> ConfigResult<Self> {
        let cwd = std::env::current_dir().map_err(ConfigError::Io)?;
        Self::find_and_load(&cwd)
    }

    /// Find and load configuration by searching up from the given directory.
    ///
    /// Falls back to defaults when no file exists up to the filesystem root.
    pub fn find_and_load(start_dir: &Path) -> ConfigResult<Self> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return Self::load(&config_path);
            }
            if !dir.pop() {
                return Ok(Self::default());
            }
        }
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Cache root: the configured directory, or the version-scoped default
    pub fn cache_root(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(CacheManager::default_root)
    }

    /// Single-file build configuration
    pub fn build_config(&self) -> BuildConfig {
        BuildConfig {
            opt_level: self.build.opt_level.min(3),
            debug_info: self.build.debug_info,
            target_triple: self.build.target.clone(),
            edition: self.build.edition.clone(),
            markers: self.exports.markers.clone(),
            ownership_helpers: self.exports.ownership_helpers,
        }
    }

    /// Mode used for dependency-bearing project builds
    pub fn build_mode(&self) -> BuildMode {
        if self.build.release {
            BuildMode::Release
        } else {
            BuildMode::Debug
        }
    }
}

/// Cache settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    /// Cache root; `$NATIVECALL_CACHE_DIR` or `~/.cache/nativecall` when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Entries older than this are pruned by `ncall cache prune`
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,

    /// Size cap applied after age pruning
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_max_age_days() -> u64 {
    30
}

impl CacheSettings {
    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_days * 24 * 60 * 60)
    }

    pub fn max_size_bytes(&self) -> Option<u64> {
        self.max_size_mb.map(|mb| mb * 1024 * 1024)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: None,
            max_age_days: default_max_age_days(),
            max_size_mb: None,
        }
    }
}

/// Toolchain binaries, resolved through `PATH` at invocation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolchainSettings {
    #[serde(default = "default_rustc")]
    pub rustc: String,

    #[serde(default = "default_cargo")]
    pub cargo: String,
}

fn default_rustc() -> String {
    "rustc".to_string()
}

fn default_cargo() -> String {
    "cargo".to_string()
}

impl Default for ToolchainSettings {
    fn default() -> Self {
        Self {
            rustc: default_rustc(),
            cargo: default_cargo(),
        }
    }
}

/// Build configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BuildSettings {
    /// Optimization level (0-3)
    #[serde(default = "default_opt_level")]
    pub opt_level: u8,

    /// Emit debug info
    #[serde(default)]
    pub debug_info: bool,

    /// Target triple; host when unset
    #[serde(default)]
    pub target: Option<String>,

    /// Rust edition of compiled sources
    #[serde(default = "default_edition")]
    pub edition: String,

    /// Keep an LLVM IR dump next to each cached artifact
    #[serde(default)]
    pub emit_ir: bool,

    /// Build dependency projects with `--release`
    #[serde(default = "default_true")]
    pub release: bool,
}

fn default_opt_level() -> u8 {
    2
}

fn default_edition() -> String {
    "2021".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            opt_level: default_opt_level(),
            debug_info: false,
            target: None,
            edition: default_edition(),
            emit_ir: false,
            release: true,
        }
    }
}

/// Export marker configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExportSettings {
    #[serde(default = "default_markers")]
    pub markers: Vec<String>,

    /// Append the `nc_box_*` / `nc_rc_*` / `nc_arc_*` helpers to every build
    #[serde(default)]
    pub ownership_helpers: bool,
}

fn default_markers() -> Vec<String> {
    DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect()
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            markers: default_markers(),
            ownership_helpers: false,
        }
    }
}
