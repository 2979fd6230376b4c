//! Compiler Driver
//!
//! Turns source text into a loadable cdylib by invoking the external
//! toolchain, either `rustc` on a single file or `cargo build` on a
//! generated project.
//!
//! # Pipeline
//!
//! ```text
//! source ──► lower_exports ──► rustc --crate-type cdylib ──► <key>.so
//!                        └───► cargo build (project mode) ──► target/<mode>/lib<name>.so
//! ```
//!
//! Success is decided by exit status alone. A failed build yields a
//! [`CompileFailure`] carrying the diagnostics, the compiled source and the
//! exact command line.

mod diagnostics;
mod helpers;
mod lowering;
mod toolchain;

pub use diagnostics::{CompileFailure, SourceLocation};
pub use helpers::{helper_signatures, ownership_helpers, HELPER_TYPES};
pub use lowering::{lower_exports, Lowered, LoweringError};
pub use toolchain::{BuildOutput, Toolchain};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::cache::content_digest;
use crate::signature::DEFAULT_MARKERS;

/// Target triple this crate was built for
pub const HOST_TARGET: &str = env!("NATIVECALL_HOST_TARGET");

/// Bumped whenever export lowering changes the code it generates, so stale
/// artifacts stop matching their keys.
pub const LOWERING_REVISION: u32 = 2;

/// Options that determine a single-file artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildConfig {
    /// `-C opt-level`, 0 through 3
    pub opt_level: u8,
    pub debug_info: bool,
    /// Cross-compilation target; the host when `None`
    pub target_triple: Option<String>,
    pub edition: String,
    /// Export marker attribute names handed to lowering
    #[serde(default)]
    pub markers: Vec<String>,
    /// Append the scalar ownership helpers to every artifact
    #[serde(default)]
    pub ownership_helpers: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            opt_level: 2,
            debug_info: false,
            target_triple: None,
            edition: "2021".to_string(),
            markers: DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect(),
            ownership_helpers: false,
        }
    }
}

impl BuildConfig {
    pub fn target(&self) -> &str {
        self.target_triple.as_deref().unwrap_or(HOST_TARGET)
    }

    /// Stable text folded into single-file cache keys
    pub fn canonical(&self) -> String {
        format!(
            "opt-level={};debuginfo={};target={};{}",
            self.opt_level,
            u8::from(self.debug_info),
            self.target(),
            self.source_inputs()
        )
    }

    /// The part of [`canonical`](Self::canonical) that shapes the compiled
    /// text itself; project keys fold in this part only
    pub fn source_inputs(&self) -> String {
        let mut markers = self.markers.clone();
        markers.sort();
        markers.dedup();
        format!(
            "edition={};lowering={};markers={};helpers={}",
            self.edition,
            LOWERING_REVISION,
            markers.join(","),
            u8::from(self.ownership_helpers)
        )
    }
}

/// Source plus the options it is built with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
    pub source: String,
    pub config: BuildConfig,
}

impl BuildUnit {
    pub fn new(source: impl Into<String>, config: BuildConfig) -> Self {
        Self {
            source: source.into(),
            config,
        }
    }

    /// Crate name passed to rustc, unique per source text
    pub fn crate_name(&self) -> String {
        format!("nc_{}", &content_digest(&self.source)[..12])
    }
}

/// Cargo profile for project builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMode {
    Debug,
    Release,
}

impl BuildMode {
    /// Subdirectory of `target/` holding this profile's output
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildMode::Debug => "debug",
            BuildMode::Release => "release",
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}
