//! Dependency Descriptor & Project Builder
//!
//! Materializes a cdylib cargo project for sources that need crates:
//!
//! ```text
//! <root>/
//! ├── Cargo.toml      [package] [lib] crate-type = ["cdylib"] [dependencies] [profile.release]
//! └── src/lib.rs      source with embedded dependency declarations removed
//! ```

mod builder;
mod dependency;
mod embedded;
mod manifest;

pub use builder::{create_project, ProjectDescriptor, PROJECT_VERSION};
pub use dependency::{canonical_dependencies, hash_dependencies, DependencySpec};
pub use embedded::{
    has_embedded_dependencies, parse_embedded_dependencies, strip_embedded_dependencies,
};
pub use manifest::render_manifest;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectError {
    #[error("dependency name must not be empty")]
    EmptyDependencyName,

    #[error("invalid dependency `{0}`")]
    InvalidDependency(String),

    #[error("invalid project name `{0}`")]
    InvalidName(String),

    #[error("invalid embedded cargo manifest: {0}")]
    EmbeddedManifest(#[from] toml::de::Error),

    #[error("failed to render manifest: {0}")]
    Manifest(#[from] toml::ser::Error),

    #[error("project I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ProjectError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProjectError::Io {
            path: path.into(),
            source,
        }
    }
}
