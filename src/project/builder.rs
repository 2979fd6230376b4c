//! Isolated build units on disk

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use super::dependency::DependencySpec;
use super::embedded::strip_embedded_dependencies;
use super::manifest::render_manifest;
use super::ProjectError;

/// Version written into generated manifests
pub const PROJECT_VERSION: &str = "0.1.0";

/// A materialized cargo project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectDescriptor {
    pub name: String,
    pub version: String,
    pub edition: String,
    pub dependencies: Vec<DependencySpec>,
    pub root: PathBuf,
    /// Supplied by the caller; `cleanup` leaves it in place
    pub persistent: bool,
}

impl ProjectDescriptor {
    /// Descriptor without touching the filesystem
    pub fn describe(
        name: impl Into<String>,
        dependencies: Vec<DependencySpec>,
        edition: impl Into<String>,
        root: PathBuf,
    ) -> Self {
        Self {
            name: name.into(),
            version: PROJECT_VERSION.to_string(),
            edition: edition.into(),
            dependencies,
            root,
            persistent: true,
        }
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("Cargo.toml")
    }

    pub fn source_path(&self) -> PathBuf {
        self.root.join("src").join("lib.rs")
    }

    /// File stem cargo gives the library: hyphens become underscores
    pub fn lib_name(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Write `Cargo.toml`
    pub fn write_manifest(&self) -> Result<PathBuf, ProjectError> {
        let path = self.manifest_path();
        let manifest = render_manifest(self)?;
        fs::write(&path, manifest).map_err(|e| ProjectError::io(&path, e))?;
        Ok(path)
    }

    /// Write `src/lib.rs` with embedded dependency declarations removed
    pub fn write_source(&self, source: &str) -> Result<PathBuf, ProjectError> {
        let path = self.source_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| ProjectError::io(dir, e))?;
        }
        let mut body = strip_embedded_dependencies(source);
        body.push('\n');
        fs::write(&path, body).map_err(|e| ProjectError::io(&path, e))?;
        Ok(path)
    }

    /// Remove the project directory unless the caller supplied it
    pub fn cleanup(&self) -> Result<(), ProjectError> {
        if self.persistent {
            debug!("keeping persistent project at {}", self.root.display());
            return Ok(());
        }
        match fs::remove_dir_all(&self.root) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                warn!("failed to remove project {}: {}", self.root.display(), e);
                Err(ProjectError::io(&self.root, e))
            }
        }
    }
}

/// Create the project directory
///
/// Without `path` the root is a fresh temporary directory that survives
/// until [`ProjectDescriptor::cleanup`].
pub fn create_project(
    name: &str,
    dependencies: &[DependencySpec],
    edition: &str,
    path: Option<&Path>,
) -> Result<ProjectDescriptor, ProjectError> {
    validate_name(name)?;
    for dep in dependencies {
        dep.validate()?;
    }

    let (root, persistent) = match path {
        Some(path) => {
            fs::create_dir_all(path).map_err(|e| ProjectError::io(path, e))?;
            (path.to_path_buf(), true)
        }
        None => {
            let dir = tempfile::Builder::new()
                .prefix("nativecall-")
                .tempdir()
                .map_err(|e| ProjectError::io(std::env::temp_dir(), e))?;
            (dir.keep(), false)
        }
    };

    let src = root.join("src");
    fs::create_dir_all(&src).map_err(|e| ProjectError::io(&src, e))?;
    debug!("created project {} at {}", name, root.display());

    Ok(ProjectDescriptor {
        name: name.to_string(),
        version: PROJECT_VERSION.to_string(),
        edition: edition.to_string(),
        dependencies: dependencies.to_vec(),
        root,
        persistent,
    })
}

fn validate_name(name: &str) -> Result<(), ProjectError> {
    let valid = name
        .chars()
        .next()
        .map_or(false, |c| c.is_ascii_alphabetic() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ProjectError::InvalidName(name.to_string()))
    }
}
