//! Library Registry
//!
//! Tracks loaded libraries by canonical path and hands out handles.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use super::loader::LoadedLibrary;
use crate::error::{Error, Result};

/// Reference to a loaded library
///
/// Consumed by [`LibraryRegistry::unload`]; clones left behind go stale.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryHandle {
    id: u64,
    path: PathBuf,
}

impl LibraryHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Canonical artifact path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Loaded libraries, one per canonical path
#[derive(Debug, Default)]
pub struct LibraryRegistry {
    next_id: u64,
    libraries: HashMap<u64, LoadedLibrary>,
    by_path: HashMap<PathBuf, u64>,
}

impl LibraryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the library at `path`, or return the existing handle for it
    pub fn load(&mut self, path: &Path) -> Result<LibraryHandle> {
        let canonical = fs::canonicalize(path).map_err(|e| Error::LibraryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(&id) = self.by_path.get(&canonical) {
            return Ok(LibraryHandle {
                id,
                path: canonical,
            });
        }

        let library = LoadedLibrary::load(&canonical)?;
        self.next_id += 1;
        let id = self.next_id;
        self.libraries.insert(id, library);
        self.by_path.insert(canonical.clone(), id);
        info!("registered library {} as #{}", canonical.display(), id);

        Ok(LibraryHandle {
            id,
            path: canonical,
        })
    }

    /// The live library behind `handle`
    pub fn get(&self, handle: &LibraryHandle) -> Result<&LoadedLibrary> {
        self.libraries
            .get(&handle.id)
            .ok_or(Error::StaleHandle(handle.id))
    }

    /// Address of `name` in the library behind `handle`
    pub fn resolve(&self, handle: &LibraryHandle, name: &str) -> Result<usize> {
        self.get(handle)?.symbol(name)
    }

    pub fn is_loaded(&self, id: u64) -> bool {
        self.libraries.contains_key(&id)
    }

    /// Unmap the library; every copy of the handle becomes stale
    pub fn unload(&mut self, handle: LibraryHandle) -> Result<()> {
        let library = self
            .libraries
            .remove(&handle.id)
            .ok_or(Error::StaleHandle(handle.id))?;
        self.by_path.remove(&handle.path);
        info!("unloading library #{} ({})", handle.id, handle.path.display());
        library.close()
    }

    pub fn len(&self) -> usize {
        self.libraries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.is_empty()
    }

    /// Canonical paths of all loaded libraries
    pub fn paths(&self) -> Vec<&Path> {
        let mut paths: Vec<&Path> = self.by_path.keys().map(PathBuf::as_path).collect();
        paths.sort();
        paths
    }
}
