//! Dynamic Library Loader
//!
//! Thin wrapper around libloading with a per-library symbol cache.

use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::path::{Path, PathBuf};

use libloading::{Library, Symbol};
use log::debug;
use parking_lot::Mutex;

use crate::error::{Error, Result};

/// A shared library mapped into this process
pub struct LoadedLibrary {
    path: PathBuf,
    library: Library,
    /// Resolved symbol addresses
    symbols: Mutex<HashMap<String, usize>>,
}

impl fmt::Debug for LoadedLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedLibrary")
            .field("path", &self.path)
            .field("cached_symbols", &self.symbols.lock().len())
            .finish()
    }
}

impl LoadedLibrary {
    /// Map the library at `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Safety: loading runs the library's initializers. Artifacts come
        // from our own builds or a path the caller chose.
        let library = unsafe { Library::new(&path) }.map_err(|e| Error::LibraryLoad {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!("loaded {}", path.display());

        Ok(Self {
            path,
            library,
            symbols: Mutex::new(HashMap::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Address of an exported symbol
    pub fn symbol(&self, name: &str) -> Result<usize> {
        let mut symbols = self.symbols.lock();
        if let Some(&addr) = symbols.get(name) {
            return Ok(addr);
        }

        let not_found = || Error::SymbolNotFound {
            symbol: name.to_string(),
            library: self.path.clone(),
        };
        let c_name = CString::new(name).map_err(|_| not_found())?;

        // Safety: only the address is read; callers give it a type through
        // a function descriptor.
        let symbol: Symbol<*const ()> =
            unsafe { self.library.get(c_name.as_bytes_with_nul()) }.map_err(|_| not_found())?;

        let addr = *symbol as usize;
        symbols.insert(name.to_string(), addr);
        Ok(addr)
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbol(name).is_ok()
    }

    /// Number of addresses resolved so far
    pub fn cached_symbols(&self) -> usize {
        self.symbols.lock().len()
    }

    /// Unmap the library, reporting failures
    pub fn close(self) -> Result<()> {
        let path = self.path;
        self.library.close().map_err(|e| Error::LibraryLoad {
            path: path.clone(),
            message: e.to_string(),
        })?;
        debug!("unloaded {}", path.display());
        Ok(())
    }
}

/// Platform file name for a library stem: `libfoo.so`, `libfoo.dylib`, `foo.dll`
pub fn library_filename(stem: &str) -> String {
    format!(
        "{}{}{}",
        std::env::consts::DLL_PREFIX,
        stem,
        std::env::consts::DLL_SUFFIX
    )
}
