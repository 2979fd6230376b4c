//! Crate-level error type

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::cache::CacheError;
use crate::compiler::CompileFailure;
use crate::project::ProjectError;
use crate::types::WireError;

/// Result type used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The toolchain exited unsuccessfully
    #[error("{0}")]
    Compile(Box<CompileFailure>),

    /// The toolchain reported success but the expected artifact is absent
    #[error("artifact missing after successful build: {}", path.display())]
    ArtifactMissing { path: PathBuf },

    #[error("symbol `{symbol}` not found in {}", library.display())]
    SymbolNotFound { symbol: String, library: PathBuf },

    #[error("failed to load library {}: {message}", path.display())]
    LibraryLoad { path: PathBuf, message: String },

    #[error("dependency `{dependency}` could not be resolved")]
    DependencyResolution { dependency: String, message: String },

    #[error("`{function}` expects {expected} argument(s), got {got}")]
    ArityMismatch {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("argument {index} of `{function}`: expected {expected}, got {got}")]
    ArgumentType {
        function: String,
        index: usize,
        expected: String,
        got: String,
    },

    #[error("`{function}` cannot be called: {reason}")]
    UnsupportedSignature { function: String, reason: String },

    #[error("function `{0}` is not registered")]
    FunctionNotFound(String),

    /// The library behind this handle has been unloaded
    #[error("library handle {0} is stale")]
    StaleHandle(u64),

    #[error("too many arguments: {0} (max {})", crate::ffi::MAX_ARITY)]
    TooManyArgs(usize),

    #[error(transparent)]
    Wire(#[from] WireError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error("failed to run `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl From<CompileFailure> for Error {
    fn from(failure: CompileFailure) -> Self {
        Error::Compile(Box::new(failure))
    }
}

impl Error {
    /// The structured compile failure, if this is one
    pub fn compile_failure(&self) -> Option<&CompileFailure> {
        match self {
            Error::Compile(failure) => Some(failure),
            _ => None,
        }
    }
}
