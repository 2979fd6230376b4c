//! nativecall - compile Rust source on demand and call into it
//!
//! Hands source text to the system toolchain, caches the resulting shared
//! library under a content-derived key, loads it, and calls its exported
//! functions with typed host values.
//!
//! # Features
//!
//! - **Content-addressed cache**: SHA-256 keys over source and build options,
//!   atomic stores, torn-entry recovery, age and size pruning
//! - **Signature extraction**: marker-annotated functions and structs read
//!   with a depth-counting scanner, nested generics included
//! - **Export lowering**: `#[export]` items rewritten to `extern "C"`, with
//!   `Result`/`Option` returns carried in `#[repr(C)]` tagged structs
//! - **Project mode**: sources declaring crates are built as cargo projects
//! - **Typed dispatch**: arity and argument kinds checked before any native
//!   call
//!
//! # Example
//!
//! ```no_run
//! use nativecall::{Session, Value};
//!
//! let session = Session::default();
//! session.compile(r#"
//!     #[export]
//!     fn add(a: i32, b: i32) -> i32 { a + b }
//! "#)?;
//!
//! let sum = session.call("add", &[Value::I32(10), Value::I32(20)])?;
//! assert_eq!(sum, Value::I32(30));
//! # Ok::<(), nativecall::Error>(())
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │  signature   │   │    compiler   │   │    cache     │
//! │  extraction  │──▶│ lower + rustc │──▶│ <key>.so     │
//! └──────────────┘   │ / cargo build │   │ metadata/    │
//!                    └───────────────┘   └──────┬───────┘
//!                                               │
//!                    ┌───────────────┐   ┌──────▼───────┐
//!   Value args ─────▶│ dispatch table│◀──│   registry   │
//!                    └───────────────┘   └──────────────┘
//! ```

pub mod cache;
pub mod compiler;
pub mod config;
pub mod error;
pub mod ffi;
pub mod project;
pub mod session;
pub mod signature;
pub mod types;

pub use cache::{CacheKey, CacheManager, CacheMetadata};
pub use compiler::{BuildConfig, BuildMode, CompileFailure};
pub use config::NativecallConfig;
pub use error::{Error, Result};
pub use project::DependencySpec;
pub use session::{CompiledUnit, Session, SessionStats};
pub use signature::{FunctionSignature, SignatureExtractor, StructSignature};
pub use types::{HostType, TypeDesc, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
