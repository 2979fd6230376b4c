//! Library Registry & Dispatcher
//!
//! Loads compiled artifacts and calls their exported functions.
//!
//! # Architecture
//!
//! ```text
//! Session::call("add", [I32(10), I32(20)])
//!       │
//!       ▼
//! DispatchTable (name → FunctionDescriptor)
//!       │  arity + argument kinds checked here
//!       ▼
//! FastPath or generic step chain (call.rs)
//!       │
//!       ▼
//! extern "C" fn at an address resolved through LibraryRegistry
//! ```
//!
//! Libraries are tracked by canonical path. Unloading consumes the handle,
//! and descriptors of an unloaded library report `StaleHandle`.

mod call;
mod dispatch;
mod loader;
mod registry;

pub use call::{call, MAX_ARITY, MAX_SUM_ARITY};
pub use dispatch::{DispatchTable, FastPath, FunctionDescriptor};
pub use loader::{library_filename, LoadedLibrary};
pub use registry::{LibraryHandle, LibraryRegistry};

#[cfg(test)]
mod tests;
