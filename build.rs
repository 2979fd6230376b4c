//! Build script for nativecall
//!
//! Records the target triple so single-file builds default to it and cache
//! keys name it explicitly.

use std::env;

fn main() {
    let target = env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());

    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rustc-env=NATIVECALL_HOST_TARGET={}", target);
}
